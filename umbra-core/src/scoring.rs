//! Threat scoring over an entity set
//!
//! Each entity contributes `kind weight × confidence`. The raw sum passes
//! through a saturation curve so a handful of strong indicators lands in the
//! upper bands while further indicators add progressively less.

use crate::{Contribution, EntityKind, ExtractedEntity, ThreatAssessment, ThreatLevel};

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 10;

/// Raw contribution at which the curve reaches ~63% of its range
const SATURATION: f64 = 6.0;

/// Contributors named in the rationale
const RATIONALE_TOP: usize = 5;

/// Base severity weight per entity kind
pub fn kind_weight(kind: EntityKind) -> f64 {
    match kind {
        EntityKind::CredentialPair => 3.0,
        EntityKind::CryptoWallet => 2.5,
        EntityKind::OnionAddress => 1.5,
        EntityKind::IpAddress => 1.2,
        EntityKind::Domain => 1.0,
        EntityKind::Email => 0.8,
        EntityKind::Phone => 0.6,
    }
}

/// Score an entity set. Pure: the same set always yields the same assessment.
pub fn score(entities: &[ExtractedEntity]) -> ThreatAssessment {
    let mut contributions: Vec<Contribution> = entities
        .iter()
        .map(|e| Contribution {
            indicator: e.value.clone(),
            kind: e.kind,
            weight: kind_weight(e.kind) * e.confidence.clamp(0.0, 1.0),
        })
        .collect();

    // fixed order before summing keeps the float result stable
    contributions.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.indicator.cmp(&b.indicator))
    });

    let raw: f64 = contributions.iter().map(|c| c.weight).sum();
    let score = curve(raw);
    let level = ThreatLevel::from_score(score);
    let rationale = rationale(score, level, raw, &contributions);

    ThreatAssessment {
        score,
        level,
        contributions,
        rationale,
    }
}

fn curve(raw: f64) -> u8 {
    if !raw.is_finite() || raw <= 0.0 {
        return MIN_SCORE;
    }
    let scaled = 1.0 + 9.0 * (1.0 - (-raw / SATURATION).exp());
    (scaled.round() as u8).clamp(MIN_SCORE, MAX_SCORE)
}

fn rationale(score: u8, level: ThreatLevel, raw: f64, contributions: &[Contribution]) -> String {
    if contributions.is_empty() {
        return format!("Score {}/10 ({:?}): no indicators extracted", score, level);
    }

    let top: Vec<String> = contributions
        .iter()
        .take(RATIONALE_TOP)
        .map(|c| format!("{} {} ({:.2})", c.kind, c.indicator, c.weight))
        .collect();

    format!(
        "Score {}/10 ({:?}) from {} indicators, raw weight {:.2}. Top contributors: {}",
        score,
        level,
        contributions.len(),
        raw,
        top.join("; ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(kind: EntityKind, value: &str, confidence: f64) -> ExtractedEntity {
        let mut e = ExtractedEntity::new(kind, value.to_string(), "http://a.onion");
        e.confidence = confidence;
        e
    }

    #[test]
    fn test_empty_scores_minimum() {
        let assessment = score(&[]);
        assert_eq!(assessment.score, 1);
        assert_eq!(assessment.level, ThreatLevel::Low);
        assert!(assessment.contributions.is_empty());
    }

    #[test]
    fn test_score_bounded() {
        let entities: Vec<_> = (0..500)
            .map(|i| entity(EntityKind::CredentialPair, &format!("user{}:secretpw", i), 1.0))
            .collect();
        let assessment = score(&entities);
        assert_eq!(assessment.score, 10);
        assert_eq!(assessment.level, ThreatLevel::Critical);
    }

    #[test]
    fn test_weights_ordered() {
        let entities = vec![
            entity(EntityKind::Phone, "5551234567", 1.0),
            entity(EntityKind::CredentialPair, "root:toor1", 1.0),
            entity(EntityKind::Email, "a@b.net", 1.0),
            entity(EntityKind::CryptoWallet, "0xabc", 1.0),
        ];
        let assessment = score(&entities);
        let kinds: Vec<_> = assessment.contributions.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EntityKind::CredentialPair,
                EntityKind::CryptoWallet,
                EntityKind::Email,
                EntityKind::Phone
            ]
        );
        assert!(assessment.rationale.contains("root:toor1"));
    }

    #[test]
    fn test_order_independent() {
        let a = entity(EntityKind::Domain, "bad.net", 0.75);
        let b = entity(EntityKind::IpAddress, "45.1.2.3", 0.85);
        let c = entity(EntityKind::OnionAddress, "x.onion", 0.95);

        let forward = score(&[a.clone(), b.clone(), c.clone()]);
        let backward = score(&[c, b, a]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_more_indicators_never_lower() {
        let mut entities = Vec::new();
        let mut previous = score(&entities).score;
        for i in 0..30 {
            entities.push(entity(EntityKind::Email, &format!("u{}@bad.net", i), 0.9));
            let next = score(&entities).score;
            assert!(next >= previous);
            previous = next;
        }
    }

    #[test]
    fn test_single_wallet_band() {
        // 2.5 * 0.85 = 2.125 -> 1 + 9 * (1 - e^-0.354) = 3.7 -> 4
        let assessment = score(&[entity(EntityKind::CryptoWallet, "1abc", 0.85)]);
        assert_eq!(assessment.score, 4);
        assert_eq!(assessment.level, ThreatLevel::Medium);
    }
}
