//! Indicator extraction from fetched content
//!
//! Supports extraction of:
//! - Email addresses
//! - Cryptocurrency wallets (Bitcoin base58/bech32, Ethereum, Monero, Litecoin)
//! - IPv4 / IPv6 literals
//! - Onion service and clearnet domain names
//! - Credential pairs (`identifier:secret`)
//! - Phone numbers
//!
//! Families are matched in a fixed priority order and a span claimed by one
//! family is never re-matched by a later one.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use crate::ScrapedContent;

/// Confidence added each time a value recurs from another source URL
pub const REINFORCEMENT_STEP: f64 = 0.05;

/// Categories of extracted indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Email,
    CryptoWallet,
    IpAddress,
    Domain,
    OnionAddress,
    CredentialPair,
    Phone,
}

impl EntityKind {
    /// Confidence of a single sighting
    pub fn base_confidence(self) -> f64 {
        match self {
            Self::OnionAddress => 0.95,
            Self::Email => 0.9,
            Self::CryptoWallet => 0.85,
            Self::IpAddress => 0.85,
            Self::CredentialPair => 0.8,
            Self::Domain => 0.75,
            Self::Phone => 0.7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::CryptoWallet => "crypto-wallet",
            Self::IpAddress => "ip-address",
            Self::Domain => "domain",
            Self::OnionAddress => "onion-address",
            Self::CredentialPair => "credential-pair",
            Self::Phone => "phone",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized indicator and the URLs it was seen on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub kind: EntityKind,
    /// Normalized value; unique per kind within an investigation
    pub value: String,
    /// Wallet family (`btc`, `eth`, `xmr`, `ltc`) or IP version (`v4`, `v6`)
    pub qualifier: Option<String>,
    /// 0.0 - 1.0
    pub confidence: f64,
    /// Sorted, distinct
    pub sources: Vec<String>,
}

impl ExtractedEntity {
    pub fn new(kind: EntityKind, value: String, source: &str) -> Self {
        Self {
            kind,
            value,
            qualifier: None,
            confidence: kind.base_confidence(),
            sources: vec![source.to_string()],
        }
    }

    pub fn with_qualifier(mut self, qualifier: &str) -> Self {
        self.qualifier = Some(qualifier.to_string());
        self
    }

    /// Record a sighting from another URL; repeats of a known URL are ignored
    pub fn reinforce(&mut self, source: &str) -> bool {
        if self.sources.iter().any(|s| s == source) {
            return false;
        }
        self.sources.push(source.to_string());
        self.sources.sort();
        self.confidence = confidence_for(self.kind, self.sources.len());
        true
    }
}

/// Confidence after `sources` distinct sightings
pub fn confidence_for(kind: EntityKind, sources: usize) -> f64 {
    let extra = sources.saturating_sub(1) as f64;
    (kind.base_confidence() + REINFORCEMENT_STEP * extra).min(1.0)
}

/// Investigation-wide entity set, unique on (kind, value)
#[derive(Debug, Default, Clone)]
pub struct EntityLedger {
    entries: BTreeMap<(EntityKind, String), ExtractedEntity>,
}

impl EntityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from entities already attached to an investigation
    pub fn from_entities(entities: &[ExtractedEntity]) -> Self {
        let mut ledger = Self::new();
        ledger.absorb(entities.iter().cloned());
        ledger
    }

    /// Fold in entities; the outcome does not depend on arrival order
    pub fn absorb(&mut self, entities: impl IntoIterator<Item = ExtractedEntity>) {
        for entity in entities {
            let key = (entity.kind, entity.value.clone());
            match self.entries.get_mut(&key) {
                Some(existing) => {
                    for source in &entity.sources {
                        existing.reinforce(source);
                    }
                    if existing.qualifier.is_none() {
                        existing.qualifier = entity.qualifier;
                    }
                }
                None => {
                    let mut fresh = entity;
                    fresh.sources.sort();
                    fresh.sources.dedup();
                    fresh.confidence = confidence_for(fresh.kind, fresh.sources.len());
                    self.entries.insert(key, fresh);
                }
            }
        }
    }

    pub fn get(&self, kind: EntityKind, value: &str) -> Option<&ExtractedEntity> {
        self.entries.get(&(kind, value.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entities ordered by kind, then value
    pub fn into_entities(self) -> Vec<ExtractedEntity> {
        self.entries.into_values().collect()
    }
}

// Regex patterns for entity extraction
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").unwrap()
});

static BTC_LEGACY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[13][a-km-zA-HJ-NP-Z1-9]{25,34}\b").unwrap()
});

static BTC_BECH32_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bbc1[02-9ac-hj-np-z]{11,71}\b").unwrap()
});

static ETHEREUM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b0x[a-fA-F0-9]{40}\b").unwrap()
});

static MONERO_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b4[0-9AB][1-9A-HJ-NP-Za-km-z]{93}\b").unwrap()
});

static LITECOIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[LM][a-km-zA-HJ-NP-Z1-9]{26,33}\b").unwrap()
});

static IPV4_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b").unwrap()
});

static IPV6_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:(?:[0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}|(?:[0-9a-fA-F]{1,4}:){1,6}(?::[0-9a-fA-F]{1,4}){1,6})\b").unwrap()
});

static ONION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:[a-z2-7]{56}|[a-z2-7]{16})\.onion\b").unwrap()
});

static DOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,24}\b").unwrap()
});

static CREDENTIAL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z0-9._%+-]{3,}(?:@[A-Za-z0-9.-]+\.[A-Za-z]{2,})?):([^\s:]{4,})").unwrap()
});

static PHONE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+?1[-.\s]?)?(?:\([0-9]{3}\)|\b[0-9]{3})[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}\b|\+[1-9][0-9]{6,14}\b").unwrap()
});

/// Extract entities from one fetched page
pub fn extract(content: &ScrapedContent) -> Vec<ExtractedEntity> {
    extract_text(content.text(), content.url())
}

/// Extract entities from text found at `source`.
///
/// Each (kind, value) appears once, ordered by kind then value.
pub fn extract_text(text: &str, source: &str) -> Vec<ExtractedEntity> {
    let mut pass = Extraction::new(source);

    for m in IPV6_REGEX.find_iter(text) {
        if let Ok(ip) = m.as_str().parse::<Ipv6Addr>() {
            pass.add(m.start(), m.end(), EntityKind::IpAddress, ip.to_string(), Some("v6"));
        }
    }

    for caps in CREDENTIAL_REGEX.captures_iter(text) {
        let (Some(whole), Some(id), Some(secret)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let secret_str = secret.as_str().trim_end_matches(['.', ',', ';', ')', '"', '\'', '!', '?']);
        if let Some(value) = credential_value(id.as_str(), secret_str) {
            let end = whole.start() + id.as_str().len() + 1 + secret_str.len();
            pass.add(whole.start(), end, EntityKind::CredentialPair, value, None);
        }
    }

    for m in EMAIL_REGEX.find_iter(text) {
        let email = m.as_str().to_lowercase();
        // a mailbox on an onion service also names the service
        if let Some((_, host)) = email.split_once('@') {
            if ONION_REGEX.find(host).is_some_and(|o| o.as_str().len() == host.len()) {
                pass.record(EntityKind::OnionAddress, host.to_string(), None);
            }
        }
        pass.add(m.start(), m.end(), EntityKind::Email, email, None);
    }

    for m in ONION_REGEX.find_iter(text) {
        pass.add(m.start(), m.end(), EntityKind::OnionAddress, m.as_str().to_lowercase(), None);
    }

    for m in BTC_BECH32_REGEX.find_iter(text) {
        let value = m.as_str().to_lowercase();
        if is_valid_bech32(&value) {
            pass.add(m.start(), m.end(), EntityKind::CryptoWallet, value, Some("btc"));
        }
    }
    for m in BTC_LEGACY_REGEX.find_iter(text) {
        if is_valid_base58check(m.as_str(), &[0x00, 0x05]) {
            pass.add(m.start(), m.end(), EntityKind::CryptoWallet, m.as_str().to_string(), Some("btc"));
        }
    }
    for m in ETHEREUM_REGEX.find_iter(text) {
        pass.add(m.start(), m.end(), EntityKind::CryptoWallet, m.as_str().to_lowercase(), Some("eth"));
    }
    for m in MONERO_REGEX.find_iter(text) {
        pass.add(m.start(), m.end(), EntityKind::CryptoWallet, m.as_str().to_string(), Some("xmr"));
    }
    for m in LITECOIN_REGEX.find_iter(text) {
        if is_valid_base58check(m.as_str(), &[0x30, 0x32]) {
            pass.add(m.start(), m.end(), EntityKind::CryptoWallet, m.as_str().to_string(), Some("ltc"));
        }
    }

    for m in IPV4_REGEX.find_iter(text) {
        if let Ok(ip) = m.as_str().parse::<Ipv4Addr>() {
            if !ip.is_unspecified() && !ip.is_loopback() {
                pass.add(m.start(), m.end(), EntityKind::IpAddress, ip.to_string(), Some("v4"));
            }
        }
    }

    for m in PHONE_REGEX.find_iter(text) {
        let raw = m.as_str();
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if (10..=15).contains(&digits.len()) {
            let value = if raw.starts_with('+') { format!("+{}", digits) } else { digits };
            pass.add(m.start(), m.end(), EntityKind::Phone, value, None);
        }
    }

    for m in DOMAIN_REGEX.find_iter(text) {
        let domain = m.as_str().to_lowercase();
        if !domain.ends_with(".onion") && !is_ignored_domain(&domain) {
            pass.add(m.start(), m.end(), EntityKind::Domain, domain, None);
        }
    }

    pass.finish()
}

/// Claimed spans plus per-text dedup
struct Extraction<'a> {
    source: &'a str,
    claimed: Vec<(usize, usize)>,
    found: BTreeMap<(EntityKind, String), ExtractedEntity>,
}

impl<'a> Extraction<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            claimed: Vec::new(),
            found: BTreeMap::new(),
        }
    }

    fn add(&mut self, start: usize, end: usize, kind: EntityKind, value: String, qualifier: Option<&str>) {
        if self.claimed.iter().any(|&(s, e)| start < e && s < end) {
            return;
        }
        self.claimed.push((start, end));
        self.record(kind, value, qualifier);
    }

    /// Record without claiming a span
    fn record(&mut self, kind: EntityKind, value: String, qualifier: Option<&str>) {
        self.found.entry((kind, value.clone())).or_insert_with(|| {
            let entity = ExtractedEntity::new(kind, value, self.source);
            match qualifier {
                Some(q) => entity.with_qualifier(q),
                None => entity,
            }
        });
    }

    fn finish(self) -> Vec<ExtractedEntity> {
        self.found.into_values().collect()
    }
}

fn credential_value(identifier: &str, secret: &str) -> Option<String> {
    const SCHEMES: &[&str] = &["http", "https", "ftp", "mailto", "socks5", "socks5h", "irc", "xmpp"];

    if secret.len() < 4 || secret.starts_with("//") {
        return None;
    }
    if SCHEMES.contains(&identifier.to_ascii_lowercase().as_str()) {
        return None;
    }
    if identifier.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    // host:port
    if secret.len() <= 5 && secret.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if identifier.to_ascii_lowercase().ends_with(".onion") {
        return None;
    }

    let identifier = if identifier.contains('@') {
        identifier.to_lowercase()
    } else {
        identifier.to_string()
    };
    Some(format!("{}:{}", identifier, secret))
}

/// Benign, placeholder and file-name lookalike domains
fn is_ignored_domain(domain: &str) -> bool {
    const COMMON: &[&str] = &[
        "google.com", "facebook.com", "twitter.com", "github.com",
        "microsoft.com", "apple.com", "amazon.com", "youtube.com",
        "wikipedia.org", "reddit.com", "torproject.org",
    ];
    const PLACEHOLDER: &[&str] = &[
        "example.com", "example.org", "localhost", "test.com", "domain.com",
        "email.com", "website.com", "yoursite.com",
    ];
    const FILE_SUFFIXES: &[&str] = &[
        "html", "htm", "php", "asp", "aspx", "js", "css", "txt", "png",
        "jpg", "jpeg", "gif", "svg", "pdf", "exe", "json", "xml",
    ];

    if PLACEHOLDER.contains(&domain) {
        return true;
    }
    if COMMON.iter().any(|&c| domain == c || domain.ends_with(&format!(".{}", c))) {
        return true;
    }
    domain
        .rsplit('.')
        .next()
        .is_some_and(|tld| FILE_SUFFIXES.contains(&tld))
}

const BASE58_ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn base58_decode(input: &str) -> Option<Vec<u8>> {
    // little-endian accumulator
    let mut bytes: Vec<u8> = Vec::with_capacity(input.len());
    for c in input.bytes() {
        let mut carry = BASE58_ALPHABET.iter().position(|&a| a == c)? as u32;
        for b in bytes.iter_mut() {
            carry += (*b as u32) * 58;
            *b = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    let leading_zeros = input.bytes().take_while(|&c| c == b'1').count();
    bytes.extend(std::iter::repeat(0u8).take(leading_zeros));
    bytes.reverse();
    Some(bytes)
}

/// 25-byte Base58Check payload with one of the given version bytes
fn is_valid_base58check(address: &str, versions: &[u8]) -> bool {
    let Some(decoded) = base58_decode(address) else {
        return false;
    };
    if decoded.len() != 25 || !versions.contains(&decoded[0]) {
        return false;
    }
    let (payload, checksum) = decoded.split_at(21);
    let digest = Sha256::digest(Sha256::digest(payload));
    &digest[..4] == checksum
}

const BECH32_CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const BECH32_CONST: u32 = 1;
const BECH32M_CONST: u32 = 0x2bc8_30a3;

fn bech32_polymod(values: impl IntoIterator<Item = u8>) -> u32 {
    const GENERATOR: [u32; 5] = [0x3b6a_57b2, 0x2650_8e6d, 0x1ea1_19fa, 0x3d42_33dd, 0x2a14_62b3];
    let mut chk: u32 = 1;
    for v in values {
        let top = chk >> 25;
        chk = ((chk & 0x01ff_ffff) << 5) ^ u32::from(v);
        for (i, g) in GENERATOR.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                chk ^= g;
            }
        }
    }
    chk
}

fn bech32_hrp_expand(hrp: &str) -> Vec<u8> {
    let mut out: Vec<u8> = hrp.bytes().map(|b| b >> 5).collect();
    out.push(0);
    out.extend(hrp.bytes().map(|b| b & 31));
    out
}

/// Lower-case `bc1...` address with a bech32 or bech32m checksum
fn is_valid_bech32(address: &str) -> bool {
    let Some((hrp, data)) = address.rsplit_once('1') else {
        return false;
    };
    if hrp != "bc" || data.len() < 6 {
        return false;
    }
    let Some(values) = data
        .bytes()
        .map(|c| BECH32_CHARSET.iter().position(|&a| a == c).map(|p| p as u8))
        .collect::<Option<Vec<u8>>>()
    else {
        return false;
    };
    let check = bech32_polymod(bech32_hrp_expand(hrp).into_iter().chain(values));
    check == BECH32_CONST || check == BECH32M_CONST
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENESIS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    fn kinds(entities: &[ExtractedEntity], kind: EntityKind) -> Vec<&str> {
        entities
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.value.as_str())
            .collect()
    }

    /// Build a bech32 address from 5-bit values
    fn bech32_encode(hrp: &str, data: &[u8]) -> String {
        let mut values = bech32_hrp_expand(hrp);
        values.extend_from_slice(data);
        values.extend_from_slice(&[0; 6]);
        let polymod = bech32_polymod(values) ^ BECH32_CONST;
        let checksum: Vec<u8> = (0..6).map(|i| ((polymod >> (5 * (5 - i))) & 31) as u8).collect();
        let chars: String = data
            .iter()
            .chain(checksum.iter())
            .map(|&v| BECH32_CHARSET[v as usize] as char)
            .collect();
        format!("{}1{}", hrp, chars)
    }

    #[test]
    fn test_extract_bitcoin_legacy() {
        let entities = extract_text(&format!("Send payment to {}", GENESIS), "http://a.onion");
        let wallets: Vec<_> = entities
            .iter()
            .filter(|e| e.kind == EntityKind::CryptoWallet)
            .collect();
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].value, GENESIS);
        assert_eq!(wallets[0].qualifier.as_deref(), Some("btc"));
    }

    #[test]
    fn test_rejects_bad_base58_checksum() {
        // last character altered
        let text = "pay 1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb now";
        assert!(kinds(&extract_text(text, "u"), EntityKind::CryptoWallet).is_empty());
    }

    #[test]
    fn test_extract_bech32() {
        let data: Vec<u8> = (0..33u8).map(|i| i % 32).collect();
        let address = bech32_encode("bc", &data);
        assert!(is_valid_bech32(&address));

        let text = format!("donate: {}", address.to_uppercase());
        let entities = extract_text(&text, "u");
        assert_eq!(kinds(&entities, EntityKind::CryptoWallet), vec![address.as_str()]);

        let mut broken = address.clone();
        broken.pop();
        broken.push(if address.ends_with('q') { 'p' } else { 'q' });
        assert!(!is_valid_bech32(&broken));
    }

    #[test]
    fn test_extract_ethereum_lowercases() {
        let text = "ETH 0xAbCdEf0123456789aBcDeF0123456789ABCDEF01";
        let entities = extract_text(text, "u");
        assert_eq!(
            kinds(&entities, EntityKind::CryptoWallet),
            vec!["0xabcdef0123456789abcdef0123456789abcdef01"]
        );
        assert!(kinds(&entities, EntityKind::Phone).is_empty());
    }

    #[test]
    fn test_extract_onion() {
        let text = "Visit our forum at DREADYTOFATROPTSDJ6IO7L3XPTBET6ONOYNO2YV7JICOXKNYAZUBRAD.onion";
        let entities = extract_text(text, "u");
        assert_eq!(
            kinds(&entities, EntityKind::OnionAddress),
            vec!["dreadytofatroptsdj6io7l3xptbet6onoyno2yv7jicoxknyazubrad.onion"]
        );
        assert!(kinds(&entities, EntityKind::Domain).is_empty());
    }

    #[test]
    fn test_email_on_onion_host() {
        let text = "mail admin@DREADYTOFATROPTSDJ6IO7L3XPTBET6ONOYNO2YV7JICOXKNYAZUBRAD.onion for access";
        let entities = extract_text(text, "u");
        assert_eq!(
            kinds(&entities, EntityKind::Email),
            vec!["admin@dreadytofatroptsdj6io7l3xptbet6onoyno2yv7jicoxknyazubrad.onion"]
        );
        assert_eq!(
            kinds(&entities, EntityKind::OnionAddress),
            vec!["dreadytofatroptsdj6io7l3xptbet6onoyno2yv7jicoxknyazubrad.onion"]
        );
        assert!(kinds(&entities, EntityKind::Domain).is_empty());
        assert!(kinds(&entities, EntityKind::CredentialPair).is_empty());
    }

    #[test]
    fn test_email_host_is_not_a_domain() {
        let text = "Contact: Evil@Mail.Onion or ops@badcorp.net";
        let entities = extract_text(text, "u");
        assert_eq!(
            kinds(&entities, EntityKind::Email),
            vec!["evil@mail.onion", "ops@badcorp.net"]
        );
        assert!(kinds(&entities, EntityKind::Domain).is_empty());
    }

    #[test]
    fn test_extract_ips() {
        let text = "c2 at 45.77.12.9 and 2001:DB8:0:0:0:0:0:1, fallback fe80::1 plus 127.0.0.1";
        let entities = extract_text(text, "u");
        let ips = kinds(&entities, EntityKind::IpAddress);
        assert!(ips.contains(&"45.77.12.9"));
        assert!(ips.contains(&"2001:db8::1"));
        assert!(ips.contains(&"fe80::1"));
        assert!(!ips.contains(&"127.0.0.1"));
        assert!(kinds(&entities, EntityKind::CredentialPair).is_empty());
    }

    #[test]
    fn test_extract_credentials() {
        let text = "dump: admin@corp.com:hunter22, root:t00r!pass. see http://x.onion:8080 and 10.0.0.1:443";
        let entities = extract_text(text, "u");
        let creds = kinds(&entities, EntityKind::CredentialPair);
        assert_eq!(creds, vec!["admin@corp.com:hunter22", "root:t00r!pass"]);
        // the credential's identifier is not also an email
        assert!(kinds(&entities, EntityKind::Email).is_empty());
    }

    #[test]
    fn test_extract_phone() {
        let text = "call +1 (555) 123-4567 or 555.987.6543 today";
        let phones = extract_text(text, "u");
        let phones = kinds(&phones, EntityKind::Phone);
        assert!(phones.contains(&"+15551234567"));
        assert!(phones.contains(&"5559876543"));
    }

    #[test]
    fn test_ignores_benign_domains() {
        let text = "mirror at www.github.com, see index.html, real one: badcorp-leaks.net";
        let entities = extract_text(text, "u");
        assert_eq!(kinds(&entities, EntityKind::Domain), vec!["badcorp-leaks.net"]);
    }

    #[test]
    fn test_repeats_within_one_page_collapse() {
        let text = format!("{} {} {}", GENESIS, GENESIS, GENESIS);
        let entities = extract_text(&text, "http://a.onion");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].confidence, EntityKind::CryptoWallet.base_confidence());
        assert_eq!(entities[0].sources, vec!["http://a.onion".to_string()]);
    }

    #[test]
    fn test_ledger_dedup_across_urls() {
        let text = format!("Contact: evil@mail.onion, wallet {}", GENESIS);
        let mut ledger = EntityLedger::new();
        ledger.absorb(extract_text(&text, "http://b.onion"));
        ledger.absorb(extract_text(&format!("again {}", GENESIS), "http://a.onion"));
        ledger.absorb(extract_text(&format!("and {}", GENESIS), "http://a.onion"));

        let entities = ledger.into_entities();
        assert_eq!(kinds(&entities, EntityKind::Email).len(), 1);
        let wallet = entities
            .iter()
            .find(|e| e.kind == EntityKind::CryptoWallet)
            .unwrap();
        assert_eq!(wallet.sources, vec!["http://a.onion", "http://b.onion"]);
        assert!(wallet.confidence > EntityKind::CryptoWallet.base_confidence());
    }

    #[test]
    fn test_confidence_monotonic_and_capped() {
        let mut previous = 0.0;
        for n in 1..20 {
            let c = confidence_for(EntityKind::Phone, n);
            assert!(c >= previous);
            assert!(c <= 1.0);
            previous = c;
        }
        assert_eq!(confidence_for(EntityKind::OnionAddress, 10), 1.0);
    }

    #[test]
    fn test_ledger_order_independent() {
        let a = extract_text(&format!("{} ops@badcorp.net", GENESIS), "http://a.onion");
        let b = extract_text(&format!("ops@badcorp.net {}", GENESIS), "http://b.onion");

        let mut forward = EntityLedger::new();
        forward.absorb(a.clone());
        forward.absorb(b.clone());
        let mut backward = EntityLedger::new();
        backward.absorb(b);
        backward.absorb(a);

        assert_eq!(forward.into_entities(), backward.into_entities());
    }
}
