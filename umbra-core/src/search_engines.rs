//! Onion search engine registry
//!
//! Known engines with their URL templates and default merge weights.

use serde::Serialize;

/// An onion search engine
#[derive(Debug, Clone, Serialize)]
pub struct SearchEngine {
    /// Human-readable name, also the registry key
    pub name: &'static str,
    /// URL template with {query} placeholder
    pub url_template: &'static str,
    /// Default merge weight (0.0 - 1.0)
    pub weight: f64,
}

impl SearchEngine {
    /// Build search URL for a query
    pub fn build_url(&self, query: &str) -> String {
        self.url_template.replace("{query}", &encode_query(query))
    }
}

/// Form-style encoding: spaces become `+`, everything else percent-encoded
fn encode_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| urlencoding::encode(word).into_owned())
        .collect::<Vec<_>>()
        .join("+")
}

/// Default list of onion search engines
pub static DEFAULT_SEARCH_ENGINES: &[SearchEngine] = &[
    SearchEngine {
        name: "Ahmia",
        url_template: "http://juhanurmihxlp77nkq76byazcldy2hlmovfu2epvl5ankdibsot4csyd.onion/search/?q={query}",
        weight: 1.0,
    },
    SearchEngine {
        name: "OnionLand",
        url_template: "http://3bbad7fauom4d6sgppalyqddsqbf5u5p56b5k5uk2zxsy3d6ey2jobad.onion/search?q={query}",
        weight: 0.8,
    },
    SearchEngine {
        name: "Torgle",
        url_template: "http://iy3544gmoeclh5de6gez2256v6pjh4omhpqdh2wpeeppjtvqmjhkfwad.onion/torgle/?query={query}",
        weight: 0.7,
    },
    SearchEngine {
        name: "Amnesia",
        url_template: "http://amnesia7u5odx5xbwtpnqk3edybgud5bmiagu75bnqx2crntw5kry7ad.onion/search?query={query}",
        weight: 0.75,
    },
    SearchEngine {
        name: "Kaizer",
        url_template: "http://kaizerwfvp5gxu6cppibp7jhcqptavq3iqef66wbxenh6a2fklibdvid.onion/search?q={query}",
        weight: 0.7,
    },
    SearchEngine {
        name: "Tornado",
        url_template: "http://tornadoxn3viscgz647shlysdy7ea5zqzwda7hierekeuokh5eh5b3qd.onion/search?q={query}",
        weight: 0.7,
    },
    SearchEngine {
        name: "FindTor",
        url_template: "http://findtorroveq5wdnipkaojfpqulxnkhblymc7aramjzajcvpptd4rjqd.onion/search?q={query}",
        weight: 0.7,
    },
    SearchEngine {
        name: "Excavator",
        url_template: "http://2fd6cemt4gmccflhm6imvdfvli3nf7zn6rfrwpsy7uhxrgbypvwf5fad.onion/search?query={query}",
        weight: 0.65,
    },
    SearchEngine {
        name: "Tor66",
        url_template: "http://tor66sewebgixwhcqfnp5inzp5x5uohhdy3kvtnyfxc2e5mxiuh34iid.onion/search?q={query}",
        weight: 0.75,
    },
    SearchEngine {
        name: "TheDeepSearches",
        url_template: "http://searchgf7gdtauh7bhnbyed4ivxqmuoat3nm6zfrg3ymkq6mtnpye3ad.onion/search?q={query}",
        weight: 0.7,
    },
];

/// Look up a registered engine by name (case-insensitive)
pub fn find_engine(name: &str) -> Option<&'static SearchEngine> {
    DEFAULT_SEARCH_ENGINES
        .iter()
        .find(|e| e.name.eq_ignore_ascii_case(name))
}

/// Get engines sorted by weight (highest first), ties by name
pub fn engines_by_weight() -> Vec<&'static SearchEngine> {
    let mut engines: Vec<_> = DEFAULT_SEARCH_ENGINES.iter().collect();
    engines.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.name.cmp(b.name)));
    engines
}
