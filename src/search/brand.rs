//! Brand label detection via fuzzy word matching
//!
//! Each word of the query is compared against the known brand labels; the
//! first word scoring at or above the cutoff wins. Queries with no confident
//! match fall back to the company-wide catch-all label. The labels must match
//! the vector index metadata values exactly.

use strsim::normalized_levenshtein;
use tracing::debug;

/// Brand labels as stored in index metadata
pub const KNOWN_BRANDS: [&str; 11] = [
    "pepsi", "pürsu", "doğanay", "kızılay", "pınar", "golf", "lipton", "fruko", "erikli",
    "fritolay", "yedigün",
];

/// Catch-all label for general queries
pub const DEFAULT_BRAND: &str = "sirket_genel";

/// Minimum normalized similarity (0.0 - 1.0) to accept a match
const FUZZY_SCORE_CUTOFF: f64 = 0.84;

/// Detect the brand label a query is about.
///
/// Pure and local — never retried, never fails.
pub fn detect_brand(query: &str) -> &'static str {
    let query_lower = query.to_lowercase();

    for word in query_lower.split_whitespace() {
        let best = KNOWN_BRANDS
            .iter()
            .map(|brand| (*brand, normalized_levenshtein(word, brand)))
            .max_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((brand, score)) = best {
            if score >= FUZZY_SCORE_CUTOFF {
                debug!(word, brand, score, "fuzzy brand match");
                return brand;
            }
        }
    }

    DEFAULT_BRAND
}
