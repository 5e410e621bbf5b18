//! Input guard — size ceilings, normalization and prompt-injection detection
//!
//! Defense-in-depth at the API layer: the frontend enforces its own limits,
//! but anything reachable with curl must be re-checked here. Oversized input
//! is a cost problem (every character gets tokenized and billed); injection
//! phrasing is a policy problem and short-circuits the pipeline entirely.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{GatewayError, Result};

/// Hard ceiling on query characters
pub const MAX_QUERY_CHARS: usize = 1000;

/// Ceiling on the estimated token count
pub const MAX_QUERY_TOKENS_EST: usize = 350;

/// Minimum query length after normalization
pub const MIN_QUERY_CHARS: usize = 2;

/// Known prompt-injection patterns, matched case-insensitively.
///
/// Heuristic, not a proof: false negatives are expected. Matching any one
/// pattern is enough.
static INJECTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)ignore\s+(all\s+)?(previous|above|prior)\s+(instructions?|prompts?)",
        r"(?i)disregard\s+(all\s+)?(previous|above|prior)",
        r"(?i)you\s+are\s+now\s+an?\s+",
        r"(?i)system\s*:\s*",
        r"(?i)<\|system\|>",
        r"(?i)act\s+as\s+an?\s+",
        r"(?i)forget\s+(everything|all|your|previous)",
        r"(?i)new\s+instructions?\s*:",
        r"(?i)override\s+(your|system|all)\s+",
        r"(?i)pretend\s+(you|that|to)\s+",
        r"(?i)jailbreak",
        r"(?i)dan\s+mode",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("injection pattern must compile"))
    .collect()
});

/// Normalize a raw query: trim, strip control characters, collapse
/// whitespace runs to single spaces.
///
/// Fails with [`GatewayError::InvalidQuery`] when fewer than
/// [`MIN_QUERY_CHARS`] characters survive.
pub fn normalize_query(raw: &str) -> Result<String> {
    let stripped: String = raw
        .chars()
        .filter(|c| {
            !matches!(c,
                '\u{0000}'..='\u{0008}'
                | '\u{000b}'
                | '\u{000c}'
                | '\u{000e}'..='\u{001f}'
                | '\u{007f}')
        })
        .collect();

    let normalized = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    if normalized.chars().count() < MIN_QUERY_CHARS {
        return Err(GatewayError::InvalidQuery);
    }
    Ok(normalized)
}

/// Rough token estimate: ~1 token per 3 characters for Turkish text.
///
/// Not exact, but sufficient for a fast upper-bound check without pulling in
/// a tokenizer.
pub fn estimate_token_count(text: &str) -> usize {
    text.chars().count() / 3 + 1
}

/// Enforce the character and estimated-token ceilings.
pub fn validate_query_size(query: &str) -> Result<()> {
    let chars = query.chars().count();
    let estimated_tokens = estimate_token_count(query);

    if chars > MAX_QUERY_CHARS || estimated_tokens > MAX_QUERY_TOKENS_EST {
        return Err(GatewayError::QueryTooLarge {
            chars,
            estimated_tokens,
        });
    }
    Ok(())
}

/// Check the query against the injection pattern table.
pub fn detect_prompt_injection(text: &str) -> bool {
    for pattern in INJECTION_PATTERNS.iter() {
        if pattern.is_match(text) {
            let preview: String = text.chars().take(80).collect();
            tracing::warn!(pattern = pattern.as_str(), preview = %preview, "prompt injection detected");
            return true;
        }
    }
    false
}

/// Wrap retrieved context in fixed delimiters before it reaches the LLM.
///
/// The delimiters tell the model to treat everything inside as data, not
/// instructions — the second line of defense when the retrieved text itself
/// carries injected phrasing.
pub fn sanitize_for_llm(context_text: &str) -> String {
    format!("###\n{context_text}\n###")
}
