//! Request factor analysis.
//!
//! Keyword heuristics that turn a request into [`CollaborationFactors`].

use crate::entities::{CollaborationFactors, CollaborationRequest, UserPreferences};

const REASONING_KEYWORDS: &[&str] = &[
    "analyze", "analyse", "analysis", "debug", "bug", "reason", "prove", "proof", "why",
    "explain", "logic", "algorithm", "solve", "calculate", "evaluate", "trace", "diagnose",
];

const PRIVACY_KEYWORDS: &[&str] = &[
    "password", "secret", "confidential", "private key", "api key", "credential",
    "personal data", "ssn", "medical", "proprietary", "internal only",
];

const MULTI_PERSPECTIVE_KEYWORDS: &[&str] = &[
    "compare", "comparison", "perspectives", "opinions", "pros and cons", "trade-off",
    "tradeoff", "debate", "consensus", "second opinion", "alternatives",
];

const TIME_SENSITIVE_KEYWORDS: &[&str] = &[
    "urgent", "asap", "quick", "quickly", "immediately", "right now", "briefly",
];

const MASSIVE_CONTEXT_KEYWORDS: &[&str] = &[
    "entire codebase", "whole codebase", "all files", "whole repository", "entire repository",
    "entire document",
];

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

/// Rough token estimate: characters divided by `chars_per_token`, rounded up.
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    text.chars().count().div_ceil(chars_per_token.max(1))
}

/// Derive routing factors from a request and the user's preferences.
pub fn analyze(
    request: &CollaborationRequest,
    preferences: &UserPreferences,
    massive_context_threshold: usize,
) -> CollaborationFactors {
    let text = request.searchable_text();
    let estimated_tokens = estimate_tokens(&request.content, 4)
        + request
            .context
            .as_deref()
            .map(|c| estimate_tokens(c, 4))
            .unwrap_or(0);

    CollaborationFactors {
        requires_reasoning: contains_any(&text, REASONING_KEYWORDS),
        requires_massive_context: estimated_tokens > massive_context_threshold
            || contains_any(&text, MASSIVE_CONTEXT_KEYWORDS),
        estimated_tokens,
        cost_sensitive: preferences.cost_sensitive,
        privacy_critical: preferences.privacy_mode || contains_any(&text, PRIVACY_KEYWORDS),
        requires_multi_perspective: contains_any(&text, MULTI_PERSPECTIVE_KEYWORDS),
        time_sensitive: contains_any(&text, TIME_SENSITIVE_KEYWORDS),
    }
}
