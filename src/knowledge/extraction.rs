//! Keyword-driven concept extraction.
//!
//! Every rule in the table is evaluated against the request and response
//! text; all matching rules contribute a concept.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::entities::{CollaborationRequest, CollaborationResponse, KnowledgeType};

/// Characters of the request kept as evidence in extracted content.
const EVIDENCE_CHARS: usize = 160;

/// One row of the extraction table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRule {
    /// Concept name produced when the rule matches.
    pub category: String,
    /// Node type of the produced concept.
    pub node_type: KnowledgeType,
    /// Lowercase keywords; any substring hit matches.
    pub keywords: Vec<String>,
    /// Fixed confidence assigned to the concept.
    pub confidence: f64,
}

impl ExtractionRule {
    /// Build a rule from static keyword slices.
    pub fn new(
        category: impl Into<String>,
        node_type: KnowledgeType,
        keywords: &[&str],
        confidence: f64,
    ) -> Self {
        Self {
            category: category.into(),
            node_type,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Keywords found in `text` (lowercase expected).
    fn hits<'a>(&'a self, text: &str) -> Vec<&'a str> {
        self.keywords
            .iter()
            .filter(|k| text.contains(k.as_str()))
            .map(String::as_str)
            .collect()
    }
}

/// Concept produced by one matching rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedConcept {
    /// Concept name (the rule category).
    pub name: String,
    /// Node type.
    pub node_type: KnowledgeType,
    /// Evidence text folded into the node.
    pub content: String,
    /// Rule confidence.
    pub confidence: f64,
}

/// Built-in extraction table.
pub fn builtin_extraction_rules() -> Vec<ExtractionRule> {
    vec![
        ExtractionRule::new(
            "error handling",
            KnowledgeType::Technique,
            &["error", "exception", "panic", "bug", "crash", "debug"],
            0.7,
        ),
        ExtractionRule::new(
            "performance optimization",
            KnowledgeType::Technique,
            &["performance", "optimiz", "latency", "slow", "cache", "profil"],
            0.7,
        ),
        ExtractionRule::new(
            "security",
            KnowledgeType::Concept,
            &["security", "auth", "password", "encrypt", "vulnerab", "token"],
            0.8,
        ),
        ExtractionRule::new(
            "testing",
            KnowledgeType::Technique,
            &["test", "assert", "coverage", "mock"],
            0.7,
        ),
        ExtractionRule::new(
            "software architecture",
            KnowledgeType::Concept,
            &["architecture", "design pattern", "microservice", "module", "layer"],
            0.6,
        ),
        ExtractionRule::new(
            "database",
            KnowledgeType::Concept,
            &["database", "sql", "query", "schema", "migration"],
            0.7,
        ),
        ExtractionRule::new(
            "api design",
            KnowledgeType::Concept,
            &["api", "endpoint", "rest", "graphql", "http"],
            0.6,
        ),
        ExtractionRule::new(
            "concurrency",
            KnowledgeType::Concept,
            &["async", "thread", "concurren", "mutex", "deadlock", "race condition"],
            0.7,
        ),
        ExtractionRule::new(
            "refactoring",
            KnowledgeType::Technique,
            &["refactor", "cleanup", "clean up", "restructure", "rename"],
            0.6,
        ),
        ExtractionRule::new(
            "documentation",
            KnowledgeType::Concept,
            &["document", "readme", "docstring", "tutorial"],
            0.5,
        ),
    ]
}

/// Applies the extraction table to collaborations.
#[derive(Debug, Clone)]
pub struct ConceptExtractor {
    rules: Vec<ExtractionRule>,
}

impl Default for ConceptExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConceptExtractor {
    /// Extractor with the built-in table.
    pub fn new() -> Self {
        Self::with_rules(builtin_extraction_rules())
    }

    /// Extractor with a caller-supplied table.
    pub fn with_rules(rules: Vec<ExtractionRule>) -> Self {
        Self { rules }
    }

    /// Current table.
    pub fn rules(&self) -> &[ExtractionRule] {
        &self.rules
    }

    /// Extract concepts in table order. Never fails; no match yields an empty list.
    pub fn extract(
        &self,
        request: &CollaborationRequest,
        response: &CollaborationResponse,
    ) -> Vec<ExtractedConcept> {
        let text = format!(
            "{} {}",
            request.searchable_text(),
            response.content.to_lowercase()
        );
        let evidence = truncate_chars(request.content.trim(), EVIDENCE_CHARS);

        let mut seen = HashSet::new();
        let mut concepts = Vec::new();
        for rule in &self.rules {
            let hits = rule.hits(&text);
            if hits.is_empty() || !seen.insert((rule.category.to_lowercase(), rule.node_type)) {
                continue;
            }
            concepts.push(ExtractedConcept {
                name: rule.category.clone(),
                node_type: rule.node_type,
                content: format!("Seen with [{}]: {}", hits.join(", "), evidence),
                confidence: rule.confidence,
            });
        }
        concepts
    }
}

/// Lowercase whitespace-separated word set of a name.
fn word_set(name: &str) -> HashSet<String> {
    name.split_whitespace().map(|w| w.to_lowercase()).collect()
}

/// Jaccard similarity of the word sets of two names.
///
/// Two empty names share nothing and score 0.0.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let set_a = word_set(a);
    let set_b = word_set(b);

    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();

    intersection as f64 / union as f64
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
