//! Token-budgeted context assembly.

use std::collections::HashSet;

use tracing::warn;

use crate::config::KnowledgeConfig;
use crate::entities::KnowledgeNode;
use crate::router::estimate_tokens;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "this", "that", "from", "are", "was", "you", "your", "our",
    "how", "what", "why", "can", "does", "into", "about", "should", "would", "could", "have",
    "has", "not", "but", "all", "any", "please",
];

/// Query terms of a request: lowercase words of 3+ chars minus stopwords.
pub(crate) fn query_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Term overlap of a node with the query. Name hits weigh double.
pub(crate) fn relevance(node: &KnowledgeNode, terms: &[String]) -> usize {
    let name = node.name.to_lowercase();
    let content = node.content.to_lowercase();
    terms
        .iter()
        .map(|t| {
            if name.contains(t.as_str()) {
                2
            } else if content.contains(t.as_str()) {
                1
            } else {
                0
            }
        })
        .sum()
}

/// Substitute `{placeholder}`s; `None` when a placeholder is unknown.
fn render(template: &str, node: &KnowledgeNode) -> Option<String> {
    let mut out = String::with_capacity(template.len() + node.content.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return Some(out);
        };
        let value = match &after[..close] {
            "name" => node.name.clone(),
            "type" => node.node_type.to_string(),
            "content" => node.content.clone(),
            "confidence" => format!("{:.2}", node.confidence_score),
            "sessions" => node.source_sessions.len().to_string(),
            _ => return None,
        };
        out.push_str(&value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Some(out)
}

/// Render a node with its type's template.
///
/// A template referencing an unknown placeholder falls back to the generic
/// template and logs a warning.
pub(crate) fn format_node(config: &KnowledgeConfig, node: &KnowledgeNode) -> String {
    if let Some(template) = config.templates.get(&node.node_type) {
        if let Some(block) = render(template, node) {
            return block;
        }
        warn!(
            node_type = %node.node_type,
            template = %template,
            "Template references unknown placeholder, using fallback"
        );
    }
    render(&config.fallback_template, node)
        .unwrap_or_else(|| format!("### {} ({})\n{}\n", node.name, node.node_type, node.content))
}

/// Greedy budgeted assembly.
///
/// Concept blocks fill up to `concept_budget_ratio` of the budget, then
/// pattern blocks take what remains. Each phase stops at the first block
/// that would overflow.
pub(crate) fn assemble(
    config: &KnowledgeConfig,
    concepts: &[&KnowledgeNode],
    patterns: &[&KnowledgeNode],
    max_tokens: usize,
) -> String {
    let total_budget = max_tokens.min(config.max_context_tokens);
    let concept_budget = (total_budget as f64 * config.concept_budget_ratio).floor() as usize;
    let cpt = config.chars_per_token;

    let mut out = String::new();
    let mut used = 0usize;
    let mut included: HashSet<&str> = HashSet::new();

    for node in concepts {
        let block = format!("{}\n", format_node(config, node));
        let cost = estimate_tokens(&block, cpt);
        if used + cost > concept_budget {
            break;
        }
        used += cost;
        out.push_str(&block);
        included.insert(node.id.as_str());
    }

    for node in patterns
        .iter()
        .filter(|n| !included.contains(n.id.as_str()))
        .take(config.max_pattern_nodes)
    {
        let block = format!("{}\n", format_node(config, node));
        let cost = estimate_tokens(&block, cpt);
        if used + cost > total_budget {
            break;
        }
        used += cost;
        out.push_str(&block);
    }

    out.trim_end().to_string()
}
