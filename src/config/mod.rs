use std::collections::HashMap;
use std::env;

use crate::entities::KnowledgeType;
use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Router configuration.
    pub router: RouterConfig,
    /// Approval workflow configuration.
    pub approval: ApprovalConfig,
    /// Knowledge engine configuration.
    pub knowledge: KnowledgeConfig,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable output.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Strategy router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Performance samples kept per strategy.
    pub learning_window: usize,
    /// Estimated tokens above which a request needs a long-context strategy.
    pub massive_context_threshold: usize,
}

/// Approval workflow configuration
#[derive(Debug, Clone)]
pub struct ApprovalConfig {
    /// Seconds a pending approval waits before timing out.
    pub default_timeout_secs: u64,
    /// Window in which the last five messages count as a burst.
    pub burst_window_secs: i64,
    /// Approver recorded for system decisions.
    pub system_approver: String,
}

/// Knowledge engine configuration
#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    /// Jaccard similarity above which two names denote the same node.
    pub similarity_threshold: f64,
    /// Share of the token budget reserved for concept blocks.
    pub concept_budget_ratio: f64,
    /// Characters per token used by the budget estimate.
    pub chars_per_token: usize,
    /// Operator cap on synthesized context regardless of request size.
    /// Unbounded by default, so the request's `max_tokens` governs.
    pub max_context_tokens: usize,
    /// Relevant nodes considered during synthesis.
    pub max_context_nodes: usize,
    /// Pattern nodes appended after concepts.
    pub max_pattern_nodes: usize,
    /// Per-type block templates. Placeholders: `{name}`, `{type}`,
    /// `{content}`, `{confidence}`, `{sessions}`.
    pub templates: HashMap<KnowledgeType, String>,
    /// Template used when a per-type template cannot be rendered.
    pub fallback_template: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let router_defaults = RouterConfig::default();
        let router = RouterConfig {
            learning_window: env_parse("ROUTER_LEARNING_WINDOW")
                .unwrap_or(router_defaults.learning_window)
                .max(1),
            massive_context_threshold: env_parse("ROUTER_MASSIVE_CONTEXT_TOKENS")
                .unwrap_or(router_defaults.massive_context_threshold),
        };

        let approval_defaults = ApprovalConfig::default();
        let approval = ApprovalConfig {
            default_timeout_secs: env_parse("APPROVAL_DEFAULT_TIMEOUT_SECS")
                .unwrap_or(approval_defaults.default_timeout_secs),
            burst_window_secs: env_parse("APPROVAL_BURST_WINDOW_SECS")
                .unwrap_or(approval_defaults.burst_window_secs),
            system_approver: approval_defaults.system_approver,
        };

        let knowledge_defaults = KnowledgeConfig::default();
        let knowledge = KnowledgeConfig {
            similarity_threshold: env_parse("KNOWLEDGE_SIMILARITY_THRESHOLD")
                .unwrap_or(knowledge_defaults.similarity_threshold),
            concept_budget_ratio: env_parse("KNOWLEDGE_CONCEPT_BUDGET_RATIO")
                .unwrap_or(knowledge_defaults.concept_budget_ratio),
            chars_per_token: env_parse("KNOWLEDGE_CHARS_PER_TOKEN")
                .unwrap_or(knowledge_defaults.chars_per_token),
            max_context_tokens: env_parse("KNOWLEDGE_MAX_CONTEXT_TOKENS")
                .unwrap_or(knowledge_defaults.max_context_tokens),
            ..knowledge_defaults
        };
        knowledge.validate()?;

        Ok(Config {
            logging,
            router,
            approval,
            knowledge,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            learning_window: 100,
            massive_context_threshold: 100_000,
        }
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 300, // 5 minutes
            burst_window_secs: 300,
            system_approver: "system".to_string(),
        }
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            KnowledgeType::Concept,
            "### {name}\n{content}\n(confidence: {confidence})\n".to_string(),
        );
        templates.insert(
            KnowledgeType::Technique,
            "### Technique: {name}\n{content}\n(confidence: {confidence})\n".to_string(),
        );
        templates.insert(
            KnowledgeType::Pattern,
            "### Pattern: {name}\n{content}\n(confidence: {confidence}, sessions: {sessions})\n"
                .to_string(),
        );
        templates.insert(
            KnowledgeType::Preference,
            "### Preference: {name}\n{content}\n".to_string(),
        );

        Self {
            similarity_threshold: 0.8,
            concept_budget_ratio: 0.8,
            chars_per_token: 4,
            max_context_tokens: usize::MAX,
            max_context_nodes: 20,
            max_pattern_nodes: 5,
            templates,
            fallback_template: "### {name} ({type})\n{content}\n".to_string(),
        }
    }
}

impl KnowledgeConfig {
    /// Reject ratios and estimates that would break budgeting.
    pub fn validate(&self) -> Result<(), AppError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(AppError::Config {
                message: format!(
                    "KNOWLEDGE_SIMILARITY_THRESHOLD must be within 0.0-1.0, got {}",
                    self.similarity_threshold
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.concept_budget_ratio) {
            return Err(AppError::Config {
                message: format!(
                    "KNOWLEDGE_CONCEPT_BUDGET_RATIO must be within 0.0-1.0, got {}",
                    self.concept_budget_ratio
                ),
            });
        }
        if self.chars_per_token == 0 {
            return Err(AppError::Config {
                message: "KNOWLEDGE_CHARS_PER_TOKEN must be positive".to_string(),
            });
        }
        Ok(())
    }
}
