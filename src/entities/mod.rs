//! Value types shared by the router, approval, and knowledge engines.
//!
//! Everything here is plain data: requests and responses exchanged with the
//! session layer, session state, knowledge graph nodes, and approval records.

mod approval;
mod knowledge;


pub use approval::*;
pub use knowledge::*;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named collaboration pattern with a static cost/reasoning/privacy profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationStrategy {
    /// Low-cost model with strong chain-of-thought reasoning.
    CostOptimizedReasoning,
    /// Long-context model for whole-codebase or document analysis.
    MassiveContext,
    /// Several models answer independently and a board consolidates them.
    MultiModelBoard,
    /// One model drafts, another critiques and refines.
    SequentialRefinement,
    /// Locally hosted model, nothing leaves the machine.
    LocalPrivate,
    /// Small fast model for quick answers.
    FastResponse,
    /// Model set assembled per request from the derived factors.
    HybridAdaptive,
}

impl CollaborationStrategy {
    /// Every strategy in declaration order.
    pub const ALL: [CollaborationStrategy; 7] = [
        CollaborationStrategy::CostOptimizedReasoning,
        CollaborationStrategy::MassiveContext,
        CollaborationStrategy::MultiModelBoard,
        CollaborationStrategy::SequentialRefinement,
        CollaborationStrategy::LocalPrivate,
        CollaborationStrategy::FastResponse,
        CollaborationStrategy::HybridAdaptive,
    ];

    /// Strategy used whenever a name cannot be resolved.
    pub const FALLBACK: CollaborationStrategy = CollaborationStrategy::HybridAdaptive;

    /// Get the strategy name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            CollaborationStrategy::CostOptimizedReasoning => "cost_optimized_reasoning",
            CollaborationStrategy::MassiveContext => "massive_context",
            CollaborationStrategy::MultiModelBoard => "multi_model_board",
            CollaborationStrategy::SequentialRefinement => "sequential_refinement",
            CollaborationStrategy::LocalPrivate => "local_private",
            CollaborationStrategy::FastResponse => "fast_response",
            CollaborationStrategy::HybridAdaptive => "hybrid_adaptive",
        }
    }

    /// Resolve a strategy name, falling back to [`Self::FALLBACK`] for unknown input.
    pub fn from_name_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::warn!(strategy = %name, fallback = %Self::FALLBACK, "Unknown strategy name, using fallback");
            Self::FALLBACK
        })
    }
}

impl std::fmt::Display for CollaborationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CollaborationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cost_optimized_reasoning" => Ok(CollaborationStrategy::CostOptimizedReasoning),
            "massive_context" => Ok(CollaborationStrategy::MassiveContext),
            "multi_model_board" => Ok(CollaborationStrategy::MultiModelBoard),
            "sequential_refinement" => Ok(CollaborationStrategy::SequentialRefinement),
            "local_private" => Ok(CollaborationStrategy::LocalPrivate),
            "fast_response" => Ok(CollaborationStrategy::FastResponse),
            "hybrid_adaptive" => Ok(CollaborationStrategy::HybridAdaptive),
            _ => Err(format!("Unknown strategy: {}", s)),
        }
    }
}

/// A request for collaboration handed in by the session layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationRequest {
    /// The user's prompt.
    pub content: String,
    /// Extra context supplied alongside the prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Task type hint (e.g. "debugging", "architecture").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    /// Strategy explicitly requested by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_strategy: Option<CollaborationStrategy>,
    /// Whether the user wants a human to review the result.
    #[serde(default)]
    pub require_approval: bool,
    /// Token ceiling for the response and synthesized context.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Owning session.
    pub session_id: String,
}

fn default_max_tokens() -> usize {
    4000
}

impl CollaborationRequest {
    /// Create a new request for a session.
    pub fn new(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            context: None,
            task_type: None,
            preferred_strategy: None,
            require_approval: false,
            max_tokens: default_max_tokens(),
            session_id: session_id.into(),
        }
    }

    /// Attach extra context.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Set the task type hint.
    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    /// Request a specific strategy.
    pub fn with_preferred_strategy(mut self, strategy: CollaborationStrategy) -> Self {
        self.preferred_strategy = Some(strategy);
        self
    }

    /// Ask for human approval regardless of risk.
    pub fn with_require_approval(mut self, require: bool) -> Self {
        self.require_approval = require;
        self
    }

    /// Set the token ceiling.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Content plus any attached context, lowercased, for keyword heuristics.
    pub fn searchable_text(&self) -> String {
        match &self.context {
            Some(ctx) => format!("{} {}", self.content, ctx).to_lowercase(),
            None => self.content.to_lowercase(),
        }
    }
}

/// Result of an external model execution, enriched with approval outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationResponse {
    /// Response text.
    pub content: String,
    /// Confidence score (0.0-1.0).
    pub confidence_score: f64,
    /// Strategy that produced this response.
    pub strategy_used: CollaborationStrategy,
    /// Models that took part.
    pub models_used: Vec<String>,
    /// Wall-clock processing time in seconds.
    pub processing_time: f64,
    /// Estimated cost in USD.
    pub cost_estimate: f64,
    /// Whether a human has to approve this response.
    #[serde(default)]
    pub approval_required: bool,
    /// Approval outcome, if the approval path was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_status: Option<ApprovalStatus>,
    /// Opaque metadata from the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl CollaborationResponse {
    /// Create a new response; confidence is clamped to 0.0-1.0.
    pub fn new(
        content: impl Into<String>,
        confidence_score: f64,
        strategy_used: CollaborationStrategy,
        models_used: Vec<String>,
    ) -> Self {
        Self {
            content: content.into(),
            confidence_score: confidence_score.clamp(0.0, 1.0),
            strategy_used,
            models_used,
            processing_time: 0.0,
            cost_estimate: 0.0,
            approval_required: false,
            approval_status: None,
            metadata: None,
        }
    }

    /// Set processing time in seconds.
    pub fn with_processing_time(mut self, seconds: f64) -> Self {
        self.processing_time = seconds.max(0.0);
        self
    }

    /// Set cost estimate.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_estimate = cost.max(0.0);
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Who authored a session message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// End user.
    User,
    /// Model output.
    Assistant,
    /// Orchestrator notices.
    System,
}

/// A single message within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Author role.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
    /// When the message was recorded.
    pub timestamp: DateTime<Utc>,
    /// Strategy that produced an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<CollaborationStrategy>,
    /// Cost attributed to this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Message {
    /// Create a user message stamped now.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message stamped now.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            strategy: None,
            cost: None,
        }
    }

    /// Override the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Tag with the producing strategy and its cost.
    pub fn with_strategy(mut self, strategy: CollaborationStrategy, cost: f64) -> Self {
        self.strategy = Some(strategy);
        self.cost = Some(cost);
        self
    }
}

/// Per-user routing preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Score multipliers per strategy (missing entries count as 1.0).
    #[serde(default)]
    pub strategy_weights: HashMap<CollaborationStrategy, f64>,
    /// Whether cheaper strategies should be favoured.
    #[serde(default = "default_cost_sensitive")]
    pub cost_sensitive: bool,
    /// Treat every request as privacy critical.
    #[serde(default)]
    pub privacy_mode: bool,
    /// Strategy the user habitually prefers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_strategy: Option<CollaborationStrategy>,
    /// Free-form preferences carried through untouched.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_cost_sensitive() -> bool {
    true
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            strategy_weights: HashMap::new(),
            cost_sensitive: default_cost_sensitive(),
            privacy_mode: false,
            preferred_strategy: None,
            extra: HashMap::new(),
        }
    }
}

impl UserPreferences {
    /// Multiplier applied to a strategy's score.
    pub fn weight_for(&self, strategy: CollaborationStrategy) -> f64 {
        self.strategy_weights
            .get(&strategy)
            .copied()
            .unwrap_or(1.0)
            .max(0.0)
    }

    /// Set a strategy weight.
    pub fn with_weight(mut self, strategy: CollaborationStrategy, weight: f64) -> Self {
        self.strategy_weights.insert(strategy, weight);
        self
    }
}

/// Conversation state tracked per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Unique session identifier.
    pub id: String,
    /// Messages in chronological order.
    pub messages: Vec<Message>,
    /// Cumulative cost in USD.
    pub total_cost: f64,
    /// Routing preferences.
    pub user_preferences: UserPreferences,
    /// Short descriptions of patterns learned in this session.
    pub learned_patterns: Vec<String>,
    /// Approval ids still awaiting a decision.
    pub pending_approvals: Vec<String>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last updated.
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Create an empty session with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            messages: Vec::new(),
            total_cost: 0.0,
            user_preferences: UserPreferences::default(),
            learned_patterns: Vec::new(),
            pending_approvals: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a session with a random id.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    /// Replace preferences.
    pub fn with_preferences(mut self, preferences: UserPreferences) -> Self {
        self.user_preferences = preferences;
        self
    }

    /// Append a message and account for its cost.
    pub fn push_message(&mut self, message: Message) {
        if let Some(cost) = message.cost {
            self.total_cost += cost.max(0.0);
        }
        self.updated_at = message.timestamp.max(self.updated_at);
        self.messages.push(message);
    }

    /// Drop a resolved approval id. Returns whether it was pending.
    pub fn resolve_approval(&mut self, approval_id: &str) -> bool {
        let before = self.pending_approvals.len();
        self.pending_approvals.retain(|id| id != approval_id);
        before != self.pending_approvals.len()
    }
}

/// Request-derived routing signals, computed once per request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollaborationFactors {
    /// Request needs multi-step reasoning (debugging, analysis, proofs).
    pub requires_reasoning: bool,
    /// Request exceeds what ordinary context windows hold.
    pub requires_massive_context: bool,
    /// Rough token estimate of content plus context.
    pub estimated_tokens: usize,
    /// Cheaper strategies should be favoured.
    pub cost_sensitive: bool,
    /// Content must not leave trusted infrastructure.
    pub privacy_critical: bool,
    /// Request benefits from several independent opinions.
    pub requires_multi_perspective: bool,
    /// Latency matters more than depth.
    pub time_sensitive: bool,
}

/// Instant `days` days before now.
///
/// Ages outside the representable range map to the earliest instant, so
/// cutoffs built from them match nothing. Negative ages count as zero.
pub(crate) fn days_ago(days: i64) -> DateTime<Utc> {
    chrono::Duration::try_days(days.max(0))
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
