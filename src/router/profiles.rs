//! Static strategy profiles.
//!
//! These tables are configuration, not control flow: the router builds its
//! lookup maps from them once at construction and never mutates them.

use std::collections::HashMap;

use serde::Serialize;

use crate::entities::CollaborationStrategy;

/// Model used when a dynamic model list comes out empty.
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet";

/// Model with the strongest reasoning per dollar.
pub const REASONING_MODEL: &str = "deepseek-r1";
/// Model with the largest context window.
pub const LONG_CONTEXT_MODEL: &str = "gemini-1.5-pro";
/// Locally hosted model.
pub const LOCAL_MODEL: &str = "llama3-local";
/// Small, low-latency model.
pub const FAST_MODEL: &str = "gpt-4o-mini";
/// Second general-purpose model for independent opinions.
pub const PERSPECTIVE_MODEL: &str = "gpt-4o";

/// Static cost/reasoning/privacy profile of a strategy.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyProfile {
    /// Strategy this profile describes.
    pub strategy: CollaborationStrategy,
    /// Task types this strategy handles best.
    pub optimal_task_types: &'static [&'static str],
    /// Relative cost compared to a single mid-tier model.
    pub cost_multiplier: f64,
    /// Reasoning strength (0.0-1.0).
    pub reasoning_strength: f64,
    /// Maximum context tokens the strategy can take.
    pub context_limit: usize,
    /// Privacy rating, 1 (data leaves to many providers) to 5 (local only).
    pub privacy_rating: u8,
    /// Low-latency strategy.
    pub fast: bool,
    /// Base price in USD per 1000 tokens.
    pub base_price_per_1k: f64,
    /// Static model list; empty for strategies that assemble models per request.
    pub models: &'static [&'static str],
}

/// Built-in strategy profiles, one per strategy, in declaration order.
pub fn builtin_profiles() -> Vec<StrategyProfile> {
    vec![
        StrategyProfile {
            strategy: CollaborationStrategy::CostOptimizedReasoning,
            optimal_task_types: &["debugging", "code_review", "analysis", "math"],
            cost_multiplier: 0.1,
            reasoning_strength: 0.9,
            context_limit: 128_000,
            privacy_rating: 2,
            fast: false,
            base_price_per_1k: 0.002,
            models: &[REASONING_MODEL],
        },
        StrategyProfile {
            strategy: CollaborationStrategy::MassiveContext,
            optimal_task_types: &["codebase_analysis", "documentation", "summarization"],
            cost_multiplier: 0.5,
            reasoning_strength: 0.75,
            context_limit: 1_000_000,
            privacy_rating: 3,
            fast: false,
            base_price_per_1k: 0.0035,
            models: &[LONG_CONTEXT_MODEL],
        },
        StrategyProfile {
            strategy: CollaborationStrategy::MultiModelBoard,
            optimal_task_types: &["architecture", "decision", "strategy"],
            cost_multiplier: 2.0,
            reasoning_strength: 0.95,
            context_limit: 128_000,
            privacy_rating: 2,
            fast: false,
            base_price_per_1k: 0.01,
            models: &[DEFAULT_MODEL, PERSPECTIVE_MODEL, LONG_CONTEXT_MODEL, REASONING_MODEL],
        },
        StrategyProfile {
            strategy: CollaborationStrategy::SequentialRefinement,
            optimal_task_types: &["refactoring", "writing", "optimization"],
            cost_multiplier: 1.2,
            reasoning_strength: 0.85,
            context_limit: 200_000,
            privacy_rating: 3,
            fast: false,
            base_price_per_1k: 0.008,
            models: &[PERSPECTIVE_MODEL, DEFAULT_MODEL],
        },
        StrategyProfile {
            strategy: CollaborationStrategy::LocalPrivate,
            optimal_task_types: &["sensitive", "private"],
            cost_multiplier: 0.1,
            reasoning_strength: 0.6,
            context_limit: 32_000,
            privacy_rating: 5,
            fast: true,
            base_price_per_1k: 0.0,
            models: &[LOCAL_MODEL],
        },
        StrategyProfile {
            strategy: CollaborationStrategy::FastResponse,
            optimal_task_types: &["quick_question", "chat", "formatting"],
            cost_multiplier: 0.3,
            reasoning_strength: 0.5,
            context_limit: 32_000,
            privacy_rating: 3,
            fast: true,
            base_price_per_1k: 0.0005,
            models: &[FAST_MODEL],
        },
        fallback_profile(),
    ]
}

/// Profile of [`CollaborationStrategy::FALLBACK`].
pub fn fallback_profile() -> StrategyProfile {
    StrategyProfile {
        strategy: CollaborationStrategy::HybridAdaptive,
        optimal_task_types: &["general"],
        cost_multiplier: 1.0,
        reasoning_strength: 0.85,
        context_limit: 200_000,
        privacy_rating: 4,
        fast: false,
        base_price_per_1k: 0.005,
        models: &[],
    }
}

/// Build the task-type → strategy map from the profiles.
///
/// The first profile that lists a task type owns it.
pub fn task_strategy_map(profiles: &[StrategyProfile]) -> HashMap<String, CollaborationStrategy> {
    let mut map = HashMap::new();
    for profile in profiles {
        for task in profile.optimal_task_types {
            map.entry(task.to_string()).or_insert(profile.strategy);
        }
    }
    map
}
