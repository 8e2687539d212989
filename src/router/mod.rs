//! Collaboration router - selects a strategy and model set for each request.
//!
//! Selection runs in three tiers:
//!
//! ```text
//! preferred strategy (if compatible) → task-type map → multi-factor scoring
//! ```
//!
//! Scoring combines static [`StrategyProfile`]s, request-derived
//! [`CollaborationFactors`], user preference multipliers, and a rolling
//! window of past performance per strategy. Routing is total: every input
//! yields a strategy, and unknown strategy names resolve to
//! [`CollaborationStrategy::FALLBACK`].

mod factors;
mod profiles;

pub use factors::estimate_tokens;
pub use profiles::*;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::RouterConfig;
use crate::entities::{
    CollaborationFactors, CollaborationRequest, CollaborationStrategy, UserPreferences,
};

const SCORE_EPSILON: f64 = 1e-9;

/// How a strategy was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    /// The caller's preferred strategy passed the compatibility check.
    Preferred,
    /// The request's task type mapped to a strategy.
    TaskType,
    /// Multi-factor scoring picked the arg-max.
    Scored,
}

/// Score of one strategy for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyScore {
    /// Scored strategy.
    pub strategy: CollaborationStrategy,
    /// Final non-negative score.
    pub score: f64,
}

/// Everything the external executor needs to run a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Selected strategy.
    pub strategy: CollaborationStrategy,
    /// How it was selected.
    pub source: SelectionSource,
    /// Factors derived from the request.
    pub factors: CollaborationFactors,
    /// Models to invoke.
    pub models: Vec<String>,
    /// Estimated cost in USD.
    pub cost_estimate: f64,
}

/// Rolling performance summary for one strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyStats {
    /// Strategy.
    pub strategy: CollaborationStrategy,
    /// Samples currently in the window.
    pub sample_count: usize,
    /// Rolling average, 1.0 when no samples exist.
    pub average_score: f64,
    /// Most recent score.
    pub last_score: Option<f64>,
}

#[derive(Debug, Default)]
struct LearningState {
    windows: HashMap<CollaborationStrategy, VecDeque<f64>>,
}

impl LearningState {
    fn average(&self, strategy: CollaborationStrategy) -> f64 {
        match self.windows.get(&strategy) {
            Some(window) if !window.is_empty() => {
                window.iter().sum::<f64>() / window.len() as f64
            }
            _ => 1.0,
        }
    }
}

/// Strategy and model selection with a learned feedback loop.
#[derive(Clone)]
pub struct CollaborationRouter {
    config: RouterConfig,
    profiles: Arc<HashMap<CollaborationStrategy, StrategyProfile>>,
    fallback: Arc<StrategyProfile>,
    task_map: Arc<HashMap<String, CollaborationStrategy>>,
    learning: Arc<RwLock<LearningState>>,
}

impl CollaborationRouter {
    /// Create a router with the built-in profiles.
    pub fn new(config: RouterConfig) -> Self {
        Self::with_profiles(config, builtin_profiles())
    }

    /// Create a router with custom profiles.
    ///
    /// Strategies missing from `profiles` resolve to the fallback strategy's
    /// profile, or to the built-in one if that is missing too.
    pub fn with_profiles(config: RouterConfig, profiles: Vec<StrategyProfile>) -> Self {
        let task_map = task_strategy_map(&profiles);
        let by_strategy: HashMap<_, _> = profiles.into_iter().map(|p| (p.strategy, p)).collect();
        let fallback = by_strategy
            .get(&CollaborationStrategy::FALLBACK)
            .cloned()
            .unwrap_or_else(fallback_profile);

        Self {
            config,
            profiles: Arc::new(by_strategy),
            fallback: Arc::new(fallback),
            task_map: Arc::new(task_map),
            learning: Arc::new(RwLock::new(LearningState::default())),
        }
    }

    /// Profile for a strategy, falling back to the fallback strategy's profile.
    pub fn profile(&self, strategy: CollaborationStrategy) -> &StrategyProfile {
        self.profiles.get(&strategy).unwrap_or(&self.fallback)
    }

    /// Derive routing factors for a request.
    pub fn analyze_factors(
        &self,
        request: &CollaborationRequest,
        preferences: &UserPreferences,
    ) -> CollaborationFactors {
        factors::analyze(request, preferences, self.config.massive_context_threshold)
    }

    /// Whether a strategy can serve a request at all.
    pub fn validate_strategy_compatibility(
        &self,
        strategy: CollaborationStrategy,
        factors: &CollaborationFactors,
    ) -> bool {
        let profile = self.profile(strategy);
        if profile.context_limit < factors.estimated_tokens {
            return false;
        }
        if factors.privacy_critical && profile.privacy_rating < 4 {
            return false;
        }
        true
    }

    /// Select the strategy for a request. Never fails.
    pub async fn select_optimal_strategy(
        &self,
        request: &CollaborationRequest,
        preferences: &UserPreferences,
    ) -> CollaborationStrategy {
        let factors = self.analyze_factors(request, preferences);
        self.select_with_factors(request, preferences, &factors).await.0
    }

    async fn select_with_factors(
        &self,
        request: &CollaborationRequest,
        preferences: &UserPreferences,
        factors: &CollaborationFactors,
    ) -> (CollaborationStrategy, SelectionSource) {
        if let Some(preferred) = request.preferred_strategy {
            if self.validate_strategy_compatibility(preferred, factors) {
                debug!(strategy = %preferred, "Using compatible preferred strategy");
                return (preferred, SelectionSource::Preferred);
            }
            debug!(
                strategy = %preferred,
                estimated_tokens = factors.estimated_tokens,
                privacy_critical = factors.privacy_critical,
                "Preferred strategy incompatible, falling through to scoring"
            );
        }

        if let Some(task_type) = &request.task_type {
            if let Some(strategy) = self.task_map.get(&task_type.trim().to_lowercase()) {
                debug!(task_type = %task_type, strategy = %strategy, "Strategy mapped from task type");
                return (*strategy, SelectionSource::TaskType);
            }
        }

        let scores = self.score_strategies(factors, preferences).await;
        let mut best: Option<(&StrategyScore, f64)> = None;
        for candidate in &scores {
            let cost = self.profile(candidate.strategy).cost_multiplier;
            best = match best {
                None => Some((candidate, cost)),
                Some((current, current_cost)) => {
                    let better = candidate.score > current.score + SCORE_EPSILON
                        || ((candidate.score - current.score).abs() <= SCORE_EPSILON
                            && cost < current_cost);
                    if better {
                        Some((candidate, cost))
                    } else {
                        Some((current, current_cost))
                    }
                }
            };
        }

        let strategy = best
            .map(|(s, _)| s.strategy)
            .unwrap_or(CollaborationStrategy::FALLBACK);
        debug!(strategy = %strategy, ?scores, "Strategy selected by scoring");
        (strategy, SelectionSource::Scored)
    }

    /// Score every strategy, in declaration order.
    pub async fn score_strategies(
        &self,
        factors: &CollaborationFactors,
        preferences: &UserPreferences,
    ) -> Vec<StrategyScore> {
        let learning = self.learning.read().await;
        CollaborationStrategy::ALL
            .iter()
            .map(|&strategy| StrategyScore {
                strategy,
                score: self.score_strategy(
                    strategy,
                    factors,
                    preferences.weight_for(strategy),
                    learning.average(strategy),
                ),
            })
            .collect()
    }

    fn score_strategy(
        &self,
        strategy: CollaborationStrategy,
        factors: &CollaborationFactors,
        preference_multiplier: f64,
        learning_multiplier: f64,
    ) -> f64 {
        let profile = self.profile(strategy);
        let mut score = 0.0;

        if factors.requires_reasoning && profile.reasoning_strength > 0.8 {
            score += 0.3;
        }

        if profile.context_limit < factors.estimated_tokens {
            score -= 0.5;
        } else if factors.requires_massive_context {
            if profile.context_limit >= self.config.massive_context_threshold.saturating_mul(5) {
                score += 0.3;
            } else {
                score -= 0.3;
            }
        }

        if factors.cost_sensitive {
            score += 0.2 * (1.0 / (profile.cost_multiplier + 0.1));
        }

        if factors.privacy_critical {
            score += 0.3 * (f64::from(profile.privacy_rating) / 5.0);
        }

        if factors.requires_multi_perspective
            && strategy == CollaborationStrategy::MultiModelBoard
        {
            score += 0.4;
        }

        if factors.time_sensitive && profile.fast {
            score += 0.2;
        }

        (score * preference_multiplier * learning_multiplier).max(0.0)
    }

    /// Models to invoke for a strategy.
    ///
    /// Static for every strategy except [`CollaborationStrategy::HybridAdaptive`],
    /// which assembles its list from the factors.
    pub fn select_models_for_strategy(
        &self,
        strategy: CollaborationStrategy,
        factors: &CollaborationFactors,
    ) -> Vec<String> {
        let profile = self.profile(strategy);
        if strategy != CollaborationStrategy::HybridAdaptive && !profile.models.is_empty() {
            return profile.models.iter().map(|m| m.to_string()).collect();
        }

        let mut models: Vec<String> = Vec::new();
        let mut push = |model: &str| {
            if !models.iter().any(|m| m == model) {
                models.push(model.to_string());
            }
        };
        if factors.privacy_critical {
            push(LOCAL_MODEL);
        }
        if factors.requires_reasoning {
            push(REASONING_MODEL);
        }
        if factors.requires_massive_context {
            push(LONG_CONTEXT_MODEL);
        }
        if factors.requires_multi_perspective {
            push(DEFAULT_MODEL);
            push(PERSPECTIVE_MODEL);
        }
        if factors.time_sensitive {
            push(FAST_MODEL);
        }
        if models.is_empty() {
            models.push(DEFAULT_MODEL.to_string());
        }
        models
    }

    /// Estimated cost in USD for a strategy and token count.
    pub fn estimate_cost(&self, strategy: CollaborationStrategy, estimated_tokens: usize) -> f64 {
        let profile = self.profile(strategy);
        (estimated_tokens as f64 / 1000.0) * profile.base_price_per_1k * profile.cost_multiplier
    }

    /// Record a performance score (clamped to 0.0-1.0) for a strategy.
    pub async fn record_strategy_performance(&self, strategy: CollaborationStrategy, score: f64) {
        let score = if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let mut learning = self.learning.write().await;
        let window = learning.windows.entry(strategy).or_default();
        window.push_back(score);
        while window.len() > self.config.learning_window {
            window.pop_front();
        }
        debug!(
            strategy = %strategy,
            score = score,
            samples = window.len(),
            "Recorded strategy performance"
        );
    }

    /// Rolling performance summary for every strategy.
    pub async fn strategy_statistics(&self) -> Vec<StrategyStats> {
        let learning = self.learning.read().await;
        CollaborationStrategy::ALL
            .iter()
            .map(|&strategy| {
                let window = learning.windows.get(&strategy);
                StrategyStats {
                    strategy,
                    sample_count: window.map(|w| w.len()).unwrap_or(0),
                    average_score: learning.average(strategy),
                    last_score: window.and_then(|w| w.back().copied()),
                }
            })
            .collect()
    }

    /// Select strategy and models and estimate cost in one step.
    pub async fn plan(
        &self,
        request: &CollaborationRequest,
        preferences: &UserPreferences,
    ) -> RoutingDecision {
        let factors = self.analyze_factors(request, preferences);
        let (strategy, source) = self.select_with_factors(request, preferences, &factors).await;
        let models = self.select_models_for_strategy(strategy, &factors);
        let cost_estimate = self.estimate_cost(
            strategy,
            factors.estimated_tokens + request.max_tokens,
        );

        info!(
            strategy = %strategy,
            source = ?source,
            models = ?models,
            cost_estimate = cost_estimate,
            estimated_tokens = factors.estimated_tokens,
            "Routing decision made"
        );

        RoutingDecision {
            strategy,
            source,
            factors,
            models,
            cost_estimate,
        }
    }
}
