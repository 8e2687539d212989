//! Orchestrator - drives a request through routing, execution, approval and learning.
//!
//! # Flow
//!
//! ```text
//! request → router.plan → knowledge.synthesize → executor.execute
//!         → approval.assess → auto-approve | request human approval
//!         → knowledge.process_collaboration → router.record_performance
//! ```
//!
//! Model invocation happens behind [`CollaborationExecutor`]; the orchestrator
//! never talks to a model itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::approval::{ApprovalEngine, ApprovalStatistics};
use crate::config::Config;
use crate::entities::{
    ApprovalResult, ApprovalStatus, CollaborationRequest, CollaborationResponse,
    CollaborationStrategy, HumanApprovalRequest, Message, RiskAssessment, SessionState,
};
use crate::error::{AppError, AppResult};
use crate::knowledge::{KnowledgeEngine, KnowledgeStatistics, KnowledgeUpdate};
use crate::router::{CollaborationRouter, RoutingDecision, StrategyStats};

/// Score recorded for a strategy whose response a human denied.
pub const DENIAL_SCORE: f64 = 0.0;

/// Score recorded for a strategy whose execution failed.
pub const FAILURE_SCORE: f64 = 0.0;

// ============================================================================
// Executor Seam
// ============================================================================

/// Everything an executor needs to run one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// The original request.
    pub request: CollaborationRequest,
    /// Selected strategy, models and cost estimate.
    pub decision: RoutingDecision,
    /// Synthesized knowledge context (may be empty).
    pub context: String,
}

/// Runs a routed request against actual models.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CollaborationExecutor: Send + Sync {
    /// Execute the plan and return the model output.
    async fn execute(&self, plan: &ExecutionPlan) -> AppResult<CollaborationResponse>;
}

// ============================================================================
// Result Types
// ============================================================================

/// Result of one collaboration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationOutcome {
    /// Id assigned to the response.
    pub response_id: String,
    /// Executor response with approval fields filled in.
    pub response: CollaborationResponse,
    /// Routing decision used.
    pub decision: RoutingDecision,
    /// Risk assessment of the interaction.
    pub risk_assessment: RiskAssessment,
    /// Pending human approval, if one was opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_request: Option<HumanApprovalRequest>,
    /// System approval, if the interaction was auto-approved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_approval: Option<ApprovalResult>,
    /// Context handed to the executor.
    pub context: String,
    /// Knowledge graph changes.
    pub knowledge: KnowledgeUpdate,
}

/// Snapshot across all engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatistics {
    /// Sessions in the registry.
    pub sessions: usize,
    /// Cost across all sessions.
    pub total_cost: f64,
    /// Messages across all sessions.
    pub total_messages: usize,
    /// Router learning state.
    pub strategies: Vec<StrategyStats>,
    /// Approval workflow statistics.
    pub approvals: ApprovalStatistics,
    /// Knowledge graph statistics.
    pub knowledge: KnowledgeStatistics,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Composition root owning one instance of each engine plus the session registry.
#[derive(Clone)]
pub struct Orchestrator {
    router: CollaborationRouter,
    approval: ApprovalEngine,
    knowledge: KnowledgeEngine,
    sessions: Arc<RwLock<HashMap<String, SessionState>>>,
    /// Strategy behind each pending approval, for denial feedback.
    approval_strategies: Arc<RwLock<HashMap<String, CollaborationStrategy>>>,
}

impl Orchestrator {
    /// Build all engines from configuration.
    pub fn new(config: Config) -> Self {
        Self::from_engines(
            CollaborationRouter::new(config.router),
            ApprovalEngine::new(config.approval),
            KnowledgeEngine::new(config.knowledge),
        )
    }

    /// Compose pre-built engines.
    pub fn from_engines(
        router: CollaborationRouter,
        approval: ApprovalEngine,
        knowledge: KnowledgeEngine,
    ) -> Self {
        Self {
            router,
            approval,
            knowledge,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            approval_strategies: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The router.
    pub fn router(&self) -> &CollaborationRouter {
        &self.router
    }

    /// The approval engine.
    pub fn approval(&self) -> &ApprovalEngine {
        &self.approval
    }

    /// The knowledge engine.
    pub fn knowledge(&self) -> &KnowledgeEngine {
        &self.knowledge
    }

    /// Register or replace a session.
    pub async fn upsert_session(&self, session: SessionState) {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
    }

    /// Snapshot of a session.
    pub async fn session(&self, session_id: &str) -> AppResult<SessionState> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Snapshot of a session, creating an empty one if unknown.
    pub async fn get_or_create_session(&self, session_id: &str) -> SessionState {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::new(session_id))
            .clone()
    }

    /// Run one request end to end.
    pub async fn collaborate(
        &self,
        request: CollaborationRequest,
        executor: &dyn CollaborationExecutor,
    ) -> AppResult<CollaborationOutcome> {
        let session = self.get_or_create_session(&request.session_id).await;

        let decision = self.router.plan(&request, &session.user_preferences).await;
        let context = self
            .knowledge
            .synthesize_context_for_request(&request, request.max_tokens)
            .await;

        let plan = ExecutionPlan {
            request,
            decision,
            context,
        };
        let started = Instant::now();
        let mut response = match executor.execute(&plan).await {
            Ok(response) => response,
            Err(e) => {
                error!(
                    session_id = %plan.request.session_id,
                    strategy = %plan.decision.strategy,
                    error = %e,
                    "Collaboration execution failed"
                );
                self.router
                    .record_strategy_performance(plan.decision.strategy, FAILURE_SCORE)
                    .await;
                return Err(e);
            }
        };
        let ExecutionPlan {
            request,
            decision,
            context,
        } = plan;

        if response.processing_time <= 0.0 {
            response.processing_time = started.elapsed().as_secs_f64();
        }
        if response.cost_estimate <= 0.0 {
            response.cost_estimate = decision.cost_estimate;
        }
        let response_id = Uuid::new_v4().to_string();
        attach_response_id(&mut response, &response_id);

        let session = self.record_exchange(&request, &response).await?;

        let risk_assessment = self
            .approval
            .assess_collaboration_risk(&request, &response, &session);

        let mut approval_request = None;
        let mut auto_approval = None;
        if let Some(result) = self
            .approval
            .auto_approve_if_eligible(&response_id, &session.id, &risk_assessment)
            .await
        {
            response.approval_status = Some(ApprovalStatus::Approved);
            auto_approval = Some(result);
        } else {
            let pending = self
                .approval
                .request_human_approval(&response_id, &session.id, risk_assessment.clone(), None)
                .await;
            response.approval_required = true;
            response.approval_status = Some(ApprovalStatus::Pending);
            self.approval_strategies
                .write()
                .await
                .insert(pending.id.clone(), response.strategy_used);
            self.with_session(&session.id, |s| s.pending_approvals.push(pending.id.clone()))
                .await;
            approval_request = Some(pending);
        }

        let knowledge = self
            .knowledge
            .process_collaboration(&request, &response, &session)
            .await;
        self.router
            .record_strategy_performance(response.strategy_used, response.confidence_score)
            .await;

        let learned = format!("strategy_effectiveness:{}", response.strategy_used);
        self.with_session(&session.id, |s| {
            if !s.learned_patterns.contains(&learned) {
                s.learned_patterns.push(learned);
            }
        })
        .await;

        info!(
            session_id = %session.id,
            response_id = %response_id,
            strategy = %response.strategy_used,
            risk_level = %risk_assessment.risk_level,
            approval_required = response.approval_required,
            confidence = response.confidence_score,
            "Collaboration completed"
        );

        Ok(CollaborationOutcome {
            response_id,
            response,
            decision,
            risk_assessment,
            approval_request,
            auto_approval,
            context,
            knowledge,
        })
    }

    /// Record a human decision and feed it back into routing.
    pub async fn decide_approval(
        &self,
        approval_id: &str,
        status: ApprovalStatus,
        feedback: Option<String>,
        approver: &str,
    ) -> AppResult<ApprovalResult> {
        let result = self
            .approval
            .process_approval_decision(approval_id, status, feedback, approver)
            .await?;

        let strategy = self.approval_strategies.write().await.remove(approval_id);
        if result.status == ApprovalStatus::Denied {
            if let Some(strategy) = strategy {
                self.router
                    .record_strategy_performance(strategy, DENIAL_SCORE)
                    .await;
            }
        }
        self.with_session(&result.session_id, |s| {
            s.resolve_approval(approval_id);
        })
        .await;
        Ok(result)
    }

    /// Time out overdue approvals and clear them from their sessions.
    pub async fn sweep_timeouts(&self) -> Vec<ApprovalResult> {
        self.sweep_timeouts_at(Utc::now()).await
    }

    /// Time out approvals overdue at `now`.
    pub async fn sweep_timeouts_at(&self, now: DateTime<Utc>) -> Vec<ApprovalResult> {
        let results = self.approval.check_approval_timeouts_at(now).await;
        if results.is_empty() {
            return results;
        }

        {
            let mut strategies = self.approval_strategies.write().await;
            for result in &results {
                strategies.remove(&result.approval_id);
            }
        }
        let mut sessions = self.sessions.write().await;
        for result in &results {
            if let Some(session) = sessions.get_mut(&result.session_id) {
                session.resolve_approval(&result.approval_id);
            }
        }
        results
    }

    /// Snapshot across all engines.
    pub async fn statistics(&self) -> OrchestratorStatistics {
        let (sessions, total_cost, total_messages) = {
            let sessions = self.sessions.read().await;
            (
                sessions.len(),
                sessions.values().map(|s| s.total_cost).sum(),
                sessions.values().map(|s| s.messages.len()).sum(),
            )
        };
        OrchestratorStatistics {
            sessions,
            total_cost,
            total_messages,
            strategies: self.router.strategy_statistics().await,
            approvals: self.approval.approval_statistics().await,
            knowledge: self.knowledge.knowledge_statistics().await,
        }
    }

    /// Append the user and assistant messages; returns the updated session.
    async fn record_exchange(
        &self,
        request: &CollaborationRequest,
        response: &CollaborationResponse,
    ) -> AppResult<SessionState> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&request.session_id)
            .ok_or_else(|| AppError::SessionNotFound {
                session_id: request.session_id.clone(),
            })?;
        session.push_message(Message::user(&request.content));
        session.push_message(
            Message::assistant(&response.content)
                .with_strategy(response.strategy_used, response.cost_estimate),
        );
        Ok(session.clone())
    }

    async fn with_session<F>(&self, session_id: &str, f: F)
    where
        F: FnOnce(&mut SessionState),
    {
        match self.sessions.write().await.get_mut(session_id) {
            Some(session) => f(session),
            None => warn!(session_id = %session_id, "Session vanished during collaboration"),
        }
    }
}

fn attach_response_id(response: &mut CollaborationResponse, response_id: &str) {
    match response.metadata.as_mut() {
        Some(serde_json::Value::Object(map)) => {
            map.insert("response_id".to_string(), json!(response_id));
        }
        Some(other) => {
            let original = other.take();
            *other = json!({ "response_id": response_id, "executor": original });
        }
        None => response.metadata = Some(json!({ "response_id": response_id })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApprovalConfig;
    use crate::entities::{RiskLevel, UserPreferences};
    use crate::error::ExecutionError;
    use pretty_assertions::assert_eq;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Config::default())
    }

    fn executor_returning(content: &'static str, confidence: f64) -> MockCollaborationExecutor {
        let mut executor = MockCollaborationExecutor::new();
        executor.expect_execute().returning(move |plan| {
            Ok(CollaborationResponse::new(
                content,
                confidence,
                plan.decision.strategy,
                plan.decision.models.clone(),
            ))
        });
        executor
    }

    #[tokio::test]
    async fn test_low_risk_request_is_auto_approved() {
        let orchestrator = orchestrator();
        let executor = executor_returning("Check the loop bounds.", 0.9);

        let outcome = orchestrator
            .collaborate(
                CollaborationRequest::new("s1", "analyze this function for bugs"),
                &executor,
            )
            .await
            .unwrap();

        assert_eq!(
            outcome.decision.strategy,
            CollaborationStrategy::CostOptimizedReasoning
        );
        assert_eq!(outcome.risk_assessment.risk_level, RiskLevel::Low);
        assert!(outcome.auto_approval.is_some());
        assert!(outcome.approval_request.is_none());
        assert_eq!(outcome.response.approval_status, Some(ApprovalStatus::Approved));
        assert_eq!(
            outcome.response.metadata.as_ref().unwrap()["response_id"],
            outcome.response_id.as_str()
        );

        let session = orchestrator.session("s1").await.unwrap();
        assert_eq!(session.messages.len(), 2);
        assert!(session.total_cost > 0.0);
        assert!(session.pending_approvals.is_empty());
        assert_eq!(
            session.learned_patterns,
            vec!["strategy_effectiveness:cost_optimized_reasoning"]
        );
    }

    #[tokio::test]
    async fn test_requested_approval_then_denied() {
        let orchestrator = orchestrator();
        let executor = executor_returning("Here you go.", 0.8);

        let outcome = orchestrator
            .collaborate(
                CollaborationRequest::new("s1", "summarize my notes").with_require_approval(true),
                &executor,
            )
            .await
            .unwrap();
        let pending = outcome.approval_request.unwrap();
        assert!(outcome.response.approval_required);
        assert_eq!(
            orchestrator.session("s1").await.unwrap().pending_approvals,
            vec![pending.id.clone()]
        );

        let strategy = outcome.response.strategy_used;
        let result = orchestrator
            .decide_approval(&pending.id, ApprovalStatus::Denied, None, "reviewer")
            .await
            .unwrap();
        assert_eq!(result.status, ApprovalStatus::Denied);
        assert!(orchestrator
            .session("s1")
            .await
            .unwrap()
            .pending_approvals
            .is_empty());

        let stats = orchestrator.router().strategy_statistics().await;
        let entry = stats.iter().find(|s| s.strategy == strategy).unwrap();
        assert_eq!(entry.sample_count, 2);
        assert_eq!(entry.last_score, Some(DENIAL_SCORE));

        let err = orchestrator
            .decide_approval(&pending.id, ApprovalStatus::Approved, None, "reviewer")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Approval(_)));
    }

    #[tokio::test]
    async fn test_sweep_clears_session() {
        let orchestrator = orchestrator();
        let executor = executor_returning("ok", 0.8);
        let outcome = orchestrator
            .collaborate(
                CollaborationRequest::new("s1", "hello").with_require_approval(true),
                &executor,
            )
            .await
            .unwrap();
        let pending = outcome.approval_request.unwrap();

        let later = pending.created_at + chrono::Duration::seconds(301);
        let results = orchestrator.sweep_timeouts_at(later).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ApprovalStatus::Timeout);
        assert!(orchestrator
            .session("s1")
            .await
            .unwrap()
            .pending_approvals
            .is_empty());
        assert!(orchestrator.sweep_timeouts_at(later).await.is_empty());
    }

    #[tokio::test]
    async fn test_unbounded_default_timeout_leaves_sweep_working() {
        let config = Config {
            approval: ApprovalConfig {
                default_timeout_secs: u64::MAX,
                ..Default::default()
            },
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(config);
        let executor = executor_returning("ok", 0.8);
        let outcome = orchestrator
            .collaborate(
                CollaborationRequest::new("s1", "hello").with_require_approval(true),
                &executor,
            )
            .await
            .unwrap();
        let pending = outcome.approval_request.unwrap();
        assert_eq!(pending.deadline(), None);

        assert!(orchestrator.sweep_timeouts().await.is_empty());
        assert_eq!(
            orchestrator.approval().get_approval_status(&pending.id).await,
            Some(ApprovalStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_execution_failure_is_propagated_and_penalised() {
        let orchestrator = orchestrator();
        let mut executor = MockCollaborationExecutor::new();
        executor.expect_execute().times(1).returning(|_| {
            Err(ExecutionError::ModelUnavailable {
                model: "deepseek-r1".to_string(),
            }
            .into())
        });

        let err = orchestrator
            .collaborate(CollaborationRequest::new("s1", "debug this"), &executor)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Execution(_)));

        let stats = orchestrator.router().strategy_statistics().await;
        assert_eq!(stats.iter().map(|s| s.sample_count).sum::<usize>(), 1);
        assert!(orchestrator.session("s1").await.unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn test_session_preferences_drive_routing() {
        let orchestrator = orchestrator();
        orchestrator
            .upsert_session(SessionState::new("s1").with_preferences(UserPreferences {
                privacy_mode: true,
                ..Default::default()
            }))
            .await;
        let executor = executor_returning("ok", 0.9);
        let outcome = orchestrator
            .collaborate(CollaborationRequest::new("s1", "hello there"), &executor)
            .await
            .unwrap();
        assert_eq!(outcome.decision.strategy, CollaborationStrategy::LocalPrivate);
    }

    #[tokio::test]
    async fn test_statistics_snapshot() {
        let orchestrator = orchestrator();
        let executor = executor_returning("ok", 0.9);
        orchestrator
            .collaborate(CollaborationRequest::new("s1", "sql query help"), &executor)
            .await
            .unwrap();

        let stats = orchestrator.statistics().await;
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.approvals.total_decisions, 1);
        assert!(stats.knowledge.live_nodes >= 2);
        assert!(serde_json::to_value(&stats).is_ok());
    }

    #[test]
    fn test_attach_response_id_wraps_non_object_metadata() {
        let mut response =
            CollaborationResponse::new("x", 1.0, CollaborationStrategy::FastResponse, vec![])
                .with_metadata(json!("raw"));
        attach_response_id(&mut response, "r-1");
        assert_eq!(
            response.metadata,
            Some(json!({ "response_id": "r-1", "executor": "raw" }))
        );
    }
}
