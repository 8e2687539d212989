//! End-to-end collaboration tests
//!
//! These tests drive the public API the way a session layer would: build an
//! orchestrator, run requests through a stub executor, and resolve approvals.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use tokio_test::{assert_err, assert_ok};

use collab_orchestrator::approval::ApprovalEngine;
use collab_orchestrator::config::{ApprovalConfig, Config, KnowledgeConfig, RouterConfig};
use collab_orchestrator::entities::{
    ApprovalStatus, KnowledgeType, Message, RiskLevel, UserPreferences,
};
use collab_orchestrator::error::{ApprovalError, ExecutionError};
use collab_orchestrator::knowledge::KnowledgeEngine;
use collab_orchestrator::router::{estimate_tokens, SelectionSource};
use collab_orchestrator::{
    AppError, AppResult, CollaborationExecutor, CollaborationRequest, CollaborationResponse,
    CollaborationRouter, CollaborationStrategy, ExecutionPlan, Orchestrator, SessionState,
};

// ============================================================================
// Test Executors
// ============================================================================

/// Echoes the plan back with a fixed confidence and counts calls.
struct EchoExecutor {
    confidence: f64,
    calls: AtomicUsize,
}

impl EchoExecutor {
    fn new(confidence: f64) -> Self {
        Self {
            confidence,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CollaborationExecutor for EchoExecutor {
    async fn execute(&self, plan: &ExecutionPlan) -> AppResult<CollaborationResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CollaborationResponse::new(
            format!("Handled: {}", plan.request.content),
            self.confidence,
            plan.decision.strategy,
            plan.decision.models.clone(),
        )
        .with_processing_time(0.25))
    }
}

struct FailingExecutor;

#[async_trait]
impl CollaborationExecutor for FailingExecutor {
    async fn execute(&self, _plan: &ExecutionPlan) -> AppResult<CollaborationResponse> {
        Err(ExecutionError::Timeout { timeout_ms: 30_000 }.into())
    }
}

fn busy_session() -> SessionState {
    let mut session = SessionState::new("busy");
    let start = Utc::now() - Duration::hours(4);
    for i in 0..20 {
        session.push_message(
            Message::user(format!("earlier {i}")).at(start + Duration::minutes(i * 10)),
        );
    }
    let burst_start = Utc::now() - Duration::seconds(120);
    for i in 0..5 {
        session.push_message(
            Message::assistant(format!("burst {i}")).at(burst_start + Duration::seconds(i * 30)),
        );
    }
    session.total_cost = 2.5;
    session
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_reasoning_request_selects_cost_optimized_reasoning() {
    let router = CollaborationRouter::new(RouterConfig::default());
    let request = CollaborationRequest::new("s1", "analyze this function for bugs");

    let strategy = router
        .select_optimal_strategy(&request, &UserPreferences::default())
        .await;
    assert_eq!(strategy, CollaborationStrategy::CostOptimizedReasoning);

    let decision = router.plan(&request, &UserPreferences::default()).await;
    assert_eq!(decision.source, SelectionSource::Scored);
    assert!(decision.factors.requires_reasoning);
    assert!(!decision.models.is_empty());
}

#[tokio::test]
async fn test_busy_board_session_requires_approval() {
    let engine = ApprovalEngine::new(ApprovalConfig::default());
    let session = busy_session();
    let request = CollaborationRequest::new("busy", "summarize our discussion");
    let response = CollaborationResponse::new(
        "Here is the summary.",
        0.7,
        CollaborationStrategy::MultiModelBoard,
        vec![],
    );

    let assessment = engine.assess_collaboration_risk(&request, &response, &session);
    assert!(assessment.risk_score >= 0.6);
    assert_eq!(assessment.risk_level, RiskLevel::High);
    assert!(assessment.requires_approval);

    let names: Vec<&str> = assessment
        .risk_factors
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(
        names,
        vec![
            "strategy:multi_model_board",
            "session_length",
            "session_cost",
            "burst_exchange"
        ]
    );
}

#[tokio::test]
async fn test_identical_concepts_merge_across_sessions() {
    let engine = KnowledgeEngine::new(KnowledgeConfig::default());
    let strategy = CollaborationStrategy::SequentialRefinement;
    let response = CollaborationResponse::new("Done.", 0.6, strategy, vec![]);

    for sid in ["alpha", "beta"] {
        let request = CollaborationRequest::new(sid, "Help me refactor this module");
        engine
            .process_collaboration(&request, &response, &SessionState::new(sid))
            .await;
    }

    let nodes = engine
        .search_knowledge("refactoring", Some(&[KnowledgeType::Technique]), None, 10)
        .await;
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].source_sessions, vec!["alpha", "beta"]);
    assert_eq!(nodes[0].confidence_score, 0.6);
}

// ============================================================================
// Orchestrator Flow
// ============================================================================

#[tokio::test]
async fn test_collaboration_flow_learns_and_synthesizes() {
    let orchestrator = Orchestrator::new(Config::default());
    let executor = EchoExecutor::new(0.85);

    let first = assert_ok!(
        orchestrator
            .collaborate(
                CollaborationRequest::new("s1", "Why is this database query so slow?"),
                &executor,
            )
            .await
    );
    assert_eq!(first.context, "");
    assert!(first.auto_approval.is_some());
    assert!(!first.knowledge.created.is_empty());

    let second = assert_ok!(
        orchestrator
            .collaborate(
                CollaborationRequest::new("s2", "Which database index fits this query?")
                    .with_max_tokens(300),
                &executor,
            )
            .await
    );
    assert!(second.context.contains("database"));
    assert!(estimate_tokens(&second.context, 4) <= 300);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

    let stats = orchestrator.statistics().await;
    assert_eq!(stats.sessions, 2);
    assert_eq!(stats.total_messages, 4);
    assert_eq!(stats.approvals.auto_approved_count, 2);
}

#[tokio::test]
async fn test_preferred_strategy_passes_through() {
    let orchestrator = Orchestrator::new(Config::default());
    let executor = EchoExecutor::new(0.9);

    let outcome = assert_ok!(
        orchestrator
            .collaborate(
                CollaborationRequest::new("s1", "pick a queue technology")
                    .with_preferred_strategy(CollaborationStrategy::MultiModelBoard),
                &executor,
            )
            .await
    );
    assert_eq!(outcome.decision.strategy, CollaborationStrategy::MultiModelBoard);
    assert_eq!(outcome.decision.source, SelectionSource::Preferred);
    assert_eq!(outcome.response.models_used.len(), 4);

    let prefs = orchestrator
        .knowledge()
        .search_knowledge("user preference", Some(&[KnowledgeType::Preference]), None, 5)
        .await;
    assert_eq!(prefs.len(), 1);
}

#[tokio::test]
async fn test_risky_request_waits_for_human() {
    let orchestrator = Orchestrator::new(Config::default());
    let executor = EchoExecutor::new(0.9);

    let outcome = assert_ok!(
        orchestrator
            .collaborate(
                CollaborationRequest::new("s1", "write a migration to drop table users"),
                &executor,
            )
            .await
    );
    assert!(outcome.response.approval_required);
    assert_eq!(outcome.response.approval_status, Some(ApprovalStatus::Pending));
    assert!(outcome
        .risk_assessment
        .disqualifying_categories
        .contains(&"data_modification".to_string()));

    let pending = outcome.approval_request.unwrap();
    let listed = orchestrator.approval().pending_approvals(Some("s1")).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, pending.id);

    let result = assert_ok!(
        orchestrator
            .decide_approval(
                &pending.id,
                ApprovalStatus::Approved,
                Some("migration reviewed".to_string()),
                "dba"
            )
            .await
    );
    assert_eq!(result.approver, "dba");
    assert_eq!(result.feedback.as_deref(), Some("migration reviewed"));

    let again = orchestrator
        .decide_approval(&pending.id, ApprovalStatus::Denied, None, "dba")
        .await;
    let err = assert_err!(again);
    assert!(matches!(
        err,
        AppError::Approval(ApprovalError::InvalidState {
            status: ApprovalStatus::Approved,
            ..
        })
    ));
}

#[tokio::test]
async fn test_unknown_approval_is_not_found() {
    let orchestrator = Orchestrator::new(Config::default());
    let err = assert_err!(
        orchestrator
            .decide_approval("nope", ApprovalStatus::Approved, None, "someone")
            .await
    );
    assert!(matches!(
        err,
        AppError::Approval(ApprovalError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_executor_failure_surfaces() {
    let orchestrator = Orchestrator::new(Config::default());
    let err = assert_err!(
        orchestrator
            .collaborate(CollaborationRequest::new("s1", "hello"), &FailingExecutor)
            .await
    );
    assert!(matches!(
        err,
        AppError::Execution(ExecutionError::Timeout { timeout_ms: 30_000 })
    ));
    assert_eq!(orchestrator.statistics().await.approvals.total_decisions, 0);
}

#[tokio::test]
async fn test_timeout_sweep_through_orchestrator() {
    let config = Config {
        approval: ApprovalConfig {
            default_timeout_secs: 5,
            ..Default::default()
        },
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(config);
    let executor = EchoExecutor::new(0.9);

    let outcome = assert_ok!(
        orchestrator
            .collaborate(
                CollaborationRequest::new("s1", "hello").with_require_approval(true),
                &executor,
            )
            .await
    );
    let pending = outcome.approval_request.unwrap();
    assert_eq!(pending.timeout_seconds, 5);

    assert!(orchestrator.sweep_timeouts().await.is_empty());
    let swept = orchestrator
        .sweep_timeouts_at(pending.created_at + Duration::seconds(5))
        .await;
    assert_eq!(swept.len(), 1);
    assert_eq!(
        orchestrator.approval().get_approval_status(&pending.id).await,
        Some(ApprovalStatus::Timeout)
    );
}
