//! Approval engine - risk scoring and the human approval workflow.
//!
//! # States
//!
//! ```text
//!            ┌──────────▶ APPROVED
//!            │
//! PENDING ───┼──────────▶ DENIED
//!            │
//!            └──────────▶ TIMEOUT   (deadline passed, cooperative sweep)
//! ```
//!
//! Terminal states have no outgoing transitions. Removing an entry from the
//! pending map and appending its result to history happen under one write
//! guard, so a decision racing a timeout sweep resolves an id exactly once.

mod risk;

pub use risk::*;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ApprovalConfig;
use crate::entities::{
    days_ago, ApprovalResult, ApprovalStatus, CollaborationRequest, CollaborationResponse,
    HumanApprovalRequest, RiskAssessment, SessionState,
};
use crate::error::{ApprovalError, WorkflowResult};

// ============================================================================
// Statistics
// ============================================================================

/// Approval statistics computed from history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStatistics {
    /// Resolved approvals in history.
    pub total_decisions: usize,
    /// Approved (human or system).
    pub approved_count: usize,
    /// Approved by the system without a human.
    pub auto_approved_count: usize,
    /// Denied by a human.
    pub denied_count: usize,
    /// Timed out.
    pub timeout_count: usize,
    /// Still awaiting a decision.
    pub pending_count: usize,
    /// approved / total (0.0 when empty).
    pub approval_rate: f64,
    /// auto-approved / total (0.0 when empty).
    pub auto_approval_rate: f64,
}

// ============================================================================
// Workflow State
// ============================================================================

#[derive(Debug, Default)]
struct WorkflowState {
    pending: HashMap<String, HumanApprovalRequest>,
    history: Vec<ApprovalResult>,
    /// Status of every id in `history`, for double-decision detection.
    resolved: HashMap<String, ApprovalStatus>,
}

impl WorkflowState {
    /// Move a pending entry to history. Caller holds the write guard.
    fn resolve(
        &mut self,
        approval_id: &str,
        status: ApprovalStatus,
        feedback: Option<String>,
        approver: &str,
        decided_at: DateTime<Utc>,
    ) -> WorkflowResult<ApprovalResult> {
        if let Some(existing) = self.resolved.get(approval_id) {
            return Err(ApprovalError::InvalidState {
                approval_id: approval_id.to_string(),
                status: *existing,
            });
        }
        if !self.pending.contains_key(approval_id) {
            return Err(ApprovalError::NotFound {
                approval_id: approval_id.to_string(),
            });
        }
        let status = ApprovalStatus::Pending.transition(status)?;
        let request = self
            .pending
            .remove(approval_id)
            .ok_or_else(|| ApprovalError::NotFound {
                approval_id: approval_id.to_string(),
            })?;

        let result = ApprovalResult {
            approval_id: request.id.clone(),
            response_id: request.response_id,
            session_id: request.session_id,
            status,
            feedback,
            approver: approver.to_string(),
            decided_at,
            auto_approved: false,
            risk_level: request.risk_assessment.risk_level,
        };
        self.resolved.insert(request.id, status);
        self.history.push(result.clone());
        Ok(result)
    }
}

// ============================================================================
// Approval Engine
// ============================================================================

/// Risk assessment plus the pending→terminal approval workflow.
#[derive(Clone)]
pub struct ApprovalEngine {
    config: ApprovalConfig,
    assessor: RiskAssessor,
    state: Arc<RwLock<WorkflowState>>,
}

impl ApprovalEngine {
    /// Create an engine with the built-in risk rules.
    pub fn new(config: ApprovalConfig) -> Self {
        let assessor = RiskAssessor::new(&config);
        Self::with_assessor(config, assessor)
    }

    /// Create an engine with a custom assessor.
    pub fn with_assessor(config: ApprovalConfig, assessor: RiskAssessor) -> Self {
        Self {
            config,
            assessor,
            state: Arc::new(RwLock::new(WorkflowState::default())),
        }
    }

    /// Score the risk of one interaction.
    pub fn assess_collaboration_risk(
        &self,
        request: &CollaborationRequest,
        response: &CollaborationResponse,
        session: &SessionState,
    ) -> RiskAssessment {
        let assessment = self.assessor.assess(request, response, session);
        debug!(
            session_id = %session.id,
            risk_score = assessment.risk_score,
            risk_level = %assessment.risk_level,
            factors = assessment.risk_factors.len(),
            requires_approval = assessment.requires_approval,
            "Risk assessed"
        );
        assessment
    }

    /// Open a pending approval for a response.
    pub async fn request_human_approval(
        &self,
        response_id: &str,
        session_id: &str,
        assessment: RiskAssessment,
        timeout_seconds: Option<u64>,
    ) -> HumanApprovalRequest {
        let timeout = timeout_seconds.unwrap_or(self.config.default_timeout_secs);
        let request = HumanApprovalRequest::new(response_id, session_id, assessment, timeout);

        let mut state = self.state.write().await;
        state.pending.insert(request.id.clone(), request.clone());

        info!(
            approval_id = %request.id,
            session_id = %session_id,
            risk_level = %request.risk_assessment.risk_level,
            timeout_secs = timeout,
            pending = state.pending.len(),
            "Human approval requested"
        );
        request
    }

    /// Record a human decision.
    ///
    /// Only `Approved` and `Denied` are valid decisions. Unknown ids yield
    /// [`ApprovalError::NotFound`]; ids already resolved (including by the
    /// timeout sweep) yield [`ApprovalError::InvalidState`].
    pub async fn process_approval_decision(
        &self,
        approval_id: &str,
        status: ApprovalStatus,
        feedback: Option<String>,
        approver: &str,
    ) -> WorkflowResult<ApprovalResult> {
        if !matches!(status, ApprovalStatus::Approved | ApprovalStatus::Denied) {
            return Err(ApprovalError::InvalidTransition {
                from: ApprovalStatus::Pending,
                to: status,
            });
        }

        let mut state = self.state.write().await;
        let result = state.resolve(approval_id, status, feedback, approver, Utc::now());
        match &result {
            Ok(r) => info!(
                approval_id = %approval_id,
                status = %r.status,
                approver = %approver,
                "Approval decided"
            ),
            Err(e) => warn!(approval_id = %approval_id, error = %e, "Approval decision rejected"),
        }
        result
    }

    /// Time out every pending approval whose deadline has passed.
    pub async fn check_approval_timeouts(&self) -> Vec<ApprovalResult> {
        self.check_approval_timeouts_at(Utc::now()).await
    }

    /// Time out every pending approval whose deadline is at or before `now`.
    pub async fn check_approval_timeouts_at(&self, now: DateTime<Utc>) -> Vec<ApprovalResult> {
        let mut state = self.state.write().await;
        let mut expired: Vec<(DateTime<Utc>, String)> = state
            .pending
            .values()
            .filter(|req| req.is_expired_at(now))
            .map(|req| (req.created_at, req.id.clone()))
            .collect();
        expired.sort();

        let mut results = Vec::with_capacity(expired.len());
        for (_, id) in expired {
            let timeout_secs = state.pending.get(&id).map(|r| r.timeout_seconds).unwrap_or(0);
            let feedback = format!("Approval timed out after {} seconds", timeout_secs);
            match state.resolve(
                &id,
                ApprovalStatus::Timeout,
                Some(feedback),
                &self.config.system_approver,
                now,
            ) {
                Ok(result) => results.push(result),
                Err(e) => warn!(approval_id = %id, error = %e, "Failed to time out approval"),
            }
        }

        if !results.is_empty() {
            info!(
                timed_out = results.len(),
                remaining = state.pending.len(),
                "Approval timeout sweep completed"
            );
        }
        results
    }

    /// Approve without a human when the assessment allows it.
    ///
    /// Returns `None` (and records nothing) when the assessment is not eligible.
    pub async fn auto_approve_if_eligible(
        &self,
        response_id: &str,
        session_id: &str,
        assessment: &RiskAssessment,
    ) -> Option<ApprovalResult> {
        if !assessment.auto_approval_eligible || assessment.requires_approval {
            return None;
        }

        let result = ApprovalResult {
            approval_id: Uuid::new_v4().to_string(),
            response_id: response_id.to_string(),
            session_id: session_id.to_string(),
            status: ApprovalStatus::Approved,
            feedback: Some(format!(
                "Auto-approved: {} risk ({:.2})",
                assessment.risk_level, assessment.risk_score
            )),
            approver: self.config.system_approver.clone(),
            decided_at: Utc::now(),
            auto_approved: true,
            risk_level: assessment.risk_level,
        };

        let mut state = self.state.write().await;
        state
            .resolved
            .insert(result.approval_id.clone(), ApprovalStatus::Approved);
        state.history.push(result.clone());

        debug!(
            approval_id = %result.approval_id,
            session_id = %session_id,
            risk_level = %assessment.risk_level,
            "Auto-approved"
        );
        Some(result)
    }

    /// Current status of an approval id.
    pub async fn get_approval_status(&self, approval_id: &str) -> Option<ApprovalStatus> {
        let state = self.state.read().await;
        if state.pending.contains_key(approval_id) {
            return Some(ApprovalStatus::Pending);
        }
        state.resolved.get(approval_id).copied()
    }

    /// Pending approvals, oldest first, optionally for one session.
    pub async fn pending_approvals(&self, session_id: Option<&str>) -> Vec<HumanApprovalRequest> {
        let state = self.state.read().await;
        let mut pending: Vec<_> = state
            .pending
            .values()
            .filter(|r| session_id.map_or(true, |s| r.session_id == s))
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        pending
    }

    /// Resolved approvals in decision order.
    pub async fn approval_history(&self) -> Vec<ApprovalResult> {
        self.state.read().await.history.clone()
    }

    /// Statistics computed on demand from history.
    pub async fn approval_statistics(&self) -> ApprovalStatistics {
        let state = self.state.read().await;
        let mut stats = ApprovalStatistics {
            total_decisions: state.history.len(),
            pending_count: state.pending.len(),
            ..Default::default()
        };
        for result in &state.history {
            match result.status {
                ApprovalStatus::Approved => {
                    stats.approved_count += 1;
                    if result.auto_approved {
                        stats.auto_approved_count += 1;
                    }
                }
                ApprovalStatus::Denied => stats.denied_count += 1,
                ApprovalStatus::Timeout => stats.timeout_count += 1,
                ApprovalStatus::Pending => {}
            }
        }
        if stats.total_decisions > 0 {
            let total = stats.total_decisions as f64;
            stats.approval_rate = stats.approved_count as f64 / total;
            stats.auto_approval_rate = stats.auto_approved_count as f64 / total;
        }
        stats
    }

    /// Purge history entries decided more than `older_than_days` ago.
    ///
    /// Returns the number of entries removed. Ages beyond the representable
    /// range purge nothing.
    pub async fn clear_approval_history(&self, older_than_days: i64) -> usize {
        self.clear_approval_history_before(days_ago(older_than_days))
            .await
    }

    /// Purge history entries decided before `cutoff`.
    pub async fn clear_approval_history_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.state.write().await;
        let before = state.history.len();

        let (kept, purged): (Vec<_>, Vec<_>) = std::mem::take(&mut state.history)
            .into_iter()
            .partition(|r| r.decided_at >= cutoff);
        for result in &purged {
            state.resolved.remove(&result.approval_id);
        }
        state.history = kept;

        let removed = before - state.history.len();
        if removed > 0 {
            info!(removed = removed, cutoff = %cutoff, "Approval history purged");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::RiskLevel;
    use chrono::Duration;

    fn engine() -> ApprovalEngine {
        ApprovalEngine::new(ApprovalConfig::default())
    }

    fn assessment(level: RiskLevel, eligible: bool) -> RiskAssessment {
        RiskAssessment {
            risk_score: match level {
                RiskLevel::Low => 0.1,
                RiskLevel::Medium => 0.4,
                RiskLevel::High => 0.7,
                RiskLevel::Critical => 0.9,
            },
            risk_level: level,
            risk_factors: vec![],
            requires_approval: matches!(level, RiskLevel::High | RiskLevel::Critical),
            auto_approval_eligible: eligible,
            disqualifying_categories: vec![],
            recommendation: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_request_then_approve() {
        let engine = engine();
        let req = engine
            .request_human_approval("resp-1", "sess-1", assessment(RiskLevel::High, false), None)
            .await;
        assert_eq!(req.timeout_seconds, 300);
        assert_eq!(
            engine.get_approval_status(&req.id).await,
            Some(ApprovalStatus::Pending)
        );

        let result = engine
            .process_approval_decision(
                &req.id,
                ApprovalStatus::Approved,
                Some("looks fine".to_string()),
                "alice",
            )
            .await
            .unwrap();
        assert_eq!(result.status, ApprovalStatus::Approved);
        assert_eq!(result.approver, "alice");
        assert_eq!(result.risk_level, RiskLevel::High);
        assert_eq!(
            engine.get_approval_status(&req.id).await,
            Some(ApprovalStatus::Approved)
        );
        assert!(engine.pending_approvals(None).await.is_empty());
        assert_eq!(engine.approval_history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let err = engine()
            .process_approval_decision("missing", ApprovalStatus::Denied, None, "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_double_decision_is_invalid_state() {
        let engine = engine();
        let req = engine
            .request_human_approval("r", "s", assessment(RiskLevel::High, false), None)
            .await;
        engine
            .process_approval_decision(&req.id, ApprovalStatus::Denied, None, "bob")
            .await
            .unwrap();
        let err = engine
            .process_approval_decision(&req.id, ApprovalStatus::Approved, None, "bob")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApprovalError::InvalidState {
                approval_id: req.id.clone(),
                status: ApprovalStatus::Denied,
            }
        );
        assert_eq!(engine.approval_history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_non_decision_status_rejected() {
        let engine = engine();
        let req = engine
            .request_human_approval("r", "s", assessment(RiskLevel::High, false), None)
            .await;
        for status in [ApprovalStatus::Pending, ApprovalStatus::Timeout] {
            let err = engine
                .process_approval_decision(&req.id, status, None, "bob")
                .await
                .unwrap_err();
            assert!(matches!(err, ApprovalError::InvalidTransition { .. }));
        }
        assert_eq!(
            engine.get_approval_status(&req.id).await,
            Some(ApprovalStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_timeout_sweep_resolves_once() {
        let engine = engine();
        let short = engine
            .request_human_approval("r1", "s", assessment(RiskLevel::High, false), Some(10))
            .await;
        let long = engine
            .request_human_approval("r2", "s", assessment(RiskLevel::High, false), Some(3600))
            .await;

        let later = short.created_at + Duration::seconds(11);
        let timed_out = engine.check_approval_timeouts_at(later).await;
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].approval_id, short.id);
        assert_eq!(timed_out[0].status, ApprovalStatus::Timeout);
        assert_eq!(timed_out[0].approver, "system");

        assert!(engine.check_approval_timeouts_at(later).await.is_empty());
        assert_eq!(
            engine.get_approval_status(&long.id).await,
            Some(ApprovalStatus::Pending)
        );

        let err = engine
            .process_approval_decision(&short.id, ApprovalStatus::Approved, None, "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_block_sweep() {
        let engine = engine();
        let forever = engine
            .request_human_approval(
                "r1",
                "s",
                assessment(RiskLevel::High, false),
                Some(u64::MAX),
            )
            .await;
        let short = engine
            .request_human_approval("r2", "s", assessment(RiskLevel::High, false), Some(10))
            .await;

        assert!(engine.check_approval_timeouts().await.is_empty());
        let timed_out = engine
            .check_approval_timeouts_at(short.created_at + Duration::days(365_000))
            .await;
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].approval_id, short.id);
        assert_eq!(
            engine.get_approval_status(&forever.id).await,
            Some(ApprovalStatus::Pending)
        );

        let result = engine
            .process_approval_decision(&forever.id, ApprovalStatus::Approved, None, "alice")
            .await
            .unwrap();
        assert_eq!(result.status, ApprovalStatus::Approved);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_decision_and_timeout_race_resolves_exactly_once() {
        for _ in 0..50 {
            let engine = engine();
            let req = engine
                .request_human_approval("r", "s", assessment(RiskLevel::High, false), Some(1))
                .await;
            let later = req.created_at + Duration::seconds(5);

            let decide = {
                let engine = engine.clone();
                let id = req.id.clone();
                tokio::spawn(async move {
                    engine
                        .process_approval_decision(&id, ApprovalStatus::Approved, None, "alice")
                        .await
                })
            };
            let sweep = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.check_approval_timeouts_at(later).await })
            };

            let decided = decide.await.unwrap();
            let swept = sweep.await.unwrap();
            let resolutions = usize::from(decided.is_ok()) + swept.len();
            assert_eq!(resolutions, 1);
            assert_eq!(engine.approval_history().await.len(), 1);
            assert!(engine.pending_approvals(None).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_auto_approve() {
        let engine = engine();
        let result = engine
            .auto_approve_if_eligible("r", "s", &assessment(RiskLevel::Low, true))
            .await
            .unwrap();
        assert!(result.auto_approved);
        assert_eq!(result.status, ApprovalStatus::Approved);
        assert_eq!(result.approver, "system");
        assert_eq!(
            engine.get_approval_status(&result.approval_id).await,
            Some(ApprovalStatus::Approved)
        );

        assert!(engine
            .auto_approve_if_eligible("r", "s", &assessment(RiskLevel::Medium, false))
            .await
            .is_none());
        assert!(engine
            .auto_approve_if_eligible("r", "s", &assessment(RiskLevel::High, true))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_statistics() {
        let engine = engine();
        engine
            .auto_approve_if_eligible("r0", "s", &assessment(RiskLevel::Low, true))
            .await;
        let a = engine
            .request_human_approval("r1", "s", assessment(RiskLevel::High, false), Some(1))
            .await;
        let b = engine
            .request_human_approval("r2", "s", assessment(RiskLevel::High, false), None)
            .await;
        let _c = engine
            .request_human_approval("r3", "s", assessment(RiskLevel::High, false), None)
            .await;
        engine
            .process_approval_decision(&b.id, ApprovalStatus::Denied, None, "bob")
            .await
            .unwrap();
        engine
            .check_approval_timeouts_at(a.created_at + Duration::seconds(2))
            .await;

        let stats = engine.approval_statistics().await;
        assert_eq!(stats.total_decisions, 3);
        assert_eq!(stats.approved_count, 1);
        assert_eq!(stats.auto_approved_count, 1);
        assert_eq!(stats.denied_count, 1);
        assert_eq!(stats.timeout_count, 1);
        assert_eq!(stats.pending_count, 1);
        assert!((stats.approval_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((stats.auto_approval_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_statistics_empty() {
        let stats = engine().approval_statistics().await;
        assert_eq!(stats, ApprovalStatistics::default());
    }

    #[tokio::test]
    async fn test_clear_history_by_decision_time() {
        let engine = engine();
        let auto = engine
            .auto_approve_if_eligible("r1", "s", &assessment(RiskLevel::Low, true))
            .await
            .unwrap();
        let late = engine
            .request_human_approval("r2", "s", assessment(RiskLevel::High, false), Some(1))
            .await;
        // Timeout results are stamped with the sweep time.
        engine
            .check_approval_timeouts_at(late.created_at + Duration::days(10))
            .await;

        assert_eq!(engine.clear_approval_history(7).await, 0);
        let cutoff = Utc::now() + Duration::days(5);
        assert_eq!(engine.clear_approval_history_before(cutoff).await, 1);
        assert_eq!(engine.approval_history().await.len(), 1);
        assert_eq!(engine.get_approval_status(&auto.approval_id).await, None);
        assert_eq!(
            engine.get_approval_status(&late.id).await,
            Some(ApprovalStatus::Timeout)
        );
    }

    #[tokio::test]
    async fn test_clear_history_with_out_of_range_age_keeps_everything() {
        let engine = engine();
        engine
            .auto_approve_if_eligible("r1", "s", &assessment(RiskLevel::Low, true))
            .await
            .unwrap();

        assert_eq!(engine.clear_approval_history(i64::MAX).await, 0);
        assert_eq!(engine.clear_approval_history(1_000_000_000).await, 0);
        assert_eq!(engine.approval_history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_pending_filtered_by_session() {
        let engine = engine();
        engine
            .request_human_approval("r1", "s1", assessment(RiskLevel::High, false), None)
            .await;
        engine
            .request_human_approval("r2", "s2", assessment(RiskLevel::High, false), None)
            .await;
        assert_eq!(engine.pending_approvals(Some("s1")).await.len(), 1);
        assert_eq!(engine.pending_approvals(None).await.len(), 2);
    }
}
