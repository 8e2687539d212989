use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApprovalError, WorkflowResult};

/// State of an approval request.
///
/// `Pending` is the only non-terminal state; every other state has no
/// outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a human decision.
    Pending,
    /// Approved by a human or by the system.
    Approved,
    /// Denied by a human.
    Denied,
    /// Deadline passed without a decision.
    Timeout,
}

impl ApprovalStatus {
    /// Get the status name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Denied => "denied",
            ApprovalStatus::Timeout => "timeout",
        }
    }

    /// Whether the state has no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }

    /// Guarded transition. Only `Pending` may move, and only to a terminal state.
    pub fn transition(self, to: ApprovalStatus) -> WorkflowResult<ApprovalStatus> {
        match (self, to) {
            (ApprovalStatus::Pending, ApprovalStatus::Pending) => {
                Err(ApprovalError::InvalidTransition { from: self, to })
            }
            (ApprovalStatus::Pending, terminal) => Ok(terminal),
            (from, to) => Err(ApprovalError::InvalidTransition { from, to }),
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "denied" => Ok(ApprovalStatus::Denied),
            "timeout" => Ok(ApprovalStatus::Timeout),
            _ => Err(format!("Unknown approval status: {}", s)),
        }
    }
}

/// Discrete risk band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// score < 0.3
    Low,
    /// 0.3 <= score < 0.6
    Medium,
    /// 0.6 <= score < 0.8
    High,
    /// score >= 0.8
    Critical,
}

impl RiskLevel {
    /// Map a score to its band. Thresholds are monotonic in the score.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            RiskLevel::Critical
        } else if score >= 0.6 {
            RiskLevel::High
        } else if score >= 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Get the level name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One scored signal contributing to overall risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    /// Factor name (e.g. "code_execution", "strategy:multi_model_board").
    pub name: String,
    /// Contribution to the total score.
    pub score: f64,
    /// Human-readable explanation.
    pub description: String,
}

impl RiskFactor {
    /// Create a new factor.
    pub fn new(name: impl Into<String>, score: f64, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            score,
            description: description.into(),
        }
    }
}

/// Outcome of assessing one interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Clamped total score (0.0-1.0).
    pub risk_score: f64,
    /// Band for the score.
    pub risk_level: RiskLevel,
    /// Every factor that contributed.
    pub risk_factors: Vec<RiskFactor>,
    /// A human must decide before the response is released.
    pub requires_approval: bool,
    /// The system may approve without a human.
    pub auto_approval_eligible: bool,
    /// Content categories that rule out auto-approval.
    pub disqualifying_categories: Vec<String>,
    /// Reviewer guidance.
    pub recommendation: String,
}

/// An approval request handed to the external review UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanApprovalRequest {
    /// Unique approval identifier.
    pub id: String,
    /// Response awaiting approval.
    pub response_id: String,
    /// Owning session.
    pub session_id: String,
    /// Assessment that triggered the request.
    pub risk_assessment: RiskAssessment,
    /// Reviewer guidance.
    pub recommendation: String,
    /// Seconds before the request times out.
    pub timeout_seconds: u64,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
}

impl HumanApprovalRequest {
    /// Create a new pending approval request.
    pub fn new(
        response_id: impl Into<String>,
        session_id: impl Into<String>,
        risk_assessment: RiskAssessment,
        timeout_seconds: u64,
    ) -> Self {
        let recommendation = risk_assessment.recommendation.clone();
        Self {
            id: Uuid::new_v4().to_string(),
            response_id: response_id.into(),
            session_id: session_id.into(),
            risk_assessment,
            recommendation,
            timeout_seconds,
            created_at: Utc::now(),
        }
    }

    /// Instant after which the request times out.
    ///
    /// `None` when the timeout lies beyond the representable range, in which
    /// case the request never expires.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.timeout_seconds).ok()?;
        Duration::try_seconds(secs).and_then(|timeout| self.created_at.checked_add_signed(timeout))
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }
}

/// Immutable record of a resolved approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResult {
    /// Approval identifier.
    pub approval_id: String,
    /// Linked response.
    pub response_id: String,
    /// Owning session.
    pub session_id: String,
    /// Terminal status.
    pub status: ApprovalStatus,
    /// Reviewer feedback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// Who decided ("system" for automatic decisions).
    pub approver: String,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
    /// Whether the system approved without a human.
    #[serde(default)]
    pub auto_approved: bool,
    /// Risk level at assessment time.
    pub risk_level: RiskLevel,
}
