//! Interaction risk scoring.
//!
//! Content categories are matched through a data-driven rule table so the
//! keyword predicates can later be swapped for a real classifier without
//! touching the scoring code.

use serde::Serialize;

use crate::config::ApprovalConfig;
use crate::entities::{
    CollaborationRequest, CollaborationResponse, CollaborationStrategy, RiskAssessment,
    RiskFactor, RiskLevel, SessionState,
};

/// A content category with its keyword predicate and weight.
#[derive(Debug, Clone, Serialize)]
pub struct RiskRule {
    /// Category name.
    pub category: &'static str,
    /// Weight added when the category matches.
    pub weight: f64,
    /// Any of these substrings (lowercase) triggers the category.
    pub keywords: &'static [&'static str],
    /// Whether a match rules out auto-approval.
    pub disqualifies_auto_approval: bool,
}

impl RiskRule {
    /// Whether the rule matches lowercase text.
    pub fn matches(&self, text: &str) -> bool {
        self.keywords.iter().any(|k| text.contains(k))
    }
}

/// Built-in content risk rules.
pub fn builtin_risk_rules() -> Vec<RiskRule> {
    vec![
        RiskRule {
            category: "code_execution",
            weight: 0.8,
            keywords: &["execute", "run this", "run the script", "eval(", "exec(", "subprocess", "os.system"],
            disqualifies_auto_approval: true,
        },
        RiskRule {
            category: "system_commands",
            weight: 0.9,
            keywords: &["sudo", "rm -rf", "chmod", "chown", "systemctl", "kill -9", "shell command", "bash -c"],
            disqualifies_auto_approval: true,
        },
        RiskRule {
            category: "file_operations",
            weight: 0.7,
            keywords: &["delete file", "remove file", "write to file", "overwrite", "rename file", "move file"],
            disqualifies_auto_approval: false,
        },
        RiskRule {
            category: "network_requests",
            weight: 0.6,
            keywords: &["http://", "https://", "curl ", "wget ", "download", "upload", "api request"],
            disqualifies_auto_approval: false,
        },
        RiskRule {
            category: "data_modification",
            weight: 0.7,
            keywords: &["drop table", "delete from", "insert into", "truncate table", "alter table", "update records", "modify the database"],
            disqualifies_auto_approval: true,
        },
        RiskRule {
            category: "sensitive_data",
            weight: 0.8,
            keywords: &["password", "secret", "credential", "api key", "private key", "ssn", "credit card"],
            disqualifies_auto_approval: false,
        },
        RiskRule {
            category: "financial_operations",
            weight: 0.8,
            keywords: &["payment", "transfer funds", "wire transfer", "invoice", "purchase order"],
            disqualifies_auto_approval: false,
        },
    ]
}

/// Risk added by the strategy that produced the response.
///
/// Strategies that fan content out to more external providers carry more risk.
pub fn strategy_risk(strategy: CollaborationStrategy) -> f64 {
    match strategy {
        CollaborationStrategy::MultiModelBoard => 0.4,
        CollaborationStrategy::MassiveContext => 0.2,
        CollaborationStrategy::SequentialRefinement
        | CollaborationStrategy::HybridAdaptive
        | CollaborationStrategy::CostOptimizedReasoning => 0.1,
        CollaborationStrategy::FastResponse | CollaborationStrategy::LocalPrivate => 0.0,
    }
}

/// Scores interactions against the rule table and session history.
#[derive(Debug, Clone)]
pub struct RiskAssessor {
    rules: Vec<RiskRule>,
    burst_window_secs: i64,
}

impl RiskAssessor {
    /// Create an assessor with the built-in rules.
    pub fn new(config: &ApprovalConfig) -> Self {
        Self::with_rules(config, builtin_risk_rules())
    }

    /// Create an assessor with custom rules.
    pub fn with_rules(config: &ApprovalConfig, rules: Vec<RiskRule>) -> Self {
        Self {
            rules,
            burst_window_secs: config.burst_window_secs,
        }
    }

    /// The rule table in evaluation order.
    pub fn rules(&self) -> &[RiskRule] {
        &self.rules
    }

    /// Score one interaction.
    pub fn assess(
        &self,
        request: &CollaborationRequest,
        response: &CollaborationResponse,
        session: &SessionState,
    ) -> RiskAssessment {
        let text = format!("{} {}", request.searchable_text(), response.content.to_lowercase());
        let mut factors = Vec::new();
        let mut disqualifying = Vec::new();

        // Every rule is evaluated; matches never short-circuit.
        for rule in &self.rules {
            if rule.matches(&text) {
                factors.push(RiskFactor::new(
                    rule.category,
                    rule.weight,
                    format!("Content involves {}", rule.category.replace('_', " ")),
                ));
                if rule.disqualifies_auto_approval {
                    disqualifying.push(rule.category.to_string());
                }
            }
        }

        let strategy_score = strategy_risk(response.strategy_used);
        if strategy_score > 0.0 {
            factors.push(RiskFactor::new(
                format!("strategy:{}", response.strategy_used),
                strategy_score,
                format!("Strategy {} shares content with external models", response.strategy_used),
            ));
        }

        factors.extend(self.session_factors(session));

        if response.confidence_score < 0.5 {
            factors.push(RiskFactor::new(
                "low_confidence",
                0.1,
                format!("Response confidence {:.2} is below 0.5", response.confidence_score),
            ));
        }

        let raw: f64 = factors.iter().map(|f| f.score).sum();
        let risk_score = raw.clamp(0.0, 1.0);
        let risk_level = RiskLevel::from_score(risk_score);
        let requires_approval =
            request.require_approval || matches!(risk_level, RiskLevel::High | RiskLevel::Critical);
        let auto_approval_eligible =
            matches!(risk_level, RiskLevel::Low | RiskLevel::Medium) && disqualifying.is_empty();
        let recommendation = recommendation_for(risk_level, &factors);

        RiskAssessment {
            risk_score,
            risk_level,
            risk_factors: factors,
            requires_approval,
            auto_approval_eligible,
            disqualifying_categories: disqualifying,
            recommendation,
        }
    }

    fn session_factors(&self, session: &SessionState) -> Vec<RiskFactor> {
        let mut factors = Vec::new();

        let count = session.messages.len();
        if count > 50 {
            factors.push(RiskFactor::new(
                "session_length",
                0.2,
                format!("Session has {} messages", count),
            ));
        } else if count > 20 {
            factors.push(RiskFactor::new(
                "session_length",
                0.1,
                format!("Session has {} messages", count),
            ));
        }

        if session.total_cost > 5.0 {
            factors.push(RiskFactor::new(
                "session_cost",
                0.2,
                format!("Session cost ${:.2}", session.total_cost),
            ));
        } else if session.total_cost > 1.0 {
            factors.push(RiskFactor::new(
                "session_cost",
                0.1,
                format!("Session cost ${:.2}", session.total_cost),
            ));
        }

        if self.is_burst(session) {
            factors.push(RiskFactor::new(
                "burst_exchange",
                0.1,
                format!("Last 5 messages within {}s", self.burst_window_secs),
            ));
        }

        factors
    }

    fn is_burst(&self, session: &SessionState) -> bool {
        if session.messages.len() < 5 {
            return false;
        }
        let recent = &session.messages[session.messages.len() - 5..];
        let earliest = recent.iter().map(|m| m.timestamp).min();
        let latest = recent.iter().map(|m| m.timestamp).max();
        match (earliest, latest) {
            (Some(first), Some(last)) => (last - first).num_seconds() < self.burst_window_secs,
            _ => false,
        }
    }
}

fn recommendation_for(level: RiskLevel, factors: &[RiskFactor]) -> String {
    let base = match level {
        RiskLevel::Low => "Low risk - safe to proceed automatically",
        RiskLevel::Medium => "Medium risk - review recommended if time permits",
        RiskLevel::High => "High risk - human review required before release",
        RiskLevel::Critical => "Critical risk - thorough human review required, consider denying",
    };
    if factors.is_empty() {
        format!("{}.", base)
    } else {
        let names: Vec<&str> = factors.iter().map(|f| f.name.as_str()).collect();
        format!("{}. Key factors: {}.", base, names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Message;
    use chrono::{Duration, Utc};

    fn assessor() -> RiskAssessor {
        RiskAssessor::new(&ApprovalConfig::default())
    }

    fn response(strategy: CollaborationStrategy) -> CollaborationResponse {
        CollaborationResponse::new("Here is the answer", 0.9, strategy, vec![])
    }

    fn busy_session() -> SessionState {
        let mut session = SessionState::new("sess-busy");
        let start = Utc::now() - Duration::hours(2);
        for i in 0..20 {
            session.push_message(Message::user(format!("msg {i}")).at(start + Duration::minutes(i)));
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

    #[test]
    fn test_busy_session_with_board_is_high_risk() {
        let request = CollaborationRequest::new("sess-busy", "summarize our discussion");
        let assessment = assessor().assess(
            &request,
            &response(CollaborationStrategy::MultiModelBoard),
            &busy_session(),
        );

        assert!(assessment.risk_score >= 0.6);
        assert_eq!(assessment.risk_level, RiskLevel::High);
        assert!(assessment.requires_approval);
        assert!(!assessment.auto_approval_eligible);
        let names: Vec<_> = assessment.risk_factors.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"burst_exchange"));
        assert!(names.contains(&"session_cost"));
        assert!(names.contains(&"session_length"));
    }

    #[test]
    fn test_quiet_request_is_low_and_auto_eligible() {
        let request = CollaborationRequest::new("s", "What is a closure?");
        let assessment = assessor().assess(
            &request,
            &response(CollaborationStrategy::FastResponse),
            &SessionState::new("s"),
        );
        assert_eq!(assessment.risk_score, 0.0);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert!(!assessment.requires_approval);
        assert!(assessment.auto_approval_eligible);
        assert!(assessment.recommendation.starts_with("Low risk"));
    }

    #[test]
    fn test_user_request_forces_approval() {
        let request = CollaborationRequest::new("s", "What is a closure?").with_require_approval(true);
        let assessment = assessor().assess(
            &request,
            &response(CollaborationStrategy::LocalPrivate),
            &SessionState::new("s"),
        );
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert!(assessment.requires_approval);
    }

    #[test]
    fn test_all_categories_evaluated_and_clamped() {
        let request = CollaborationRequest::new(
            "s",
            "sudo rm -rf then execute the script, drop table users and download the password",
        );
        let assessment = assessor().assess(
            &request,
            &response(CollaborationStrategy::MultiModelBoard),
            &SessionState::new("s"),
        );
        assert_eq!(assessment.risk_score, 1.0);
        assert_eq!(assessment.risk_level, RiskLevel::Critical);
        for category in [
            "code_execution",
            "system_commands",
            "data_modification",
            "network_requests",
            "sensitive_data",
        ] {
            assert!(assessment.risk_factors.iter().any(|f| f.name == category), "{category}");
        }
        assert_eq!(assessment.disqualifying_categories.len(), 3);
    }

    #[test]
    fn test_medium_risk_with_disqualifying_category_not_auto_eligible() {
        let rules = vec![RiskRule {
            category: "code_execution",
            weight: 0.4,
            keywords: &["execute"],
            disqualifies_auto_approval: true,
        }];
        let assessor = RiskAssessor::with_rules(&ApprovalConfig::default(), rules);
        let request = CollaborationRequest::new("s", "execute the migration");
        let assessment = assessor.assess(
            &request,
            &response(CollaborationStrategy::LocalPrivate),
            &SessionState::new("s"),
        );
        assert_eq!(assessment.risk_level, RiskLevel::Medium);
        assert!(!assessment.requires_approval);
        assert!(!assessment.auto_approval_eligible);
    }

    #[test]
    fn test_low_confidence_adds_risk() {
        let request = CollaborationRequest::new("s", "hello");
        let resp =
            CollaborationResponse::new("unsure", 0.2, CollaborationStrategy::LocalPrivate, vec![]);
        let assessment = assessor().assess(&request, &resp, &SessionState::new("s"));
        assert!((assessment.risk_score - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_spread_out_messages_are_not_a_burst() {
        let mut session = SessionState::new("s");
        let start = Utc::now() - Duration::hours(1);
        for i in 0..5 {
            session.push_message(Message::user("x").at(start + Duration::minutes(i * 10)));
        }
        assert!(!assessor().is_burst(&session));
    }
}
