//! # Collab Orchestrator
//!
//! Orchestration core for multi-model AI collaboration. It decides which
//! collaboration strategy and model set should handle a request, gates risky
//! interactions behind a human approval workflow, and keeps a deduplicated
//! knowledge graph used to synthesize token-budgeted context.
//!
//! ## Features
//!
//! - **Strategy Routing**: preferred strategy, task-type map, then multi-factor scoring
//! - **Learned Feedback**: rolling per-strategy performance windows bias future routing
//! - **Risk Assessment**: rule-table content scoring plus strategy and session signals
//! - **Approval Workflow**: pending → approved/denied/timeout, resolved exactly once
//! - **Knowledge Graph**: keyword extraction, Jaccard deduplication, co-occurrence BFS
//! - **Context Synthesis**: template-formatted knowledge within a token budget
//!
//! ## Architecture
//!
//! ```text
//! CollaborationRequest → Orchestrator ─┬→ CollaborationRouter
//!                                      ├→ KnowledgeEngine
//!                                      ├→ CollaborationExecutor (external)
//!                                      └→ ApprovalEngine
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use collab_orchestrator::{CollaborationRequest, Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let orchestrator = Orchestrator::new(config);
//!     let request = CollaborationRequest::new("session-1", "analyze this function for bugs");
//!     let outcome = orchestrator.collaborate(request, &my_executor).await?;
//!     println!("{}", outcome.response.content);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Human approval workflow and risk assessment.
pub mod approval;
/// Configuration management.
pub mod config;
/// Request, session, knowledge and approval value types.
pub mod entities;
/// Error types and result aliases for the application.
pub mod error;
/// Knowledge graph, search and context synthesis.
pub mod knowledge;
/// Composition root driving the collaboration flow.
pub mod orchestrator;
/// Strategy and model selection.
pub mod router;

pub use approval::ApprovalEngine;
pub use config::Config;
pub use entities::{
    CollaborationRequest, CollaborationResponse, CollaborationStrategy, SessionState,
};
pub use error::{AppError, AppResult};
pub use knowledge::KnowledgeEngine;
pub use orchestrator::{CollaborationExecutor, CollaborationOutcome, ExecutionPlan, Orchestrator};
pub use router::CollaborationRouter;
