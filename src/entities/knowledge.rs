use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of knowledge held by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeType {
    /// A domain concept mentioned in requests.
    Concept,
    /// A working technique or practice.
    Technique,
    /// A behavioural pattern observed across collaborations.
    Pattern,
    /// A user preference.
    Preference,
}

impl KnowledgeType {
    /// Get the type name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeType::Concept => "concept",
            KnowledgeType::Technique => "technique",
            KnowledgeType::Pattern => "pattern",
            KnowledgeType::Preference => "preference",
        }
    }
}

impl std::fmt::Display for KnowledgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for KnowledgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "concept" => Ok(KnowledgeType::Concept),
            "technique" => Ok(KnowledgeType::Technique),
            "pattern" => Ok(KnowledgeType::Pattern),
            "preference" => Ok(KnowledgeType::Preference),
            _ => Err(format!("Unknown knowledge type: {}", s)),
        }
    }
}

/// A deduplicated unit of knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeNode {
    /// Unique node identifier.
    pub id: String,
    /// Kind of knowledge.
    pub node_type: KnowledgeType,
    /// Short name used for deduplication.
    pub name: String,
    /// Accumulated content.
    pub content: String,
    /// Confidence score (0.0-1.0).
    pub confidence_score: f64,
    /// Sessions that contributed, in first-seen order.
    pub source_sessions: Vec<String>,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
    /// When the node was last merged into.
    pub updated_at: DateTime<Utc>,
    /// Request/response/strategy metadata.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl KnowledgeNode {
    /// Create a node attributed to one session.
    pub fn new(
        node_type: KnowledgeType,
        name: impl Into<String>,
        content: impl Into<String>,
        confidence_score: f64,
        session_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            node_type,
            name: name.into(),
            content: content.into(),
            confidence_score: confidence_score.clamp(0.0, 1.0),
            source_sessions: vec![session_id.into()],
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Fold a later observation of the same knowledge into this node.
    ///
    /// Content is appended, confidence becomes the mean of old and new, and
    /// the session is recorded once.
    pub fn merge(&mut self, content: &str, confidence: f64, session_id: &str) {
        if !content.is_empty() && !self.content.contains(content) {
            if !self.content.is_empty() {
                self.content.push('\n');
            }
            self.content.push_str(content);
        }
        self.confidence_score =
            ((self.confidence_score + confidence.clamp(0.0, 1.0)) / 2.0).clamp(0.0, 1.0);
        self.add_session(session_id);
        self.updated_at = Utc::now().max(self.updated_at);
    }

    /// Record a contributing session (no duplicates).
    pub fn add_session(&mut self, session_id: &str) {
        if !self.source_sessions.iter().any(|s| s == session_id) {
            self.source_sessions.push(session_id.to_string());
        }
    }

    /// Whether a session contributed to this node.
    pub fn has_session(&self, session_id: &str) -> bool {
        self.source_sessions.iter().any(|s| s == session_id)
    }
}

/// A directed, weighted relation between two knowledge nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEdge {
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Relation label (e.g. "co_occurs", "observed_with").
    pub relation: String,
    /// Edge weight.
    pub weight: f64,
    /// Session that produced the edge.
    pub session_id: String,
    /// When the edge was created.
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEdge {
    /// Create a new edge stamped now.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation: impl Into<String>,
        weight: f64,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation: relation.into(),
            weight,
            session_id: session_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Knowledge graph scoped to one session.
///
/// Nodes themselves live in the engine's arena so a node merged from several
/// sessions exists once; the graph holds their ids in first-seen order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    /// Owning session.
    pub session_id: String,
    /// Ids of nodes touched by this session.
    pub node_ids: Vec<String>,
    /// Session-local edges.
    pub edges: Vec<KnowledgeEdge>,
    /// When the graph was created.
    pub created_at: DateTime<Utc>,
    /// When the graph was last updated.
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeGraph {
    /// Create an empty graph for a session.
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            node_ids: Vec::new(),
            edges: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Register a node id, ignoring duplicates.
    pub fn add_node_id(&mut self, node_id: &str) {
        if !self.node_ids.iter().any(|id| id == node_id) {
            self.node_ids.push(node_id.to_string());
        }
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }
}

/// Snapshot of knowledge handed to an external persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeExport {
    /// Exported nodes (live and archived).
    pub nodes: Vec<KnowledgeNode>,
    /// Exported edges.
    pub edges: Vec<KnowledgeEdge>,
    /// Export metadata.
    pub metadata: KnowledgeExportMetadata,
}

/// Metadata describing a knowledge export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeExportMetadata {
    /// Session the export is scoped to; `None` for a full export.
    pub session_id: Option<String>,
    /// When the export was taken.
    pub exported_at: DateTime<Utc>,
    /// Number of nodes exported.
    pub node_count: usize,
    /// Number of edges exported.
    pub edge_count: usize,
    /// Number of exported nodes that are archived.
    pub archived_count: usize,
}
