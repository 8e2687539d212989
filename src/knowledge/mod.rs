//! Knowledge engine - a deduplicated knowledge graph built from collaborations.
//!
//! Nodes live in a single arena shared by every session so that a concept
//! seen in several sessions exists exactly once. Each session keeps a
//! [`KnowledgeGraph`] of the node ids it touched plus its own edges, and a
//! global directed graph records which concepts co-occur.

mod extraction;
mod graph;
mod synthesis;

pub use extraction::{
    builtin_extraction_rules, name_similarity, ConceptExtractor, ExtractedConcept,
    ExtractionRule,
};
pub use graph::CO_OCCURS;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::KnowledgeConfig;
use crate::entities::{
    days_ago, CollaborationRequest, CollaborationResponse, KnowledgeEdge, KnowledgeExport,
    KnowledgeExportMetadata, KnowledgeGraph, KnowledgeNode, KnowledgeType, SessionState,
};
use graph::CooccurrenceGraph;

/// Relation label of session edges from a strategy pattern to its concepts.
pub const OBSERVED_WITH: &str = "observed_with";

// ============================================================================
// Result Types
// ============================================================================

/// What one `process_collaboration` call changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeUpdate {
    /// Nodes created.
    pub created: Vec<String>,
    /// Existing nodes merged into.
    pub merged: Vec<String>,
    /// Global co-occurrence edges added.
    pub cooccurrence_edges: usize,
    /// Session edges added.
    pub session_edges: usize,
}

impl KnowledgeUpdate {
    /// Every node touched, created first.
    pub fn touched(&self) -> impl Iterator<Item = &String> {
        self.created.iter().chain(self.merged.iter())
    }
}

/// Knowledge graph statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeStatistics {
    /// Nodes in the live index.
    pub live_nodes: usize,
    /// Archived nodes.
    pub archived_nodes: usize,
    /// Live nodes per type.
    pub nodes_by_type: BTreeMap<String, usize>,
    /// Sessions with a graph.
    pub session_graphs: usize,
    /// Edges across all session graphs.
    pub session_edges: usize,
    /// Edges in the global co-occurrence graph.
    pub cooccurrence_edges: usize,
    /// Mean confidence of live nodes (0.0 when empty).
    pub average_confidence: f64,
}

// ============================================================================
// Engine State
// ============================================================================

#[derive(Debug, Default)]
struct KnowledgeState {
    /// Live nodes in insertion order.
    nodes: Vec<KnowledgeNode>,
    /// Node id → position in `nodes`.
    index: HashMap<String, usize>,
    archived: Vec<KnowledgeNode>,
    sessions: HashMap<String, KnowledgeGraph>,
    cooccurrence: CooccurrenceGraph,
}

impl KnowledgeState {
    fn get(&self, id: &str) -> Option<&KnowledgeNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
    }

    /// Merge into the first similar same-type node, or create one.
    ///
    /// Returns the node id and whether it was created.
    #[allow(clippy::too_many_arguments)]
    fn upsert(
        &mut self,
        threshold: f64,
        node_type: KnowledgeType,
        name: &str,
        content: &str,
        confidence: f64,
        session_id: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> (String, bool) {
        let existing = self
            .nodes
            .iter()
            .position(|n| n.node_type == node_type && name_similarity(&n.name, name) > threshold);

        let (id, created) = match existing {
            Some(pos) => {
                let node = &mut self.nodes[pos];
                node.merge(content, confidence, session_id);
                node.metadata.extend(metadata);
                (node.id.clone(), false)
            }
            None => {
                let mut node = KnowledgeNode::new(node_type, name, content, confidence, session_id);
                node.metadata.extend(metadata);
                let id = node.id.clone();
                self.index.insert(id.clone(), self.nodes.len());
                self.nodes.push(node);
                (id, true)
            }
        };

        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| KnowledgeGraph::new(session_id))
            .add_node_id(&id);
        (id, created)
    }
}

// ============================================================================
// Knowledge Engine
// ============================================================================

/// Extracts, deduplicates, searches and synthesizes knowledge.
#[derive(Clone)]
pub struct KnowledgeEngine {
    config: KnowledgeConfig,
    extractor: ConceptExtractor,
    state: Arc<RwLock<KnowledgeState>>,
}

impl KnowledgeEngine {
    /// Create an engine with the built-in extraction table.
    pub fn new(config: KnowledgeConfig) -> Self {
        Self::with_extractor(config, ConceptExtractor::new())
    }

    /// Create an engine with a custom extractor.
    pub fn with_extractor(config: KnowledgeConfig, extractor: ConceptExtractor) -> Self {
        Self {
            config,
            extractor,
            state: Arc::new(RwLock::new(KnowledgeState::default())),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &KnowledgeConfig {
        &self.config
    }

    /// Fold one finished collaboration into the graph.
    pub async fn process_collaboration(
        &self,
        request: &CollaborationRequest,
        response: &CollaborationResponse,
        session: &SessionState,
    ) -> KnowledgeUpdate {
        let concepts = self.extractor.extract(request, response);
        let threshold = self.config.similarity_threshold;
        let session_id = session.id.as_str();
        let strategy = response.strategy_used;
        let task_type = request.task_type.as_deref().unwrap_or("general");

        let mut update = KnowledgeUpdate::default();
        let record = |update: &mut KnowledgeUpdate, (id, created): (String, bool)| {
            if created {
                update.created.push(id.clone());
            } else if !update.merged.contains(&id) {
                update.merged.push(id.clone());
            }
            id
        };

        let mut state = self.state.write().await;

        // Concepts
        let mut concept_ids: Vec<String> = Vec::with_capacity(concepts.len());
        for concept in &concepts {
            let metadata = json_map(json!({
                "source": "extraction",
                "request_excerpt": extraction::truncate_chars(&request.content, 120),
                "strategy": strategy.as_str(),
                "models": response.models_used,
            }));
            let result = state.upsert(
                threshold,
                concept.node_type,
                &concept.name,
                &concept.content,
                concept.confidence,
                session_id,
                metadata,
            );
            let id = record(&mut update, result);
            if !concept_ids.contains(&id) {
                concept_ids.push(id);
            }
        }

        // Strategy effectiveness
        let models = if response.models_used.is_empty() {
            "no models".to_string()
        } else {
            response.models_used.join(", ")
        };
        let metadata = json_map(json!({
            "source": "strategy_effectiveness",
            "strategy": strategy.as_str(),
            "models": response.models_used,
            "confidence": response.confidence_score,
            "cost": response.cost_estimate,
            "processing_time": response.processing_time,
            "task_type": task_type,
            "content_chars": request.content.chars().count(),
            "has_context": request.context.is_some(),
        }));
        let result = state.upsert(
            threshold,
            KnowledgeType::Pattern,
            &format!("strategy effectiveness {}", strategy.as_str()),
            &format!("{} handled a {} request using {}", strategy, task_type, models),
            response.confidence_score,
            session_id,
            metadata,
        );
        let pattern_id = record(&mut update, result);

        // User preference
        let preference = request
            .preferred_strategy
            .map(|s| (s, 0.9, "request"))
            .or_else(|| {
                session
                    .user_preferences
                    .preferred_strategy
                    .map(|s| (s, 0.7, "session"))
            });
        if let Some((preferred, confidence, origin)) = preference {
            let metadata = json_map(json!({
                "source": "user_preference",
                "preferred_strategy": preferred.as_str(),
                "origin": origin,
            }));
            let result = state.upsert(
                threshold,
                KnowledgeType::Preference,
                &format!("user preference {}", preferred.as_str()),
                &format!("User prefers the {} strategy", preferred),
                confidence,
                session_id,
                metadata,
            );
            record(&mut update, result);
        }

        // Approval pattern
        if response.approval_required {
            let status = response
                .approval_status
                .map(|s| s.as_str())
                .unwrap_or("pending");
            let metadata = json_map(json!({
                "source": "approval_pattern",
                "strategy": strategy.as_str(),
                "approval_status": status,
                "require_approval": request.require_approval,
            }));
            let result = state.upsert(
                threshold,
                KnowledgeType::Pattern,
                &format!("approval pattern {}", strategy.as_str()),
                &format!("{} responses on {} requests needed human approval", strategy, task_type),
                0.8,
                session_id,
                metadata,
            );
            record(&mut update, result);
        }

        update.cooccurrence_edges = state.cooccurrence.link_all(&concept_ids, session_id);

        let graph = state
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| KnowledgeGraph::new(session_id));
        for concept_id in &concept_ids {
            graph.edges.push(KnowledgeEdge::new(
                &pattern_id,
                concept_id,
                OBSERVED_WITH,
                response.confidence_score,
                session_id,
            ));
        }
        update.session_edges = concept_ids.len();
        graph.touch();

        info!(
            session_id = %session_id,
            strategy = %strategy,
            concepts = concepts.len(),
            created = update.created.len(),
            merged = update.merged.len(),
            cooccurrence_edges = update.cooccurrence_edges,
            "Knowledge updated"
        );
        update
    }

    /// Case-insensitive substring search over live node names and content.
    ///
    /// Results are ordered by confidence, then recency, and truncated to `limit`.
    pub async fn search_knowledge(
        &self,
        query: &str,
        types: Option<&[KnowledgeType]>,
        session_filter: Option<&str>,
        limit: usize,
    ) -> Vec<KnowledgeNode> {
        let needle = query.to_lowercase();
        let state = self.state.read().await;

        let mut hits: Vec<&KnowledgeNode> = state
            .nodes
            .iter()
            .filter(|n| types.map_or(true, |t| t.contains(&n.node_type)))
            .filter(|n| session_filter.map_or(true, |s| n.has_session(s)))
            .filter(|n| {
                n.name.to_lowercase().contains(&needle) || n.content.to_lowercase().contains(&needle)
            })
            .collect();
        sort_by_confidence(&mut hits);
        hits.truncate(limit);

        debug!(query = %query, results = hits.len(), "Knowledge searched");
        hits.into_iter().cloned().collect()
    }

    /// Nodes reachable from `node_id` in the co-occurrence graph within `max_depth` hops.
    ///
    /// Ids that no longer resolve to a live node are skipped.
    pub async fn get_related_concepts(&self, node_id: &str, max_depth: usize) -> Vec<KnowledgeNode> {
        let state = self.state.read().await;
        state
            .cooccurrence
            .bfs(node_id, max_depth)
            .iter()
            .filter_map(|id| state.get(id).cloned())
            .collect()
    }

    /// Assemble formatted knowledge relevant to a request within a token budget.
    ///
    /// Returns an empty string when nothing qualifies.
    pub async fn synthesize_context_for_request(
        &self,
        request: &CollaborationRequest,
        max_tokens: usize,
    ) -> String {
        let terms = synthesis::query_terms(&request.searchable_text());
        let state = self.state.read().await;

        let mut scored: Vec<(usize, &KnowledgeNode)> = state
            .nodes
            .iter()
            .map(|n| (synthesis::relevance(n, &terms), n))
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| {
            sb.cmp(sa)
                .then_with(|| b.confidence_score.total_cmp(&a.confidence_score))
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });

        let concepts: Vec<&KnowledgeNode> = scored
            .iter()
            .filter(|(score, _)| *score > 0)
            .take(self.config.max_context_nodes)
            .map(|(_, n)| *n)
            .filter(|n| n.node_type != KnowledgeType::Pattern)
            .collect();
        let patterns: Vec<&KnowledgeNode> = scored
            .iter()
            .map(|(_, n)| *n)
            .filter(|n| n.node_type == KnowledgeType::Pattern)
            .collect();

        let context = synthesis::assemble(&self.config, &concepts, &patterns, max_tokens);
        debug!(
            session_id = %request.session_id,
            terms = terms.len(),
            concept_candidates = concepts.len(),
            pattern_candidates = patterns.len(),
            chars = context.len(),
            "Context synthesized"
        );
        context
    }

    /// Snapshot of nodes and edges, for one session or everything.
    ///
    /// Archived nodes are included.
    pub async fn export_knowledge_graph(&self, session_id: Option<&str>) -> KnowledgeExport {
        let state = self.state.read().await;
        let all_nodes = state.nodes.iter().chain(state.archived.iter());

        let (nodes, edges): (Vec<KnowledgeNode>, Vec<KnowledgeEdge>) = match session_id {
            Some(sid) => {
                let graph = state.sessions.get(sid);
                let nodes = all_nodes
                    .filter(|n| graph.map_or(false, |g| g.node_ids.contains(&n.id)))
                    .cloned()
                    .collect();
                let edges = graph
                    .into_iter()
                    .flat_map(|g| g.edges.iter())
                    .chain(state.cooccurrence.edges().filter(|e| e.session_id == sid))
                    .cloned()
                    .collect();
                (nodes, edges)
            }
            None => {
                let nodes = all_nodes.cloned().collect();
                let edges = state
                    .sessions
                    .values()
                    .flat_map(|g| g.edges.iter())
                    .chain(state.cooccurrence.edges())
                    .cloned()
                    .collect();
                (nodes, edges)
            }
        };

        let archived_count = nodes
            .iter()
            .filter(|n| !state.index.contains_key(&n.id))
            .count();
        let metadata = KnowledgeExportMetadata {
            session_id: session_id.map(str::to_string),
            exported_at: Utc::now(),
            node_count: nodes.len(),
            edge_count: edges.len(),
            archived_count,
        };
        info!(
            session_id = ?session_id,
            nodes = metadata.node_count,
            edges = metadata.edge_count,
            "Knowledge exported"
        );
        KnowledgeExport {
            nodes,
            edges,
            metadata,
        }
    }

    /// Move nodes not updated for `older_than_days` out of the live index.
    pub async fn archive_stale_nodes(&self, older_than_days: i64) -> usize {
        self.archive_stale_nodes_before(days_ago(older_than_days))
            .await
    }

    /// Move nodes last updated before `cutoff` out of the live index.
    ///
    /// Archived nodes stay in exports but no longer match searches,
    /// synthesis, related-concept lookups or deduplication.
    pub async fn archive_stale_nodes_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.state.write().await;
        let (live, stale): (Vec<_>, Vec<_>) = std::mem::take(&mut state.nodes)
            .into_iter()
            .partition(|n| n.updated_at >= cutoff);
        let archived = stale.len();
        state.nodes = live;
        state.archived.extend(stale);
        state.rebuild_index();

        if archived > 0 {
            info!(archived = archived, cutoff = %cutoff, "Stale knowledge archived");
        }
        archived
    }

    /// A live node by id.
    pub async fn get_node(&self, node_id: &str) -> Option<KnowledgeNode> {
        self.state.read().await.get(node_id).cloned()
    }

    /// A session's graph.
    pub async fn session_graph(&self, session_id: &str) -> Option<KnowledgeGraph> {
        self.state.read().await.sessions.get(session_id).cloned()
    }

    /// Graph statistics.
    pub async fn knowledge_statistics(&self) -> KnowledgeStatistics {
        let state = self.state.read().await;
        let mut nodes_by_type = BTreeMap::new();
        for node in &state.nodes {
            *nodes_by_type
                .entry(node.node_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        let average_confidence = if state.nodes.is_empty() {
            0.0
        } else {
            state.nodes.iter().map(|n| n.confidence_score).sum::<f64>() / state.nodes.len() as f64
        };

        KnowledgeStatistics {
            live_nodes: state.nodes.len(),
            archived_nodes: state.archived.len(),
            nodes_by_type,
            session_graphs: state.sessions.len(),
            session_edges: state.sessions.values().map(|g| g.edges.len()).sum(),
            cooccurrence_edges: state.cooccurrence.edge_count(),
            average_confidence,
        }
    }
}

fn json_map(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

fn sort_by_confidence(nodes: &mut [&KnowledgeNode]) {
    nodes.sort_by(|a, b| {
        b.confidence_score
            .total_cmp(&a.confidence_score)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    });
}
