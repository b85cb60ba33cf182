//! Knowledge graph — typed entities (email, url) edged to the documents
//! that mention them.
//!
//! The store is a node → document-id mapping. A node exists only while it
//! has at least one edge; deleting a document prunes any nodes left with
//! zero edges.

pub mod extract;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Email,
    Url,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Email => "email",
            EntityType::Url => "url",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(EntityType::Email),
            "url" => Some(EntityType::Url),
            _ => None,
        }
    }
}

/// Serialized form of one node and its edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub entity_type: EntityType,
    pub value: String,
    pub docs: BTreeSet<String>,
}

/// Aggregate counts plus a small sample, for `/kg/snapshot`.
#[derive(Debug, Serialize)]
pub struct GraphSnapshot {
    pub nodes: usize,
    pub edges: usize,
    pub entities: Vec<NodeRecord>,
    pub sample_emails: Vec<String>,
    pub sample_urls: Vec<String>,
}

const SAMPLE_LIMIT: usize = 10;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(into = "Vec<NodeRecord>", from = "Vec<NodeRecord>")]
pub struct GraphStore {
    // BTreeMap keeps snapshots and samples in a stable order.
    edges: BTreeMap<(EntityType, String), BTreeSet<String>>,
}

impl From<GraphStore> for Vec<NodeRecord> {
    fn from(store: GraphStore) -> Self {
        store
            .edges
            .into_iter()
            .map(|((entity_type, value), docs)| NodeRecord { entity_type, value, docs })
            .collect()
    }
}

impl From<Vec<NodeRecord>> for GraphStore {
    fn from(records: Vec<NodeRecord>) -> Self {
        let mut store = GraphStore::default();
        for r in records {
            if !r.docs.is_empty() {
                store.edges.insert((r.entity_type, r.value), r.docs);
            }
        }
        store
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge from a node to a document. Re-adding is a no-op.
    pub fn add_edge(&mut self, entity_type: EntityType, value: &str, doc_id: &str) {
        self.edges
            .entry((entity_type, value.to_string()))
            .or_default()
            .insert(doc_id.to_string());
    }

    /// Extract entities from a document's full text and edge them to its id.
    /// Runs per document, not per chunk, so one document never produces
    /// duplicate edges for a repeated entity.
    pub fn index_document(&mut self, doc_id: &str, text: &str) -> usize {
        let entities = extract::extract_entities(text);
        let count = entities.len();
        for (ty, value) in entities {
            self.add_edge(ty, &value, doc_id);
        }
        count
    }

    /// Remove all edges to `doc_id`, pruning nodes left with zero edges.
    pub fn remove_doc(&mut self, doc_id: &str) {
        self.edges.retain(|_, docs| {
            docs.remove(doc_id);
            !docs.is_empty()
        });
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }

    pub fn node_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Document ids edged to the exact node. Unknown node → empty vec.
    pub fn query(&self, entity_type: EntityType, value: &str) -> Vec<String> {
        self.edges
            .get(&(entity_type, value.to_string()))
            .map(|docs| docs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let sample = |ty: EntityType| -> Vec<String> {
            self.edges
                .keys()
                .filter(|(t, _)| *t == ty)
                .take(SAMPLE_LIMIT)
                .map(|(_, v)| v.clone())
                .collect()
        };
        GraphSnapshot {
            nodes: self.node_count(),
            edges: self.edge_count(),
            entities: self
                .edges
                .iter()
                .map(|((entity_type, value), docs)| NodeRecord {
                    entity_type: *entity_type,
                    value: value.clone(),
                    docs: docs.clone(),
                })
                .collect(),
            sample_emails: sample(EntityType::Email),
            sample_urls: sample(EntityType::Url),
        }
    }
}
