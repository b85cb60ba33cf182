//! Brute-force cosine vector index.
//!
//! Rows are chunk-level vectors carrying a document id back-reference; a flat
//! dense matrix is kept alongside the rows for the scan loop. Search scores
//! every row, then collapses rows to one hit per document (best chunk wins).
//! Ties break by insertion order, so results are deterministic.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// One indexed chunk vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub doc_id: String,
    /// Chunk position inside the document (stable across save/load).
    pub ord: usize,
    pub vector: Vec<f32>,
}

/// A search hit, already collapsed to document granularity.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub doc_id: String,
    pub score: f32,
    /// Ordinal of the best-scoring chunk for this document.
    pub chunk_ord: usize,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    rows: Vec<Row>,
    /// Row-major dense copy of all vectors, `rows.len() * dimension` long.
    /// Appended on insert, rebuilt after removals.
    #[serde(skip)]
    matrix: Vec<f32>,
    dimension: Option<usize>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Distinct document ids in first-insertion order.
    pub fn doc_ids(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for row in &self.rows {
            if seen.insert(row.doc_id.as_str()) {
                out.push(row.doc_id.clone());
            }
        }
        out
    }

    pub fn doc_count(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.doc_id.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len()
    }

    /// Append chunk vectors for one document. All vectors must match the
    /// index dimension (fixed by the first insert if not set).
    pub fn add_rows(&mut self, doc_id: &str, vectors: Vec<Vec<f32>>) -> Result<(), AppError> {
        for v in &vectors {
            match self.dimension {
                None => self.dimension = Some(v.len()),
                Some(d) if d != v.len() => {
                    return Err(AppError::Validation(format!(
                        "vector dimension {} does not match index dimension {d}",
                        v.len()
                    )));
                }
                Some(_) => {}
            }
        }
        let base = self.rows.iter().filter(|r| r.doc_id == doc_id).count();
        for (i, vector) in vectors.into_iter().enumerate() {
            self.matrix.extend_from_slice(&vector);
            self.rows.push(Row { doc_id: doc_id.to_string(), ord: base + i, vector });
        }
        Ok(())
    }

    /// Drop every row for `doc_id`. Returns how many rows were removed.
    pub fn remove_doc(&mut self, doc_id: &str) -> usize {
        let before = self.rows.len();
        self.rows.retain(|r| r.doc_id != doc_id);
        let removed = before - self.rows.len();
        if removed > 0 {
            self.rebuild_matrix();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.matrix.clear();
        self.dimension = None;
    }

    /// Rebuild the dense matrix from rows. Called after removals and after
    /// deserialization (the matrix is not persisted).
    pub fn rebuild_matrix(&mut self) {
        self.matrix.clear();
        for row in &self.rows {
            self.matrix.extend_from_slice(&row.vector);
        }
    }

    /// Consistency check surfaced by the readiness probe: the dense matrix
    /// must agree with the rows it mirrors.
    pub fn matrix_ok(&self) -> bool {
        let Some(dim) = self.dimension else {
            return self.rows.is_empty() && self.matrix.is_empty();
        };
        if self.matrix.len() != self.rows.len() * dim {
            return false;
        }
        self.rows
            .iter()
            .zip(self.matrix.chunks(dim))
            .all(|(row, slice)| row.vector == slice)
    }

    /// Score every row against `query`, collapse to per-document best hits,
    /// return the top `k` by score (descending; ties by insertion order).
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>, AppError> {
        let Some(dim) = self.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != dim {
            return Err(AppError::Validation(format!(
                "query dimension {} does not match index dimension {dim}",
                query.len()
            )));
        }

        // best score per doc, keyed by first-seen row index for stable ties
        let mut best: Vec<Hit> = Vec::new();
        let mut by_doc: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for (i, slice) in self.matrix.chunks(dim).enumerate() {
            let row = &self.rows[i];
            let score = cosine_similarity(query, slice);
            match by_doc.get(row.doc_id.as_str()) {
                Some(&pos) => {
                    if score > best[pos].score {
                        best[pos].score = score;
                        best[pos].chunk_ord = row.ord;
                    }
                }
                None => {
                    by_doc.insert(row.doc_id.as_str(), best.len());
                    best.push(Hit { doc_id: row.doc_id.clone(), score, chunk_ord: row.ord });
                }
            }
        }

        // stable sort keeps insertion order for equal scores
        best.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        best.truncate(k);
        Ok(best)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }
}

/// Cosine similarity; zero vectors score 0.0 against everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dir: usize, dim: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[dir] = 1.0;
        v
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn dimension_fixed_by_first_insert() {
        let mut idx = VectorIndex::new();
        idx.add_rows("a", vec![unit(0, 4)]).expect("first");
        assert_eq!(idx.dimension(), Some(4));
        assert!(idx.add_rows("b", vec![unit(0, 5)]).is_err());
    }

    #[test]
    fn search_collapses_to_doc_granularity() {
        let mut idx = VectorIndex::new();
        // doc "a" has two chunks, both similar to the query
        idx.add_rows("a", vec![unit(0, 3), vec![0.9, 0.1, 0.0]]).expect("a");
        idx.add_rows("b", vec![unit(1, 3)]).expect("b");
        let hits = idx.search(&unit(0, 3), 10).expect("search");
        assert_eq!(hits.len(), 2, "one hit per document");
        assert_eq!(hits[0].doc_id, "a");
        assert_eq!(hits[0].chunk_ord, 0, "best chunk reported");
    }

    #[test]
    fn search_ties_break_by_insertion_order() {
        let mut idx = VectorIndex::new();
        idx.add_rows("first", vec![unit(0, 2)]).expect("first");
        idx.add_rows("second", vec![unit(0, 2)]).expect("second");
        let hits = idx.search(&unit(0, 2), 2).expect("search");
        assert_eq!(hits[0].doc_id, "first");
        assert_eq!(hits[1].doc_id, "second");
    }

    #[test]
    fn remove_doc_rebuilds_matrix() {
        let mut idx = VectorIndex::new();
        idx.add_rows("a", vec![unit(0, 2), unit(1, 2)]).expect("a");
        idx.add_rows("b", vec![unit(1, 2)]).expect("b");
        assert_eq!(idx.remove_doc("a"), 2);
        assert!(idx.matrix_ok());
        let hits = idx.search(&unit(1, 2), 5).expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "b");
    }

    #[test]
    fn empty_index_returns_no_hits() {
        let idx = VectorIndex::new();
        assert!(idx.search(&[1.0, 0.0], 5).expect("search").is_empty());
    }

    #[test]
    fn matrix_ok_detects_divergence() {
        let mut idx = VectorIndex::new();
        idx.add_rows("a", vec![unit(0, 2)]).expect("a");
        assert!(idx.matrix_ok());
        idx.matrix[0] = 9.0;
        assert!(!idx.matrix_ok());
    }

    #[test]
    fn serde_roundtrip_then_rebuild() {
        let mut idx = VectorIndex::new();
        idx.add_rows("a", vec![unit(0, 2)]).expect("a");
        let json = serde_json::to_string(&idx).expect("ser");
        let mut back: VectorIndex = serde_json::from_str(&json).expect("de");
        back.rebuild_matrix();
        assert!(back.matrix_ok());
        assert_eq!(back.len(), 1);
        assert_eq!(back.dimension(), Some(2));
    }
}
