//! Semantic grouping — deterministic centroid clustering over document
//! vectors, for exploratory browsing rather than precise retrieval.
//!
//! Determinism: no RNG. Centroids seed from evenly strided positions in
//! insertion order, assignment ties go to the lower cluster id, and
//! iteration stops at a fixed cap or on convergence.

use serde::Serialize;

use super::index::cosine_similarity;
use crate::error::AppError;

const MAX_ITERATIONS: usize = 20;

/// One clustered document.
#[derive(Debug, Clone, Serialize)]
pub struct GroupMember {
    pub id: String,
    /// Similarity to the cluster centroid.
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Group {
    pub cluster: usize,
    pub members: Vec<GroupMember>,
}

/// Partition `items` (doc id + representative vector, in insertion order)
/// into at most `k` clusters.
///
/// Fewer items than `k` yields one singleton cluster per item. Empty input
/// yields no clusters.
pub fn kmeans_clustering(items: &[(String, Vec<f32>)], k: usize) -> Result<Vec<Group>, AppError> {
    if k == 0 {
        return Err(AppError::Validation("k must be >= 1".into()));
    }
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let dim = items[0].1.len();
    if items.iter().any(|(_, v)| v.len() != dim) {
        return Err(AppError::CorruptState(
            "document vectors have inconsistent dimensions".into(),
        ));
    }

    let k = k.min(items.len());

    // Seed centroids from evenly strided items.
    let mut centroids: Vec<Vec<f32>> = (0..k)
        .map(|c| items[c * items.len() / k].1.clone())
        .collect();

    let mut assignment = vec![0usize; items.len()];
    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (i, (_, v)) in items.iter().enumerate() {
            let mut best = 0usize;
            let mut best_score = f32::MIN;
            for (c, centroid) in centroids.iter().enumerate() {
                let s = cosine_similarity(v, centroid);
                if s > best_score {
                    best_score = s;
                    best = c;
                }
            }
            if assignment[i] != best {
                assignment[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        // Recompute centroids as member means; empty clusters keep their
        // previous centroid.
        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&Vec<f32>> = items
                .iter()
                .zip(&assignment)
                .filter(|(_, a)| **a == c)
                .map(|((_, v), _)| v)
                .collect();
            if members.is_empty() {
                continue;
            }
            let mut mean = vec![0.0f32; dim];
            for v in &members {
                for (m, x) in mean.iter_mut().zip(v.iter()) {
                    *m += x;
                }
            }
            for m in &mut mean {
                *m /= members.len() as f32;
            }
            *centroid = mean;
        }
    }

    let mut groups: Vec<Group> = (0..k).map(|c| Group { cluster: c, members: Vec::new() }).collect();
    for (i, (id, v)) in items.iter().enumerate() {
        let c = assignment[i];
        groups[c].members.push(GroupMember {
            id: id.clone(),
            score: cosine_similarity(v, &centroids[c]),
        });
    }
    groups.retain(|g| !g.members.is_empty());
    Ok(groups)
}
