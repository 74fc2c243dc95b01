//! Top-k extraction and ranking metrics.
use std::cmp::Ordering;

use ndarray::{Array2, ArrayView1, Axis};
use rayon::prelude::*;

use super::ItemId;
use crate::data::InteractionMatrix;

/// Descending by score, ascending by index on ties.
fn by_score(a: &(ItemId, f32), b: &(ItemId, f32)) -> Ordering {
    b.1.partial_cmp(&a.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.0.cmp(&b.0))
}

/// Indices of the `k` highest scores, best first.
///
/// Masked entries (`-inf`) and NaNs are never returned, so the result has
/// `min(k, available)` elements. The k best are isolated with an O(n)
/// selection and only those are sorted.
pub fn top_k_indices(scores: ArrayView1<f32>, k: usize) -> Vec<ItemId> {
    let mut candidates: Vec<(ItemId, f32)> = scores
        .iter()
        .cloned()
        .enumerate()
        .filter(|&(_, score)| score > f32::NEG_INFINITY)
        .collect();

    let k = k.min(candidates.len());
    if k == 0 {
        return Vec::new();
    }

    if k < candidates.len() {
        candidates.select_nth_unstable_by(k - 1, by_score);
        candidates.truncate(k);
    }
    candidates.sort_unstable_by(by_score);

    candidates.into_iter().map(|(item_id, _)| item_id).collect()
}

/// Per-row top-k extraction over a dense score matrix.
pub fn extract_top_k(scores: &Array2<f32>, k: usize) -> Vec<Vec<ItemId>> {
    scores
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|row| top_k_indices(row, k))
        .collect()
}

/// Ranking metrics at a cutoff, averaged over users with held-out items.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// The cutoff.
    pub k: usize,
    /// Hits divided by `k`.
    pub precision: f32,
    /// Hits divided by the number of held-out items.
    pub recall: f32,
    /// Normalised discounted cumulative gain.
    pub ndcg: f32,
    /// Number of users the averages were taken over.
    pub num_users: usize,
}

fn discount(rank: usize) -> f32 {
    1.0 / ((rank + 2) as f32).log2()
}

/// Evaluate top-k lists against a held-out matrix.
///
/// Returns `None` when `test` has no entries: there is nothing to measure
/// and every ratio would divide by zero.
pub fn evaluate(top_k: &[Vec<ItemId>], test: &InteractionMatrix, k: usize) -> Option<Metrics> {
    if test.is_empty() || k == 0 {
        return None;
    }

    let per_user: Vec<(f32, f32, f32)> = test
        .iter_users()
        .collect::<Vec<_>>()
        .par_iter()
        .filter(|user| !user.item_ids.is_empty())
        .map(|user| {
            let recommended: &[ItemId] = top_k
                .get(user.user_id)
                .map(|items| &items[..items.len().min(k)])
                .unwrap_or(&[]);

            let mut hits = 0;
            let mut dcg = 0.0;

            for (rank, item_id) in recommended.iter().enumerate() {
                if user.item_ids.binary_search(item_id).is_ok() {
                    hits += 1;
                    dcg += discount(rank);
                }
            }

            let ideal: f32 = (0..user.item_ids.len().min(k)).map(discount).sum();

            (
                hits as f32 / k as f32,
                hits as f32 / user.item_ids.len() as f32,
                dcg / ideal,
            )
        })
        .collect();

    let num_users = per_user.len();
    let (precision, recall, ndcg) = per_user
        .iter()
        .fold((0.0, 0.0, 0.0), |(p, r, n), &(up, ur, un)| (p + up, r + ur, n + un));

    Some(Metrics {
        k,
        precision: precision / num_users as f32,
        recall: recall / num_users as f32,
        ndcg: ndcg / num_users as f32,
        num_users,
    })
}
