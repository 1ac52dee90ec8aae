use crate::config::SimilarityConfig;
use crate::progress::ProgressReporter;
use crate::storage::Database;
use ahash::{AHashMap, AHashSet};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::Hash;
use std::time::Instant;
use tracing::info;

/// A ranked pair of overlapping paths. `path_a` sorts before `path_b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub path_a: String,
    pub path_b: String,
    pub similarity: f64,
}

/// Weighted Jaccard similarity: Σ min(a[t], b[t]) / Σ max(a[t], b[t]).
///
/// Bounded to [0, 1] and symmetric. Two empty vectors are identical and score 1.0.
pub fn weighted_jaccard<K: Eq + Hash>(a: &AHashMap<K, u64>, b: &AHashMap<K, u64>) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let shared: u64 = small
        .iter()
        .filter_map(|(term, &x)| large.get(term).map(|&y| x.min(y)))
        .sum();
    let total_a: u64 = a.values().sum();
    let total_b: u64 = b.values().sum();
    // max(x, y) = x + y - min(x, y), and terms present on one side only contribute their count
    let union = total_a + total_b - shared;
    if union == 0 {
        return 1.0;
    }
    shared as f64 / union as f64
}

/// Result of one similarity pass.
#[derive(Debug, Default)]
pub struct SimilarityPass {
    pub candidate_pairs: usize,
    pub insights: Vec<Insight>,
}

/// Rank every pair of paths sharing at least one term.
///
/// 1. Build inverted index: term → Vec<path index>
/// 2. Candidate pairs come only from paths listed under a common term
/// 3. Score each candidate with weighted Jaccard
/// 4. Drop pairs below `threshold`, sort by score descending then by (path_a, path_b),
///    keep the first `max_insights`
pub fn rank_insights<K>(
    vectors: &[(String, AHashMap<K, u64>)],
    config: &SimilarityConfig,
) -> SimilarityPass
where
    K: Eq + Hash + Sync,
{
    let mut inverted_index: AHashMap<&K, Vec<usize>> = AHashMap::new();
    for (idx, (_, vector)) in vectors.iter().enumerate() {
        for (term, &frequency) in vector {
            if frequency > 0 {
                inverted_index.entry(term).or_default().push(idx);
            }
        }
    }

    let mut candidate_pairs: AHashSet<(usize, usize)> = AHashSet::new();
    for path_ids in inverted_index.values() {
        for i in 0..path_ids.len() {
            for j in (i + 1)..path_ids.len() {
                let (a, b) = if path_ids[i] < path_ids[j] {
                    (path_ids[i], path_ids[j])
                } else {
                    (path_ids[j], path_ids[i])
                };
                candidate_pairs.insert((a, b));
            }
        }
    }

    let pairs_vec: Vec<(usize, usize)> = candidate_pairs.into_iter().collect();
    let mut insights: Vec<Insight> = pairs_vec
        .par_iter()
        .filter_map(|&(a, b)| {
            let (path_a, vector_a) = &vectors[a];
            let (path_b, vector_b) = &vectors[b];
            if path_a == path_b {
                return None;
            }
            let similarity = weighted_jaccard(vector_a, vector_b);
            if similarity < config.threshold {
                return None;
            }
            let (path_a, path_b) = if path_a < path_b {
                (path_a, path_b)
            } else {
                (path_b, path_a)
            };
            Some(Insight {
                path_a: path_a.clone(),
                path_b: path_b.clone(),
                similarity,
            })
        })
        .collect();

    insights.sort_by(compare_insights);
    insights.truncate(config.max_insights);

    SimilarityPass {
        candidate_pairs: pairs_vec.len(),
        insights,
    }
}

/// Descending by score, then ascending by (path_a, path_b).
fn compare_insights(x: &Insight, y: &Insight) -> Ordering {
    y.similarity
        .partial_cmp(&x.similarity)
        .unwrap_or(Ordering::Equal)
        .then_with(|| x.path_a.cmp(&y.path_a))
        .then_with(|| x.path_b.cmp(&y.path_b))
}

/// Recompute the insight list from the index store. Read-only.
pub fn compute_insights(
    db: &Database,
    config: &SimilarityConfig,
    reporter: &dyn ProgressReporter,
) -> Result<Vec<Insight>, crate::Error> {
    let start = Instant::now();
    let vectors = db.load_term_vectors()?;
    reporter.on_similarity_start(vectors.len());

    let pass = rank_insights(&vectors, config);
    let elapsed = start.elapsed().as_secs_f64();
    info!(
        "Similarity pass over {} paths: {} candidate pairs, {} insights (threshold={:.2}) in {:.2}s",
        vectors.len(),
        pass.candidate_pairs,
        pass.insights.len(),
        config.threshold,
        elapsed,
    );
    reporter.on_similarity_complete(pass.candidate_pairs, pass.insights.len(), elapsed);
    Ok(pass.insights)
}
