pub mod similarity;

pub use similarity::{compute_insights, rank_insights, weighted_jaccard, Insight, SimilarityPass};
