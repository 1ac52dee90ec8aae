pub mod terms;
pub mod walk;

pub use terms::{TermVector, Tokenizer};
pub use walk::{ScanOutcome, TermExtractor};
