use ahash::{AHashMap, AHashSet};
use lazy_static::lazy_static;

/// Normalized term → occurrence count for one path.
pub type TermVector = AHashMap<String, u64>;

lazy_static! {
    static ref DEFAULT_STOPWORDS: AHashSet<&'static str> = [
        "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do",
        "does", "did", "will", "would", "could", "should", "may", "might", "must", "can", "this",
        "that", "these", "those", "it", "its", "we", "you", "they", "he", "she", "not", "no",
        "so", "if", "then", "than", "too", "very", "just", "also", "all", "any", "each", "into",
        "out", "up", "our", "your", "their", "my", "me", "us",
    ]
    .into_iter()
    .collect();
}

/// Normalizes raw text into terms: lowercase, split on every non-alphanumeric
/// character, drop short tokens and stopwords.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    min_len: usize,
    extra_stopwords: AHashSet<String>,
}

impl Tokenizer {
    pub fn new(min_len: usize, extra_stopwords: &[String]) -> Self {
        Self {
            min_len,
            extra_stopwords: extra_stopwords.iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    pub fn is_stopword(&self, word: &str) -> bool {
        DEFAULT_STOPWORDS.contains(word) || self.extra_stopwords.contains(word)
    }

    pub fn tokens<'a>(&'a self, text: &'a str) -> impl Iterator<Item = String> + 'a {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|raw| !raw.is_empty())
            .map(|raw| raw.to_lowercase())
            .filter(move |word| word.chars().count() >= self.min_len && !self.is_stopword(word))
    }

    /// Add every term of `text` to `vector`.
    pub fn count_into(&self, text: &str, vector: &mut TermVector) {
        for term in self.tokens(text) {
            *vector.entry(term).or_insert(0) += 1;
        }
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(2, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(tokenizer: &Tokenizer, text: &str) -> Vec<String> {
        tokenizer.tokens(text).collect()
    }

    #[test]
    fn test_splits_names_on_punctuation() {
        let tokenizer = Tokenizer::default();
        assert_eq!(
            collect(&tokenizer, "Tax_Return-2021.final.PDF"),
            vec!["tax", "return", "2021", "final", "pdf"]
        );
    }

    #[test]
    fn test_drops_short_tokens_and_stopwords() {
        let tokenizer = Tokenizer::default();
        assert_eq!(collect(&tokenizer, "a copy of the photos"), vec!["copy", "photos"]);
        assert!(collect(&tokenizer, "x-y-z").is_empty());
    }

    #[test]
    fn test_extra_stopwords_are_case_insensitive() {
        let tokenizer = Tokenizer::new(3, &["Backup".to_string()]);
        assert_eq!(collect(&tokenizer, "backup of vacation pics"), vec!["vacation", "pics"]);
    }

    #[test]
    fn test_count_into_accumulates() {
        let tokenizer = Tokenizer::default();
        let mut vector = TermVector::new();
        tokenizer.count_into("invoice_march.pdf", &mut vector);
        tokenizer.count_into("invoice_april.pdf", &mut vector);
        assert_eq!(vector.get("invoice"), Some(&2));
        assert_eq!(vector.get("pdf"), Some(&2));
        assert_eq!(vector.get("march"), Some(&1));
    }

    #[test]
    fn test_unicode_is_lowercased() {
        let tokenizer = Tokenizer::default();
        assert_eq!(collect(&tokenizer, "Ünïcode_Fotos"), vec!["ünïcode", "fotos"]);
    }
}
