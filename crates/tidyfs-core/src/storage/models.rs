/// A directory whose terms are in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedPath {
    pub id: i64,
    pub absolute_path: String,
    /// RFC 3339, UTC.
    pub last_scraped: String,
}

/// A normalized word from the term dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub id: i64,
    pub word: String,
}

/// Links a path to a term with its occurrence count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermRelationship {
    pub id: i64,
    pub path_id: i64,
    pub term_id: i64,
    pub frequency: i64,
}
