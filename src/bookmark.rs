//! Flattened bookmark representation written to the relational stores.

/// A bookmark as persisted in a store row. `url` is the unique key; `tags`
/// accumulate across merges and are never dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bookmark {
    pub url: String,
    /// Display title (`metadata` column).
    pub title: String,
    pub tags: Vec<String>,
    pub desc: String,
    /// Identifier of the source module that produced this bookmark.
    pub module: String,
}
