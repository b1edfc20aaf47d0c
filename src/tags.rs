//! Tag lists: sanitization, merging and the delimited persisted format.

/// Separator used to join tags in store rows.
pub const TAG_SEP: &str = ",";

/// Replacement for the delimiter when it appears inside a tag value.
const SEP_SUBSTITUTE: &str = "--";

/// An ordered, deduplicating set of bookmark tags bound to a delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tags {
    delim: String,
    tags: Vec<String>,
}

impl Tags {
    /// Build from an ordered sequence of tag strings.
    pub fn from_list<I, S>(tags: I, delim: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tags {
            delim: delim.to_string(),
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a delimited string, dropping empty tokens.
    pub fn from_delimited(s: &str, delim: &str) -> Self {
        Tags {
            delim: delim.to_string(),
            tags: s
                .split(delim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn add(&mut self, tag: impl Into<String>) {
        self.tags.push(tag.into());
    }

    pub fn as_slice(&self) -> &[String] {
        &self.tags
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Replace any occurrence of the delimiter inside a tag value so the
    /// persisted delimited string cannot be corrupted.
    /// ex: `["tag,1", "t,g2", "tag3"]` -> `["tag--1", "t--g2", "tag3"]`
    pub fn pre_sanitize(mut self) -> Self {
        for tag in &mut self.tags {
            if tag.contains(&self.delim) {
                *tag = tag.replace(&self.delim, SEP_SUBSTITUTE);
            }
        }
        self
    }

    /// Set union with `other`, preserving first-seen order.
    pub fn merge(&self, other: &Tags) -> Tags {
        let mut merged = Tags {
            delim: self.delim.clone(),
            tags: Vec::with_capacity(self.tags.len() + other.tags.len()),
        };
        let mut seen = std::collections::HashSet::new();
        for tag in self.tags.iter().chain(other.tags.iter()) {
            if seen.insert(tag.as_str()) {
                merged.tags.push(tag.clone());
            }
        }
        merged
    }

    /// Join tags with the delimiter. When `wrap` is set the result is also
    /// prefixed and suffixed with the delimiter, for compatibility with the
    /// Buku database format: `["a", "b"]` -> `,a,b,`.
    pub fn serialize(&self, wrap: bool) -> String {
        let joined = self.tags.join(&self.delim);
        if wrap {
            delim_wrap(&joined, &self.delim)
        } else {
            joined
        }
    }
}

/// Wrap `token` with `delim`. An empty or whitespace-only token collapses to
/// the delimiter alone.
fn delim_wrap(token: &str, delim: &str) -> String {
    if token.trim().is_empty() {
        return delim.to_string();
    }

    let mut wrapped = String::with_capacity(token.len() + 2 * delim.len());
    if !token.starts_with(delim) {
        wrapped.push_str(delim);
    }
    wrapped.push_str(token);
    if !token.ends_with(delim) {
        wrapped.push_str(delim);
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn parse_drops_empty_tokens() {
        let tags = Tags::from_delimited(",a,,b,", TAG_SEP);
        assert_eq!(tags.as_slice(), ["a", "b"]);
    }

    #[test]
    fn serialize_wrapped() {
        let tags = Tags::from_list(["a", "b"], TAG_SEP);
        assert_eq!(tags.serialize(true), ",a,b,");
        assert_eq!(tags.serialize(false), "a,b");
    }

    #[test]
    fn empty_tags_wrap_to_bare_delimiter() {
        let tags = Tags::from_list(Vec::<String>::new(), TAG_SEP);
        assert_eq!(tags.serialize(true), ",");

        let whitespace = Tags::from_list(["  "], TAG_SEP);
        assert_eq!(whitespace.serialize(true), ",");
    }

    #[test]
    fn pre_sanitize_replaces_delimiter() {
        let tags = Tags::from_list(["tag,1", "t,g2", "tag3"], TAG_SEP).pre_sanitize();
        assert_eq!(tags.as_slice(), ["tag--1", "t--g2", "tag3"]);
    }

    #[test]
    fn sanitized_value_survives_round_trip() {
        let tags = Tags::from_list(["a,b"], TAG_SEP).pre_sanitize();
        let reparsed = Tags::from_delimited(&tags.serialize(true), TAG_SEP);
        assert_eq!(reparsed.as_slice(), ["a--b"]);
    }

    #[test]
    fn merge_is_union() {
        let a = Tags::from_list(["a", "b"], TAG_SEP);
        let b = Tags::from_list(["b", "c"], TAG_SEP);
        let merged = a.merge(&b);
        assert_eq!(merged.as_slice(), ["a", "b", "c"]);
    }

    fn tag_set(tags: &Tags) -> HashSet<String> {
        tags.as_slice().iter().cloned().collect()
    }

    proptest! {
        #[test]
        fn merge_commutes_as_sets(
            a in proptest::collection::vec("[a-z]{1,6}", 0..8),
            b in proptest::collection::vec("[a-z]{1,6}", 0..8),
        ) {
            let ta = Tags::from_list(a, TAG_SEP);
            let tb = Tags::from_list(b, TAG_SEP);
            prop_assert_eq!(tag_set(&ta.merge(&tb)), tag_set(&tb.merge(&ta)));
        }

        #[test]
        fn merge_with_self_is_identity(
            a in proptest::collection::vec("[a-z]{1,6}", 0..8),
        ) {
            let ta = Tags::from_list(a, TAG_SEP);
            prop_assert_eq!(tag_set(&ta.merge(&ta)), tag_set(&ta));
        }

        #[test]
        fn sanitize_removes_raw_delimiter(tag in "[a-z,]{0,12}") {
            let tags = Tags::from_list([tag], TAG_SEP).pre_sanitize();
            for t in tags.as_slice() {
                prop_assert!(!t.contains(TAG_SEP));
            }
        }
    }
}
