//! The unit of emitted output.
//!
//! The translator never builds the output string directly. Each emitter
//! returns an ordered list of [`Fragment`]s; the final concatenation in
//! depth-first traversal order is the only source of total ordering in the
//! output. A fragment optionally remembers the source line of the node it
//! was emitted for, which the source-map post-processor consumes.

/// An immutable piece of emitted JavaScript, optionally tagged with the
/// source line it originated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    code: String,
    line: Option<u32>,
}

impl Fragment {
    /// Creates a fragment tagged with the source line of its origin node.
    pub(crate) fn new(code: impl Into<String>, line: u32) -> Self {
        Self {
            code: code.into(),
            line: Some(line),
        }
    }

    /// Creates a synthetic fragment with no source position, for glue text
    /// that corresponds to nothing in the source (prologues, var lines).
    pub(crate) fn synthetic(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            line: None,
        }
    }

    /// The raw JavaScript text.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The source line this fragment was emitted for, if any.
    #[must_use]
    pub fn line(&self) -> Option<u32> {
        self.line
    }
}

/// Concatenates fragments in order, without position markers.
pub(crate) fn to_plain(fragments: &[Fragment]) -> String {
    let mut out = String::with_capacity(fragments.iter().map(|f| f.code.len()).sum());
    for fragment in fragments {
        out.push_str(&fragment.code);
    }
    out
}

/// Concatenates fragments in order, prefixing every positioned fragment
/// with a `/*:<line>*/` marker so a post-processor can rebuild mappings.
pub(crate) fn to_annotated(fragments: &[Fragment]) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    for fragment in fragments {
        if let Some(line) = fragment.line {
            let _ = write!(out, "/*:{line}*/");
        }
        out.push_str(&fragment.code);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_concatenation_preserves_order() {
        let frags = vec![
            Fragment::new("a", 1),
            Fragment::synthetic(" + "),
            Fragment::new("b", 2),
        ];
        assert_eq!(to_plain(&frags), "a + b");
    }

    #[test]
    fn annotated_marks_only_positioned_fragments() {
        let frags = vec![
            Fragment::new("a", 1),
            Fragment::synthetic(" + "),
            Fragment::new("b", 2),
        ];
        assert_eq!(to_annotated(&frags), "/*:1*/a + /*:2*/b");
    }
}
