use std::{borrow::Cow, fmt};

/// Result type alias for operations that can fail during code generation.
pub type CompileResult<T> = Result<T, CompileError>;

/// Errors raised while translating a sexp tree into JavaScript.
///
/// Every variant carries the logical file name and the line the translator
/// was positioned at when the failure was detected. The user-visible surface
/// is a single line, `"<msg> :<file>:<line>"`, produced by the `Display`
/// implementation. A failed compilation exposes no partial output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The dispatcher met a node tag it has no emitter for.
    UnsupportedNode { tag: String, file: String, line: u32 },
    /// A well-formed node with an impossible shape, e.g. `break` outside a
    /// loop or block, `return` in expression position, a bad `masgn` rhs.
    Structural {
        msg: Cow<'static, str>,
        file: String,
        line: u32,
    },
    /// A broken translator invariant (temp pool imbalance, scope stack
    /// underflow). Reaching this is a bug in the caller or in quill itself.
    Internal {
        msg: Cow<'static, str>,
        file: String,
        line: u32,
    },
}

impl CompileError {
    pub(crate) fn unsupported(tag: impl Into<String>, file: &str, line: u32) -> Self {
        Self::UnsupportedNode {
            tag: tag.into(),
            file: file.to_owned(),
            line,
        }
    }

    pub(crate) fn structural(msg: impl Into<Cow<'static, str>>, file: &str, line: u32) -> Self {
        Self::Structural {
            msg: msg.into(),
            file: file.to_owned(),
            line,
        }
    }

    pub(crate) fn internal(msg: impl Into<Cow<'static, str>>, file: &str, line: u32) -> Self {
        Self::Internal {
            msg: msg.into(),
            file: file.to_owned(),
            line,
        }
    }

    /// The logical file name the error is tagged with.
    #[must_use]
    pub fn file(&self) -> &str {
        match self {
            Self::UnsupportedNode { file, .. } | Self::Structural { file, .. } | Self::Internal { file, .. } => file,
        }
    }

    /// The source line the translator was at when the error was raised.
    #[must_use]
    pub fn line(&self) -> u32 {
        match self {
            Self::UnsupportedNode { line, .. } | Self::Structural { line, .. } | Self::Internal { line, .. } => *line,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedNode { tag, file, line } => {
                write!(f, "Unsupported sexp: {tag} :{file}:{line}")
            }
            Self::Structural { msg, file, line } | Self::Internal { msg, file, line } => {
                write!(f, "{msg} :{file}:{line}")
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Emits a non-fatal warning to the logging sink, tagged like an error.
///
/// Warnings never abort a compilation; callers that care install a `log`
/// backend, everyone else loses nothing.
pub(crate) fn warning(msg: &str, file: &str, line: u32) {
    log::warn!("{msg} :{file}:{line}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_single_line_with_location_suffix() {
        let err = CompileError::structural("void value expression", "app.rb", 7);
        assert_eq!(err.to_string(), "void value expression :app.rb:7");
    }

    #[test]
    fn unsupported_node_names_the_tag() {
        let err = CompileError::unsupported("frobnicate", "(file)", 1);
        assert_eq!(err.to_string(), "Unsupported sexp: frobnicate :(file):1");
        assert_eq!(err.file(), "(file)");
        assert_eq!(err.line(), 1);
    }
}
