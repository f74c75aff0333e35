//! Identifier hygiene.
//!
//! Source identifiers cannot be copied into the emitted program verbatim:
//! locals may collide with JavaScript reserved words, and method ids may
//! contain characters (`=`, `?`, `[]`, operators) that are not valid in a
//! dot accessor. The rules here are deterministic so the same tree always
//! mangles to the same text.

use std::sync::LazyLock;

use ahash::AHashSet;
use regex::Regex;

/// JavaScript keywords and future reserved words the generator must never
/// emit in identifier position.
const RESERVED: &[&str] = &[
    "break",
    "case",
    "catch",
    "continue",
    "debugger",
    "default",
    "delete",
    "do",
    "else",
    "finally",
    "for",
    "function",
    "if",
    "in",
    "instanceof",
    "new",
    "return",
    "switch",
    "this",
    "throw",
    "try",
    "typeof",
    "var",
    "let",
    "void",
    "while",
    "with",
    "class",
    "enum",
    "export",
    "extends",
    "import",
    "super",
    "true",
    "false",
    "native",
    "const",
    "static",
];

static RESERVED_SET: LazyLock<AHashSet<&'static str>> = LazyLock::new(|| RESERVED.iter().copied().collect());

/// Matches names that may be emitted as a bare property accessor or object
/// literal key without quoting.
static JS_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("identifier pattern is valid"));

/// Returns true when `name` is a JavaScript reserved word.
pub(crate) fn reserved(name: &str) -> bool {
    RESERVED_SET.contains(name)
}

/// Mangles a local variable or parameter name, suffixing reserved words
/// with a single `$`.
pub(crate) fn lvar_to_js(name: &str) -> String {
    if reserved(name) {
        format!("{name}$")
    } else {
        name.to_owned()
    }
}

/// Maps a source method id to its JavaScript accessor form.
///
/// Plain ids become a `$`-prefixed dot accessor; ids containing operator
/// characters or a trailing `=`/`?`/`!` become a quoted index accessor:
/// `foo` -> `.$foo`, `==` -> `['$==']`, `name=` -> `['$name=']`.
pub(crate) fn mid_to_jsid(mid: &str) -> String {
    if mid.contains(['=', '+', '-', '*', '/', '!', '?', '<', '>', '&', '|', '^', '%', '~', '[']) {
        format!("['${mid}']")
    } else {
        format!(".${mid}")
    }
}

/// Maps an instance variable name (without the `@`) to a property accessor,
/// quoting names that collide with reserved words.
pub(crate) fn ivar_accessor(name: &str) -> String {
    if reserved(name) {
        format!("['{name}']")
    } else {
        format!(".{name}")
    }
}

/// Returns true when `name` can be written as a bare object-literal key.
pub(crate) fn valid_js_ident(name: &str) -> bool {
    JS_IDENT.is_match(name) && !reserved(name)
}
