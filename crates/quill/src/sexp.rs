//! The sexp tree the translator walks.
//!
//! The parser collaborator hands the translator a tree of tagged nodes. A
//! node is a kind plus an ordered list of children; children are nested
//! nodes, interned names, or literal values. Every node carries the source
//! line it started on (and optionally the line it ended on), which the
//! emitter reads verbatim for position tagging.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::{Display, EnumString, IntoStaticStr};

/// Tags of the node variants the translator dispatches on.
///
/// The wire names (used in error messages and serialization) are the
/// snake_case sexp tags of the source grammar, e.g. `NodeKind::JsReturn`
/// prints as `js_return`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    // atoms
    Nil,
    True,
    False,
    #[strum(serialize = "self")]
    #[serde(rename = "self")]
    SelfRef,
    Lit,
    Str,

    // interpolation
    Dstr,
    Dsym,
    Dxstr,
    Xstr,
    Dregx,
    Evstr,
    Dot2,
    Dot3,

    // variables
    Lvar,
    Lasgn,
    Ivar,
    Iasgn,
    Gvar,
    Gasgn,
    NthRef,
    Cvar,
    Cvasgn,
    Cvdecl,
    Const,
    Cdecl,
    Colon2,
    Colon3,

    // assignment
    Masgn,
    Svalue,
    Attrasgn,
    OpAsgn1,
    OpAsgn2,
    OpAsgnOr,
    OpAsgnAnd,

    // collections
    Array,
    Hash,
    Splat,
    ToAry,

    // control flow
    If,
    Case,
    When,
    While,
    Until,
    Break,
    Next,
    Redo,
    Return,
    JsReturn,
    JsTmp,
    Yield,
    ReturnableYield,
    Yasgn,

    // logic
    And,
    Or,
    Not,
    Defined,

    // definitions
    Class,
    Module,
    Sclass,
    Defn,
    Defs,
    Alias,
    Undef,
    Args,
    Scope,
    Block,

    // calls
    Call,
    Operator,
    Iter,
    BlockPass,
    Arglist,
    Super,
    Zsuper,

    // exceptions
    Rescue,
    Resbody,
    Ensure,
}

/// A tagged tree node: kind, children, source position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub children: SmallVec<[Sexp; 4]>,
    /// 1-based line the node starts on.
    pub line: u32,
    /// Line the node ends on, when the parser knows it.
    pub end_line: Option<u32>,
}

impl Node {
    /// Creates a childless node at the given source line.
    #[must_use]
    pub fn new(kind: NodeKind, line: u32) -> Self {
        Self {
            kind,
            children: SmallVec::new(),
            line,
            end_line: None,
        }
    }

    /// Appends one child, builder style.
    #[must_use]
    pub fn child(mut self, child: Sexp) -> Self {
        self.children.push(child);
        self
    }

    /// Appends children from an iterator, builder style.
    #[must_use]
    pub fn with_children(mut self, children: impl IntoIterator<Item = Sexp>) -> Self {
        self.children.extend(children);
        self
    }

    /// Sets the end line, builder style.
    #[must_use]
    pub fn ending_at(mut self, end_line: u32) -> Self {
        self.end_line = Some(end_line);
        self
    }

    /// Wraps the node as a [`Sexp`] child.
    #[must_use]
    pub fn into_sexp(self) -> Sexp {
        Sexp::Node(Box::new(self))
    }
}

/// A child of a node: a nested node, an interned name, or a literal value.
///
/// `Sexp::None` marks an absent child (an `if` with no else branch, a
/// `return` with no value); emitters substitute `nil` where the language
/// requires a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Sexp {
    None,
    Node(Box<Node>),
    /// An interned identifier: variable, constant or method name.
    Name(String),
    Int(i64),
    Float(f64),
    /// Source text, verbatim. Used by `str`/`xstr` parts.
    Str(String),
    Sym(String),
    /// Regex pattern source, without delimiters.
    Regexp(String),
    Range {
        start: i64,
        end: i64,
        exclusive: bool,
    },
}

impl Sexp {
    /// Builds a node sexp in one call.
    #[must_use]
    pub fn node(kind: NodeKind, line: u32, children: impl IntoIterator<Item = Self>) -> Self {
        Node::new(kind, line).with_children(children).into_sexp()
    }

    /// Convenience constructor for a [`Sexp::Name`] child.
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// The node kind, when this child is a node.
    #[must_use]
    pub fn kind(&self) -> Option<NodeKind> {
        match self {
            Self::Node(node) => Some(node.kind),
            _ => None,
        }
    }

    pub(crate) fn is_kind(&self, kind: NodeKind) -> bool {
        self.kind() == Some(kind)
    }
}

/// Emission context of a subtree, ordered from pure statement position to
/// receiver position. The level decides whether a construct must produce a
/// usable value, whether it needs parentheses (`Recv` forces them around
/// numeric literals and some compound expressions) and whether the block
/// emitter appends a terminating semicolon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Stmt,
    StmtClosure,
    List,
    Expr,
    Recv,
}

/// Rewrites a subtree so that emitting it produces a JavaScript `return` of
/// the original value.
///
/// Pure value form: the input is consumed and a rewritten tree is returned.
/// `fallback_line` positions nodes synthesized for absent children. The
/// rewrite is idempotent: lifting an already-lifted tree changes nothing.
pub(crate) fn lift_returns(sexp: Sexp, fallback_line: u32) -> Sexp {
    let node = match sexp {
        Sexp::None => {
            return Sexp::node(
                NodeKind::JsReturn,
                fallback_line,
                [Sexp::node(NodeKind::Nil, fallback_line, [])],
            );
        }
        Sexp::Node(node) => node,
        leaf => return Sexp::node(NodeKind::JsReturn, fallback_line, [leaf]),
    };
    let line = node.line;

    match node.kind {
        // already in returning form
        NodeKind::Break | NodeKind::Next | NodeKind::Return | NodeKind::JsReturn | NodeKind::ReturnableYield => {
            Sexp::Node(node)
        }
        NodeKind::Yield => {
            let mut node = node;
            node.kind = NodeKind::ReturnableYield;
            Sexp::Node(node)
        }
        // recurse into the body child
        NodeKind::Scope | NodeKind::Rescue | NodeKind::Ensure => {
            let mut node = node;
            if node.children.is_empty() {
                node.children.push(Sexp::None);
            }
            let body = std::mem::replace(&mut node.children[0], Sexp::None);
            node.children[0] = lift_returns(body, line);
            Sexp::Node(node)
        }
        NodeKind::Block => {
            let mut node = node;
            if let Some(last) = node.children.last_mut() {
                let stmt = std::mem::replace(last, Sexp::None);
                *last = lift_returns(stmt, line);
            } else {
                node.children.push(lift_returns(Sexp::None, line));
            }
            Sexp::Node(node)
        }
        NodeKind::When => {
            let mut node = node;
            while node.children.len() < 2 {
                node.children.push(Sexp::None);
            }
            let body = std::mem::replace(&mut node.children[1], Sexp::None);
            node.children[1] = lift_returns(body, line);
            Sexp::Node(node)
        }
        // loops produce nil; the emitter handles expression position itself
        NodeKind::While | NodeKind::Until => Sexp::Node(node),
        NodeKind::Xstr => {
            let mut node = node;
            if let Some(Sexp::Str(code)) = node.children.first_mut()
                && !code.contains("return")
                && !code.contains(';')
            {
                *code = format!("return {code};");
            }
            Sexp::Node(node)
        }
        NodeKind::Dxstr => {
            let mut node = node;
            if let Some(Sexp::Str(code)) = node.children.first_mut()
                && !code.contains("return")
                && !code.contains(';')
                && !code.contains('\n')
            {
                *code = format!("return {code}");
            }
            Sexp::Node(node)
        }
        NodeKind::If => {
            let mut node = node;
            while node.children.len() < 3 {
                node.children.push(Sexp::None);
            }
            let then_branch = std::mem::replace(&mut node.children[1], Sexp::None);
            node.children[1] = lift_returns(then_branch, line);
            let else_branch = std::mem::replace(&mut node.children[2], Sexp::None);
            node.children[2] = lift_returns(else_branch, line);
            Sexp::Node(node)
        }
        _ => Sexp::node(NodeKind::JsReturn, line, [Sexp::Node(node)]),
    }
}
