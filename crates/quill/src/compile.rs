//! The tree-walking translator.
//!
//! `Compiler` walks a sexp tree depth-first and emits the JavaScript program
//! as an ordered list of position-tagged fragments. One emitter per node
//! variant; the dispatcher is a single match over [`NodeKind`]. All mutable
//! translation state (current line, indentation, the scope stack, the
//! demanded-helper set) lives on the compiler, so one instance runs one
//! compilation at a time.

mod calls;
mod control;
mod defs;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{
    error::{CompileError, CompileResult},
    fragment::{self, Fragment},
    mangle,
    scope::{Scope, ScopeKind, WhileFrame},
    sexp::{Level, Node, NodeKind, Sexp},
};

const INDENT: &str = "  ";

/// Runtime helpers the emitted code can demand. Each member the compilation
/// touches is bound in the prologue as `__<name> = __opal.<name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
enum Helper {
    Breaker,
    Slice,
    Gvars,
    Hash,
    Hash2,
    Klass,
    Module,
    Range,
}

/// Fixed declaration order: the two seeded helpers first, the rest
/// alphabetical, so identical input always yields an identical prologue.
const HELPER_ORDER: &[Helper] = &[
    Helper::Breaker,
    Helper::Slice,
    Helper::Gvars,
    Helper::Hash,
    Helper::Hash2,
    Helper::Klass,
    Helper::Module,
    Helper::Range,
];

/// Options controlling a compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Logical name used in error messages and the source-map comment.
    pub file: String,
    /// Name shown in the file comment; defaults to `file` when absent.
    pub source_file: Option<String>,
    /// Emit method-missing-aware dispatch.
    pub method_missing: bool,
    /// Emit the inline numeric fast path for comparison and arithmetic
    /// operators.
    pub optimized_operators: bool,
    /// Emit runtime arity checks at method entry.
    pub arity_check: bool,
    /// Route constant lookups through the runtime's constant-missing trap.
    pub const_missing: bool,
    /// Rewrite top-level locals to persistent `Opal.irb_vars` slots.
    pub irb: bool,
    /// Annotate fragments with line markers and prepend the source-map and
    /// file comments.
    pub source_map_enabled: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            file: "(file)".to_owned(),
            source_file: None,
            method_missing: true,
            optimized_operators: true,
            arity_check: false,
            const_missing: true,
            irb: false,
            source_map_enabled: true,
        }
    }
}

pub(crate) type Frags = Vec<Fragment>;

/// Translates one sexp tree to JavaScript with the given options.
pub fn compile(sexp: Option<Sexp>, options: CompileOptions) -> Result<String, CompileError> {
    Compiler::new(options).compile(sexp)
}

/// The translator. Holds all state of a running compilation; strictly
/// single-threaded, one `compile` call at a time per instance. State fully
/// resets at each call, so an instance can be reused sequentially.
#[derive(Debug)]
pub struct Compiler {
    options: CompileOptions,
    /// Line of the node currently being emitted; errors are tagged with it.
    line: u32,
    indent: String,
    /// Counter feeding `TMP_{n}` temp names and scope identities.
    unique: u32,
    scopes: Vec<Scope>,
    helpers: AHashSet<Helper>,
    /// Innermost-last: whether each enclosing `case` has a scrutinee.
    case_stack: Vec<bool>,
    uses_file: bool,
}

impl Compiler {
    #[must_use]
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            line: 1,
            indent: String::new(),
            unique: 0,
            scopes: Vec::new(),
            helpers: AHashSet::new(),
            case_stack: Vec::new(),
            uses_file: false,
        }
    }

    /// True when the last compilation met a string literal equal to the
    /// logical file name. Read by build orchestration collaborators.
    #[must_use]
    pub fn uses_file(&self) -> bool {
        self.uses_file
    }

    /// Translates a sexp tree into the final JavaScript program string.
    ///
    /// An absent tree compiles as `nil`. On error, no partial output is
    /// exposed.
    pub fn compile(&mut self, sexp: Option<Sexp>) -> Result<String, CompileError> {
        self.line = 1;
        self.indent.clear();
        self.unique = 0;
        self.scopes.clear();
        self.case_stack.clear();
        self.uses_file = false;
        self.helpers = [Helper::Breaker, Helper::Slice].into_iter().collect();

        let root = match sexp {
            Some(Sexp::None) | None => Sexp::node(NodeKind::Nil, 1, []),
            Some(tree) => tree,
        };
        let fragments = self.emit_top(root)?;
        debug_assert!(self.scopes.is_empty(), "scope stack must unwind completely");

        let body = if self.options.source_map_enabled {
            fragment::to_annotated(&fragments)
        } else {
            fragment::to_plain(&fragments)
        };

        let mut out = String::new();
        if self.options.source_map_enabled {
            let file = &self.options.file;
            let source_file = self.options.source_file.as_deref().unwrap_or(file);
            out.push_str(&format!("//@ sourceMappingURL=/__opal_source_maps__/{file}.js.map\n"));
            out.push_str(&format!("/*-file:{source_file}-*/\n"));
        }
        out.push_str(&body);
        Ok(out)
    }

    /// Wraps the translated body in the module prologue/epilogue and renders
    /// the top scope's declarations.
    fn emit_top(&mut self, root: Sexp) -> CompileResult<Frags> {
        let line = match &root {
            Sexp::Node(node) => node.line,
            _ => 1,
        };
        let (body, _) = self.in_scope(ScopeKind::Top, |c| {
            let body = c.indented(|c| {
                let scoped = Sexp::node(NodeKind::Scope, line, [root]);
                c.process(scoped, Level::Stmt)
            })?;

            let mut entries = vec![
                "self = __opal.top".to_owned(),
                "__scope = __opal".to_owned(),
                "$mm = __opal.mm".to_owned(),
                "nil = __opal.nil".to_owned(),
            ];
            for helper in HELPER_ORDER {
                if c.helpers.contains(helper) {
                    entries.push(format!("__{helper} = __opal.{helper}"));
                }
            }
            if c.scope().defines_defn {
                entries.push("def = __opal.Object.prototype".to_owned());
            }
            c.scope_mut().prepend_temps(entries);
            let vars = c.scope().var_line(INDENT);

            let mut out = vec![Fragment::synthetic("(function(__opal) {\n")];
            out.push(Fragment::synthetic(format!("{INDENT}{vars}\n")));
            out.push(Fragment::synthetic(INDENT));
            out.extend(body);
            out.push(Fragment::synthetic("\n})(Opal);\n"));
            Ok(out)
        })?;
        Ok(body)
    }

    // ---- plumbing ----------------------------------------------------

    fn scope(&self) -> &Scope {
        self.scopes.last().expect("compiler has no open scope")
    }

    fn scope_mut(&mut self) -> &mut Scope {
        self.scopes.last_mut().expect("compiler has no open scope")
    }

    /// Runs `f` inside a freshly pushed scope of the given kind; the scope is
    /// popped on every exit path and returned alongside the result.
    fn in_scope<T>(
        &mut self,
        kind: ScopeKind,
        f: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<(T, Scope)> {
        self.scopes.push(Scope::new(kind));
        let result = f(self);
        let scope = self.scopes.pop().expect("scope stack underflow");
        if result.is_ok() {
            debug_assert_eq!(scope.live_temps(), 0, "temps acquired in scope were not queued back");
        }
        result.map(|value| (value, scope))
    }

    /// Acquires a temp for the duration of `f`, queueing it back on every
    /// exit path.
    fn with_temp<T>(&mut self, f: impl FnOnce(&mut Self, &str) -> CompileResult<T>) -> CompileResult<T> {
        let tmp = self.new_temp();
        let result = f(self, &tmp);
        self.queue_temp(tmp);
        result
    }

    fn new_temp(&mut self) -> String {
        let scope = self.scopes.last_mut().expect("compiler has no open scope");
        scope.new_temp(&mut self.unique)
    }

    fn queue_temp(&mut self, name: String) {
        self.scope_mut().queue_temp(name);
    }

    /// Mints the compiler-wide `TMP_{n}` name without tying it to a scope
    /// pool. Used for scope identities and super captures.
    fn unique_temp(&mut self) -> String {
        self.unique += 1;
        format!("TMP_{}", self.unique)
    }

    /// Returns the scope's stable identity, minting and declaring it in the
    /// parent scope on first use.
    fn identify(&mut self) -> String {
        self.identify_at(self.scopes.len() - 1)
    }

    fn identify_at(&mut self, idx: usize) -> String {
        if let Some(id) = &self.scopes[idx].identity {
            return id.clone();
        }
        let id = self.unique_temp();
        self.scopes[idx].identity = Some(id.clone());
        if idx > 0 {
            self.scopes[idx - 1].add_temp(id.clone());
        }
        id
    }

    /// Runs `f` one indentation level deeper.
    fn indented<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.indent.push_str(INDENT);
        let result = f(self);
        self.indent.truncate(self.indent.len() - INDENT.len());
        result
    }

    /// Runs `f` inside a fresh loop frame on the current scope, returning
    /// the frame for `use_redo` inspection.
    fn in_while_frame<T>(
        &mut self,
        closure: bool,
        redo_var: String,
        f: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<(T, WhileFrame)> {
        self.scope_mut().while_stack.push(WhileFrame {
            closure,
            redo_var,
            use_redo: false,
        });
        let result = f(self);
        let frame = self.scope_mut().while_stack.pop().expect("while stack underflow");
        result.map(|value| (value, frame))
    }

    fn err(&self, msg: impl Into<std::borrow::Cow<'static, str>>) -> CompileError {
        CompileError::structural(msg, &self.options.file, self.line)
    }

    fn err_unsupported(&self, tag: &str) -> CompileError {
        CompileError::unsupported(tag, &self.options.file, self.line)
    }

    fn warn(&self, msg: &str) {
        crate::error::warning(msg, &self.options.file, self.line);
    }

    fn frag(&self, code: impl Into<String>) -> Fragment {
        Fragment::new(code, self.line)
    }

    /// Wraps statement-position fragments in an IIFE so they yield a value.
    fn iife(&self, inner: Frags, returns_nil: bool) -> Frags {
        let mut out = vec![self.frag("(function() { ")];
        out.extend(inner);
        let close = if returns_nil {
            format!("; return nil; }}).call({})", self.scope().self_ref())
        } else {
            format!(" }}).call({})", self.scope().self_ref())
        };
        out.push(self.frag(close));
        out
    }

    fn self_node(&self) -> Sexp {
        Sexp::node(NodeKind::SelfRef, self.line, [])
    }

    fn js_tmp(&self, text: impl Into<String>) -> Sexp {
        Sexp::node(NodeKind::JsTmp, self.line, [Sexp::Str(text.into())])
    }

    // ---- dispatcher --------------------------------------------------

    /// Emits one subtree at the given level. `Sexp::None` compiles as `nil`.
    fn process(&mut self, sexp: Sexp, level: Level) -> CompileResult<Frags> {
        let node = match sexp {
            Sexp::Node(node) => *node,
            Sexp::None => Node::new(NodeKind::Nil, self.line),
            _ => return Err(self.err("expected a node sexp")),
        };
        self.line = node.line;

        match node.kind {
            NodeKind::Nil => Ok(vec![self.frag("nil")]),
            NodeKind::True => Ok(vec![self.frag("true")]),
            NodeKind::False => Ok(vec![self.frag("false")]),
            NodeKind::SelfRef => Ok(vec![self.frag(self.scope().self_ref().to_owned())]),
            NodeKind::Lit => self.process_lit(node, level),
            NodeKind::Str => self.process_str(node, level),
            NodeKind::Dstr => self.process_dstr(node, level),
            NodeKind::Dsym => self.process_dsym(node, level),
            NodeKind::Dxstr => self.process_dxstr(node, level),
            NodeKind::Xstr => self.process_xstr(node, level),
            NodeKind::Dregx => self.process_dregx(node, level),
            NodeKind::Evstr => Err(self.err_unsupported("evstr")),
            NodeKind::Dot2 => self.process_dot(node, false),
            NodeKind::Dot3 => self.process_dot(node, true),
            NodeKind::Lvar => self.process_lvar(node, level),
            NodeKind::Lasgn => self.process_lasgn(node, level),
            NodeKind::Ivar => self.process_ivar(node, level),
            NodeKind::Iasgn => self.process_iasgn(node, level),
            NodeKind::Gvar => self.process_gvar(node, level),
            NodeKind::Gasgn => self.process_gasgn(node, level),
            NodeKind::NthRef => Ok(vec![self.frag("nil")]),
            NodeKind::Cvar => self.process_cvar(node, level),
            NodeKind::Cvasgn | NodeKind::Cvdecl => self.process_cvasgn(node, level),
            NodeKind::Const => self.process_const(node, level),
            NodeKind::Cdecl => self.process_cdecl(node, level),
            NodeKind::Colon2 => self.process_colon2(node, level),
            NodeKind::Colon3 => self.process_colon3(node, level),
            NodeKind::Masgn => self.process_masgn(node, level),
            NodeKind::Svalue | NodeKind::ToAry => self.process_passthrough(node, level),
            NodeKind::Attrasgn => self.process_attrasgn(node, level),
            NodeKind::OpAsgn1 => self.process_op_asgn1(node, level),
            NodeKind::OpAsgn2 => self.process_op_asgn2(node, level),
            NodeKind::OpAsgnOr => self.process_op_asgn_logic(node, level, NodeKind::Or),
            NodeKind::OpAsgnAnd => self.process_op_asgn_logic(node, level, NodeKind::And),
            NodeKind::Array => self.process_array(node, level),
            NodeKind::Hash => self.process_hash(node, level),
            NodeKind::Splat => self.process_splat(node, level),
            NodeKind::If => self.process_if(node, level),
            NodeKind::Case => self.process_case(node, level),
            NodeKind::When => self.process_when(node, level),
            NodeKind::While => self.process_while(node, level, false),
            NodeKind::Until => self.process_while(node, level, true),
            NodeKind::Break => self.process_break(node, level),
            NodeKind::Next => self.process_next(node, level),
            NodeKind::Redo => self.process_redo(node, level),
            NodeKind::Return => self.process_return(node, level),
            NodeKind::JsReturn => self.process_js_return(node, level),
            NodeKind::JsTmp => self.process_js_tmp(node, level),
            NodeKind::Yield => self.process_yield(node, level),
            NodeKind::ReturnableYield => self.process_returnable_yield(node, level),
            NodeKind::Yasgn => self.process_yasgn(node, level),
            NodeKind::And => self.process_and(node, level),
            NodeKind::Or => self.process_or(node, level),
            NodeKind::Not => self.process_not(node, level),
            NodeKind::Defined => self.process_defined(node, level),
            NodeKind::Class => self.process_class(node, level),
            NodeKind::Module => self.process_module(node, level),
            NodeKind::Sclass => self.process_sclass(node, level),
            NodeKind::Defn => self.process_defn(node, level),
            NodeKind::Defs => self.process_defs(node, level),
            NodeKind::Alias => self.process_alias(node, level),
            NodeKind::Undef => self.process_undef(node, level),
            NodeKind::Args => self.process_args(node, level),
            NodeKind::Scope => self.process_scope(node, level),
            NodeKind::Block => self.process_block(node, level),
            NodeKind::Call => self.process_call(node, level, None),
            NodeKind::Operator => self.process_operator(node, level),
            NodeKind::Iter => self.process_iter(node, level),
            NodeKind::BlockPass => self.process_block_pass(node, level),
            NodeKind::Arglist => self.process_arglist_node(node, level),
            NodeKind::Super => self.process_super(node, level),
            NodeKind::Zsuper => self.process_zsuper(node, level),
            NodeKind::Rescue => self.process_rescue(node, level),
            NodeKind::Resbody => self.process_resbody(node, level),
            NodeKind::Ensure => self.process_ensure(node, level),
        }
    }

    // ---- literals and atoms ------------------------------------------

    fn process_lit(&mut self, mut node: Node, level: Level) -> CompileResult<Frags> {
        match take(&mut node, 0) {
            Sexp::Int(value) => {
                let text = value.to_string();
                Ok(vec![self.frag(if level == Level::Recv {
                    format!("({text})")
                } else {
                    text
                })])
            }
            Sexp::Float(value) => {
                if !value.is_finite() {
                    return Err(self.err("Bad lit: non-finite float"));
                }
                let mut buffer = ryu::Buffer::new();
                let text = buffer.format(value).to_owned();
                Ok(vec![self.frag(if level == Level::Recv {
                    format!("({text})")
                } else {
                    text
                })])
            }
            Sexp::Sym(name) => Ok(vec![self.frag(js_quote(&name))]),
            Sexp::Regexp(source) => Ok(vec![self.frag(if source.is_empty() {
                "/^/".to_owned()
            } else {
                format!("/{source}/")
            })]),
            Sexp::Range { start, end, exclusive } => {
                self.helpers.insert(Helper::Range);
                Ok(vec![self.frag(format!("__range({start}, {end}, {exclusive})"))])
            }
            other => Err(self.err(format!("Bad lit: {other:?}"))),
        }
    }

    fn process_str(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let Sexp::Str(text) = take(&mut node, 0) else {
            return Err(self.err("Bad str part"));
        };
        if text == self.options.file {
            self.uses_file = true;
        }
        Ok(vec![self.frag(js_quote(&text))])
    }

    /// Compiles the parts of an interpolated construct, joined by ` + `.
    /// `quote` renders literal parts; `wrap` renders expression parts.
    fn interpolate(
        &mut self,
        node: Node,
        quote: impl Fn(&str) -> String,
        wrap: impl Fn(&mut Self, Sexp) -> CompileResult<Frags>,
        bad: &'static str,
    ) -> CompileResult<Frags> {
        let line = node.line;
        let mut out: Frags = vec![];
        for part in node.children {
            if !out.is_empty() {
                out.push(Fragment::new(" + ", line));
            }
            match part {
                Sexp::Str(text) => out.push(Fragment::new(quote(&text), line)),
                Sexp::Node(inner) if inner.kind == NodeKind::Str => {
                    let mut inner = *inner;
                    let Sexp::Str(text) = take(&mut inner, 0) else {
                        return Err(self.err(bad));
                    };
                    out.push(Fragment::new(quote(&text), inner.line));
                }
                Sexp::Node(inner) if inner.kind == NodeKind::Evstr => {
                    let mut inner = *inner;
                    let expr = take(&mut inner, 0);
                    out.extend(wrap(self, expr)?);
                }
                _ => return Err(self.err(bad)),
            }
        }
        Ok(out)
    }

    fn process_dstr(&mut self, node: Node, _level: Level) -> CompileResult<Frags> {
        self.interpolate(
            node,
            js_quote,
            |c, expr| {
                let line = c.line;
                let mut out = vec![Fragment::new("(", line)];
                out.extend(c.process(expr, Level::Expr)?);
                out.push(Fragment::new(")", line));
                Ok(out)
            },
            "Bad dstr part",
        )
    }

    fn process_dsym(&mut self, node: Node, _level: Level) -> CompileResult<Frags> {
        self.interpolate(
            node,
            js_quote,
            |c, expr| {
                let line = c.line;
                let call = Sexp::node(
                    NodeKind::Call,
                    line,
                    [
                        expr,
                        Sexp::name("to_s"),
                        Sexp::node(NodeKind::Arglist, line, []),
                    ],
                );
                c.process(call, Level::Expr)
            },
            "Bad dsym part",
        )
    }

    fn process_dxstr(&mut self, node: Node, level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let mut has_semicolon = false;
        let mut out: Frags = vec![];
        for part in node.children {
            match part {
                Sexp::Str(text) => {
                    has_semicolon |= text.contains(';');
                    out.push(Fragment::new(text, line));
                }
                Sexp::Node(inner) if inner.kind == NodeKind::Str => {
                    let mut inner = *inner;
                    let Sexp::Str(text) = take(&mut inner, 0) else {
                        return Err(self.err("Bad dxstr part"));
                    };
                    has_semicolon |= text.contains(';');
                    out.push(Fragment::new(text, inner.line));
                }
                Sexp::Node(inner) if inner.kind == NodeKind::Evstr => {
                    let mut inner = *inner;
                    let expr = take(&mut inner, 0);
                    out.extend(self.process(expr, Level::Expr)?);
                }
                _ => return Err(self.err("Bad dxstr part")),
            }
        }
        if level == Level::Stmt && !has_semicolon {
            out.push(Fragment::new(";", line));
        }
        Ok(out)
    }

    fn process_xstr(&mut self, mut node: Node, level: Level) -> CompileResult<Frags> {
        let Sexp::Str(mut code) = take(&mut node, 0) else {
            return Err(self.err("Bad xstr part"));
        };
        if level == Level::Stmt && !code.contains(';') {
            code.push(';');
        }
        Ok(vec![self.frag(if level == Level::Recv {
            format!("({code})")
        } else {
            code
        })])
    }

    fn process_dregx(&mut self, node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let mut out = vec![Fragment::new("(new RegExp(", line)];
        let parts = self.interpolate(
            node,
            js_quote,
            |c, expr| c.process(expr, Level::Expr),
            "Bad dregx part",
        )?;
        out.extend(parts);
        out.push(Fragment::new("))", line));
        Ok(out)
    }

    fn process_dot(&mut self, mut node: Node, exclusive: bool) -> CompileResult<Frags> {
        self.helpers.insert(Helper::Range);
        let start = take(&mut node, 0);
        let end = take(&mut node, 1);
        let mut out = vec![self.frag("__range(")];
        out.extend(self.process(start, Level::Expr)?);
        out.push(self.frag(", "));
        out.extend(self.process(end, Level::Expr)?);
        out.push(self.frag(format!(", {exclusive})")));
        Ok(out)
    }

    // ---- variables ---------------------------------------------------

    fn process_lvar(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let name = self.name_child(&mut node, 0)?;
        let name = mangle::lvar_to_js(&name);
        if self.options.irb && self.scope().top() {
            return self.with_temp(|c, tmp| {
                Ok(vec![c.frag(format!("(({tmp} = Opal.irb_vars.{name}) == null ? nil : {tmp})"))])
            });
        }
        Ok(vec![self.frag(name)])
    }

    fn process_lasgn(&mut self, mut node: Node, level: Level) -> CompileResult<Frags> {
        let name = self.name_child(&mut node, 0)?;
        let rhs = take(&mut node, 1);
        let name = mangle::lvar_to_js(&name);
        if self.options.irb && self.scope().top() {
            let mut out = vec![self.frag(format!("Opal.irb_vars.{name} = "))];
            out.extend(self.process(rhs, Level::Expr)?);
            return Ok(out);
        }
        self.scope_mut().add_local(&name);
        let mut out = vec![self.frag(format!("{name} = "))];
        out.extend(self.process(rhs, Level::Expr)?);
        if level == Level::Recv {
            out.insert(0, self.frag("("));
            out.push(self.frag(")"));
        }
        Ok(out)
    }

    fn process_ivar(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let accessor = self.ivar_accessor_child(&mut node)?;
        let slf = self.scope().self_ref().to_owned();
        self.scope_mut().add_ivar(accessor.clone());
        Ok(vec![self.frag(format!("{slf}{accessor}"))])
    }

    fn process_iasgn(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let accessor = self.ivar_accessor_child(&mut node)?;
        let rhs = take(&mut node, 1);
        let slf = self.scope().self_ref().to_owned();
        self.scope_mut().add_ivar(accessor.clone());
        let mut out = vec![self.frag(format!("{slf}{accessor} = "))];
        out.extend(self.process(rhs, Level::Expr)?);
        Ok(out)
    }

    fn ivar_accessor_child(&mut self, node: &mut Node) -> CompileResult<String> {
        let name = self.name_child(node, 0)?;
        let name = name.strip_prefix('@').unwrap_or(&name);
        Ok(mangle::ivar_accessor(name))
    }

    fn process_gvar(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let name = self.name_child(&mut node, 0)?;
        let name = name.strip_prefix('$').unwrap_or(&name).to_owned();
        self.helpers.insert(Helper::Gvars);
        Ok(vec![self.frag(format!("__gvars[{}]", js_quote(&name)))])
    }

    fn process_gasgn(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let name = self.name_child(&mut node, 0)?;
        let rhs = take(&mut node, 1);
        let name = name.strip_prefix('$').unwrap_or(&name).to_owned();
        self.helpers.insert(Helper::Gvars);
        let mut out = vec![self.frag(format!("__gvars[{}] = ", js_quote(&name)))];
        out.extend(self.process(rhs, Level::Expr)?);
        Ok(out)
    }

    fn process_cvar(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let name = self.name_child(&mut node, 0)?;
        self.with_temp(|c, tmp| {
            Ok(vec![c.frag(format!(
                "(({tmp} = Opal.cvars[{}]) == null ? nil : {tmp})",
                js_quote(&name)
            ))])
        })
    }

    fn process_cvasgn(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let name = self.name_child(&mut node, 0)?;
        let rhs = take(&mut node, 1);
        let mut out = vec![self.frag(format!("(Opal.cvars[{}] = ", js_quote(&name)))];
        out.extend(self.process(rhs, Level::Expr)?);
        out.push(self.frag(")"));
        Ok(out)
    }

    fn process_const(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let name = self.name_child(&mut node, 0)?;
        if self.options.const_missing {
            self.with_temp(|c, tmp| {
                Ok(vec![c.frag(format!(
                    "(({tmp} = __scope.{name}) == null ? __opal.cm({}) : {tmp})",
                    js_quote(&name)
                ))])
            })
        } else {
            Ok(vec![self.frag(format!("__scope.{name}"))])
        }
    }

    fn process_cdecl(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let name = self.name_child(&mut node, 0)?;
        let rhs = take(&mut node, 1);
        let mut out = vec![self.frag(format!("__scope.{name} = "))];
        out.extend(self.process(rhs, Level::Expr)?);
        Ok(out)
    }

    fn process_colon2(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let base = take(&mut node, 0);
        let name = self.name_child(&mut node, 1)?;
        let base = self.process(base, Level::Expr)?;
        if self.options.const_missing {
            self.with_temp(|c, tmp| {
                let mut out = vec![c.frag(format!("(({tmp} = ("))];
                out.extend(base);
                out.push(c.frag(format!(
                    ")._scope.{name}) == null ? __opal.cm({}) : {tmp})",
                    js_quote(&name)
                )));
                Ok(out)
            })
        } else {
            let mut out = vec![self.frag("(")];
            out.extend(base);
            out.push(self.frag(format!(")._scope.{name}")));
            Ok(out)
        }
    }

    fn process_colon3(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let name = self.name_child(&mut node, 0)?;
        if self.options.const_missing {
            self.with_temp(|c, tmp| {
                Ok(vec![c.frag(format!(
                    "(({tmp} = __opal.Object._scope.{name}) == null ? __opal.cm({}) : {tmp})",
                    js_quote(&name)
                ))])
            })
        } else {
            Ok(vec![self.frag(format!("__opal.Object._scope.{name}"))])
        }
    }

    fn process_passthrough(&mut self, mut node: Node, level: Level) -> CompileResult<Frags> {
        let inner = take(&mut node, 0);
        self.process(inner, level)
    }

    fn process_js_tmp(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        match take(&mut node, 0) {
            Sexp::Str(text) | Sexp::Name(text) => Ok(vec![self.frag(text)]),
            _ => Err(self.err("Bad js_tmp")),
        }
    }

    fn process_js_return(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let value = take(&mut node, 0);
        let mut out = vec![self.frag("return ")];
        out.extend(self.process(value, Level::Expr)?);
        Ok(out)
    }

    // ---- truthiness and logic ----------------------------------------

    /// Peephole classification of how a test expression can be compiled.
    fn truthy_shape(sexp: &Sexp) -> TruthyShape {
        match sexp {
            Sexp::Node(node) if node.kind == NodeKind::Call => {
                if let Some(Sexp::Name(mid)) = node.children.get(1)
                    && matches!(mid.as_str(), "block_given?" | "<" | ">" | "<=" | ">=" | "==")
                {
                    return TruthyShape::Direct;
                }
                TruthyShape::Temp
            }
            Sexp::Node(node) if node.kind == NodeKind::Operator => {
                if let Some(Sexp::Name(op)) = node.children.first()
                    && matches!(op.as_str(), "<" | ">" | "<=" | ">=" | "==")
                {
                    return TruthyShape::Direct;
                }
                TruthyShape::Temp
            }
            Sexp::Node(node) if matches!(node.kind, NodeKind::Lvar | NodeKind::SelfRef) => TruthyShape::Repeat,
            _ => TruthyShape::Temp,
        }
    }

    /// Peephole paths of [`Self::js_truthy`]: tests that are already JS
    /// booleans compile directly, bare lvar/self reads are re-read instead
    /// of bound to a temp. Returns `None` when no shortcut applies.
    fn js_truthy_optimize(&mut self, sexp: &Sexp) -> CompileResult<Option<Frags>> {
        match Self::truthy_shape(sexp) {
            TruthyShape::Direct => Ok(Some(self.process(sexp.clone(), Level::Expr)?)),
            TruthyShape::Repeat => {
                let first = self.process(sexp.clone(), Level::Expr)?;
                let second = self.process(sexp.clone(), Level::Expr)?;
                let mut out = first;
                out.push(self.frag(" !== false && "));
                out.extend(second);
                out.push(self.frag(" !== nil"));
                Ok(Some(out))
            }
            TruthyShape::Temp => Ok(None),
        }
    }

    /// Compiles `sexp` as a JavaScript condition implementing the source
    /// language's truthiness (`false` and `nil` are false).
    fn js_truthy(&mut self, sexp: Sexp) -> CompileResult<Frags> {
        if let Some(optimized) = self.js_truthy_optimize(&sexp)? {
            return Ok(optimized);
        }
        self.with_temp(|c, tmp| {
            let mut out = vec![c.frag(format!("({tmp} = "))];
            out.extend(c.process(sexp, Level::Expr)?);
            out.push(c.frag(format!(") !== false && {tmp} !== nil")));
            Ok(out)
        })
    }

    /// Compiles `sexp` as the negated condition.
    fn js_falsy(&mut self, sexp: Sexp) -> CompileResult<Frags> {
        if let Sexp::Node(node) = &sexp
            && node.kind == NodeKind::Call
            && matches!(node.children.get(1), Some(Sexp::Name(mid)) if mid == "block_given?")
        {
            let line = self.line;
            let negated = Sexp::node(NodeKind::Not, line, [sexp]);
            return self.process(negated, Level::Expr);
        }
        self.with_temp(|c, tmp| {
            let mut out = vec![c.frag(format!("({tmp} = "))];
            out.extend(c.process(sexp, Level::Expr)?);
            out.push(c.frag(format!(") === false || {tmp} === nil")));
            Ok(out)
        })
    }

    fn process_and(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let lhs = take(&mut node, 0);
        let rhs = take(&mut node, 1);
        if Self::truthy_shape(&lhs) != TruthyShape::Temp {
            return self.with_temp(|c, tmp| {
                let optimized = c
                    .js_truthy_optimize(&lhs)?
                    .expect("non-temp shapes always optimize");
                let mut out = vec![c.frag(format!("(({tmp} = "))];
                out.extend(optimized);
                out.push(c.frag(") ? "));
                out.extend(c.process(rhs, Level::Expr)?);
                out.push(c.frag(format!(" : {tmp})")));
                Ok(out)
            });
        }
        self.with_temp(|c, tmp| {
            let mut out = vec![c.frag(format!("({tmp} = "))];
            out.extend(c.process(lhs, Level::Expr)?);
            out.push(c.frag(format!(", {tmp} !== false && {tmp} !== nil ? ")));
            out.extend(c.process(rhs, Level::Expr)?);
            out.push(c.frag(format!(" : {tmp})")));
            Ok(out)
        })
    }

    fn process_or(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let lhs = take(&mut node, 0);
        let rhs = take(&mut node, 1);
        self.with_temp(|c, tmp| {
            let mut out = vec![c.frag(format!("(({tmp} = "))];
            out.extend(c.process(lhs, Level::Expr)?);
            out.push(c.frag(format!(") !== false && {tmp} !== nil ? {tmp} : ")));
            out.extend(c.process(rhs, Level::Expr)?);
            out.push(c.frag(")"));
            Ok(out)
        })
    }

    fn process_not(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let value = take(&mut node, 0);
        self.with_temp(|c, tmp| {
            let mut out = vec![c.frag(format!("({tmp} = "))];
            out.extend(c.process(value, Level::Expr)?);
            out.push(c.frag(format!(", ({tmp} === false || {tmp} === nil))")));
            Ok(out)
        })
    }

    fn process_defined(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let part = take(&mut node, 0);
        let Sexp::Node(part) = part else {
            return Err(self.err("bad defined? part"));
        };
        let mut part = *part;
        match part.kind {
            NodeKind::SelfRef => Ok(vec![self.frag(js_quote("self"))]),
            NodeKind::Nil | NodeKind::True | NodeKind::False => Ok(vec![self.frag(js_quote("expression"))]),
            NodeKind::Lvar => Ok(vec![self.frag(js_quote("local-variable"))]),
            NodeKind::Ivar => {
                let accessor = self.ivar_accessor_child(&mut part)?;
                self.with_temp(|c, tmp| {
                    Ok(vec![c.frag(format!(
                        "(({tmp} = self{accessor}, {tmp} != null && {tmp} !== nil) ? \"instance-variable\" : nil)"
                    ))])
                })
            }
            NodeKind::Call => {
                let recv = take(&mut part, 0);
                let mid = self.name_child(&mut part, 1)?;
                let jsid = mangle::mid_to_jsid(&mid);
                let recv = match recv {
                    Sexp::None => self.self_node(),
                    other => other,
                };
                let mut out = vec![self.frag("(")];
                out.extend(self.process(recv, Level::Expr)?);
                out.push(self.frag(format!("{jsid} ? \"method\" : nil)")));
                Ok(out)
            }
            NodeKind::Const => {
                let name = self.name_child(&mut part, 0)?;
                Ok(vec![self.frag(format!("(__scope.{name} != null ? \"constant\" : nil)"))])
            }
            NodeKind::Xstr => {
                let Sexp::Str(code) = take(&mut part, 0) else {
                    return Err(self.err("Bad xstr part"));
                };
                Ok(vec![self.frag(format!("(typeof({code}) !== \"undefined\")"))])
            }
            other => Err(self.err(format!("bad defined? part: {other}"))),
        }
    }

    // ---- shared child extraction -------------------------------------

    /// Pulls a name-bearing child (`Name` or `Sym`, or a `lit` holding one).
    fn name_child(&self, node: &mut Node, idx: usize) -> CompileResult<String> {
        match take(node, idx) {
            Sexp::Name(name) | Sexp::Sym(name) => Ok(name),
            Sexp::Node(inner) if inner.kind == NodeKind::Lit => {
                let mut inner = *inner;
                match take(&mut inner, 0) {
                    Sexp::Sym(name) => Ok(name),
                    _ => Err(self.err(format!("expected a name in {} node", node.kind))),
                }
            }
            _ => Err(self.err(format!("expected a name in {} node", node.kind))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TruthyShape {
    /// The expression already evaluates to a JS boolean; emit it directly.
    Direct,
    /// A cheap re-readable reference; emit `x !== false && x !== nil`.
    Repeat,
    /// Bind to a temp and test the temp.
    Temp,
}

/// Removes and returns child `idx`, leaving `Sexp::None` in its place.
/// Out-of-range children read as absent.
pub(crate) fn take(node: &mut Node, idx: usize) -> Sexp {
    if idx < node.children.len() {
        std::mem::replace(&mut node.children[idx], Sexp::None)
    } else {
        Sexp::None
    }
}

/// Quotes a string as a JavaScript string literal. JSON escaping rules are a
/// subset of JavaScript's, so the serialized form splices in verbatim.
pub(crate) fn js_quote(text: &str) -> String {
    serde_json::to_string(text).expect("string quoting cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helper_order_is_seeded_then_alphabetical() {
        let names: Vec<String> = HELPER_ORDER.iter().map(ToString::to_string).collect();
        assert_eq!(names[..2], ["breaker", "slice"]);
        let rest = names[2..].to_vec();
        let mut sorted = rest.clone();
        sorted.sort();
        assert_eq!(rest, sorted);
    }

    #[test]
    fn js_quote_produces_valid_js_literals() {
        assert_eq!(js_quote("hello"), "\"hello\"");
        assert_eq!(js_quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(js_quote("line\nbreak"), "\"line\\nbreak\"");
    }

    #[test]
    fn default_options_match_the_documented_table() {
        let options = CompileOptions::default();
        assert_eq!(options.file, "(file)");
        assert!(options.source_file.is_none());
        assert!(options.method_missing);
        assert!(options.optimized_operators);
        assert!(!options.arity_check);
        assert!(options.const_missing);
        assert!(!options.irb);
        assert!(options.source_map_enabled);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: CompileOptions = serde_json::from_str(r#"{"file": "main.rb", "irb": true}"#).expect("valid json");
        assert_eq!(options.file, "main.rb");
        assert!(options.irb);
        assert!(options.method_missing, "unset fields keep their defaults");
    }
}
