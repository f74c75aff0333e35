//! Definition emitters: classes, modules, singleton classes, methods,
//! aliasing, statement sequences and the inline-yield lift.

use super::{Compiler, Frags, Helper, js_quote, take};
use crate::{
    error::CompileResult,
    fragment::Fragment,
    mangle,
    scope::ScopeKind,
    sexp::{Level, Node, NodeKind, Sexp, lift_returns},
};

impl Compiler {
    /// Body wrapper of class/module/def constructs. Method and top-level
    /// bodies are return-lifted; class and module bodies are not.
    pub(super) fn process_scope(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let body = take(&mut node, 0);
        let body = if self.scope().class_scope() {
            body
        } else {
            lift_returns(body, line)
        };
        self.process(body, Level::Stmt)
    }

    /// A statement sequence. Performs the inline-yield lift per statement
    /// and appends semicolons to expression statements.
    pub(super) fn process_block(&mut self, node: Node, level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let mut stmts = node.children.into_vec();
        if stmts.is_empty() {
            stmts.push(Sexp::node(NodeKind::Nil, line, []));
        }

        let join = format!("\n{}", self.indent);
        let mut out: Frags = vec![];
        for mut stmt in stmts {
            if !out.is_empty() {
                out.push(Fragment::synthetic(join.clone()));
            }
            if let Some(yasgn) = self.find_inline_yield(&mut stmt) {
                out.extend(self.process(yasgn, level)?);
                out.push(Fragment::synthetic(";"));
                out.push(Fragment::synthetic(join.clone()));
            }
            let expr = is_expression(&stmt) && level < Level::List;
            out.extend(self.process(stmt, level)?);
            if expr {
                out.push(Fragment::synthetic(";"));
            }
        }
        Ok(out)
    }

    /// Finds a `yield` buried in an array or call argument list of `stmt`,
    /// replaces it in place with a reference to `__yielded`, and returns the
    /// `yasgn` statement to emit beforehand. One lift per statement.
    fn find_inline_yield(&mut self, stmt: &mut Sexp) -> Option<Sexp> {
        let Sexp::Node(node) = stmt else {
            return None;
        };
        let line = node.line;
        let found = match node.kind {
            NodeKind::JsReturn => {
                let inner = node.children.first_mut()?;
                return self.find_inline_yield(inner);
            }
            NodeKind::Array => swap_first_yield(&mut node.children),
            NodeKind::Call => match node.children.get_mut(2) {
                Some(Sexp::Node(arglist)) if arglist.kind == NodeKind::Arglist => {
                    swap_first_yield(&mut arglist.children)
                }
                _ => None,
            },
            _ => None,
        }?;

        if !self.scope().has_temp("__yielded") {
            self.scope_mut().add_temp("__yielded");
        }
        Some(Sexp::node(
            NodeKind::Yasgn,
            line,
            [Sexp::name("__yielded"), found],
        ))
    }

    // ---- classes and modules -----------------------------------------

    pub(super) fn process_class(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let cid = take(&mut node, 0);
        let sup = take(&mut node, 1);
        let mut body = take(&mut node, 2);

        self.helpers.insert(Helper::Klass);
        let (base_frags, name) = self.class_base_and_name(cid)?;
        let sup_frags = match sup {
            Sexp::None => vec![Fragment::new("null", line)],
            other => self.process(other, Level::Expr)?,
        };
        ensure_trailing_nil(&mut body);

        let ((body_frags, vars, donate), _scope) = self.indented(|c| {
            c.in_scope(ScopeKind::Class, |c| {
                c.scope_mut().name = Some(name.clone());
                c.scope_mut().donates_methods = true;
                c.scope_mut().add_temp(format!("def = {name}.prototype"));
                c.scope_mut().add_temp(format!("__scope = {name}._scope"));
                let body_frags = c.process(body, Level::Stmt)?;
                let vars = c.scope().var_line(&c.indent);
                let donate = c.scope().donate_methods();
                Ok((body_frags, vars, donate))
            })
        })?;

        let spacer = format!("\n{}{}", self.indent, super::INDENT);
        let inner = format!("{}{}", self.indent, super::INDENT);
        let mut out = vec![Fragment::new(
            format!(
                "(function(__base, __super){{{spacer}function {name}() {{}};{spacer}{name} = \
                 __klass(__base, __super, {}, {name});\n",
                js_quote(&name)
            ),
            line,
        )];
        out.push(Fragment::synthetic(format!("{inner}{vars}\n\n{inner}")));
        out.extend(body_frags);
        if !donate.is_empty() {
            out.push(Fragment::new(format!("\n{inner}{donate}"), line));
        }
        out.push(Fragment::new(format!("\n{}}})(", self.indent), line));
        out.extend(base_frags);
        out.push(Fragment::new(", ", line));
        out.extend(sup_frags);
        out.push(Fragment::new(")", line));
        Ok(out)
    }

    pub(super) fn process_module(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let cid = take(&mut node, 0);
        let mut body = take(&mut node, 1);

        self.helpers.insert(Helper::Module);
        let (base_frags, name) = self.class_base_and_name(cid)?;
        ensure_trailing_nil(&mut body);

        let ((body_frags, vars, donate), _scope) = self.indented(|c| {
            c.in_scope(ScopeKind::Module, |c| {
                c.scope_mut().name = Some(name.clone());
                c.scope_mut().donates_methods = true;
                c.scope_mut().add_temp(format!("def = {name}.prototype"));
                c.scope_mut().add_temp(format!("__scope = {name}._scope"));
                let body_frags = c.process(body, Level::Stmt)?;
                let vars = c.scope().var_line(&c.indent);
                let donate = c.scope().donate_methods();
                Ok((body_frags, vars, donate))
            })
        })?;

        let spacer = format!("\n{}{}", self.indent, super::INDENT);
        let inner = format!("{}{}", self.indent, super::INDENT);
        let mut out = vec![Fragment::new(
            format!(
                "(function(__base){{{spacer}function {name}() {{}};{spacer}{name} = \
                 __module(__base, {}, {name});\n",
                js_quote(&name)
            ),
            line,
        )];
        out.push(Fragment::synthetic(format!("{inner}{vars}\n\n{inner}")));
        out.extend(body_frags);
        if !donate.is_empty() {
            out.push(Fragment::new(format!("\n{inner}{donate}"), line));
        }
        out.push(Fragment::new(format!("\n{}}})(", self.indent), line));
        out.extend(base_frags);
        out.push(Fragment::new(")", line));
        Ok(out)
    }

    /// Resolves a class/module path child into the base expression and the
    /// declared name: a bare name opens on `self`, `colon2` on its lhs,
    /// `colon3` on the root object.
    fn class_base_and_name(&mut self, cid: Sexp) -> CompileResult<(Frags, String)> {
        match cid {
            Sexp::Name(name) => {
                let slf = self.self_node();
                Ok((self.process(slf, Level::Expr)?, name))
            }
            Sexp::Node(mut path) if path.kind == NodeKind::Colon2 => {
                let base = take(&mut path, 0);
                let name = self.name_child(&mut path, 1)?;
                Ok((self.process(base, Level::Expr)?, name))
            }
            Sexp::Node(mut path) if path.kind == NodeKind::Colon3 => {
                let name = self.name_child(&mut path, 0)?;
                Ok((vec![self.frag("__opal.Object")], name))
            }
            _ => Err(self.err("Bad receiver in class")),
        }
    }

    pub(super) fn process_sclass(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let recv = take(&mut node, 0);
        let body = take(&mut node, 1);

        let recv_frags = self.process(recv, Level::Expr)?;
        let ((body_frags, vars), _scope) = self.indented(|c| {
            c.in_scope(ScopeKind::Sclass, |c| {
                c.scope_mut().add_temp("self = this");
                c.scope_mut().add_temp("def = self.prototype");
                c.scope_mut().add_temp("__scope = self._scope");
                let body_frags = c.process(body, Level::Stmt)?;
                Ok((body_frags, c.scope().var_line(&c.indent)))
            })
        })?;

        let inner = format!("{}{}", self.indent, super::INDENT);
        let mut out = vec![Fragment::new("(function() {\n", line)];
        out.push(Fragment::synthetic(format!("{inner}{vars}\n{inner}")));
        out.extend(body_frags);
        out.push(Fragment::new(
            format!("\n{}}}).call(__opal.singleton(", self.indent),
            line,
        ));
        out.extend(recv_frags);
        out.push(Fragment::new("))", line));
        Ok(out)
    }

    // ---- method definition -------------------------------------------

    pub(super) fn process_defn(&mut self, mut node: Node, level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let mid = self.name_child(&mut node, 0)?;
        let args = take(&mut node, 1);
        let body = take(&mut node, 2);
        self.js_def(None, mid, args, body, line, level)
    }

    pub(super) fn process_defs(&mut self, mut node: Node, level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let recv = take(&mut node, 0);
        let mid = self.name_child(&mut node, 1)?;
        let args = take(&mut node, 2);
        let body = take(&mut node, 3);
        self.js_def(Some(recv), mid, args, body, line, level)
    }

    fn js_def(
        &mut self,
        recv: Option<Sexp>,
        mid: String,
        args: Sexp,
        body: Sexp,
        line: u32,
        _level: Level,
    ) -> CompileResult<Frags> {
        let jsid = mangle::mid_to_jsid(&mid);
        let Sexp::Node(args_node) = args else {
            return Err(self.err("bad method parameter list"));
        };
        let mut params = args_node.children.into_vec();

        // trailing pieces come off in reverse source order:
        // default-assignments block, &block, *splat
        let opt_defaults = match params.last() {
            Some(Sexp::Node(node)) if node.kind == NodeKind::Block => {
                let Some(Sexp::Node(block)) = params.pop() else { unreachable!() };
                Some(*block)
            }
            _ => None,
        };
        let mut block_name = None;
        if let Some(Sexp::Name(name)) = params.last()
            && let Some(stripped) = name.strip_prefix('&')
        {
            block_name = Some(mangle::lvar_to_js(stripped));
            params.pop();
        }
        let mut splat_name = None;
        let mut anonymous_splat = false;
        if let Some(Sexp::Name(name)) = params.last()
            && let Some(stripped) = name.strip_prefix('*')
        {
            if stripped.is_empty() {
                anonymous_splat = true;
            } else {
                splat_name = Some(mangle::lvar_to_js(stripped));
            }
            params.pop();
        }
        let argc = params.len();
        let opt_count = opt_defaults.as_ref().map_or(0, |block| block.children.len());
        let variadic = splat_name.is_some() || anonymous_splat || opt_count > 0;

        let mut smethod = false;
        let recv_frags = match recv {
            Some(r) => {
                self.scope_mut().defines_defs = true;
                if self.scope().class_scope() && r.is_kind(NodeKind::SelfRef) {
                    smethod = true;
                }
                Some(self.process(r, Level::Expr)?)
            }
            None => {
                self.scope_mut().defines_defn = true;
                None
            }
        };
        let is_defs = recv_frags.is_some();

        let (pieces, _def_scope) = self.indented(|c| {
            c.in_scope(ScopeKind::Def, |c| {
                c.scope_mut().mid = Some(mid.clone());
                c.scope_mut().defs = is_defs;
                c.scope_mut().add_temp("self = this");
                if let Some(name) = &block_name {
                    c.scope_mut().block_name = Some(name.clone());
                    c.scope_mut().uses_block = true;
                    c.identify();
                } else {
                    c.scope_mut().block_name = Some("__yield".to_owned());
                }

                let mut names: Vec<String> = vec![];
                for param in params {
                    let Sexp::Name(name) = param else {
                        return Err(c.err("bad method parameter"));
                    };
                    let name = mangle::lvar_to_js(&name);
                    c.scope_mut().add_arg(name.clone());
                    names.push(name);
                }
                if let Some(splat) = &splat_name {
                    c.scope_mut().add_arg(splat.clone());
                    names.push(splat.clone());
                }
                let params_text = names.join(", ");

                let body_frags = c.process(body, Level::Stmt)?;

                let mut defaults: Vec<Frags> = vec![];
                if let Some(block) = opt_defaults {
                    for assign in block.children {
                        let Sexp::Node(assign) = assign else {
                            return Err(c.err("bad default parameter"));
                        };
                        if assign.kind != NodeKind::Lasgn {
                            return Err(c.err("bad default parameter"));
                        }
                        if default_is_undefined(&assign) {
                            continue;
                        }
                        let Some(Sexp::Name(raw)) = assign.children.first() else {
                            return Err(c.err("bad default parameter"));
                        };
                        let id = mangle::lvar_to_js(raw);
                        let mut chunk = vec![Fragment::new(
                            format!("if ({id} == null) {{\n{}{}", c.indent, super::INDENT),
                            line,
                        )];
                        chunk.extend(c.process(Sexp::Node(assign), Level::Expr)?);
                        chunk.push(Fragment::new(format!("\n{}}}", c.indent), line));
                        defaults.push(chunk);
                    }
                }

                let splat_code = splat_name
                    .clone()
                    .map(|splat| format!("{splat} = __slice.call(arguments, {argc});"));

                let block_setup = if c.scope().uses_block {
                    let id = c.identify();
                    let yielder = c.scope().block_name.clone().expect("def scopes bind a block name");
                    c.scope_mut().add_temp(yielder.clone());
                    Some(format!("{yielder} = {id}._p || nil, {id}._p = null;"))
                } else {
                    None
                };

                let uses_super = c.scope().uses_super.clone();
                let vars = c.scope().var_line(&c.indent);
                let identity = c.scope().identity.clone();
                Ok((params_text, body_frags, defaults, splat_code, block_setup, uses_super, vars, identity))
            })
        })?;
        let (params_text, body_frags, defaults, splat_code, block_setup, uses_super, vars, identity) = pieces;

        let arity_code = if self.options.arity_check {
            let required = argc - opt_count;
            if variadic {
                let negative = -(i64::try_from(required).expect("arity fits i64") + 1);
                Some(format!(
                    "var $arity = arguments.length; if ($arity < {required}) {{ __opal.ac($arity, {negative}, this, {}); }}",
                    js_quote(&mid)
                ))
            } else {
                Some(format!(
                    "var $arity = arguments.length; if ($arity !== {argc}) {{ __opal.ac($arity, {argc}, this, {}); }}",
                    js_quote(&mid)
                ))
            }
        } else {
            None
        };

        let inner = format!("{}{}", self.indent, super::INDENT);
        let mut defcode: Frags = vec![];
        let head = match &identity {
            Some(id) => format!("{id} = function({params_text}) {{\n"),
            None => format!("function({params_text}) {{\n"),
        };
        defcode.push(Fragment::new(head, line));
        defcode.push(Fragment::synthetic(format!("{inner}{vars}")));
        if let Some(arity) = arity_code {
            defcode.push(Fragment::new(format!("\n{inner}{arity}"), line));
        }
        if let Some(setup) = block_setup {
            defcode.push(Fragment::new(format!("\n{inner}{setup}"), line));
        }
        for chunk in defaults {
            defcode.push(Fragment::synthetic(format!("\n{inner}")));
            defcode.extend(chunk);
        }
        if let Some(splat) = splat_code {
            defcode.push(Fragment::new(format!("\n{inner}{splat}"), line));
        }
        defcode.push(Fragment::synthetic(format!("\n{inner}")));
        defcode.extend(body_frags);
        defcode.push(Fragment::new(format!("\n{}}}", self.indent), line));

        let dollar_mid = js_quote(&format!("${mid}"));
        let mut out: Frags = vec![];
        if let Some(recv_frags) = recv_frags {
            debug_assert!(self.scope().defines_defs, "defs flag recorded before scope entry");
            if smethod {
                let cls = self.scope().name.clone().unwrap_or_else(|| "self".to_owned());
                out.push(Fragment::new(format!("__opal.defs({cls}, {dollar_mid}, "), line));
            } else {
                out.push(Fragment::new("__opal.defs(", line));
                out.extend(recv_frags);
                out.push(Fragment::new(format!(", {dollar_mid}, "), line));
            }
            out.extend(defcode);
            out.push(Fragment::new(")", line));
        } else if self.scope().class_scope() {
            self.scope_mut().add_method(&mid);
            if self.scope().name.as_deref() == Some("Object") {
                out.push(Fragment::new(format!("Object._defn({dollar_mid}, "), line));
                out.extend(defcode);
                out.push(Fragment::new(")", line));
            } else {
                if let Some(sid) = uses_super {
                    self.scope_mut().add_temp(sid.clone());
                    out.push(Fragment::new(format!("{sid} = def{jsid};\n{}", self.indent), line));
                }
                out.push(Fragment::new(format!("def{jsid} = "), line));
                out.extend(defcode);
            }
        } else {
            out.push(Fragment::new(format!("def{jsid} = "), line));
            out.extend(defcode);
        }
        Ok(out)
    }

    // ---- alias / undef / parameter lists -----------------------------

    pub(super) fn process_alias(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let new_name = self.name_child(&mut node, 0)?;
        let old_name = self.name_child(&mut node, 1)?;
        let new_jsid = mangle::mid_to_jsid(&new_name);
        let old_jsid = mangle::mid_to_jsid(&old_name);
        if self.scope().class_scope() {
            self.scope_mut().add_method(&new_name);
            Ok(vec![self.frag(format!("def{new_jsid} = def{old_jsid}"))])
        } else {
            let slf = self.scope().self_ref().to_owned();
            Ok(vec![self.frag(format!(
                "{slf}.prototype{new_jsid} = {slf}.prototype{old_jsid}"
            ))])
        }
    }

    pub(super) fn process_undef(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let name = self.name_child(&mut node, 0)?;
        let jsid = mangle::mid_to_jsid(&name);
        if self.scope().class_scope() {
            Ok(vec![self.frag(format!("delete def{jsid}"))])
        } else {
            let slf = self.scope().self_ref().to_owned();
            Ok(vec![self.frag(format!("delete {slf}.prototype{jsid}"))])
        }
    }

    /// A bare parameter list: mangles each name, registers it as an
    /// argument, emits the comma-joined list.
    pub(super) fn process_args(&mut self, node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let mut names: Vec<String> = vec![];
        for child in node.children {
            let Sexp::Name(name) = child else {
                return Err(self.err("bad parameter name"));
            };
            if name == "*" {
                continue;
            }
            let name = mangle::lvar_to_js(&name);
            self.scope_mut().add_arg(name.clone());
            names.push(name);
        }
        Ok(vec![Fragment::new(names.join(", "), line)])
    }
}

/// True when the statement kind carries its own termination and must not
/// get a semicolon appended by the block emitter.
fn is_expression(stmt: &Sexp) -> bool {
    !matches!(stmt.kind(), Some(NodeKind::Xstr | NodeKind::Dxstr | NodeKind::If))
}

/// Replaces the first `yield` child with a `__yielded` reference, returning
/// the extracted yield node.
fn swap_first_yield(children: &mut smallvec::SmallVec<[Sexp; 4]>) -> Option<Sexp> {
    for child in children {
        if child.is_kind(NodeKind::Yield) {
            let line = match child {
                Sexp::Node(node) => node.line,
                _ => unreachable!(),
            };
            let replacement = Sexp::node(NodeKind::JsTmp, line, [Sexp::Str("__yielded".to_owned())]);
            return Some(std::mem::replace(child, replacement));
        }
    }
    None
}

/// True when a default-parameter assignment's rhs is the literal
/// `undefined`, which means "leave the argument alone".
fn default_is_undefined(assign: &Node) -> bool {
    match assign.children.get(1) {
        Some(Sexp::Node(rhs)) if matches!(rhs.kind, NodeKind::Lvar | NodeKind::Const) => {
            matches!(rhs.children.first(), Some(Sexp::Name(name)) if name == "undefined")
        }
        _ => false,
    }
}

/// Appends a trailing `nil` statement to a class body whose last statement
/// is a method definition, so the wrapping function returns sensibly.
fn ensure_trailing_nil(body: &mut Sexp) {
    let Sexp::Node(scope_node) = body else { return };
    if scope_node.kind != NodeKind::Scope {
        return;
    }
    let Some(inner) = scope_node.children.first_mut() else {
        return;
    };
    match inner {
        Sexp::Node(block) if block.kind == NodeKind::Block => {
            let needs_nil = matches!(
                block.children.last().and_then(Sexp::kind),
                Some(NodeKind::Defn | NodeKind::Defs)
            );
            if needs_nil {
                let line = block.line;
                block.children.push(Sexp::node(NodeKind::Nil, line, []));
            }
        }
        Sexp::Node(single) if matches!(single.kind, NodeKind::Defn | NodeKind::Defs) => {
            let line = single.line;
            let old = std::mem::replace(inner, Sexp::None);
            *inner = Sexp::node(NodeKind::Block, line, [old, Sexp::node(NodeKind::Nil, line, [])]);
        }
        _ => {}
    }
}
