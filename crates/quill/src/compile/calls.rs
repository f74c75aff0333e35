//! Call dispatch and everything feeding it: argument-list compilation with
//! mid-list splats, array/hash literals, block literals, block passing and
//! the `super` family.

use indexmap::IndexMap;

use super::{Compiler, Frags, Helper, js_quote, take};
use crate::{
    error::CompileResult,
    fragment::Fragment,
    mangle,
    scope::ScopeKind,
    sexp::{Level, Node, NodeKind, Sexp, lift_returns},
};

impl Compiler {
    /// Compiles call-style arguments: a bare comma list when no splat is
    /// present, otherwise a `[fixed…].concat(splat).concat([more…])` chain
    /// suitable for `.apply`. Returns the fragments and whether a splat was
    /// seen.
    pub(super) fn compile_arglist(&mut self, children: Vec<Sexp>, line: u32) -> CompileResult<(Frags, bool)> {
        let mut code: Frags = vec![];
        let mut work: Frags = vec![];
        let mut has_splat = false;

        for child in children {
            if child.is_kind(NodeKind::Splat) {
                has_splat = true;
                let splat = self.process(child, Level::Expr)?;
                if work.is_empty() {
                    if code.is_empty() {
                        code.push(Fragment::new("[].concat(", line));
                    } else {
                        code.push(Fragment::new(".concat(", line));
                    }
                    code.extend(splat);
                    code.push(Fragment::new(")", line));
                } else {
                    if code.is_empty() {
                        code.push(Fragment::new("[", line));
                        code.append(&mut work);
                        code.push(Fragment::new("]", line));
                    } else {
                        code.push(Fragment::new(".concat([", line));
                        code.append(&mut work);
                        code.push(Fragment::new("])", line));
                    }
                    code.push(Fragment::new(".concat(", line));
                    code.extend(splat);
                    code.push(Fragment::new(")", line));
                }
            } else {
                if !work.is_empty() {
                    work.push(Fragment::new(", ", line));
                }
                work.extend(self.process(child, Level::Expr)?);
            }
        }

        if !work.is_empty() {
            if code.is_empty() {
                code = work;
            } else {
                code.push(Fragment::new(".concat([", line));
                code.append(&mut work);
                code.push(Fragment::new("])", line));
            }
        }
        Ok((code, has_splat))
    }

    /// Compiles an array literal, always bracketed; splat elements build a
    /// concatenation chain.
    pub(super) fn compile_array(&mut self, children: Vec<Sexp>, line: u32) -> CompileResult<Frags> {
        if children.is_empty() {
            return Ok(vec![Fragment::new("[]", line)]);
        }
        let mut code: Frags = vec![];
        let mut work: Frags = vec![];

        for child in children {
            if child.is_kind(NodeKind::Splat) {
                let splat = self.process(child, Level::Recv)?;
                if !work.is_empty() {
                    if code.is_empty() {
                        code.push(Fragment::new("[", line));
                        code.append(&mut work);
                        code.push(Fragment::new("]", line));
                    } else {
                        code.push(Fragment::new(".concat([", line));
                        code.append(&mut work);
                        code.push(Fragment::new("])", line));
                    }
                }
                if code.is_empty() {
                    code.push(Fragment::new("[].concat(", line));
                } else {
                    code.push(Fragment::new(".concat(", line));
                }
                code.extend(splat);
                code.push(Fragment::new(")", line));
            } else {
                if !work.is_empty() {
                    work.push(Fragment::new(", ", line));
                }
                work.extend(self.process(child, Level::Expr)?);
            }
        }

        if !work.is_empty() {
            if code.is_empty() {
                code.push(Fragment::new("[", line));
                code.append(&mut work);
                code.push(Fragment::new("]", line));
            } else {
                code.push(Fragment::new(".concat([", line));
                code.append(&mut work);
                code.push(Fragment::new("])", line));
            }
        }
        Ok(code)
    }

    pub(super) fn process_array(&mut self, node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        self.compile_array(node.children.into_vec(), line)
    }

    pub(super) fn process_splat(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let value = take(&mut node, 0);
        if matches!(value, Sexp::None) || value.is_kind(NodeKind::Nil) {
            return Ok(vec![self.frag("[]")]);
        }
        if value.is_kind(NodeKind::Lit) {
            let mut out = vec![self.frag("[")];
            out.extend(self.process(value, Level::Expr)?);
            out.push(self.frag("]"));
            return Ok(out);
        }
        self.process(value, Level::Recv)
    }

    pub(super) fn process_arglist_node(&mut self, node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let (frags, _) = self.compile_arglist(node.children.into_vec(), line)?;
        Ok(frags)
    }

    pub(super) fn process_hash(&mut self, node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let children = node.children.into_vec();
        if children.len() % 2 != 0 {
            return Err(self.err("hash literal with odd element count"));
        }

        let simple_keys = children
            .iter()
            .step_by(2)
            .all(|key| matches!(key.kind(), Some(NodeKind::Lit | NodeKind::Str)));

        if simple_keys {
            // known keys compile to the keyed fast-path constructor;
            // duplicate keys keep their first position, last value wins
            let mut entries: IndexMap<String, Frags> = IndexMap::new();
            let mut iter = children.into_iter();
            while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                let text = self.hash_key_text(key)?;
                let value = self.process(value, Level::Expr)?;
                entries.insert(text, value);
            }
            self.helpers.insert(Helper::Hash2);

            let key_list = entries
                .keys()
                .map(|k| js_quote(k))
                .collect::<Vec<_>>()
                .join(", ");
            let mut out = vec![Fragment::new(format!("__hash2([{key_list}], {{"), line)];
            for (idx, (key, value)) in entries.into_iter().enumerate() {
                if idx > 0 {
                    out.push(Fragment::new(", ", line));
                }
                let rendered = if mangle::valid_js_ident(&key) {
                    key
                } else {
                    js_quote(&key)
                };
                out.push(Fragment::new(format!("{rendered}: "), line));
                out.extend(value);
            }
            out.push(Fragment::new("})", line));
            Ok(out)
        } else {
            self.helpers.insert(Helper::Hash);
            let mut out = vec![Fragment::new("__hash(", line)];
            for (idx, child) in children.into_iter().enumerate() {
                if idx > 0 {
                    out.push(Fragment::new(", ", line));
                }
                out.extend(self.process(child, Level::Expr)?);
            }
            out.push(Fragment::new(")", line));
            Ok(out)
        }
    }

    fn hash_key_text(&mut self, key: Sexp) -> CompileResult<String> {
        let Sexp::Node(mut key) = key else {
            return Err(self.err("bad hash key"));
        };
        match key.kind {
            NodeKind::Lit => match take(&mut key, 0) {
                Sexp::Sym(name) => Ok(name),
                Sexp::Int(value) => Ok(value.to_string()),
                Sexp::Float(value) => {
                    let mut buffer = ryu::Buffer::new();
                    Ok(buffer.format(value).to_owned())
                }
                _ => Err(self.err("bad hash key")),
            },
            NodeKind::Str => match take(&mut key, 0) {
                Sexp::Str(text) => Ok(text),
                _ => Err(self.err("bad hash key")),
            },
            _ => Err(self.err("bad hash key")),
        }
    }

    // ---- call dispatch -----------------------------------------------

    pub(super) fn process_call(
        &mut self,
        mut node: Node,
        _level: Level,
        iter_block: Option<Frags>,
    ) -> CompileResult<Frags> {
        let line = node.line;
        let recv = take(&mut node, 0);
        let mid = self.name_child(&mut node, 1)?;
        let arglist = match take(&mut node, 2) {
            Sexp::Node(arglist) if arglist.kind == NodeKind::Arglist => *arglist,
            Sexp::None => Node::new(NodeKind::Arglist, line),
            _ => return Err(self.err("bad call arglist")),
        };

        // irb mode resolves bare top-level names against persisted vars
        if self.options.irb
            && self.scope().top()
            && matches!(recv, Sexp::None)
            && iter_block.is_none()
            && arglist.children.is_empty()
        {
            let lvar = mangle::lvar_to_js(&mid);
            let fallback = Sexp::node(
                NodeKind::Call,
                line,
                [
                    self.self_node(),
                    Sexp::name(mid.clone()),
                    Sexp::node(NodeKind::Arglist, line, []),
                ],
            );
            return self.with_temp(|c, tmp| {
                let mut out = vec![c.frag(format!("(({tmp} = Opal.irb_vars.{lvar}) == null ? "))];
                out.extend(c.process(fallback, Level::Expr)?);
                out.push(c.frag(format!(" : {tmp})")));
                Ok(out)
            });
        }

        if matches!(mid.as_str(), "attr_reader" | "attr_writer" | "attr_accessor")
            && self.scope().class_scope()
            && !arglist.children.is_empty()
            && arglist
                .children
                .iter()
                .all(|a| matches!(a.kind(), Some(NodeKind::Lit | NodeKind::Str)))
        {
            return self.handle_attr(&mid, arglist.children.into_vec(), line);
        }

        if mid == "block_given?" {
            return self.js_block_given(line);
        }

        let mut args = arglist.children.into_vec();
        let has_block_pass = args.last().is_some_and(|a| a.is_kind(NodeKind::BlockPass));
        let has_block = has_block_pass || iter_block.is_some();

        // both call temps are acquired before the block compiles; a pooled
        // temp freed inside the block expression could otherwise alias them
        // and clobber the dispatch function or the receiver
        let tmpfunc = if has_block { Some(self.new_temp()) } else { None };
        let tmprecv = self.new_temp();

        let mut block: Option<Frags> = None;
        if has_block_pass {
            let block_pass = args.pop().expect("last argument exists");
            block = Some(self.process(block_pass, Level::Expr)?);
        } else if let Some(iter) = iter_block {
            block = Some(iter);
        }

        let splat = args.iter().any(|a| a.is_kind(NodeKind::Splat));
        let recv_sexp = match recv {
            Sexp::None => self.self_node(),
            other => other,
        };
        let recv_code = self.process(recv_sexp, Level::Recv)?;
        let jsid = mangle::mid_to_jsid(&mid);

        if !splat {
            args.insert(0, self.js_tmp(tmprecv.clone()));
        }
        let (arg_frags, _) = self.compile_arglist(args, line)?;

        // NOTE: the two shapes below stay deliberately parallel; they differ
        // only in the method-missing fallback and in how the apply receiver
        // is rendered.
        let mut dispatch: Frags = vec![];
        if self.options.method_missing {
            dispatch.push(Fragment::new(format!("(({tmprecv} = "), line));
            dispatch.extend(recv_code);
            dispatch.push(Fragment::new(format!("){jsid} || $mm({}))", js_quote(&mid)), line));
        } else {
            dispatch.push(Fragment::new(format!("({tmprecv} = "), line));
            dispatch.extend(recv_code);
            dispatch.push(Fragment::new(format!("){jsid}"), line));
        }

        if let Some(tf) = &tmpfunc {
            let block = block.expect("block present when tmpfunc is");
            dispatch.insert(0, Fragment::new(format!("({tf} = "), line));
            dispatch.push(Fragment::new(format!(", {tf}._p = "), line));
            dispatch.extend(block);
            dispatch.push(Fragment::new(format!(", {tf})"), line));
        }

        let mut out = dispatch;
        if splat {
            out.push(Fragment::new(".apply(", line));
            if self.options.method_missing {
                let receiver = self.js_tmp(tmprecv.clone());
                out.extend(self.process(receiver, Level::Expr)?);
            } else {
                out.push(Fragment::new(tmprecv.clone(), line));
            }
            out.push(Fragment::new(", ", line));
            out.extend(arg_frags);
            out.push(Fragment::new(")", line));
        } else {
            out.push(Fragment::new(".call(", line));
            out.extend(arg_frags);
            out.push(Fragment::new(")", line));
        }

        self.queue_temp(tmprecv);
        if let Some(tf) = tmpfunc {
            self.queue_temp(tf);
        }
        Ok(out)
    }

    /// Attribute assignment (`a.b = c`, `a[i] = v`) is call dispatch on the
    /// setter id.
    pub(super) fn process_attrasgn(&mut self, mut node: Node, level: Level) -> CompileResult<Frags> {
        node.kind = NodeKind::Call;
        self.process_call(node, level, None)
    }

    /// Expands `attr_reader`/`attr_writer`/`attr_accessor` with literal
    /// names into plain method definitions.
    fn handle_attr(&mut self, kind: &str, attrs: Vec<Sexp>, line: u32) -> CompileResult<Frags> {
        let mut stmts: Vec<Sexp> = vec![];
        for attr in attrs {
            let name = self.hash_key_text(attr)?;
            if kind != "attr_writer" {
                stmts.push(Sexp::node(
                    NodeKind::Defn,
                    line,
                    [
                        Sexp::name(name.clone()),
                        Sexp::node(NodeKind::Args, line, []),
                        Sexp::node(
                            NodeKind::Scope,
                            line,
                            [Sexp::node(NodeKind::Ivar, line, [Sexp::name(format!("@{name}"))])],
                        ),
                    ],
                ));
            }
            if kind != "attr_reader" {
                stmts.push(Sexp::node(
                    NodeKind::Defn,
                    line,
                    [
                        Sexp::name(format!("{name}=")),
                        Sexp::node(NodeKind::Args, line, [Sexp::name("val")]),
                        Sexp::node(
                            NodeKind::Scope,
                            line,
                            [Sexp::node(
                                NodeKind::Iasgn,
                                line,
                                [
                                    Sexp::name(format!("@{name}")),
                                    Sexp::node(NodeKind::Lvar, line, [Sexp::name("val")]),
                                ],
                            )],
                        ),
                    ],
                ));
            }
        }
        self.process(Sexp::node(NodeKind::Block, line, stmts), Level::Stmt)
    }

    fn js_block_given(&mut self, line: u32) -> CompileResult<Frags> {
        match self.mark_uses_block() {
            Some(name) => Ok(vec![Fragment::new(format!("({name} !== nil)"), line)]),
            None => Ok(vec![Fragment::new("false", line)]),
        }
    }

    /// Binary operators with the inline numeric fast path (`operator` nodes
    /// the grammar emits for comparison and arithmetic).
    pub(super) fn process_operator(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let op = self.name_child(&mut node, 0)?;
        let recv = take(&mut node, 1);
        let arg = take(&mut node, 2);
        let jsid = mangle::mid_to_jsid(&op);

        if self.options.optimized_operators {
            self.with_temp(|c, a| {
                let a = a.to_owned();
                c.with_temp(|c, b| {
                    let mut out = vec![Fragment::new(format!("({a} = "), line)];
                    out.extend(c.process(recv, Level::Expr)?);
                    out.push(Fragment::new(format!(", {b} = "), line));
                    out.extend(c.process(arg, Level::Expr)?);
                    out.push(Fragment::new(
                        format!(", typeof({a}) === 'number' ? {a} {op} {b} : {a}{jsid}({b}))"),
                        line,
                    ));
                    Ok(out)
                })
            })
        } else {
            let mut out = self.process(recv, Level::Recv)?;
            out.push(Fragment::new(format!("{jsid}("), line));
            out.extend(self.process(arg, Level::Expr)?);
            out.push(Fragment::new(")", line));
            Ok(out)
        }
    }

    pub(super) fn process_block_pass(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let value = take(&mut node, 0);
        let call = Sexp::node(
            NodeKind::Call,
            line,
            [
                value,
                Sexp::name("to_proc"),
                Sexp::node(NodeKind::Arglist, line, []),
            ],
        );
        self.process(call, Level::Expr)
    }

    // ---- block literals ----------------------------------------------

    pub(super) fn process_iter(&mut self, mut node: Node, level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let call = take(&mut node, 0);
        let args_spec = take(&mut node, 1);
        let body = lift_returns(take(&mut node, 2), line);

        let Sexp::Node(call_node) = call else {
            return Err(self.err("bad iter target"));
        };
        if call_node.kind != NodeKind::Call {
            return Err(self.err("bad iter target"));
        }

        let mut targets: Vec<Sexp> = match args_spec {
            Sexp::None => vec![],
            Sexp::Node(spec) if spec.kind == NodeKind::Lasgn => vec![Sexp::Node(spec)],
            Sexp::Node(mut spec) if spec.kind == NodeKind::Masgn => match take(&mut spec, 0) {
                Sexp::Node(array) if array.kind == NodeKind::Array => array.children.into_vec(),
                _ => return Err(self.err("bad block parameter list")),
            },
            _ => return Err(self.err("bad block parameter list")),
        };

        let block_param = if targets.last().is_some_and(|t| t.is_kind(NodeKind::BlockPass)) {
            let Some(Sexp::Node(mut pass)) = targets.pop() else { unreachable!() };
            Some(self.param_name(take(&mut pass, 0))?)
        } else {
            None
        };
        let splat_param = if targets.last().is_some_and(|t| t.is_kind(NodeKind::Splat)) {
            let Some(Sexp::Node(mut splat)) = targets.pop() else { unreachable!() };
            match take(&mut splat, 0) {
                Sexp::None => None,
                inner => Some(self.param_name(inner)?),
            }
        } else {
            None
        };
        let n_leading = targets.len();

        let assembled = self.indented(|c| {
            c.in_scope(ScopeKind::Iter, |c| {
                let identity = c.identify();
                c.scope_mut().add_temp(format!("self = {identity}._s || this"));

                let mut params: Vec<String> = vec![];
                let mut prologue: Frags = vec![];
                for target in targets {
                    match target {
                        Sexp::Node(mut param) if param.kind == NodeKind::Lasgn => {
                            let name = c.param_name(take(&mut param, 0))?;
                            c.scope_mut().add_arg(name.clone());
                            prologue.push(Fragment::new(
                                format!("if ({name} == null) {name} = nil;\n{}", c.indent),
                                line,
                            ));
                            params.push(name);
                        }
                        Sexp::Node(param) if param.kind == NodeKind::Masgn => {
                            let slot = c.unique_temp();
                            c.scope_mut().add_arg(slot.clone());
                            let mut destructure = *param;
                            let to_ary = Sexp::node(NodeKind::ToAry, line, [c.js_tmp(slot.clone())]);
                            destructure.children.push(to_ary);
                            prologue.extend(c.process(Sexp::Node(Box::new(destructure)), Level::Expr)?);
                            prologue.push(Fragment::new(format!(";\n{}", c.indent), line));
                            params.push(slot);
                        }
                        _ => return Err(c.err("bad block parameter")),
                    }
                }

                if let Some(splat) = &splat_param {
                    c.scope_mut().add_arg(splat.clone());
                    prologue.push(Fragment::new(
                        format!("{splat} = __slice.call(arguments, {n_leading});\n{}", c.indent),
                        line,
                    ));
                    params.push(splat.clone());
                }

                if let Some(block_name) = &block_param {
                    c.scope_mut().block_name = Some(block_name.clone());
                    c.scope_mut().add_temp(block_name.clone());
                    prologue.insert(
                        0,
                        Fragment::new(
                            format!("{block_name} = {identity}._p || nil, {identity}._p = null;\n{}", c.indent),
                            line,
                        ),
                    );
                }

                let body_frags = c.process(body, Level::Stmt)?;
                if c.scope().defines_defn {
                    c.scope_mut()
                        .add_temp("def = ((self._isObject) ? self._klass.prototype : self.prototype)");
                }
                let vars = c.scope().var_line(&c.indent);
                Ok((identity, params, prologue, body_frags, vars))
            })
        })?;
        let ((identity, params, prologue, body_frags, vars), _scope) = assembled;

        let inner = format!("{}{}", self.indent, super::INDENT);
        let mut itercode = vec![Fragment::new(
            format!("({identity} = function({}) {{\n", params.join(", ")),
            line,
        )];
        itercode.push(Fragment::synthetic(format!("{inner}{vars}\n{inner}")));
        itercode.extend(prologue);
        itercode.extend(body_frags);
        itercode.push(Fragment::new(format!("\n{}}}, {identity}._s = ", self.indent), line));
        let outer_self = self.self_node();
        itercode.extend(self.process(outer_self, Level::Expr)?);
        itercode.push(Fragment::new(format!(", {identity})"), line));

        self.process_call(*call_node, level, Some(itercode))
    }

    /// Extracts a parameter name from a `lasgn` node or a bare name and
    /// applies reserved-word mangling.
    fn param_name(&mut self, sexp: Sexp) -> CompileResult<String> {
        match sexp {
            Sexp::Name(name) => Ok(mangle::lvar_to_js(&name)),
            Sexp::Node(mut node) if node.kind == NodeKind::Lasgn => match take(&mut node, 0) {
                Sexp::Name(name) => Ok(mangle::lvar_to_js(&name)),
                _ => Err(self.err("bad parameter name")),
            },
            _ => Err(self.err("bad parameter name")),
        }
    }

    // ---- super -------------------------------------------------------

    pub(super) fn process_super(&mut self, node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let args = self.compile_array(node.children.into_vec(), line)?;
        self.js_super(args, line)
    }

    pub(super) fn process_zsuper(&mut self, node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let args = vec![Fragment::new("__slice.call(arguments)", line)];
        self.js_super(args, line)
    }

    /// Emits the correct super shape for the current scope: the captured
    /// previous implementation inside class bodies, the class super chain
    /// for standalone methods, and the `_sup` chain through nested blocks.
    fn js_super(&mut self, args: Frags, line: u32) -> CompileResult<Frags> {
        let current = self.scopes.len() - 1;
        match self.scopes[current].kind {
            ScopeKind::Def => {
                let in_class = !self.scopes[current].defs && current > 0 && self.scopes[current - 1].class_scope();
                if in_class {
                    let sid = if let Some(sid) = &self.scopes[current].uses_super {
                        sid.clone()
                    } else {
                        let sid = format!("super_{}", self.unique_temp());
                        self.scopes[current].uses_super = Some(sid.clone());
                        sid
                    };
                    let mut out = vec![Fragment::new(format!("{sid}.apply(self, "), line)];
                    out.extend(args);
                    out.push(Fragment::new(")", line));
                    Ok(out)
                } else {
                    let mid = self.scopes[current]
                        .mid
                        .clone()
                        .ok_or_else(|| self.err("super called outside of method"))?;
                    let jsid = mangle::mid_to_jsid(&mid);
                    let target = self.scopes[..current]
                        .iter()
                        .rev()
                        .find_map(|s| if s.class_scope() { s.name.clone() } else { None })
                        .unwrap_or_else(|| "self._klass".to_owned());
                    let head = if self.scopes[current].defs {
                        format!("{target}._super{jsid}.apply(self, ")
                    } else {
                        format!("{target}._super.prototype{jsid}.apply(self, ")
                    };
                    let mut out = vec![Fragment::new(head, line)];
                    out.extend(args);
                    out.push(Fragment::new(")", line));
                    Ok(out)
                }
            }
            ScopeKind::Iter => {
                let mut chain: Vec<String> = vec![];
                let mut found: Option<(String, String)> = None;
                let mut idx = current;
                loop {
                    match self.scopes[idx].kind {
                        ScopeKind::Iter => {
                            let id = self.identify_at(idx);
                            chain.push(id);
                            if idx == 0 {
                                break;
                            }
                            idx -= 1;
                        }
                        ScopeKind::Def => {
                            let id = self.identify_at(idx);
                            let mid = self.scopes[idx].mid.clone().unwrap_or_default();
                            found = Some((id, mid));
                            break;
                        }
                        _ => break,
                    }
                }
                let Some((defn_id, mid)) = found else {
                    return Err(self.err("super called outside of method"));
                };
                let mut tries: Vec<String> = chain.iter().map(|c| format!("{c}._sup")).collect();
                tries.push(format!("{defn_id}._sup"));
                let mut out = vec![Fragment::new(
                    format!(
                        "({} || self._klass._super.prototype[{}]).apply(self, ",
                        tries.join(" || "),
                        js_quote(&format!("${mid}"))
                    ),
                    line,
                )];
                out.extend(args);
                out.push(Fragment::new(")", line));
                Ok(out)
            }
            _ => Err(self.err("super called outside of method")),
        }
    }
}
