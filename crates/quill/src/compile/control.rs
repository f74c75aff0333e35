//! Control-flow emitters: branches, loops, case dispatch, non-local exits,
//! yield plumbing, exception handling and multiple assignment.

use super::{Compiler, Frags, take};
use crate::{
    error::CompileResult,
    fragment::Fragment,
    scope::ScopeKind,
    sexp::{Level, Node, NodeKind, Sexp, lift_returns},
};

impl Compiler {
    pub(super) fn process_if(&mut self, mut node: Node, level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let test = take(&mut node, 0);
        let mut truthy = take(&mut node, 1);
        let mut falsy = take(&mut node, 2);

        let returnable = level == Level::Expr || level == Level::Recv;
        if returnable {
            truthy = lift_returns(truthy, line);
            falsy = lift_returns(falsy, line);
        }

        // an `unless` with no then-branch flips into a falsy check
        let check;
        if matches!(truthy, Sexp::None) && !matches!(falsy, Sexp::None) {
            truthy = std::mem::replace(&mut falsy, Sexp::None);
            check = self.js_falsy(test)?;
        } else {
            check = self.js_truthy(test)?;
        }

        let mut out = vec![Fragment::new("if (", line)];
        out.extend(check);
        out.push(Fragment::new(") {\n", line));
        if !matches!(truthy, Sexp::None) {
            self.indented(|c| -> CompileResult<()> {
                out.push(Fragment::synthetic(c.indent.clone()));
                out.extend(c.process(truthy, Level::Stmt)?);
                Ok(())
            })?;
        }
        if !matches!(falsy, Sexp::None) {
            out.push(Fragment::new(format!("\n{}}} else {{\n", self.indent), line));
            self.indented(|c| -> CompileResult<()> {
                out.push(Fragment::synthetic(c.indent.clone()));
                out.extend(c.process(falsy, Level::Stmt)?);
                Ok(())
            })?;
        }
        out.push(Fragment::new(format!("\n{}}}", self.indent), line));

        if returnable {
            out = self.iife(out, true);
        }
        Ok(out)
    }

    /// Emits `while`/`until`. `invert` negates the condition; expression
    /// position wraps the loop in an IIFE whose frame turns `break <v>` into
    /// `return <v>`.
    pub(super) fn process_while(&mut self, mut node: Node, level: Level, invert: bool) -> CompileResult<Frags> {
        let line = node.line;
        let expr = take(&mut node, 0);
        let stmt = take(&mut node, 1);

        let closure = level == Level::Expr || level == Level::Recv;
        let redo_var = self.new_temp();

        let check = self.js_truthy(expr)?;
        let (body, frame) = self.in_while_frame(closure, redo_var.clone(), |c| {
            c.indented(|c| c.process(stmt, Level::Stmt))
        })?;

        let mut head = if frame.use_redo {
            format!("{redo_var} = false; while ({redo_var} || ")
        } else {
            "while (".to_owned()
        };
        if invert {
            head.push_str("!(");
        }

        let mut out = vec![Fragment::new(head, line)];
        out.extend(check);
        out.push(Fragment::new(if invert { ")) {" } else { ") {" }, line));
        self.indented(|c| {
            if frame.use_redo {
                out.push(Fragment::new(format!("\n{}{redo_var} = false;", c.indent), line));
            }
            out.push(Fragment::synthetic(format!("\n{}", c.indent)));
        });
        out.extend(body);
        out.push(Fragment::new(format!("\n{}}}", self.indent), line));

        self.queue_temp(redo_var);
        if closure {
            out = self.iife(out, true);
        }
        Ok(out)
    }

    pub(super) fn process_case(&mut self, node: Node, level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let mut children = node.children.into_iter();
        let cond = children.next().unwrap_or(Sexp::None);
        let returnable = level != Level::Stmt;
        let has_cond = !matches!(cond, Sexp::None);

        self.case_stack.push(has_cond);
        let result = self.case_clauses(cond, children, returnable, line);
        self.case_stack.pop();
        let out = result?;

        if returnable {
            Ok(self.iife(out, false))
        } else {
            Ok(out)
        }
    }

    /// Emits the scrutinee binding and the `if`/`else if`/`else` chain of a
    /// `case`. Runs with the case frame already pushed.
    fn case_clauses(
        &mut self,
        cond: Sexp,
        clauses: impl Iterator<Item = Sexp>,
        returnable: bool,
        line: u32,
    ) -> CompileResult<Frags> {
        let has_cond = !matches!(cond, Sexp::None);
        let mut out: Frags = vec![];
        if has_cond {
            self.scope_mut().add_local("$case");
            out.push(Fragment::new("$case = ", line));
            out.extend(self.process(cond, Level::Expr)?);
            out.push(Fragment::new(";", line));
        }

        let mut handled_else = false;
        let mut first = true;
        for clause in clauses {
            let join = if first {
                if has_cond {
                    format!("\n{}", self.indent)
                } else {
                    String::new()
                }
            } else {
                format!("\n{}else ", self.indent)
            };
            first = false;

            if clause.is_kind(NodeKind::When) {
                let clause = if returnable { lift_returns(clause, line) } else { clause };
                out.push(Fragment::synthetic(join));
                out.extend(self.process(clause, Level::Stmt)?);
            } else {
                handled_else = true;
                let clause = if returnable { lift_returns(clause, line) } else { clause };
                out.push(Fragment::synthetic(format!("{join}{{\n")));
                self.indented(|c| -> CompileResult<()> {
                    out.push(Fragment::synthetic(c.indent.clone()));
                    out.extend(c.process(clause, Level::Stmt)?);
                    Ok(())
                })?;
                out.push(Fragment::new(format!("\n{}}}", self.indent), line));
            }
        }
        if returnable && !handled_else {
            out.push(Fragment::new(format!("\n{}else {{ return nil }}", self.indent), line));
        }
        Ok(out)
    }

    pub(super) fn process_when(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let has_cond = *self
            .case_stack
            .last()
            .ok_or_else(|| self.err("when outside of case"))?;

        let tests_node = take(&mut node, 0);
        let body = take(&mut node, 1);

        let body_frags = self.indented(|c| c.process(body, Level::Stmt))?;

        let Sexp::Node(tests_node) = tests_node else {
            return Err(self.err("bad when clause"));
        };
        let mut tests: Frags = vec![];
        for test in tests_node.children {
            if !tests.is_empty() {
                tests.push(Fragment::new(" || ", line));
            }
            if test.is_kind(NodeKind::Splat) {
                if !has_cond {
                    return Err(self.err("splat in when requires a case expression"));
                }
                let Sexp::Node(mut splat) = test else { unreachable!() };
                let value = take(&mut splat, 0);
                tests.push(Fragment::new(
                    "(function($splt) { for (var i = 0, ii = $splt.length; i < ii; i++) { \
                     if ($splt[i]['$===']($case)) { return true; } } return false; }).call(self, ",
                    line,
                ));
                tests.extend(self.process(value, Level::Expr)?);
                tests.push(Fragment::new(")", line));
            } else if has_cond {
                let call = Sexp::node(
                    NodeKind::Call,
                    line,
                    [
                        test,
                        Sexp::name("==="),
                        Sexp::node(NodeKind::Arglist, line, [self.js_tmp("$case")]),
                    ],
                );
                tests.extend(self.process(call, Level::Expr)?);
            } else {
                tests.extend(self.js_truthy(test)?);
            }
        }

        let mut out = vec![Fragment::new("if (", line)];
        out.extend(tests);
        out.push(Fragment::new(") {\n", line));
        out.push(Fragment::synthetic(format!("{}{}", self.indent, super::INDENT)));
        out.extend(body_frags);
        out.push(Fragment::new(format!("\n{}}}", self.indent), line));
        Ok(out)
    }

    pub(super) fn process_break(&mut self, mut node: Node, level: Level) -> CompileResult<Frags> {
        let value = take(&mut node, 0);
        if self.scope().in_while() {
            let frame = self.scope().while_stack.last().expect("loop frame present");
            if frame.closure {
                let mut out = vec![self.frag("return ")];
                out.extend(self.process(value, Level::Expr)?);
                out.push(self.frag(";"));
                Ok(out)
            } else {
                Ok(vec![self.frag("break;")])
            }
        } else if self.scope().iter() {
            if level != Level::Stmt {
                return Err(self.err("break must be used as a statement"));
            }
            let mut out = vec![self.frag("return (__breaker.$v = ")];
            out.extend(self.process(value, Level::Expr)?);
            out.push(self.frag(", __breaker)"));
            Ok(out)
        } else {
            Err(self.err("void value expression: cannot use break outside of loop or block"))
        }
    }

    pub(super) fn process_next(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let value = take(&mut node, 0);
        if self.scope().in_while() {
            return Ok(vec![self.frag("continue;")]);
        }
        let mut out = vec![self.frag("return ")];
        out.extend(self.process(value, Level::Expr)?);
        out.push(self.frag(";"));
        Ok(out)
    }

    pub(super) fn process_redo(&mut self, _node: Node, _level: Level) -> CompileResult<Frags> {
        if self.scope().in_while() {
            let frame = self.scope_mut().while_stack.last_mut().expect("loop frame present");
            frame.use_redo = true;
            let redo_var = frame.redo_var.clone();
            Ok(vec![self.frag(format!("{redo_var} = true"))])
        } else {
            self.warn("redo is not supported outside of while loops");
            Ok(vec![self.frag("REDO();")])
        }
    }

    pub(super) fn process_return(&mut self, mut node: Node, level: Level) -> CompileResult<Frags> {
        if level != Level::Stmt {
            return Err(self.err("void value expression: cannot return as an expression"));
        }
        let value = take(&mut node, 0);
        // a lexical return from a block must unwind the enclosing method;
        // the breaker sentinel makes the runtime propagate it
        if self.scope().iter() {
            let mut out = vec![self.frag("return (__breaker.$v = ")];
            out.extend(self.process(value, Level::Expr)?);
            out.push(self.frag(", __breaker)"));
            return Ok(out);
        }
        let mut out = vec![self.frag("return ")];
        out.extend(self.process(value, Level::Expr)?);
        Ok(out)
    }

    // ---- yield -------------------------------------------------------

    /// Marks block usage on the nearest scope owning a block slot (the
    /// enclosing method, or a block that declared its own `&block` param)
    /// and returns the slot name. `None` outside of any method.
    pub(super) fn mark_uses_block(&mut self) -> Option<String> {
        let mut idx = self.scopes.len();
        while idx > 0 {
            idx -= 1;
            match self.scopes[idx].kind {
                ScopeKind::Iter => {
                    if self.scopes[idx].block_name.is_some() {
                        self.scopes[idx].uses_block = true;
                        let name = self.scopes[idx].block_name.clone();
                        self.identify_at(idx);
                        return name;
                    }
                    // plain blocks yield to the enclosing method's block
                }
                ScopeKind::Def => {
                    self.scopes[idx].uses_block = true;
                    let name = self.scopes[idx].block_name.clone().or_else(|| Some("__yield".to_owned()));
                    self.identify_at(idx);
                    return name;
                }
                _ => return None,
            }
        }
        None
    }

    /// Compiles the invocation shared by `yield`, `returnable_yield` and
    /// `yasgn`: the block slot called with `null` as receiver, or applied
    /// when the argument list carries a splat.
    fn yield_call(&mut self, args: Vec<Sexp>, line: u32) -> CompileResult<Frags> {
        let Some(block) = self.mark_uses_block() else {
            return Err(self.err("yield outside of method"));
        };
        let splat = args.iter().any(|a| a.is_kind(NodeKind::Splat));
        let mut args = args;
        if !splat {
            args.insert(0, self.js_tmp("null"));
        }
        let (compiled, _) = self.compile_arglist(args, line)?;
        let mut out = if splat {
            vec![Fragment::new(format!("{block}.apply(null, "), line)]
        } else {
            vec![Fragment::new(format!("{block}.call("), line)]
        };
        out.extend(compiled);
        out.push(Fragment::new(")", line));
        Ok(out)
    }

    pub(super) fn process_yield(&mut self, node: Node, level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let call = self.yield_call(node.children.into_vec(), line)?;
        if level == Level::Stmt {
            let mut out = vec![Fragment::new("if (", line)];
            out.extend(call);
            out.push(Fragment::new(" === __breaker) return __breaker.$v", line));
            Ok(out)
        } else {
            Ok(call)
        }
    }

    pub(super) fn process_returnable_yield(&mut self, node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let call = self.yield_call(node.children.into_vec(), line)?;
        self.with_temp(|c, tmp| {
            let mut out = vec![Fragment::new(format!("return {tmp} = "), line)];
            out.extend(call);
            out.push(c.frag(format!(", {tmp} === __breaker ? __breaker.$v : {tmp}")));
            Ok(out)
        })
    }

    pub(super) fn process_yasgn(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let name = self.name_child(&mut node, 0)?;
        let Sexp::Node(yield_node) = take(&mut node, 1) else {
            return Err(self.err("bad yasgn"));
        };
        let call = self.yield_call(yield_node.children.into_vec(), line)?;
        let mut out = vec![Fragment::new(format!("if (({name} = "), line)];
        out.extend(call);
        out.push(Fragment::new(") === __breaker) return __breaker.$v", line));
        Ok(out)
    }

    // ---- exceptions --------------------------------------------------

    pub(super) fn process_rescue(&mut self, node: Node, level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let returnable = level == Level::Expr || level == Level::Recv;
        let mut children = node.children.into_iter().peekable();

        let body = if children.peek().is_some_and(|c| c.is_kind(NodeKind::Resbody)) {
            Sexp::node(NodeKind::Nil, line, [])
        } else {
            children.next().unwrap_or(Sexp::None)
        };
        let body = if returnable { lift_returns(body, line) } else { body };
        let body_frags = self.indented(|c| c.process(body, Level::Stmt))?;

        let mut handled_else = false;
        let mut parts: Frags = vec![];
        for clause in children {
            if !parts.is_empty() {
                parts.push(Fragment::new("else ", line));
            }
            if clause.is_kind(NodeKind::Resbody) {
                let Sexp::Node(mut resbody) = clause else { unreachable!() };
                if returnable && resbody.children.len() > 1 {
                    let handler = take(&mut resbody, 1);
                    resbody.children[1] = lift_returns(handler, line);
                }
                parts.extend(self.indented(|c| c.process(Sexp::Node(resbody), Level::Stmt))?);
            } else {
                // a trailing else clause becomes the catch-all branch
                handled_else = true;
                let clause = if returnable { lift_returns(clause, line) } else { clause };
                parts.push(Fragment::new("{\n", line));
                self.indented(|c| -> CompileResult<()> {
                    parts.push(Fragment::synthetic(c.indent.clone()));
                    parts.extend(c.process(clause, Level::Stmt)?);
                    Ok(())
                })?;
                parts.push(Fragment::new(format!("\n{}}}", self.indent), line));
            }
        }
        if !handled_else {
            if !parts.is_empty() {
                parts.push(Fragment::new("else ", line));
            }
            parts.push(Fragment::new("{ throw $err; }", line));
        }

        let mut out = vec![Fragment::new(format!("try {{\n{}{}", self.indent, super::INDENT), line)];
        out.extend(body_frags);
        out.push(Fragment::new(
            format!("\n{}}} catch ($err) {{\n{}{}", self.indent, self.indent, super::INDENT),
            line,
        ));
        out.extend(parts);
        out.push(Fragment::new(format!("\n{}}}", self.indent), line));

        if returnable {
            Ok(self.iife(out, false))
        } else {
            Ok(out)
        }
    }

    pub(super) fn process_resbody(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let Sexp::Node(types_node) = take(&mut node, 0) else {
            return Err(self.err("bad resbody"));
        };
        let body = take(&mut node, 1);

        let mut types = types_node.children.into_vec();
        let binder = match types.last() {
            Some(last) if matches!(last.kind(), Some(NodeKind::Lasgn | NodeKind::Iasgn)) => types.pop(),
            _ => None,
        };

        let mut tests: Frags = vec![];
        for class_type in types {
            if !tests.is_empty() {
                tests.push(Fragment::new(" || ", line));
            }
            let call = Sexp::node(
                NodeKind::Call,
                line,
                [
                    class_type,
                    Sexp::name("==="),
                    Sexp::node(NodeKind::Arglist, line, [self.js_tmp("$err")]),
                ],
            );
            tests.extend(self.process(call, Level::Expr)?);
        }
        if tests.is_empty() {
            tests.push(Fragment::new("true", line));
        }

        let mut bind: Frags = vec![];
        if let Some(Sexp::Node(mut target)) = binder {
            target.children.push(self.js_tmp("$err"));
            bind = self.process(Sexp::Node(target), Level::Expr)?;
            bind.push(Fragment::new(";", line));
        }

        let body_frags = self.indented(|c| c.process(body, Level::Stmt))?;

        let mut out = vec![Fragment::new("if (", line)];
        out.extend(tests);
        out.push(Fragment::new(format!(") {{\n{}{}", self.indent, super::INDENT), line));
        out.extend(bind);
        out.extend(body_frags);
        out.push(Fragment::new(format!("\n{}}}", self.indent), line));
        Ok(out)
    }

    pub(super) fn process_ensure(&mut self, mut node: Node, level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let returnable = level == Level::Expr || level == Level::Recv;
        let mut body = take(&mut node, 0);
        let ensr = take(&mut node, 1);
        if returnable {
            body = lift_returns(body, line);
        }

        let body_frags = self.indented(|c| c.process(body, Level::Stmt))?;
        let ensr_frags = self.indented(|c| c.process(ensr, Level::Stmt))?;

        let mut out = vec![Fragment::new(format!("try {{\n{}{}", self.indent, super::INDENT), line)];
        out.extend(body_frags);
        out.push(Fragment::new(
            format!("\n{}}} finally {{\n{}{}", self.indent, self.indent, super::INDENT),
            line,
        ));
        out.extend(ensr_frags);
        out.push(Fragment::new(format!("\n{}}}", self.indent), line));

        if returnable {
            Ok(self.iife(out, false))
        } else {
            Ok(out)
        }
    }

    // ---- multiple assignment -----------------------------------------

    pub(super) fn process_masgn(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let Sexp::Node(targets_node) = take(&mut node, 0) else {
            return Err(self.err("bad masgn targets"));
        };
        let rhs = take(&mut node, 1);
        let Sexp::Node(mut rhs) = rhs else {
            return Err(self.err("unsupported masgn rhs"));
        };

        let tmp = self.new_temp();
        let mut known_len = 0usize;
        let mut out: Frags = vec![];
        match rhs.kind {
            NodeKind::Array => {
                known_len = rhs.children.len();
                out.push(Fragment::new(format!("{tmp} = "), line));
                out.extend(self.process(Sexp::Node(rhs), Level::Expr)?);
            }
            NodeKind::ToAry => {
                let value = take(&mut rhs, 0);
                out.push(Fragment::new(format!("(({tmp} = "), line));
                out.extend(self.process(value, Level::Expr)?);
                out.push(Fragment::new(
                    format!(")._isArray ? {tmp} : ({tmp} = [{tmp}]))"),
                    line,
                ));
            }
            NodeKind::Splat => {
                let value = take(&mut rhs, 0);
                out.push(Fragment::new(format!("({tmp} = "), line));
                out.extend(self.process(value, Level::Expr)?);
                out.push(Fragment::new(
                    format!(
                        ")['$to_a'] ? ({tmp} = {tmp}['$to_a']()) : ({tmp})._isArray ? {tmp} : ({tmp} = [{tmp}])"
                    ),
                    line,
                ));
            }
            other => return Err(self.err(format!("unsupported masgn rhs: {other}"))),
        }

        for (idx, target) in targets_node.children.into_iter().enumerate() {
            out.push(Fragment::new(", ", line));
            if target.is_kind(NodeKind::Splat) {
                let Sexp::Node(mut splat) = target else { unreachable!() };
                let inner = take(&mut splat, 0);
                out.extend(self.masgn_target(inner, format!("__slice.call({tmp}, {idx})"))?);
            } else {
                let value = if idx >= known_len {
                    format!("({tmp}[{idx}] == null ? nil : {tmp}[{idx}])")
                } else {
                    format!("{tmp}[{idx}]")
                };
                out.extend(self.masgn_target(target, value)?);
            }
        }
        self.queue_temp(tmp);
        Ok(out)
    }

    /// Processes one assignment target with a synthetic JS rhs spliced in.
    /// Index/attribute targets take the value as the final call argument.
    fn masgn_target(&mut self, target: Sexp, rhs_text: String) -> CompileResult<Frags> {
        let Sexp::Node(mut target) = target else {
            return Err(self.err("unsupported masgn target"));
        };
        if target.kind == NodeKind::Attrasgn {
            match target.children.get_mut(2) {
                Some(Sexp::Node(arglist)) if arglist.kind == NodeKind::Arglist => {
                    let tmp = self.js_tmp(rhs_text);
                    arglist.children.push(tmp);
                }
                _ => return Err(self.err("unsupported masgn target")),
            }
        } else {
            let tmp = self.js_tmp(rhs_text);
            target.children.push(tmp);
        }
        self.process(Sexp::Node(target), Level::Expr)
    }

    // ---- operator assignment -----------------------------------------

    /// `a ||= b` / `a &&= b` arrive as a read node plus a write node; they
    /// compile as the corresponding logical operator.
    pub(super) fn process_op_asgn_logic(&mut self, mut node: Node, level: Level, op: NodeKind) -> CompileResult<Frags> {
        let line = node.line;
        let read = take(&mut node, 0);
        let write = take(&mut node, 1);
        self.process(Sexp::node(op, line, [read, write]), level)
    }

    /// `recv[idx] op= rhs`: receiver and index bound to temps, read through
    /// `['$[]']`, combined, written back through `['$[]=']`. The combined
    /// value is the expression result.
    pub(super) fn process_op_asgn1(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let recv = take(&mut node, 0);
        let Sexp::Node(arglist) = take(&mut node, 1) else {
            return Err(self.err("bad op_asgn1 index"));
        };
        let op = self.name_child(&mut node, 2)?;
        let rhs = take(&mut node, 3);
        let index = arglist.children.into_iter().next().unwrap_or(Sexp::None);

        self.with_temp(|c, a| {
            let a = a.to_owned();
            c.with_temp(|c, b| {
                let b = b.to_owned();
                c.with_temp(|c, result| {
                    let mut out = vec![Fragment::new(format!("({a} = "), line)];
                    out.extend(c.process(recv, Level::Expr)?);
                    out.push(Fragment::new(format!(", {b} = "), line));
                    out.extend(c.process(index, Level::Expr)?);
                    match op.as_str() {
                        "||" => {
                            out.push(Fragment::new(
                                format!(", {result} = {a}['$[]']({b}), (({result} !== false && {result} !== nil) ? {result} : {a}['$[]=']({b}, "),
                                line,
                            ));
                            out.extend(c.process(rhs, Level::Expr)?);
                            out.push(Fragment::new(")))", line));
                        }
                        "&&" => {
                            out.push(Fragment::new(
                                format!(", {result} = {a}['$[]']({b}), (({result} === false || {result} === nil) ? {result} : {a}['$[]=']({b}, "),
                                line,
                            ));
                            out.extend(c.process(rhs, Level::Expr)?);
                            out.push(Fragment::new(")))", line));
                        }
                        _ => {
                            let jsid = crate::mangle::mid_to_jsid(&op);
                            out.push(Fragment::new(format!(", {result} = {a}['$[]']({b}){jsid}("), line));
                            out.extend(c.process(rhs, Level::Expr)?);
                            out.push(Fragment::new(
                                format!("), {a}['$[]=']({b}, {result}), {result})"),
                                line,
                            ));
                        }
                    }
                    Ok(out)
                })
            })
        })
    }

    /// `recv.name op= rhs`: the receiver is bound once, then the update is
    /// rewritten into getter/setter call nodes on the bound temp.
    pub(super) fn process_op_asgn2(&mut self, mut node: Node, _level: Level) -> CompileResult<Frags> {
        let line = node.line;
        let recv = take(&mut node, 0);
        let setter = self.name_child(&mut node, 1)?;
        let op = self.name_child(&mut node, 2)?;
        let rhs = take(&mut node, 3);
        let Some(getter) = setter.strip_suffix('=') else {
            return Err(self.err("bad op_asgn2 setter"));
        };
        let getter = getter.to_owned();

        self.with_temp(|c, tmp| {
            let read = Sexp::node(
                NodeKind::Call,
                line,
                [
                    c.js_tmp(tmp),
                    Sexp::name(getter.clone()),
                    Sexp::node(NodeKind::Arglist, line, []),
                ],
            );
            let write = |value: Sexp| {
                Sexp::node(
                    NodeKind::Call,
                    line,
                    [
                        c.js_tmp(tmp),
                        Sexp::name(setter.clone()),
                        Sexp::node(NodeKind::Arglist, line, [value]),
                    ],
                )
            };
            let update = match op.as_str() {
                "||" => Sexp::node(NodeKind::Or, line, [read, write(rhs)]),
                "&&" => Sexp::node(NodeKind::And, line, [read, write(rhs)]),
                _ => {
                    let combined = Sexp::node(
                        NodeKind::Call,
                        line,
                        [read, Sexp::name(op.clone()), Sexp::node(NodeKind::Arglist, line, [rhs])],
                    );
                    write(combined)
                }
            };
            let mut out = vec![Fragment::new(format!("({tmp} = "), line)];
            out.extend(c.process(recv, Level::Expr)?);
            out.push(Fragment::new(", ", line));
            out.extend(c.process(update, Level::Expr)?);
            out.push(Fragment::new(")", line));
            Ok(out)
        })
    }
}
