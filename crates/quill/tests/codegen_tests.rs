//! Literals, variables, collections and call dispatch.

use pretty_assertions::assert_eq;
use quill::{CompileOptions, Compiler, Node, NodeKind, Sexp, compile};

fn opts() -> CompileOptions {
    CompileOptions {
        source_map_enabled: false,
        ..CompileOptions::default()
    }
}

fn js(tree: Sexp) -> String {
    compile(Some(tree), opts()).expect("compilation should succeed")
}

fn n(kind: NodeKind, children: Vec<Sexp>) -> Sexp {
    Sexp::node(kind, 1, children)
}

fn name(text: &str) -> Sexp {
    Sexp::name(text)
}

fn int(value: i64) -> Sexp {
    n(NodeKind::Lit, vec![Sexp::Int(value)])
}

fn sym(text: &str) -> Sexp {
    n(NodeKind::Lit, vec![Sexp::Sym(text.to_owned())])
}

fn string(text: &str) -> Sexp {
    n(NodeKind::Str, vec![Sexp::Str(text.to_owned())])
}

fn lvar(text: &str) -> Sexp {
    n(NodeKind::Lvar, vec![name(text)])
}

fn lasgn(target: &str, rhs: Sexp) -> Sexp {
    n(NodeKind::Lasgn, vec![name(target), rhs])
}

fn arglist(args: Vec<Sexp>) -> Sexp {
    n(NodeKind::Arglist, args)
}

fn call(recv: Sexp, mid: &str, args: Vec<Sexp>) -> Sexp {
    n(NodeKind::Call, vec![recv, name(mid), arglist(args)])
}

fn block(stmts: Vec<Sexp>) -> Sexp {
    n(NodeKind::Block, stmts)
}

#[test]
fn minimal_program_shape() {
    let out = js(int(42));
    assert_eq!(
        out,
        "(function(__opal) {\n  var self = __opal.top, __scope = __opal, $mm = __opal.mm, \
         nil = __opal.nil, __breaker = __opal.breaker, __slice = __opal.slice;\n  \
         return 42\n})(Opal);\n"
    );
}

#[test]
fn string_literals_are_js_quoted() {
    let out = js(string("he said \"hi\"\n"));
    assert!(
        out.contains("return \"he said \\\"hi\\\"\\n\""),
        "expected escaped string literal, got:\n{out}"
    );
}

#[test]
fn symbols_compile_to_quoted_strings() {
    let out = js(sym("ready"));
    assert!(out.contains("return \"ready\""), "got:\n{out}");
}

#[test]
fn float_literals_round_trip_shortest() {
    let out = js(n(NodeKind::Lit, vec![Sexp::Float(1.5)]));
    assert!(out.contains("return 1.5"), "got:\n{out}");
}

#[test]
fn numeric_receivers_are_parenthesized() {
    let out = js(call(int(1), "succ", vec![]));
    assert!(out.contains("(TMP_1 = (1)).$succ"), "got:\n{out}");
}

#[test]
fn empty_regexp_becomes_match_anything_anchor() {
    let out = js(n(NodeKind::Lit, vec![Sexp::Regexp(String::new())]));
    assert!(out.contains("/^/"), "got:\n{out}");
    let out = js(n(NodeKind::Lit, vec![Sexp::Regexp("a+b".to_owned())]));
    assert!(out.contains("/a+b/"), "got:\n{out}");
}

#[test]
fn range_literals_call_the_range_helper_and_declare_it() {
    let out = js(n(
        NodeKind::Lit,
        vec![Sexp::Range {
            start: 1,
            end: 5,
            exclusive: false,
        }],
    ));
    assert!(out.contains("__range(1, 5, false)"), "got:\n{out}");
    assert!(out.contains("__range = __opal.range"), "helper must be declared:\n{out}");
}

#[test]
fn interpolated_strings_join_with_plus() {
    let tree = n(
        NodeKind::Dstr,
        vec![
            Sexp::Str("a".to_owned()),
            n(NodeKind::Evstr, vec![lvar("x")]),
            Sexp::Str("b".to_owned()),
        ],
    );
    let out = js(tree);
    assert!(out.contains("\"a\" + (x) + \"b\""), "got:\n{out}");
}

#[test]
fn interpolated_symbols_stringify_expression_parts() {
    let tree = n(
        NodeKind::Dsym,
        vec![Sexp::Str("tag_".to_owned()), n(NodeKind::Evstr, vec![lvar("x")])],
    );
    let out = js(tree);
    assert!(out.contains("\"tag_\" + "), "got:\n{out}");
    assert!(out.contains(".$to_s"), "expression parts must call to_s:\n{out}");
}

#[test]
fn dynamic_regexps_build_a_regexp_object() {
    let tree = n(
        NodeKind::Dregx,
        vec![Sexp::Str("^a".to_owned()), n(NodeKind::Evstr, vec![lvar("x")])],
    );
    let out = js(tree);
    assert!(out.contains("(new RegExp(\"^a\" + x))"), "got:\n{out}");
}

#[test]
fn inline_js_is_spliced_verbatim() {
    let tree = block(vec![
        n(NodeKind::Xstr, vec![Sexp::Str("console.log(1)".to_owned())]),
        int(5),
    ]);
    let out = js(tree);
    assert!(out.contains("console.log(1);"), "xstr gets a statement semicolon:\n{out}");
}

#[test]
fn local_assignment_declares_a_nil_initialized_var() {
    let out = js(block(vec![lasgn("count", int(1)), lvar("count")]));
    assert!(out.contains("count = nil;"), "var line must initialize the local:\n{out}");
    assert!(out.contains("count = 1;"), "got:\n{out}");
}

#[test]
fn reserved_word_locals_get_a_dollar_suffix() {
    let tree = block(vec![
        lasgn("let", int(1)),
        n(NodeKind::Operator, vec![name("+"), lvar("let"), int(1)]),
    ]);
    let out = js(tree);
    assert!(out.contains("let$ = 1;"), "got:\n{out}");
    assert!(!out.contains("let = "), "bare reserved word must never be emitted:\n{out}");
}

#[test]
fn instance_variables_read_through_self_and_are_guarded() {
    let out = js(n(NodeKind::Ivar, vec![name("@size")]));
    assert!(out.contains("return self.size"), "got:\n{out}");
    assert!(
        out.contains("if (self.size == null) self.size = nil;"),
        "scope prologue must nil-guard seen ivars:\n{out}"
    );
}

#[test]
fn reserved_ivar_names_use_index_accessors() {
    let out = js(n(NodeKind::Ivar, vec![name("@new")]));
    assert!(out.contains("self['new']"), "got:\n{out}");
}

#[test]
fn global_variables_go_through_the_gvars_helper() {
    let tree = block(vec![
        n(NodeKind::Gasgn, vec![name("$debug"), int(1)]),
        n(NodeKind::Gvar, vec![name("$debug")]),
    ]);
    let out = js(tree);
    assert!(out.contains("__gvars[\"debug\"] = 1"), "got:\n{out}");
    assert!(out.contains("__gvars = __opal.gvars"), "helper must be declared:\n{out}");
}

#[test]
fn class_variable_assignment_shape() {
    let out = js(n(NodeKind::Cvdecl, vec![name("@@x"), int(5)]));
    assert!(out.contains("(Opal.cvars[\"@@x\"] = 5)"), "got:\n{out}");
}

#[test]
fn class_variable_reads_are_nil_defaulted() {
    let out = js(n(NodeKind::Cvar, vec![name("@@x")]));
    assert!(
        out.contains("((TMP_1 = Opal.cvars[\"@@x\"]) == null ? nil : TMP_1)"),
        "got:\n{out}"
    );
}

#[test]
fn constants_route_through_the_constant_missing_trap() {
    let out = js(n(NodeKind::Const, vec![name("Widget")]));
    assert!(
        out.contains("((TMP_1 = __scope.Widget) == null ? __opal.cm(\"Widget\") : TMP_1)"),
        "got:\n{out}"
    );
}

#[test]
fn constants_resolve_directly_without_const_missing() {
    let options = CompileOptions {
        const_missing: false,
        ..opts()
    };
    let out = compile(Some(n(NodeKind::Const, vec![name("Widget")])), options).expect("compiles");
    assert!(out.contains("return __scope.Widget"), "got:\n{out}");
}

#[test]
fn scoped_constants_look_through_base_scope() {
    let tree = n(NodeKind::Colon2, vec![n(NodeKind::Const, vec![name("Outer")]), name("Inner")]);
    let out = js(tree);
    assert!(out.contains(")._scope.Inner"), "got:\n{out}");
    assert!(out.contains("__opal.cm(\"Inner\")"), "got:\n{out}");

    let out = js(n(NodeKind::Colon3, vec![name("Root")]));
    assert!(out.contains("__opal.Object._scope.Root"), "got:\n{out}");
}

#[test]
fn regex_match_refs_are_stable_nil() {
    let out = js(n(NodeKind::NthRef, vec![Sexp::Int(1)]));
    assert!(out.contains("return nil"), "got:\n{out}");
}

#[test]
fn keyed_hash_literals_use_the_hash2_fast_path() {
    let tree = n(
        NodeKind::Hash,
        vec![sym("a"), int(1), sym("b"), int(2)],
    );
    let out = js(tree);
    assert!(
        out.contains("__hash2([\"a\", \"b\"], {a: 1, b: 2})"),
        "got:\n{out}"
    );
    assert!(out.contains("__hash2 = __opal.hash2"), "helper must be declared:\n{out}");
}

#[test]
fn hash_keys_that_are_not_identifiers_stay_quoted() {
    let tree = n(
        NodeKind::Hash,
        vec![string("my-key"), int(1)],
    );
    let out = js(tree);
    assert!(out.contains("{\"my-key\": 1}"), "got:\n{out}");
}

#[test]
fn mixed_key_hashes_fall_back_to_the_pairwise_constructor() {
    let tree = n(NodeKind::Hash, vec![sym("a"), int(1), lvar("k"), int(2)]);
    let out = js(tree);
    assert!(out.contains("__hash(\"a\", 1, k, 2)"), "got:\n{out}");
    assert!(out.contains("__hash = __opal.hash"), "helper must be declared:\n{out}");
}

#[test]
fn duplicate_hash_keys_keep_first_position_last_value() {
    let tree = n(
        NodeKind::Hash,
        vec![sym("a"), int(1), sym("b"), int(2), sym("a"), int(3)],
    );
    let out = js(tree);
    assert!(
        out.contains("__hash2([\"a\", \"b\"], {a: 3, b: 2})"),
        "got:\n{out}"
    );
}

#[test]
fn array_literals_with_mid_list_splats_concat() {
    let tree = n(
        NodeKind::Array,
        vec![int(1), n(NodeKind::Splat, vec![lvar("rest")]), int(2)],
    );
    let out = js(tree);
    assert!(out.contains("[1].concat(rest).concat([2])"), "got:\n{out}");
}

#[test]
fn method_missing_dispatch_shape() {
    let out = js(call(Sexp::None, "puts", vec![int(1)]));
    assert!(
        out.contains("((TMP_1 = self).$puts || $mm(\"puts\")).call(TMP_1, 1)"),
        "got:\n{out}"
    );
}

#[test]
fn plain_dispatch_shape_without_method_missing() {
    let options = CompileOptions {
        method_missing: false,
        ..opts()
    };
    let out = compile(Some(call(Sexp::None, "puts", vec![int(1)])), options).expect("compiles");
    assert!(out.contains("(TMP_1 = self).$puts.call(TMP_1, 1)"), "got:\n{out}");
    assert!(!out.contains("$mm("), "no method-missing fallback expected:\n{out}");
}

#[test]
fn splat_arguments_switch_to_apply() {
    let out = js(call(Sexp::None, "puts", vec![n(NodeKind::Splat, vec![lvar("args")])]));
    assert!(
        out.contains(".apply(TMP_1, [].concat(args))"),
        "got:\n{out}"
    );
}

#[test]
fn operator_calls_use_index_accessors() {
    let out = js(call(lvar("a"), "==", vec![lvar("b")]));
    assert!(out.contains("['$==']"), "got:\n{out}");
}

#[test]
fn optimized_operators_take_the_numeric_fast_path() {
    let tree = n(NodeKind::Operator, vec![name("=="), lvar("foo"), lvar("bar")]);
    let out = js(tree);
    assert!(
        out.contains(
            "(TMP_1 = foo, TMP_2 = bar, typeof(TMP_1) === 'number' ? TMP_1 == TMP_2 : TMP_1['$=='](TMP_2))"
        ),
        "got:\n{out}"
    );
}

#[test]
fn unoptimized_operators_always_dispatch() {
    let options = CompileOptions {
        optimized_operators: false,
        ..opts()
    };
    let tree = n(NodeKind::Operator, vec![name("+"), lvar("a"), lvar("b")]);
    let out = compile(Some(tree), options).expect("compiles");
    assert!(out.contains("a['$+'](b)"), "got:\n{out}");
    assert!(!out.contains("typeof"), "no fast path expected:\n{out}");
}

#[test]
fn attribute_assignment_is_setter_dispatch() {
    let tree = n(
        NodeKind::Attrasgn,
        vec![lvar("a"), name("b="), arglist(vec![int(1)])],
    );
    let out = js(tree);
    assert!(out.contains("['$b=']"), "got:\n{out}");
}

#[test]
fn logical_and_binds_and_tests_the_lhs() {
    let tree = n(NodeKind::And, vec![call(Sexp::None, "ready?", vec![]), int(2)]);
    let out = js(tree);
    assert!(
        out.contains(", TMP_1 !== false && TMP_1 !== nil ? "),
        "got:\n{out}"
    );
}

#[test]
fn logical_or_returns_the_lhs_when_truthy() {
    let tree = n(NodeKind::Or, vec![lvar("a"), int(2)]);
    let out = js(tree);
    assert!(
        out.contains("((TMP_1 = a) !== false && TMP_1 !== nil ? TMP_1 : 2)"),
        "got:\n{out}"
    );
}

#[test]
fn or_assignment_compiles_as_logical_or() {
    let tree = n(NodeKind::OpAsgnOr, vec![lvar("x"), lasgn("x", int(1))]);
    let out = js(tree);
    assert!(
        out.contains("((TMP_1 = x) !== false && TMP_1 !== nil ? TMP_1 : x = 1)"),
        "got:\n{out}"
    );
}

#[test]
fn index_update_reads_combines_and_writes_back() {
    let tree = n(
        NodeKind::OpAsgn1,
        vec![lvar("a"), arglist(vec![int(0)]), name("+"), int(2)],
    );
    let out = js(tree);
    assert!(out.contains("['$[]']("), "read accessor expected:\n{out}");
    assert!(out.contains("['$[]=']("), "write accessor expected:\n{out}");
    assert!(out.contains("['$+']("), "combine accessor expected:\n{out}");
}

#[test]
fn attribute_update_binds_the_receiver_once() {
    let tree = n(
        NodeKind::OpAsgn2,
        vec![lvar("o"), name("size="), name("+"), int(1)],
    );
    let out = js(tree);
    assert!(out.contains("(TMP_1 = o, "), "got:\n{out}");
    assert!(out.contains("['$size=']"), "got:\n{out}");
}

#[test]
fn multiple_assignment_from_array_literal() {
    let targets = n(NodeKind::Array, vec![n(NodeKind::Lasgn, vec![name("a")]), n(NodeKind::Lasgn, vec![name("b")])]);
    let rhs = n(NodeKind::Array, vec![int(1), int(2)]);
    let out = js(n(NodeKind::Masgn, vec![targets, rhs]));
    assert!(
        out.contains("TMP_1 = [1, 2], a = TMP_1[0], b = TMP_1[1]"),
        "got:\n{out}"
    );
}

#[test]
fn multiple_assignment_from_value_guards_missing_slots() {
    let targets = n(NodeKind::Array, vec![n(NodeKind::Lasgn, vec![name("a")]), n(NodeKind::Lasgn, vec![name("b")])]);
    let rhs = n(NodeKind::ToAry, vec![lvar("pair")]);
    let out = js(n(NodeKind::Masgn, vec![targets, rhs]));
    assert!(out.contains("._isArray ? TMP_1 : (TMP_1 = [TMP_1])"), "got:\n{out}");
    assert!(
        out.contains("b = (TMP_1[1] == null ? nil : TMP_1[1])"),
        "slots past the known length are nil-guarded:\n{out}"
    );
}

#[test]
fn multiple_assignment_splat_target_slices_the_rest() {
    let targets = n(
        NodeKind::Array,
        vec![
            n(NodeKind::Lasgn, vec![name("a")]),
            n(NodeKind::Splat, vec![n(NodeKind::Lasgn, vec![name("rest")])]),
        ],
    );
    let rhs = n(NodeKind::Array, vec![int(1), int(2), int(3)]);
    let out = js(n(NodeKind::Masgn, vec![targets, rhs]));
    assert!(out.contains("rest = __slice.call(TMP_1, 1)"), "got:\n{out}");
}

#[test]
fn irb_mode_persists_top_level_locals() {
    let options = CompileOptions { irb: true, ..opts() };
    let tree = block(vec![lasgn("x", int(1)), lvar("x")]);
    let out = compile(Some(tree), options).expect("compiles");
    assert!(out.contains("Opal.irb_vars.x = 1"), "got:\n{out}");
    assert!(
        out.contains("((TMP_1 = Opal.irb_vars.x) == null ? nil : TMP_1)"),
        "got:\n{out}"
    );
    assert!(!out.contains("x = nil"), "irb locals must not be declared:\n{out}");
}

#[test]
fn irb_mode_resolves_bare_calls_against_persisted_vars() {
    let options = CompileOptions { irb: true, ..opts() };
    let out = compile(Some(call(Sexp::None, "history", vec![])), options).expect("compiles");
    assert!(
        out.contains("((TMP_1 = Opal.irb_vars.history) == null ? "),
        "got:\n{out}"
    );
    assert!(out.contains(".$history || $mm(\"history\")"), "fallback is a self-call:\n{out}");
}

#[test]
fn file_equal_string_literal_sets_the_uses_file_flag() {
    let mut compiler = Compiler::new(opts());
    compiler
        .compile(Some(string("(file)")))
        .expect("compilation should succeed");
    assert!(compiler.uses_file());

    compiler.compile(Some(string("other"))).expect("compiles");
    assert!(!compiler.uses_file(), "flag resets between compilations");
}

#[test]
fn defined_queries_report_their_operand_kind() {
    let out = js(n(NodeKind::Defined, vec![lvar("x")]));
    assert!(out.contains("\"local-variable\""), "got:\n{out}");

    let out = js(n(NodeKind::Defined, vec![call(Sexp::None, "size", vec![])]));
    assert!(out.contains(".$size ? \"method\" : nil)"), "got:\n{out}");

    let out = js(n(NodeKind::Defined, vec![n(NodeKind::Ivar, vec![name("@count")])]));
    assert!(
        out.contains("((TMP_1 = self.count, TMP_1 != null && TMP_1 !== nil) ? \"instance-variable\" : nil)"),
        "plain ivar names use the dot accessor:\n{out}"
    );

    let out = js(n(NodeKind::Defined, vec![n(NodeKind::Ivar, vec![name("@new")])]));
    assert!(
        out.contains("((TMP_1 = self['new'], TMP_1 != null && TMP_1 !== nil) ? \"instance-variable\" : nil)"),
        "reserved ivar names use the quoted index accessor:\n{out}"
    );

    let out = js(n(NodeKind::Defined, vec![n(NodeKind::Const, vec![name("Widget")])]));
    assert!(out.contains("(__scope.Widget != null ? \"constant\" : nil)"), "got:\n{out}");
}

#[test]
fn not_binds_and_inverts() {
    let out = js(n(NodeKind::Not, vec![lvar("x")]));
    assert!(
        out.contains("(TMP_1 = x, (TMP_1 === false || TMP_1 === nil))"),
        "got:\n{out}"
    );
}

#[test]
fn block_node_appends_semicolons_to_expression_statements() {
    let out = js(block(vec![int(1), int(2)]));
    assert!(out.contains("1;"), "got:\n{out}");
    assert!(out.contains("return 2"), "last statement is lifted:\n{out}");
}

fn defn(mid: &str, args: Vec<Sexp>, body: Sexp) -> Node {
    Node::new(NodeKind::Defn, 1)
        .child(name(mid))
        .child(n(NodeKind::Args, args))
        .child(n(NodeKind::Scope, vec![body]))
}

#[test]
fn builder_api_constructs_the_same_trees_as_the_helpers() {
    let via_builder = defn("r", vec![], block(vec![int(1)])).into_sexp();
    let via_helpers = n(
        NodeKind::Defn,
        vec![
            name("r"),
            n(NodeKind::Args, vec![]),
            n(NodeKind::Scope, vec![block(vec![int(1)])]),
        ],
    );
    assert_eq!(via_builder, via_helpers);
}
