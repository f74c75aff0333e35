//! Method and class definition, blocks, yield and super.

use quill::{CompileOptions, NodeKind, Sexp, compile};

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

fn lvar(text: &str) -> Sexp {
    n(NodeKind::Lvar, vec![name(text)])
}

fn call(recv: Sexp, mid: &str, args: Vec<Sexp>) -> Sexp {
    n(NodeKind::Call, vec![recv, name(mid), n(NodeKind::Arglist, args)])
}

fn block(stmts: Vec<Sexp>) -> Sexp {
    n(NodeKind::Block, stmts)
}

fn nil() -> Sexp {
    n(NodeKind::Nil, vec![])
}

fn scope(body: Sexp) -> Sexp {
    n(NodeKind::Scope, vec![body])
}

fn defn(mid: &str, args: Vec<Sexp>, body: Sexp) -> Sexp {
    n(NodeKind::Defn, vec![name(mid), n(NodeKind::Args, args), scope(body)])
}

fn class(cname: &str, superclass: Sexp, body: Sexp) -> Sexp {
    n(NodeKind::Class, vec![name(cname), superclass, scope(body)])
}

#[test]
fn methods_install_on_the_def_alias_at_top_level() {
    let out = js(defn("r", vec![], block(vec![n(NodeKind::Return, vec![int(1)])])));
    assert!(out.contains("def.$r = function() {"), "got:\n{out}");
    assert!(out.contains("return 1;"), "got:\n{out}");
    assert!(
        out.contains("def = __opal.Object.prototype"),
        "the top prologue declares the def alias:\n{out}"
    );
}

#[test]
fn bare_return_returns_nil() {
    let out = js(defn("r", vec![], block(vec![n(NodeKind::Return, vec![])])));
    assert!(out.contains("return nil;"), "got:\n{out}");
}

#[test]
fn returned_splat_arrays_stay_literal() {
    let body = n(
        NodeKind::Return,
        vec![n(
            NodeKind::Svalue,
            vec![n(NodeKind::Splat, vec![n(NodeKind::Array, vec![int(1), int(2)])])],
        )],
    );
    let out = js(defn("r", vec![], block(vec![body])));
    assert!(out.contains("return [1, 2];"), "got:\n{out}");
}

#[test]
fn method_bodies_bind_self_and_lift_the_result() {
    let out = js(defn("greet", vec![], block(vec![sym("hi")])));
    assert!(out.contains("var self = this;"), "got:\n{out}");
    assert!(out.contains("return \"hi\";"), "got:\n{out}");
}

#[test]
fn parameters_with_defaults_splat_and_block() {
    let args = vec![
        name("a"),
        name("b"),
        name("*rest"),
        name("&blk"),
        n(NodeKind::Block, vec![n(NodeKind::Lasgn, vec![name("b"), int(2)])]),
    ];
    let out = js(defn("m", args, block(vec![lvar("a")])));
    assert!(
        out.contains("def.$m = TMP_1 = function(a, b, rest) {"),
        "got:\n{out}"
    );
    assert!(
        out.contains("blk = TMP_1._p || nil, TMP_1._p = null;"),
        "got:\n{out}"
    );
    assert!(out.contains("if (b == null) {"), "got:\n{out}");
    assert!(out.contains("b = 2"), "got:\n{out}");
    assert!(
        out.contains("rest = __slice.call(arguments, 2);"),
        "got:\n{out}"
    );
}

#[test]
fn undefined_defaults_are_skipped() {
    let args = vec![
        name("a"),
        n(
            NodeKind::Block,
            vec![n(NodeKind::Lasgn, vec![name("a"), n(NodeKind::Lvar, vec![name("undefined")])])],
        ),
    ];
    let out = js(defn("m", args, block(vec![nil()])));
    assert!(!out.contains("if (a == null)"), "got:\n{out}");
}

#[test]
fn reserved_parameter_names_are_mangled() {
    let out = js(defn("m", vec![name("class")], block(vec![lvar("class")])));
    assert!(out.contains("function(class$) {"), "got:\n{out}");
    assert!(out.contains("return class$;"), "got:\n{out}");
}

#[test]
fn arity_checks_are_exact_for_fixed_signatures() {
    let options = CompileOptions {
        arity_check: true,
        ..opts()
    };
    let tree = defn("m", vec![name("a")], block(vec![nil()]));
    let out = compile(Some(tree), options).expect("compiles");
    assert!(
        out.contains("var $arity = arguments.length; if ($arity !== 1) { __opal.ac($arity, 1, this, \"m\"); }"),
        "got:\n{out}"
    );
}

#[test]
fn arity_checks_go_negative_for_variadic_signatures() {
    let options = CompileOptions {
        arity_check: true,
        ..opts()
    };
    let tree = defn("v", vec![name("a"), name("*rest")], block(vec![nil()]));
    let out = compile(Some(tree), options).expect("compiles");
    assert!(
        out.contains("if ($arity < 1) { __opal.ac($arity, -2, this, \"v\"); }"),
        "got:\n{out}"
    );
}

#[test]
fn classes_boot_through_the_klass_helper() {
    let tree = class("Widget", Sexp::None, block(vec![defn("area", vec![], block(vec![int(4)]))]));
    let out = js(tree);
    assert!(out.contains("(function(__base, __super){"), "got:\n{out}");
    assert!(out.contains("function Widget() {};"), "got:\n{out}");
    assert!(
        out.contains("Widget = __klass(__base, __super, \"Widget\", Widget);"),
        "got:\n{out}"
    );
    assert!(
        out.contains("var def = Widget.prototype, __scope = Widget._scope;"),
        "got:\n{out}"
    );
    assert!(out.contains("def.$area = function() {"), "got:\n{out}");
    assert!(out.contains("})(self, null)"), "got:\n{out}");
    assert!(out.contains("__klass = __opal.klass"), "helper must be declared:\n{out}");
}

#[test]
fn class_bodies_ending_in_a_method_append_nil() {
    let tree = class("Widget", Sexp::None, block(vec![defn("area", vec![], block(vec![int(4)]))]));
    let out = js(tree);
    assert!(out.contains("nil;"), "trailing nil keeps the body value sensible:\n{out}");
}

#[test]
fn scoped_class_names_resolve_their_base() {
    let cid = n(NodeKind::Colon2, vec![n(NodeKind::Const, vec![name("Outer")]), name("Inner")]);
    let tree = n(NodeKind::Class, vec![cid, Sexp::None, scope(block(vec![nil()]))]);
    let out = js(tree);
    assert!(out.contains("function Inner() {};"), "got:\n{out}");
    assert!(out.contains("__scope.Outer"), "the base is compiled in the outer scope:\n{out}");
}

#[test]
fn modules_donate_their_methods() {
    let tree = n(
        NodeKind::Module,
        vec![
            name("Sizable"),
            scope(block(vec![defn("area", vec![], block(vec![int(1)]))])),
        ],
    );
    let out = js(tree);
    assert!(
        out.contains("Sizable = __module(__base, \"Sizable\", Sizable);"),
        "got:\n{out}"
    );
    assert!(
        out.contains(";__opal.donate(Sizable, [\"$area\"]);"),
        "got:\n{out}"
    );
    assert!(out.contains("__module = __opal.module"), "helper must be declared:\n{out}");
}

#[test]
fn singleton_class_bodies_run_against_the_singleton() {
    let tree = n(
        NodeKind::Sclass,
        vec![lvar("obj"), scope(block(vec![defn("x", vec![], block(vec![int(1)]))]))],
    );
    let out = js(block(vec![tree, nil()]));
    assert!(out.contains("(function() {"), "got:\n{out}");
    assert!(out.contains("}).call(__opal.singleton(obj))"), "got:\n{out}");
    assert!(
        out.contains("var self = this, def = self.prototype, __scope = self._scope;"),
        "got:\n{out}"
    );
    assert!(out.contains("def.$x = function() {"), "got:\n{out}");
}

#[test]
fn singleton_methods_on_a_class_use_defs() {
    let tree = class(
        "Widget",
        Sexp::None,
        block(vec![n(
            NodeKind::Defs,
            vec![
                n(NodeKind::SelfRef, vec![]),
                name("build"),
                n(NodeKind::Args, vec![]),
                scope(block(vec![nil()])),
            ],
        )]),
    );
    let out = js(tree);
    assert!(
        out.contains("__opal.defs(Widget, \"$build\", function() {"),
        "got:\n{out}"
    );
}

#[test]
fn singleton_methods_on_objects_use_defs_with_the_receiver() {
    let tree = n(
        NodeKind::Defs,
        vec![
            lvar("obj"),
            name("x"),
            n(NodeKind::Args, vec![]),
            scope(block(vec![nil()])),
        ],
    );
    let out = js(block(vec![tree, nil()]));
    assert!(out.contains("__opal.defs(obj, \"$x\", function() {"), "got:\n{out}");
}

#[test]
fn object_class_bodies_install_through_defn() {
    let tree = class("Object", Sexp::None, block(vec![defn("tap", vec![], block(vec![nil()]))]));
    let out = js(tree);
    assert!(out.contains("Object._defn(\"$tap\", function() {"), "got:\n{out}");
}

#[test]
fn alias_in_a_class_copies_the_prototype_slot() {
    let tree = class("Widget", Sexp::None, block(vec![n(NodeKind::Alias, vec![sym("size"), sym("length")]), nil()]));
    let out = js(tree);
    assert!(out.contains("def.$size = def.$length"), "got:\n{out}");
}

#[test]
fn alias_outside_a_class_goes_through_self_prototype() {
    let out = js(block(vec![n(NodeKind::Alias, vec![sym("size"), sym("length")]), nil()]));
    assert!(
        out.contains("self.prototype.$size = self.prototype.$length"),
        "got:\n{out}"
    );
}

#[test]
fn undef_deletes_the_prototype_slot() {
    let tree = class("Widget", Sexp::None, block(vec![n(NodeKind::Undef, vec![sym("size")]), nil()]));
    let out = js(tree);
    assert!(out.contains("delete def.$size"), "got:\n{out}");
}

#[test]
fn attr_accessor_expands_to_reader_and_writer() {
    let tree = class(
        "Widget",
        Sexp::None,
        block(vec![call(Sexp::None, "attr_accessor", vec![sym("name")]), nil()]),
    );
    let out = js(tree);
    assert!(out.contains("def.$name = function() {"), "got:\n{out}");
    assert!(out.contains("return self.name"), "got:\n{out}");
    assert!(out.contains("def['$name='] = function(val) {"), "got:\n{out}");
    assert!(out.contains("self.name = val"), "got:\n{out}");
    assert!(
        out.contains("if (self.name == null) self.name = nil;"),
        "reader prologue guards the ivar:\n{out}"
    );
}

#[test]
fn blocks_compile_to_tagged_closures() {
    let iter = n(
        NodeKind::Iter,
        vec![
            call(Sexp::None, "lambda", vec![]),
            Sexp::None,
            block(vec![n(NodeKind::Return, vec![int(123)]), int(456)]),
        ],
    );
    let out = js(block(vec![iter, nil()]));
    assert!(out.contains("(TMP_1 = function() {"), "got:\n{out}");
    assert!(out.contains("var self = TMP_1._s || this;"), "got:\n{out}");
    assert!(
        out.contains("return (__breaker.$v = 123, __breaker);"),
        "lexical returns go through the breaker:\n{out}"
    );
    assert!(out.contains("return 456;"), "got:\n{out}");
    assert!(out.contains(", TMP_1._s = self, TMP_1)"), "got:\n{out}");
    assert!(
        out.contains("TMP_2._p = (TMP_1 = function"),
        "the closure attaches as the call's block:\n{out}"
    );
}

#[test]
fn nested_blocks_propagate_lexical_returns() {
    let inner = n(
        NodeKind::Iter,
        vec![
            call(int(1), "times", vec![]),
            Sexp::None,
            block(vec![n(NodeKind::Return, vec![n(NodeKind::True, vec![])]), nil()]),
        ],
    );
    let outer = n(
        NodeKind::Iter,
        vec![
            call(int(1), "times", vec![]),
            Sexp::None,
            block(vec![inner, n(NodeKind::False, vec![])]),
        ],
    );
    let tree = defn("f", vec![], block(vec![outer, n(NodeKind::False, vec![])]));
    let out = js(tree);
    assert!(
        out.contains("return (__breaker.$v = true, __breaker);"),
        "got:\n{out}"
    );
}

#[test]
fn block_parameters_are_nil_defaulted() {
    let iter = n(
        NodeKind::Iter,
        vec![
            call(lvar("list"), "each", vec![]),
            n(NodeKind::Lasgn, vec![name("item")]),
            block(vec![lvar("item")]),
        ],
    );
    let out = js(block(vec![iter, nil()]));
    assert!(out.contains("function(item) {"), "got:\n{out}");
    assert!(out.contains("if (item == null) item = nil;"), "got:\n{out}");
}

#[test]
fn block_splat_parameters_slice_arguments() {
    let params = n(
        NodeKind::Masgn,
        vec![n(
            NodeKind::Array,
            vec![
                n(NodeKind::Lasgn, vec![name("a")]),
                n(NodeKind::Splat, vec![n(NodeKind::Lasgn, vec![name("rest")])]),
            ],
        )],
    );
    let iter = n(
        NodeKind::Iter,
        vec![call(lvar("list"), "each", vec![]), params, block(vec![lvar("a")])],
    );
    let out = js(block(vec![iter, nil()]));
    assert!(out.contains("function(a, rest) {"), "got:\n{out}");
    assert!(out.contains("rest = __slice.call(arguments, 1);"), "got:\n{out}");
}

#[test]
fn destructured_block_parameters_reuse_multiple_assignment() {
    let destructure = n(
        NodeKind::Masgn,
        vec![n(
            NodeKind::Array,
            vec![n(
                NodeKind::Masgn,
                vec![n(
                    NodeKind::Array,
                    vec![
                        n(NodeKind::Lasgn, vec![name("k")]),
                        n(NodeKind::Lasgn, vec![name("v")]),
                    ],
                )],
            )],
        )],
    );
    let iter = n(
        NodeKind::Iter,
        vec![call(lvar("pairs"), "each", vec![]), destructure, block(vec![lvar("k")])],
    );
    let out = js(block(vec![iter, nil()]));
    assert!(out.contains("._isArray ?"), "destructuring coerces to an array:\n{out}");
    assert!(out.contains("k = "), "got:\n{out}");
    assert!(out.contains("v = "), "got:\n{out}");
}

#[test]
fn yield_checks_the_breaker_in_statement_position() {
    let tree = defn("each", vec![], block(vec![n(NodeKind::Yield, vec![int(1)]), nil()]));
    let out = js(tree);
    assert!(
        out.contains("if (__yield.call(null, 1) === __breaker) return __breaker.$v;"),
        "got:\n{out}"
    );
    assert!(
        out.contains("__yield = TMP_1._p || nil, TMP_1._p = null;"),
        "got:\n{out}"
    );
    assert!(out.contains("def.$each = TMP_1 = function() {"), "got:\n{out}");
}

#[test]
fn value_position_yield_returns_through_a_temp() {
    let tree = defn("fetch", vec![], block(vec![n(NodeKind::Yield, vec![])]));
    let out = js(tree);
    assert!(
        out.contains("return TMP_2 = __yield.call(null), TMP_2 === __breaker ? __breaker.$v : TMP_2"),
        "got:\n{out}"
    );
}

#[test]
fn inline_yields_are_lifted_to_a_prior_statement() {
    let tree = defn(
        "m",
        vec![],
        block(vec![call(Sexp::None, "handle", vec![n(NodeKind::Yield, vec![])]), nil()]),
    );
    let out = js(tree);
    assert!(
        out.contains("if ((__yielded = __yield.call(null)) === __breaker) return __breaker.$v;"),
        "got:\n{out}"
    );
    assert!(out.contains("__yielded)"), "the call consumes the lifted value:\n{out}");
    assert!(
        out.contains("var self = this, __yielded, __yield;"),
        "got:\n{out}"
    );
}

#[test]
fn named_block_parameters_own_the_block_slot() {
    let tree = defn(
        "each",
        vec![name("&blk")],
        block(vec![call(Sexp::None, "block_given?", vec![]), nil()]),
    );
    let out = js(tree);
    assert!(out.contains("(blk !== nil)"), "got:\n{out}");
    assert!(out.contains("blk = TMP_1._p || nil"), "got:\n{out}");
}

#[test]
fn block_given_is_false_outside_methods() {
    let out = js(block(vec![call(Sexp::None, "block_given?", vec![]), nil()]));
    assert!(out.contains("false;"), "got:\n{out}");
}

#[test]
fn super_in_a_class_method_captures_the_previous_implementation() {
    let tree = class(
        "Widget",
        n(NodeKind::Const, vec![name("Base")]),
        block(vec![defn("area", vec![], block(vec![n(NodeKind::Zsuper, vec![]), nil()]))]),
    );
    let out = js(tree);
    assert!(out.contains("super_TMP_1 = def.$area;"), "got:\n{out}");
    assert!(
        out.contains("super_TMP_1.apply(self, __slice.call(arguments));"),
        "got:\n{out}"
    );
    assert!(
        out.contains(", super_TMP_1;"),
        "the capture is declared in the class body vars:\n{out}"
    );
}

#[test]
fn super_with_explicit_arguments_passes_an_array() {
    let tree = class(
        "Widget",
        n(NodeKind::Const, vec![name("Base")]),
        block(vec![defn(
            "area",
            vec![name("x")],
            block(vec![n(NodeKind::Super, vec![int(1), lvar("x")]), nil()]),
        )]),
    );
    let out = js(tree);
    assert!(out.contains("super_TMP_1.apply(self, [1, x]);"), "got:\n{out}");
}

#[test]
fn super_outside_a_class_walks_the_klass_chain() {
    let tree = defn("area", vec![], block(vec![n(NodeKind::Zsuper, vec![]), nil()]));
    let out = js(tree);
    assert!(
        out.contains("self._klass._super.prototype.$area.apply(self, __slice.call(arguments));"),
        "got:\n{out}"
    );
}

#[test]
fn super_inside_a_block_chains_through_sup_slots() {
    let iter = n(
        NodeKind::Iter,
        vec![
            call(Sexp::None, "each", vec![]),
            Sexp::None,
            block(vec![n(NodeKind::Zsuper, vec![]), nil()]),
        ],
    );
    let tree = class(
        "Widget",
        Sexp::None,
        block(vec![defn("f", vec![], block(vec![iter, nil()]))]),
    );
    let out = js(tree);
    assert!(
        out.contains("._sup || TMP_2._sup || self._klass._super.prototype[\"$f\"]).apply(self, __slice.call(arguments))"),
        "got:\n{out}"
    );
}

#[test]
fn super_outside_any_method_is_an_error() {
    let err = compile(Some(n(NodeKind::Zsuper, vec![])), opts()).expect_err("super at top level");
    assert!(
        err.to_string().contains("super called outside of method"),
        "got: {err}"
    );
}
