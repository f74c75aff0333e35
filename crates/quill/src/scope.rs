//! Lexical scope records.
//!
//! The compiler keeps an explicit stack of these; one is pushed when the
//! walker enters a `top`/`class`/`module`/`sclass`/`def`/`iter` construct
//! and popped when it leaves. A scope owns everything that must be declared
//! at the head of its emitted function body: pooled temporaries, locals,
//! and instance-variable guards.

use indexmap::IndexSet;

/// The construct a scope was opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeKind {
    Top,
    Class,
    Module,
    Sclass,
    Def,
    Iter,
}

/// One `while`/`until` nesting level.
///
/// `break`/`next`/`redo` consult the innermost frame: a loop compiled
/// inside a statement closure must `return` instead of `break`, and `redo`
/// switches the loop to its re-entrant form.
#[derive(Debug)]
pub(crate) struct WhileFrame {
    /// The loop is wrapped in an IIFE, so `break <val>` becomes `return <val>`.
    pub closure: bool,
    /// Scope temp driving the redo re-entry check.
    pub redo_var: String,
    /// Set when the loop body contained a `redo`.
    pub use_redo: bool,
}

#[derive(Debug)]
pub(crate) struct Scope {
    pub kind: ScopeKind,
    /// Declared name, for class/module scopes.
    pub name: Option<String>,
    /// Method id, for def scopes; read back by `super`.
    pub mid: Option<String>,
    /// The def is a singleton definition (`def self.x` / `def obj.x`).
    pub defs: bool,

    locals: IndexSet<String>,
    args: IndexSet<String>,
    /// Instance-variable accessors seen in this scope (`.name` or `['name']`).
    ivars: IndexSet<String>,
    /// jsids of methods declared in a class/module body, in order.
    pub methods: Vec<String>,

    /// Declaration entries for the scope's `var` line, in emission order.
    /// Most are bare temp names; some are full initializers such as
    /// `self = this`.
    temps: Vec<String>,
    /// Released temp names available for reuse.
    pool: Vec<String>,
    /// Temps acquired and not yet queued back.
    live: usize,

    /// Identifier bound to the block parameter of a method or iter.
    pub block_name: Option<String>,
    pub uses_block: bool,
    /// `super_TMP_n` capture name, once a method body used `super`.
    pub uses_super: Option<String>,
    pub defines_defn: bool,
    pub defines_defs: bool,
    pub while_stack: Vec<WhileFrame>,
    /// Stable id (`TMP_n`) referring to the emitted function from within
    /// its own body; minted lazily, declared in the parent scope.
    pub identity: Option<String>,
    pub donates_methods: bool,
}

impl Scope {
    pub fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            name: None,
            mid: None,
            defs: false,
            locals: IndexSet::new(),
            args: IndexSet::new(),
            ivars: IndexSet::new(),
            methods: Vec::new(),
            temps: Vec::new(),
            pool: Vec::new(),
            live: 0,
            block_name: None,
            uses_block: false,
            uses_super: None,
            defines_defn: false,
            defines_defs: false,
            while_stack: Vec::new(),
            identity: None,
            donates_methods: false,
        }
    }

    pub fn top(&self) -> bool {
        self.kind == ScopeKind::Top
    }

    /// True for scopes whose body is a class or module body.
    pub fn class_scope(&self) -> bool {
        matches!(self.kind, ScopeKind::Class | ScopeKind::Module)
    }

    pub fn iter(&self) -> bool {
        self.kind == ScopeKind::Iter
    }

    /// The expression the scope's `self` compiles to: the declared name in
    /// class/module bodies, the bound `self` variable everywhere else.
    pub fn self_ref(&self) -> &str {
        if self.class_scope() {
            self.name.as_deref().unwrap_or("self")
        } else {
            "self"
        }
    }

    pub fn add_arg(&mut self, name: impl Into<String>) {
        self.args.insert(name.into());
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.locals.contains(name) || self.args.contains(name)
    }

    /// Registers a local for the `var` line unless it is already an
    /// argument or known local.
    pub fn add_local(&mut self, name: &str) {
        if !self.has_local(name) {
            self.locals.insert(name.to_owned());
        }
    }

    pub fn add_ivar(&mut self, accessor: impl Into<String>) {
        self.ivars.insert(accessor.into());
    }

    /// Adds a raw declaration entry to the `var` line.
    pub fn add_temp(&mut self, decl: impl Into<String>) {
        self.temps.push(decl.into());
    }

    /// Splices declaration entries ahead of everything already recorded.
    /// The top-level assembler uses this to put the prologue bindings first.
    pub fn prepend_temps(&mut self, decls: Vec<String>) {
        self.temps.splice(0..0, decls);
    }

    pub fn has_temp(&self, name: &str) -> bool {
        self.temps.iter().any(|t| t == name)
    }

    /// Acquires a temp: reuses a pooled one or mints `TMP_{n}` from the
    /// compiler-wide counter.
    pub fn new_temp(&mut self, unique: &mut u32) -> String {
        self.live += 1;
        if let Some(name) = self.pool.pop() {
            return name;
        }
        *unique += 1;
        let name = format!("TMP_{unique}");
        self.temps.push(name.clone());
        name
    }

    /// Returns a temp to the pool for reuse by sibling subtrees. The name
    /// stays in the `var` line.
    pub fn queue_temp(&mut self, name: String) {
        debug_assert!(self.live > 0, "queueing temp {name} with no live temps");
        self.live = self.live.saturating_sub(1);
        self.pool.push(name);
    }

    /// Count of acquired-but-not-released temps; zero when balanced.
    pub fn live_temps(&self) -> usize {
        self.live
    }

    pub fn in_while(&self) -> bool {
        !self.while_stack.is_empty()
    }

    /// Renders the `var` declaration line plus instance-variable guards for
    /// the head of the scope's emitted body. Empty string when there is
    /// nothing to declare.
    pub fn var_line(&self, indent: &str) -> String {
        let mut decls: Vec<String> = self.temps.clone();
        decls.extend(self.locals.iter().map(|local| format!("{local} = nil")));

        let mut out = String::new();
        if !decls.is_empty() {
            out.push_str("var ");
            out.push_str(&decls.join(", "));
            out.push(';');
        }
        let slf = self.self_ref();
        for accessor in &self.ivars {
            if !out.is_empty() {
                out.push('\n');
                out.push_str(indent);
            }
            out.push_str(&format!("if ({slf}{accessor} == null) {slf}{accessor} = nil;"));
        }
        out
    }

    /// Registers a method declared in a class/module body, by source id.
    pub fn add_method(&mut self, mid: &str) {
        self.methods.push(format!("${mid}"));
    }

    /// Renders the module-donation call for the class template's trailing
    /// slot. Classes record methods but donate nothing.
    pub fn donate_methods(&self) -> String {
        if self.donates_methods && self.kind == ScopeKind::Module && !self.methods.is_empty() {
            let name = self.name.as_deref().unwrap_or("self");
            let list = self
                .methods
                .iter()
                .map(|m| format!("{m:?}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!(";__opal.donate({name}, [{list}]);")
        } else {
            String::new()
        }
    }
}
