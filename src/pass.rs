//! Pass driver & registry
//!
//! [`VraPass`] is the module-level driver: it builds the global scope from
//! the module's named constants, runs a [`FunctionAnalyzer`] over every
//! function, and records each function's result scope under the function's
//! name. The pass is exposed to a host pipeline through the [`ModulePass`]
//! trait and a name-keyed [`PassRegistry`] (the analysis registers as
//! `"vra"` and preserves all other analyses).

use std::collections::BTreeMap;

use tracing::debug;

use crate::analyzer::FunctionAnalyzer;
use crate::ir::{Initializer, Module};
use crate::range::Range;
use crate::scope::{Operand, OperandKind, ScopeArena, ScopeId, ScopeJson};

/// Analysis knobs.
#[derive(Clone, Debug)]
pub struct VraConfig {
    /// Restrict the analysis to one function, when set.
    pub only_function: Option<String>,
    /// Iteration cap used when a loop's trip count is uncomputable.
    pub max_iter_fallback: u64,
}

impl Default for VraConfig {
    fn default() -> Self {
        VraConfig { only_function: None, max_iter_fallback: 100 }
    }
}

/// What a pass promises about the analyses of the host pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PreservedAnalyses {
    /// Nothing was invalidated.
    All,
    /// Everything must be recomputed.
    None,
}

/// A transformation or analysis runnable over a whole module.
pub trait ModulePass {
    /// Pipeline name of the pass.
    fn name(&self) -> &'static str;
    /// Run over `module`.
    fn run(&mut self, module: &Module) -> PreservedAnalyses;
}

/// The value-range-analysis module pass.
#[derive(Debug, Default)]
pub struct VraPass {
    cfg: VraConfig,
    arena: ScopeArena,
    global: Option<ScopeId>,
    function_scopes: BTreeMap<String, ScopeId>,
}

impl VraPass {
    /// A pass with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// A pass with explicit configuration.
    pub fn with_config(cfg: VraConfig) -> Self {
        VraPass { cfg, ..Self::default() }
    }

    /// The arena holding every scope the pass produced.
    #[inline]
    pub fn arena(&self) -> &ScopeArena {
        &self.arena
    }

    /// The global scope (module constants); present after a run.
    #[inline]
    pub fn global_scope(&self) -> Option<ScopeId> {
        self.global
    }

    /// The result scope recorded for `name`, if the function was analysed.
    pub fn get_function_scope(&self, name: &str) -> Option<ScopeId> {
        self.function_scopes.get(name).copied()
    }

    /// JSON snapshot of a function's scope chain.
    pub fn function_scope_json(&self, name: &str) -> Option<ScopeJson> {
        self.get_function_scope(name).map(|s| self.arena.to_json(s))
    }

    /// Names of the analysed functions, sorted.
    pub fn analyzed_functions(&self) -> impl Iterator<Item = &str> {
        self.function_scopes.keys().map(String::as_str)
    }

    fn process_module(&mut self, module: &Module) {
        let global = self.arena.new_scope(None);
        self.global = Some(global);

        for g in module.globals() {
            match g.init {
                Initializer::Int(v) => {
                    self.arena.add_operand(
                        global,
                        Operand::concrete(
                            g.name.clone(),
                            OperandKind::Constant,
                            Range::fixed_point(v as f64),
                        ),
                    );
                }
                Initializer::Float(v) => {
                    self.arena.add_operand(
                        global,
                        Operand::concrete(
                            g.name.clone(),
                            OperandKind::Constant,
                            Range::fixed_point(v),
                        ),
                    );
                }
                Initializer::Opaque => {
                    debug!(global = %g.name, "unsupported initializer, skipped");
                }
            }
        }

        for f in module.functions() {
            if let Some(only) = &self.cfg.only_function {
                if &f.name != only {
                    continue;
                }
            }
            if f.num_blocks() == 0 {
                debug!(function = %f.name, "empty function, skipped");
                continue;
            }
            debug!(function = %f.name, "analyzing");
            let mut fa = FunctionAnalyzer::new(
                f,
                &mut self.arena,
                Some(global),
                self.cfg.max_iter_fallback,
            );
            let scope = fa.analyze(&mut self.arena);
            self.function_scopes.insert(f.name.clone(), scope);
        }
    }
}

impl ModulePass for VraPass {
    fn name(&self) -> &'static str {
        "vra"
    }

    fn run(&mut self, module: &Module) -> PreservedAnalyses {
        self.process_module(module);
        PreservedAnalyses::All
    }
}

/// Name-keyed factory registry, the hook a host pipeline parses pass
/// names against.
#[derive(Default)]
pub struct PassRegistry {
    factories: BTreeMap<&'static str, fn() -> Box<dyn ModulePass>>,
}

impl PassRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the passes of this crate registered.
    pub fn with_default_passes() -> Self {
        let mut reg = Self::new();
        reg.register("vra", || Box::new(VraPass::new()));
        reg
    }

    /// Register a pass factory under `name`.
    pub fn register(&mut self, name: &'static str, factory: fn() -> Box<dyn ModulePass>) {
        self.factories.insert(name, factory);
    }

    /// Instantiate the pass registered under `name`.
    pub fn create(&self, name: &str) -> Option<Box<dyn ModulePass>> {
        self.factories.get(name).map(|f| f())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, FunctionBuilder, Value};

    fn demo_module() -> Module {
        let mut m = Module::new("demo");
        m.add_global("K", Initializer::Int(7));
        m.add_global("PI", Initializer::Float(3.5));
        m.add_global("BLOB", Initializer::Opaque);

        let mut fb = FunctionBuilder::new("main", &[]);
        let entry = fb.block("entry");
        fb.binary(entry, "r", BinOp::Add, Value::var("K"), Value::int(5));
        fb.ret(entry, Some(Value::var("r")));
        m.add_function(fb.finish().unwrap());

        let mut fb = FunctionBuilder::new("aux", &["a"]);
        let entry = fb.block("entry");
        fb.binary(entry, "d", BinOp::Mul, Value::var("a"), Value::int(2));
        fb.ret(entry, Some(Value::var("d")));
        m.add_function(fb.finish().unwrap());

        m
    }

    #[test]
    fn global_constants_become_fixed_and_are_visible() {
        let m = demo_module();
        let mut pass = VraPass::new();
        assert_eq!(pass.run(&m), PreservedAnalyses::All);

        let global = pass.global_scope().unwrap();
        let k = pass.arena().lookup(global, "K").unwrap();
        assert_eq!(pass.arena().operand(k).range, Some(Range::fixed_point(7.0)));
        // the opaque initializer was skipped
        assert!(pass.arena().lookup(global, "BLOB").is_none());

        // `main` folded K + 5 through the global scope
        let main = pass.get_function_scope("main").unwrap();
        let ret = pass.arena().lookup(main, "return").unwrap();
        assert_eq!(pass.arena().operand(ret).range, Some(Range::point(12.0)));
    }

    #[test]
    fn every_function_gets_a_result_scope() {
        let m = demo_module();
        let mut pass = VraPass::new();
        pass.run(&m);
        let names: Vec<&str> = pass.analyzed_functions().collect();
        assert_eq!(names, vec!["aux", "main"]);
        assert!(pass.get_function_scope("missing").is_none());
    }

    #[test]
    fn only_function_filter_restricts_the_run() {
        let m = demo_module();
        let mut pass = VraPass::with_config(VraConfig {
            only_function: Some("aux".into()),
            ..VraConfig::default()
        });
        pass.run(&m);
        assert!(pass.get_function_scope("aux").is_some());
        assert!(pass.get_function_scope("main").is_none());
    }

    #[test]
    fn registry_creates_the_vra_pass_by_name() {
        let reg = PassRegistry::with_default_passes();
        assert_eq!(reg.names().collect::<Vec<_>>(), vec!["vra"]);

        let mut pass = reg.create("vra").expect("vra registered");
        assert_eq!(pass.name(), "vra");
        assert_eq!(pass.run(&demo_module()), PreservedAnalyses::All);
        assert!(reg.create("nope").is_none());
    }

    #[test]
    fn function_scope_json_has_the_documented_shape() {
        let m = demo_module();
        let mut pass = VraPass::new();
        pass.run(&m);

        let j = pass.function_scope_json("main").unwrap();
        let text = serde_json::to_string(&j).unwrap();
        assert!(text.starts_with("{\"vars\":["));
        assert!(text.contains("\"name\":\"return\""));
        // the chain ends at the global scope, whose parent is null
        assert!(text.ends_with("\"parent\":null}}"));

        // round trip
        let back: ScopeJson = serde_json::from_str(&text).unwrap();
        assert_eq!(back, j);
    }
}
