//! Checker driver
//!
//! Runs an ordered pipeline of type systems over a compilation unit. For each system it
//! builds a fresh per-unit context, analyzes every method body, runs the consistency
//! visitor, and publishes the system's flow values to the systems after it.

use crate::checkers;
use crate::checkers::mustcallonelements::ObligationLoops;
use crate::config::CheckerOptions;
use crate::dataflow::{FlowAnalysis, RefinementRules};
use crate::diagnostics::{sorted, Diagnostic, DiagnosticKind};
use crate::error::Result;
use crate::factory::{AnnotatedTypeFactory, DefaultingPolicy, MethodContext, SubcheckerFacts};
use crate::hierarchy::QualifierHierarchy;
use crate::hir::HirModule;
use crate::types::ClassTable;
use crate::visitor::{BaseTypeVisitor, ConsistencyRules};
use crate::wpi::InferenceStorage;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info};

/// All the rules of one type system
pub trait TypeRules: DefaultingPolicy + RefinementRules + ConsistencyRules {}

impl<T: DefaultingPolicy + RefinementRules + ConsistencyRules> TypeRules for T {}

/// A qualifier hierarchy plus the rules that give it meaning
pub struct TypeSystem {
    name: String,
    hierarchy: Box<dyn QualifierHierarchy>,
    rules: Box<dyn TypeRules>,
}

impl TypeSystem {
    pub fn new(name: &str, hierarchy: Box<dyn QualifierHierarchy>, rules: Box<dyn TypeRules>) -> Self {
        Self {
            name: name.to_string(),
            hierarchy,
            rules,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hierarchy(&self) -> &dyn QualifierHierarchy {
        self.hierarchy.as_ref()
    }

    pub fn rules(&self) -> &dyn TypeRules {
        self.rules.as_ref()
    }
}

impl fmt::Debug for TypeSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeSystem")
            .field("name", &self.name)
            .field("hierarchy", &self.hierarchy)
            .finish_non_exhaustive()
    }
}

/// State shared by all methods of one unit under one type system. Created when the
/// system starts on a unit and dropped when it finishes.
#[derive(Debug, Default)]
pub struct UnitContext {
    pub obligation_loops: ObligationLoops,
}

#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub diagnostics: Vec<Diagnostic>,
    /// Inference summary after this run, when inference is enabled
    pub inference: Option<InferenceStorage>,
}

impl CheckReport {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.kind == DiagnosticKind::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.kind == DiagnosticKind::Warning)
    }

    /// Keys of all diagnostics, in report order
    pub fn keys(&self) -> Vec<&str> {
        self.diagnostics.iter().map(|d| d.key.as_str()).collect()
    }
}

#[derive(Debug)]
pub struct Checker {
    options: CheckerOptions,
    systems: Vec<TypeSystem>,
    seed: Option<InferenceStorage>,
}

impl Checker {
    /// Checker running the systems named in `options`
    pub fn new(options: CheckerOptions) -> Result<Self> {
        let mut systems = Vec::new();
        for name in &options.checkers {
            systems.extend(checkers::build(name)?);
        }
        Ok(Self::with_systems(options, systems))
    }

    pub fn with_systems(options: CheckerOptions, systems: Vec<TypeSystem>) -> Self {
        Self {
            options,
            systems,
            seed: None,
        }
    }

    /// Use the summary of an earlier inference run in place of missing annotations
    pub fn with_inference_seed(mut self, seed: Option<InferenceStorage>) -> Self {
        self.seed = seed;
        self
    }

    pub fn options(&self) -> &CheckerOptions {
        &self.options
    }

    pub fn systems(&self) -> &[TypeSystem] {
        &self.systems
    }

    pub fn check(&self, module: &HirModule) -> Result<CheckReport> {
        let classes = ClassTable::for_module(module);
        let mut inference = self.options.infer.then(|| {
            let mut storage = self.seed.clone().unwrap_or_default();
            storage.reset_changed();
            storage
        });
        let mut upstream: Vec<Rc<SubcheckerFacts>> = Vec::new();
        let mut diagnostics = Vec::new();

        for system in &self.systems {
            info!(system = system.name(), file = %module.file, "checking");
            let mut unit = UnitContext::default();
            system.rules().prepare_unit(module, &classes, &mut unit);

            let mut factory = AnnotatedTypeFactory::new(system, module, &classes)
                .with_upstream(upstream.clone())
                .with_seed(self.seed.as_ref());
            for class in &module.classes {
                for method in class.methods.iter().filter(|m| m.body.is_some()) {
                    let ctx = MethodContext::new(class, method);
                    let result = FlowAnalysis::new(&factory, &ctx, &unit, self.options.max_block_visits).run()?;
                    factory.record_flow(method.signature(&class.name), result);
                }
            }

            let found = BaseTypeVisitor::new(&factory, &unit, &self.options, inference.as_mut()).visit_module(module);
            debug!(system = system.name(), diagnostics = found.len(), "visited");
            diagnostics.extend(found);
            upstream.push(Rc::new(factory.facts()));
        }

        Ok(CheckReport {
            diagnostics: sorted(diagnostics),
            inference,
        })
    }
}
