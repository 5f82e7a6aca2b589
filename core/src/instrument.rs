//! Two-pass instrumentation of a whole program.
//!
//! Pass 1 analyzes every method that declares restore points; pass 2 rewrites the
//! methods whose analysis found at least one restore-point call. A class is rewritten
//! all-or-nothing: if any of its methods fails, the class is kept as it was.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analyzer::{analyze_method, MethodAnalyzeResult};
use crate::bytecode::{Class, Program};
use crate::error::Result;
use crate::specs::SpecProvider;
use crate::transformer::transform_method;

#[derive(Debug, Clone, Default)]
pub struct InstrumentOptions {
    /// Return the first failure instead of skipping the failing class.
    pub fail_fast: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodReport {
    pub method: String,
    pub restore_point_calls: usize,
    pub restore_points: Vec<String>,
    pub unpatchable: Vec<String>,
    pub root_entry: bool,
}

impl From<&MethodAnalyzeResult> for MethodReport {
    fn from(analysis: &MethodAnalyzeResult) -> Self {
        Self {
            method: analysis.method.to_string(),
            restore_point_calls: analysis.restore_point_calls,
            restore_points: analysis.restore_points.iter().map(ToString::to_string).collect(),
            unpatchable: analysis.unpatchable.iter().map(ToString::to_string).collect(),
            root_entry: analysis.root_entry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassReport {
    pub name: String,
    pub modified: bool,
    pub methods: Vec<MethodReport>,
    /// Failure that kept the class unmodified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstrumentReport {
    pub classes: Vec<ClassReport>,
}

impl InstrumentReport {
    pub fn class(&self, name: &str) -> Option<&ClassReport> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn modified_classes(&self) -> usize {
        self.classes.iter().filter(|c| c.modified).count()
    }

    pub fn failed_classes(&self) -> impl Iterator<Item = &ClassReport> {
        self.classes.iter().filter(|c| c.error.is_some())
    }
}

/// Analyze and rewrite every class of `program`.
pub fn instrument_program(
    program: &Program,
    specs: &dyn SpecProvider,
    options: &InstrumentOptions,
) -> Result<(Program, InstrumentReport)> {
    let mut output = Program::new();
    let mut report = InstrumentReport::default();

    for class in program.classes.values() {
        match instrument_class(class, program, specs) {
            Ok((rewritten, class_report)) => {
                if class_report.modified {
                    debug!(class = %class.name, "class rewritten");
                }
                output.insert(rewritten);
                report.classes.push(class_report);
            }
            Err(e) if !options.fail_fast => {
                warn!(class = %class.name, error = %e, "leaving class unmodified");
                output.insert(class.clone());
                report.classes.push(ClassReport {
                    name: class.name.clone(),
                    modified: false,
                    methods: Vec::new(),
                    error: Some(e.to_string()),
                });
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        classes = report.classes.len(),
        modified = report.modified_classes(),
        failed = report.failed_classes().count(),
        "instrumentation finished"
    );
    Ok((output, report))
}

fn instrument_class(
    class: &Class,
    program: &Program,
    specs: &dyn SpecProvider,
) -> Result<(Class, ClassReport)> {
    // pass 1
    let mut analyses = Vec::with_capacity(class.methods.len());
    for method in &class.methods {
        analyses.push(analyze_method(&class.name, method, specs, program)?);
    }

    // pass 2
    let mut rewritten = class.clone();
    let mut methods = Vec::new();
    let mut modified = false;
    for (slot, analysis) in rewritten.methods.iter_mut().zip(&analyses) {
        let Some(analysis) = analysis else { continue };
        methods.push(MethodReport::from(analysis));
        if analysis.needs_transform() {
            *slot = transform_method(slot, analysis)?;
            modified = true;
        }
    }

    Ok((
        rewritten,
        ClassReport {
            name: class.name.clone(),
            modified,
            methods,
            error: None,
        },
    ))
}
