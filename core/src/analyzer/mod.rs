//! Dataflow analyzer.
//!
//! Computes the abstract frame before every instruction of a method and classifies its
//! call sites against the declared restore points. The result is everything the
//! transformer needs to rewrite the method.

use std::collections::BTreeSet;
use tracing::{debug, trace};

use crate::bytecode::{Insn, Method, MethodDesc, MethodId, TypeOracle};
use crate::error::{AnalysisFailure, Error, Result};
use crate::frame::Frame;
use crate::specs::{self, RestorePointSpec, SpecProvider};

mod dataflow;
mod hints;
pub mod transfer;

pub use dataflow::label_positions;


/// Analysis of one method with declared restore points.
#[derive(Debug, Clone)]
pub struct MethodAnalyzeResult {
    pub method: MethodId,
    pub is_static: bool,
    /// Outermost suspend-capable method of a coroutine.
    pub root_entry: bool,
    /// Matching call sites, counted per occurrence.
    pub restore_point_calls: usize,
    /// Distinct callees treated as restore points.
    pub restore_points: BTreeSet<MethodId>,
    /// Subset of `restore_points` whose bodies are not rewritten.
    pub unpatchable: BTreeSet<MethodId>,
    /// Frame before each instruction, parallel to `insns`.
    pub frames: Vec<Option<Frame>>,
    pub insns: Vec<Insn>,
}

impl MethodAnalyzeResult {
    pub fn is_restore_point(&self, callee: &MethodId) -> bool {
        self.restore_points.contains(callee)
    }

    pub fn is_unpatchable(&self, callee: &MethodId) -> bool {
        self.unpatchable.contains(callee)
    }

    pub fn needs_transform(&self) -> bool {
        self.restore_point_calls > 0
    }
}

/// Analyze `method` if `provider` declares restore points for it.
///
/// Returns `Ok(None)` for methods without declarations; a method whose declarations
/// match no call site is still returned, with a zero count.
pub fn analyze_method(
    owner: &str,
    method: &Method,
    provider: &dyn SpecProvider,
    oracle: &dyn TypeOracle,
) -> Result<Option<MethodAnalyzeResult>> {
    let id = method.id(owner);
    let Some(declared) = provider.restore_points(&id) else {
        trace!(method = %id, "no restore points declared, skipping");
        return Ok(None);
    };
    let root_entry = provider.is_entry(&id);
    analyze_with(owner, method, &declared, root_entry, oracle).map(Some)
}

/// Analyze `method` against an explicit list of restore-point patterns.
pub fn analyze_with(
    owner: &str,
    method: &Method,
    declared: &[RestorePointSpec],
    root_entry: bool,
    oracle: &dyn TypeOracle,
) -> Result<MethodAnalyzeResult> {
    let id = method.id(owner);
    let fail = |(index, failure): (usize, AnalysisFailure)| Error::Analysis {
        method: id.clone(),
        index,
        failure,
    };

    let desc = MethodDesc::parse(&method.desc)
        .map_err(|e| fail((0, AnalysisFailure::BadDescriptor(e.0))))?;
    let entry = Frame::entry(owner, method.is_static, &desc, method.max_locals as usize);

    let mut frames = dataflow::compute_frames(&method.code, &method.try_catches, entry, oracle)
        .map_err(fail)?;
    let labels = label_positions(&method.code);
    hints::apply_hints(&mut frames, &method.local_vars, &labels).map_err(fail)?;
    hints::validate(&frames).map_err(fail)?;

    let mut restore_point_calls = 0;
    let mut restore_points = BTreeSet::new();
    let mut unpatchable = BTreeSet::new();
    for insn in &method.code {
        let Insn::Invoke(_, callee) = insn else {
            continue;
        };
        let Some(spec) = specs::select(declared, callee) else {
            continue;
        };
        restore_point_calls += 1;
        restore_points.insert(callee.clone());
        if !spec.patchable {
            unpatchable.insert(callee.clone());
        }
    }

    debug!(
        method = %id,
        calls = restore_point_calls,
        callees = restore_points.len(),
        unpatchable = unpatchable.len(),
        root_entry,
        "analyzed method"
    );

    Ok(MethodAnalyzeResult {
        method: id,
        is_static: method.is_static,
        root_entry,
        restore_point_calls,
        restore_points,
        unpatchable,
        frames,
        insns: method.code.clone(),
    })
}
