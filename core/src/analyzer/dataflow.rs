//! Worklist fixed point over a method's control-flow graph.

use std::collections::{HashMap, VecDeque};

use super::transfer;
use crate::bytecode::{Insn, Label, TryCatch, TypeOracle, THROWABLE};
use crate::error::AnalysisFailure;
use crate::frame::{Frame, ValueCategory};

/// Failure located at an instruction index.
pub type Located = (usize, AnalysisFailure);

/// Position of every label in `code`.
pub fn label_positions(code: &[Insn]) -> HashMap<Label, usize> {
    code.iter()
        .enumerate()
        .filter_map(|(i, insn)| insn.as_label().map(|l| (l, i)))
        .collect()
}

struct Handler {
    start: usize,
    end: usize,
    target: usize,
    caught: ValueCategory,
}

fn resolve_handlers(
    try_catches: &[TryCatch],
    labels: &HashMap<Label, usize>,
) -> Result<Vec<Handler>, Located> {
    let position = |l: Label| labels.get(&l).copied().ok_or((0, AnalysisFailure::UnknownLabel(l)));
    try_catches
        .iter()
        .map(|tc| {
            Ok(Handler {
                start: position(tc.start)?,
                end: position(tc.end)?,
                target: position(tc.handler)?,
                caught: ValueCategory::reference(
                    tc.catch_type.clone().unwrap_or_else(|| THROWABLE.to_string()),
                ),
            })
        })
        .collect()
}

/// Compute the frame before every instruction; `None` marks unreachable code.
pub fn compute_frames(
    code: &[Insn],
    try_catches: &[TryCatch],
    entry: Frame,
    oracle: &dyn TypeOracle,
) -> Result<Vec<Option<Frame>>, Located> {
    let labels = label_positions(code);
    let handlers = resolve_handlers(try_catches, &labels)?;
    let mut frames: Vec<Option<Frame>> = vec![None; code.len()];
    if code.is_empty() {
        return Err((0, AnalysisFailure::FallOffEnd));
    }
    frames[0] = Some(entry);

    let mut worklist = VecDeque::from([0usize]);
    let mut queued = vec![false; code.len()];
    queued[0] = true;

    while let Some(index) = worklist.pop_front() {
        queued[index] = false;
        let Some(before) = frames[index].clone() else {
            continue;
        };
        let insn = &code[index];

        let mut targets = Vec::new();
        for handler in handlers
            .iter()
            .filter(|h| h.start <= index && index < h.end)
        {
            let exceptional = Frame {
                locals: before.locals.clone(),
                stack: vec![handler.caught.clone()],
            };
            targets.push((handler.target, exceptional));
        }

        let mut after = before;
        transfer::execute(&mut after, insn).map_err(|failure| (index, failure))?;

        for label in insn.branch_targets() {
            let target = labels
                .get(&label)
                .copied()
                .ok_or((index, AnalysisFailure::UnknownLabel(label)))?;
            targets.push((target, after.clone()));
        }
        if insn.falls_through() {
            if index + 1 >= code.len() {
                return Err((index, AnalysisFailure::FallOffEnd));
            }
            targets.push((index + 1, after));
        }

        for (target, incoming) in targets {
            let changed = match frames[target].take() {
                None => {
                    frames[target] = Some(incoming);
                    true
                }
                Some(existing) => {
                    let merged = existing
                        .merge(&incoming, oracle)
                        .map_err(|failure| (target, failure))?;
                    let changed = merged != existing;
                    frames[target] = Some(merged);
                    changed
                }
            };
            if changed && !queued[target] {
                queued[target] = true;
                worklist.push_back(target);
            }
        }
    }
    Ok(frames)
}
