//! Local-variable range hints and the post-analysis frame check.

use std::collections::HashMap;

use super::dataflow::Located;
use crate::bytecode::{FieldType, Label, LocalVar};
use crate::error::AnalysisFailure;
use crate::frame::{Frame, ValueCategory};

/// Give null-typed locals the type declared by a range hint covering them.
pub fn apply_hints(
    frames: &mut [Option<Frame>],
    hints: &[LocalVar],
    labels: &HashMap<Label, usize>,
) -> Result<(), Located> {
    for hint in hints {
        let Ok(FieldType::Ref(type_name)) = FieldType::parse(&hint.desc) else {
            continue;
        };
        let start = *labels
            .get(&hint.start)
            .ok_or((0, AnalysisFailure::UnknownLabel(hint.start)))?;
        let end = *labels
            .get(&hint.end)
            .ok_or((0, AnalysisFailure::UnknownLabel(hint.end)))?;
        for frame in frames[start..end.max(start)].iter_mut().flatten() {
            if let Some(slot) = frame.locals.get_mut(hint.slot as usize) {
                if *slot == ValueCategory::Null {
                    *slot = ValueCategory::Reference(type_name.clone());
                }
            }
        }
    }
    Ok(())
}

/// Reject frames the transformer cannot save: null-typed locals and return addresses.
pub fn validate(frames: &[Option<Frame>]) -> Result<(), Located> {
    for (index, frame) in frames.iter().enumerate() {
        let Some(frame) = frame else { continue };
        for (slot, local) in frame.locals.iter().enumerate() {
            match local {
                ValueCategory::Null => {
                    return Err((
                        index,
                        AnalysisFailure::UnresolvedReference { slot: slot as u16 },
                    ))
                }
                ValueCategory::ReturnAddress => return Err((index, AnalysisFailure::Subroutine)),
                _ => {}
            }
        }
        if frame.stack.contains(&ValueCategory::ReturnAddress) {
            return Err((index, AnalysisFailure::Subroutine));
        }
    }
    Ok(())
}
