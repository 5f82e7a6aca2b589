//! Clipping exception regions against injected code.

use std::collections::HashMap;

use crate::bytecode::{Insn, Label, TryCatch};
use crate::error::TransformFailure;

/// Range `[start, end)` of injected code no original handler may protect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exclusion {
    pub start: Label,
    pub end: Label,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
}

enum Clip {
    Keep,
    Split(Span, Span),
    Trim(Span),
    Inside,
}

fn clip(region: Span, excluded: Span) -> Clip {
    if excluded.end <= region.start || region.end <= excluded.start {
        return Clip::Keep;
    }
    let starts_before = region.start < excluded.start;
    let ends_after = excluded.end < region.end;
    match (starts_before, ends_after) {
        (true, true) => Clip::Split(
            Span {
                start: region.start,
                end: excluded.start,
            },
            Span {
                start: excluded.end,
                end: region.end,
            },
        ),
        (true, false) => Clip::Trim(Span {
            start: region.start,
            end: excluded.start,
        }),
        (false, true) => Clip::Trim(Span {
            start: excluded.end,
            end: region.end,
        }),
        (false, false) => Clip::Inside,
    }
}

/// Clip every region of `try_catches` against `exclusions`, in table order.
///
/// Pieces of a region keep their handler and catch type; pieces that protect no
/// executable instruction are dropped.
pub fn split_regions(
    code: &[Insn],
    try_catches: &[TryCatch],
    exclusions: &[Exclusion],
) -> Result<Vec<TryCatch>, TransformFailure> {
    let positions: HashMap<Label, usize> = code
        .iter()
        .enumerate()
        .filter_map(|(i, insn)| insn.as_label().map(|l| (l, i)))
        .collect();
    let position = |l: Label| positions.get(&l).copied().ok_or(TransformFailure::UnknownLabel(l));
    // position -> label bound there
    let label_at: HashMap<usize, Label> = positions.iter().map(|(l, p)| (*p, *l)).collect();

    let excluded = exclusions
        .iter()
        .map(|ex| {
            Ok(Span {
                start: position(ex.start)?,
                end: position(ex.end)?,
            })
        })
        .collect::<Result<Vec<_>, TransformFailure>>()?;

    let mut result = Vec::new();
    for tc in try_catches {
        let mut pending = vec![Span {
            start: position(tc.start)?,
            end: position(tc.end)?,
        }];
        let mut done = Vec::new();
        while let Some(piece) = pending.pop() {
            let applied = excluded.iter().find_map(|ex| match clip(piece, *ex) {
                Clip::Keep => None,
                other => Some(other),
            });
            match applied {
                None => done.push(piece),
                Some(Clip::Split(left, right)) => {
                    pending.push(right);
                    pending.push(left);
                }
                Some(Clip::Trim(rest)) => pending.push(rest),
                Some(Clip::Inside) => {
                    return Err(TransformFailure::RegionInsideInjectedCode {
                        start: tc.start,
                        end: tc.end,
                    })
                }
                Some(Clip::Keep) => unreachable!("filtered above"),
            }
        }

        done.sort_by_key(|span| span.start);
        for span in done {
            if !code[span.start..span.end].iter().any(|insn| !insn.is_pseudo()) {
                continue;
            }
            let (Some(start), Some(end)) = (label_at.get(&span.start), label_at.get(&span.end))
            else {
                continue;
            };
            result.push(TryCatch {
                start: *start,
                end: *end,
                handler: tc.handler,
                catch_type: tc.catch_type.clone(),
            });
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l(n: u32) -> Insn {
        Insn::Label(Label(n))
    }

    fn region(start: u32, end: u32) -> TryCatch {
        TryCatch {
            start: Label(start),
            end: Label(end),
            handler: Label(99),
            catch_type: None,
        }
    }

    // L0 nop L1 nop L2 nop L3 nop L4 nop L5
    fn code() -> Vec<Insn> {
        let mut code = Vec::new();
        for n in 0..5 {
            code.push(l(n));
            code.push(Insn::Nop);
        }
        code.push(l(5));
        code
    }

    fn bounds(regions: &[TryCatch]) -> Vec<(u32, u32)> {
        regions.iter().map(|r| (r.start.0, r.end.0)).collect()
    }

    #[test]
    fn test_containing_region_is_split() {
        let ex = [Exclusion {
            start: Label(2),
            end: Label(3),
        }];
        let out = split_regions(&code(), &[region(0, 5)], &ex).unwrap();
        assert_eq!(bounds(&out), vec![(0, 2), (3, 5)]);
        assert!(out.iter().all(|r| r.handler == Label(99)));
    }

    #[test]
    fn test_partial_overlap_is_trimmed() {
        let ex = [
            Exclusion {
                start: Label(0),
                end: Label(1),
            },
            Exclusion {
                start: Label(4),
                end: Label(5),
            },
        ];
        let out = split_regions(&code(), &[region(0, 5)], &ex).unwrap();
        assert_eq!(bounds(&out), vec![(1, 4)]);
    }

    #[test]
    fn test_multiple_exclusions_and_empty_pieces() {
        let mut code = code();
        // L6 right after L2, so [L2, L6) is empty
        code.insert(5, l(6));
        let ex = [
            Exclusion {
                start: Label(1),
                end: Label(2),
            },
            Exclusion {
                start: Label(6),
                end: Label(4),
            },
        ];
        let out = split_regions(&code, &[region(0, 5)], &ex).unwrap();
        assert_eq!(bounds(&out), vec![(0, 1), (4, 5)]);
    }

    #[test]
    fn test_region_inside_injected_code_fails() {
        let ex = [Exclusion {
            start: Label(1),
            end: Label(4),
        }];
        let err = split_regions(&code(), &[region(2, 3)], &ex).unwrap_err();
        assert_eq!(
            err,
            TransformFailure::RegionInsideInjectedCode {
                start: Label(2),
                end: Label(3)
            }
        );
    }

    #[test]
    fn test_unknown_label() {
        let err = split_regions(&code(), &[region(0, 42)], &[]).unwrap_err();
        assert_eq!(err, TransformFailure::UnknownLabel(Label(42)));
    }
}
