//! Sort-merge join kernels.
//!
//! Both kernels assume their inputs are sorted by the join column and run a
//! classic two-pointer merge, emitting the Cartesian product of matching
//! runs. [`join_fixed`] is monomorphized per `(left, right, output)` width
//! so the output tuple layout is known statically; [`join_var`] walks rows
//! through the storage tag and is the fallback for wide or dropped-column
//! outputs.

use crate::table::TableStorage;
use trellis_core::Id;

/// End of the run of equal keys starting at `start`.
fn run_end<const N: usize>(rows: &[[Id; N]], start: usize, col: usize) -> usize {
    let key = rows[start][col];
    let mut end = start + 1;
    while end < rows.len() && rows[end][col] == key {
        end += 1;
    }
    end
}

/// Width-specialized merge join keeping the join column.
///
/// `W` must equal `WL + WR - 1`: the output concatenates the left tuple with
/// the right tuple minus its join column.
pub fn join_fixed<const WL: usize, const WR: usize, const W: usize>(
    left: &[[Id; WL]],
    left_col: usize,
    right: &[[Id; WR]],
    right_col: usize,
) -> Vec<[Id; W]> {
    debug_assert_eq!(W, WL + WR - 1);
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        let lkey = left[i][left_col];
        let rkey = right[j][right_col];
        if lkey < rkey {
            i += 1;
        } else if rkey < lkey {
            j += 1;
        } else {
            let left_end = run_end(left, i, left_col);
            let right_end = run_end(right, j, right_col);
            for lrow in &left[i..left_end] {
                let mut row = [Id::NONE; W];
                row[..WL].copy_from_slice(lrow);
                for rrow in &right[j..right_end] {
                    let mut col = WL;
                    for (k, v) in rrow.iter().enumerate() {
                        if k != right_col {
                            row[col] = *v;
                            col += 1;
                        }
                    }
                    out.push(row);
                }
            }
            i = left_end;
            j = right_end;
        }
    }
    out
}

/// Row-generic merge join for widths the fixed kernels do not cover, and
/// for joins that drop the join column entirely.
pub fn join_var(
    left: &TableStorage,
    left_col: usize,
    right: &TableStorage,
    right_col: usize,
    keep_join_column: bool,
) -> Vec<Vec<Id>> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        let lkey = left.row(i)[left_col];
        let rkey = right.row(j)[right_col];
        if lkey < rkey {
            i += 1;
        } else if rkey < lkey {
            j += 1;
        } else {
            let mut left_end = i + 1;
            while left_end < left.len() && left.row(left_end)[left_col] == lkey {
                left_end += 1;
            }
            let mut right_end = j + 1;
            while right_end < right.len() && right.row(right_end)[right_col] == rkey {
                right_end += 1;
            }
            for li in i..left_end {
                for rj in j..right_end {
                    out.push(concat_rows(
                        left.row(li),
                        left_col,
                        right.row(rj),
                        right_col,
                        keep_join_column,
                    ));
                }
            }
            i = left_end;
            j = right_end;
        }
    }
    out
}

/// One output row: the left tuple (minus its join column when the join
/// column is dropped) followed by the right tuple minus its join column.
pub(crate) fn concat_rows(
    lrow: &[Id],
    left_col: usize,
    rrow: &[Id],
    right_col: usize,
    keep_join_column: bool,
) -> Vec<Id> {
    let drop = if keep_join_column { 1 } else { 2 };
    let mut row = Vec::with_capacity(lrow.len() + rrow.len() - drop);
    for (k, v) in lrow.iter().enumerate() {
        if keep_join_column || k != left_col {
            row.push(*v);
        }
    }
    for (k, v) in rrow.iter().enumerate() {
        if k != right_col {
            row.push(*v);
        }
    }
    row
}

// ============================================================================
// Tests
// ============================================================================
