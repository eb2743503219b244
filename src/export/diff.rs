//! Edit-script computation between anchored tile sequences, with HGVS
//! rendering.
//!
//! The diff is a Myers O(ND) search bounded by a wall-clock budget and an
//! edit-distance cap. When either bound is hit the caller still gets a
//! usable answer: the untrimmed middle collapses into a single
//! deletion-insertion. Timeout is a soft partial result, never an error.

use std::time::{Duration, Instant};

/// Edit-distance cap; distances beyond this collapse into one delins.
const MAX_EDITS: usize = 1024;

/// Alternate bytes marking a no-call slot of indeterminate length.
pub const NO_CALL: &[u8] = b"-";

/// One variant in tile- or chromosome-local coordinates.
///
/// The zero value (`position` 0, empty `reference` and `alternate`) marks a
/// slot that matches the reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffVariant {
    /// 0-based offset of the first affected reference base (for pure
    /// insertions, of the base the insertion precedes).
    pub position: usize,
    /// Replaced reference bases; empty for a pure insertion.
    pub reference: Vec<u8>,
    /// Replacement bases; empty for a pure deletion, `-` for a no-call.
    pub alternate: Vec<u8>,
}

impl DiffVariant {
    /// A no-call marker at `position`.
    pub fn no_call(position: usize) -> Self {
        Self {
            position,
            reference: Vec::new(),
            alternate: NO_CALL.to_vec(),
        }
    }

    /// True for the zero value: this slot matches the reference.
    pub fn is_ref(&self) -> bool {
        self.reference.is_empty() && self.alternate.is_empty()
    }

    /// True for a no-call slot.
    pub fn is_no_call(&self) -> bool {
        self.alternate == NO_CALL
    }

    /// HGVS description in 1-based coordinates, without the `chrom:g.`
    /// prefix.
    pub fn hgvs(&self) -> String {
        let start = self.position + 1;
        let end = self.position + self.reference.len();
        let alt = String::from_utf8_lossy(&self.alternate);
        match (self.reference.len(), self.alternate.len()) {
            (0, 0) => "=".to_string(),
            (1, 1) => format!(
                "{start}{}>{}",
                self.reference[0] as char, self.alternate[0] as char
            ),
            (0, _) => format!("{}_{}ins{alt}", self.position, self.position + 1),
            (1, 0) => format!("{start}del"),
            (_, 0) => format!("{start}_{end}del"),
            (1, _) => format!("{start}delins{alt}"),
            (_, _) => format!("{start}_{end}delins{alt}"),
        }
    }
}

/// Diff `reference` against `alternate` within `budget`.
///
/// Inputs are expected uppercased; positions in the result are 0-based
/// offsets into `reference`. Adjacent edits merge into single variants;
/// runs of matching bases separate them.
pub fn hgvs_diff(reference: &[u8], alternate: &[u8], budget: Duration) -> Vec<DiffVariant> {
    let prefix = common_prefix(reference, alternate);
    let suffix = common_suffix(&reference[prefix..], &alternate[prefix..]);
    let mid_ref = &reference[prefix..reference.len() - suffix];
    let mid_alt = &alternate[prefix..alternate.len() - suffix];
    if mid_ref.is_empty() && mid_alt.is_empty() {
        return Vec::new();
    }

    let deadline = Instant::now() + budget;
    match myers_ops(mid_ref, mid_alt, deadline) {
        Some(ops) => ops_to_variants(mid_ref, mid_alt, &ops, prefix),
        None => vec![DiffVariant {
            position: prefix,
            reference: mid_ref.to_vec(),
            alternate: mid_alt.to_vec(),
        }],
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Keep,
    Del,
    Ins,
}

/// Myers O(ND) shortest edit script, bounded by `deadline` and
/// [`MAX_EDITS`]. `None` means the bound was hit first.
fn myers_ops(a: &[u8], b: &[u8], deadline: Instant) -> Option<Vec<Op>> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let cap = ((n + m) as usize).min(MAX_EDITS) as isize;
    let offset = cap;
    let width = 2 * cap as usize + 1;

    let mut v = vec![0isize; width];
    let mut trace: Vec<Vec<isize>> = Vec::new();
    let mut found: Option<isize> = None;

    'search: for d in 0..=cap {
        if Instant::now() > deadline {
            return None;
        }
        trace.push(v.clone());
        let mut k = -d;
        while k <= d {
            let idx = (k + offset) as usize;
            let mut x = if k == -d || (k != d && v[idx - 1] < v[idx + 1]) {
                v[idx + 1]
            } else {
                v[idx - 1] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[idx] = x;
            if x >= n && y >= m {
                found = Some(d);
                break 'search;
            }
            k += 2;
        }
    }
    let found = found?;

    // Backtrack through the stored rounds.
    let mut ops = Vec::with_capacity((n + m) as usize);
    let mut x = n;
    let mut y = m;
    for d in (1..=found).rev() {
        let before = &trace[d as usize];
        let k = x - y;
        let idx = (k + offset) as usize;
        let prev_k = if k == -d || (k != d && before[idx - 1] < before[idx + 1]) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = before[(prev_k + offset) as usize];
        let prev_y = prev_x - prev_k;
        while x > prev_x && y > prev_y {
            ops.push(Op::Keep);
            x -= 1;
            y -= 1;
        }
        if x == prev_x {
            ops.push(Op::Ins);
            y -= 1;
        } else {
            ops.push(Op::Del);
            x -= 1;
        }
    }
    while x > 0 && y > 0 {
        ops.push(Op::Keep);
        x -= 1;
        y -= 1;
    }
    ops.reverse();
    Some(ops)
}

/// Group contiguous edits into variants, offsetting positions by
/// `base_offset`.
fn ops_to_variants(a: &[u8], b: &[u8], ops: &[Op], base_offset: usize) -> Vec<DiffVariant> {
    let mut out = Vec::new();
    let mut ai = 0usize;
    let mut bi = 0usize;
    let mut start = 0usize;
    let mut del: Vec<u8> = Vec::new();
    let mut ins: Vec<u8> = Vec::new();

    let mut flush = |start: usize, del: &mut Vec<u8>, ins: &mut Vec<u8>, out: &mut Vec<DiffVariant>| {
        if !del.is_empty() || !ins.is_empty() {
            out.push(DiffVariant {
                position: base_offset + start,
                reference: std::mem::take(del),
                alternate: std::mem::take(ins),
            });
        }
    };

    for op in ops {
        match op {
            Op::Keep => {
                flush(start, &mut del, &mut ins, &mut out);
                ai += 1;
                bi += 1;
            }
            Op::Del => {
                if del.is_empty() && ins.is_empty() {
                    start = ai;
                }
                del.push(a[ai]);
                ai += 1;
            }
            Op::Ins => {
                if del.is_empty() && ins.is_empty() {
                    start = ai;
                }
                ins.push(b[bi]);
                bi += 1;
            }
        }
    }
    flush(start, &mut del, &mut ins, &mut out);
    out
}
