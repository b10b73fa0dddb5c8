//! Trace comparison
//!
//! Diffs two sealed sessions by [`FunctionIdentity`]:
//!
//! | in first | in second | status                               |
//! |----------|-----------|--------------------------------------|
//! | no       | yes       | `Added`                              |
//! | yes      | no        | `Removed`                            |
//! | yes      | yes       | `Changed` / `Unchanged` by tolerance |
//!
//! A common function is `Changed` when its total time moved by more than
//! `tolerance` relative to the smaller of the two totals. Measuring against
//! the smaller side keeps the classification symmetric: swapping the inputs
//! yields the same changed set with negated deltas.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::validate_tolerance;
use crate::domain::{CompareError, FunctionIdentity};
use crate::trace_data::{CallNode, TraceSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Added,
    Removed,
    Changed,
    Unchanged,
}

/// Per-function record; absent sides count as zero
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDiff {
    pub identity: FunctionIdentity,
    pub status: ChangeStatus,
    pub total_ns_before: u64,
    pub total_ns_after: u64,
    pub calls_before: u64,
    pub calls_after: u64,
    /// after − before
    pub delta_time: i64,
    pub delta_calls: i64,
    /// `delta_time / total_ns_before`; `None` ("new") when the first total is 0
    pub pct_change: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonSummary {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub tolerance: f64,
    /// By |delta_time| descending, then identity
    pub functions: Vec<FunctionDiff>,
    /// (caller, callee) pairs only in the second session
    pub edges_added: Vec<(FunctionIdentity, FunctionIdentity)>,
    /// (caller, callee) pairs only in the first session
    pub edges_removed: Vec<(FunctionIdentity, FunctionIdentity)>,
    pub summary: ComparisonSummary,
}

impl ComparisonResult {
    pub fn with_status(&self, status: ChangeStatus) -> impl Iterator<Item = &FunctionDiff> {
        self.functions.iter().filter(move |f| f.status == status)
    }

    #[must_use]
    pub fn status_of(&self, identity: &FunctionIdentity) -> Option<ChangeStatus> {
        self.functions.iter().find(|f| &f.identity == identity).map(|f| f.status)
    }

    #[must_use]
    pub fn has_differences(&self) -> bool {
        self.summary.added + self.summary.removed + self.summary.changed > 0
            || !self.edges_added.is_empty()
            || !self.edges_removed.is_empty()
    }
}

/// Diff `first` against `second`
///
/// Neither session is modified.
///
/// # Errors
/// `InvalidTolerance` for a negative or non-finite tolerance;
/// `InvalidInput` when either session is unsealed or breaks a graph invariant.
pub fn compare(
    first: &TraceSession,
    second: &TraceSession,
    tolerance: f64,
) -> Result<ComparisonResult, CompareError> {
    validate_tolerance(tolerance).map_err(|_| CompareError::InvalidTolerance(tolerance))?;
    check_input("first", first)?;
    check_input("second", second)?;

    let mut pairs: BTreeMap<&FunctionIdentity, (Option<&CallNode>, Option<&CallNode>)> =
        BTreeMap::new();
    for node in first.nodes() {
        pairs.entry(&node.identity).or_default().0 = Some(node);
    }
    for node in second.nodes() {
        pairs.entry(&node.identity).or_default().1 = Some(node);
    }

    let mut summary = ComparisonSummary::default();
    let mut functions: Vec<FunctionDiff> = pairs
        .into_iter()
        .map(|(identity, (before, after))| {
            let diff = diff_function(identity, before, after, tolerance);
            match diff.status {
                ChangeStatus::Added => summary.added += 1,
                ChangeStatus::Removed => summary.removed += 1,
                ChangeStatus::Changed => summary.changed += 1,
                ChangeStatus::Unchanged => summary.unchanged += 1,
            }
            diff
        })
        .collect();
    functions.sort_by(|a, b| {
        b.delta_time
            .unsigned_abs()
            .cmp(&a.delta_time.unsigned_abs())
            .then_with(|| a.identity.cmp(&b.identity))
    });

    let edges_before = edge_keys(first);
    let edges_after = edge_keys(second);

    Ok(ComparisonResult {
        tolerance,
        functions,
        edges_added: edges_after.difference(&edges_before).cloned().collect(),
        edges_removed: edges_before.difference(&edges_after).cloned().collect(),
        summary,
    })
}

fn check_input(which: &'static str, session: &TraceSession) -> Result<(), CompareError> {
    if !session.is_sealed() {
        return Err(CompareError::InvalidInput { which, reason: "session is not sealed".into() });
    }
    session
        .check_metadata()
        .and_then(|()| session.check_graph())
        .map_err(|reason| CompareError::InvalidInput { which, reason })
}

#[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
fn diff_function(
    identity: &FunctionIdentity,
    before: Option<&CallNode>,
    after: Option<&CallNode>,
    tolerance: f64,
) -> FunctionDiff {
    let (t1, c1) = before.map_or((0, 0), |n| (n.total_ns, n.call_count));
    let (t2, c2) = after.map_or((0, 0), |n| (n.total_ns, n.call_count));
    let delta_time = t2 as i64 - t1 as i64;

    let status = match (before, after) {
        (None, _) => ChangeStatus::Added,
        (_, None) => ChangeStatus::Removed,
        _ => {
            // a side that dropped to zero moves by exactly 100% of the other
            let baseline = (if t1 == 0 || t2 == 0 { t1.max(t2) } else { t1.min(t2) }) as f64;
            if delta_time != 0 && delta_time.unsigned_abs() as f64 > tolerance * baseline {
                ChangeStatus::Changed
            } else {
                ChangeStatus::Unchanged
            }
        }
    };

    FunctionDiff {
        identity: identity.clone(),
        status,
        total_ns_before: t1,
        total_ns_after: t2,
        calls_before: c1,
        calls_after: c2,
        delta_time,
        delta_calls: c2 as i64 - c1 as i64,
        pct_change: (t1 > 0).then(|| delta_time as f64 / t1 as f64),
    }
}

fn edge_keys(session: &TraceSession) -> BTreeSet<(FunctionIdentity, FunctionIdentity)> {
    session.edges().map(|e| (e.caller.clone(), e.callee.clone())).collect()
}
