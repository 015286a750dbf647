//! Keyed-list analysis: move estimate, LIS, and the fast-path decision.
//!
//! The decision is computed exactly once per parent per commit into a
//! [`ReorderPlan`] that the execution path consumes - the probe and the
//! execution can never drift apart.
//!
//! Fast-path gate (all of):
//! - the list is large (>= [`FAST_PATH_MIN_LEN`] keyed items)
//! - the reorder is pathological: move estimate >= [`FAST_PATH_MIN_MOVES`]
//!   absolute or >= [`FAST_PATH_MOVE_PERCENT`]% relative, or the LIS keep
//!   fraction is below [`FAST_PATH_KEEP_PERCENT`]%
//! - no reused node has a prop/listener delta (an attribute update is never
//!   silently dropped)

/// Minimum keyed-list length for the bulk rebuild.
pub(crate) const FAST_PATH_MIN_LEN: usize = 128;
/// Absolute move-estimate threshold.
pub(crate) const FAST_PATH_MIN_MOVES: usize = 64;
/// Relative move-estimate threshold, percent of keyed length.
pub(crate) const FAST_PATH_MOVE_PERCENT: usize = 10;
/// LIS keep fraction below which the rebuild wins, percent.
pub(crate) const FAST_PATH_KEEP_PERCENT: usize = 50;

/// Per-commit reorder decision record.
#[derive(Clone, Debug)]
pub(crate) struct ReorderPlan {
    /// Number of keyed items in the new list.
    pub keyed_len: usize,
    /// Cheap divergence count between old and new key order.
    pub move_estimate: usize,
    /// LIS length over surviving keys.
    pub keep_count: usize,
    /// LIS membership, aligned with the surviving keys in new order.
    pub in_lis: Vec<bool>,
    /// Take the bulk-rebuild path.
    pub fast_path: bool,
    /// The reorder qualified but a prop/listener delta disqualified it.
    pub blocked_by_delta: bool,
}

/// Count positions where the new key order diverges from the old one.
///
/// Both slices hold only surviving keys (present before and after), each in
/// its own order; no live-tree read is needed.
pub(crate) fn move_estimate(old_survivors: &[&str], new_survivors: &[&str]) -> usize {
    debug_assert_eq!(old_survivors.len(), new_survivors.len());
    old_survivors
        .iter()
        .zip(new_survivors.iter())
        .filter(|(a, b)| a != b)
        .count()
}

/// Longest strictly increasing subsequence; returns membership flags.
///
/// O(n log n) patience sort with predecessor links. Members are the maximal
/// subset of nodes already in relatively correct order; everything outside
/// gets relocated with a single insert.
pub(crate) fn longest_increasing_subsequence(positions: &[usize]) -> Vec<bool> {
    let n = positions.len();
    let mut member = vec![false; n];
    if n == 0 {
        return member;
    }

    // tails[k] = index of the smallest tail of an increasing run of length k+1
    let mut tails: Vec<usize> = Vec::with_capacity(n);
    let mut prev: Vec<Option<usize>> = vec![None; n];

    for i in 0..n {
        let value = positions[i];
        let at = tails.partition_point(|&t| positions[t] < value);
        if at > 0 {
            prev[i] = Some(tails[at - 1]);
        }
        if at == tails.len() {
            tails.push(i);
        } else {
            tails[at] = i;
        }
    }

    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        member[i] = true;
        cursor = prev[i];
    }
    member
}

/// Evaluate the gate once and package everything the execution path needs.
pub(crate) fn build_reorder_plan(
    keyed_len: usize,
    move_estimate: usize,
    survivor_positions: &[usize],
    any_delta: bool,
    enabled: bool,
) -> ReorderPlan {
    let in_lis = longest_increasing_subsequence(survivor_positions);
    let keep_count = in_lis.iter().filter(|&&m| m).count();

    let big = keyed_len >= FAST_PATH_MIN_LEN;
    let many_moves = move_estimate >= FAST_PATH_MIN_MOVES
        || move_estimate * 100 >= keyed_len * FAST_PATH_MOVE_PERCENT;
    let low_keep = keep_count * 100 < keyed_len * FAST_PATH_KEEP_PERCENT;
    let qualified = big && (many_moves || low_keep);

    ReorderPlan {
        keyed_len,
        move_estimate,
        keep_count,
        in_lis,
        fast_path: enabled && qualified && !any_delta,
        blocked_by_delta: qualified && any_delta,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lis_len(positions: &[usize]) -> usize {
        longest_increasing_subsequence(positions)
            .iter()
            .filter(|&&m| m)
            .count()
    }

    #[test]
    fn test_move_estimate() {
        assert_eq!(move_estimate(&["a", "b", "c"], &["a", "b", "c"]), 0);
        assert_eq!(move_estimate(&["a", "b", "c"], &["c", "b", "a"]), 2);
        assert_eq!(move_estimate(&[], &[]), 0);
    }

    #[test]
    fn test_lis_basic() {
        assert_eq!(lis_len(&[0, 1, 2, 3]), 4);
        assert_eq!(lis_len(&[3, 2, 1, 0]), 1);
        assert_eq!(lis_len(&[2, 0, 1, 3]), 3);

        let member = longest_increasing_subsequence(&[2, 0, 1, 3]);
        assert_eq!(member, vec![false, true, true, true]);
    }

    #[test]
    fn test_lis_empty() {
        assert!(longest_increasing_subsequence(&[]).is_empty());
    }

    #[test]
    fn test_gate_small_list_never_qualifies() {
        let positions: Vec<usize> = (0..10).rev().collect();
        let plan = build_reorder_plan(10, 9, &positions, false, true);
        assert!(!plan.fast_path);
        assert!(!plan.blocked_by_delta);
    }

    #[test]
    fn test_gate_large_reversal_qualifies() {
        let positions: Vec<usize> = (0..200).rev().collect();
        let plan = build_reorder_plan(200, 199, &positions, false, true);
        assert!(plan.fast_path);
        assert_eq!(plan.keep_count, 1);
    }

    #[test]
    fn test_gate_delta_disqualifies() {
        let positions: Vec<usize> = (0..200).rev().collect();
        let plan = build_reorder_plan(200, 199, &positions, true, true);
        assert!(!plan.fast_path);
        assert!(plan.blocked_by_delta);
    }

    #[test]
    fn test_gate_disabled_engine_switch() {
        let positions: Vec<usize> = (0..200).rev().collect();
        let plan = build_reorder_plan(200, 199, &positions, false, false);
        assert!(!plan.fast_path);
    }

    #[test]
    fn test_gate_in_order_large_list_stays_general() {
        let positions: Vec<usize> = (0..200).collect();
        let plan = build_reorder_plan(200, 0, &positions, false, true);
        assert!(!plan.fast_path);
        assert_eq!(plan.keep_count, 200);
    }

    #[test]
    fn test_gate_low_keep_fraction_qualifies() {
        // Few moves positionally, but the keep fraction is tiny because most
        // keys are new: 130 keyed items, 20 survivors in scrambled order.
        let positions: Vec<usize> = (0..20).rev().collect();
        let plan = build_reorder_plan(130, 19, &positions, false, true);
        assert!(plan.fast_path);
    }
}
