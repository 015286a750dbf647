//! Reconciler / commit engine.
//!
//! Given the previously committed live tree and a freshly rendered virtual
//! tree, compute and apply the minimal mutation set in one atomic pass,
//! maximizing node reuse (listeners, focus, instance state survive).
//!
//! Two phases per render task:
//! 1. **Plan** ([`diff`]): render components, diff children, build
//!    replacement subtrees detached, record [`ops::MutationOp`]s. The
//!    attached tree is never touched.
//! 2. **Commit** ([`ops::apply`]): run the ops in order, keep side tables
//!    consistent, tear down what was removed, run mount operations.
//!
//! A plan failure discards the staging ([`ops::discard`]) - no
//! attach-then-fail, no remove-before-replacement-ready.
//!
//! Submodules: [`normalize`] (fragment/provider flattening), [`props`]
//! (attr/listener deltas), [`keyed`] (move estimate, LIS, fast-path
//! decision), [`text`] (bulk text strategy).

pub(crate) mod diff;
pub(crate) mod keyed;
pub(crate) mod normalize;
pub(crate) mod ops;
pub(crate) mod props;
pub(crate) mod text;

pub(crate) use diff::{plan_children, plan_slot};
pub(crate) use normalize::{normalize_children, normalize_single};
pub(crate) use ops::{
    apply, discard, finish_cleanup, teardown_instance, teardown_subtree, MutationOp, PlanCx,
};
