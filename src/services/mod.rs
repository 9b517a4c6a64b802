//! Reconciliation services
//!
//! The engine proper: grouping endpoints onto load balancers, reconciling
//! stacks, gating status writes and driving the polling loop. Collaborators are
//! reached only through the traits in [`crate::provider`].

pub mod cutover;
pub mod driver;
pub mod grouping;
pub mod report;
pub mod stack_reconciler;
pub mod target_sync;

pub use cutover::CutoverGate;
pub use driver::{FailureTracker, ReconciliationDriver};
pub use grouping::{Grouping, GroupingEngine, ResolvedEndpoint};
pub use report::{PassReport, Problem, StackChanges, StatusChanges, TargetChanges};
pub use stack_reconciler::{plan_desired, plan_orphan, DesiredAction, OrphanAction, StackReconciler};
pub use target_sync::TargetSync;
