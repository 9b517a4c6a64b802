//! Per-pass results
//!
//! A pass never stops at the first failure. Everything that went wrong is
//! collected as a [`Problem`] and handed back in the [`PassReport`].

use std::fmt;
use tracing::{info, warn};

use crate::errors::ControllerError;

/// One failure recorded during a pass, scoped to the item it concerns.
#[derive(Debug)]
pub struct Problem {
    /// What the failure is about, e.g. `endpoint ingress/default/foo`
    pub scope: String,
    pub error: ControllerError,
}

impl Problem {
    pub fn new(scope: impl Into<String>, error: ControllerError) -> Self {
        Self { scope: scope.into(), error }
    }

    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.scope, self.error)
    }
}

/// Stack changes issued by the reconciler.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StackChanges {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub waiting: usize,
    pub scheduled: usize,
    pub deleted: usize,
}

/// Endpoint status writes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusChanges {
    pub updated: usize,
    pub unchanged: usize,
    /// Held back by the cutover gate
    pub withheld: usize,
    pub skipped: usize,
}

/// Target registrations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TargetChanges {
    pub registered: usize,
    pub deregistered: usize,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct PassReport {
    pub endpoints: usize,
    pub descriptors: usize,
    pub stacks: StackChanges,
    pub statuses: StatusChanges,
    pub targets: TargetChanges,
    pub problems: Vec<Problem>,
}

impl PassReport {
    /// A pass succeeds when it recorded no problem
    pub fn is_success(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn push_problem(&mut self, scope: impl Into<String>, error: ControllerError) {
        self.problems.push(Problem::new(scope, error));
    }

    /// Log every problem and a one-line summary of the pass
    pub fn log_summary(&self) {
        for problem in &self.problems {
            warn!(scope = %problem.scope, kind = problem.kind(), error = %problem.error, "Pass problem");
        }
        info!(
            endpoints = self.endpoints,
            load_balancers = self.descriptors,
            created = self.stacks.created,
            updated = self.stacks.updated,
            scheduled = self.stacks.scheduled,
            deleted = self.stacks.deleted,
            statuses_updated = self.statuses.updated,
            statuses_withheld = self.statuses.withheld,
            targets_registered = self.targets.registered,
            targets_deregistered = self.targets.deregistered,
            problems = self.problems.len(),
            "Reconciliation pass finished"
        );
    }

    /// Problems whose error is of `kind`
    pub fn problems_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Problem> + 'a {
        self.problems.iter().filter(move |p| p.kind() == kind)
    }
}
