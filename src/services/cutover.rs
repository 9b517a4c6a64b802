//! DNS cutover gate
//!
//! Endpoints are only pointed at a load balancer once it is old enough for its
//! targets to have registered and passed health checks.

use chrono::{DateTime, Duration, Utc};

use crate::domain::Stack;

#[derive(Debug, Clone, Copy)]
pub struct CutoverGate {
    min_age: Duration,
}

impl CutoverGate {
    pub fn new(min_age: Duration) -> Self {
        Self { min_age }
    }

    /// Whether the stack's address may be written to endpoints at `now`
    pub fn allows(&self, stack: &Stack, now: DateTime<Utc>) -> bool {
        stack.age(now) >= self.min_age
    }

    /// Time left until the gate opens, zero once open
    pub fn remaining(&self, stack: &Stack, now: DateTime<Utc>) -> Duration {
        (self.min_age - stack.age(now)).max(Duration::zero())
    }
}
