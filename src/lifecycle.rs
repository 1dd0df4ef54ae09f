//! Assignment status transition rules.
//!
//! Every rule is pure: it looks at the current status (and window, and clock
//! where relevant) and answers with the status to move to, or `None` when the
//! rule does not apply. Callers persist the answer with a compare-and-set on
//! the status they read, so a rule computed from stale state never lands.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Assignment, AssignmentStatus};

/// Operator-driven transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualAction {
    /// SCHEDULED → ACTIVE, only while the window is open.
    Start,
    /// ACTIVE → COMPLETED, only once the window is over.
    Finish,
    /// SCHEDULED | ACTIVE → CANCELLED.
    Cancel,
    /// CANCELLED → SCHEDULED.
    Plan,
}

impl fmt::Display for ManualAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManualAction::Start => write!(f, "start"),
            ManualAction::Finish => write!(f, "finish"),
            ManualAction::Cancel => write!(f, "cancel"),
            ManualAction::Plan => write!(f, "plan"),
        }
    }
}

/// A status change that was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: AssignmentStatus,
    pub to: AssignmentStatus,
}

impl fmt::Display for StatusChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.from, self.to)
    }
}

/// The rule a writer applies to the status it re-reads at write time.
pub type StatusRule = fn(AssignmentStatus) -> Option<AssignmentStatus>;

/// Namespace for the assignment transition rules.
pub struct Lifecycle;

impl Lifecycle {
    /// Time-based recompute used by the periodic refresh.
    ///
    /// - before `start` → SCHEDULED
    /// - inside `[start, end]` → ACTIVE
    /// - after `end` → COMPLETED
    ///
    /// CANCELLED is never touched; an already-correct status yields `None`.
    pub fn refresh(assignment: &Assignment, now: DateTime<Utc>) -> Option<AssignmentStatus> {
        if assignment.status == AssignmentStatus::Cancelled {
            return None;
        }
        let target = if now < assignment.start {
            AssignmentStatus::Scheduled
        } else if now <= assignment.end {
            AssignmentStatus::Active
        } else {
            AssignmentStatus::Completed
        };
        (target != assignment.status).then_some(target)
    }

    /// Operator transitions. Illegal requests yield `None`.
    pub fn manual(
        assignment: &Assignment,
        action: ManualAction,
        now: DateTime<Utc>,
    ) -> Option<AssignmentStatus> {
        use AssignmentStatus::*;

        match (action, assignment.status) {
            (ManualAction::Start, Scheduled) if assignment.covers(now) => Some(Active),
            (ManualAction::Finish, Active) if now > assignment.end => Some(Completed),
            (ManualAction::Cancel, Scheduled | Active) => Some(Cancelled),
            (ManualAction::Plan, Cancelled) => Some(Scheduled),
            _ => None,
        }
    }

    /// An arrival opens a scheduled assignment.
    pub fn on_arrival(status: AssignmentStatus) -> Option<AssignmentStatus> {
        (status == AssignmentStatus::Scheduled).then_some(AssignmentStatus::Active)
    }

    /// A departure, observed or synthesized, closes an open assignment.
    pub fn on_departure(status: AssignmentStatus) -> Option<AssignmentStatus> {
        status.is_open().then_some(AssignmentStatus::Completed)
    }

    /// The sweep cancels an active assignment nobody showed up for.
    pub fn on_no_show(status: AssignmentStatus) -> Option<AssignmentStatus> {
        (status == AssignmentStatus::Active).then_some(AssignmentStatus::Cancelled)
    }
}
