//! Error taxonomy for the scheduler's syscall-contract surface.
//!
//! Only the "Validation", "Permission", "Lookup" and "Resource" kinds from
//! the design are surfaced here. "Invariant violation" and "Transient race"
//! are not represented as [`SchedError`] values: the former is a
//! `debug_assert!` in debug builds and a `warn!` + safe no-op in release
//! builds, the latter is handled by spinning/retrying at the call site.

use thiserror::Error;

use crate::scheduler::task::{Policy, Priority, TaskId};

/// Errors returned across the policy/affinity/PI contract surface.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
	/// `policy` is not a recognized scheduling class.
	#[error("policy {0:?} is not a valid scheduling policy")]
	InvalidPolicy(Policy),

	/// `priority` is out of range for the given policy.
	#[error("priority {0:?} is out of range for the given policy")]
	InvalidPriority(Priority),

	/// The requested CPU affinity mask does not intersect the set of
	/// online CPUs, or is empty.
	#[error("requested affinity mask does not intersect any online CPU")]
	EmptyAffinityMask,

	/// The caller lacks permission to perform the requested change
	/// (e.g. raising RT priority, or changing another user's task).
	#[error("permission denied for this priority/policy change")]
	PermissionDenied,

	/// No task with this id is known to the scheduler.
	#[error("task {0} not found")]
	TaskNotFound(TaskId),

	/// A transient allocation failed (e.g. copying an affinity mask).
	/// Scheduler state is left unchanged.
	#[error("resource exhausted")]
	Resource,
}

pub type Result<T> = core::result::Result<T, SchedError>;
