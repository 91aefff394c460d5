//! Compile-time scheduling-policy constants.
//!
//! These mirror the handful of top-level `pub const`s a BMQ-style scheduler
//! keeps for its own tuning knobs (time-slice length, reschedule threshold,
//! priority-space width) rather than a runtime configuration struct: they
//! are scheduling *policy*, fixed at build time, not deployment config.

/// Number of realtime priority levels (`FIFO`/`RR`, 0..=99 in the syscall
/// contract, but internally they all share bitmap level 0).
pub const MAX_RT_PRIO: i32 = 100;

/// `static_prio` bias added to a nice value to get `normal_prio`.
pub const MAX_PRIORITY_ADJ: i32 = 20;

/// Alias used throughout the boost/deboost logic.
pub const MAX_ADJ: i32 = MAX_PRIORITY_ADJ;

/// Width of the nice range, `[-20, 19]`.
pub const NICE_WIDTH: i32 = 40;

/// Number of distinct scheduler-visible priority levels in the per-RQ
/// bitmap queue: one shared level for all RT priorities (level 0) plus one
/// level per achievable `normal_prio + boost_prio` combination.
pub const NO_PRIORITIES: usize = 64;

/// Time-slice granted to a task on replenishment, in nanoseconds (6 ms, the
/// conventional default for this scheduler family).
pub const SCHED_TIMESLICE_NS: u64 = 6_000_000;

/// Once a running task's remaining slice drops below this, mark it for
/// reschedule on the next tick.
pub const RESCHED_THRESH_NS: u64 = 100_000;

/// Ceiling on how many tasks a single pull migration batch may take from one
/// remote runqueue.
pub const MAX_PULL_BATCH: usize = 32;
