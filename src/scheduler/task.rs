//! Task scheduling state (C4).
//!
//! Mirrors the host scheduler's `Task`/`TaskHandle` split: the full state
//! lives behind one lock per task (the `pi_lock`), while a small
//! `Copy` [`TaskHandle`] snapshot is what gets threaded through queues and
//! wakeup paths without holding that lock — the same "arena/index instead
//! of shared pointers" shape calls for, generalized
//! from the host's `Rc<RefCell<Task>>` + `TaskHandle` pair into a
//! `CoreId`-addressed, no-thread-local API.

use core::fmt;

use crate::bitmap::StaticCpuSet;
use crate::config::{MAX_ADJ, MAX_RT_PRIO, NICE_WIDTH, NO_PRIORITIES};

/// Unique identifier for a CPU.
pub type CoreId = u32;

/// Unique identifier for a task.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash)]
pub struct TaskId(u64);

impl TaskId {
	pub const fn new(id: u64) -> Self {
		Self(id)
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for TaskId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Scheduling policy/class.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Policy {
	Fifo,
	RoundRobin,
	Normal,
	Batch,
	Idle,
	/// The dedicated stopper class used for migration/hotplug drain.
	/// Not user-settable via `set_scheduler`.
	Stop,
}

impl Policy {
	pub fn is_realtime(self) -> bool {
		matches!(self, Policy::Fifo | Policy::RoundRobin | Policy::Stop)
	}
}

/// A validated nice value in `[-20, 19]`.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub struct Nice(i8);

impl Nice {
	pub const MIN: i8 = -20;
	pub const MAX: i8 = 19;

	pub fn new(value: i8) -> Option<Self> {
		(Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
	}

	pub fn clamp(value: i32) -> Self {
		Self(value.clamp(Self::MIN as i32, Self::MAX as i32) as i8)
	}

	pub fn get(self) -> i8 {
		self.0
	}
}

/// The kernel-visible effective priority (`t.prio`), a single `i32` address
/// space shared by RT and normal tasks: `0..MAX_RT_PRIO` is realtime
/// (lower is more urgent, matching `rt_priority` descending), and
/// `MAX_RT_PRIO..` is normal/batch/idle space.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub struct Priority(i32);

impl Priority {
	pub const fn new(raw: i32) -> Self {
		Self(raw)
	}

	pub const fn get(self) -> i32 {
		self.0
	}

	pub fn is_realtime(self) -> bool {
		self.0 < MAX_RT_PRIO
	}
}

/// A task's `on_rq` state: not queued anywhere, queued on some
/// runqueue's priority queue, or in transit between two runqueues.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum OnRq {
	Blocked,
	Queued,
	Migrating,
}

/// Coarse run state, orthogonal to `on_rq`: whether a queued task is the one
/// actually executing, blocked waiting on something, or torn down.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum RunState {
	Runnable,
	Running,
	Blocked,
	UninterruptibleBlocked,
	Finished,
	Idle,
}

/// A lightweight, `Copy` reference to a task used for queue linkage and
/// cross-lock bookkeeping without holding the task's own lock ("break
/// ownership").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
	id: TaskId,
	prio: Priority,
	home_cpu: CoreId,
}

impl TaskHandle {
	pub fn new(id: TaskId, prio: Priority, home_cpu: CoreId) -> Self {
		Self { id, prio, home_cpu }
	}

	pub fn id(&self) -> TaskId {
		self.id
	}

	pub fn priority(&self) -> Priority {
		self.prio
	}

	pub fn home_cpu(&self) -> CoreId {
		self.home_cpu
	}
}

/// The full scheduling state for one task, protected by its own lock (the
/// `pi_lock`) in [`crate::scheduler::Scheduler`].
#[derive(Debug, Clone)]
pub struct Task {
	pub id: TaskId,
	pub policy: Policy,
	/// nice-derived static priority, meaningful for `Normal`/`Batch`.
	pub static_prio: i32,
	/// `0..=99`, meaningful for `Fifo`/`RoundRobin`.
	pub rt_priority: i32,
	/// `normal_prio(t)`, recomputed whenever policy/nice/rt_priority change.
	pub normal_prio: i32,
	/// Effective priority: `normal_prio` unless PI-boosted.
	pub prio: i32,
	/// Dynamic interactivity adjustment, `Normal` only, clamped to
	/// `[-MAX_ADJ, MAX_ADJ]`.
	pub boost_prio: i32,
	/// Cached C1 bitmap level (`sched_prio(t)`); `None` while not queued.
	pub bmq_idx: Option<usize>,
	/// Nanoseconds of time-slice remaining.
	pub time_slice: u64,
	/// `rq.clock` snapshot at the last time this task started running.
	pub last_ran: u64,
	pub on_rq: OnRq,
	pub run_state: RunState,
	/// Whether this task is the one actually executing on `home_cpu`
	/// (`on_cpu`).
	pub on_cpu: bool,
	/// The runqueue this task is linked into (or was last linked into).
	pub home_cpu: CoreId,
	pub cpus_mask: StaticCpuSet,
	pub nr_cpus_allowed: usize,
	/// Priority-inheritance donor, if any (a "weak pointer", not owning).
	pub pi_top_task: Option<TaskId>,
}

impl Task {
	pub fn new(id: TaskId, policy: Policy, home_cpu: CoreId, cpus_mask: StaticCpuSet) -> Self {
		let nr_cpus_allowed = cpus_mask.iter().count();
		let mut task = Self {
			id,
			policy,
			static_prio: MAX_ADJ,
			rt_priority: 0,
			normal_prio: 0,
			prio: 0,
			boost_prio: 0,
			bmq_idx: None,
			time_slice: 0,
			last_ran: 0,
			on_rq: OnRq::Blocked,
			run_state: RunState::Runnable,
			on_cpu: false,
			home_cpu,
			cpus_mask,
			nr_cpus_allowed,
			pi_top_task: None,
		};
		task.normal_prio = normal_prio(policy, task.static_prio, task.rt_priority);
		task.prio = task.normal_prio;
		task
	}

	pub fn idle(id: TaskId, home_cpu: CoreId, cpus_mask: StaticCpuSet) -> Self {
		let mut task = Self::new(id, Policy::Idle, home_cpu, cpus_mask);
		task.run_state = RunState::Idle;
		task.on_rq = OnRq::Queued;
		task.normal_prio = idle_normal_prio();
		task.prio = task.normal_prio;
		task
	}

	pub fn handle(&self) -> TaskHandle {
		TaskHandle::new(self.id, Priority::new(self.prio), self.home_cpu)
	}

	pub fn nice(&self) -> Nice {
		Nice::clamp(self.static_prio - MAX_ADJ)
	}

	pub fn set_nice(&mut self, nice: Nice) {
		self.static_prio = i32::from(nice.get()) + MAX_ADJ;
		self.normal_prio = normal_prio(self.policy, self.static_prio, self.rt_priority);
		self.recompute_effective_prio();
	}

	/// Recomputes `prio` from `normal_prio` and the PI donor chain:
	/// `prio = min(normal_prio, donor.prio)` if PI-boosted, else
	/// `normal_prio`. The donor's priority is supplied by the caller, since
	/// resolving `pi_top_task` requires locking another task.
	pub fn recompute_effective_prio_with_donor(&mut self, donor_prio: Option<i32>) {
		self.prio = match donor_prio {
			Some(donor) => self.normal_prio.min(donor),
			None => self.normal_prio,
		};
	}

	fn recompute_effective_prio(&mut self) {
		self.recompute_effective_prio_with_donor(None);
	}

	/// `sched_prio(t)`: the bitmap level this task belongs in.
	pub fn sched_prio(&self) -> usize {
		if self.prio < MAX_RT_PRIO {
			0
		} else {
			let level = self.prio - MAX_RT_PRIO + self.boost_prio;
			level.clamp(0, (NO_PRIORITIES - 1) as i32) as usize
		}
	}

	/// Bound imposed on `boost_prio` by this task's policy.
	fn boost_floor(&self) -> i32 {
		match self.policy {
			Policy::Normal => -MAX_ADJ,
			_ => 0,
		}
	}

	/// Promote (more interactive) by one step, saturating at the
	/// policy-specific floor. A no-op while donating priority to another
	/// task (conservative resolution: never self-deboost while donating).
	pub fn boost(&mut self) {
		if self.pi_top_task.is_some() {
			return;
		}
		let floor = self.boost_floor();
		self.boost_prio = (self.boost_prio - 1).max(floor);
	}

	/// Deboost by one step toward zero, saturating.
	pub fn deboost(&mut self) {
		self.boost_prio = (self.boost_prio + 1).min(MAX_ADJ);
	}
}

/// `normal_prio(t)`.
pub fn normal_prio(policy: Policy, static_prio: i32, rt_priority: i32) -> i32 {
	if policy.is_realtime() {
		MAX_RT_PRIO - 1 - rt_priority
	} else {
		static_prio + MAX_RT_PRIO
	}
}

/// The reserved `normal_prio` for the idle task: one level below the least
/// urgent normal-policy level.
pub fn idle_normal_prio() -> i32 {
	MAX_RT_PRIO + NICE_WIDTH + MAX_ADJ
}
