//! The per-CPU runqueue (C2).
//!
//! One [`RunQueue`] exists per `CoreId` and is owned by
//! [`crate::scheduler::Scheduler`] behind its own `InterruptTicketMutex`
//! (the `rq.lock`), mirroring how the host scheduler keeps one
//! `PerCoreScheduler` per core — generalized here into an explicitly
//! lockable, `CoreId`-addressed struct since this crate has no per-core
//! storage of its own to place it in.
//!
//! A [`RunQueue`] only ever holds *waiting* tasks in its [`PriorityQueue`];
//! the currently running task is tracked separately in `current` so that a
//! running task's priority can change (boost/deboost, PI) without a queue
//! removal/reinsertion.

use crate::scheduler::queue::PriorityQueue;
use crate::scheduler::task::{CoreId, TaskHandle, TaskId};
use crate::scheduler::watermark::{WatermarkMap, IDLE_WATERMARK};

/// The task presently executing on a runqueue's CPU, cached alongside its
/// dispatch level so the watermark map can be republished without
/// recomputing `sched_prio` from the full task state.
#[derive(Debug, Clone, Copy)]
pub struct CurrentTask {
	pub id: TaskId,
	pub level: usize,
}

/// A read-only snapshot of a runqueue's counters, the one piece of
/// per-runqueue observability this crate exposes, in place of a full
/// metrics/tracing pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunqueueStats {
	pub nr_running: usize,
	pub nr_uninterruptible: u64,
	pub nr_iowait: usize,
	pub nr_switches: u64,
}

/// One CPU's local scheduling state.
#[derive(Debug)]
pub struct RunQueue {
	cpu: CoreId,
	queue: PriorityQueue,
	current: Option<CurrentTask>,
	idle_task: TaskId,
	/// The dedicated stopper task used for forced migration/hotplug drain.
	stopper: TaskId,
	/// "Don't immediately re-dispatch this task" marker left by a yielding
	/// task so the next pick doesn't just hand the CPU straight back to it
	/// (the one-shot "skip pointer" for yield mode 2).
	skip: Option<TaskId>,
	/// Set by [`crate::scheduler::tick::scheduler_tick`] when the task it
	/// just charged had its slice fully replenished (ran out mid-slice), so
	/// the dispatch loop knows to requeue it at the tail of its level rather
	/// than the front. One-shot: consumed by [`Self::take_slice_expired`] on
	/// the next `schedule` call.
	slice_expired: bool,
	/// Monotonic wall clock for this CPU, in nanoseconds.
	clock: u64,
	/// `clock` minus accounted IRQ/steal time.
	clock_task: u64,
	last_ts_switch: u64,
	last_tick: u64,
	nr_running: usize,
	nr_uninterruptible: u64,
	nr_iowait: usize,
	nr_switches: u64,
	online: bool,
	/// Set while this runqueue is the target of an in-progress active
	/// (push) balance, to avoid two balancers picking the same donor twice.
	active_balance: bool,
	/// Raised by [`crate::scheduler::tick::scheduler_tick`] when the current
	/// task's slice has run out or a wakeup found something more urgent;
	/// cleared by `schedule` on entry. Tells the embedder's interrupt-return
	/// path whether it needs to invoke `schedule` at the next safe point.
	need_resched: bool,
}

impl RunQueue {
	pub fn new(cpu: CoreId, idle_task: TaskId, stopper: TaskId) -> Self {
		Self {
			cpu,
			queue: PriorityQueue::new(),
			current: Some(CurrentTask { id: idle_task, level: crate::config::NO_PRIORITIES - 1 }),
			idle_task,
			stopper,
			skip: None,
			slice_expired: false,
			clock: 0,
			clock_task: 0,
			last_ts_switch: 0,
			last_tick: 0,
			nr_running: 0,
			nr_uninterruptible: 0,
			nr_iowait: 0,
			nr_switches: 0,
			online: false,
			active_balance: false,
			need_resched: false,
		}
	}

	pub fn cpu(&self) -> CoreId {
		self.cpu
	}

	pub fn idle_task(&self) -> TaskId {
		self.idle_task
	}

	pub fn stopper(&self) -> TaskId {
		self.stopper
	}

	pub fn is_online(&self) -> bool {
		self.online
	}

	pub fn set_online(&mut self, online: bool) {
		self.online = online;
	}

	pub fn is_active_balance(&self) -> bool {
		self.active_balance
	}

	pub fn set_active_balance(&mut self, value: bool) {
		self.active_balance = value;
	}

	pub fn need_resched(&self) -> bool {
		self.need_resched
	}

	pub fn set_need_resched(&mut self, value: bool) {
		self.need_resched = value;
	}

	pub fn current(&self) -> Option<CurrentTask> {
		self.current
	}

	pub fn clock(&self) -> u64 {
		self.clock
	}

	pub fn clock_task(&self) -> u64 {
		self.clock_task
	}

	pub fn last_tick(&self) -> u64 {
		self.last_tick
	}

	pub fn skip_marker(&self) -> Option<TaskId> {
		self.skip
	}

	pub fn set_skip_marker(&mut self, id: Option<TaskId>) {
		self.skip = id;
	}

	/// Records whether the task just charged by the timer tick had its
	/// slice fully replenished, for the next `schedule` call to consume.
	pub fn set_slice_expired(&mut self, value: bool) {
		self.slice_expired = value;
	}

	/// One-shot read of the slice-expiry marker, resetting it to `false`.
	pub fn take_slice_expired(&mut self) -> bool {
		core::mem::take(&mut self.slice_expired)
	}

	pub fn nr_running(&self) -> usize {
		self.nr_running
	}

	pub fn stats(&self) -> RunqueueStats {
		RunqueueStats {
			nr_running: self.nr_running,
			nr_uninterruptible: self.nr_uninterruptible,
			nr_iowait: self.nr_iowait,
			nr_switches: self.nr_switches,
		}
	}

	/// Advances `clock`/`clock_task` to `now_ns`, subtracting accounted
	/// IRQ/steal time for the task-visible clock.
	pub fn update_clock(&mut self, now_ns: u64, irq_plus_steal_ns: u64) {
		self.clock = now_ns;
		self.clock_task = now_ns.saturating_sub(irq_plus_steal_ns);
	}

	pub fn mark_tick(&mut self) {
		self.last_tick = self.clock;
	}

	pub fn mark_switch(&mut self) {
		self.last_ts_switch = self.clock;
		self.nr_switches += 1;
	}

	pub fn last_switch(&self) -> u64 {
		self.last_ts_switch
	}

	/// Enqueues a waiting task at `level` and republishes this CPU's
	/// watermark if its head got more urgent. Level 0 is shared by every RT
	/// task and the stopper, so insertion there is always priority-ordered
	/// by `prio` regardless of `front`; `front`/tail only distinguishes a
	/// preempted task from a newly-arrived or slice-expired one at every
	/// other level.
	pub fn enqueue(&mut self, level: usize, handle: TaskHandle, wm: &WatermarkMap, front: bool) {
		if level == 0 {
			self.queue.push_priority_ordered(level, handle);
		} else if front {
			self.queue.push_front(level, handle);
		} else {
			self.queue.push_back(level, handle);
		}
		self.nr_running += 1;
		self.publish(wm);
	}

	/// Removes a specific waiting task, e.g. on affinity change or pull
	/// migration.
	pub fn dequeue(&mut self, level: usize, id: TaskId, wm: &WatermarkMap) -> Option<TaskHandle> {
		let handle = self.queue.remove(level, id);
		if handle.is_some() {
			self.nr_running -= 1;
			self.publish(wm);
		}
		handle
	}

	/// Pops the most urgent waiting task to become the new `current`
	/// (dispatch). Does not itself update `current`; the caller wires
	/// that through the context-switch driver. Consumes the one-shot
	/// [`Self::set_skip_marker`] left by yield mode 2, if any: the marked
	/// task is passed over for this single pick.
	pub fn pop_next(&mut self) -> Option<(usize, TaskHandle)> {
		let skip = self.skip.take();
		self.queue.pop_highest_except(skip)
	}

	pub fn head_level(&self) -> Option<usize> {
		self.queue.first_level()
	}

	pub fn set_current(&mut self, current: Option<CurrentTask>, wm: &WatermarkMap) {
		self.current = current;
		self.publish(wm);
	}

	pub fn set_uninterruptible_delta(&mut self, delta: i64) {
		if delta >= 0 {
			self.nr_uninterruptible += delta as u64;
		} else {
			self.nr_uninterruptible = self.nr_uninterruptible.saturating_sub((-delta) as u64);
		}
	}

	pub fn set_iowait_delta(&mut self, delta: i64) {
		if delta >= 0 {
			self.nr_iowait += delta as usize;
		} else {
			self.nr_iowait = self.nr_iowait.saturating_sub((-delta) as usize);
		}
	}

	/// Drains up to `max` of this runqueue's waiting tasks, most-urgent
	/// level first, for which `accept` returns true, for pull migration.
	/// `accept` is the caller's affinity check against the puller's CPU — a
	/// [`TaskHandle`] alone doesn't carry a full `cpus_mask`, so this
	/// runqueue can't judge eligibility itself. Republishes the watermark
	/// once at the end rather than per task.
	pub fn pull_candidates<F>(&mut self, max: usize, wm: &WatermarkMap, mut accept: F) -> alloc::vec::Vec<(usize, TaskHandle)>
	where
		F: FnMut(TaskHandle) -> bool,
	{
		let mut taken = alloc::vec::Vec::with_capacity(max);
		self.queue.drain_from_tail(max, |level, handle| {
			if accept(handle) {
				taken.push((level, handle));
				true
			} else {
				false
			}
		});
		self.nr_running -= taken.len();
		if !taken.is_empty() {
			self.publish(wm);
		}
		taken
	}

	fn publish(&self, wm: &WatermarkMap) {
		let running_level = self.current.map(|c| c.level);
		let waiting_level = self.queue.first_level();
		let level = match (running_level, waiting_level) {
			(Some(a), Some(b)) => a.min(b),
			(Some(a), None) => a,
			(None, Some(b)) => b,
			(None, None) => IDLE_WATERMARK,
		};
		wm.publish(self.cpu, level);
	}
}
