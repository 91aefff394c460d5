//! Wakeup and CPU selection (C6).
//!
//! `try_to_wake_up` is the classic `ttwu` state machine: take the target
//! task's `pi_lock`, confirm it is actually sleeping, wait out any in-flight
//! context switch, pick a CPU via the watermark map, then enqueue on that
//! CPU's runqueue and elide the reschedule IPI when possible.
//!
//! Lock order: `pi_lock` is acquired first and dropped before
//! the target `rq.lock` is taken, so this never holds both at once.

use alloc::vec::Vec;

use crossbeam_utils::Backoff;

use crate::bitmap::StaticCpuSet;
use crate::error::Result;
use crate::scheduler::runqueue::CurrentTask;
use crate::scheduler::task::{CoreId, OnRq, RunState, Task, TaskId};
use crate::scheduler::tick::on_voluntary_block;
use crate::scheduler::Scheduler;

impl Scheduler {
	/// Wakes `id` if it is currently sleeping. Returns `Ok(false)` without
	/// effect if the task was already runnable or running ("no-op
	/// wakeup" case).
	pub fn try_to_wake_up(&self, id: TaskId) -> Result<bool> {
		let task_lock = self.require_task(id)?;

		// Wait out any in-flight context switch off this task before we
		// touch its scheduling state. In this crate `on_cpu` is itself
		// protected by the very lock we're about to take, so in practice
		// this resolves on the first iteration; it's kept as a loop to
		// document the invariant rather than assume it away.
		let backoff = Backoff::new();
		let mut task = loop {
			let guard = task_lock.lock();
			if !guard.on_cpu {
				break guard;
			}
			drop(guard);
			backoff.snooze();
		};

		match task.run_state {
			RunState::Blocked | RunState::UninterruptibleBlocked => {}
			_ => return Ok(false),
		}

		let target = self.select_task_rq(&task);
		task.run_state = RunState::Runnable;
		task.on_rq = OnRq::Queued;
		task.home_cpu = target;
		let level = task.sched_prio();
		task.bmq_idx = Some(level);
		let handle = task.handle();
		drop(task);

		let mut rq = self.rq(target).lock();
		rq.enqueue(level, handle, &self.watermark, false);
		let should_kick = match rq.current() {
			Some(CurrentTask { level: current_level, .. }) => level < current_level,
			None => true,
		};
		if should_kick {
			rq.set_need_resched(true);
		}
		drop(rq);

		if should_kick && !self.hooks().is_polling_for_resched(target) {
			log::trace!("waking task {id} on cpu {target}, sending reschedule ipi");
			self.hooks().send_reschedule_ipi(target);
		} else {
			log::trace!("waking task {id} on cpu {target}");
		}

		Ok(true)
	}

	/// Marks the task currently running on `cpu` as blocked and removes it
	/// from `current`, leaving the runqueue ready to dispatch its next task
	/// (C5/C7 call this just before invoking the dispatch loop). Rewards
	/// the task with an interactivity boost if it still had slice left.
	pub fn block_current(&self, cpu: CoreId, uninterruptible: bool) -> Result<TaskId> {
		let mut rq = self.rq(cpu).lock();
		let current = rq.current().ok_or(crate::error::SchedError::Resource)?;
		let task_lock = self.require_task(current.id)?;
		drop(rq);

		let mut task = task_lock.lock();
		on_voluntary_block(&mut task);
		task.on_rq = OnRq::Blocked;
		task.on_cpu = false;
		task.run_state = if uninterruptible { RunState::UninterruptibleBlocked } else { RunState::Blocked };
		drop(task);

		let mut rq = self.rq(cpu).lock();
		rq.set_current(None, &self.watermark);
		if uninterruptible {
			rq.set_uninterruptible_delta(1);
		}
		Ok(current.id)
	}

	/// Picks a CPU for a runnable task: prefers its own `home_cpu`, then
	/// widens outward through the topology's expanding rings, using
	/// the watermark map to prefer a CPU that's no more urgent than this
	/// task. Falls back to the lowest-numbered allowed online CPU if no
	/// ring yields a watermark match (every candidate is busier than this
	/// task, so placement order doesn't matter for correctness).
	fn select_task_rq(&self, task: &Task) -> CoreId {
		let online = self.online_mask();
		let allowed = task.cpus_mask.intersection(&online);
		if allowed.is_empty() {
			// No online CPU satisfies affinity; the fallback-CPU selection
			// path is the caller's responsibility before this is reached in
			// steady state. Degrade to the task's previous CPU rather than
			// panicking.
			return task.home_cpu;
		}

		let level = task.sched_prio();
		let home = task.home_cpu;

		if allowed.contains(home) {
			let singleton = StaticCpuSet::single(home, self.ncpus());
			if self.watermark.select(level, &singleton, Some(home)).is_some() {
				return home;
			}
		}

		for ring in self.topology.rings(home) {
			let candidates = ring.intersection(&allowed);
			if candidates.is_empty() {
				continue;
			}
			if let Some(cpu) = self.watermark.select(level, &candidates, Some(home)) {
				return cpu;
			}
		}

		allowed.pick(Some(home)).unwrap_or(home)
	}

	pub(crate) fn online_mask(&self) -> StaticCpuSet {
		let mut mask = StaticCpuSet::empty(self.ncpus());
		for cpu in 0..self.ncpus() as CoreId {
			if self.rq(cpu).lock().is_online() {
				mask.insert(cpu);
			}
		}
		mask
	}
}

/// Collects the CPUs currently online, for callers outside this module that
/// need the same view (e.g. migration affinity sweeps, C7).
pub(crate) fn online_cpus(scheduler: &Scheduler) -> Vec<CoreId> {
	(0..scheduler.ncpus() as CoreId).filter(|&cpu| scheduler.rq(cpu).lock().is_online()).collect()
}
