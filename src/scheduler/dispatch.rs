//! Dispatch loop, pull migration, SMT balancing, and the context-switch
//! driver (C7, C8).
//!
//! `schedule` is the `__schedule` equivalent: decide what should run next
//! on one CPU and, if that differs from what's running now, hand off to
//! [`crate::hooks::ArchHooks`]. Migration only ever takes from a remote
//! runqueue via `try_lock` — a busy donor is simply skipped rather
//! than waited on, since the puller already holds its own `rq.lock`.

use crate::config::MAX_PULL_BATCH;
use crate::error::Result;
use crate::scheduler::runqueue::{CurrentTask, RunQueue};
use crate::scheduler::task::{CoreId, OnRq, RunState};
use crate::scheduler::tick::grant_initial_slice;
use crate::scheduler::Scheduler;

impl Scheduler {
	/// Runs one dispatch decision for `cpu`: requeue the current task if
	/// it's still runnable, pull work from elsewhere if there's nothing
	/// left locally, then switch to whichever task is now most urgent.
	/// A no-op (no `ArchHooks::switch` call) if the same task remains most
	/// urgent.
	pub fn schedule(&self, cpu: CoreId) -> Result<()> {
		let mut rq = self.rq(cpu).lock();
		rq.set_need_resched(false);
		let prev = rq.current();

		if let Some(CurrentTask { id, .. }) = prev {
			if id != rq.idle_task() {
				if let Some(task_lock) = self.task(id) {
					let mut task = task_lock.lock();
					let still_runnable = task.on_rq == OnRq::Queued
						&& matches!(task.run_state, RunState::Runnable | RunState::Running);
					if still_runnable {
						task.on_cpu = false;
						task.run_state = RunState::Runnable;
						let level = task.sched_prio();
						task.bmq_idx = Some(level);
						let handle = task.handle();
						drop(task);
						// A slice-expiry requeue joins the tail of its level
						// (round-robin fairness, P5); a preemption requeue
						// (the slice was not exhausted) returns to the head
						// so it is the very next task dispatched there.
						let front = !rq.take_slice_expired();
						rq.enqueue(level, handle, self.watermark(), front);
					}
				}
			}
		}

		if rq.head_level().is_none() {
			self.try_pull(cpu, &mut rq);
		}

		let (next_id, next_level) = match rq.pop_next() {
			Some((level, handle)) => (handle.id(), level),
			None => (rq.idle_task(), usize::MAX),
		};

		if let Some(CurrentTask { id, .. }) = prev {
			if id == next_id {
				// Same task remains most urgent: restore it as current
				// without invoking the context-switch hook.
				if let Some(task_lock) = self.task(id) {
					let mut task = task_lock.lock();
					task.on_cpu = true;
					task.run_state = RunState::Running;
					task.bmq_idx = None;
				}
				rq.set_current(Some(CurrentTask { id, level: next_level }), self.watermark());
				return Ok(());
			}
		}

		let prev_id = prev.map(|c| c.id).unwrap_or(rq.idle_task());
		drop(rq);

		log::debug!("cpu {cpu}: switching from {prev_id} to {next_id}");
		self.hooks().start_context_switch(cpu, prev_id, next_id);
		self.hooks().switch(cpu, prev_id, next_id);
		self.hooks().end_context_switch(cpu, prev_id, next_id);

		if let Some(task_lock) = self.task(next_id) {
			let mut task = task_lock.lock();
			task.on_cpu = true;
			task.run_state = RunState::Running;
			task.bmq_idx = None;
			if task.time_slice == 0 {
				grant_initial_slice(&mut task);
			}
		}

		let mut rq = self.rq(cpu).lock();
		rq.set_current(Some(CurrentTask { id: next_id, level: next_level }), self.watermark());
		rq.mark_switch();
		Ok(())
	}

	/// Pulls up to [`MAX_PULL_BATCH`] eligible waiting tasks into `rq` from
	/// progressively wider topology rings around `cpu`, stopping as soon as
	/// the local runqueue has something to run.
	fn try_pull(&self, cpu: CoreId, rq: &mut RunQueue) -> usize {
		let mut pulled = 0;
		for ring in self.topology().rings(cpu) {
			for donor_cpu in ring.iter() {
				if pulled >= MAX_PULL_BATCH || rq.head_level().is_some() {
					return pulled;
				}
				pulled += self.pull_from(cpu, donor_cpu, rq, MAX_PULL_BATCH - pulled);
			}
		}
		pulled
	}

	fn pull_from(&self, cpu: CoreId, donor_cpu: CoreId, rq: &mut RunQueue, max: usize) -> usize {
		let Some(mut donor) = self.rq(donor_cpu).try_lock() else {
			return 0;
		};
		if donor.nr_running() == 0 {
			return 0;
		}
		let taken = donor.pull_candidates(max, self.watermark(), |handle| {
			self.task(handle.id()).is_some_and(|t| t.lock().cpus_mask.contains(cpu))
		});
		let n = taken.len();
		drop(donor);
		for (level, handle) in taken {
			if let Some(task_lock) = self.task(handle.id()) {
				let mut task = task_lock.lock();
				task.home_cpu = cpu;
				task.on_rq = OnRq::Queued;
				task.bmq_idx = Some(level);
			}
			rq.enqueue(level, handle, self.watermark(), false);
		}
		n
	}

	/// SMT sibling balancing: if `cpu` has more than one runnable
	/// task while an SMT sibling is entirely idle, push one task across.
	/// A no-op on topologies without SMT groups.
	pub fn balance_smt_siblings(&self, cpu: CoreId) {
		if !self.topology().has_smt() {
			return;
		}
		let idle = self.watermark().fully_idle();
		for sibling in self.topology().smt_siblings(cpu).iter() {
			if sibling == cpu || !idle.contains(sibling) {
				continue;
			}
			let Some(mut rq) = self.rq(cpu).try_lock() else { continue };
			if rq.nr_running() <= 1 {
				continue;
			}
			let Some(mut sib_rq) = self.rq(sibling).try_lock() else { continue };
			let taken = rq.pull_candidates(1, self.watermark(), |handle| {
				self.task(handle.id()).is_some_and(|t| t.lock().cpus_mask.contains(sibling))
			});
			drop(rq);
			for (level, handle) in taken {
				if let Some(task_lock) = self.task(handle.id()) {
					let mut task = task_lock.lock();
					task.home_cpu = sibling;
					task.bmq_idx = Some(level);
				}
				sib_rq.enqueue(level, handle, self.watermark(), false);
			}
			return;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bitmap::StaticCpuSet;
	use crate::hooks::test_hooks::FakeHooks;
	use crate::scheduler::task::{Policy, Task, TaskId};
	use crate::topology::Topology;
	use alloc::boxed::Box;

	fn scheduler(ncpus: usize) -> Scheduler {
		let topo = Topology::flat(ncpus);
		let hooks = Box::new(FakeHooks::new(ncpus));
		let sched = Scheduler::new(topo, hooks);
		for cpu in 0..ncpus as CoreId {
			sched.rq(cpu).lock().set_online(true);
		}
		sched
	}

	#[test]
	fn schedule_picks_idle_when_queue_empty() {
		let sched = scheduler(1);
		sched.schedule(0).unwrap();
		assert_eq!(sched.rq(0).lock().current().unwrap().id, sched.rq(0).lock().idle_task());
	}

	#[test]
	fn schedule_dispatches_waiting_task() {
		let sched = scheduler(1);
		let mask = StaticCpuSet::full(1);
		let mut t = Task::new(TaskId::new(5), Policy::Normal, 0, mask);
		t.on_rq = OnRq::Queued;
		let level = t.sched_prio();
		let handle = t.handle();
		sched.insert_task(t.id, t);
		sched.rq(0).lock().enqueue(level, handle, sched.watermark(), false);

		sched.schedule(0).unwrap();
		assert_eq!(sched.rq(0).lock().current().unwrap().id, TaskId::new(5));
	}

	#[test]
	fn preempted_task_requeues_at_head_of_its_level() {
		let sched = scheduler(1);
		let mask = StaticCpuSet::full(1);

		let mut a = Task::new(TaskId::new(1), Policy::Normal, 0, mask.clone());
		a.on_rq = OnRq::Queued;
		a.on_cpu = true;
		a.run_state = RunState::Running;
		let level = a.sched_prio();
		let a_id = a.id;
		sched.insert_task(a_id, a);
		sched.rq(0).lock().set_current(Some(CurrentTask { id: a_id, level }), sched.watermark());

		let mut b = Task::new(TaskId::new(2), Policy::Normal, 0, mask);
		b.on_rq = OnRq::Queued;
		let b_handle = b.handle();
		sched.insert_task(b.id, b);
		sched.rq(0).lock().enqueue(level, b_handle, sched.watermark(), false);

		// Slice not exhausted: this is a preemption, not an expiry.
		sched.schedule(0).unwrap();

		assert_eq!(sched.rq(0).lock().current().unwrap().id, a_id, "preempted task must be picked again ahead of the already-waiting task");
		assert_eq!(sched.rq(0).lock().nr_running(), 1, "the other waiting task must still be queued, untouched");
	}

	#[test]
	fn slice_expired_task_requeues_at_tail_of_its_level() {
		let sched = scheduler(1);
		let mask = StaticCpuSet::full(1);

		let mut a = Task::new(TaskId::new(1), Policy::Normal, 0, mask.clone());
		a.on_rq = OnRq::Queued;
		a.on_cpu = true;
		a.run_state = RunState::Running;
		let level = a.sched_prio();
		let a_id = a.id;
		sched.insert_task(a_id, a);
		sched.rq(0).lock().set_current(Some(CurrentTask { id: a_id, level }), sched.watermark());

		let mut b = Task::new(TaskId::new(2), Policy::Normal, 0, mask);
		b.on_rq = OnRq::Queued;
		let b_handle = b.handle();
		let b_id = b.id;
		sched.insert_task(b_id, b);
		sched.rq(0).lock().enqueue(level, b_handle, sched.watermark(), false);

		sched.rq(0).lock().set_slice_expired(true);
		sched.schedule(0).unwrap();

		assert_eq!(sched.rq(0).lock().current().unwrap().id, b_id, "the already-waiting task must run next, ahead of the round-robin rotated one");
		assert_eq!(sched.rq(0).lock().nr_running(), 1, "the expired task must still be queued, now at the tail");
	}

	#[test]
	fn pull_migration_moves_task_across_cpus() {
		let sched = scheduler(2);
		let mask = StaticCpuSet::full(2);
		let mut t = Task::new(TaskId::new(7), Policy::Normal, 1, mask);
		t.on_rq = OnRq::Queued;
		let level = t.sched_prio();
		let handle = t.handle();
		sched.insert_task(t.id, t);
		sched.rq(1).lock().enqueue(level, handle, sched.watermark(), false);

		sched.schedule(0).unwrap();
		assert_eq!(sched.rq(0).lock().current().unwrap().id, TaskId::new(7));
		assert_eq!(sched.task(TaskId::new(7)).unwrap().lock().home_cpu, 0);
	}
}
