//! Periodic accounting and the boost/deboost interactivity heuristic (C5).
//!
//! Charges the running task's time slice, decides whether the current tick
//! requires a reschedule, and replenishes/rotates a task whose slice has
//! run out. Boost/deboost themselves live on [`crate::scheduler::task::Task`]
//! (`boost`/`deboost`); this module only decides *when* to call them.

use crate::config::{RESCHED_THRESH_NS, SCHED_TIMESLICE_NS};
use crate::scheduler::runqueue::RunQueue;
use crate::scheduler::task::{CoreId, Policy, Task};
use crate::scheduler::Scheduler;

/// What `scheduler_tick` decided for the currently running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
	/// The task's slice dropped to or below [`RESCHED_THRESH_NS`]; the
	/// dispatch loop (C7) should pick a new task on this CPU's next safe
	/// point.
	pub needs_resched: bool,
	/// The slice was fully replenished this tick (it had run out), meaning
	/// the task should rotate to the tail of its bitmap level rather than
	/// simply being reconsidered in place (round-robin fairness).
	pub slice_replenished: bool,
}

/// Charges `task` for the time elapsed since `rq`'s last tick and decides
/// whether a reschedule is due. Idle and stopper tasks are never charged —
/// the caller should skip calling this for them. `Fifo` tasks run until
/// they block or a higher-priority task preempts them: their slice is
/// tracked for accounting only and never forces a reschedule.
pub fn scheduler_tick(task: &mut Task, rq: &mut RunQueue, now_ns: u64) -> TickOutcome {
	let elapsed = now_ns.saturating_sub(rq.last_tick().max(rq.last_switch()));
	task.time_slice = task.time_slice.saturating_sub(elapsed);
	rq.mark_tick();

	if task.policy == Policy::Fifo {
		return TickOutcome { needs_resched: false, slice_replenished: false };
	}

	if task.time_slice > RESCHED_THRESH_NS {
		return TickOutcome { needs_resched: false, slice_replenished: false };
	}

	// Slice exhausted without the task voluntarily giving up the CPU: this
	// is CPU-bound behavior, so the task becomes less interactive.
	task.deboost();
	task.time_slice = SCHED_TIMESLICE_NS;
	TickOutcome { needs_resched: true, slice_replenished: true }
}

/// Called when a task blocks (voluntarily relinquishes the CPU before its
/// slice ran out): rewards it with one interactivity boost step.
/// A no-op for tasks that used their whole slice first, since
/// `scheduler_tick` will have already deboosted them by the time they block.
pub fn on_voluntary_block(task: &mut Task) {
	task.boost();
}

/// Grants a freshly-enqueued or freshly-created task its initial slice.
pub fn grant_initial_slice(task: &mut Task) {
	task.time_slice = SCHED_TIMESLICE_NS;
}

impl Scheduler {
	/// The per-CPU timer tick: advances `cpu`'s clock from
	/// [`crate::hooks::ArchHooks`] and charges whichever task is currently
	/// running there. A no-op if `cpu`'s current task is idle or the
	/// stopper, neither of which is ever charged a slice. Sets this CPU's
	/// need-resched flag rather than dispatching directly — the caller
	/// decides when it's safe to call [`Scheduler::schedule`].
	pub fn scheduler_tick(&self, cpu: CoreId) {
		let mut rq = self.rq(cpu).lock();
		let now = self.hooks().monotonic_clock_ns(cpu);
		let irq = self.hooks().irq_time_ns(cpu);
		let steal = self.hooks().steal_time_ns(cpu);
		rq.update_clock(now, irq.saturating_add(steal));

		let Some(current) = rq.current() else {
			rq.mark_tick();
			return;
		};
		if current.id == rq.idle_task() || current.id == rq.stopper() {
			rq.mark_tick();
			return;
		}
		let Some(task_lock) = self.task(current.id) else {
			rq.mark_tick();
			return;
		};

		let mut task = task_lock.lock();
		let now_ns = rq.clock();
		let outcome = scheduler_tick(&mut task, &mut rq, now_ns);
		if outcome.slice_replenished {
			rq.set_slice_expired(true);
		}
		if outcome.needs_resched {
			rq.set_need_resched(true);
		}
	}

	/// Whether `cpu` has a reschedule pending since the last call to
	/// [`Scheduler::schedule`] cleared it.
	pub fn needs_resched(&self, cpu: CoreId) -> bool {
		self.rq(cpu).lock().need_resched()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bitmap::StaticCpuSet;
	use crate::scheduler::task::{Policy, TaskId};

	fn task() -> Task {
		let mut t = Task::new(TaskId::new(1), Policy::Normal, 0, StaticCpuSet::full(1));
		grant_initial_slice(&mut t);
		t
	}

	#[test]
	fn tick_before_exhaustion_does_not_resched() {
		let mut t = task();
		let mut rq = RunQueue::new(0, TaskId::new(0), TaskId::new(99));
		let outcome = scheduler_tick(&mut t, &mut rq, 1_000_000);
		assert!(!outcome.needs_resched);
		assert_eq!(t.time_slice, SCHED_TIMESLICE_NS - 1_000_000);
	}

	#[test]
	fn tick_exhaustion_deboosts_and_replenishes() {
		let mut t = task();
		let mut rq = RunQueue::new(0, TaskId::new(0), TaskId::new(99));
		let initial_boost = t.boost_prio;
		let outcome = scheduler_tick(&mut t, &mut rq, SCHED_TIMESLICE_NS);
		assert!(outcome.needs_resched);
		assert!(outcome.slice_replenished);
		assert_eq!(t.time_slice, SCHED_TIMESLICE_NS);
		assert!(t.boost_prio >= initial_boost);
	}

	#[test]
	fn voluntary_block_boosts() {
		let mut t = task();
		let before = t.boost_prio;
		on_voluntary_block(&mut t);
		assert!(t.boost_prio <= before);
	}

	/// A clock-only [`crate::hooks::ArchHooks`] whose clock is advanced from
	/// outside the `Scheduler`, for tests that need to control elapsed time
	/// across a [`Scheduler::scheduler_tick`] call.
	struct ClockHooks {
		now: alloc::sync::Arc<core::sync::atomic::AtomicU64>,
	}

	impl crate::hooks::ArchHooks for ClockHooks {
		fn switch(&self, _cpu: CoreId, _prev: TaskId, _next: TaskId) {}
		fn monotonic_clock_ns(&self, _cpu: CoreId) -> u64 {
			self.now.load(core::sync::atomic::Ordering::SeqCst)
		}
		fn send_reschedule_ipi(&self, _cpu: CoreId) {}
		fn stop_one_cpu(&self, _cpu: CoreId, f: &dyn Fn()) {
			f();
		}
	}

	fn scheduler(ncpus: usize) -> Scheduler {
		use crate::hooks::test_hooks::FakeHooks;
		use crate::topology::Topology;
		use alloc::boxed::Box;

		let topo = Topology::flat(ncpus);
		let hooks = Box::new(FakeHooks::new(ncpus));
		let sched = Scheduler::new(topo, hooks);
		for cpu in 0..ncpus as CoreId {
			sched.rq(cpu).lock().set_online(true);
		}
		sched
	}

	#[test]
	fn scheduler_tick_sets_need_resched_on_exhaustion() {
		use crate::scheduler::task::{OnRq, RunState};
		use crate::topology::Topology;
		use alloc::boxed::Box;
		use alloc::sync::Arc;
		use core::sync::atomic::AtomicU64;

		let now = Arc::new(AtomicU64::new(0));
		let hooks = Box::new(ClockHooks { now: now.clone() });
		let sched = Scheduler::new(Topology::flat(1), hooks);
		sched.rq(0).lock().set_online(true);

		let mask = StaticCpuSet::full(1);
		let mut t = Task::new(TaskId::new(1), Policy::Normal, 0, mask);
		t.on_rq = OnRq::Queued;
		t.on_cpu = true;
		t.run_state = RunState::Running;
		grant_initial_slice(&mut t);
		let id = t.id;
		sched.insert_task(id, t);
		sched.rq(0).lock().set_current(Some(crate::scheduler::runqueue::CurrentTask { id, level: 0 }), sched.watermark());

		now.store(SCHED_TIMESLICE_NS, core::sync::atomic::Ordering::SeqCst);

		assert!(!sched.needs_resched(0));
		sched.scheduler_tick(0);
		assert!(sched.needs_resched(0));
	}

	#[test]
	fn scheduler_tick_ignores_idle_and_fifo_never_marks_resched() {
		let sched = scheduler(1);
		// Freshly built runqueues start on the idle task; ticking must be a no-op.
		sched.scheduler_tick(0);
		assert!(!sched.needs_resched(0));

		let mask = StaticCpuSet::full(1);
		let mut t = Task::new(TaskId::new(2), Policy::Fifo, 0, mask);
		t.rt_priority = 10;
		t.normal_prio = crate::scheduler::task::normal_prio(t.policy, t.static_prio, t.rt_priority);
		t.prio = t.normal_prio;
		t.on_cpu = true;
		t.run_state = crate::scheduler::task::RunState::Running;
		grant_initial_slice(&mut t);
		let id = t.id;
		sched.insert_task(id, t);
		sched.rq(0).lock().set_current(Some(crate::scheduler::runqueue::CurrentTask { id, level: 0 }), sched.watermark());

		sched.scheduler_tick(0);
		assert!(!sched.needs_resched(0), "FIFO tasks must never be marked for resched by slice exhaustion");
	}

	#[test]
	fn schedule_clears_need_resched() {
		let sched = scheduler(1);
		sched.rq(0).lock().set_need_resched(true);
		sched.schedule(0).unwrap();
		assert!(!sched.needs_resched(0));
	}
}
