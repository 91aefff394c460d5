//! End-to-end coverage of the seed scenarios against the public `Scheduler`
//! API only: idle-sibling wakeup, RT preemption, nice-change without
//! preemption, affinity-change migration, pull-when-idle, and hotplug drain.
//!
//! `src/hooks.rs`'s `FakeHooks` is crate-private test scaffolding, so this
//! binary defines its own minimal `ArchHooks` the same way: clocks are
//! explicit atomics, context switches and IPIs are no-ops.

use std::sync::atomic::{AtomicU64, Ordering};

use bmq_scheduler::bitmap::StaticCpuSet;
use bmq_scheduler::hooks::ArchHooks;
use bmq_scheduler::scheduler::lifecycle::CpuState;
use bmq_scheduler::scheduler::watermark::IDLE_WATERMARK;
use bmq_scheduler::topology::Topology;
use bmq_scheduler::{Caller, CoreId, Nice, Policy, Scheduler, TaskId};

struct TestHooks {
	clocks: Vec<AtomicU64>,
}

impl TestHooks {
	fn new(ncpus: usize) -> Self {
		Self { clocks: (0..ncpus).map(|_| AtomicU64::new(0)).collect() }
	}
}

impl ArchHooks for TestHooks {
	fn switch(&self, _cpu: CoreId, _prev: TaskId, _next: TaskId) {}

	fn monotonic_clock_ns(&self, cpu: CoreId) -> u64 {
		self.clocks[cpu as usize].load(Ordering::SeqCst)
	}

	fn send_reschedule_ipi(&self, _cpu: CoreId) {}

	fn stop_one_cpu(&self, _cpu: CoreId, f: &dyn Fn()) {
		f();
	}
}

fn scheduler(ncpus: usize) -> Scheduler {
	let topo = Topology::flat(ncpus);
	let hooks = Box::new(TestHooks::new(ncpus));
	let sched = Scheduler::new(topo, hooks);
	for cpu in 0..ncpus as CoreId {
		sched.activate_cpu(cpu).unwrap();
	}
	sched
}

#[test]
fn idle_sibling_wakeup_prefers_the_idle_cpu() {
	let sched = scheduler(2);
	let mask = StaticCpuSet::full(2);

	let sleeper = sched.spawn(Policy::Normal, Nice::new(0).unwrap(), 0, mask.clone(), 0).unwrap();
	sched.schedule(0).unwrap();
	sched.block_current(0, false).unwrap();
	assert_eq!(sched.watermark().level_of(0), IDLE_WATERMARK);

	let _busy = sched.spawn(Policy::Fifo, Nice::new(0).unwrap(), 10, mask, 0).unwrap();
	sched.schedule(0).unwrap();
	assert_eq!(sched.watermark().level_of(0), 0, "the RT task must now occupy cpu0's head");
	assert_eq!(sched.watermark().level_of(1), IDLE_WATERMARK, "cpu1 has never run anything yet");

	let woke = sched.try_to_wake_up(sleeper).unwrap();
	assert!(woke);
	assert_ne!(sched.watermark().level_of(1), IDLE_WATERMARK, "the woken task must land on the idle sibling, not the RT-busy cpu0");
	assert_eq!(sched.runqueue_stats()[1].nr_running, 1);
}

#[test]
fn rt_task_preempts_a_running_normal_task() {
	let sched = scheduler(1);
	let mask = StaticCpuSet::full(1);

	let normal = sched.spawn(Policy::Normal, Nice::new(0).unwrap(), 0, mask.clone(), 0).unwrap();
	sched.schedule(0).unwrap();
	let normal_level = sched.watermark().level_of(0);
	assert_ne!(normal_level, 0, "a Normal task never occupies the RT level");

	let rt = sched.spawn(Policy::Fifo, Nice::new(0).unwrap(), 20, mask, 0).unwrap();
	sched.schedule(0).unwrap();
	assert_eq!(sched.watermark().level_of(0), 0, "the RT arrival must preempt the running Normal task");
	assert!(!sched.needs_resched(0), "schedule must clear the pending reschedule once it has acted");

	sched.exit(rt).unwrap();
	sched.schedule(0).unwrap();
	assert_eq!(sched.watermark().level_of(0), normal_level, "the preempted task must resume once the RT task is gone");

	let _ = normal;
}

#[test]
fn nice_change_on_the_running_task_does_not_force_a_preemption() {
	let sched = scheduler(1);
	let mask = StaticCpuSet::full(1);

	let id = sched.spawn(Policy::Normal, Nice::new(0).unwrap(), 0, mask, 0).unwrap();
	sched.schedule(0).unwrap();
	let level_before = sched.watermark().level_of(0);

	sched.set_user_nice(id, Nice::new(10).unwrap(), Caller::Privileged).unwrap();

	assert_eq!(sched.watermark().level_of(0), level_before, "a running task isn't queued, so a nice change can't reposition it mid-flight");
	assert!(!sched.needs_resched(0), "a nice change on the current task must not itself request a reschedule");
}

#[test]
fn affinity_change_migrates_a_running_task() {
	let sched = scheduler(2);
	let mask = StaticCpuSet::full(2);

	let id = sched.spawn(Policy::Normal, Nice::new(0).unwrap(), 0, mask, 0).unwrap();
	sched.schedule(0).unwrap();
	assert_ne!(sched.watermark().level_of(0), IDLE_WATERMARK);

	sched.set_cpus_allowed(id, StaticCpuSet::single(1, 2)).unwrap();

	assert_eq!(sched.watermark().level_of(0), IDLE_WATERMARK, "cpu0 must go idle once its only task is forced off");
	assert_eq!(sched.runqueue_stats()[1].nr_running, 1, "the migrated task must now be waiting on cpu1");
}

#[test]
fn pull_when_idle_steals_from_a_busy_sibling() {
	let sched = scheduler(2);
	let mask = StaticCpuSet::full(2);

	let _t1 = sched.spawn(Policy::Normal, Nice::new(0).unwrap(), 0, mask.clone(), 0).unwrap();
	let _t2 = sched.spawn(Policy::Normal, Nice::new(0).unwrap(), 0, mask, 0).unwrap();
	assert_eq!(sched.runqueue_stats()[0].nr_running, 2, "both tasks land on their shared preferred cpu0");

	sched.schedule(0).unwrap();
	assert_eq!(sched.watermark().level_of(1), IDLE_WATERMARK, "cpu1 has nothing of its own yet");

	sched.schedule(1).unwrap();
	assert_ne!(sched.watermark().level_of(1), IDLE_WATERMARK, "an idle cpu must pull waiting work from a busy one rather than dispatch its idle task");
}

#[test]
fn hotplug_deactivate_drains_both_the_current_and_waiting_tasks() {
	let sched = scheduler(2);
	let mask = StaticCpuSet::full(2);

	let _t1 = sched.spawn(Policy::Normal, Nice::new(0).unwrap(), 0, mask.clone(), 0).unwrap();
	let _t2 = sched.spawn(Policy::Normal, Nice::new(0).unwrap(), 0, mask, 0).unwrap();
	sched.schedule(0).unwrap();
	assert_eq!(sched.cpu_state(0), CpuState::Active);

	sched.deactivate_cpu(0).unwrap();
	assert_eq!(sched.cpu_state(0), CpuState::Inactive);
	assert_eq!(sched.watermark().level_of(0), IDLE_WATERMARK, "both the current and waiting task must have been drained off cpu0");
	assert_ne!(sched.watermark().level_of(1), IDLE_WATERMARK, "the drained work must have landed on the only other online cpu");

	sched.retire_cpu(0).unwrap();
	assert_eq!(sched.cpu_state(0), CpuState::Dead);
}
