//! The top-level scheduler: task registry, per-CPU runqueues, and the
//! shared watermark map, wired together behind the lock discipline laid
//! out below (`pi_lock` before `rq.lock`, `rq.lock`s acquired in ascending
//! `CoreId` order, remote `rq.lock`s only ever try-locked).
//!
//! Generalizes the host scheduler's single `PerCoreScheduler`-per-core
//! design (`scheduler/mod.rs`) into an explicit multi-core struct: where
//! the host reaches into core-local storage for "the current core's
//! scheduler", every entry point here takes an explicit [`task::CoreId`].

pub mod dispatch;
pub mod lifecycle;
pub mod pi;
pub mod policy;
pub mod queue;
pub mod runqueue;
pub mod task;
pub mod tick;
pub mod wakeup;
pub mod watermark;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use hashbrown::HashMap;
use hermit_sync::{InterruptTicketMutex, SpinMutex};

use crate::error::{Result, SchedError};
use crate::hooks::ArchHooks;
use crate::topology::Topology;
use lifecycle::CpuState;
use runqueue::RunQueue;
use task::{CoreId, Task, TaskId};
use watermark::WatermarkMap;

/// A task's state behind its own lock: this **is** the per-task `pi_lock`.
pub type TaskLock = SpinMutex<Task>;

/// The scheduler-wide task registry (the "task table"), keyed by
/// [`TaskId`]. Entries are only ever removed on task exit; while a task
/// exists its `Arc<TaskLock>` may be held by callers across a `rq.lock`.
type TaskTable = HashMap<TaskId, Arc<TaskLock>, ahash::RandomState>;

/// The complete scheduler: one [`RunQueue`] per CPU, the task registry, the
/// shared watermark map, the CPU topology, and the embedder's
/// [`ArchHooks`].
pub struct Scheduler {
	hooks: Box<dyn ArchHooks>,
	topology: Topology,
	watermark: WatermarkMap,
	runqueues: Vec<InterruptTicketMutex<RunQueue>>,
	/// Hotplug state per CPU, independent of `RunQueue::is_online`
	/// so a CPU mid-`Starting`/`Dying` transition can be told apart from
	/// one that is simply offline.
	cpu_states: Vec<SpinMutex<CpuState>>,
	tasks: InterruptTicketMutex<TaskTable>,
	next_task_id: AtomicU64,
	/// Process-global yield-mode configuration (§4.9): every `sched_yield`
	/// caller observes the same policy, so this lives on the scheduler
	/// rather than per-call.
	yield_mode: AtomicU8,
}

impl Scheduler {
	/// Builds a scheduler over `topology.ncpus()` CPUs, none of which are
	/// online yet (the lifecycle starts at `POSSIBLE`). Each CPU is given
	/// an idle task and a stopper task up front so `RunQueue::current`/
	/// `RunQueue::stopper` are always valid.
	pub fn new(topology: Topology, hooks: Box<dyn ArchHooks>) -> Self {
		let ncpus = topology.ncpus();
		let watermark = WatermarkMap::new(ncpus);
		let tasks: TaskTable = HashMap::default();
		let tasks = InterruptTicketMutex::new(tasks);
		let next_task_id = AtomicU64::new(0);

		let mut runqueues = Vec::with_capacity(ncpus);
		let cpu_states = (0..ncpus).map(|_| SpinMutex::new(CpuState::Possible)).collect();
		let yield_mode = AtomicU8::new(0);
		let this = Self { hooks, topology, watermark, runqueues: Vec::new(), cpu_states, tasks, next_task_id, yield_mode };

		for cpu in 0..ncpus as CoreId {
			let idle_id = this.alloc_task_id();
			let stopper_id = this.alloc_task_id();
			let full_mask = crate::bitmap::StaticCpuSet::single(cpu, ncpus);
			let idle = Task::idle(idle_id, cpu, full_mask.clone());
			let mut stopper = Task::new(stopper_id, task::Policy::Stop, cpu, full_mask);
			stopper.rt_priority = 99;
			stopper.normal_prio = task::normal_prio(stopper.policy, stopper.static_prio, stopper.rt_priority);
			stopper.prio = stopper.normal_prio;

			this.tasks.lock().insert(idle_id, Arc::new(SpinMutex::new(idle)));
			this.tasks.lock().insert(stopper_id, Arc::new(SpinMutex::new(stopper)));
			runqueues.push(InterruptTicketMutex::new(RunQueue::new(cpu, idle_id, stopper_id)));
		}

		Self { runqueues, ..this }
	}

	pub fn ncpus(&self) -> usize {
		self.topology.ncpus()
	}

	pub fn topology(&self) -> &Topology {
		&self.topology
	}

	pub fn watermark(&self) -> &WatermarkMap {
		&self.watermark
	}

	pub(crate) fn hooks(&self) -> &dyn ArchHooks {
		&*self.hooks
	}

	pub(crate) fn rq(&self, cpu: CoreId) -> &InterruptTicketMutex<RunQueue> {
		&self.runqueues[cpu as usize]
	}

	fn alloc_task_id(&self) -> TaskId {
		TaskId::new(self.next_task_id.fetch_add(1, Ordering::Relaxed))
	}

	pub(crate) fn task(&self, id: TaskId) -> Option<Arc<TaskLock>> {
		self.tasks.lock().get(&id).cloned()
	}

	pub(crate) fn insert_task(&self, id: TaskId, task: Task) -> Arc<TaskLock> {
		let handle = Arc::new(SpinMutex::new(task));
		self.tasks.lock().insert(id, handle.clone());
		handle
	}

	pub(crate) fn remove_task(&self, id: TaskId) -> Option<Arc<TaskLock>> {
		self.tasks.lock().remove(&id)
	}

	fn require_task(&self, id: TaskId) -> Result<Arc<TaskLock>> {
		self.task(id).ok_or(SchedError::TaskNotFound(id))
	}

	/// A snapshot of every runqueue's counters, in CPU order.
	pub fn runqueue_stats(&self) -> Vec<runqueue::RunqueueStats> {
		self.runqueues.iter().map(|rq| rq.lock().stats()).collect()
	}
}
