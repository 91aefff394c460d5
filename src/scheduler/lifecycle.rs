//! CPU hotplug lifecycle and fallback placement (C10).
//!
//! Five states, matching the host's own CPU hotplug states one-for-one:
//! a CPU starts `Possible` (counted in the topology but
//! never run), becomes `Starting` while its idle task is being spun up,
//! `Active` once it accepts work, `Inactive` once drained for hotplug
//! removal, and finally `Dying`/`Dead`. `RunQueue::is_online` is a
//! convenience derived from this state (`true` only while `Active`) kept
//! alongside it rather than replacing it, since every other module already
//! reads it directly.

use crate::bitmap::StaticCpuSet;
use crate::config::MAX_RT_PRIO;
use crate::error::{Result, SchedError};
use crate::scheduler::runqueue::CurrentTask;
use crate::scheduler::task::{normal_prio, CoreId, Nice, OnRq, Policy, RunState, Task, TaskId};
use crate::scheduler::tick::grant_initial_slice;
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
	Possible,
	Starting,
	Active,
	Inactive,
	Dying,
	Dead,
}

impl Scheduler {
	pub fn cpu_state(&self, cpu: CoreId) -> CpuState {
		*self.cpu_states[cpu as usize].lock()
	}

	/// Creates a new task and places it on the runqueue `select_task_rq`
	/// picks among `cpus_mask`, ready to run. Stop
	/// policy is reserved for the per-CPU stopper created in
	/// [`Scheduler::new`] and cannot be spawned directly.
	pub fn spawn(&self, policy: Policy, nice: Nice, rt_priority: i32, cpus_mask: StaticCpuSet, preferred_cpu: CoreId) -> Result<TaskId> {
		if matches!(policy, Policy::Stop) {
			return Err(SchedError::InvalidPolicy(policy));
		}
		if policy.is_realtime() {
			if !(0..MAX_RT_PRIO).contains(&rt_priority) {
				return Err(crate::error::SchedError::InvalidPriority(crate::scheduler::task::Priority::new(rt_priority)));
			}
		} else if rt_priority != 0 {
			return Err(crate::error::SchedError::InvalidPriority(crate::scheduler::task::Priority::new(rt_priority)));
		}
		if cpus_mask.is_empty() {
			return Err(SchedError::EmptyAffinityMask);
		}

		let id = self.alloc_task_id();
		let mut task = Task::new(id, policy, preferred_cpu, cpus_mask);
		task.rt_priority = rt_priority;
		if !policy.is_realtime() {
			task.set_nice(nice);
		}
		task.normal_prio = normal_prio(policy, task.static_prio, task.rt_priority);
		task.prio = task.normal_prio;
		task.run_state = RunState::Runnable;
		task.on_rq = OnRq::Queued;
		grant_initial_slice(&mut task);

		let target = self.select_fallback_rq(&task);
		task.home_cpu = target;
		let level = task.sched_prio();
		task.bmq_idx = Some(level);
		let handle = task.handle();

		self.insert_task(id, task);
		self.rq(target).lock().enqueue(level, handle, self.watermark(), false);
		log::info!("spawned task {id} with policy {policy:?} on cpu {target}");
		Ok(id)
	}

	/// Removes a task from the scheduler entirely. A task
	/// that is currently running must have already been taken off CPU
	/// (e.g. via [`Scheduler::block_current`] or the dispatch loop) before
	/// this is called.
	pub fn exit(&self, id: TaskId) -> Result<()> {
		let task_lock = self.task(id).ok_or(SchedError::TaskNotFound(id))?;
		let (home, level, queued) = {
			let mut task = task_lock.lock();
			task.run_state = RunState::Finished;
			(task.home_cpu, task.bmq_idx, task.on_rq == OnRq::Queued)
		};
		if queued {
			if let Some(level) = level {
				self.rq(home).lock().dequeue(level, id, self.watermark());
			}
		}
		self.remove_task(id);
		log::info!("finished task {id}");
		Ok(())
	}

	/// Brings `cpu` online: `Possible`/`Starting` -> `Active`. Idempotent.
	pub fn activate_cpu(&self, cpu: CoreId) -> Result<()> {
		let mut state = self.cpu_states[cpu as usize].lock();
		match *state {
			CpuState::Active => return Ok(()),
			CpuState::Possible | CpuState::Starting | CpuState::Inactive => {}
			CpuState::Dying | CpuState::Dead => return Err(SchedError::PermissionDenied),
		}
		*state = CpuState::Active;
		drop(state);
		self.rq(cpu).lock().set_online(true);
		log::info!("cpu {cpu} active");
		Ok(())
	}

	/// Takes `cpu` offline for hotplug removal: marks it `Inactive`, stops
	/// accepting new placements, and migrates every task presently on it
	/// elsewhere. The CPU's idle and stopper tasks stay put; only
	/// user tasks are moved.
	pub fn deactivate_cpu(&self, cpu: CoreId) -> Result<()> {
		{
			let mut state = self.cpu_states[cpu as usize].lock();
			if *state != CpuState::Active {
				return Err(SchedError::PermissionDenied);
			}
			*state = CpuState::Inactive;
		}
		self.rq(cpu).lock().set_online(false);
		self.drain_waiting_tasks(cpu);
		self.evict_current_task(cpu);
		log::info!("cpu {cpu} drained for hotplug removal");
		Ok(())
	}

	/// Marks a previously-deactivated CPU `Dying` then `Dead`, the terminal
	/// states in full hotplug removal. Only valid from `Inactive`.
	pub fn retire_cpu(&self, cpu: CoreId) -> Result<()> {
		let mut state = self.cpu_states[cpu as usize].lock();
		if *state != CpuState::Inactive {
			return Err(SchedError::PermissionDenied);
		}
		*state = CpuState::Dying;
		*state = CpuState::Dead;
		Ok(())
	}

	/// Broadens a task's affinity to every online CPU when its own
	/// `cpus_mask` no longer intersects any (e.g. every CPU it was allowed
	/// on just went through [`Scheduler::deactivate_cpu`]), following the
	/// `select_fallback_rq`. Does not mutate the task; callers apply the
	/// result via [`crate::scheduler::Scheduler::set_cpus_allowed`] or
	/// direct placement.
	pub fn select_fallback_rq(&self, task: &Task) -> CoreId {
		let online = self.online_mask();
		let allowed = task.cpus_mask.intersection(&online);
		if let Some(cpu) = allowed.pick(Some(task.home_cpu)) {
			return cpu;
		}
		online.pick(None).unwrap_or(task.home_cpu)
	}

	fn drain_waiting_tasks(&self, cpu: CoreId) {
		loop {
			let popped = self.rq(cpu).lock().pop_next();
			let Some((_, handle)) = popped else { break };
			let Some(task_lock) = self.task(handle.id()) else { continue };
			let (target, level) = {
				let mut task = task_lock.lock();
				let target = self.select_fallback_rq(&task);
				task.home_cpu = target;
				let level = task.sched_prio();
				task.bmq_idx = Some(level);
				(target, level)
			};
			self.rq(target).lock().enqueue(level, handle, self.watermark(), false);
		}
	}

	/// Forces the task actually running on `cpu`, if any, off via the
	/// stopper hook, then re-dispatches it onto another CPU (the
	/// `stop_one_cpu` path reused for hotplug drain).
	fn evict_current_task(&self, cpu: CoreId) {
		let current = self.rq(cpu).lock().current();
		let Some(CurrentTask { id, .. }) = current else { return };
		if id == self.rq(cpu).lock().idle_task() || id == self.rq(cpu).lock().stopper() {
			return;
		}
		let Some(task_lock) = self.task(id) else { return };

		self.hooks().stop_one_cpu(cpu, &|| {});

		let (target, level) = {
			let mut task = task_lock.lock();
			task.on_cpu = false;
			task.on_rq = OnRq::Queued;
			let target = self.select_fallback_rq(&task);
			task.home_cpu = target;
			let level = task.sched_prio();
			task.bmq_idx = Some(level);
			(target, level)
		};
		let handle = task_lock.lock().handle();
		self.rq(target).lock().enqueue(level, handle, self.watermark(), false);
		self.rq(cpu).lock().set_current(None, self.watermark());
	}
}
