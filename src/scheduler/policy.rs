//! Policy, nice, and CPU-affinity mutation contracts (C9).
//!
//! Every entry point here validates its input against the policy/permission rules before
//! touching scheduling state, and re-positions the task in its runqueue's
//! bitmap queue if it is currently waiting there and its level changed.

use core::sync::atomic::Ordering;

use crate::bitmap::StaticCpuSet;
use crate::config::{MAX_ADJ, MAX_RT_PRIO};
use crate::error::{Result, SchedError};
use crate::scheduler::task::{normal_prio, CoreId, Nice, OnRq, Policy, Priority, RunState, TaskId};
use crate::scheduler::Scheduler;

/// The process-global yield behavior (§4.9), set once by the embedder and
/// observed by every `sched_yield` call thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldMode {
	/// `sched_yield` has no scheduling effect.
	NoOp,
	/// Deprioritize the current task (push `boost_prio` to its least
	/// favorable value) and requeue it.
	Deprioritize,
	/// Skip the current task for exactly the next dispatch decision,
	/// without touching its priority.
	SkipOnce,
}

impl YieldMode {
	fn from_u8(raw: u8) -> Self {
		match raw {
			1 => YieldMode::Deprioritize,
			2 => YieldMode::SkipOnce,
			_ => YieldMode::NoOp,
		}
	}
}

/// Whether a caller to the policy/affinity contract surface (§6) is
/// privileged. An unprivileged caller may only move a task's RT priority
/// downward (never raise it or switch a non-RT task into an RT policy) and
/// may only raise its own nice value (make itself less favorable), mirroring
/// the syscall contract's `nice`/`set_scheduler` PERM cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
	Privileged,
	Unprivileged,
}

impl Scheduler {
	/// Sets a task's nice value (`Normal`/`Batch` policies only). An
	/// unprivileged caller may only raise the nice value (yield priority),
	/// never lower it.
	pub fn set_user_nice(&self, id: TaskId, nice: Nice, caller: Caller) -> Result<()> {
		let task_lock = self.require_task(id)?;
		{
			let task = task_lock.lock();
			if matches!(task.policy, Policy::Fifo | Policy::RoundRobin | Policy::Stop) {
				return Err(SchedError::PermissionDenied);
			}
			if caller == Caller::Unprivileged && nice.get() < task.nice().get() {
				return Err(SchedError::PermissionDenied);
			}
		}
		self.reposition(id, |task| task.set_nice(nice))
	}

	/// Changes a task's scheduling policy and, for realtime policies, its
	/// `rt_priority`. The stopper class is not user-settable. An
	/// unprivileged caller may only decrease an existing RT priority; it
	/// may neither raise one nor promote a non-RT task into an RT policy.
	pub fn set_scheduler(&self, id: TaskId, policy: Policy, rt_priority: i32, caller: Caller) -> Result<()> {
		if matches!(policy, Policy::Stop) {
			return Err(SchedError::InvalidPolicy(policy));
		}
		if policy.is_realtime() {
			if !(0..MAX_RT_PRIO).contains(&rt_priority) {
				return Err(SchedError::InvalidPriority(Priority::new(rt_priority)));
			}
		} else if rt_priority != 0 {
			return Err(SchedError::InvalidPriority(Priority::new(rt_priority)));
		}

		if caller == Caller::Unprivileged {
			let task_lock = self.require_task(id)?;
			let current = task_lock.lock();
			if policy.is_realtime() && (!current.policy.is_realtime() || rt_priority > current.rt_priority) {
				return Err(SchedError::PermissionDenied);
			}
		}

		self.reposition(id, |task| {
			task.policy = policy;
			task.rt_priority = rt_priority;
			task.normal_prio = normal_prio(policy, task.static_prio, rt_priority);
			task.boost_prio = 0;
			task.recompute_effective_prio_with_donor(None);
		})
	}

	/// Restricts a task to run only on CPUs in `mask`. If the task's
	/// current home CPU is no longer allowed: a task waiting in a runqueue
	/// is moved directly; a task actually running there is forced off via
	/// the stopper and moved, passing through the transient `Migrating`
	/// state (the one `on_rq` carve-out P6 allows) for the window between
	/// leaving its old runqueue and landing on its new one.
	pub fn set_cpus_allowed(&self, id: TaskId, mask: StaticCpuSet) -> Result<()> {
		if mask.is_empty() {
			return Err(SchedError::EmptyAffinityMask);
		}
		let online = self.online_mask();
		if mask.intersection(&online).is_empty() {
			return Err(SchedError::EmptyAffinityMask);
		}

		let task_lock = self.require_task(id)?;
		let (old_home, bmq_idx, on_cpu, still_allowed) = {
			let mut task = task_lock.lock();
			task.cpus_mask = mask.clone();
			task.nr_cpus_allowed = mask.iter().count();
			(task.home_cpu, task.bmq_idx, task.on_cpu, mask.contains(task.home_cpu))
		};
		if still_allowed {
			return Ok(());
		}

		if on_cpu {
			self.migrate_running_task(id, old_home, &mask, &online);
			return Ok(());
		}

		let Some(level) = bmq_idx else {
			// Not currently sitting in a runqueue (blocked): nothing to
			// move right now, it will land on an allowed CPU on wakeup.
			return Ok(());
		};

		let mut old_rq = self.rq(old_home).lock();
		let Some(handle) = old_rq.dequeue(level, id, self.watermark()) else {
			return Ok(());
		};
		drop(old_rq);

		let new_home = mask.intersection(&online).iter().next().expect("checked non-empty above");
		{
			let mut task = task_lock.lock();
			task.home_cpu = new_home;
		}
		self.rq(new_home).lock().enqueue(level, handle, self.watermark(), false);
		Ok(())
	}

	/// Forces `id`, currently running on `cpu`, off via the stopper and
	/// re-dispatches it onto an allowed CPU.
	fn migrate_running_task(&self, id: TaskId, cpu: CoreId, mask: &StaticCpuSet, online: &StaticCpuSet) {
		let Some(task_lock) = self.task(id) else { return };
		task_lock.lock().on_rq = OnRq::Migrating;

		self.hooks().stop_one_cpu(cpu, &|| {});

		let (target, level) = {
			let mut task = task_lock.lock();
			task.on_cpu = false;
			task.run_state = RunState::Runnable;
			let target = mask.intersection(online).pick(Some(task.home_cpu)).unwrap_or(task.home_cpu);
			task.home_cpu = target;
			let level = task.sched_prio();
			task.bmq_idx = Some(level);
			task.on_rq = OnRq::Queued;
			(target, level)
		};
		let handle = task_lock.lock().handle();
		self.rq(target).lock().enqueue(level, handle, self.watermark(), false);
		let mut old_rq = self.rq(cpu).lock();
		if old_rq.current().is_some_and(|c| c.id == id) {
			old_rq.set_current(None, self.watermark());
		}
		drop(old_rq);
		log::debug!("task {id} forced off cpu {cpu} by affinity change, migrated to cpu {target}");
	}

	/// Sets the process-global yield mode observed by every subsequent
	/// `sched_yield` call.
	pub fn set_yield_mode(&self, mode: YieldMode) {
		self.yield_mode.store(mode as u8, Ordering::Relaxed);
	}

	pub fn yield_mode(&self) -> YieldMode {
		YieldMode::from_u8(self.yield_mode.load(Ordering::Relaxed))
	}

	/// The `sched_yield` syscall contract (§4.9/§6): voluntarily gives up
	/// `cpu` according to the configured [`YieldMode`], then runs one
	/// dispatch decision so the effect is observed immediately. Always
	/// returns `Ok(())`, matching the contract's "returns 0".
	pub fn sched_yield(&self, cpu: CoreId) -> Result<()> {
		match self.yield_mode() {
			YieldMode::NoOp => {}
			YieldMode::Deprioritize => {
				let current = self.rq(cpu).lock().current();
				if let Some(current) = current {
					if let Some(task_lock) = self.task(current.id) {
						let mut task = task_lock.lock();
						// Conservative resolution of the yield/PI open question
						// (§9): a task donating its priority never self-deboosts.
						if task.pi_top_task.is_none() {
							task.boost_prio = MAX_ADJ;
						}
					}
				}
			}
			YieldMode::SkipOnce => {
				let mut rq = self.rq(cpu).lock();
				if let Some(current) = rq.current() {
					rq.set_skip_marker(Some(current.id));
				}
			}
		}
		self.schedule(cpu)
	}

	/// Runs `mutate` on `id`'s task, then re-derives its dispatch level and,
	/// if it is currently queued, moves it to the right bitmap level on its
	/// own runqueue.
	fn reposition(&self, id: TaskId, mutate: impl FnOnce(&mut crate::scheduler::task::Task)) -> Result<()> {
		let task_lock = self.require_task(id)?;
		let (home, old_level, new_level, queued) = {
			let mut task = task_lock.lock();
			let old_level = task.bmq_idx;
			mutate(&mut task);
			let new_level = task.sched_prio();
			let queued = task.on_rq == OnRq::Queued && old_level.is_some();
			if queued {
				task.bmq_idx = Some(new_level);
			}
			(task.home_cpu, old_level, new_level, queued)
		};

		if !queued {
			return Ok(());
		}
		let old_level = old_level.expect("queued implies a cached level");
		if old_level == new_level {
			return Ok(());
		}

		let mut rq = self.rq(home).lock();
		if let Some(handle) = rq.dequeue(old_level, id, self.watermark()) {
			rq.enqueue(new_level, handle, self.watermark(), false);
			let more_urgent_than_current = rq.current().is_some_and(|c| new_level < c.level);
			if more_urgent_than_current {
				rq.set_need_resched(true);
			}
		}
		Ok(())
	}
}
