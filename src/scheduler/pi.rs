//! Priority inheritance.
//!
//! Generalizes the host scheduler's futex/parking-lot wait list
//! (`synch/futex.rs`'s `PARKING_LOT`) into an explicit donation contract: a
//! blocked higher-priority waiter can donate its priority to whichever task
//! currently holds the resource it wants, so that holder gets scheduled
//! promptly instead of being starved by unrelated lower-priority work
//! (classic priority-inversion avoidance). The host has no equivalent
//! rt-mutex/PI module of its own to adapt directly, so this is built fresh
//! in its idiom: one task lock at a time, lock order `pi_lock` before
//! `rq.lock`, never both donor and holder locks held simultaneously.
//!
//! Only single-level donation is modeled: a holder that is itself blocked
//! waiting on another resource does not propagate the donated priority
//! further up the chain. Real rt-mutex implementations walk the full
//! chain; that is out of scope here (`pi_top_task` is a single donor slot,
//! not a chain link).

use crate::error::Result;
use crate::scheduler::task::{CoreId, OnRq, TaskId};
use crate::scheduler::Scheduler;

impl Scheduler {
	/// Donates `donor`'s priority to `holder` if doing so would make
	/// `holder` more urgent than it already is. Repositions `holder` in its
	/// runqueue immediately if it is currently waiting there.
	pub fn donate_priority(&self, donor: TaskId, holder: TaskId) -> Result<()> {
		let donor_lock = self.require_task(donor)?;
		let donor_prio = donor_lock.lock().prio;

		let holder_lock = self.require_task(holder)?;
		let (home, old_level, new_level, queued) = {
			let mut task = holder_lock.lock();
			if donor_prio >= task.prio {
				return Ok(());
			}
			let old_level = task.bmq_idx;
			task.pi_top_task = Some(donor);
			task.recompute_effective_prio_with_donor(Some(donor_prio));
			let new_level = task.sched_prio();
			let queued = task.on_rq == OnRq::Queued && old_level.is_some();
			if queued {
				task.bmq_idx = Some(new_level);
			}
			(task.home_cpu, old_level, new_level, queued)
		};

		log::debug!("task {holder} inherits priority from {donor}");
		self.reposition_pi(holder, home, old_level, new_level, queued)
	}

	/// Releases a previously-donated boost, restoring `holder` to its own
	/// `normal_prio` (the PI-unwind path taken when a lock is
	/// released or a donor gives up waiting).
	pub fn clear_donated_priority(&self, holder: TaskId) -> Result<()> {
		let holder_lock = self.require_task(holder)?;
		let (home, old_level, new_level, queued) = {
			let mut task = holder_lock.lock();
			if task.pi_top_task.is_none() {
				return Ok(());
			}
			let old_level = task.bmq_idx;
			task.pi_top_task = None;
			task.recompute_effective_prio_with_donor(None);
			let new_level = task.sched_prio();
			let queued = task.on_rq == OnRq::Queued && old_level.is_some();
			if queued {
				task.bmq_idx = Some(new_level);
			}
			(task.home_cpu, old_level, new_level, queued)
		};

		self.reposition_pi(holder, home, old_level, new_level, queued)
	}

	fn reposition_pi(
		&self,
		id: TaskId,
		home: CoreId,
		old_level: Option<usize>,
		new_level: usize,
		queued: bool,
	) -> Result<()> {
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

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bitmap::StaticCpuSet;
	use crate::hooks::test_hooks::FakeHooks;
	use crate::scheduler::task::{OnRq, Policy, Task};
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
	fn donation_boosts_and_requeues_holder() {
		let sched = scheduler(1);
		let mask = StaticCpuSet::full(1);

		let mut donor = Task::new(TaskId::new(1), Policy::Fifo, 0, mask.clone());
		donor.rt_priority = 80;
		donor.normal_prio = crate::scheduler::task::normal_prio(donor.policy, donor.static_prio, donor.rt_priority);
		donor.prio = donor.normal_prio;
		let donor_id = donor.id;
		sched.insert_task(donor_id, donor);

		let mut holder = Task::new(TaskId::new(2), Policy::Normal, 0, mask);
		holder.on_rq = OnRq::Queued;
		let level = holder.sched_prio();
		holder.bmq_idx = Some(level);
		let handle = holder.handle();
		let holder_id = holder.id;
		let original_prio = holder.prio;
		sched.insert_task(holder_id, holder);
		sched.rq(0).lock().enqueue(level, handle, sched.watermark(), false);

		sched.donate_priority(donor_id, holder_id).unwrap();
		let boosted = sched.task(holder_id).unwrap().lock().prio;
		assert!(boosted < original_prio, "donation should have made the holder more urgent");
		assert_eq!(sched.task(holder_id).unwrap().lock().pi_top_task, Some(donor_id));
		assert_eq!(sched.task(holder_id).unwrap().lock().sched_prio(), 0, "holder should now sit in the RT level");

		sched.clear_donated_priority(holder_id).unwrap();
		assert_eq!(sched.task(holder_id).unwrap().lock().pi_top_task, None);
	}
}
