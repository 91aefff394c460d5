//! The global watermark map (C3).
//!
//! Each runqueue publishes the priority level of the task at its own head
//! (or "idle" if it has none) into this shared structure. Wakeup CPU
//! selection and SMT sibling balancing use it to find a CPU
//! whose current occupant is no more urgent than the task being placed,
//! without taking that CPU's runqueue lock first — candidates found this
//! way are provisional and must be re-validated under the target
//! runqueue's lock before anything is actually moved.
//!
//! This generalizes the host scheduler's per-core `is_idle`/priority
//! bookkeeping (`scheduler/mod.rs`'s `PerCoreScheduler` priority caching)
//! into an explicit, `CoreId`-indexed shared map, since this crate has no
//! per-core thread-local storage to piggyback on.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::bitmap::{CpuSet, StaticCpuSet};
use crate::config::NO_PRIORITIES;
use crate::scheduler::task::CoreId;

/// Sentinel watermark level meaning "this CPU's runqueue has no runnable
/// task" (strictly less urgent than every real bitmap level).
pub const IDLE_WATERMARK: usize = NO_PRIORITIES;

/// Shared, lock-free-readable summary of each CPU's current occupancy
/// level. Writers publish under their own runqueue lock; readers may race
/// and must re-validate under the target's runqueue lock before acting.
#[derive(Debug)]
pub struct WatermarkMap {
	ncpus: usize,
	/// `levels[cpu]`: the `sched_prio` of the task currently at the head of
	/// `cpu`'s runqueue, or [`IDLE_WATERMARK`].
	levels: Vec<AtomicUsize>,
	/// `cpus_at_least[level]`: the set of CPUs whose current watermark is
	/// `>= level`, i.e. CPUs onto which a task at `level` could be placed
	/// without being less urgent than what's already running there.
	cpus_at_least: Vec<CpuSet>,
	/// CPUs whose runqueue is entirely empty, kept separately so SMT
	/// sibling balancing (watermark slot 0) doesn't need to compare against
	/// `IDLE_WATERMARK` through the generic level machinery.
	fully_idle: CpuSet,
}

impl WatermarkMap {
	pub fn new(ncpus: usize) -> Self {
		let levels = (0..ncpus).map(|_| AtomicUsize::new(IDLE_WATERMARK)).collect();
		let mut cpus_at_least = Vec::with_capacity(NO_PRIORITIES + 1);
		for _ in 0..=NO_PRIORITIES {
			let set = CpuSet::new(ncpus);
			for cpu in 0..ncpus as u32 {
				set.insert(cpu, Ordering::Relaxed);
			}
			cpus_at_least.push(set);
		}
		let fully_idle = CpuSet::new(ncpus);
		for cpu in 0..ncpus as u32 {
			fully_idle.insert(cpu, Ordering::Relaxed);
		}
		Self { ncpus, levels, cpus_at_least, fully_idle }
	}

	pub fn ncpus(&self) -> usize {
		self.ncpus
	}

	/// Publishes `cpu`'s new head-of-queue level (or [`IDLE_WATERMARK`]).
	/// Called by the owning runqueue immediately after any change to its
	/// own head (enqueue/dequeue/context switch), under that runqueue's
	/// lock.
	pub fn publish(&self, cpu: CoreId, new_level: usize) {
		let idx = cpu as usize;
		let new_level = new_level.min(IDLE_WATERMARK);
		let old_level = self.levels[idx].swap(new_level, Ordering::SeqCst);
		if new_level == old_level {
			return;
		}
		if new_level < old_level {
			for level in (new_level + 1)..=old_level {
				self.cpus_at_least[level].remove(cpu, Ordering::SeqCst);
			}
		} else {
			for level in (old_level + 1)..=new_level {
				self.cpus_at_least[level].insert(cpu, Ordering::SeqCst);
			}
		}

		if new_level == IDLE_WATERMARK {
			self.fully_idle.insert(cpu, Ordering::SeqCst);
		} else if old_level == IDLE_WATERMARK {
			self.fully_idle.remove(cpu, Ordering::SeqCst);
		}
	}

	pub fn level_of(&self, cpu: CoreId) -> usize {
		self.levels[cpu as usize].load(Ordering::SeqCst)
	}

	/// A point-in-time view of which CPUs currently satisfy `watermark >=
	/// level`, restricted to nothing in particular — callers intersect this
	/// with an affinity mask or topology ring themselves.
	pub fn candidates_at_least(&self, level: usize) -> StaticCpuSet {
		self.cpus_at_least[level.min(IDLE_WATERMARK)].snapshot(Ordering::SeqCst)
	}

	/// Watermark slot 0: CPUs with an entirely empty runqueue. Meaningful as
	/// an SMT-sibling-idle check only on topologies that actually have SMT
	/// groups larger than one;
	/// callers are expected to gate on [`crate::topology::Topology::has_smt`]
	/// themselves before relying on it for that purpose.
	pub fn fully_idle(&self) -> StaticCpuSet {
		self.fully_idle.snapshot(Ordering::SeqCst)
	}

	/// Finds the best placement for a task at `level` among `candidates`,
	/// preferring `hint` (typically the task's previous CPU) when it
	/// already qualifies, else the lowest-numbered qualifying CPU.
	/// Provisional: the caller must still acquire the chosen runqueue's
	/// lock and re-check before enqueuing onto it.
	pub fn select(&self, level: usize, candidates: &StaticCpuSet, hint: Option<CoreId>) -> Option<CoreId> {
		let qualifying = self.candidates_at_least(level);
		qualifying.intersection(candidates).pick(hint)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fresh_map_has_everyone_idle() {
		let wm = WatermarkMap::new(4);
		for cpu in 0..4 {
			assert_eq!(wm.level_of(cpu), IDLE_WATERMARK);
		}
		assert_eq!(wm.fully_idle().iter().count(), 4);
	}

	#[test]
	fn publish_narrows_and_widens_candidates() {
		let wm = WatermarkMap::new(4);
		wm.publish(1, 10);
		assert!(!wm.fully_idle().contains(1));
		assert!(wm.candidates_at_least(10).contains(1));
		assert!(!wm.candidates_at_least(11).contains(1));

		wm.publish(1, IDLE_WATERMARK);
		assert!(wm.fully_idle().contains(1));
		assert!(wm.candidates_at_least(11).contains(1));
	}

	#[test]
	fn select_prefers_hint_when_qualifying() {
		let wm = WatermarkMap::new(4);
		wm.publish(1, 2);
		wm.publish(3, 2);
		let all = StaticCpuSet::full(4);
		assert_eq!(wm.select(5, &all, Some(2)), Some(2));
		assert_eq!(wm.select(5, &all, None), Some(0));
	}
}
