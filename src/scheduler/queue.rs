//! The per-runqueue priority bitmap queue (C1).
//!
//! Grounded directly on the host scheduler's `PriorityTaskQueue`: one
//! `VecDeque` per priority level plus a bitmap summarizing which levels are
//! non-empty, so the highest-priority runnable task is found with a single
//! most-significant-bit-style scan instead of walking every level.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::bitmap::Bitmap64;
use crate::config::NO_PRIORITIES;
use crate::scheduler::task::{TaskHandle, TaskId};

/// A bitmap-indexed array of per-level FIFO queues, owned by exactly one
/// runqueue and mutated only under that runqueue's lock.
#[derive(Debug)]
pub struct PriorityQueue {
	bitmap: Bitmap64,
	levels: Vec<VecDeque<TaskHandle>>,
}

impl Default for PriorityQueue {
	fn default() -> Self {
		Self::new()
	}
}

impl PriorityQueue {
	pub fn new() -> Self {
		Self {
			bitmap: Bitmap64::new(),
			levels: (0..NO_PRIORITIES).map(|_| VecDeque::new()).collect(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.bitmap.is_empty()
	}

	pub fn len(&self) -> usize {
		self.levels.iter().map(VecDeque::len).sum()
	}

	/// Appends `handle` to the back of `level` (normal enqueue: new arrivals
	/// and RR time-slice expiry both join the tail of their level).
	pub fn push_back(&mut self, level: usize, handle: TaskHandle) {
		self.levels[level].push_back(handle);
		self.bitmap.set(level);
	}

	/// Prepends `handle` to the front of `level`, used when a task is
	/// preempted mid-slice and must be the very next one dispatched at its
	/// level.
	pub fn push_front(&mut self, level: usize, handle: TaskHandle) {
		self.levels[level].push_front(handle);
		self.bitmap.set(level);
	}

	/// Inserts `handle` into `level` ordered by `prio` (lower is more
	/// urgent), before the first entry whose priority is numerically
	/// greater, else at the tail. Used for level 0, which is shared by every
	/// RT task and the stopper and so cannot rely on FIFO order alone to
	/// keep them correctly ranked against each other.
	pub fn push_priority_ordered(&mut self, level: usize, handle: TaskHandle) {
		let queue = &mut self.levels[level];
		let pos = queue.iter().position(|existing| existing.priority() > handle.priority());
		match pos {
			Some(pos) => queue.insert(pos, handle),
			None => queue.push_back(handle),
		}
		self.bitmap.set(level);
	}

	/// The highest-urgency non-empty level, if any.
	pub fn first_level(&self) -> Option<usize> {
		self.bitmap.first()
	}

	/// Pops the task at the head of the highest-urgency non-empty level.
	pub fn pop_highest(&mut self) -> Option<(usize, TaskHandle)> {
		let level = self.bitmap.first()?;
		let handle = self.levels[level].pop_front().expect("bitmap bit implies non-empty level");
		if self.levels[level].is_empty() {
			self.bitmap.clear(level);
		}
		Some((level, handle))
	}

	/// Pops the head of the highest-urgency level, except that if that head
	/// is `skip` it is set aside for the duration of this one pick: the next
	/// task behind it (at the same level, or the next non-empty level) is
	/// returned instead, and `skip` is reinserted at the front of its
	/// original level so the next normal pick finds it first again. If
	/// nothing else is runnable, `skip` is returned anyway (its position is
	/// unchanged, per the "only task at this level" yield boundary case).
	pub fn pop_highest_except(&mut self, skip: Option<TaskId>) -> Option<(usize, TaskHandle)> {
		let Some(skip_id) = skip else {
			return self.pop_highest();
		};
		let level = self.bitmap.first()?;
		if self.levels[level].front().map(TaskHandle::id) != Some(skip_id) {
			return self.pop_highest();
		}

		let skipped = self.levels[level].pop_front().expect("bitmap bit implies non-empty level");
		if self.levels[level].is_empty() {
			self.bitmap.clear(level);
		}

		let result = self.pop_highest();
		self.levels[level].push_front(skipped);
		self.bitmap.set(level);
		result.or_else(|| self.pop_highest())
	}

	/// Removes a specific task from `level` (e.g. on `set_cpus_allowed` or
	/// dequeue-for-migration), preserving the order of the rest.
	pub fn remove(&mut self, level: usize, id: TaskId) -> Option<TaskHandle> {
		let queue = &mut self.levels[level];
		let pos = queue.iter().position(|h| h.id() == id)?;
		let handle = queue.remove(pos);
		if queue.is_empty() {
			self.bitmap.clear(level);
		}
		handle
	}

	/// Peeks the head of `level` without removing it.
	pub fn peek_front(&self, level: usize) -> Option<TaskHandle> {
		self.levels[level].front().copied()
	}

	/// The task immediately following `id` within `level`, if `id` is
	/// present there and isn't its last entry. Task-granularity counterpart
	/// to [`crate::bitmap::Bitmap64::next_after`], which only walks bits.
	pub fn next_after(&self, level: usize, id: TaskId) -> Option<TaskHandle> {
		let queue = &self.levels[level];
		let pos = queue.iter().position(|h| h.id() == id)?;
		queue.get(pos + 1).copied()
	}

	/// Iterates levels from highest to lowest urgency, draining up to `max`
	/// tasks total into the provided callback (used by pull migration,
	/// which takes from the tail so it disturbs the donor's own dispatch
	/// order as little as possible).
	pub fn drain_from_tail<F>(&mut self, max: usize, mut accept: F) -> usize
	where
		F: FnMut(usize, TaskHandle) -> bool,
	{
		let mut taken = 0;
		'levels: for level in 0..NO_PRIORITIES {
			while taken < max {
				let Some(handle) = self.levels[level].back().copied() else {
					continue 'levels;
				};
				if !accept(level, handle) {
					continue 'levels;
				}
				self.levels[level].pop_back();
				if self.levels[level].is_empty() {
					self.bitmap.clear(level);
				}
				taken += 1;
			}
			break;
		}
		taken
	}
}
