//! Bitmap primitives shared by the per-runqueue priority queue (C1) and the
//! global watermark map (C3).
//!
//! The host scheduler this was distilled from keeps a single `u64` bitmap
//! alongside each priority-indexed array of queues and finds the
//! highest-priority non-empty level with a most-significant-bit scan. This
//! module generalizes that exact pattern: a plain, lock-free-readable `u64`
//! bitmap for levels owned by one runqueue, and an atomic variant
//! ([`AtomicBitmap`]) plus a multi-word [`CpuSet`] for state shared across
//! CPUs.

use alloc::vec;
use alloc::vec::Vec;
use core::num::NonZeroU64;
use core::sync::atomic::{AtomicU64, Ordering};

/// Returns the index of the most significant set bit, or `None` if `n == 0`.
#[inline]
pub fn msb(n: u64) -> Option<u32> {
	NonZeroU64::new(n).map(|n| u64::BITS - 1 - n.leading_zeros())
}

/// Returns the index of the least significant set bit, or `None` if `n == 0`.
#[inline]
pub fn lsb(n: u64) -> Option<u32> {
	NonZeroU64::new(n).map(NonZeroU64::trailing_zeros)
}

/// A 64-level bitmap owned by a single runqueue, mutated only under the
/// runqueue's lock. `first()` and `next_after()` are O(1) word scans.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bitmap64(u64);

impl Bitmap64 {
	pub const fn new() -> Self {
		Self(0)
	}

	#[inline]
	pub fn set(&mut self, level: usize) {
		self.0 |= 1 << level;
	}

	#[inline]
	pub fn clear(&mut self, level: usize) {
		self.0 &= !(1 << level);
	}

	#[inline]
	pub fn test(&self, level: usize) -> bool {
		self.0 & (1 << level) != 0
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.0 == 0
	}

	/// Highest-urgency (lowest-index) set level, if any.
	#[inline]
	pub fn first(&self) -> Option<usize> {
		lsb(self.0).map(|b| b as usize)
	}

	/// Lowest-urgency (highest-index) set level, if any.
	#[inline]
	pub fn last(&self) -> Option<usize> {
		msb(self.0).map(|b| b as usize)
	}

	/// Next set level strictly above `level`, if any.
	#[inline]
	pub fn next_after(&self, level: usize) -> Option<usize> {
		if level >= 63 {
			return None;
		}
		let masked = self.0 & !((1u64 << (level + 1)) - 1);
		lsb(masked).map(|b| b as usize)
	}

	#[inline]
	pub fn raw(&self) -> u64 {
		self.0
	}
}

/// Atomic single-word bitmap, used for the watermark map's emptiness
/// summary (readers race writers and re-validate under a runqueue lock).
#[derive(Debug, Default)]
pub struct AtomicBitmap(AtomicU64);

impl AtomicBitmap {
	pub const fn new() -> Self {
		Self(AtomicU64::new(0))
	}

	#[inline]
	pub fn set(&self, bit: usize, ordering: Ordering) {
		self.0.fetch_or(1 << bit, ordering);
	}

	#[inline]
	pub fn clear(&self, bit: usize, ordering: Ordering) {
		self.0.fetch_and(!(1 << bit), ordering);
	}

	#[inline]
	pub fn test(&self, bit: usize, ordering: Ordering) -> bool {
		self.0.load(ordering) & (1 << bit) != 0
	}

	#[inline]
	pub fn first(&self, ordering: Ordering) -> Option<usize> {
		lsb(self.0.load(ordering)).map(|b| b as usize)
	}

	#[inline]
	pub fn snapshot(&self, ordering: Ordering) -> u64 {
		self.0.load(ordering)
	}
}

/// A set of CPU ids backed by one or more atomic words. Writers must hold
/// the relevant runqueue lock before mutating; readers may race and must
/// re-validate under the target runqueue's lock.
#[derive(Debug)]
pub struct CpuSet {
	words: Vec<AtomicU64>,
}

impl CpuSet {
	pub fn new(ncpus: usize) -> Self {
		let nwords = ncpus.div_ceil(64).max(1);
		Self {
			words: (0..nwords).map(|_| AtomicU64::new(0)).collect(),
		}
	}

	#[inline]
	pub fn insert(&self, cpu: u32, ordering: Ordering) {
		let (word, bit) = Self::locate(cpu);
		self.words[word].fetch_or(1 << bit, ordering);
	}

	#[inline]
	pub fn remove(&self, cpu: u32, ordering: Ordering) {
		let (word, bit) = Self::locate(cpu);
		self.words[word].fetch_and(!(1 << bit), ordering);
	}

	#[inline]
	pub fn contains(&self, cpu: u32, ordering: Ordering) -> bool {
		let (word, bit) = Self::locate(cpu);
		self.words[word].load(ordering) & (1 << bit) != 0
	}

	pub fn is_empty(&self, ordering: Ordering) -> bool {
		self.words.iter().all(|w| w.load(ordering) == 0)
	}

	/// Materializes a plain, point-in-time copy for set algebra
	/// (intersection with an affinity mask, iteration).
	pub fn snapshot(&self, ordering: Ordering) -> StaticCpuSet {
		StaticCpuSet {
			words: self.words.iter().map(|w| w.load(ordering)).collect(),
		}
	}

	#[inline]
	fn locate(cpu: u32) -> (usize, u32) {
		((cpu / 64) as usize, cpu % 64)
	}
}

/// A plain (non-atomic) snapshot of a [`CpuSet`], or a fixed mask such as a
/// task's `cpus_mask`. Supports the set algebra CPU selection needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticCpuSet {
	words: Vec<u64>,
}

impl StaticCpuSet {
	pub fn empty(ncpus: usize) -> Self {
		let nwords = ncpus.div_ceil(64).max(1);
		Self {
			words: vec![0u64; nwords],
		}
	}

	pub fn full(ncpus: usize) -> Self {
		let mut set = Self::empty(ncpus);
		for cpu in 0..ncpus as u32 {
			set.insert(cpu);
		}
		set
	}

	pub fn single(cpu: u32, ncpus: usize) -> Self {
		let mut set = Self::empty(ncpus);
		set.insert(cpu);
		set
	}

	#[inline]
	pub fn insert(&mut self, cpu: u32) {
		let (word, bit) = (cpu as usize / 64, cpu % 64);
		self.words[word] |= 1 << bit;
	}

	#[inline]
	pub fn remove(&mut self, cpu: u32) {
		let (word, bit) = (cpu as usize / 64, cpu % 64);
		self.words[word] &= !(1 << bit);
	}

	#[inline]
	pub fn contains(&self, cpu: u32) -> bool {
		let (word, bit) = (cpu as usize / 64, cpu % 64);
		self.words.get(word).is_some_and(|w| w & (1 << bit) != 0)
	}

	pub fn is_empty(&self) -> bool {
		self.words.iter().all(|w| *w == 0)
	}

	pub fn intersection(&self, other: &Self) -> Self {
		let words = self
			.words
			.iter()
			.zip(other.words.iter())
			.map(|(a, b)| a & b)
			.collect();
		Self { words }
	}

	/// Lowest-numbered CPU in the set, if any, preferring `hint` when it is
	/// itself a member (used to keep a woken task on its previous/hot CPU).
	pub fn pick(&self, hint: Option<u32>) -> Option<u32> {
		if let Some(hint) = hint {
			if self.contains(hint) {
				return Some(hint);
			}
		}
		self.iter().next()
	}

	pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
		self.words.iter().enumerate().flat_map(|(wi, word)| {
			let mut remaining = *word;
			core::iter::from_fn(move || {
				let bit = lsb(remaining)?;
				remaining &= !(1 << bit);
				Some(wi as u32 * 64 + bit)
			})
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn msb_lsb_examples() {
		assert_eq!(msb(0), None);
		assert_eq!(msb(1), Some(0));
		assert_eq!(msb(u64::MAX), Some(63));
		assert_eq!(lsb(0), None);
		assert_eq!(lsb(0b1000), Some(3));
	}

	#[test]
	fn bitmap64_first_and_next() {
		let mut bm = Bitmap64::new();
		bm.set(5);
		bm.set(10);
		bm.set(2);
		assert_eq!(bm.first(), Some(2));
		assert_eq!(bm.next_after(2), Some(5));
		assert_eq!(bm.next_after(5), Some(10));
		assert_eq!(bm.next_after(10), None);
		bm.clear(5);
		assert!(!bm.test(5));
		assert_eq!(bm.next_after(2), Some(10));
	}

	#[test]
	fn static_cpu_set_intersection_and_pick() {
		let mut a = StaticCpuSet::empty(8);
		a.insert(1);
		a.insert(3);
		let mut b = StaticCpuSet::empty(8);
		b.insert(3);
		b.insert(4);
		let i = a.intersection(&b);
		assert!(i.contains(3));
		assert!(!i.contains(1));
		assert_eq!(i.pick(None), Some(3));
		assert_eq!(a.pick(Some(3)), Some(3));
		assert_eq!(a.pick(Some(7)), Some(1));
	}

	#[test]
	fn cpu_set_across_words() {
		let set = CpuSet::new(130);
		set.insert(129, Ordering::Relaxed);
		assert!(set.contains(129, Ordering::Relaxed));
		let snap = set.snapshot(Ordering::Relaxed);
		assert!(snap.contains(129));
		assert!(!snap.contains(128));
	}
}
