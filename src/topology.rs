//! CPU topology used to order affinity sweeps during pull migration and SMT
//! sibling balancing, and to compute the watermark map's SMT-idle
//! slot.
//!
//! Resolving real topology (ACPI/devicetree parsing) is out of scope here —
//! the embedder supplies the already-resolved groupings at construction
//! time, mirroring how the host scheduler receives topology from its own
//! boot-time ACPI/devicetree code.

use alloc::vec::Vec;

use crate::bitmap::StaticCpuSet;
use crate::scheduler::task::CoreId;

/// A topology-ordered set of expanding rings around one CPU: SMT siblings,
/// then the rest of the LLC (last-level-cache) group, then the rest of the
/// package, then everything else. Pull migration and SMT balancing walk
/// these rings from narrowest to widest.
#[derive(Debug, Clone)]
pub struct Topology {
	ncpus: usize,
	/// `smt_siblings[c]` is the full SMT group containing `c` (including
	/// `c` itself).
	smt_siblings: Vec<StaticCpuSet>,
	/// `llc_group[c]` is the full LLC-sharing group containing `c`.
	llc_group: Vec<StaticCpuSet>,
	/// `package_group[c]` is the full package containing `c`.
	package_group: Vec<StaticCpuSet>,
	all: StaticCpuSet,
}

impl Topology {
	/// Builds a topology from an explicit SMT/LLC/package grouping.
	/// `smt_groups`, `llc_groups` and `package_groups` each partition
	/// `0..ncpus`; every CPU must appear in exactly one group of each kind.
	pub fn new(
		ncpus: usize,
		smt_groups: &[StaticCpuSet],
		llc_groups: &[StaticCpuSet],
		package_groups: &[StaticCpuSet],
	) -> Self {
		let build = |groups: &[StaticCpuSet]| -> Vec<StaticCpuSet> {
			let mut per_cpu = alloc::vec![StaticCpuSet::empty(ncpus); ncpus];
			for group in groups {
				for cpu in group.iter() {
					per_cpu[cpu as usize] = group.clone();
				}
			}
			per_cpu
		};

		Self {
			ncpus,
			smt_siblings: build(smt_groups),
			llc_group: build(llc_groups),
			package_group: build(package_groups),
			all: StaticCpuSet::full(ncpus),
		}
	}

	/// A flat topology with no SMT/LLC/package structure: every CPU is its
	/// own singleton group. Used when the embedder has no real topology
	/// information.
	pub fn flat(ncpus: usize) -> Self {
		let singles: Vec<StaticCpuSet> = (0..ncpus as u32).map(|c| StaticCpuSet::single(c, ncpus)).collect();
		Self::new(ncpus, &singles, &singles, &singles)
	}

	pub fn ncpus(&self) -> usize {
		self.ncpus
	}

	pub fn smt_siblings(&self, cpu: CoreId) -> &StaticCpuSet {
		&self.smt_siblings[cpu as usize]
	}

	pub fn llc_group(&self, cpu: CoreId) -> &StaticCpuSet {
		&self.llc_group[cpu as usize]
	}

	pub fn package_group(&self, cpu: CoreId) -> &StaticCpuSet {
		&self.package_group[cpu as usize]
	}

	pub fn all(&self) -> &StaticCpuSet {
		&self.all
	}

	/// Whether this topology has more than one CPU per SMT group anywhere
	/// (i.e. whether watermark slot 0 is ever meaningful).
	pub fn has_smt(&self) -> bool {
		self.smt_siblings.iter().any(|g| g.iter().count() > 1)
	}

	/// The expanding rings around `cpu`, narrowest first, each ring
	/// excluding `cpu` itself and all narrower rings: SMT siblings, the
	/// rest of the LLC group, the rest of the package, then all remaining
	/// CPUs.
	pub fn rings(&self, cpu: CoreId) -> [StaticCpuSet; 4] {
		let mut smt = self.smt_siblings(cpu).clone();
		smt.remove(cpu);

		let mut llc = self.llc_group(cpu).clone();
		for c in self.smt_siblings(cpu).iter() {
			llc.remove(c);
		}

		let mut package = self.package_group(cpu).clone();
		for c in self.llc_group(cpu).iter() {
			package.remove(c);
		}

		let mut rest = self.all.clone();
		for c in self.package_group(cpu).iter() {
			rest.remove(c);
		}

		[smt, llc, package, rest]
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flat_topology_rings_are_all_or_nothing() {
		let topo = Topology::flat(4);
		assert!(!topo.has_smt());
		let rings = topo.rings(0);
		assert!(rings[0].is_empty());
		assert!(rings[1].is_empty());
		assert!(rings[2].is_empty());
		assert_eq!(rings[3].iter().count(), 3);
	}

	#[test]
	fn smt_rings_expand_correctly() {
		// 4 CPUs: {0,1} are SMT siblings sharing an LLC with {2,3}, all one package.
		let smt0 = {
			let mut s = StaticCpuSet::empty(4);
			s.insert(0);
			s.insert(1);
			s
		};
		let smt1 = {
			let mut s = StaticCpuSet::empty(4);
			s.insert(2);
			s.insert(3);
			s
		};
		let llc = StaticCpuSet::full(4);
		let pkg = StaticCpuSet::full(4);
		let topo = Topology::new(4, &[smt0.clone(), smt1.clone()], &[llc.clone()], &[pkg]);
		assert!(topo.has_smt());

		let rings = topo.rings(0);
		assert!(rings[0].contains(1) && !rings[0].contains(0));
		assert!(rings[1].contains(2) && rings[1].contains(3));
		assert!(rings[2].is_empty());
	}
}
