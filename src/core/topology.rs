//! Point-in-time view of the machine the manager was constructed on.

use std::ops::Range;

use crate::{Err, Result, mask::CpuMask, sys};

/// Captured once at initialization. CPUs are assumed to be distributed to
/// nodes as contiguous blocks of `cpu_num_per_node` ids, so node `i` owns
/// ids `[i * k, (i + 1) * k)`; [`Topology::probe`] verifies the
/// assumption against the kernel where possible.
#[derive(Clone, Debug)]
pub struct Topology {
	pub total_cpu_num: usize,
	pub total_node_num: usize,
	pub cpu_num_per_node: usize,
	pub process_mask: CpuMask,
}

impl Topology {
	pub fn new(total_cpu_num: usize, total_node_num: usize, process_mask: CpuMask) -> Result<Self> {
		if total_cpu_num == 0 || total_node_num == 0 {
			return Err!(Topology("no configured CPUs or NUMA nodes"));
		}
		if total_cpu_num % total_node_num != 0 {
			return Err!(Topology(
				"{total_cpu_num} CPUs do not divide evenly into {total_node_num} nodes"
			));
		}

		Ok(Self {
			total_cpu_num,
			total_node_num,
			cpu_num_per_node: total_cpu_num / total_node_num,
			process_mask,
		})
	}

	/// Query the kernel for the configured CPU and node counts and the
	/// process affinity mask.
	pub fn probe() -> Result<Self> {
		let total_cpu_num = sys::configured_cpus()?;
		let total_node_num = sys::configured_nodes()?;
		let process_mask = sys::thread_affinity(sys::CURRENT_THREAD, total_cpu_num)?;

		let topology = Self::new(total_cpu_num, total_node_num, process_mask)?;
		topology.check_contiguous()?;
		Ok(topology)
	}

	/// CPU ids owned by a node under the contiguous-block assumption.
	#[inline]
	#[must_use]
	pub fn node_range(&self, node: usize) -> Range<usize> {
		self.cpu_num_per_node * node..self.cpu_num_per_node * (node + 1)
	}

	/// Compare each node's kernel-reported cpulist against its assumed
	/// block. Nodes whose cpulist the kernel does not expose are skipped.
	fn check_contiguous(&self) -> Result {
		for node in 0..self.total_node_num {
			let Some(reported) = sys::node_cpus(node, self.total_cpu_num)? else {
				continue;
			};

			let mut assumed = CpuMask::new(self.total_cpu_num);
			for id in self.node_range(node) {
				assumed.set(id);
			}

			if reported != assumed {
				return Err!(Topology(
					"node {node} owns CPUs {reported}, expected the contiguous block {assumed}"
				));
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::Topology;
	use crate::mask::CpuMask;

	fn process_mask() -> CpuMask { CpuMask::parse("0-7", 8).expect("valid list") }

	#[test]
	fn divides_cpus_into_nodes() {
		let topology = Topology::new(8, 2, process_mask()).expect("topology");
		assert_eq!(topology.cpu_num_per_node, 4);
		assert_eq!(topology.node_range(0), 0..4);
		assert_eq!(topology.node_range(1), 4..8);
	}

	#[test]
	fn rejects_indivisible_node_count() {
		assert!(Topology::new(8, 3, process_mask()).is_err());
	}

	#[test]
	fn rejects_empty_machine() {
		assert!(Topology::new(0, 1, CpuMask::new(0)).is_err());
		assert!(Topology::new(8, 0, process_mask()).is_err());
	}
}
