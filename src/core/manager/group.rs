//! Per-node bookkeeping for dynamically placed foreground threads.

use std::collections::BTreeSet;

use crate::{Err, Result, mask::CpuMask, sys::Tid, topology::Topology};

/// One NUMA node's share of the foreground CPU set, plus the threads
/// currently assigned to it. `avail_cpu_num` may be zero for nodes whose
/// CPUs are all excluded by the foreground mask.
#[derive(Clone, Debug)]
pub(crate) struct Group {
	pub(crate) avail_cpu_mask: CpuMask,
	pub(crate) avail_cpu_num: usize,
	pub(crate) assigned_thread_num: usize,
	pub(crate) tids: BTreeSet<Tid>,
}

impl Group {
	fn new(avail_cpu_mask: CpuMask) -> Self {
		Self {
			avail_cpu_num: avail_cpu_mask.count_ones(),
			avail_cpu_mask,
			assigned_thread_num: 0,
			tids: BTreeSet::new(),
		}
	}

	pub(crate) fn assign(&mut self, tid: Tid) {
		if self.tids.insert(tid) {
			self.assigned_thread_num += 1;
		}
	}

	pub(crate) fn release(&mut self, tid: Tid) -> bool {
		if self.tids.remove(&tid) {
			self.assigned_thread_num = self.assigned_thread_num.saturating_sub(1);
			return true;
		}

		false
	}
}

/// Group table, one entry per NUMA node. Populated only while foreground
/// scheduling is enabled; empty otherwise.
#[derive(Clone, Debug, Default)]
pub(crate) struct GroupTable {
	groups: Vec<Group>,
}

impl GroupTable {
	/// Split the foreground mask into per-node groups. Fails when the mask
	/// leaves every node without a usable CPU.
	pub(crate) fn build(topology: &Topology, foreground: &CpuMask) -> Result<Self> {
		let groups: Vec<_> = (0..topology.total_node_num)
			.map(|node| {
				let mut mask = CpuMask::new(topology.total_cpu_num);
				for id in topology.node_range(node).filter(|&id| foreground.test(id)) {
					mask.set(id);
				}

				Group::new(mask)
			})
			.collect();

		if groups.iter().all(|group| group.avail_cpu_num == 0) {
			return Err!(Topology("no foreground CPU available on any node"));
		}

		Ok(Self { groups })
	}

	/// Take over the thread membership of a same-shaped predecessor table,
	/// keeping every thread on its prior node.
	pub(crate) fn adopt(&mut self, old: Self) {
		debug_assert_eq!(self.groups.len(), old.groups.len(), "node count is fixed at probe time");
		for (group, old) in self.groups.iter_mut().zip(old.groups) {
			group.assigned_thread_num = old.tids.len();
			group.tids = old.tids;
		}
	}

	/// Index of the group with the lowest assigned/available load ratio.
	/// Ratios are compared by cross-multiplication; groups without a
	/// usable CPU are skipped; ties go to the lowest index.
	pub(crate) fn least_loaded(&self) -> Option<usize> {
		self.groups
			.iter()
			.enumerate()
			.filter(|(_, group)| group.avail_cpu_num > 0)
			.min_by(|(_, a), (_, b)| {
				(a.assigned_thread_num * b.avail_cpu_num).cmp(&(b.assigned_thread_num * a.avail_cpu_num))
			})
			.map(|(index, _)| index)
	}

	/// Group a tid is currently assigned to, if any.
	pub(crate) fn find(&self, tid: Tid) -> Option<usize> {
		self.groups.iter().position(|group| group.tids.contains(&tid))
	}

	/// Thread count each group should hold after a rebalance: the floored
	/// share of the total proportional to the group's CPU count.
	pub(crate) fn targets(&self) -> Vec<usize> {
		let total_threads: usize = self.groups.iter().map(|group| group.tids.len()).sum();
		let total_cpus: usize = self.groups.iter().map(|group| group.avail_cpu_num).sum();

		self.groups
			.iter()
			.map(|group| {
				if total_cpus == 0 {
					0
				} else {
					total_threads * group.avail_cpu_num / total_cpus
				}
			})
			.collect()
	}

	/// Reassign a tid between groups without touching kernel state.
	pub(crate) fn move_tid(&mut self, from: usize, to: usize, tid: Tid) {
		if self.groups[from].release(tid) {
			self.groups[to].assign(tid);
		}
	}

	/// Append one `assigned/available; ` segment per group, stopping
	/// before a segment would push the buffer past `size`.
	pub(crate) fn snapshot(&self, buff: &mut String, size: usize) {
		buff.clear();
		for group in &self.groups {
			let segment = format!("{}/{}; ", group.assigned_thread_num, group.avail_cpu_num);
			if buff.len().saturating_add(segment.len()) > size {
				break;
			}

			buff.push_str(&segment);
		}
	}

	#[inline]
	pub(crate) fn len(&self) -> usize { self.groups.len() }

	#[inline]
	pub(crate) fn is_empty(&self) -> bool { self.groups.is_empty() }

	#[inline]
	pub(crate) fn clear(&mut self) { self.groups.clear(); }

	#[inline]
	pub(crate) fn get(&self, index: usize) -> &Group { &self.groups[index] }

	#[inline]
	pub(crate) fn get_mut(&mut self, index: usize) -> &mut Group { &mut self.groups[index] }

	#[inline]
	pub(crate) fn iter(&self) -> impl Iterator<Item = &Group> { self.groups.iter() }
}
