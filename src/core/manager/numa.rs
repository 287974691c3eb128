//! Affinity manager for NUMA-capable hosts.

use std::{
	collections::{BTreeMap, BTreeSet},
	sync::Mutex,
};

use tracing::warn;

use super::{SchedAffinity, group::GroupTable};
use crate::{
	Err, Result,
	config::{Config, ThreadType},
	err,
	mask::CpuMask,
	result::LogErr,
	sys,
	sys::Tid,
	topology::Topology,
};

/// Applies a CPU mask to an OS thread. Indirected so the deterministic
/// tests can drive the placement machinery without touching the kernel.
pub(crate) type Apply = fn(Tid, &CpuMask) -> Result;

/// Affinity state of one thread class: the configured mask (None while
/// the class is exempt from scheduling) and the registered thread ids.
#[derive(Debug, Default)]
struct Class {
	mask: Option<CpuMask>,
	tids: BTreeSet<Tid>,
}

impl Class {
	#[inline]
	fn enabled(&self) -> bool { self.mask.is_some() }
}

/// Everything mutable, guarded by the manager's one mutex.
struct State {
	classes: BTreeMap<ThreadType, Class>,
	groups: GroupTable,
}

impl State {
	fn class(&self, thread_type: ThreadType) -> &Class {
		self.classes.get(&thread_type).expect("every thread class is initialized")
	}

	fn class_mut(&mut self, thread_type: ThreadType) -> &mut Class {
		self.classes.get_mut(&thread_type).expect("every thread class is initialized")
	}
}

pub struct NumaManager {
	topology: Topology,
	apply: Apply,
	state: Mutex<State>,
}

impl NumaManager {
	pub fn new(config: &Config) -> Result<Self> {
		Self::with_topology(Topology::probe()?, sys::set_thread_affinity, config)
	}

	pub(crate) fn with_topology(topology: Topology, apply: Apply, config: &Config) -> Result<Self> {
		let mut classes: BTreeMap<_, _> = ThreadType::ALL
			.into_iter()
			.map(|thread_type| (thread_type, Class::default()))
			.collect();

		for thread_type in ThreadType::ALL {
			let Some(range) = config.get(thread_type) else {
				continue;
			};

			let mask = parse_checked(range, &topology)?;
			classes
				.get_mut(&thread_type)
				.expect("every thread class is initialized")
				.mask = Some(mask);
		}

		let groups = match &classes[&ThreadType::Foreground].mask {
			| Some(foreground) => {
				for thread_type in ThreadType::ALL {
					if let Some(mask) = &classes[&thread_type].mask {
						warn_overlap(thread_type, mask, foreground);
					}
				}

				GroupTable::build(&topology, foreground)?
			},
			| None => GroupTable::default(),
		};

		Ok(Self {
			topology,
			apply,
			state: Mutex::new(State { classes, groups }),
		})
	}

	/// Select the least-loaded group, pin `apply_to` to its CPUs and
	/// record `tid` as assigned there.
	fn place(&self, state: &mut State, tid: Tid, apply_to: Tid) -> Result {
		if state.groups.find(tid).is_some() {
			return Err!(State("thread {tid} is already assigned to a group"));
		}

		let index = state
			.groups
			.least_loaded()
			.ok_or_else(|| err!(State("no group has a usable CPU")))?;

		(self.apply)(apply_to, &state.groups.get(index).avail_cpu_mask)?;
		state.groups.get_mut(index).assign(tid);
		state.class_mut(ThreadType::Foreground).tids.insert(tid);
		Ok(())
	}

	/// Disable-path migration: restore every placed thread to the process
	/// mask and drop the group table. Threads stay registered to the
	/// foreground class so a later re-enable can pick them up.
	fn restore_foreground(&self, state: &mut State) -> Result {
		for index in 0..state.groups.len() {
			while let Some(&tid) = state.groups.get(index).tids.first() {
				(self.apply)(tid, &self.topology.process_mask)?;
				state.groups.get_mut(index).release(tid);
			}
		}

		state.groups.clear();
		Ok(())
	}

	/// Mask-change migration: move threads from groups above their
	/// proportional target to groups below it, lowest receiver first.
	/// Flooring may leave a small surplus behind; those threads keep
	/// their prior group.
	fn rebalance(&self, state: &mut State) -> Result {
		let targets = state.groups.targets();
		let mut capacity: Vec<usize> = (0..state.groups.len())
			.map(|index| targets[index].saturating_sub(state.groups.get(index).tids.len()))
			.collect();

		for index in 0..state.groups.len() {
			let mut surplus = state.groups.get(index).tids.len().saturating_sub(targets[index]);
			while surplus > 0 {
				let Some(receiver) = capacity.iter().position(|&room| room > 0) else {
					return Ok(());
				};

				let tid = *state
					.groups
					.get(index)
					.tids
					.first()
					.expect("group with surplus threads is non-empty");

				(self.apply)(tid, &state.groups.get(receiver).avail_cpu_mask)?;
				state.groups.move_tid(index, receiver, tid);
				capacity[receiver] -= 1;
				surplus -= 1;
			}
		}

		Ok(())
	}

	fn reschedule_inner(&self, state: &mut State, config: &Config, thread_type: ThreadType) -> Result {
		let was_enabled = state.class(thread_type).enabled();
		let new_mask = match config.get(thread_type) {
			| None => None,
			| Some(range) => Some(parse_checked(range, &self.topology)?),
		};

		if thread_type == ThreadType::Foreground {
			return self.reschedule_foreground(state, new_mask, was_enabled);
		}

		self.reschedule_background(state, thread_type, new_mask)
	}

	fn reschedule_foreground(
		&self,
		state: &mut State,
		new_mask: Option<CpuMask>,
		was_enabled: bool,
	) -> Result {
		let Some(mask) = new_mask else {
			state.class_mut(ThreadType::Foreground).mask = None;
			return self.restore_foreground(state);
		};

		// Trial-build before committing anything so a mask without a
		// usable group leaves the prior policy in force.
		let rebuilt = GroupTable::build(&self.topology, &mask)?;
		for thread_type in ThreadType::ALL {
			if let Some(background) = &state.class(thread_type).mask {
				warn_overlap(thread_type, background, &mask);
			}
		}

		if was_enabled {
			let old = std::mem::replace(&mut state.groups, rebuilt);
			state.groups.adopt(old);
			state.class_mut(ThreadType::Foreground).mask = Some(mask);
			return self.rebalance(state);
		}

		state.groups = rebuilt;
		state.class_mut(ThreadType::Foreground).mask = Some(mask);
		let tids: Vec<Tid> = state.class(ThreadType::Foreground).tids.iter().copied().collect();
		for tid in tids {
			self.place(state, tid, tid)?;
		}

		Ok(())
	}

	fn reschedule_background(
		&self,
		state: &mut State,
		thread_type: ThreadType,
		new_mask: Option<CpuMask>,
	) -> Result {
		let tids: Vec<Tid> = state.class(thread_type).tids.iter().copied().collect();

		let Some(mask) = new_mask else {
			state.class_mut(thread_type).mask = None;
			for tid in tids {
				(self.apply)(tid, &self.topology.process_mask)?;
			}

			state.class_mut(thread_type).tids.clear();
			return Ok(());
		};

		if let Some(foreground) = &state.class(ThreadType::Foreground).mask {
			warn_overlap(thread_type, &mask, foreground);
		}

		state.class_mut(thread_type).mask = Some(mask.clone());
		for tid in tids {
			(self.apply)(tid, &mask)?;
		}

		Ok(())
	}
}

impl SchedAffinity for NumaManager {
	#[tracing::instrument(level = "debug", skip(self))]
	fn bind_to_group(&self, tid: Tid) -> bool {
		let mut state = self.state.lock().expect("locked");
		if !state.class(ThreadType::Foreground).enabled() {
			state.class_mut(ThreadType::Foreground).tids.insert(tid);
			return true;
		}

		self.place(&mut state, tid, sys::CURRENT_THREAD).log_err().is_ok()
	}

	#[tracing::instrument(level = "debug", skip(self))]
	fn unbind_from_group(&self, tid: Tid) -> bool {
		let mut state = self.state.lock().expect("locked");
		if !state.class(ThreadType::Foreground).enabled() {
			return state.class_mut(ThreadType::Foreground).tids.remove(&tid);
		}

		let Some(index) = state.groups.find(tid) else {
			return false;
		};

		state.groups.get_mut(index).release(tid);
		state.class_mut(ThreadType::Foreground).tids.remove(&tid);
		true
	}

	#[tracing::instrument(level = "debug", skip(self))]
	fn bind_to_target(&self, thread_type: ThreadType, tid: Tid) -> bool {
		let mut state = self.state.lock().expect("locked");
		state.class_mut(thread_type).tids.insert(tid);

		let Some(mask) = &state.class(thread_type).mask else {
			return true;
		};

		(self.apply)(sys::CURRENT_THREAD, mask).log_err().is_ok()
	}

	#[tracing::instrument(level = "info", skip(self, config))]
	fn reschedule(&self, config: &Config, thread_type: ThreadType) -> bool {
		let mut state = self.state.lock().expect("locked");
		self.reschedule_inner(&mut state, config, thread_type)
			.log_err()
			.is_ok()
	}

	fn take_snapshot(&self, buff: &mut String, size: usize) {
		if size == 0 {
			return;
		}

		let state = self.state.lock().expect("locked");
		state.groups.snapshot(buff, size);
	}

	fn total_node_number(&self) -> i32 {
		self.topology.total_node_num.try_into().expect("node count fits i32")
	}

	fn cpu_number_per_node(&self) -> i32 {
		self.topology.cpu_num_per_node.try_into().expect("per-node CPU count fits i32")
	}
}

/// Parse a class's range string and check it against the process mask.
fn parse_checked(range: &str, topology: &Topology) -> Result<CpuMask> {
	let mask = CpuMask::parse(range, topology.total_cpu_num)?;
	if !mask.is_subset(&topology.process_mask) {
		return Err!(ProcessConflict(
			"CPU set {mask} escapes the process affinity {}",
			topology.process_mask
		));
	}

	Ok(mask)
}

/// Overlap between a background class and the foreground set is allowed
/// but flagged, for operators who did not intend shared cores.
fn warn_overlap(thread_type: ThreadType, mask: &CpuMask, foreground: &CpuMask) {
	if thread_type.is_background() && mask.intersects(foreground) {
		warn!("{thread_type} CPU set {mask} overlaps the foreground set {foreground}");
	}
}

#[cfg(test)]
impl NumaManager {
	/// Assert the bookkeeping invariants that must hold after every
	/// public operation.
	pub(crate) fn check_invariants(&self) {
		let state = self.state.lock().expect("locked");

		for (thread_type, class) in &state.classes {
			if let Some(mask) = &class.mask {
				assert!(
					mask.is_subset(&self.topology.process_mask),
					"{thread_type} mask must stay within the process mask"
				);
			}
		}

		let mut placed = 0;
		for index in 0..state.groups.len() {
			let group = state.groups.get(index);
			assert_eq!(
				group.assigned_thread_num,
				group.tids.len(),
				"group {index} counter must agree with its tid set"
			);
			placed += group.tids.len();

			if let Some(foreground) = &state.class(ThreadType::Foreground).mask {
				assert!(
					group.avail_cpu_mask.is_subset(foreground),
					"group {index} mask must stay within the foreground mask"
				);
			}

			for id in group.avail_cpu_mask.iter() {
				assert!(
					self.topology.node_range(index).contains(&id),
					"group {index} mask must stay within its node block"
				);
			}

			for tid in &group.tids {
				assert!(
					state.class(ThreadType::Foreground).tids.contains(tid),
					"placed threads must be registered to the foreground class"
				);
			}
		}

		if state.class(ThreadType::Foreground).enabled() {
			assert_eq!(
				placed,
				state.class(ThreadType::Foreground).tids.len(),
				"every registered foreground thread must be placed"
			);
		}
	}
}
