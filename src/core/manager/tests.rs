#![cfg(test)]

use std::cell::{Cell, RefCell};

use nix::errno::Errno;

use super::{DummyManager, SchedAffinity, numa::NumaManager};
use crate::{
	Error, Result,
	config::{Config, ThreadType},
	mask::CpuMask,
	sys::Tid,
	topology::Topology,
};

thread_local! {
	static APPLIED: RefCell<Vec<(i32, String)>> = RefCell::new(Vec::new());
	static FAIL: Cell<bool> = const { Cell::new(false) };
}

/// Stand-in for the affinity syscall: records (tid, mask) pairs instead
/// of touching the kernel, failing on demand.
fn recording_apply(tid: Tid, mask: &CpuMask) -> Result {
	if FAIL.get() {
		return Err(Error::Sys(Errno::EINVAL));
	}

	APPLIED.with_borrow_mut(|log| log.push((tid.as_raw(), mask.to_string())));
	Ok(())
}

fn applied() -> Vec<(i32, String)> { APPLIED.with_borrow(Clone::clone) }

fn applied_reset() {
	APPLIED.with_borrow_mut(Vec::clear);
	FAIL.set(false);
}

fn topology(process: &str) -> Topology {
	Topology::new(8, 2, CpuMask::parse(process, 8).expect("valid list")).expect("topology")
}

fn manager(config: &Config) -> NumaManager {
	applied_reset();
	NumaManager::with_topology(topology("0-7"), recording_apply, config).expect("manager")
}

fn foreground(range: &str) -> Config { Config::new().with(ThreadType::Foreground, range) }

fn tid(n: i32) -> Tid { Tid::from_raw(n) }

fn snapshot(manager: &NumaManager) -> String {
	let mut buff = String::new();
	manager.take_snapshot(&mut buff, 1024);
	buff
}

#[test]
fn default_config_is_a_noop() {
	let manager = manager(&Config::new());

	assert!(manager.bind_to_group(tid(1)));
	assert!(applied().is_empty(), "no syscall while foreground is disabled");
	assert_eq!(snapshot(&manager), "");

	assert!(manager.unbind_from_group(tid(1)));
	assert!(!manager.unbind_from_group(tid(1)), "second unbind finds nothing");
	manager.check_invariants();
}

#[test]
fn foreground_binds_balance_across_nodes() {
	let manager = manager(&foreground("0-7"));

	for n in [10, 11, 12, 13] {
		assert!(manager.bind_to_group(tid(n)));
		manager.check_invariants();
	}

	assert_eq!(snapshot(&manager), "2/4; 2/4; ");
	// the syscall always targets the calling thread (tid 0), alternating
	// between the node masks as the tie-break selects the lowest index
	assert_eq!(applied(), vec![
		(0, "0-3".into()),
		(0, "4-7".into()),
		(0, "0-3".into()),
		(0, "4-7".into()),
	]);
}

#[test]
fn weighted_balance_prefers_wider_groups() {
	let manager = manager(&foreground("0-2,4"));

	for n in 1..=4 {
		assert!(manager.bind_to_group(tid(n)));
	}

	assert_eq!(snapshot(&manager), "3/3; 1/1; ");
	manager.check_invariants();
}

#[test]
fn equal_groups_stay_within_one_of_even_split() {
	let manager = manager(&foreground("0-7"));
	for n in 1..=5 {
		assert!(manager.bind_to_group(tid(n)));
	}

	assert_eq!(snapshot(&manager), "3/4; 2/4; ");

	for n in 6..=8 {
		assert!(manager.bind_to_group(tid(n)));
	}

	assert_eq!(snapshot(&manager), "4/4; 4/4; ");
	manager.check_invariants();
}

#[test]
fn whitespace_configs_fail() {
	for range in [" 0-7", "0-7 ", "0 ,7", "0,\t7"] {
		let config = foreground(range);
		let result = NumaManager::with_topology(topology("0-7"), recording_apply, &config);
		assert!(
			matches!(result, Err(Error::CpuString(_))),
			"{range:?} must be rejected as unparseable"
		);
	}
}

#[test]
fn out_of_range_config_fails() {
	let config = foreground("0-8");
	let result = NumaManager::with_topology(topology("0-7"), recording_apply, &config);
	assert!(matches!(result, Err(Error::CpuString(_))));
}

#[test]
fn process_conflict_fails() {
	let config = foreground("0-7");
	let result = NumaManager::with_topology(topology("0-3"), recording_apply, &config);
	assert!(matches!(result, Err(Error::ProcessConflict(_))));
}

#[test]
fn background_process_conflict_fails() {
	let config = Config::new().with(ThreadType::LogWriter, "4-7");
	let result = NumaManager::with_topology(topology("0-3"), recording_apply, &config);
	assert!(matches!(result, Err(Error::ProcessConflict(_))));
}

#[test]
fn foreground_background_overlap_is_non_fatal() {
	let config = foreground("0-3").with(ThreadType::LogWriter, "2-3");
	let manager = manager(&config);
	assert_eq!(manager.total_node_number(), 2);
}

#[test]
fn static_bind_applies_the_class_mask() {
	let config = Config::new().with(ThreadType::LogWriter, "0");
	let manager = manager(&config);

	assert!(manager.bind_to_target(ThreadType::LogWriter, tid(30)));
	assert_eq!(applied(), vec![(0, "0".into())]);

	// a class without configuration registers the tid without a syscall
	assert!(manager.bind_to_target(ThreadType::LogFlusher, tid(31)));
	assert_eq!(applied().len(), 1);
}

#[test]
fn static_bind_registers_even_on_failure() {
	let config = Config::new().with(ThreadType::LogCloser, "1");
	let manager = manager(&config);

	FAIL.set(true);
	assert!(!manager.bind_to_target(ThreadType::LogCloser, tid(40)));

	// the registration survives, so a later disable-reschedule still
	// restores this thread
	FAIL.set(false);
	let disabled = Config::new();
	assert!(manager.reschedule(&disabled, ThreadType::LogCloser));
	assert_eq!(applied(), vec![(40, "0-7".into())]);
}

#[test]
fn bind_fails_cleanly_when_the_syscall_fails() {
	let manager = manager(&foreground("0-7"));

	FAIL.set(true);
	assert!(!manager.bind_to_group(tid(1)));

	FAIL.set(false);
	assert_eq!(snapshot(&manager), "0/4; 0/4; ");
	manager.check_invariants();
}

#[test]
fn double_bind_is_rejected() {
	let manager = manager(&foreground("0-7"));

	assert!(manager.bind_to_group(tid(1)));
	assert!(!manager.bind_to_group(tid(1)));
	assert_eq!(snapshot(&manager), "1/4; 0/4; ");
	manager.check_invariants();
}

#[test]
fn unbind_restores_the_prior_occupancy() {
	let manager = manager(&foreground("0-7"));

	assert!(manager.bind_to_group(tid(1)));
	let before = snapshot(&manager);

	assert!(manager.bind_to_group(tid(2)));
	assert!(manager.unbind_from_group(tid(2)));
	assert_eq!(snapshot(&manager), before);

	assert!(!manager.unbind_from_group(tid(99)), "unknown tid must fail");
	manager.check_invariants();
}

#[test]
fn reschedule_to_fewer_nodes_migrates_everyone() {
	let manager = manager(&foreground("0-7"));
	for n in [10, 11, 12, 13] {
		assert!(manager.bind_to_group(tid(n)));
	}

	APPLIED.with_borrow_mut(Vec::clear);
	let config = foreground("0-3");
	assert!(manager.reschedule(&config, ThreadType::Foreground));

	assert_eq!(snapshot(&manager), "4/4; 0/0; ");
	// node 1 donated both of its threads, each pinned to node 0's CPUs
	assert_eq!(applied(), vec![(11, "0-3".into()), (13, "0-3".into())]);
	manager.check_invariants();
}

#[test]
fn reschedule_disable_then_reenable_round_trips() {
	let manager = manager(&foreground("0-7"));
	for n in [10, 11, 12, 13] {
		assert!(manager.bind_to_group(tid(n)));
	}

	APPLIED.with_borrow_mut(Vec::clear);
	assert!(manager.reschedule(&Config::new(), ThreadType::Foreground));
	assert_eq!(snapshot(&manager), "", "groups exist only while enabled");
	// every placed thread was restored to the process mask
	assert_eq!(applied(), vec![
		(10, "0-7".into()),
		(12, "0-7".into()),
		(11, "0-7".into()),
		(13, "0-7".into()),
	]);

	APPLIED.with_borrow_mut(Vec::clear);
	assert!(manager.reschedule(&foreground("0-7"), ThreadType::Foreground));
	assert_eq!(snapshot(&manager), "2/4; 2/4; ");
	// re-placement pins each registered thread itself, in tid order
	assert_eq!(applied(), vec![
		(10, "0-3".into()),
		(11, "4-7".into()),
		(12, "0-3".into()),
		(13, "4-7".into()),
	]);
	manager.check_invariants();
}

#[test]
fn reschedule_of_a_background_class_repins_registered_threads() {
	let config = Config::new().with(ThreadType::LogWriter, "2-3");
	let manager = manager(&config);

	assert!(manager.bind_to_target(ThreadType::LogWriter, tid(21)));
	assert!(manager.bind_to_target(ThreadType::LogWriter, tid(22)));

	APPLIED.with_borrow_mut(Vec::clear);
	let config = Config::new().with(ThreadType::LogWriter, "1");
	assert!(manager.reschedule(&config, ThreadType::LogWriter));
	assert_eq!(applied(), vec![(21, "1".into()), (22, "1".into())]);

	APPLIED.with_borrow_mut(Vec::clear);
	assert!(manager.reschedule(&Config::new(), ThreadType::LogWriter));
	assert_eq!(applied(), vec![(21, "0-7".into()), (22, "0-7".into())]);

	// the registrations were dropped with the disable
	APPLIED.with_borrow_mut(Vec::clear);
	assert!(manager.reschedule(&Config::new(), ThreadType::LogWriter));
	assert!(applied().is_empty());
}

#[test]
fn reschedule_parse_error_leaves_state_unchanged() {
	let manager = manager(&foreground("0-7"));
	assert!(manager.bind_to_group(tid(1)));
	assert!(manager.bind_to_group(tid(2)));
	let before = snapshot(&manager);

	assert!(!manager.reschedule(&foreground(" 0-3"), ThreadType::Foreground));
	assert_eq!(snapshot(&manager), before);
	manager.check_invariants();
}

#[test]
fn reschedule_conflict_leaves_state_unchanged() {
	applied_reset();
	let config = foreground("0-2");
	let manager = NumaManager::with_topology(topology("0-3"), recording_apply, &config)
		.expect("manager");
	assert!(manager.bind_to_group(tid(1)));
	let before = snapshot(&manager);

	assert!(!manager.reschedule(&foreground("0-7"), ThreadType::Foreground));
	assert_eq!(snapshot(&manager), before);
	manager.check_invariants();
}

#[test]
fn reschedule_with_the_same_mask_is_a_noop() {
	let manager = manager(&foreground("0-7"));
	for n in [10, 11, 12, 13] {
		assert!(manager.bind_to_group(tid(n)));
	}

	let before = snapshot(&manager);
	APPLIED.with_borrow_mut(Vec::clear);

	assert!(manager.reschedule(&foreground("0-7"), ThreadType::Foreground));
	assert_eq!(snapshot(&manager), before);
	assert!(applied().is_empty(), "a balanced table needs no migration");
	manager.check_invariants();
}

#[test]
fn reschedule_failure_keeps_accounting_consistent() {
	let manager = manager(&foreground("0-7"));
	for n in [10, 11, 12, 13] {
		assert!(manager.bind_to_group(tid(n)));
	}

	FAIL.set(true);
	assert!(!manager.reschedule(&foreground("0-3"), ThreadType::Foreground));
	FAIL.set(false);

	// the new policy is in force but no thread moved; counters still
	// mirror the tid sets
	assert_eq!(snapshot(&manager), "2/4; 2/0; ");
	manager.check_invariants();
}

#[test]
fn snapshot_respects_the_buffer_size() {
	let manager = manager(&foreground("0-7"));
	assert!(manager.bind_to_group(tid(1)));

	let mut buff = String::new();
	manager.take_snapshot(&mut buff, 5);
	assert_eq!(buff, "1/4; ");

	let mut buff = String::from("untouched");
	manager.take_snapshot(&mut buff, 0);
	assert_eq!(buff, "untouched", "zero size is a silent no-op");
}

#[test]
fn node_counts_come_from_the_topology() {
	let manager = manager(&Config::new());
	assert_eq!(manager.total_node_number(), 2);
	assert_eq!(manager.cpu_number_per_node(), 4);
}

#[test]
fn invariants_hold_across_mixed_operations() {
	let masks = ["0-7", "0-3", "1-5", "0,2,4,6", "7"];

	let manager = manager(&foreground(masks[0]));
	for n in 1..=5 {
		assert!(manager.bind_to_group(tid(n)));
		manager.check_invariants();
	}

	for (step, mask) in masks.iter().enumerate() {
		assert!(manager.reschedule(&foreground(mask), ThreadType::Foreground));
		manager.check_invariants();

		let n = i32::try_from(step).expect("small step") + 6;
		assert!(manager.bind_to_group(tid(n)));
		manager.check_invariants();

		assert!(manager.unbind_from_group(tid(n)));
		manager.check_invariants();
	}

	for n in 1..=5 {
		assert!(manager.unbind_from_group(tid(n)));
		manager.check_invariants();
	}

	assert_eq!(snapshot(&manager), "0/0; 0/1; ");
}

#[test]
fn dummy_manager_is_inert() {
	let dummy = DummyManager;

	assert!(dummy.bind_to_group(tid(1)));
	assert!(dummy.unbind_from_group(tid(1)));
	assert!(dummy.bind_to_target(ThreadType::LogWriter, tid(1)));
	assert!(dummy.reschedule(&Config::new(), ThreadType::Foreground));
	assert_eq!(dummy.total_node_number(), -1);
	assert_eq!(dummy.cpu_number_per_node(), -1);

	let mut buff = String::from("stale");
	dummy.take_snapshot(&mut buff, 1024);
	assert_eq!(buff, "");

	let mut buff = String::from("stale");
	dummy.take_snapshot(&mut buff, 0);
	assert_eq!(buff, "stale");
}

#[cfg(target_os = "linux")]
mod host {
	//! Tests against the live kernel, skipped silently when the host has
	//! no NUMA topology or a shape the manager rejects.

	use std::sync::Arc;

	use super::*;
	use crate::{manager, sys};

	fn probed() -> Option<Topology> {
		if !sys::numa_available() {
			return None;
		}

		Topology::probe().ok()
	}

	#[test]
	fn singleton_replaces_and_frees() {
		let Some(instance) = manager::create_instance(&Config::new()) else {
			return;
		};

		let again = manager::get_instance().expect("instance installed");
		assert!(Arc::ptr_eq(&instance, &again));

		manager::free_instance();
		assert!(manager::get_instance().is_none());
	}

	#[test]
	fn static_bind_pins_to_the_configured_cpu() {
		let Some(topology) = probed() else {
			return;
		};
		if !topology.process_mask.test(0) {
			return;
		}

		let saved = sys::thread_affinity(sys::CURRENT_THREAD, topology.total_cpu_num)
			.expect("read own affinity");

		let config = Config::new().with(ThreadType::LogWriter, "0");
		let manager = NumaManager::new(&config).expect("manager");
		assert!(manager.bind_to_target(ThreadType::LogWriter, sys::gettid()));

		let bound = sys::thread_affinity(sys::CURRENT_THREAD, topology.total_cpu_num)
			.expect("read own affinity");
		assert_eq!(bound.to_string(), "0");

		sys::set_thread_affinity(sys::CURRENT_THREAD, &saved).expect("restore affinity");
	}

	#[test]
	fn dynamic_bind_lands_inside_the_process_mask() {
		let Some(topology) = probed() else {
			return;
		};

		let saved = sys::thread_affinity(sys::CURRENT_THREAD, topology.total_cpu_num)
			.expect("read own affinity");

		let config = Config::new().with(ThreadType::Foreground, saved.to_string());
		let Ok(manager) = NumaManager::new(&config) else {
			return;
		};

		let tid = sys::gettid();
		assert!(manager.bind_to_group(tid));

		let bound = sys::thread_affinity(sys::CURRENT_THREAD, topology.total_cpu_num)
			.expect("read own affinity");
		assert!(bound.is_subset(&topology.process_mask));
		assert!(!bound.is_empty());

		assert!(manager.unbind_from_group(tid));
		sys::set_thread_affinity(sys::CURRENT_THREAD, &saved).expect("restore affinity");
	}
}
