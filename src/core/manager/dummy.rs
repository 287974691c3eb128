use super::SchedAffinity;
use crate::{
	config::{Config, ThreadType},
	sys::Tid,
};

/// No-op manager installed when the kernel has no NUMA support. Every
/// operation succeeds without touching thread affinities; the counts
/// report a negative sentinel.
#[derive(Clone, Copy, Debug, Default)]
pub struct DummyManager;

impl SchedAffinity for DummyManager {
	fn bind_to_group(&self, _tid: Tid) -> bool { true }

	fn unbind_from_group(&self, _tid: Tid) -> bool { true }

	fn bind_to_target(&self, _thread_type: ThreadType, _tid: Tid) -> bool { true }

	fn reschedule(&self, _config: &Config, _thread_type: ThreadType) -> bool { true }

	fn take_snapshot(&self, buff: &mut String, size: usize) {
		if size > 0 {
			buff.clear();
		}
	}

	fn total_node_number(&self) -> i32 { -1 }

	fn cpu_number_per_node(&self) -> i32 { -1 }
}
