//! Process-wide affinity manager: lifecycle, capability trait and the
//! NUMA/dummy variants behind it.

mod dummy;
mod group;
mod numa;
mod tests;

use std::sync::{Arc, RwLock};

pub use dummy::DummyManager;
pub use numa::NumaManager;
use tracing::{error, info, warn};

use crate::{
	config::{Config, ThreadType},
	sys,
	sys::Tid,
};

/// Capability set shared by the NUMA-backed manager and the dummy
/// fallback. All operations are safe to call from any thread; mutating
/// operations serialize on one internal mutex.
pub trait SchedAffinity: Send + Sync {
	/// Pin the calling thread to the least-loaded NUMA group and record
	/// `tid` as assigned there. A no-op success (registration only) while
	/// foreground scheduling is disabled.
	fn bind_to_group(&self, tid: Tid) -> bool;

	/// Forget a thread's group assignment. Bookkeeping only; the thread's
	/// kernel affinity is not reverted.
	fn unbind_from_group(&self, tid: Tid) -> bool;

	/// Register `tid` under a thread class and pin the calling thread to
	/// the class's fixed CPU set when one is configured.
	fn bind_to_target(&self, thread_type: ThreadType, tid: Tid) -> bool;

	/// Re-apply one class's entry from a new configuration, migrating
	/// already-bound threads to match.
	fn reschedule(&self, config: &Config, thread_type: ThreadType) -> bool;

	/// Write one `assigned/available; ` segment per group into `buff`,
	/// never growing it past `size`. A zero size is a silent no-op.
	fn take_snapshot(&self, buff: &mut String, size: usize);

	fn total_node_number(&self) -> i32;

	fn cpu_number_per_node(&self) -> i32;
}

static MANAGER: RwLock<Option<Arc<dyn SchedAffinity>>> = RwLock::new(None);

/// Construct and install the process-wide manager, destroying any prior
/// instance first. Falls back to the no-op [`DummyManager`] when the
/// kernel has no NUMA support. Returns None when parsing, validation or
/// the topology probe fails, leaving no instance installed.
pub fn create_instance(config: &Config) -> Option<Arc<dyn SchedAffinity>> {
	free_instance();

	let manager: Arc<dyn SchedAffinity> = if sys::numa_available() {
		match NumaManager::new(config) {
			| Ok(manager) => Arc::new(manager),
			| Err(error) => {
				error!("scheduling affinity initialization failed: {error}");
				return None;
			},
		}
	} else {
		warn!("NUMA is unavailable on this system");
		info!("using the dummy scheduling affinity manager");
		Arc::new(DummyManager)
	};

	MANAGER
		.write()
		.expect("locked")
		.replace(Arc::clone(&manager));

	Some(manager)
}

#[must_use]
pub fn get_instance() -> Option<Arc<dyn SchedAffinity>> {
	MANAGER.read().expect("locked").clone()
}

pub fn free_instance() { MANAGER.write().expect("locked").take(); }
