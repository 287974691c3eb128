pub(crate) mod clap;
mod logging;

use std::{
	sync::{Arc, Barrier},
	thread,
};

use numabind_core::{Err, Result, SchedAffinity, manager, sys};
use tracing::{error, info, warn};

const WORKER_NAME: &str = "numabind:fg";
const SNAPSHOT_SIZE: usize = 1024;

fn main() -> Result {
	let args = clap::parse();
	logging::init(&args)?;

	let config = args.config();
	let Some(instance) = manager::create_instance(&config) else {
		return Err!("refusing to start with an unusable affinity configuration");
	};

	info!(
		nodes = instance.total_node_number(),
		cpus_per_node = instance.cpu_number_per_node(),
		"affinity manager ready"
	);

	if let Some(role) = args.role {
		let tid = sys::gettid();
		if instance.bind_to_target(role, tid) {
			info!(%role, %tid, cpu = ?sys::getcpu().ok(), "main thread pinned");
		} else {
			warn!(%role, %tid, "static bind failed");
		}
	}

	sample_foreground(&instance, args.threads)?;

	manager::free_instance();
	Ok(())
}

/// Run `count` short-lived worker threads through the dynamic placer and
/// report where each one landed, then the group occupancy.
fn sample_foreground(instance: &Arc<dyn SchedAffinity>, count: usize) -> Result {
	let barrier = Arc::new(Barrier::new(count.saturating_add(1)));

	let workers: Vec<_> = (0..count)
		.map(|index| {
			let barrier = Arc::clone(&barrier);
			thread::Builder::new()
				.name(WORKER_NAME.into())
				.spawn(move || worker(index, &barrier))
		})
		.collect::<Result<_, _>>()?;

	// all workers are placed once the barrier opens
	barrier.wait();

	let mut occupancy = String::new();
	instance.take_snapshot(&mut occupancy, SNAPSHOT_SIZE);
	info!(%occupancy, "assigned/available threads per group");

	barrier.wait();
	for worker in workers {
		if let Err(panic) = worker.join() {
			error!("worker panicked: {panic:?}");
		}
	}

	Ok(())
}

fn worker(index: usize, barrier: &Barrier) {
	let tid = sys::gettid();
	let instance = manager::get_instance().expect("instance installed");

	let bound = instance.bind_to_group(tid);
	info!(index, %tid, bound, cpu = ?sys::getcpu().ok(), "foreground worker placed");

	barrier.wait();
	barrier.wait();

	if bound && !instance.unbind_from_group(tid) {
		warn!(index, %tid, "worker was not registered at exit");
	}
}
