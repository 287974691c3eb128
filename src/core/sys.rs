//! Thread ids, affinity syscalls and sysfs topology queries.

use std::path::PathBuf;

pub use nix::unistd::Pid;

use crate::{Result, mask::CpuMask};

/// OS thread id as understood by the affinity syscalls.
pub type Tid = Pid;

/// Tid addressing the calling thread.
pub const CURRENT_THREAD: Tid = Pid::from_raw(0);

/// Id of the calling OS thread.
#[cfg(target_os = "linux")]
#[inline]
#[must_use]
pub fn gettid() -> Tid { nix::unistd::gettid() }

#[cfg(not(target_os = "linux"))]
#[inline]
#[must_use]
pub fn gettid() -> Tid { Pid::this() }

/// Whether the kernel exposes a NUMA topology for this process to use.
#[must_use]
pub fn numa_available() -> bool {
	cfg!(target_os = "linux") && std::path::Path::new("/sys/devices/system/node/online").exists()
}

/// Pin `tid` to the CPUs set in `mask`. A tid of zero addresses the
/// calling thread.
#[cfg(target_os = "linux")]
pub fn set_thread_affinity(tid: Tid, mask: &CpuMask) -> Result {
	use nix::sched::{CpuSet, sched_setaffinity};

	let mut set = CpuSet::new();
	for id in mask.iter() {
		set.set(id)?;
	}

	sched_setaffinity(tid, &set)?;
	Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_thread_affinity(_tid: Tid, _mask: &CpuMask) -> Result {
	Err(crate::Error::Io(std::io::ErrorKind::Unsupported.into()))
}

/// Read back the kernel affinity of `tid` as a mask of the given width.
#[cfg(target_os = "linux")]
pub fn thread_affinity(tid: Tid, total_cpu_num: usize) -> Result<CpuMask> {
	use nix::sched::sched_getaffinity;

	let set = sched_getaffinity(tid)?;
	let mut mask = CpuMask::new(total_cpu_num);
	for id in 0..total_cpu_num {
		if matches!(set.is_set(id), Ok(true)) {
			mask.set(id);
		}
	}

	Ok(mask)
}

#[cfg(not(target_os = "linux"))]
pub fn thread_affinity(_tid: Tid, _total_cpu_num: usize) -> Result<CpuMask> {
	Err(crate::Error::Io(std::io::ErrorKind::Unsupported.into()))
}

/// CPU the calling thread is executing on. The value is only a hint; it
/// can change on the instruction boundary trailing its own acquisition.
#[cfg(target_os = "linux")]
pub fn getcpu() -> Result<usize> {
	// SAFETY: trivial libc call; returns the current cpu id or -1.
	let ret: i32 = unsafe { libc::sched_getcpu() };
	if ret < 0 {
		return Err(nix::Error::last().into());
	}

	Ok(usize::try_from(ret).expect("non-negative cpu id"))
}

#[cfg(not(target_os = "linux"))]
pub fn getcpu() -> Result<usize> {
	Err(crate::Error::Io(std::io::ErrorKind::Unsupported.into()))
}

/// Number of CPUs configured on the machine, online or not.
#[cfg(target_os = "linux")]
pub fn configured_cpus() -> Result<usize> {
	id_list_max(&std::fs::read_to_string("/sys/devices/system/cpu/present")?).map(|max| max + 1)
}

#[cfg(not(target_os = "linux"))]
pub fn configured_cpus() -> Result<usize> {
	Err(crate::Error::Io(std::io::ErrorKind::Unsupported.into()))
}

/// Number of NUMA nodes configured on the machine.
#[cfg(target_os = "linux")]
pub fn configured_nodes() -> Result<usize> {
	id_list_max(&std::fs::read_to_string("/sys/devices/system/node/online")?).map(|max| max + 1)
}

#[cfg(not(target_os = "linux"))]
pub fn configured_nodes() -> Result<usize> {
	Err(crate::Error::Io(std::io::ErrorKind::Unsupported.into()))
}

/// CPUs attached to a node, or None when the kernel does not expose the
/// node's cpulist.
#[cfg(target_os = "linux")]
pub fn node_cpus(node: usize, total_cpu_num: usize) -> Result<Option<CpuMask>> {
	let path = node_path(node, "cpulist");
	if !path.exists() {
		return Ok(None);
	}

	let text = std::fs::read_to_string(path)?;
	let text = text.trim_end();
	if text.is_empty() {
		return Ok(Some(CpuMask::new(total_cpu_num)));
	}

	CpuMask::parse(text, total_cpu_num).map(Some)
}

#[cfg(not(target_os = "linux"))]
pub fn node_cpus(_node: usize, _total_cpu_num: usize) -> Result<Option<CpuMask>> { Ok(None) }

/// Highest id in a sysfs id list such as "0-7" or "0-3,8-11".
#[cfg(target_os = "linux")]
fn id_list_max(text: &str) -> Result<usize> {
	use crate::err;

	let mut max: Option<usize> = None;
	for token in text.trim_end().split(',') {
		let hi = match token.split_once('-') {
			| None => token.parse()?,
			| Some((_, hi)) => hi.parse()?,
		};
		max = Some(max.map_or(hi, |max| max.max(hi)));
	}

	max.ok_or_else(|| err!(Topology("empty sysfs id list")))
}

#[cfg(target_os = "linux")]
fn node_path(id: usize, suffix: &str) -> PathBuf {
	format!("/sys/devices/system/node/node{id}/{suffix}").into()
}
