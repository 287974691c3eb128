use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::{Error, err};

/// Closed set of thread classes subject to affinity policy. `Foreground`
/// threads are placed dynamically by load; every other class is pinned to
/// its configured CPU set.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ThreadType {
	Foreground,
	LogWriter,
	LogFlusher,
	LogWriteNotifier,
	LogFlushNotifier,
	LogCloser,
	LogCheckpointer,
	PurgeCoordinator,
}

impl ThreadType {
	pub const ALL: [Self; 8] = [
		Self::Foreground,
		Self::LogWriter,
		Self::LogFlusher,
		Self::LogWriteNotifier,
		Self::LogFlushNotifier,
		Self::LogCloser,
		Self::LogCheckpointer,
		Self::PurgeCoordinator,
	];

	#[inline]
	#[must_use]
	pub fn is_background(self) -> bool { self != Self::Foreground }

	#[must_use]
	pub fn name(self) -> &'static str {
		match self {
			| Self::Foreground => "foreground",
			| Self::LogWriter => "log_writer",
			| Self::LogFlusher => "log_flusher",
			| Self::LogWriteNotifier => "log_write_notifier",
			| Self::LogFlushNotifier => "log_flush_notifier",
			| Self::LogCloser => "log_closer",
			| Self::LogCheckpointer => "log_checkpointer",
			| Self::PurgeCoordinator => "purge_coordinator",
		}
	}
}

impl fmt::Display for ThreadType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

impl FromStr for ThreadType {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Error> {
		Self::ALL
			.into_iter()
			.find(|thread_type| thread_type.name() == s)
			.ok_or_else(|| err!("unknown thread class {s:?}"))
	}
}

/// Per-class CPU range strings. A class without an entry is exempt from
/// affinity management; a class with an entry must carry a string in the
/// comma-range grammar accepted by [`crate::CpuMask::parse`].
#[derive(Clone, Debug, Default)]
pub struct Config {
	ranges: BTreeMap<ThreadType, String>,
}

impl Config {
	#[must_use]
	pub fn new() -> Self { Self::default() }

	#[must_use]
	pub fn with<S: Into<String>>(mut self, thread_type: ThreadType, range: S) -> Self {
		self.set(thread_type, range);
		self
	}

	pub fn set<S: Into<String>>(&mut self, thread_type: ThreadType, range: S) {
		self.ranges.insert(thread_type, range.into());
	}

	pub fn unset(&mut self, thread_type: ThreadType) { self.ranges.remove(&thread_type); }

	#[must_use]
	pub fn get(&self, thread_type: ThreadType) -> Option<&str> {
		self.ranges.get(&thread_type).map(String::as_str)
	}
}

#[cfg(test)]
mod tests {
	use super::{Config, ThreadType};

	#[test]
	fn names_round_trip() {
		for thread_type in ThreadType::ALL {
			assert_eq!(thread_type.name().parse::<ThreadType>().expect("known name"), thread_type);
		}

		assert!("log-writer".parse::<ThreadType>().is_err());
		assert!("".parse::<ThreadType>().is_err());
	}

	#[test]
	fn only_foreground_serves_connections() {
		assert!(!ThreadType::Foreground.is_background());
		assert!(ThreadType::ALL.into_iter().filter(|t| t.is_background()).count() == 7);
	}

	#[test]
	fn unset_classes_are_absent() {
		let mut config = Config::new().with(ThreadType::Foreground, "0-3");
		assert_eq!(config.get(ThreadType::Foreground), Some("0-3"));
		assert_eq!(config.get(ThreadType::LogWriter), None);

		config.unset(ThreadType::Foreground);
		assert_eq!(config.get(ThreadType::Foreground), None);
	}
}
