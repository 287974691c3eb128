//! Integration with `clap`

use clap::Parser;
use numabind_core::{Config, ThreadType};

/// Commandline arguments
#[derive(Parser, Debug)]
#[clap(about, long_about = None)]
pub(crate) struct Args {
	/// CPU list for connection-serving worker threads, e.g. "0-3,8-11"
	#[arg(long, value_name = "CPULIST")]
	pub(crate) foreground: Option<String>,

	/// CPU list for the log writer
	#[arg(long, value_name = "CPULIST")]
	pub(crate) log_writer: Option<String>,

	/// CPU list for the log flusher
	#[arg(long, value_name = "CPULIST")]
	pub(crate) log_flusher: Option<String>,

	/// CPU list for the log write notifier
	#[arg(long, value_name = "CPULIST")]
	pub(crate) log_write_notifier: Option<String>,

	/// CPU list for the log flush notifier
	#[arg(long, value_name = "CPULIST")]
	pub(crate) log_flush_notifier: Option<String>,

	/// CPU list for the log closer
	#[arg(long, value_name = "CPULIST")]
	pub(crate) log_closer: Option<String>,

	/// CPU list for the log checkpointer
	#[arg(long, value_name = "CPULIST")]
	pub(crate) log_checkpointer: Option<String>,

	/// CPU list for the purge coordinator
	#[arg(long, value_name = "CPULIST")]
	pub(crate) purge_coordinator: Option<String>,

	/// Background class to pin the main thread to before sampling
	#[arg(long, value_name = "CLASS")]
	pub(crate) role: Option<ThreadType>,

	/// Number of sample foreground threads to place
	#[arg(long, default_value_t = 4)]
	pub(crate) threads: usize,

	/// Log level/filter directives
	#[arg(long, env = "NUMABIND_LOG", default_value = "info")]
	pub(crate) log: String,
}

impl Args {
	/// Collect the per-class CPU lists into the manager's configuration.
	pub(crate) fn config(&self) -> Config {
		let classes = [
			(ThreadType::Foreground, &self.foreground),
			(ThreadType::LogWriter, &self.log_writer),
			(ThreadType::LogFlusher, &self.log_flusher),
			(ThreadType::LogWriteNotifier, &self.log_write_notifier),
			(ThreadType::LogFlushNotifier, &self.log_flush_notifier),
			(ThreadType::LogCloser, &self.log_closer),
			(ThreadType::LogCheckpointer, &self.log_checkpointer),
			(ThreadType::PurgeCoordinator, &self.purge_coordinator),
		];

		let mut config = Config::new();
		for (thread_type, range) in classes {
			if let Some(range) = range {
				config.set(thread_type, range.clone());
			}
		}

		config
	}
}

/// Parse commandline arguments into structured data
#[must_use]
pub(crate) fn parse() -> Args { Args::parse() }
