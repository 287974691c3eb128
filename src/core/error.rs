use std::fmt::Display;

use tracing::Level;

/// Everything the manager can fail with. Initialization aborts on the
/// first four; the placement paths convert these into boolean failures at
/// the public boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	// std
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
	#[error("{0}")]
	ParseInt(#[from] std::num::ParseIntError),

	// os
	#[error("affinity syscall failed: {0}")]
	Sys(#[from] nix::Error),

	// numabind
	#[error("cannot parse CPU string: {0}")]
	CpuString(String),
	#[error("unusable topology: {0}")]
	Topology(String),
	#[error("thread/process affinity conflict: {0}")]
	ProcessConflict(String),
	#[error("{0}")]
	State(String),
	#[error("{0}")]
	Err(String),
}

/// Construct an [`Error`] variant from format arguments, defaulting to
/// the catch-all `Err` variant when none is named.
#[macro_export]
macro_rules! err {
	($variant:ident($($args:tt)+)) => {
		$crate::error::Error::$variant(std::format!($($args)+))
	};

	($($args:tt)+) => {
		$crate::error::Error::Err(std::format!($($args)+))
	};
}

/// Shorthand for `Err(err!(..))`.
#[macro_export]
macro_rules! Err {
	($($args:tt)*) => {
		Err($crate::err!($($args)*))
	};
}

pub fn inspect_log_level<E: Display>(error: &E, level: Level) {
	if level == Level::ERROR {
		tracing::error!("{error}");
	} else if level == Level::WARN {
		tracing::warn!("{error}");
	} else if level == Level::INFO {
		tracing::info!("{error}");
	} else if level == Level::DEBUG {
		tracing::debug!("{error}");
	} else {
		tracing::trace!("{error}");
	}
}
