pub mod config;
pub mod error;
pub mod manager;
pub mod mask;
pub mod result;
pub mod sys;
pub mod topology;

pub use ::tracing;
pub use config::{Config, ThreadType};
pub use error::Error;
pub use manager::{SchedAffinity, create_instance, free_instance, get_instance};
pub use mask::CpuMask;
pub use result::Result;
pub use sys::Tid;
pub use topology::Topology;
