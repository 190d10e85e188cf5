pub mod discovery;
pub mod usage;

pub use discovery::SessionDiscovery;
pub use usage::{measure_dir, measure_dirs, DirUsage};
