pub mod analysis;
pub mod archive;
pub mod cleanup;
pub mod config;
pub mod disk;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod paths;
pub mod progress;
pub mod registry;
pub mod scanner;
pub mod scheduler;
pub mod session;

pub use analysis::{EvictionCandidate, EvictionPrioritizer, EvictionReason, ScoringPolicy};
pub use archive::{ArchiveOutcome, ArchiveRecord, Archiver};
pub use cleanup::{CleanupExecutor, CleanupMode, CleanupRecord, CleanupReport, RecordStatus};
pub use config::{ScoringWeights, StorageConfig};
pub use disk::{DiskPressureMonitor, DiskProbe, DiskSnapshot, Fs2Probe, PressureLevel, VolumeStats};
pub use engine::{DueCleanup, StorageEngine};
pub use error::Error;
pub use monitor::{MonitoringLoop, TickOutcome};
pub use paths::PathAllocator;
pub use progress::{CleanupReporter, SilentReporter};
pub use registry::{ActiveSessions, LifecycleInfo, RegistrationResult, SessionRegistry};
pub use scanner::SessionDiscovery;
pub use scheduler::{CleanupScheduler, DueQueue, NoopScheduler};
pub use session::{Category, Session, SessionStatus};
