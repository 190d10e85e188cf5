use crate::cleanup::{CleanupRecord, CleanupReport};

/// Trait for reporting cleanup progress.
///
/// The CLI implements this with indicatif; library callers can use
/// `SilentReporter`. All methods have default no-op implementations.
pub trait CleanupReporter: Send + Sync {
    fn on_discovery_complete(&self, _sessions_found: usize, _reclaimable: usize) {}
    fn on_session_start(&self, _session_id: &str, _position: usize, _total: usize) {}
    fn on_session_complete(&self, _record: &CleanupRecord) {}
    fn on_run_complete(&self, _report: &CleanupReport) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl CleanupReporter for SilentReporter {}
