pub mod priority;

pub use priority::{EvictionCandidate, EvictionPrioritizer, EvictionReason, ScoringPolicy};
