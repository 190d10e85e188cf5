use crate::config::{ScoringWeights, StorageConfig};
use crate::session::{Session, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Why a session is being reclaimed. Declaration order is precedence order:
/// the first reason that applies to a session is its dominant reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    Oversized,
    Abandoned,
    AgeThreshold,
    Inactive,
    Empty,
    None,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Oversized => "oversized",
            EvictionReason::Abandoned => "abandoned",
            EvictionReason::AgeThreshold => "age_threshold",
            EvictionReason::Inactive => "inactive",
            EvictionReason::Empty => "empty",
            EvictionReason::None => "none",
        }
    }
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvictionCandidate {
    pub session: Session,
    pub score: u32,
    pub dominant_reason: EvictionReason,
    /// Size at scoring time. Not re-read during a run so ordering stays fixed.
    pub size_bytes: u64,
}

impl EvictionCandidate {
    pub fn is_reclaimable(&self) -> bool {
        self.dominant_reason != EvictionReason::None
    }
}

/// Inputs of the scoring function. Pure data: no clock, no filesystem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringPolicy {
    pub weights: ScoringWeights,
    pub cleanup_delay_hours: f64,
    pub max_session_bytes: u64,
    pub warn_session_bytes: u64,
}

impl ScoringPolicy {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            weights: config.weights,
            cleanup_delay_hours: config.cleanup_delay_hours,
            max_session_bytes: config.max_session_bytes,
            warn_session_bytes: config.warn_session_bytes,
        }
    }

    /// Sum of the independent factors, and the dominant reason. The sum
    /// saturates at `u32::MAX`.
    pub fn score(&self, session: &Session, now: DateTime<Utc>) -> (u32, EvictionReason) {
        let w = &self.weights;
        let age_hours = session.age_hours(now);
        let mut score = 0u32;

        let age_due = if age_hours > 2.0 * self.cleanup_delay_hours {
            score = score.saturating_add(w.age_overdue);
            true
        } else if age_hours >= self.cleanup_delay_hours {
            score = score.saturating_add(w.age_due);
            true
        } else {
            false
        };

        let oversized = if session.size_bytes > self.max_session_bytes {
            score = score.saturating_add(w.oversized);
            true
        } else {
            if session.size_bytes > self.warn_session_bytes {
                score = score.saturating_add(w.large);
            }
            false
        };

        let inactive = session.status != SessionStatus::Active;
        if inactive {
            score = score.saturating_add(w.inactive);
        }

        let abandoned = session.status == SessionStatus::Abandoned;
        if abandoned {
            score = score.saturating_add(w.abandoned);
        }

        // Only breaks ties between sessions nobody is using, so it never
        // outranks `inactive` as a reason.
        if inactive && session.file_count == 0 {
            score = score.saturating_add(w.empty);
        }

        let reason = if oversized {
            EvictionReason::Oversized
        } else if abandoned {
            EvictionReason::Abandoned
        } else if age_due {
            EvictionReason::AgeThreshold
        } else if inactive {
            EvictionReason::Inactive
        } else {
            EvictionReason::None
        };

        (score, reason)
    }
}

pub struct EvictionPrioritizer {
    policy: ScoringPolicy,
}

impl EvictionPrioritizer {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Score every session and order them for eviction: oversized sessions
    /// first, then score (highest first), then oldest creation time. Session
    /// id settles anything left so identical inputs always give the same order.
    pub fn prioritize(&self, sessions: Vec<Session>, now: DateTime<Utc>) -> Vec<EvictionCandidate> {
        let mut candidates: Vec<EvictionCandidate> = sessions
            .into_iter()
            .map(|session| {
                let (score, dominant_reason) = self.policy.score(&session, now);
                EvictionCandidate {
                    size_bytes: session.size_bytes,
                    session,
                    score,
                    dominant_reason,
                }
            })
            .collect();

        candidates.sort_by(compare_candidates);
        candidates
    }
}

fn compare_candidates(a: &EvictionCandidate, b: &EvictionCandidate) -> Ordering {
    let not_oversized = |c: &EvictionCandidate| c.dominant_reason != EvictionReason::Oversized;
    not_oversized(a)
        .cmp(&not_oversized(b))
        .then_with(|| b.score.cmp(&a.score))
        .then_with(|| a.session.created_at.cmp(&b.session.created_at))
        .then_with(|| a.session.id.cmp(&b.session.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GIB, MIB};
    use chrono::Duration;

    fn session(id: &str, age_hours: i64, size_bytes: u64, status: SessionStatus) -> Session {
        let now = Utc::now();
        Session {
            id: id.to_string(),
            created_at: now - Duration::hours(age_hours),
            last_accessed: now - Duration::hours(age_hours),
            operation_count: 0,
            status,
            categories: vec![],
            size_bytes,
            file_count: if size_bytes > 0 { 1 } else { 0 },
        }
    }

    fn prioritizer() -> EvictionPrioritizer {
        EvictionPrioritizer::new(ScoringPolicy::from_config(&StorageConfig::default()))
    }

    #[test]
    fn test_oversized_outranks_moderate_age() {
        let a = session("session-a", 20, 10 * 1_000_000, SessionStatus::Active);
        let b = session("session-b", 2, 1_200_000_000, SessionStatus::Active);

        let ranked = prioritizer().prioritize(vec![a, b], Utc::now());
        let ids: Vec<&str> = ranked.iter().map(|c| c.session.id.as_str()).collect();
        assert_eq!(ids, vec!["session-b", "session-a"]);
        assert_eq!(ranked[0].dominant_reason, EvictionReason::Oversized);
        assert_eq!(ranked[1].dominant_reason, EvictionReason::AgeThreshold);
    }

    #[test]
    fn test_factor_sums() {
        let policy = ScoringPolicy::from_config(&StorageConfig::default());
        let now = Utc::now();

        let fresh = session("session-fresh", 1, 100, SessionStatus::Active);
        assert_eq!(policy.score(&fresh, now), (0, EvictionReason::None));

        let due = session("session-due", 9, 100, SessionStatus::Idle);
        assert_eq!(policy.score(&due, now), (500 + 300, EvictionReason::AgeThreshold));

        let overdue = session("session-old", 20, 100, SessionStatus::Idle);
        assert_eq!(policy.score(&overdue, now), (1000 + 300, EvictionReason::AgeThreshold));

        let large = session("session-big", 1, 600 * MIB, SessionStatus::Active);
        assert_eq!(policy.score(&large, now), (200, EvictionReason::None));

        let huge = session("session-huge", 1, 2 * GIB, SessionStatus::Abandoned);
        assert_eq!(policy.score(&huge, now), (800 + 300 + 600, EvictionReason::Oversized));
    }

    #[test]
    fn test_abandoned_overrides_inactive_and_age() {
        let policy = ScoringPolicy::from_config(&StorageConfig::default());
        let s = session("session-gone", 30, 100, SessionStatus::Abandoned);
        assert_eq!(
            policy.score(&s, Utc::now()),
            (1000 + 300 + 600, EvictionReason::Abandoned)
        );
    }

    #[test]
    fn test_empty_only_applies_to_unused_sessions() {
        let policy = ScoringPolicy::from_config(&StorageConfig::default());
        let now = Utc::now();

        let active_empty = session("session-new1", 1, 0, SessionStatus::Active);
        assert_eq!(policy.score(&active_empty, now), (0, EvictionReason::None));

        let mut idle_empty = session("session-idle", 1, 0, SessionStatus::Idle);
        idle_empty.file_count = 0;
        assert_eq!(policy.score(&idle_empty, now), (300 + 100, EvictionReason::Inactive));
    }

    #[test]
    fn test_ties_broken_by_oldest_first() {
        let now = Utc::now();
        let mut older = session("session-zz", 10, 100, SessionStatus::Idle);
        let mut newer = session("session-aa", 10, 100, SessionStatus::Idle);
        older.created_at = now - Duration::hours(10) - Duration::minutes(5);
        newer.created_at = now - Duration::hours(10);

        let ranked = prioritizer().prioritize(vec![newer, older], now);
        assert_eq!(ranked[0].session.id, "session-zz");
        assert_eq!(ranked[0].score, ranked[1].score);
    }

    #[test]
    fn test_prioritize_is_deterministic() {
        let now = Utc::now();
        let sessions = vec![
            session("session-1", 1, 100, SessionStatus::Active),
            session("session-2", 9, 0, SessionStatus::Idle),
            session("session-3", 20, 700 * MIB, SessionStatus::Idle),
            session("session-4", 3, 100, SessionStatus::Abandoned),
        ];
        let reversed: Vec<Session> = sessions.iter().rev().cloned().collect();

        let p = prioritizer();
        let a: Vec<String> = p.prioritize(sessions, now).into_iter().map(|c| c.session.id).collect();
        let b: Vec<String> = p.prioritize(reversed, now).into_iter().map(|c| c.session.id).collect();
        assert_eq!(a, b);
        assert_eq!(a, vec!["session-3", "session-2", "session-4", "session-1"]);
    }

    #[test]
    fn test_fresh_abandoned_does_not_jump_stale_idle() {
        let now = Utc::now();
        let fresh = session("session-other", 0, 100, SessionStatus::Abandoned);
        let stale = session("session-stale", 20, 100, SessionStatus::Idle);

        let ranked = prioritizer().prioritize(vec![fresh, stale], now);
        assert_eq!(ranked[0].session.id, "session-stale");
        assert_eq!(ranked[0].score, 1000 + 300);
        assert_eq!(ranked[1].score, 600 + 300);
        assert_eq!(ranked[1].dominant_reason, EvictionReason::Abandoned);
    }

    #[test]
    fn test_oversized_precedes_higher_scores() {
        let now = Utc::now();
        let huge = session("session-huge", 1, 2 * GIB, SessionStatus::Active);
        let gone = session("session-gone", 30, 100, SessionStatus::Abandoned);

        let ranked = prioritizer().prioritize(vec![gone, huge], now);
        assert_eq!(ranked[0].session.id, "session-huge");
        assert!(ranked[0].score < ranked[1].score);
    }

    #[test]
    fn test_empty_is_never_the_dominant_reason() {
        let policy = ScoringPolicy::from_config(&StorageConfig::default());
        let now = Utc::now();
        for status in [SessionStatus::Active, SessionStatus::Idle, SessionStatus::Abandoned] {
            let (_, reason) = policy.score(&session("session-empty", 1, 0, status), now);
            assert_ne!(reason, EvictionReason::Empty);
        }
    }

    #[test]
    fn test_huge_weights_saturate() {
        let mut config = StorageConfig::default();
        config.weights.age_overdue = u32::MAX;
        config.weights.abandoned = u32::MAX;
        let policy = ScoringPolicy::from_config(&config);
        let s = session("session-gone", 30, 100, SessionStatus::Abandoned);
        assert_eq!(policy.score(&s, Utc::now()), (u32::MAX, EvictionReason::Abandoned));

        let ranked = EvictionPrioritizer::new(policy)
            .prioritize(vec![s, session("session-idle", 30, 100, SessionStatus::Idle)], Utc::now());
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn test_weights_are_configurable() {
        let mut config = StorageConfig::default();
        config.weights.abandoned = 0;
        config.weights.inactive = 0;
        let policy = ScoringPolicy::from_config(&config);
        let s = session("session-gone", 1, 100, SessionStatus::Abandoned);
        assert_eq!(policy.score(&s, Utc::now()), (0, EvictionReason::Abandoned));
    }
}
