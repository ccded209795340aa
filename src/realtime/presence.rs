//! Presence Tracker
//!
//! Online/offline state per user across arbitrarily many concurrent
//! sessions. The state is an active-session count, never a boolean; status
//! changes are reported only on 0<->1 transitions of that count, so a user
//! with several devices never flaps while at least one stays connected.

use dashmap::DashMap;

use crate::infrastructure::metrics;

/// Reference-counted presence state per user.
pub struct PresenceTracker {
    active_sessions: DashMap<i64, usize>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            active_sessions: DashMap::new(),
        }
    }

    /// Record a session coming up for the user.
    ///
    /// Returns `true` only when the user transitioned offline -> online
    /// (active-session count 0 -> 1); the caller broadcasts `user:status`
    /// exactly then.
    pub fn session_up(&self, user_id: i64) -> bool {
        let mut count = self.active_sessions.entry(user_id).or_insert(0);
        *count += 1;
        let became_online = *count == 1;
        drop(count);

        if became_online {
            metrics::ONLINE_USERS.inc();
            tracing::debug!(user_id, "User came online");
        }
        became_online
    }

    /// Record a session going down for the user.
    ///
    /// The count is decremented first and the check runs on the result, so
    /// a user with two live sessions does not appear offline on the first
    /// disconnect. Returns `true` only on the online -> offline transition.
    pub fn session_down(&self, user_id: i64) -> bool {
        let became_offline = match self.active_sessions.get_mut(&user_id) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => {
                tracing::warn!(user_id, "Session down for untracked user");
                return false;
            }
        };

        if became_offline {
            // A session_up may have revived the entry since the guard
            // dropped; only remove it while the count is still zero.
            self.active_sessions.remove_if(&user_id, |_, count| *count == 0);
            metrics::ONLINE_USERS.dec();
            tracing::debug!(user_id, "User went offline");
        }
        became_offline
    }

    /// Whether the user has at least one active session.
    pub fn is_online(&self, user_id: i64) -> bool {
        self.active_sessions
            .get(&user_id)
            .map(|count| *count > 0)
            .unwrap_or(false)
    }

    /// Users currently online.
    pub fn online_users(&self) -> Vec<i64> {
        self.active_sessions
            .iter()
            .filter(|entry| *entry.value() > 0)
            .map(|entry| *entry.key())
            .collect()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_session_transitions_to_online() {
        let presence = PresenceTracker::new();
        assert!(presence.session_up(1));
        assert!(presence.is_online(1));
    }

    #[test]
    fn second_session_produces_no_transition() {
        let presence = PresenceTracker::new();
        assert!(presence.session_up(1));
        assert!(!presence.session_up(1));
        assert!(presence.is_online(1));
    }

    #[test]
    fn only_last_disconnect_transitions_to_offline() {
        let presence = PresenceTracker::new();
        presence.session_up(1);
        presence.session_up(1);

        assert!(!presence.session_down(1));
        assert!(presence.is_online(1));

        assert!(presence.session_down(1));
        assert!(!presence.is_online(1));
    }

    #[test]
    fn quick_reconnect_does_not_flap() {
        let presence = PresenceTracker::new();
        presence.session_up(1);
        // Second device connects before the first disconnects.
        presence.session_up(1);
        assert!(!presence.session_down(1));
        assert!(presence.is_online(1));
    }

    #[test]
    fn session_down_for_unknown_user_is_a_noop() {
        let presence = PresenceTracker::new();
        assert!(!presence.session_down(42));
    }

    #[test]
    fn concurrent_churn_never_loses_transitions() {
        use std::sync::Arc;

        let presence = Arc::new(PresenceTracker::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let presence = Arc::clone(&presence);
                std::thread::spawn(move || {
                    let mut online = 0usize;
                    let mut offline = 0usize;
                    for _ in 0..20_000 {
                        if presence.session_up(1) {
                            online += 1;
                        }
                        if presence.session_down(1) {
                            offline += 1;
                        }
                    }
                    (online, offline)
                })
            })
            .collect();

        let (online, offline) = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .fold((0, 0), |acc, (up, down)| (acc.0 + up, acc.1 + down));

        // Every observed online edge must be matched by an offline edge
        // once all sessions are gone.
        assert_eq!(online, offline);
        assert!(!presence.is_online(1));
    }

    #[test]
    fn online_users_lists_only_active() {
        let presence = PresenceTracker::new();
        presence.session_up(1);
        presence.session_up(2);
        presence.session_down(2);

        assert_eq!(presence.online_users(), vec![1]);
    }
}
