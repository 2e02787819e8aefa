//! Intra-process leader election
//!
//! Parallel members of one build group serialize shared side-effects (such
//! as pushing a common intermediate image) behind a group-scoped mutex. The
//! first entrant runs as leader; everyone after it runs as follower, one at
//! a time, and can cheaply no-op or re-check.
//!
//! Deliberately not a distributed primitive: all builds of a group execute
//! in this process.

use std::collections::HashSet;
use std::future::Future;

use tokio::sync::Mutex;

/// Role handed to the critical section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

impl Role {
    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader)
    }
}

/// Group-scoped leader election primitive
#[derive(Debug)]
pub struct Leader {
    id: String,
    led: Mutex<bool>,
    done: parking_lot::Mutex<HashSet<String>>,
}

impl Leader {
    pub fn new(id: impl Into<String>) -> Self {
        Leader {
            id: id.into(),
            led: Mutex::new(false),
            done: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    /// Claim a group-wide unit of work. Returns true for the first claimant
    /// only; later members use this inside the critical section to no-op on
    /// work the leader already performed.
    pub fn mark_done(&self, key: &str) -> bool {
        self.done.lock().insert(key.to_string())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run `f` inside the group critical section. The first caller gets
    /// `Role::Leader`; later callers block until the section is free and
    /// then run as `Role::Follower`.
    pub async fn run<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(Role) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut led = self.led.lock().await;
        let role = if *led {
            Role::Follower
        } else {
            *led = true;
            Role::Leader
        };
        // The lock is held across the closure so followers serialize
        // strictly after the leader finishes.
        f(role).await
    }
}
