use std::collections::BTreeSet;

use crate::common::UserId;

/// Online-user set, fed by `users` snapshots and `user_joined` /
/// `user_left` deltas.
#[derive(Debug, Default, Clone)]
pub struct PresenceTracker {
    online: BTreeSet<UserId>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set. Sent by the server on every (re)connect.
    pub fn apply_snapshot<I>(&mut self, users: I)
    where
        I: IntoIterator<Item = UserId>,
    {
        self.online = users.into_iter().filter(|user| !user.is_empty()).collect();
        log::debug!("Presence snapshot: {} online", self.online.len());
    }

    pub fn apply_joined(&mut self, user: UserId) -> bool {
        if user.is_empty() {
            return false;
        }
        self.online.insert(user)
    }

    pub fn apply_left(&mut self, user: &str) -> bool {
        self.online.remove(user)
    }

    pub fn is_online(&self, user: &str) -> bool {
        self.online.contains(user)
    }

    pub fn online(&self) -> impl Iterator<Item = &UserId> {
        self.online.iter()
    }

    /// Online users other than `local_user`.
    pub fn others<'a>(&'a self, local_user: &'a str) -> impl Iterator<Item = &'a UserId> + 'a {
        self.online.iter().filter(move |user| user.as_str() != local_user)
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }

    pub fn clear(&mut self) {
        self.online.clear();
    }
}
