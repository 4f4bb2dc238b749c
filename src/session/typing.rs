//! Typing indicators for direct conversations.
//!
//! Local side: one `is_typing: true` frame when a burst of keystrokes starts
//! and one `is_typing: false` frame when it ends (idle timeout, send, draft
//! cleared, or conversation switched). Remote side: per-peer flag with a
//! local expiry in case the peer never sends the "stopped" frame.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::common::UserId;

pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_secs(3);
pub const DEFAULT_REMOTE_TYPING_TIMEOUT: Duration = Duration::from_secs(6);

/// A typing frame that should go out to `peer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingSignal {
    pub peer: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone)]
struct LocalTyping {
    peer: UserId,
    idle_at: Instant,
}

#[derive(Debug)]
pub struct TypingCoordinator {
    idle_after: Duration,
    remote_timeout: Duration,
    local: Option<LocalTyping>,
    remote: HashMap<UserId, Instant>,
}

impl Default for TypingCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_IDLE, DEFAULT_REMOTE_TYPING_TIMEOUT)
    }
}

impl TypingCoordinator {
    pub fn new(idle_after: Duration, remote_timeout: Duration) -> Self {
        Self {
            idle_after,
            remote_timeout,
            local: None,
            remote: HashMap::new(),
        }
    }

    pub fn is_typing_to(&self, peer: &str) -> bool {
        self.local.as_ref().is_some_and(|local| local.peer == peer)
    }

    /// A keystroke in the draft for `peer`.
    pub fn keystroke(&mut self, peer: &str, now: Instant) -> Vec<TypingSignal> {
        let idle_at = now + self.idle_after;
        match &mut self.local {
            Some(local) if local.peer == peer => {
                local.idle_at = idle_at;
                Vec::new()
            }
            _ => {
                let mut signals: Vec<TypingSignal> = self.stop().into_iter().collect();
                self.local = Some(LocalTyping {
                    peer: peer.to_string(),
                    idle_at,
                });
                signals.push(TypingSignal {
                    peer: peer.to_string(),
                    is_typing: true,
                });
                signals
            }
        }
    }

    /// End the local burst, if any.
    pub fn stop(&mut self) -> Option<TypingSignal> {
        self.local.take().map(|local| TypingSignal {
            peer: local.peer,
            is_typing: false,
        })
    }

    /// Record a typing frame from `peer`.
    pub fn remote_update(&mut self, peer: &str, is_typing: bool, now: Instant) {
        if is_typing {
            self.remote.insert(peer.to_string(), now + self.remote_timeout);
        } else {
            self.remote.remove(peer);
        }
    }

    /// A message from `peer` ends their typing burst.
    pub fn remote_message(&mut self, peer: &str) {
        self.remote.remove(peer);
    }

    pub fn is_peer_typing(&self, peer: &str) -> bool {
        self.remote.contains_key(peer)
    }

    pub fn typing_peers(&self) -> impl Iterator<Item = &UserId> {
        self.remote.keys()
    }

    /// Expire deadlines that passed. Returns the local stop signal if the
    /// idle timeout fired.
    pub fn poll(&mut self, now: Instant) -> Option<TypingSignal> {
        self.remote.retain(|peer, expires_at| {
            let keep = *expires_at > now;
            if !keep {
                log::debug!("Typing indicator for {peer} timed out");
            }
            keep
        });

        match &self.local {
            Some(local) if local.idle_at <= now => self.stop(),
            _ => None,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let local = self.local.as_ref().map(|local| local.idle_at);
        local.into_iter().chain(self.remote.values().copied()).min()
    }

    pub fn clear(&mut self) {
        self.local = None;
        self.remote.clear();
    }
}
