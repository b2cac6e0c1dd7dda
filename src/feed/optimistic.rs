use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToggleKind {
    Like,
    Favorite,
}

/// What the viewer sees for one post: their own like/favorite and the count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewerState {
    pub liked: bool,
    pub favorited: bool,
    pub like_count: i64,
}

/// A local change that has been shown to the user but not yet confirmed.
#[derive(Debug, Clone)]
pub struct PendingToggle {
    pub post_id: String,
    pub kind: ToggleKind,
    /// Viewer state right before the optimistic change.
    pub prior: ViewerState,
    /// The value the user asked for.
    pub target: bool,
    /// Identifies this attempt. A result carrying another sequence belongs
    /// to an earlier attempt that already timed out.
    pub seq: u64,
    pub submitted_at: Instant,
}

/// Handed out by `try_begin`: what to write and which attempt it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleTicket {
    pub seq: u64,
    pub target: bool,
}

impl PendingToggle {
    /// Change to the like count this toggle is responsible for.
    pub fn like_delta(&self) -> i64 {
        match self.kind {
            ToggleKind::Like if self.target && !self.prior.liked => 1,
            ToggleKind::Like if !self.target && self.prior.liked => -1,
            _ => 0,
        }
    }
}

/// At most one in-flight write per (post, kind).
pub struct PendingToggleRegistry {
    toggles: HashMap<(String, ToggleKind), PendingToggle>,
    last_seq: u64,
}

impl Default for PendingToggleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingToggleRegistry {
    pub fn new() -> Self {
        Self {
            toggles: HashMap::new(),
            last_seq: 0,
        }
    }

    /// Register a toggle. Returns `None` if one is already in flight.
    pub fn try_begin(
        &mut self,
        post_id: &str,
        kind: ToggleKind,
        prior: ViewerState,
        target: bool,
    ) -> Option<ToggleTicket> {
        let key = (post_id.to_string(), kind);
        if self.toggles.contains_key(&key) {
            return None;
        }
        self.last_seq += 1;
        let seq = self.last_seq;
        self.toggles.insert(
            key,
            PendingToggle {
                post_id: post_id.to_string(),
                kind,
                prior,
                target,
                seq,
                submitted_at: Instant::now(),
            },
        );
        Some(ToggleTicket { seq, target })
    }

    /// Sequence of the most recently started toggle. Never reset.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn get(&self, post_id: &str, kind: ToggleKind) -> Option<&PendingToggle> {
        self.toggles.get(&(post_id.to_string(), kind))
    }

    pub fn is_pending(&self, post_id: &str, kind: ToggleKind) -> bool {
        self.toggles.contains_key(&(post_id.to_string(), kind))
    }

    fn take(&mut self, post_id: &str, kind: ToggleKind, seq: u64) -> Option<PendingToggle> {
        let key = (post_id.to_string(), kind);
        if self.toggles.get(&key)?.seq != seq {
            return None;
        }
        self.toggles.remove(&key)
    }

    /// The remote write of attempt `seq` succeeded.
    pub fn confirm(&mut self, post_id: &str, kind: ToggleKind, seq: u64) -> Option<PendingToggle> {
        self.take(post_id, kind, seq)
    }

    /// The remote write of attempt `seq` failed. Returns the toggle so the
    /// caller can undo it.
    pub fn rollback(&mut self, post_id: &str, kind: ToggleKind, seq: u64) -> Option<PendingToggle> {
        self.take(post_id, kind, seq)
    }

    /// Like-count delta still owed by an unconfirmed like toggle.
    pub fn like_delta(&self, post_id: &str) -> i64 {
        self.get(post_id, ToggleKind::Like)
            .map_or(0, PendingToggle::like_delta)
    }

    /// Remove and return all toggles older than `max_age`.
    pub fn expire_older_than(&mut self, max_age: Duration) -> Vec<PendingToggle> {
        let now = Instant::now();
        let expired: Vec<(String, ToggleKind)> = self
            .toggles
            .iter()
            .filter(|(_, t)| now.duration_since(t.submitted_at) > max_age)
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| self.toggles.remove(&key))
            .collect()
    }

    /// Remove and return everything, e.g. on sign-out.
    pub fn drain(&mut self) -> Vec<PendingToggle> {
        self.toggles.drain().map(|(_, t)| t).collect()
    }

    pub fn count(&self) -> usize {
        self.toggles.len()
    }
}
