use super::optimistic::{PendingToggle, PendingToggleRegistry, ToggleKind, ToggleTicket, ViewerState};
use super::query::FeedQuery;
use crate::backend::realtime::{ChangeEvent, ChangeKind};
use crate::backend::types::{Post, PostStatus};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Which rows a list is allowed to hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListScope {
    /// Published posts from everyone.
    Published,
    /// Every post by one author, drafts included.
    Author(String),
    /// The viewer's favorites. Membership comes from the favorites table,
    /// so post inserts never add to it.
    Favorites,
}

impl ListScope {
    fn admits(&self, post: &Post) -> bool {
        match self {
            ListScope::Published => post.status == PostStatus::Published,
            ListScope::Author(id) => &post.author_id == id,
            ListScope::Favorites => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Feed,
    Mine,
    Favorites,
}

/// Fetched posts for one screen, kept in sync with the change feed.
#[derive(Debug, Clone)]
pub struct PostList {
    scope: ListScope,
    posts: Vec<Post>,
}

impl PostList {
    pub fn new(scope: ListScope) -> Self {
        Self {
            scope,
            posts: Vec::new(),
        }
    }

    pub fn scope(&self) -> &ListScope {
        &self.scope
    }

    pub fn replace(&mut self, posts: Vec<Post>) {
        self.posts = posts;
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn get(&self, post_id: &str) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == post_id)
    }

    pub fn contains(&self, post_id: &str) -> bool {
        self.get(post_id).is_some()
    }

    pub fn remove(&mut self, post_id: &str) -> Option<Post> {
        let idx = self.posts.iter().position(|p| p.id == post_id)?;
        Some(self.posts.remove(idx))
    }

    /// Put a post at the front unless it is already present.
    pub fn prepend(&mut self, post: Post) -> bool {
        if self.contains(&post.id) {
            return false;
        }
        self.posts.insert(0, post);
        true
    }

    /// Replace a present post in place. Change-feed records carry no embedded
    /// author, so the one from the original fetch is kept.
    fn replace_in_place(&mut self, mut post: Post) -> bool {
        let Some(slot) = self.posts.iter_mut().find(|p| p.id == post.id) else {
            return false;
        };
        if post.author.is_none() {
            post.author = slot.author.take();
        }
        *slot = post;
        true
    }

    /// Apply one change-feed event. Returns true if the list changed.
    pub fn apply_change(&mut self, change: &ChangeEvent) -> bool {
        if change.table != "posts" {
            return false;
        }
        match change.kind {
            ChangeKind::Delete => change.row_id().is_some_and(|id| self.remove(id).is_some()),
            ChangeKind::Insert | ChangeKind::Update => {
                let post: Post = match change.record_as() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(topic = %change.topic, "skipping change: {:#}", e);
                        return false;
                    }
                };
                if self.contains(&post.id) {
                    if self.scope.admits(&post) {
                        self.replace_in_place(post)
                    } else {
                        self.remove(&post.id).is_some()
                    }
                } else if self.scope != ListScope::Favorites && self.scope.admits(&post) {
                    self.prepend(post)
                } else {
                    false
                }
            }
        }
    }

    pub fn view(&self, query: &FeedQuery) -> Vec<&Post> {
        query.apply(&self.posts)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToggleRejected {
    #[error("post {0} is not loaded")]
    UnknownPost(String),
    #[error("an update for post {0} is already in flight")]
    AlreadyPending(String),
}

/// Per-post viewer data as last reported by the server.
#[derive(Debug, Clone, Copy, Default)]
struct ViewerEntry {
    liked: bool,
    favorited: bool,
    /// Like count from the last fetch or change event.
    server_count: i64,
    /// `last_seq` of the pending registry when `server_count` was reported.
    /// A report newer than a toggle may already include that toggle.
    reported_after: u64,
}

/// Every list the viewer has open, plus the viewer's per-post state shared
/// across them. A like made from the feed shows up on the favorites screen too.
///
/// Displayed like counts are the server count plus the delta of a like that is
/// still in flight, so a count is never adjusted twice for the same toggle.
pub struct Library {
    pub feed: PostList,
    pub mine: PostList,
    pub favorites: PostList,
    viewer: HashMap<String, ViewerEntry>,
    pending: PendingToggleRegistry,
}

impl Library {
    pub fn new(user_id: &str) -> Self {
        Self {
            feed: PostList::new(ListScope::Published),
            mine: PostList::new(ListScope::Author(user_id.to_string())),
            favorites: PostList::new(ListScope::Favorites),
            viewer: HashMap::new(),
            pending: PendingToggleRegistry::new(),
        }
    }

    pub fn list(&self, kind: ListKind) -> &PostList {
        match kind {
            ListKind::Feed => &self.feed,
            ListKind::Mine => &self.mine,
            ListKind::Favorites => &self.favorites,
        }
    }

    pub fn list_mut(&mut self, kind: ListKind) -> &mut PostList {
        match kind {
            ListKind::Feed => &mut self.feed,
            ListKind::Mine => &mut self.mine,
            ListKind::Favorites => &mut self.favorites,
        }
    }

    fn lists_mut(&mut self) -> [&mut PostList; 3] {
        [&mut self.feed, &mut self.mine, &mut self.favorites]
    }

    /// Store a server-reported like count.
    fn record_count(&mut self, post_id: &str, count: i64) {
        let seq = self.pending.last_seq();
        let entry = self.viewer.entry(post_id.to_string()).or_default();
        entry.server_count = count;
        entry.reported_after = seq;
    }

    /// Replace a list with fresh rows and seed viewer state from the
    /// viewer's like/favorite sets. Unconfirmed toggles keep their local value.
    pub fn load(&mut self, kind: ListKind, posts: Vec<Post>, liked: &HashSet<String>, favorited: &HashSet<String>) {
        for post in &posts {
            let like_pending = self.pending.is_pending(&post.id, ToggleKind::Like);
            let fav_pending = self.pending.is_pending(&post.id, ToggleKind::Favorite);
            self.record_count(&post.id, post.likes_count);
            let entry = self.viewer.entry(post.id.clone()).or_default();
            if !like_pending {
                entry.liked = liked.contains(&post.id);
            }
            if !fav_pending {
                entry.favorited = favorited.contains(&post.id);
            }
        }
        self.list_mut(kind).replace(posts);
    }

    pub fn viewer(&self, post_id: &str) -> ViewerState {
        let entry = self.viewer.get(post_id).copied().unwrap_or_default();
        ViewerState {
            liked: entry.liked,
            favorited: entry.favorited,
            like_count: (entry.server_count + self.pending.like_delta(post_id)).max(0),
        }
    }

    pub fn find_post(&self, post_id: &str) -> Option<&Post> {
        self.feed
            .get(post_id)
            .or_else(|| self.mine.get(post_id))
            .or_else(|| self.favorites.get(post_id))
    }

    pub fn is_pending(&self, post_id: &str, kind: ToggleKind) -> bool {
        self.pending.is_pending(post_id, kind)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.count()
    }

    /// Flip like or favorite locally and record the prior state. The ticket
    /// carries the value the remote write should set and the attempt's
    /// sequence, which must be passed back to `settle`.
    pub fn begin_toggle(&mut self, post_id: &str, kind: ToggleKind) -> Result<ToggleTicket, ToggleRejected> {
        if self.find_post(post_id).is_none() {
            return Err(ToggleRejected::UnknownPost(post_id.to_string()));
        }
        let prior = self.viewer(post_id);
        let target = match kind {
            ToggleKind::Like => !prior.liked,
            ToggleKind::Favorite => !prior.favorited,
        };
        let ticket = self
            .pending
            .try_begin(post_id, kind, prior, target)
            .ok_or_else(|| ToggleRejected::AlreadyPending(post_id.to_string()))?;

        let entry = self.viewer.entry(post_id.to_string()).or_default();
        match kind {
            ToggleKind::Like => entry.liked = target,
            ToggleKind::Favorite => entry.favorited = target,
        }
        Ok(ticket)
    }

    /// Finish attempt `seq` once its remote write returned. On failure the
    /// local change is undone. Returns `None` when the attempt is no longer
    /// pending, e.g. it timed out and the post was toggled again since.
    pub fn settle(&mut self, post_id: &str, kind: ToggleKind, seq: u64, succeeded: bool) -> Option<PendingToggle> {
        if !succeeded {
            let toggle = self.pending.rollback(post_id, kind, seq)?;
            self.undo(&toggle);
            return Some(toggle);
        }

        let toggle = self.pending.confirm(post_id, kind, seq)?;
        match kind {
            ToggleKind::Like => {
                // Without a newer server report, the count we hold predates
                // this write; fold the delta in until the change feed catches up.
                if let Some(entry) = self.viewer.get_mut(post_id) {
                    if entry.reported_after < toggle.seq {
                        entry.server_count += toggle.like_delta();
                    }
                }
            }
            ToggleKind::Favorite => {
                if toggle.target {
                    if let Some(post) = self.find_post(post_id).cloned() {
                        self.favorites.prepend(post);
                    }
                } else {
                    self.favorites.remove(post_id);
                }
            }
        }
        Some(toggle)
    }

    fn undo(&mut self, toggle: &PendingToggle) {
        let Some(entry) = self.viewer.get_mut(&toggle.post_id) else {
            return;
        };
        match toggle.kind {
            ToggleKind::Like => entry.liked = toggle.prior.liked,
            ToggleKind::Favorite => entry.favorited = toggle.prior.favorited,
        }
    }

    /// Roll back toggles whose remote write never came back.
    pub fn expire_pending(&mut self, max_age: Duration) -> Vec<PendingToggle> {
        let expired = self.pending.expire_older_than(max_age);
        for toggle in &expired {
            self.undo(toggle);
        }
        expired
    }

    /// Forget everything, e.g. on sign-out.
    pub fn clear(&mut self) {
        for list in self.lists_mut() {
            list.replace(Vec::new());
        }
        self.viewer.clear();
        self.pending.drain();
    }

    /// Route a change-feed event to every list. Returns true if anything changed.
    pub fn apply_change(&mut self, change: &ChangeEvent) -> bool {
        let mut changed = false;
        for list in self.lists_mut() {
            changed |= list.apply_change(change);
        }
        if change.table == "posts" && change.kind != ChangeKind::Delete {
            if let (Some(id), Some(count)) = (
                change.row_id(),
                change.record.get("likes_count").and_then(|v| v.as_i64()),
            ) {
                let before = self.viewer(id).like_count;
                self.record_count(id, count);
                changed |= self.viewer(id).like_count != before;
            }
        }
        changed
    }

    /// Apply a `post_likes` row written by the viewer elsewhere, e.g. from
    /// another device. A like still in flight here keeps its local value.
    pub fn apply_like_row(&mut self, change: &ChangeEvent) -> bool {
        if change.table != "post_likes" {
            return false;
        }
        let row = match change.kind {
            ChangeKind::Delete => &change.old_record,
            ChangeKind::Insert | ChangeKind::Update => &change.record,
        };
        let Some(post_id) = row.get("post_id").and_then(|v| v.as_str()) else {
            return false;
        };
        let liked = change.kind != ChangeKind::Delete
            && row.get("liked").and_then(|v| v.as_bool()).unwrap_or(true);
        if self.pending.is_pending(post_id, ToggleKind::Like) {
            return false;
        }
        match self.viewer.get_mut(post_id) {
            Some(entry) if entry.liked != liked => {
                entry.liked = liked;
                true
            }
            _ => false,
        }
    }

    /// Drop a post everywhere, e.g. after the author deleted it.
    pub fn remove_post(&mut self, post_id: &str) {
        for list in self.lists_mut() {
            list.remove(post_id);
        }
        self.viewer.remove(post_id);
    }

    /// Put a freshly created post into every list that admits it.
    pub fn insert_post(&mut self, post: Post) {
        if !self.viewer.contains_key(&post.id) {
            self.record_count(&post.id, post.likes_count);
        }
        for list in self.lists_mut() {
            if list.scope() != &ListScope::Favorites && list.scope().admits(&post) {
                list.prepend(post.clone());
            }
        }
    }

    /// Replace an edited post wherever it appears.
    pub fn update_post(&mut self, post: Post) {
        for list in self.lists_mut() {
            if list.contains(&post.id) {
                if list.scope().admits(&post) {
                    list.replace_in_place(post.clone());
                } else {
                    list.remove(&post.id);
                }
            } else if list.scope() != &ListScope::Favorites && list.scope().admits(&post) {
                list.prepend(post.clone());
            }
        }
    }

    /// Take a freshly fetched post and, when known, the viewer's like and
    /// favorite flags for it. Toggles still in flight keep their local value.
    pub fn refresh_post(&mut self, post: Post, flags: Option<(bool, bool)>) {
        self.record_count(&post.id, post.likes_count);
        if let Some((liked, favorited)) = flags {
            let like_pending = self.pending.is_pending(&post.id, ToggleKind::Like);
            let fav_pending = self.pending.is_pending(&post.id, ToggleKind::Favorite);
            let entry = self.viewer.entry(post.id.clone()).or_default();
            if !like_pending {
                entry.liked = liked;
            }
            if !fav_pending {
                entry.favorited = favorited;
            }
        }
        self.update_post(post);
    }

    /// Posts of one list filtered and sorted by `query`, ranking by the like
    /// counts the viewer actually sees.
    pub fn view(&self, kind: ListKind, query: &FeedQuery) -> Vec<&Post> {
        query.apply_by(self.list(kind).posts(), |post| self.viewer(&post.id).like_count)
    }
}
