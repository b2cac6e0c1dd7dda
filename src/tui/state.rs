use crate::backend::types::{Category, Post, PostStatus, UserSettings};
use crate::feed::optimistic::{ToggleKind, ViewerState};
use crate::feed::query::{available_tags, FeedQuery};
use crate::feed::store::{Library, ListKind};
use crate::routes::{AuthState, Route};
use crate::service::ProfileView;
use std::collections::VecDeque;
use std::time::Instant;

const MAX_LOGS: usize = 200;
const MAX_NOTIFICATIONS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Feed,
    MyPosts,
    Favorites,
    Profile,
    Compose,
}

impl Screen {
    pub const ALL: [Screen; 5] = [
        Screen::Feed,
        Screen::MyPosts,
        Screen::Favorites,
        Screen::Profile,
        Screen::Compose,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Screen::Feed => "Feed",
            Screen::MyPosts => "My Posts",
            Screen::Favorites => "Favorites",
            Screen::Profile => "Profile",
            Screen::Compose => "New Post",
        }
    }

    pub fn route(&self) -> Route {
        match self {
            Screen::Feed => Route::Home,
            Screen::MyPosts => Route::MyPosts,
            Screen::Favorites => Route::Favorites,
            Screen::Profile => Route::Profile,
            Screen::Compose => Route::CreatePost,
        }
    }

    pub fn list_kind(&self) -> Option<ListKind> {
        match self {
            Screen::Feed => Some(ListKind::Feed),
            Screen::MyPosts => Some(ListKind::Mine),
            Screen::Favorites => Some(ListKind::Favorites),
            Screen::Profile | Screen::Compose => None,
        }
    }
}

/// One post as the list screens draw it.
#[derive(Debug, Clone, PartialEq)]
pub struct PostRow {
    pub id: String,
    pub title: String,
    pub excerpt: String,
    /// Full body, for the edit form.
    pub content: String,
    pub author: String,
    pub category: Category,
    pub status: PostStatus,
    pub tags: Vec<String>,
    pub created: String,
    pub like_count: i64,
    pub comments: i64,
    pub views: i64,
    pub liked: bool,
    pub favorited: bool,
    /// A like or favorite write is still in flight.
    pub pending: bool,
    pub is_mine: bool,
}

impl PostRow {
    fn new(post: &Post, viewer: ViewerState, pending: bool, me: Option<&str>) -> Self {
        let excerpt = post
            .excerpt
            .clone()
            .unwrap_or_else(|| post.content.lines().next().unwrap_or("").to_string());
        Self {
            id: post.id.clone(),
            title: post.title.clone(),
            excerpt,
            content: post.content.clone(),
            author: post.author_name().to_string(),
            category: post.category,
            status: post.status,
            tags: post.tags.clone(),
            created: post.created_at.format("%Y-%m-%d").to_string(),
            like_count: viewer.like_count,
            comments: post.comments_count,
            views: post.views_count,
            liked: viewer.liked,
            favorited: viewer.favorited,
            pending,
            is_mine: me == Some(post.author_id.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScreenList {
    pub query: FeedQuery,
    pub rows: Vec<PostRow>,
    /// Tags present in the unfiltered list, for the tag filter.
    pub tags: Vec<String>,
    pub total: usize,
    pub loaded: bool,
}

/// Counts of post and profile forms the engine finished. The TUI keeps a
/// submitted form open until one of them moves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormReceipts {
    pub saved: u64,
    pub failed: u64,
}

#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub time: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub time: String,
    pub level: String,
    pub message: String,
}

/// Snapshot the engine publishes to the TUI.
#[derive(Debug, Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub user_label: Option<String>,
    pub realtime_connected: bool,
    pub start_time: Instant,
    pub feed: ScreenList,
    pub mine: ScreenList,
    pub favorites: ScreenList,
    pub profile: Option<ProfileView>,
    pub settings: UserSettings,
    pub settings_dirty: bool,
    pub pending_writes: usize,
    pub forms: FormReceipts,
    /// Tags the viewer used before, suggested on the compose screen.
    pub known_tags: Vec<String>,
    pub notifications: VecDeque<NotificationRow>,
    pub logs: VecDeque<LogEntry>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self {
            auth: AuthState::Loading,
            user_label: None,
            realtime_connected: false,
            start_time: Instant::now(),
            feed: ScreenList::default(),
            mine: ScreenList::default(),
            favorites: ScreenList::default(),
            profile: None,
            settings: UserSettings::default(),
            settings_dirty: false,
            pending_writes: 0,
            forms: FormReceipts::default(),
            known_tags: Vec::new(),
            notifications: VecDeque::with_capacity(MAX_NOTIFICATIONS),
            logs: VecDeque::with_capacity(MAX_LOGS),
        }
    }

    pub fn list(&self, kind: ListKind) -> &ScreenList {
        match kind {
            ListKind::Feed => &self.feed,
            ListKind::Mine => &self.mine,
            ListKind::Favorites => &self.favorites,
        }
    }

    pub fn list_mut(&mut self, kind: ListKind) -> &mut ScreenList {
        match kind {
            ListKind::Feed => &mut self.feed,
            ListKind::Mine => &mut self.mine,
            ListKind::Favorites => &mut self.favorites,
        }
    }

    /// Rebuild the rows of one screen from the library.
    pub fn sync_list(&mut self, kind: ListKind, library: &Library, query: &FeedQuery, me: Option<&str>) {
        let source = library.list(kind);
        let rows = library
            .view(kind, query)
            .into_iter()
            .map(|post| {
                let pending = library.is_pending(&post.id, ToggleKind::Like)
                    || library.is_pending(&post.id, ToggleKind::Favorite);
                PostRow::new(post, library.viewer(&post.id), pending, me)
            })
            .collect();
        let target = self.list_mut(kind);
        target.query = query.clone();
        target.rows = rows;
        target.tags = available_tags(source.posts());
        target.total = source.len();
        self.pending_writes = library.pending_count();
    }

    pub fn push_log(&mut self, level: &str, message: String) {
        let time = chrono::Local::now().format("%H:%M:%S").to_string();
        if self.logs.len() >= MAX_LOGS {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            time,
            level: level.to_string(),
            message,
        });
    }

    pub fn push_notification(&mut self, message: String) {
        let time = chrono::Local::now().format("%H:%M").to_string();
        if self.notifications.len() >= MAX_NOTIFICATIONS {
            self.notifications.pop_back();
        }
        self.notifications.push_front(NotificationRow { time, message });
    }

    pub fn uptime(&self) -> String {
        let secs = self.start_time.elapsed().as_secs();
        let h = secs / 3600;
        let m = (secs % 3600) / 60;
        format!("{}h {:02}m", h, m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::Author;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    fn post(id: &str, author: &str, title: &str) -> Post {
        Post {
            id: id.to_string(),
            title: title.to_string(),
            content: "first line\nsecond".to_string(),
            excerpt: None,
            category: Category::Food,
            status: PostStatus::Published,
            image_url: None,
            tags: vec!["recipes".to_string()],
            author_id: author.to_string(),
            author: Some(Author {
                id: author.to_string(),
                username: None,
                full_name: Some("Grace".to_string()),
                avatar_url: None,
            }),
            likes_count: 2,
            comments_count: 1,
            views_count: 9,
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
            updated_at: None,
        }
    }

    #[test]
    fn test_sync_list_projects_rows() {
        let mut library = Library::new("me");
        let liked = HashSet::from(["a".to_string()]);
        library.load(
            ListKind::Feed,
            vec![post("a", "me", "Soup"), post("b", "u2", "Bread")],
            &liked,
            &HashSet::new(),
        );
        let mut state = AppState::new();
        let query = FeedQuery {
            search: "soup".to_string(),
            ..Default::default()
        };
        state.sync_list(ListKind::Feed, &library, &query, Some("me"));

        assert_eq!(state.feed.total, 2);
        assert_eq!(state.feed.rows.len(), 1);
        let row = &state.feed.rows[0];
        assert_eq!(row.title, "Soup");
        assert_eq!(row.excerpt, "first line");
        assert_eq!(row.created, "2024-06-01");
        assert!(row.liked && row.is_mine && !row.pending);
        assert_eq!(state.feed.tags, vec!["recipes"]);
        assert_eq!(state.feed.query.search, "soup");
    }

    #[test]
    fn test_pending_toggle_marks_row() {
        let mut library = Library::new("me");
        library.load(ListKind::Feed, vec![post("a", "u2", "Soup")], &HashSet::new(), &HashSet::new());
        library.begin_toggle("a", ToggleKind::Favorite).unwrap();
        let mut state = AppState::new();
        state.sync_list(ListKind::Feed, &library, &FeedQuery::default(), Some("me"));
        assert!(state.feed.rows[0].pending);
        assert!(state.feed.rows[0].favorited);
        assert_eq!(state.pending_writes, 1);
    }

    #[test]
    fn test_log_and_notification_rings_are_bounded() {
        let mut state = AppState::new();
        for i in 0..(MAX_LOGS + 5) {
            state.push_log("INFO", format!("line {}", i));
        }
        assert_eq!(state.logs.len(), MAX_LOGS);
        assert_eq!(state.logs.back().map(|l| l.message.as_str()), Some("line 204"));

        for i in 0..(MAX_NOTIFICATIONS + 1) {
            state.push_notification(format!("n{}", i));
        }
        assert_eq!(state.notifications.len(), MAX_NOTIFICATIONS);
        assert_eq!(state.notifications[0].message, "n50");
    }

    #[test]
    fn test_screen_routes() {
        assert_eq!(Screen::Compose.route(), Route::CreatePost);
        assert_eq!(Screen::Feed.list_kind(), Some(ListKind::Feed));
        assert_eq!(Screen::Profile.list_kind(), None);
    }
}
