use crate::backend::auth::{AuthApi, SessionFile, SessionHandle};
use crate::backend::error::is_unauthorized;
use crate::backend::realtime::{ChangeEvent, ChangeKind, RealtimeClient, RealtimeEvent, Subscription};
use crate::backend::types::{Notification, ProfileUpdate};
use crate::backend::Backend;
use crate::config::Config;
use crate::feed::optimistic::ToggleKind;
use crate::feed::query::{FeedQuery, SortOrder};
use crate::feed::store::ListKind;
use crate::routes::AuthState;
use crate::service::{notification_message, ActionError, BlogService, ImageUpload, PostDraft, ToggleWrite};
use crate::tui::state::{AppState, Screen};
use crate::tui::TuiCommand;
use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const LISTS: [ListKind; 3] = [ListKind::Feed, ListKind::Mine, ListKind::Favorites];
const REFRESH_RETRY: Duration = Duration::from_secs(30);

type WriteOutcome = (ToggleWrite, Result<()>);

/// The change-feed task, restarted whenever the signed-in user changes so
/// its subscriptions always match the session.
struct LiveFeed {
    client: Arc<RealtimeClient>,
    tx: mpsc::Sender<RealtimeEvent>,
    task: Option<JoinHandle<()>>,
    /// User the running task subscribed for; `None` for a guest.
    user: Option<String>,
}

impl LiveFeed {
    fn restart(&mut self, user: Option<String>) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let client = Arc::clone(&self.client);
        let tx = self.tx.clone();
        let subs = subscriptions(user.as_deref());
        tracing::debug!(user = ?user, count = subs.len(), "starting change feed");
        self.task = Some(tokio::spawn(async move {
            if let Err(e) = client.run(subs, tx).await {
                tracing::error!("change feed stopped: {:#}", e);
            }
        }));
        self.user = user;
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Owns the service and the session. Turns TUI commands and change-feed
/// events into service calls and publishes a fresh `AppState` after each.
pub struct Engine<B: Backend + 'static> {
    service: BlogService<B>,
    auth: AuthApi,
    session: Arc<SessionHandle>,
    session_file: SessionFile,
    refresh_margin: chrono::Duration,
    pending_timeout: Duration,
    next_refresh_attempt: Instant,
    queries: HashMap<ListKind, FeedQuery>,
    state_tx: watch::Sender<AppState>,
    writes_tx: mpsc::Sender<WriteOutcome>,
    writes_rx: mpsc::Receiver<WriteOutcome>,
    live: Option<LiveFeed>,
}

impl<B: Backend + 'static> Engine<B> {
    pub fn new(
        service: BlogService<B>,
        auth: AuthApi,
        session: Arc<SessionHandle>,
        config: &Config,
        state_tx: watch::Sender<AppState>,
    ) -> Self {
        let default_sort = SortOrder::parse(&config.feed.default_sort).unwrap_or_else(|| {
            tracing::warn!(sort = %config.feed.default_sort, "unknown default sort, using latest");
            SortOrder::Latest
        });
        let mut queries = HashMap::new();
        for kind in LISTS {
            queries.insert(
                kind,
                FeedQuery {
                    sort: default_sort,
                    ..Default::default()
                },
            );
        }
        let (writes_tx, writes_rx) = mpsc::channel(64);
        Self {
            service,
            auth,
            session,
            session_file: SessionFile::new(&config.session.file),
            refresh_margin: chrono::Duration::seconds(config.session.refresh_margin_secs),
            pending_timeout: Duration::from_secs(config.feed.pending_timeout_secs),
            next_refresh_attempt: Instant::now(),
            queries,
            state_tx,
            writes_tx,
            writes_rx,
            live: None,
        }
    }

    /// Run the change feed from the engine, so sign-out can swap the
    /// user-scoped subscriptions for the guest ones.
    pub fn with_realtime(mut self, client: RealtimeClient, tx: mpsc::Sender<RealtimeEvent>) -> Self {
        self.live = Some(LiveFeed {
            client: Arc::new(client),
            tx,
            task: None,
            user: None,
        });
        self
    }

    fn restart_live_feed(&mut self) {
        let user = self.me();
        if let Some(live) = self.live.as_mut() {
            live.restart(user);
            self.state_tx.send_modify(|s| s.realtime_connected = false);
        }
    }

    pub async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<TuiCommand>,
        mut events: mpsc::Receiver<RealtimeEvent>,
    ) -> Result<()> {
        self.publish_auth();
        self.restart_live_feed();
        self.load_all().await;

        let mut housekeeping = tokio::time::interval(Duration::from_secs(1));
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(TuiCommand::Quit) | Some(TuiCommand::SignIn) => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(event) = events.recv() => self.handle_realtime(event).await,
                Some((write, outcome)) = self.writes_rx.recv() => self.finish_write(write, outcome).await,
                _ = housekeeping.tick() => self.housekeeping().await,
            }
        }

        tracing::info!("engine stopped");
        Ok(())
    }

    fn me(&self) -> Option<String> {
        self.session.user_id()
    }

    fn query(&self, kind: ListKind) -> FeedQuery {
        self.queries.get(&kind).cloned().unwrap_or_default()
    }

    // --- publishing ---

    fn publish_auth(&self) {
        let session = self.session.current();
        self.state_tx.send_modify(|s| match &session {
            Some(session) => {
                s.auth = AuthState::SignedIn;
                s.user_label = Some(
                    session
                        .user
                        .email
                        .clone()
                        .unwrap_or_else(|| session.user.default_username()),
                );
            }
            None => {
                s.auth = AuthState::SignedOut;
                s.user_label = None;
                s.profile = None;
            }
        });
    }

    fn publish_list(&self, kind: ListKind) {
        let query = self.query(kind);
        let me = self.me();
        let library = &self.service.library;
        self.state_tx
            .send_modify(|s| s.sync_list(kind, library, &query, me.as_deref()));
    }

    fn publish_lists(&self) {
        for kind in LISTS {
            self.publish_list(kind);
        }
    }

    fn log(&self, level: &str, message: String) {
        self.state_tx.send_modify(|s| s.push_log(level, message));
    }

    fn report(&self, what: &str, err: ActionError) {
        match &err {
            ActionError::Backend(e) => tracing::error!("{} failed: {:#}", what, e),
            other => tracing::info!("{} refused: {}", what, other),
        }
        let level = if matches!(err, ActionError::Backend(_)) { "ERROR" } else { "WARN" };
        self.log(level, format!("{}: {}", what, err));
    }

    // --- loading ---

    async fn load_all(&mut self) {
        self.load_list(ListKind::Feed).await;
        if self.service.is_signed_in() {
            self.load_list(ListKind::Mine).await;
            self.load_list(ListKind::Favorites).await;
            self.load_profile().await;
        }
    }

    async fn load_list(&mut self, kind: ListKind) {
        let result = match kind {
            ListKind::Feed => {
                let query = self.query(kind);
                self.service.load_feed(&query).await
            }
            ListKind::Mine => self.service.load_my_posts().await,
            ListKind::Favorites => self.service.load_favorites().await,
        };
        match result {
            Ok(count) => {
                tracing::debug!(list = ?kind, count, "list loaded");
                self.state_tx.send_modify(|s| s.list_mut(kind).loaded = true);
                self.publish_list(kind);
            }
            Err(ActionError::SignInRequired) => {}
            Err(e) => self.report("Loading posts", e),
        }
    }

    async fn load_profile(&mut self) {
        match self.service.load_profile().await {
            Ok(view) => self.state_tx.send_modify(|s| {
                if !s.settings_dirty {
                    s.settings = view.settings;
                }
                s.profile = Some(view);
            }),
            Err(ActionError::SignInRequired) => {}
            Err(e) => self.report("Loading profile", e),
        }
    }

    // --- commands ---

    async fn handle_command(&mut self, cmd: TuiCommand) {
        match cmd {
            TuiCommand::Quit | TuiCommand::SignIn => {}
            TuiCommand::Refresh(screen) => match screen.list_kind() {
                Some(kind) => self.load_list(kind).await,
                None if screen == Screen::Profile => self.load_profile().await,
                None => self.load_known_tags().await,
            },
            TuiCommand::OpenPost(post_id) => match self.service.open_post(&post_id).await {
                Ok(_) => self.publish_lists(),
                Err(e) => self.report("Opening post", e),
            },
            TuiCommand::SetQuery(kind, query) => {
                let previous = self.queries.insert(kind, query.clone());
                let server_side_changed = previous
                    .map(|p| p.category != query.category || p.sort != query.sort)
                    .unwrap_or(true);
                if kind == ListKind::Feed && server_side_changed {
                    self.load_list(kind).await;
                } else {
                    self.publish_list(kind);
                }
            }
            TuiCommand::ToggleLike(post_id) => self.start_toggle(&post_id, ToggleKind::Like),
            TuiCommand::ToggleFavorite(post_id) => self.start_toggle(&post_id, ToggleKind::Favorite),
            TuiCommand::SetStatus(post_id, status) => {
                match self.service.set_post_status(&post_id, status).await {
                    Ok(post) => {
                        self.log("INFO", format!("\"{}\" is now {}", post.title, post.status.as_str()));
                        self.publish_lists();
                    }
                    Err(e) => self.report("Changing status", e),
                }
            }
            TuiCommand::DeletePost(post_id) => match self.service.delete_post(&post_id).await {
                Ok(()) => {
                    self.log("INFO", "Post deleted".to_string());
                    self.publish_lists();
                }
                Err(e) => self.report("Deleting post", e),
            },
            TuiCommand::ToggleSetting(key) => self.state_tx.send_modify(|s| {
                s.settings.toggle(key);
                s.settings_dirty = true;
            }),
            TuiCommand::SaveSettings => {
                let settings = self.state_tx.borrow().settings;
                match self.service.save_settings(&settings).await {
                    Ok(()) => self.state_tx.send_modify(|s| {
                        s.settings_dirty = false;
                        s.push_log("INFO", "Settings saved".to_string());
                    }),
                    Err(e) => self.report("Saving settings", e),
                }
            }
            TuiCommand::Publish { draft, image_path } => {
                self.save_post(None, draft, image_path.as_deref()).await
            }
            TuiCommand::EditPost {
                post_id,
                draft,
                image_path,
            } => self.save_post(Some(&post_id), draft, image_path.as_deref()).await,
            TuiCommand::UpdateProfile { update, avatar_path } => {
                self.save_profile(update, avatar_path.as_deref()).await
            }
            TuiCommand::SignOut => self.sign_out().await,
        }
    }

    fn start_toggle(&mut self, post_id: &str, kind: ToggleKind) {
        let write = match self.service.begin_toggle(post_id, kind) {
            Ok(w) => w,
            Err(e) => {
                self.report("Update", e);
                return;
            }
        };
        self.publish_lists();

        let backend = self.service.backend();
        let tx = self.writes_tx.clone();
        tokio::spawn(async move {
            let outcome = write.send(backend.as_ref()).await;
            let _ = tx.send((write, outcome)).await;
        });
    }

    async fn finish_write(&mut self, write: ToggleWrite, outcome: Result<()>) {
        match self.service.finish_toggle(&write, outcome) {
            Ok(_) => {}
            Err(ActionError::Superseded(_)) => {
                // Already rolled back by the timeout; the server may disagree now.
                tracing::warn!(post = %write.post_id, kind = ?write.kind, seq = write.seq, "late write result, reloading");
                for kind in LISTS {
                    self.load_list(kind).await;
                }
                return;
            }
            Err(e) => self.report("Update", e),
        }
        self.publish_lists();
    }

    /// Record the outcome of a submitted form so the TUI can close or keep it.
    fn form_done(&self, saved: bool) {
        self.state_tx.send_modify(|s| {
            if saved {
                s.forms.saved += 1;
            } else {
                s.forms.failed += 1;
            }
        });
    }

    /// Read an image chosen on a form. Errors are logged and count as a failed form.
    async fn read_image(&self, path: Option<&Path>) -> Result<Option<ImageUpload>, ()> {
        let Some(path) = path else {
            return Ok(None);
        };
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "image".to_string());
                Ok(Some(ImageUpload { file_name, bytes }))
            }
            Err(e) => {
                self.log("ERROR", format!("Could not read {}: {}", path.display(), e));
                self.form_done(false);
                Err(())
            }
        }
    }

    async fn save_post(&mut self, post_id: Option<&str>, mut draft: PostDraft, image_path: Option<&Path>) {
        let Ok(image) = self.read_image(image_path).await else {
            return;
        };
        draft.image = image;
        let result = match post_id {
            Some(id) => self.service.update_post(id, &draft).await,
            None => self.service.create_post(&draft).await,
        };
        match result {
            Ok(post) => {
                let verb = if post_id.is_some() { "Updated" } else { "Created" };
                tracing::info!(post = %post.id, "post saved from compose screen");
                self.log("INFO", format!("{} \"{}\" ({})", verb, post.title, post.status.as_str()));
                self.form_done(true);
                self.publish_lists();
            }
            Err(e) => {
                self.report("Saving post", e);
                self.form_done(false);
            }
        }
    }

    async fn save_profile(&mut self, update: ProfileUpdate, avatar_path: Option<&Path>) {
        let Ok(avatar) = self.read_image(avatar_path).await else {
            return;
        };
        match self.service.update_profile(update, avatar).await {
            Ok(_) => {
                self.log("INFO", "Profile saved".to_string());
                self.form_done(true);
                self.load_profile().await;
            }
            Err(e) => {
                self.report("Saving profile", e);
                self.form_done(false);
            }
        }
    }

    async fn load_known_tags(&mut self) {
        match self.service.my_tags().await {
            Ok(tags) => self.state_tx.send_modify(|s| s.known_tags = tags),
            Err(ActionError::SignInRequired) => {}
            Err(e) => self.report("Loading tags", e),
        }
    }

    async fn sign_out(&mut self) {
        if let Some(session) = self.session.current() {
            if let Err(e) = self.auth.sign_out(&session).await {
                tracing::warn!("remote sign-out failed: {:#}", e);
            }
        }
        self.end_session();
        self.log("INFO", "Signed out".to_string());
        self.load_list(ListKind::Feed).await;
    }

    fn end_session(&mut self) {
        self.session.clear();
        if let Err(e) = self.session_file.clear() {
            tracing::warn!("{:#}", e);
        }
        self.service.reset();
        self.state_tx.send_modify(|s| {
            for kind in LISTS {
                *s.list_mut(kind) = Default::default();
            }
            s.known_tags.clear();
        });
        self.publish_auth();
        self.restart_live_feed();
    }

    // --- change feed ---

    async fn handle_realtime(&mut self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::Connected => self.state_tx.send_modify(|s| {
                s.realtime_connected = true;
                s.push_log("INFO", "Live updates connected".to_string());
            }),
            RealtimeEvent::Disconnected(reason) => self.state_tx.send_modify(|s| {
                s.realtime_connected = false;
                s.push_log("WARN", format!("Live updates disconnected: {}", reason));
            }),
            RealtimeEvent::Joined(topic) => tracing::debug!(topic = %topic, "channel joined"),
            RealtimeEvent::Change(change) => self.apply_change(change).await,
        }
    }

    async fn apply_change(&mut self, change: ChangeEvent) {
        match change.table.as_str() {
            "posts" => {
                if self.service.library.apply_change(&change) {
                    self.publish_lists();
                }
            }
            "post_likes" => {
                if self.service.library.apply_like_row(&change) {
                    self.publish_lists();
                }
            }
            "favorites" => self.load_list(ListKind::Favorites).await,
            "profiles" | "followers" => self.load_profile().await,
            "notifications" if change.kind == ChangeKind::Insert => {
                match change.record_as::<Notification>() {
                    Ok(n) => {
                        let message = notification_message(&n);
                        tracing::info!(kind = %n.kind, "notification");
                        self.state_tx.send_modify(|s| s.push_notification(message));
                    }
                    Err(e) => tracing::warn!("{:#}", e),
                }
            }
            other => tracing::debug!(table = %other, kind = ?change.kind, "change ignored"),
        }
    }

    // --- periodic ---

    async fn housekeeping(&mut self) {
        let expired = self.service.library.expire_pending(self.pending_timeout);
        if !expired.is_empty() {
            for toggle in &expired {
                tracing::warn!(post = %toggle.post_id, kind = ?toggle.kind, "write timed out, rolled back");
            }
            self.log("WARN", format!("{} update(s) timed out and were undone", expired.len()));
            self.publish_lists();
        }
        self.refresh_session_if_due().await;
    }

    async fn refresh_session_if_due(&mut self) {
        let Some(session) = self.session.current() else {
            return;
        };
        if Instant::now() < self.next_refresh_attempt
            || !session.is_expired(chrono::Utc::now(), self.refresh_margin)
        {
            return;
        }
        match self.auth.refresh(&session.refresh_token).await {
            Ok(fresh) => {
                if let Err(e) = self.session_file.save(&fresh) {
                    tracing::warn!("{:#}", e);
                }
                self.session.set(fresh);
                tracing::info!("session refreshed");
            }
            Err(e) if is_unauthorized(&e) => {
                tracing::warn!("refresh token rejected: {:#}", e);
                self.end_session();
                self.log("WARN", "Session expired, signed out".to_string());
            }
            Err(e) => {
                tracing::warn!("session refresh failed: {:#}", e);
                self.next_refresh_attempt = Instant::now() + REFRESH_RETRY;
            }
        }
    }
}

/// Change-feed listeners for the screens. User-scoped ones are skipped for guests.
///
/// One unfiltered `posts` channel serves every list: row-level security only
/// lets through published posts and the viewer's own drafts, and the library
/// routes each row to the lists whose scope admits it.
pub fn subscriptions(user_id: Option<&str>) -> Vec<Subscription> {
    let mut subs = vec![Subscription::table("post-changes", "posts")];
    if let Some(user) = user_id {
        subs.push(Subscription::table("like-changes", "post_likes").filter_eq("user_id", user));
        subs.push(Subscription::table("favorites-changes", "favorites").filter_eq("user_id", user));
        subs.push(
            Subscription::table("profile-changes", "profiles")
                .on("UPDATE")
                .filter_eq("id", user),
        );
        subs.push(Subscription::table("follower-changes", "followers").filter_eq("following_id", user));
        subs.push(
            Subscription::table("notification-changes", "notifications")
                .on("INSERT")
                .filter_eq("user_id", user),
        );
    }
    subs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::auth::Session;
    use crate::backend::rest::RestApi;
    use crate::backend::storage::StorageApi;
    use crate::backend::types::Category;
    use crate::backend::Platform;
    use crate::config::{BackendConfig, SessionConfig};
    use mockito::{Matcher, Server};
    use std::path::PathBuf;

    fn session(expires_at: i64) -> Session {
        serde_json::from_value(serde_json::json!({
            "access_token": "token",
            "expires_at": expires_at,
            "refresh_token": "revoked",
            "user": {"id": "user-1", "email": "ada@example.com"}
        }))
        .unwrap()
    }

    fn session_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lumina-engine-{}-{}.json", name, std::process::id()))
    }

    fn engine(url: &str, session: Option<Session>, session_file: PathBuf) -> (Engine<Platform>, watch::Receiver<AppState>) {
        let config = Config {
            backend: BackendConfig {
                url: url.to_string(),
                redirect_url: None,
            },
            realtime: Default::default(),
            storage: Default::default(),
            feed: Default::default(),
            session: SessionConfig {
                file: session_file,
                refresh_margin_secs: 60,
            },
            logging: Default::default(),
        };
        let handle = Arc::new(SessionHandle::new(session));
        let client = reqwest::Client::new();
        let rest = RestApi::new(client.clone(), handle.clone(), url, "anon");
        let storage = StorageApi::new(client.clone(), handle.clone(), url, "anon");
        let platform = Arc::new(Platform::new(rest, storage, config.storage.clone()));
        let service = BlogService::new(platform, handle.clone(), config.storage.max_upload_bytes);
        let auth = AuthApi::new(client, url, "anon");
        let (state_tx, state_rx) = watch::channel(AppState::new());
        (Engine::new(service, auth, handle, &config, state_tx), state_rx)
    }

    #[test]
    fn test_guest_only_listens_to_the_feed() {
        let subs = subscriptions(None);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].table, "posts");
        assert!(subs[0].filter.is_none());
    }

    #[test]
    fn test_signed_in_subscriptions_are_user_scoped() {
        let subs = subscriptions(Some("u1"));
        assert_eq!(subs.len(), 6);
        // Own posts come through the shared posts channel, not a second one.
        assert_eq!(subs.iter().filter(|s| s.table == "posts").count(), 1);
        let likes = subs.iter().find(|s| s.table == "post_likes").unwrap();
        assert_eq!(likes.filter.as_deref(), Some("user_id=eq.u1"));
        let notifications = subs.iter().find(|s| s.table == "notifications").unwrap();
        assert_eq!(notifications.event, "INSERT");
        assert_eq!(notifications.filter.as_deref(), Some("user_id=eq.u1"));
        let followers = subs.iter().find(|s| s.table == "followers").unwrap();
        assert_eq!(followers.filter.as_deref(), Some("following_id=eq.u1"));
    }

    #[tokio::test]
    async fn test_rejected_refresh_signs_out_and_drops_user_channels() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token: Refresh Token Not Found"}"#)
            .expect(1)
            .create_async()
            .await;

        let path = session_path("refresh");
        std::fs::write(&path, "{}").unwrap();
        let (engine, state_rx) = engine(&server.url(), Some(session(1)), path.clone());
        let (events_tx, _events_rx) = mpsc::channel(8);
        let realtime = RealtimeClient::new(
            Arc::new(SessionHandle::default()),
            "http://127.0.0.1:9",
            "anon",
            Default::default(),
        );
        let mut engine = engine.with_realtime(realtime, events_tx);
        engine.publish_auth();
        engine.restart_live_feed();
        assert_eq!(engine.live.as_ref().and_then(|l| l.user.clone()).as_deref(), Some("user-1"));

        engine.refresh_session_if_due().await;

        assert!(engine.session.current().is_none());
        assert!(!path.exists());
        assert_eq!(state_rx.borrow().auth, AuthState::SignedOut);
        assert!(state_rx.borrow().logs.iter().any(|l| l.message.contains("Session expired")));
        assert!(engine.live.as_ref().is_some_and(|l| l.user.is_none() && l.task.is_some()));

        // Signed out now, so the next tick does not try the dead token again.
        engine.refresh_session_if_due().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_network_failure_keeps_session() {
        let (mut engine, state_rx) = engine("http://127.0.0.1:9", Some(session(1)), session_path("offline"));
        engine.publish_auth();
        engine.refresh_session_if_due().await;
        assert!(engine.session.current().is_some());
        assert_eq!(state_rx.borrow().auth, AuthState::SignedIn);
        assert!(engine.next_refresh_attempt > Instant::now());
    }

    #[tokio::test]
    async fn test_unreadable_image_fails_the_form() {
        let (mut engine, state_rx) = engine("http://127.0.0.1:9", Some(session(4_000_000_000)), session_path("image"));
        let draft = PostDraft {
            title: "Hi".to_string(),
            content: "x".to_string(),
            category: Some(Category::Travel),
            ..Default::default()
        };
        engine
            .handle_command(TuiCommand::Publish {
                draft,
                image_path: Some(PathBuf::from("/nonexistent/lumina/cat.png")),
            })
            .await;
        let state = state_rx.borrow();
        assert_eq!(state.forms.failed, 1);
        assert_eq!(state.forms.saved, 0);
        assert!(state.logs.iter().any(|l| l.level == "ERROR" && l.message.contains("cat.png")));
    }

    #[tokio::test]
    async fn test_published_post_counts_as_saved() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/rest/v1/posts")
            .match_query(Matcher::Any)
            .with_status(201)
            .with_body(
                serde_json::json!({
                    "id": "p1", "title": "Hi", "content": "x", "category": "travel",
                    "status": "draft", "author_id": "user-1",
                    "created_at": "2024-03-01T10:00:00+00:00"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let (mut engine, state_rx) = engine(&server.url(), Some(session(4_000_000_000)), session_path("publish"));
        let draft = PostDraft {
            title: "Hi".to_string(),
            content: "x".to_string(),
            category: Some(Category::Travel),
            status: crate::backend::types::PostStatus::Draft,
            ..Default::default()
        };
        engine.handle_command(TuiCommand::Publish { draft, image_path: None }).await;
        assert_eq!(state_rx.borrow().forms.saved, 1);
        assert!(engine.service.library.mine.contains("p1"));
        assert!(!engine.service.library.feed.contains("p1"));

        // Missing title is refused before any request.
        engine
            .handle_command(TuiCommand::Publish {
                draft: PostDraft::default(),
                image_path: None,
            })
            .await;
        assert_eq!(state_rx.borrow().forms.failed, 1);
    }
}
