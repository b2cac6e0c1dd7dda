pub mod render;
pub mod state;

use crate::backend::types::{Category, PostStatus, Profile, ProfileUpdate, SettingKey};
use crate::feed::query::{next_category, next_status, FeedQuery};
use crate::feed::store::ListKind;
use crate::routes::{gate, AuthState, Gate};
use crate::service::PostDraft;
use anyhow::Result;
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use futures_util::StreamExt;
use ratatui::prelude::*;
use state::{AppState, FormReceipts, PostRow, Screen};
use std::io::stdout;
use std::path::PathBuf;
use tokio::sync::watch;

/// Commands the TUI can send back to the engine.
#[derive(Debug, Clone)]
pub enum TuiCommand {
    Quit,
    /// Leave the TUI for the sign-in menu.
    SignIn,
    Refresh(Screen),
    SetQuery(ListKind, FeedQuery),
    /// Refetch one post, e.g. when it is opened.
    OpenPost(String),
    ToggleLike(String),
    ToggleFavorite(String),
    SetStatus(String, PostStatus),
    DeletePost(String),
    ToggleSetting(SettingKey),
    SaveSettings,
    Publish {
        draft: PostDraft,
        image_path: Option<PathBuf>,
    },
    EditPost {
        post_id: String,
        draft: PostDraft,
        image_path: Option<PathBuf>,
    },
    UpdateProfile {
        update: ProfileUpdate,
        avatar_path: Option<PathBuf>,
    },
    SignOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeField {
    Title,
    Content,
    Category,
    Tags,
    Status,
    Image,
}

impl ComposeField {
    pub const ALL: [ComposeField; 6] = [
        ComposeField::Title,
        ComposeField::Content,
        ComposeField::Category,
        ComposeField::Tags,
        ComposeField::Status,
        ComposeField::Image,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ComposeField::Title => "Title",
            ComposeField::Content => "Content",
            ComposeField::Category => "Category",
            ComposeField::Tags => "Tags",
            ComposeField::Status => "Status",
            ComposeField::Image => "Image file",
        }
    }

    fn step(self, forward: bool) -> Self {
        let idx = Self::ALL.iter().position(|f| *f == self).unwrap_or(0);
        let len = Self::ALL.len();
        Self::ALL[if forward { (idx + 1) % len } else { (idx + len - 1) % len }]
    }
}

fn path_or_none(path: &str) -> Option<PathBuf> {
    let path = path.trim();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

/// Fields of the post form, for a new post or an edit.
#[derive(Debug, Clone)]
pub struct ComposeForm {
    pub title: String,
    pub content: String,
    pub category: Option<Category>,
    /// Comma-separated.
    pub tags: String,
    pub status: PostStatus,
    pub image_path: String,
    pub field: ComposeField,
    /// Id of the post being edited; `None` for a new post.
    pub editing: Option<String>,
}

impl Default for ComposeForm {
    fn default() -> Self {
        Self {
            title: String::new(),
            content: String::new(),
            category: None,
            tags: String::new(),
            status: PostStatus::Published,
            image_path: String::new(),
            field: ComposeField::Title,
            editing: None,
        }
    }
}

impl ComposeForm {
    /// Prefill the form from one of the viewer's posts. The image is kept
    /// unless a new file is chosen.
    pub fn edit(row: &PostRow) -> Self {
        Self {
            title: row.title.clone(),
            content: row.content.clone(),
            category: Some(row.category),
            tags: row.tags.join(", "),
            status: row.status,
            image_path: String::new(),
            field: ComposeField::Title,
            editing: Some(row.id.clone()),
        }
    }

    fn text_mut(&mut self) -> Option<&mut String> {
        match self.field {
            ComposeField::Title => Some(&mut self.title),
            ComposeField::Content => Some(&mut self.content),
            ComposeField::Tags => Some(&mut self.tags),
            ComposeField::Image => Some(&mut self.image_path),
            ComposeField::Category | ComposeField::Status => None,
        }
    }

    fn cycle(&mut self) {
        match self.field {
            ComposeField::Category => {
                self.category = next_category(self.category);
            }
            ComposeField::Status => {
                let next = next_status(Some(self.status)).unwrap_or(PostStatus::Draft);
                self.status = next;
            }
            _ => {}
        }
    }

    pub fn to_command(&self) -> TuiCommand {
        let draft = PostDraft {
            title: self.title.clone(),
            content: self.content.clone(),
            category: self.category,
            tags: self.tags.split(',').map(|t| t.trim().to_string()).collect(),
            status: self.status,
            image: None,
        };
        let image_path = path_or_none(&self.image_path);
        match &self.editing {
            Some(post_id) => TuiCommand::EditPost {
                post_id: post_id.clone(),
                draft,
                image_path,
            },
            None => TuiCommand::Publish { draft, image_path },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProfileField {
    #[default]
    Username,
    FullName,
    Bio,
    Website,
    Avatar,
}

impl ProfileField {
    pub const ALL: [ProfileField; 5] = [
        ProfileField::Username,
        ProfileField::FullName,
        ProfileField::Bio,
        ProfileField::Website,
        ProfileField::Avatar,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ProfileField::Username => "Username",
            ProfileField::FullName => "Full name",
            ProfileField::Bio => "Bio",
            ProfileField::Website => "Website",
            ProfileField::Avatar => "Avatar file",
        }
    }

    fn step(self, forward: bool) -> Self {
        let idx = Self::ALL.iter().position(|f| *f == self).unwrap_or(0);
        let len = Self::ALL.len();
        Self::ALL[if forward { (idx + 1) % len } else { (idx + len - 1) % len }]
    }
}

/// Editable profile fields, prefilled from the loaded profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileForm {
    pub username: String,
    pub full_name: String,
    pub bio: String,
    pub website: String,
    pub avatar_path: String,
    pub field: ProfileField,
}

impl ProfileForm {
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            username: profile.username.clone().unwrap_or_default(),
            full_name: profile.full_name.clone().unwrap_or_default(),
            bio: profile.bio.clone().unwrap_or_default(),
            website: profile.website.clone().unwrap_or_default(),
            avatar_path: String::new(),
            field: ProfileField::Username,
        }
    }

    pub fn value(&self, field: ProfileField) -> &str {
        match field {
            ProfileField::Username => &self.username,
            ProfileField::FullName => &self.full_name,
            ProfileField::Bio => &self.bio,
            ProfileField::Website => &self.website,
            ProfileField::Avatar => &self.avatar_path,
        }
    }

    fn text_mut(&mut self) -> &mut String {
        match self.field {
            ProfileField::Username => &mut self.username,
            ProfileField::FullName => &mut self.full_name,
            ProfileField::Bio => &mut self.bio,
            ProfileField::Website => &mut self.website,
            ProfileField::Avatar => &mut self.avatar_path,
        }
    }

    pub fn to_command(&self) -> TuiCommand {
        TuiCommand::UpdateProfile {
            update: ProfileUpdate {
                username: Some(self.username.clone()),
                full_name: Some(self.full_name.clone()),
                avatar_url: None,
                bio: Some(self.bio.clone()),
                website: Some(self.website.clone()),
            },
            avatar_path: path_or_none(&self.avatar_path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Browse,
    /// Typing into the search box of the current list.
    Search(String),
    /// Waiting for y/n on deleting a post.
    ConfirmDelete(String),
    EditProfile(ProfileForm),
}

/// Screen-local state that never leaves the TUI.
#[derive(Debug, Clone)]
pub struct UiState {
    pub screen: Screen,
    pub mode: Mode,
    selected: [usize; 3],
    pub setting_cursor: usize,
    pub compose: ComposeForm,
    /// Receipts as they were when a form was submitted, until the engine
    /// reports back.
    pub awaiting_save: Option<FormReceipts>,
    pub flash: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self::new()
    }
}

fn slot(kind: ListKind) -> usize {
    match kind {
        ListKind::Feed => 0,
        ListKind::Mine => 1,
        ListKind::Favorites => 2,
    }
}

impl UiState {
    pub fn new() -> Self {
        Self {
            screen: Screen::Feed,
            mode: Mode::Browse,
            selected: [0; 3],
            setting_cursor: 0,
            compose: ComposeForm::default(),
            awaiting_save: None,
            flash: None,
        }
    }

    pub fn selected(&self, kind: ListKind) -> usize {
        self.selected[slot(kind)]
    }

    /// Keep selections inside the current row counts.
    pub fn clamp(&mut self, state: &AppState) {
        for kind in [ListKind::Feed, ListKind::Mine, ListKind::Favorites] {
            let len = state.list(kind).rows.len();
            let sel = &mut self.selected[slot(kind)];
            *sel = (*sel).min(len.saturating_sub(1));
        }
    }

    /// Close a submitted form once the engine saved it, or report that it
    /// did not. A failed form stays open with everything typed into it.
    pub fn sync(&mut self, state: &AppState) {
        self.clamp(state);
        let Some(submitted) = self.awaiting_save else {
            return;
        };
        if state.forms.failed != submitted.failed {
            self.awaiting_save = None;
            self.flash = Some("Not saved, see the activity log".to_string());
        } else if state.forms.saved != submitted.saved {
            self.awaiting_save = None;
            self.flash = Some("Saved".to_string());
            if matches!(self.mode, Mode::EditProfile(_)) {
                self.mode = Mode::Browse;
            }
            if self.screen == Screen::Compose {
                self.compose = ComposeForm::default();
                self.screen = Screen::MyPosts;
            }
        }
    }

    fn submit(&mut self, state: &AppState, cmd: TuiCommand) -> Option<TuiCommand> {
        self.awaiting_save = Some(state.forms);
        self.flash = Some("Saving...".to_string());
        Some(cmd)
    }

    fn selected_post(&self, state: &AppState) -> Option<(ListKind, String)> {
        let kind = self.screen.list_kind()?;
        state
            .list(kind)
            .rows
            .get(self.selected(kind))
            .map(|row| (kind, row.id.clone()))
    }

    fn go_to(&mut self, screen: Screen, state: &AppState) -> Option<TuiCommand> {
        match gate(screen.route(), state.auth) {
            Gate::Allow => {
                self.screen = screen;
                self.mode = Mode::Browse;
                self.flash = None;
                // The compose screen reloads its tag suggestions each time.
                let loaded = screen
                    .list_kind()
                    .map_or(screen != Screen::Compose, |k| state.list(k).loaded);
                (!loaded).then_some(TuiCommand::Refresh(screen))
            }
            Gate::ShowLoading => {
                self.flash = Some("Checking session...".to_string());
                None
            }
            Gate::Redirect(_) => {
                self.flash = Some(format!("Sign in to open {}", screen.title()));
                None
            }
        }
    }

    fn move_selection(&mut self, state: &AppState, down: bool) {
        if self.screen == Screen::Profile {
            let max = SettingKey::ALL.len() - 1;
            self.setting_cursor = if down {
                (self.setting_cursor + 1).min(max)
            } else {
                self.setting_cursor.saturating_sub(1)
            };
            return;
        }
        let Some(kind) = self.screen.list_kind() else {
            return;
        };
        let len = state.list(kind).rows.len();
        let sel = &mut self.selected[slot(kind)];
        *sel = if down {
            (*sel + 1).min(len.saturating_sub(1))
        } else {
            sel.saturating_sub(1)
        };
    }

    fn query_command(&self, state: &AppState, edit: impl FnOnce(&mut FeedQuery)) -> Option<TuiCommand> {
        let kind = self.screen.list_kind()?;
        let mut query = state.list(kind).query.clone();
        edit(&mut query);
        Some(TuiCommand::SetQuery(kind, query))
    }

    /// Translate one key press into at most one engine command.
    pub fn handle_key(&mut self, key: KeyEvent, state: &AppState) -> Option<TuiCommand> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Some(TuiCommand::Quit);
        }

        match self.mode.clone() {
            Mode::Search(mut text) => return self.handle_search_key(key, state, &mut text),
            Mode::ConfirmDelete(post_id) => {
                self.mode = Mode::Browse;
                return matches!(key.code, KeyCode::Char('y') | KeyCode::Char('Y'))
                    .then_some(TuiCommand::DeletePost(post_id));
            }
            Mode::EditProfile(mut form) => return self.handle_profile_form_key(key, state, &mut form),
            Mode::Browse => {}
        }

        if self.screen == Screen::Compose {
            return self.handle_compose_key(key, state);
        }

        match key.code {
            KeyCode::Char('q') => Some(TuiCommand::Quit),
            KeyCode::Char('1') => self.go_to(Screen::Feed, state),
            KeyCode::Char('2') => self.go_to(Screen::MyPosts, state),
            KeyCode::Char('3') => self.go_to(Screen::Favorites, state),
            KeyCode::Char('4') => self.go_to(Screen::Profile, state),
            KeyCode::Char('n') => {
                if self.compose.editing.is_some() {
                    self.compose = ComposeForm::default();
                }
                self.go_to(Screen::Compose, state)
            }
            KeyCode::Tab => {
                let idx = Screen::ALL.iter().position(|s| *s == self.screen).unwrap_or(0);
                let next = Screen::ALL[(idx + 1) % (Screen::ALL.len() - 1)];
                self.go_to(next, state)
            }
            KeyCode::Char('j') | KeyCode::Down => {
                self.move_selection(state, true);
                None
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.move_selection(state, false);
                None
            }
            KeyCode::Char('r') => Some(TuiCommand::Refresh(self.screen)),
            KeyCode::Char('o') if state.auth == AuthState::SignedIn => Some(TuiCommand::SignOut),
            KeyCode::Char('i') if state.auth == AuthState::SignedOut => Some(TuiCommand::SignIn),
            _ if self.screen == Screen::Profile => self.handle_profile_key(key, state),
            _ => self.handle_list_key(key, state),
        }
    }

    fn handle_list_key(&mut self, key: KeyEvent, state: &AppState) -> Option<TuiCommand> {
        match key.code {
            KeyCode::Char('/') => {
                let kind = self.screen.list_kind()?;
                self.mode = Mode::Search(state.list(kind).query.search.clone());
                None
            }
            KeyCode::Char('c') => self.query_command(state, |q| q.category = next_category(q.category)),
            KeyCode::Char('s') => self.query_command(state, |q| q.sort = q.sort.next()),
            KeyCode::Char('v') => self.query_command(state, |q| q.status = next_status(q.status)),
            KeyCode::Char('t') => {
                let kind = self.screen.list_kind()?;
                let tags = &state.list(kind).tags;
                self.query_command(state, |q| {
                    let next = match q.tags.first() {
                        None => tags.first().cloned(),
                        Some(current) => tags
                            .iter()
                            .position(|t| t == current)
                            .and_then(|i| tags.get(i + 1))
                            .cloned(),
                    };
                    q.tags = next.into_iter().collect();
                })
            }
            KeyCode::Char('x') => self.query_command(state, |q| *q = FeedQuery { sort: q.sort, ..Default::default() }),
            KeyCode::Enter => self.selected_post(state).map(|(_, id)| TuiCommand::OpenPost(id)),
            KeyCode::Char('l') => self.selected_post(state).map(|(_, id)| TuiCommand::ToggleLike(id)),
            KeyCode::Char('f') => self.selected_post(state).map(|(_, id)| TuiCommand::ToggleFavorite(id)),
            KeyCode::Char('d') => {
                let (kind, id) = self.selected_post(state)?;
                let row = state.list(kind).rows.iter().find(|r| r.id == id)?;
                if row.is_mine {
                    self.mode = Mode::ConfirmDelete(id);
                } else {
                    self.flash = Some("Only the author can delete a post".to_string());
                }
                None
            }
            KeyCode::Char('e') => {
                let (kind, id) = self.selected_post(state)?;
                let row = state.list(kind).rows.iter().find(|r| r.id == id)?;
                if !row.is_mine {
                    self.flash = Some("Only the author can edit a post".to_string());
                    return None;
                }
                let form = ComposeForm::edit(row);
                let cmd = self.go_to(Screen::Compose, state);
                if self.screen == Screen::Compose {
                    self.compose = form;
                }
                cmd
            }
            KeyCode::Char('p') => {
                let (kind, id) = self.selected_post(state)?;
                let row = state.list(kind).rows.iter().find(|r| r.id == id)?;
                if !row.is_mine {
                    return None;
                }
                let next = next_status(Some(row.status)).unwrap_or(PostStatus::Draft);
                Some(TuiCommand::SetStatus(id, next))
            }
            _ => None,
        }
    }

    fn handle_search_key(&mut self, key: KeyEvent, state: &AppState, text: &mut String) -> Option<TuiCommand> {
        match key.code {
            KeyCode::Esc | KeyCode::Enter => {
                self.mode = Mode::Browse;
                None
            }
            KeyCode::Backspace => {
                text.pop();
                self.mode = Mode::Search(text.clone());
                let search = text.clone();
                self.query_command(state, |q| q.search = search)
            }
            KeyCode::Char(c) => {
                text.push(c);
                self.mode = Mode::Search(text.clone());
                let search = text.clone();
                self.query_command(state, |q| q.search = search)
            }
            _ => None,
        }
    }

    fn handle_profile_key(&mut self, key: KeyEvent, state: &AppState) -> Option<TuiCommand> {
        match key.code {
            KeyCode::Char('e') => {
                let view = state.profile.as_ref()?;
                self.mode = Mode::EditProfile(ProfileForm::from_profile(&view.profile));
                self.flash = None;
                None
            }
            KeyCode::Char(' ') | KeyCode::Enter => SettingKey::ALL
                .get(self.setting_cursor)
                .map(|k| TuiCommand::ToggleSetting(*k)),
            KeyCode::Char('w') => Some(TuiCommand::SaveSettings),
            _ => None,
        }
    }

    fn handle_profile_form_key(&mut self, key: KeyEvent, state: &AppState, form: &mut ProfileForm) -> Option<TuiCommand> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('s') {
            return self.submit(state, form.to_command());
        }
        match key.code {
            KeyCode::Esc => {
                self.mode = Mode::Browse;
                self.awaiting_save = None;
                self.flash = None;
                return None;
            }
            KeyCode::Tab | KeyCode::Down | KeyCode::Enter => form.field = form.field.step(true),
            KeyCode::BackTab | KeyCode::Up => form.field = form.field.step(false),
            KeyCode::Backspace => {
                form.text_mut().pop();
            }
            KeyCode::Char(c) => form.text_mut().push(c),
            _ => {}
        }
        self.mode = Mode::EditProfile(form.clone());
        None
    }

    fn handle_compose_key(&mut self, key: KeyEvent, state: &AppState) -> Option<TuiCommand> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('s') {
            let cmd = self.compose.to_command();
            return self.submit(state, cmd);
        }
        if key.code == KeyCode::Esc {
            // An abandoned edit is dropped; a new draft is kept for later.
            self.screen = if self.compose.editing.take().is_some() {
                self.compose = ComposeForm::default();
                Screen::MyPosts
            } else {
                Screen::Feed
            };
            self.awaiting_save = None;
            self.flash = None;
            return None;
        }

        let form = &mut self.compose;
        match key.code {
            KeyCode::Tab | KeyCode::Down => form.field = form.field.step(true),
            KeyCode::BackTab | KeyCode::Up => form.field = form.field.step(false),
            KeyCode::Left | KeyCode::Right | KeyCode::Char(' ')
                if matches!(form.field, ComposeField::Category | ComposeField::Status) =>
            {
                form.cycle()
            }
            KeyCode::Enter if form.field == ComposeField::Content => form.content.push('\n'),
            KeyCode::Enter => form.field = form.field.step(true),
            KeyCode::Backspace => {
                if let Some(text) = form.text_mut() {
                    text.pop();
                }
            }
            KeyCode::Char(c) => {
                if let Some(text) = form.text_mut() {
                    text.push(c);
                }
            }
            _ => {}
        }
        None
    }
}

/// Why the TUI returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuiExit {
    Quit,
    SignIn,
}

/// Run the TUI. Reads state from `state_rx`, sends commands on `cmd_tx`.
pub async fn run_tui(
    state_rx: watch::Receiver<AppState>,
    cmd_tx: tokio::sync::mpsc::Sender<TuiCommand>,
) -> Result<TuiExit> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = tui_loop(&mut terminal, state_rx, cmd_tx).await;

    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

async fn tui_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    mut state_rx: watch::Receiver<AppState>,
    cmd_tx: tokio::sync::mpsc::Sender<TuiCommand>,
) -> Result<TuiExit> {
    let mut events = EventStream::new();
    let mut ui = UiState::new();

    loop {
        let state = state_rx.borrow_and_update().clone();
        ui.sync(&state);
        terminal.draw(|f| render::draw(f, &state, &ui))?;

        tokio::select! {
            event = events.next() => match event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    if let Some(cmd) = ui.handle_key(key, &state) {
                        let exit = match cmd {
                            TuiCommand::Quit => Some(TuiExit::Quit),
                            TuiCommand::SignIn => Some(TuiExit::SignIn),
                            _ => None,
                        };
                        let _ = cmd_tx.send(cmd).await;
                        if let Some(exit) = exit {
                            return Ok(exit);
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(TuiExit::Quit),
            },
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return Ok(TuiExit::Quit);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use state::PostRow;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn row(id: &str, mine: bool) -> PostRow {
        PostRow {
            id: id.to_string(),
            title: id.to_string(),
            excerpt: String::new(),
            content: format!("body of {}", id),
            author: "ada".to_string(),
            category: Category::Other,
            status: PostStatus::Published,
            tags: Vec::new(),
            created: "2024-01-01".to_string(),
            like_count: 0,
            comments: 0,
            views: 0,
            liked: false,
            favorited: false,
            pending: false,
            is_mine: mine,
        }
    }

    fn signed_in_state() -> AppState {
        let mut state = AppState::new();
        state.auth = AuthState::SignedIn;
        state.feed.rows = vec![row("a", false), row("b", true)];
        state.feed.tags = vec!["go".to_string(), "rust".to_string()];
        state.feed.loaded = true;
        state
    }

    #[test]
    fn test_like_targets_selected_row() {
        let state = signed_in_state();
        let mut ui = UiState::new();
        ui.handle_key(key(KeyCode::Char('j')), &state);
        match ui.handle_key(key(KeyCode::Char('l')), &state) {
            Some(TuiCommand::ToggleLike(id)) => assert_eq!(id, "b"),
            other => panic!("unexpected {:?}", other),
        }
        // Selection stops at the last row.
        ui.handle_key(key(KeyCode::Char('j')), &state);
        assert_eq!(ui.selected(ListKind::Feed), 1);
    }

    #[test]
    fn test_protected_screen_needs_sign_in() {
        let mut state = signed_in_state();
        state.auth = AuthState::SignedOut;
        let mut ui = UiState::new();
        assert!(ui.handle_key(key(KeyCode::Char('3')), &state).is_none());
        assert_eq!(ui.screen, Screen::Feed);
        assert!(ui.flash.as_deref().is_some_and(|f| f.contains("Favorites")));
    }

    #[test]
    fn test_sign_in_only_offered_to_guests() {
        let mut state = signed_in_state();
        let mut ui = UiState::new();
        assert!(ui.handle_key(key(KeyCode::Char('i')), &state).is_none());
        state.auth = AuthState::SignedOut;
        assert!(matches!(ui.handle_key(key(KeyCode::Char('i')), &state), Some(TuiCommand::SignIn)));
        assert!(ui.handle_key(key(KeyCode::Char('o')), &state).is_none());
    }

    #[test]
    fn test_switching_to_unloaded_list_requests_refresh() {
        let state = signed_in_state();
        let mut ui = UiState::new();
        match ui.handle_key(key(KeyCode::Char('2')), &state) {
            Some(TuiCommand::Refresh(Screen::MyPosts)) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(ui.screen, Screen::MyPosts);
    }

    #[test]
    fn test_search_typing_updates_query() {
        let state = signed_in_state();
        let mut ui = UiState::new();
        assert!(ui.handle_key(key(KeyCode::Char('/')), &state).is_none());
        ui.handle_key(key(KeyCode::Char('r')), &state);
        match ui.handle_key(key(KeyCode::Char('s')), &state) {
            Some(TuiCommand::SetQuery(ListKind::Feed, q)) => assert_eq!(q.search, "rs"),
            other => panic!("unexpected {:?}", other),
        }
        ui.handle_key(key(KeyCode::Enter), &state);
        assert_eq!(ui.mode, Mode::Browse);
    }

    #[test]
    fn test_tag_filter_cycles() {
        let mut state = signed_in_state();
        let mut ui = UiState::new();
        let Some(TuiCommand::SetQuery(_, q)) = ui.handle_key(key(KeyCode::Char('t')), &state) else {
            panic!("expected query");
        };
        assert_eq!(q.tags, vec!["go"]);
        state.feed.query = q;
        let Some(TuiCommand::SetQuery(_, q)) = ui.handle_key(key(KeyCode::Char('t')), &state) else {
            panic!("expected query");
        };
        assert_eq!(q.tags, vec!["rust"]);
        state.feed.query = q;
        let Some(TuiCommand::SetQuery(_, q)) = ui.handle_key(key(KeyCode::Char('t')), &state) else {
            panic!("expected query");
        };
        assert!(q.tags.is_empty());
    }

    #[test]
    fn test_delete_needs_ownership_and_confirmation() {
        let state = signed_in_state();
        let mut ui = UiState::new();
        assert!(ui.handle_key(key(KeyCode::Char('d')), &state).is_none());
        assert_eq!(ui.mode, Mode::Browse);
        assert!(ui.flash.is_some());

        ui.handle_key(key(KeyCode::Down), &state);
        assert!(ui.handle_key(key(KeyCode::Char('d')), &state).is_none());
        assert_eq!(ui.mode, Mode::ConfirmDelete("b".to_string()));
        match ui.handle_key(key(KeyCode::Char('y')), &state) {
            Some(TuiCommand::DeletePost(id)) => assert_eq!(id, "b"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_compose_builds_publish_command() {
        let state = signed_in_state();
        let mut ui = UiState::new();
        assert!(matches!(
            ui.handle_key(key(KeyCode::Char('n')), &state),
            Some(TuiCommand::Refresh(Screen::Compose))
        ));
        assert_eq!(ui.screen, Screen::Compose);
        for c in "Hi".chars() {
            ui.handle_key(key(KeyCode::Char(c)), &state);
        }
        ui.handle_key(key(KeyCode::Tab), &state);
        ui.handle_key(key(KeyCode::Char('x')), &state);
        ui.handle_key(key(KeyCode::Tab), &state);
        ui.handle_key(key(KeyCode::Right), &state);
        ui.handle_key(key(KeyCode::Tab), &state);
        for c in "a, b".chars() {
            ui.handle_key(key(KeyCode::Char(c)), &state);
        }
        let save = KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL);
        match ui.handle_key(save, &state) {
            Some(TuiCommand::Publish { draft, image_path }) => {
                assert_eq!(draft.title, "Hi");
                assert_eq!(draft.content, "x");
                assert_eq!(draft.category, Some(Category::ALL[0]));
                assert_eq!(draft.tags, vec!["a", "b"]);
                assert!(image_path.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        // The form stays until the engine reports the post saved.
        assert_eq!(ui.screen, Screen::Compose);
        assert_eq!(ui.compose.title, "Hi");

        let mut saved = state.clone();
        saved.forms.saved += 1;
        ui.sync(&saved);
        assert_eq!(ui.screen, Screen::MyPosts);
        assert!(ui.compose.title.is_empty());
        assert!(ui.awaiting_save.is_none());
    }

    #[test]
    fn test_failed_publish_keeps_the_form() {
        let state = signed_in_state();
        let mut ui = UiState::new();
        ui.handle_key(key(KeyCode::Char('n')), &state);
        for c in "Draft".chars() {
            ui.handle_key(key(KeyCode::Char(c)), &state);
        }
        let save = KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL);
        assert!(ui.handle_key(save, &state).is_some());

        let mut failed = state.clone();
        failed.forms.failed += 1;
        ui.sync(&failed);
        assert_eq!(ui.screen, Screen::Compose);
        assert_eq!(ui.compose.title, "Draft");
        assert!(ui.flash.as_deref().is_some_and(|f| f.contains("Not saved")));

        // A later save of another form does not close this one.
        let mut later = failed.clone();
        later.forms.saved += 1;
        ui.sync(&later);
        assert_eq!(ui.screen, Screen::Compose);
    }

    #[test]
    fn test_edit_own_post_sends_edit_command() {
        let state = signed_in_state();
        let mut ui = UiState::new();
        assert!(ui.handle_key(key(KeyCode::Char('e')), &state).is_none());
        assert_eq!(ui.screen, Screen::Feed);

        ui.handle_key(key(KeyCode::Down), &state);
        ui.handle_key(key(KeyCode::Char('e')), &state);
        assert_eq!(ui.screen, Screen::Compose);
        assert_eq!(ui.compose.content, "body of b");
        ui.handle_key(key(KeyCode::Char('!')), &state);

        let save = KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL);
        match ui.handle_key(save, &state) {
            Some(TuiCommand::EditPost { post_id, draft, image_path }) => {
                assert_eq!(post_id, "b");
                assert_eq!(draft.title, "b!");
                assert_eq!(draft.category, Some(Category::Other));
                assert!(image_path.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }

        // Leaving an edit drops it, so the next new post starts empty.
        ui.handle_key(key(KeyCode::Esc), &state);
        assert_eq!(ui.screen, Screen::MyPosts);
        assert!(ui.compose.editing.is_none());
        assert!(ui.compose.title.is_empty());
    }

    #[test]
    fn test_enter_opens_selected_post() {
        let state = signed_in_state();
        let mut ui = UiState::new();
        match ui.handle_key(key(KeyCode::Enter), &state) {
            Some(TuiCommand::OpenPost(id)) => assert_eq!(id, "a"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_profile_edit_form() {
        let mut state = signed_in_state();
        state.profile = Some(crate::service::ProfileView {
            profile: Profile {
                id: "me".to_string(),
                username: Some("ada".to_string()),
                full_name: None,
                avatar_url: None,
                bio: Some("hi".to_string()),
                website: None,
                settings: None,
                role: None,
                created_at: None,
                updated_at: None,
            },
            stats: Default::default(),
            settings: Default::default(),
            email: None,
            joined_at: None,
            last_sign_in_at: None,
        });
        let mut ui = UiState::new();
        ui.handle_key(key(KeyCode::Char('4')), &state);
        ui.handle_key(key(KeyCode::Char('e')), &state);
        assert!(matches!(ui.mode, Mode::EditProfile(_)));

        // Jump to the avatar field and type a path.
        ui.handle_key(key(KeyCode::BackTab), &state);
        for c in "me.png".chars() {
            ui.handle_key(key(KeyCode::Char(c)), &state);
        }
        let save = KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL);
        match ui.handle_key(save, &state) {
            Some(TuiCommand::UpdateProfile { update, avatar_path }) => {
                assert_eq!(update.username.as_deref(), Some("ada"));
                assert_eq!(update.bio.as_deref(), Some("hi"));
                assert_eq!(avatar_path, Some(PathBuf::from("me.png")));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(ui.mode, Mode::EditProfile(_)));

        let mut saved = state.clone();
        saved.forms.saved += 1;
        ui.sync(&saved);
        assert_eq!(ui.mode, Mode::Browse);
        assert_eq!(ui.screen, Screen::Profile);
    }

    #[test]
    fn test_profile_setting_toggle() {
        let state = signed_in_state();
        let mut ui = UiState::new();
        ui.handle_key(key(KeyCode::Char('4')), &state);
        ui.handle_key(key(KeyCode::Down), &state);
        match ui.handle_key(key(KeyCode::Char(' ')), &state) {
            Some(TuiCommand::ToggleSetting(SettingKey::PushNotifications)) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            ui.handle_key(key(KeyCode::Char('w')), &state),
            Some(TuiCommand::SaveSettings)
        ));
    }
}
