use crate::backend::auth::SessionHandle;
use crate::backend::types::{
    Category, NewPost, Notification, Post, PostStatus, PostUpdate, Profile, ProfileStats, ProfileUpdate, UserSettings,
};
use crate::backend::{Backend, ImageKind};
use crate::feed::optimistic::ToggleKind;
use crate::feed::query::FeedQuery;
use crate::feed::store::{Library, ListKind, ToggleRejected};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("sign in to do that")]
    SignInRequired,
    #[error(transparent)]
    Rejected(#[from] ToggleRejected),
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("image is {actual} bytes, the limit is {max}")]
    ImageTooLarge { max: u64, actual: u64 },
    #[error("only the author can change this post")]
    NotAuthor,
    #[error("update to post {0} was already undone after timing out")]
    Superseded(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// What the compose screen collects.
#[derive(Debug, Clone)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    pub category: Option<Category>,
    pub tags: Vec<String>,
    pub status: PostStatus,
    pub image: Option<ImageUpload>,
}

impl Default for PostDraft {
    fn default() -> Self {
        Self {
            title: String::new(),
            content: String::new(),
            category: None,
            tags: Vec::new(),
            status: PostStatus::Published,
            image: None,
        }
    }
}

struct CleanDraft {
    title: String,
    content: String,
    category: Category,
    tags: Vec<String>,
}

impl PostDraft {
    fn clean(&self) -> Result<CleanDraft, ActionError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ActionError::MissingField("title"));
        }
        let content = self.content.trim();
        if content.is_empty() {
            return Err(ActionError::MissingField("content"));
        }
        let category = self.category.ok_or(ActionError::MissingField("category"))?;

        let mut seen = HashSet::new();
        let tags = self
            .tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty() && seen.insert(t.to_string()))
            .map(str::to_string)
            .collect();

        Ok(CleanDraft {
            title: title.to_string(),
            content: content.to_string(),
            category,
            tags,
        })
    }
}

/// A like/favorite write that has been applied locally and still has to be
/// sent. Detached from the service so the engine can run it in a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleWrite {
    pub post_id: String,
    pub user_id: String,
    pub kind: ToggleKind,
    pub target: bool,
    /// Attempt sequence from the pending registry.
    pub seq: u64,
}

impl ToggleWrite {
    pub async fn send<B: Backend + ?Sized>(&self, backend: &B) -> Result<()> {
        match (self.kind, self.target) {
            (ToggleKind::Like, liked) => backend.set_like(&self.post_id, &self.user_id, liked).await,
            (ToggleKind::Favorite, true) => backend.add_favorite(&self.post_id, &self.user_id).await,
            (ToggleKind::Favorite, false) => backend.remove_favorite(&self.post_id, &self.user_id).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileView {
    pub profile: Profile,
    pub stats: ProfileStats,
    pub settings: UserSettings,
    pub email: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
    pub last_sign_in_at: Option<DateTime<Utc>>,
}

/// Screen operations on top of a `Backend`, with the local post library they
/// keep up to date.
pub struct BlogService<B: Backend> {
    backend: Arc<B>,
    session: Arc<SessionHandle>,
    max_upload_bytes: u64,
    pub library: Library,
}

impl<B: Backend> BlogService<B> {
    pub fn new(backend: Arc<B>, session: Arc<SessionHandle>, max_upload_bytes: u64) -> Self {
        let user_id = session.user_id().unwrap_or_default();
        Self {
            backend,
            session,
            max_upload_bytes,
            library: Library::new(&user_id),
        }
    }

    pub fn backend(&self) -> Arc<B> {
        Arc::clone(&self.backend)
    }

    pub fn is_signed_in(&self) -> bool {
        self.session.user_id().is_some()
    }

    fn user_id(&self) -> Result<String, ActionError> {
        self.session.user_id().ok_or(ActionError::SignInRequired)
    }

    /// Like and favorite sets for seeding viewer state. Empty when signed out.
    async fn viewer_sets(&self) -> Result<(HashSet<String>, HashSet<String>)> {
        match self.session.user_id() {
            Some(user) => Ok((
                self.backend.liked_post_ids(&user).await?,
                self.backend.favorite_post_ids(&user).await?,
            )),
            None => Ok((HashSet::new(), HashSet::new())),
        }
    }

    /// Fetch published posts. Category and ordering go to the server; search
    /// and tags are applied locally by `FeedQuery::apply`.
    pub async fn load_feed(&mut self, query: &FeedQuery) -> Result<usize, ActionError> {
        let posts = self
            .backend
            .published_posts(query.category, query.sort.server_order())
            .await?;
        let (liked, favorited) = self.viewer_sets().await?;
        let count = posts.len();
        self.library.load(ListKind::Feed, posts, &liked, &favorited);
        tracing::debug!(count, "feed loaded");
        Ok(count)
    }

    pub async fn load_my_posts(&mut self) -> Result<usize, ActionError> {
        let user = self.user_id()?;
        let posts = self.backend.posts_by_author(&user).await?;
        let (liked, favorited) = self.viewer_sets().await?;
        let count = posts.len();
        self.library.load(ListKind::Mine, posts, &liked, &favorited);
        Ok(count)
    }

    pub async fn load_favorites(&mut self) -> Result<usize, ActionError> {
        let user = self.user_id()?;
        let posts = self.backend.favorite_posts(&user).await?;
        let liked = self.backend.liked_post_ids(&user).await?;
        let favorited: HashSet<String> = posts.iter().map(|p| p.id.clone()).collect();
        let count = posts.len();
        self.library.load(ListKind::Favorites, posts, &liked, &favorited);
        Ok(count)
    }

    pub async fn load_profile(&self) -> Result<ProfileView, ActionError> {
        let session = self.session.current().ok_or(ActionError::SignInRequired)?;
        let user = session.user;
        let profile = match self.backend.profile(&user.id).await? {
            Some(p) => p,
            None => Profile {
                id: user.id.clone(),
                username: Some(user.default_username()),
                full_name: user.metadata_str("full_name"),
                avatar_url: user.metadata_str("avatar_url"),
                bio: None,
                website: None,
                settings: None,
                role: user.role.clone(),
                created_at: user.created_at,
                updated_at: None,
            },
        };
        let stats = self.backend.profile_stats(&user.id).await?;
        let settings = match profile.settings {
            Some(s) => s,
            None => self.backend.load_settings(&user.id).await?,
        };
        Ok(ProfileView {
            profile,
            stats,
            settings,
            email: user.email,
            joined_at: user.created_at,
            last_sign_in_at: user.last_sign_in_at,
        })
    }

    /// Apply a like/favorite flip locally. The returned write must be sent and
    /// its outcome passed to `finish_toggle`.
    pub fn begin_toggle(&mut self, post_id: &str, kind: ToggleKind) -> Result<ToggleWrite, ActionError> {
        let user_id = self.user_id()?;
        let ticket = self.library.begin_toggle(post_id, kind)?;
        Ok(ToggleWrite {
            post_id: post_id.to_string(),
            user_id,
            kind,
            target: ticket.target,
            seq: ticket.seq,
        })
    }

    /// Confirm or roll back a write started with `begin_toggle`. A result for
    /// an attempt that already timed out is `Superseded` and changes nothing.
    pub fn finish_toggle(&mut self, write: &ToggleWrite, outcome: Result<()>) -> Result<bool, ActionError> {
        let settled = self
            .library
            .settle(&write.post_id, write.kind, write.seq, outcome.is_ok());
        if settled.is_none() {
            return Err(ActionError::Superseded(write.post_id.clone()));
        }
        match outcome {
            Ok(()) => {
                tracing::info!(post = %write.post_id, kind = ?write.kind, value = write.target, "toggle confirmed");
                Ok(write.target)
            }
            Err(e) => {
                tracing::warn!(post = %write.post_id, kind = ?write.kind, "toggle rolled back: {:#}", e);
                Err(ActionError::Backend(e))
            }
        }
    }

    async fn toggle(&mut self, post_id: &str, kind: ToggleKind) -> Result<bool, ActionError> {
        let write = self.begin_toggle(post_id, kind)?;
        let outcome = write.send(self.backend.as_ref()).await;
        self.finish_toggle(&write, outcome)
    }

    /// Returns the new liked value.
    pub async fn toggle_like(&mut self, post_id: &str) -> Result<bool, ActionError> {
        self.toggle(post_id, ToggleKind::Like).await
    }

    /// Returns the new favorited value.
    pub async fn toggle_favorite(&mut self, post_id: &str) -> Result<bool, ActionError> {
        self.toggle(post_id, ToggleKind::Favorite).await
    }

    async fn upload(&self, user_id: &str, kind: ImageKind, image: Option<&ImageUpload>) -> Result<Option<String>, ActionError> {
        let Some(image) = image else {
            return Ok(None);
        };
        let actual = image.bytes.len() as u64;
        if actual > self.max_upload_bytes {
            return Err(ActionError::ImageTooLarge {
                max: self.max_upload_bytes,
                actual,
            });
        }
        let url = self
            .backend
            .upload_image(user_id, kind, &image.file_name, image.bytes.clone())
            .await?;
        Ok(Some(url))
    }

    pub async fn create_post(&mut self, draft: &PostDraft) -> Result<Post, ActionError> {
        let user_id = self.user_id()?;
        let clean = draft.clean()?;
        let image_url = self.upload(&user_id, ImageKind::Post, draft.image.as_ref()).await?;
        let new_post = NewPost {
            title: clean.title,
            content: clean.content,
            category: clean.category,
            status: draft.status,
            image_url,
            tags: clean.tags,
            author_id: user_id,
        };
        let post = self.backend.create_post(&new_post).await?;
        tracing::info!(post = %post.id, status = post.status.as_str(), "post created");
        self.library.insert_post(post.clone());
        Ok(post)
    }

    fn check_author(&self, post_id: &str, user_id: &str) -> Result<(), ActionError> {
        match self.library.find_post(post_id) {
            Some(post) if post.author_id != user_id => Err(ActionError::NotAuthor),
            _ => Ok(()),
        }
    }

    pub async fn update_post(&mut self, post_id: &str, draft: &PostDraft) -> Result<Post, ActionError> {
        let user_id = self.user_id()?;
        self.check_author(post_id, &user_id)?;
        let clean = draft.clean()?;
        let image_url = self.upload(&user_id, ImageKind::Post, draft.image.as_ref()).await?;
        let update = PostUpdate {
            title: Some(clean.title),
            content: Some(clean.content),
            category: Some(clean.category),
            status: Some(draft.status),
            image_url,
            tags: Some(clean.tags),
            updated_at: Some(Utc::now()),
        };
        let post = self.backend.update_post(post_id, &user_id, &update).await?;
        self.library.update_post(post.clone());
        Ok(post)
    }

    /// Change only the status of one of the viewer's posts, e.g. archive it.
    pub async fn set_post_status(&mut self, post_id: &str, status: PostStatus) -> Result<Post, ActionError> {
        let user_id = self.user_id()?;
        self.check_author(post_id, &user_id)?;
        let update = PostUpdate {
            status: Some(status),
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        let post = self.backend.update_post(post_id, &user_id, &update).await?;
        self.library.update_post(post.clone());
        Ok(post)
    }

    pub async fn delete_post(&mut self, post_id: &str) -> Result<(), ActionError> {
        let user_id = self.user_id()?;
        self.check_author(post_id, &user_id)?;
        self.backend.delete_post(post_id, &user_id).await?;
        self.library.remove_post(post_id);
        tracing::info!(post = %post_id, "post deleted");
        Ok(())
    }

    /// Save profile fields. A new avatar is uploaded to the profile image
    /// bucket first and replaces `avatar_url`.
    pub async fn update_profile(
        &self,
        update: ProfileUpdate,
        avatar: Option<ImageUpload>,
    ) -> Result<Profile, ActionError> {
        let user_id = self.user_id()?;
        let trim = |v: Option<String>| v.map(|s| s.trim().to_string());
        let mut update = ProfileUpdate {
            username: trim(update.username),
            full_name: trim(update.full_name),
            avatar_url: trim(update.avatar_url),
            bio: trim(update.bio),
            website: trim(update.website),
        };
        if update.username.as_deref() == Some("") {
            return Err(ActionError::MissingField("username"));
        }
        if let Some(url) = self.upload(&user_id, ImageKind::Avatar, avatar.as_ref()).await? {
            update.avatar_url = Some(url);
        }
        let profile = self.backend.upsert_profile(&update).await?;
        tracing::info!(user = %user_id, "profile updated");
        Ok(profile)
    }

    /// Refetch one post and the viewer's flags for it, e.g. when it is opened.
    pub async fn open_post(&mut self, post_id: &str) -> Result<Post, ActionError> {
        let post = self.backend.post(post_id).await?;
        let flags = match self.session.user_id() {
            Some(user) => Some((
                self.backend.like_status(post_id, &user).await?,
                self.backend.is_favorite(post_id, &user).await?,
            )),
            None => None,
        };
        self.library.refresh_post(post.clone(), flags);
        Ok(post)
    }

    /// Tags the viewer has used before, offered on the compose screen.
    pub async fn my_tags(&self) -> Result<Vec<String>, ActionError> {
        let user_id = self.user_id()?;
        Ok(self.backend.author_tags(&user_id).await?)
    }

    pub async fn save_settings(&self, settings: &UserSettings) -> Result<(), ActionError> {
        let user_id = self.user_id()?;
        self.backend.save_settings(&user_id, settings).await?;
        tracing::info!(user = %user_id, "settings saved");
        Ok(())
    }

    /// Drop all local state, e.g. after sign-out.
    pub fn reset(&mut self) {
        self.library = Library::new(&self.session.user_id().unwrap_or_default());
    }
}

/// One-line text for a notification row.
pub fn notification_message(notification: &Notification) -> String {
    let actor = notification
        .data
        .get("actor_name")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("Someone");
    match notification.kind.as_str() {
        "like" => format!("{} liked your post", actor),
        "comment" => format!("{} commented on your post", actor),
        "follow" => format!("{} started following you", actor),
        "mention" => format!("{} mentioned you in a post", actor),
        "reply" => format!("{} replied to your comment", actor),
        _ => "You have a new notification".to_string(),
    }
}
