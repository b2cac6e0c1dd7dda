pub mod auth;
pub mod error;
pub mod realtime;
pub mod rest;
pub mod storage;
pub mod types;

use crate::config::StorageConfig;
use anyhow::Result;
use async_trait::async_trait;
use rest::{Order, RestApi};
use std::collections::HashSet;
use storage::StorageApi;
use types::*;

/// What an uploaded image illustrates. Each kind has its own bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Post,
    Avatar,
}

/// The slice of the managed platform the application screens talk to.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn published_posts(&self, category: Option<Category>, order: Order) -> Result<Vec<Post>>;
    async fn posts_by_author(&self, author_id: &str) -> Result<Vec<Post>>;
    async fn post(&self, post_id: &str) -> Result<Post>;
    async fn author_tags(&self, author_id: &str) -> Result<Vec<String>>;
    async fn favorite_posts(&self, user_id: &str) -> Result<Vec<Post>>;
    async fn liked_post_ids(&self, user_id: &str) -> Result<HashSet<String>>;
    async fn favorite_post_ids(&self, user_id: &str) -> Result<HashSet<String>>;
    async fn like_status(&self, post_id: &str, user_id: &str) -> Result<bool>;
    async fn is_favorite(&self, post_id: &str, user_id: &str) -> Result<bool>;
    async fn set_like(&self, post_id: &str, user_id: &str, liked: bool) -> Result<()>;
    async fn add_favorite(&self, post_id: &str, user_id: &str) -> Result<()>;
    async fn remove_favorite(&self, post_id: &str, user_id: &str) -> Result<()>;
    async fn create_post(&self, post: &NewPost) -> Result<Post>;
    async fn update_post(&self, post_id: &str, author_id: &str, update: &PostUpdate) -> Result<Post>;
    async fn delete_post(&self, post_id: &str, author_id: &str) -> Result<()>;
    async fn profile(&self, user_id: &str) -> Result<Option<Profile>>;
    async fn upsert_profile(&self, update: &ProfileUpdate) -> Result<Profile>;
    async fn profile_stats(&self, user_id: &str) -> Result<ProfileStats>;
    async fn load_settings(&self, user_id: &str) -> Result<UserSettings>;
    async fn save_settings(&self, user_id: &str, settings: &UserSettings) -> Result<()>;
    /// Store an image and return its public URL.
    async fn upload_image(&self, user_id: &str, kind: ImageKind, file_name: &str, bytes: Vec<u8>) -> Result<String>;
}

/// REST tables plus object storage, as one `Backend`.
pub struct Platform {
    pub rest: RestApi,
    pub storage: StorageApi,
    storage_config: StorageConfig,
}

impl Platform {
    pub fn new(rest: RestApi, storage: StorageApi, storage_config: StorageConfig) -> Self {
        Self {
            rest,
            storage,
            storage_config,
        }
    }
}

#[async_trait]
impl Backend for Platform {
    async fn published_posts(&self, category: Option<Category>, order: Order) -> Result<Vec<Post>> {
        self.rest.published_posts(category, order).await
    }

    async fn posts_by_author(&self, author_id: &str) -> Result<Vec<Post>> {
        self.rest.posts_by_author(author_id).await
    }

    async fn post(&self, post_id: &str) -> Result<Post> {
        self.rest.post(post_id).await
    }

    async fn author_tags(&self, author_id: &str) -> Result<Vec<String>> {
        self.rest.author_tags(author_id).await
    }

    async fn favorite_posts(&self, user_id: &str) -> Result<Vec<Post>> {
        self.rest.favorite_posts(user_id).await
    }

    async fn liked_post_ids(&self, user_id: &str) -> Result<HashSet<String>> {
        self.rest.liked_post_ids(user_id).await
    }

    async fn favorite_post_ids(&self, user_id: &str) -> Result<HashSet<String>> {
        self.rest.favorite_post_ids(user_id).await
    }

    async fn like_status(&self, post_id: &str, user_id: &str) -> Result<bool> {
        self.rest.like_status(post_id, user_id).await
    }

    async fn is_favorite(&self, post_id: &str, user_id: &str) -> Result<bool> {
        self.rest.is_favorite(post_id, user_id).await
    }

    async fn set_like(&self, post_id: &str, user_id: &str, liked: bool) -> Result<()> {
        self.rest.set_like(post_id, user_id, liked).await
    }

    async fn add_favorite(&self, post_id: &str, user_id: &str) -> Result<()> {
        self.rest.add_favorite(post_id, user_id).await
    }

    async fn remove_favorite(&self, post_id: &str, user_id: &str) -> Result<()> {
        self.rest.remove_favorite(post_id, user_id).await
    }

    async fn create_post(&self, post: &NewPost) -> Result<Post> {
        self.rest.create_post(post).await
    }

    async fn update_post(&self, post_id: &str, author_id: &str, update: &PostUpdate) -> Result<Post> {
        self.rest.update_post(post_id, author_id, update).await
    }

    async fn delete_post(&self, post_id: &str, author_id: &str) -> Result<()> {
        self.rest.delete_post(post_id, author_id).await
    }

    async fn profile(&self, user_id: &str) -> Result<Option<Profile>> {
        self.rest.profile(user_id).await
    }

    async fn upsert_profile(&self, update: &ProfileUpdate) -> Result<Profile> {
        self.rest.upsert_profile(update).await
    }

    async fn profile_stats(&self, user_id: &str) -> Result<ProfileStats> {
        self.rest.profile_stats(user_id).await
    }

    async fn load_settings(&self, user_id: &str) -> Result<UserSettings> {
        self.rest.load_settings(user_id).await
    }

    async fn save_settings(&self, user_id: &str, settings: &UserSettings) -> Result<()> {
        self.rest.save_settings(user_id, settings).await
    }

    async fn upload_image(&self, user_id: &str, kind: ImageKind, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        let bucket = match kind {
            ImageKind::Post => &self.storage_config.post_images_bucket,
            ImageKind::Avatar => &self.storage_config.profile_images_bucket,
        };
        self.storage
            .ensure_bucket(bucket, true, self.storage_config.max_upload_bytes)
            .await?;
        let path = storage::image_object_path(user_id, file_name, chrono::Utc::now().timestamp_millis());
        self.storage
            .upload(
                bucket,
                &path,
                bytes,
                storage::image_content_type(file_name),
                self.storage_config.cache_control_secs,
            )
            .await?;
        Ok(self.storage.public_url(bucket, &path))
    }
}
