use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Treat an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Category {
    Technology,
    Lifestyle,
    Travel,
    Food,
    Health,
    Business,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Technology,
        Category::Lifestyle,
        Category::Travel,
        Category::Food,
        Category::Health,
        Category::Business,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Technology => "technology",
            Category::Lifestyle => "lifestyle",
            Category::Travel => "travel",
            Category::Food => "food",
            Category::Health => "health",
            Category::Business => "business",
            Category::Other => "other",
        }
    }

    /// Unknown categories are filed under `Other`.
    pub fn parse_lenient(raw: &str) -> Self {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(raw))
            .unwrap_or(Category::Other)
    }
}

impl From<String> for Category {
    fn from(raw: String) -> Self {
        Self::parse_lenient(&raw)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum PostStatus {
    Draft,
    #[default]
    Published,
    Archived,
}

impl PostStatus {
    pub const ALL: [PostStatus; 3] = [PostStatus::Draft, PostStatus::Published, PostStatus::Archived];

    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
            PostStatus::Archived => "archived",
        }
    }

    /// Unknown statuses are treated as `Published`.
    pub fn parse_lenient(raw: &str) -> Self {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(raw))
            .unwrap_or(PostStatus::Published)
    }
}

impl From<String> for PostStatus {
    fn from(raw: String) -> Self {
        Self::parse_lenient(&raw)
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author columns embedded into post rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Author {
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.username.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: Category,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: PostStatus,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    pub author_id: String,
    #[serde(default, skip_serializing)]
    pub author: Option<Author>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub likes_count: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comments_count: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub views_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn author_name(&self) -> &str {
        self.author.as_ref().map_or("unknown", Author::display_name)
    }
}

/// Insert payload for the posts table.
#[derive(Debug, Clone, Serialize)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub category: Category,
    pub status: PostStatus,
    pub image_url: Option<String>,
    pub tags: Vec<String>,
    pub author_id: String,
}

/// Partial update for a post. Unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PostUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PostStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub email_notifications: bool,
    pub push_notifications: bool,
    pub public_profile: bool,
    pub two_factor_auth: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            email_notifications: true,
            push_notifications: false,
            public_profile: true,
            two_factor_auth: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    EmailNotifications,
    PushNotifications,
    PublicProfile,
    TwoFactorAuth,
}

impl SettingKey {
    pub const ALL: [SettingKey; 4] = [
        SettingKey::EmailNotifications,
        SettingKey::PushNotifications,
        SettingKey::PublicProfile,
        SettingKey::TwoFactorAuth,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SettingKey::EmailNotifications => "Email notifications",
            SettingKey::PushNotifications => "Push notifications",
            SettingKey::PublicProfile => "Public profile",
            SettingKey::TwoFactorAuth => "Two-factor authentication",
        }
    }
}

impl UserSettings {
    pub fn get(&self, key: SettingKey) -> bool {
        match key {
            SettingKey::EmailNotifications => self.email_notifications,
            SettingKey::PushNotifications => self.push_notifications,
            SettingKey::PublicProfile => self.public_profile,
            SettingKey::TwoFactorAuth => self.two_factor_auth,
        }
    }

    pub fn toggle(&mut self, key: SettingKey) {
        let slot = match key {
            SettingKey::EmailNotifications => &mut self.email_notifications,
            SettingKey::PushNotifications => &mut self.push_notifications,
            SettingKey::PublicProfile => &mut self.public_profile,
            SettingKey::TwoFactorAuth => &mut self.two_factor_auth,
        };
        *slot = !*slot;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub settings: Option<UserSettings>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Upsert payload for the profiles table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileStats {
    pub posts: u64,
    pub followers: u64,
    pub following: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostLike {
    pub post_id: String,
    pub user_id: String,
    pub liked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Favorite {
    #[serde(default, skip_serializing)]
    pub id: Option<String>,
    pub post_id: String,
    pub user_id: String,
}

/// Account record returned by the auth service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_sign_in_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_metadata: serde_json::Value,
}

impl User {
    /// Username derived from the email local part, or from the id when there is no email.
    pub fn default_username(&self) -> String {
        self.email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .filter(|local| !local.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("user_{}", self.id.chars().take(8).collect::<String>()))
    }

    pub fn metadata_str(&self, key: &str) -> Option<String> {
        self.user_metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}
