use super::auth::SessionHandle;
use super::error::{check, BackendError};
use super::types::*;
use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Columns embedded into every post query: the row plus its author profile.
const POST_SELECT: &str = "*,author:author_id(id,username,full_name,avatar_url)";

pub const SYSTEM_PROFILE_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Server-side ordering for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub column: &'static str,
    pub ascending: bool,
}

impl Order {
    pub const NEWEST: Order = Order {
        column: "created_at",
        ascending: false,
    };

    fn param(&self) -> String {
        format!("{}.{}", self.column, if self.ascending { "asc" } else { "desc" })
    }
}

/// Client for the platform's table gateway (PostgREST dialect).
pub struct RestApi {
    client: Client,
    session: Arc<SessionHandle>,
    base_url: String,
    anon_key: String,
}

#[derive(Debug, Deserialize)]
struct FavoriteRow {
    #[allow(dead_code)]
    post_id: String,
    posts: Option<Post>,
}

#[derive(Debug, Deserialize)]
struct PostIdRow {
    post_id: String,
}

#[derive(Debug, Deserialize)]
struct TagsRow {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SettingsRow {
    #[serde(default)]
    settings: Option<UserSettings>,
}

impl RestApi {
    pub fn new(client: Client, session: Arc<SessionHandle>, backend_url: &str, anon_key: &str) -> Self {
        Self {
            client,
            session,
            base_url: format!("{}/rest/v1", backend_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
        }
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, table);
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(self.session.bearer(&self.anon_key))
    }

    fn current_user(&self) -> Result<String> {
        self.session
            .user_id()
            .ok_or_else(|| anyhow::anyhow!("User not authenticated"))
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let resp = req
            .send()
            .await
            .with_context(|| format!("{} request failed", what))?;
        let resp = check(resp).await.with_context(|| format!("{} failed", what))?;
        Ok(resp)
    }

    async fn fetch<T: DeserializeOwned>(&self, req: RequestBuilder, what: &str) -> Result<T> {
        let resp = self.send(req, what).await?;
        resp.json()
            .await
            .with_context(|| format!("failed to parse {} response", what))
    }

    /// Request exactly one row back.
    async fn fetch_one<T: DeserializeOwned>(&self, req: RequestBuilder, what: &str) -> Result<T> {
        let req = req.header("Accept", "application/vnd.pgrst.object+json");
        self.fetch(req, what).await
    }

    // --- posts ---

    /// Published posts, optionally restricted to a category.
    pub async fn published_posts(&self, category: Option<Category>, order: Order) -> Result<Vec<Post>> {
        let mut params = vec![
            ("select", POST_SELECT.to_string()),
            ("status", "eq.published".to_string()),
            ("order", order.param()),
        ];
        if let Some(c) = category {
            params.push(("category", format!("eq.{}", c)));
        }
        let req = self.request(Method::GET, "posts").query(&params);
        let posts: Vec<Post> = self.fetch(req, "GET posts").await?;
        tracing::debug!(count = posts.len(), category = ?category, "fetched published posts");
        Ok(posts)
    }

    pub async fn posts_by_author(&self, author_id: &str) -> Result<Vec<Post>> {
        let req = self.request(Method::GET, "posts").query(&[
            ("select", POST_SELECT.to_string()),
            ("author_id", format!("eq.{}", author_id)),
            ("order", Order::NEWEST.param()),
        ]);
        self.fetch(req, "GET author posts").await
    }

    pub async fn post(&self, post_id: &str) -> Result<Post> {
        let req = self.request(Method::GET, "posts").query(&[
            ("select", POST_SELECT.to_string()),
            ("id", format!("eq.{}", post_id)),
        ]);
        self.fetch_one(req, "GET post").await
    }

    pub async fn create_post(&self, post: &NewPost) -> Result<Post> {
        let req = self
            .request(Method::POST, "posts")
            .query(&[("select", POST_SELECT)])
            .header("Prefer", "return=representation")
            .json(post);
        let created: Post = self.fetch_one(req, "create post").await?;
        tracing::info!(post_id = %created.id, "post created");
        Ok(created)
    }

    /// Update a post owned by `author_id`. Row-level security enforces the same
    /// rule server side; the filter keeps the request honest.
    pub async fn update_post(&self, post_id: &str, author_id: &str, update: &PostUpdate) -> Result<Post> {
        let mut update = update.clone();
        update.updated_at = Some(Utc::now());
        let req = self
            .request(Method::PATCH, "posts")
            .query(&[
                ("select", POST_SELECT.to_string()),
                ("id", format!("eq.{}", post_id)),
                ("author_id", format!("eq.{}", author_id)),
            ])
            .header("Prefer", "return=representation")
            .json(&update);
        self.fetch_one(req, "update post").await
    }

    pub async fn delete_post(&self, post_id: &str, author_id: &str) -> Result<()> {
        let req = self
            .request(Method::DELETE, "posts")
            .query(&[
                ("id", format!("eq.{}", post_id)),
                ("author_id", format!("eq.{}", author_id)),
            ])
            .header("Prefer", "return=minimal");
        self.send(req, "delete post").await?;
        tracing::info!(post_id, "post deleted");
        Ok(())
    }

    /// Distinct tags across an author's posts, sorted.
    pub async fn author_tags(&self, author_id: &str) -> Result<Vec<String>> {
        let req = self.request(Method::GET, "posts").query(&[
            ("select", "tags".to_string()),
            ("author_id", format!("eq.{}", author_id)),
        ]);
        let rows: Vec<TagsRow> = self.fetch(req, "GET author tags").await?;
        let tags: BTreeSet<String> = rows.into_iter().flat_map(|r| r.tags.unwrap_or_default()).collect();
        Ok(tags.into_iter().collect())
    }

    // --- profiles ---

    pub async fn profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let req = self.request(Method::GET, "profiles").query(&[
            ("select", "*".to_string()),
            ("id", format!("eq.{}", user_id)),
            ("limit", "1".to_string()),
        ]);
        let mut rows: Vec<Profile> = self.fetch(req, "GET profile").await?;
        Ok(rows.pop())
    }

    /// Upsert the signed-in user's profile row.
    pub async fn upsert_profile(&self, update: &ProfileUpdate) -> Result<Profile> {
        let user_id = self.current_user()?;
        let mut body = serde_json::to_value(update)?;
        body["id"] = serde_json::Value::String(user_id);
        body["updated_at"] = serde_json::Value::String(Utc::now().to_rfc3339());
        let req = self
            .request(Method::POST, "profiles")
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&body);
        self.fetch_one(req, "upsert profile").await
    }

    /// Create the profile row for a freshly signed-in user if it does not exist.
    pub async fn ensure_profile(&self, user: &User) -> Result<Profile> {
        if let Some(existing) = self.profile(&user.id).await? {
            return Ok(existing);
        }
        let update = ProfileUpdate {
            username: Some(user.default_username()),
            full_name: user.metadata_str("full_name"),
            avatar_url: user.metadata_str("avatar_url"),
            ..Default::default()
        };
        let profile = self.upsert_profile(&update).await?;
        tracing::info!(user = %user.id, username = ?profile.username, "profile created");
        Ok(profile)
    }

    pub async fn profile_stats(&self, user_id: &str) -> Result<ProfileStats> {
        let posts = self.count("posts", "author_id", user_id).await?;
        let followers = self.count("followers", "following_id", user_id).await?;
        let following = self.count("followers", "follower_id", user_id).await?;
        Ok(ProfileStats {
            posts,
            followers,
            following,
        })
    }

    pub async fn load_settings(&self, user_id: &str) -> Result<UserSettings> {
        let req = self.request(Method::GET, "profiles").query(&[
            ("select", "settings".to_string()),
            ("id", format!("eq.{}", user_id)),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<SettingsRow> = self.fetch(req, "GET settings").await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|r| r.settings)
            .unwrap_or_default())
    }

    pub async fn save_settings(&self, user_id: &str, settings: &UserSettings) -> Result<()> {
        let body = serde_json::json!({
            "settings": settings,
            "updated_at": Utc::now().to_rfc3339(),
        });
        let req = self
            .request(Method::PATCH, "profiles")
            .query(&[("id", format!("eq.{}", user_id))])
            .header("Prefer", "return=minimal")
            .json(&body);
        self.send(req, "save settings").await?;
        Ok(())
    }

    async fn count(&self, table: &str, column: &str, value: &str) -> Result<u64> {
        let req = self
            .request(Method::GET, table)
            .query(&[
                ("select", "*".to_string()),
                (column, format!("eq.{}", value)),
                ("limit", "1".to_string()),
            ])
            .header("Prefer", "count=exact");
        let what = format!("count {}", table);
        let resp = self.send(req, &what).await?;
        resp.headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total)
            .with_context(|| format!("{} response had no total", what))
    }

    // --- likes ---

    pub async fn like_status(&self, post_id: &str, user_id: &str) -> Result<bool> {
        let req = self.request(Method::GET, "post_likes").query(&[
            ("select", "post_id,user_id,liked".to_string()),
            ("post_id", format!("eq.{}", post_id)),
            ("user_id", format!("eq.{}", user_id)),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<PostLike> = self.fetch(req, "GET like status").await?;
        Ok(rows.first().is_some_and(|r| r.liked))
    }

    /// Ids of every post the user currently likes.
    pub async fn liked_post_ids(&self, user_id: &str) -> Result<HashSet<String>> {
        let req = self.request(Method::GET, "post_likes").query(&[
            ("select", "post_id".to_string()),
            ("user_id", format!("eq.{}", user_id)),
            ("liked", "eq.true".to_string()),
        ]);
        let rows: Vec<PostIdRow> = self.fetch(req, "GET likes").await?;
        Ok(rows.into_iter().map(|r| r.post_id).collect())
    }

    pub async fn set_like(&self, post_id: &str, user_id: &str, liked: bool) -> Result<()> {
        let row = PostLike {
            post_id: post_id.to_string(),
            user_id: user_id.to_string(),
            liked,
        };
        let req = self
            .request(Method::POST, "post_likes")
            .query(&[("on_conflict", "post_id,user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row);
        self.send(req, "set like").await?;
        Ok(())
    }

    // --- favorites ---

    pub async fn is_favorite(&self, post_id: &str, user_id: &str) -> Result<bool> {
        let req = self.request(Method::GET, "favorites").query(&[
            ("select", "post_id".to_string()),
            ("post_id", format!("eq.{}", post_id)),
            ("user_id", format!("eq.{}", user_id)),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<PostIdRow> = self.fetch(req, "GET favorite").await?;
        Ok(!rows.is_empty())
    }

    pub async fn favorite_post_ids(&self, user_id: &str) -> Result<HashSet<String>> {
        let req = self.request(Method::GET, "favorites").query(&[
            ("select", "post_id".to_string()),
            ("user_id", format!("eq.{}", user_id)),
        ]);
        let rows: Vec<PostIdRow> = self.fetch(req, "GET favorites").await?;
        Ok(rows.into_iter().map(|r| r.post_id).collect())
    }

    /// Posts the user has favorited. Favorites pointing at posts that are gone
    /// or hidden by row-level security come back as null and are dropped.
    pub async fn favorite_posts(&self, user_id: &str) -> Result<Vec<Post>> {
        let req = self.request(Method::GET, "favorites").query(&[
            ("select", format!("post_id,posts({})", POST_SELECT)),
            ("user_id", format!("eq.{}", user_id)),
            ("order", Order::NEWEST.param()),
        ]);
        let rows: Vec<FavoriteRow> = self.fetch(req, "GET favorite posts").await?;
        Ok(rows.into_iter().filter_map(|r| r.posts).collect())
    }

    /// Add a favorite. Favoriting twice is not an error.
    pub async fn add_favorite(&self, post_id: &str, user_id: &str) -> Result<()> {
        let row = Favorite {
            id: None,
            post_id: post_id.to_string(),
            user_id: user_id.to_string(),
        };
        let req = self
            .request(Method::POST, "favorites")
            .header("Prefer", "return=minimal")
            .json(&row);
        match self.send(req, "add favorite").await {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.downcast_ref::<BackendError>(), Some(BackendError::Conflict(_))) => {
                tracing::debug!(post_id, "post already favorited");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn remove_favorite(&self, post_id: &str, user_id: &str) -> Result<()> {
        let req = self
            .request(Method::DELETE, "favorites")
            .query(&[
                ("post_id", format!("eq.{}", post_id)),
                ("user_id", format!("eq.{}", user_id)),
            ])
            .header("Prefer", "return=minimal");
        self.send(req, "remove favorite").await?;
        Ok(())
    }

    // --- admin ---

    pub async fn rpc(&self, function: &str, args: &serde_json::Value) -> Result<serde_json::Value> {
        let req = self
            .request(Method::POST, &format!("rpc/{}", function))
            .json(args);
        let resp = self.send(req, &format!("rpc {}", function)).await?;
        let text = resp.text().await.unwrap_or_default();
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).with_context(|| format!("failed to parse rpc {} response", function))
    }

    /// Seed the system profile and row-level security policies. Only a
    /// service-role session is allowed to do this.
    pub async fn bootstrap(&self) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let system = serde_json::json!({
            "id": SYSTEM_PROFILE_ID,
            "username": "system",
            "full_name": "System Account",
            "created_at": now,
            "updated_at": now,
        });
        let req = self
            .request(Method::POST, "profiles")
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&system);
        self.send(req, "seed system profile").await?;

        let policies = [
            serde_json::json!({"table_name": "profiles"}),
            serde_json::json!({
                "table_name": "profiles",
                "policy_name": "Public profiles are viewable by everyone",
                "definition": "true",
                "command": "SELECT",
            }),
            serde_json::json!({
                "table_name": "profiles",
                "policy_name": "Users can update own profile",
                "definition": "auth.uid() = id",
                "command": "UPDATE",
            }),
        ];
        for (i, args) in policies.iter().enumerate() {
            let function = if i == 0 { "enable_rls" } else { "create_policy" };
            // Policies may already exist; that is not fatal.
            if let Err(e) = self.rpc(function, args).await {
                tracing::warn!(function, "bootstrap step failed: {:#}", e);
            }
        }
        tracing::info!("database bootstrap complete");
        Ok(())
    }
}

/// Total from a `Content-Range` header such as `0-0/42` or `*/0`.
fn content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn signed_in() -> Arc<SessionHandle> {
        let session = serde_json::from_value(serde_json::json!({
            "access_token": "user-token",
            "expires_in": 3600,
            "refresh_token": "r",
            "user": {"id": "user-1", "email": "ada@example.com"}
        }))
        .unwrap();
        Arc::new(SessionHandle::new(Some(session)))
    }

    fn post_body(id: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "title": "Hello",
            "content": "World",
            "category": "travel",
            "status": "published",
            "tags": ["a"],
            "author_id": "user-1",
            "author": {"id": "user-1", "username": "ada"},
            "likes_count": 3,
            "created_at": "2024-03-01T10:00:00+00:00"
        })
    }

    #[tokio::test]
    async fn test_published_posts_filters_and_orders() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/posts")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("status".into(), "eq.published".into()),
                Matcher::UrlEncoded("category".into(), "eq.travel".into()),
                Matcher::UrlEncoded("order".into(), "likes_count.desc".into()),
                Matcher::UrlEncoded("select".into(), POST_SELECT.into()),
            ]))
            .match_header("apikey", "anon")
            .match_header("authorization", "Bearer user-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(serde_json::json!([post_body("p1")]).to_string())
            .create_async()
            .await;

        let api = RestApi::new(Client::new(), signed_in(), &server.url(), "anon");
        let order = Order {
            column: "likes_count",
            ascending: false,
        };
        let posts = api.published_posts(Some(Category::Travel), order).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].author_name(), "ada");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_signed_out_requests_use_anon_bearer() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/posts")
            .match_query(Matcher::Any)
            .match_header("authorization", "Bearer anon")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let api = RestApi::new(Client::new(), Arc::new(SessionHandle::default()), &server.url(), "anon");
        assert!(api.published_posts(None, Order::NEWEST).await.unwrap().is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_post_is_scoped_to_author() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PATCH", "/rest/v1/posts")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("id".into(), "eq.p1".into()),
                Matcher::UrlEncoded("author_id".into(), "eq.user-1".into()),
            ]))
            .match_header("accept", "application/vnd.pgrst.object+json")
            .match_body(Matcher::PartialJson(serde_json::json!({"title": "Edited"})))
            .with_status(200)
            .with_body(post_body("p1").to_string())
            .create_async()
            .await;

        let api = RestApi::new(Client::new(), signed_in(), &server.url(), "anon");
        let update = PostUpdate {
            title: Some("Edited".to_string()),
            ..Default::default()
        };
        api.update_post("p1", "user-1", &update).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_set_like_upserts_on_conflict() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/post_likes")
            .match_query(Matcher::UrlEncoded("on_conflict".into(), "post_id,user_id".into()))
            .match_header("prefer", "resolution=merge-duplicates,return=minimal")
            .match_body(Matcher::Json(serde_json::json!({
                "post_id": "p1", "user_id": "user-1", "liked": true
            })))
            .with_status(201)
            .create_async()
            .await;

        let api = RestApi::new(Client::new(), signed_in(), &server.url(), "anon");
        api.set_like("p1", "user-1", true).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_single_post_and_viewer_status() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/rest/v1/posts")
            .match_query(Matcher::UrlEncoded("id".into(), "eq.p1".into()))
            .match_header("accept", "application/vnd.pgrst.object+json")
            .with_status(200)
            .with_body(post_body("p1").to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/rest/v1/post_likes")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("post_id".into(), "eq.p1".into()),
                Matcher::UrlEncoded("user_id".into(), "eq.user-1".into()),
            ]))
            .with_status(200)
            .with_body(r#"[{"post_id":"p1","user_id":"user-1","liked":false}]"#)
            .create_async()
            .await;
        server
            .mock("GET", "/rest/v1/favorites")
            .match_query(Matcher::UrlEncoded("post_id".into(), "eq.p1".into()))
            .with_status(200)
            .with_body(r#"[{"post_id":"p1"}]"#)
            .create_async()
            .await;

        let api = RestApi::new(Client::new(), signed_in(), &server.url(), "anon");
        let post = api.post("p1").await.unwrap();
        assert_eq!(post.likes_count, 3);
        // An unliked row still exists but does not count as a like.
        assert!(!api.like_status("p1", "user-1").await.unwrap());
        assert!(api.is_favorite("p1", "user-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_author_tags_are_sorted_and_unique() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/rest/v1/posts")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("select".into(), "tags".into()),
                Matcher::UrlEncoded("author_id".into(), "eq.user-1".into()),
            ]))
            .with_status(200)
            .with_body(r#"[{"tags":["rust","go"]},{"tags":null},{"tags":["go"]}]"#)
            .create_async()
            .await;

        let api = RestApi::new(Client::new(), signed_in(), &server.url(), "anon");
        assert_eq!(api.author_tags("user-1").await.unwrap(), vec!["go", "rust"]);
    }

    #[tokio::test]
    async fn test_duplicate_favorite_is_not_an_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/rest/v1/favorites")
            .with_status(409)
            .with_body(r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#)
            .create_async()
            .await;

        let api = RestApi::new(Client::new(), signed_in(), &server.url(), "anon");
        api.add_favorite("p1", "user-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_favorite_posts_drop_missing_rows() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/rest/v1/favorites")
            .match_query(Matcher::UrlEncoded("user_id".into(), "eq.user-1".into()))
            .with_status(200)
            .with_body(
                serde_json::json!([
                    {"post_id": "p1", "posts": post_body("p1")},
                    {"post_id": "gone", "posts": null}
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let api = RestApi::new(Client::new(), signed_in(), &server.url(), "anon");
        let posts = api.favorite_posts("user-1").await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "p1");
    }

    #[tokio::test]
    async fn test_profile_stats_reads_content_range() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/rest/v1/posts")
            .match_query(Matcher::Any)
            .match_header("prefer", "count=exact")
            .with_status(200)
            .with_header("content-range", "0-0/7")
            .with_body("[]")
            .create_async()
            .await;
        server
            .mock("GET", "/rest/v1/followers")
            .match_query(Matcher::UrlEncoded("following_id".into(), "eq.user-1".into()))
            .with_status(200)
            .with_header("content-range", "0-0/12")
            .with_body("[]")
            .create_async()
            .await;
        server
            .mock("GET", "/rest/v1/followers")
            .match_query(Matcher::UrlEncoded("follower_id".into(), "eq.user-1".into()))
            .with_status(200)
            .with_header("content-range", "*/0")
            .with_body("[]")
            .create_async()
            .await;

        let api = RestApi::new(Client::new(), signed_in(), &server.url(), "anon");
        let stats = api.profile_stats("user-1").await.unwrap();
        assert_eq!(
            stats,
            ProfileStats {
                posts: 7,
                followers: 12,
                following: 0
            }
        );
    }

    #[tokio::test]
    async fn test_ensure_profile_creates_missing_row() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/rest/v1/profiles")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;
        let upsert = server
            .mock("POST", "/rest/v1/profiles")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "id": "user-1", "username": "ada"
            })))
            .with_status(201)
            .with_body(r#"{"id":"user-1","username":"ada"}"#)
            .create_async()
            .await;

        let api = RestApi::new(Client::new(), signed_in(), &server.url(), "anon");
        let user: User = serde_json::from_value(serde_json::json!({
            "id": "user-1", "email": "ada@example.com"
        }))
        .unwrap();
        let profile = api.ensure_profile(&user).await.unwrap();
        assert_eq!(profile.username.as_deref(), Some("ada"));
        upsert.assert_async().await;
    }

    #[tokio::test]
    async fn test_upsert_profile_requires_session() {
        let api = RestApi::new(
            Client::new(),
            Arc::new(SessionHandle::default()),
            "http://127.0.0.1:9",
            "anon",
        );
        let err = api.upsert_profile(&ProfileUpdate::default()).await.unwrap_err();
        assert!(err.to_string().contains("not authenticated"));
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(content_range_total("0-24/3573458"), Some(3573458));
        assert_eq!(content_range_total("*/0"), Some(0));
        assert_eq!(content_range_total("0-24/*"), None);
    }
}
