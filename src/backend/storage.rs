use super::auth::SessionHandle;
use super::error::{check, BackendError};
use anyhow::{Context, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Client;
use std::sync::Arc;

/// Client for the platform's object storage.
pub struct StorageApi {
    client: Client,
    session: Arc<SessionHandle>,
    backend_url: String,
    anon_key: String,
}

impl StorageApi {
    pub fn new(client: Client, session: Arc<SessionHandle>, backend_url: &str, anon_key: &str) -> Self {
        Self {
            client,
            session,
            backend_url: backend_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/storage/v1{}", self.backend_url, path)
    }

    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let resp = self
            .client
            .get(self.url(&format!("/bucket/{}", bucket)))
            .header("apikey", &self.anon_key)
            .bearer_auth(self.session.bearer(&self.anon_key))
            .send()
            .await
            .context("GET bucket request failed")?;
        match check(resp).await {
            Ok(_) => Ok(true),
            // Storage answers a missing bucket with either 404 or 400 "Bucket not found".
            Err(BackendError::NotFound(_)) => Ok(false),
            Err(BackendError::Rejected { status: 400, message }) if message.contains("not found") => Ok(false),
            Err(e) => Err(e).context("GET bucket failed"),
        }
    }

    /// Create the bucket unless it already exists.
    pub async fn ensure_bucket(&self, bucket: &str, public: bool, size_limit: u64) -> Result<()> {
        if self.bucket_exists(bucket).await? {
            return Ok(());
        }
        let body = serde_json::json!({
            "id": bucket,
            "name": bucket,
            "public": public,
            "file_size_limit": size_limit,
        });
        let resp = self
            .client
            .post(self.url("/bucket"))
            .header("apikey", &self.anon_key)
            .bearer_auth(self.session.bearer(&self.anon_key))
            .json(&body)
            .send()
            .await
            .context("create bucket request failed")?;
        check(resp).await.context("create bucket failed")?;
        tracing::info!(bucket, "storage bucket created");
        Ok(())
    }

    /// Upload an object. Existing objects are never overwritten.
    pub async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        cache_control_secs: u64,
    ) -> Result<()> {
        let size = bytes.len();
        let resp = self
            .client
            .post(self.url(&format!("/object/{}/{}", bucket, path)))
            .header("apikey", &self.anon_key)
            .bearer_auth(self.session.bearer(&self.anon_key))
            .header("content-type", content_type)
            .header("cache-control", format!("max-age={}", cache_control_secs))
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .context("upload request failed")?;
        check(resp).await.context("upload failed")?;
        tracing::debug!(bucket, path, size, "object uploaded");
        Ok(())
    }

    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        self.url(&format!("/object/public/{}/{}", bucket, path))
    }
}

/// Object path for an uploaded image: `{user}/{nonce}_{millis}.{ext}`.
pub fn image_object_path(user_id: &str, file_name: &str, millis: i64) -> String {
    let nonce: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string());
    format!("{}/{}_{}.{}", user_id, nonce, millis, ext)
}

/// Content type guessed from the file extension, for image uploads.
pub fn image_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
