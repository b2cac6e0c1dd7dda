use super::error::check;
use super::types::User;
use anyhow::{Context, Result};
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Url};
use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub refresh_token: String,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Claims read from the access token payload. The signature is not checked
/// here; the platform verifies it on every request.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Session {
    /// Fill in `expires_at` when the service only reported `expires_in`.
    pub fn stamped(mut self, now: DateTime<Utc>) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = Some(now.timestamp() + self.expires_in);
        }
        self
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .or_else(|| self.claims().ok().and_then(|c| c.exp))
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    /// True once the token is within `margin` of its expiry. Tokens with no
    /// known expiry are treated as expired.
    pub fn is_expired(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at() {
            Some(at) => now + margin >= at,
            None => true,
        }
    }

    pub fn claims(&self) -> Result<Claims> {
        let payload = self
            .access_token
            .split('.')
            .nth(1)
            .context("access token is not a JWT")?;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .context("failed to decode JWT payload")?;
        serde_json::from_slice(&bytes).context("failed to parse JWT claims")
    }

    /// Role of the signed-in principal, from the user record or the token.
    pub fn role(&self) -> Option<String> {
        self.user
            .role
            .clone()
            .or_else(|| self.claims().ok().and_then(|c| c.role))
    }
}

/// Shared holder of the current session. REST, storage and realtime clients
/// all read the bearer token from here so a refresh is seen everywhere.
#[derive(Debug, Default)]
pub struct SessionHandle {
    inner: RwLock<Option<Session>>,
}

impl SessionHandle {
    pub fn new(session: Option<Session>) -> Self {
        Self {
            inner: RwLock::new(session),
        }
    }

    pub fn set(&self, session: Session) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Some(session);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = None;
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.inner.read().ok().and_then(|g| g.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .ok()
            .and_then(|g| g.as_ref().map(|s| s.access_token.clone()))
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner
            .read()
            .ok()
            .and_then(|g| g.as_ref().map(|s| s.user.id.clone()))
    }

    /// Bearer token for requests: the user's access token, or the anon key
    /// when signed out.
    pub fn bearer(&self, anon_key: &str) -> String {
        self.access_token().unwrap_or_else(|| anon_key.to_string())
    }
}

#[derive(Debug, Clone)]
pub enum SignUpOutcome {
    SignedIn(Session),
    /// Email confirmation is enabled; the account exists but has no session yet.
    ConfirmationRequired(User),
}

/// OAuth sign-in started with PKCE. The verifier must be kept until the
/// provider redirects back with a code.
#[derive(Debug, Clone)]
pub struct PkceFlow {
    pub url: String,
    pub verifier: String,
}

pub struct AuthApi {
    client: Client,
    base_url: String,
    anon_key: String,
    rng: SystemRandom,
}

impl AuthApi {
    pub fn new(client: Client, backend_url: &str, anon_key: &str) -> Self {
        Self {
            client,
            base_url: format!("{}/auth/v1", backend_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
            rng: SystemRandom::new(),
        }
    }

    pub async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<SignUpOutcome> {
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "data": { "username": username },
        });
        let value: serde_json::Value = self.post("/signup", &body, "sign up").await?;

        if value.get("access_token").is_some() {
            let session: Session =
                serde_json::from_value(value).context("failed to parse sign-up session")?;
            return Ok(SignUpOutcome::SignedIn(session.stamped(Utc::now())));
        }
        let user_value = value.get("user").cloned().unwrap_or(value);
        let user: User = serde_json::from_value(user_value).context("failed to parse sign-up user")?;
        Ok(SignUpOutcome::ConfirmationRequired(user))
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let body = serde_json::json!({ "email": email, "password": password });
        let session: Session = self
            .post("/token?grant_type=password", &body, "sign in")
            .await?;
        tracing::info!(user = %session.user.id, "signed in");
        Ok(session.stamped(Utc::now()))
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        let body = serde_json::json!({ "refresh_token": refresh_token });
        let session: Session = self
            .post("/token?grant_type=refresh_token", &body, "token refresh")
            .await?;
        tracing::debug!(user = %session.user.id, "session refreshed");
        Ok(session.stamped(Utc::now()))
    }

    pub async fn sign_out(&self, session: &Session) -> Result<()> {
        let url = format!("{}/logout", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await
            .context("sign out request failed")?;
        check(resp).await.context("sign out failed")?;
        Ok(())
    }

    /// Send the password recovery email.
    pub async fn reset_password(&self, email: &str, redirect_to: Option<&str>) -> Result<()> {
        let url = format!("{}/recover", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email }));
        if let Some(redirect) = redirect_to {
            req = req.query(&[("redirect_to", redirect)]);
        }
        let resp = req.send().await.context("password reset request failed")?;
        check(resp).await.context("password reset failed")?;
        Ok(())
    }

    pub async fn get_user(&self, session: &Session) -> Result<User> {
        let url = format!("{}/user", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await
            .context("GET user failed")?;
        let resp = check(resp).await.context("GET user failed")?;
        resp.json().await.context("failed to parse user response")
    }

    /// Build the provider authorize URL for an OAuth sign-in using PKCE.
    pub fn authorize_url(&self, provider: &str, redirect_to: Option<&str>) -> Result<PkceFlow> {
        let mut raw = [0u8; 32];
        self.rng
            .fill(&mut raw)
            .map_err(|_| anyhow::anyhow!("failed to generate PKCE verifier"))?;
        let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw);
        let challenge = pkce_challenge(&verifier);

        let mut params = vec![
            ("provider", provider.to_string()),
            ("code_challenge", challenge),
            ("code_challenge_method", "s256".to_string()),
        ];
        if let Some(redirect) = redirect_to {
            params.push(("redirect_to", redirect.to_string()));
        }
        let url = Url::parse_with_params(&format!("{}/authorize", self.base_url), &params)
            .context("failed to build authorize URL")?;
        Ok(PkceFlow {
            url: url.to_string(),
            verifier,
        })
    }

    /// Exchange the code from the OAuth redirect for a session.
    pub async fn exchange_code(&self, auth_code: &str, verifier: &str) -> Result<Session> {
        let body = serde_json::json!({ "auth_code": auth_code, "code_verifier": verifier });
        let session: Session = self
            .post("/token?grant_type=pkce", &body, "code exchange")
            .await?;
        Ok(session.stamped(Utc::now()))
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
        what: &str,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("{} request failed", what))?;
        let resp = check(resp).await.with_context(|| format!("{} failed", what))?;
        resp.json()
            .await
            .with_context(|| format!("failed to parse {} response", what))
    }
}

fn pkce_challenge(verifier: &str) -> String {
    let hash = digest(&SHA256, verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash.as_ref())
}

/// Session persisted between runs, the way a browser client keeps it in local storage.
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<Option<Session>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read session file: {}", self.path.display())
                })
            }
        };
        let session = serde_json::from_str(&content).context("Failed to parse session file")?;
        Ok(Some(session))
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        let content = serde_json::to_string_pretty(session)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write session file: {}", self.path.display()))
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove session file"),
        }
    }
}
