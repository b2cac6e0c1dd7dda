use anyhow::Result;
use lumina::backend::auth::{AuthApi, Session, SessionFile, SessionHandle, SignUpOutcome};
use lumina::backend::realtime::RealtimeClient;
use lumina::backend::rest::RestApi;
use lumina::backend::storage::StorageApi;
use lumina::backend::Platform;
use lumina::config::{prompt, Config};
use lumina::backend::error::is_unauthorized;
use lumina::pipeline::Engine;
use lumina::service::BlogService;
use lumina::tui::{self, state::AppState, TuiExit};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

/// Restore the saved session, refreshing it if needed, or run the sign-in menu.
/// `None` means the user chose to browse as a guest.
async fn establish_session(auth: &AuthApi, file: &SessionFile, config: &Config) -> Result<Option<Session>> {
    match file.load() {
        Ok(Some(saved)) => {
            let margin = chrono::Duration::seconds(config.session.refresh_margin_secs);
            if !saved.is_expired(chrono::Utc::now(), margin) {
                // The token may have been revoked since it was saved.
                match auth.get_user(&saved).await {
                    Ok(user) => {
                        let session = Session { user, ..saved };
                        file.save(&session)?;
                        println!("  Welcome back, {}", session.user.email.as_deref().unwrap_or("friend"));
                        return Ok(Some(session));
                    }
                    Err(e) if !is_unauthorized(&e) => {
                        tracing::warn!("could not verify saved session: {:#}", e);
                        println!("  Welcome back, {} (offline)", saved.user.email.as_deref().unwrap_or("friend"));
                        return Ok(Some(saved));
                    }
                    Err(e) => tracing::warn!("saved session was revoked: {:#}", e),
                }
            }
            match auth.refresh(&saved.refresh_token).await {
                Ok(fresh) => {
                    file.save(&fresh)?;
                    println!("  Session refreshed");
                    return Ok(Some(fresh));
                }
                Err(e) => {
                    tracing::warn!("saved session could not be refreshed: {:#}", e);
                    println!("  Saved session expired, please sign in again");
                    file.clear()?;
                }
            }
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!("{:#}", e);
            file.clear()?;
        }
    }

    let redirect = config.backend.redirect_url.as_deref();
    loop {
        println!();
        println!("  [1] Sign in   [2] Sign up   [3] Reset password   [4] Sign in with GitHub   [5] Browse as guest");
        let choice = match prompt("Choice") {
            Ok(c) => c,
            Err(_) => continue,
        };
        let outcome = match choice.as_str() {
            "1" => sign_in(auth).await.map(Some),
            "2" => sign_up(auth).await,
            "3" => reset_password(auth, redirect).await.map(|_| None),
            "4" => oauth_sign_in(auth, redirect).await.map(Some),
            "5" => return Ok(None),
            _ => continue,
        };
        match outcome {
            Ok(Some(session)) => {
                file.save(&session)?;
                return Ok(Some(session));
            }
            Ok(None) => {}
            Err(e) => println!("  Error: {:#}", e),
        }
    }
}

async fn sign_in(auth: &AuthApi) -> Result<Session> {
    let email = prompt("Email")?;
    let password = prompt("Password")?;
    let session = auth.sign_in_with_password(&email, &password).await?;
    println!("  Welcome back!");
    Ok(session)
}

async fn sign_up(auth: &AuthApi) -> Result<Option<Session>> {
    let email = prompt("Email")?;
    let username = prompt("Username")?;
    let password = prompt("Password")?;
    let confirm = prompt("Confirm password")?;
    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }
    match auth.sign_up(&email, &password, &username).await? {
        SignUpOutcome::SignedIn(session) => {
            println!("  Account created.");
            Ok(Some(session))
        }
        SignUpOutcome::ConfirmationRequired(_) => {
            println!("  Account created. Check your email to confirm it, then sign in.");
            Ok(None)
        }
    }
}

async fn reset_password(auth: &AuthApi, redirect: Option<&str>) -> Result<()> {
    let email = prompt("Email")?;
    auth.reset_password(&email, redirect).await?;
    println!("  Password reset email sent. Check your inbox.");
    Ok(())
}

async fn oauth_sign_in(auth: &AuthApi, redirect: Option<&str>) -> Result<Session> {
    let flow = auth.authorize_url("github", redirect)?;
    println!("  Open this URL in a browser and sign in:");
    println!();
    println!("  {}", flow.url);
    println!();
    let code = prompt("Code from the redirect URL")?;
    auth.exchange_code(&code, &flow.verifier).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load(Path::new("config.toml"))?;

    // Load saved keys from .env (real env vars take precedence)
    Config::load_env_file();

    let log_file = std::fs::File::create(&config.logging.file)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(log_file)
        .with_ansi(false)
        .init();

    println!();
    println!("  Lumina v{}", env!("CARGO_PKG_VERSION"));
    println!("  ==============");
    println!("  Backend: {}", config.backend.url);
    println!();

    let anon_key = Config::anon_key()?;
    let client = reqwest::Client::builder().timeout(Duration::from_secs(20)).build()?;

    // Each pass is one session; the TUI returns here when a guest asks to sign in.
    loop {
        match run_session(&config, &client, &anon_key).await? {
            TuiExit::Quit => break,
            TuiExit::SignIn => tracing::info!("returning to sign-in menu"),
        }
    }
    tracing::debug!("shutting down");
    Ok(())
}

async fn run_session(config: &Config, client: &reqwest::Client, anon_key: &str) -> Result<TuiExit> {
    let auth = AuthApi::new(client.clone(), &config.backend.url, anon_key);
    let session_file = SessionFile::new(&config.session.file);
    let session = establish_session(&auth, &session_file, config).await?;
    let handle = Arc::new(SessionHandle::new(session.clone()));

    let rest = RestApi::new(client.clone(), handle.clone(), &config.backend.url, anon_key);
    if let Some(session) = &session {
        if let Err(e) = rest.ensure_profile(&session.user).await {
            tracing::warn!("could not ensure profile: {:#}", e);
            println!("  Warning: profile setup failed: {:#}", e);
        }
        if session.role().as_deref() == Some("service_role") {
            println!("  Service role detected, bootstrapping schema policies...");
            rest.bootstrap().await?;
        }
    }
    let storage = StorageApi::new(client.clone(), handle.clone(), &config.backend.url, anon_key);
    let platform = Arc::new(Platform::new(rest, storage, config.storage.clone()));
    let service = BlogService::new(platform, handle.clone(), config.storage.max_upload_bytes);

    println!();
    println!("  Starting...");

    // Channels
    let (state_tx, state_rx) = watch::channel(AppState::new());
    let (cmd_tx, cmd_rx) = mpsc::channel::<tui::TuiCommand>(32);
    let (realtime_tx, realtime_rx) = mpsc::channel(512);

    let realtime = RealtimeClient::new(handle.clone(), &config.backend.url, anon_key, config.realtime.clone());
    let engine = Engine::new(service, auth, handle, config, state_tx).with_realtime(realtime, realtime_tx);
    let engine_task = tokio::spawn(engine.run(cmd_rx, realtime_rx));

    // Blocks until quit or sign-in
    let exit = tui::run_tui(state_rx, cmd_tx).await?;

    engine_task.await??;
    Ok(exit)
}
