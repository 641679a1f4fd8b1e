use crate::errors::{AppError, AppResult};
use crate::gmail::TokenSource;
use crate::types::Account;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const REDIRECT_BASE: &str = "http://127.0.0.1:8000";

pub const GMAIL_MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";
pub const USERINFO_EMAIL_SCOPE: &str = "https://www.googleapis.com/auth/userinfo.email";

/// Refresh this long before the reported expiry.
const REFRESH_MARGIN_SECS: i64 = 120;

#[derive(Clone, Debug)]
pub struct TokenBundle {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: String,
}

/// Credential artifact kept in each account directory. Extra fields written
/// by other tools are ignored; their client id/secret are used when the
/// environment does not provide one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl StoredToken {
    pub fn load(path: &Path) -> AppResult<Option<Self>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::Auth(format!("reading {}: {e}", path.display()))),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| AppError::Auth(format!("decoding {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| AppError::Unexpected(format!("creating {}: {e}", dir.display())))?;
        }
        let serialized =
            serde_json::to_string_pretty(self).map_err(|e| AppError::Unexpected(format!("{e}")))?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| AppError::Unexpected(format!("opening token file: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = file.set_permissions(fs::Permissions::from_mode(0o600));
        }

        file.write_all(serialized.as_bytes())
            .map_err(|e| AppError::Unexpected(format!("writing token file: {e}")))?;
        file.sync_all()
            .map_err(|e| AppError::Unexpected(format!("syncing token file: {e}")))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct InstalledCreds {
    client_id: String,
    client_secret: String,
}

fn load_credentials(stored: Option<&StoredToken>) -> AppResult<InstalledCreds> {
    let client_id = env::var("GOOGLE_CLIENT_ID")
        .ok()
        .or_else(|| stored.and_then(|t| t.client_id.clone()))
        .ok_or_else(|| AppError::Config("GOOGLE_CLIENT_ID missing".into()))?;
    let client_secret = env::var("GOOGLE_CLIENT_SECRET")
        .ok()
        .or_else(|| stored.and_then(|t| t.client_secret.clone()))
        .ok_or_else(|| AppError::Config("GOOGLE_CLIENT_SECRET missing".into()))?;
    Ok(InstalledCreds {
        client_id,
        client_secret,
    })
}

/// Access token for a registered account, from its stored refresh token.
/// Never prompts: a missing or rejected token is an auth error for that
/// account only.
pub async fn access_token_for(account: &Account) -> AppResult<TokenBundle> {
    let path = account.token_path();
    let stored = StoredToken::load(&path)?.ok_or_else(|| {
        AppError::Auth(format!(
            "no credential at {}; run with --add-account",
            path.display()
        ))
    })?;
    let creds = load_credentials(Some(&stored))?;
    let client = build_client(&creds, REDIRECT_BASE)?;

    let token_res = client
        .exchange_refresh_token(&RefreshToken::new(stored.refresh_token.clone()))
        .request_async(async_http_client)
        .await
        .map_err(|e| AppError::Auth(format!("refresh token rejected for {}: {e}", account.id)))?;

    Ok(TokenBundle {
        access_token: token_res.access_token().secret().to_string(),
        expires_at: expiry(token_res.expires_in()),
        refresh_token: Some(stored.refresh_token),
    })
}

/// Access tokens for one account, exchanged from its stored refresh token
/// on first use, shortly before expiry, and after an invalidation.
pub struct RefreshingToken {
    account: Account,
    cached: Mutex<Option<TokenBundle>>,
}

impl RefreshingToken {
    pub fn new(account: Account) -> Self {
        Self {
            account,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TokenSource for RefreshingToken {
    async fn access_token(&self) -> AppResult<String> {
        let mut cached = self.cached.lock().await;
        if let Some(bundle) = cached.as_ref() {
            if !needs_refresh(bundle.expires_at, Utc::now()) {
                return Ok(bundle.access_token.clone());
            }
        }
        let fresh = access_token_for(&self.account).await?;
        debug!(account = %self.account.id, expires_at = ?fresh.expires_at, "Access token refreshed");
        let token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

fn needs_refresh(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|at| at - Duration::seconds(REFRESH_MARGIN_SECS) <= now)
}

/// Interactive loopback consent flow. Opens the browser and waits for the
/// redirect carrying the authorization code.
pub async fn authorize_interactive(scopes: &[Scope]) -> AppResult<TokenBundle> {
    let creds = load_credentials(None)?;

    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|e| AppError::Unexpected(format!("failed to bind loopback port: {e}")))?;
    let local_port = listener
        .local_addr()
        .map(|addr| addr.port())
        .map_err(|e| AppError::Unexpected(format!("failed to read local addr: {e}")))?;

    let redirect = build_redirect_url(REDIRECT_BASE, local_port)?;
    let client = build_client(&creds, &redirect)?;

    let (auth_url, verifier, csrf) = build_auth_url(&client, scopes);
    info!(redirect = %redirect, "Opening browser for Google OAuth consent");
    open_in_browser(&auth_url);

    let code = listen_for_code(listener).await?;
    if code.state != *csrf.secret() {
        return Err(AppError::Auth("OAuth state mismatch".into()));
    }

    let token_res = client
        .exchange_code(AuthorizationCode::new(code.code))
        .set_pkce_verifier(verifier)
        .request_async(async_http_client)
        .await
        .map_err(|e| AppError::Auth(format!("token exchange failed: {e}")))?;

    Ok(TokenBundle {
        access_token: token_res.access_token().secret().to_string(),
        expires_at: expiry(token_res.expires_in()),
        refresh_token: token_res.refresh_token().map(|r| r.secret().to_string()),
    })
}

pub async fn fetch_user_email(access_token: &str) -> AppResult<String> {
    let client = reqwest::Client::new();
    let res = client
        .get("https://www.googleapis.com/oauth2/v2/userinfo")
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| AppError::Transient(format!("userinfo request failed: {e}")))?;
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(AppError::from_status("userinfo", status, &body));
    }
    let parsed: UserInfo = res
        .json()
        .await
        .map_err(|e| AppError::Unexpected(format!("parse userinfo: {e}")))?;
    Ok(parsed.email)
}

fn expiry(expires_in: Option<std::time::Duration>) -> Option<DateTime<Utc>> {
    expires_in.map(|d| Utc::now() + Duration::from_std(d).unwrap_or_else(|_| Duration::seconds(0)))
}

fn build_redirect_url(base: &str, port: u16) -> AppResult<String> {
    let mut url = url::Url::parse(base)
        .map_err(|e| AppError::Config(format!("invalid redirect uri {base}: {e}")))?;
    url.set_port(Some(port))
        .map_err(|_| AppError::Config("failed to set redirect port".into()))?;
    Ok(url.to_string())
}

fn build_client(creds: &InstalledCreds, redirect: &str) -> AppResult<BasicClient> {
    let auth_url = AuthUrl::new(AUTH_URL.to_string())
        .map_err(|e| AppError::Config(format!("invalid auth url: {e}")))?;
    let token_url = TokenUrl::new(TOKEN_URL.to_string())
        .map_err(|e| AppError::Config(format!("invalid token url: {e}")))?;
    let client = BasicClient::new(
        ClientId::new(creds.client_id.clone()),
        Some(ClientSecret::new(creds.client_secret.clone())),
        auth_url,
        Some(token_url),
    )
    .set_redirect_uri(
        RedirectUrl::new(redirect.to_string())
            .map_err(|e| AppError::Config(format!("invalid redirect uri {redirect}: {e}")))?,
    )
    .set_auth_type(oauth2::AuthType::RequestBody);

    Ok(client)
}

fn build_auth_url(client: &BasicClient, scopes: &[Scope]) -> (String, PkceCodeVerifier, CsrfToken) {
    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let mut req = client
        .authorize_url(CsrfToken::new_random)
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .set_pkce_challenge(challenge);
    for scope in scopes {
        req = req.add_scope(scope.clone());
    }
    let (url, csrf) = req.url();
    (url.to_string(), verifier, csrf)
}

struct CodeResponse {
    code: String,
    state: String,
}

async fn listen_for_code(listener: TcpListener) -> AppResult<CodeResponse> {
    let (mut stream, _) = listener
        .accept()
        .await
        .map_err(|e| AppError::Unexpected(format!("redirect accept failed: {e}")))?;

    let mut buf = [0u8; 4096];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|e| AppError::Unexpected(format!("reading auth callback failed: {e}")))?;
    let req = String::from_utf8_lossy(&buf[..n]);
    let first_line = req.lines().next().unwrap_or("");
    let path = first_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| AppError::Unexpected("invalid HTTP request".into()))?;
    let parsed = url::Url::parse(&format!("http://localhost{path}"))
        .map_err(|e| AppError::Unexpected(format!("failed to parse callback url: {e}")))?;

    if let Some((_, err)) = parsed.query_pairs().find(|(k, _)| k == "error") {
        return Err(AppError::Auth(format!("consent denied: {err}")));
    }
    let code = parsed
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.to_string())
        .ok_or_else(|| AppError::Unexpected("callback missing code parameter".into()))?;
    let state = parsed
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.to_string())
        .unwrap_or_default();

    let response =
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nAuth complete. You can close this tab.";
    let _ = stream.write_all(response.as_bytes()).await;
    Ok(CodeResponse { code, state })
}

fn open_in_browser(url: &str) {
    let attempt = if cfg!(target_os = "macos") {
        std::process::Command::new("open").arg(url).status()
    } else if cfg!(target_os = "windows") {
        std::process::Command::new("rundll32.exe")
            .args(["url.dll,FileProtocolHandler", url])
            .status()
    } else {
        std::process::Command::new("xdg-open").arg(url).status()
    };
    if let Err(e) = attempt {
        warn!("Could not auto-open browser: {e}. Open this URL manually:\n{url}");
    } else {
        println!("If your browser did not open, navigate to:\n{url}");
    }
}
