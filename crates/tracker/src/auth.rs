//! Account provisioning and credential issuance against the remote service,
//! plus the on-disk profile that carries the bearer token across restarts.

use lumina_core::{validate_credentials, User, ValidationError};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Profile I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize)]
struct SignupRequest<'a> {
    email: &'a str,
    password: &'a str,
    full_name: Option<&'a str>,
    consent: bool,
}

#[derive(Debug, Deserialize)]
struct SignupResponse {
    email: String,
    #[serde(default)]
    full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create an account. Returns the registered identity without a token;
    /// call [`Self::login`] afterwards.
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
        consent: bool,
    ) -> Result<User, AuthError> {
        let (email, password) = validate_credentials(email, password)?;
        if !consent {
            return Err(ValidationError::ConsentRequired.into());
        }
        let full_name = full_name.map(str::trim).filter(|n| !n.is_empty());

        let resp = self
            .client
            .post(format!("{}/auth/signup", self.base_url))
            .json(&SignupRequest {
                email: &email,
                password: &password,
                full_name,
                consent,
            })
            .send()
            .await?;

        if resp.status() != StatusCode::CREATED && resp.status() != StatusCode::OK {
            return Err(rejected(resp).await);
        }
        let body: SignupResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::Malformed(e.to_string()))?;

        tracing::info!(email = %body.email, "Account created");
        Ok(User {
            email: body.email,
            name: body.full_name,
            token: None,
        })
    }

    /// Exchange credentials for a bearer token (OAuth2 password form).
    pub async fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let (email, password) = validate_credentials(email, password)?;

        let resp = self
            .client
            .post(format!("{}/auth/login", self.base_url))
            .form(&[("username", email.as_str()), ("password", password.as_str())])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(rejected(resp).await);
        }
        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        if body.access_token.is_empty() {
            return Err(AuthError::Malformed("empty access_token".into()));
        }
        if let Some(kind) = body.token_type.as_deref().filter(|k| !k.eq_ignore_ascii_case("bearer")) {
            tracing::warn!(token_type = kind, "Unexpected token type, using it as bearer");
        }

        tracing::info!(email = %email, "Logged in");
        Ok(User::new(email).with_token(body.access_token))
    }
}

async fn rejected(resp: reqwest::Response) -> AuthError {
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    let detail = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => text,
    };
    AuthError::Rejected { status, detail }
}

/// The signed-in user persisted as JSON.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform config location, if one exists.
    pub fn open_default() -> Option<Self> {
        lumina_core::paths::user_profile_path().map(Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when nobody is logged in. A corrupt file is treated as logged
    /// out.
    pub fn load(&self) -> Result<Option<User>, AuthError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<User>(&content) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring unreadable profile");
                Ok(None)
            }
        }
    }

    /// Write atomically (temp file + rename), readable only by the owner.
    pub fn save(&self, user: &User) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(user)
            .map_err(|e| AuthError::Malformed(e.to_string()))?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Remove the profile. Returns whether one existed.
    pub fn clear(&self) -> Result<bool, AuthError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
