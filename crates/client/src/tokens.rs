use std::path::{Path, PathBuf};
use std::sync::RwLock;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ApiError;

/// Name of the refresh-token cookie set by `auth/sign-in` and `auth/refresh`.
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Signed-in state that the rest of the client reacts to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthState {
    pub authenticated: bool,
    pub is_admin: bool,
}

/// On-disk session file layout (~/.cinema/session.json).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_cookie: Option<String>,
}

/// Access token and refresh cookie, optionally persisted to a file.
#[derive(Debug, Default)]
pub struct TokenStore {
    path: Option<PathBuf>,
    tokens: RwLock<StoredTokens>,
}

impl TokenStore {
    /// Tokens that live only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the session file at `path`; a missing file means signed out.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ApiError> {
        let path = path.into();
        let tokens = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredTokens::default(),
            Err(e) => return Err(e.into()),
        };
        debug!("Session file: {}", path.display());
        Ok(Self { path: Some(path), tokens: RwLock::new(tokens) })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().access_token.clone()
    }

    pub fn refresh_cookie(&self) -> Option<String> {
        self.read().refresh_cookie.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().access_token.is_some()
    }

    pub fn set_access_token(&self, token: String) -> Result<(), ApiError> {
        self.write().access_token = Some(token);
        self.persist()
    }

    pub fn set_refresh_cookie(&self, value: Option<String>) -> Result<(), ApiError> {
        self.write().refresh_cookie = value;
        self.persist()
    }

    pub fn clear(&self) -> Result<(), ApiError> {
        *self.write() = StoredTokens::default();
        self.persist()
    }

    /// `user_id` claim of the current access token. The signature is not
    /// checked; the backend verifies the token on every request.
    pub fn current_user_id(&self) -> Option<i64> {
        let token = self.access_token()?;
        user_id_from_token(&token)
    }

    fn persist(&self) -> Result<(), ApiError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let contents = serde_json::to_string_pretty(&*self.read())?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoredTokens> {
        self.tokens.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoredTokens> {
        self.tokens.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    user_id: Option<i64>,
}

fn user_id_from_token(token: &str) -> Option<i64> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    match jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation) {
        Ok(data) => data.claims.user_id,
        Err(e) => {
            warn!("Could not read user id from access token: {e}");
            None
        }
    }
}

/// Value of the refresh cookie in a `Set-Cookie` header, if that header sets it.
///
/// An empty value (the server clearing the cookie) yields `Some(None)`.
pub(crate) fn refresh_cookie_from(header: &str) -> Option<Option<String>> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    if name.trim() != REFRESH_COOKIE {
        return None;
    }
    let value = value.trim();
    Some((!value.is_empty()).then(|| value.to_string()))
}
