//! HTTP client for the cinema backend.
//!
//! Every request carries the stored bearer token. A 401 triggers one token
//! refresh shared by all requests that failed with the same token, after
//! which each of them is replayed once.

mod tokens;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use cinema_models::{
    AgeRate, BookingRequest, CreateSessionPayload, CreatedSession, Genre, Hall, Movie, MovieId,
    MovieSummary, MovieUpdate, NewMovie, RawSession, SessionDetails, SessionId, SessionType,
    SignInRequest, SignUpRequest, StatsPeriod, TokenResponse, UpdateSessionPayload, UserData,
};
use cinema_schedule::keys::day_bounds;
use cinema_schedule::{BackendError, Catalog, SessionBackend};
use reqwest::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

pub use tokens::{AuthState, REFRESH_COOKIE, StoredTokens, TokenStore};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("not signed in")]
    Unauthorized,
    #[error("session expired, sign in again")]
    SessionExpired,
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response from {path}: {message}")]
    Decode { path: String, message: String },
    #[error("session file: {0}")]
    Storage(#[from] std::io::Error),
    #[error("session file is not valid JSON: {0}")]
    TokenFile(#[from] serde_json::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Unauthorized | ApiError::SessionExpired => Some(401),
            _ => None,
        }
    }
}

impl From<ApiError> for BackendError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Http { status, body } => BackendError::Http { status, body },
            ApiError::Unauthorized | ApiError::SessionExpired => BackendError::Unauthorized,
            ApiError::Decode { .. } => BackendError::Decode(e.to_string()),
            other => BackendError::Transport(other.to_string()),
        }
    }
}

/// Statistics reports served under `stats/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsReport {
    Money,
    Occupancy,
    TopTickets,
    TopMoney,
}

impl StatsReport {
    pub const ALL: [StatsReport; 4] =
        [StatsReport::Money, StatsReport::Occupancy, StatsReport::TopTickets, StatsReport::TopMoney];

    pub fn path(&self) -> &'static str {
        match self {
            StatsReport::Money => "stats/money",
            StatsReport::Occupancy => "stats/occupancy",
            StatsReport::TopTickets => "stats/top/tickets",
            StatsReport::TopMoney => "stats/top/money",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            StatsReport::Money => "Revenue",
            StatsReport::Occupancy => "Occupancy",
            StatsReport::TopTickets => "Top movies by tickets",
            StatsReport::TopMoney => "Top movies by revenue",
        }
    }
}

/// Cheap to clone; clones share tokens, the refresh guard and the auth channel.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenStore,
    /// Holds the access token whose refresh last failed, so queued waiters
    /// for that token give up instead of retrying the refresh.
    refresh: Mutex<Option<String>>,
    auth: watch::Sender<AuthState>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, tokens: TokenStore) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let initial = AuthState { authenticated: tokens.is_authenticated(), is_admin: false };
        let (auth, _) = watch::channel(initial);
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: base_url.into(),
                tokens,
                refresh: Mutex::new(None),
                auth,
            }),
        })
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    /// Receiver that sees every change of the signed-in state.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.auth.subscribe()
    }

    pub fn auth_state(&self) -> AuthState {
        *self.inner.auth.borrow()
    }

    pub fn current_user_id(&self) -> Option<i64> {
        self.inner.tokens.current_user_id()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.inner.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn publish(&self, state: AuthState) {
        self.inner.auth.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    // --- Transport ---

    async fn dispatch(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let url = self.url(path);
        debug!("{method} {url}");
        let mut request = self.inner.http.request(method.clone(), &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Sends a request with the stored token, refreshing and replaying once on 401.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<Response, ApiError> {
        let token = self.inner.tokens.access_token();
        let response = self.dispatch(&method, path, query, body.as_ref(), token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED || path.starts_with("auth/") {
            return check(response).await;
        }
        if token.is_none() && self.inner.tokens.refresh_cookie().is_none() {
            return Err(ApiError::Unauthorized);
        }

        let fresh = self.refresh_after(token.as_deref()).await?;
        let retry = self.dispatch(&method, path, query, body.as_ref(), Some(&fresh)).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        check(retry).await
    }

    /// Single-flight refresh: the first caller refreshes, callers that failed
    /// with the same token reuse its result.
    async fn refresh_after(&self, failed: Option<&str>) -> Result<String, ApiError> {
        let mut last_failure = self.inner.refresh.lock().await;

        let current = self.inner.tokens.access_token();
        if let Some(current) = &current {
            if Some(current.as_str()) != failed {
                debug!("Token already refreshed by a concurrent request");
                return Ok(current.clone());
            }
        }
        if failed.is_some() && last_failure.as_deref() == failed {
            return Err(ApiError::SessionExpired);
        }

        match self.refresh_token().await {
            Ok(token) => {
                *last_failure = None;
                Ok(token)
            }
            Err(e) => {
                warn!("Token refresh failed: {e}");
                *last_failure = failed.map(str::to_string);
                self.inner.tokens.clear()?;
                self.publish(AuthState::default());
                Err(ApiError::SessionExpired)
            }
        }
    }

    async fn refresh_token(&self) -> Result<String, ApiError> {
        let mut request = self.inner.http.post(self.url("auth/refresh"));
        if let Some(cookie) = self.inner.tokens.refresh_cookie() {
            request = request.header(COOKIE, format!("{REFRESH_COOKIE}={cookie}"));
        }
        let response = check(request.send().await?).await?;
        self.capture_refresh_cookie(&response)?;
        let body: TokenResponse = decode("auth/refresh", response).await?;
        let token = body.access_token.ok_or_else(|| ApiError::Decode {
            path: "auth/refresh".to_string(),
            message: "no access_token in response".to_string(),
        })?;
        self.inner.tokens.set_access_token(token.clone())?;
        info!("Access token refreshed");
        Ok(token)
    }

    fn capture_refresh_cookie(&self, response: &Response) -> Result<(), ApiError> {
        for header in response.headers().get_all(SET_COOKIE) {
            let Ok(header) = header.to_str() else { continue };
            if let Some(value) = tokens::refresh_cookie_from(header) {
                self.inner.tokens.set_refresh_cookie(value)?;
            }
        }
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ApiError> {
        let response = self.execute(Method::GET, path, query, None).await?;
        decode(path, response).await
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        let response = self.execute(method, path, &[], Some(body)).await?;
        decode(path, response).await
    }

    async fn send_unit<B: Serialize + ?Sized>(&self, method: Method, path: &str, body: &B) -> Result<(), ApiError> {
        let body = serde_json::to_value(body)?;
        self.execute(method, path, &[], Some(body)).await?;
        Ok(())
    }

    // --- Movies ---

    pub async fn movies(&self) -> Result<Vec<MovieSummary>, ApiError> {
        self.get("movies", &[]).await
    }

    pub async fn movie(&self, id: MovieId) -> Result<Movie, ApiError> {
        self.get(&format!("movie/{id}"), &[]).await
    }

    pub async fn create_movie(&self, movie: &NewMovie) -> Result<(), ApiError> {
        info!("Creating movie {:?}", movie.name);
        self.send_unit(Method::POST, "movie", movie).await
    }

    pub async fn update_movie(&self, id: MovieId, update: &MovieUpdate) -> Result<(), ApiError> {
        self.send_unit(Method::PUT, &format!("movie/{id}"), update).await
    }

    pub async fn genres(&self) -> Result<Vec<Genre>, ApiError> {
        self.get("genres", &[]).await
    }

    pub async fn age_rates(&self) -> Result<Vec<AgeRate>, ApiError> {
        self.get("age-rates", &[]).await
    }

    // --- Sessions ---

    /// Sessions of one movie, optionally limited to a single day.
    pub async fn movie_sessions_on(
        &self,
        movie: MovieId,
        day: Option<NaiveDate>,
    ) -> Result<Vec<RawSession>, ApiError> {
        let query = match day {
            Some(day) => {
                let (start, end) = day_bounds(day);
                vec![("start_date", start), ("end_date", end)]
            }
            None => Vec::new(),
        };
        self.get(&format!("session/by-movie/{movie}"), &query).await
    }

    pub async fn sessions(&self) -> Result<Vec<RawSession>, ApiError> {
        self.get("session", &[]).await
    }

    pub async fn session(&self, id: SessionId) -> Result<SessionDetails, ApiError> {
        self.get(&format!("session/{id}"), &[]).await
    }

    pub async fn delete_session(&self, id: SessionId) -> Result<(), ApiError> {
        info!("Deleting session {id}");
        self.execute(Method::DELETE, &format!("session/{id}"), &[], None).await?;
        Ok(())
    }

    pub async fn session_types(&self) -> Result<Vec<SessionType>, ApiError> {
        self.get("session/types", &[]).await
    }

    pub async fn halls(&self) -> Result<Vec<Hall>, ApiError> {
        self.get("halls", &[]).await
    }

    /// Halls and session formats fetched together.
    pub async fn catalog(&self) -> Result<Catalog, ApiError> {
        let (halls, formats) = tokio::try_join!(self.halls(), self.session_types())?;
        Ok(Catalog::new(halls, formats))
    }

    // --- Booking ---

    pub async fn book(&self, seats: &[BookingRequest]) -> Result<(), ApiError> {
        info!("Booking {} seat(s)", seats.len());
        self.send_unit(Method::POST, "booking", seats).await
    }

    // --- Auth & users ---

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), ApiError> {
        let request = SignInRequest { email: email.to_string(), password: password.to_string() };
        self.authenticate("auth/sign-in", &request).await
    }

    pub async fn sign_up(&self, request: &SignUpRequest) -> Result<(), ApiError> {
        self.authenticate("auth/sign-up", request).await
    }

    async fn authenticate<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        let body = serde_json::to_value(body)?;
        let response = self.dispatch(&Method::POST, path, &[], Some(&body), None).await?;
        let response = check(response).await?;
        self.capture_refresh_cookie(&response)?;
        let tokens: TokenResponse = decode(path, response).await?;
        let Some(token) = tokens.access_token else {
            return Err(ApiError::Decode { path: path.to_string(), message: "no access_token in response".to_string() });
        };
        self.inner.tokens.set_access_token(token)?;
        *self.inner.refresh.lock().await = None;
        self.publish(AuthState { authenticated: true, is_admin: false });
        info!("Signed in");
        Ok(())
    }

    /// Signs out on the server and forgets the local tokens either way.
    pub async fn sign_out(&self) -> Result<(), ApiError> {
        let token = self.inner.tokens.access_token();
        let result = match self.dispatch(&Method::POST, "auth/sign-out", &[], None, token.as_deref()).await {
            Ok(response) => check(response).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!("Server sign-out failed, clearing local session anyway: {e}");
        }
        self.inner.tokens.clear()?;
        self.publish(AuthState::default());
        info!("Signed out");
        result
    }

    pub async fn user(&self, id: i64) -> Result<UserData, ApiError> {
        self.get(&format!("user/{id}"), &[]).await
    }

    /// Looks up the signed-in user and publishes their admin flag.
    pub async fn load_auth_state(&self) -> Result<Option<UserData>, ApiError> {
        let Some(id) = self.current_user_id() else {
            self.publish(AuthState { authenticated: self.inner.tokens.is_authenticated(), is_admin: false });
            return Ok(None);
        };
        let data = self.user(id).await?;
        self.publish(AuthState { authenticated: true, is_admin: data.user.is_admin });
        Ok(Some(data))
    }

    // --- Statistics ---

    pub async fn stats(&self, report: StatsReport, period: StatsPeriod) -> Result<serde_json::Value, ApiError> {
        self.get(report.path(), &[("period", period.as_str().to_string())]).await
    }
}

async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    debug!("HTTP {status}: {body}");
    Err(ApiError::Http { status: status.as_u16(), body })
}

async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, ApiError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode { path: path.to_string(), message: e.to_string() })
}

#[async_trait]
impl SessionBackend for ApiClient {
    async fn create_sessions(&self, batch: &[CreateSessionPayload]) -> Result<Vec<CreatedSession>, BackendError> {
        info!("Creating {} session(s)", batch.len());
        Ok(self.send_json(Method::POST, "session", batch).await?)
    }

    async fn update_sessions(&self, batch: &[UpdateSessionPayload]) -> Result<(), BackendError> {
        info!("Updating {} session(s)", batch.len());
        Ok(self.send_unit(Method::PUT, "sessions", batch).await?)
    }

    async fn movie_sessions(&self, movie: MovieId) -> Result<Vec<RawSession>, BackendError> {
        Ok(self.movie_sessions_on(movie, None).await?)
    }
}
