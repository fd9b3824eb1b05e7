use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono_tz::Tz;
use cinema_models::{
    CreateSessionPayload, CreatedSession, MovieId, RawSession, SessionId, UpdateSessionPayload,
};
use tracing::{debug, info, warn};

use crate::batch::{Batches, MovieRef};
use crate::message::format_server_message;
use crate::store::{ScheduleStore, SessionFingerprint, SessionStatus};

/// Failure reported by a [`SessionBackend`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("session expired, sign in again")]
    Unauthorized,
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Text shown to the operator: server bodies go through the formatter.
    pub fn operator_message(&self) -> String {
        match self {
            BackendError::Http { body, .. } if !body.trim().is_empty() => format_server_message(body),
            other => other.to_string(),
        }
    }
}

/// The session endpoints the sync engine drives.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// `POST session` with the whole batch; returns one id per payload, in order.
    async fn create_sessions(&self, batch: &[CreateSessionPayload]) -> Result<Vec<CreatedSession>, BackendError>;

    /// `PUT sessions` with the whole batch.
    async fn update_sessions(&self, batch: &[UpdateSessionPayload]) -> Result<(), BackendError>;

    /// Every current session of a movie.
    async fn movie_sessions(&self, movie: MovieId) -> Result<Vec<RawSession>, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("the schedule changed on the server since it was loaded; reload and apply the changes again")]
    StaleSchedule,
    #[error("could not check the server schedule: {0}")]
    Refresh(String),
    #[error("the batch no longer matches the local schedule; rebuild it before saving")]
    DetachedBatch,
    #[error("creating sessions failed: {0}")]
    Create(String),
    #[error("the server returned {returned} ids for {expected} new sessions")]
    CreateMismatch { expected: usize, returned: usize },
    #[error("updating sessions failed after {created} were created: {message}")]
    Update { created: usize, message: String },
}

/// Outcome of a successful save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<SessionId>,
    pub updated: usize,
    pub deleted: usize,
}

/// Pushes a movie's batches to the backend in two phases: creates, then updates.
pub struct SyncEngine<B> {
    backend: B,
    tz: Tz,
    reject_stale: bool,
}

impl<B: SessionBackend> SyncEngine<B> {
    pub fn new(backend: B, tz: Tz) -> Self {
        Self { backend, tz, reject_stale: true }
    }

    /// Whether to compare the server's sessions with `saved` before writing.
    pub fn reject_stale(mut self, enabled: bool) -> Self {
        self.reject_stale = enabled;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Sends `batches` (built from `store` for `movie`) to the backend.
    ///
    /// Phase one posts every create and writes the returned ids back onto the
    /// local sessions in request order. Phase two puts every update. A phase
    /// one failure leaves `store` untouched and skips phase two. After a
    /// phase two failure the created ids stay assigned. Only a full success
    /// replaces the movie's `saved` schedule.
    pub async fn sync(
        &self,
        store: &mut ScheduleStore,
        movie: &MovieRef,
        batches: Batches,
    ) -> Result<SyncReport, SyncError> {
        let attached = batches.create_slots.len() == batches.creates.len()
            && batches.create_slots.iter().all(|slot| {
                store
                    .session_at(&movie.key, *slot)
                    .is_some_and(|s| s.status == SessionStatus::Pending)
            });
        if !attached {
            return Err(SyncError::DetachedBatch);
        }

        if self.reject_stale {
            self.ensure_fresh(store, movie).await?;
        }

        let mut report = SyncReport::default();

        if !batches.creates.is_empty() {
            info!("Creating {} sessions for {}", batches.creates.len(), movie.key);
            let created = self
                .backend
                .create_sessions(&batches.creates)
                .await
                .map_err(|e| SyncError::Create(e.operator_message()))?;
            if created.len() != batches.creates.len() {
                return Err(SyncError::CreateMismatch {
                    expected: batches.creates.len(),
                    returned: created.len(),
                });
            }
            for (slot, row) in batches.create_slots.iter().zip(&created) {
                if store.confirm_created(&movie.key, *slot, row.id) {
                    report.created.push(row.id);
                }
            }
            debug!("Assigned ids {:?}", report.created);
        }

        if !batches.updates.is_empty() {
            info!("Updating {} sessions for {}", batches.updates.len(), movie.key);
            self.backend
                .update_sessions(&batches.updates)
                .await
                .map_err(|e| SyncError::Update {
                    created: report.created.len(),
                    message: e.operator_message(),
                })?;
            report.deleted = batches.deletions();
            report.updated = batches.updates.len() - report.deleted;
        }

        store.commit(&movie.key);
        info!(
            "Schedule for {} saved: {} created, {} updated, {} deleted",
            movie.key,
            report.created.len(),
            report.updated,
            report.deleted
        );
        Ok(report)
    }

    async fn ensure_fresh(&self, store: &ScheduleStore, movie: &MovieRef) -> Result<(), SyncError> {
        let rows = self
            .backend
            .movie_sessions(movie.id)
            .await
            .map_err(|e| SyncError::Refresh(e.operator_message()))?;
        let server: BTreeSet<SessionFingerprint> = rows
            .iter()
            .filter(|r| !r.is_deleted)
            .map(|r| SessionFingerprint::from_raw(r, self.tz))
            .collect::<Result<_, _>>()
            .map_err(|e| SyncError::Refresh(e.to_string()))?;

        if server != store.saved_fingerprints(&movie.key) {
            warn!("Server schedule for {} differs from the loaded copy", movie.key);
            return Err(SyncError::StaleSchedule);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::batch::build_batches;
    use crate::keys;
    use crate::store::tests::{date, raw, session};
    use crate::store::{MovieKey, Session};
    use cinema_models::{FormatId, HallId};

    /// In-memory backend that records calls and hands out sequential ids.
    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub(crate) rows: Mutex<Vec<RawSession>>,
        pub(crate) next_id: Mutex<i64>,
        pub(crate) calls: Mutex<Vec<String>>,
        pub(crate) fail_create: Option<BackendError>,
        pub(crate) fail_update: Option<BackendError>,
        pub(crate) short_response: bool,
    }

    impl FakeBackend {
        pub(crate) fn starting_at(id: i64) -> Self {
            Self { next_id: Mutex::new(id), ..Self::default() }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionBackend for FakeBackend {
        async fn create_sessions(&self, batch: &[CreateSessionPayload]) -> Result<Vec<CreatedSession>, BackendError> {
            self.calls.lock().unwrap().push(format!("create:{}", batch.len()));
            if let Some(err) = &self.fail_create {
                return Err(err.clone());
            }
            let mut next = self.next_id.lock().unwrap();
            let mut rows = self.rows.lock().unwrap();
            let mut created = Vec::new();
            for payload in batch {
                let id = SessionId(*next);
                *next += 1;
                rows.push(RawSession {
                    id,
                    date: payload.date.clone(),
                    session_type_id: payload.session_type_id,
                    hall_id: payload.hall_id,
                    price: payload.price,
                    price_vip: payload.price_vip,
                    movie_id: Some(payload.movie_id),
                    is_deleted: false,
                });
                created.push(CreatedSession { id });
            }
            if self.short_response {
                created.pop();
            }
            Ok(created)
        }

        async fn update_sessions(&self, batch: &[UpdateSessionPayload]) -> Result<(), BackendError> {
            self.calls.lock().unwrap().push(format!("update:{}", batch.len()));
            if let Some(err) = &self.fail_update {
                return Err(err.clone());
            }
            let mut rows = self.rows.lock().unwrap();
            for update in batch {
                if let Some(row) = rows.iter_mut().find(|r| r.id == update.session_id) {
                    row.date = update.date.clone();
                    row.hall_id = update.hall_id;
                    row.session_type_id = update.session_type_id;
                    row.price = update.price;
                    row.price_vip = update.price_vip;
                    row.is_deleted = update.is_deleted;
                }
            }
            Ok(())
        }

        async fn movie_sessions(&self, _movie: MovieId) -> Result<Vec<RawSession>, BackendError> {
            self.calls.lock().unwrap().push("fetch".to_string());
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    fn dune() -> MovieRef {
        MovieRef { id: MovieId(42), key: MovieKey::new("Dune").unwrap() }
    }

    fn kyiv() -> Tz {
        chrono_tz::Europe::Kyiv
    }

    #[tokio::test]
    async fn created_ids_follow_request_order() {
        let mut store = ScheduleStore::new();
        let day = date("2025-01-10");
        store.bucket_mut(&dune().key, day).push(session("18:00", 1));
        store.bucket_mut(&dune().key, day).push(session("20:00", 1));

        let engine = SyncEngine::new(FakeBackend::starting_at(501), kyiv());
        let batches = build_batches(&store, &dune()).unwrap();
        let report = engine.sync(&mut store, &dune(), batches).await.unwrap();

        assert_eq!(report.created, vec![SessionId(501), SessionId(502)]);
        let bucket = store.bucket(&dune().key, day);
        assert_eq!(bucket[0].id(), Some(SessionId(501)));
        assert_eq!(bucket[1].id(), Some(SessionId(502)));
        assert_eq!(store.saved_count(&dune().key, day), 2);
        assert_eq!(engine.backend().calls(), vec!["fetch", "create:2"]);
    }

    #[tokio::test]
    async fn created_sessions_round_trip_through_the_backend() {
        let mut store = ScheduleStore::new();
        let day = date("2025-01-10");
        store.bucket_mut(&dune().key, day).push(Session {
            format_id: FormatId(2),
            price: 99.5,
            vip_price: 150.0,
            ..session("18:45", 3)
        });

        let engine = SyncEngine::new(FakeBackend::starting_at(10), kyiv());
        let batches = build_batches(&store, &dune()).unwrap();
        engine.sync(&mut store, &dune(), batches).await.unwrap();

        let rows = engine.backend().movie_sessions(MovieId(42)).await.unwrap();
        let mut reloaded = ScheduleStore::new();
        reloaded.load_movie(&dune().key, &rows, kyiv()).unwrap();
        let back = &reloaded.bucket(&dune().key, day)[0];
        assert_eq!(keys::display_time(back.time), "18:45");
        assert_eq!(back.hall_id, HallId(3));
        assert_eq!(back.format_id, FormatId(2));
        assert_eq!(back.price, 99.5);
        assert_eq!(back.vip_price, 150.0);
        assert_eq!(back, &store.bucket(&dune().key, day)[0]);
    }

    #[tokio::test]
    async fn create_failure_leaves_state_untouched_and_skips_updates() {
        let mut store = ScheduleStore::new();
        let day = date("2025-01-10");
        store.bucket_mut(&dune().key, day).push(session("18:00", 1));

        let backend = FakeBackend {
            fail_create: Some(BackendError::Http {
                status: 409,
                body: r#"{"message":"Hall 1 is busy at 2025-01-10T18:00:00."}"#.to_string(),
            }),
            ..FakeBackend::default()
        };
        let engine = SyncEngine::new(backend, kyiv());
        let batches = build_batches(&store, &dune()).unwrap();
        let err = engine.sync(&mut store, &dune(), batches).await.unwrap_err();

        assert_eq!(err, SyncError::Create("Hall 1 is busy at 10.01.2025 18:00".to_string()));
        assert_eq!(store.bucket(&dune().key, day)[0].id(), None);
        assert_eq!(store.saved_count(&dune().key, day), 0);
        assert!(!engine.backend().calls().iter().any(|c| c.starts_with("update")));
    }

    #[tokio::test]
    async fn update_failure_keeps_created_ids_but_not_edits() {
        let mut store = ScheduleStore::new();
        let day = date("2025-01-10");
        let rows = vec![raw(7, "2025-01-10T12:00:00", 1)];
        store.load_movie(&dune().key, &rows, kyiv()).unwrap();
        store.bucket_mut(&dune().key, day)[0].price = 140.0;
        store.bucket_mut(&dune().key, day).push(session("18:00", 1));

        let backend = FakeBackend {
            rows: Mutex::new(rows),
            next_id: Mutex::new(100),
            fail_update: Some(BackendError::Transport("connection reset".to_string())),
            ..FakeBackend::default()
        };
        let engine = SyncEngine::new(backend, kyiv());
        let batches = build_batches(&store, &dune()).unwrap();
        let err = engine.sync(&mut store, &dune(), batches).await.unwrap_err();

        assert!(matches!(err, SyncError::Update { created: 1, .. }));
        assert_eq!(store.bucket(&dune().key, day)[1].id(), Some(SessionId(100)));
        // The server has the new row, so it counts as saved; the price edit does not.
        assert_eq!(store.saved_count(&dune().key, day), 2);
        assert_eq!(store.saved()[&dune().key][&day][0].price, 120.0);

        // Retrying re-sends only the update.
        let retry = build_batches(&store, &dune()).unwrap();
        assert!(retry.creates.is_empty());
        assert_eq!(retry.updates.len(), 2);
    }

    #[tokio::test]
    async fn short_create_response_fails_loudly() {
        let mut store = ScheduleStore::new();
        let day = date("2025-01-10");
        store.bucket_mut(&dune().key, day).push(session("18:00", 1));
        store.bucket_mut(&dune().key, day).push(session("20:00", 1));

        let backend = FakeBackend { short_response: true, ..FakeBackend::starting_at(1) };
        let engine = SyncEngine::new(backend, kyiv()).reject_stale(false);
        let batches = build_batches(&store, &dune()).unwrap();
        let err = engine.sync(&mut store, &dune(), batches).await.unwrap_err();

        assert_eq!(err, SyncError::CreateMismatch { expected: 2, returned: 1 });
        assert!(store.bucket(&dune().key, day).iter().all(|s| s.id().is_none()));
    }

    #[tokio::test]
    async fn stale_saved_state_is_rejected_before_writing() {
        let mut store = ScheduleStore::new();
        store.load_movie(&dune().key, &[raw(7, "2025-01-10T12:00:00", 1)], kyiv()).unwrap();
        store.bucket_mut(&dune().key, date("2025-01-11")).push(session("18:00", 1));

        // Someone else moved session 7 to another hall meanwhile.
        let backend = FakeBackend {
            rows: Mutex::new(vec![raw(7, "2025-01-10T12:00:00", 2)]),
            ..FakeBackend::default()
        };
        let engine = SyncEngine::new(backend, kyiv());
        let batches = build_batches(&store, &dune()).unwrap();
        let err = engine.sync(&mut store, &dune(), batches).await.unwrap_err();

        assert_eq!(err, SyncError::StaleSchedule);
        assert_eq!(engine.backend().calls(), vec!["fetch"]);
    }

    #[tokio::test]
    async fn batches_from_another_store_are_refused() {
        let mut built_from = ScheduleStore::new();
        built_from.bucket_mut(&dune().key, date("2025-01-10")).push(session("18:00", 1));
        let batches = build_batches(&built_from, &dune()).unwrap();

        let mut other = ScheduleStore::new();
        let engine = SyncEngine::new(FakeBackend::default(), kyiv());
        let err = engine.sync(&mut other, &dune(), batches).await.unwrap_err();
        assert_eq!(err, SyncError::DetachedBatch);
        assert!(engine.backend().calls().is_empty());
    }

    #[tokio::test]
    async fn soft_deletes_are_counted_and_dropped_from_saved() {
        let mut store = ScheduleStore::new();
        let day = date("2025-01-10");
        let rows = vec![raw(7, "2025-01-10T12:00:00", 1), raw(8, "2025-01-10T15:00:00", 1)];
        store.load_movie(&dune().key, &rows, kyiv()).unwrap();
        store.bucket_mut(&dune().key, day)[1].status = SessionStatus::MarkedForDeletion(SessionId(8));

        let backend = FakeBackend { rows: Mutex::new(rows), ..FakeBackend::default() };
        let engine = SyncEngine::new(backend, kyiv());
        let batches = build_batches(&store, &dune()).unwrap();
        let report = engine.sync(&mut store, &dune(), batches).await.unwrap();

        assert_eq!(report, SyncReport { created: vec![], updated: 1, deleted: 1 });
        assert_eq!(store.saved_count(&dune().key, day), 1);
        let server = engine.backend().movie_sessions(MovieId(42)).await.unwrap();
        assert!(server.iter().find(|r| r.id == SessionId(8)).unwrap().is_deleted);
    }
}
