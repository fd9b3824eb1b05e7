use chrono::{Datelike, NaiveDate, NaiveTime};
use cinema_models::{FormatId, HallId, SessionId};
use tracing::{debug, info};

use crate::batch::{Batches, MovieRef, ValidationError, build_batches};
use crate::catalog::{Catalog, CatalogError};
use crate::conflict::{Conflict, detect_conflicts};
use crate::keys;
use crate::store::{ScheduleStore, Session, SessionStatus};
use crate::sync::{SessionBackend, SyncEngine, SyncError, SyncReport};

/// A day holds at most this many visible sessions of one movie.
pub const MAX_SESSIONS_PER_DAY: usize = 5;

/// Values a freshly added slot starts with.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotDefaults {
    pub time: NaiveTime,
    pub hall_id: HallId,
    pub format_id: FormatId,
    pub price: f64,
    pub vip_price: f64,
}

impl SlotDefaults {
    /// Noon, in the first hall, first format, at the movie's base prices.
    pub fn from_catalog(catalog: &Catalog, price: f64, vip_price: f64) -> Result<Self, CatalogError> {
        Ok(Self {
            time: NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default(),
            hall_id: catalog.first_hall()?,
            format_id: catalog.first_format()?,
            price,
            vip_price,
        })
    }
}

/// One inline field edit.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEdit {
    Time(NaiveTime),
    Hall(HallId),
    Format(FormatId),
    Price(f64),
    VipPrice(f64),
}

/// What confirming a delete will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteTarget {
    /// Never saved; dropped locally.
    Local,
    /// Saved; marked and soft-deleted on the next save. Look up its bookings
    /// and warn the operator before confirming.
    Persisted(SessionId),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("{} is in the past", keys::dmy(.0))]
    PastDate(NaiveDate),
    #[error("{} already has {max} sessions", keys::dmy(.0), max = MAX_SESSIONS_PER_DAY)]
    DayFull(NaiveDate),
    #[error("no session #{index} on {}", keys::dmy(.date))]
    NoSuchSession { date: NaiveDate, index: usize },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("{0}")]
    Conflict(#[from] Conflict),
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub struct ScheduleEditor {
    store: ScheduleStore,
    movie: MovieRef,
    catalog: Catalog,
    defaults: SlotDefaults,
    today: NaiveDate,
}

impl ScheduleEditor {
    pub fn new(store: ScheduleStore, movie: MovieRef, catalog: Catalog, defaults: SlotDefaults, today: NaiveDate) -> Self {
        Self { store, movie, catalog, defaults, today }
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    pub fn movie(&self) -> &MovieRef {
        &self.movie
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Sessions of `date` the operator can see and edit, in list order.
    pub fn sessions(&self, date: NaiveDate) -> Vec<&Session> {
        self.store.visible(&self.movie.key, date)
    }

    /// Adds a default slot on `date`; returns its index in the day's list.
    pub fn add_slot(&mut self, date: NaiveDate) -> Result<usize, EditError> {
        if keys::is_past(date, self.today) {
            return Err(EditError::PastDate(date));
        }
        let visible = self.sessions(date).len();
        if visible >= MAX_SESSIONS_PER_DAY {
            return Err(EditError::DayFull(date));
        }
        let session = Session {
            status: SessionStatus::Pending,
            time: self.defaults.time,
            title: self.movie.key.as_str().to_string(),
            hall_id: self.defaults.hall_id,
            format_id: self.defaults.format_id,
            price: self.defaults.price,
            vip_price: self.defaults.vip_price,
        };
        self.store.bucket_mut(&self.movie.key, date).push(session);
        debug!("Added slot #{visible} on {}", keys::date_key(date));
        Ok(visible)
    }

    /// Applies one field edit to the `index`-th visible session of `date`.
    pub fn edit(&mut self, date: NaiveDate, index: usize, edit: SessionEdit) -> Result<(), EditError> {
        match &edit {
            SessionEdit::Hall(id) if !self.catalog.has_hall(*id) => {
                return Err(CatalogError::UnknownHall(id.to_string()).into());
            }
            SessionEdit::Format(id) if !self.catalog.has_format(*id) => {
                return Err(CatalogError::UnknownFormat(id.to_string()).into());
            }
            _ => {}
        }
        let pos = self
            .store
            .visible_position(&self.movie.key, date, index)
            .ok_or(EditError::NoSuchSession { date, index })?;
        let session = &mut self.store.bucket_mut(&self.movie.key, date)[pos];
        match edit {
            SessionEdit::Time(time) => session.time = time,
            SessionEdit::Hall(hall_id) => session.hall_id = hall_id,
            SessionEdit::Format(format_id) => session.format_id = format_id,
            SessionEdit::Price(price) => session.price = price,
            SessionEdit::VipPrice(price) => session.vip_price = price,
        }
        Ok(())
    }

    /// Tells the caller whether deleting needs a booking lookup first.
    pub fn delete_target(&self, date: NaiveDate, index: usize) -> Result<DeleteTarget, EditError> {
        let session = self
            .sessions(date)
            .get(index)
            .copied()
            .ok_or(EditError::NoSuchSession { date, index })?;
        Ok(match session.id() {
            Some(id) => DeleteTarget::Persisted(id),
            None => DeleteTarget::Local,
        })
    }

    /// Removes an unsaved session or marks a saved one for deletion.
    pub fn confirm_delete(&mut self, date: NaiveDate, index: usize) -> Result<DeleteTarget, EditError> {
        let pos = self
            .store
            .visible_position(&self.movie.key, date, index)
            .ok_or(EditError::NoSuchSession { date, index })?;
        let bucket = self.store.bucket_mut(&self.movie.key, date);
        let status = bucket[pos].status;
        match status {
            SessionStatus::Persisted(id) => {
                bucket[pos].status = SessionStatus::MarkedForDeletion(id);
                Ok(DeleteTarget::Persisted(id))
            }
            _ => {
                bucket.remove(pos);
                Ok(DeleteTarget::Local)
            }
        }
    }

    /// Calendar dot count for `date`: confirmed sessions, capped at the day limit.
    pub fn dots(&self, date: NaiveDate) -> usize {
        self.store.saved_count(&self.movie.key, date).min(MAX_SESSIONS_PER_DAY)
    }

    /// Days of a month that have at least one dot.
    pub fn month_dots(&self, year: i32, month: u32) -> Vec<(NaiveDate, usize)> {
        let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
            return Vec::new();
        };
        first
            .iter_days()
            .take_while(|d| d.month() == month)
            .map(|d| (d, self.dots(d)))
            .filter(|(_, dots)| *dots > 0)
            .collect()
    }

    /// Drops every unsaved edit of the movie.
    pub fn cancel(&mut self) {
        self.store.restore(&self.movie.key);
        info!("Discarded unsaved changes for {}", self.movie.key);
    }

    /// Conflict check and batch build without touching the network.
    pub fn plan(&self) -> Result<Batches, SaveError> {
        if let Some(conflict) = detect_conflicts(&self.store, &self.movie.key, &self.catalog) {
            return Err(conflict.into());
        }
        Ok(build_batches(&self.store, &self.movie)?)
    }

    /// Validates and pushes the movie's schedule to the backend.
    pub async fn save<B: SessionBackend>(&mut self, engine: &SyncEngine<B>) -> Result<SyncReport, SaveError> {
        let batches = self.plan()?;
        if batches.is_empty() {
            info!("Nothing to save for {}", self.movie.key);
            return Ok(SyncReport::default());
        }
        Ok(engine.sync(&mut self.store, &self.movie, batches).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::catalog::tests::sample;
    use crate::store::MovieKey;
    use crate::store::tests::{date, raw};
    use crate::sync::tests::FakeBackend;
    use cinema_models::MovieId;

    fn editor_with(store: ScheduleStore) -> ScheduleEditor {
        let catalog = sample();
        let defaults = SlotDefaults::from_catalog(&catalog, 120.0, 180.0).unwrap();
        let movie = MovieRef { id: MovieId(42), key: MovieKey::new("Dune").unwrap() };
        ScheduleEditor::new(store, movie, catalog, defaults, date("2025-01-09"))
    }

    fn editor() -> ScheduleEditor {
        editor_with(ScheduleStore::new())
    }

    fn kyiv() -> chrono_tz::Tz {
        chrono_tz::Europe::Kyiv
    }

    #[test]
    fn add_slot_uses_defaults() {
        let mut editor = editor();
        let day = date("2025-01-10");
        assert_eq!(editor.add_slot(day).unwrap(), 0);

        let session = editor.sessions(day)[0];
        assert_eq!(keys::display_time(session.time), "12:00");
        assert_eq!(session.hall_id, HallId(1));
        assert_eq!(session.format_id, FormatId(1));
        assert_eq!(session.title, "Dune");
        assert_eq!(session.status, SessionStatus::Pending);
    }

    #[test]
    fn a_day_holds_at_most_five_sessions() {
        let mut editor = editor();
        let day = date("2025-01-10");
        for expected in 0..MAX_SESSIONS_PER_DAY {
            assert_eq!(editor.add_slot(day).unwrap(), expected);
        }
        assert_eq!(editor.add_slot(day), Err(EditError::DayFull(day)));

        // Deleting one frees a place again.
        editor.confirm_delete(day, 0).unwrap();
        assert_eq!(editor.add_slot(day).unwrap(), 4);
    }

    #[test]
    fn past_days_cannot_get_new_slots() {
        let mut editor = editor();
        let yesterday = date("2025-01-08");
        assert_eq!(editor.add_slot(yesterday), Err(EditError::PastDate(yesterday)));
        assert!(editor.add_slot(date("2025-01-09")).is_ok());
    }

    #[test]
    fn edits_change_one_field() {
        let mut editor = editor();
        let day = date("2025-01-10");
        editor.add_slot(day).unwrap();

        editor.edit(day, 0, SessionEdit::Time(keys::parse_time("19:30").unwrap())).unwrap();
        editor.edit(day, 0, SessionEdit::Hall(HallId(3))).unwrap();
        editor.edit(day, 0, SessionEdit::Format(FormatId(2))).unwrap();
        editor.edit(day, 0, SessionEdit::VipPrice(210.0)).unwrap();

        let session = editor.sessions(day)[0];
        assert_eq!(keys::display_time(session.time), "19:30");
        assert_eq!(session.hall_id, HallId(3));
        assert_eq!(session.format_id, FormatId(2));
        assert_eq!(session.price, 120.0);
        assert_eq!(session.vip_price, 210.0);
    }

    #[test]
    fn edits_reject_unknown_ids_and_indexes() {
        let mut editor = editor();
        let day = date("2025-01-10");
        editor.add_slot(day).unwrap();

        assert!(matches!(
            editor.edit(day, 0, SessionEdit::Hall(HallId(99))),
            Err(EditError::Catalog(CatalogError::UnknownHall(_)))
        ));
        assert_eq!(
            editor.edit(day, 3, SessionEdit::Price(10.0)),
            Err(EditError::NoSuchSession { date: day, index: 3 })
        );
    }

    #[test]
    fn deleting_unsaved_and_saved_sessions() {
        let mut store = ScheduleStore::new();
        store
            .load_movie(&MovieKey::new("Dune").unwrap(), &[raw(7, "2025-01-10T12:00:00", 2)], kyiv())
            .unwrap();
        let mut editor = editor_with(store);
        let day = date("2025-01-10");
        editor.add_slot(day).unwrap();

        assert_eq!(editor.delete_target(day, 0), Ok(DeleteTarget::Persisted(SessionId(7))));
        assert_eq!(editor.delete_target(day, 1), Ok(DeleteTarget::Local));

        assert_eq!(editor.confirm_delete(day, 1), Ok(DeleteTarget::Local));
        assert_eq!(editor.confirm_delete(day, 0), Ok(DeleteTarget::Persisted(SessionId(7))));
        assert!(editor.sessions(day).is_empty());
        // The marked row stays in the working copy until it is saved.
        assert_eq!(editor.store().bucket(&editor.movie().key, day).len(), 1);
        // Dots still show the confirmed session.
        assert_eq!(editor.dots(day), 1);
    }

    #[test]
    fn dots_count_saved_sessions_only() {
        let mut store = ScheduleStore::new();
        let rows: Vec<_> = (0..7)
            .map(|i| raw(i, &format!("2025-01-1{}T1{}:00:00", if i < 6 { 2 } else { 5 }, i), 1))
            .collect();
        store.load_movie(&MovieKey::new("Dune").unwrap(), &rows, kyiv()).unwrap();
        let mut editor = editor_with(store);
        editor.add_slot(date("2025-01-20")).unwrap();

        assert_eq!(editor.dots(date("2025-01-12")), 5);
        assert_eq!(editor.dots(date("2025-01-20")), 0);
        assert_eq!(
            editor.month_dots(2025, 1),
            vec![(date("2025-01-12"), 5), (date("2025-01-15"), 1)]
        );
        assert!(editor.month_dots(2025, 13).is_empty());
    }

    #[test]
    fn cancel_restores_the_saved_schedule() {
        let mut editor = editor();
        let day = date("2025-01-10");
        editor.add_slot(day).unwrap();
        editor.cancel();
        assert!(editor.sessions(day).is_empty());
    }

    #[tokio::test]
    async fn save_runs_conflict_check_before_the_network() {
        let mut editor = editor();
        let day = date("2025-01-10");
        editor.add_slot(day).unwrap();
        editor.add_slot(day).unwrap();

        let engine = SyncEngine::new(FakeBackend::default(), kyiv());
        let err = editor.save(&engine).await.unwrap_err();
        assert!(matches!(err, SaveError::Conflict(Conflict::Duplicate { .. })));
        assert!(err.to_string().contains("вже існує"));
        assert!(engine.backend().calls().is_empty());
    }

    #[tokio::test]
    async fn save_rejects_low_prices_without_network_calls() {
        let mut editor = editor();
        let day = date("2025-01-10");
        editor.add_slot(day).unwrap();
        editor.edit(day, 0, SessionEdit::Price(0.0)).unwrap();

        let engine = SyncEngine::new(FakeBackend::default(), kyiv());
        let err = editor.save(&engine).await.unwrap_err();
        assert!(matches!(err, SaveError::Validation(_)));
        assert!(err.to_string().contains("мінімальна ціна"));
        assert!(engine.backend().calls().is_empty());
    }

    #[tokio::test]
    async fn save_assigns_ids_and_updates_dots() {
        let mut editor = editor();
        let day = date("2025-01-10");
        editor.add_slot(day).unwrap();
        editor.add_slot(day).unwrap();
        editor.edit(day, 1, SessionEdit::Time(keys::parse_time("20:00").unwrap())).unwrap();

        let engine = SyncEngine::new(FakeBackend::starting_at(501), kyiv());
        let report = editor.save(&engine).await.unwrap();

        assert_eq!(report.created, vec![SessionId(501), SessionId(502)]);
        assert_eq!(editor.sessions(day)[0].id(), Some(SessionId(501)));
        assert_eq!(editor.sessions(day)[1].id(), Some(SessionId(502)));
        assert_eq!(editor.dots(day), 2);
        assert!(editor.store().pending_changes(&editor.movie().key).is_empty());
    }

    #[tokio::test]
    async fn a_saved_delete_is_not_sent_again() {
        let rows = vec![raw(7, "2025-01-10T15:00:00", 2)];
        let mut store = ScheduleStore::new();
        store.load_movie(&MovieKey::new("Dune").unwrap(), &rows, kyiv()).unwrap();
        let mut editor = editor_with(store);
        let day = date("2025-01-10");
        editor.confirm_delete(day, 0).unwrap();

        let backend = FakeBackend { rows: Mutex::new(rows), ..FakeBackend::starting_at(501) };
        let engine = SyncEngine::new(backend, kyiv());
        assert_eq!(editor.save(&engine).await.unwrap().deleted, 1);
        assert!(editor.store().bucket(&editor.movie().key, day).is_empty());

        editor.add_slot(day).unwrap();
        let batches = editor.plan().unwrap();
        assert_eq!(batches.deletions(), 0);
        assert!(batches.updates.is_empty());
        assert_eq!(editor.store().pending_changes(&editor.movie().key).deletes, 0);

        let report = editor.save(&engine).await.unwrap();
        assert_eq!(report, SyncReport { created: vec![SessionId(501)], updated: 0, deleted: 0 });
        assert_eq!(engine.backend().calls(), vec!["update:1", "create:1"]);
    }

    #[tokio::test]
    async fn saving_without_changes_is_a_no_op() {
        let mut editor = editor();
        let engine = SyncEngine::new(FakeBackend::default(), kyiv());
        assert_eq!(editor.save(&engine).await.unwrap(), SyncReport::default());
        assert!(engine.backend().calls().is_empty());
    }
}
