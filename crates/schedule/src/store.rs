use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use chrono_tz::Tz;
use cinema_models::{FormatId, HallId, RawSession, SessionId};
use tracing::{debug, warn};

use crate::keys::{self, KeyError};

/// Grouping key of a movie's sessions: its non-empty title.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MovieKey(String);

impl MovieKey {
    pub fn new(title: &str) -> Result<Self, KeyError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(KeyError::EmptyTitle);
        }
        Ok(Self(title.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MovieKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a session stands relative to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Exists only locally; the next save creates it.
    Pending,
    Persisted(SessionId),
    /// Deleted by the operator; the next save sends `is_deleted: true`.
    MarkedForDeletion(SessionId),
}

/// One scheduled showing.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub status: SessionStatus,
    pub time: NaiveTime,
    pub title: String,
    pub hall_id: HallId,
    pub format_id: FormatId,
    pub price: f64,
    pub vip_price: f64,
}

impl Session {
    pub fn id(&self) -> Option<SessionId> {
        match self.status {
            SessionStatus::Pending => None,
            SessionStatus::Persisted(id) | SessionStatus::MarkedForDeletion(id) => Some(id),
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.status, SessionStatus::MarkedForDeletion(_))
    }

    /// True when both sessions occupy the same hall at the same time.
    pub fn same_slot(&self, other: &Session) -> bool {
        self.time == other.time && self.hall_id == other.hall_id
    }

    fn fingerprint(&self, date: NaiveDate) -> Option<SessionFingerprint> {
        Some(SessionFingerprint {
            id: self.id()?,
            at: date.and_time(self.time),
            hall_id: self.hall_id,
            format_id: self.format_id,
            price_cents: cents(self.price),
            vip_price_cents: cents(self.vip_price),
        })
    }
}

pub type DateMap = BTreeMap<NaiveDate, Vec<Session>>;
pub type ScheduleMap = BTreeMap<MovieKey, DateMap>;

/// Location of one session inside a movie's working buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub date: NaiveDate,
    pub index: usize,
}

/// Counts of what the next save would send for one movie.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingChanges {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self.creates == 0 && self.updates == 0 && self.deletes == 0
    }
}

/// Comparable snapshot of a server-backed session, used to notice that the
/// backend changed behind the operator's back.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionFingerprint {
    pub id: SessionId,
    pub at: NaiveDateTime,
    pub hall_id: HallId,
    pub format_id: FormatId,
    pub price_cents: i64,
    pub vip_price_cents: i64,
}

impl SessionFingerprint {
    pub fn from_raw(raw: &RawSession, tz: Tz) -> Result<Self, KeyError> {
        let at = keys::normalize_server_datetime(&raw.date, tz)?;
        Ok(Self {
            id: raw.id,
            at: at.date().and_time(truncate_to_minute(at.time())),
            hall_id: raw.hall_id,
            format_id: raw.session_type_id,
            price_cents: cents(raw.price),
            vip_price_cents: cents(raw.price_vip),
        })
    }
}

fn cents(price: f64) -> i64 {
    (price * 100.0).round() as i64
}

fn sessions_by_date(key: &MovieKey, rows: &[RawSession], tz: Tz) -> Result<(DateMap, usize), KeyError> {
    let mut dates = DateMap::new();
    let mut loaded = 0;
    for raw in rows.iter().filter(|r| !r.is_deleted) {
        let at = keys::normalize_server_datetime(&raw.date, tz)?;
        dates.entry(at.date()).or_default().push(Session {
            status: SessionStatus::Persisted(raw.id),
            time: truncate_to_minute(at.time()),
            title: key.as_str().to_string(),
            hall_id: raw.hall_id,
            format_id: raw.session_type_id,
            price: raw.price,
            vip_price: raw.price_vip,
        });
        loaded += 1;
    }
    for sessions in dates.values_mut() {
        sessions.sort_by_key(|s| (s.time, s.hall_id));
    }
    Ok((dates, loaded))
}

fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    use chrono::Timelike;
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

/// `movie -> date -> sessions`, kept twice: `working` holds unsaved edits and
/// `saved` the last state the backend confirmed.
#[derive(Debug, Clone, Default)]
pub struct ScheduleStore {
    working: ScheduleMap,
    saved: ScheduleMap,
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn working(&self) -> &ScheduleMap {
        &self.working
    }

    pub fn saved(&self) -> &ScheduleMap {
        &self.saved
    }

    /// Replaces both copies of one movie's schedule with the backend's rows.
    ///
    /// Rows the backend reports as deleted are skipped. Returns the number of
    /// sessions loaded.
    pub fn load_movie(
        &mut self,
        key: &MovieKey,
        rows: &[RawSession],
        tz: Tz,
    ) -> Result<usize, KeyError> {
        let (dates, loaded) = sessions_by_date(key, rows, tz)?;
        debug!("Loaded {loaded} sessions for {key} across {} days", dates.len());
        self.working.insert(key.clone(), dates.clone());
        self.saved.insert(key.clone(), dates);
        Ok(loaded)
    }

    /// Adds backend rows to a movie already in the store.
    ///
    /// Separate movies can share a title and so a key; their sessions all
    /// belong under it.
    pub fn extend_movie(
        &mut self,
        key: &MovieKey,
        rows: &[RawSession],
        tz: Tz,
    ) -> Result<usize, KeyError> {
        let (dates, loaded) = sessions_by_date(key, rows, tz)?;
        for copy in [&mut self.working, &mut self.saved] {
            let movie = copy.entry(key.clone()).or_default();
            for (date, sessions) in &dates {
                let bucket = movie.entry(*date).or_default();
                bucket.extend(sessions.iter().cloned());
                bucket.sort_by_key(|s| (s.time, s.hall_id));
            }
        }
        debug!("Added {loaded} sessions to {key}");
        Ok(loaded)
    }

    /// Working sessions of one day, deleted ones included.
    pub fn bucket(&self, key: &MovieKey, date: NaiveDate) -> &[Session] {
        self.working
            .get(key)
            .and_then(|dates| dates.get(&date))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn bucket_mut(&mut self, key: &MovieKey, date: NaiveDate) -> &mut Vec<Session> {
        self.working.entry(key.clone()).or_default().entry(date).or_default()
    }

    /// Working sessions of one day as the operator sees them.
    pub fn visible(&self, key: &MovieKey, date: NaiveDate) -> Vec<&Session> {
        self.bucket(key, date).iter().filter(|s| !s.is_deleted()).collect()
    }

    /// Position in the raw bucket of the `index`-th visible session.
    pub(crate) fn visible_position(&self, key: &MovieKey, date: NaiveDate, index: usize) -> Option<usize> {
        self.bucket(key, date)
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_deleted())
            .nth(index)
            .map(|(pos, _)| pos)
    }

    pub fn saved_count(&self, key: &MovieKey, date: NaiveDate) -> usize {
        self.saved
            .get(key)
            .and_then(|dates| dates.get(&date))
            .map(|sessions| sessions.iter().filter(|s| !s.is_deleted()).count())
            .unwrap_or(0)
    }

    pub(crate) fn session_at(&self, key: &MovieKey, slot: SlotRef) -> Option<&Session> {
        self.bucket(key, slot.date).get(slot.index)
    }

    /// Turns a pending session into a server-backed one after it was created
    /// and records it in `saved`, since the backend now has it.
    pub(crate) fn confirm_created(&mut self, key: &MovieKey, slot: SlotRef, id: SessionId) -> bool {
        let Some(session) = self
            .working
            .get_mut(key)
            .and_then(|dates| dates.get_mut(&slot.date))
            .and_then(|sessions| sessions.get_mut(slot.index))
        else {
            warn!("Created session {id} has no local slot at {} #{}", slot.date, slot.index);
            return false;
        };
        if session.status != SessionStatus::Pending {
            return false;
        }
        session.status = SessionStatus::Persisted(id);
        let confirmed = session.clone();
        self.saved
            .entry(key.clone())
            .or_default()
            .entry(slot.date)
            .or_default()
            .push(confirmed);
        true
    }

    /// Makes the visible working schedule the new `saved` state of a movie.
    ///
    /// Marked rows are gone on the backend by now, so they leave `working` too.
    pub(crate) fn commit(&mut self, key: &MovieKey) {
        let mut confirmed = DateMap::new();
        if let Some(dates) = self.working.get_mut(key) {
            for (date, sessions) in dates.iter_mut() {
                sessions.retain(|s| !s.is_deleted());
                if !sessions.is_empty() {
                    confirmed.insert(*date, sessions.clone());
                }
            }
        }
        self.saved.insert(key.clone(), confirmed);
    }

    /// Drops unsaved edits of one movie.
    pub fn restore(&mut self, key: &MovieKey) {
        match self.saved.get(key) {
            Some(dates) => {
                self.working.insert(key.clone(), dates.clone());
            }
            None => {
                self.working.remove(key);
            }
        }
    }

    /// What the next save of `key` would change on the backend.
    pub fn pending_changes(&self, key: &MovieKey) -> PendingChanges {
        let saved: BTreeMap<SessionId, (NaiveDate, &Session)> = self
            .saved
            .get(key)
            .into_iter()
            .flat_map(|dates| dates.iter())
            .flat_map(|(date, sessions)| sessions.iter().map(move |s| (*date, s)))
            .filter_map(|(date, s)| s.id().map(|id| (id, (date, s))))
            .collect();

        let mut changes = PendingChanges::default();
        for (date, sessions) in self.working.get(key).into_iter().flat_map(|d| d.iter()) {
            for session in sessions {
                match session.status {
                    SessionStatus::Pending => changes.creates += 1,
                    SessionStatus::MarkedForDeletion(id) => {
                        if saved.contains_key(&id) {
                            changes.deletes += 1;
                        }
                    }
                    SessionStatus::Persisted(id) => match saved.get(&id) {
                        Some((saved_date, saved_session)) if saved_date == date && *saved_session == session => {}
                        _ => changes.updates += 1,
                    },
                }
            }
        }
        changes
    }

    /// Fingerprints of the server-backed sessions in `saved` for one movie.
    pub fn saved_fingerprints(&self, key: &MovieKey) -> BTreeSet<SessionFingerprint> {
        self.saved
            .get(key)
            .into_iter()
            .flat_map(|dates| dates.iter())
            .flat_map(|(date, sessions)| sessions.iter().filter_map(move |s| s.fingerprint(*date)))
            .collect()
    }
}
