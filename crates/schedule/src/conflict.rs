use std::collections::HashSet;

use chrono::{NaiveDate, NaiveTime};
use cinema_models::HallId;

use crate::catalog::Catalog;
use crate::keys;
use crate::store::{MovieKey, ScheduleStore};

/// A slot that cannot be saved because the hall is already taken.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Conflict {
    /// Two sessions of the edited movie share a hall and time.
    #[error("Сеанс на {} о {} у {hall} вже існує.", keys::dmy(.date), keys::hm(.time))]
    Duplicate {
        date: NaiveDate,
        time: NaiveTime,
        hall_id: HallId,
        hall: String,
    },
    /// Another movie's confirmed session already uses the hall at that time.
    #[error(
        "Сеанс на {} о {} у {hall} вже зайнятий фільмом \"{other_movie}\".",
        keys::dmy(.date),
        keys::hm(.time)
    )]
    Occupied {
        date: NaiveDate,
        time: NaiveTime,
        hall_id: HallId,
        hall: String,
        other_movie: String,
    },
}

impl Conflict {
    pub fn date(&self) -> NaiveDate {
        match self {
            Conflict::Duplicate { date, .. } | Conflict::Occupied { date, .. } => *date,
        }
    }
}

/// Finds the first slot of `movie` that cannot be saved.
///
/// Within each of the movie's working days no two visible sessions may share
/// a hall and time. Each session is also checked against the confirmed
/// sessions of every other movie on the same day. A session is never compared
/// with a row carrying its own server id.
pub fn detect_conflicts(store: &ScheduleStore, movie: &MovieKey, catalog: &Catalog) -> Option<Conflict> {
    let dates = store.working().get(movie)?;

    for (date, sessions) in dates {
        let mut seen = HashSet::new();
        for session in sessions.iter().filter(|s| !s.is_deleted()) {
            if !seen.insert(keys::collision_key(session.time, session.hall_id)) {
                return Some(Conflict::Duplicate {
                    date: *date,
                    time: session.time,
                    hall_id: session.hall_id,
                    hall: catalog.hall_label(session.hall_id),
                });
            }

            for (other_key, other_dates) in store.saved() {
                if other_key == movie {
                    continue;
                }
                let Some(others) = other_dates.get(date) else {
                    continue;
                };
                let taken = others.iter().filter(|o| !o.is_deleted()).any(|o| {
                    let same_row = o.id().is_some() && o.id() == session.id();
                    !same_row && o.same_slot(session)
                });
                if taken {
                    return Some(Conflict::Occupied {
                        date: *date,
                        time: session.time,
                        hall_id: session.hall_id,
                        hall: catalog.hall_label(session.hall_id),
                        other_movie: other_key.to_string(),
                    });
                }
            }
        }
    }

    None
}
