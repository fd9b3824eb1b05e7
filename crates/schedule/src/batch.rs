use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use cinema_models::{CreateSessionPayload, MovieId, UpdateSessionPayload};

use crate::keys;
use crate::store::{MovieKey, ScheduleStore, SessionStatus, SlotRef};

/// Lowest ticket price the backend accepts, in hryvnias.
pub const MIN_PRICE: f64 = 0.1;

/// The movie whose schedule is being edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieRef {
    pub id: MovieId,
    pub key: MovieKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceKind {
    Standard,
    Vip,
}

impl fmt::Display for PriceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceKind::Standard => f.write_str("стандартної ціни"),
            PriceKind::Vip => f.write_str("VIP ціни"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error(
        "Сеанс {} о {}: мінімальна ціна для {kind} повинна бути не менше {min}₴",
        keys::dmy(.date),
        keys::hm(.time),
        min = MIN_PRICE
    )]
    MinimumPrice {
        date: NaiveDate,
        time: NaiveTime,
        kind: PriceKind,
        price: f64,
    },
}

/// Payloads for one save, split by whether the backend already knows the row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batches {
    pub creates: Vec<CreateSessionPayload>,
    pub updates: Vec<UpdateSessionPayload>,
    /// Local slot of each create, in request order.
    pub(crate) create_slots: Vec<SlotRef>,
}

impl Batches {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty()
    }

    pub fn deletions(&self) -> usize {
        self.updates.iter().filter(|u| u.is_deleted).count()
    }
}

/// Builds create and update payloads for every session of `movie`.
///
/// Sessions without a server id become creates, the rest become updates
/// (marked ones with `is_deleted: true`). Days are walked in calendar order
/// and sessions in bucket order, so the output is stable for an unchanged
/// store. Any price below [`MIN_PRICE`] rejects the whole build.
pub fn build_batches(store: &ScheduleStore, movie: &MovieRef) -> Result<Batches, ValidationError> {
    let mut batches = Batches::default();
    let Some(dates) = store.working().get(&movie.key) else {
        return Ok(batches);
    };

    for (date, sessions) in dates {
        for (index, session) in sessions.iter().enumerate() {
            for (kind, price) in [(PriceKind::Standard, session.price), (PriceKind::Vip, session.vip_price)] {
                if price.is_nan() || price < MIN_PRICE {
                    return Err(ValidationError::MinimumPrice {
                        date: *date,
                        time: session.time,
                        kind,
                        price,
                    });
                }
            }

            let when = keys::payload_datetime(*date, session.time);
            match session.status {
                SessionStatus::Pending => {
                    batches.creates.push(CreateSessionPayload {
                        movie_id: movie.id,
                        date: when,
                        price: session.price,
                        price_vip: session.vip_price,
                        hall_id: session.hall_id,
                        session_type_id: session.format_id,
                    });
                    batches.create_slots.push(SlotRef { date: *date, index });
                }
                SessionStatus::Persisted(id) | SessionStatus::MarkedForDeletion(id) => {
                    batches.updates.push(UpdateSessionPayload {
                        session_id: id,
                        date: when,
                        price: session.price,
                        price_vip: session.vip_price,
                        hall_id: session.hall_id,
                        session_type_id: session.format_id,
                        is_deleted: session.is_deleted(),
                    });
                }
            }
        }
    }

    Ok(batches)
}
