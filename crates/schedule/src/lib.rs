//! Session schedule reconciliation for the cinema admin client.
//!
//! An operator edits a movie's sessions in a working copy ([`ScheduleEditor`]).
//! Saving checks for hall/time conflicts ([`detect_conflicts`]), splits the
//! working copy into create and update payloads ([`build_batches`]) and pushes
//! them to the backend ([`SyncEngine`]), after which the confirmed state
//! becomes the new `saved` copy.

pub mod batch;
pub mod catalog;
pub mod conflict;
pub mod editor;
pub mod keys;
pub mod message;
pub mod store;
pub mod sync;

pub use batch::{Batches, MIN_PRICE, MovieRef, PriceKind, ValidationError, build_batches};
pub use catalog::{Catalog, CatalogError};
pub use conflict::{Conflict, detect_conflicts};
pub use editor::{DeleteTarget, EditError, MAX_SESSIONS_PER_DAY, SaveError, ScheduleEditor, SessionEdit, SlotDefaults};
pub use keys::KeyError;
pub use message::format_server_message;
pub use store::{MovieKey, PendingChanges, ScheduleStore, Session, SessionStatus};
pub use sync::{BackendError, SessionBackend, SyncEngine, SyncError, SyncReport};
