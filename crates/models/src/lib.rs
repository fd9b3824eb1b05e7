use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// --- Identifiers ---

/// A string id that does not parse as a numeric backend identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} id: {value:?}")]
pub struct ParseIdError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! backend_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<i64>().map($name).map_err(|_| ParseIdError {
                    kind: $kind,
                    value: s.to_string(),
                })
            }
        }
    };
}

backend_id!(
    /// Movie primary key.
    MovieId,
    "movie"
);
backend_id!(
    /// Server-assigned session identifier.
    SessionId,
    "session"
);
backend_id!(
    /// Cinema hall, resolved against `GET halls`.
    HallId,
    "hall"
);
backend_id!(
    /// Session type (2D, 3D, ...), resolved against `GET session/types`.
    FormatId,
    "format"
);

// --- Catalog ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hall {
    pub id: HallId,
    #[serde(alias = "hall_name")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionType {
    pub id: FormatId,
    #[serde(rename = "type")]
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeRate {
    #[serde(default)]
    pub id: Option<i64>,
    pub age_rate: String,
}

// --- Movies ---

/// Row of `GET movies`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieSummary {
    pub id: MovieId,
    pub name: String,
    #[serde(rename = "posterURL", default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub is_premiere: bool,
    #[serde(rename = "genreIDs", default)]
    pub genre_ids: Vec<i64>,
    #[serde(default)]
    pub session: Option<NextSession>,
}

/// Closest upcoming session embedded in a movie summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextSession {
    #[serde(default)]
    pub id: Option<SessionId>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(rename = "type", default)]
    pub format: Option<String>,
}

/// Full movie card from `GET movie/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub id: MovieId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub age_rate: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub directors: Vec<String>,
    #[serde(default)]
    pub actors: Vec<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub studios: Vec<String>,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub trailer_url: Option<String>,
}

/// Body of `PUT movie/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieUpdate {
    pub name: String,
    pub age_rate_id: i64,
    pub description: String,
}

/// Body of `POST movie`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMovie {
    pub name: String,
    pub description: String,
    pub year: i32,
    pub duration: i64,
    pub age_rate_id: i64,
    #[serde(rename = "genreIDs")]
    pub genre_ids: Vec<i64>,
    #[serde(rename = "posterURL", skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    #[serde(rename = "trailerURL", skip_serializing_if = "Option::is_none")]
    pub trailer_url: Option<String>,
}

/// Maps the age-rate labels shown to operators onto backend ids.
pub fn age_rate_id(label: &str) -> Option<i64> {
    match label.trim() {
        "0+" => Some(1),
        "6+" => Some(2),
        "12+" => Some(3),
        "16+" => Some(4),
        "18+" => Some(5),
        _ => None,
    }
}

// --- Sessions ---

/// Session row as returned by `GET session/by-movie/{id}` and `GET session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSession {
    pub id: SessionId,
    pub date: String,
    pub session_type_id: FormatId,
    pub hall_id: HallId,
    pub price: f64,
    #[serde(rename = "price_VIP")]
    pub price_vip: f64,
    #[serde(default)]
    pub movie_id: Option<MovieId>,
    #[serde(default)]
    pub is_deleted: bool,
}

/// `GET session/{id}`: one session with its seat map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDetails {
    pub id: SessionId,
    pub hall_name: String,
    pub date_time: String,
    pub price: f64,
    #[serde(rename = "price_VIP")]
    pub price_vip: f64,
    pub session_type_id: FormatId,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub seats: Vec<SeatInfo>,
}

impl SessionDetails {
    /// Number of seats already booked for this session.
    pub fn booked_count(&self) -> usize {
        self.seats.iter().filter(|s| s.is_booked).count()
    }

    pub fn seat(&self, row: u32, col: u32) -> Option<&SeatInfo> {
        self.seats.iter().find(|s| s.row == row && s.col == col)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatInfo {
    #[serde(rename = "is_VIP")]
    pub is_vip: bool,
    pub is_booked: bool,
    pub row: u32,
    pub col: u32,
}

/// One element of the `POST session` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionPayload {
    #[serde(rename = "movieID")]
    pub movie_id: MovieId,
    pub date: String,
    pub price: f64,
    #[serde(rename = "priceVIP")]
    pub price_vip: f64,
    #[serde(rename = "hallID")]
    pub hall_id: HallId,
    #[serde(rename = "sessionTypeID")]
    pub session_type_id: FormatId,
}

/// One element of the `POST session` response, aligned with the request order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSession {
    pub id: SessionId,
}

/// One element of the `PUT sessions` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSessionPayload {
    pub session_id: SessionId,
    pub date: String,
    pub price: f64,
    #[serde(rename = "price_VIP")]
    pub price_vip: f64,
    pub hall_id: HallId,
    pub session_type_id: FormatId,
    pub is_deleted: bool,
}

// --- Booking ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRequest {
    #[serde(rename = "sessionID")]
    pub session_id: SessionId,
    #[serde(rename = "seatRow")]
    pub seat_row: u32,
    #[serde(rename = "seatCol")]
    pub seat_col: u32,
    #[serde(rename = "isVIP")]
    pub is_vip: bool,
}

// --- Auth & users ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBooking {
    pub movie_name: String,
    #[serde(default)]
    pub movie_poster_url: Option<String>,
    pub date: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// `GET user/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub user: User,
    #[serde(default)]
    pub bookings: Vec<UserBooking>,
}

// --- Statistics ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsPeriod {
    Day,
    #[default]
    Week,
    Month,
}

impl StatsPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatsPeriod::Day => "day",
            StatsPeriod::Week => "week",
            StatsPeriod::Month => "month",
        }
    }
}
