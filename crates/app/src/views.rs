use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{Datelike, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use cinema_models::{MovieSummary, RawSession, SessionDetails};
use cinema_schedule::{Catalog, KeyError, Session, SessionStatus, keys};

const WEEKDAYS: [&str; 7] = ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"];

/// Seat map: `.` free, `V` free VIP, `x` booked.
pub fn seat_grid(details: &SessionDetails) -> String {
    let mut rows: BTreeMap<u32, Vec<(u32, char)>> = BTreeMap::new();
    for seat in &details.seats {
        let mark = match (seat.is_booked, seat.is_vip) {
            (true, _) => 'x',
            (false, true) => 'V',
            (false, false) => '.',
        };
        rows.entry(seat.row).or_default().push((seat.col, mark));
    }

    let mut out = String::new();
    for (row, mut seats) in rows {
        seats.sort_by_key(|(col, _)| *col);
        let cells: Vec<String> = seats.iter().map(|(_, mark)| mark.to_string()).collect();
        let _ = writeln!(out, "{row:>3}  {}", cells.join(" "));
    }
    let free = details.seats.len() - details.booked_count();
    let _ = write!(out, "{free} of {} seats free  (. free, V VIP, x booked)", details.seats.len());
    out
}

/// One day of a movie's sessions, grouped by format.
pub fn day_schedule(rows: &[RawSession], catalog: &Catalog, tz: Tz) -> Result<String, KeyError> {
    let mut by_format: BTreeMap<String, Vec<(NaiveTime, String)>> = BTreeMap::new();
    for row in rows.iter().filter(|r| !r.is_deleted) {
        let at = keys::normalize_server_datetime(&row.date, tz)?;
        let line = format!(
            "{}  {:<10} {:>8.2} / {:>8.2} ₴  (session {})",
            keys::display_time(at.time()),
            catalog.hall_label(row.hall_id),
            row.price,
            row.price_vip,
            row.id,
        );
        by_format.entry(catalog.format_label(row.session_type_id)).or_default().push((at.time(), line));
    }

    if by_format.is_empty() {
        return Ok("No sessions.".to_string());
    }
    let mut out = String::new();
    for (format, mut lines) in by_format {
        lines.sort_by_key(|(time, _)| *time);
        let _ = writeln!(out, "{format}");
        for (_, line) in lines {
            let _ = writeln!(out, "  {line}");
        }
    }
    Ok(out.trim_end().to_string())
}

/// Month grid with the number of sessions after each day that has any.
pub fn month_calendar(year: i32, month: u32, dots: &[(NaiveDate, usize)]) -> String {
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return String::new();
    };
    let counts: BTreeMap<NaiveDate, usize> = dots.iter().copied().collect();

    let mut out = String::new();
    let _ = writeln!(out, "{}", first.format("%B %Y"));
    let header: Vec<String> = WEEKDAYS.iter().map(|d| format!("{d:>5}")).collect();
    let _ = writeln!(out, "{}", header.concat());

    let offset = first.weekday().num_days_from_monday() as usize;
    let mut line = " ".repeat(offset * 5);
    for day in first.iter_days().take_while(|d| d.month() == month) {
        let marker = match counts.get(&day) {
            Some(n) if *n > 0 => format!("·{n}"),
            _ => String::new(),
        };
        let _ = write!(line, "{:>3}{marker:<2}", day.day());
        if day.weekday().num_days_from_monday() == 6 {
            let _ = writeln!(out, "{}", line.trim_end());
            line.clear();
        }
    }
    if !line.trim().is_empty() {
        let _ = writeln!(out, "{}", line.trim_end());
    }
    out.trim_end().to_string()
}

/// One line of the editor's list for a day.
pub fn session_line(index: usize, session: &Session, catalog: &Catalog) -> String {
    let state = match session.status {
        SessionStatus::Pending => "new".to_string(),
        SessionStatus::Persisted(id) => format!("#{id}"),
        SessionStatus::MarkedForDeletion(id) => format!("#{id} deleted"),
    };
    format!(
        "[{index}] {}  {:<10} {:<4} {:>8.2} / {:>8.2} ₴  {state}",
        keys::display_time(session.time),
        catalog.hall_label(session.hall_id),
        catalog.format_label(session.format_id),
        session.price,
        session.vip_price,
    )
}

pub fn movie_table(movies: &[MovieSummary], tz: Tz) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<6} {:<32} {:<9} {}", "ID", "Name", "Premiere", "Next session");
    let _ = writeln!(out, "{}", "-".repeat(70));
    for movie in movies {
        let next = movie
            .session
            .as_ref()
            .and_then(|s| s.date.as_deref())
            .and_then(|d| keys::normalize_server_datetime(d, tz).ok())
            .map(|at| format!("{} {}", keys::display_date(at.date()), keys::display_time(at.time())))
            .unwrap_or_default();
        let premiere = if movie.is_premiere { "yes" } else { "" };
        let _ = writeln!(out, "{:<6} {:<32} {:<9} {}", movie.id, movie.name, premiere, next);
    }
    let _ = write!(out, "\n{} movie(s)", movies.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinema_models::{FormatId, Hall, HallId, MovieId, SeatInfo, SessionId, SessionType};

    fn catalog() -> Catalog {
        Catalog::new(
            vec![Hall { id: HallId(1), name: "Зала 1".to_string() }],
            vec![
                SessionType { id: FormatId(1), label: "2D".to_string() },
                SessionType { id: FormatId(2), label: "3D".to_string() },
            ],
        )
    }

    fn seat(row: u32, col: u32, is_vip: bool, is_booked: bool) -> SeatInfo {
        SeatInfo { is_vip, is_booked, row, col }
    }

    #[test]
    fn seat_grid_marks_booked_and_vip() {
        let details = SessionDetails {
            id: SessionId(5),
            hall_name: "Зала 1".to_string(),
            date_time: "2025-01-10T18:00:00".to_string(),
            price: 120.0,
            price_vip: 180.0,
            session_type_id: FormatId(1),
            is_deleted: false,
            seats: vec![
                seat(1, 2, false, true),
                seat(1, 1, false, false),
                seat(2, 1, true, false),
                seat(2, 2, true, true),
            ],
        };
        let grid = seat_grid(&details);
        let lines: Vec<&str> = grid.lines().collect();
        assert_eq!(lines[0], "  1  . x");
        assert_eq!(lines[1], "  2  V x");
        assert!(lines[2].starts_with("2 of 4 seats free"));
    }

    #[test]
    fn day_schedule_groups_by_format_in_time_order() {
        let row = |id: i64, date: &str, format: i64| RawSession {
            id: SessionId(id),
            date: date.to_string(),
            session_type_id: FormatId(format),
            hall_id: HallId(1),
            price: 120.0,
            price_vip: 180.0,
            movie_id: Some(MovieId(1)),
            is_deleted: false,
        };
        let rows = vec![
            row(3, "2025-01-10T20:00:00", 1),
            row(1, "2025-01-10T12:00:00", 2),
            row(2, "2025-01-10T10:30:00", 1),
        ];
        let text = day_schedule(&rows, &catalog(), chrono_tz::Europe::Kyiv).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "2D");
        assert!(lines[1].trim_start().starts_with("10:30"));
        assert!(lines[2].trim_start().starts_with("20:00"));
        assert_eq!(lines[3], "3D");
        assert!(lines[4].contains("(session 1)"));
    }

    #[test]
    fn calendar_starts_on_the_right_weekday() {
        // 1 January 2025 was a Wednesday.
        let dots = vec![(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(), 3)];
        let text = month_calendar(2025, 1, &dots);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "January 2025");
        assert_eq!(lines[2], format!("{}  1    2    3    4    5", " ".repeat(10)));
        assert!(lines[3].contains("10·3"));
    }
}
