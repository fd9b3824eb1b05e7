mod plan;
mod views;

use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{Datelike, Local, NaiveDate};
use cinema_client::{ApiClient, StatsReport, TokenStore};
use cinema_config::Config;
use cinema_models::{
    BookingRequest, MovieId, MovieUpdate, NewMovie, SessionId, SignUpRequest, StatsPeriod, age_rate_id,
};
use cinema_schedule::{MovieKey, MovieRef, ScheduleEditor, ScheduleStore, SlotDefaults, SyncEngine, keys};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::OffsetTime;

use crate::plan::Plan;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const GIT_HASH: &str = env!("CINEMA_GIT_HASH");

fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH})")
}

// --- CLI definition ---

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Period {
    Day,
    Week,
    Month,
}

impl From<Period> for StatsPeriod {
    fn from(p: Period) -> Self {
        match p {
            Period::Day => StatsPeriod::Day,
            Period::Week => StatsPeriod::Week,
            Period::Month => StatsPeriod::Month,
        }
    }
}

/// A seat given on the command line as `ROW:COL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SeatArg {
    row: u32,
    col: u32,
}

impl FromStr for SeatArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (row, col) = s.split_once(':').ok_or_else(|| format!("expected ROW:COL, got {s:?}"))?;
        let row = row.trim().parse().map_err(|_| format!("bad row in {s:?}"))?;
        let col = col.trim().parse().map_err(|_| format!("bad column in {s:?}"))?;
        Ok(Self { row, col })
    }
}

impl std::fmt::Display for SeatArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.row, self.col)
    }
}

#[derive(Parser)]
#[command(name = "cinema")]
#[command(about = "Cinema tickets and session schedules")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CINEMA_GIT_HASH"), ")"))]
struct Cli {
    /// Log level (default: from config, otherwise info)
    #[arg(short, long, global = true)]
    log_level: Option<LogLevel>,

    /// Display log timestamps in UTC (default: local time)
    #[arg(long, global = true)]
    utc: bool,

    /// Backend base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Config file (default: ~/.cinema/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session token
    SignIn {
        #[arg(long)]
        email: String,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Create an account and sign in
    SignUp {
        #[arg(long)]
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Sign out and forget the stored token
    SignOut,
    /// Show the signed-in user and their bookings
    Whoami,
    /// List movies
    Movies {
        /// Only movies of this genre id
        #[arg(long)]
        genre: Option<i64>,
    },
    /// Show one movie
    Movie { id: MovieId },
    /// Genres and age ratings known to the backend
    Genres,
    /// Add a movie (admin)
    MovieAdd {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        year: i32,
        /// Running time in minutes
        #[arg(long)]
        duration: i64,
        /// Age rating label, e.g. 12+
        #[arg(long)]
        age_rate: String,
        /// Genre id; repeat for several genres
        #[arg(long = "genre")]
        genres: Vec<i64>,
        #[arg(long)]
        poster_url: Option<String>,
        #[arg(long)]
        trailer_url: Option<String>,
    },
    /// Change a movie's name, age rating and description (admin)
    MovieEdit {
        id: MovieId,
        #[arg(long)]
        name: String,
        #[arg(long)]
        age_rate: String,
        #[arg(long)]
        description: String,
    },
    /// A movie's sessions on one day, grouped by format
    Sessions {
        movie: MovieId,
        /// Day to show, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Seat map of a session
    Seats { session: SessionId },
    /// Book seats for a session
    Book {
        session: SessionId,
        /// Seat as ROW:COL; repeat for several seats
        #[arg(long = "seat", required = true)]
        seats: Vec<SeatArg>,
    },
    /// Manage a movie's session schedule (admin)
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommand,
    },
    /// Manage single sessions (admin)
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// Sales statistics (admin)
    Stats {
        #[arg(long, value_enum, default_value = "week")]
        period: Period,
    },
}

#[derive(Subcommand)]
enum ScheduleCommand {
    /// Month calendar and session list of a movie
    Show {
        movie: MovieId,
        /// Month to show, YYYY-MM (default: current month)
        #[arg(long)]
        month: Option<String>,
    },
    /// Apply a TOML plan of added, edited and deleted sessions
    Apply {
        movie: MovieId,
        plan: PathBuf,
        /// Validate and print the batches without saving
        #[arg(long)]
        dry_run: bool,
        /// Do not ask before deleting sessions that have bookings
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Delete one session right away
    Delete {
        id: SessionId,
        #[arg(long)]
        yes: bool,
    },
}

// --- Logging ---

fn init_logging(level: &str, utc: bool) {
    let filter = EnvFilter::new(level);

    if utc {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(OffsetTime::new(
                time::UtcOffset::UTC,
                time::macros::format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
                ),
            ))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(LocalTimer)
            .init();
    }
}

struct LocalTimer;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

// --- Prompts ---

fn prompt(question: &str) -> Result<String> {
    print!("{question}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn confirm(question: &str) -> Result<bool> {
    let answer = prompt(&format!("{question} [y/N] "))?;
    Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
}

fn password_or_prompt(password: Option<String>) -> Result<String> {
    match password {
        Some(p) => Ok(p),
        None => prompt("Password: "),
    }
}

fn parse_month(s: &str) -> Result<(i32, u32)> {
    let first = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d")
        .with_context(|| format!("expected YYYY-MM, got {s:?}"))?;
    Ok((first.year(), first.month()))
}

// --- Auth ---

fn require_signed_in(api: &ApiClient) -> Result<()> {
    if !api.tokens().is_authenticated() {
        bail!("Not signed in. Run `cinema sign-in` first.");
    }
    Ok(())
}

async fn require_admin(api: &ApiClient) -> Result<()> {
    require_signed_in(api)?;
    api.load_auth_state().await?;
    if !api.auth_state().is_admin {
        bail!("This command needs an administrator account.");
    }
    Ok(())
}

/// Logs every change of the signed-in state for the rest of the run.
fn watch_auth(api: &ApiClient) {
    let mut auth = api.subscribe();
    tokio::spawn(async move {
        while auth.changed().await.is_ok() {
            let state = *auth.borrow_and_update();
            if state.authenticated {
                debug!("Signed in (admin: {})", state.is_admin);
            } else {
                debug!("Signed out");
            }
        }
    });
}

/// Age rating id for a label such as `16+`, as the backend lists them.
async fn resolve_age_rate(api: &ApiClient, label: &str) -> Result<i64> {
    let rates = api.age_rates().await?;
    if let Some(id) = rates.iter().find(|r| r.age_rate.trim() == label.trim()).and_then(|r| r.id) {
        return Ok(id);
    }
    age_rate_id(label).with_context(|| format!("Unknown age rating {label:?}"))
}

// --- Schedule ---

/// Loads a movie's schedule into an editor, with every other movie's
/// sessions alongside for hall occupancy checks.
async fn load_editor(api: &ApiClient, config: &Config, movie_id: MovieId) -> Result<ScheduleEditor> {
    let (movie, catalog, rows) = tokio::try_join!(
        api.movie(movie_id),
        api.catalog(),
        api.movie_sessions_on(movie_id, None),
    )?;
    let key = MovieKey::new(&movie.name)?;
    let mut store = ScheduleStore::new();
    let loaded = store.load_movie(&key, &rows, config.timezone)?;
    info!("Loaded {loaded} sessions of {key}");

    let (movies, all_rows) = tokio::try_join!(api.movies(), api.sessions())?;
    let names: BTreeMap<MovieId, String> = movies.into_iter().map(|m| (m.id, m.name)).collect();
    let mut others: BTreeMap<MovieId, Vec<_>> = BTreeMap::new();
    for row in all_rows {
        match row.movie_id {
            Some(id) if id != movie_id => others.entry(id).or_default().push(row),
            _ => {}
        }
    }
    for (id, rows) in others {
        let Some(name) = names.get(&id) else {
            warn!("Sessions reference unknown movie {id}; skipping them for occupancy checks");
            continue;
        };
        let other = MovieKey::new(name)?;
        if other == key {
            warn!("Movie {id} shares the title {key:?}; skipping it for occupancy checks");
            continue;
        }
        store.extend_movie(&other, &rows, config.timezone)?;
    }

    let defaults = SlotDefaults::from_catalog(&catalog, config.base_price, config.base_vip_price)?;
    let today = keys::today_in(config.timezone);
    Ok(ScheduleEditor::new(store, MovieRef { id: movie_id, key }, catalog, defaults, today))
}

async fn schedule_show(api: &ApiClient, config: &Config, movie: MovieId, month: Option<String>) -> Result<()> {
    require_admin(api).await?;
    let editor = load_editor(api, config, movie).await?;
    let today = keys::today_in(config.timezone);
    let (year, month) = match month {
        Some(m) => parse_month(&m)?,
        None => (today.year(), today.month()),
    };

    let days = editor.month_dots(year, month);
    println!("{}\n", editor.movie().key);
    println!("{}", views::month_calendar(year, month, &days));
    for (date, _) in days {
        println!("\n{}", keys::display_date(date));
        for (i, session) in editor.sessions(date).iter().enumerate() {
            println!("  {}", views::session_line(i, session, editor.catalog()));
        }
    }
    Ok(())
}

/// Warns about bookings on sessions about to be deleted; returns how many seats are booked.
async fn booked_seats(api: &ApiClient, sessions: &[SessionId]) -> Result<usize> {
    let mut total = 0;
    for id in sessions {
        let booked = api.session(*id).await?.booked_count();
        if booked > 0 {
            println!("Warning: session {id} has {booked} booked seat(s).");
        }
        total += booked;
    }
    Ok(total)
}

async fn schedule_apply(
    api: &ApiClient,
    config: &Config,
    movie: MovieId,
    path: PathBuf,
    dry_run: bool,
    yes: bool,
) -> Result<()> {
    require_admin(api).await?;
    let plan = Plan::load(&path)?;
    if plan.is_empty() {
        println!("Plan is empty, nothing to do.");
        return Ok(());
    }

    let mut editor = load_editor(api, config, movie).await?;
    let applied = plan.apply(&mut editor)?;
    info!(
        "Plan applied locally: {} added, {} edited, {} deleted",
        applied.added,
        applied.edited,
        applied.local_deletes + applied.persisted_deletes.len()
    );
    let booked = booked_seats(api, &applied.persisted_deletes).await?;

    let batches = editor.plan()?;
    println!(
        "{} session(s) to create, {} to update ({} deletion(s))",
        batches.creates.len(),
        batches.updates.len(),
        batches.deletions()
    );
    if dry_run {
        for create in &batches.creates {
            println!("  + {} hall {} format {}  {:.2} / {:.2}", create.date, create.hall_id, create.session_type_id, create.price, create.price_vip);
        }
        for update in &batches.updates {
            let verb = if update.is_deleted { "-" } else { "~" };
            println!("  {verb} session {} {} hall {}", update.session_id, update.date, update.hall_id);
        }
        return Ok(());
    }
    if batches.is_empty() {
        println!("Nothing changed.");
        return Ok(());
    }
    if booked > 0 && !yes && !confirm("Delete sessions that have bookings?")? {
        editor.cancel();
        println!("Nothing saved.");
        return Ok(());
    }

    let engine = SyncEngine::new(api.clone(), config.timezone).reject_stale(config.reject_stale_saves);
    let report = editor.save(&engine).await?;
    println!(
        "Saved: {} created, {} updated, {} deleted",
        report.created.len(),
        report.updated,
        report.deleted
    );
    Ok(())
}

async fn session_delete(api: &ApiClient, config: &Config, id: SessionId, yes: bool) -> Result<()> {
    require_admin(api).await?;
    let details = api.session(id).await?;
    let at = keys::normalize_server_datetime(&details.date_time, config.timezone)?;
    let booked = booked_seats(api, &[id]).await?;
    let question = format!(
        "Delete session {id} on {} at {} in {}?",
        keys::display_date(at.date()),
        keys::display_time(at.time()),
        details.hall_name
    );
    if !yes && !confirm(&question)? {
        println!("Session kept.");
        return Ok(());
    }
    api.delete_session(id).await?;
    println!("Session {id} deleted ({booked} booked seat(s) affected).");
    Ok(())
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    if let Some(level) = &cli.log_level {
        config.log_level = level.to_string();
    }
    if cli.utc {
        config.utc = true;
    }
    if let Some(url) = &cli.api_url {
        config.api_base_url = url.clone();
    }
    init_logging(&config.log_level, config.utc);
    for warning in &config.warnings {
        warn!("{warning}");
    }
    debug!("cinema {} against {}", version_string(), config.api_base_url);

    let tokens = TokenStore::open(&config.session_file)?;
    let api = ApiClient::new(&config.api_base_url, Duration::from_secs(config.request_timeout_secs), tokens)?;
    watch_auth(&api);

    match cli.command {
        Commands::SignIn { email, password } => {
            let password = password_or_prompt(password)?;
            api.sign_in(&email, &password).await?;
            let user = api.load_auth_state().await?;
            match user {
                Some(data) => println!("Signed in as {} {}", data.user.first_name, data.user.last_name),
                None => println!("Signed in as {email}"),
            }
        }
        Commands::SignUp { email, first_name, last_name, password } => {
            let password = password_or_prompt(password)?;
            let request = SignUpRequest { email, first_name, last_name, password };
            api.sign_up(&request).await?;
            println!("Account created, signed in as {}", request.email);
        }
        Commands::SignOut => {
            if let Err(e) = api.sign_out().await {
                warn!("{e}");
            }
            println!("Signed out.");
        }
        Commands::Whoami => {
            require_signed_in(&api)?;
            let Some(data) = api.load_auth_state().await? else {
                bail!("The stored token carries no user id; sign in again.");
            };
            let role = if data.user.is_admin { "administrator" } else { "visitor" };
            println!("{} {} <{}> ({role})", data.user.first_name, data.user.last_name, data.user.email);
            if data.bookings.is_empty() {
                println!("No bookings.");
            }
            for booking in &data.bookings {
                let when = keys::normalize_server_datetime(&booking.date, config.timezone)
                    .map(|at| format!("{} {}", keys::display_date(at.date()), keys::display_time(at.time())))
                    .unwrap_or_else(|_| booking.date.clone());
                println!("  {when}  {}", booking.movie_name);
            }
        }
        Commands::Movies { genre } => {
            let mut movies = api.movies().await?;
            if let Some(genre) = genre {
                movies.retain(|m| m.genre_ids.contains(&genre));
            }
            if movies.is_empty() {
                println!("No movies found.");
            } else {
                println!("{}", views::movie_table(&movies, config.timezone));
            }
        }
        Commands::Movie { id } => {
            let movie = api.movie(id).await?;
            println!("{} (id {})", movie.name, movie.id);
            if let Some(minutes) = movie.duration {
                println!("Duration: {minutes} min");
            }
            if let Some(description) = &movie.description {
                println!("\n{description}");
            }
        }
        Commands::Genres => {
            let (genres, rates) = tokio::try_join!(api.genres(), api.age_rates())?;
            println!("Genres:");
            for genre in &genres {
                println!("  {:<4} {}", genre.id, genre.name);
            }
            let labels: Vec<&str> = rates.iter().map(|r| r.age_rate.as_str()).collect();
            println!("Age ratings: {}", labels.join(", "));
        }
        Commands::MovieAdd { name, description, year, duration, age_rate, genres, poster_url, trailer_url } => {
            require_admin(&api).await?;
            let movie = NewMovie {
                name,
                description,
                year,
                duration,
                age_rate_id: resolve_age_rate(&api, &age_rate).await?,
                genre_ids: genres,
                poster_url,
                trailer_url,
            };
            api.create_movie(&movie).await?;
            println!("Movie {:?} added.", movie.name);
        }
        Commands::MovieEdit { id, name, age_rate, description } => {
            require_admin(&api).await?;
            let update = MovieUpdate { name, age_rate_id: resolve_age_rate(&api, &age_rate).await?, description };
            api.update_movie(id, &update).await?;
            println!("Movie {id} updated.");
        }
        Commands::Sessions { movie, date } => {
            let date = date.unwrap_or_else(|| keys::today_in(config.timezone));
            let (rows, catalog) = tokio::try_join!(api.movie_sessions_on(movie, Some(date)), api.catalog())?;
            println!("{}", keys::display_date(date));
            println!("{}", views::day_schedule(&rows, &catalog, config.timezone)?);
        }
        Commands::Seats { session } => {
            let details = api.session(session).await?;
            println!("{}, {}", details.hall_name, details.date_time);
            println!("{}", views::seat_grid(&details));
        }
        Commands::Book { session, seats } => {
            require_signed_in(&api)?;
            let details = api.session(session).await?;
            let mut requests = Vec::new();
            let mut total = 0.0;
            for seat in &seats {
                let info = details
                    .seat(seat.row, seat.col)
                    .with_context(|| format!("Session {session} has no seat {seat}"))?;
                if info.is_booked {
                    bail!("Seat {seat} is already booked");
                }
                total += if info.is_vip { details.price_vip } else { details.price };
                requests.push(BookingRequest {
                    session_id: session,
                    seat_row: seat.row,
                    seat_col: seat.col,
                    is_vip: info.is_vip,
                });
            }
            api.book(&requests).await?;
            println!("Booked {} seat(s), total {total:.2} ₴", requests.len());
        }
        Commands::Schedule { command } => match command {
            ScheduleCommand::Show { movie, month } => schedule_show(&api, &config, movie, month).await?,
            ScheduleCommand::Apply { movie, plan, dry_run, yes } => {
                schedule_apply(&api, &config, movie, plan, dry_run, yes).await?
            }
        },
        Commands::Session { command } => match command {
            SessionCommand::Delete { id, yes } => session_delete(&api, &config, id, yes).await?,
        },
        Commands::Stats { period } => {
            require_admin(&api).await?;
            for report in StatsReport::ALL {
                let data = api.stats(report, period.into()).await?;
                println!("{}\n{}\n", report.title(), serde_json::to_string_pretty(&data)?);
            }
        }
    }

    Ok(())
}
