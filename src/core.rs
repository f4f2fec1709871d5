//! Core data structures for the lock code synchronization.
//!
//! This module defines the fundamental types used throughout lock-automation:
//! - Configuration structures loaded from TOML (vendor endpoints, code windows)
//! - Run settings validated from the command line
//! - Reservations, access code requests and issued codes
//! - Error types for the whole run

use chrono::{DateTime, Days, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Timelike};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// longest lookahead in reservation mode
pub const MAX_LOOKAHEAD_DAYS: u32 = 366;

// daily pins are keyed by day of month, more days would overwrite each other
pub const MAX_DAILY_PIN_DAYS: u32 = 28;

// upper bound for each side of the code buffer
pub const MAX_BUFFER_MINUTES: i64 = 24 * 60;

// config structures for config.toml

/// Main configuration structure for lock-automation.
///
/// Holds vendor endpoints, the code validity rule and run defaults. Every
/// section is optional in the file, missing values fall back to the defaults
/// defined here.
///
/// # Examples
///
/// ```
/// use lock_automation::core::SyncConfig;
///
/// let config = SyncConfig::default();
/// assert_eq!(config.general.http_timeout_secs, 10);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct SyncConfig {
    /// Run defaults (granularity, lookahead, timeouts)
    pub general: GeneralConfig,
    /// How a reservation maps to a code validity window
    pub window: WindowConfig,
    /// Igloo lock vendor endpoints
    pub igloo: IglooConfig,
    /// Play by Point booking vendor endpoints
    pub play_by_point: PlayByPointConfig,
}

impl SyncConfig {
    /// Default number of days to look ahead for a granularity, used when
    /// `--num-days` is not given.
    #[must_use]
    pub fn default_num_days(&self, granularity: Granularity) -> u32 {
        match granularity {
            Granularity::Reservation => self.general.lookahead_days,
            Granularity::Day => self.general.daily_pin_days,
        }
    }

    /// Validity buffer from the `[window]` section.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Configuration`] if a buffer is negative or longer
    /// than a day.
    pub fn code_buffer(&self) -> Result<CodeBuffer, SyncError> {
        let minutes = |key: &str, value: i64| {
            if (0..=MAX_BUFFER_MINUTES).contains(&value) {
                TimeDelta::try_minutes(value)
                    .ok_or_else(|| SyncError::Configuration(format!("window.{key} is out of range")))
            } else {
                Err(SyncError::Configuration(format!(
                    "window.{key} must be between 0 and {MAX_BUFFER_MINUTES}, got {value}"
                )))
            }
        };

        Ok(CodeBuffer {
            before: minutes("buffer_before_minutes", self.window.buffer_before_minutes)?,
            after: minutes("buffer_after_minutes", self.window.buffer_after_minutes)?,
            align_to_hour: self.window.align_to_hour,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub granularity: Granularity,
    /// days covered in reservation mode, starting today
    pub lookahead_days: u32,
    /// days covered in day mode, starting tomorrow
    pub daily_pin_days: u32,
    pub http_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            granularity: Granularity::Reservation,
            lookahead_days: 1,
            daily_pin_days: 14,
            http_timeout_secs: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct WindowConfig {
    pub buffer_before_minutes: i64,
    pub buffer_after_minutes: i64,
    pub align_to_hour: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            buffer_before_minutes: 15,
            buffer_after_minutes: 15,
            align_to_hour: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct IglooConfig {
    pub auth_url: String,
    pub api_url: String,
    pub scopes: Vec<String>,
}

impl Default for IglooConfig {
    fn default() -> Self {
        Self {
            auth_url: "https://auth.igloohome.co/oauth2/token".to_string(),
            api_url: "https://api.igloodeveloper.co".to_string(),
            scopes: vec![
                "igloohomeapi/algopin-hourly".to_string(),
                "igloohomeapi/algopin-daily".to_string(),
                "igloohomeapi/algopin-onetime".to_string(),
                "igloohomeapi/get-devices".to_string(),
            ],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PlayByPointConfig {
    pub base_url: String,
    pub user_agent: String,
    /// display name of the facility rule holding the daily door codes
    pub entry_codes_rule: String,
}

impl Default for PlayByPointConfig {
    fn default() -> Self {
        Self {
            base_url: "https://app.playbypoint.com".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string(),
            entry_codes_rule: "Entry Access Codes".to_string(),
        }
    }
}

/// Unit for which one access code is issued.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// one code per booked reservation
    #[default]
    Reservation,
    /// one all-day code per court-day, published as Play by Point entry codes
    Day,
}

// run settings, validated from the command line

/// Igloo OAuth client credentials.
#[derive(Clone)]
pub struct IglooCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for IglooCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IglooCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

/// Play by Point login and the facility owner the codes belong to.
#[derive(Clone)]
pub struct BookingCredentials {
    pub username: String,
    pub password: String,
    pub owner_id: String,
}

impl fmt::Debug for BookingCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookingCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("owner_id", &self.owner_id)
            .finish()
    }
}

/// Raw, unvalidated run arguments as they come from the command line.
///
/// Every field is optional so that a missing value becomes a
/// [`SyncError::Configuration`] listing all problems at once, before any
/// network call is made.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub igloo_client_id: Option<String>,
    pub igloo_client_secret: Option<String>,
    pub igloo_lock_id: Option<String>,
    pub play_by_point_username: Option<String>,
    pub play_by_point_password: Option<String>,
    pub play_by_point_owner: Option<String>,
    pub timezone: Option<String>,
    pub granularity: Option<Granularity>,
    pub num_days: Option<u32>,
    pub dry_run: bool,
}

impl RunArgs {
    /// Validates the arguments against the loaded config.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Configuration`] if a required value is missing or
    /// blank, the timezone is not a known IANA name, the number of days is
    /// out of range for the granularity, or the `[window]` buffers are invalid.
    pub fn validate(self, config: &SyncConfig) -> Result<SyncSettings, SyncError> {
        let required = [
            ("--igloo-client-id", &self.igloo_client_id),
            ("--igloo-client-secret", &self.igloo_client_secret),
            ("--igloo-lock-id", &self.igloo_lock_id),
            ("--play-by-point-username", &self.play_by_point_username),
            ("--play-by-point-password", &self.play_by_point_password),
            ("--play-by-point-owner", &self.play_by_point_owner),
            ("--timezone", &self.timezone),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.as_deref().is_none_or(|v| v.trim().is_empty()))
            .map(|(flag, _)| *flag)
            .collect();

        if !missing.is_empty() {
            return Err(SyncError::Configuration(format!(
                "missing required value(s): {}",
                missing.join(", ")
            )));
        }

        let tz_name = self.timezone.unwrap_or_default();
        let timezone: Tz = tz_name.trim().parse().map_err(|_| {
            SyncError::Configuration(format!("unknown timezone '{}'", tz_name.trim()))
        })?;

        let granularity = self.granularity.unwrap_or(config.general.granularity);
        let num_days = self
            .num_days
            .unwrap_or_else(|| config.default_num_days(granularity));

        if num_days == 0 {
            return Err(SyncError::Configuration(
                "--num-days must be at least 1".to_string(),
            ));
        }
        let max_days = match granularity {
            Granularity::Reservation => MAX_LOOKAHEAD_DAYS,
            Granularity::Day => MAX_DAILY_PIN_DAYS,
        };
        if num_days > max_days {
            return Err(SyncError::Configuration(format!(
                "--num-days must be at most {max_days} for {granularity:?} granularity, got {num_days}"
            )));
        }

        let buffer = config.code_buffer()?;

        Ok(SyncSettings {
            igloo: IglooCredentials {
                client_id: self.igloo_client_id.unwrap_or_default(),
                client_secret: self.igloo_client_secret.unwrap_or_default(),
            },
            lock_id: self.igloo_lock_id.unwrap_or_default(),
            booking: BookingCredentials {
                username: self.play_by_point_username.unwrap_or_default(),
                password: self.play_by_point_password.unwrap_or_default(),
                owner_id: self.play_by_point_owner.unwrap_or_default(),
            },
            timezone,
            granularity,
            num_days,
            buffer,
            dry_run: self.dry_run,
        })
    }
}

/// Validated settings for one sync run.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub igloo: IglooCredentials,
    pub lock_id: String,
    pub booking: BookingCredentials,
    pub timezone: Tz,
    pub granularity: Granularity,
    pub num_days: u32,
    pub buffer: CodeBuffer,
    pub dry_run: bool,
}

// domain structures

/// Grace time around a reservation during which its code is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBuffer {
    pub before: Duration,
    pub after: Duration,
    /// floor the start and ceil the end to whole local hours
    pub align_to_hour: bool,
}

impl Default for CodeBuffer {
    fn default() -> Self {
        Self {
            before: TimeDelta::minutes(15),
            after: TimeDelta::minutes(15),
            align_to_hour: true,
        }
    }
}

impl CodeBuffer {
    /// Computes the validity window for a booked slot.
    ///
    /// The result always covers `[start, end]`.
    #[must_use]
    pub fn window_for(&self, start: DateTime<Tz>, end: DateTime<Tz>) -> (DateTime<Tz>, DateTime<Tz>) {
        let from = start - self.before;
        let until = end + self.after;
        if self.align_to_hour {
            (floor_to_hour(from), ceil_to_hour(until))
        } else {
            (from, until)
        }
    }
}

fn is_whole_hour(dt: &DateTime<Tz>) -> bool {
    dt.minute() == 0 && dt.second() == 0 && dt.nanosecond() == 0
}

fn local_hour_start(dt: &DateTime<Tz>) -> NaiveDateTime {
    let local = dt.naive_local();
    local.date().and_time(NaiveTime::MIN) + TimeDelta::hours(i64::from(local.hour()))
}

/// Truncates a time to the start of its local hour.
///
/// Works on the wall clock, so zones with half-hour DST shifts
/// (Australia/Lord_Howe) still land on `:00`. If that hour start is skipped by
/// a transition, the previous existing hour start is used. Never later than `dt`.
#[must_use]
pub fn floor_to_hour(dt: DateTime<Tz>) -> DateTime<Tz> {
    if is_whole_hour(&dt) {
        return dt;
    }
    let tz = dt.timezone();
    let hour_start = local_hour_start(&dt);
    (0..3)
        .map(|back| hour_start - TimeDelta::hours(back))
        .filter_map(|naive| tz.from_local_datetime(&naive).earliest())
        .find(|candidate| *candidate <= dt)
        .unwrap_or(dt)
}

/// Rounds a time up to the next local hour start. Never earlier than `dt`.
#[must_use]
pub fn ceil_to_hour(dt: DateTime<Tz>) -> DateTime<Tz> {
    if is_whole_hour(&dt) {
        return dt;
    }
    let tz = dt.timezone();
    let next_hour = local_hour_start(&dt) + TimeDelta::hours(1);
    (0..3)
        .map(|forward| next_hour + TimeDelta::hours(forward))
        .filter_map(|naive| tz.from_local_datetime(&naive).latest())
        .find(|candidate| *candidate >= dt)
        .unwrap_or(dt)
}

/// Local midnight at the start of `day`.
///
/// Falls back to the earliest valid local time when midnight is skipped by a
/// DST transition.
///
/// # Errors
///
/// Returns [`SyncError::Internal`] if no time in the first hours of the day
/// exists in the timezone.
pub fn local_midnight(tz: Tz, day: NaiveDate) -> Result<DateTime<Tz>, SyncError> {
    (0..3)
        .filter_map(|hour| day.and_hms_opt(hour, 0, 0))
        .find_map(|naive| tz.from_local_datetime(&naive).earliest())
        .ok_or_else(|| SyncError::Internal(format!("no valid local midnight for {day} in {tz}")))
}

/// Range of local calendar days a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookaheadWindow {
    pub first_day: NaiveDate,
    pub days: u32,
    /// local midnight of `first_day`
    pub start: DateTime<Tz>,
    /// local midnight after the last day
    pub end: DateTime<Tz>,
}

impl LookaheadWindow {
    /// # Errors
    ///
    /// Fails if the last day is past the supported calendar range or a
    /// boundary midnight cannot be represented in the timezone.
    pub fn new(tz: Tz, first_day: NaiveDate, days: u32) -> Result<Self, SyncError> {
        let last_exclusive = first_day
            .checked_add_days(Days::new(u64::from(days)))
            .ok_or_else(|| {
                SyncError::Internal(format!("{days} day(s) after {first_day} is out of range"))
            })?;
        Ok(Self {
            first_day,
            days,
            start: local_midnight(tz, first_day)?,
            end: local_midnight(tz, last_exclusive)?,
        })
    }

    /// Last day covered, inclusive.
    #[must_use]
    pub fn last_day(&self) -> NaiveDate {
        self.first_day + Duration::days(i64::from(self.days.saturating_sub(1)))
    }

    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..self.days).map(|offset| self.first_day + Duration::days(i64::from(offset)))
    }

    #[must_use]
    pub fn overlaps(&self, reservation: &Reservation) -> bool {
        reservation.start < self.end && reservation.end > self.start
    }
}

/// A booked court slot from the booking vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Option<String>,
    pub court: String,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl Reservation {
    /// Human readable label, also used as the Igloo access name.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => format!(
                "{} {} #{}",
                self.court,
                self.start.format("%Y-%m-%d %H:%M"),
                id
            ),
            None => format!("{} {}", self.court, self.start.format("%Y-%m-%d %H:%M")),
        }
    }
}

/// What gets sent to the lock vendor for one code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCodeRequest {
    pub lock_id: String,
    pub valid_from: DateTime<Tz>,
    pub valid_until: DateTime<Tz>,
    pub access_name: String,
}

impl AccessCodeRequest {
    #[must_use]
    pub fn for_reservation(lock_id: &str, reservation: &Reservation, buffer: &CodeBuffer) -> Self {
        let (valid_from, valid_until) = buffer.window_for(reservation.start, reservation.end);
        Self {
            lock_id: lock_id.to_string(),
            valid_from,
            valid_until,
            access_name: format!("Reservation {}", reservation.label()),
        }
    }

    /// All-day code from local midnight to the next local midnight.
    ///
    /// # Errors
    ///
    /// Fails if a boundary midnight cannot be represented in the timezone.
    pub fn for_day(lock_id: &str, tz: Tz, day: NaiveDate) -> Result<Self, SyncError> {
        let next_day = day
            .succ_opt()
            .ok_or_else(|| SyncError::Internal(format!("no day after {day}")))?;
        Ok(Self {
            lock_id: lock_id.to_string(),
            valid_from: local_midnight(tz, day)?,
            valid_until: local_midnight(tz, next_day)?,
            access_name: format!("Pin for {day}"),
        })
    }
}

/// A code issued by the lock vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCode {
    pub pin: String,
    pub pin_id: Option<String>,
    pub lock_id: String,
    pub valid_from: DateTime<Tz>,
    pub valid_until: DateTime<Tz>,
}

/// One code that could not be issued.
#[derive(Debug)]
pub struct IssuanceFailure {
    pub label: String,
    pub error: SyncError,
}

/// Outcome of a sync run.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// number of codes the run tried (or would try) to issue
    pub planned: usize,
    pub issued: Vec<AccessCode>,
    pub failures: Vec<IssuanceFailure>,
    pub entry_codes_updated: bool,
}

impl SyncReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turns aggregated issuance failures into a run level error.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PartialFailure`] if any code failed.
    pub fn into_result(self) -> Result<Self, SyncError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SyncError::PartialFailure {
                failed: self.failures.len(),
                attempted: self.planned,
            })
        }
    }
}

/// Error types for lock-automation runs.
///
/// Configuration, booking and lock authentication errors abort the run.
/// Issuance errors are collected per code and summarized as
/// [`SyncError::PartialFailure`] at the end.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing or invalid command line input. Raised before any network call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Login, network or parse failure against Play by Point.
    #[error("Booking fetch failed: {0}")]
    BookingFetch(String),

    /// Igloo rejected the client credentials or could not be reached.
    #[error("Lock authentication failed: {0}")]
    LockAuth(String),

    /// A single code could not be issued.
    #[error("Code issuance failed for '{label}': {reason}")]
    CodeIssuance {
        /// access name of the code
        label: String,
        reason: String,
    },

    /// Writing the daily codes back to Play by Point failed.
    #[error("Entry code update failed: {0}")]
    EntryCodeUpdate(String),

    /// Some codes failed, the rest were still attempted.
    #[error("{failed} of {attempted} access code(s) could not be issued")]
    PartialFailure { failed: usize, attempted: usize },

    /// General internal error.
    #[error("General Internal Error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Process exit status for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::Configuration(_) => 2,
            _ => 1,
        }
    }
}
