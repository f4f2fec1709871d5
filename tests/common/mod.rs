#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone};
use chrono_tz::America::Denver;
use chrono_tz::Tz;
use lock_automation::core::{Granularity, LookaheadWindow, RunArgs, SyncConfig, SyncSettings};
use lock_automation::{AccessCode, AccessCodeRequest, BookingClient, LockClient, Reservation, SyncError};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Everything the fake vendors were asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Login,
    FetchReservations(NaiveDate, u32),
    UpdateEntryCodes(BTreeMap<u32, Option<String>>),
    Authenticate,
    IssueCode(AccessCodeRequest),
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

pub fn new_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<Call> {
    log.lock().unwrap().clone()
}

pub fn issued_requests(log: &CallLog) -> Vec<AccessCodeRequest> {
    calls(log)
        .into_iter()
        .filter_map(|c| match c {
            Call::IssueCode(r) => Some(r),
            _ => None,
        })
        .collect()
}

pub fn count_lock_calls(log: &CallLog) -> usize {
    calls(log)
        .iter()
        .filter(|c| matches!(c, Call::Authenticate | Call::IssueCode(_)))
        .count()
}

pub struct FakeBooking {
    pub log: CallLog,
    pub reservations: Vec<Reservation>,
    pub fail_login: bool,
    pub fail_fetch: bool,
    pub fail_update: bool,
}

impl FakeBooking {
    pub fn new(log: &CallLog, reservations: Vec<Reservation>) -> Self {
        Self {
            log: log.clone(),
            reservations,
            fail_login: false,
            fail_fetch: false,
            fail_update: false,
        }
    }
}

#[async_trait]
impl BookingClient for FakeBooking {
    async fn login(&mut self) -> Result<(), SyncError> {
        self.log.lock().unwrap().push(Call::Login);
        if self.fail_login {
            return Err(SyncError::BookingFetch("login failed (HTTP 401)".to_string()));
        }
        Ok(())
    }

    async fn fetch_reservations(
        &self,
        window: &LookaheadWindow,
    ) -> Result<Vec<Reservation>, SyncError> {
        self.log
            .lock()
            .unwrap()
            .push(Call::FetchReservations(window.first_day, window.days));
        if self.fail_fetch {
            return Err(SyncError::BookingFetch("unparseable reservations response".to_string()));
        }
        Ok(self.reservations.clone())
    }

    async fn update_entry_codes(
        &self,
        codes: &BTreeMap<u32, Option<String>>,
    ) -> Result<(), SyncError> {
        self.log
            .lock()
            .unwrap()
            .push(Call::UpdateEntryCodes(codes.clone()));
        if self.fail_update {
            return Err(SyncError::EntryCodeUpdate("HTTP 500".to_string()));
        }
        Ok(())
    }
}

pub struct FakeLock {
    pub log: CallLog,
    pub fail_auth: bool,
    /// access names containing one of these fail to issue
    pub fail_matching: Vec<String>,
    authenticated: bool,
}

impl FakeLock {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            fail_auth: false,
            fail_matching: Vec::new(),
            authenticated: false,
        }
    }
}

#[async_trait]
impl LockClient for FakeLock {
    async fn authenticate(&mut self) -> Result<(), SyncError> {
        self.log.lock().unwrap().push(Call::Authenticate);
        if self.fail_auth {
            return Err(SyncError::LockAuth("HTTP 401 Unauthorized".to_string()));
        }
        self.authenticated = true;
        Ok(())
    }

    async fn issue_code(&self, request: &AccessCodeRequest) -> Result<AccessCode, SyncError> {
        let issued_so_far = {
            let mut log = self.log.lock().unwrap();
            log.push(Call::IssueCode(request.clone()));
            log.iter().filter(|c| matches!(c, Call::IssueCode(_))).count()
        };

        if !self.authenticated {
            return Err(SyncError::LockAuth("not authenticated".to_string()));
        }
        if self
            .fail_matching
            .iter()
            .any(|needle| request.access_name.contains(needle.as_str()))
        {
            return Err(SyncError::CodeIssuance {
                label: request.access_name.clone(),
                reason: "rate limited (HTTP 429 Too Many Requests)".to_string(),
            });
        }

        Ok(AccessCode {
            pin: format!("{:06}", 100_000 + issued_so_far),
            pin_id: Some(format!("pin-{issued_so_far}")),
            lock_id: request.lock_id.clone(),
            valid_from: request.valid_from,
            valid_until: request.valid_until,
        })
    }
}

pub fn run_args() -> RunArgs {
    RunArgs {
        igloo_client_id: Some("igloo-id".to_string()),
        igloo_client_secret: Some("igloo-secret".to_string()),
        igloo_lock_id: Some("SP2X0123".to_string()),
        play_by_point_username: Some("desk@padel.example".to_string()),
        play_by_point_password: Some("pw".to_string()),
        play_by_point_owner: Some("4242".to_string()),
        timezone: Some("America/Denver".to_string()),
        ..RunArgs::default()
    }
}

pub fn settings(granularity: Granularity, num_days: u32) -> SyncSettings {
    RunArgs {
        granularity: Some(granularity),
        num_days: Some(num_days),
        ..run_args()
    }
    .validate(&SyncConfig::default())
    .unwrap()
}

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
}

/// Reservation on `today()` in Denver local time.
pub fn reservation(court: &str, start: (u32, u32), end: (u32, u32)) -> Reservation {
    reservation_on(today(), court, start, end)
}

pub fn reservation_on(day: NaiveDate, court: &str, start: (u32, u32), end: (u32, u32)) -> Reservation {
    let at = |(h, m): (u32, u32)| -> chrono::DateTime<Tz> {
        Denver
            .from_local_datetime(&day.and_hms_opt(h, m, 0).unwrap())
            .unwrap()
    };
    Reservation {
        id: Some(format!("{court}-{}{:02}", start.0, start.1)),
        court: court.to_string(),
        start: at(start),
        end: at(end),
    }
}
