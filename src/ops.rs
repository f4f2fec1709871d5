use crate::core::{
    AccessCodeRequest, CodeBuffer, Granularity, IssuanceFailure, LookaheadWindow, Reservation,
    SyncError, SyncReport, SyncSettings,
};
use crate::{BookingClient, LockClient};
use chrono::{Datelike, NaiveDate};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Runs one synchronization.
///
/// Order is fixed: booking login, (reservation mode) fetch, lock
/// authentication, one issuance per code, (day mode) entry code update.
/// Login, fetch and lock authentication errors abort the run; issuance errors
/// are collected in the report.
///
/// `today` is the current local date in the facility timezone.
pub async fn run_sync(
    booking: &mut dyn BookingClient,
    lock: &mut dyn LockClient,
    settings: &SyncSettings,
    today: NaiveDate,
) -> Result<SyncReport, SyncError> {
    info!("Logging in to Play by Point...");
    booking.login().await?;
    info!("Successfully logged in to Play by Point");

    match settings.granularity {
        Granularity::Reservation => sync_reservations(booking, lock, settings, today).await,
        Granularity::Day => sync_daily_pins(booking, lock, settings, today).await,
    }
}

async fn sync_reservations(
    booking: &mut dyn BookingClient,
    lock: &mut dyn LockClient,
    settings: &SyncSettings,
    today: NaiveDate,
) -> Result<SyncReport, SyncError> {
    let window = LookaheadWindow::new(settings.timezone, today, settings.num_days)?;
    info!(
        "Fetching reservations from {} to {}...",
        window.first_day,
        window.last_day()
    );

    let fetched = booking.fetch_reservations(&window).await?;
    let reservations = reservations_in_window(fetched, &window);
    let requests = plan_reservation_codes(&settings.lock_id, &reservations, &settings.buffer);

    if requests.is_empty() {
        info!("No reservations in the window, nothing to issue");
        return Ok(SyncReport::default());
    }
    if settings.dry_run {
        print_plan(&requests);
        return Ok(SyncReport {
            planned: requests.len(),
            ..SyncReport::default()
        });
    }

    info!("Authenticating with Igloo...");
    lock.authenticate().await?;

    info!("Issuing {} access code(s)", requests.len());
    issue_codes(&*lock, &requests).await
}

async fn sync_daily_pins(
    booking: &mut dyn BookingClient,
    lock: &mut dyn LockClient,
    settings: &SyncSettings,
    today: NaiveDate,
) -> Result<SyncReport, SyncError> {
    let tomorrow = today
        .succ_opt()
        .ok_or_else(|| SyncError::Internal(format!("no day after {today}")))?;
    let window = LookaheadWindow::new(settings.timezone, tomorrow, settings.num_days)?;
    let requests = window
        .iter_days()
        .map(|day| AccessCodeRequest::for_day(&settings.lock_id, settings.timezone, day))
        .collect::<Result<Vec<_>, _>>()?;

    if settings.dry_run {
        print_plan(&requests);
        return Ok(SyncReport {
            planned: requests.len(),
            ..SyncReport::default()
        });
    }

    info!("Authenticating with Igloo...");
    lock.authenticate().await?;

    info!(
        "Generating new lock pins for the next {} days (starting tomorrow)",
        settings.num_days
    );
    let mut report = issue_codes(&*lock, &requests).await?;

    let codes = daily_entry_codes(&report);
    info!("Updating Play by Point entry codes for {} day(s)...", codes.len());
    booking.update_entry_codes(&codes).await?;
    report.entry_codes_updated = true;
    info!("Successfully updated Play by Point entry codes");

    Ok(report)
}

/// Keeps reservations that overlap the window.
#[must_use]
pub fn reservations_in_window(
    reservations: Vec<Reservation>,
    window: &LookaheadWindow,
) -> Vec<Reservation> {
    let (inside, outside): (Vec<_>, Vec<_>) = reservations
        .into_iter()
        .partition(|r| window.overlaps(r));

    for r in &outside {
        debug!(reservation = %r.label(), "Skipping reservation outside the window");
    }
    inside
}

/// One code request per reservation, in the order the vendor returned them.
#[must_use]
pub fn plan_reservation_codes(
    lock_id: &str,
    reservations: &[Reservation],
    buffer: &CodeBuffer,
) -> Vec<AccessCodeRequest> {
    reservations
        .iter()
        .map(|r| AccessCodeRequest::for_reservation(lock_id, r, buffer))
        .collect()
}

/// Issues every request, one at a time. A failed request is recorded and the
/// loop moves on.
///
/// # Errors
///
/// Only fails if the progress bar template is invalid.
pub async fn issue_codes(
    lock: &dyn LockClient,
    requests: &[AccessCodeRequest],
) -> Result<SyncReport, SyncError> {
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} codes ({msg})",
    )
    .map_err(|e| SyncError::Internal(e.to_string()))?
    .progress_chars("#>-");

    let pb = ProgressBar::new(requests.len() as u64);
    pb.set_style(style);

    let mut report = SyncReport {
        planned: requests.len(),
        ..SyncReport::default()
    };

    for request in requests {
        pb.set_message(request.access_name.clone());
        match lock.issue_code(request).await {
            Ok(code) => {
                info!(
                    access_name = %request.access_name,
                    valid_from = %code.valid_from,
                    valid_until = %code.valid_until,
                    "Successfully generated pin"
                );
                report.issued.push(code);
            }
            Err(e) => {
                error!(access_name = %request.access_name, error = %e, "Failed to generate pin");
                report.failures.push(IssuanceFailure {
                    label: request.access_name.clone(),
                    error: e,
                });
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    if !report.failures.is_empty() {
        warn!(
            "{} of {} code(s) failed",
            report.failures.len(),
            report.planned
        );
    }
    Ok(report)
}

/// Issued daily pins keyed by day of month.
///
/// Failed days are left out, so the booking vendor keeps what it has for them.
#[must_use]
pub fn daily_entry_codes(report: &SyncReport) -> BTreeMap<u32, Option<String>> {
    report
        .issued
        .iter()
        .map(|code| (code.valid_from.day(), Some(code.pin.clone())))
        .collect()
}

fn print_plan(requests: &[AccessCodeRequest]) {
    println!("--- DRY RUN START: access codes ---");
    for r in requests {
        println!(
            "{} | {} -> {} | lock {}",
            r.access_name, r.valid_from, r.valid_until, r.lock_id
        );
    }
    println!("--- DRY RUN END: access codes ---");
}
