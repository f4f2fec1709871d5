use crate::cli::Cli;
use chrono::Utc;
use lock_automation::config::{get_config_file_path, load_config};
use lock_automation::core::SyncError;
use lock_automation::{ops, vendors};
use tracing::{debug, error, info};

pub async fn handle_command(cli: Cli) -> Result<(), SyncError> {
    // load config, uses internal defaults if not file set
    let config = load_config(cli.config.clone())?;
    debug!("Using config {}", get_config_file_path(cli.config.clone()));

    // everything is validated before the first network call
    let settings = cli.run_args().validate(&config)?;
    let today = Utc::now().with_timezone(&settings.timezone).date_naive();
    info!(
        granularity = ?settings.granularity,
        num_days = settings.num_days,
        timezone = %settings.timezone,
        dry_run = settings.dry_run,
        "Starting lock code sync for {today}"
    );

    let mut booking = vendors::create_booking_client(&settings, &config)?;
    let mut lock = vendors::create_lock_client(&settings, &config)?;

    let report = ops::run_sync(booking.as_mut(), lock.as_mut(), &settings, today).await?;

    for failure in &report.failures {
        error!("{}: {}", failure.label, failure.error);
    }
    info!(
        planned = report.planned,
        issued = report.issued.len(),
        failed = report.failures.len(),
        entry_codes_updated = report.entry_codes_updated,
        "Sync finished"
    );

    report.into_result().map(|_| ())
}
