mod cli;
mod business;

use clap::Parser;
use cli::Cli;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    setup_logging(args.verbose);

    if let Err(e) = business::handle_command(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // -v sets the level of our own targets, dependencies stay at warn unless RUST_LOG says otherwise
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy()
        .add_directive(
            format!("lock_automation={level}")
                .parse()
                .unwrap_or_else(|_| LevelFilter::INFO.into()),
        )
        .add_directive(
            format!("generate_codes={level}")
                .parse()
                .unwrap_or_else(|_| LevelFilter::INFO.into()),
        );

    tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_env_filter(filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_map_to_run_args() {
        let cli = Cli::try_parse_from([
            "generate-codes",
            "--igloo-client-id",
            "id",
            "--igloo-lock-id",
            "lock-1",
            "--timezone",
            "America/Denver",
            "--granularity",
            "day",
            "--num-days",
            "7",
            "--dry-run",
            "-vv",
        ])
        .unwrap();

        let args = cli.run_args();
        assert_eq!(args.igloo_client_id.as_deref(), Some("id"));
        assert_eq!(args.igloo_lock_id.as_deref(), Some("lock-1"));
        assert_eq!(args.granularity, Some(lock_automation::core::Granularity::Day));
        assert_eq!(args.num_days, Some(7));
        assert!(args.dry_run);
        assert_eq!(cli.verbose, 2);
    }
}
