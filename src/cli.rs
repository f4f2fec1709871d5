use clap::Parser;
use lock_automation::core::{Granularity, RunArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "generate-codes",
    version,
    about = "Sync Igloo lock access codes with Play by Point court reservations"
)]
pub struct Cli {
    /// Igloo API client ID
    #[arg(long, env = "IGLOO_CLIENT_ID")]
    pub igloo_client_id: Option<String>,

    /// Igloo API client secret
    #[arg(long, env = "IGLOO_CLIENT_SECRET", hide_env_values = true)]
    pub igloo_client_secret: Option<String>,

    /// Igloo lock ID
    #[arg(long, env = "IGLOO_LOCK_ID")]
    pub igloo_lock_id: Option<String>,

    /// Play by Point username (email)
    #[arg(long, env = "PLAY_BY_POINT_USERNAME")]
    pub play_by_point_username: Option<String>,

    /// Play by Point password
    #[arg(long, env = "PLAY_BY_POINT_PASSWORD", hide_env_values = true)]
    pub play_by_point_password: Option<String>,

    /// Play by Point owner ID
    #[arg(long, env = "PLAY_BY_POINT_OWNER")]
    pub play_by_point_owner: Option<String>,

    /// Timezone string, e.g. 'America/Denver'
    #[arg(long, env = "LOCK_SYNC_TIMEZONE")]
    pub timezone: Option<String>,

    /// One code per reservation, or one all-day pin per court-day
    #[arg(long, value_enum)]
    pub granularity: Option<Granularity>,

    /// Number of days to generate codes for (default from config)
    #[arg(long)]
    pub num_days: Option<u32>,

    /// TOML config file, the built-in defaults are used otherwise
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the planned codes without issuing them
    #[arg(long)]
    pub dry_run: bool,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn run_args(&self) -> RunArgs {
        RunArgs {
            igloo_client_id: self.igloo_client_id.clone(),
            igloo_client_secret: self.igloo_client_secret.clone(),
            igloo_lock_id: self.igloo_lock_id.clone(),
            play_by_point_username: self.play_by_point_username.clone(),
            play_by_point_password: self.play_by_point_password.clone(),
            play_by_point_owner: self.play_by_point_owner.clone(),
            timezone: self.timezone.clone(),
            granularity: self.granularity,
            num_days: self.num_days,
            dry_run: self.dry_run,
        }
    }
}
