use clap::Parser;
use std::path::PathBuf;
use tokio::time::Duration;

/// Command line and environment settings
///
/// Every option with an `env` name can also be set in a `.env` file.
#[derive(Parser, Debug)]
#[command(name = "udco2s-etl")]
#[command(about = "Stream UD-CO2S sensor readings to storage, stdout and Datadog", long_about = None)]
pub struct Args {
    /// Serial device of the sensor
    #[arg(default_value = "/dev/ttyACM0")]
    pub device: String,

    /// SQLite database file for records and rollups
    #[arg(short, long, env = "UDCO2S_DATABASE")]
    pub database: Option<PathBuf>,

    /// PostgreSQL connection string (sslrootcert=<path> enables TLS)
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Seconds between publications
    #[arg(short, long, env = "UDCO2S_INTERVAL", default_value_t = 60)]
    pub interval: u64,

    /// Serial baud rate
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,

    /// Seconds to wait for a line before treating the link as quiet
    #[arg(long, default_value_t = 10)]
    pub read_timeout: u64,

    /// Milliseconds to wait after a command before reading its answer
    #[arg(long, default_value_t = 100)]
    pub settle_ms: u64,

    /// Datadog API key; metrics are only submitted when set
    #[arg(long, env = "DD_API_KEY", hide_env_values = true)]
    pub dd_api_key: Option<String>,

    /// Datadog site
    #[arg(long, env = "DD_SITE", default_value = "datadoghq.com")]
    pub dd_site: String,

    /// Prefix for submitted metric names
    #[arg(long, default_value = "sensor.ud_co2s")]
    pub metric_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Disabled,
    Sqlite(PathBuf),
    Postgres(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    pub api_key: String,
    pub site: String,
    pub prefix: String,
}

impl MetricsConfig {
    pub fn endpoint(&self) -> String {
        format!("https://api.{}/api/v2/series", self.site)
    }
}

#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub device: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub settle_delay: Duration,
    pub publish_interval: Duration,
    pub storage: StorageConfig,
    pub metrics: Option<MetricsConfig>,
}

impl SensorConfig {
    /// Load `.env`, then parse the process arguments
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv::dotenv().ok();
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<Self, Box<dyn std::error::Error>> {
        if args.interval == 0 {
            return Err("Publish interval must be at least one second".into());
        }
        if args.read_timeout == 0 {
            return Err("Read timeout must be at least one second".into());
        }

        let storage = match (args.database, args.database_url) {
            (Some(path), None) => StorageConfig::Sqlite(path),
            (None, Some(url)) => StorageConfig::Postgres(url),
            (None, None) => StorageConfig::Disabled,
            (Some(_), Some(_)) => {
                return Err("Use either --database or --database-url, not both".into())
            }
        };

        let metrics = args
            .dd_api_key
            .filter(|key| !key.trim().is_empty())
            .map(|api_key| MetricsConfig {
                api_key,
                site: args.dd_site,
                prefix: args.metric_prefix,
            });

        Ok(SensorConfig {
            device: args.device,
            baud_rate: args.baud,
            read_timeout: Duration::from_secs(args.read_timeout),
            settle_delay: Duration::from_millis(args.settle_ms),
            publish_interval: Duration::from_secs(args.interval),
            storage,
            metrics,
        })
    }
}
