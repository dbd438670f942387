use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use uuid::Uuid;

use crate::client::{HttpSettings, RetryPolicy};
use crate::import::ImportSettings;
use crate::mapping::transform::TransformLimits;

#[derive(Parser, Debug, Clone)]
#[command(name = "vacancy-importer", about = "Paginated vacancy import and sync engine")]
pub struct Config {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Run database migrations on startup
    #[arg(long, env = "RUN_MIGRATIONS", default_value = "true")]
    pub run_migrations: bool,

    /// JSON file mapping provider ids to their configuration
    #[arg(long, env = "PROVIDERS_CONFIG")]
    pub providers_config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Tuning knobs for outbound HTTP, reconciliation and the transform sandbox.
#[derive(clap::Args, Debug, Clone)]
pub struct EngineArgs {
    /// Timeout for a single outbound HTTP request
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "30")]
    pub http_timeout_secs: u64,

    /// Retries for transient HTTP failures (timeouts, 5xx, 429)
    #[arg(long, env = "MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    #[arg(long, env = "RETRY_INITIAL_DELAY_MS", default_value = "500")]
    pub retry_initial_delay_ms: u64,

    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value = "30000")]
    pub retry_max_delay_ms: u64,

    /// Delay between page requests when a source declares no rate limit
    #[arg(long, env = "DEFAULT_PAGE_DELAY_MS", default_value = "0")]
    pub default_page_delay_ms: u64,

    /// Hard cap on pages fetched per run unless the task sets its own
    #[arg(long, env = "MAX_PAGES", default_value = "100")]
    pub max_pages: u32,

    /// Response cache lifetime; 0 disables the cache
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "0")]
    pub cache_ttl_secs: u64,

    #[arg(long, env = "REPOSITORY_TIMEOUT_SECS", default_value = "10")]
    pub repository_timeout_secs: u64,

    /// Test the connection before fetching
    #[arg(long, env = "PREFLIGHT_CHECK", default_value = "true")]
    pub preflight_check: bool,

    #[arg(long, env = "TRANSFORM_MAX_OPERATIONS", default_value = "100000")]
    pub transform_max_operations: u64,

    #[arg(long, env = "TRANSFORM_TIMEOUT_MS", default_value = "250")]
    pub transform_timeout_ms: u64,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the control API and the scheduler (default when no subcommand given)
    Serve {
        /// Listen address
        #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
        listen_addr: String,

        /// Scheduler tick in seconds
        #[arg(long, env = "SCHEDULER_TICK_SECS", default_value = "60")]
        scheduler_tick: u64,
    },
    /// Run one import synchronously and print the summary
    Run {
        /// Task id
        #[arg(long)]
        task: Uuid,
    },
    /// Run the scheduler loop without the HTTP listener
    Schedule {
        /// Scheduler tick in seconds
        #[arg(long, env = "SCHEDULER_TICK_SECS", default_value = "60")]
        scheduler_tick: u64,
    },
}

impl Config {
    /// Resolve the command, defaulting to Serve if none specified.
    pub fn resolved_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve {
            listen_addr: std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            scheduler_tick: std::env::var("SCHEDULER_TICK_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        })
    }
}

impl EngineArgs {
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            timeout: Duration::from_secs(self.http_timeout_secs),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
            },
            default_page_delay: Duration::from_millis(self.default_page_delay_ms),
            user_agent: concat!("vacancy-importer/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs))
    }

    pub fn import_settings(&self) -> ImportSettings {
        ImportSettings {
            max_pages: self.max_pages,
            repository_timeout: Duration::from_secs(self.repository_timeout_secs),
            preflight_check: self.preflight_check,
            transform: TransformLimits {
                max_operations: self.transform_max_operations,
                timeout: Duration::from_millis(self.transform_timeout_ms),
                ..TransformLimits::default()
            },
        }
    }
}
