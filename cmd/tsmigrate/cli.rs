use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
    time::{Duration, Instant},
};

use clap::{ArgAction, Parser as ClapParser};
use eyre::{Result, WrapErr};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tsmigrate_engine::{
    MigrationError, MigrationStatus, Migrator,
    auth::RawAuth,
    config::{DEFAULT_MIGRATION_NAME, RawConfig, RawEndpoint, TimeInput},
    validate,
};

use crate::{
    initializers::init_endpoints,
    report::{EXIT_PARTIAL, EXIT_SUCCESS, MigrationReport, emit_report},
};

#[allow(clippy::upper_case_acronyms)]
#[derive(ClapParser)]
#[command(
    name = "tsmigrate",
    version,
    about = "Migrates historical time-series data between remote storages"
)]
pub struct CLI {
    #[command(flatten)]
    pub opts: Options,
}

#[derive(ClapParser, Debug, Clone)]
pub struct Options {
    #[arg(
        long = "name",
        value_name = "NAME",
        help = "Name of the migration, used as the `job` label of progress samples.",
        help_heading = "Migration options",
        env = "TSMIGRATE_NAME"
    )]
    pub name: Option<String>,
    #[arg(
        long = "start",
        value_name = "TIME",
        help = "Start of the migrated interval.",
        long_help = "RFC3339 timestamp, or Unix seconds when --human-readable-time is false.",
        help_heading = "Migration options",
        env = "TSMIGRATE_START"
    )]
    pub start: Option<String>,
    #[arg(
        long = "end",
        value_name = "TIME",
        help = "End of the migrated interval. Defaults to now.",
        help_heading = "Migration options",
        env = "TSMIGRATE_END"
    )]
    pub end: Option<String>,
    #[arg(
        long = "human-readable-time",
        value_name = "BOOL",
        help = "Parse --start/--end as RFC3339 and log RFC3339 timestamps. Defaults to true.",
        help_heading = "Migration options",
        env = "TSMIGRATE_HUMAN_READABLE_TIME"
    )]
    pub human_readable_time: Option<bool>,
    #[arg(
        long = "selector",
        value_name = "SELECTOR",
        help = "Series selector sent with every read.",
        help_heading = "Migration options",
        env = "TSMIGRATE_SELECTOR"
    )]
    pub selector: Option<String>,
    #[arg(
        long = "max-read-duration",
        value_name = "DURATION",
        value_parser = parse_duration,
        help = "Widest time range a single read may cover. Defaults to 2h.",
        help_heading = "Planner options",
        env = "TSMIGRATE_MAX_READ_DURATION"
    )]
    pub max_read_duration: Option<Duration>,
    #[arg(
        long = "max-read-latency",
        value_name = "DURATION",
        value_parser = parse_duration,
        help = "Latency budget of a read. Defaults to the reader timeout.",
        help_heading = "Planner options",
        env = "TSMIGRATE_MAX_READ_LATENCY"
    )]
    pub max_read_latency: Option<Duration>,
    #[arg(
        long = "la-increment",
        value_name = "DURATION",
        value_parser = parse_duration,
        help = "Step by which read ranges grow or shrink. Defaults to 1m.",
        help_heading = "Planner options",
        env = "TSMIGRATE_LA_INCREMENT"
    )]
    pub lookahead_increment: Option<Duration>,
    #[arg(
        long = "max-read-size",
        value_name = "SIZE",
        help = "Largest slab pushed in a single write, e.g. 500MB.",
        help_heading = "Planner options",
        env = "TSMIGRATE_MAX_READ_SIZE"
    )]
    pub max_read_size: Option<String>,
    #[arg(
        long = "concurrent-pull",
        value_name = "COUNT",
        help = "Number of concurrent readers. Defaults to 1.",
        help_heading = "Planner options",
        env = "TSMIGRATE_CONCURRENT_PULL"
    )]
    pub concurrent_pull: Option<usize>,
    #[arg(
        long = "concurrent-push",
        value_name = "COUNT",
        help = "Number of concurrent writers. Defaults to 1.",
        help_heading = "Planner options",
        env = "TSMIGRATE_CONCURRENT_PUSH"
    )]
    pub concurrent_push: Option<usize>,

    #[arg(
        long = "reader-url",
        value_name = "URL",
        help = "Remote read endpoint of the source storage.",
        help_heading = "Reader options",
        env = "TSMIGRATE_READER_URL"
    )]
    pub reader_url: Option<String>,
    #[arg(
        long = "reader-timeout",
        value_name = "DURATION",
        value_parser = parse_duration,
        help = "Timeout of a single read. Defaults to 5m.",
        help_heading = "Reader options",
        env = "TSMIGRATE_READER_TIMEOUT"
    )]
    pub reader_timeout: Option<Duration>,
    #[arg(
        long = "reader-retry-delay",
        value_name = "DURATION",
        value_parser = parse_duration,
        help = "Delay between read retries. Defaults to 1s.",
        help_heading = "Reader options",
        env = "TSMIGRATE_READER_RETRY_DELAY"
    )]
    pub reader_retry_delay: Option<Duration>,
    #[arg(
        long = "reader-max-retries",
        value_name = "COUNT",
        help = "Retries before a read fails. 0 retries forever.",
        help_heading = "Reader options",
        env = "TSMIGRATE_READER_MAX_RETRIES"
    )]
    pub reader_max_retries: Option<u32>,
    #[arg(
        long = "reader-on-timeout",
        value_name = "ACTION",
        help = "retry, skip or abort. Defaults to retry.",
        help_heading = "Reader options",
        env = "TSMIGRATE_READER_ON_TIMEOUT"
    )]
    pub reader_on_timeout: Option<String>,
    #[arg(
        long = "reader-on-error",
        value_name = "ACTION",
        help = "retry, skip or abort. Defaults to abort.",
        help_heading = "Reader options",
        env = "TSMIGRATE_READER_ON_ERROR"
    )]
    pub reader_on_error: Option<String>,
    #[arg(
        long = "reader-auth-username",
        value_name = "USERNAME",
        help_heading = "Reader auth options",
        env = "TSMIGRATE_READER_AUTH_USERNAME"
    )]
    pub reader_auth_username: Option<String>,
    #[arg(
        long = "reader-auth-password",
        value_name = "PASSWORD",
        help_heading = "Reader auth options",
        env = "TSMIGRATE_READER_AUTH_PASSWORD"
    )]
    pub reader_auth_password: Option<String>,
    #[arg(
        long = "reader-auth-bearer-token",
        value_name = "TOKEN",
        help_heading = "Reader auth options",
        env = "TSMIGRATE_READER_AUTH_BEARER_TOKEN"
    )]
    pub reader_auth_bearer_token: Option<String>,
    #[arg(
        long = "reader-auth-bearer-token-file",
        value_name = "PATH",
        help = "File holding the bearer token, read on every request.",
        help_heading = "Reader auth options",
        env = "TSMIGRATE_READER_AUTH_BEARER_TOKEN_FILE"
    )]
    pub reader_auth_bearer_token_file: Option<PathBuf>,
    #[arg(
        long = "reader-auth-oauth2-client-id",
        value_name = "CLIENT_ID",
        help_heading = "Reader auth options",
        env = "TSMIGRATE_READER_AUTH_OAUTH2_CLIENT_ID"
    )]
    pub reader_auth_oauth2_client_id: Option<String>,
    #[arg(
        long = "reader-auth-oauth2-client-secret",
        value_name = "SECRET",
        help_heading = "Reader auth options",
        env = "TSMIGRATE_READER_AUTH_OAUTH2_CLIENT_SECRET"
    )]
    pub reader_auth_oauth2_client_secret: Option<String>,
    #[arg(
        long = "reader-auth-oauth2-token-url",
        value_name = "URL",
        help_heading = "Reader auth options",
        env = "TSMIGRATE_READER_AUTH_OAUTH2_TOKEN_URL"
    )]
    pub reader_auth_oauth2_token_url: Option<String>,
    #[arg(
        long = "reader-auth-oauth2-scopes",
        value_name = "SCOPES",
        value_delimiter = ',',
        help = "Comma separated scopes.",
        help_heading = "Reader auth options",
        env = "TSMIGRATE_READER_AUTH_OAUTH2_SCOPES"
    )]
    pub reader_auth_oauth2_scopes: Vec<String>,

    #[arg(
        long = "writer-url",
        value_name = "URL",
        help = "Remote write endpoint of the destination storage.",
        help_heading = "Writer options",
        env = "TSMIGRATE_WRITER_URL"
    )]
    pub writer_url: Option<String>,
    #[arg(
        long = "writer-timeout",
        value_name = "DURATION",
        value_parser = parse_duration,
        help = "Timeout of a single write. Defaults to 5m.",
        help_heading = "Writer options",
        env = "TSMIGRATE_WRITER_TIMEOUT"
    )]
    pub writer_timeout: Option<Duration>,
    #[arg(
        long = "writer-retry-delay",
        value_name = "DURATION",
        value_parser = parse_duration,
        help = "Delay between write retries. Defaults to 1s.",
        help_heading = "Writer options",
        env = "TSMIGRATE_WRITER_RETRY_DELAY"
    )]
    pub writer_retry_delay: Option<Duration>,
    #[arg(
        long = "writer-max-retries",
        value_name = "COUNT",
        help = "Retries before a write fails. 0 retries forever.",
        help_heading = "Writer options",
        env = "TSMIGRATE_WRITER_MAX_RETRIES"
    )]
    pub writer_max_retries: Option<u32>,
    #[arg(
        long = "writer-on-timeout",
        value_name = "ACTION",
        help = "retry, skip or abort. Defaults to retry.",
        help_heading = "Writer options",
        env = "TSMIGRATE_WRITER_ON_TIMEOUT"
    )]
    pub writer_on_timeout: Option<String>,
    #[arg(
        long = "writer-on-error",
        value_name = "ACTION",
        help = "retry, skip or abort. Defaults to abort.",
        help_heading = "Writer options",
        env = "TSMIGRATE_WRITER_ON_ERROR"
    )]
    pub writer_on_error: Option<String>,
    #[arg(
        long = "writer-auth-username",
        value_name = "USERNAME",
        help_heading = "Writer auth options",
        env = "TSMIGRATE_WRITER_AUTH_USERNAME"
    )]
    pub writer_auth_username: Option<String>,
    #[arg(
        long = "writer-auth-password",
        value_name = "PASSWORD",
        help_heading = "Writer auth options",
        env = "TSMIGRATE_WRITER_AUTH_PASSWORD"
    )]
    pub writer_auth_password: Option<String>,
    #[arg(
        long = "writer-auth-bearer-token",
        value_name = "TOKEN",
        help_heading = "Writer auth options",
        env = "TSMIGRATE_WRITER_AUTH_BEARER_TOKEN"
    )]
    pub writer_auth_bearer_token: Option<String>,
    #[arg(
        long = "writer-auth-bearer-token-file",
        value_name = "PATH",
        help = "File holding the bearer token, read on every request.",
        help_heading = "Writer auth options",
        env = "TSMIGRATE_WRITER_AUTH_BEARER_TOKEN_FILE"
    )]
    pub writer_auth_bearer_token_file: Option<PathBuf>,
    #[arg(
        long = "writer-auth-oauth2-client-id",
        value_name = "CLIENT_ID",
        help_heading = "Writer auth options",
        env = "TSMIGRATE_WRITER_AUTH_OAUTH2_CLIENT_ID"
    )]
    pub writer_auth_oauth2_client_id: Option<String>,
    #[arg(
        long = "writer-auth-oauth2-client-secret",
        value_name = "SECRET",
        help_heading = "Writer auth options",
        env = "TSMIGRATE_WRITER_AUTH_OAUTH2_CLIENT_SECRET"
    )]
    pub writer_auth_oauth2_client_secret: Option<String>,
    #[arg(
        long = "writer-auth-oauth2-token-url",
        value_name = "URL",
        help_heading = "Writer auth options",
        env = "TSMIGRATE_WRITER_AUTH_OAUTH2_TOKEN_URL"
    )]
    pub writer_auth_oauth2_token_url: Option<String>,
    #[arg(
        long = "writer-auth-oauth2-scopes",
        value_name = "SCOPES",
        value_delimiter = ',',
        help = "Comma separated scopes.",
        help_heading = "Writer auth options",
        env = "TSMIGRATE_WRITER_AUTH_OAUTH2_SCOPES"
    )]
    pub writer_auth_oauth2_scopes: Vec<String>,

    #[arg(
        long = "progress-enabled",
        value_name = "BOOL",
        help = "Checkpoint progress to the destination so reruns resume. Defaults to true.",
        help_heading = "Progress options",
        env = "TSMIGRATE_PROGRESS_ENABLED"
    )]
    pub progress_enabled: Option<bool>,
    #[arg(
        long = "progress-metric-name",
        value_name = "METRIC",
        help = "Metric the checkpoints are written as.",
        help_heading = "Progress options",
        env = "TSMIGRATE_PROGRESS_METRIC_NAME"
    )]
    pub progress_metric_name: Option<String>,
    #[arg(
        long = "progress-metric-url",
        value_name = "URL",
        help = "Prometheus API of the destination, queried for the last checkpoint.",
        long_help = "Without it every run starts at --start.",
        help_heading = "Progress options",
        env = "TSMIGRATE_PROGRESS_METRIC_URL"
    )]
    pub progress_metric_url: Option<String>,

    #[arg(
        long = "dry-run",
        action = ArgAction::SetTrue,
        help = "Read and plan the whole interval without writing to the destination.",
        help_heading = "Output options",
        env = "TSMIGRATE_DRY_RUN"
    )]
    pub dry_run: bool,
    #[arg(
        long = "json",
        action = ArgAction::SetTrue,
        help = "Emit machine-readable JSON reports on stdout.",
        help_heading = "Output options",
        env = "TSMIGRATE_JSON"
    )]
    pub json: bool,
    #[arg(
        long = "report-file",
        value_name = "PATH",
        help = "Append emitted reports to this file (JSON lines in --json mode).",
        help_heading = "Output options",
        env = "TSMIGRATE_REPORT_FILE"
    )]
    pub report_file: Option<PathBuf>,
    #[arg(
        long = "log.level",
        default_value_t = Level::INFO,
        value_name = "LOG_LEVEL",
        help = "The verbosity level used for logs.",
        long_help = "Possible values: info, debug, trace, warn, error",
        help_heading = "Output options",
        env = "TSMIGRATE_LOG_LEVEL"
    )]
    pub log_level: Level,
    #[arg(
        long = "log.color",
        default_value_t = LogColor::Auto,
        help = "Output logs with ANSI color codes.",
        long_help = "Possible values: auto, always, never",
        help_heading = "Output options",
        env = "TSMIGRATE_LOG_COLOR"
    )]
    pub log_color: LogColor,
}

impl Options {
    pub fn report_file(&self) -> Option<&Path> {
        self.report_file.as_deref()
    }

    pub fn migration_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_MIGRATION_NAME)
    }

    /// Maps the flags onto the validator input. Unset flags stay `None` so
    /// the validator applies its own defaults.
    pub fn raw_config(&self) -> RawConfig {
        RawConfig {
            name: self.name.clone(),
            start: self.start.as_deref().map(TimeInput::from),
            end: self.end.as_deref().map(TimeInput::from),
            human_readable_time: self.human_readable_time,
            selector: self.selector.clone(),
            reader: RawEndpoint {
                url: self.reader_url.clone(),
                timeout: self.reader_timeout,
                retry_delay: self.reader_retry_delay,
                max_retries: self.reader_max_retries,
                on_timeout: self.reader_on_timeout.clone(),
                on_error: self.reader_on_error.clone(),
                auth: RawAuth {
                    username: self.reader_auth_username.clone(),
                    password: self.reader_auth_password.clone(),
                    bearer_token: self.reader_auth_bearer_token.clone(),
                    bearer_token_file: self.reader_auth_bearer_token_file.clone(),
                    oauth2_client_id: self.reader_auth_oauth2_client_id.clone(),
                    oauth2_client_secret: self.reader_auth_oauth2_client_secret.clone(),
                    oauth2_token_url: self.reader_auth_oauth2_token_url.clone(),
                    oauth2_scopes: self.reader_auth_oauth2_scopes.clone(),
                },
            },
            writer: RawEndpoint {
                url: self.writer_url.clone(),
                timeout: self.writer_timeout,
                retry_delay: self.writer_retry_delay,
                max_retries: self.writer_max_retries,
                on_timeout: self.writer_on_timeout.clone(),
                on_error: self.writer_on_error.clone(),
                auth: RawAuth {
                    username: self.writer_auth_username.clone(),
                    password: self.writer_auth_password.clone(),
                    bearer_token: self.writer_auth_bearer_token.clone(),
                    bearer_token_file: self.writer_auth_bearer_token_file.clone(),
                    oauth2_client_id: self.writer_auth_oauth2_client_id.clone(),
                    oauth2_client_secret: self.writer_auth_oauth2_client_secret.clone(),
                    oauth2_token_url: self.writer_auth_oauth2_token_url.clone(),
                    oauth2_scopes: self.writer_auth_oauth2_scopes.clone(),
                },
            },
            max_read_duration: self.max_read_duration,
            max_read_latency: self.max_read_latency,
            lookahead_increment: self.lookahead_increment,
            max_read_size: self.max_read_size.clone(),
            concurrent_pull: self.concurrent_pull,
            concurrent_push: self.concurrent_push,
            progress_enabled: self.progress_enabled,
            progress_metric_name: self.progress_metric_name.clone(),
            progress_metric_url: self.progress_metric_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogColor {
    #[default]
    Auto,
    Always,
    Never,
}

impl Display for LogColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogColor::Auto => write!(f, "auto"),
            LogColor::Always => write!(f, "always"),
            LogColor::Never => write!(f, "never"),
        }
    }
}

impl FromStr for LogColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(LogColor::Auto),
            "always" => Ok(LogColor::Always),
            "never" => Ok(LogColor::Never),
            _ => Err(format!(
                "Invalid log color '{s}'. Expected: auto, always, or never"
            )),
        }
    }
}

/// Parses durations such as `500ms`, `30s`, `1h30m` or `2w`.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw == "0" {
        return Ok(Duration::ZERO);
    }
    if raw.is_empty() {
        return Err("empty duration".to_owned());
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration {raw:?}"))?;
        if digits == 0 {
            return Err(format!("invalid duration {raw:?}"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|err| format!("invalid duration {raw:?}: {err}"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit_ms: u64 = match &rest[..unit_len] {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            "w" => 604_800_000,
            unit => {
                return Err(format!(
                    "unknown unit {unit:?} in duration {raw:?}: expected one of ms, s, m, h, d, w"
                ));
            }
        };
        rest = &rest[unit_len..];

        let millis = value
            .checked_mul(unit_ms)
            .ok_or_else(|| format!("duration {raw:?} is too large"))?;
        total = total
            .checked_add(Duration::from_millis(millis))
            .ok_or_else(|| format!("duration {raw:?} is too large"))?;
    }
    Ok(total)
}

/// Validates the options, runs the migration and reports the outcome.
/// Returns the process exit code.
pub async fn migrate(opts: &Options, cancel: CancellationToken) -> Result<i32> {
    let started_at = Instant::now();
    let config = validate(opts.raw_config()).map_err(MigrationError::from)?;
    let time_format = config.plan.time_format();

    if opts.dry_run {
        info!("dry run, nothing will be written to the destination");
    }
    let endpoints = init_endpoints(&config, opts.dry_run)
        .wrap_err("Cannot initialize remote endpoints")?;

    let mut migrator = Migrator::new(config, endpoints.source, endpoints.destination)
        .with_cancellation(cancel);
    if let Some(reader) = endpoints.checkpoint_reader {
        migrator = migrator.with_checkpoint_reader(reader);
    }

    let summary = migrator.run().await?;
    let status = summary.status();
    let report = MigrationReport::new(
        &migrator.config().plan.name,
        opts.dry_run,
        &summary,
        started_at,
    );
    emit_report(&report, time_format, opts.json, opts.report_file())?;

    if status == MigrationStatus::Partial
        && let Err(error) = summary.into_result()
    {
        warn!(%error, "migration left gaps in the destination");
        return Ok(EXIT_PARTIAL);
    }
    Ok(EXIT_SUCCESS)
}
