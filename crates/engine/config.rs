//! Migration parameters and their validation.
//!
//! [`RawConfig`] mirrors the configuration surface with every field
//! optional; [`validate`] resolves defaults field by field and produces the
//! immutable [`ValidatedConfig`] the engine runs on. Validation stops at the
//! first problem found.

use crate::{
    auth::{Auth, AuthError, RawAuth},
    bytesize::{ByteSizeError, parse_byte_size},
    retry::{Action, RetryPolicy, Role},
    types::TimeFormat,
};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MIGRATION_NAME: &str = "tsmigrate";
pub const DEFAULT_PROGRESS_METRIC_NAME: &str = "tsmigrate_progress";
pub const DEFAULT_SELECTOR: &str = r#"{__name__=~".+"}"#;
pub const DEFAULT_MAX_READ_SIZE: &str = "500MB";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_READ_DURATION: Duration = Duration::from_secs(2 * 60 * 60);
pub const DEFAULT_LA_INCREMENT: Duration = Duration::from_secs(60);
pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_ON_TIMEOUT: Action = Action::Retry;
pub const DEFAULT_ON_ERROR: Action = Action::Abort;

const METRIC_NAME_PATTERN: &str = "^[a-zA-Z_:][a-zA-Z0-9_:]*$";

lazy_static! {
    static ref METRIC_NAME_REGEX: Regex =
        Regex::new(METRIC_NAME_PATTERN).expect("metric name pattern is a valid regex");
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("mint should be provided for the migration to begin")]
    MissingStart,
    #[error("parsing {field} time {value:?}: {reason}")]
    InvalidTime {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error(
        "remote read storage url and remote write storage url must be specified. Without these, data migration cannot begin"
    )]
    MissingUrls,
    #[error(
        "remote read storage url needs to be specified. Without read storage url, data migration cannot begin"
    )]
    MissingReaderUrl,
    #[error(
        "remote write storage url needs to be specified. Without write storage url, data migration cannot begin"
    )]
    MissingWriterUrl,
    #[error(
        "invalid input: minimum timestamp value (start) cannot be greater than the maximum timestamp value (end): start={mint}ms end={maxt}ms"
    )]
    StartAfterEnd { mint: i64, maxt: i64 },
    #[error("invalid metric-name regex match: prom metric must match {METRIC_NAME_PATTERN}: recieved: {0}")]
    InvalidMetricName(String),
    #[error("parsing byte-size: {0}")]
    ByteSize(#[from] ByteSizeError),
    #[error("max-read-size must be greater than zero")]
    ZeroSlabSize,
    #[error("{0} must be at least 1")]
    ZeroConcurrency(&'static str),
    #[error("la-increment must be greater than zero")]
    ZeroIncrement,
    #[error("la-increment ({increment_ms}ms) cannot exceed max-read-duration ({max_read_ms}ms)")]
    IncrementAboveMaxRead { increment_ms: u128, max_read_ms: u128 },
    #[error("{role} {field}: {reason}")]
    InvalidAction {
        role: Role,
        field: &'static str,
        reason: String,
    },
    #[error("{role} auth validation: {source}")]
    Auth {
        role: Role,
        #[source]
        source: AuthError,
    },
}

/// A start or end instant as provided by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeInput {
    /// RFC3339 when human-readable time is on, Unix seconds otherwise.
    Text(String),
    Instant(DateTime<Utc>),
}

impl From<&str> for TimeInput {
    fn from(raw: &str) -> Self {
        Self::Text(raw.to_owned())
    }
}

impl From<DateTime<Utc>> for TimeInput {
    fn from(instant: DateTime<Utc>) -> Self {
        Self::Instant(instant)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEndpoint {
    pub url: Option<String>,
    pub timeout: Option<Duration>,
    pub retry_delay: Option<Duration>,
    pub max_retries: Option<u32>,
    pub on_timeout: Option<String>,
    pub on_error: Option<String>,
    pub auth: RawAuth,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConfig {
    pub name: Option<String>,
    pub start: Option<TimeInput>,
    pub end: Option<TimeInput>,
    pub human_readable_time: Option<bool>,
    pub selector: Option<String>,
    pub reader: RawEndpoint,
    pub writer: RawEndpoint,
    pub max_read_duration: Option<Duration>,
    pub max_read_latency: Option<Duration>,
    pub lookahead_increment: Option<Duration>,
    pub max_read_size: Option<String>,
    pub concurrent_pull: Option<usize>,
    pub concurrent_push: Option<usize>,
    pub progress_enabled: Option<bool>,
    pub progress_metric_name: Option<String>,
    pub progress_metric_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSettings {
    pub enabled: bool,
    pub metric_name: String,
    pub metric_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub mint: i64,
    pub maxt: i64,
    pub lookahead_increment: Duration,
    pub max_read_duration: Duration,
    pub max_read_latency: Duration,
    pub max_slab_bytes: u64,
    pub concurrent_pull: usize,
    pub concurrent_push: usize,
    pub progress: ProgressSettings,
    pub human_readable_time: bool,
    pub selector: String,
}

impl MigrationPlan {
    pub fn time_format(&self) -> TimeFormat {
        TimeFormat::from_human_readable(self.human_readable_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRuntime {
    pub role: Role,
    pub url: String,
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub max_retries: u32,
    pub on_timeout: Action,
    pub on_error: Action,
    pub auth: Auth,
}

impl EndpointRuntime {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            role: self.role,
            timeout: self.timeout,
            delay: self.retry_delay,
            max_retries: self.max_retries,
            on_timeout: self.on_timeout,
            on_error: self.on_error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    pub plan: MigrationPlan,
    pub reader: EndpointRuntime,
    pub writer: EndpointRuntime,
}

pub fn validate(raw: RawConfig) -> Result<ValidatedConfig, ConfigError> {
    validate_at(raw, Utc::now())
}

/// Same as [`validate`] with an explicit "now" for a missing end.
pub fn validate_at(raw: RawConfig, now: DateTime<Utc>) -> Result<ValidatedConfig, ConfigError> {
    let human_readable_time = raw.human_readable_time.unwrap_or(true);

    let start = match raw.start {
        Some(input) => resolve_time("start", input, human_readable_time)?,
        None => return Err(ConfigError::MissingStart),
    };
    let end = match raw.end {
        Some(input) => resolve_time("end", input, human_readable_time)?,
        None => now,
    };
    let mint = start.timestamp() * 1000;
    let maxt = end.timestamp() * 1000;

    let reader_url = non_blank(raw.reader.url.as_deref());
    let writer_url = non_blank(raw.writer.url.as_deref());
    let (reader_url, writer_url) = match (reader_url, writer_url) {
        (None, None) => return Err(ConfigError::MissingUrls),
        (None, Some(_)) => return Err(ConfigError::MissingReaderUrl),
        (Some(_), None) => return Err(ConfigError::MissingWriterUrl),
        (Some(reader), Some(writer)) => (reader, writer),
    };

    if mint > maxt {
        return Err(ConfigError::StartAfterEnd { mint, maxt });
    }

    let metric_name = raw
        .progress_metric_name
        .unwrap_or_else(|| DEFAULT_PROGRESS_METRIC_NAME.to_owned());
    if !METRIC_NAME_REGEX.is_match(&metric_name) {
        return Err(ConfigError::InvalidMetricName(metric_name));
    }

    let max_slab_bytes = parse_byte_size(
        raw.max_read_size
            .as_deref()
            .unwrap_or(DEFAULT_MAX_READ_SIZE),
    )?;
    if max_slab_bytes == 0 {
        return Err(ConfigError::ZeroSlabSize);
    }

    let concurrent_pull = raw.concurrent_pull.unwrap_or(DEFAULT_CONCURRENCY);
    if concurrent_pull == 0 {
        return Err(ConfigError::ZeroConcurrency("concurrent-pull"));
    }
    let concurrent_push = raw.concurrent_push.unwrap_or(DEFAULT_CONCURRENCY);
    if concurrent_push == 0 {
        return Err(ConfigError::ZeroConcurrency("concurrent-push"));
    }

    let lookahead_increment = raw.lookahead_increment.unwrap_or(DEFAULT_LA_INCREMENT);
    let max_read_duration = raw.max_read_duration.unwrap_or(DEFAULT_MAX_READ_DURATION);
    if lookahead_increment.as_millis() == 0 {
        return Err(ConfigError::ZeroIncrement);
    }
    if lookahead_increment > max_read_duration {
        return Err(ConfigError::IncrementAboveMaxRead {
            increment_ms: lookahead_increment.as_millis(),
            max_read_ms: max_read_duration.as_millis(),
        });
    }

    let reader_actions = endpoint_actions(Role::Reader, &raw.reader)?;
    let writer_actions = endpoint_actions(Role::Writer, &raw.writer)?;
    let reader = endpoint_runtime(Role::Reader, reader_url, reader_actions, raw.reader)?;
    let writer = endpoint_runtime(Role::Writer, writer_url, writer_actions, raw.writer)?;

    let progress = ProgressSettings {
        enabled: raw.progress_enabled.unwrap_or(true),
        metric_name,
        metric_url: raw
            .progress_metric_url
            .as_deref()
            .and_then(|url| non_blank(Some(url))),
    };

    let plan = MigrationPlan {
        name: raw
            .name
            .and_then(|name| non_blank(Some(&name)))
            .unwrap_or_else(|| DEFAULT_MIGRATION_NAME.to_owned()),
        start,
        end,
        mint,
        maxt,
        lookahead_increment,
        max_read_duration,
        max_read_latency: raw.max_read_latency.unwrap_or(reader.timeout),
        max_slab_bytes,
        concurrent_pull,
        concurrent_push,
        progress,
        human_readable_time,
        selector: raw
            .selector
            .and_then(|selector| non_blank(Some(&selector)))
            .unwrap_or_else(|| DEFAULT_SELECTOR.to_owned()),
    };

    Ok(ValidatedConfig {
        plan,
        reader,
        writer,
    })
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn resolve_time(
    field: &'static str,
    input: TimeInput,
    human_readable: bool,
) -> Result<DateTime<Utc>, ConfigError> {
    let raw = match input {
        TimeInput::Instant(instant) => return Ok(instant),
        TimeInput::Text(raw) => raw,
    };
    let text = raw.trim().trim_matches(|c| c == '\'' || c == '"');
    let invalid = |reason: String| ConfigError::InvalidTime {
        field,
        value: raw.clone(),
        reason,
    };

    if human_readable {
        DateTime::parse_from_rfc3339(text)
            .map(|instant| instant.with_timezone(&Utc))
            .map_err(|err| invalid(err.to_string()))
    } else {
        let seconds = text
            .parse::<i64>()
            .map_err(|err| invalid(err.to_string()))?;
        DateTime::<Utc>::from_timestamp(seconds, 0)
            .ok_or_else(|| invalid("timestamp out of range".to_owned()))
    }
}

fn endpoint_actions(role: Role, raw: &RawEndpoint) -> Result<(Action, Action), ConfigError> {
    let on_timeout = parse_action(
        role,
        "on-timeout",
        raw.on_timeout.as_deref(),
        DEFAULT_ON_TIMEOUT,
    )?;
    let on_error = parse_action(role, "on-error", raw.on_error.as_deref(), DEFAULT_ON_ERROR)?;
    Ok((on_timeout, on_error))
}

fn endpoint_runtime(
    role: Role,
    url: String,
    (on_timeout, on_error): (Action, Action),
    raw: RawEndpoint,
) -> Result<EndpointRuntime, ConfigError> {
    Ok(EndpointRuntime {
        role,
        url,
        timeout: raw.timeout.unwrap_or(DEFAULT_TIMEOUT),
        retry_delay: raw.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY),
        max_retries: raw.max_retries.unwrap_or(0),
        on_timeout,
        on_error,
        auth: raw
            .auth
            .into_auth()
            .map_err(|source| ConfigError::Auth { role, source })?,
    })
}

fn parse_action(
    role: Role,
    field: &'static str,
    raw: Option<&str>,
    default: Action,
) -> Result<Action, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .parse::<Action>()
            .map_err(|reason| ConfigError::InvalidAction { role, field, reason }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READER_URL: &str = "http://localhost:9090/api/v1/read";
    const WRITER_URL: &str = "http://localhost:9201/write";

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
    }

    fn base() -> RawConfig {
        RawConfig {
            start: Some("1970-01-01T00:16:40+00:00".into()),
            end: Some("1970-01-01T00:16:41+00:00".into()),
            reader: RawEndpoint {
                url: Some(READER_URL.to_owned()),
                ..Default::default()
            },
            writer: RawEndpoint {
                url: Some(WRITER_URL.to_owned()),
                ..Default::default()
            },
            progress_enabled: Some(false),
            ..Default::default()
        }
    }

    fn error_message(raw: RawConfig) -> String {
        validate_at(raw, now())
            .expect_err("validation should fail")
            .to_string()
    }

    #[test]
    fn applies_defaults() {
        let config = validate_at(base(), now()).expect("valid config");
        let plan = &config.plan;

        assert_eq!(plan.mint, 1_000_000);
        assert_eq!(plan.maxt, 1_001_000);
        assert_eq!(plan.max_slab_bytes, 524_288_000);
        assert_eq!(plan.concurrent_pull, 1);
        assert_eq!(plan.concurrent_push, 1);
        assert_eq!(plan.lookahead_increment, DEFAULT_LA_INCREMENT);
        assert_eq!(plan.max_read_duration, DEFAULT_MAX_READ_DURATION);
        assert_eq!(plan.max_read_latency, DEFAULT_TIMEOUT);
        assert_eq!(plan.progress.metric_name, DEFAULT_PROGRESS_METRIC_NAME);
        assert_eq!(plan.progress.metric_url, None);
        assert!(!plan.progress.enabled);
        assert!(plan.human_readable_time);
        assert_eq!(plan.name, DEFAULT_MIGRATION_NAME);
        assert_eq!(plan.selector, DEFAULT_SELECTOR);

        for (endpoint, role, url) in [
            (&config.reader, Role::Reader, READER_URL),
            (&config.writer, Role::Writer, WRITER_URL),
        ] {
            assert_eq!(endpoint.role, role);
            assert_eq!(endpoint.url, url);
            assert_eq!(endpoint.timeout, DEFAULT_TIMEOUT);
            assert_eq!(endpoint.retry_delay, DEFAULT_RETRY_DELAY);
            assert_eq!(endpoint.max_retries, 0);
            assert_eq!(endpoint.on_timeout, Action::Retry);
            assert_eq!(endpoint.on_error, Action::Abort);
            assert_eq!(endpoint.auth, Auth::None);
        }
    }

    #[test]
    fn partial_endpoint_overrides_keep_other_defaults() {
        let mut raw = base();
        raw.reader.timeout = Some(DEFAULT_TIMEOUT * 10);
        raw.reader.retry_delay = Some(Duration::from_secs(60));
        raw.reader.max_retries = Some(10);
        raw.reader.on_timeout = Some("skip".to_owned());
        raw.reader.on_error = Some("retry".to_owned());
        raw.writer.max_retries = Some(15);
        raw.writer.on_timeout = Some("abort".to_owned());

        let config = validate_at(raw, now()).expect("valid config");
        assert_eq!(config.reader.timeout, Duration::from_secs(50 * 60));
        assert_eq!(config.reader.retry_delay, Duration::from_secs(60));
        assert_eq!(config.reader.max_retries, 10);
        assert_eq!(config.reader.on_timeout, Action::Skip);
        assert_eq!(config.reader.on_error, Action::Retry);

        assert_eq!(config.writer.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.writer.retry_delay, DEFAULT_RETRY_DELAY);
        assert_eq!(config.writer.max_retries, 15);
        assert_eq!(config.writer.on_timeout, Action::Abort);
        assert_eq!(config.writer.on_error, Action::Abort);
        // the latency budget follows the reader timeout
        assert_eq!(config.plan.max_read_latency, Duration::from_secs(50 * 60));
    }

    #[test]
    fn strips_quotes_around_rfc3339_times() {
        let mut raw = base();
        raw.start = Some("'1970-01-01T00:16:40+00:00'".into());
        raw.end = Some("'1970-01-01T00:16:41+00:00'".into());
        let plan = validate_at(raw, now()).expect("valid config").plan;
        assert_eq!((plan.mint, plan.maxt), (1_000_000, 1_001_000));
    }

    #[test]
    fn numeric_and_rfc3339_inputs_agree() {
        let mut raw = base();
        raw.start = Some("1000".into());
        raw.end = Some("1001".into());
        raw.human_readable_time = Some(false);
        raw.concurrent_pull = Some(16);
        raw.concurrent_push = Some(8);

        let config = validate_at(raw, now()).expect("valid config");
        let human = validate_at(base(), now()).expect("valid config");
        assert_eq!(config.plan.mint, human.plan.mint);
        assert_eq!(config.plan.maxt, human.plan.maxt);
        assert_eq!(config.plan.concurrent_pull, 16);
        assert_eq!(config.plan.concurrent_push, 8);
        assert!(!config.plan.human_readable_time);
    }

    #[test]
    fn instants_are_floored_to_seconds() {
        let mut raw = base();
        let start = DateTime::<Utc>::from_timestamp_millis(1_000_999).expect("valid");
        let end = DateTime::<Utc>::from_timestamp_millis(2_000_500).expect("valid");
        raw.start = Some(start.into());
        raw.end = Some(end.into());
        let plan = validate_at(raw, now()).expect("valid config").plan;
        assert_eq!((plan.mint, plan.maxt), (1_000_000, 2_000_000));

        let mut raw = base();
        raw.start = Some("1970-01-01T00:16:40.999+00:00".into());
        let plan = validate_at(raw, now()).expect("valid config").plan;
        assert_eq!(plan.mint, 1_000_000);
    }

    #[test]
    fn missing_end_defaults_to_now() {
        let mut raw = base();
        raw.end = None;
        let plan = validate_at(raw, now()).expect("valid config").plan;
        assert_eq!(plan.maxt, 1_700_000_000_000);
    }

    #[test]
    fn parses_max_read_size() {
        let mut raw = base();
        raw.max_read_size = Some("100MB".to_owned());
        let spaced = RawConfig {
            max_read_size: Some("100 MB".to_owned()),
            ..base()
        };
        let plain = validate_at(raw, now()).expect("valid config");
        let spaced = validate_at(spaced, now()).expect("valid config");
        assert_eq!(plain.plan.max_slab_bytes, 104_857_600);
        assert_eq!(spaced.plan.max_slab_bytes, 104_857_600);
    }

    #[test]
    fn rejects_unknown_size_suffixes() {
        let mut raw = base();
        raw.max_read_size = Some("100MBB".to_owned());
        assert_eq!(
            error_message(raw),
            "parsing byte-size: Unrecognized size suffix MBB"
        );

        let mut raw = base();
        raw.start = Some("1000".into());
        raw.end = Some("1001".into());
        raw.human_readable_time = Some(false);
        raw.max_read_size = Some("100PP".to_owned());
        assert_eq!(
            error_message(raw),
            "parsing byte-size: Unrecognized size suffix PP"
        );
    }

    #[test]
    fn validates_progress_metric_name() {
        let mut raw = base();
        raw.progress_metric_name = Some("progress_migration_up".to_owned());
        assert!(validate_at(raw, now()).is_ok());

        for name in ["_progress_migration-_up", "0_progress_migration_up"] {
            let mut raw = base();
            raw.progress_metric_name = Some(name.to_owned());
            assert_eq!(
                error_message(raw),
                format!(
                    "invalid metric-name regex match: prom metric must match ^[a-zA-Z_:][a-zA-Z0-9_:]*$: recieved: {name}"
                )
            );
        }
    }

    #[test]
    fn missing_start_fails_first() {
        assert_eq!(
            error_message(RawConfig::default()),
            "mint should be provided for the migration to begin"
        );
    }

    #[test]
    fn missing_urls_have_distinct_messages() {
        let raw = RawConfig {
            start: Some("1".into()),
            human_readable_time: Some(false),
            ..Default::default()
        };
        assert_eq!(
            error_message(raw),
            "remote read storage url and remote write storage url must be specified. Without these, data migration cannot begin"
        );

        let mut raw = base();
        raw.reader.url = Some("  ".to_owned());
        raw.writer.url = Some(" ".to_owned());
        assert_eq!(validate_at(raw, now()), Err(ConfigError::MissingUrls));

        let mut raw = base();
        raw.reader.url = None;
        assert_eq!(
            error_message(raw),
            "remote read storage url needs to be specified. Without read storage url, data migration cannot begin"
        );

        let mut raw = base();
        raw.writer.url = Some("\t".to_owned());
        assert_eq!(
            error_message(raw),
            "remote write storage url needs to be specified. Without write storage url, data migration cannot begin"
        );
    }

    #[test]
    fn start_after_end_names_both_values() {
        let mut raw = base();
        raw.start = Some("'2001-09-09T01:46:41+00:00'".into());
        raw.end = Some("'2001-09-09T01:46:40+00:00'".into());
        raw.progress_enabled = None;
        let message = error_message(raw);
        assert!(message.starts_with(
            "invalid input: minimum timestamp value (start) cannot be greater than the maximum timestamp value (end)"
        ));
        assert!(message.contains("1000000001000"));
        assert!(message.contains("1000000000000"));
    }

    #[test]
    fn progress_url_is_optional_and_kept() {
        let mut raw = base();
        raw.start = Some("'2001-09-09T01:46:41+00:00'".into());
        raw.end = Some("'2001-09-09T01:46:42+00:00'".into());
        raw.progress_enabled = None;
        raw.progress_metric_url = Some("http://localhost:9201/read".to_owned());
        let plan = validate_at(raw, now()).expect("valid config").plan;
        assert!(plan.progress.enabled);
        assert_eq!(
            plan.progress.metric_url.as_deref(),
            Some("http://localhost:9201/read")
        );
        assert_eq!((plan.mint, plan.maxt), (1_000_000_001_000, 1_000_000_002_000));
    }

    #[test]
    fn auth_mechanisms_are_exclusive_per_endpoint() {
        let mut raw = base();
        raw.reader.auth.password = Some("password".to_owned());
        raw.lookahead_increment = Some(Duration::from_secs(7 * 60));
        raw.max_read_duration = Some(Duration::from_secs(7 * 60 * 60));
        let config = validate_at(raw, now()).expect("valid config");
        assert!(matches!(config.reader.auth, Auth::Basic { .. }));
        assert_eq!(config.plan.lookahead_increment, Duration::from_secs(420));

        let mut raw = base();
        raw.reader.auth.bearer_token = Some("token".to_owned());
        assert!(validate_at(raw, now()).is_ok());

        let mut raw = base();
        raw.reader.auth.password = Some("password".to_owned());
        raw.reader.auth.bearer_token = Some("token".to_owned());
        assert_eq!(
            error_message(raw),
            "reader auth validation: at most one of basic_auth, oauth2, bearer_token & bearer_token_file must be configured"
        );

        let mut raw = base();
        raw.writer.auth.bearer_token = Some("token".to_owned());
        raw.writer.auth.oauth2_token_url = Some("http://idp/token".to_owned());
        assert!(error_message(raw).starts_with("writer auth validation"));
    }

    #[test]
    fn rejects_bad_counts_and_durations() {
        let mut raw = base();
        raw.concurrent_push = Some(0);
        assert_eq!(
            validate_at(raw, now()),
            Err(ConfigError::ZeroConcurrency("concurrent-push"))
        );

        let mut raw = base();
        raw.lookahead_increment = Some(Duration::ZERO);
        assert_eq!(validate_at(raw, now()), Err(ConfigError::ZeroIncrement));

        let mut raw = base();
        raw.lookahead_increment = Some(Duration::from_secs(3 * 60 * 60));
        assert!(matches!(
            validate_at(raw, now()),
            Err(ConfigError::IncrementAboveMaxRead { .. })
        ));

        let mut raw = base();
        raw.max_read_size = Some("0MB".to_owned());
        assert_eq!(validate_at(raw, now()), Err(ConfigError::ZeroSlabSize));
    }

    #[test]
    fn rejects_unknown_actions() {
        let mut raw = base();
        raw.writer.on_error = Some("ignore".to_owned());
        assert!(matches!(
            validate_at(raw, now()),
            Err(ConfigError::InvalidAction {
                role: Role::Writer,
                field: "on-error",
                ..
            })
        ));
    }

    #[test]
    fn rejects_malformed_times() {
        let mut raw = base();
        raw.start = Some("yesterday".into());
        assert!(matches!(
            validate_at(raw, now()),
            Err(ConfigError::InvalidTime { field: "start", .. })
        ));
    }
}
