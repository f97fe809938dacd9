use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::post,
};
use std::{
    net::SocketAddr,
    process::Output,
    sync::{Arc, Mutex},
};
use tokio::process::Command;
use tsmigrate_engine::{
    remote::http::{ReadPayload, SeriesPayload, decode, encode},
    types::{Label, METRIC_NAME_LABEL, Sample, TimeSeries},
};

type Written = Arc<Mutex<Vec<TimeSeries>>>;

/// Answers every read with one `up` sample at the start of the range.
async fn read_handler(headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let snappy = headers
        .get(header::CONTENT_ENCODING)
        .is_some_and(|value| value == "snappy");
    let request: ReadPayload = decode(&body, snappy).expect("valid read request");
    let series = vec![TimeSeries::new(
        vec![Label::new(METRIC_NAME_LABEL, "up")],
        vec![Sample::new(request.start_ms, 1.0)],
    )];
    let body = encode(&SeriesPayload { series }).expect("encodes");
    ([(header::CONTENT_ENCODING, "snappy")], body)
}

async fn write_handler(State(written): State<Written>, body: Bytes) -> StatusCode {
    let payload: SeriesPayload = decode(&body, true).expect("valid write request");
    written.lock().expect("lock").extend(payload.series);
    StatusCode::NO_CONTENT
}

async fn broken_handler() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "tsdb unavailable")
}

async fn spawn_server() -> (SocketAddr, Written) {
    let written = Written::default();
    let app = Router::new()
        .route("/read", post(read_handler))
        .route("/write", post(write_handler))
        .route("/broken", post(broken_handler))
        .with_state(written.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });
    (addr, written)
}

fn migrated_timestamps(written: &Written, metric: &str) -> Vec<i64> {
    written
        .lock()
        .expect("lock")
        .iter()
        .filter(|series| series.metric_name() == Some(metric))
        .flat_map(|series| series.samples.iter().map(|sample| sample.timestamp_ms))
        .collect()
}

async fn run(args: &[String]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tsmigrate"))
        .args(args)
        .args(["--json", "--log.level", "error", "--log.color", "never"])
        .output()
        .await
        .expect("failed to execute tsmigrate binary")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8(output.stdout.clone()).expect("stdout should be utf-8");
    serde_json::from_str(stdout.trim()).expect("stdout should be a single JSON report")
}

fn migration_args(addr: SocketAddr, read_path: &str) -> Vec<String> {
    [
        "--start",
        "1000",
        "--end",
        "1001",
        "--human-readable-time",
        "false",
        "--la-increment",
        "500ms",
        "--max-read-duration",
        "500ms",
        "--reader-retry-delay",
        "1ms",
    ]
    .into_iter()
    .map(str::to_owned)
    .chain([
        "--reader-url".to_owned(),
        format!("http://{addr}{read_path}"),
        "--writer-url".to_owned(),
        format!("http://{addr}/write"),
    ])
    .collect()
}

#[tokio::test]
async fn emits_json_failure_payload_for_validation_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let report_path = dir.path().join("reports").join("run.jsonl");
    let args = vec![
        "--reader-url".to_owned(),
        "http://127.0.0.1:1/read".to_owned(),
        "--writer-url".to_owned(),
        "http://127.0.0.1:1/write".to_owned(),
        "--report-file".to_owned(),
        report_path.to_string_lossy().into_owned(),
    ];

    let output = run(&args).await;
    assert_eq!(output.status.code(), Some(1));

    let payload = stdout_json(&output);
    assert_eq!(payload["schema_version"], 1);
    assert_eq!(payload["status"], "failed");
    assert_eq!(payload["name"], "tsmigrate");
    assert_eq!(payload["error_type"], "configuration");
    assert_eq!(payload["retryable"], false);
    assert!(
        payload["error"]
            .as_str()
            .expect("error message")
            .contains("mint should be provided for the migration to begin")
    );
    assert!(payload.get("elapsed_ms").is_some());

    let line = std::fs::read_to_string(&report_path).expect("report file written");
    let appended: serde_json::Value = serde_json::from_str(line.trim()).expect("json line");
    assert_eq!(appended, payload);
}

#[tokio::test]
async fn rejects_unparseable_durations() {
    let output = Command::new(env!("CARGO_BIN_EXE_tsmigrate"))
        .args(["--la-increment", "soon"])
        .output()
        .await
        .expect("failed to execute tsmigrate binary");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).expect("stderr should be utf-8");
    assert!(stderr.contains("--la-increment"));
}

#[tokio::test]
async fn help_lists_core_flags() {
    let output = Command::new(env!("CARGO_BIN_EXE_tsmigrate"))
        .arg("--help")
        .output()
        .await
        .expect("failed to execute tsmigrate binary");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    for flag in [
        "--start",
        "--reader-url",
        "--writer-on-error",
        "--max-read-size",
        "--progress-metric-url",
        "--dry-run",
        "--log.level",
    ] {
        assert!(stdout.contains(flag), "help should mention {flag}");
    }
}

#[tokio::test]
async fn migrates_between_http_endpoints() {
    let (addr, written) = spawn_server().await;

    let output = run(&migration_args(addr, "/read")).await;
    assert_eq!(output.status.code(), Some(0));

    let report = stdout_json(&output);
    assert_eq!(report["status"], "completed");
    assert_eq!(report["dry_run"], false);
    assert_eq!(report["blocks_read"], 2);
    assert_eq!(report["samples_written"], 2);
    assert_eq!(report["frontier"], 1_001_000);
    assert_eq!(
        migrated_timestamps(&written, "up"),
        vec![1_000_000, 1_000_500]
    );
    assert!(!migrated_timestamps(&written, "tsmigrate_progress").is_empty());
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let (addr, written) = spawn_server().await;
    let mut args = migration_args(addr, "/read");
    args.push("--dry-run".to_owned());

    let output = run(&args).await;
    assert_eq!(output.status.code(), Some(0));

    let report = stdout_json(&output);
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["samples_written"], 2);
    assert!(written.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn skipped_ranges_exit_with_partial_status() {
    let (addr, written) = spawn_server().await;
    let mut args = migration_args(addr, "/broken");
    args.extend(["--reader-on-error".to_owned(), "skip".to_owned()]);

    let output = run(&args).await;
    assert_eq!(output.status.code(), Some(2));

    let report = stdout_json(&output);
    assert_eq!(report["status"], "partial");
    let skipped = report["skipped"].as_array().expect("skipped ranges");
    assert_eq!(skipped.len(), 2);
    assert!(
        skipped
            .iter()
            .all(|range| range["role"] == "reader"
                && range["reason"].as_str().is_some_and(|r| r.contains("500")))
    );
    assert!(migrated_timestamps(&written, "up").is_empty());
}
