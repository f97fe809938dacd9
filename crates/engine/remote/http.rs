//! HTTP endpoints.
//!
//! Request and response bodies are JSON compressed with raw snappy and sent
//! with `Content-Encoding: snappy`. A read posts the range and selector and
//! gets back `{"series": [...]}`; a write posts `{"series": [...]}`.
//! Checkpoints are recovered through the Prometheus instant query API.

use super::{CheckpointQuery, CheckpointReader, Destination, ReadRequest, Source};
use crate::{
    auth::{Auth, OAuth2Config},
    config::EndpointRuntime,
    error::EndpointError,
    types::TimeSeries,
};
use reqwest::{Client, RequestBuilder, Response, header};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

pub const SNAPPY_ENCODING: &str = "snappy";

/// Tokens are refreshed this long before they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadPayload {
    pub start_ms: i64,
    pub end_ms: i64,
    pub selector: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SeriesPayload {
    pub series: Vec<TimeSeries>,
}

#[derive(Serialize)]
struct WritePayload<'a> {
    series: &'a [TimeSeries],
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// Client plus the credentials of one endpoint.
#[derive(Debug)]
struct AuthorizedClient {
    client: Client,
    auth: Auth,
    token: Mutex<Option<CachedToken>>,
}

impl AuthorizedClient {
    fn new(timeout: Duration, auth: Auth) -> Result<Self, EndpointError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| EndpointError::Other(format!("building http client: {err}")))?;
        Ok(Self {
            client,
            auth,
            token: Mutex::new(None),
        })
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, EndpointError> {
        Ok(match &self.auth {
            Auth::None => request,
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
            Auth::BearerToken(token) => request.bearer_auth(token),
            Auth::BearerTokenFile(path) => {
                let token = tokio::fs::read_to_string(path).await.map_err(|err| {
                    EndpointError::Other(format!(
                        "reading bearer token file {}: {err}",
                        path.display()
                    ))
                })?;
                request.bearer_auth(token.trim())
            }
            Auth::OAuth2(config) => request.bearer_auth(self.oauth2_token(config).await?),
        })
    }

    async fn oauth2_token(&self, config: &OAuth2Config) -> Result<String, EndpointError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token
                .expires_at
                .is_none_or(|expires_at| Instant::now() < expires_at)
        {
            return Ok(token.value.clone());
        }

        let scope = config.scopes.join(" ");
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
        ];
        if !scope.is_empty() {
            form.push(("scope", scope.as_str()));
        }

        let response = self
            .client
            .post(&config.token_url)
            .form(&form)
            .send()
            .await
            .map_err(classify)?;
        let token: TokenResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(classify)?;

        debug!(token_url = %config.token_url, "fetched oauth2 token");
        let value = token.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: token.expires_in.map(|seconds| {
                Instant::now() + Duration::from_secs(seconds).saturating_sub(TOKEN_EXPIRY_MARGIN)
            }),
        });
        Ok(value)
    }

    async fn post_snappy<T: Serialize>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<Response, EndpointError> {
        let request = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_ENCODING, SNAPPY_ENCODING)
            .header(header::ACCEPT_ENCODING, SNAPPY_ENCODING)
            .body(encode(body)?);
        let response = self
            .authorize(request)
            .await?
            .send()
            .await
            .map_err(classify)?;
        check_status(response).await
    }
}

fn classify(err: reqwest::Error) -> EndpointError {
    if err.is_timeout() {
        EndpointError::Timeout(err.to_string())
    } else {
        EndpointError::Other(err.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, EndpointError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();
    Err(EndpointError::Other(format!(
        "{url} returned {status}: {}",
        body.trim()
    )))
}

pub fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>, EndpointError> {
    let json = serde_json::to_vec(body)
        .map_err(|err| EndpointError::Other(format!("encoding request: {err}")))?;
    snap::raw::Encoder::new()
        .compress_vec(&json)
        .map_err(|err| EndpointError::Other(format!("compressing request: {err}")))
}

pub fn decode<T: DeserializeOwned>(body: &[u8], snappy: bool) -> Result<T, EndpointError> {
    let json = if snappy {
        snap::raw::Decoder::new()
            .decompress_vec(body)
            .map_err(|err| EndpointError::Other(format!("decompressing response: {err}")))?
    } else {
        body.to_vec()
    };
    serde_json::from_slice(&json)
        .map_err(|err| EndpointError::Other(format!("decoding response: {err}")))
}

/// Reads series over HTTP.
#[derive(Debug)]
pub struct HttpSource {
    url: String,
    client: AuthorizedClient,
}

impl HttpSource {
    pub fn new(endpoint: &EndpointRuntime) -> Result<Self, EndpointError> {
        Ok(Self {
            url: endpoint.url.clone(),
            client: AuthorizedClient::new(endpoint.timeout, endpoint.auth.clone())?,
        })
    }
}

#[async_trait::async_trait]
impl Source for HttpSource {
    async fn read(&self, request: ReadRequest) -> Result<Vec<TimeSeries>, EndpointError> {
        let payload = ReadPayload {
            start_ms: request.range.start_ms,
            end_ms: request.range.end_ms,
            selector: request.selector,
        };
        let response = self.client.post_snappy(&self.url, &payload).await?;
        let snappy = response
            .headers()
            .get(header::CONTENT_ENCODING)
            .is_some_and(|value| {
                value
                    .as_bytes()
                    .eq_ignore_ascii_case(SNAPPY_ENCODING.as_bytes())
            });
        let body = response.bytes().await.map_err(classify)?;
        let decoded: SeriesPayload = decode(&body, snappy)?;
        Ok(decoded.series)
    }
}

/// Writes series over HTTP.
#[derive(Debug)]
pub struct HttpDestination {
    url: String,
    client: AuthorizedClient,
}

impl HttpDestination {
    pub fn new(endpoint: &EndpointRuntime) -> Result<Self, EndpointError> {
        Ok(Self {
            url: endpoint.url.clone(),
            client: AuthorizedClient::new(endpoint.timeout, endpoint.auth.clone())?,
        })
    }
}

#[async_trait::async_trait]
impl Destination for HttpDestination {
    async fn write(&self, series: &[TimeSeries]) -> Result<(), EndpointError> {
        self.client
            .post_snappy(&self.url, &WritePayload { series })
            .await
            .map(|_| ())
    }
}

/// Recovers checkpoints from a Prometheus-compatible query endpoint.
#[derive(Debug)]
pub struct PrometheusCheckpointReader {
    base_url: String,
    client: AuthorizedClient,
}

impl PrometheusCheckpointReader {
    pub fn new(base_url: String, timeout: Duration, auth: Auth) -> Result<Self, EndpointError> {
        Ok(Self {
            base_url,
            client: AuthorizedClient::new(timeout, auth)?,
        })
    }
}

/// PromQL selecting the highest checkpoint of one migration.
pub fn checkpoint_expr(query: &CheckpointQuery) -> String {
    let range_s = (query.end_s - query.start_s).max(1);
    format!(
        r#"max_over_time({}{{job="{}",si="{}",ei="{}"}}[{range_s}s])"#,
        query.metric_name, query.job, query.start_s, query.end_s
    )
}

#[derive(Debug, Deserialize)]
struct PrometheusQueryResponse {
    status: String,
    data: PrometheusData,
}

#[derive(Debug, Deserialize)]
struct PrometheusData {
    result: Vec<PrometheusResult>,
}

#[derive(Debug, Deserialize)]
struct PrometheusResult {
    value: Vec<serde_json::Value>,
}

#[async_trait::async_trait]
impl CheckpointReader for PrometheusCheckpointReader {
    async fn latest_checkpoint(
        &self,
        query: &CheckpointQuery,
    ) -> Result<Option<i64>, EndpointError> {
        let url = format!("{}/api/v1/query", self.base_url.trim_end_matches('/'));
        let expr = checkpoint_expr(query);
        let time = query.end_s.to_string();
        let request = self
            .client
            .client
            .get(url)
            .query(&[("query", expr.as_str()), ("time", time.as_str())]);
        let response = self
            .client
            .authorize(request)
            .await?
            .send()
            .await
            .map_err(classify)?;
        let response: PrometheusQueryResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(classify)?;

        if response.status != "success" {
            return Err(EndpointError::Other(format!(
                "prometheus returned non-success status: {}",
                response.status
            )));
        }

        let Some(raw) = response
            .data
            .result
            .first()
            .and_then(|result| result.value.get(1))
            .and_then(|value| value.as_str())
        else {
            return Ok(None);
        };
        let seconds = raw.parse::<f64>().map_err(|err| {
            EndpointError::Other(format!("invalid checkpoint value {raw:?}: {err}"))
        })?;
        Ok(Some((seconds * 1000.0).round() as i64))
    }
}
