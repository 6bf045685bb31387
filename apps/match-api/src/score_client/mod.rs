/// Score source client: the single point of entry for all upstream scoring calls.
///
/// ARCHITECTURAL RULE: No other module may call the careers platform API directly.
/// The resolver and the cache only ever see `ScoreBackend`.
///
/// Retries live here, in the transport. The resolver never retries.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{MatchBand, MatchReportDetail, VectorScore};

pub type ResumeId = String;

#[derive(Debug, Error)]
pub enum ScoreClientError {
    #[error("No active CV found. Please upload or activate a resume.")]
    NoActiveResume,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Upstream still rate limiting after {retries} attempts")]
    RateLimited { retries: u32 },

    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(String),
}

/// Outcome of asking for the LLM match report of one (job, résumé) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmOutcome {
    Ready(MatchReportDetail),
    /// The upstream accepted the pair for scoring; ask again later.
    Processing,
    /// No LLM report exists and none is pending.
    NotFound,
}

/// The two score sources plus the résumé lookup they both depend on.
/// Carried by each view's store as `Arc<dyn ScoreBackend>`.
#[async_trait]
pub trait ScoreBackend: Send + Sync {
    async fn active_resume(&self) -> Result<ResumeId, ScoreClientError>;

    async fn fetch_llm_report(
        &self,
        job_id: &str,
        resume_id: &str,
    ) -> Result<LlmOutcome, ScoreClientError>;

    async fn fetch_vector_score(
        &self,
        job_id: &str,
        resume_id: &str,
    ) -> Result<VectorScore, ScoreClientError>;

    async fn batch_vector_scores(
        &self,
        job_ids: &[String],
    ) -> Result<HashMap<String, f64>, ScoreClientError>;
}

/// Builds a backend bound to one viewer's credentials.
pub trait BackendFactory: Send + Sync {
    fn for_viewer(&self, token: &str) -> Arc<dyn ScoreBackend>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        // Exponential backoff: base, 2×base, 4×base, ...
        self.base_delay * (1u32 << (attempt - 1).min(16))
    }
}

/// Shared HTTP plumbing for all viewers: one connection pool, one base URL.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ScoreClientError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ScoreClientError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ScoreClientError::InvalidUrl(base_url.to_string()));
        }

        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url,
            retry,
        })
    }

    /// `{base}/seg/seg/` with each segment percent-encoded and the trailing
    /// slash the upstream router expects.
    fn url(&self, segments: &[&str]) -> Result<Url, ScoreClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ScoreClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments)
            .push("");
        Ok(url)
    }
}

impl BackendFactory for UpstreamClient {
    fn for_viewer(&self, token: &str) -> Arc<dyn ScoreBackend> {
        Arc::new(HttpScoreBackend {
            upstream: self.clone(),
            token: token.to_string(),
        })
    }
}

/// `ScoreBackend` over the careers platform REST API, authenticated as one viewer.
pub struct HttpScoreBackend {
    upstream: UpstreamClient,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ActiveCv {
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SingleJobScore {
    #[serde(alias = "score")]
    vector_score: f64,
    #[serde(default)]
    confidence: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchScores {
    jobs: Vec<BatchJobScore>,
}

#[derive(Debug, Deserialize)]
struct BatchJobScore {
    job_id: Value,
    vector_score: f64,
}

impl HttpScoreBackend {
    /// Issues a GET, retrying on 429, 5xx, and connection errors with
    /// exponential backoff. Any other response is returned as-is.
    async fn get(&self, url: Url, query: &[(&str, String)]) -> Result<Response, ScoreClientError> {
        let retry = &self.upstream.retry;
        let attempts = retry.max_attempts.max(1);
        let mut last_error: Option<ScoreClientError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = retry.delay_for(attempt);
                warn!(
                    "Upstream call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .upstream
                .client
                .get(url.clone())
                .bearer_auth(&self.token)
                .query(query)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(ScoreClientError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("Upstream {} returned {}: {}", url.path(), status, body);
                last_error = Some(if status == StatusCode::TOO_MANY_REQUESTS {
                    ScoreClientError::RateLimited { retries: attempts }
                } else {
                    ScoreClientError::Api {
                        status: status.as_u16(),
                        message: error_message(&body),
                    }
                });
                continue;
            }

            debug!("Upstream {} returned {}", url.path(), status);
            return Ok(response);
        }

        Err(last_error.unwrap_or(ScoreClientError::RateLimited { retries: attempts }))
    }
}

#[async_trait]
impl ScoreBackend for HttpScoreBackend {
    async fn active_resume(&self) -> Result<ResumeId, ScoreClientError> {
        let response = self.get(self.upstream.url(&["cv", "active"])?, &[]).await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ScoreClientError::NoActiveResume);
        }
        if !status.is_success() {
            return Err(api_error(response).await);
        }

        let cv: ActiveCv = serde_json::from_str(&response.text().await?)?;
        match cv.id {
            Some(Value::String(id)) if !id.is_empty() => Ok(id),
            Some(Value::Number(id)) => Ok(id.to_string()),
            _ => Err(ScoreClientError::NoActiveResume),
        }
    }

    async fn fetch_llm_report(
        &self,
        job_id: &str,
        resume_id: &str,
    ) -> Result<LlmOutcome, ScoreClientError> {
        let url = self.upstream.url(&["jobs", job_id, "analysis"])?;
        let response = self
            .get(url, &[("cv_id", resume_id.to_string())])
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed: Result<Value, serde_json::Error> = serde_json::from_str(&body);

        let processing_marker = parsed.as_ref().is_ok_and(is_processing);
        if status == StatusCode::ACCEPTED || processing_marker {
            return Ok(LlmOutcome::Processing);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(LlmOutcome::NotFound);
        }
        if !status.is_success() {
            return Err(ScoreClientError::Api {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let report = parsed?;
        if report.get("overall_score").is_some_and(Value::is_number) {
            Ok(LlmOutcome::Ready(serde_json::from_value(report)?))
        } else {
            // A 200 without a score carries no report.
            Ok(LlmOutcome::NotFound)
        }
    }

    async fn fetch_vector_score(
        &self,
        job_id: &str,
        resume_id: &str,
    ) -> Result<VectorScore, ScoreClientError> {
        let url = self.upstream.url(&["jobs", job_id, "vector-score"])?;
        let response = self
            .get(url, &[("cv_id", resume_id.to_string())])
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(response).await);
        }

        let body: Value = serde_json::from_str(&response.text().await?)?;
        // Missing embeddings come back as 202 `{processing: true}`. Vector
        // scores have no pending state, so this is a plain failure.
        if status == StatusCode::ACCEPTED || is_processing(&body) {
            return Err(ScoreClientError::Api {
                status: status.as_u16(),
                message: "Vector score not available yet: embeddings are still processing"
                    .to_string(),
            });
        }

        let single: SingleJobScore = serde_json::from_value(body)?;
        let confidence = single.confidence.unwrap_or_else(|| {
            MatchBand::from_score(single.vector_score)
                .confidence_level()
                .to_string()
        });

        Ok(VectorScore {
            score: single.vector_score,
            confidence,
        })
    }

    async fn batch_vector_scores(
        &self,
        job_ids: &[String],
    ) -> Result<HashMap<String, f64>, ScoreClientError> {
        if job_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query = vec![("limit", job_ids.len().to_string())];
        query.extend(job_ids.iter().map(|id| ("job_ids", id.clone())));

        let url = self.upstream.url(&["jobs", "vector-scores"])?;
        let response = self.get(url, &query).await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let batch: BatchScores = serde_json::from_str(&response.text().await?)?;
        Ok(batch
            .jobs
            .into_iter()
            .filter_map(|job| {
                let id = match job.job_id {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                Some((id, job.vector_score))
            })
            .collect())
    }
}

async fn api_error(response: Response) -> ScoreClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ScoreClientError::Api {
        status,
        message: error_message(&body),
    }
}

fn is_processing(body: &Value) -> bool {
    body.get("processing")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Pulls `detail` / `error` / `message` out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["detail", "error", "message"]
                .iter()
                .find_map(|key| v.get(key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string())
}
