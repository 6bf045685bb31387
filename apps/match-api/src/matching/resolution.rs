//! Resolution policy: turns the outcomes of the two score sources into one `MatchReport`.
//!
//! Order of precedence, per pass:
//! 1. No active résumé → terminal error, nothing else is fetched.
//! 2. Cached LLM score and no forced refresh → reuse it, skip the LLM fetch.
//! 3. LLM report ready → LLM score. Processing → processing. Failure → terminal error.
//! 4. LLM report absent → vector score, or the vector failure as the error.
//!
//! The vector score is never fetched while an LLM report is processing: showing
//! one number and then replacing it with another for the same job is worse than
//! showing "processing" once.
//!
//! A pass never returns an error; every failure is recorded on the report.

use tracing::{debug, warn};

use crate::models::MatchReport;
use crate::score_client::{LlmOutcome, ScoreBackend};

/// Runs one resolution pass for `job_id`.
///
/// `cached` is the entry currently held for the key, if any. It is only read,
/// never written; installing the result is the caller's job.
pub async fn resolve_report(
    backend: &dyn ScoreBackend,
    job_id: &str,
    cached: Option<&MatchReport>,
    force_refresh: bool,
) -> MatchReport {
    let resume_id = match backend.active_resume().await {
        Ok(id) => id,
        Err(e) => {
            warn!(job_id, "Résumé lookup failed: {e}");
            return MatchReport::failed(job_id, e.to_string());
        }
    };

    if !force_refresh {
        if let Some(prev) = cached.filter(|r| r.has_llm_score()) {
            debug!(job_id, "Reusing cached LLM score");
            return prev.clone();
        }
    }

    match backend.fetch_llm_report(job_id, &resume_id).await {
        Ok(LlmOutcome::Ready(detail)) => {
            debug!(job_id, score = detail.overall_score, "LLM report ready");
            let mut report = MatchReport::from_llm(job_id, detail);
            // The vector component is metadata; keep the last one seen.
            report.vector = cached.and_then(|r| r.vector.clone());
            return report;
        }
        Ok(LlmOutcome::Processing) => {
            debug!(job_id, "LLM report still processing");
            let mut report = MatchReport::processing(job_id);
            report.vector = cached.and_then(|r| r.vector.clone());
            return report;
        }
        Ok(LlmOutcome::NotFound) => {
            debug!(job_id, "No LLM report, falling back to vector score");
        }
        Err(e) => {
            warn!(job_id, "LLM report fetch failed: {e}");
            return MatchReport::failed(job_id, e.to_string());
        }
    }

    match backend.fetch_vector_score(job_id, &resume_id).await {
        Ok(vector) => {
            debug!(job_id, score = vector.score, "Vector score resolved");
            MatchReport::from_vector(job_id, vector)
        }
        Err(e) => {
            warn!(job_id, "Vector score fetch failed: {e}");
            MatchReport::failed(job_id, e.to_string())
        }
    }
}
