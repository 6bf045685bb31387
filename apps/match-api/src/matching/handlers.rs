//! Axum route handlers for the match-report API.
//!
//! Every view-scoped route expects the bearer token the view was opened with.

use std::collections::HashSet;

use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::matching::store::MatchReportStore;
use crate::models::{MatchBand, MatchReport, ReportState, VectorScore};
use crate::state::AppState;

const MAX_JOB_ID_LEN: usize = 128;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct OpenViewResponse {
    pub view_id: Uuid,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    #[serde(flatten)]
    pub report: MatchReport,
    pub state: ReportState,
    pub band: Option<MatchBand>,
    pub band_label: Option<&'static str>,
    pub resolving: bool,
}

#[derive(Debug, Serialize)]
pub struct ReportListResponse {
    pub view_id: Uuid,
    pub count: usize,
    pub reports: Vec<ReportResponse>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveParams {
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct ActiveJobsRequest {
    pub job_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ActiveJobsResponse {
    pub dropped: usize,
    pub kept: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct VectorBatchRequest {
    #[serde(default)]
    pub job_ids: Option<Vec<String>>,
}

impl ReportResponse {
    fn build(report: MatchReport, store: &MatchReportStore) -> Self {
        let band = report.band();
        Self {
            state: report.state(),
            band,
            band_label: band.map(|b| b.label()),
            resolving: store.is_resolving(&report.job_id),
            report,
        }
    }
}

fn report_list(view_id: Uuid, store: &MatchReportStore, reports: Vec<MatchReport>) -> ReportListResponse {
    let reports: Vec<ReportResponse> = reports
        .into_iter()
        .map(|r| ReportResponse::build(r, store))
        .collect();
    ReportListResponse {
        view_id,
        count: reports.len(),
        reports,
    }
}

fn validate_job_id(job_id: &str) -> Result<(), AppError> {
    if job_id.trim().is_empty() {
        return Err(AppError::Validation("job_id cannot be empty".to_string()));
    }
    if job_id.len() > MAX_JOB_ID_LEN {
        return Err(AppError::Validation(format!(
            "job_id must be at most {MAX_JOB_ID_LEN} characters"
        )));
    }
    Ok(())
}

fn bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or(AppError::Unauthorized)
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/views
///
/// Opens a view bound to the caller's upstream credentials.
pub async fn handle_open_view(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<OpenViewResponse>), AppError> {
    let token = bearer_token(&headers)?;
    let view = state.views.open(&token)?;
    Ok((
        StatusCode::CREATED,
        Json(OpenViewResponse {
            view_id: view.id,
            opened_at: view.opened_at,
        }),
    ))
}

/// DELETE /api/v1/views/:view_id
pub async fn handle_close_view(
    State(state): State<AppState>,
    Path(view_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    state.views.close(view_id, &bearer_token(&headers)?)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/views/:view_id/match-reports
pub async fn handle_list_reports(
    State(state): State<AppState>,
    Path(view_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ReportListResponse>, AppError> {
    let view = state.views.get(view_id, &bearer_token(&headers)?)?;
    let reports = view.store.snapshot();
    Ok(Json(report_list(view_id, &view.store, reports)))
}

/// GET /api/v1/views/:view_id/match-reports/:job_id
///
/// Cache lookup only. Never triggers a fetch.
pub async fn handle_get_report(
    State(state): State<AppState>,
    Path((view_id, job_id)): Path<(Uuid, String)>,
    headers: HeaderMap,
) -> Result<Json<ReportResponse>, AppError> {
    let view = state.views.get(view_id, &bearer_token(&headers)?)?;
    let report = view
        .store
        .get(&job_id)
        .ok_or_else(|| AppError::NotFound(format!("No match report cached for job {job_id}")))?;
    Ok(Json(ReportResponse::build(report, &view.store)))
}

/// POST /api/v1/views/:view_id/match-reports/:job_id/resolve?force_refresh=bool
///
/// Always 200: a failed resolution is reported in the body, not the status.
pub async fn handle_resolve(
    State(state): State<AppState>,
    Path((view_id, job_id)): Path<(Uuid, String)>,
    headers: HeaderMap,
    Query(params): Query<ResolveParams>,
) -> Result<Json<ReportResponse>, AppError> {
    validate_job_id(&job_id)?;
    let view = state.views.get(view_id, &bearer_token(&headers)?)?;
    let report = view.store.resolve(&job_id, params.force_refresh).await;
    Ok(Json(ReportResponse::build(report, &view.store)))
}

/// PUT /api/v1/views/:view_id/match-reports/:job_id/vector
pub async fn handle_patch_vector(
    State(state): State<AppState>,
    Path((view_id, job_id)): Path<(Uuid, String)>,
    headers: HeaderMap,
    Json(vector): Json<VectorScore>,
) -> Result<Json<ReportResponse>, AppError> {
    if !vector.score.is_finite() || !(0.0..=100.0).contains(&vector.score) {
        return Err(AppError::Validation(
            "score must be between 0 and 100".to_string(),
        ));
    }

    let view = state.views.get(view_id, &bearer_token(&headers)?)?;
    let report = view
        .store
        .patch_vector(&job_id, vector)
        .ok_or_else(|| AppError::NotFound(format!("No match report cached for job {job_id}")))?;
    Ok(Json(ReportResponse::build(report, &view.store)))
}

/// POST /api/v1/views/:view_id/vector-batch
///
/// Fetches a batch of vector scores upstream and patches the cached entries.
pub async fn handle_vector_batch(
    State(state): State<AppState>,
    Path(view_id): Path<Uuid>,
    headers: HeaderMap,
    request: Option<Json<VectorBatchRequest>>,
) -> Result<Json<ReportListResponse>, AppError> {
    let job_ids = request.and_then(|Json(r)| r.job_ids);
    if let Some(ids) = &job_ids {
        ids.iter().try_for_each(|id| validate_job_id(id))?;
    }

    let view = state.views.get(view_id, &bearer_token(&headers)?)?;
    let patched = view.store.refresh_vectors(job_ids).await?;
    Ok(Json(report_list(view_id, &view.store, patched)))
}

/// POST /api/v1/views/:view_id/active-jobs
///
/// Declares the jobs currently on screen; everything else is evicted.
pub async fn handle_active_jobs(
    State(state): State<AppState>,
    Path(view_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<ActiveJobsRequest>,
) -> Result<Json<ActiveJobsResponse>, AppError> {
    let view = state.views.get(view_id, &bearer_token(&headers)?)?;
    let active: HashSet<String> = request.job_ids.into_iter().collect();
    let dropped = view.store.invalidate_except(&active);
    Ok(Json(ActiveJobsResponse {
        dropped,
        kept: view.store.len(),
    }))
}

/// POST /api/v1/views/:view_id/resume-changed
///
/// The viewer switched their active résumé: every cached score is stale.
pub async fn handle_resume_changed(
    State(state): State<AppState>,
    Path(view_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ReportListResponse>, AppError> {
    let view = state.views.get(view_id, &bearer_token(&headers)?)?;
    let reports = view.store.refresh_all().await;
    Ok(Json(report_list(view_id, &view.store, reports)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_required() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Err(AppError::Unauthorized)));

        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(matches!(bearer_token(&headers), Err(AppError::Unauthorized)));

        headers.insert(AUTHORIZATION, "Bearer   ".parse().unwrap());
        assert!(matches!(bearer_token(&headers), Err(AppError::Unauthorized)));

        headers.insert(AUTHORIZATION, "Bearer tok-123".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "tok-123");
    }

    #[test]
    fn test_validate_job_id() {
        assert!(validate_job_id("job-1").is_ok());
        assert!(validate_job_id("  ").is_err());
        assert!(validate_job_id(&"x".repeat(MAX_JOB_ID_LEN + 1)).is_err());
    }
}
