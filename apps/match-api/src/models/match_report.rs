use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Provenance of a surfaced score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreOrigin {
    Llm,
    Vector,
}

/// Typed head of the upstream grouped match report. Everything the cache does
/// not read is carried through `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReportDetail {
    pub overall_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared: Option<SharedScores>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedScores {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culture_fit_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub growth_potential_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences_bonus: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorScore {
    pub score: f64, // 0 – 100
    pub confidence: String,
}

/// The cached resolution for one job, for the viewer's active résumé.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    pub job_id: String,
    pub score: Option<f64>,
    pub source: Option<ScoreOrigin>,
    /// Present only when `source` is `Llm`.
    pub detail: Option<MatchReportDetail>,
    /// Most recent vector component. Kept separately so a vector patch never
    /// touches an LLM-sourced score.
    pub vector: Option<VectorScore>,
    pub processing: bool,
    pub error: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// Which of the mutually exclusive states a report narrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportState {
    Scored,
    Processing,
    Failed,
    Empty,
}

impl MatchReport {
    pub fn from_llm(job_id: &str, detail: MatchReportDetail) -> Self {
        Self {
            score: Some(detail.overall_score.clamp(0.0, 100.0)),
            source: Some(ScoreOrigin::Llm),
            detail: Some(detail),
            ..Self::blank(job_id)
        }
    }

    pub fn from_vector(job_id: &str, vector: VectorScore) -> Self {
        Self {
            score: Some(vector.score.clamp(0.0, 100.0)),
            source: Some(ScoreOrigin::Vector),
            vector: Some(vector),
            ..Self::blank(job_id)
        }
    }

    pub fn processing(job_id: &str) -> Self {
        Self {
            processing: true,
            ..Self::blank(job_id)
        }
    }

    pub fn failed(job_id: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::blank(job_id)
        }
    }

    fn blank(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            score: None,
            source: None,
            detail: None,
            vector: None,
            processing: false,
            error: None,
            resolved_at: Utc::now(),
        }
    }

    /// A resolved score supersedes a stale processing flag or error.
    pub fn state(&self) -> ReportState {
        if self.score.is_some() {
            ReportState::Scored
        } else if self.processing {
            ReportState::Processing
        } else if self.error.is_some() {
            ReportState::Failed
        } else {
            ReportState::Empty
        }
    }

    pub fn has_llm_score(&self) -> bool {
        self.source == Some(ScoreOrigin::Llm) && self.score.is_some() && self.detail.is_some()
    }

    pub fn band(&self) -> Option<MatchBand> {
        self.score.map(MatchBand::from_score)
    }
}

/// Display band for a 0 – 100 match score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchBand {
    High,
    Medium,
    Low,
    VeryLow,
}

impl MatchBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            MatchBand::High
        } else if score >= 50.0 {
            MatchBand::Medium
        } else if score >= 30.0 {
            MatchBand::Low
        } else {
            MatchBand::VeryLow
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MatchBand::High => "Excellent Match",
            MatchBand::Medium => "Good Match",
            MatchBand::Low => "Fair Match",
            MatchBand::VeryLow => "Poor Match",
        }
    }

    /// Confidence wording used when the vector endpoint omits one.
    pub fn confidence_level(&self) -> &'static str {
        match self {
            MatchBand::High => "High",
            MatchBand::Medium => "Medium",
            MatchBand::Low => "Low",
            MatchBand::VeryLow => "Very Low",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detail(score: f64) -> MatchReportDetail {
        serde_json::from_value(json!({ "overall_score": score })).unwrap()
    }

    #[test]
    fn test_detail_keeps_unknown_fields() {
        let raw = json!({
            "overall_score": 82.0,
            "shared": { "skills_score": 90.0, "skills_analysis": { "summary": "solid" } },
            "student_view": { "career_insights": [] }
        });
        let parsed: MatchReportDetail = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(parsed.overall_score, 82.0);
        let shared = parsed.shared.as_ref().unwrap();
        assert_eq!(shared.skills_score, Some(90.0));
        assert!(shared.experience_score.is_none());
        assert!(shared.extra.contains_key("skills_analysis"));
        assert!(parsed.extra.contains_key("student_view"));
        assert_eq!(serde_json::to_value(&parsed).unwrap(), raw);
    }

    #[test]
    fn test_state_is_exclusive() {
        assert_eq!(MatchReport::from_llm("j", detail(70.0)).state(), ReportState::Scored);
        assert_eq!(MatchReport::processing("j").state(), ReportState::Processing);
        assert_eq!(MatchReport::failed("j", "boom").state(), ReportState::Failed);

        let mut stale = MatchReport::from_llm("j", detail(70.0));
        stale.processing = true;
        assert_eq!(stale.state(), ReportState::Scored);
    }

    #[test]
    fn test_llm_score_is_clamped() {
        let report = MatchReport::from_llm("j", detail(140.0));
        assert_eq!(report.score, Some(100.0));
        assert!(report.has_llm_score());
    }

    #[test]
    fn test_vector_report_has_no_detail() {
        let report = MatchReport::from_vector(
            "j",
            VectorScore {
                score: 41.5,
                confidence: "medium".into(),
            },
        );
        assert_eq!(report.source, Some(ScoreOrigin::Vector));
        assert!(report.detail.is_none());
        assert!(!report.has_llm_score());
    }

    #[test]
    fn test_origin_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ScoreOrigin::Llm).unwrap(), json!("llm"));
        assert_eq!(serde_json::to_value(ScoreOrigin::Vector).unwrap(), json!("vector"));
    }

    #[test]
    fn test_band_thresholds() {
        assert_eq!(MatchBand::from_score(70.0), MatchBand::High);
        assert_eq!(MatchBand::from_score(69.9), MatchBand::Medium);
        assert_eq!(MatchBand::from_score(50.0), MatchBand::Medium);
        assert_eq!(MatchBand::from_score(30.0), MatchBand::Low);
        assert_eq!(MatchBand::from_score(12.0), MatchBand::VeryLow);
        assert_eq!(MatchBand::High.label(), "Excellent Match");
        assert_eq!(MatchBand::VeryLow.label(), "Poor Match");
    }
}
