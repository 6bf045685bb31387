pub mod match_report;

pub use match_report::{MatchBand, MatchReport, MatchReportDetail, ReportState, ScoreOrigin, VectorScore};
