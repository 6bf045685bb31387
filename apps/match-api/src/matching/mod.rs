// Match-score resolution: policy, per-view cache, view lifecycle, HTTP handlers.
// All upstream calls go through score_client; nothing here talks HTTP directly.

pub mod handlers;
pub mod resolution;
pub mod store;
pub mod views;
