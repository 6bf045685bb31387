use crate::matching::views::ViewRegistry;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Open views, each with its own match-report cache.
    pub views: ViewRegistry,
}
