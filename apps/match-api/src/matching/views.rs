//! View contexts. Each open view (a search results page, a job board tab) owns
//! its own `MatchReportStore`; closing the view tears the store down.
//!
//! A view is bound to the bearer token it was opened with. Tabs that go away
//! without closing their view are reclaimed once idle past the registry TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::matching::store::MatchReportStore;
use crate::score_client::BackendFactory;

pub struct ViewContext {
    pub id: Uuid,
    pub opened_at: DateTime<Utc>,
    pub store: Arc<MatchReportStore>,
    token: String,
    last_seen: Mutex<Instant>,
}

impl ViewContext {
    fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_seen.lock())
    }
}

#[derive(Clone)]
pub struct ViewRegistry {
    factory: Arc<dyn BackendFactory>,
    views: Arc<RwLock<HashMap<Uuid, Arc<ViewContext>>>>,
    max_views: usize,
    idle_ttl: Duration,
}

impl ViewRegistry {
    pub fn new(factory: Arc<dyn BackendFactory>, max_views: usize, idle_ttl: Duration) -> Self {
        Self {
            factory,
            views: Arc::new(RwLock::new(HashMap::new())),
            max_views,
            idle_ttl,
        }
    }

    /// Opens a view whose store talks upstream as the holder of `token`.
    /// Idle views are reclaimed before the cap is checked.
    pub fn open(&self, token: &str) -> Result<Arc<ViewContext>, AppError> {
        let mut views = self.views.write();
        evict_idle(&mut views, self.idle_ttl);
        if views.len() >= self.max_views {
            return Err(AppError::Unavailable(format!(
                "Too many open views (limit {})",
                self.max_views
            )));
        }

        let view = Arc::new(ViewContext {
            id: Uuid::new_v4(),
            opened_at: Utc::now(),
            store: Arc::new(MatchReportStore::new(self.factory.for_viewer(token))),
            token: token.to_string(),
            last_seen: Mutex::new(Instant::now()),
        });
        views.insert(view.id, view.clone());
        info!(view_id = %view.id, open_views = views.len(), "View opened");
        Ok(view)
    }

    /// Looks up a view on behalf of the holder of `token` and marks it as seen.
    /// A view opened with a different token is reported as not found.
    pub fn get(&self, id: Uuid, token: &str) -> Result<Arc<ViewContext>, AppError> {
        let view = self
            .views
            .read()
            .get(&id)
            .filter(|view| view.token == token)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("View {id} not found")))?;
        view.touch();
        Ok(view)
    }

    /// Closes a view. Requests still in flight finish, but their results are dropped.
    pub fn close(&self, id: Uuid, token: &str) -> Result<(), AppError> {
        let removed = {
            let mut views = self.views.write();
            let owned = views.get(&id).is_some_and(|view| view.token == token);
            if owned {
                views.remove(&id)
            } else {
                None
            }
        };
        let view = removed.ok_or_else(|| AppError::NotFound(format!("View {id} not found")))?;
        view.store.clear();
        info!(view_id = %id, "View closed");
        Ok(())
    }

    /// Drops every view idle for longer than the TTL. Returns how many went.
    pub fn sweep_idle(&self) -> usize {
        evict_idle(&mut self.views.write(), self.idle_ttl)
    }

    pub fn len(&self) -> usize {
        self.views.read().len()
    }
}

fn evict_idle(views: &mut HashMap<Uuid, Arc<ViewContext>>, ttl: Duration) -> usize {
    let now = Instant::now();
    let before = views.len();
    views.retain(|id, view| {
        let idle = view.idle_for(now);
        if idle < ttl {
            return true;
        }
        view.store.clear();
        info!(view_id = %id, idle_secs = idle.as_secs(), "Idle view reclaimed");
        false
    });
    before - views.len()
}
