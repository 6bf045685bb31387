//! Per-key cache of resolved match reports for one view.
//!
//! Requests for the same key are coalesced: a non-forced `resolve` joins the
//! request already in flight instead of starting another. Every request gets a
//! ticket, and a completion is installed only while its ticket is still the
//! key's current one. A forced refresh, a garbage-collection pass, or closing
//! the view all retire the ticket, so late results are dropped rather than
//! overwriting newer data or resurrecting an evicted key.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::matching::resolution::resolve_report;
use crate::models::{MatchBand, MatchReport, ScoreOrigin, VectorScore};
use crate::score_client::{ScoreBackend, ScoreClientError};

pub struct MatchReportStore {
    backend: Arc<dyn ScoreBackend>,
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    entries: HashMap<String, MatchReport>,
    in_flight: HashMap<String, InFlight>,
    next_ticket: u64,
}

struct InFlight {
    ticket: u64,
    done: watch::Receiver<Option<MatchReport>>,
}

impl InFlight {
    /// False once the resolving task has gone away without reporting.
    fn is_live(&self) -> bool {
        self.done.has_changed().is_ok()
    }
}

impl MatchReportStore {
    pub fn new(backend: Arc<dyn ScoreBackend>) -> Self {
        Self {
            backend,
            inner: Mutex::new(StoreInner::default()),
        }
    }

    /// Pure lookup. Never triggers a fetch.
    pub fn get(&self, job_id: &str) -> Option<MatchReport> {
        self.inner.lock().entries.get(job_id).cloned()
    }

    pub fn is_resolving(&self, job_id: &str) -> bool {
        self.inner
            .lock()
            .in_flight
            .get(job_id)
            .is_some_and(InFlight::is_live)
    }

    /// All cached entries, ordered by job id.
    pub fn snapshot(&self) -> Vec<MatchReport> {
        let mut reports: Vec<MatchReport> = self.inner.lock().entries.values().cloned().collect();
        reports.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        reports
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Resolves `job_id` and installs the result.
    ///
    /// The pass runs on its own task, so it completes even if the caller is
    /// dropped. Joiners of a request receive that request's result, even when
    /// it was superseded before it finished.
    pub async fn resolve(self: &Arc<Self>, job_id: &str, force_refresh: bool) -> MatchReport {
        let mut done = {
            let mut inner = self.inner.lock();
            let joined = if force_refresh {
                None
            } else {
                inner
                    .in_flight
                    .get(job_id)
                    .filter(|flight| flight.is_live())
                    .map(|flight| flight.done.clone())
            };
            match joined {
                Some(done) => {
                    debug!(job_id, "Joining in-flight resolution");
                    done
                }
                None => self.start(&mut inner, job_id, force_refresh),
            }
        };

        let outcome = match done.wait_for(Option::is_some).await {
            Ok(report) => (*report).clone(),
            Err(_) => None,
        };

        outcome.unwrap_or_else(|| {
            warn!(job_id, "Resolution task ended without a result");
            MatchReport::failed(job_id, "Match score resolution was interrupted.")
        })
    }

    fn start(
        self: &Arc<Self>,
        inner: &mut StoreInner,
        job_id: &str,
        force_refresh: bool,
    ) -> watch::Receiver<Option<MatchReport>> {
        inner.next_ticket += 1;
        let ticket = inner.next_ticket;
        let (tx, rx) = watch::channel(None);

        if let Some(prev) = inner.in_flight.insert(
            job_id.to_string(),
            InFlight {
                ticket,
                done: rx.clone(),
            },
        ) {
            debug!(job_id, superseded = prev.ticket, ticket, "Superseding in-flight resolution");
        }

        let cached = inner.entries.get(job_id).cloned();
        let store = Arc::clone(self);
        let job_id = job_id.to_string();

        tokio::spawn(async move {
            let report =
                resolve_report(store.backend.as_ref(), &job_id, cached.as_ref(), force_refresh)
                    .await;
            store.complete(&job_id, ticket, report, tx);
        });

        rx
    }

    fn complete(
        &self,
        job_id: &str,
        ticket: u64,
        report: MatchReport,
        tx: watch::Sender<Option<MatchReport>>,
    ) {
        let installed = {
            let mut inner = self.inner.lock();
            let current = inner
                .in_flight
                .get(job_id)
                .is_some_and(|flight| flight.ticket == ticket);
            if current {
                inner.in_flight.remove(job_id);
                inner.entries.insert(job_id.to_string(), report.clone());
            }
            current
        };

        if !installed {
            debug!(job_id, ticket, "Discarding stale resolution");
        }

        // Nobody waiting is fine.
        let _ = tx.send(Some(report));
    }

    /// Drops every entry, and every in-flight request, whose key is not in
    /// `active_job_ids`. Returns how many entries were dropped.
    pub fn invalidate_except(&self, active_job_ids: &HashSet<String>) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|job_id, _| active_job_ids.contains(job_id));
        inner.in_flight.retain(|job_id, _| active_job_ids.contains(job_id));
        let dropped = before - inner.entries.len();
        if dropped > 0 {
            debug!(dropped, kept = inner.entries.len(), "Evicted inactive match reports");
        }
        dropped
    }

    /// Empties the store. Results of requests still in flight are discarded.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.in_flight.clear();
    }

    /// Patches only the vector component of a cached entry.
    ///
    /// An LLM-sourced score, its source and its detail are left alone. When
    /// the entry's score came from the vector source, the score follows the
    /// patch. Returns `None` if nothing is cached for `job_id`.
    pub fn patch_vector(&self, job_id: &str, vector: VectorScore) -> Option<MatchReport> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(job_id)?;
        if entry.source == Some(ScoreOrigin::Vector) {
            entry.score = Some(vector.score.clamp(0.0, 100.0));
        }
        entry.vector = Some(vector);
        Some(entry.clone())
    }

    /// Applies a batch of raw vector scores to whichever keys are cached.
    /// Returns the patched entries, ordered by job id.
    pub fn apply_vector_batch(&self, scores: &HashMap<String, f64>) -> Vec<MatchReport> {
        let mut patched: Vec<MatchReport> = scores
            .iter()
            .filter_map(|(job_id, score)| {
                self.patch_vector(
                    job_id,
                    VectorScore {
                        score: *score,
                        confidence: MatchBand::from_score(*score)
                            .confidence_level()
                            .to_string(),
                    },
                )
            })
            .collect();
        patched.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        patched
    }

    /// Pulls fresh vector scores for `job_ids` (every cached key when `None`)
    /// in one batch call and patches them in.
    pub async fn refresh_vectors(
        &self,
        job_ids: Option<Vec<String>>,
    ) -> Result<Vec<MatchReport>, ScoreClientError> {
        let job_ids = job_ids.unwrap_or_else(|| {
            let mut keys: Vec<String> = self.inner.lock().entries.keys().cloned().collect();
            keys.sort();
            keys
        });
        let scores = self.backend.batch_vector_scores(&job_ids).await?;
        debug!(requested = job_ids.len(), returned = scores.len(), "Vector batch fetched");
        Ok(self.apply_vector_batch(&scores))
    }

    /// Force-refreshes every cached or in-flight key. Used when the viewer's
    /// active résumé changes, since entries are not keyed by résumé.
    pub async fn refresh_all(self: &Arc<Self>) -> Vec<MatchReport> {
        let job_ids: Vec<String> = {
            let inner = self.inner.lock();
            inner
                .entries
                .keys()
                .chain(inner.in_flight.keys())
                .cloned()
                .collect::<HashSet<_>>()
                .into_iter()
                .collect()
        };
        info!(count = job_ids.len(), "Refreshing all match reports");

        let mut tasks = JoinSet::new();
        for job_id in job_ids {
            let store = Arc::clone(self);
            tasks.spawn(async move { store.resolve(&job_id, true).await });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => warn!("Refresh task failed: {e}"),
            }
        }
        reports.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        reports
    }
}
