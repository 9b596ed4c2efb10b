//! Poll driver: one cycle at a time, forever.
//!
//! A cycle is fetch → load state → reconcile → summary → announcements →
//! persist. State is re-read from disk at the start of every cycle and only
//! written back at the end, so a cycle that fails half way leaves the
//! previous committed state in force.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::chat::ChatSurface;
use crate::fetcher::EventSource;
use crate::present::{announce, summary};
use crate::reconcile::reconcile;
use crate::store::StateStore;

/// Counters for one completed cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub fetched: usize,
    pub history: usize,
    pub pruned: usize,
    pub announced: usize,
    pub duplicates: usize,
    pub evicted: usize,
    /// Events held back for the next cycle after a failed send.
    pub deferred: usize,
}

pub struct Poller<S, C> {
    source: S,
    chat: C,
    store: StateStore,
    interval: Duration,
    mention: Option<String>,
}

impl<S: EventSource, C: ChatSurface> Poller<S, C> {
    pub fn new(
        source: S,
        chat: C,
        store: StateStore,
        interval: Duration,
        mention: Option<String>,
    ) -> Self {
        Self {
            source,
            chat,
            store,
            interval,
            mention,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn chat(&self) -> &C {
        &self.chat
    }

    /// Clear leftovers from an unmanaged earlier run. Only acts when the
    /// persisted state is missing; failures are logged, never fatal.
    pub async fn bootstrap(&self) {
        if self.store.is_initialized() {
            return;
        }
        match self.chat.purge_own_messages().await {
            Ok(n) => info!(removed = n, "channel purged (first run / missing state)"),
            Err(e) => error!(error = %e, "failed to clear channel"),
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let fetched = self.source.fetch_events().await;
        let mut snapshot = self.store.load().context("failed to load state")?;

        let rec = reconcile(
            &fetched,
            &snapshot.history,
            snapshot.cursor.last_announced_at,
        );
        if rec.pruned > 0 {
            info!(pruned = rec.pruned, "removed stale solves from history");
        }

        let summary_ref = summary::sync(
            &self.chat,
            &rec.history,
            snapshot.cursor.summary_ref.as_ref(),
        )
        .await
        .context("failed to update summary message")?;
        snapshot.cursor.summary_ref = Some(summary_ref);

        let feed = announce::sync(
            &self.chat,
            &rec.to_announce,
            &snapshot.cursor.announcement_refs,
            self.mention.as_deref(),
        )
        .await;
        snapshot.cursor.announcement_refs = feed.refs;

        // Unsent events stay out of history so the next cycle sees them as new.
        let unsent: HashSet<&str> = feed.unsent.iter().map(String::as_str).collect();
        let mut history = rec.history;
        if !unsent.is_empty() {
            history.retain(|e| !unsent.contains(e.id.as_str()));
        }
        if let Some(newest) = rec
            .to_announce
            .iter()
            .filter(|e| !unsent.contains(e.id.as_str()))
            .map(|e| e.occurred_at)
            .max()
        {
            snapshot.cursor.advance(newest);
        }

        let report = CycleReport {
            fetched: fetched.len(),
            history: history.len(),
            pruned: rec.pruned,
            announced: feed.posted,
            duplicates: feed.duplicates,
            evicted: feed.evicted,
            deferred: unsent.len(),
        };

        snapshot.history = history;
        self.store
            .save(&snapshot)
            .context("failed to persist state")?;

        if let Some(e) = feed.error {
            warn!(error = %e, deferred = report.deferred, "announcements deferred to next cycle");
        }
        Ok(report)
    }

    /// Run cycles until `shutdown` resolves. Shutdown is only observed
    /// between cycles.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            interval_secs = self.interval.as_secs(),
            "entering poll loop - press Ctrl+C to stop"
        );

        loop {
            match self.run_cycle().await {
                Ok(report) => info!(
                    fetched = report.fetched,
                    history = report.history,
                    pruned = report.pruned,
                    announced = report.announced,
                    duplicates = report.duplicates,
                    evicted = report.evicted,
                    deferred = report.deferred,
                    "poll cycle complete"
                ),
                Err(e) => error!("error in poll loop: {:#}", e),
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down...");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
