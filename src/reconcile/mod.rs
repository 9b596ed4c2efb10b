//! Per-cycle diff between the fetched batch and the stored history.
//!
//! Decides three things: which stored events went stale (hidden or retracted
//! upstream), what the bounded history looks like after merging, and which
//! events are new enough to announce.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::event::Event;

/// Maximum number of events kept in history.
pub const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Merged history, ascending by `occurred_at`, at most [`HISTORY_CAPACITY`].
    pub history: Vec<Event>,
    /// Events to push to the announcement feed, ascending by `occurred_at`.
    pub to_announce: Vec<Event>,
    /// Stored events dropped because the backend no longer reports them.
    pub pruned: usize,
}

/// Merge `fetched` into `stored`.
///
/// An empty `fetched` means the backend could not be read, not that every
/// event vanished: history is returned untouched and nothing is announced.
pub fn reconcile(
    fetched: &[Event],
    stored: &[Event],
    last_announced_at: Option<DateTime<Utc>>,
) -> Reconciliation {
    if fetched.is_empty() {
        return Reconciliation {
            history: stored.to_vec(),
            to_announce: Vec::new(),
            pruned: 0,
        };
    }

    let fetched_ids: HashSet<&str> = fetched.iter().map(|e| e.id.as_str()).collect();
    let stored_ids: HashSet<&str> = stored.iter().map(|e| e.id.as_str()).collect();

    let survivors: Vec<&Event> = stored
        .iter()
        .filter(|e| fetched_ids.contains(e.id.as_str()))
        .collect();
    let pruned = stored.len() - survivors.len();

    // Keyed merge; the later (fetched) copy wins but keeps first-seen position.
    let mut merged: Vec<Event> = Vec::with_capacity(survivors.len() + fetched.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for event in survivors.into_iter().chain(fetched.iter()) {
        match index.get(&event.id) {
            Some(&i) => merged[i] = event.clone(),
            None => {
                index.insert(event.id.clone(), merged.len());
                merged.push(event.clone());
            }
        }
    }

    merged.sort_by_key(|e| e.occurred_at);
    if merged.len() > HISTORY_CAPACITY {
        merged.drain(..merged.len() - HISTORY_CAPACITY);
    }

    let mut to_announce: Vec<Event> = merged
        .iter()
        .filter(|e| !stored_ids.contains(e.id.as_str()))
        .filter(|e| last_announced_at.map_or(true, |last| e.occurred_at > last))
        .cloned()
        .collect();
    to_announce.sort_by_key(|e| e.occurred_at);

    Reconciliation {
        history: merged,
        to_announce,
        pruned,
    }
}
