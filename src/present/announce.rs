//! The announcement feed: a FIFO of at most three standalone messages.
//!
//! Each announcement carries its event ID at the end of the text as a
//! spoiler tag, `||<id>||`. That tag is the wire contract that makes the
//! feed restart-safe: on every cycle with something to announce, the live
//! messages behind the persisted refs are re-read and their tags tell us
//! which events are already on screen.

use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::chat::{ChatError, ChatSurface, MessageRef};
use crate::event::Event;

/// Live announcements kept in the channel.
pub const FEED_CAPACITY: usize = 3;

const TAG_DELIMITER: &str = "||";

/// What happened to the feed during one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedOutcome {
    /// Refs to persist, oldest first, at most [`FEED_CAPACITY`].
    pub refs: Vec<MessageRef>,
    pub posted: usize,
    /// Already on screen, not re-posted.
    pub duplicates: usize,
    /// Older messages deleted to make room.
    pub evicted: usize,
    /// IDs of events that could not be posted because a send failed.
    pub unsent: Vec<String>,
    pub error: Option<ChatError>,
}

/// Announcement text for one event.
pub fn render(event: &Event, mention: Option<&str>) -> String {
    let mention = match mention {
        Some(m) if !m.is_empty() => format!(" {}", m),
        _ => String::new(),
    };
    format!(
        "🩸 **{}** just claimed first blood on **{}** ({})\n🕒 {}{} {}{}{}",
        event.subject,
        event.title,
        event.category,
        event.display_time(),
        mention,
        TAG_DELIMITER,
        event.id,
        TAG_DELIMITER
    )
}

/// Recover the event ID embedded in an announcement: the last
/// `||...||` pair in the text, so delimiters inside user-supplied names
/// earlier in the message do not confuse it.
pub fn extract_tag(content: &str) -> Option<&str> {
    let mut segments = content.rsplit(TAG_DELIMITER);
    segments.next()?;
    let tag = segments.next()?.trim();
    // Needs an opening delimiter too.
    segments.next()?;
    (!tag.is_empty()).then_some(tag)
}

/// Post `to_announce` (ascending by time) into the feed described by `refs`.
///
/// Only the newest [`FEED_CAPACITY`] events are posted; anything older would
/// be evicted straight away. `mention` is resolved once per call.
pub async fn sync<C: ChatSurface + ?Sized>(
    chat: &C,
    to_announce: &[Event],
    refs: &[MessageRef],
    mention: Option<&str>,
) -> FeedOutcome {
    let mut outcome = FeedOutcome {
        refs: refs.to_vec(),
        ..FeedOutcome::default()
    };
    if to_announce.is_empty() {
        return outcome;
    }

    let (live_refs, mut on_screen) = recover(chat, refs).await;
    outcome.refs = live_refs;

    let start = to_announce.len().saturating_sub(FEED_CAPACITY);
    if start > 0 {
        debug!(skipped = start, "older announcements folded into the summary only");
    }

    let ping = match mention {
        Some(m) => Some(chat.resolve_mention(m).await),
        None => None,
    };

    let mut pending = to_announce[start..].iter();
    for event in pending.by_ref() {
        if on_screen.contains(&event.id) {
            outcome.duplicates += 1;
            continue;
        }

        match chat.send_text(&render(event, ping.as_deref())).await {
            Ok(msg) => {
                info!(
                    user = %event.subject,
                    challenge = %event.title,
                    msg_id = %msg,
                    "posted new first blood"
                );
                on_screen.insert(event.id.clone());
                outcome.refs.push(msg);
                outcome.posted += 1;
            }
            Err(e) => {
                warn!(error = %e, event = %event.id, "announcement send failed");
                outcome.unsent.push(event.id.clone());
                outcome.error = Some(e);
                break;
            }
        }
    }
    outcome.unsent.extend(pending.map(|e| e.id.clone()));

    outcome.evicted = evict(chat, &mut outcome.refs).await;
    outcome
}

/// Read back the live messages. Refs whose message is gone are dropped; refs
/// that could not be read for other reasons are kept but contribute no tag.
async fn recover<C: ChatSurface + ?Sized>(
    chat: &C,
    refs: &[MessageRef],
) -> (Vec<MessageRef>, HashSet<String>) {
    let mut live = Vec::with_capacity(refs.len());
    let mut tags = HashSet::new();

    for msg in refs {
        match chat.fetch_content(msg).await {
            Ok(content) => {
                if let Some(tag) = extract_tag(&content) {
                    tags.insert(tag.to_string());
                }
                live.push(msg.clone());
            }
            Err(ChatError::NotFound) => {
                debug!(msg_id = %msg, "announcement no longer exists");
            }
            Err(e) => {
                warn!(msg_id = %msg, error = %e, "could not read announcement");
                live.push(msg.clone());
            }
        }
    }

    (live, tags)
}

/// Trim the FIFO to capacity, deleting the oldest messages. Delete failures
/// are tolerated; the ref is dropped either way.
async fn evict<C: ChatSurface + ?Sized>(chat: &C, refs: &mut Vec<MessageRef>) -> usize {
    let mut evicted = 0;
    while refs.len() > FEED_CAPACITY {
        let old = refs.remove(0);
        match chat.delete(&old).await {
            Ok(()) => info!(msg_id = %old, "deleted old announcement"),
            Err(ChatError::NotFound) => debug!(msg_id = %old, "old announcement already gone"),
            Err(e) => warn!(msg_id = %old, error = %e, "failed to delete old announcement"),
        }
        evicted += 1;
    }
    evicted
}
