//! The summary table: one embed, edited in place every cycle.

use tracing::{info, warn};

use crate::chat::{ChatError, ChatSurface, Embed, MessageRef};
use crate::event::Event;

/// Rows shown in the table.
pub const SUMMARY_ROWS: usize = 10;

const TITLE: &str = "🏆 First Blood Table (10 Latest)";
const COLOR: u32 = 0xff0000;
const EMPTY_TEXT: &str = "No first bloods yet.";

/// Render the newest [`SUMMARY_ROWS`] events of `history` (oldest of them first).
pub fn render(history: &[Event]) -> Embed {
    let start = history.len().saturating_sub(SUMMARY_ROWS);
    let lines: Vec<String> = history[start..]
        .iter()
        .map(|e| {
            format!(
                "🩸 **{}** → **{}** ({})\n🕒 {}",
                e.subject,
                e.title,
                e.category,
                e.display_time()
            )
        })
        .collect();

    let description = if lines.is_empty() {
        EMPTY_TEXT.to_string()
    } else {
        lines.join("\n\n")
    };

    Embed {
        title: TITLE.to_string(),
        description,
        color: COLOR,
    }
}

/// Bring the live summary message in line with `history`.
///
/// Edits the existing message when there is one; any edit failure falls
/// back to posting a fresh message. Returns the ref now in use.
pub async fn sync<C: ChatSurface + ?Sized>(
    chat: &C,
    history: &[Event],
    current: Option<&MessageRef>,
) -> Result<MessageRef, ChatError> {
    let embed = render(history);

    if let Some(msg) = current {
        match chat.edit_embed(msg, &embed).await {
            Ok(()) => return Ok(msg.clone()),
            Err(ChatError::NotFound) => {
                info!(msg_id = %msg, "summary message gone, re-creating");
            }
            Err(e) => {
                warn!(msg_id = %msg, error = %e, "summary edit failed, re-creating");
            }
        }
    }

    let msg = chat.send_embed(&embed).await?;
    info!(msg_id = %msg, rows = history.len().min(SUMMARY_ROWS), "summary message posted");
    Ok(msg)
}
