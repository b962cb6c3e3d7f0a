use log::debug;

use crate::models::message::{ChatMessage, MessageBuffer, MessageSegment};
use crate::services::resolver::{EmoteMap, EmoteResolver};

/// Reconstruct canonical text from displayed segments. Emotes render as
/// their original name (the pre-aliasing one), mentions keep a trailing
/// space to preserve the word boundary even though the surrounding text
/// usually carried its own space already — the resulting double space is a
/// documented quirk of the reconstruction, left as-is. Notice leaves
/// contribute nothing.
pub fn segments_to_text(segments: &[MessageSegment]) -> String {
    let mut text = String::new();
    for segment in segments {
        match segment {
            MessageSegment::Text { content } => text.push_str(content),
            MessageSegment::Emote {
                content,
                original_name,
                ..
            } => {
                if original_name.is_empty() {
                    text.push_str(content);
                } else {
                    text.push_str(original_name);
                }
            }
            MessageSegment::Mention { content, .. } => {
                text.push_str(content);
                text.push(' ');
            }
            _ => {}
        }
    }
    text
}

fn eligible(message: &ChatMessage) -> bool {
    message.sender != "System" && message.notice_tags.is_none()
}

/// Messages that must be re-tokenized when the emote sets change: everything
/// except System lines and usernotices.
pub fn select_for_reprocessing(buffer: &MessageBuffer) -> Vec<&ChatMessage> {
    buffer.iter().filter(|m| eligible(m)).collect()
}

/// Re-run the resolver over every eligible buffered message with the
/// now-current emote sets, replacing each `message` field in place. Returns
/// how many messages were re-tokenized.
pub fn reprocess_buffer(
    buffer: &mut MessageBuffer,
    resolver: &EmoteResolver,
    emote_map: &EmoteMap,
) -> usize {
    let mut updated = 0;

    for message in buffer.iter_mut() {
        if !eligible(message) {
            continue;
        }

        let text = segments_to_text(&message.message);
        if text.trim().is_empty() {
            continue;
        }

        message.message = resolver.resolve(&text, emote_map);
        updated += 1;
    }

    debug!("[Reprocess] Re-tokenized {} buffered messages", updated);
    updated
}
