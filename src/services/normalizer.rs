use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::models::message::{
    AnonGiftNotice, AnonGiftPaidUpgradeNotice, ChatMessage, MessageSegment, ResubNotice,
    SubGiftNotice, SubNotice, UserBadge, ViewerMilestoneNotice,
};
use crate::services::resolver::{EmoteMap, EmoteResolver};

/// Protocol event class the raw tags arrived with. Locally synthesized
/// status lines do not pass through `normalize` at all; they are minted by
/// `create_system_message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Privmsg,
    Usernotice,
}

// Disambiguates synthetic messages minted within the same millisecond.
static MESSAGE_NONCE: AtomicU64 = AtomicU64::new(0);

fn next_nonce() -> u64 {
    MESSAGE_NONCE.fetch_add(1, Ordering::Relaxed)
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn tag<'a>(tags: &'a HashMap<String, String>, key: &str) -> &'a str {
    tags.get(key).map(String::as_str).unwrap_or("")
}

fn tag_or_empty(tags: &HashMap<String, String>, key: &str) -> String {
    tag(tags, key).to_string()
}

/// `display-name` falling back to `login`; both resolve to empty when the
/// tags carry neither.
pub fn resolve_username(tags: &HashMap<String, String>) -> (String, String) {
    let display = tag(tags, "display-name");
    let login = tag(tags, "login");

    let username = if !display.is_empty() {
        display.to_string()
    } else {
        login.to_string()
    };
    let login = if !login.is_empty() {
        login.to_string()
    } else {
        display.to_lowercase()
    };

    (username, login)
}

fn parse_badges(tags: &HashMap<String, String>) -> Vec<UserBadge> {
    tag(tags, "badges")
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let mut parts = pair.split('/');
            UserBadge {
                name: parts.next().unwrap_or("").to_string(),
                version: parts.next().unwrap_or("").to_string(),
            }
        })
        .collect()
}

/// Map a usernotice `msg-id` onto its single-segment rendering. Raids and
/// unrecognized kinds carry no textual body at all.
fn notice_segments(msg_id: &str, tags: &HashMap<String, String>, username: &str) -> Vec<MessageSegment> {
    match msg_id {
        "sub" => vec![MessageSegment::Sub(SubNotice {
            username: username.to_string(),
            sub_plan: tag_or_empty(tags, "msg-param-sub-plan"),
            cumulative_months: tag_or_empty(tags, "msg-param-cumulative-months"),
        })],
        "resub" => vec![MessageSegment::Resub(ResubNotice {
            username: username.to_string(),
            sub_plan: tag_or_empty(tags, "msg-param-sub-plan"),
            cumulative_months: tag_or_empty(tags, "msg-param-cumulative-months"),
            streak_months: tags.get("msg-param-streak-months").cloned(),
        })],
        "subgift" => vec![MessageSegment::SubGift(SubGiftNotice {
            gifter: username.to_string(),
            recipient: tag_or_empty(tags, "msg-param-recipient-display-name"),
            sub_plan: tag_or_empty(tags, "msg-param-sub-plan"),
            gift_months: tags.get("msg-param-gift-months").cloned(),
        })],
        "anongiftpaidupgrade" => vec![MessageSegment::AnonGiftPaidUpgrade(
            AnonGiftPaidUpgradeNotice {
                username: username.to_string(),
            },
        )],
        "anonsubgift" => vec![MessageSegment::AnonGift(AnonGiftNotice {
            recipient: tag_or_empty(tags, "msg-param-recipient-display-name"),
            sub_plan: tag_or_empty(tags, "msg-param-sub-plan"),
        })],
        "viewermilestone" => vec![MessageSegment::ViewerMilestone(ViewerMilestoneNotice {
            username: username.to_string(),
            category: tag_or_empty(tags, "msg-param-category"),
            value: tag_or_empty(tags, "msg-param-value"),
            reward: tag_or_empty(tags, "msg-param-copoReward"),
        })],
        // Raids have no textual body, only structured notice tags.
        "raid" => Vec::new(),
        other => {
            debug!("[Normalizer] Unhandled usernotice msg-id: {}", other);
            Vec::new()
        }
    }
}

/// Convert a raw protocol tag map into a normalized `ChatMessage`. Text-bearing
/// messages run through the resolver; usernotices dispatch on `msg-id`.
pub fn normalize(
    tags: &HashMap<String, String>,
    channel: &str,
    text: &str,
    kind: MessageKind,
    resolver: &EmoteResolver,
    emote_map: &EmoteMap,
) -> ChatMessage {
    let (username, login) = resolve_username(tags);
    let text = text.trim_end();

    let message_id = tags
        .get("id")
        .cloned()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let message_nonce = next_nonce().to_string();

    let mut userstate = tags.clone();
    userstate.insert("login".to_string(), login);

    let (segments, notice_tags, is_special_notice) = match kind {
        MessageKind::Usernotice => {
            let msg_id = tag(tags, "msg-id");
            let segments = notice_segments(msg_id, tags, &username);
            (segments, Some(tags.clone()), true)
        }
        MessageKind::Privmsg => (resolver.resolve(text, emote_map), None, false),
    };

    ChatMessage {
        id: format!("{}_{}", message_id, message_nonce),
        message_id,
        message_nonce,
        userstate,
        message: segments,
        badges: parse_badges(tags),
        channel: channel.to_string(),
        sender: username,
        parent_display_name: tags
            .get("reply-thread-parent-display-name")
            .or_else(|| tags.get("reply-parent-display-name"))
            .cloned(),
        reply_display_name: tags.get("reply-parent-display-name").cloned(),
        reply_body: tags.get("reply-parent-msg-body").cloned(),
        notice_tags,
        is_special_notice,
    }
}

/// Build a locally synthesized status line. The id embeds both the wall
/// clock and a per-process counter; the timestamp alone cannot tell two
/// system messages minted in the same millisecond apart.
pub fn create_system_message(channel: &str, text: &str) -> ChatMessage {
    let mut userstate = HashMap::new();
    userstate.insert("display-name".to_string(), "System".to_string());
    userstate.insert("login".to_string(), "system".to_string());
    userstate.insert("color".to_string(), "#808080".to_string());

    let message_nonce = next_nonce().to_string();
    let message_id = format!("system-{}-{}", now_millis(), message_nonce);

    ChatMessage {
        id: format!("{}_{}", message_id, message_nonce),
        message_id,
        message_nonce,
        userstate,
        message: vec![MessageSegment::text(text.trim_end())],
        badges: Vec::new(),
        channel: channel.to_string(),
        sender: "System".to_string(),
        parent_display_name: None,
        reply_display_name: None,
        reply_body: None,
        notice_tags: None,
        is_special_notice: false,
    }
}

/// Render a live 7TV emote-set change as a special notice line so the
/// channel sees who added or removed what.
pub fn create_seventv_update_message(
    channel: &str,
    event: &crate::services::seventv_ws::EmoteSetEvent,
) -> ChatMessage {
    use crate::models::message::{StvEmoteAddedNotice, StvEmoteRemovedNotice};
    use crate::services::seventv_ws::EmoteSetEvent;

    let segment = match event {
        EmoteSetEvent::Added { emote, actor } => {
            MessageSegment::StvEmoteAdded(StvEmoteAddedNotice {
                emote: emote.clone(),
                actor: actor.clone(),
            })
        }
        EmoteSetEvent::Removed { id, name, actor } => {
            MessageSegment::StvEmoteRemoved(StvEmoteRemovedNotice {
                id: id.clone(),
                name: name.clone(),
                actor: actor.clone(),
            })
        }
    };

    let mut message = create_system_message(channel, "");
    message.message = vec![segment];
    message.is_special_notice = true;
    message
}
