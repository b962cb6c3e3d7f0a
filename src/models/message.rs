use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::emote::{EmoteProvider, EmoteRecord};

/// A chat badge as carried on the IRC `badges` tag, e.g. `moderator/1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserBadge {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubNotice {
    pub username: String,
    pub sub_plan: String,
    pub cumulative_months: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResubNotice {
    pub username: String,
    pub sub_plan: String,
    pub cumulative_months: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streak_months: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubGiftNotice {
    pub gifter: String,
    pub recipient: String,
    pub sub_plan: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gift_months: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonGiftPaidUpgradeNotice {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonGiftNotice {
    pub recipient: String,
    pub sub_plan: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaidNotice {
    pub raider: String,
    pub viewer_count: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerMilestoneNotice {
    pub username: String,
    pub category: String,
    pub value: String,
    pub reward: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StvEmoteAddedNotice {
    pub emote: EmoteRecord,
    pub actor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StvEmoteRemovedNotice {
    pub id: String,
    pub name: String,
    pub actor: String,
}

/// One typed segment of a rendered message. Concatenating the textual
/// representation of every segment reproduces the input text, modulo
/// emote-name aliasing (see `reprocess::segments_to_text`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageSegment {
    Text {
        content: String,
    },
    Emote {
        content: String,
        name: String,
        id: String,
        url: String,
        site: EmoteProvider,
        original_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        creator: Option<String>,
    },
    Mention {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
    Sub(SubNotice),
    Resub(ResubNotice),
    SubGift(SubGiftNotice),
    AnonGiftPaidUpgrade(AnonGiftPaidUpgradeNotice),
    AnonGift(AnonGiftNotice),
    Raid(RaidNotice),
    ViewerMilestone(ViewerMilestoneNotice),
    #[serde(rename = "stv_emote_added")]
    StvEmoteAdded(StvEmoteAddedNotice),
    #[serde(rename = "stv_emote_removed")]
    StvEmoteRemoved(StvEmoteRemovedNotice),
}

impl MessageSegment {
    pub fn text(content: impl Into<String>) -> Self {
        MessageSegment::Text { content: content.into() }
    }

    pub fn emote_from_record(token: &str, record: &EmoteRecord) -> Self {
        MessageSegment::Emote {
            content: token.to_string(),
            name: record.name.clone(),
            id: record.id.clone(),
            url: record.url.clone(),
            site: record.site.clone(),
            original_name: record.original_name.clone(),
            width: record.width,
            height: record.height,
            creator: record.creator.clone(),
        }
    }
}

/// A normalized chat message. Created by the normalizer; only the `message`
/// segment list is ever mutated afterwards (by the reprocessing pass).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub message_id: String,
    pub message_nonce: String,
    pub userstate: HashMap<String, String>,
    pub message: Vec<MessageSegment>,
    pub badges: Vec<UserBadge>,
    pub channel: String,
    pub sender: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice_tags: Option<HashMap<String, String>>,
    #[serde(default)]
    pub is_special_notice: bool,
}

impl ChatMessage {
    /// Reply affordances are suppressed for notices, synthetic System lines
    /// and anything without a resolved username.
    pub fn can_reply(&self) -> bool {
        !self.is_special_notice
            && !self.sender.eq_ignore_ascii_case("system")
            && !self.sender.is_empty()
    }
}

/// Ordered, size-capped message buffer. Overflow trims the oldest 20% in
/// one drain so eviction cost is amortized instead of per-message.
#[derive(Debug)]
pub struct MessageBuffer {
    messages: Vec<ChatMessage>,
    max_size: usize,
}

impl MessageBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            messages: Vec::with_capacity(max_size),
            max_size: max_size.max(1),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        if self.messages.len() > self.max_size {
            let trim = (self.max_size / 5).max(1);
            self.messages.drain(0..trim);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ChatMessage> {
        self.messages.iter_mut()
    }
}
