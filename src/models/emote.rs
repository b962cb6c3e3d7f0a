use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Cache entries older than this are refetched.
pub const CACHE_MAX_AGE_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[allow(clippy::upper_case_acronyms)] // BTTV and FFZ are established acronyms (BetterTTV, FrankerFaceZ)
pub enum EmoteProvider {
    Twitch,
    BTTV,
    #[serde(rename = "7tv")]
    SevenTV,
    FFZ,
}

/// A sanitized emote record as returned by the provider fetchers. Lookup
/// identity is the exact `name`; `original_name` survives aliasing so a
/// message can be reconstructed to its canonical text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmoteRecord {
    pub id: String,
    pub name: String,
    pub original_name: String,
    pub url: String,
    pub site: EmoteProvider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emote_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zero_width: Option<bool>,
}

impl EmoteRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>, site: EmoteProvider) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            original_name: name.clone(),
            name,
            url: url.into(),
            site,
            creator: None,
            width: None,
            height: None,
            emote_link: None,
            zero_width: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeRecord {
    pub id: String,
    pub name: String,
    pub url: String,
    pub site: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Per-channel emote and badge sets, merged from every provider. Replaced
/// wholesale on refresh; only the 7TV channel list is patched in place by
/// live emote-set updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelCache {
    pub channel_id: String,

    #[serde(default)]
    pub seventv_channel_emotes: Vec<EmoteRecord>,
    #[serde(default)]
    pub seventv_global_emotes: Vec<EmoteRecord>,
    #[serde(default)]
    pub twitch_channel_emotes: Vec<EmoteRecord>,
    #[serde(default)]
    pub twitch_global_emotes: Vec<EmoteRecord>,
    #[serde(default)]
    pub ffz_channel_emotes: Vec<EmoteRecord>,
    #[serde(default)]
    pub ffz_global_emotes: Vec<EmoteRecord>,
    #[serde(default)]
    pub bttv_channel_emotes: Vec<EmoteRecord>,
    #[serde(default)]
    pub bttv_global_emotes: Vec<EmoteRecord>,

    #[serde(default)]
    pub twitch_channel_badges: Vec<BadgeRecord>,
    #[serde(default)]
    pub twitch_global_badges: Vec<BadgeRecord>,
    #[serde(default)]
    pub ffz_channel_badges: Vec<BadgeRecord>,
    #[serde(default)]
    pub ffz_global_badges: Vec<BadgeRecord>,
    #[serde(default)]
    pub chatterino_badges: Vec<BadgeRecord>,

    pub last_updated: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seventv_emote_set_id: Option<String>,
}

impl ChannelCache {
    pub fn emote_lists(&self) -> [&Vec<EmoteRecord>; 8] {
        [
            &self.seventv_channel_emotes,
            &self.seventv_global_emotes,
            &self.twitch_channel_emotes,
            &self.twitch_global_emotes,
            &self.ffz_channel_emotes,
            &self.ffz_global_emotes,
            &self.bttv_channel_emotes,
            &self.bttv_global_emotes,
        ]
    }

    pub fn is_expired(&self) -> bool {
        unix_now().saturating_sub(self.last_updated) > CACHE_MAX_AGE_SECS
    }

    /// An entry where every emote list came back empty is treated as a
    /// failed fetch, not a channel with no emotes.
    pub fn is_valid(&self) -> bool {
        !self.is_expired() && self.emote_lists().iter().any(|list| !list.is_empty())
    }

    pub fn total_emote_count(&self) -> usize {
        self.emote_lists().iter().map(|list| list.len()).sum()
    }

    pub fn all_asset_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .emote_lists()
            .iter()
            .flat_map(|list| list.iter().map(|e| e.url.clone()))
            .collect();
        for badges in [
            &self.twitch_channel_badges,
            &self.twitch_global_badges,
            &self.ffz_channel_badges,
            &self.ffz_global_badges,
            &self.chatterino_badges,
        ] {
            urls.extend(badges.iter().map(|b| b.url.clone()));
        }
        urls
    }
}
