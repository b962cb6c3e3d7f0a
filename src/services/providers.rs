use anyhow::{anyhow, Result};
use log::warn;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use crate::models::emote::{BadgeRecord, EmoteProvider, EmoteRecord};

const TWITCH_CLIENT_ID: &str = "1qgws7yzcp21g5ledlzffw3lmqdvie";
const FETCH_TIMEOUT_SECS: u64 = 10;

/// Per-provider fetchers consumed by the load coordinator. Every method is
/// assumed fallible and latency-variable; the coordinator degrades each
/// failure to an empty list.
pub trait ProviderSet: Send + Sync + 'static {
    fn seventv_emote_set_id(
        &self,
        channel_id: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn seventv_channel_emotes(
        &self,
        emote_set_id: &str,
    ) -> impl Future<Output = Result<Vec<EmoteRecord>>> + Send;
    fn seventv_global_emotes(&self) -> impl Future<Output = Result<Vec<EmoteRecord>>> + Send;

    fn twitch_channel_emotes(
        &self,
        channel_id: &str,
    ) -> impl Future<Output = Result<Vec<EmoteRecord>>> + Send;
    fn twitch_global_emotes(&self) -> impl Future<Output = Result<Vec<EmoteRecord>>> + Send;

    fn bttv_channel_emotes(
        &self,
        channel_id: &str,
    ) -> impl Future<Output = Result<Vec<EmoteRecord>>> + Send;
    fn bttv_global_emotes(&self) -> impl Future<Output = Result<Vec<EmoteRecord>>> + Send;

    fn ffz_channel_emotes(
        &self,
        channel_id: &str,
    ) -> impl Future<Output = Result<Vec<EmoteRecord>>> + Send;
    fn ffz_global_emotes(&self) -> impl Future<Output = Result<Vec<EmoteRecord>>> + Send;

    fn twitch_channel_badges(
        &self,
        channel_id: &str,
    ) -> impl Future<Output = Result<Vec<BadgeRecord>>> + Send;
    fn twitch_global_badges(&self) -> impl Future<Output = Result<Vec<BadgeRecord>>> + Send;

    fn ffz_channel_badges(
        &self,
        channel_id: &str,
    ) -> impl Future<Output = Result<Vec<BadgeRecord>>> + Send;
    fn ffz_global_badges(&self) -> impl Future<Output = Result<Vec<BadgeRecord>>> + Send;

    fn chatterino_badges(&self) -> impl Future<Output = Result<Vec<BadgeRecord>>> + Send;
}

/// Live implementation against the real provider APIs.
pub struct HttpProviders {
    client: reqwest::Client,
    access_token: Option<String>,
}

impl HttpProviders {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
                .gzip(true)
                .build()
                .unwrap_or_default(),
            access_token,
        }
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("{} returned status {}", url, response.status()));
        }
        Ok(response.json().await?)
    }

    async fn get_helix_json(&self, url: &str) -> Result<serde_json::Value> {
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| anyhow!("No Twitch access token configured"))?;

        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Client-Id", TWITCH_CLIENT_ID)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("{} returned status {}", url, response.status()));
        }
        Ok(response.json().await?)
    }

    fn seventv_records(items: &[serde_json::Value]) -> Vec<EmoteRecord> {
        let mut records: Vec<EmoteRecord> = items
            .iter()
            .filter_map(|active| {
                let data = active.get("data").unwrap_or(active);
                let id = data
                    .get("id")
                    .or_else(|| active.get("id"))
                    .and_then(|v| v.as_str())?;
                let name = active.get("name").and_then(|v| v.as_str())?;
                let original_name = data
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or(name);
                let flags = active.get("flags").and_then(|v| v.as_i64()).unwrap_or(0);
                let creator = data
                    .pointer("/owner/display_name")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());

                let mut record = EmoteRecord::new(
                    id,
                    name,
                    format!("https://cdn.7tv.app/emote/{}/2x.webp", id),
                    EmoteProvider::SevenTV,
                );
                record.original_name = original_name.to_string();
                record.creator = creator;
                record.emote_link = Some(format!("https://7tv.app/emotes/{}", id));
                record.zero_width = Some((flags & 256) == 256);
                Some(record)
            })
            .collect();

        // Merged 7TV sets can repeat an emote; keep the first of each id.
        let mut seen = HashSet::new();
        records.retain(|record| seen.insert(record.id.clone()));
        records
    }

    fn ffz_records(json: &serde_json::Value) -> Vec<EmoteRecord> {
        let Some(sets) = json.get("sets").and_then(|v| v.as_object()) else {
            return Vec::new();
        };

        let mut records = Vec::new();
        for set_data in sets.values() {
            let Some(emoticons) = set_data.get("emoticons").and_then(|v| v.as_array()) else {
                continue;
            };
            for item in emoticons {
                let (Some(id), Some(name)) = (
                    item.get("id").and_then(|v| v.as_i64()),
                    item.get("name").and_then(|v| v.as_str()),
                ) else {
                    continue;
                };

                let default_url = format!("https://cdn.frankerfacez.com/emote/{}/1", id);
                let url = item
                    .pointer("/urls/1")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&default_url);

                let mut record =
                    EmoteRecord::new(id.to_string(), name, url, EmoteProvider::FFZ);
                record.creator = item
                    .pointer("/owner/display_name")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                record.width = item.get("width").and_then(|v| v.as_u64()).map(|w| w as u32);
                record.height = item.get("height").and_then(|v| v.as_u64()).map(|h| h as u32);
                record.emote_link = Some(format!("https://www.frankerfacez.com/emoticon/{}", id));
                records.push(record);
            }
        }
        records
    }

    fn bttv_record(item: &serde_json::Value) -> Option<EmoteRecord> {
        let id = item.get("id").and_then(|v| v.as_str())?;
        let code = item.get("code").and_then(|v| v.as_str())?;
        let image_type = item.get("imageType").and_then(|v| v.as_str());

        let mut record = EmoteRecord::new(
            id,
            code,
            format!("https://cdn.betterttv.net/emote/{}/2x", id),
            EmoteProvider::BTTV,
        );
        record.creator = item
            .pointer("/user/displayName")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        record.emote_link = Some(format!("https://betterttv.com/emotes/{}", id));
        record.zero_width = Some(image_type == Some("gif"));
        Some(record)
    }

    fn helix_badges(json: &serde_json::Value, site: &str) -> Vec<BadgeRecord> {
        let Some(sets) = json.get("data").and_then(|v| v.as_array()) else {
            return Vec::new();
        };

        let mut badges = Vec::new();
        for set in sets {
            let set_id = set.get("set_id").and_then(|v| v.as_str()).unwrap_or("");
            let Some(versions) = set.get("versions").and_then(|v| v.as_array()) else {
                continue;
            };
            for version in versions {
                let (Some(version_id), Some(url)) = (
                    version.get("id").and_then(|v| v.as_str()),
                    version.get("image_url_2x").and_then(|v| v.as_str()),
                ) else {
                    continue;
                };
                badges.push(BadgeRecord {
                    id: format!("{}/{}", set_id, version_id),
                    name: set_id.to_string(),
                    url: url.to_string(),
                    site: site.to_string(),
                    title: version
                        .get("title")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                });
            }
        }
        badges
    }
}

impl ProviderSet for HttpProviders {
    async fn seventv_emote_set_id(&self, channel_id: &str) -> Result<String> {
        let json = self
            .get_json(&format!("https://7tv.io/v3/users/twitch/{}", channel_id))
            .await?;
        json.pointer("/emote_set/id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("No 7TV emote set for channel {}", channel_id))
    }

    async fn seventv_channel_emotes(&self, emote_set_id: &str) -> Result<Vec<EmoteRecord>> {
        let json = self
            .get_json(&format!("https://7tv.io/v3/emote-sets/{}", emote_set_id))
            .await?;
        let items = json
            .get("emotes")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(Self::seventv_records(&items))
    }

    async fn seventv_global_emotes(&self) -> Result<Vec<EmoteRecord>> {
        let json = self
            .get_json("https://7tv.io/v3/emote-sets/global")
            .await?;
        let items = json
            .get("emotes")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(Self::seventv_records(&items))
    }

    async fn twitch_channel_emotes(&self, channel_id: &str) -> Result<Vec<EmoteRecord>> {
        let json = self
            .get_helix_json(&format!(
                "https://api.twitch.tv/helix/chat/emotes?broadcaster_id={}",
                channel_id
            ))
            .await?;
        Ok(Self::twitch_records(&json))
    }

    async fn twitch_global_emotes(&self) -> Result<Vec<EmoteRecord>> {
        match self
            .get_helix_json("https://api.twitch.tv/helix/chat/emotes/global")
            .await
        {
            Ok(json) => Ok(Self::twitch_records(&json)),
            Err(e) => {
                // Hardcoded globals keep basic Twitch emotes working when
                // the Helix fetch is unavailable.
                warn!("[Providers] Twitch global emotes fetch failed: {}", e);
                Ok(fallback_twitch_globals())
            }
        }
    }

    async fn bttv_channel_emotes(&self, channel_id: &str) -> Result<Vec<EmoteRecord>> {
        let json = self
            .get_json(&format!(
                "https://api.betterttv.net/3/cached/users/twitch/{}",
                channel_id
            ))
            .await?;

        let mut records = Vec::new();
        for key in ["channelEmotes", "sharedEmotes"] {
            if let Some(items) = json.get(key).and_then(|v| v.as_array()) {
                records.extend(items.iter().filter_map(Self::bttv_record));
            }
        }
        Ok(records)
    }

    async fn bttv_global_emotes(&self) -> Result<Vec<EmoteRecord>> {
        let json = self
            .get_json("https://api.betterttv.net/3/cached/emotes/global")
            .await?;
        Ok(json
            .as_array()
            .map(|items| items.iter().filter_map(Self::bttv_record).collect())
            .unwrap_or_default())
    }

    async fn ffz_channel_emotes(&self, channel_id: &str) -> Result<Vec<EmoteRecord>> {
        let json = self
            .get_json(&format!(
                "https://api.frankerfacez.com/v1/room/id/{}",
                channel_id
            ))
            .await?;
        Ok(Self::ffz_records(&json))
    }

    async fn ffz_global_emotes(&self) -> Result<Vec<EmoteRecord>> {
        let json = self
            .get_json("https://api.frankerfacez.com/v1/set/global")
            .await?;
        Ok(Self::ffz_records(&json))
    }

    async fn twitch_channel_badges(&self, channel_id: &str) -> Result<Vec<BadgeRecord>> {
        let json = self
            .get_helix_json(&format!(
                "https://api.twitch.tv/helix/chat/badges?broadcaster_id={}",
                channel_id
            ))
            .await?;
        Ok(Self::helix_badges(&json, "twitch"))
    }

    async fn twitch_global_badges(&self) -> Result<Vec<BadgeRecord>> {
        let json = self
            .get_helix_json("https://api.twitch.tv/helix/chat/badges/global")
            .await?;
        Ok(Self::helix_badges(&json, "twitch"))
    }

    async fn ffz_channel_badges(&self, channel_id: &str) -> Result<Vec<BadgeRecord>> {
        let json = self
            .get_json(&format!(
                "https://api.frankerfacez.com/v1/room/id/{}",
                channel_id
            ))
            .await?;

        // Room responses carry mod/vip badge art keyed by badge id.
        let mut badges = Vec::new();
        if let Some(urls) = json.pointer("/room/mod_urls").and_then(|v| v.as_object()) {
            if let Some(url) = urls.get("2").or_else(|| urls.get("1")).and_then(|v| v.as_str()) {
                badges.push(BadgeRecord {
                    id: "ffz-mod".to_string(),
                    name: "moderator".to_string(),
                    url: url.to_string(),
                    site: "ffz".to_string(),
                    title: Some("Moderator".to_string()),
                });
            }
        }
        if let Some(urls) = json.pointer("/room/vip_badge").and_then(|v| v.as_object()) {
            if let Some(url) = urls.get("2").or_else(|| urls.get("1")).and_then(|v| v.as_str()) {
                badges.push(BadgeRecord {
                    id: "ffz-vip".to_string(),
                    name: "vip".to_string(),
                    url: url.to_string(),
                    site: "ffz".to_string(),
                    title: Some("VIP".to_string()),
                });
            }
        }
        Ok(badges)
    }

    async fn ffz_global_badges(&self) -> Result<Vec<BadgeRecord>> {
        let json = self
            .get_json("https://api.frankerfacez.com/v1/badges/ids")
            .await?;
        let Some(items) = json.get("badges").and_then(|v| v.as_array()) else {
            return Ok(Vec::new());
        };
        Ok(items
            .iter()
            .filter_map(|badge| {
                let id = badge.get("id").and_then(|v| v.as_i64())?;
                let name = badge.get("name").and_then(|v| v.as_str())?;
                let url = badge
                    .pointer("/urls/2")
                    .or_else(|| badge.pointer("/urls/1"))
                    .and_then(|v| v.as_str())?;
                Some(BadgeRecord {
                    id: id.to_string(),
                    name: name.to_string(),
                    url: format!("https:{}", url.trim_start_matches("https:")),
                    site: "ffz".to_string(),
                    title: badge
                        .get("title")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                })
            })
            .collect())
    }

    async fn chatterino_badges(&self) -> Result<Vec<BadgeRecord>> {
        let json = self.get_json("https://api.chatterino.com/badges").await?;
        let Some(items) = json.get("badges").and_then(|v| v.as_array()) else {
            return Ok(Vec::new());
        };
        Ok(items
            .iter()
            .filter_map(|badge| {
                let tooltip = badge.get("tooltip").and_then(|v| v.as_str())?;
                let url = badge
                    .get("image2")
                    .or_else(|| badge.get("image1"))
                    .and_then(|v| v.as_str())?;
                Some(BadgeRecord {
                    id: tooltip.to_string(),
                    name: tooltip.to_string(),
                    url: url.to_string(),
                    site: "chatterino".to_string(),
                    title: Some(tooltip.to_string()),
                })
            })
            .collect())
    }
}

impl HttpProviders {
    fn twitch_records(json: &serde_json::Value) -> Vec<EmoteRecord> {
        let Some(items) = json.get("data").and_then(|v| v.as_array()) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let id = item.get("id").and_then(|v| v.as_str())?;
                let name = item.get("name").and_then(|v| v.as_str())?;
                let mut record = EmoteRecord::new(
                    id,
                    name,
                    format!(
                        "https://static-cdn.jtvnw.net/emoticons/v2/{}/default/dark/2.0",
                        id
                    ),
                    EmoteProvider::Twitch,
                );
                record.emote_link = Some(format!(
                    "https://static-cdn.jtvnw.net/emoticons/v2/{}/default/dark/3.0",
                    id
                ));
                Some(record)
            })
            .collect()
    }
}

/// Minimal always-available Twitch globals, used when Helix is unreachable.
pub fn fallback_twitch_globals() -> Vec<EmoteRecord> {
    [
        ("25", "Kappa"),
        ("354", "4Head"),
        ("425618", "LUL"),
        ("305954156", "Pog"),
        ("88", "PogChamp"),
        ("81273", "BibleThump"),
        ("81248", "Kreygasm"),
        ("81249", "ResidentSleeper"),
        ("81274", "FailFish"),
        ("81997", "NotLikeThis"),
        ("166266", "CoolCat"),
        ("196892", "SeemsGood"),
        ("245", "KappaHD"),
        ("1902", "Keepo"),
    ]
    .iter()
    .map(|(id, name)| {
        EmoteRecord::new(
            *id,
            *name,
            format!(
                "https://static-cdn.jtvnw.net/emoticons/v2/{}/default/dark/2.0",
                id
            ),
            EmoteProvider::Twitch,
        )
    })
    .collect()
}
