use lazy_static::lazy_static;
use lru::LruCache;
use regex::Regex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use crate::models::emote::{ChannelCache, EmoteRecord};
use crate::models::message::MessageSegment;

const RESOLVE_CACHE_SIZE: usize = 512;

lazy_static! {
    // Pictographic runs, including ZWJ sequences and variation selectors,
    // are segmented as their own unit regardless of the emote map.
    static ref EMOJI_RUN: Regex =
        Regex::new(r"[\p{Extended_Pictographic}\u{200D}\u{FE0F}]+").unwrap();
}

/// Merged emote lookup across the three priority tiers. Personal beats
/// channel beats global; inside a tier the first registered name wins, so
/// the provider concatenation order (7TV, Twitch, FFZ, BTTV) is load-bearing.
#[derive(Debug, Clone, Default)]
pub struct EmoteMap {
    by_name: HashMap<String, EmoteRecord>,
    folded: HashMap<String, String>,
    fingerprint: String,
}

impl EmoteMap {
    pub fn build(
        personal: &[EmoteRecord],
        channel_tiers: [&[EmoteRecord]; 4],
        global_tiers: [&[EmoteRecord]; 4],
    ) -> Self {
        let mut map = EmoteMap::default();

        let mut fingerprint_parts: Vec<String> = Vec::with_capacity(9);
        fingerprint_parts.push(Self::list_fingerprint(personal));

        map.register_tier(personal);
        for tier in channel_tiers {
            fingerprint_parts.push(Self::list_fingerprint(tier));
            map.register_tier(tier);
        }
        for tier in global_tiers {
            fingerprint_parts.push(Self::list_fingerprint(tier));
            map.register_tier(tier);
        }

        map.fingerprint = fingerprint_parts.join("|");
        map
    }

    /// Build from a channel cache snapshot in the canonical provider order.
    pub fn from_cache(cache: &ChannelCache, personal: &[EmoteRecord]) -> Self {
        Self::build(
            personal,
            [
                &cache.seventv_channel_emotes,
                &cache.twitch_channel_emotes,
                &cache.ffz_channel_emotes,
                &cache.bttv_channel_emotes,
            ],
            [
                &cache.seventv_global_emotes,
                &cache.twitch_global_emotes,
                &cache.ffz_global_emotes,
                &cache.bttv_global_emotes,
            ],
        )
    }

    fn register_tier(&mut self, records: &[EmoteRecord]) {
        for record in records {
            // Records without an id are dropped from consideration.
            if record.id.is_empty() || record.name.is_empty() {
                continue;
            }
            self.by_name
                .entry(record.name.clone())
                .or_insert_with(|| record.clone());
            self.folded
                .entry(record.name.to_lowercase())
                .or_insert_with(|| record.name.clone());
        }
    }

    fn list_fingerprint(records: &[EmoteRecord]) -> String {
        match (records.first(), records.last()) {
            (Some(first), Some(last)) => {
                format!("{}:{}:{}", records.len(), first.id, last.id)
            }
            _ => "0".to_string(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&EmoteRecord> {
        self.by_name.get(name)
    }

    /// Case-insensitive fallback used only when the exact lookup misses.
    pub fn get_folded(&self, name: &str) -> Option<&EmoteRecord> {
        self.folded
            .get(&name.to_lowercase())
            .and_then(|canonical| self.by_name.get(canonical))
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Tokenizes message text into typed segments, memoizing per
/// (emote-set fingerprint, input) so buffered chat does not pay the
/// tokenization cost twice while the emote sets are unchanged.
pub struct EmoteResolver {
    cache: Mutex<LruCache<(String, String), Vec<MessageSegment>>>,
}

impl EmoteResolver {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(RESOLVE_CACHE_SIZE).unwrap(),
            )),
        }
    }

    pub fn resolve(&self, input: &str, map: &EmoteMap) -> Vec<MessageSegment> {
        let key = (map.fingerprint().to_string(), input.to_string());

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(segments) = cache.get(&key) {
                return segments.clone();
            }
        }

        let segments = tokenize(input, map);

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, segments.clone());
        }

        segments
    }
}

impl Default for EmoteResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Split `input` into whitespace runs and word tokens, then classify each
/// word token as emote, mention or literal text. Emote names only match
/// whole whitespace-delimited tokens; substrings never count.
///
/// A whitespace run is appended to the preceding text segment when there is
/// one ("Hello" + " " becomes "Hello "), but a word always opens a new
/// segment, and pictographic segments are never extended.
fn tokenize(input: &str, map: &EmoteMap) -> Vec<MessageSegment> {
    if input.is_empty() {
        return vec![MessageSegment::text("")];
    }

    let mut segments: Vec<MessageSegment> = Vec::new();
    let mut last_is_pictographic = false;

    for run in split_whitespace_runs(input) {
        match run {
            Run::Whitespace(ws) => {
                match segments.last_mut() {
                    Some(MessageSegment::Text { content }) if !last_is_pictographic => {
                        content.push_str(ws);
                    }
                    _ => {
                        segments.push(MessageSegment::text(ws));
                        last_is_pictographic = false;
                    }
                }
            }
            Run::Word(raw) => {
                // Replacement characters are dropped from the stream.
                let token: String = raw.chars().filter(|c| *c != '\u{FFFD}').collect();
                if token.is_empty() {
                    continue;
                }

                if token.len() > 1 && token.starts_with('@') {
                    segments.push(MessageSegment::Mention {
                        content: token,
                        color: None,
                    });
                    last_is_pictographic = false;
                    continue;
                }

                if let Some(record) = map.get(&token).or_else(|| map.get_folded(&token)) {
                    segments.push(MessageSegment::emote_from_record(&token, record));
                    last_is_pictographic = false;
                    continue;
                }

                last_is_pictographic = push_text_with_emoji_splits(&mut segments, &token);
            }
        }
    }

    if segments.is_empty() {
        segments.push(MessageSegment::text(""));
    }

    segments
}

enum Run<'a> {
    Whitespace(&'a str),
    Word(&'a str),
}

fn split_whitespace_runs(input: &str) -> Vec<Run<'_>> {
    let mut runs = Vec::new();
    let mut start = 0;
    let mut in_whitespace = input.chars().next().map(|c| c.is_whitespace());

    for (index, ch) in input.char_indices() {
        let ws = ch.is_whitespace();
        if Some(ws) != in_whitespace {
            let slice = &input[start..index];
            runs.push(if in_whitespace == Some(true) {
                Run::Whitespace(slice)
            } else {
                Run::Word(slice)
            });
            start = index;
            in_whitespace = Some(ws);
        }
    }

    if start < input.len() {
        let slice = &input[start..];
        runs.push(if in_whitespace == Some(true) {
            Run::Whitespace(slice)
        } else {
            Run::Word(slice)
        });
    }

    runs
}

/// Emit a word token as text, splitting pictographic runs into their own
/// segments so an emoji glued to a word never merges with it. Returns true
/// when the final emitted segment is pictographic, so the caller knows not
/// to extend it with trailing whitespace.
fn push_text_with_emoji_splits(segments: &mut Vec<MessageSegment>, token: &str) -> bool {
    let mut cursor = 0;
    let mut last_pictographic = false;

    for found in EMOJI_RUN.find_iter(token) {
        if found.start() > cursor {
            segments.push(MessageSegment::text(&token[cursor..found.start()]));
        }
        segments.push(MessageSegment::text(found.as_str()));
        last_pictographic = true;
        cursor = found.end();
    }
    if cursor < token.len() {
        segments.push(MessageSegment::text(&token[cursor..]));
        last_pictographic = false;
    }

    last_pictographic
}

#[derive(Debug, Clone)]
pub struct EmoteMatch {
    pub index: usize,
    pub length: usize,
    pub record: EmoteRecord,
}

/// Standalone substring scanner over raw text. Unlike `resolve`, matches are
/// positional rather than token-bound; when two names start at the same
/// position the longer one wins.
pub fn find_emotes_in_text(text: &str, emotes: &[EmoteRecord]) -> Vec<EmoteMatch> {
    let mut candidates: Vec<(usize, &EmoteRecord)> = Vec::new();

    for record in emotes {
        if record.name.is_empty() {
            continue;
        }
        for (index, _) in text.match_indices(&record.name) {
            candidates.push((index, record));
        }
    }

    // Position ascending, then longest name first at equal positions.
    candidates.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.name.len().cmp(&a.1.name.len())));

    let mut matches: Vec<EmoteMatch> = Vec::new();
    let mut claimed_until = 0;

    for (index, record) in candidates {
        if index < claimed_until {
            continue;
        }
        claimed_until = index + record.name.len();
        matches.push(EmoteMatch {
            index,
            length: record.name.len(),
            record: record.clone(),
        });
    }

    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::emote::EmoteProvider;

    fn emote(id: &str, name: &str) -> EmoteRecord {
        EmoteRecord::new(id, name, format!("https://x/{}", id), EmoteProvider::SevenTV)
    }

    fn map_of(channel: Vec<EmoteRecord>) -> EmoteMap {
        EmoteMap::build(&[], [&channel, &[], &[], &[]], [&[], &[], &[], &[]])
    }

    fn text_of(segments: &[MessageSegment]) -> String {
        segments
            .iter()
            .map(|s| match s {
                MessageSegment::Text { content } => content.clone(),
                MessageSegment::Emote { content, .. } => content.clone(),
                MessageSegment::Mention { content, .. } => content.clone(),
                _ => String::new(),
            })
            .collect()
    }

    #[test]
    fn test_plain_text_round_trips() {
        let map = map_of(vec![]);
        let resolver = EmoteResolver::new();
        let input = "hello  world   again";
        let segments = resolver.resolve(input, &map);
        assert!(segments
            .iter()
            .all(|s| matches!(s, MessageSegment::Text { .. })));
        assert_eq!(text_of(&segments), input);
    }

    #[test]
    fn test_empty_input_single_empty_segment() {
        let resolver = EmoteResolver::new();
        let segments = resolver.resolve("", &map_of(vec![]));
        assert_eq!(segments.len(), 1);
        assert!(matches!(&segments[0], MessageSegment::Text { content } if content.is_empty()));
    }

    #[test]
    fn test_word_boundary_no_substring_matches() {
        let map = map_of(vec![emote("1", "Pog")]);
        let resolver = EmoteResolver::new();
        let segments = resolver.resolve("Pog PogChamp Pog NotPog PogNot", &map);

        let emote_tokens: Vec<&str> = segments
            .iter()
            .filter_map(|s| match s {
                MessageSegment::Emote { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(emote_tokens, vec!["Pog", "Pog"]);

        let text_tokens: Vec<&str> = segments
            .iter()
            .filter_map(|s| match s {
                MessageSegment::Text { content } if !content.trim().is_empty() => {
                    Some(content.trim())
                }
                _ => None,
            })
            .collect();
        assert_eq!(text_tokens, vec!["PogChamp", "NotPog", "PogNot"]);
    }

    #[test]
    fn test_end_to_end_whitespace_run_boundaries() {
        let map = map_of(vec![emote("25", "Kappa")]);
        let resolver = EmoteResolver::new();
        let segments = resolver.resolve("Hello Kappa World", &map);

        assert_eq!(segments.len(), 4);
        assert!(matches!(&segments[0], MessageSegment::Text { content } if content == "Hello "));
        assert!(
            matches!(&segments[1], MessageSegment::Emote { content, url, .. } if content == "Kappa" && url == "https://x/25")
        );
        assert!(matches!(&segments[2], MessageSegment::Text { content } if content == " "));
        assert!(matches!(&segments[3], MessageSegment::Text { content } if content == "World"));
    }

    #[test]
    fn test_personal_tier_beats_channel_and_global() {
        let personal = vec![emote("personal", "Kappa")];
        let channel = vec![emote("channel", "Kappa")];
        let global = vec![emote("global", "Kappa")];
        let map = EmoteMap::build(
            &personal,
            [&channel, &[], &[], &[]],
            [&global, &[], &[], &[]],
        );

        let resolver = EmoteResolver::new();
        let segments = resolver.resolve("Kappa", &map);
        assert!(matches!(&segments[0], MessageSegment::Emote { id, .. } if id == "personal"));
    }

    #[test]
    fn test_provider_order_first_registered_wins() {
        let seventv = vec![emote("stv", "LUL")];
        let mut bttv_record = emote("bttv", "LUL");
        bttv_record.site = EmoteProvider::BTTV;
        let map = EmoteMap::build(
            &[],
            [&seventv, &[], &[], &[bttv_record]],
            [&[], &[], &[], &[]],
        );
        assert_eq!(map.get("LUL").unwrap().id, "stv");
    }

    #[test]
    fn test_case_insensitive_fallback() {
        let map = map_of(vec![emote("1", "Kappa")]);
        let resolver = EmoteResolver::new();
        let segments = resolver.resolve("kappa", &map);
        assert!(matches!(&segments[0], MessageSegment::Emote { name, .. } if name == "Kappa"));
    }

    #[test]
    fn test_mention_segment() {
        let resolver = EmoteResolver::new();
        let segments = resolver.resolve("hi @streamer hi", &map_of(vec![]));
        assert!(segments.iter().any(
            |s| matches!(s, MessageSegment::Mention { content, .. } if content == "@streamer")
        ));
    }

    #[test]
    fn test_replacement_char_filtered() {
        let resolver = EmoteResolver::new();
        let segments = resolver.resolve("ab\u{FFFD}cd \u{FFFD}", &map_of(vec![]));
        assert_eq!(text_of(&segments), "abcd ");
    }

    #[test]
    fn test_emoji_split_from_adjacent_text() {
        let resolver = EmoteResolver::new();
        let segments = resolver.resolve("hi🔥there", &map_of(vec![]));
        let contents: Vec<String> = segments
            .iter()
            .map(|s| match s {
                MessageSegment::Text { content } => content.clone(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(contents, vec!["hi", "🔥", "there"]);
    }

    #[test]
    fn test_cache_invalidated_by_fingerprint_change() {
        let resolver = EmoteResolver::new();
        let empty = map_of(vec![]);
        let first = resolver.resolve("Kappa", &empty);
        assert!(matches!(&first[0], MessageSegment::Text { .. }));

        // Same input, new emote set: the stale cached answer must not leak.
        let with_emote = map_of(vec![emote("25", "Kappa")]);
        let second = resolver.resolve("Kappa", &with_emote);
        assert!(matches!(&second[0], MessageSegment::Emote { .. }));
    }

    #[test]
    fn test_find_emotes_longest_match_first() {
        let emotes = vec![emote("1", "Kappa"), emote("2", "KappaHD")];
        let matches = find_emotes_in_text("KappaHD hello Kappa", &emotes);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].record.name, "KappaHD");
        assert_eq!(matches[0].index, 0);
        assert_eq!(matches[1].record.name, "Kappa");
        assert_eq!(matches[1].index, 14);
    }

    #[test]
    fn test_resolution_ignores_unrelated_emote_sets() {
        let resolver = EmoteResolver::new();
        let input = "just some words";
        let empty = resolver.resolve(input, &map_of(vec![]));
        let loaded = resolver.resolve(input, &map_of(vec![emote("1", "Pog")]));
        assert_eq!(text_of(&empty), input);
        assert_eq!(text_of(&loaded), input);
        assert_eq!(empty.len(), loaded.len());
    }
}
