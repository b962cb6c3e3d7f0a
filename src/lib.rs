//! Chat message ingestion and emote resolution pipeline for Twitch-style
//! live chat.
//!
//! Raw protocol tag maps come in through [`services::normalizer`], get
//! tokenized into typed segments by [`services::resolver`] against the
//! emote sets held by [`services::channel_cache`], and already-displayed
//! messages are re-tokenized by [`services::reprocess`] whenever the 7TV
//! event stream ([`services::seventv_ws`]) patches the active emote set.

pub mod models;
pub mod services;
pub mod utils;

pub use models::emote::{BadgeRecord, ChannelCache, EmoteProvider, EmoteRecord};
pub use models::message::{ChatMessage, MessageBuffer, MessageSegment};
pub use services::channel_cache::{
    ChannelResourceService, FsCacheStore, LoadState, LoadToken, MemoryCacheStore, TokenSlot,
};
pub use services::normalizer::{create_system_message, normalize, MessageKind};
pub use services::providers::{HttpProviders, ProviderSet};
pub use services::resolver::{find_emotes_in_text, EmoteMap, EmoteResolver};
pub use services::seventv_ws::{EmoteSetEvent, SevenTvEventStream};
