pub mod channel_cache;
pub mod image_cache;
pub mod normalizer;
pub mod providers;
pub mod reprocess;
pub mod resolver;
pub mod seventv_ws;
