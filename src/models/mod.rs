pub mod emote;
pub mod message;
