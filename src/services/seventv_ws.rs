use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::models::emote::{EmoteProvider, EmoteRecord};

pub const EVENT_API_URL: &str = "wss://events.7tv.io/v3";

const INITIAL_RECONNECT_DELAY_SECS: u64 = 2;
const MAX_RECONNECT_DELAY_SECS: u64 = 60;
const EVENT_CHANNEL_CAPACITY: usize = 256;

// 7TV EventAPI opcodes.
const OP_DISPATCH: u64 = 0;
const OP_SUBSCRIBE: u64 = 35;

/// A live change to the subscribed 7TV emote set.
#[derive(Debug, Clone)]
pub enum EmoteSetEvent {
    Added { emote: EmoteRecord, actor: String },
    Removed { id: String, name: String, actor: String },
}

/// Owned connection to the 7TV EventAPI for one emote set. Configuration is
/// injected, the lifecycle is explicit, and consumers subscribe to a typed
/// event channel instead of registering callback slots.
pub struct SevenTvEventStream {
    url: String,
    emote_set_id: String,
    events: broadcast::Sender<EmoteSetEvent>,
    handle: Mutex<Option<JoinHandle<()>>>,
    reconnect_delay: Duration,
    max_reconnect_delay: Duration,
}

impl SevenTvEventStream {
    pub fn new(url: impl Into<String>, emote_set_id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            url: url.into(),
            emote_set_id: emote_set_id.into(),
            events,
            handle: Mutex::new(None),
            reconnect_delay: Duration::from_secs(INITIAL_RECONNECT_DELAY_SECS),
            max_reconnect_delay: Duration::from_secs(MAX_RECONNECT_DELAY_SECS),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EmoteSetEvent> {
        self.events.subscribe()
    }

    pub fn emote_set_id(&self) -> &str {
        &self.emote_set_id
    }

    /// Start the connection task. Reconnects with doubling backoff until
    /// `disconnect` is called.
    pub async fn connect(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }

        let url = self.url.clone();
        let emote_set_id = self.emote_set_id.clone();
        let events = self.events.clone();
        let initial_delay = self.reconnect_delay;
        let max_delay = self.max_reconnect_delay;

        *handle = Some(tokio::spawn(async move {
            let mut delay = initial_delay;
            loop {
                match Self::run_connection(&url, &emote_set_id, &events).await {
                    Ok(()) => {
                        info!("[7TV Events] Connection closed, reconnecting");
                        delay = initial_delay;
                    }
                    Err(e) => {
                        warn!("[7TV Events] Connection error: {}", e);
                    }
                }

                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }));

        info!(
            "[7TV Events] Subscribed to emote set {}",
            self.emote_set_id
        );
    }

    pub async fn disconnect(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
            info!("[7TV Events] Disconnected from emote set {}", self.emote_set_id);
        }
    }

    async fn run_connection(
        url: &str,
        emote_set_id: &str,
        events: &broadcast::Sender<EmoteSetEvent>,
    ) -> Result<()> {
        let (stream, _) = connect_async(url).await?;
        let (mut write, mut read) = stream.split();

        let subscribe = json!({
            "op": OP_SUBSCRIBE,
            "d": {
                "type": "emote_set.update",
                "condition": { "object_id": emote_set_id }
            }
        });
        write.send(Message::text(subscribe.to_string())).await?;

        while let Some(message) = read.next().await {
            match message? {
                Message::Text(text) => {
                    let Ok(value) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    for event in parse_dispatch(&value) {
                        let _ = events.send(event);
                    }
                }
                Message::Ping(payload) => {
                    write.send(Message::Pong(payload)).await?;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        Ok(())
    }
}

/// Decode an EventAPI dispatch frame into typed emote-set events. Non-dispatch
/// frames and unrelated event types yield nothing.
pub fn parse_dispatch(frame: &Value) -> Vec<EmoteSetEvent> {
    if frame.get("op").and_then(|v| v.as_u64()) != Some(OP_DISPATCH) {
        return Vec::new();
    }
    if frame.pointer("/d/type").and_then(|v| v.as_str()) != Some("emote_set.update") {
        return Vec::new();
    }

    let Some(body) = frame.pointer("/d/body") else {
        return Vec::new();
    };

    let actor = body
        .pointer("/actor/display_name")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut events = Vec::new();

    if let Some(pushed) = body.get("pushed").and_then(|v| v.as_array()) {
        for change in pushed {
            let Some(value) = change.get("value") else {
                continue;
            };
            if let Some(emote) = emote_from_event_value(value) {
                events.push(EmoteSetEvent::Added {
                    emote,
                    actor: actor.clone(),
                });
            }
        }
    }

    if let Some(pulled) = body.get("pulled").and_then(|v| v.as_array()) {
        for change in pulled {
            let Some(old) = change.get("old_value") else {
                continue;
            };
            let (Some(id), Some(name)) = (
                old.get("id").and_then(|v| v.as_str()),
                old.get("name").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            events.push(EmoteSetEvent::Removed {
                id: id.to_string(),
                name: name.to_string(),
                actor: actor.clone(),
            });
        }
    }

    debug!("[7TV Events] Dispatch decoded into {} events", events.len());
    events
}

fn emote_from_event_value(value: &Value) -> Option<EmoteRecord> {
    let id = value.get("id").and_then(|v| v.as_str())?;
    let name = value.get("name").and_then(|v| v.as_str())?;
    let data = value.get("data").unwrap_or(value);

    let mut record = EmoteRecord::new(
        id,
        name,
        format!("https://cdn.7tv.app/emote/{}/2x.webp", id),
        EmoteProvider::SevenTV,
    );
    record.original_name = data
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(name)
        .to_string();
    record.creator = data
        .pointer("/owner/display_name")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    record.emote_link = Some(format!("https://7tv.app/emotes/{}", id));
    record.zero_width = Some(
        (data.get("flags").and_then(|v| v.as_i64()).unwrap_or(0) & 256) == 256,
    );
    Some(record)
}
