use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;

use crate::models::emote::{unix_now, ChannelCache, EmoteRecord};
use crate::services::image_cache::ImageCacheQueue;
use crate::services::providers::ProviderSet;

pub const DEFAULT_CHANNEL_CAP: usize = 10;
const EMOTE_SET_ID_TIMEOUT_SECS: u64 = 10;

/// Global load cursor. `Loading` reverts to `Idle` on cancellation; `Error`
/// is reserved for orchestration failures, not individual provider misses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Idle,
    Loading,
    Completed,
    Error,
}

/// Issues cooperative cancellation tokens. Issuing a new token bumps the
/// shared generation, which invalidates every token issued before it.
#[derive(Debug, Default, Clone)]
pub struct TokenSlot {
    generation: Arc<AtomicU64>,
}

impl TokenSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> LoadToken {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        LoadToken {
            slot: Arc::clone(&self.generation),
            generation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadToken {
    slot: Arc<AtomicU64>,
    generation: u64,
}

impl LoadToken {
    pub fn is_valid(&self) -> bool {
        self.slot.load(Ordering::SeqCst) == self.generation
    }
}

/// Key-value persistence collaborator for the bounded channel cache.
pub trait CacheStore: Send + Sync + 'static {
    fn load(&self, channel_id: &str) -> Result<Option<ChannelCache>>;
    fn save(&self, cache: &ChannelCache) -> Result<()>;
    fn remove(&self, channel_id: &str) -> Result<()>;
    fn channel_ids(&self) -> Result<Vec<String>>;
}

/// One JSON file per channel under the platform cache dir.
pub struct FsCacheStore {
    dir: PathBuf,
}

impl FsCacheStore {
    pub fn new() -> Result<Self> {
        let dir = dirs::cache_dir()
            .context("No cache directory available")?
            .join("chatpipe")
            .join("channels");
        std::fs::create_dir_all(&dir).context("Failed to create channel cache directory")?;
        Ok(Self { dir })
    }

    fn path_for(&self, channel_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", channel_id))
    }
}

impl CacheStore for FsCacheStore {
    fn load(&self, channel_id: &str) -> Result<Option<ChannelCache>> {
        let path = self.path_for(channel_id);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path).context("Failed to read channel cache file")?;
        Ok(serde_json::from_str(&json).ok())
    }

    fn save(&self, cache: &ChannelCache) -> Result<()> {
        let json = serde_json::to_string(cache)?;
        std::fs::write(self.path_for(&cache.channel_id), json)
            .context("Failed to write channel cache file")
    }

    fn remove(&self, channel_id: &str) -> Result<()> {
        let path = self.path_for(channel_id);
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove channel cache file")?;
        }
        Ok(())
    }

    fn channel_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir).context("Failed to list channel cache dir")? {
            let entry = entry?;
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        Ok(ids)
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: std::sync::Mutex<HashMap<String, ChannelCache>>,
}

impl CacheStore for MemoryCacheStore {
    fn load(&self, channel_id: &str) -> Result<Option<ChannelCache>> {
        Ok(self.entries.lock().unwrap().get(channel_id).cloned())
    }

    fn save(&self, cache: &ChannelCache) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(cache.channel_id.clone(), cache.clone());
        Ok(())
    }

    fn remove(&self, channel_id: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(channel_id);
        Ok(())
    }

    fn channel_ids(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().unwrap().keys().cloned().collect())
    }
}

struct LoadCursor {
    state: LoadState,
    current_channel_id: Option<String>,
    // Generation of the load that last wrote the cursor. A superseded load
    // waking up late must not clobber what a newer load already committed.
    generation: u64,
}

/// Orchestrates per-channel emote/badge loading: concurrent provider
/// fan-out, fault-tolerant merging, bounded persistence, and cooperative
/// cancellation so a fast channel switch never commits stale data.
pub struct ChannelResourceService<P: ProviderSet, S: CacheStore> {
    providers: Arc<P>,
    store: Arc<S>,
    cursor: RwLock<LoadCursor>,
    entries: RwLock<HashMap<String, Arc<ChannelCache>>>,
    tokens: TokenSlot,
    channel_cap: usize,
    image_queue: Option<ImageCacheQueue>,
}

impl<P: ProviderSet, S: CacheStore> ChannelResourceService<P, S> {
    pub fn new(providers: P, store: S, image_queue: Option<ImageCacheQueue>) -> Arc<Self> {
        Arc::new(Self {
            providers: Arc::new(providers),
            store: Arc::new(store),
            cursor: RwLock::new(LoadCursor {
                state: LoadState::Idle,
                current_channel_id: None,
                generation: 0,
            }),
            entries: RwLock::new(HashMap::new()),
            tokens: TokenSlot::new(),
            channel_cap: DEFAULT_CHANNEL_CAP,
            image_queue,
        })
    }

    /// Issue a fresh load token, invalidating any in-flight load.
    pub fn issue_token(&self) -> LoadToken {
        self.tokens.issue()
    }

    pub async fn load_state(&self) -> LoadState {
        self.cursor.read().await.state
    }

    pub async fn current_channel_id(&self) -> Option<String> {
        self.cursor.read().await.current_channel_id.clone()
    }

    async fn set_state_for(&self, token: &LoadToken, state: LoadState) {
        let mut cursor = self.cursor.write().await;
        if token.generation >= cursor.generation {
            cursor.generation = token.generation;
            cursor.state = state;
        }
    }

    /// Revert `Loading` back to `Idle` on the abort path, but only if this
    /// load still owns the cursor; a newer load's state stays untouched.
    async fn revert_to_idle(&self, token: &LoadToken) {
        let mut cursor = self.cursor.write().await;
        if cursor.generation == token.generation && cursor.state == LoadState::Loading {
            cursor.state = LoadState::Idle;
        }
    }

    async fn commit_current(&self, channel_id: &str, token: &LoadToken) {
        let mut cursor = self.cursor.write().await;
        if token.generation >= cursor.generation {
            cursor.generation = token.generation;
            cursor.state = LoadState::Completed;
            cursor.current_channel_id = Some(channel_id.to_string());
        }
    }

    async fn cached_entry(&self, channel_id: &str) -> Option<Arc<ChannelCache>> {
        if let Some(entry) = self.entries.read().await.get(channel_id) {
            return Some(Arc::clone(entry));
        }
        match self.store.load(channel_id) {
            Ok(Some(entry)) => {
                let entry = Arc::new(entry);
                self.entries
                    .write()
                    .await
                    .insert(channel_id.to_string(), Arc::clone(&entry));
                Some(entry)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("[ChannelCache] Failed to read persisted entry: {}", e);
                None
            }
        }
    }

    /// Load every emote and badge set for a channel. Returns false without
    /// touching any state when the token is invalidated; individual provider
    /// failures degrade to empty lists rather than failing the load.
    pub async fn load_channel_resources(
        self: &Arc<Self>,
        channel_id: &str,
        force_refresh: bool,
        token: &LoadToken,
    ) -> Result<bool> {
        // Checkpoint 1: on entry.
        if !token.is_valid() {
            return Ok(false);
        }

        self.set_state_for(token, LoadState::Loading).await;

        if !force_refresh {
            if let Some(entry) = self.cached_entry(channel_id).await {
                if entry.is_valid() {
                    info!(
                        "[ChannelCache] Cache hit for {} ({} emotes)",
                        channel_id,
                        entry.total_emote_count()
                    );
                    self.commit_current(channel_id, token).await;

                    if entry.seventv_emote_set_id.is_none() {
                        self.spawn_emote_set_id_backfill(channel_id.to_string());
                    }
                    return Ok(true);
                }
            }
        }

        info!("[ChannelCache] Loading resources for channel {}", channel_id);

        let emote_set_id = self.fetch_emote_set_id(channel_id).await;

        // Checkpoint 2: after the emote-set-id fetch.
        if !token.is_valid() {
            debug!("[ChannelCache] Load for {} cancelled after set-id fetch", channel_id);
            self.revert_to_idle(token).await;
            return Ok(false);
        }

        let entry = match self.fetch_all(channel_id, &emote_set_id).await {
            Ok(entry) => entry,
            Err(e) => {
                self.set_state_for(token, LoadState::Error).await;
                return Err(e);
            }
        };

        // Checkpoint 3: after the parallel fetch combinator.
        if !token.is_valid() {
            debug!("[ChannelCache] Load for {} cancelled before commit", channel_id);
            self.revert_to_idle(token).await;
            return Ok(false);
        }

        let asset_urls = entry.all_asset_urls();
        if let Err(e) = self.commit_entry(entry).await {
            self.set_state_for(token, LoadState::Error).await;
            return Err(e);
        }
        self.commit_current(channel_id, token).await;

        if let Some(queue) = &self.image_queue {
            queue.enqueue(asset_urls);
        }

        Ok(true)
    }

    async fn fetch_emote_set_id(&self, channel_id: &str) -> String {
        match timeout(
            Duration::from_secs(EMOTE_SET_ID_TIMEOUT_SECS),
            self.providers.seventv_emote_set_id(channel_id),
        )
        .await
        {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                warn!("[ChannelCache] 7TV emote-set-id fetch failed: {}", e);
                "global".to_string()
            }
            Err(_) => {
                warn!("[ChannelCache] 7TV emote-set-id fetch timed out");
                "global".to_string()
            }
        }
    }

    /// Concurrent fan-out across all providers. Each leg absorbs its own
    /// failure so partial data is preferred over no data.
    async fn fetch_all(&self, channel_id: &str, emote_set_id: &str) -> Result<ChannelCache> {
        async fn leg<T>(
            name: &str,
            fut: impl std::future::Future<Output = Result<Vec<T>>>,
        ) -> Vec<T> {
            match fut.await {
                Ok(items) => items,
                Err(e) => {
                    warn!("[ChannelCache] {} fetch failed: {}", name, e);
                    Vec::new()
                }
            }
        }

        let p = &self.providers;
        let (
            seventv_channel_emotes,
            seventv_global_emotes,
            twitch_channel_emotes,
            twitch_global_emotes,
            bttv_channel_emotes,
            bttv_global_emotes,
            ffz_channel_emotes,
            ffz_global_emotes,
            twitch_channel_badges,
            twitch_global_badges,
            ffz_channel_badges,
            ffz_global_badges,
            chatterino_badges,
        ) = tokio::join!(
            leg("7TV channel emotes", p.seventv_channel_emotes(emote_set_id)),
            leg("7TV global emotes", p.seventv_global_emotes()),
            leg("Twitch channel emotes", p.twitch_channel_emotes(channel_id)),
            leg("Twitch global emotes", p.twitch_global_emotes()),
            leg("BTTV channel emotes", p.bttv_channel_emotes(channel_id)),
            leg("BTTV global emotes", p.bttv_global_emotes()),
            leg("FFZ channel emotes", p.ffz_channel_emotes(channel_id)),
            leg("FFZ global emotes", p.ffz_global_emotes()),
            leg("Twitch channel badges", p.twitch_channel_badges(channel_id)),
            leg("Twitch global badges", p.twitch_global_badges()),
            leg("FFZ channel badges", p.ffz_channel_badges(channel_id)),
            leg("FFZ global badges", p.ffz_global_badges()),
            leg("Chatterino badges", p.chatterino_badges()),
        );

        Ok(ChannelCache {
            channel_id: channel_id.to_string(),
            seventv_channel_emotes,
            seventv_global_emotes,
            twitch_channel_emotes,
            twitch_global_emotes,
            ffz_channel_emotes,
            ffz_global_emotes,
            bttv_channel_emotes,
            bttv_global_emotes,
            twitch_channel_badges,
            twitch_global_badges,
            ffz_channel_badges,
            ffz_global_badges,
            chatterino_badges,
            last_updated: unix_now(),
            seventv_emote_set_id: if emote_set_id == "global" {
                None
            } else {
                Some(emote_set_id.to_string())
            },
        })
    }

    /// Replace the channel's entry wholesale and evict beyond the cap. The
    /// current channel is exempt from eviction.
    async fn commit_entry(&self, entry: ChannelCache) -> Result<()> {
        let channel_id = entry.channel_id.clone();
        self.store.save(&entry)?;

        let mut entries = self.entries.write().await;
        entries.insert(channel_id.clone(), Arc::new(entry));

        // Eviction candidates span both the memory map and the persisted
        // store; after a restart an entry may exist only on disk.
        let mut by_age: Vec<(String, u64)> = entries
            .iter()
            .filter(|(id, _)| **id != channel_id)
            .map(|(id, e)| (id.clone(), e.last_updated))
            .collect();
        match self.store.channel_ids() {
            Ok(ids) => {
                for id in ids {
                    if id == channel_id || entries.contains_key(&id) {
                        continue;
                    }
                    let last_updated = self
                        .store
                        .load(&id)
                        .ok()
                        .flatten()
                        .map(|e| e.last_updated)
                        .unwrap_or(0);
                    by_age.push((id, last_updated));
                }
            }
            Err(e) => warn!("[ChannelCache] Failed to list persisted channels: {}", e),
        }

        let total = by_age.len() + 1;
        if total > self.channel_cap {
            by_age.sort_by_key(|(_, updated)| *updated);

            let excess = total - self.channel_cap;
            for (stale_id, _) in by_age.into_iter().take(excess) {
                entries.remove(&stale_id);
                if let Err(e) = self.store.remove(&stale_id) {
                    warn!("[ChannelCache] Failed to evict {}: {}", stale_id, e);
                }
                debug!("[ChannelCache] Evicted stale channel {}", stale_id);
            }
        }

        Ok(())
    }

    /// A valid cache entry may predate knowing its 7TV emote set id, which
    /// the live-update subscription needs. Fetch it off the hit path.
    fn spawn_emote_set_id_backfill(self: &Arc<Self>, channel_id: String) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let set_id = service.fetch_emote_set_id(&channel_id).await;
            if set_id == "global" {
                return;
            }

            let mut entries = service.entries.write().await;
            if let Some(entry) = entries.get(&channel_id) {
                let mut updated = ChannelCache::clone(entry);
                updated.seventv_emote_set_id = Some(set_id);
                if let Err(e) = service.store.save(&updated) {
                    warn!("[ChannelCache] Failed to persist set-id backfill: {}", e);
                }
                entries.insert(channel_id, Arc::new(updated));
            }
        });
    }

    /// Snapshot of the merged emote/badge lists for a channel (or the
    /// current channel when none is given).
    pub async fn get_current_emote_data(
        &self,
        channel_id: Option<&str>,
    ) -> Option<Arc<ChannelCache>> {
        let id = match channel_id {
            Some(id) => id.to_string(),
            None => self.current_channel_id().await?,
        };
        self.entries.read().await.get(&id).cloned()
    }

    pub async fn get_seventv_emote_set_id(&self, channel_id: Option<&str>) -> Option<String> {
        self.get_current_emote_data(channel_id)
            .await
            .and_then(|entry| entry.seventv_emote_set_id.clone())
    }

    /// Patch in a live 7TV emote addition without a full reload. Returns
    /// true when the entry changed (which should trigger reprocessing).
    pub async fn apply_seventv_emote_added(&self, channel_id: &str, emote: EmoteRecord) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get(channel_id) else {
            return false;
        };
        if entry
            .seventv_channel_emotes
            .iter()
            .any(|e| e.id == emote.id)
        {
            return false;
        }

        let mut updated = ChannelCache::clone(entry);
        updated.seventv_channel_emotes.push(emote);
        if let Err(e) = self.store.save(&updated) {
            warn!("[ChannelCache] Failed to persist emote addition: {}", e);
        }
        entries.insert(channel_id.to_string(), Arc::new(updated));
        true
    }

    /// Patch in a live 7TV emote removal. Returns true when the entry changed.
    pub async fn apply_seventv_emote_removed(&self, channel_id: &str, emote_id: &str) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get(channel_id) else {
            return false;
        };
        if !entry.seventv_channel_emotes.iter().any(|e| e.id == emote_id) {
            return false;
        }

        let mut updated = ChannelCache::clone(entry);
        updated.seventv_channel_emotes.retain(|e| e.id != emote_id);
        if let Err(e) = self.store.save(&updated) {
            warn!("[ChannelCache] Failed to persist emote removal: {}", e);
        }
        entries.insert(channel_id.to_string(), Arc::new(updated));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::emote::{BadgeRecord, EmoteProvider};
    use std::sync::atomic::AtomicUsize;

    struct MockProviders {
        fetch_count: AtomicUsize,
        set_id_delay_ms: u64,
        slow_channel: Option<String>,
    }

    impl MockProviders {
        fn new() -> Self {
            Self {
                fetch_count: AtomicUsize::new(0),
                set_id_delay_ms: 0,
                slow_channel: None,
            }
        }

        fn slow(delay_ms: u64) -> Self {
            Self {
                fetch_count: AtomicUsize::new(0),
                set_id_delay_ms: delay_ms,
                slow_channel: None,
            }
        }

        /// Delay only the named channel's set-id fetch so one load can be
        /// raced against a fast one on another channel.
        fn slow_for(channel_id: &str, delay_ms: u64) -> Self {
            Self {
                fetch_count: AtomicUsize::new(0),
                set_id_delay_ms: delay_ms,
                slow_channel: Some(channel_id.to_string()),
            }
        }

        fn emote(&self, id: &str, name: &str) -> Vec<EmoteRecord> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            vec![EmoteRecord::new(
                id,
                name,
                format!("https://x/{}", id),
                EmoteProvider::SevenTV,
            )]
        }
    }

    impl ProviderSet for MockProviders {
        async fn seventv_emote_set_id(&self, channel_id: &str) -> Result<String> {
            let delayed = match &self.slow_channel {
                Some(slow) => slow == channel_id,
                None => true,
            };
            if delayed && self.set_id_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.set_id_delay_ms)).await;
            }
            Ok(format!("set-{}", channel_id))
        }

        async fn seventv_channel_emotes(&self, set_id: &str) -> Result<Vec<EmoteRecord>> {
            Ok(self.emote(&format!("stv-{}", set_id), "ChannelEmote"))
        }

        async fn seventv_global_emotes(&self) -> Result<Vec<EmoteRecord>> {
            Ok(self.emote("stv-global", "GlobalEmote"))
        }

        async fn twitch_channel_emotes(&self, _: &str) -> Result<Vec<EmoteRecord>> {
            anyhow::bail!("twitch channel emotes unavailable")
        }

        async fn twitch_global_emotes(&self) -> Result<Vec<EmoteRecord>> {
            Ok(self.emote("25", "Kappa"))
        }

        async fn bttv_channel_emotes(&self, _: &str) -> Result<Vec<EmoteRecord>> {
            Ok(Vec::new())
        }

        async fn bttv_global_emotes(&self) -> Result<Vec<EmoteRecord>> {
            Ok(Vec::new())
        }

        async fn ffz_channel_emotes(&self, _: &str) -> Result<Vec<EmoteRecord>> {
            Ok(Vec::new())
        }

        async fn ffz_global_emotes(&self) -> Result<Vec<EmoteRecord>> {
            Ok(Vec::new())
        }

        async fn twitch_channel_badges(&self, _: &str) -> Result<Vec<BadgeRecord>> {
            Ok(Vec::new())
        }

        async fn twitch_global_badges(&self) -> Result<Vec<BadgeRecord>> {
            Ok(Vec::new())
        }

        async fn ffz_channel_badges(&self, _: &str) -> Result<Vec<BadgeRecord>> {
            Ok(Vec::new())
        }

        async fn ffz_global_badges(&self) -> Result<Vec<BadgeRecord>> {
            Ok(Vec::new())
        }

        async fn chatterino_badges(&self) -> Result<Vec<BadgeRecord>> {
            Ok(Vec::new())
        }
    }

    fn service(
        providers: MockProviders,
    ) -> Arc<ChannelResourceService<MockProviders, MemoryCacheStore>> {
        ChannelResourceService::new(providers, MemoryCacheStore::default(), None)
    }

    #[tokio::test]
    async fn test_load_populates_cache_despite_provider_failure() {
        let service = service(MockProviders::new());
        let token = service.issue_token();

        let loaded = service
            .load_channel_resources("chan1", false, &token)
            .await
            .unwrap();
        assert!(loaded);
        assert_eq!(service.load_state().await, LoadState::Completed);

        let entry = service.get_current_emote_data(None).await.unwrap();
        assert_eq!(entry.channel_id, "chan1");
        // The failing Twitch channel leg degraded to empty, rest landed.
        assert!(entry.twitch_channel_emotes.is_empty());
        assert_eq!(entry.seventv_channel_emotes.len(), 1);
        assert_eq!(
            entry.seventv_emote_set_id.as_deref(),
            Some("set-chan1")
        );
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let store = MemoryCacheStore::default();
        store
            .save(&ChannelCache {
                channel_id: "chan1".to_string(),
                last_updated: unix_now(),
                seventv_channel_emotes: vec![EmoteRecord::new(
                    "1",
                    "Cached",
                    "https://x/1",
                    EmoteProvider::SevenTV,
                )],
                seventv_emote_set_id: Some("set-abc".to_string()),
                ..Default::default()
            })
            .unwrap();

        let service = ChannelResourceService::new(MockProviders::new(), store, None);
        let token = service.issue_token();

        let loaded = service
            .load_channel_resources("chan1", false, &token)
            .await
            .unwrap();
        assert!(loaded);
        assert_eq!(
            service.providers.fetch_count.load(Ordering::SeqCst),
            0,
            "cache hit must not touch providers"
        );
        assert_eq!(service.current_channel_id().await.as_deref(), Some("chan1"));
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_cache_hit() {
        let service = service(MockProviders::new());
        let token = service.issue_token();
        service
            .load_channel_resources("chan1", false, &token)
            .await
            .unwrap();
        let before = service.providers.fetch_count.load(Ordering::SeqCst);

        let token = service.issue_token();
        service
            .load_channel_resources("chan1", true, &token)
            .await
            .unwrap();
        assert!(service.providers.fetch_count.load(Ordering::SeqCst) > before);
    }

    #[tokio::test]
    async fn test_cancellation_discards_stale_load() {
        let service = service(MockProviders::slow(50));
        let first_token = service.issue_token();

        let service_clone = Arc::clone(&service);
        let first = tokio::spawn(async move {
            service_clone
                .load_channel_resources("stale", false, &first_token)
                .await
        });

        // Switching channels issues a new token before the first resolves.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second_token = service.issue_token();
        let second = service
            .load_channel_resources("fresh", false, &second_token)
            .await
            .unwrap();
        assert!(second);

        let first = first.await.unwrap().unwrap();
        assert!(!first, "superseded load must report failure");
        assert!(
            service.get_current_emote_data(Some("stale")).await.is_none(),
            "stale load must not commit"
        );
        assert_eq!(service.current_channel_id().await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_stale_load_does_not_clobber_completed_state() {
        // Only the first channel's set-id fetch is slow, so the superseded
        // load wakes up after the fresh load has already committed.
        let service = service(MockProviders::slow_for("stale", 50));
        let first_token = service.issue_token();

        let service_clone = Arc::clone(&service);
        let first = tokio::spawn(async move {
            service_clone
                .load_channel_resources("stale", false, &first_token)
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let second_token = service.issue_token();
        assert!(service
            .load_channel_resources("fresh", false, &second_token)
            .await
            .unwrap());
        assert_eq!(service.load_state().await, LoadState::Completed);

        assert!(!first.await.unwrap().unwrap());
        // The cancelled load's abort path must leave the newer load's
        // committed state untouched.
        assert_eq!(service.load_state().await, LoadState::Completed);
        assert_eq!(service.current_channel_id().await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_persisted_cap_enforced_after_restart() {
        // Simulate a restart: the store already holds a full cap of
        // channels, none of which are in the fresh service's memory map.
        let store = MemoryCacheStore::default();
        for i in 0..DEFAULT_CHANNEL_CAP {
            store
                .save(&ChannelCache {
                    channel_id: format!("old{}", i),
                    last_updated: 1000 + i as u64,
                    seventv_channel_emotes: vec![EmoteRecord::new(
                        "1",
                        "Kappa",
                        "https://x/1",
                        EmoteProvider::SevenTV,
                    )],
                    ..Default::default()
                })
                .unwrap();
        }

        let service = ChannelResourceService::new(MockProviders::new(), store, None);
        let token = service.issue_token();
        service
            .load_channel_resources("brand-new", true, &token)
            .await
            .unwrap();

        let persisted = service.store.channel_ids().unwrap();
        assert_eq!(persisted.len(), DEFAULT_CHANNEL_CAP);
        assert!(persisted.contains(&"brand-new".to_string()));
        // The least-recently-updated on-disk entry is the one evicted.
        assert!(!persisted.contains(&"old0".to_string()));
    }

    #[tokio::test]
    async fn test_cache_bound_eviction_keeps_current() {
        let service = service(MockProviders::new());

        for i in 0..=DEFAULT_CHANNEL_CAP {
            let token = service.issue_token();
            service
                .load_channel_resources(&format!("chan{}", i), false, &token)
                .await
                .unwrap();
            // Distinct last_updated ordering for eviction.
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let entries = service.entries.read().await;
        assert_eq!(entries.len(), DEFAULT_CHANNEL_CAP);
        assert!(
            entries.contains_key(&format!("chan{}", DEFAULT_CHANNEL_CAP)),
            "most recent channel must survive eviction"
        );
        drop(entries);

        let persisted = service.store.channel_ids().unwrap();
        assert_eq!(persisted.len(), DEFAULT_CHANNEL_CAP);
    }

    #[tokio::test]
    async fn test_incremental_seventv_patching() {
        let service = service(MockProviders::new());
        let token = service.issue_token();
        service
            .load_channel_resources("chan1", false, &token)
            .await
            .unwrap();

        let added = service
            .apply_seventv_emote_added(
                "chan1",
                EmoteRecord::new("new", "FreshEmote", "https://x/new", EmoteProvider::SevenTV),
            )
            .await;
        assert!(added);

        // Re-adding the same emote is a no-op.
        let again = service
            .apply_seventv_emote_added(
                "chan1",
                EmoteRecord::new("new", "FreshEmote", "https://x/new", EmoteProvider::SevenTV),
            )
            .await;
        assert!(!again);

        let entry = service.get_current_emote_data(Some("chan1")).await.unwrap();
        assert!(entry
            .seventv_channel_emotes
            .iter()
            .any(|e| e.id == "new"));

        let removed = service.apply_seventv_emote_removed("chan1", "new").await;
        assert!(removed);
        assert!(!service.apply_seventv_emote_removed("chan1", "new").await);
    }

    #[test]
    fn test_token_invalidation() {
        let slot = TokenSlot::new();
        let first = slot.issue();
        assert!(first.is_valid());
        let second = slot.issue();
        assert!(!first.is_valid());
        assert!(second.is_valid());
    }
}
