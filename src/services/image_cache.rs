use anyhow::{Context, Result};
use futures::future::join_all;
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const BATCH_SIZE: usize = 6;
const BATCH_PAUSE_MS: u64 = 100;
const DOWNLOAD_TIMEOUT_SECS: u64 = 10;

/// Local storage collaborator keyed by asset URL.
pub trait ImageStore: Send + Sync + 'static {
    fn contains(&self, url: &str) -> bool;
    fn store(&self, url: &str, bytes: &[u8]) -> Result<()>;
}

/// Writes each asset under the cache dir, named by a stable hash of its URL.
pub struct FsImageStore {
    dir: PathBuf,
}

impl FsImageStore {
    pub fn new() -> Result<Self> {
        let dir = dirs::cache_dir()
            .context("No cache directory available")?
            .join("chatpipe")
            .join("images");
        std::fs::create_dir_all(&dir).context("Failed to create image cache directory")?;
        Ok(Self { dir })
    }

    fn path_for(&self, url: &str) -> PathBuf {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        self.dir.join(format!("{:016x}", hasher.finish()))
    }
}

impl ImageStore for FsImageStore {
    fn contains(&self, url: &str) -> bool {
        self.path_for(url).exists()
    }

    fn store(&self, url: &str, bytes: &[u8]) -> Result<()> {
        std::fs::write(self.path_for(url), bytes).context("Failed to write cached image")
    }
}

/// Best-effort background downloader for emote and badge art. Work is
/// processed in small batches with a pause in between so a burst of a few
/// hundred URLs after a channel switch does not starve the event loop.
/// Channel switches do not cancel this queue; stale work is redundant, not
/// incorrect.
pub struct ImageCacheQueue {
    sender: mpsc::UnboundedSender<Vec<String>>,
}

impl ImageCacheQueue {
    pub fn spawn(store: Arc<dyn ImageStore>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Vec<String>>();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        tokio::spawn(async move {
            while let Some(urls) = receiver.recv().await {
                Self::process(&client, &store, urls).await;
            }
        });

        Self { sender }
    }

    pub fn enqueue(&self, urls: Vec<String>) {
        if urls.is_empty() {
            return;
        }
        let _ = self.sender.send(urls);
    }

    async fn process(client: &reqwest::Client, store: &Arc<dyn ImageStore>, urls: Vec<String>) {
        let pending: Vec<String> = urls.into_iter().filter(|u| !store.contains(u)).collect();
        if pending.is_empty() {
            return;
        }

        debug!("[ImageCache] Downloading {} assets", pending.len());

        for batch in pending.chunks(BATCH_SIZE) {
            let downloads = batch.iter().map(|url| async move {
                match Self::download(client, url).await {
                    Ok(bytes) => {
                        if let Err(e) = store.store(url, &bytes) {
                            warn!("[ImageCache] Failed to store {}: {}", url, e);
                        }
                    }
                    Err(e) => warn!("[ImageCache] Failed to download {}: {}", url, e),
                }
            });
            join_all(downloads).await;
            tokio::time::sleep(Duration::from_millis(BATCH_PAUSE_MS)).await;
        }
    }

    async fn download(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
        let response = client.get(url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("{} returned status {}", url, response.status());
        }
        Ok(response.bytes().await?.to_vec())
    }
}
