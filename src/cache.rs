use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlite_cache::{Cache, CacheConfig};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CACHE_FILE: &str = "govee-lan-scenes-cache.sqlite";

/// `$GOVEE_CACHE_DIR`, falling back to the platform cache directory
pub fn default_cache_dir() -> anyhow::Result<PathBuf> {
    std::env::var("GOVEE_CACHE_DIR")
        .ok()
        .map(PathBuf::from)
        .or_else(dirs_next::cache_dir)
        .ok_or_else(|| {
            anyhow::anyhow!("failed to resolve a cache directory, please set $GOVEE_CACHE_DIR")
        })
}

pub struct CacheGetOptions<'a> {
    pub topic: &'a str,
    pub key: &'a str,
    pub ttl: Duration,
}

pub struct ResponseCache {
    cache: Cache,
}

impl ResponseCache {
    pub fn open(dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {dir:?}"))?;
        let cache_file = dir.join(CACHE_FILE);
        let conn = sqlite_cache::rusqlite::Connection::open(&cache_file)
            .with_context(|| format!("failed to open {cache_file:?}"))?;
        let cache = Cache::new(CacheConfig::default(), conn)
            .map_err(|err| anyhow::anyhow!("failed to initialize {cache_file:?}: {err:?}"))?;
        Ok(Self { cache })
    }

    /// Returns the cached value for the key, or awaits `future`
    /// and stores its result for `ttl`. Errors are not cached.
    pub async fn get<T, Fut>(&self, options: CacheGetOptions<'_>, future: Fut) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned + std::fmt::Debug,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let topic = self.cache.topic(options.topic)?;
        let (updater, current_value) = topic.get_for_update(options.key).await?;
        if let Some(current) = current_value {
            log::debug!("{}/{}: using cached value", options.topic, options.key);
            let result: T = serde_json::from_slice(&current.data)?;
            return Ok(result);
        }

        let value: T = future.await?;
        let data = serde_json::to_vec(&value)?;
        updater.write(&data, options.ttl)?;

        Ok(value)
    }
}
