//! Cache of elevation tiles keyed by (z,x,y); fetch-on-miss from an upstream source.
//!
//! Cache hierarchy: in-process LRU/TTL map -> external shared-cache hook (best-effort,
//! a backend error never fails the job) -> upstream [`TileSource`]. Concurrent misses on
//! the same key are serialized (singleflight) so at most one upstream fetch is ever in
//! flight per key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::GenericImageView;

use crate::error::MeshRfError;
use crate::tile::{decode_terrain_rgb_pixel, ElevationTile, TileKey, TILE_SIZE};

/// Tunables for the in-process tile cache, analogous to the teacher's
/// `TILE_CACHE_MAX_AGE_DAYS` / `MAX_CONCURRENT_DOWNLOADS` constants but made runtime
/// configuration rather than compile-time constants, since this crate is a library
/// embedded by a job orchestrator rather than a standalone CLI.
#[derive(Clone, Debug)]
pub struct TileCacheConfig {
    pub max_entries: usize,
    pub ttl: Duration,
    pub max_concurrent_fetches: usize,
    pub fetch_timeout: Duration,
    pub fetch_retries: u32,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 2048,
            ttl: Duration::from_secs(3600),
            max_concurrent_fetches: 8,
            fetch_timeout: Duration::from_secs(10),
            fetch_retries: 1,
        }
    }
}

/// Upstream origin of terrain-RGB tiles. Implementations decode PNG bytes into an
/// [`ElevationTile`]; a real implementation talks HTTPS, tests use a synthetic one.
pub trait TileSource: Send + Sync {
    fn fetch(&self, key: TileKey) -> Result<ElevationTile, MeshRfError>;
}

/// Fetches terrain-RGB PNGs from an HTTPS tile origin (e.g. `/{z}/{x}/{y}.png`),
/// with one retry at exponential backoff on failure.
pub struct HttpTileSource {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout: Duration,
    retries: u32,
}

impl HttpTileSource {
    pub fn new(base_url: impl Into<String>, config: &TileCacheConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self { base_url: base_url.into(), client, timeout: config.fetch_timeout, retries: config.fetch_retries }
    }

    fn url_for(&self, key: TileKey) -> String {
        self.base_url
            .replace("{z}", &key.z.to_string())
            .replace("{x}", &key.x.to_string())
            .replace("{y}", &key.y.to_string())
    }

    fn fetch_once(&self, key: TileKey) -> Result<ElevationTile, MeshRfError> {
        let url = self.url_for(key);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .map_err(|e| MeshRfError::TileFetch { key, cause: e.to_string() })?;

        let response = response
            .error_for_status()
            .map_err(|e| MeshRfError::TileFetch { key, cause: e.to_string() })?;

        let bytes = response
            .bytes()
            .map_err(|e| MeshRfError::TileFetch { key, cause: e.to_string() })?;

        decode_tile(key, &bytes)
    }
}

impl TileSource for HttpTileSource {
    fn fetch(&self, key: TileKey) -> Result<ElevationTile, MeshRfError> {
        let mut last_err = None;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                let delay_ms = 500u64 * (1 << (attempt - 1));
                std::thread::sleep(Duration::from_millis(delay_ms));
            }
            match self.fetch_once(key) {
                Ok(tile) => return Ok(tile),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(MeshRfError::TileFetch { key, cause: "unknown failure".into() }))
    }
}

fn decode_tile(key: TileKey, bytes: &[u8]) -> Result<ElevationTile, MeshRfError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| MeshRfError::TileDecode { key, cause: e.to_string() })?;
    let (width, height) = img.dimensions();
    let rgb = img.to_rgb8();
    let mut heights = Vec::with_capacity((width * height) as usize);
    for (_, _, pixel) in rgb.enumerate_pixels() {
        heights.push(decode_terrain_rgb_pixel(pixel[0], pixel[1], pixel[2]));
    }
    Ok(ElevationTile::new(key, width as usize, height as usize, heights))
}

/// A synthetic tile source for tests and the flat-terrain / single-ridge scenarios of
/// the testable-properties suite: samples an arbitrary elevation function at
/// [`TILE_SIZE`] resolution instead of decoding real imagery.
pub struct FnTileSource<F>
where
    F: Fn(f64, f64) -> f32 + Send + Sync,
{
    elevation_fn: F,
}

impl<F> FnTileSource<F>
where
    F: Fn(f64, f64) -> f32 + Send + Sync,
{
    pub fn new(elevation_fn: F) -> Self {
        Self { elevation_fn }
    }
}

impl<F> TileSource for FnTileSource<F>
where
    F: Fn(f64, f64) -> f32 + Send + Sync,
{
    fn fetch(&self, key: TileKey) -> Result<ElevationTile, MeshRfError> {
        let (north, south, east, west) = key.bounds();
        let mut heights = Vec::with_capacity(TILE_SIZE * TILE_SIZE);
        for row in 0..TILE_SIZE {
            let lat = north - (row as f64 + 0.5) / TILE_SIZE as f64 * (north - south);
            for col in 0..TILE_SIZE {
                let lon = west + (col as f64 + 0.5) / TILE_SIZE as f64 * (east - west);
                heights.push((self.elevation_fn)(lat, lon));
            }
        }
        Ok(ElevationTile::new(key, TILE_SIZE, TILE_SIZE, heights))
    }
}

/// A backend for the "external shared cache" tier (e.g. a networked key-value store).
/// Errors from this tier are never fatal: the caller falls back to the upstream source.
pub trait SharedCacheBackend: Send + Sync {
    fn get(&self, key: TileKey) -> Result<Option<ElevationTile>, String>;
    fn put(&self, key: TileKey, tile: &ElevationTile) -> Result<(), String>;
}

/// Default shared-cache backend: always misses. Stands in for a real networked cache
/// (outside this crate's scope per the orchestrator boundary in `§6`).
pub struct NoopSharedCache;

impl SharedCacheBackend for NoopSharedCache {
    fn get(&self, _key: TileKey) -> Result<Option<ElevationTile>, String> {
        Ok(None)
    }

    fn put(&self, _key: TileKey, _tile: &ElevationTile) -> Result<(), String> {
        Ok(())
    }
}

struct CacheEntry {
    tile: Arc<ElevationTile>,
    inserted_at: Instant,
    last_access: Instant,
}

/// In-process cache in front of a [`SharedCacheBackend`] and a [`TileSource`].
pub struct TileStore {
    config: TileCacheConfig,
    memory: Mutex<HashMap<TileKey, CacheEntry>>,
    in_flight: Mutex<HashMap<TileKey, Arc<Mutex<()>>>>,
    shared_cache: Box<dyn SharedCacheBackend>,
    source: Box<dyn TileSource>,
    pool: rayon::ThreadPool,
}

impl TileStore {
    pub fn new(source: Box<dyn TileSource>, config: TileCacheConfig) -> Self {
        Self::with_shared_cache(source, Box::new(NoopSharedCache), config)
    }

    pub fn with_shared_cache(
        source: Box<dyn TileSource>,
        shared_cache: Box<dyn SharedCacheBackend>,
        config: TileCacheConfig,
    ) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_concurrent_fetches.max(1))
            .build()
            .expect("failed to build tile-fetch thread pool");
        Self {
            config,
            memory: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            shared_cache,
            source,
            pool,
        }
    }

    /// Fetches one tile, consulting memory, then the shared cache, then the upstream
    /// source. Only one upstream fetch per key is ever in flight.
    pub fn get_tile(&self, key: TileKey) -> Result<Arc<ElevationTile>, MeshRfError> {
        if let Some(tile) = self.get_fresh_from_memory(key) {
            return Ok(tile);
        }

        // Singleflight: acquire (or create) this key's private lock, then re-check
        // memory inside it so only the first thread through actually fetches.
        let key_lock = {
            let mut in_flight = self.in_flight.lock().unwrap();
            Arc::clone(in_flight.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        let _guard = key_lock.lock().unwrap();

        if let Some(tile) = self.get_fresh_from_memory(key) {
            return Ok(tile);
        }

        if let Ok(Some(tile)) = self.shared_cache.get(key) {
            let tile = Arc::new(tile);
            self.insert_memory(key, Arc::clone(&tile));
            return Ok(tile);
        }

        let tile = Arc::new(self.source.fetch(key)?);
        // Shared-cache write failures are logged and otherwise ignored.
        if let Err(e) = self.shared_cache.put(key, &tile) {
            log::warn!("shared tile cache write failed for {key:?}: {e}");
        }
        self.insert_memory(key, Arc::clone(&tile));
        Ok(tile)
    }

    /// Fetches a batch of tiles, deduplicating keys and fetching concurrently up to
    /// the configured bound. Failures are collected against their key rather than
    /// aborting the whole batch; callers decide how to treat a partial failure.
    pub fn get_tiles_batch(
        &self,
        keys: &[TileKey],
    ) -> HashMap<TileKey, Result<Arc<ElevationTile>, MeshRfError>> {
        use std::collections::HashSet;
        let unique: Vec<TileKey> = keys.iter().copied().collect::<HashSet<_>>().into_iter().collect();

        let results: Vec<(TileKey, Result<Arc<ElevationTile>, MeshRfError>)> = self.pool.install(|| {
            use rayon::prelude::*;
            unique.par_iter().map(|&k| (k, self.get_tile(k))).collect()
        });

        results.into_iter().collect()
    }

    fn get_fresh_from_memory(&self, key: TileKey) -> Option<Arc<ElevationTile>> {
        let mut memory = self.memory.lock().unwrap();
        if let Some(entry) = memory.get_mut(&key) {
            if entry.inserted_at.elapsed() <= self.config.ttl {
                entry.last_access = Instant::now();
                return Some(Arc::clone(&entry.tile));
            }
            memory.remove(&key);
        }
        None
    }

    fn insert_memory(&self, key: TileKey, tile: Arc<ElevationTile>) {
        let mut memory = self.memory.lock().unwrap();
        let now = Instant::now();
        memory.insert(key, CacheEntry { tile, inserted_at: now, last_access: now });

        if memory.len() > self.config.max_entries {
            if let Some(oldest_key) =
                memory.iter().min_by_key(|(_, e)| e.last_access).map(|(k, _)| *k)
            {
                memory.remove(&oldest_key);
            }
        }
    }
}
