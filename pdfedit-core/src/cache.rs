use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::annotation::AnnotationLayer;
use crate::RenderImage;

pub const DEFAULT_CACHE_CAPACITY: usize = 5;
pub const DEFAULT_CACHE_EXPIRY: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
struct CacheKey {
    page: usize,
    scale_milli: u32,
}

impl CacheKey {
    fn new(page: usize, scale: f32) -> Self {
        Self {
            page,
            scale_milli: quantize_scale(scale),
        }
    }
}

fn quantize_scale(scale: f32) -> u32 {
    let scaled = (scale * 1000.0).round();
    if !scaled.is_finite() || scaled <= 0.0 {
        1
    } else if scaled > u32::MAX as f32 {
        u32::MAX
    } else {
        scaled as u32
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub page: usize,
    pub image: RenderImage,
    pub timestamp: Instant,
    /// Insertion order; breaks ties between equal timestamps.
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    /// Pixel bytes held across all entries.
    pub bytes: usize,
}

/// Page bitmaps without annotations, bounded by count and age.
///
/// Eviction is by insertion time, not access time.
#[derive(Debug)]
pub struct RenderCache {
    capacity: usize,
    expiry: Duration,
    entries: HashMap<CacheKey, CacheEntry>,
    next_sequence: u64,
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_EXPIRY)
    }
}

impl RenderCache {
    pub fn new(capacity: usize, expiry: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            expiry,
            entries: HashMap::new(),
            next_sequence: 0,
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            bytes: self.entries.values().map(|e| e.image.pixels.len()).sum(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, page: usize, scale: f32) -> bool {
        self.entries.contains_key(&CacheKey::new(page, scale))
    }

    pub fn get(&mut self, page: usize, scale: f32) -> Option<RenderImage> {
        self.get_at(page, scale, Instant::now())
    }

    /// Expired entries are removed by the lookup that finds them.
    pub fn get_at(&mut self, page: usize, scale: f32, now: Instant) -> Option<RenderImage> {
        let key = CacheKey::new(page, scale);
        let entry = self.entries.get(&key)?;
        if now.saturating_duration_since(entry.timestamp) > self.expiry {
            debug!(page, "render cache entry expired");
            self.entries.remove(&key);
            return None;
        }
        Some(entry.image.clone())
    }

    /// Stores a render. Callers must only cache pages without annotations;
    /// see [`RenderCache::put_if_clean`].
    pub fn put(&mut self, page: usize, scale: f32, image: RenderImage) {
        self.put_at(page, scale, image, Instant::now());
    }

    pub fn put_at(&mut self, page: usize, scale: f32, image: RenderImage, now: Instant) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.insert(
            CacheKey::new(page, scale),
            CacheEntry {
                page,
                image,
                timestamp: now,
                sequence,
            },
        );
        while self.entries.len() > self.capacity {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| (entry.timestamp, entry.sequence))
                .map(|(key, _)| *key)
            else {
                break;
            };
            self.entries.remove(&oldest);
            debug!(page = oldest.page, "evicted oldest render cache entry");
        }
    }

    /// Caches the render unless `annotations` has marks on `page`. Returns
    /// whether the image was stored.
    pub fn put_if_clean(
        &mut self,
        page: usize,
        scale: f32,
        image: RenderImage,
        annotations: &AnnotationLayer,
    ) -> bool {
        if annotations.has_pending(page) {
            self.invalidate(page);
            return false;
        }
        self.put(page, scale, image);
        true
    }

    /// Drops every scale of `page`.
    pub fn invalidate(&mut self, page: usize) {
        self.entries.retain(|key, _| key.page != page);
    }

    /// Drops pages that have gained annotations since they were cached.
    pub fn retain_clean(&mut self, annotations: &AnnotationLayer) {
        self.entries
            .retain(|key, _| !annotations.has_pending(key.page));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
