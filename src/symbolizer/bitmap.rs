use std::sync::Arc;

use ahash::AHashMap as HashMap;
use parking_lot::Mutex;

use crate::asset::{self, AssetPackage};

/// Decoded image, RGBA8 rows top to bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Bitmap {
    pub fn decode(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let image = image::load_from_memory(bytes)?.to_rgba8();
        Ok(Bitmap {
            width: image.width(),
            height: image.height(),
            data: image.into_raw(),
        })
    }
}

/// A bitmap repeated across a surface, scaled per axis.
#[derive(Debug, Clone, PartialEq)]
pub struct BitmapPattern {
    pub width_scale: f32,
    pub height_scale: f32,
    pub bitmap: Arc<Bitmap>,
}

type PatternKey = (String, u32, u32);

/// Failed loads and patterns stop being remembered past this many entries.
/// Names templated from feature attributes are unbounded.
const MAX_CACHED_ENTRIES: usize = 1024;

/// Images referenced by a style, loaded through the asset package on first
/// use. Failed loads are remembered as well, up to a limit.
pub struct BitmapCache {
    package: Option<Arc<dyn AssetPackage>>,
    base_path: String,
    bitmaps: Mutex<HashMap<String, Option<Arc<Bitmap>>>>,
    patterns: Mutex<HashMap<PatternKey, Option<Arc<BitmapPattern>>>>,
}

impl BitmapCache {
    /// `base_path` is the directory relative names resolve against.
    pub fn new(package: Option<Arc<dyn AssetPackage>>, base_path: &str) -> Self {
        BitmapCache {
            package,
            base_path: base_path.to_string(),
            bitmaps: Mutex::new(HashMap::new()),
            patterns: Mutex::new(HashMap::new()),
        }
    }

    pub fn load(&self, name: &str) -> Option<Arc<Bitmap>> {
        let path = asset::normalize_path(&format!("{}{}", self.base_path, name));
        if let Some(cached) = self.bitmaps.lock().get(&path) {
            return cached.clone();
        }

        let bitmap = self.decode(&path).map(Arc::new);
        let mut bitmaps = self.bitmaps.lock();
        if bitmap.is_some() || bitmaps.len() < MAX_CACHED_ENTRIES {
            bitmaps.insert(path, bitmap.clone());
        }
        bitmap
    }

    fn decode(&self, path: &str) -> Option<Bitmap> {
        let Some(package) = self.package.as_ref() else {
            log::warn!("no asset package to load bitmap '{path}' from");
            return None;
        };
        let Some(data) = package.load_asset(path) else {
            log::warn!("bitmap asset '{path}' not found");
            return None;
        };

        match Bitmap::decode(&data) {
            Ok(bitmap) => Some(bitmap),
            Err(e) => {
                log::error!("unable to decode bitmap '{path}': {e}");
                None
            }
        }
    }

    pub fn load_pattern(&self, name: &str, width_scale: f32, height_scale: f32) -> Option<Arc<BitmapPattern>> {
        let key = (name.to_string(), width_scale.to_bits(), height_scale.to_bits());
        if let Some(cached) = self.patterns.lock().get(&key) {
            return cached.clone();
        }

        let pattern = self.load(name).map(|bitmap| {
            Arc::new(BitmapPattern {
                width_scale,
                height_scale,
                bitmap,
            })
        });
        let mut patterns = self.patterns.lock();
        if patterns.len() < MAX_CACHED_ENTRIES {
            patterns.insert(key, pattern.clone());
        }
        pattern
    }

    /// Number of remembered lookups, hits and misses.
    pub fn len(&self) -> usize {
        self.bitmaps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn loads_relative_to_base_and_memoizes() {
        testing::init_logging();
        let png = testing::png(3, 2);
        let package = testing::package(&[("styles/img/dot.png", png.as_slice()), ("styles/img/bad.png", &b"nope"[..])]);
        let cache = BitmapCache::new(Some(package), "styles/");

        let bitmap = cache.load("img/dot.png").unwrap();
        assert_eq!((bitmap.width, bitmap.height), (3, 2));
        assert_eq!(bitmap.data.len(), 3 * 2 * 4);
        assert_eq!(&bitmap.data[..4], &[10, 20, 30, 255]);

        let again = cache.load("./img/dot.png").unwrap();
        assert!(Arc::ptr_eq(&bitmap, &again));

        assert!(cache.load("img/bad.png").is_none());
        assert!(cache.load("img/missing.png").is_none());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn failed_lookups_are_remembered_up_to_a_limit() {
        let png = testing::png(1, 1);
        let cache = BitmapCache::new(Some(testing::package(&[("dot.png", png.as_slice())])), "");

        for i in 0..MAX_CACHED_ENTRIES + 10 {
            assert!(cache.load(&format!("icon-{i}.png")).is_none());
        }
        assert_eq!(cache.len(), MAX_CACHED_ENTRIES);

        let dot = cache.load("dot.png").unwrap();
        assert_eq!(cache.len(), MAX_CACHED_ENTRIES + 1);
        assert!(Arc::ptr_eq(&dot, &cache.load("dot.png").unwrap()));
    }

    #[test]
    fn patterns_wrap_bitmaps() {
        let png = testing::png(4, 4);
        let cache = BitmapCache::new(Some(testing::package(&[("paper.png", png.as_slice())])), "");

        let pattern = cache.load_pattern("paper.png", 1.0, 1.0).unwrap();
        assert_eq!(pattern.width_scale, 1.0);
        assert_eq!(pattern.bitmap.width, 4);
        assert!(Arc::ptr_eq(&pattern, &cache.load_pattern("paper.png", 1.0, 1.0).unwrap()));
        assert!(!Arc::ptr_eq(&pattern, &cache.load_pattern("paper.png", 0.5, 1.0).unwrap()));

        let empty = BitmapCache::new(None, "");
        assert!(empty.load_pattern("paper.png", 1.0, 1.0).is_none());
    }
}
