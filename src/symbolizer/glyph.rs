use std::sync::Arc;

use ahash::AHashMap as HashMap;
use fontdue::Metrics;
use parking_lot::Mutex;

use super::font::{FontId, FontRegistry};

/// Width and height of the glyph atlas in pixels.
pub const GLYPHMAP_SIZE: u32 = 2048;

const GLYPH_PADDING: u32 = 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GlyphId(pub FontId, pub char);

impl GlyphId {
    pub fn with_size(&self, size: f32) -> GlyphKey {
        GlyphKey(*self, size.floor() as i32)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GlyphKey(GlyphId, i32);

/// A rasterized glyph and its place in the atlas.
#[derive(Debug, Clone)]
pub struct AtlasEntry {
    pub offset: [u32; 2],
    pub dimensions: [u32; 2],
    pub metrics: Metrics,
    pub coverage: Vec<u8>,
}

impl AtlasEntry {
    pub fn uv(&self) -> [[f32; 2]; 2] {
        let size = GLYPHMAP_SIZE as f32;
        let min = [self.offset[0] as f32 / size, self.offset[1] as f32 / size];
        let max = [
            (self.offset[0] + self.dimensions[0]) as f32 / size,
            (self.offset[1] + self.dimensions[1]) as f32 / size,
        ];
        [min, max]
    }
}

struct GlyphAtlasState {
    cursor: [u32; 2],
    row_height: u32,
    entries: HashMap<GlyphKey, Arc<AtlasEntry>>,
    full: bool,
}

/// Shelf packed atlas of every glyph the labels of a style have used.
pub struct GlyphAtlas {
    state: Mutex<GlyphAtlasState>,
}

impl GlyphAtlas {
    pub fn new() -> Self {
        GlyphAtlas {
            state: Mutex::new(GlyphAtlasState {
                cursor: [0, 0],
                row_height: 0,
                entries: HashMap::new(),
                full: false,
            }),
        }
    }

    /// Rasterizes and places a glyph unless it is already in the atlas.
    pub fn prepare(&self, fonts: &FontRegistry, text_size: f32, glyph_id: GlyphId) -> Option<Arc<AtlasEntry>> {
        let glyph_key = glyph_id.with_size(text_size);

        if let Some(entry) = self.state.lock().entries.get(&glyph_key) {
            return Some(entry.clone());
        }

        let GlyphId(font_id, glyph) = glyph_id;
        let font = fonts.font_id(font_id)?;
        let size = text_size.floor().max(1.0);
        if !size.is_finite() {
            return None;
        }

        // Glyphs that can never fit are rejected before their bitmap is allocated.
        let bounds = font.metrics(glyph, size);
        let limit = (GLYPHMAP_SIZE - GLYPH_PADDING) as usize;
        if bounds.width > limit || bounds.height > limit {
            log::debug!("glyph '{glyph}' at size {size} does not fit the atlas");
            return None;
        }
        let (metrics, coverage) = font.rasterize(glyph, size);

        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get(&glyph_key) {
            return Some(entry.clone());
        }

        let width = metrics.width as u32 + GLYPH_PADDING;
        let height = metrics.height as u32 + GLYPH_PADDING;

        if state.cursor[0] + width > GLYPHMAP_SIZE {
            state.cursor = [0, state.cursor[1] + state.row_height];
            state.row_height = 0;
        }

        if state.cursor[1] + height > GLYPHMAP_SIZE || width > GLYPHMAP_SIZE {
            if !state.full {
                log::warn!("glyph atlas is full");
                state.full = true;
            }
            return None;
        }

        let entry = Arc::new(AtlasEntry {
            offset: state.cursor,
            dimensions: [metrics.width as u32, metrics.height as u32],
            metrics,
            coverage,
        });

        state.cursor[0] += width;
        state.row_height = state.row_height.max(height);
        state.entries.insert(glyph_key, entry.clone());

        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for GlyphAtlas {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_glyphs_once_per_size() {
        let fonts = FontRegistry::new();
        let atlas = GlyphAtlas::new();

        let a = atlas.prepare(&fonts, 16.0, GlyphId(FontId::FALLBACK, 'A')).unwrap();
        let b = atlas.prepare(&fonts, 16.0, GlyphId(FontId::FALLBACK, 'B')).unwrap();
        assert_eq!(a.offset, [0, 0]);
        assert_eq!(b.offset[0], a.dimensions[0] + GLYPH_PADDING);
        assert_eq!(a.coverage.len(), (a.dimensions[0] * a.dimensions[1]) as usize);

        let again = atlas.prepare(&fonts, 16.4, GlyphId(FontId::FALLBACK, 'A')).unwrap();
        assert!(Arc::ptr_eq(&a, &again));

        atlas.prepare(&fonts, 24.0, GlyphId(FontId::FALLBACK, 'A')).unwrap();
        assert_eq!(atlas.len(), 3);
    }

    #[test]
    fn wraps_rows_and_reports_full() {
        let fonts = FontRegistry::new();
        let atlas = GlyphAtlas::new();

        let mut last_row = 0;
        let mut placed = 0;
        for c in ('A'..='Z').chain('a'..='z') {
            let Some(entry) = atlas.prepare(&fonts, 600.0, GlyphId(FontId::FALLBACK, c)) else {
                break;
            };
            assert!(entry.offset[1] >= last_row);
            last_row = entry.offset[1];
            placed += 1;
        }

        assert!(last_row > 0);
        assert!(placed < 52);
    }

    #[test]
    fn oversized_glyphs_are_rejected() {
        let fonts = FontRegistry::new();
        let atlas = GlyphAtlas::new();

        assert!(atlas.prepare(&fonts, 200000.0, GlyphId(FontId::FALLBACK, 'W')).is_none());
        assert!(atlas.prepare(&fonts, f32::INFINITY, GlyphId(FontId::FALLBACK, 'W')).is_none());
        assert!(atlas.is_empty());

        atlas.prepare(&fonts, 16.0, GlyphId(FontId::FALLBACK, 'W')).unwrap();
        assert_eq!(atlas.len(), 1);
    }

    #[test]
    fn uv_covers_entry() {
        let fonts = FontRegistry::new();
        let atlas = GlyphAtlas::new();
        atlas.prepare(&fonts, 12.0, GlyphId(FontId::FALLBACK, 'x')).unwrap();
        let entry = atlas.prepare(&fonts, 12.0, GlyphId(FontId::FALLBACK, 'y')).unwrap();

        let [min, max] = entry.uv();
        assert!(min[0] > 0.0 && min[1] == 0.0);
        assert!(max[0] > min[0] && max[1] > min[1]);
        assert!(max[0] <= 1.0 && max[1] <= 1.0);
    }
}
