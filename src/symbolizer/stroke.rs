use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

/// Rows of the stroke atlas, one per distinct dash array.
pub const STROKEMAP_SIZE: u32 = 512;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StrokeId(pub u32);

impl StrokeId {
    /// Row of the solid stroke.
    pub const SOLID: StrokeId = StrokeId(0);
}

pub type DashArray = SmallVec<[f32; 8]>;

/// A dash array rasterized into one atlas row. `length` is the pattern
/// period in pixels, the row covers exactly one period.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokePattern {
    pub dashes: DashArray,
    pub length: f32,
    pub row: Vec<u8>,
}

impl StrokePattern {
    fn new(dashes: DashArray) -> Self {
        let length: f32 = dashes.iter().sum();
        let width = STROKEMAP_SIZE as usize;

        let row = if length <= 0.0 {
            vec![255; width]
        } else {
            (0..width)
                .map(|px| {
                    let mut at = (px as f32 + 0.5) / width as f32 * length;
                    for (idx, dash) in dashes.iter().enumerate() {
                        if at < *dash {
                            return if idx % 2 == 0 { 255 } else { 0 };
                        }
                        at -= dash;
                    }
                    0
                })
                .collect()
        };

        StrokePattern { dashes, length, row }
    }
}

/// Dash patterns shared by every tile drawn with one style.
pub struct StrokeAtlas {
    patterns: Mutex<Vec<Arc<StrokePattern>>>,
}

impl StrokeAtlas {
    pub fn new() -> Self {
        StrokeAtlas {
            patterns: Mutex::new(vec![Arc::new(StrokePattern::new(DashArray::new()))]),
        }
    }

    /// Row for `dashes`, registering it on first use. `None` once every row
    /// is taken.
    pub fn register(&self, dashes: &[f32]) -> Option<StrokeId> {
        let dashes: DashArray = dashes.iter().map(|d| d.max(0.0)).collect();
        if dashes.iter().all(|d| *d == 0.0) {
            return Some(StrokeId::SOLID);
        }

        let mut patterns = self.patterns.lock();
        if let Some(idx) = patterns.iter().position(|p| p.dashes == dashes) {
            return Some(StrokeId(idx as u32));
        }

        if patterns.len() >= STROKEMAP_SIZE as usize {
            log::warn!("stroke atlas is full, drawing {dashes:?} solid");
            return None;
        }

        patterns.push(Arc::new(StrokePattern::new(dashes)));
        Some(StrokeId(patterns.len() as u32 - 1))
    }

    pub fn pattern(&self, id: StrokeId) -> Option<Arc<StrokePattern>> {
        self.patterns.lock().get(id.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.patterns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StrokeAtlas {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses `stroke-dasharray` values such as `4,2` or `4 2`.
pub fn parse_dash_array(text: &str) -> Option<DashArray> {
    let dashes = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f32>().ok())
        .collect::<Option<DashArray>>()?;

    if dashes.len() % 2 == 1 {
        // odd arrays repeat once to form dash and gap pairs
        Some(dashes.iter().chain(dashes.iter()).copied().collect())
    } else {
        Some(dashes)
    }
}
