use lyon::math::{Point, Transform, point, vector};

/// Highest zoom level the decoder accepts tiles for.
pub const MAX_SUPPORTED_ZOOM_LEVEL: u8 = 24;

/// Slippy map tile address, rows grow southwards.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TileId {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileId {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        TileId { zoom, x, y }
    }

    pub fn is_valid(&self) -> bool {
        self.zoom <= MAX_SUPPORTED_ZOOM_LEVEL && self.x < self.limit() && self.y < self.limit()
    }

    pub fn parent(&self) -> Option<Self> {
        if self.zoom == 0 {
            None
        } else {
            Some(TileId {
                zoom: self.zoom - 1,
                x: self.x / 2,
                y: self.y / 2,
            })
        }
    }

    /// Walks up `levels` zoom levels, `None` past the root tile.
    pub fn ancestor(&self, levels: u8) -> Option<Self> {
        let zoom = self.zoom.checked_sub(levels)?;
        Some(TileId {
            zoom,
            x: self.x >> levels,
            y: self.y >> levels,
        })
    }

    pub fn zoom(&self) -> f32 {
        self.zoom as f32
    }

    pub fn limit(&self) -> u32 {
        1u32 << self.zoom
    }

    /// Identifier unique across all zoom levels: the tile count of every lower
    /// zoom level followed by the row major index within this one.
    pub fn global_id(&self) -> u64 {
        let zoom = self.zoom as u32;
        let lower_levels = ((1u64 << (2 * zoom)) - 1) / 3;
        lower_levels + (self.y as u64) * (1u64 << zoom) + self.x as u64
    }
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

impl std::str::FromStr for TileId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let mut next = |name: &str| {
            parts
                .next()
                .ok_or_else(|| format!("missing {name} in tile id '{s}'"))
        };
        let zoom = next("zoom")?;
        let x = next("x")?;
        let y = next("y")?;

        let tile = TileId {
            zoom: zoom.parse().map_err(|e| format!("invalid zoom '{zoom}': {e}"))?,
            x: x.parse().map_err(|e| format!("invalid x '{x}': {e}"))?,
            y: y.parse().map_err(|e| format!("invalid y '{y}': {e}"))?,
        };

        if tile.is_valid() {
            Ok(tile)
        } else {
            Err(format!("tile id '{s}' is out of range"))
        }
    }
}

/// Position in the caller's map or tile space, y grows upwards.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct MapPos {
    pub x: f64,
    pub y: f64,
}

impl MapPos {
    pub fn new(x: f64, y: f64) -> Self {
        MapPos { x, y }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MapBounds {
    pub min: MapPos,
    pub max: MapPos,
}

impl MapBounds {
    pub fn new(min: MapPos, max: MapPos) -> Self {
        MapBounds { min, max }
    }

    pub fn delta(&self) -> MapPos {
        MapPos::new(self.max.x - self.min.x, self.max.y - self.min.y)
    }

    /// Maps a normalized tile position onto these bounds. Tile space grows
    /// downwards, so the y axis is flipped.
    pub fn to_map(&self, p: Point) -> MapPos {
        let delta = self.delta();
        MapPos::new(
            self.min.x + p.x as f64 * delta.x,
            self.max.y - p.y as f64 * delta.y,
        )
    }
}

/// Affine mapping from the normalized space of a source tile into the
/// normalized space of the tile being drawn.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TileTransform {
    transform: Transform,
}

impl Default for TileTransform {
    fn default() -> Self {
        Self {
            transform: Transform::identity(),
        }
    }
}

impl TileTransform {
    pub fn between(source: TileId, target: TileId) -> Self {
        if target.zoom >= source.zoom {
            Self::descend(source, target)
        } else {
            // target is coarser than source, invert the child to parent mapping
            let inverse = Self::descend(target, source).transform.inverse();
            Self {
                transform: inverse.unwrap_or_else(Transform::identity),
            }
        }
    }

    fn descend(source: TileId, target: TileId) -> Self {
        let delta = (target.zoom - source.zoom) as i32;
        let scale = 2f32.powi(delta);
        let offset_x = target.x as f32 - source.x as f32 * scale;
        let offset_y = target.y as f32 - source.y as f32 * scale;

        Self {
            transform: Transform::scale(scale, scale).then_translate(vector(-offset_x, -offset_y)),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.transform == Transform::identity()
    }

    pub fn scale(&self) -> f32 {
        self.transform.m11
    }

    pub fn apply(&self, p: Point) -> Point {
        self.transform.transform_point(p)
    }

    pub fn apply_xy(&self, x: f32, y: f32) -> Point {
        self.apply(point(x, y))
    }
}
