//! Decoding of vector tile command streams and the geometry types handed out
//! for individually decoded features.

use lyon::math::{Box2D, Point, point};

use crate::{
    error::DecodeError,
    proto::tile::GeomType,
    tile::{MapBounds, MapPos, TileTransform},
};

/// Geometry of a decoded feature in map coordinates.
///
/// Single part inputs always produce the singular variant, two or more parts
/// produce the multi variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(MapPos),
    MultiPoint(Vec<MapPos>),
    Line(Vec<MapPos>),
    MultiLine(Vec<Vec<MapPos>>),
    /// Exterior ring followed by holes.
    Polygon(Vec<Vec<MapPos>>),
    MultiPolygon(Vec<Vec<Vec<MapPos>>>),
}

impl Geometry {
    pub fn from_points(mut points: Vec<MapPos>) -> Self {
        if points.len() == 1 {
            Geometry::Point(points.remove(0))
        } else {
            Geometry::MultiPoint(points)
        }
    }

    pub fn from_lines(mut lines: Vec<Vec<MapPos>>) -> Self {
        if lines.len() == 1 {
            Geometry::Line(lines.remove(0))
        } else {
            Geometry::MultiLine(lines)
        }
    }

    pub fn from_polygons(mut polygons: Vec<Vec<Vec<MapPos>>>) -> Self {
        if polygons.len() == 1 {
            Geometry::Polygon(polygons.remove(0))
        } else {
            Geometry::MultiPolygon(polygons)
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(
            self,
            Geometry::MultiPoint(_) | Geometry::MultiLine(_) | Geometry::MultiPolygon(_)
        )
    }
}

/// Geometry in (transformed) normalized tile space.
#[derive(Debug, Clone, PartialEq)]
pub enum TileGeometry {
    Points(Vec<Point>),
    Lines(Vec<Vec<Point>>),
    Polygons(Vec<Vec<Vec<Point>>>),
}

impl TileGeometry {
    pub fn decode(
        kind: GeomType,
        commands: &[u32],
        extent: u32,
        transform: &TileTransform,
    ) -> Result<Option<Self>, DecodeError> {
        if extent == 0 {
            return Err(DecodeError::Geometry("layer extent is zero"));
        }

        let paths = decode_paths(commands, extent as f32, transform)?;

        let geometry = match kind {
            GeomType::Point => {
                TileGeometry::Points(paths.into_iter().flat_map(|p| p.points).collect())
            }
            GeomType::Linestring => TileGeometry::Lines(
                paths
                    .into_iter()
                    .filter(|p| p.points.len() >= 2)
                    .map(|p| p.points)
                    .collect(),
            ),
            GeomType::Polygon => TileGeometry::Polygons(group_rings(paths)),
            GeomType::Unknown => return Ok(None),
        };

        Ok(Some(geometry))
    }

    pub fn bounds(&self) -> Option<Box2D> {
        let points: Box<dyn Iterator<Item = &Point>> = match self {
            TileGeometry::Points(points) => Box::new(points.iter()),
            TileGeometry::Lines(lines) => Box::new(lines.iter().flatten()),
            TileGeometry::Polygons(polygons) => Box::new(polygons.iter().flatten().flatten()),
        };

        let mut points = points.peekable();
        points.peek()?;
        Some(Box2D::from_points(points))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TileGeometry::Points(points) => points.is_empty(),
            TileGeometry::Lines(lines) => lines.is_empty(),
            TileGeometry::Polygons(polygons) => polygons.is_empty(),
        }
    }

    pub fn to_map(&self, bounds: &MapBounds) -> Geometry {
        let ring = |ring: &Vec<Point>| ring.iter().map(|p| bounds.to_map(*p)).collect();
        match self {
            TileGeometry::Points(points) => Geometry::from_points(points.iter().map(|p| bounds.to_map(*p)).collect()),
            TileGeometry::Lines(lines) => Geometry::from_lines(lines.iter().map(ring).collect()),
            TileGeometry::Polygons(polygons) => Geometry::from_polygons(
                polygons
                    .iter()
                    .map(|rings| rings.iter().map(ring).collect())
                    .collect(),
            ),
        }
    }
}

struct Path {
    points: Vec<Point>,
    closed: bool,
}

fn decode_paths(
    commands: &[u32],
    extent: f32,
    transform: &TileTransform,
) -> Result<Vec<Path>, DecodeError> {
    let mut cursor = GeoCursor::default();
    let mut paths: Vec<Path> = Vec::new();
    let mut iter = commands.iter().copied();

    while let Some(next) = iter.next() {
        let command = GeoCommand::from(next);
        let count = next >> 3;

        match command {
            GeoCommand::MoveTo | GeoCommand::LineTo => {
                if count as usize > iter.len() / 2 {
                    return Err(DecodeError::Geometry("truncated command parameters"));
                }
                for _ in 0..count {
                    let (Some(dx), Some(dy)) = (iter.next(), iter.next()) else {
                        return Err(DecodeError::Geometry("truncated command parameters"));
                    };
                    cursor.update(dx, dy);
                    let at = transform.apply(cursor.point(extent));

                    if matches!(command, GeoCommand::MoveTo) {
                        paths.push(Path {
                            points: vec![at],
                            closed: false,
                        });
                    } else {
                        let Some(path) = paths.last_mut() else {
                            return Err(DecodeError::Geometry("line to without move to"));
                        };
                        path.points.push(at);
                    }
                }
            }
            // Repeated closes of the same path are idempotent.
            GeoCommand::ClosePath => {
                if count > 0
                    && let Some(path) = paths.last_mut()
                {
                    path.closed = true;
                }
            }
            GeoCommand::Unknown => return Err(DecodeError::Geometry("unknown command")),
        }
    }

    Ok(paths)
}

/// Exterior rings have a positive area in the y down tile space, holes attach
/// to the preceding exterior ring.
fn group_rings(paths: Vec<Path>) -> Vec<Vec<Vec<Point>>> {
    let mut polygons: Vec<Vec<Vec<Point>>> = Vec::new();

    for path in paths {
        if !path.closed || path.points.len() < 3 {
            continue;
        }

        let area = signed_area(&path.points);
        if area == 0.0 {
            continue;
        }

        match polygons.last_mut() {
            Some(rings) if area < 0.0 => rings.push(path.points),
            _ => polygons.push(vec![path.points]),
        }
    }

    polygons
}

fn signed_area(ring: &[Point]) -> f32 {
    let mut area = 0.0;
    for (i, a) in ring.iter().enumerate() {
        let b = ring[(i + 1) % ring.len()];
        area += a.x * b.y - b.x * a.y;
    }
    area / 2.0
}

enum GeoCommand {
    MoveTo,
    LineTo,
    ClosePath,
    Unknown,
}

impl From<u32> for GeoCommand {
    fn from(n: u32) -> GeoCommand {
        match n & 7 {
            1 => GeoCommand::MoveTo,
            2 => GeoCommand::LineTo,
            7 => GeoCommand::ClosePath,
            _ => GeoCommand::Unknown,
        }
    }
}

#[derive(Copy, Clone, Default)]
struct GeoCursor {
    x: i64,
    y: i64,
}

impl GeoCursor {
    fn update(&mut self, dx: u32, dy: u32) {
        let dx = dx as i64;
        let dy = dy as i64;

        let dx = (dx >> 1) ^ (-(dx & 1));
        let dy = (dy >> 1) ^ (-(dy & 1));

        self.x += dx;
        self.y += dy;
    }

    fn point(&self, extent: f32) -> Point {
        point(self.x as f32 / extent, self.y as f32 / extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::GeometryEncoder;

    fn map(x: f64, y: f64) -> MapPos {
        MapPos::new(x, y)
    }

    #[test]
    fn single_parts_collapse() {
        assert_eq!(Geometry::from_points(vec![map(1.0, 2.0)]), Geometry::Point(map(1.0, 2.0)));
        assert!(matches!(Geometry::from_lines(vec![vec![map(0.0, 0.0), map(1.0, 1.0)]]), Geometry::Line(_)));
        assert!(matches!(Geometry::from_polygons(vec![vec![vec![map(0.0, 0.0)]]]), Geometry::Polygon(_)));
    }

    #[test]
    fn two_or_more_parts_stay_multi() {
        for parts in 2..6 {
            let points = (0..parts).map(|i| map(i as f64, 0.0)).collect();
            assert!(Geometry::from_points(points).is_multi());

            let lines = (0..parts).map(|i| vec![map(i as f64, 0.0), map(i as f64, 1.0)]).collect();
            assert!(Geometry::from_lines(lines).is_multi());

            let polygons = (0..parts).map(|_| vec![vec![map(0.0, 0.0)]]).collect();
            assert!(Geometry::from_polygons(polygons).is_multi());
        }
    }

    #[test]
    fn decodes_points_relative_to_extent() {
        let mut encoder = GeometryEncoder::new();
        encoder.add_points([[1024, 1024], [3072, 2048]]);
        let geometry = TileGeometry::decode(GeomType::Point, &encoder.into_vec(), 4096, &TileTransform::default())
            .unwrap()
            .unwrap();

        assert_eq!(
            geometry,
            TileGeometry::Points(vec![point(0.25, 0.25), point(0.75, 0.5)])
        );
    }

    #[test]
    fn decodes_multiple_lines() {
        let mut encoder = GeometryEncoder::new();
        encoder.add_linestring([[0, 0], [10, 0]]);
        encoder.add_linestring([[0, 10], [10, 10], [10, 20]]);
        let geometry = TileGeometry::decode(GeomType::Linestring, &encoder.into_vec(), 20, &TileTransform::default())
            .unwrap()
            .unwrap();

        let TileGeometry::Lines(lines) = geometry else {
            panic!("expected lines");
        };
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], vec![point(0.0, 0.5), point(0.5, 0.5), point(0.5, 1.0)]);
    }

    #[test]
    fn groups_holes_with_their_exterior() {
        let mut encoder = GeometryEncoder::new();
        encoder.add_ring([[0, 0], [100, 0], [100, 100], [0, 100]]);
        encoder.add_ring([[25, 25], [25, 75], [75, 75], [75, 25]]);
        encoder.add_ring([[200, 200], [300, 200], [300, 300]]);
        let geometry = TileGeometry::decode(GeomType::Polygon, &encoder.into_vec(), 400, &TileTransform::default())
            .unwrap()
            .unwrap();

        let TileGeometry::Polygons(polygons) = geometry else {
            panic!("expected polygons");
        };
        assert_eq!(polygons.len(), 2);
        assert_eq!(polygons[0].len(), 2);
        assert_eq!(polygons[1].len(), 1);

        let bounds = MapBounds::new(map(0.0, 0.0), map(400.0, 400.0));
        assert!(matches!(TileGeometry::Polygons(polygons).to_map(&bounds), Geometry::MultiPolygon(_)));
    }

    #[test]
    fn truncated_commands_are_errors() {
        let commands = [9, 50];
        let result = TileGeometry::decode(GeomType::Point, &commands, 4096, &TileTransform::default());
        assert!(matches!(result, Err(DecodeError::Geometry(_))));
    }

    #[test]
    fn command_counts_are_bounded_by_their_parameters() {
        let mut encoder = GeometryEncoder::new();
        encoder.add_ring([[0, 0], [100, 0], [100, 100]]);
        let mut commands = encoder.into_vec();
        *commands.last_mut().unwrap() = 7 | ((1 << 29) - 1) << 3;

        let geometry = TileGeometry::decode(GeomType::Polygon, &commands, 400, &TileTransform::default())
            .unwrap()
            .unwrap();
        let TileGeometry::Polygons(polygons) = geometry else {
            panic!("expected polygons");
        };
        assert_eq!(polygons, vec![vec![vec![point(0.0, 0.0), point(0.25, 0.0), point(0.25, 0.25)]]]);

        let commands = [1 | ((1 << 29) - 1) << 3, 2, 2, 4, 4];
        let result = TileGeometry::decode(GeomType::Point, &commands, 4096, &TileTransform::default());
        assert!(matches!(result, Err(DecodeError::Geometry(_))));
    }

    #[test]
    fn transform_is_applied_while_decoding() {
        let mut encoder = GeometryEncoder::new();
        encoder.add_points([[1024, 1024]]);
        let transform = TileTransform::between(crate::TileId::new(1, 0, 0), crate::TileId::new(2, 0, 0));
        let geometry = TileGeometry::decode(GeomType::Point, &encoder.into_vec(), 4096, &transform)
            .unwrap()
            .unwrap();
        assert_eq!(geometry, TileGeometry::Points(vec![point(0.5, 0.5)]));
    }
}
