//! Fixture builders shared by the unit tests.

use std::sync::Arc;

use prost::Message;

use crate::{
    asset::{AssetPackage, MemoryAssetPackage},
    proto::{Tile, tile},
};

const MOVE_TO: u32 = 1;
const LINE_TO: u32 = 2;
const CLOSE_PATH: u32 = 7;

fn zigzag(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

/// Encodes absolute integer coordinates into a vector tile command stream.
pub struct GeometryEncoder {
    buf: Vec<u32>,
    prev: [i32; 2],
}

impl GeometryEncoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            prev: [0, 0],
        }
    }

    pub fn into_vec(self) -> Vec<u32> {
        self.buf
    }

    fn delta(&mut self, [x, y]: [i32; 2]) -> [u32; 2] {
        let d = [zigzag(x - self.prev[0]), zigzag(y - self.prev[1])];
        self.prev = [x, y];
        d
    }

    pub fn add_points(&mut self, points: impl IntoIterator<Item = [i32; 2]>) {
        let points: Vec<_> = points.into_iter().collect();
        self.buf.push(MOVE_TO | (points.len() as u32) << 3);
        for p in points {
            let d = self.delta(p);
            self.buf.extend(d);
        }
    }

    pub fn add_linestring(&mut self, points: impl IntoIterator<Item = [i32; 2]>) {
        self.add_path(points, false)
    }

    pub fn add_ring(&mut self, points: impl IntoIterator<Item = [i32; 2]>) {
        self.add_path(points, true)
    }

    fn add_path(&mut self, points: impl IntoIterator<Item = [i32; 2]>, close: bool) {
        let mut points = points.into_iter();
        let Some(first) = points.next() else {
            return;
        };
        self.buf.push(MOVE_TO | 1 << 3);
        let d = self.delta(first);
        self.buf.extend(d);

        let rest: Vec<_> = points.collect();
        self.buf.push(LINE_TO | (rest.len() as u32) << 3);
        for p in rest {
            let d = self.delta(p);
            self.buf.extend(d);
        }

        if close {
            self.buf.push(CLOSE_PATH | 1 << 3);
        }
    }
}

/// Builds a single layer of an encoded tile.
pub struct LayerBuilder {
    layer: tile::Layer,
}

impl LayerBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            layer: tile::Layer {
                version: 2,
                name: name.to_string(),
                features: Vec::new(),
                keys: Vec::new(),
                values: Vec::new(),
                extent: Some(4096),
            },
        }
    }

    pub fn feature(
        mut self,
        id: u64,
        kind: tile::GeomType,
        geometry: GeometryEncoder,
        tags: &[(&str, tile::Value)],
    ) -> Self {
        let mut indices = Vec::new();
        for (key, value) in tags {
            let key_idx = match self.layer.keys.iter().position(|k| k == key.as_bytes()) {
                Some(idx) => idx,
                None => {
                    self.layer.keys.push(key.as_bytes().to_vec());
                    self.layer.keys.len() - 1
                }
            };
            self.layer.values.push(value.clone());
            indices.push(key_idx as u32);
            indices.push((self.layer.values.len() - 1) as u32);
        }

        self.layer.features.push(tile::Feature {
            id: Some(id),
            tags: indices,
            r#type: Some(kind as i32),
            geometry: geometry.into_vec(),
        });
        self
    }

    pub fn build(self) -> tile::Layer {
        self.layer
    }
}

pub fn string(s: &str) -> tile::Value {
    tile::Value {
        string_value: Some(s.as_bytes().to_vec()),
        ..Default::default()
    }
}

pub fn int(n: i64) -> tile::Value {
    tile::Value {
        int_value: Some(n),
        ..Default::default()
    }
}

pub fn encode(layers: Vec<tile::Layer>) -> Arc<[u8]> {
    Tile { layers }.encode_to_vec().into()
}

pub fn square(min: i32, max: i32) -> GeometryEncoder {
    let mut encoder = GeometryEncoder::new();
    encoder.add_ring([[min, min], [max, min], [max, max], [min, max]]);
    encoder
}

pub fn points(points: &[[i32; 2]]) -> GeometryEncoder {
    let mut encoder = GeometryEncoder::new();
    encoder.add_points(points.iter().copied());
    encoder
}

pub fn line(points: &[[i32; 2]]) -> GeometryEncoder {
    let mut encoder = GeometryEncoder::new();
    encoder.add_linestring(points.iter().copied());
    encoder
}

/// A tile with a `water` polygon layer, a `roads` line layer and a `places`
/// point layer.
pub fn sample_tile() -> Arc<[u8]> {
    encode(vec![
        LayerBuilder::new("water")
            .feature(1, tile::GeomType::Polygon, square(0, 1024), &[("class", string("ocean"))])
            .feature(2, tile::GeomType::Polygon, square(2048, 4096), &[("class", string("lake"))])
            .build(),
        LayerBuilder::new("roads")
            .feature(
                10,
                tile::GeomType::Linestring,
                line(&[[0, 512], [1024, 512]]),
                &[("class", string("primary")), ("lanes", int(2))],
            )
            .build(),
        LayerBuilder::new("places")
            .feature(
                20,
                tile::GeomType::Point,
                points(&[[512, 512]]),
                &[("name", string("Harbor"))],
            )
            .feature(
                21,
                tile::GeomType::Point,
                points(&[[100, 100], [200, 200]]),
                &[("name", string("Twins"))],
            )
            .build(),
    ])
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("png encoding");
    bytes.into_inner()
}

pub fn package(assets: &[(&str, &[u8])]) -> Arc<dyn AssetPackage> {
    let mut package = MemoryAssetPackage::new();
    for (name, data) in assets {
        package.insert(*name, data.to_vec());
    }
    Arc::new(package)
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
