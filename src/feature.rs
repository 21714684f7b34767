//! Parsed vector tiles and access to their features.

use std::{collections::BTreeMap, io::Read, sync::Arc};

use ahash::AHashMap as HashMap;
use bstr::{BStr, ByteSlice};
use lyon::math::Box2D;
use prost::Message;

use crate::{
    error::DecodeError,
    geometry::{Geometry, TileGeometry},
    proto::{
        Tile,
        tile::{self, GeomType},
    },
    tile::{MapBounds, TileTransform},
    value::Value,
};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const DEFAULT_EXTENT: u32 = 4096;

/// A decoded feature with its attributes and geometry in map coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Geometry,
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileFeature {
    pub id: u64,
    pub layer_name: String,
    pub feature: Feature,
}

#[derive(Debug)]
struct ParsedTile {
    tile: Tile,
    ids: HashMap<u64, (usize, usize)>,
}

/// A parsed tile, ready to hand out features. Clones share the parsed tile
/// and carry their own decode options.
#[derive(Debug, Clone)]
pub struct FeatureDecoder {
    parsed: Arc<ParsedTile>,
    transform: TileTransform,
    buffer: f32,
    global_id_override: Option<u64>,
}

impl FeatureDecoder {
    /// Parses raw or gzip compressed tile data.
    pub fn new(data: &[u8]) -> Result<Self, DecodeError> {
        let tile = if data.starts_with(&GZIP_MAGIC) {
            let mut decoder = libflate::gzip::Decoder::new(data)?;
            let mut buf = Vec::new();
            decoder.read_to_end(&mut buf)?;
            Tile::decode(buf.as_slice())?
        } else {
            Tile::decode(data)?
        };

        let mut ids = HashMap::new();
        for (layer_idx, layer) in tile.layers.iter().enumerate() {
            for (feature_idx, feature) in layer.features.iter().enumerate() {
                if let Some(id) = feature.id {
                    ids.entry(id).or_insert((layer_idx, feature_idx));
                }
            }
        }

        Ok(FeatureDecoder {
            parsed: Arc::new(ParsedTile { tile, ids }),
            transform: TileTransform::default(),
            buffer: 0.0,
            global_id_override: None,
        })
    }

    pub fn set_transform(&mut self, transform: TileTransform) {
        self.transform = transform;
    }

    /// Features are kept while their bounds reach into the tile extended by
    /// `buffer` (a fraction of the tile size) on every side.
    pub fn set_buffer(&mut self, buffer: f32) {
        self.buffer = buffer.max(0.0);
    }

    /// Reports `id` for every feature instead of the id stored in the tile.
    pub fn set_global_id_override(&mut self, id: Option<u64>) {
        self.global_id_override = id;
    }

    pub fn transform(&self) -> &TileTransform {
        &self.transform
    }

    pub fn buffer(&self) -> f32 {
        self.buffer
    }

    pub fn layers(&self) -> impl Iterator<Item = LayerView<'_>> {
        self.parsed.tile.layers.iter().map(move |layer| LayerView {
            decoder: self,
            layer,
        })
    }

    pub fn feature(&self, id: u64) -> Option<FeatureView<'_>> {
        let (layer_idx, feature_idx) = *self.parsed.ids.get(&id)?;
        let layer = self.parsed.tile.layers.get(layer_idx)?;
        Some(FeatureView {
            decoder: self,
            layer,
            feature: layer.features.get(feature_idx)?,
        })
    }

    /// Looks up a feature by id and converts it into map coordinates.
    pub fn decode_feature(&self, id: u64, bounds: &MapBounds) -> Result<Option<TileFeature>, DecodeError> {
        let Some(view) = self.feature(id) else {
            return Ok(None);
        };
        let Some(geometry) = view.geometry()? else {
            return Ok(None);
        };

        Ok(Some(TileFeature {
            id,
            layer_name: view.layer_name().to_string(),
            feature: Feature {
                geometry: geometry.to_map(bounds),
                properties: view.properties(),
            },
        }))
    }

    pub fn in_buffer(&self, bounds: &Box2D) -> bool {
        let min = -self.buffer;
        let max = 1.0 + self.buffer;
        bounds.max.x >= min && bounds.min.x <= max && bounds.max.y >= min && bounds.min.y <= max
    }
}

#[derive(Copy, Clone)]
pub struct LayerView<'a> {
    decoder: &'a FeatureDecoder,
    layer: &'a tile::Layer,
}

impl<'a> LayerView<'a> {
    pub fn name(&self) -> &'a str {
        &self.layer.name
    }

    pub fn features(&self) -> impl Iterator<Item = FeatureView<'a>> + 'a {
        let decoder = self.decoder;
        let layer = self.layer;
        layer.features.iter().map(move |feature| FeatureView {
            decoder,
            layer,
            feature,
        })
    }
}

#[derive(Copy, Clone)]
pub struct FeatureView<'a> {
    decoder: &'a FeatureDecoder,
    layer: &'a tile::Layer,
    feature: &'a tile::Feature,
}

impl<'a> FeatureView<'a> {
    pub fn key<B: AsRef<BStr>>(&self, key: B) -> Option<Value> {
        let key = key.as_ref();
        if key == "$type" || key == "mapnik::geometry_type" {
            return Some(match self.shape() {
                GeomType::Polygon => "Polygon".into(),
                GeomType::Linestring => "LineString".into(),
                GeomType::Point => "Point".into(),
                GeomType::Unknown => "Unknown".into(),
            });
        }

        for tag in self.feature.tags.chunks(2) {
            let [t_key, t_value] = tag else {
                continue;
            };

            let value = self
                .layer
                .keys
                .get(*t_key as usize)
                .filter(|k| k.as_bstr() == key)
                .and_then(|_| self.layer.values.get(*t_value as usize).map(Value::from));

            if value.is_some() {
                return value;
            }
        }

        None
    }

    pub fn shape(&self) -> GeomType {
        self.feature.r#type()
    }

    pub fn layer_name(&self) -> &'a str {
        &self.layer.name
    }

    /// Tile id of the feature, or the configured override.
    pub fn id(&self) -> u64 {
        self.decoder
            .global_id_override
            .unwrap_or_else(|| self.feature.id.unwrap_or_default())
    }

    pub fn properties(&self) -> BTreeMap<String, Value> {
        let mut properties = BTreeMap::new();
        for tag in self.feature.tags.chunks(2) {
            let [t_key, t_value] = tag else {
                continue;
            };
            let (Some(key), Some(value)) = (
                self.layer.keys.get(*t_key as usize),
                self.layer.values.get(*t_value as usize),
            ) else {
                continue;
            };
            properties
                .entry(key.to_str_lossy().into_owned())
                .or_insert_with(|| Value::from(value));
        }
        properties
    }

    /// Geometry in the target tile space, `None` for features of unknown type.
    pub fn geometry(&self) -> Result<Option<TileGeometry>, DecodeError> {
        TileGeometry::decode(
            self.shape(),
            &self.feature.geometry,
            self.layer.extent.unwrap_or(DEFAULT_EXTENT),
            &self.decoder.transform,
        )
    }
}
