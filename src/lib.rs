//! Decodes Mapbox vector tiles and draws them with a cartographic style into
//! tessellated, render ready tiles.

pub mod asset;
pub mod decoder;
pub mod error;
pub mod feature;
pub mod geometry;
pub mod parameters;
pub mod proto;
pub mod reader;
pub mod style;
pub mod symbolizer;
pub mod tile;
pub mod value;

#[cfg(test)]
mod testing;

pub use asset::{AssetPackage, DirectoryAssetPackage, MemoryAssetPackage};
pub use decoder::{DecoderConfig, DecoderListener, TileDecoder};
pub use error::{DecodeError, Error, Result};
pub use feature::{Feature, TileFeature};
pub use geometry::Geometry;
pub use reader::{DEFAULT_RENDER_LAYER, RenderLayer, RenderTile, TileMap};
pub use style::{CartoCssStyleSet, Color, CompiledStyleSet, StyleSource};
pub use tile::{MAX_SUPPORTED_ZOOM_LEVEL, MapBounds, MapPos, TileId, TileTransform};
pub use value::Value;
