//! Rendering resources derived from a style: bitmaps, fonts, dash patterns
//! and glyphs, plus the per tile settings.

use std::sync::Arc;

use crate::{
    asset::{self, AssetPackage},
    parameters::ParameterValues,
    style::StyleModel,
};

pub mod bitmap;
pub mod font;
pub mod glyph;
pub mod stroke;

pub use bitmap::{Bitmap, BitmapCache, BitmapPattern};
pub use font::{FontId, FontRegistry};
pub use glyph::{GlyphAtlas, GlyphId};
pub use stroke::{StrokeAtlas, StrokeId};

/// Tile edge length in pixels that symbolizer sizes refer to.
pub const DEFAULT_TILE_SIZE: u32 = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub tile_size: u32,
    pub parameters: Arc<ParameterValues>,
}

#[derive(Clone)]
pub struct SymbolizerContext {
    pub bitmaps: Arc<BitmapCache>,
    pub fonts: Arc<FontRegistry>,
    pub strokes: Arc<StrokeAtlas>,
    pub glyphs: Arc<GlyphAtlas>,
    pub settings: Settings,
    pub background_pattern: Option<Arc<BitmapPattern>>,
}

impl SymbolizerContext {
    pub fn build(
        style: &StyleModel,
        parameters: Arc<ParameterValues>,
        style_asset_name: &str,
        package: Option<Arc<dyn AssetPackage>>,
    ) -> Self {
        let base_path = asset::file_path(style_asset_name);

        let fonts = match package.as_deref() {
            Some(package) => {
                let prefix = asset::normalize_path(&format!(
                    "{base_path}{}/",
                    style.settings.font_directory
                ));
                FontRegistry::from_package(package, &prefix)
            }
            None => FontRegistry::new(),
        };

        let bitmaps = Arc::new(BitmapCache::new(package, base_path));
        let background_pattern = style
            .settings
            .background_image
            .as_deref()
            .and_then(|image| bitmaps.load_pattern(image, 1.0, 1.0));

        SymbolizerContext {
            bitmaps,
            fonts: Arc::new(fonts),
            strokes: Arc::new(StrokeAtlas::new()),
            glyphs: Arc::new(GlyphAtlas::new()),
            settings: Settings {
                tile_size: DEFAULT_TILE_SIZE,
                parameters,
            },
            background_pattern,
        }
    }

    /// Same caches, new parameter values.
    pub fn with_parameters(&self, parameters: Arc<ParameterValues>) -> Self {
        SymbolizerContext {
            settings: Settings {
                tile_size: self.settings.tile_size,
                parameters,
            },
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{style::MapSettings, testing};

    fn style(font_directory: &str, background_image: Option<&str>) -> StyleModel {
        StyleModel {
            settings: MapSettings {
                font_directory: font_directory.to_string(),
                background_image: background_image.map(String::from),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn fonts_resolve_against_style_directory() {
        let package = testing::package(&[
            ("styles/style.xml", b"<Map/>"),
            ("fonts/NotoSans-Bold.ttf", notosans::BOLD_TTF),
            ("styles/fonts/NotoSans-Italic.ttf", notosans::ITALIC_TTF),
            ("styles/fonts/NotoSans-Regular.ttf", notosans::REGULAR_TTF),
        ]);

        let context = SymbolizerContext::build(
            &style("../fonts", None),
            Default::default(),
            "styles/style.xml",
            Some(package.clone()),
        );
        assert_eq!(context.fonts.len(), 1);

        let context = SymbolizerContext::build(&style("fonts", None), Default::default(), "styles/style.xml", Some(package));
        assert_eq!(context.fonts.len(), 2);
        assert_eq!(context.settings.tile_size, DEFAULT_TILE_SIZE);
    }

    #[test]
    fn no_package_means_no_fonts() {
        let context = SymbolizerContext::build(&style("fonts", Some("paper.png")), Default::default(), "", None);
        assert!(context.fonts.is_empty());
        assert!(context.background_pattern.is_none());
    }

    #[test]
    fn background_pattern_is_loaded_eagerly() {
        let png = testing::png(8, 8);
        let package = testing::package(&[("styles/img/paper.png", png.as_slice())]);
        let context = SymbolizerContext::build(
            &style("fonts", Some("img/paper.png")),
            Default::default(),
            "styles/project.json",
            Some(package),
        );

        assert_eq!(context.bitmaps.len(), 1);
        let pattern = context.background_pattern.as_ref().unwrap();
        assert_eq!((pattern.width_scale, pattern.height_scale), (1.0, 1.0));
        assert_eq!(pattern.bitmap.width, 8);
    }

    #[test]
    fn parameter_updates_share_caches() {
        let context = SymbolizerContext::build(&StyleModel::default(), Default::default(), "", None);
        let values = Arc::new(ParameterValues::default().with_value("x", crate::Value::Integer(1)));
        let updated = context.with_parameters(values.clone());

        assert!(Arc::ptr_eq(&context.bitmaps, &updated.bitmaps));
        assert!(Arc::ptr_eq(&context.fonts, &updated.fonts));
        assert!(Arc::ptr_eq(&context.strokes, &updated.strokes));
        assert!(Arc::ptr_eq(&context.glyphs, &updated.glyphs));
        assert!(Arc::ptr_eq(&updated.settings.parameters, &values));
        assert!(context.settings.parameters.is_empty());
    }
}
