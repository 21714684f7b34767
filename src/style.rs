//! Style model and the loaders that build it from compiled XML documents,
//! CartoCSS project manifests and raw CartoCSS.

use std::sync::Arc;

use crate::{
    asset::AssetPackage,
    error::{Error, Result},
    parameters::ParameterTable,
};

pub mod cartocss;
pub mod color;
pub mod expression;
mod project;
mod xml;

pub use color::Color;
pub use expression::{Expression, Variables};

const XML_EXTENSION: &str = ".xml";
const PROJECT_EXTENSION: &str = ".json";

const DEFAULT_FONT_DIRECTORY: &str = "fonts";

#[derive(Debug, Clone, PartialEq)]
pub struct MapSettings {
    pub background_color: Color,
    pub background_image: Option<String>,
    pub font_directory: String,
}

impl Default for MapSettings {
    fn default() -> Self {
        MapSettings {
            background_color: Color::TRANSPARENT,
            background_image: None,
            font_directory: DEFAULT_FONT_DIRECTORY.to_string(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SymbolizerKind {
    Polygon,
    Line,
    Marker,
    Text,
    PolygonPattern,
    LinePattern,
}

impl SymbolizerKind {
    pub fn from_element(name: &str) -> Option<Self> {
        let kind = match name {
            "PolygonSymbolizer" => SymbolizerKind::Polygon,
            "LineSymbolizer" => SymbolizerKind::Line,
            "MarkersSymbolizer" | "MarkerSymbolizer" | "PointSymbolizer" => SymbolizerKind::Marker,
            "TextSymbolizer" => SymbolizerKind::Text,
            "PolygonPatternSymbolizer" => SymbolizerKind::PolygonPattern,
            "LinePatternSymbolizer" => SymbolizerKind::LinePattern,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbolizer {
    pub kind: SymbolizerKind,
    pub properties: Vec<(String, Expression)>,
}

impl Symbolizer {
    pub fn new(kind: SymbolizerKind) -> Self {
        Symbolizer {
            kind,
            properties: Vec::new(),
        }
    }

    /// Sets a property, replacing an earlier value of the same name.
    pub fn set<S: Into<String>>(&mut self, name: S, value: Expression) {
        let name = name.into();
        match self.properties.iter_mut().find(|(n, _)| *n == name) {
            Some(prop) => prop.1 = value,
            None => self.properties.push((name, value)),
        }
    }

    pub fn property(&self, name: &str) -> Option<&Expression> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rule {
    pub filter: Expression,
    /// Inclusive zoom range.
    pub min_zoom: Option<u8>,
    pub max_zoom: Option<u8>,
    pub symbolizers: Vec<Symbolizer>,
}

impl Rule {
    pub fn zoom_matches(&self, zoom: u8) -> bool {
        self.min_zoom.is_none_or(|min| zoom >= min) && self.max_zoom.is_none_or(|max| zoom <= max)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StyleLayer {
    /// Tile layer the rules apply to, `None` applies them to every layer.
    pub name: Option<String>,
    pub rules: Vec<Rule>,
}

impl StyleLayer {
    pub fn matches_layer(&self, name: &str) -> bool {
        self.name.as_deref().is_none_or(|n| n == name)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StyleModel {
    pub layers: Vec<StyleLayer>,
    pub parameters: ParameterTable,
    pub settings: MapSettings,
}

/// A style packaged as assets, either a compiled XML document or a CartoCSS
/// project manifest.
#[derive(Clone)]
pub struct CompiledStyleSet {
    asset_package: Arc<dyn AssetPackage>,
    style_asset_name: String,
}

impl CompiledStyleSet {
    /// Uses the first root level `.xml` or `.json` asset of the package.
    pub fn new(asset_package: Arc<dyn AssetPackage>) -> Self {
        let mut names: Vec<String> = asset_package
            .asset_names()
            .into_iter()
            .filter(|name| !name.contains('/'))
            .filter(|name| name.ends_with(XML_EXTENSION) || name.ends_with(PROJECT_EXTENSION))
            .collect();
        names.sort();

        let style_asset_name = names.into_iter().next().unwrap_or_default();
        Self {
            asset_package,
            style_asset_name,
        }
    }

    pub fn with_style_asset<S: Into<String>>(asset_package: Arc<dyn AssetPackage>, style_asset_name: S) -> Self {
        Self {
            asset_package,
            style_asset_name: style_asset_name.into(),
        }
    }

    pub fn asset_package(&self) -> &Arc<dyn AssetPackage> {
        &self.asset_package
    }

    pub fn style_asset_name(&self) -> &str {
        &self.style_asset_name
    }
}

impl std::fmt::Debug for CompiledStyleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledStyleSet")
            .field("style_asset_name", &self.style_asset_name)
            .finish_non_exhaustive()
    }
}

/// CartoCSS source text with an optional package for the images and fonts it
/// refers to.
#[derive(Clone)]
pub struct CartoCssStyleSet {
    cartocss: String,
    asset_package: Option<Arc<dyn AssetPackage>>,
}

impl CartoCssStyleSet {
    pub fn new<S: Into<String>>(cartocss: S) -> Self {
        Self {
            cartocss: cartocss.into(),
            asset_package: None,
        }
    }

    pub fn with_asset_package<S: Into<String>>(cartocss: S, asset_package: Arc<dyn AssetPackage>) -> Self {
        Self {
            cartocss: cartocss.into(),
            asset_package: Some(asset_package),
        }
    }

    pub fn cartocss(&self) -> &str {
        &self.cartocss
    }

    pub fn asset_package(&self) -> Option<&Arc<dyn AssetPackage>> {
        self.asset_package.as_ref()
    }
}

impl std::fmt::Debug for CartoCssStyleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartoCssStyleSet")
            .field("cartocss", &self.cartocss)
            .field("has_asset_package", &self.asset_package.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum StyleSource {
    Compiled(CompiledStyleSet),
    CartoCss(CartoCssStyleSet),
}

impl StyleSource {
    pub fn asset_package(&self) -> Option<&Arc<dyn AssetPackage>> {
        match self {
            StyleSource::Compiled(set) => Some(set.asset_package()),
            StyleSource::CartoCss(set) => set.asset_package(),
        }
    }

    /// Name relative assets resolve against, empty for raw CartoCSS.
    pub fn style_asset_name(&self) -> &str {
        match self {
            StyleSource::Compiled(set) => set.style_asset_name(),
            StyleSource::CartoCss(_) => "",
        }
    }
}

impl From<CompiledStyleSet> for StyleSource {
    fn from(set: CompiledStyleSet) -> Self {
        StyleSource::Compiled(set)
    }
}

impl From<CartoCssStyleSet> for StyleSource {
    fn from(set: CartoCssStyleSet) -> Self {
        StyleSource::CartoCss(set)
    }
}

pub(crate) const CARTOCSS_PARSE_FAILED: &str = "CartoCSS style parsing failed";

pub fn load_style(source: &StyleSource, ignore_cartocss_layer_names: bool) -> Result<StyleModel> {
    match source {
        StyleSource::Compiled(set) => load_compiled(set, ignore_cartocss_layer_names),
        StyleSource::CartoCss(set) => {
            let style = cartocss::compile(set.cartocss(), ignore_cartocss_layer_names)
                .map_err(|e| Error::style_parse(CARTOCSS_PARSE_FAILED, e))?;
            Ok(StyleModel {
                layers: style.layers,
                parameters: ParameterTable::new(),
                settings: style.settings,
            })
        }
    }
}

fn load_compiled(set: &CompiledStyleSet, ignore_cartocss_layer_names: bool) -> Result<StyleModel> {
    let name = set.style_asset_name();
    if name.is_empty() {
        return Err(Error::Argument("Could not find any styles in the style set".to_string()));
    }

    let Some(data) = set.asset_package().load_asset(name) else {
        return Err(Error::StyleFormat("Failed to load style description asset".to_string()));
    };

    if name.ends_with(XML_EXTENSION) {
        let text = std::str::from_utf8(&data)
            .map_err(|e| Error::style_parse(xml::XML_PARSE_FAILED, e))?;
        xml::parse(text)
    } else if name.ends_with(PROJECT_EXTENSION) {
        project::load(set.asset_package().as_ref(), name, &data, ignore_cartocss_layer_names)
            .map_err(|e| Error::style_parse(CARTOCSS_PARSE_FAILED, e))
    } else {
        Err(Error::StyleFormat("Failed to detect style asset type".to_string()))
    }
}
