//! Thread safe entry point: owns the current style, its parameters and the
//! last parsed tile, and hands out render tiles and single features.

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{DecodeError, Result},
    feature::{FeatureDecoder, TileFeature},
    parameters::ParameterValues,
    reader::{DEFAULT_RENDER_LAYER, TileMap, TileReader},
    style::{Color, StyleModel, StyleSource, load_style},
    symbolizer::{BitmapPattern, SymbolizerContext},
    tile::{MAX_SUPPORTED_ZOOM_LEVEL, MapBounds, TileId, TileTransform},
};

/// Notified after every successful change of a [`TileDecoder`].
pub trait DecoderListener: Send + Sync {
    fn decoder_changed(&self);
}

/// Decoder options, usually read from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub buffer: Option<f32>,
    pub feature_id_override: Option<bool>,
    pub cartocss_layer_names_ignored: Option<bool>,
    pub layer_name_override: Option<String>,
    pub parameters: BTreeMap<String, String>,
}

impl DecoderConfig {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Style model with everything derived from it.
struct LoadedStyle {
    source: StyleSource,
    model: Arc<StyleModel>,
    parameters: Arc<ParameterValues>,
    context: Arc<SymbolizerContext>,
}

impl LoadedStyle {
    fn load(source: StyleSource, ignore_cartocss_layer_names: bool) -> Result<Self> {
        let model = load_style(&source, ignore_cartocss_layer_names)?;
        let parameters = Arc::new(model.parameters.defaults());
        let context = SymbolizerContext::build(
            &model,
            parameters.clone(),
            source.style_asset_name(),
            source.asset_package().cloned(),
        );

        log::debug!(
            "loaded style '{}' with {} layers and {} parameters",
            source.style_asset_name(),
            model.layers.len(),
            model.parameters.len()
        );

        Ok(LoadedStyle {
            source,
            model: Arc::new(model),
            parameters,
            context: Arc::new(context),
        })
    }
}

struct DecoderState {
    source: StyleSource,
    model: Arc<StyleModel>,
    parameters: Arc<ParameterValues>,
    context: Arc<SymbolizerContext>,
    /// Bumped on every style commit so that concurrent loads can detect
    /// that they compiled stale inputs.
    generation: u64,
    buffer: f32,
    feature_id_override: bool,
    cartocss_layer_names_ignored: bool,
    layer_name_override: Option<String>,
    cache: Option<(Arc<[u8]>, Arc<FeatureDecoder>)>,
}

impl DecoderState {
    fn commit(&mut self, style: LoadedStyle, ignore_cartocss_layer_names: bool) {
        self.source = style.source;
        self.model = style.model;
        self.parameters = style.parameters;
        self.context = style.context;
        self.cartocss_layer_names_ignored = ignore_cartocss_layer_names;
        self.generation += 1;
    }
}

struct Snapshot {
    model: Arc<StyleModel>,
    context: Arc<SymbolizerContext>,
    buffer: f32,
    feature_id_override: bool,
    layer_name_override: Option<String>,
}

pub struct TileDecoder {
    state: Mutex<DecoderState>,
    listener: Mutex<Option<Arc<dyn DecoderListener>>>,
}

impl TileDecoder {
    pub fn new<S: Into<StyleSource>>(source: S) -> Result<Self> {
        let style = LoadedStyle::load(source.into(), false)?;

        Ok(TileDecoder {
            state: Mutex::new(DecoderState {
                source: style.source,
                model: style.model,
                parameters: style.parameters,
                context: style.context,
                generation: 0,
                buffer: 0.0,
                feature_id_override: false,
                cartocss_layer_names_ignored: false,
                layer_name_override: None,
                cache: None,
            }),
            listener: Mutex::new(None),
        })
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn DecoderListener>>) {
        *self.listener.lock() = listener;
    }

    fn notify(&self) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.decoder_changed();
        }
    }

    pub fn style_source(&self) -> StyleSource {
        self.state.lock().source.clone()
    }

    pub fn style_model(&self) -> Arc<StyleModel> {
        self.state.lock().model.clone()
    }

    /// Replaces the style. On failure the current style stays in place.
    pub fn set_style_source<S: Into<StyleSource>>(&self, source: S) -> Result<()> {
        self.reload(Some(source.into()), None)
    }

    fn reload(&self, source: Option<StyleSource>, ignore_cartocss_layer_names: Option<bool>) -> Result<()> {
        loop {
            let (next_source, ignore, generation) = {
                let state = self.state.lock();
                (
                    source.clone().unwrap_or_else(|| state.source.clone()),
                    ignore_cartocss_layer_names.unwrap_or(state.cartocss_layer_names_ignored),
                    state.generation,
                )
            };

            let style = LoadedStyle::load(next_source, ignore)?;

            let mut state = self.state.lock();
            if state.generation != generation {
                log::debug!("style changed while loading, reloading");
                continue;
            }
            state.commit(style, ignore);
            break;
        }

        self.notify();
        Ok(())
    }

    pub fn style_parameters(&self) -> Vec<String> {
        self.state.lock().model.parameters.names()
    }

    pub fn style_parameter(&self, name: &str) -> Result<String> {
        let state = self.state.lock();
        state.model.parameters.format(name, &state.parameters)
    }

    /// Sets a declared parameter from its textual form. `Ok(false)` when the
    /// style does not declare `name` or the value is not one of its keys.
    pub fn set_style_parameter(&self, name: &str, value: &str) -> Result<bool> {
        {
            let mut state = self.state.lock();
            let Some(value) = state.model.parameters.resolve(name, value)? else {
                log::info!("ignoring unknown style parameter or value: {name}={value}");
                return Ok(false);
            };

            let parameters = Arc::new(state.parameters.with_value(name, value));
            state.context = Arc::new(state.context.with_parameters(parameters.clone()));
            state.parameters = parameters;
        }

        self.notify();
        Ok(true)
    }

    pub fn buffering(&self) -> f32 {
        self.state.lock().buffer
    }

    /// Extra margin around each tile, as a fraction of the tile size, whose
    /// features are still drawn.
    pub fn set_buffering(&self, buffer: f32) {
        self.state.lock().buffer = buffer.max(0.0);
        self.notify();
    }

    pub fn is_feature_id_override(&self) -> bool {
        self.state.lock().feature_id_override
    }

    /// Reports the global id of the drawn tile as the id of every feature.
    pub fn set_feature_id_override(&self, enabled: bool) {
        self.state.lock().feature_id_override = enabled;
        self.notify();
    }

    pub fn is_cartocss_layer_names_ignored(&self) -> bool {
        self.state.lock().cartocss_layer_names_ignored
    }

    /// Recompiles the current style when the flag changes.
    pub fn set_cartocss_layer_names_ignored(&self, ignored: bool) -> Result<()> {
        if self.is_cartocss_layer_names_ignored() == ignored {
            self.notify();
            return Ok(());
        }
        self.reload(None, Some(ignored))
    }

    pub fn layer_name_override(&self) -> Option<String> {
        self.state.lock().layer_name_override.clone()
    }

    /// Matches every tile layer against the style as if it had this name.
    pub fn set_layer_name_override(&self, name: Option<String>) {
        self.state.lock().layer_name_override = name.filter(|n| !n.is_empty());
        self.notify();
    }

    pub fn apply_config(&self, config: &DecoderConfig) -> Result<()> {
        if let Some(ignored) = config.cartocss_layer_names_ignored {
            self.set_cartocss_layer_names_ignored(ignored)?;
        }
        if let Some(buffer) = config.buffer {
            self.set_buffering(buffer);
        }
        if let Some(enabled) = config.feature_id_override {
            self.set_feature_id_override(enabled);
        }
        if config.layer_name_override.is_some() {
            self.set_layer_name_override(config.layer_name_override.clone());
        }
        for (name, value) in config.parameters.iter() {
            self.set_style_parameter(name, value)?;
        }
        Ok(())
    }

    pub fn min_zoom(&self) -> u8 {
        0
    }

    pub fn max_zoom(&self) -> u8 {
        MAX_SUPPORTED_ZOOM_LEVEL
    }

    pub fn background_color(&self) -> Color {
        self.state.lock().model.settings.background_color
    }

    pub fn background_pattern(&self) -> Option<Arc<BitmapPattern>> {
        self.state.lock().context.background_pattern.clone()
    }

    fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        Snapshot {
            model: state.model.clone(),
            context: state.context.clone(),
            buffer: state.buffer,
            feature_id_override: state.feature_id_override,
            layer_name_override: state.layer_name_override.clone(),
        }
    }

    /// Parsed form of `data`, reused while the same buffer is passed in.
    fn feature_decoder(&self, data: &Arc<[u8]>) -> Result<Arc<FeatureDecoder>, DecodeError> {
        if let Some((cached, decoder)) = self.state.lock().cache.as_ref()
            && Arc::ptr_eq(cached, data)
        {
            return Ok(decoder.clone());
        }

        log::debug!("parsing tile data of {} bytes", data.len());
        let decoder = Arc::new(FeatureDecoder::new(data)?);
        self.state.lock().cache = Some((data.clone(), decoder.clone()));
        Ok(decoder)
    }

    /// Looks up a single feature of `tile` by id, geometry in `bounds`.
    pub fn decode_feature(&self, id: u64, tile: TileId, data: &Arc<[u8]>, bounds: &MapBounds) -> Option<TileFeature> {
        if data.is_empty() {
            log::warn!("empty tile data for {tile}");
            return None;
        }

        let decoded = self
            .feature_decoder(data)
            .and_then(|decoder| decoder.decode_feature(id, bounds));

        match decoded {
            Ok(feature) => feature,
            Err(e) => {
                log::error!("unable to decode feature {id} of {tile}: {e}");
                None
            }
        }
    }

    /// Draws the data of `tile` into `target_tile`, which is `tile` itself or
    /// one of its descendants when overzooming.
    pub fn decode_tile(&self, tile: TileId, target_tile: TileId, data: &Arc<[u8]>) -> Option<TileMap> {
        if data.is_empty() {
            log::warn!("empty tile data for {tile}");
            return None;
        }
        if !tile.is_valid() || !target_tile.is_valid() {
            log::error!("invalid tile, {tile} drawn as {target_tile}");
            return None;
        }

        let snapshot = self.snapshot();

        // Parsed privately, the cache slot belongs to feature picking.
        let mut decoder = match FeatureDecoder::new(data) {
            Ok(decoder) => decoder,
            Err(e) => {
                log::error!("unable to decode {tile}: {e}");
                return None;
            }
        };
        decoder.set_transform(TileTransform::between(tile, target_tile));
        decoder.set_buffer(snapshot.buffer);
        decoder.set_global_id_override(snapshot.feature_id_override.then(|| target_tile.global_id()));

        let render_tile = TileReader::new(&snapshot.model, &snapshot.context)
            .with_layer_name_override(snapshot.layer_name_override.as_deref())
            .read(target_tile, &decoder);

        Some(TileMap::from([(DEFAULT_RENDER_LAYER, Arc::new(render_tile))]))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        error::Error,
        style::{CartoCssStyleSet, CompiledStyleSet},
        testing,
        tile::MapPos,
        value::Value,
    };

    const PROJECT: &str = r#"{
        "name": "themed",
        "styles": ["water.mss"],
        "nutiparameters": {
            "theme": { "default": "light", "values": { "light": 0, "dark": 1 } },
            "lanes": { "type": "int", "default": 1 }
        }
    }"#;

    const WATER: &str = r#"
        Map { background-color: #eee; }
        #water[nuti::theme = 0] { polygon-fill: #fff; }
        #water[nuti::theme = 1] { polygon-fill: #000; }
        #roads[lanes >= nuti::lanes] { line-color: #f00; line-width: 2; }
    "#;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl DecoderListener for Counter {
        fn decoder_changed(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Counter {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn themed() -> TileDecoder {
        testing::init_logging();
        let package = testing::package(&[("project.json", PROJECT.as_bytes()), ("water.mss", WATER.as_bytes())]);
        TileDecoder::new(CompiledStyleSet::new(package)).unwrap()
    }

    fn observe(decoder: &TileDecoder) -> Arc<Counter> {
        let counter = Arc::new(Counter::default());
        decoder.set_listener(Some(counter.clone()));
        counter
    }

    fn water_color(tiles: &TileMap) -> Option<Color> {
        let tile = tiles.get(&DEFAULT_RENDER_LAYER)?;
        let layer = tile.layers.iter().find(|l| l.name.as_deref() == Some("water"))?;
        Some(layer.features.first()?.paint.color)
    }

    #[test]
    fn theme_parameter_switches_paint() {
        let decoder = themed();
        let counter = observe(&decoder);
        let data = testing::sample_tile();
        let tile = TileId::new(5, 1, 1);

        assert_eq!(decoder.style_parameters(), vec!["theme", "lanes"]);
        assert_eq!(decoder.style_parameter("theme").unwrap(), "light");
        assert_eq!(decoder.background_color(), "#eee".parse::<Color>().unwrap());

        let tiles = decoder.decode_tile(tile, tile, &data).unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(water_color(&tiles), Some(Color::WHITE));

        assert!(decoder.set_style_parameter("theme", "dark").unwrap());
        assert_eq!(counter.count(), 1);
        assert_eq!(decoder.style_parameter("theme").unwrap(), "dark");

        let tiles = decoder.decode_tile(tile, tile, &data).unwrap();
        assert_eq!(water_color(&tiles), Some(Color::BLACK));
    }

    #[test]
    fn parameter_failures() {
        let decoder = themed();
        let counter = observe(&decoder);

        assert!(!decoder.set_style_parameter("theme", "sepia").unwrap());
        assert!(!decoder.set_style_parameter("missing", "1").unwrap());
        assert_eq!(counter.count(), 0);

        assert!(matches!(
            decoder.set_style_parameter("lanes", "many"),
            Err(Error::Conversion { .. })
        ));
        assert!(matches!(decoder.style_parameter("missing"), Err(Error::NotFound(_))));
        assert_eq!(decoder.style_parameter("lanes").unwrap(), "1");
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn rejected_values_keep_the_last_accepted_one() {
        let decoder = themed();
        let counter = observe(&decoder);
        let data = testing::sample_tile();
        let tile = TileId::new(5, 1, 1);

        assert!(decoder.set_style_parameter("theme", "dark").unwrap());
        assert!(!decoder.set_style_parameter("theme", "sepia").unwrap());
        assert_eq!(decoder.style_parameter("theme").unwrap(), "dark");

        assert!(decoder.set_style_parameter("lanes", "3").unwrap());
        assert!(decoder.set_style_parameter("lanes", "many").is_err());
        assert_eq!(decoder.style_parameter("lanes").unwrap(), "3");
        assert_eq!(counter.count(), 2);

        let tiles = decoder.decode_tile(tile, tile, &data).unwrap();
        assert_eq!(water_color(&tiles), Some(Color::BLACK));
    }

    #[test]
    fn integer_parameters_reach_filters() {
        let decoder = themed();
        let data = testing::sample_tile();
        let tile = TileId::new(5, 1, 1);
        let has_roads = |tiles: &TileMap| tiles[&DEFAULT_RENDER_LAYER].layers.iter().any(|l| l.name.as_deref() == Some("roads"));

        assert!(has_roads(&decoder.decode_tile(tile, tile, &data).unwrap()));
        assert!(decoder.set_style_parameter("lanes", "3").unwrap());
        assert!(!has_roads(&decoder.decode_tile(tile, tile, &data).unwrap()));
    }

    #[test]
    fn style_swaps_reset_parameters() {
        let decoder = themed();
        let counter = observe(&decoder);
        decoder.set_style_parameter("theme", "dark").unwrap();

        let package = decoder.style_source().asset_package().cloned().unwrap();
        decoder.set_style_source(CompiledStyleSet::new(package)).unwrap();
        assert_eq!(decoder.style_parameter("theme").unwrap(), "light");
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn failed_swaps_keep_the_current_style() {
        let decoder = themed();
        let counter = observe(&decoder);
        decoder.set_style_parameter("theme", "dark").unwrap();

        assert!(matches!(
            decoder.set_style_source(CartoCssStyleSet::new("#water { polygon-fill: #00f ")),
            Err(Error::StyleParse { .. })
        ));
        let empty = testing::package(&[]);
        assert!(matches!(
            decoder.set_style_source(CompiledStyleSet::new(empty)),
            Err(Error::Argument(_))
        ));

        assert_eq!(decoder.style_parameter("theme").unwrap(), "dark");
        assert_eq!(decoder.style_parameters().len(), 2);
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn parsed_tiles_are_cached_by_identity() {
        let decoder = themed();
        let data = testing::sample_tile();

        let first = decoder.feature_decoder(&data).unwrap();
        let second = decoder.feature_decoder(&data).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // equal content in a new buffer is parsed again
        let copy: Arc<[u8]> = Arc::from(data.to_vec());
        let third = decoder.feature_decoder(&copy).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));

        let fourth = decoder.feature_decoder(&data).unwrap();
        assert!(!Arc::ptr_eq(&first, &fourth));
    }

    #[test]
    fn drawing_tiles_keeps_the_cached_payload() {
        let decoder = themed();
        let picked = testing::sample_tile();
        let other: Arc<[u8]> = Arc::from(picked.to_vec());
        let tile = TileId::new(5, 1, 1);

        let first = decoder.feature_decoder(&picked).unwrap();
        assert!(decoder.decode_tile(tile, tile, &other).is_some());
        assert!(decoder.decode_tile(tile, tile, &picked).is_some());

        let second = decoder.feature_decoder(&picked).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn decodes_single_features() {
        let decoder = themed();
        let data = testing::sample_tile();
        let tile = TileId::new(0, 0, 0);
        let bounds = MapBounds::new(MapPos::new(-100.0, -100.0), MapPos::new(100.0, 100.0));

        let harbor = decoder.decode_feature(20, tile, &data, &bounds).unwrap();
        assert_eq!(harbor.layer_name, "places");
        assert_eq!(harbor.feature.properties["name"], Value::String("Harbor".into()));
        assert_eq!(harbor.feature.geometry, crate::Geometry::Point(MapPos::new(-75.0, 75.0)));

        assert!(decoder.decode_feature(404, tile, &data, &bounds).is_none());
    }

    #[test]
    fn empty_and_corrupt_payloads() {
        let decoder = themed();
        let tile = TileId::new(1, 0, 0);
        let bounds = MapBounds::new(MapPos::new(0.0, 0.0), MapPos::new(1.0, 1.0));

        let empty: Arc<[u8]> = Arc::from(Vec::new());
        assert!(decoder.decode_tile(tile, tile, &empty).is_none());
        assert!(decoder.decode_feature(1, tile, &empty, &bounds).is_none());

        let corrupt: Arc<[u8]> = Arc::from(vec![0x0a, 0xff, 0x01]);
        assert!(decoder.decode_tile(tile, tile, &corrupt).is_none());
        assert!(decoder.decode_feature(1, tile, &corrupt, &bounds).is_none());
    }

    #[test]
    fn overzoom_and_id_override() {
        let decoder = TileDecoder::new(CartoCssStyleSet::new("#places { marker-width: 4; }")).unwrap();
        let data = testing::sample_tile();
        let source = TileId::new(5, 1, 1);
        let target = TileId::new(6, 2, 2);

        decoder.set_feature_id_override(true);
        let tiles = decoder.decode_tile(source, target, &data).unwrap();
        let tile = &tiles[&DEFAULT_RENDER_LAYER];
        assert_eq!(tile.tile_id, target);

        let markers = &tile.layers[0].markers;
        assert_eq!(markers.len(), 3);
        assert!(markers.iter().all(|m| m.feature_id == target.global_id()));
        let harbor = markers.iter().find(|m| m.offset.x > 0.2).unwrap();
        assert_eq!(harbor.offset, lyon::math::point(0.25, 0.25));
    }

    #[test]
    fn overzoomed_children_scale_the_parent() {
        let decoder = TileDecoder::new(CartoCssStyleSet::new("#places { marker-width: 4; }")).unwrap();
        let data = testing::sample_tile();
        let source = TileId::new(10, 5, 5);

        let tiles = decoder.decode_tile(source, TileId::new(11, 10, 10), &data).unwrap();
        let tile = &tiles[&DEFAULT_RENDER_LAYER];
        assert_eq!(tile.tile_id, TileId::new(11, 10, 10));
        let markers = &tile.layers[0].markers;
        assert_eq!(markers.len(), 3);
        let harbor = markers.iter().find(|m| m.feature_id == 20).unwrap();
        assert_eq!(harbor.offset, lyon::math::point(0.25, 0.25));

        // every place lies in the upper left quarter of the parent
        let tiles = decoder.decode_tile(source, TileId::new(11, 11, 11), &data).unwrap();
        assert!(tiles[&DEFAULT_RENDER_LAYER].layers.iter().all(|l| l.markers.is_empty()));
    }

    #[test]
    fn tiles_decode_while_parameters_change() {
        let decoder = themed();
        let data = testing::sample_tile();
        let tile = TileId::new(5, 1, 1);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..50 {
                    let theme = if i % 2 == 0 { "dark" } else { "light" };
                    assert!(decoder.set_style_parameter("theme", theme).unwrap());
                }
            });
            for _ in 0..2 {
                scope.spawn(|| {
                    for _ in 0..20 {
                        let tiles = decoder.decode_tile(tile, tile, &data).unwrap();
                        let color = water_color(&tiles).unwrap();
                        assert!(color == Color::WHITE || color == Color::BLACK);
                    }
                });
            }
        });

        assert_eq!(decoder.style_parameter("theme").unwrap(), "light");
    }

    #[test]
    fn setters_notify_once() {
        let decoder = TileDecoder::new(CartoCssStyleSet::new("#water { polygon-fill: #00f; }")).unwrap();
        let counter = observe(&decoder);

        decoder.set_buffering(0.25);
        decoder.set_feature_id_override(true);
        decoder.set_layer_name_override(Some("water".to_string()));
        decoder.set_cartocss_layer_names_ignored(true).unwrap();
        assert_eq!(counter.count(), 4);

        assert_eq!(decoder.buffering(), 0.25);
        assert!(decoder.is_feature_id_override());
        assert_eq!(decoder.layer_name_override().as_deref(), Some("water"));
        assert!(decoder.is_cartocss_layer_names_ignored());
        assert_eq!(decoder.style_model().layers[0].name, None);
        assert_eq!((decoder.min_zoom(), decoder.max_zoom()), (0, 24));
        assert!(decoder.background_pattern().is_none());
    }

    #[test]
    fn config_files() {
        let decoder = themed();
        let config = DecoderConfig::from_json(
            r#"{ "buffer": 0.1, "layer_name_override": "water", "parameters": { "theme": "dark" } }"#,
        )
        .unwrap();
        decoder.apply_config(&config).unwrap();

        assert_eq!(decoder.buffering(), 0.1);
        assert_eq!(decoder.layer_name_override().as_deref(), Some("water"));
        assert_eq!(decoder.style_parameter("theme").unwrap(), "dark");
        assert!(!decoder.is_feature_id_override());

        assert_eq!(DecoderConfig::from_json("{}").unwrap(), DecoderConfig::default());
    }

    #[test]
    fn decoder_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TileDecoder>();
    }
}
