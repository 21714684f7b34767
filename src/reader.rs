//! Matches tile features against the style and tessellates them into render
//! ready geometry.

use std::{collections::BTreeMap, ops::Range, sync::Arc};

use fontdue::Font;
use lyon::{
    math::{Box2D, Point, point, vector},
    path::{LineCap, LineJoin, Path},
    tessellation::{
        BuffersBuilder, FillOptions, FillTessellator, FillVertex, StrokeOptions, StrokeTessellator,
        StrokeVertex, VertexBuffers,
    },
};
use smallvec::SmallVec;

use crate::{
    error::DecodeError,
    feature::{FeatureDecoder, FeatureView},
    geometry::TileGeometry,
    parameters::ParameterValues,
    style::{Color, Rule, StyleModel, Symbolizer, SymbolizerKind, Variables},
    symbolizer::{
        Bitmap, BitmapPattern, FontId, GlyphId, StrokeId, SymbolizerContext, glyph::GLYPHMAP_SIZE,
        stroke::parse_dash_array,
    },
    tile::TileId,
    value::Value,
};

/// Key of the only entry of a [`TileMap`].
pub const DEFAULT_RENDER_LAYER: usize = 0;

pub type TileMap = BTreeMap<usize, Arc<RenderTile>>;

#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FillMode {
    Polygon = 0,
    Line = 1,
    Pattern = 2,
}

/// Vertex in the normalized space of the drawn tile, y down.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GeoVertex {
    pub position: [f32; 2],
    pub normal: [f32; 2],
    pub advancement: f32,
    pub fill: FillMode,
}

#[derive(Debug, Clone)]
pub struct FeaturePaint {
    pub kind: SymbolizerKind,
    pub color: Color,
    pub opacity: f32,
    /// Stroke width in tile units.
    pub line_width: f32,
    pub stroke: Option<StrokeId>,
    pub pattern: Option<Arc<BitmapPattern>>,
}

impl PartialEq for FeaturePaint {
    fn eq(&self, other: &Self) -> bool {
        let pattern_eq = match (&self.pattern, &other.pattern) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };

        pattern_eq
            && self.kind == other.kind
            && self.color == other.color
            && self.opacity == other.opacity
            && self.line_width == other.line_width
            && self.stroke == other.stroke
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDraw {
    pub paint: FeaturePaint,
    pub elements: Range<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GlyphDraw {
    /// Pixel offsets from the label anchor.
    pub bounds: Box2D,
    pub glyph: GlyphId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LineDraw {
    pub glyphs: SmallVec<[GlyphDraw; 20]>,
    pub width: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LabelDraw {
    pub feature_id: u64,
    pub text: smartstring::alias::String,
    pub offset: Point,
    pub bounds: Box2D,
    pub lines: SmallVec<[LineDraw; 3]>,
    pub text_size: f32,
    pub color: Color,
    pub halo_color: Color,
    pub halo_radius: f32,
}

impl LabelDraw {
    pub fn glyphs(&self) -> impl Iterator<Item = &GlyphDraw> {
        self.lines.iter().flat_map(|l| l.glyphs.iter())
    }
}

#[derive(Clone, Debug)]
pub struct MarkerDraw {
    pub feature_id: u64,
    pub offset: Point,
    /// Pixels.
    pub width: f32,
    pub height: f32,
    pub color: Color,
    pub bitmap: Option<Arc<Bitmap>>,
}

#[derive(Debug, Clone)]
pub struct RenderLayer {
    /// Tile layer the style layer targets, `None` for wildcard layers.
    pub name: Option<String>,
    pub geometry: VertexBuffers<GeoVertex, u32>,
    pub features: Vec<FeatureDraw>,
    pub labels: Vec<LabelDraw>,
    pub markers: Vec<MarkerDraw>,
}

impl RenderLayer {
    fn is_empty(&self) -> bool {
        self.features.is_empty() && self.labels.is_empty() && self.markers.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RenderTile {
    pub tile_id: TileId,
    pub layers: Vec<RenderLayer>,
}

impl RenderTile {
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Feature attributes, style parameters and the view zoom as seen by style
/// expressions.
pub struct FeatureScope<'a> {
    view: &'a FeatureView<'a>,
    parameters: &'a ParameterValues,
    zoom: f32,
}

impl Variables for FeatureScope<'_> {
    fn field(&self, name: &str) -> Value {
        self.view.key(name).unwrap_or_default()
    }

    fn parameter(&self, name: &str) -> Value {
        self.parameters.get(name).cloned().unwrap_or_default()
    }

    fn zoom(&self) -> f32 {
        self.zoom
    }
}

/// Symbolizer properties evaluated for one feature.
struct Properties<'a> {
    symbolizer: &'a Symbolizer,
    scope: &'a FeatureScope<'a>,
}

impl Properties<'_> {
    fn value(&self, name: &str) -> Option<Value> {
        let value = self.symbolizer.property(name)?.eval(self.scope);
        (!value.is_null()).then_some(value)
    }

    fn text(&self, name: &str) -> Option<String> {
        let text = self.value(name)?.to_string();
        (!text.is_empty()).then_some(text)
    }

    fn number(&self, name: &str, default: f32) -> f32 {
        match self.value(name) {
            Some(Value::String(s)) => s.trim().parse().unwrap_or_else(|_| {
                log::debug!("'{name}' is not a number: '{s}'");
                default
            }),
            Some(value) => value.as_f64().map_or(default, |n| n as f32),
            None => default,
        }
    }

    fn color(&self, name: &str, default: Color) -> Color {
        let Some(text) = self.text(name) else {
            return default;
        };
        text.parse().unwrap_or_else(|e| {
            log::debug!("'{name}' is not a color: '{text}': {e}");
            default
        })
    }
}

fn line_cap(name: Option<String>) -> LineCap {
    match name.as_deref() {
        Some("round") => LineCap::Round,
        Some("square") => LineCap::Square,
        _ => LineCap::Butt,
    }
}

fn line_join(name: Option<String>) -> LineJoin {
    match name.as_deref() {
        Some("round") => LineJoin::Round,
        Some("bevel") => LineJoin::Bevel,
        _ => LineJoin::Miter,
    }
}

fn transform_text(text: &str, transform: Option<String>) -> smartstring::alias::String {
    let mut out = smartstring::alias::String::new();
    let mut word_start = true;
    for c in text.trim().chars() {
        match transform.as_deref() {
            Some("uppercase") => out.extend(c.to_uppercase()),
            Some("lowercase") => out.extend(c.to_lowercase()),
            Some("capitalize") if word_start => out.extend(c.to_uppercase()),
            _ => out.push(c),
        }
        word_start = c.is_whitespace();
    }
    out
}

struct DrawCommands {
    feature_draw: Vec<FeatureDraw>,
    last_paint: Option<FeaturePaint>,
    draw_range_start: usize,
}

impl DrawCommands {
    fn new() -> Self {
        Self {
            feature_draw: Vec::new(),
            last_paint: None,
            draw_range_start: 0,
        }
    }

    /// Closes the running draw range when the paint changes. `None` flushes.
    fn add_draw_cmds(&mut self, next_paint: Option<&FeaturePaint>, indices: usize) {
        if next_paint.is_some() && next_paint == self.last_paint.as_ref() {
            return;
        }

        if let Some(last) = self.last_paint.take()
            && indices > self.draw_range_start
        {
            self.feature_draw.push(FeatureDraw {
                paint: last,
                elements: self.draw_range_start..indices,
            });
        }

        self.draw_range_start = indices;
        self.last_paint = next_paint.cloned();
    }
}

struct LayerOutput {
    geometry: VertexBuffers<GeoVertex, u32>,
    draw_commands: DrawCommands,
    labels: Vec<LabelDraw>,
    markers: Vec<MarkerDraw>,
}

impl LayerOutput {
    fn new() -> Self {
        LayerOutput {
            geometry: VertexBuffers::new(),
            draw_commands: DrawCommands::new(),
            labels: Vec::new(),
            markers: Vec::new(),
        }
    }

    fn finish(mut self, name: Option<String>) -> RenderLayer {
        self.draw_commands
            .add_draw_cmds(None, self.geometry.indices.len());

        RenderLayer {
            name,
            geometry: self.geometry,
            features: self.draw_commands.feature_draw,
            labels: self.labels,
            markers: self.markers,
        }
    }
}

fn build_path<'a>(parts: impl Iterator<Item = &'a Vec<Point>>, close: bool) -> Path {
    let mut builder = Path::builder();
    for part in parts {
        let Some((first, rest)) = part.split_first() else {
            continue;
        };
        builder.begin(*first);
        for p in rest {
            builder.line_to(*p);
        }
        builder.end(close);
    }
    builder.build()
}

fn line_midpoint(line: &[Point]) -> Option<Point> {
    let length: f32 = line.windows(2).map(|w| (w[1] - w[0]).length()).sum();
    let mut remaining = length / 2.0;
    for w in line.windows(2) {
        let segment = (w[1] - w[0]).length();
        if segment >= remaining && segment > 0.0 {
            return Some(w[0].lerp(w[1], remaining / segment));
        }
        remaining -= segment;
    }
    line.first().copied()
}

/// Label and marker anchors of a geometry.
fn anchors(geometry: &TileGeometry) -> SmallVec<[Point; 4]> {
    match geometry {
        TileGeometry::Points(points) => points.iter().copied().collect(),
        TileGeometry::Lines(lines) => lines.iter().filter_map(|l| line_midpoint(l)).collect(),
        TileGeometry::Polygons(polygons) => polygons
            .iter()
            .filter_map(|rings| rings.first())
            .filter(|ring| !ring.is_empty())
            .map(|ring| Box2D::from_points(ring.iter()).center())
            .collect(),
    }
}

fn inside_tile(p: &Point) -> bool {
    (0.0..1.0).contains(&p.x) && (0.0..1.0).contains(&p.y)
}

/// Lays out `text` in pixels around the origin, glyphs of every line
/// centered on the widest line.
fn layout_text(
    font: &Font,
    font_id: FontId,
    text: &str,
    font_size: f32,
    wrap_width: f32,
) -> Option<(Box2D, SmallVec<[LineDraw; 3]>)> {
    let v_advance = font
        .horizontal_line_metrics(font_size)
        .map(|m| m.new_line_size)
        .unwrap_or(font_size);
    let mut h_offset = 0.0;
    let mut v_offset = 0.0;
    let mut glyphs = SmallVec::new();
    let mut lines: SmallVec<[LineDraw; 3]> = SmallVec::new();
    let mut widest_line: f32 = 0.0;
    let mut bounds: Option<Box2D> = None;
    let mut last_glyph = None;

    let chars: SmallVec<[char; 32]> = text.chars().collect();
    for (idx, c) in chars.iter().copied().enumerate() {
        if ((wrap_width > 0.0 && h_offset > wrap_width && c == ' ') || c == '\n')
            && chars.len() > idx + 1
        {
            widest_line = widest_line.max(h_offset);
            lines.push(LineDraw {
                width: h_offset,
                glyphs: std::mem::take(&mut glyphs),
            });
            last_glyph = None;
            h_offset = 0.0;
            v_offset += v_advance;
            continue;
        }

        if c.is_control() || font.lookup_glyph_index(c) == 0 {
            last_glyph = None;
            continue;
        }

        let kern = last_glyph
            .and_then(|g| font.horizontal_kern(g, c, font_size))
            .unwrap_or_default();
        last_glyph = Some(c);

        let metrics = font.metrics(c, font_size);
        let min = point(
            h_offset + kern + metrics.xmin as f32,
            v_offset - (metrics.ymin as f32 + metrics.height as f32),
        );
        let glyph_bounds = Box2D::new(min, min + vector(metrics.width as f32, metrics.height as f32));
        bounds = Some(bounds.map_or(glyph_bounds, |b| b.union(&glyph_bounds)));

        if !c.is_whitespace() {
            glyphs.push(GlyphDraw {
                bounds: glyph_bounds,
                glyph: GlyphId(font_id, c),
            });
        }

        h_offset += metrics.advance_width + kern;
    }

    if !glyphs.is_empty() {
        widest_line = widest_line.max(h_offset);
        lines.push(LineDraw {
            width: h_offset,
            glyphs,
        });
    }

    if lines.iter().all(|l| l.glyphs.is_empty()) {
        return None;
    }

    if lines.len() > 1 {
        for line in lines.iter_mut() {
            let adj_width = (widest_line - line.width) / 2.0;
            for glyph in line.glyphs.iter_mut() {
                glyph.bounds = glyph.bounds.translate(vector(adj_width, 0.0));
            }
        }
    }

    // center the block on the anchor
    let bounds = bounds?;
    let center = bounds.center().to_vector();
    for glyph in lines.iter_mut().flat_map(|l| l.glyphs.iter_mut()) {
        glyph.bounds = glyph.bounds.translate(-center);
    }

    Some((bounds.translate(-center), lines))
}

pub struct TileReader<'a> {
    style: &'a StyleModel,
    context: &'a SymbolizerContext,
    layer_name_override: Option<&'a str>,
    fill_tessellator: FillTessellator,
    fill_options: FillOptions,
    stroke_tessellator: StrokeTessellator,
}

impl<'a> TileReader<'a> {
    pub fn new(style: &'a StyleModel, context: &'a SymbolizerContext) -> Self {
        TileReader {
            style,
            context,
            layer_name_override: None,
            fill_tessellator: FillTessellator::new(),
            fill_options: FillOptions::default().with_tolerance(0.0001),
            stroke_tessellator: StrokeTessellator::new(),
        }
    }

    /// Matches every tile layer as if it had this name.
    pub fn with_layer_name_override(mut self, name: Option<&'a str>) -> Self {
        self.layer_name_override = name;
        self
    }

    pub fn read(&mut self, tile_id: TileId, decoder: &FeatureDecoder) -> RenderTile {
        let style = self.style;
        let mut layers = Vec::new();

        for style_layer in style.layers.iter() {
            let rules: SmallVec<[&Rule; 8]> = style_layer
                .rules
                .iter()
                .filter(|rule| rule.zoom_matches(tile_id.zoom))
                .collect();
            if rules.is_empty() {
                continue;
            }

            let mut output = LayerOutput::new();

            for layer in decoder.layers() {
                let name = self.layer_name_override.unwrap_or(layer.name());
                if !style_layer.matches_layer(name) {
                    continue;
                }

                for view in layer.features() {
                    self.read_feature(&view, &rules, tile_id, decoder, &mut output);
                }
            }

            let layer = output.finish(style_layer.name.clone());
            if !layer.is_empty() {
                layers.push(layer);
            }
        }

        RenderTile { tile_id, layers }
    }

    fn read_feature(
        &mut self,
        view: &FeatureView<'_>,
        rules: &[&Rule],
        tile_id: TileId,
        decoder: &FeatureDecoder,
        output: &mut LayerOutput,
    ) {
        let context = self.context;
        let scope = FeatureScope {
            view,
            parameters: &context.settings.parameters,
            zoom: tile_id.zoom(),
        };

        let matched: SmallVec<[&Rule; 4]> = rules
            .iter()
            .copied()
            .filter(|rule| rule.filter.matches(&scope))
            .collect();
        if matched.is_empty() {
            return;
        }

        let geometry = match view.geometry() {
            Ok(Some(geometry)) => geometry,
            Ok(None) => return,
            Err(e) => {
                log::error!("skipping feature {} of layer '{}': {e}", view.id(), view.layer_name());
                return;
            }
        };

        match geometry.bounds() {
            Some(bounds) if decoder.in_buffer(&bounds) => (),
            _ => return,
        }

        for rule in matched {
            for symbolizer in rule.symbolizers.iter() {
                let props = Properties {
                    symbolizer,
                    scope: &scope,
                };
                if let Err(e) = self.symbolize(&props, view, &geometry, output) {
                    log::warn!("feature {} of layer '{}': {e}", view.id(), view.layer_name());
                }
            }
        }
    }

    fn symbolize(
        &mut self,
        props: &Properties<'_>,
        view: &FeatureView<'_>,
        geometry: &TileGeometry,
        output: &mut LayerOutput,
    ) -> Result<(), DecodeError> {
        let tile_size = self.context.settings.tile_size as f32;

        match (props.symbolizer.kind, geometry) {
            (SymbolizerKind::Polygon, TileGeometry::Polygons(polygons)) => {
                let paint = FeaturePaint {
                    kind: SymbolizerKind::Polygon,
                    color: props.color("fill", Color::from_rgb(128, 128, 128)),
                    opacity: props.number("fill-opacity", 1.0),
                    line_width: 0.0,
                    stroke: None,
                    pattern: None,
                };
                let path = build_path(polygons.iter().flatten(), true);
                self.fill(&path, &paint, FillMode::Polygon, output)
            }
            (SymbolizerKind::PolygonPattern, TileGeometry::Polygons(polygons)) => {
                let Some(file) = props.text("file") else {
                    return Ok(());
                };
                let Some(pattern) = self.context.bitmaps.load_pattern(&file, 1.0, 1.0) else {
                    return Ok(());
                };
                let paint = FeaturePaint {
                    kind: SymbolizerKind::PolygonPattern,
                    color: Color::WHITE,
                    opacity: props.number("opacity", 1.0),
                    line_width: 0.0,
                    stroke: None,
                    pattern: Some(pattern),
                };
                let path = build_path(polygons.iter().flatten(), true);
                self.fill(&path, &paint, FillMode::Pattern, output)
            }
            (SymbolizerKind::Line | SymbolizerKind::LinePattern, TileGeometry::Lines(_) | TileGeometry::Polygons(_)) => {
                let path = match geometry {
                    TileGeometry::Lines(lines) => build_path(lines.iter(), false),
                    TileGeometry::Polygons(polygons) => build_path(polygons.iter().flatten(), true),
                    TileGeometry::Points(_) => return Ok(()),
                };

                let (pattern, fill) = if props.symbolizer.kind == SymbolizerKind::LinePattern {
                    let Some(file) = props.text("file") else {
                        return Ok(());
                    };
                    match self.context.bitmaps.load_pattern(&file, 1.0, 1.0) {
                        Some(pattern) => (Some(pattern), FillMode::Pattern),
                        None => return Ok(()),
                    }
                } else {
                    (None, FillMode::Line)
                };

                let width_px = match &pattern {
                    Some(pattern) => pattern.bitmap.height as f32,
                    None => props.number("stroke-width", 1.0),
                };
                if width_px <= 0.0 {
                    return Ok(());
                }

                let stroke = props
                    .text("stroke-dasharray")
                    .and_then(|d| parse_dash_array(&d))
                    .and_then(|dashes| self.context.strokes.register(&dashes));

                let paint = FeaturePaint {
                    kind: props.symbolizer.kind,
                    color: props.color("stroke", Color::BLACK),
                    opacity: props.number("stroke-opacity", 1.0),
                    line_width: width_px / tile_size,
                    stroke,
                    pattern,
                };

                let options = StrokeOptions::default()
                    .with_tolerance(0.0001)
                    .with_line_width(paint.line_width)
                    .with_line_cap(line_cap(props.text("stroke-linecap")))
                    .with_line_join(line_join(props.text("stroke-linejoin")));

                self.stroke(&path, &paint, &options, fill, output)
            }
            (SymbolizerKind::Marker, geometry) => {
                let bitmap = props.text("file").and_then(|file| self.context.bitmaps.load(&file));
                let default_width = bitmap.as_ref().map_or(10.0, |b| b.width as f32);
                let width = props.number("width", default_width);
                let height = props.number("height", width);
                let color = props
                    .color("fill", Color::from_rgb(0, 0, 255))
                    .with_opacity(props.number("opacity", 1.0));

                for offset in anchors(geometry).into_iter().filter(inside_tile) {
                    output.markers.push(MarkerDraw {
                        feature_id: view.id(),
                        offset,
                        width,
                        height,
                        color,
                        bitmap: bitmap.clone(),
                    });
                }
                Ok(())
            }
            (SymbolizerKind::Text, geometry) => {
                self.label(props, view, geometry, output);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn label(&self, props: &Properties<'_>, view: &FeatureView<'_>, geometry: &TileGeometry, output: &mut LayerOutput) {
        let Some(text) = props.text("text-name") else {
            return;
        };
        let text = transform_text(&text, props.text("text-transform"));
        if text.is_empty() {
            return;
        }

        let anchors: SmallVec<[Point; 4]> = anchors(geometry).into_iter().filter(inside_tile).collect();
        if anchors.is_empty() {
            return;
        }

        let face_name = props.text("face-name").unwrap_or_default();
        let Some((font_id, font)) = self.context.fonts.font(&face_name) else {
            return;
        };
        let text_size = props.number("size", 10.0);
        if text_size.is_nan() || text_size <= 0.0 {
            return;
        }
        let text_size = text_size.min(GLYPHMAP_SIZE as f32);
        let wrap_width = props.number("wrap-width", 0.0);

        let Some((bounds, lines)) = layout_text(font, font_id, &text, text_size, wrap_width) else {
            return;
        };

        for glyph in lines.iter().flat_map(|l| l.glyphs.iter()) {
            self.context
                .glyphs
                .prepare(&self.context.fonts, text_size, glyph.glyph);
        }

        let opacity = props.number("opacity", 1.0);
        let color = props.color("fill", Color::BLACK).with_opacity(opacity);
        let halo_color = props.color("halo-fill", Color::WHITE).with_opacity(opacity);
        let halo_radius = props.number("halo-radius", 0.0);

        for offset in anchors {
            output.labels.push(LabelDraw {
                feature_id: view.id(),
                text: text.clone(),
                offset,
                bounds,
                lines: lines.clone(),
                text_size,
                color,
                halo_color,
                halo_radius,
            });
        }
    }

    fn fill(&mut self, path: &Path, paint: &FeaturePaint, fill: FillMode, output: &mut LayerOutput) -> Result<(), DecodeError> {
        output
            .draw_commands
            .add_draw_cmds(Some(paint), output.geometry.indices.len());

        let mut fill_builder = BuffersBuilder::new(&mut output.geometry, |vertex: FillVertex| GeoVertex {
            position: vertex.position().to_array(),
            normal: [0.0, 0.0],
            advancement: 0.0,
            fill,
        });

        self.fill_tessellator
            .tessellate_path(path, &self.fill_options, &mut fill_builder)
            .map_err(|e| DecodeError::Tessellation(format!("polygon {e:?}")))
    }

    fn stroke(
        &mut self,
        path: &Path,
        paint: &FeaturePaint,
        options: &StrokeOptions,
        fill: FillMode,
        output: &mut LayerOutput,
    ) -> Result<(), DecodeError> {
        output
            .draw_commands
            .add_draw_cmds(Some(paint), output.geometry.indices.len());

        let mut stroke_builder = BuffersBuilder::new(&mut output.geometry, |vertex: StrokeVertex| GeoVertex {
            position: vertex.position().to_array(),
            normal: vertex.normal().to_array(),
            advancement: vertex.advancement(),
            fill,
        });

        self.stroke_tessellator
            .tessellate_path(path, options, &mut stroke_builder)
            .map_err(|e| DecodeError::Tessellation(format!("line {e:?}")))
    }
}
