use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap::Parser;

use styled_tiles::{
    AssetPackage, CartoCssStyleSet, CompiledStyleSet, DEFAULT_RENDER_LAYER, DecoderConfig,
    DirectoryAssetPackage, MapBounds, MapPos, StyleSource, TileDecoder, TileId,
};

/// Decode a vector tile with a map style and summarize the result
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Style directory, compiled XML style, JSON project or CartoCSS file
    style: PathBuf,
    /// Vector tile, raw or gzip compressed
    tile_file: PathBuf,
    /// Tile the data belongs to
    #[arg(long, default_value = "0/0/0")]
    tile: TileId,
    /// Tile to draw into, defaults to the data tile
    #[arg(long)]
    target: Option<TileId>,
    /// Print a single feature instead of the drawn tile
    #[arg(long)]
    feature: Option<u64>,
    /// Style parameter as name=value, may be repeated
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
    /// Margin around the tile as a fraction of its size
    #[arg(long)]
    buffer: Option<f32>,
    /// JSON decoder configuration, applied before the other flags
    #[arg(long)]
    config: Option<PathBuf>,
    /// Match every tile layer as if it had this name
    #[arg(long)]
    layer_name_override: Option<String>,
    /// Apply CartoCSS rules to every layer regardless of their selectors
    #[arg(long)]
    ignore_layer_names: bool,
    /// Report the target tile id as the id of every feature
    #[arg(long)]
    feature_id_override: bool,
}

fn parse_param(text: &str) -> Result<(String, String), String> {
    text.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{text}'"))
}

fn style_source(path: &Path) -> Result<StyleSource> {
    if path.is_dir() {
        let package: Arc<dyn AssetPackage> = Arc::new(DirectoryAssetPackage::open(path)?);
        return Ok(CompiledStyleSet::new(package).into());
    }

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let package: Arc<dyn AssetPackage> = Arc::new(DirectoryAssetPackage::open(dir)?);
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid style path {}", path.display()))?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("xml" | "json") => Ok(CompiledStyleSet::with_style_asset(package, name).into()),
        Some("mss" | "css") => {
            let cartocss = std::fs::read_to_string(path)
                .with_context(|| format!("unable to read {}", path.display()))?;
            Ok(CartoCssStyleSet::with_asset_package(cartocss, package).into())
        }
        _ => bail!("unknown style type: {}", path.display()),
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let decoder = TileDecoder::new(style_source(&args.style)?)?;

    if let Some(config) = args.config.as_ref() {
        let text = std::fs::read_to_string(config)
            .with_context(|| format!("unable to read {}", config.display()))?;
        decoder.apply_config(&DecoderConfig::from_json(&text)?)?;
    }
    if args.ignore_layer_names {
        decoder.set_cartocss_layer_names_ignored(true)?;
    }
    if let Some(buffer) = args.buffer {
        decoder.set_buffering(buffer);
    }
    if args.feature_id_override {
        decoder.set_feature_id_override(true);
    }
    if args.layer_name_override.is_some() {
        decoder.set_layer_name_override(args.layer_name_override.clone());
    }
    for (name, value) in args.params.iter() {
        if !decoder.set_style_parameter(name, value)? {
            eprintln!("style has no parameter {name} with value '{value}'");
        }
    }

    let data: Arc<[u8]> = std::fs::read(&args.tile_file)
        .with_context(|| format!("unable to read {}", args.tile_file.display()))?
        .into();

    if let Some(id) = args.feature {
        let limit = args.tile.limit();
        let bounds = MapBounds::new(
            MapPos::new(args.tile.x as f64, (limit - args.tile.y - 1) as f64),
            MapPos::new(args.tile.x as f64 + 1.0, (limit - args.tile.y) as f64),
        );
        match decoder.decode_feature(id, args.tile, &data, &bounds) {
            Some(feature) => println!("{feature:#?}"),
            None => bail!("feature {id} not found in {}", args.tile),
        }
        return Ok(());
    }

    let target = args.target.unwrap_or(args.tile);
    let Some(tiles) = decoder.decode_tile(args.tile, target, &data) else {
        bail!("unable to decode {}", args.tile);
    };
    let Some(tile) = tiles.get(&DEFAULT_RENDER_LAYER) else {
        bail!("no render layer in decoded {}", args.tile);
    };

    println!("{} drawn as {}", args.tile, tile.tile_id);
    for layer in tile.layers.iter() {
        println!(
            "{}: {} vertices, {} indices, {} draws, {} labels, {} markers",
            layer.name.as_deref().unwrap_or("*"),
            layer.geometry.vertices.len(),
            layer.geometry.indices.len(),
            layer.features.len(),
            layer.labels.len(),
            layer.markers.len(),
        );
        for label in layer.labels.iter() {
            println!("  label {} '{}'", label.feature_id, label.text);
        }
    }

    Ok(())
}
