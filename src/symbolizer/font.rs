use std::sync::Arc;

use fontdue::{Font, FontSettings};

use crate::asset::AssetPackage;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FontId(u16);

impl FontId {
    /// The bundled face used when no registered font matches.
    pub const FALLBACK: FontId = FontId(0);
}

struct RegisteredFont {
    /// Normalized file stem, `NotoSans-Bold.ttf` is `notosansbold`.
    name: String,
    font: Arc<Font>,
}

/// Font faces shipped with the style, looked up by face name.
pub struct FontRegistry {
    fonts: Vec<RegisteredFont>,
    fallback: Option<Arc<Font>>,
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn file_stem(name: &str) -> &str {
    let file = name.rsplit('/').next().unwrap_or(name);
    file.rsplit_once('.').map_or(file, |(stem, _)| stem)
}

impl FontRegistry {
    pub fn new() -> Self {
        let fallback = match Font::from_bytes(notosans::REGULAR_TTF, FontSettings::default()) {
            Ok(font) => Some(Arc::new(font)),
            Err(e) => {
                log::error!("unable to load bundled fallback font: {e}");
                None
            }
        };

        FontRegistry {
            fonts: Vec::new(),
            fallback,
        }
    }

    /// Registers every asset below `prefix`. Assets that are not valid fonts
    /// are skipped.
    pub fn from_package(package: &dyn AssetPackage, prefix: &str) -> Self {
        let mut registry = Self::new();

        for name in package.asset_names() {
            if name.len() <= prefix.len() || !name.starts_with(prefix) {
                continue;
            }
            let Some(data) = package.load_asset(&name) else {
                continue;
            };

            match Font::from_bytes(data.as_ref(), FontSettings::default()) {
                Ok(font) => registry.register(&name, font),
                Err(e) => log::warn!("skipping font asset '{name}': {e}"),
            }
        }

        log::debug!("registered {} fonts below '{prefix}'", registry.len());
        registry
    }

    /// Faces are matched by file stem, so `Noto Sans Bold` finds
    /// `NotoSans-Bold.ttf`.
    fn register(&mut self, asset_name: &str, font: Font) {
        self.fonts.push(RegisteredFont {
            name: normalize_name(file_stem(asset_name)),
            font: Arc::new(font),
        });
    }

    /// Registered fonts, not counting the fallback.
    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    /// Resolves a comma separated face name list to the first registered
    /// match, or the fallback face.
    pub fn font(&self, face_names: &str) -> Option<(FontId, &Font)> {
        for face in face_names.split(',') {
            let face = normalize_name(face);
            if face.is_empty() {
                continue;
            }
            if let Some(idx) = self.fonts.iter().position(|f| f.name == face) {
                return Some((FontId(idx as u16 + 1), self.fonts[idx].font.as_ref()));
            }
        }

        if !face_names.trim().is_empty() && !self.fonts.is_empty() {
            log::debug!("unable to find matching font face for '{face_names}'");
        }

        self.fallback
            .as_deref()
            .map(|font| (FontId::FALLBACK, font))
    }

    pub fn font_id(&self, font_id: FontId) -> Option<&Font> {
        match font_id.0 {
            0 => self.fallback.as_deref(),
            n => self.fonts.get(n as usize - 1).map(|f| f.font.as_ref()),
        }
    }
}

impl Default for FontRegistry {
    fn default() -> Self {
        Self::new()
    }
}
