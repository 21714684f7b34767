use std::marker::PhantomData;

use serde::Deserialize;

use super::{StyleModel, cartocss};
use crate::{
    asset::{self, AssetPackage},
    parameters::{ParameterDecl, ParameterKind, ParameterTable},
    value::Value,
};

#[derive(Deserialize, Debug)]
struct Project {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    styles: Vec<String>,
    #[serde(default)]
    nutiparameters: Ordered<NutiParameter>,
}

#[derive(Deserialize, Debug)]
struct NutiParameter {
    #[serde(rename = "type")]
    kind: Option<String>,
    default: serde_json::Value,
    #[serde(default)]
    values: Ordered<serde_json::Value>,
}

/// JSON object entries in document order.
#[derive(Debug)]
struct Ordered<T>(Vec<(String, T)>);

impl<T> Default for Ordered<T> {
    fn default() -> Self {
        Ordered(Vec::new())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Ordered<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

struct OrderedVisitor<T>(PhantomData<T>);

impl<'de, T: Deserialize<'de>> serde::de::Visitor<'de> for OrderedVisitor<T> {
    type Value = Ordered<T>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "an object")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<String, T>()? {
            entries.push((key, value));
        }
        Ok(Ordered(entries))
    }
}

impl NutiParameter {
    fn declaration(&self, name: &str) -> Result<ParameterDecl, String> {
        let enum_values: Vec<(String, Value)> = self
            .values
            .0
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v)))
            .collect();

        let default = Value::from(&self.default);
        let default = match default.as_str().and_then(|key| enum_values.iter().find(|(k, _)| k == key)) {
            Some((_, v)) => v.clone(),
            None => default,
        };

        let kind = match self.kind.as_deref() {
            Some(type_name) => ParameterKind::from_name(type_name)
                .ok_or_else(|| format!("parameter '{name}' has unknown type '{type_name}'"))?,
            None => ParameterKind::of(&default),
        };

        let convert = |v: &Value| kind.convert(v).map_err(|e| format!("parameter '{name}': {e}"));

        Ok(ParameterDecl {
            kind,
            default: convert(&default)?,
            enum_values: enum_values
                .iter()
                .map(|(k, v)| Ok((k.clone(), convert(v)?)))
                .collect::<Result<_, String>>()?,
        })
    }
}

/// Loads a project manifest, compiling its CartoCSS styles in listed order.
pub(super) fn load(
    package: &dyn AssetPackage,
    asset_name: &str,
    data: &[u8],
    ignore_layer_names: bool,
) -> Result<StyleModel, String> {
    let project: Project = serde_json::from_slice(data).map_err(|e| format!("invalid project file: {e}"))?;
    log::debug!(
        "loading project '{}' with {} styles",
        project.name.as_deref().unwrap_or(asset_name),
        project.styles.len()
    );

    let base = asset::file_path(asset_name);
    let mut source = String::new();
    for style in project.styles.iter() {
        let name = asset::normalize_path(&format!("{base}{style}"));
        let data = package
            .load_asset(&name)
            .ok_or_else(|| format!("missing style asset '{name}'"))?;
        let text = std::str::from_utf8(&data).map_err(|e| format!("style asset '{name}': {e}"))?;
        source.push_str(text);
        source.push('\n');
    }

    let style = cartocss::compile(&source, ignore_layer_names)?;

    let mut parameters = ParameterTable::new();
    for (name, param) in project.nutiparameters.0.iter() {
        parameters.insert(name.clone(), param.declaration(name)?);
    }

    Ok(StyleModel {
        layers: style.layers,
        parameters,
        settings: style.settings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(json: &str) -> Result<ParameterDecl, String> {
        let param: NutiParameter = serde_json::from_str(json).unwrap();
        param.declaration("p")
    }

    #[test]
    fn parameter_kinds() {
        assert_eq!(decl(r#"{"default": 3}"#).unwrap().kind, ParameterKind::Integer);
        assert_eq!(decl(r#"{"default": 0.5}"#).unwrap().kind, ParameterKind::Float);
        assert_eq!(decl(r#"{"default": false}"#).unwrap().kind, ParameterKind::Bool);

        let float = decl(r#"{"type": "float", "default": 3}"#).unwrap();
        assert_eq!(float.default, Value::Float(3.0));

        assert!(decl(r#"{"type": "color", "default": "red"}"#).is_err());
        assert!(decl(r#"{"type": "int", "default": "many"}"#).is_err());
    }

    #[test]
    fn enumerations_keep_key_order() {
        let lang = decl(r#"{"default": "zh", "values": {"zh": "name_zh", "en": "name_en", "af": "name_af"}}"#).unwrap();
        let keys: Vec<_> = lang.enum_values.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["zh", "en", "af"]);
        assert_eq!(lang.default, Value::String("name_zh".into()));

        let buildings = decl(r#"{"default": 1, "values": {"off": 0, "flat": 1, "3d": 2}}"#).unwrap();
        assert_eq!(buildings.kind, ParameterKind::Integer);
        assert_eq!(buildings.enum_key(&buildings.default), Some("flat"));
    }
}
