use ahash::AHashMap as HashMap;

use roxmltree::{Document, Node};

use super::{Color, Expression, MapSettings, Rule, StyleLayer, StyleModel, Symbolizer, SymbolizerKind};
use crate::{
    error::{Error, Result},
    parameters::{ParameterDecl, ParameterKind, ParameterTable},
};

pub(super) const XML_PARSE_FAILED: &str = "Style element XML parsing failed";
const XML_PROCESSING_FAILED: &str = "XML style processing failed";

/// Parses a compiled symbolizer document.
pub(super) fn parse(text: &str) -> Result<StyleModel> {
    let document = Document::parse(text).map_err(|e| Error::style_parse(XML_PARSE_FAILED, e))?;
    process(document.root_element()).map_err(|e| Error::style_parse(XML_PROCESSING_FAILED, e))
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn process(map: Node<'_, '_>) -> Result<StyleModel, String> {
    if map.tag_name().name() != "Map" {
        return Err(format!("expected <Map> root element, found <{}>", map.tag_name().name()));
    }

    let mut settings = MapSettings::default();
    if let Some(color) = map.attribute("background-color") {
        settings.background_color = color
            .parse::<Color>()
            .map_err(|e| format!("background-color '{color}': {e}"))?;
    }
    settings.background_image = map.attribute("background-image").map(String::from);
    if let Some(dir) = map.attribute("font-directory") {
        settings.font_directory = dir.to_string();
    }

    let mut parameters = ParameterTable::new();
    let mut styles: HashMap<&str, Vec<Rule>> = HashMap::new();

    for child in elements(map) {
        match child.tag_name().name() {
            "NutiParameter" => {
                let (name, decl) = parameter(child)?;
                parameters.insert(name, decl);
            }
            "Style" => {
                let name = child
                    .attribute("name")
                    .ok_or("<Style> without a name attribute")?;
                let rules = elements(child)
                    .filter(|n| n.tag_name().name() == "Rule")
                    .map(rule)
                    .collect::<Result<Vec<_>, _>>()?;
                styles.insert(name, rules);
            }
            _ => (),
        }
    }

    let mut layers = Vec::new();
    for layer in elements(map).filter(|n| n.tag_name().name() == "Layer") {
        let mut rules = Vec::new();
        for style_name in elements(layer).filter(|n| n.tag_name().name() == "StyleName") {
            let style_name = style_name.text().unwrap_or_default().trim();
            let style = styles
                .get(style_name)
                .ok_or_else(|| format!("layer refers to unknown style '{style_name}'"))?;
            rules.extend(style.iter().cloned());
        }

        layers.push(StyleLayer {
            name: layer.attribute("name").map(String::from),
            rules,
        });
    }

    Ok(StyleModel {
        layers,
        parameters,
        settings,
    })
}

fn parameter(node: Node<'_, '_>) -> Result<(String, ParameterDecl), String> {
    let name = node
        .attribute("name")
        .ok_or("<NutiParameter> without a name attribute")?;
    let type_name = node.attribute("type").unwrap_or("string");
    let kind = ParameterKind::from_name(type_name)
        .ok_or_else(|| format!("parameter '{name}' has unknown type '{type_name}'"))?;

    let coerce = |text: &str| kind.coerce(text).map_err(|e| format!("parameter '{name}': {e}"));

    let mut enum_values = Vec::new();
    for value in elements(node).filter(|n| n.tag_name().name() == "Value") {
        let key = value
            .attribute("name")
            .ok_or_else(|| format!("parameter '{name}' has a value without a name"))?;
        enum_values.push((key.to_string(), coerce(value.attribute("value").unwrap_or_default())?));
    }

    let default_text = node.attribute("value").unwrap_or_default();
    let default = match enum_values.iter().find(|(k, _)| k == default_text) {
        Some((_, v)) => v.clone(),
        None => coerce(default_text)?,
    };

    Ok((
        name.to_string(),
        ParameterDecl {
            kind,
            default,
            enum_values,
        },
    ))
}

fn zoom_level(node: Node<'_, '_>) -> Result<u8, String> {
    let text = node.text().unwrap_or_default().trim();
    text.parse()
        .map_err(|_| format!("invalid zoom level '{text}'"))
}

fn rule(node: Node<'_, '_>) -> Result<Rule, String> {
    let mut rule = Rule::default();

    for child in elements(node) {
        let tag = child.tag_name().name();
        match tag {
            "Filter" => {
                let text = child.text().unwrap_or_default();
                rule.filter = Expression::parse(text)?;
            }
            "MinZoom" => rule.min_zoom = Some(zoom_level(child)?),
            "MaxZoom" => rule.max_zoom = Some(zoom_level(child)?),
            tag if tag.ends_with("Symbolizer") => {
                let Some(kind) = SymbolizerKind::from_element(tag) else {
                    log::warn!("ignoring unsupported <{tag}>");
                    continue;
                };

                let mut symbolizer = Symbolizer::new(kind);
                for attr in child.attributes() {
                    symbolizer.set(attr.name(), Expression::parse_template(attr.value())?);
                }

                if kind == SymbolizerKind::Text
                    && let Some(text) = child.text().map(str::trim).filter(|t| !t.is_empty())
                {
                    symbolizer.set("text-name", Expression::parse(text)?);
                }

                rule.symbolizers.push(symbolizer);
            }
            _ => (),
        }
    }

    Ok(rule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    const STYLE: &str = r##"
        <Map background-color="#ffffff" background-image="img/paper.png" font-directory="../fonts">
            <NutiParameter name="lang" type="string" value="en">
                <Value name="en" value="name_en"/>
                <Value name="de" value="name_de"/>
            </NutiParameter>
            <NutiParameter name="width" type="float" value="2"/>
            <Layer name="water">
                <StyleName>water</StyleName>
            </Layer>
            <Style name="water">
                <Rule>
                    <Filter>[class] = 'ocean'</Filter>
                    <MinZoom>4</MinZoom>
                    <MaxZoom>14</MaxZoom>
                    <PolygonSymbolizer fill="#0000ff" fill-opacity="0.5"/>
                    <LineSymbolizer stroke="#000" stroke-width="[nuti::width]"/>
                </Rule>
                <Rule>
                    <TextSymbolizer face-name="Noto Sans" size="12">[name]</TextSymbolizer>
                    <DebugSymbolizer/>
                </Rule>
            </Style>
            <Layer name="roads"/>
        </Map>"##;

    #[test]
    fn parses_document() {
        let model = parse(STYLE).unwrap();

        assert_eq!(model.settings.background_color, Color::WHITE);
        assert_eq!(model.settings.background_image.as_deref(), Some("img/paper.png"));
        assert_eq!(model.settings.font_directory, "../fonts");

        assert_eq!(model.parameters.names(), vec!["lang", "width"]);
        assert_eq!(model.parameters.get("lang").unwrap().default, Value::String("name_en".into()));
        assert_eq!(model.parameters.get("width").unwrap().default, Value::Float(2.0));

        assert_eq!(model.layers.len(), 2);
        let water = &model.layers[0];
        assert_eq!(water.name.as_deref(), Some("water"));
        assert_eq!(water.rules.len(), 2);
        assert_eq!((water.rules[0].min_zoom, water.rules[0].max_zoom), (Some(4), Some(14)));

        let line = &water.rules[0].symbolizers[1];
        assert_eq!(line.kind, SymbolizerKind::Line);
        assert_eq!(line.property("stroke-width"), Some(&Expression::Parameter("width".into())));

        let text = &water.rules[1].symbolizers;
        assert_eq!(text.len(), 1);
        assert_eq!(text[0].property("text-name"), Some(&Expression::Field("name".into())));

        assert!(model.layers[1].rules.is_empty());
    }

    #[test]
    fn processing_errors() {
        let err = parse(r#"<Map><Layer name="a"><StyleName>nope</StyleName></Layer></Map>"#).unwrap_err();
        assert!(matches!(err, Error::StyleParse { ref message, .. } if message == XML_PROCESSING_FAILED));

        let err = parse(r#"<Map><NutiParameter name="x" type="bool" value="maybe"/></Map>"#).unwrap_err();
        assert!(matches!(err, Error::StyleParse { ref diagnostic, .. } if diagnostic.contains("maybe")));

        assert!(parse(r#"<Style/>"#).is_err());
        assert!(parse(r#"<Map><Style name="s"><Rule><Filter>[a] =</Filter></Rule></Style></Map>"#).is_err());
    }

    #[test]
    fn syntax_errors() {
        let err = parse("<Map><Style></Map>").unwrap_err();
        assert!(matches!(err, Error::StyleParse { ref message, .. } if message == XML_PARSE_FAILED));
    }
}
