//! Compiler for the CartoCSS subset used by vector tile styles.
//!
//! Supported: comments, `@variable` definitions, a `Map { .. }` block and
//! rulesets with `#layer` or `*` selectors, `[filter]` groups, `::attachment`
//! suffixes and nested blocks. Nested blocks inherit the properties of their
//! parent block.

use ahash::AHashMap as HashMap;

use super::{
    Color, Expression, MapSettings, Rule, StyleLayer, Symbolizer, SymbolizerKind,
    expression::BinaryOp,
};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CartoStyle {
    pub settings: MapSettings,
    pub layers: Vec<StyleLayer>,
}

pub fn compile(source: &str, ignore_layer_names: bool) -> Result<CartoStyle, String> {
    let source = strip_comments(source)?;
    let mut compiler = Compiler {
        variables: HashMap::new(),
        settings: MapSettings::default(),
        layers: Vec::new(),
        ignore_layer_names,
    };

    compiler.block(&source, &[], &[], true)?;

    Ok(CartoStyle {
        settings: compiler.settings,
        layers: compiler
            .layers
            .into_iter()
            .map(|(_, layer)| layer)
            .collect(),
    })
}

#[derive(Debug, Clone, PartialEq)]
struct Selector {
    /// `None` for `*`.
    layer: Option<String>,
    filter: Expression,
    min_zoom: Option<u8>,
    max_zoom: Option<u8>,
}

impl Selector {
    fn any() -> Self {
        Selector {
            layer: None,
            filter: Expression::default(),
            min_zoom: None,
            max_zoom: None,
        }
    }

    fn nested(&self, child: &Selector) -> Selector {
        Selector {
            layer: child.layer.clone().or_else(|| self.layer.clone()),
            filter: self.filter.clone().and(child.filter.clone()),
            min_zoom: max_option(self.min_zoom, child.min_zoom),
            max_zoom: min_option(self.max_zoom, child.max_zoom),
        }
    }

    fn add_filter(&mut self, text: &str) -> Result<(), String> {
        let exp = Expression::parse(text)?;

        if let Expression::Binary(op, left, right) = &exp
            && let (Expression::Zoom, Expression::Constant(level)) = (left.as_ref(), right.as_ref())
        {
            let level = level
                .as_f64()
                .ok_or_else(|| format!("zoom filter needs a number: [{text}]"))?
                .clamp(0.0, u8::MAX as f64) as u8;
            let (min, max) = match op {
                BinaryOp::GtEq => (Some(level), None),
                BinaryOp::Gt => (Some(level.saturating_add(1)), None),
                BinaryOp::Lteq => (None, Some(level)),
                BinaryOp::Lt => (None, Some(level.saturating_sub(1))),
                BinaryOp::Eq => (Some(level), Some(level)),
                _ => return Err(format!("unsupported zoom filter [{text}]")),
            };
            self.min_zoom = max_option(self.min_zoom, min);
            self.max_zoom = min_option(self.max_zoom, max);
            return Ok(());
        }

        self.filter = std::mem::take(&mut self.filter).and(exp);
        Ok(())
    }
}

fn max_option(a: Option<u8>, b: Option<u8>) -> Option<u8> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn min_option(a: Option<u8>, b: Option<u8>) -> Option<u8> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

enum Target {
    Map,
    Rules(Vec<Selector>),
}

struct Compiler {
    variables: HashMap<String, String>,
    settings: MapSettings,
    layers: Vec<(Option<String>, StyleLayer)>,
    ignore_layer_names: bool,
}

impl Compiler {
    /// Compiles the statements of one block. `top_level` blocks may only hold
    /// variables and rulesets.
    fn block(
        &mut self,
        mut body: &str,
        parents: &[Selector],
        inherited: &[(String, String)],
        top_level: bool,
    ) -> Result<(), String> {
        let mut own: Vec<(String, String)> = Vec::new();
        let mut nested: Vec<(&str, &str)> = Vec::new();

        loop {
            body = body.trim_start();
            if body.is_empty() {
                break;
            }

            let Some(end) = find_outside(body, &[';', '{', '}']) else {
                if top_level {
                    return Err(format!("unterminated statement '{}'", body.trim()));
                }
                // last declaration of a block may omit the ';'
                self.declaration(body.trim(), &mut own, top_level)?;
                break;
            };

            match body.as_bytes()[end] {
                b'{' => {
                    let close = matching_brace(body, end)?;
                    nested.push((body[..end].trim(), &body[end + 1..close]));
                    body = &body[close + 1..];
                }
                b';' => {
                    self.declaration(body[..end].trim(), &mut own, top_level)?;
                    body = &body[end + 1..];
                }
                _ => return Err("unexpected '}'".to_string()),
            }
        }

        let properties: Vec<(String, String)> = inherited
            .iter()
            .filter(|(name, _)| !own.iter().any(|(o, _)| o == name))
            .chain(own.iter())
            .cloned()
            .collect();

        if !parents.is_empty() && !own.is_empty() {
            self.emit(parents, &properties)?;
        }

        for (selectors, inner) in nested {
            match self.selectors(selectors)? {
                Target::Map => self.map_block(inner)?,
                Target::Rules(selectors) => {
                    let combined: Vec<Selector> = if parents.is_empty() {
                        selectors
                    } else {
                        parents
                            .iter()
                            .flat_map(|p| selectors.iter().map(|s| p.nested(s)))
                            .collect()
                    };
                    self.block(inner, &combined, &properties, false)?;
                }
            }
        }

        Ok(())
    }

    fn declaration(
        &mut self,
        statement: &str,
        properties: &mut Vec<(String, String)>,
        top_level: bool,
    ) -> Result<(), String> {
        if statement.is_empty() {
            return Ok(());
        }

        let (name, value) = statement
            .split_once(':')
            .ok_or_else(|| format!("expected 'name: value', found '{statement}'"))?;
        let name = name.trim();
        let value = self.substitute(value.trim())?;

        if let Some(var) = name.strip_prefix('@') {
            self.variables.insert(var.to_string(), value);
        } else if top_level {
            return Err(format!("property '{name}' outside of a ruleset"));
        } else {
            properties.retain(|(n, _)| n != name);
            properties.push((name.to_string(), value));
        }

        Ok(())
    }

    fn substitute(&self, value: &str) -> Result<String, String> {
        let mut out = String::new();
        let mut rest = value;

        while let Some(at) = rest.find('@') {
            out.push_str(&rest[..at]);
            let name_len = rest[at + 1..]
                .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
                .unwrap_or(rest.len() - at - 1);
            let name = &rest[at + 1..at + 1 + name_len];
            let var = self
                .variables
                .get(name)
                .ok_or_else(|| format!("undefined variable '@{name}'"))?;
            out.push_str(var);
            rest = &rest[at + 1 + name_len..];
        }

        out.push_str(rest);
        Ok(out)
    }

    fn selectors(&self, text: &str) -> Result<Target, String> {
        if text == "Map" {
            return Ok(Target::Map);
        }

        let mut selectors = Vec::new();
        for part in split_outside(text, ',') {
            selectors.push(selector(part.trim())?);
        }
        Ok(Target::Rules(selectors))
    }

    fn map_block(&mut self, body: &str) -> Result<(), String> {
        for statement in split_outside(body, ';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            let (name, value) = statement
                .split_once(':')
                .ok_or_else(|| format!("expected 'name: value', found '{statement}'"))?;
            let value = self.substitute(value.trim())?;
            let value = unquote(unwrap_url(&value));

            match name.trim() {
                "background-color" => {
                    self.settings.background_color = value
                        .parse::<Color>()
                        .map_err(|e| format!("background-color '{value}': {e}"))?;
                }
                "background-image" => self.settings.background_image = Some(value.to_string()),
                "font-directory" => self.settings.font_directory = value.to_string(),
                other => log::debug!("ignoring Map property '{other}'"),
            }
        }

        Ok(())
    }

    fn emit(&mut self, selectors: &[Selector], properties: &[(String, String)]) -> Result<(), String> {
        let mut symbolizers: Vec<Symbolizer> = Vec::new();
        for (name, value) in properties {
            let Some((kind, property)) = property_target(name) else {
                log::debug!("ignoring unsupported property '{name}'");
                continue;
            };

            let value = property_value(value)?;
            match symbolizers.iter_mut().find(|s| s.kind == kind) {
                Some(symbolizer) => symbolizer.set(property, value),
                None => {
                    let mut symbolizer = Symbolizer::new(kind);
                    symbolizer.set(property, value);
                    symbolizers.push(symbolizer);
                }
            }
        }

        if symbolizers.is_empty() {
            return Ok(());
        }

        for selector in selectors {
            let rule = Rule {
                filter: selector.filter.clone(),
                min_zoom: selector.min_zoom,
                max_zoom: selector.max_zoom,
                symbolizers: symbolizers.clone(),
            };
            self.layer(selector.layer.clone()).rules.push(rule);
        }

        Ok(())
    }

    fn layer(&mut self, name: Option<String>) -> &mut StyleLayer {
        let idx = match self.layers.iter().position(|(n, _)| *n == name) {
            Some(idx) => idx,
            None => {
                let layer = StyleLayer {
                    name: if self.ignore_layer_names { None } else { name.clone() },
                    rules: Vec::new(),
                };
                self.layers.push((name, layer));
                self.layers.len() - 1
            }
        };
        &mut self.layers[idx].1
    }
}

fn selector(text: &str) -> Result<Selector, String> {
    let mut selector = Selector::any();

    let name_end = text.find('[').unwrap_or(text.len());
    let name = text[..name_end].trim();
    let name = name.split_once("::").map_or(name, |(n, _)| n).trim();

    selector.layer = match name {
        "*" | "" => None,
        name if name.starts_with('#') && name.len() > 1 => Some(name[1..].to_string()),
        name => return Err(format!("unsupported selector '{name}'")),
    };

    let mut rest = &text[name_end..];
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        if rest.starts_with("::") {
            // attachments after filters
            let end = rest.find('[').unwrap_or(rest.len());
            rest = &rest[end..];
            continue;
        }
        if !rest.starts_with('[') {
            return Err(format!("unexpected '{rest}' in selector '{text}'"));
        }
        let end = find_outside(&rest[1..], &[']'])
            .ok_or_else(|| format!("unterminated filter in selector '{text}'"))?
            + 1;
        selector.add_filter(&rest[1..end])?;
        rest = &rest[end + 1..];
    }

    Ok(selector)
}

/// Maps a CartoCSS property onto a symbolizer and its XML attribute name.
fn property_target(name: &str) -> Option<(SymbolizerKind, &str)> {
    if let Some(prop) = name.strip_prefix("polygon-pattern-") {
        return Some((SymbolizerKind::PolygonPattern, prop));
    }
    if let Some(prop) = name.strip_prefix("line-pattern-") {
        return Some((SymbolizerKind::LinePattern, prop));
    }
    if let Some(prop) = name.strip_prefix("polygon-") {
        let prop = match prop {
            "fill" => "fill",
            "opacity" => "fill-opacity",
            prop => prop,
        };
        return Some((SymbolizerKind::Polygon, prop));
    }
    if let Some(prop) = name.strip_prefix("line-") {
        let prop = match prop {
            "color" => "stroke",
            "width" => "stroke-width",
            "opacity" => "stroke-opacity",
            "dasharray" => "stroke-dasharray",
            "cap" => "stroke-linecap",
            "join" => "stroke-linejoin",
            prop => prop,
        };
        return Some((SymbolizerKind::Line, prop));
    }
    if let Some(prop) = name.strip_prefix("marker-") {
        return Some((SymbolizerKind::Marker, prop));
    }
    if let Some(prop) = name.strip_prefix("text-") {
        let prop = match prop {
            "name" => "text-name",
            "transform" => "text-transform",
            prop => prop,
        };
        return Some((SymbolizerKind::Text, prop));
    }
    None
}

fn property_value(value: &str) -> Result<Expression, String> {
    let value = unwrap_url(value);

    if value.contains('[') {
        if let Ok(exp) = Expression::parse(value) {
            return Ok(exp);
        }
        return Expression::parse_template(unquote(value));
    }

    let unquoted = unquote(value);
    if unquoted.len() != value.len() {
        return Ok(Expression::Constant(Value::String(unquoted.to_string())));
    }
    Expression::parse_template(value)
}

fn unwrap_url(value: &str) -> &str {
    value
        .strip_prefix("url(")
        .and_then(|v| v.strip_suffix(')'))
        .map_or(value, |v| unquote(v.trim()))
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(quote).and_then(|v| v.strip_suffix(quote))
            && !inner.contains(quote)
        {
            return inner;
        }
    }
    value
}

/// Position of the first of `targets` outside string literals and brackets.
fn find_outside(text: &str, targets: &[char]) -> Option<usize> {
    let mut quote = None;
    let mut depth = 0usize;

    for (idx, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => (),
            (None, c) if targets.contains(&c) && (depth == 0 || c == ']' || c == ')') => {
                if depth == 0 {
                    return Some(idx);
                }
                depth -= 1;
            }
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth = depth.saturating_sub(1),
            _ => (),
        }
    }

    None
}

fn split_outside(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(idx) = find_outside(rest, &[separator]) {
        parts.push(&rest[..idx]);
        rest = &rest[idx + 1..];
    }
    parts.push(rest);
    parts
}

fn matching_brace(text: &str, open: usize) -> Result<usize, String> {
    let mut depth = 0usize;
    let mut quote = None;

    for (idx, c) in text[open..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => (),
            (None, '"' | '\'') => quote = Some(c),
            (None, '{') => depth += 1,
            (None, '}') => {
                depth -= 1;
                if depth == 0 {
                    return Ok(open + idx);
                }
            }
            _ => (),
        }
    }

    Err("unterminated '{' block".to_string())
}

fn strip_comments(source: &str) -> Result<String, String> {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut quote = None;
    let mut parens = 0usize;

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) => {
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            (None, '"' | '\'') => {
                quote = Some(c);
                out.push(c);
            }
            (None, '/') if chars.peek() == Some(&'*') => {
                chars.next();
                let mut last = ' ';
                loop {
                    match chars.next() {
                        Some('/') if last == '*' => break,
                        Some(c) => last = c,
                        None => return Err("unterminated comment".to_string()),
                    }
                }
                out.push(' ');
            }
            (None, '/') if parens == 0 && chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            (None, c) => {
                match c {
                    '(' => parens += 1,
                    ')' => parens = parens.saturating_sub(1),
                    _ => (),
                }
                out.push(c);
            }
        }
    }

    Ok(out)
}
