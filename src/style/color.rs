use std::str::FromStr;

/// Non premultiplied color, channels in `0.0..=1.0`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Color { r, g, b, a }
    }

    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Color {
            r: (r as f32) / 255.0,
            g: (g as f32) / 255.0,
            b: (b as f32) / 255.0,
            a: 1.0,
        }
    }

    pub fn with_opacity(&self, opacity: f32) -> Color {
        Color {
            a: self.a * opacity.clamp(0.0, 1.0),
            ..*self
        }
    }

    /// Packed `0xAARRGGBB`.
    pub fn to_argb(&self) -> u32 {
        let c = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
        (c(self.a) << 24) | (c(self.r) << 16) | (c(self.g) << 8) | c(self.b)
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl FromStr for Color {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some(hex) = s.strip_prefix('#') {
            return parse_hex(hex);
        }

        if let Some((func, args)) = s.split_once('(') {
            let args = args.strip_suffix(')').ok_or("unterminated color function")?;
            let parts = args
                .split(',')
                .map(|p| p.trim().trim_end_matches('%').parse::<f32>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| "invalid color component")?;

            let color = match (func.trim(), parts.as_slice()) {
                ("rgb", [r, g, b]) => Color::new(r / 255.0, g / 255.0, b / 255.0, 1.0),
                ("rgba", [r, g, b, a]) => Color::new(r / 255.0, g / 255.0, b / 255.0, *a),
                ("hsl", [h, s, l]) => hsl_to_rgb(*h, *s, *l, 1.0),
                ("hsla", [h, s, l, a]) => hsl_to_rgb(*h, *s, *l, *a),
                _ => return Err("unsupported color function"),
            };

            return Ok(color);
        }

        let named = match s.to_ascii_lowercase().as_str() {
            "transparent" => Color::TRANSPARENT,
            "black" => Color::BLACK,
            "white" => Color::WHITE,
            "red" => Color::from_rgb(255, 0, 0),
            "green" => Color::from_rgb(0, 128, 0),
            "blue" => Color::from_rgb(0, 0, 255),
            "yellow" => Color::from_rgb(255, 255, 0),
            "gray" | "grey" => Color::from_rgb(128, 128, 128),
            _ => return Err("invalid color"),
        };

        Ok(named)
    }
}

fn parse_hex(hex: &str) -> Result<Color, &'static str> {
    let digit = |c: u8| -> Result<u8, &'static str> {
        match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'a'..=b'f' => Ok(c - b'a' + 10),
            b'A'..=b'F' => Ok(c - b'A' + 10),
            _ => Err("invalid hex digit"),
        }
    };

    let bytes = hex.as_bytes();
    let channels: Vec<u8> = match bytes.len() {
        3 | 4 => bytes
            .iter()
            .map(|c| digit(*c).map(|d| d << 4 | d))
            .collect::<Result<_, _>>()?,
        6 | 8 => bytes
            .chunks(2)
            .map(|pair| -> Result<u8, &'static str> { Ok(digit(pair[0])? << 4 | digit(pair[1])?) })
            .collect::<Result<_, _>>()?,
        _ => return Err("invalid hex color length"),
    };

    let a = channels.get(3).copied().unwrap_or(0xff);
    let mut color = Color::from_rgb(channels[0], channels[1], channels[2]);
    color.a = a as f32 / 255.0;
    Ok(color)
}

/// `h` in degrees, `s` and `l` in percent.
fn hsl_to_rgb(h: f32, s: f32, l: f32, a: f32) -> Color {
    let h = h.rem_euclid(360.0);
    let s = (s / 100.0).clamp(0.0, 1.0);
    let l = (l / 100.0).clamp(0.0, 1.0);

    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let h_prime = h / 60.0;
    let x = c * (1.0 - ((h_prime % 2.0) - 1.0).abs());
    let (r, g, b) = match h_prime {
        v if v < 1.0 => (c, x, 0.0),
        v if v < 2.0 => (x, c, 0.0),
        v if v < 3.0 => (0.0, c, x),
        v if v < 4.0 => (0.0, x, c),
        v if v < 5.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    let m = l - (c / 2.0);
    Color::new(r + m, g + m, b + m, a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_forms() {
        assert_eq!("#fff".parse::<Color>(), Ok(Color::WHITE));
        assert_eq!("#000000".parse::<Color>(), Ok(Color::BLACK));
        assert_eq!("#ff000080".parse::<Color>().unwrap().to_argb(), 0x80ff0000);
        assert!("#ggg".parse::<Color>().is_err());
        assert!("#12345".parse::<Color>().is_err());
    }

    #[test]
    fn parses_functions_and_names() {
        assert_eq!("rgb(255, 0, 0)".parse::<Color>().unwrap().to_argb(), 0xffff0000);
        assert_eq!("rgba(0,0,255,0.5)".parse::<Color>().unwrap().to_argb(), 0x800000ff);
        assert_eq!("hsl(120, 100%, 50%)".parse::<Color>().unwrap().to_argb(), 0xff00ff00);
        assert_eq!("Transparent".parse::<Color>(), Ok(Color::TRANSPARENT));
        assert!("rgb(1,2)".parse::<Color>().is_err());
    }

    #[test]
    fn opacity_scales_alpha() {
        assert_eq!(Color::WHITE.with_opacity(0.5).a, 0.5);
        assert_eq!(Color::WHITE.with_opacity(2.0).a, 1.0);
    }
}
