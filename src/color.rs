//! Parsing and comparison of CSS color literals.
//!
//! Token values and `var()` fallbacks are compared semantically: `#F00`,
//! `#ff0000`, and `rgb(255, 0, 0)` are the same color. Syntaxes outside the
//! supported set (hex, `rgb()`/`rgba()`, `hsl()`/`hsla()`, basic named
//! colors) parse to `None` and callers degrade to skipping the comparison.

/// An sRGB color with alpha, each channel in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

/// Per-channel tolerance for equality: one step of an 8-bit channel.
const CHANNEL_TOLERANCE: f64 = 1.0 / 255.0;

impl Rgba {
    pub const fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    /// Whether two colors are equal within 1/255 per channel, alpha included.
    pub fn approx_eq(&self, other: &Rgba) -> bool {
        (self.r - other.r).abs() <= CHANNEL_TOLERANCE
            && (self.g - other.g).abs() <= CHANNEL_TOLERANCE
            && (self.b - other.b).abs() <= CHANNEL_TOLERANCE
            && (self.a - other.a).abs() <= CHANNEL_TOLERANCE
    }

    /// Canonical lowercase hex form: `#rrggbb`, or `#rrggbbaa` when alpha < 1.
    pub fn to_hex(&self) -> String {
        let r = (self.r * 255.0).round() as u8;
        let g = (self.g * 255.0).round() as u8;
        let b = (self.b * 255.0).round() as u8;
        if self.a < 1.0 {
            let a = (self.a * 255.0).round() as u8;
            format!("#{r:02x}{g:02x}{b:02x}{a:02x}")
        } else {
            format!("#{r:02x}{g:02x}{b:02x}")
        }
    }
}

/// Parse a CSS color literal. Returns `None` for anything outside the
/// supported subset.
pub fn parse(input: &str) -> Option<Rgba> {
    let s = input.trim();
    if let Some(hex) = s.strip_prefix('#') {
        return parse_hex(hex);
    }
    let lower = s.to_ascii_lowercase();
    if let Some(args) = function_args(&lower, &["rgb", "rgba"]) {
        return parse_rgb_args(&args);
    }
    if let Some(args) = function_args(&lower, &["hsl", "hsla"]) {
        return parse_hsl_args(&args);
    }
    named(&lower)
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let nib = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok();
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    let (r, g, b, a) = match hex.len() {
        3 => (nib(0)? * 17, nib(1)? * 17, nib(2)? * 17, 255),
        4 => (nib(0)? * 17, nib(1)? * 17, nib(2)? * 17, nib(3)? * 17),
        6 => (byte(0)?, byte(2)?, byte(4)?, 255),
        8 => (byte(0)?, byte(2)?, byte(4)?, byte(6)?),
        _ => return None,
    };
    Some(Rgba::new(
        r as f64 / 255.0,
        g as f64 / 255.0,
        b as f64 / 255.0,
        a as f64 / 255.0,
    ))
}

/// Extract `args` from `name(args)` when `name` is one of the given names.
fn function_args(s: &str, names: &[&str]) -> Option<String> {
    for name in names {
        if let Some(rest) = s.strip_prefix(name) {
            let rest = rest.trim_start();
            let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
            return Some(inner.to_string());
        }
    }
    None
}

/// Split function args on commas or whitespace, dropping a `/` alpha
/// separator so both legacy and modern syntax parse.
fn split_args(args: &str) -> Vec<&str> {
    args.split(|c: char| c == ',' || c.is_whitespace() || c == '/')
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_channel(part: &str) -> Option<f64> {
    if let Some(pct) = part.strip_suffix('%') {
        let v: f64 = pct.parse().ok()?;
        Some((v / 100.0).clamp(0.0, 1.0))
    } else {
        let v: f64 = part.parse().ok()?;
        Some((v / 255.0).clamp(0.0, 1.0))
    }
}

fn parse_alpha(part: &str) -> Option<f64> {
    if let Some(pct) = part.strip_suffix('%') {
        let v: f64 = pct.parse().ok()?;
        Some((v / 100.0).clamp(0.0, 1.0))
    } else {
        let v: f64 = part.parse().ok()?;
        Some(v.clamp(0.0, 1.0))
    }
}

fn parse_rgb_args(args: &str) -> Option<Rgba> {
    let parts = split_args(args);
    if parts.len() != 3 && parts.len() != 4 {
        return None;
    }
    let r = parse_channel(parts[0])?;
    let g = parse_channel(parts[1])?;
    let b = parse_channel(parts[2])?;
    let a = match parts.get(3) {
        Some(p) => parse_alpha(p)?,
        None => 1.0,
    };
    Some(Rgba::new(r, g, b, a))
}

fn parse_hsl_args(args: &str) -> Option<Rgba> {
    let parts = split_args(args);
    if parts.len() != 3 && parts.len() != 4 {
        return None;
    }
    let h: f64 = parts[0].trim_end_matches("deg").parse().ok()?;
    let s: f64 = parts[1].strip_suffix('%')?.parse().ok()?;
    let l: f64 = parts[2].strip_suffix('%')?.parse().ok()?;
    let a = match parts.get(3) {
        Some(p) => parse_alpha(p)?,
        None => 1.0,
    };
    let (r, g, b) = hsl_to_rgb(h.rem_euclid(360.0), (s / 100.0).clamp(0.0, 1.0), (l / 100.0).clamp(0.0, 1.0));
    Some(Rgba::new(r, g, b, a))
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (f64, f64, f64) {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let hp = h / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r1, g1, b1) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    (r1 + m, g1 + m, b1 + m)
}

/// CSS Level 1/2 named colors plus the handful that show up in token files.
fn named(name: &str) -> Option<Rgba> {
    let hex = match name {
        "black" => "000000",
        "silver" => "c0c0c0",
        "gray" | "grey" => "808080",
        "white" => "ffffff",
        "maroon" => "800000",
        "red" => "ff0000",
        "purple" => "800080",
        "fuchsia" | "magenta" => "ff00ff",
        "green" => "008000",
        "lime" => "00ff00",
        "olive" => "808000",
        "yellow" => "ffff00",
        "navy" => "000080",
        "blue" => "0000ff",
        "teal" => "008080",
        "aqua" | "cyan" => "00ffff",
        "orange" => "ffa500",
        "rebeccapurple" => "663399",
        "transparent" => return Some(Rgba::new(0.0, 0.0, 0.0, 0.0)),
        _ => return None,
    };
    parse_hex(hex)
}

/// Semantic equality of two color literals; `None` when either side fails
/// to parse (caller skips the comparison).
pub fn literals_match(a: &str, b: &str) -> Option<bool> {
    Some(parse(a)?.approx_eq(&parse(b)?))
}
