//! Generated stand-in images.
//!
//! Broken `<img>` tags look worse than a grey card with a short note, so the
//! proxy answers exhausted lookups with one of these SVGs.

use base64::{Engine as _, engine::general_purpose::STANDARD};

pub const PLACEHOLDER_CONTENT_TYPE: &str = "image/svg+xml";
pub const DEFAULT_WIDTH: u32 = 400;
pub const DEFAULT_HEIGHT: u32 = 225;

const MAX_MESSAGE_CHARS: usize = 60;
const BACKGROUND: &str = "#f3f4f6";
const FOREGROUND: &str = "#6b7280";

/// Renders a `width`x`height` SVG with `message` centered. Output depends only
/// on the arguments.
pub fn render_svg(width: u32, height: u32, message: &str) -> String {
    let text = escape_xml(&truncate(message.trim(), MAX_MESSAGE_CHARS));
    format!(
        concat!(
            r#"<svg width="{w}" height="{h}" viewBox="0 0 {w} {h}" xmlns="http://www.w3.org/2000/svg">"#,
            r#"<rect width="100%" height="100%" fill="{bg}"/>"#,
            r#"<text x="50%" y="50%" font-family="Arial, sans-serif" font-size="16" fill="{fg}" text-anchor="middle" dy=".3em">{text}</text>"#,
            "</svg>"
        ),
        w = width,
        h = height,
        bg = BACKGROUND,
        fg = FOREGROUND,
        text = text,
    )
}

pub fn default_svg(message: &str) -> String {
    render_svg(DEFAULT_WIDTH, DEFAULT_HEIGHT, message)
}

/// Inline `data:` form, used for catalog entries that have no usable cover.
pub fn data_url(width: u32, height: u32, message: &str) -> String {
    let svg = render_svg(width, height, message);
    format!("data:{PLACEHOLDER_CONTENT_TYPE};base64,{}", STANDARD.encode(svg))
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if c.is_control() => out.push(' '),
            c => out.push(c),
        }
    }
    out
}
