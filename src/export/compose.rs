use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::DynamicImage;
use resvg::render;
use std::io::Cursor;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tiny_skia::Pixmap;
use ttf_parser::{Face, name_id};
use usvg::{Options, Tree, fontdb};

use super::ExportError;

/// Source images are always drawn into a square of this size.
pub const IMAGE_SIZE: u32 = 512;
const STRIP_PADDING: f32 = 16.0;
const TEXT_MAX_WIDTH: f32 = (IMAGE_SIZE - 24) as f32;
const OVERLAY_BAND_OPACITY: f32 = 0.45;

pub const CAPTION_MAX_CHARS: usize = 40;
pub const SUBCAPTION_MAX_CHARS: usize = 60;

/// The fixed caption palette offered by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontColor {
    Black,
    Orange,
    Teal,
    Purple,
    Red,
    Blue,
}

impl FontColor {
    pub fn hex(&self) -> &'static str {
        match self {
            FontColor::Black => "#1a1a1a",
            FontColor::Orange => "#FF6B35",
            FontColor::Teal => "#4ECDC4",
            FontColor::Purple => "#9B59B6",
            FontColor::Red => "#E74C3C",
            FontColor::Blue => "#2980B9",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FontColor::Black => "black",
            FontColor::Orange => "orange",
            FontColor::Teal => "teal",
            FontColor::Purple => "purple",
            FontColor::Red => "red",
            FontColor::Blue => "blue",
        }
    }
}

impl FromStr for FontColor {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "black" => Ok(FontColor::Black),
            "orange" => Ok(FontColor::Orange),
            "teal" => Ok(FontColor::Teal),
            "purple" => Ok(FontColor::Purple),
            "red" => Ok(FontColor::Red),
            "blue" => Ok(FontColor::Blue),
            other => Err(anyhow!(
                "unknown caption color '{}' (expected black, orange, teal, purple, red, blue)",
                other
            )),
        }
    }
}

/// Strip modes grow the canvas by a white text band; overlay modes paint a
/// translucent band over the image instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    StripAbove,
    StripBelow,
    OverlayTop,
    OverlayBottom,
}

impl Placement {
    pub fn is_strip(&self) -> bool {
        matches!(self, Placement::StripAbove | Placement::StripBelow)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Placement::StripAbove => "above",
            Placement::StripBelow => "below",
            Placement::OverlayTop => "top",
            Placement::OverlayBottom => "bottom",
        }
    }
}

impl FromStr for Placement {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "above" => Ok(Placement::StripAbove),
            "below" => Ok(Placement::StripBelow),
            "top" => Ok(Placement::OverlayTop),
            "bottom" => Ok(Placement::OverlayBottom),
            other => Err(anyhow!(
                "unknown caption position '{}' (expected above, below, top, bottom)",
                other
            )),
        }
    }
}

/// Caption text, placement and styling for one composition. Length caps are
/// enforced here, at input time; the renderer never truncates.
#[derive(Debug, Clone)]
pub struct CompositionOptions {
    caption: String,
    subcaption: Option<String>,
    pub placement: Placement,
    pub color: FontColor,
    pub font_size: f32,
}

impl CompositionOptions {
    pub fn new(caption: &str, placement: Placement, color: FontColor, font_size: f32) -> Self {
        Self {
            caption: truncate_chars(caption, CAPTION_MAX_CHARS),
            subcaption: None,
            placement,
            color,
            font_size,
        }
    }

    pub fn with_subcaption(mut self, subcaption: &str) -> Self {
        self.set_subcaption(subcaption);
        self
    }

    pub fn set_caption(&mut self, caption: &str) {
        self.caption = truncate_chars(caption, CAPTION_MAX_CHARS);
    }

    pub fn set_subcaption(&mut self, subcaption: &str) {
        let truncated = truncate_chars(subcaption, SUBCAPTION_MAX_CHARS);
        self.subcaption = if truncated.is_empty() {
            None
        } else {
            Some(truncated)
        };
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub fn subcaption(&self) -> Option<&str> {
        self.subcaption.as_deref()
    }

    fn strip_height(&self) -> f32 {
        self.font_size + 2.0 * STRIP_PADDING
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.trim().chars().take(max_chars).collect()
}

/// Canvas dimensions for the given options: the image square plus one strip
/// of `font_size + 2 * padding` for strip modes, the bare square otherwise.
pub fn canvas_size(options: &CompositionOptions) -> (u32, u32) {
    let height = if options.placement.is_strip() {
        IMAGE_SIZE + options.strip_height().round() as u32
    } else {
        IMAGE_SIZE
    };
    (IMAGE_SIZE, height)
}

/// A finished composition. Never mutated; re-composing always starts from
/// the original bitmap and produces a new page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    image: image::RgbaImage,
    options: CompositionOptions,
}

impl RenderedPage {
    pub fn image(&self) -> &image::RgbaImage {
        &self.image
    }

    pub fn options(&self) -> &CompositionOptions {
        &self.options
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn png_bytes(&self) -> Result<Vec<u8>, ExportError> {
        let mut bytes = Vec::new();
        let mut cursor = Cursor::new(&mut bytes);
        DynamicImage::ImageRgba8(self.image.clone())
            .write_to(&mut cursor, image::ImageFormat::Png)
            .map_err(|err| ExportError::Render(format!("failed to encode png: {}", err)))?;
        Ok(bytes)
    }

    /// Inline representation for live preview bindings.
    pub fn preview_data_uri(&self) -> Result<String, ExportError> {
        Ok(format!(
            "data:image/png;base64,{}",
            BASE64.encode(self.png_bytes()?)
        ))
    }
}

/// Draws `bitmap` into the square canvas with the configured caption band.
/// Full redraw every call, so repeated composes never stack overlays.
pub fn compose(
    bitmap: &DynamicImage,
    options: &CompositionOptions,
    font: Option<&CaptionFont>,
) -> Result<RenderedPage, ExportError> {
    if bitmap.width() == 0 || bitmap.height() == 0 {
        return Err(ExportError::Render("source bitmap is empty".to_string()));
    }
    if options.font_size <= 0.0 {
        return Err(ExportError::Render(format!(
            "invalid font size {}",
            options.font_size
        )));
    }

    let svg = build_svg(bitmap, options, font)
        .map_err(|err| ExportError::Render(err.to_string()))?;
    let image = rasterize(&svg, font).map_err(|err| ExportError::Render(err.to_string()))?;

    Ok(RenderedPage {
        image,
        options: options.clone(),
    })
}

fn build_svg(
    bitmap: &DynamicImage,
    options: &CompositionOptions,
    font: Option<&CaptionFont>,
) -> Result<String> {
    let (width, height) = canvas_size(options);
    let strip_height = options.strip_height();
    let image_y = match options.placement {
        Placement::StripAbove => strip_height,
        _ => 0.0,
    };

    let mut png = Vec::new();
    let mut cursor = Cursor::new(&mut png);
    bitmap
        .write_to(&mut cursor, image::ImageFormat::Png)
        .with_context(|| "failed to encode source bitmap")?;
    let data_uri = format!("data:image/png;base64,{}", BASE64.encode(&png));

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    ));
    svg.push_str(&format!(
        r##"<rect x="0" y="0" width="{w}" height="{h}" fill="#ffffff"/>"##,
        w = width,
        h = height
    ));
    svg.push_str(&format!(
        r#"<image href="{uri}" xlink:href="{uri}" x="0" y="{y}" width="{s}" height="{s}" preserveAspectRatio="none"/>"#,
        uri = data_uri,
        y = image_y,
        s = IMAGE_SIZE
    ));

    if !options.caption.is_empty() {
        let band_y = match options.placement {
            Placement::StripAbove => 0.0,
            Placement::StripBelow => IMAGE_SIZE as f32,
            Placement::OverlayTop => 0.0,
            Placement::OverlayBottom => IMAGE_SIZE as f32 - strip_height,
        };
        if !options.placement.is_strip() {
            svg.push_str(&format!(
                r##"<rect x="0" y="{y}" width="{w}" height="{h}" fill="#000000" fill-opacity="{op}"/>"##,
                y = band_y,
                w = IMAGE_SIZE,
                h = strip_height,
                op = OVERLAY_BAND_OPACITY
            ));
        }
        push_caption_text(&mut svg, options, font, band_y, strip_height);
    }

    svg.push_str("</svg>");
    Ok(svg)
}

fn push_caption_text(
    svg: &mut String,
    options: &CompositionOptions,
    font: Option<&CaptionFont>,
    band_y: f32,
    band_height: f32,
) {
    let family = font
        .and_then(|font| font.family())
        .unwrap_or("Arial, sans-serif");
    let center_x = IMAGE_SIZE as f32 / 2.0;
    let band_center = band_y + band_height / 2.0;

    let caption_size = fit_font_size(&options.caption, options.font_size, font);
    let sub = options.subcaption.as_deref().filter(|text| !text.is_empty());

    // Approximate a centered baseline; shift up when a subcaption shares
    // the band.
    let caption_baseline = match sub {
        Some(_) => band_center + caption_size * 0.35 - options.font_size * 0.28,
        None => band_center + caption_size * 0.35,
    };

    svg.push_str(&format!(
        r#"<text x="{x}" y="{y}" font-size="{size}" font-weight="bold" font-family="{family}" fill="{color}" text-anchor="middle">{text}</text>"#,
        x = center_x,
        y = caption_baseline,
        size = caption_size,
        family = escape_xml(family),
        color = options.color.hex(),
        text = escape_xml(&options.caption)
    ));

    if let Some(subcaption) = sub {
        let sub_base = options.font_size * 0.5;
        let sub_size = fit_font_size(subcaption, sub_base, font);
        let sub_baseline = caption_baseline + sub_size * 1.25;
        svg.push_str(&format!(
            r#"<text x="{x}" y="{y}" font-size="{size}" font-family="{family}" fill="{color}" text-anchor="middle">{text}</text>"#,
            x = center_x,
            y = sub_baseline,
            size = sub_size,
            family = escape_xml(family),
            color = options.color.hex(),
            text = escape_xml(subcaption)
        ));
    }
}

/// Scales the font down until the text fits the `imageSize - 24` band,
/// mirroring the max-width clamp of canvas `fillText`.
fn fit_font_size(text: &str, base_size: f32, font: Option<&CaptionFont>) -> f32 {
    let width = measure_text_width(text, base_size, font);
    if width <= TEXT_MAX_WIDTH {
        return base_size;
    }
    (base_size * TEXT_MAX_WIDTH / width).max(10.0)
}

fn rasterize(svg: &str, font: Option<&CaptionFont>) -> Result<image::RgbaImage> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    if let Some(font) = font {
        db.load_font_data(font.data().to_vec());
    }
    let svg_options = Options {
        fontdb: Arc::new(db),
        ..Options::default()
    };
    let tree = Tree::from_str(svg, &svg_options).with_context(|| "failed to parse SVG")?;
    let size = tree.size().to_int_size();
    let mut pixmap =
        Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty SVG size"))?;
    let mut pixmap_mut = pixmap.as_mut();
    render(&tree, tiny_skia::Transform::identity(), &mut pixmap_mut);
    image::RgbaImage::from_raw(size.width(), size.height(), pixmap.data().to_vec())
        .ok_or_else(|| anyhow!("failed to build image buffer from SVG"))
}

/// Optional caption font supplied via settings; carries the raw data for
/// the rasterizer and glyph metrics for width fitting.
#[derive(Clone)]
pub struct CaptionFont {
    data: Arc<Vec<u8>>,
    family: Option<String>,
    units_per_em: u16,
    space_advance: u16,
}

impl CaptionFont {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read font: {}", path.display()))?;
        let face = Face::parse(&data, 0)
            .map_err(|err| anyhow!("failed to parse font {}: {}", path.display(), err))?;
        let units_per_em = face.units_per_em();
        let space_advance = face
            .glyph_index(' ')
            .and_then(|glyph| face.glyph_hor_advance(glyph))
            .unwrap_or(units_per_em / 4);
        let family = extract_family_name(&face);
        Ok(Self {
            data: Arc::new(data),
            family,
            units_per_em,
            space_advance,
        })
    }

    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}

pub(crate) fn measure_text_width(text: &str, font_size: f32, font: Option<&CaptionFont>) -> f32 {
    if let Some(font) = font {
        if let Ok(face) = Face::parse(&font.data, 0) {
            let mut advance = 0u32;
            for ch in text.chars() {
                if ch == '\n' {
                    continue;
                }
                if let Some(glyph) = face.glyph_index(ch) {
                    let glyph_advance = face.glyph_hor_advance(glyph).unwrap_or(font.space_advance);
                    advance = advance.saturating_add(glyph_advance as u32);
                } else {
                    advance = advance.saturating_add(font.space_advance as u32);
                }
            }
            let units = font.units_per_em.max(1) as f32;
            return advance as f32 * (font_size / units);
        }
    }
    estimate_text_width_units(text) * font_size
}

fn estimate_char_units(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else {
        0.9
    }
}

fn estimate_text_width_units(text: &str) -> f32 {
    text.chars().map(estimate_char_units).sum()
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bitmap() -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            8,
            8,
            image::Rgb([255, 255, 255]),
        ))
    }

    fn options(placement: Placement) -> CompositionOptions {
        CompositionOptions::new("red panda", placement, FontColor::Black, 36.0)
    }

    #[test]
    fn strip_modes_grow_the_canvas_by_one_strip() {
        let bitmap = test_bitmap();
        for placement in [Placement::StripAbove, Placement::StripBelow] {
            let page = compose(&bitmap, &options(placement), None).expect("compose");
            assert_eq!(page.width(), 512);
            // 512 + font size 36 + 2 * 16 padding
            assert_eq!(page.height(), 580);
        }
    }

    #[test]
    fn overlay_modes_keep_the_image_square() {
        let bitmap = test_bitmap();
        for placement in [Placement::OverlayTop, Placement::OverlayBottom] {
            let page = compose(&bitmap, &options(placement), None).expect("compose");
            assert_eq!(page.width(), 512);
            assert_eq!(page.height(), 512);
        }
    }

    #[test]
    fn overlay_band_darkens_the_covered_area() {
        let bitmap = test_bitmap();
        let page = compose(&bitmap, &options(Placement::OverlayBottom), None).expect("compose");
        // x = 5 sits left of the centered caption text, so only the
        // translucent band covers it
        let inside = page.image().get_pixel(5, 500);
        let outside = page.image().get_pixel(5, 5);
        assert!(inside[0] < outside[0], "band must darken the white source");
    }

    #[test]
    fn compose_is_deterministic() {
        let bitmap = test_bitmap();
        let options = options(Placement::StripBelow);
        let first = compose(&bitmap, &options, None).expect("compose");
        let second = compose(&bitmap, &options, None).expect("compose");
        assert_eq!(first.image().as_raw(), second.image().as_raw());
    }

    #[test]
    fn caption_is_truncated_at_input_time() {
        let long = "a".repeat(45);
        let options = CompositionOptions::new(&long, Placement::StripBelow, FontColor::Teal, 36.0);
        assert_eq!(options.caption().chars().count(), 40);

        let long_sub = "b".repeat(70);
        let options = options.with_subcaption(&long_sub);
        assert_eq!(options.subcaption().unwrap().chars().count(), 60);
    }

    #[test]
    fn empty_subcaption_is_dropped() {
        let options = CompositionOptions::new("cat", Placement::OverlayTop, FontColor::Red, 36.0)
            .with_subcaption("   ");
        assert_eq!(options.subcaption(), None);
    }

    #[test]
    fn empty_bitmap_is_a_render_error() {
        let bitmap = DynamicImage::new_rgb8(0, 0);
        let err = compose(&bitmap, &options(Placement::OverlayTop), None)
            .expect_err("should fail");
        assert!(matches!(err, ExportError::Render(_)));
    }

    #[test]
    fn font_size_scales_down_to_fit_the_band() {
        let short = fit_font_size("cat", 36.0, None);
        assert_eq!(short, 36.0);

        let long = "w".repeat(40);
        let fitted = fit_font_size(&long, 36.0, None);
        assert!(fitted < 36.0);
        assert!(measure_text_width(&long, fitted, None) <= TEXT_MAX_WIDTH + 0.5);
    }

    #[test]
    fn palette_parses_by_name() {
        assert_eq!("Teal".parse::<FontColor>().unwrap(), FontColor::Teal);
        assert_eq!(FontColor::Orange.hex(), "#FF6B35");
        assert!("magenta".parse::<FontColor>().is_err());
    }

    #[test]
    fn placement_parses_ui_names() {
        assert_eq!("above".parse::<Placement>().unwrap(), Placement::StripAbove);
        assert_eq!("bottom".parse::<Placement>().unwrap(), Placement::OverlayBottom);
        assert!("left".parse::<Placement>().is_err());
    }
}
