use printpdf::{
    BuiltinFont, Color, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument,
    PdfDocumentReference, PdfLayerIndex, PdfLayerReference, PdfPageIndex, Rgb,
};
use tracing::warn;

use super::ExportError;
use super::compose::RenderedPage;
use crate::records::ImageRecord;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 15.0;
const IMAGE_MM: f32 = PAGE_WIDTH_MM - MARGIN_MM * 2.0;

const TITLE_PT: f32 = 16.0;
const LABEL_PT: f32 = 8.0;
const PT_TO_MM: f32 = 25.4 / 72.0;

/// Collapses whitespace runs in a keyword into single hyphens for filenames.
pub fn file_slug(keyword: &str) -> String {
    keyword.split_whitespace().collect::<Vec<_>>().join("-")
}

pub fn png_filename(prefix: &str, keyword: &str) -> String {
    format!("{}-{}.png", prefix, file_slug(keyword))
}

/// Rasterizes a composed page to a downloadable PNG blob plus its suggested
/// filename.
pub fn png_blob(
    page: &RenderedPage,
    record: &ImageRecord,
    prefix: &str,
) -> Result<(Vec<u8>, String), ExportError> {
    let bytes = page.png_bytes()?;
    Ok((bytes, png_filename(prefix, &record.keyword)))
}

/// Cumulative multi-page PDF built during a batch export. Append-only; page
/// order always matches append order. Finalized at most once by moving out.
pub struct ExportDocument {
    doc: PdfDocumentReference,
    title_font: IndirectFontRef,
    label_font: IndirectFontRef,
    watermark: String,
    prefix: String,
    first_keyword: Option<String>,
    next_page: Option<(PdfPageIndex, PdfLayerIndex)>,
    pages: usize,
    warnings: Vec<String>,
}

impl ExportDocument {
    pub fn new(prefix: &str, watermark: &str) -> Result<Self, ExportError> {
        let (doc, page, layer) = PdfDocument::new(
            "kidscolor pages",
            Mm(PAGE_WIDTH_MM),
            Mm(PAGE_HEIGHT_MM),
            "Page 1",
        );
        let title_font = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|err| ExportError::Finalize(err.to_string()))?;
        let label_font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|err| ExportError::Finalize(err.to_string()))?;
        Ok(Self {
            doc,
            title_font,
            label_font,
            watermark: watermark.to_string(),
            prefix: prefix.to_string(),
            first_keyword: None,
            next_page: Some((page, layer)),
            pages: 0,
            warnings: Vec::new(),
        })
    }

    /// Appends one page. A `None` bitmap emits the page degraded — title and
    /// watermark only — and records a warning; the document stays usable.
    pub fn append(&mut self, record: &ImageRecord, page: Option<&RenderedPage>) {
        let (page_index, layer_index) = self.next_page.take().unwrap_or_else(|| {
            self.doc.add_page(
                Mm(PAGE_WIDTH_MM),
                Mm(PAGE_HEIGHT_MM),
                format!("Page {}", self.pages + 1),
            )
        });
        let layer = self.doc.get_page(page_index).get_layer(layer_index);

        let title = capitalize(&record.keyword);
        layer.set_fill_color(gray(50));
        layer.use_text(
            title,
            TITLE_PT,
            Mm(MARGIN_MM),
            Mm(PAGE_HEIGHT_MM - MARGIN_MM - 5.0),
            &self.title_font,
        );

        layer.set_fill_color(gray(180));
        let watermark_x = PAGE_WIDTH_MM - MARGIN_MM - approx_text_width_mm(&self.watermark, LABEL_PT);
        layer.use_text(
            self.watermark.clone(),
            LABEL_PT,
            Mm(watermark_x),
            Mm(PAGE_HEIGHT_MM - MARGIN_MM - 5.0),
            &self.label_font,
        );

        match page.map(|rendered| embed_bitmap(&layer, rendered)) {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                let message = format!(
                    "page {}: failed to embed image for '{}': {}",
                    self.pages + 1,
                    record.keyword,
                    err
                );
                warn!("{}", message);
                self.warnings.push(message);
            }
            None => {
                let message = format!(
                    "page {}: image unavailable for '{}'",
                    self.pages + 1,
                    record.keyword
                );
                warn!("{}", message);
                self.warnings.push(message);
            }
        }

        if let Some(label) = record.metadata_label() {
            layer.set_fill_color(gray(150));
            layer.use_text(label, LABEL_PT, Mm(MARGIN_MM), Mm(MARGIN_MM), &self.label_font);
        }

        if self.pages == 0 {
            self.first_keyword = Some(record.keyword.clone());
        }
        self.pages += 1;
    }

    pub fn page_count(&self) -> usize {
        self.pages
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// `<prefix>-<keyword>.pdf` for a single page, `<prefix>-<n>-pages.pdf`
    /// for a batch.
    pub fn filename(&self) -> String {
        match (&self.first_keyword, self.pages) {
            (Some(keyword), 1) => format!("{}-{}.pdf", self.prefix, file_slug(keyword)),
            (_, pages) => format!("{}-{}-pages.pdf", self.prefix, pages),
        }
    }

    /// Serializes the document. Consumes `self`, so a document can never be
    /// finalized twice.
    pub fn finalize(self) -> Result<(Vec<u8>, String), ExportError> {
        if self.pages == 0 {
            return Err(ExportError::Finalize("document has no pages".to_string()));
        }
        let filename = self.filename();
        let mut buffer = Vec::new();
        {
            let mut writer = std::io::BufWriter::new(&mut buffer);
            self.doc
                .save(&mut writer)
                .map_err(|err| ExportError::Finalize(err.to_string()))?;
        }
        Ok((buffer, filename))
    }
}

/// Decodes the rendered bitmap through printpdf's bundled image crate and
/// forces it into the margin square, as the print layout does.
fn embed_bitmap(layer: &PdfLayerReference, rendered: &RenderedPage) -> Result<(), ExportError> {
    let png = rendered.png_bytes()?;
    let decoded = printpdf::image_crate::load_from_memory(&png)
        .map_err(|err| ExportError::Render(format!("failed to decode page bitmap: {}", err)))?;
    let width_mm = px_to_mm(decoded.width());
    let height_mm = px_to_mm(decoded.height());
    let pdf_image = Image::from_dynamic_image(&decoded);
    let transform = ImageTransform {
        translate_x: Some(Mm(MARGIN_MM)),
        translate_y: Some(Mm(PAGE_HEIGHT_MM - MARGIN_MM - 12.0 - IMAGE_MM)),
        rotate: None,
        scale_x: Some(IMAGE_MM / width_mm),
        scale_y: Some(IMAGE_MM / height_mm),
        dpi: Some(72.0),
    };
    pdf_image.add_to_layer(layer.clone(), transform);
    Ok(())
}

fn px_to_mm(px: u32) -> f32 {
    px as f32 * 25.4 / 72.0
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn gray(value: u8) -> Color {
    let channel = value as f32 / 255.0;
    Color::Rgb(Rgb::new(channel, channel, channel, None))
}

/// Rough Helvetica advance estimate, good enough to right-align the small
/// watermark label.
fn approx_text_width_mm(text: &str, size_pt: f32) -> f32 {
    let units: f32 = text
        .chars()
        .map(|ch| {
            if ch.is_whitespace() {
                0.25
            } else if ch.is_ascii_alphanumeric() {
                0.55
            } else {
                0.35
            }
        })
        .sum();
    units * size_pt * PT_TO_MM
}
