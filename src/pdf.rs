use anyhow::{anyhow, Result};
use eframe::egui;
use pdfium_render::prelude::*;
use std::path::Path;

/// One word on a page, with its bounds in page points
/// (top-left origin, unlike pdfium's native bottom-left).
#[derive(Clone, Debug)]
pub struct PageWord {
    pub text: String,
    pub rect: egui::Rect,
}

pub struct PageData {
    pub size: egui::Vec2,
    pub words: Vec<PageWord>,
}

/// Binds the pdfium library once for the process lifetime: a bundled
/// copy next to the executable wins, the system library is the fallback.
pub fn init_pdfium() -> Result<&'static Pdfium> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|err| anyhow!("could not bind the pdfium library: {err:?}"))?;
    Ok(Box::leak(Box::new(Pdfium::new(bindings))))
}

pub struct PdfDoc {
    document: PdfDocument<'static>,
    pages: Vec<PageData>,
    pub name: String,
}

impl PdfDoc {
    pub fn open(pdfium: &'static Pdfium, path: &Path) -> Result<Self> {
        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|err| anyhow!("could not open {}: {err:?}", path.display()))?;

        let mut pages = Vec::new();
        for page in document.pages().iter() {
            let size = egui::vec2(page.width().value, page.height().value);
            let words = extract_words(&page).unwrap_or_else(|err| {
                // A page without a text layer is still viewable.
                log::warn!("no selectable text on page {}: {err}", pages.len() + 1);
                Vec::new()
            });
            pages.push(PageData { size, words });
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        log::info!("opened {name}: {} pages", pages.len());
        Ok(Self {
            document,
            pages,
            name,
        })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, index: usize) -> Option<&PageData> {
        self.pages.get(index)
    }

    pub fn render_page(&self, index: usize, target_width: u32) -> Result<egui::ColorImage> {
        let page = self
            .document
            .pages()
            .get(page_number(index)?)
            .map_err(|err| anyhow!("no page {index}: {err:?}"))?;
        let config = PdfRenderConfig::new().set_target_width(target_width.max(1) as i32);
        let bitmap = page
            .render_with_config(&config)
            .map_err(|err| anyhow!("could not render page {index}: {err:?}"))?;
        Ok(to_color_image(bitmap.as_image().to_rgba8()))
    }

    /// Words whose bounds intersect the rubber-band rect (page points),
    /// joined in content order, plus the union of their bounds.
    pub fn selection_in_rect(
        &self,
        page_index: usize,
        band: egui::Rect,
    ) -> Option<(String, egui::Rect)> {
        let page = self.pages.get(page_index)?;
        let mut text = String::new();
        let mut bounds: Option<egui::Rect> = None;
        for word in &page.words {
            if band.intersects(word.rect) {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(&word.text);
                bounds = Some(match bounds {
                    Some(b) => b.union(word.rect),
                    None => word.rect,
                });
            }
        }
        let bounds = bounds?;
        if text.trim().is_empty() {
            return None;
        }
        Some((text, bounds))
    }
}

// pdfium addresses pages with a u16; anything wider is out of range
// rather than silently wrapped.
fn page_number(index: usize) -> Result<u16> {
    u16::try_from(index).map_err(|_| anyhow!("no page {index}"))
}

fn to_color_image(image: image::RgbaImage) -> egui::ColorImage {
    let size = [image.width() as usize, image.height() as usize];
    egui::ColorImage::from_rgba_unmultiplied(size, image.as_raw())
}

fn extract_words(page: &PdfPage) -> Result<Vec<PageWord>> {
    let text = page
        .text()
        .map_err(|err| anyhow!("no text layer: {err:?}"))?;
    let page_height = page.height().value;
    let mut words = Vec::new();
    for segment in text.segments().iter() {
        let rect = to_top_left(&segment.bounds(), page_height);
        words.extend(split_segment_into_words(&segment.text(), rect));
    }
    Ok(words)
}

// pdfium rects have a bottom-left origin; everything else in the app
// works top-left.
fn to_top_left(rect: &PdfRect, page_height: f32) -> egui::Rect {
    egui::Rect::from_min_size(
        egui::pos2(rect.left().value, page_height - rect.top().value),
        egui::vec2(rect.width().value, rect.height().value),
    )
}

/// Splits a text segment into words, attributing each word a slice of
/// the segment's bounds proportional to its character span. Estimated,
/// not glyph-exact, but plenty for rubber-band selection.
fn split_segment_into_words(text: &str, bounds: egui::Rect) -> Vec<PageWord> {
    let total_chars = text.chars().count();
    if total_chars == 0 {
        return Vec::new();
    }
    let char_width = bounds.width() / total_chars as f32;

    let mut words = Vec::new();
    let mut start = None;
    let mut iter = text.chars().enumerate().peekable();
    while let Some((i, c)) = iter.next() {
        if c.is_whitespace() {
            continue;
        }
        if start.is_none() {
            start = Some(i);
        }
        let ends_here = iter
            .peek()
            .map(|(_, next)| next.is_whitespace())
            .unwrap_or(true);
        if ends_here {
            let begin = start.take().unwrap_or(i);
            let word: String = text
                .chars()
                .skip(begin)
                .take(i + 1 - begin)
                .collect();
            let rect = egui::Rect::from_min_size(
                egui::pos2(bounds.min.x + begin as f32 * char_width, bounds.min.y),
                egui::vec2((i + 1 - begin) as f32 * char_width, bounds.height()),
            );
            words.push(PageWord { text: word, rect });
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::{pos2, vec2, Rect};

    #[test]
    fn segment_splits_into_proportional_words() {
        let bounds = Rect::from_min_size(pos2(10.0, 20.0), vec2(100.0, 12.0));
        let words = split_segment_into_words("ab cd", bounds);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "ab");
        assert_eq!(words[1].text, "cd");
        // 5 chars over 100pt: 20pt per char.
        assert_eq!(words[0].rect.min.x, 10.0);
        assert_eq!(words[0].rect.width(), 40.0);
        assert_eq!(words[1].rect.min.x, 70.0);
        assert_eq!(words[1].rect.max.x, 110.0);
        assert_eq!(words[0].rect.height(), 12.0);
    }

    #[test]
    fn whitespace_only_segments_produce_no_words() {
        let bounds = Rect::from_min_size(pos2(0.0, 0.0), vec2(50.0, 10.0));
        assert!(split_segment_into_words("   ", bounds).is_empty());
        assert!(split_segment_into_words("", bounds).is_empty());
    }

    #[test]
    fn page_indexes_past_u16_are_rejected() {
        assert_eq!(page_number(0).unwrap(), 0);
        assert_eq!(page_number(65_535).unwrap(), u16::MAX);
        assert!(page_number(65_536).is_err());
    }

    #[test]
    fn rendered_pixels_survive_the_conversion_to_egui() {
        let mut image = image::RgbaImage::new(2, 1);
        image.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        image.put_pixel(1, 0, image::Rgba([0, 0, 255, 128]));

        let converted = to_color_image(image);

        assert_eq!(converted.size, [2, 1]);
        assert_eq!(
            converted.pixels[0],
            egui::Color32::from_rgba_unmultiplied(255, 0, 0, 255)
        );
        assert_eq!(
            converted.pixels[1],
            egui::Color32::from_rgba_unmultiplied(0, 0, 255, 128)
        );
    }

    #[test]
    fn non_ascii_words_keep_their_text() {
        let bounds = Rect::from_min_size(pos2(0.0, 0.0), vec2(60.0, 10.0));
        let words = split_segment_into_words("naïve λx", bounds);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "naïve");
        assert_eq!(words[1].text, "λx");
    }
}
