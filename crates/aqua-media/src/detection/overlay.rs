//! Burning detection boxes and labels into frames.

use std::sync::OnceLock;

use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::warn;

use super::object_detector::{class_label, ObjectDetection};
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;

/// Box colours, picked by class id.
pub const PALETTE: &[[u8; 3]] = &[
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
    [52, 69, 147],
    [100, 115, 255],
    [0, 24, 236],
    [132, 56, 255],
    [82, 0, 133],
    [203, 56, 255],
    [255, 149, 200],
    [255, 55, 199],
];

static LABEL_FONT_BYTES: &[u8] = include_bytes!("../../assets/DejaVuSansMono.ttf");
static LABEL_FONT: OnceLock<Option<FontRef<'static>>> = OnceLock::new();

fn label_font() -> Option<&'static FontRef<'static>> {
    LABEL_FONT
        .get_or_init(|| match FontRef::try_from_slice(LABEL_FONT_BYTES) {
            Ok(font) => Some(font),
            Err(e) => {
                warn!(error = %e, "Label font unusable, boxes will be drawn without labels");
                None
            }
        })
        .as_ref()
}

/// How detections are drawn.
#[derive(Debug, Clone)]
pub struct OverlayStyle {
    /// Box outline thickness in pixels
    pub thickness: u32,
    /// Label text height in pixels; 0 disables labels
    pub font_size: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            thickness: 2,
            font_size: 12.0,
        }
    }
}

impl OverlayStyle {
    /// Scale the style for a frame so boxes stay visible on large videos.
    pub fn for_frame(width: u32, height: u32) -> Self {
        let short_side = width.min(height);
        Self {
            thickness: (short_side / 320).clamp(1, 6),
            font_size: (short_side as f32 / 40.0).clamp(10.0, 48.0),
        }
    }
}

/// Colour for a class id.
pub fn class_color(class_id: usize) -> [u8; 3] {
    PALETTE[class_id % PALETTE.len()]
}

/// Label text for a detection, e.g. `guppy 0.87`.
pub fn label_text(det: &ObjectDetection, class_names: &[String]) -> String {
    format!("{} {:.2}", class_label(class_names, det.class_id), det.confidence)
}

/// Black text on light tags, white on dark ones.
fn text_color(background: [u8; 3]) -> Rgb<u8> {
    let [r, g, b] = background.map(f32::from);
    if 0.299 * r + 0.587 * g + 0.114 * b > 160.0 {
        Rgb([0, 0, 0])
    } else {
        Rgb([255, 255, 255])
    }
}

/// Draw detections onto `frame` in place.
///
/// Each box gets a filled tag carrying its class name and confidence.
pub fn draw_detections(
    frame: &mut Frame,
    detections: &[ObjectDetection],
    class_names: &[String],
    style: &OverlayStyle,
) -> MediaResult<()> {
    if detections.is_empty() {
        return Ok(());
    }

    let mut img = RgbImage::from_raw(frame.width, frame.height, std::mem::take(&mut frame.data))
        .ok_or_else(|| MediaError::internal("frame buffer does not match its dimensions"))?;

    for det in detections {
        draw_box(&mut img, det, style);
    }
    if style.font_size > 0.0 {
        if let Some(font) = label_font() {
            for det in detections {
                draw_label(&mut img, font, det, &label_text(det, class_names), style);
            }
        }
    }

    frame.data = img.into_raw();
    Ok(())
}

fn draw_box(img: &mut RgbImage, det: &ObjectDetection, style: &OverlayStyle) {
    let color = Rgb(class_color(det.class_id));
    let x = det.x.round() as i32;
    let y = det.y.round() as i32;
    let w = det.width.round().max(1.0) as u32;
    let h = det.height.round().max(1.0) as u32;

    // Nested outlines, shrinking inwards
    for t in 0..style.thickness {
        if w <= 2 * t || h <= 2 * t {
            break;
        }
        let rect = Rect::at(x + t as i32, y + t as i32).of_size(w - 2 * t, h - 2 * t);
        draw_hollow_rect_mut(img, rect, color);
    }
}

fn draw_label(
    img: &mut RgbImage,
    font: &FontRef<'static>,
    det: &ObjectDetection,
    text: &str,
    style: &OverlayStyle,
) {
    let background = class_color(det.class_id);
    let scale = PxScale::from(style.font_size);
    let (text_w, _) = text_size(scale, font, text);
    // Full line height so descenders stay inside the tag
    let scaled = font.as_scaled(scale);
    let text_h = (scaled.ascent() - scaled.descent()).ceil() as u32;
    let pad = style.thickness.max(1);
    let tag_w = text_w.max(1) + 2 * pad;
    let tag_h = text_h.max(1) + 2 * pad;

    let x = det.x.round() as i32;
    let y = det.y.round() as i32;
    // Above the box when there is room, inside it otherwise
    let tag_y = if y >= tag_h as i32 { y - tag_h as i32 } else { y };

    draw_filled_rect_mut(img, Rect::at(x, tag_y).of_size(tag_w, tag_h), Rgb(background));
    draw_text_mut(
        img,
        text_color(background),
        x + pad as i32,
        tag_y + pad as i32,
        scale,
        font,
        text,
    );
}
