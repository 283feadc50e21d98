//! CPU rendering of the annotated and segmented image roles.

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Local, Utc};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::{measurement::Measured, model::ClassKind};

const LABEL_BG: Rgb<u8> = Rgb([0, 0, 0]);
const OVERLAY_FG: Rgb<u8> = Rgb([255, 255, 255]);
const MASK_ALPHA: f32 = 0.5;
const GLYPH_ADVANCE: i32 = 6;
const LINE_HEIGHT: i32 = 9;
const MARGIN: i32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// What the annotated role draws on top of the frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationOptions {
    pub show_boxes: bool,
    pub show_labels: bool,
    /// Corner of the bounding box the class label is attached to.
    pub label_position: Corner,
    /// Info fields stacked in each frame corner, top to bottom.
    pub overlays: BTreeMap<Corner, Vec<String>>,
}

impl Default for AnnotationOptions {
    fn default() -> Self {
        Self {
            show_boxes: true,
            show_labels: true,
            label_position: Corner::TopLeft,
            overlays: BTreeMap::new(),
        }
    }
}

/// Per-frame values the info overlays draw from.
#[derive(Clone, Debug)]
pub struct OverlayInfo<'a> {
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
    pub exposure_us: u32,
    pub loop_count: u64,
    pub fps: Option<f64>,
    pub elapsed: Duration,
    pub material: Option<&'a str>,
    pub context: &'a BTreeMap<String, String>,
}

impl OverlayInfo<'_> {
    /// Text of one overlay field. `Frame`, `ET`, `Loop`, `Time`, `FPS`,
    /// `Running` and `Material` are computed; any other name is looked up in
    /// the job context. `None` when the field has no value for this frame.
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "Frame" => Some(format!("Frame {}", self.frame_index)),
            "ET" => Some(format!("ET {}us", self.exposure_us)),
            "Loop" => Some(format!("Loop {}", self.loop_count)),
            "Time" => Some(
                self.timestamp
                    .with_timezone(&Local)
                    .format("%H:%M:%S")
                    .to_string(),
            ),
            "FPS" => self.fps.map(|fps| format!("FPS {fps:.1}")),
            "Running" => Some(format!("Running {:.1}s", self.elapsed.as_secs_f64())),
            "Material" => self.material.map(|material| format!("Material: {material}")),
            other => self.context.get(other).map(|value| format!("{other}: {value}")),
        }
    }
}

/// Draw the kept instances' boxes and class labels, then the corner overlays.
pub fn annotate(
    image: &RgbImage,
    measured: &Measured,
    options: &AnnotationOptions,
    info: &OverlayInfo<'_>,
) -> RgbImage {
    let mut canvas = image.clone();
    let (width, height) = (canvas.width() as i32, canvas.height() as i32);
    if width == 0 || height == 0 {
        return canvas;
    }

    for class in ClassKind::ALL {
        let Some(m) = measured.set.get(class) else {
            continue;
        };
        let color = Rgb(class.color());
        if options.show_boxes {
            draw_rectangle(
                &mut canvas,
                m.x_min as i32,
                m.y_min as i32,
                m.x_max as i32,
                m.y_max as i32,
                color,
            );
        }
        if !options.show_labels {
            continue;
        }

        let score = measured.instances[class.index()]
            .as_ref()
            .map(|s| s.score)
            .unwrap_or_default();
        let text = format!("{} {:.0}%", class.label(), score * 100.0);
        let text_width = text_width(&text);
        let (anchor_x, label_y) = match options.label_position {
            Corner::TopLeft => (m.x_min as i32, m.y_min as i32 - 10),
            Corner::TopRight => (m.x_max as i32 - text_width, m.y_min as i32 - 10),
            Corner::BottomLeft => (m.x_min as i32, m.y_max as i32 + 2),
            Corner::BottomRight => (m.x_max as i32 - text_width, m.y_max as i32 + 2),
        };
        let label_x = anchor_x.min(width - text_width).max(0);
        let label_y = label_y.clamp(0, (height - 8).max(0));
        fill_rect(
            &mut canvas,
            label_x,
            label_y,
            label_x + text_width,
            label_y + 8,
            LABEL_BG,
        );
        draw_label(&mut canvas, label_x + 1, label_y + 1, &text, color);
    }

    for (corner, fields) in &options.overlays {
        let lines: Vec<String> = fields.iter().filter_map(|name| info.field(name)).collect();
        draw_overlay(&mut canvas, *corner, &lines);
    }
    canvas
}

fn text_width(text: &str) -> i32 {
    text.chars().count() as i32 * GLYPH_ADVANCE
}

/// Stack `lines` on a background block anchored at `corner`.
fn draw_overlay(canvas: &mut RgbImage, corner: Corner, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    let (width, height) = (canvas.width() as i32, canvas.height() as i32);
    let block_w = lines.iter().map(|l| text_width(l)).max().unwrap_or(0) + 4;
    let block_h = lines.len() as i32 * LINE_HEIGHT + 2;
    let x0 = match corner {
        Corner::TopLeft | Corner::BottomLeft => MARGIN,
        Corner::TopRight | Corner::BottomRight => width - block_w - MARGIN,
    }
    .max(0);
    let y0 = match corner {
        Corner::TopLeft | Corner::TopRight => MARGIN,
        Corner::BottomLeft | Corner::BottomRight => height - block_h - MARGIN,
    }
    .max(0);
    fill_rect(canvas, x0, y0, x0 + block_w, y0 + block_h, LABEL_BG);
    for (row, line) in lines.iter().enumerate() {
        draw_label(canvas, x0 + 2, y0 + 2 + row as i32 * LINE_HEIGHT, line, OVERLAY_FG);
    }
}

/// Blend each kept mask over the frame in its class colour.
pub fn segment_overlay(image: &RgbImage, measured: &Measured) -> RgbImage {
    let mut canvas = image.clone();
    let (width, height) = canvas.dimensions();
    for class in ClassKind::ALL {
        let Some(segment) = measured.instances[class.index()].as_ref() else {
            continue;
        };
        let mask = &segment.mask;
        let (mask_w, mask_h) = (mask.width(), mask.height());
        if mask_w == 0 || mask_h == 0 {
            continue;
        }
        let tint = class.color();
        for y in 0..height {
            let my = (y as u64 * mask_h as u64 / height as u64) as u32;
            for x in 0..width {
                let mx = (x as u64 * mask_w as u64 / width as u64) as u32;
                if !mask.get(mx, my) {
                    continue;
                }
                let px = canvas.get_pixel_mut(x, y);
                for c in 0..3 {
                    let blended =
                        px.0[c] as f32 * (1.0 - MASK_ALPHA) + tint[c] as f32 * MASK_ALPHA;
                    px.0[c] = blended.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
    canvas
}

fn draw_rectangle(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width.saturating_sub(1));
    let right = right.clamp(0, width.saturating_sub(1));
    let top = top.clamp(0, height.saturating_sub(1));
    let bottom = bottom.clamp(0, height.saturating_sub(1));

    for x in left..=right {
        image.put_pixel(x as u32, top as u32, color);
        image.put_pixel(x as u32, bottom as u32, color);
    }
    for y in top..=bottom {
        image.put_pixel(left as u32, y as u32, color);
        image.put_pixel(right as u32, y as u32, color);
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width.saturating_sub(1));
    let right = right.clamp(0, width.saturating_sub(1));
    let top = top.clamp(0, height.saturating_sub(1));
    let bottom = bottom.clamp(0, height.saturating_sub(1));

    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// 5x7 bitmap text, upper-cased; unknown characters advance without drawing.
fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col;
                        if px >= 0 && px < width {
                            image.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        ',' => [0, 0, 0, 0, 0b00110, 0b00100, 0b01000],
        ':' => [0, 0b00110, 0b00110, 0, 0b00110, 0b00110, 0],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '/' => [0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(bits)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use ml_core::{Mask, Segment};

    use super::*;
    use crate::measurement::{ClassMeasurement, Measured};

    const GREY: Rgb<u8> = Rgb([9, 9, 9]);

    fn measured_arc(x_min: u32, y_min: u32, x_max: u32, y_max: u32) -> Measured {
        let (w, h) = (64, 48);
        let mut bits = vec![false; (w * h) as usize];
        for y in y_min..=y_max {
            for x in x_min..=x_max {
                bits[(y * w + x) as usize] = true;
            }
        }
        let mask = Mask::from_bits(w, h, bits).unwrap();
        let mut measured = Measured::default();
        measured.set.set(
            ClassKind::ArcFlash,
            Some(ClassMeasurement {
                x_min,
                x_max,
                y_min,
                y_max,
                area: mask.area(),
            }),
        );
        measured.instances[ClassKind::ArcFlash.index()] = Some(Segment {
            class_id: 2,
            score: 0.8,
            mask,
            bbox: [x_min as f32, y_min as f32, x_max as f32, y_max as f32],
        });
        measured
    }

    fn info<'a>(context: &'a BTreeMap<String, String>, material: Option<&'a str>) -> OverlayInfo<'a> {
        OverlayInfo {
            frame_index: 12,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
            exposure_us: 1_500,
            loop_count: 2,
            fps: None,
            elapsed: Duration::from_millis(4_300),
            material,
            context,
        }
    }

    #[test]
    fn boxes_are_drawn_in_class_colour() {
        let context = BTreeMap::new();
        let frame = RgbImage::new(64, 48);
        let annotated = annotate(
            &frame,
            &measured_arc(20, 20, 40, 30),
            &AnnotationOptions::default(),
            &info(&context, None),
        );
        assert_eq!(annotated.dimensions(), frame.dimensions());
        assert_eq!(*annotated.get_pixel(30, 30), Rgb(ClassKind::ArcFlash.color()));
        assert_eq!(*annotated.get_pixel(30, 25), Rgb([0, 0, 0]));
    }

    #[test]
    fn hidden_boxes_and_labels_leave_the_frame_alone() {
        let context = BTreeMap::new();
        let frame = RgbImage::from_pixel(64, 48, GREY);
        let options = AnnotationOptions {
            show_boxes: false,
            show_labels: false,
            ..AnnotationOptions::default()
        };
        let annotated = annotate(&frame, &measured_arc(20, 20, 40, 30), &options, &info(&context, None));
        assert_eq!(annotated, frame);
    }

    #[test]
    fn label_follows_the_configured_box_corner() {
        let context = BTreeMap::new();
        let frame = RgbImage::from_pixel(64, 48, GREY);
        let measured = measured_arc(20, 20, 40, 30);

        let above = annotate(&frame, &measured, &AnnotationOptions::default(), &info(&context, None));
        assert_eq!(*above.get_pixel(0, 10), LABEL_BG);
        assert_eq!(*above.get_pixel(0, 32), GREY);

        let options = AnnotationOptions {
            label_position: Corner::BottomLeft,
            ..AnnotationOptions::default()
        };
        let below = annotate(&frame, &measured, &options, &info(&context, None));
        assert_eq!(*below.get_pixel(0, 10), GREY);
        assert_eq!(*below.get_pixel(0, 32), LABEL_BG);
    }

    #[test]
    fn overlay_fields_resolve_from_frame_and_job_context() {
        let context = BTreeMap::from([("Job Number".to_string(), "A-17".to_string())]);
        let info = info(&context, Some("316L"));
        assert_eq!(info.field("Frame").as_deref(), Some("Frame 12"));
        assert_eq!(info.field("ET").as_deref(), Some("ET 1500us"));
        assert_eq!(info.field("Running").as_deref(), Some("Running 4.3s"));
        assert_eq!(info.field("Material").as_deref(), Some("Material: 316L"));
        assert_eq!(info.field("Job Number").as_deref(), Some("Job Number: A-17"));
        assert_eq!(info.field("FPS"), None);
        assert_eq!(info.field("Wire Feed Speed"), None);
    }

    #[test]
    fn overlays_are_stacked_in_their_corner() {
        let context = BTreeMap::from([("Job Number".to_string(), "A-17".to_string())]);
        let frame = RgbImage::from_pixel(64, 48, GREY);
        let options = AnnotationOptions {
            overlays: BTreeMap::from([(
                Corner::BottomLeft,
                vec!["Material".to_string(), "Job Number".to_string(), "FPS".to_string()],
            )]),
            ..AnnotationOptions::default()
        };
        let annotated = annotate(&frame, &Measured::default(), &options, &info(&context, Some("316L")));
        // Two resolvable lines: block of 2 * 9 + 2 rows ending two rows above the bottom edge.
        assert_eq!(*annotated.get_pixel(MARGIN as u32, 26), LABEL_BG);
        assert_eq!(*annotated.get_pixel(MARGIN as u32, 25), GREY);
        assert_eq!(*annotated.get_pixel(63, 0), GREY);
    }

    #[test]
    fn overlay_only_tints_mask_pixels() {
        let frame = RgbImage::from_pixel(64, 48, Rgb([100, 100, 100]));
        let overlay = segment_overlay(&frame, &measured_arc(10, 10, 12, 12));
        let [r, g, b] = ClassKind::ArcFlash.color();
        let expect = |c: u8| ((100.0 + c as f32) / 2.0).round() as u8;
        assert_eq!(*overlay.get_pixel(11, 11), Rgb([expect(r), expect(g), expect(b)]));
        assert_eq!(*overlay.get_pixel(0, 0), Rgb([100, 100, 100]));
    }

    #[test]
    fn empty_measurements_leave_the_frame_untouched() {
        let context = BTreeMap::new();
        let frame = RgbImage::from_pixel(64, 48, GREY);
        let annotated = annotate(&frame, &Measured::default(), &AnnotationOptions::default(), &info(&context, None));
        assert_eq!(annotated, frame);
        assert_eq!(segment_overlay(&frame, &Measured::default()), frame);
    }
}
