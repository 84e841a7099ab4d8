//! Scannable-image rendering.
//!
//! Rendering is a pure transform from token text to image bytes. [`RenderOptions::for_kind`] fixes
//! the options each payload kind is drawn with and the capacity limits they imply;
//! [`QrPngRenderer`] draws a QR symbol to PNG honouring those options.

use crate::payload::PayloadKind;
use chrono::NaiveDate;
use image::{ImageBuffer, ImageFormat, Rgba};
use qrcode::{Color, EcLevel, QrCode};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// QR error-correction level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCorrection {
    L,
    M,
    Q,
    H,
}

impl ErrorCorrection {
    /// Byte-mode capacity of the largest (version 40) symbol at this level.
    pub fn byte_capacity(self) -> usize {
        match self {
            ErrorCorrection::L => 2953,
            ErrorCorrection::M => 2331,
            ErrorCorrection::Q => 1663,
            ErrorCorrection::H => 1273,
        }
    }

    fn ec_level(self) -> EcLevel {
        match self {
            ErrorCorrection::L => EcLevel::L,
            ErrorCorrection::M => EcLevel::M,
            ErrorCorrection::Q => EcLevel::Q,
            ErrorCorrection::H => EcLevel::H,
        }
    }
}

/// How a token should be drawn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    pub error_correction: ErrorCorrection,
    pub width_px: u32,
    pub margin: u32,
    pub dark_color: String,
    pub light_color: String,
}

impl RenderOptions {
    /// Rendering defaults per payload kind.
    ///
    /// Embedded data drops to level `M` to leave room for larger payloads; links and summaries
    /// stay at `H` so a damaged print still scans.
    pub fn for_kind(kind: PayloadKind) -> Self {
        match kind {
            PayloadKind::LinkAccess => Self {
                error_correction: ErrorCorrection::H,
                width_px: 400,
                margin: 1,
                dark_color: "#000000".into(),
                light_color: "#FFFFFF".into(),
            },
            PayloadKind::DataAccess => Self {
                error_correction: ErrorCorrection::M,
                width_px: 500,
                margin: 1,
                dark_color: "#000000".into(),
                light_color: "#FFFFFF".into(),
            },
            PayloadKind::PatientSummary => Self {
                error_correction: ErrorCorrection::H,
                width_px: 500,
                margin: 2,
                dark_color: "#1a1a1a".into(),
                light_color: "#ffffff".into(),
            },
        }
    }

    pub fn capacity(&self) -> usize {
        self.error_correction.byte_capacity()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to render scannable image: {0}")]
    Failed(String),

    #[error("invalid colour {0:?}, expected #rrggbb or #rrggbbaa")]
    InvalidColor(String),
}

/// Draws token text as an image (PNG bytes for the shipped options).
pub trait ImageRenderer: Send + Sync {
    fn render(&self, text: &str, options: &RenderOptions) -> Result<Vec<u8>, RenderError>;
}

/// Renders QR codes as square PNG images.
///
/// The image is `width_px` wide including a quiet zone of `margin` modules on every side, with
/// each module scaled by the same fractional factor. When `width_px` is too small for one pixel
/// per module the image falls back to exactly one pixel per module.
#[derive(Clone, Copy, Debug, Default)]
pub struct QrPngRenderer;

impl ImageRenderer for QrPngRenderer {
    fn render(&self, text: &str, options: &RenderOptions) -> Result<Vec<u8>, RenderError> {
        let code = QrCode::with_error_correction_level(text, options.error_correction.ec_level())
            .map_err(|e| RenderError::Failed(e.to_string()))?;
        let dark = parse_color(&options.dark_color)?;
        let light = parse_color(&options.light_color)?;

        let modules = code.width();
        let colors = code.to_colors();
        let span = modules as u32 + 2 * options.margin;
        let (size, scale) = if options.width_px >= span {
            (options.width_px, f64::from(options.width_px) / f64::from(span))
        } else {
            (span, 1.0)
        };
        let offset = f64::from(options.margin) * scale;

        let image = ImageBuffer::from_fn(size, size, |x, y| {
            let column = ((f64::from(x) - offset) / scale).floor();
            let row = ((f64::from(y) - offset) / scale).floor();
            let inside = column >= 0.0
                && row >= 0.0
                && (column as usize) < modules
                && (row as usize) < modules;
            if inside && colors[row as usize * modules + column as usize] == Color::Dark {
                dark
            } else {
                light
            }
        });

        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| RenderError::Failed(e.to_string()))?;
        Ok(bytes)
    }
}

fn parse_color(value: &str) -> Result<Rgba<u8>, RenderError> {
    let invalid = || RenderError::InvalidColor(value.to_owned());
    let bytes = hex::decode(value.strip_prefix('#').ok_or_else(invalid)?).map_err(|_| invalid())?;
    match bytes.as_slice() {
        [r, g, b] => Ok(Rgba([*r, *g, *b, u8::MAX])),
        [r, g, b, a] => Ok(Rgba([*r, *g, *b, *a])),
        _ => Err(invalid()),
    }
}

/// Download filename for a rendered code: `medical-qr-{kind}-{patientId}-{YYYY-MM-DD}.png`.
pub fn qr_filename(kind: PayloadKind, patient_id: &str, date: NaiveDate) -> String {
    format!(
        "medical-qr-{}-{}-{}.png",
        kind.short_name(),
        patient_id,
        date.format("%Y-%m-%d")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_tokens_trade_correction_for_capacity() {
        let link = RenderOptions::for_kind(PayloadKind::LinkAccess);
        let data = RenderOptions::for_kind(PayloadKind::DataAccess);

        assert_eq!(link.error_correction, ErrorCorrection::H);
        assert_eq!(data.error_correction, ErrorCorrection::M);
        assert!(data.capacity() > link.capacity());
    }

    fn decode_png(bytes: &[u8]) -> image::RgbaImage {
        assert!(bytes.starts_with(b"\x89PNG\r\n\x1a\n"));
        image::load_from_memory_with_format(bytes, ImageFormat::Png)
            .unwrap()
            .to_rgba8()
    }

    #[test]
    fn png_matches_requested_width_and_colours() {
        let options = RenderOptions::for_kind(PayloadKind::PatientSummary);
        let png = QrPngRenderer.render("{\"type\":\"PATIENT_SUMMARY\"}", &options).unwrap();
        let image = decode_png(&png);

        assert_eq!(image.dimensions(), (500, 500));
        // Corners sit in the quiet zone.
        assert_eq!(*image.get_pixel(0, 0), Rgba([0xff, 0xff, 0xff, 0xff]));
        assert_eq!(*image.get_pixel(499, 499), Rgba([0xff, 0xff, 0xff, 0xff]));

        // The top-left finder pattern starts right after the margin.
        let code = QrCode::with_error_correction_level("{\"type\":\"PATIENT_SUMMARY\"}", EcLevel::H)
            .unwrap();
        let scale = 500.0 / (code.width() + 2 * options.margin as usize) as f64;
        let first_module = (f64::from(options.margin) * scale).ceil() as u32;
        assert_eq!(
            *image.get_pixel(first_module, first_module),
            Rgba([0x1a, 0x1a, 0x1a, 0xff])
        );
        assert_eq!(
            *image.get_pixel(first_module - 1, first_module - 1),
            Rgba([0xff, 0xff, 0xff, 0xff])
        );
    }

    #[test]
    fn each_kind_renders_at_its_width() {
        let text = "https://records.example/patient-access?token=abc";
        let at = |kind| {
            let options = RenderOptions::for_kind(kind);
            decode_png(&QrPngRenderer.render(text, &options).unwrap())
        };

        let link = at(PayloadKind::LinkAccess);
        let data = at(PayloadKind::DataAccess);
        assert_eq!(link.dimensions(), (400, 400));
        assert_eq!(data.dimensions(), (500, 500));
    }

    #[test]
    fn narrow_width_falls_back_to_one_pixel_per_module() {
        let options = RenderOptions {
            width_px: 1,
            ..RenderOptions::for_kind(PayloadKind::LinkAccess)
        };
        let image = decode_png(&QrPngRenderer.render("p1", &options).unwrap());
        let modules = QrCode::with_error_correction_level("p1", EcLevel::H)
            .unwrap()
            .width() as u32;
        assert_eq!(image.width(), modules + 2 * options.margin);
    }

    #[test]
    fn oversized_text_and_bad_colours_are_errors() {
        let options = RenderOptions::for_kind(PayloadKind::LinkAccess);
        let too_long = "x".repeat(options.capacity() + 1);
        assert!(matches!(
            QrPngRenderer.render(&too_long, &options),
            Err(RenderError::Failed(_))
        ));

        let options = RenderOptions {
            dark_color: "black".into(),
            ..options
        };
        assert!(matches!(
            QrPngRenderer.render("p1", &options),
            Err(RenderError::InvalidColor(_))
        ));
    }

    #[test]
    fn filename_includes_kind_patient_and_date() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        assert_eq!(
            qr_filename(PayloadKind::PatientSummary, "p1", date),
            "medical-qr-summary-p1-2024-12-01.png"
        );
    }
}
