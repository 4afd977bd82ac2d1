//! QR code rendering for the scan-based linking flow

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageBuffer, Luma};
use qrcode::QrCode;

use wp_core::{Error, Result};

/// Pixels per QR module
const MODULE_SIZE: u32 = 8;
/// Light border, in modules
const QUIET_ZONE: u32 = 2;

fn encode(payload: &str) -> Result<QrCode> {
    if payload.trim().is_empty() {
        return Err(Error::Other("QR payload is empty".into()));
    }
    QrCode::new(payload.as_bytes()).map_err(|e| Error::Other(format!("QR generation failed: {e}")))
}

/// Render a QR payload as PNG bytes
pub fn render_qr_png(payload: &str) -> Result<Vec<u8>> {
    let code = encode(payload)?;

    let modules = code.width() as u32;
    let img_size = (modules + QUIET_ZONE * 2) * MODULE_SIZE;

    let img = ImageBuffer::from_fn(img_size, img_size, |x, y| {
        let (cx, cy) = (x / MODULE_SIZE, y / MODULE_SIZE);
        if cx < QUIET_ZONE || cy < QUIET_ZONE {
            return Luma([255u8]);
        }
        let (mx, my) = (cx - QUIET_ZONE, cy - QUIET_ZONE);
        if mx >= modules || my >= modules {
            return Luma([255u8]);
        }
        match code[(mx as usize, my as usize)] {
            qrcode::Color::Dark => Luma([0u8]),
            qrcode::Color::Light => Luma([255u8]),
        }
    });

    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| Error::Other(format!("PNG encoding failed: {e}")))?;

    Ok(buf.into_inner())
}

/// Render a QR payload as a `data:image/png;base64,...` URL for an `<img>` tag
pub fn render_qr_data_url(payload: &str) -> Result<String> {
    let png = render_qr_png(payload)?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}

/// Render a QR payload as unicode text for a terminal
pub fn render_qr_terminal(payload: &str) -> Result<String> {
    let code = encode(payload)?;
    Ok(code
        .render::<qrcode::render::unicode::Dense1x2>()
        .quiet_zone(true)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_payload() {
        assert!(render_qr_data_url("   ").is_err());
        assert!(render_qr_terminal("").is_err());
    }

    #[test]
    fn test_png_signature() {
        let png = render_qr_png("2@abcdef,ghijkl,mnopqr").unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn test_data_url() {
        let url = render_qr_data_url("2@abcdef,ghijkl,mnopqr").unwrap();
        let encoded = url.strip_prefix("data:image/png;base64,").unwrap();
        let decoded = STANDARD.decode(encoded).unwrap();
        assert_eq!(&decoded[1..4], b"PNG");
    }

    #[test]
    fn test_terminal_output_is_multiline() {
        let text = render_qr_terminal("https://example.com/pair").unwrap();
        assert!(text.lines().count() > 5);
    }
}
