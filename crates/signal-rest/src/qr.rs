//! QR code rendering for device-link URIs.

use std::io::Cursor;

use image::{ImageFormat, Luma};
use qrcode::QrCode;

use crate::error::GatewayError;

const MIN_SIZE: u32 = 256;

/// Render `data` as a PNG-encoded QR code.
pub fn render_png(data: &str) -> Result<Vec<u8>, GatewayError> {
    let code = QrCode::new(data.as_bytes())
        .map_err(|e| GatewayError::internal(format!("failed to encode QR code: {e}")))?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_SIZE, MIN_SIZE)
        .build();

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| GatewayError::internal(format!("failed to encode PNG: {e}")))?;
    Ok(png)
}
