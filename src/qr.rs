//! QR code generation for room share links

use qrcode::render::svg;
use qrcode::QrCode;

/// QR code options
#[derive(Debug, Clone)]
pub struct QrOptions {
    /// Minimum rendered dimension in pixels
    pub size: u32,
    /// Foreground color (hex)
    pub fg_color: String,
    /// Background color (hex)
    pub bg_color: String,
}

impl Default for QrOptions {
    fn default() -> Self {
        Self {
            size: 200,
            fg_color: "#000000".to_string(),
            bg_color: "#ffffff".to_string(),
        }
    }
}

/// Generate QR code as SVG string
pub fn generate_qr_svg(data: &str, options: &QrOptions) -> Result<String, String> {
    let code = QrCode::new(data.as_bytes()).map_err(|e| e.to_string())?;
    let image = code
        .render::<svg::Color>()
        .min_dimensions(options.size, options.size)
        .dark_color(svg::Color(&options.fg_color))
        .light_color(svg::Color(&options.bg_color))
        .build();
    Ok(image)
}
