// src/image_probe.rs

use tracing::info;

/// Result of structurally checking submitted bytes before inference.
#[derive(Debug)]
pub enum ImageContent {
    /// Recognized image format, worth an inference call.
    Supported(ImageFormat),
    /// Recognized signature but suspiciously little payload behind it.
    TooSmall,
    /// Not a recognizable image.
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }
}

/// Minimum number of bytes we expect from a real receipt photo. Below
/// this threshold the file cannot hold a decodable image.
const MIN_IMAGE_BYTES: usize = 128;

/// Classify raw bytes by signature. Reads magic numbers only; full
/// decoding is the model server's job.
pub fn probe_image(bytes: &[u8]) -> ImageContent {
    let Some(format) = sniff_format(bytes) else {
        let prefix: Vec<String> = bytes.iter().take(4).map(|b| format!("{b:02x}")).collect();
        return ImageContent::Unsupported(format!(
            "unrecognized signature [{}], {} bytes",
            prefix.join(" "),
            bytes.len()
        ));
    };

    if bytes.len() < MIN_IMAGE_BYTES {
        info!(
            format = ?format,
            bytes = bytes.len(),
            "Image below size threshold - treating as truncated"
        );
        return ImageContent::TooSmall;
    }

    info!(format = ?format, bytes = bytes.len(), "Image signature check passed");
    ImageContent::Supported(format)
}

fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some(ImageFormat::Png);
    }
    if bytes.starts_with(b"\xff\xd8\xff") {
        return Some(ImageFormat::Jpeg);
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return Some(ImageFormat::Webp);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(header: &[u8]) -> Vec<u8> {
        let mut bytes = header.to_vec();
        bytes.resize(MIN_IMAGE_BYTES + 64, 0);
        bytes
    }

    #[test]
    fn test_garbage_bytes() {
        let result = probe_image(b"this is not an image");
        assert!(matches!(result, ImageContent::Unsupported(_)));
    }

    #[test]
    fn test_png_and_jpeg_signatures() {
        assert!(matches!(
            probe_image(&padded(b"\x89PNG\r\n\x1a\n")),
            ImageContent::Supported(ImageFormat::Png)
        ));
        assert!(matches!(
            probe_image(&padded(b"\xff\xd8\xff\xe0")),
            ImageContent::Supported(ImageFormat::Jpeg)
        ));
    }

    #[test]
    fn test_webp_needs_riff_and_fourcc() {
        let mut header = b"RIFF\x00\x00\x00\x00WEBP".to_vec();
        header.resize(MIN_IMAGE_BYTES + 64, 0);
        assert!(matches!(
            probe_image(&header),
            ImageContent::Supported(ImageFormat::Webp)
        ));
        assert!(matches!(
            probe_image(b"RIFF\x00\x00\x00\x00WAVE"),
            ImageContent::Unsupported(_)
        ));
    }

    #[test]
    fn test_truncated_image_is_too_small() {
        assert!(matches!(
            probe_image(b"\x89PNG\r\n\x1a\n"),
            ImageContent::TooSmall
        ));
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(probe_image(b""), ImageContent::Unsupported(_)));
    }
}
