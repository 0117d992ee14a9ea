use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::FilterType;
use image::{GenericImageView, ImageFormat};
use std::io::Cursor;
use url::Url;

use crate::error::{DockError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IconKind {
    Png,
    Jpeg,
    Gif,
    Webp,
    Ico,
    Bmp,
    Svg,
}

impl IconKind {
    fn image_format(self) -> Option<ImageFormat> {
        match self {
            IconKind::Png => Some(ImageFormat::Png),
            IconKind::Jpeg => Some(ImageFormat::Jpeg),
            IconKind::Gif => Some(ImageFormat::Gif),
            IconKind::Webp => Some(ImageFormat::WebP),
            IconKind::Ico => Some(ImageFormat::Ico),
            IconKind::Bmp => Some(ImageFormat::Bmp),
            IconKind::Svg => None,
        }
    }
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]).to_ascii_lowercase();
    head.contains("<svg")
}

/// Magic bytes first, then the content type, then the url's extension.
pub fn sniff_icon_kind(content_type: Option<&str>, source: Option<&Url>, bytes: &[u8]) -> Option<IconKind> {
    let content_type = content_type
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();

    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some(IconKind::Png);
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(IconKind::Jpeg);
    }
    if bytes.starts_with(b"GIF8") {
        return Some(IconKind::Gif);
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some(IconKind::Webp);
    }
    if bytes.len() >= 4
        && bytes[0] == 0x00
        && bytes[1] == 0x00
        && (bytes[2] == 0x01 || bytes[2] == 0x02)
        && bytes[3] == 0x00
    {
        return Some(IconKind::Ico);
    }
    if bytes.starts_with(b"BM") {
        return Some(IconKind::Bmp);
    }
    if looks_like_svg(bytes) {
        return Some(IconKind::Svg);
    }

    if content_type.contains("image/png") {
        return Some(IconKind::Png);
    }
    if content_type.contains("image/jpeg") {
        return Some(IconKind::Jpeg);
    }
    if content_type.contains("image/gif") {
        return Some(IconKind::Gif);
    }
    if content_type.contains("image/webp") {
        return Some(IconKind::Webp);
    }
    if content_type.contains("image/x-icon")
        || content_type.contains("vnd.microsoft.icon")
        || content_type.contains("image/ico")
    {
        return Some(IconKind::Ico);
    }
    if content_type.contains("image/svg") {
        return Some(IconKind::Svg);
    }

    let ext = source
        .and_then(|url| url.path_segments())
        .and_then(|segments| segments.last())
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())?;
    match ext.as_str() {
        "png" => Some(IconKind::Png),
        "jpg" | "jpeg" => Some(IconKind::Jpeg),
        "gif" => Some(IconKind::Gif),
        "webp" => Some(IconKind::Webp),
        "ico" => Some(IconKind::Ico),
        "bmp" => Some(IconKind::Bmp),
        "svg" => Some(IconKind::Svg),
        _ => None,
    }
}

/// Turns fetched icon bytes into an embeddable data URI. Raster images are
/// downscaled to `max_side` and re-encoded as PNG; SVG is embedded as is.
pub fn encode_icon(
    bytes: &[u8],
    content_type: Option<&str>,
    source: Option<&Url>,
    max_side: u32,
    max_bytes: usize,
) -> Result<String> {
    if bytes.is_empty() {
        return Err(DockError::Fetch("icon payload is empty".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(DockError::Fetch(format!(
            "icon payload too large ({} bytes > {} bytes)",
            bytes.len(),
            max_bytes
        )));
    }

    let kind = sniff_icon_kind(content_type, source, bytes)
        .ok_or_else(|| DockError::Fetch("icon payload is not a recognised image".to_string()))?;
    let Some(format) = kind.image_format() else {
        return Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(bytes)));
    };

    let decoded = image::load_from_memory_with_format(bytes, format)?;
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(DockError::Fetch(format!(
            "icon has invalid dimensions {}x{}",
            width, height
        )));
    }

    let bounded = max_side.max(1);
    let resized = if width.max(height) > bounded {
        decoded.resize(bounded, bounded, FilterType::Triangle)
    } else {
        decoded
    };

    let mut encoded = Cursor::new(Vec::new());
    resized.write_to(&mut encoded, ImageFormat::Png)?;
    Ok(format!(
        "data:image/png;base64,{}",
        STANDARD.encode(encoded.into_inner())
    ))
}

/// Splits a `data:` URI into its media type and decoded payload.
pub fn parse_data_uri(reference: &str) -> Option<(String, Vec<u8>)> {
    let rest = reference.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let (media_type, is_base64) = match header.strip_suffix(";base64") {
        Some(media_type) => (media_type, true),
        None => (header, false),
    };
    let bytes = if is_base64 {
        STANDARD.decode(payload.trim()).ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((media_type.to_ascii_lowercase(), bytes))
}

/// Whether a stored favicon can be rendered without resolving again.
pub fn is_usable_icon(reference: &str) -> bool {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return false;
    }
    if let Some((media_type, bytes)) = parse_data_uri(trimmed) {
        return media_type.starts_with("image/") && !bytes.is_empty();
    }
    Url::parse(trimmed)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}
