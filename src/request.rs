//! Request path classification and derivative-name parsing.

use crate::config::Config;

/// A classified request path.
///
/// `parent_filename`, `width`, and `height` are only meaningful when
/// `is_derivative` is true.
#[derive(Debug, Clone)]
pub struct DerivativeRequest {
    /// The path exactly as received.
    pub raw_path: String,

    /// Directory portion between the uploads root and the filename.
    /// Empty for files directly under the uploads root.
    pub upload_subpath: String,

    /// Requested filename without extension, URL-decoded.
    pub filename: String,

    /// File extension as spelled in the request.
    pub extension: String,

    /// Whether the path points into the uploads tree and carries a
    /// recognized image extension.
    pub is_image: bool,

    /// Whether the filename ends in a `-WxH` dimension suffix.
    pub is_derivative: bool,

    /// Base filename the derivative would be generated from.
    pub parent_filename: String,

    /// Requested width in pixels.
    pub width: u32,

    /// Requested height in pixels.
    pub height: u32,
}

impl DerivativeRequest {
    /// Classify a raw request path. Pure string work, no filesystem access.
    pub fn parse(raw_path: &str, config: &Config) -> Self {
        let mut request = Self {
            raw_path: raw_path.to_string(),
            upload_subpath: String::new(),
            filename: String::new(),
            extension: String::new(),
            is_image: false,
            is_derivative: false,
            parent_filename: String::new(),
            width: 0,
            height: 0,
        };

        let prefix = config.uploads_url.trim_end_matches('/');
        let Some(remainder) = raw_path.strip_prefix(prefix) else {
            return request;
        };
        let Some(remainder) = remainder.strip_prefix('/') else {
            return request;
        };

        let (subpath, basename) = match remainder.rfind('/') {
            Some(pos) => (&remainder[..pos], &remainder[pos + 1..]),
            None => ("", remainder),
        };

        let Some(dot) = basename.rfind('.') else {
            return request;
        };
        let (stem, ext) = (&basename[..dot], &basename[dot + 1..]);
        if stem.is_empty() || !config.is_allowed_extension(ext) {
            return request;
        }

        request.upload_subpath = subpath.trim_matches('/').to_string();
        request.filename = url_decode(stem);
        request.extension = ext.to_string();
        request.is_image = true;

        if let Some((parent, width, height)) = split_dimension_suffix(&request.filename) {
            request.parent_filename = parent.to_string();
            request.width = width;
            request.height = height;
            request.is_derivative = true;
        }

        request
    }
}

/// Split a trailing `-WxH` suffix off a filename.
///
/// Only the final dash can start a valid suffix: any earlier dash would
/// leave a later dash inside the dimension spec, which digits-x-digits
/// cannot contain.
fn split_dimension_suffix(filename: &str) -> Option<(&str, u32, u32)> {
    let dash = filename.rfind('-')?;
    let spec = &filename[dash + 1..];

    let x_pos = spec.find('x')?;
    let (w_str, h_str) = spec.split_at(x_pos);
    let h_str = &h_str[1..];

    if w_str.is_empty() || h_str.is_empty() {
        return None;
    }
    if !w_str.bytes().all(|b| b.is_ascii_digit()) || !h_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    // Digits too large for u32 cannot name a real derivative.
    let width = w_str.parse::<u32>().ok()?;
    let height = h_str.parse::<u32>().ok()?;

    Some((&filename[..dash], width, height))
}

/// Decode `%XX` escapes and `+` as space. Malformed escapes pass through
/// unchanged.
fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'+' {
            out.push(b' ');
            i += 1;
        } else if b == b'%' && i + 2 < bytes.len() {
            match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                (Some(hi), Some(lo)) => {
                    out.push(hi * 16 + lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            }
        } else {
            out.push(b);
            i += 1;
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
