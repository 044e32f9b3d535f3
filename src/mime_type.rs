//! Content-type detection from file names.

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const JSON: &str = "application/json";

/// Guess a MIME type from the extension of `name`.
///
/// Only a handful of text formats are recognised; the match is
/// case-sensitive and everything else is served as raw bytes.
pub fn mime_for_name(name: &str) -> &'static str {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => match ext {
            "json" => JSON,
            "txt" => "text/plain",
            "md" => "text/markdown",
            _ => OCTET_STREAM,
        },
        _ => OCTET_STREAM,
    }
}
