//! Executable extension and dangerous MIME type gate.

use url::Url;

use super::SafetyError;

/// File extensions that are never fetched.
const BLOCKED_EXTENSIONS: &[&str] = &[
    "exe", "dll", "bat", "cmd", "sh", "ps1", "msi", "com", "scr", "vbs", "cpl", "jar",
];

/// MIME types (matched on `type/subtype`, parameters ignored) that are
/// never materialized.
const BLOCKED_MIME_TYPES: &[&str] = &[
    "application/x-executable",
    "application/x-msdownload",
    "application/x-msdos-program",
    "application/x-sh",
    "application/x-shellscript",
    "application/x-httpd-php",
    "application/x-httpd-cgi",
];

/// Reject URLs whose final path segment carries a blocked extension.
pub fn check_extension(url: &Url) -> Result<(), SafetyError> {
    let last = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .unwrap_or("");
    if let Some((_, ext)) = last.rsplit_once('.') {
        let ext = ext.to_ascii_lowercase();
        if BLOCKED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(SafetyError::FileType(format!("blocked extension .{ext}")));
        }
    }
    Ok(())
}

/// Reject responses that declare a blocked content type.
pub fn check_content_type(content_type: &str) -> Result<(), SafetyError> {
    let essence = match content_type.parse::<mime::Mime>() {
        Ok(m) => format!("{}/{}", m.type_(), m.subtype()),
        // Unparseable content types fall back to a raw prefix match.
        Err(_) => content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_ascii_lowercase(),
    };
    if BLOCKED_MIME_TYPES.contains(&essence.as_str()) {
        return Err(SafetyError::FileType(format!("blocked MIME type {essence}")));
    }
    Ok(())
}
