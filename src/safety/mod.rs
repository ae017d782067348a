//! Security filters applied before any URL is fetched or written.
//!
//! Three gates, all fatal for the URL but never for the session: the SSRF
//! check ([`ssrf::check_ssrf`]), the mirrored-path derivation
//! ([`filename::safe_filename`]) and the executable extension / MIME gate
//! ([`extension`]).

pub mod extension;
pub mod filename;
pub mod ssrf;

use thiserror::Error;

pub use extension::{check_content_type, check_extension};
pub use filename::{is_contained, safe_filename, sidecar_name};
pub use ssrf::check_ssrf;

/// Why a URL was refused by one of the safety gates.
#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("ssrf blocked ({reason}): {detail}")]
    Ssrf { reason: &'static str, detail: String },
    #[error("host resolution failed: {0}")]
    Resolve(String),
    #[error("unsafe path: {0}")]
    Path(String),
    #[error("blocked file type: {0}")]
    FileType(String),
}
