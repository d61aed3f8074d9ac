use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::errors::StudioError;

const DOWNLOAD_STEM_MAX_CHARS: usize = 40;
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Transport-ready form of a local binary resource.
///
/// Immutable once built. Requests take their own clone, so an upload slot can
/// be replaced without touching requests already in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAsset {
    data: String,
    mime_type: String,
}

impl EncodedAsset {
    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn decoded(&self) -> anyhow::Result<Vec<u8>> {
        BASE64
            .decode(self.data.as_bytes())
            .context("encoded asset is not valid base64")
    }
}

pub fn encode_file(path: &Path) -> Result<EncodedAsset, StudioError> {
    let bytes = std::fs::read(path).map_err(|source| StudioError::Encoding {
        resource: path.to_path_buf(),
        source,
    })?;
    let mime_type = mime_for_path(path).unwrap_or(FALLBACK_MIME_TYPE);
    Ok(encode_bytes(&bytes, mime_type))
}

pub fn encode_bytes(bytes: &[u8], mime_type: &str) -> EncodedAsset {
    EncodedAsset {
        data: BASE64.encode(bytes),
        mime_type: mime_type.to_string(),
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let lowered = mime_type.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}

/// An image returned by the generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Slot index inside the batch that produced it, 0-based.
    pub index: usize,
    pub origin_prompt: String,
}

impl ImageAsset {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            index: 0,
            origin_prompt: String::new(),
        }
    }

    pub fn in_slot(mut self, index: usize, origin_prompt: &str) -> Self {
        self.index = index;
        self.origin_prompt = origin_prompt.to_string();
        self
    }

    pub fn file_name(&self) -> String {
        download_file_name(&self.origin_prompt, self.index + 1, &self.mime_type)
    }

    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        hex::encode(&digest[..6])
    }

    /// Width and height when the bytes decode as a known image format.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        image::ImageReader::new(Cursor::new(self.bytes.as_slice()))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    }

    pub fn save_to(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(self.file_name());
        std::fs::write(&path, &self.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Local file name for a downloaded result: the prompt reduced to
/// lowercase alphanumeric words joined by `_`, then the 1-based number.
pub fn download_file_name(prompt: &str, number: usize, mime_type: &str) -> String {
    let kept = prompt
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || ch.is_whitespace())
        .collect::<String>();
    let joined = kept
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join("_")
        .to_ascii_lowercase();
    let truncated = joined
        .chars()
        .take(DOWNLOAD_STEM_MAX_CHARS)
        .collect::<String>();
    let stem = truncated.trim_end_matches('_');
    let stem = if stem.is_empty() { "image" } else { stem };
    format!("{stem}_{number}.{}", extension_for_mime(mime_type))
}
