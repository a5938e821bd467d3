// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MIME helpers and payload shaping shared by both adapters.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parley_core::types::MessageType;

/// Lowercased MIME essence without parameters (`audio/ogg; codecs=opus` -> `audio/ogg`).
pub fn mime_essence(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or(mime)
        .trim()
        .to_ascii_lowercase()
}

/// Whether `mime` is in an adapter's accepted audio list. An empty list accepts everything.
pub fn audio_accepted(accepted: &[&str], mime: &str) -> bool {
    if accepted.is_empty() {
        return true;
    }
    let essence = mime_essence(mime);
    accepted.iter().any(|a| *a == essence)
}

/// File extension conventionally used for a MIME type.
pub fn extension_for(mime: &str) -> &'static str {
    match mime_essence(mime).as_str() {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "video/3gpp" => "3gp",
        "audio/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        "audio/aac" => "aac",
        "audio/mp4" => "m4a",
        "audio/amr" => "amr",
        "audio/webm" | "video/webm" => "webm",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        _ => "bin",
    }
}

/// A file name for media that arrived without one.
pub fn default_file_name(kind: MessageType, mime: &str) -> String {
    let stem = match kind {
        MessageType::Image => "image",
        MessageType::Video => "video",
        MessageType::Audio => "audio",
        MessageType::Document | MessageType::Text => "file",
    };
    format!("{stem}.{}", extension_for(mime))
}

/// Provider media type label (`image`, `video`, `audio`, `document`).
pub fn media_label(kind: MessageType) -> &'static str {
    match kind {
        MessageType::Image => "image",
        MessageType::Video => "video",
        MessageType::Audio => "audio",
        MessageType::Document | MessageType::Text => "document",
    }
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode inline base64 media, tolerating a `data:` URL prefix.
pub fn decode_base64(raw: &str) -> Option<Vec<u8>> {
    let payload = match raw.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => raw,
    };
    STANDARD.decode(payload.trim()).ok()
}
