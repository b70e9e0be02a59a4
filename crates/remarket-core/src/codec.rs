//! # Column Codecs
//!
//! Encodings shared by the local table and the record type: the flattened
//! image list, ISO-8601 instants and the monotonic write stamp.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::IMAGE_DELIMITER;

/// Flattens an ordered list of image URIs into one column value.
///
/// ```rust
/// use remarket_core::codec::{decode_images, encode_images};
///
/// let images = vec!["a.jpg".to_string(), "b.jpg".to_string()];
/// assert_eq!(encode_images(&images), "a.jpg,b.jpg");
/// assert_eq!(decode_images("a.jpg,b.jpg"), images);
/// assert!(decode_images("").is_empty());
/// ```
pub fn encode_images(images: &[String]) -> String {
    images.join(IMAGE_DELIMITER)
}

/// Splits a stored image column back into its URIs.
///
/// A blank column is an empty list.
pub fn decode_images(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(IMAGE_DELIMITER).map(str::to_string).collect()
}

/// Formats an instant the way the product API does (`2024-05-01T12:00:00.250Z`).
pub fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Next `last_modified` stamp for a record previously stamped `previous`.
///
/// Never goes backwards, even if the wall clock does.
pub fn next_modified(previous: i64, now_millis: i64) -> i64 {
    now_millis.max(previous.saturating_add(1))
}
