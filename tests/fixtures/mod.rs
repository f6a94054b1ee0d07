//! Canned payloads shared by the integration tests

#![allow(dead_code)]

use serde_json::{json, Value};

/// A valid 1x1 PNG.
pub const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

/// GIF header; a valid image, but not an accepted type.
pub const TINY_GIF: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";

pub const UPLOAD_ID: &str = "i05e132196706b94b1d85efb5f3SaM1j";

/// Confidences used by the tag selection scenario, in service order.
pub const SCENARIO_CONFIDENCES: [f64; 8] = [10.0, 25.0, 30.0, 21.0, 5.0, 40.0, 22.0, 90.0];

pub fn imagga_upload_response() -> Value {
    json!({
        "result": { "upload_id": UPLOAD_ID },
        "status": { "text": "", "type": "success" }
    })
}

/// Tagging response whose tags are named `tag0..` with the given confidences.
pub fn imagga_tags_response(confidences: &[f64]) -> Value {
    let tags: Vec<Value> = confidences
        .iter()
        .enumerate()
        .map(|(i, c)| json!({ "confidence": c, "tag": { "en": format!("tag{i}") } }))
        .collect();
    json!({
        "result": { "tags": tags },
        "status": { "text": "", "type": "success" }
    })
}

pub fn unsplash_response(urls: &[&str]) -> Value {
    let results: Vec<Value> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| {
            json!({
                "id": format!("photo{i}"),
                "urls": { "raw": format!("{url}?raw"), "full": url, "small": format!("{url}?w=400") }
            })
        })
        .collect();
    json!({ "total": urls.len(), "total_pages": 1, "results": results })
}
