use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Largest accepted upload: 2 MiB.
pub const MAX_UPLOAD_BYTES: u64 = 2 * 1024 * 1024;

/// A tag returned by the tagging service, in the shape it is stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keyword {
    /// Confidence on the service's 0-100 scale.
    pub confidence: f64,
    pub tag: KeywordTag,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordTag {
    pub en: String,
}

impl Keyword {
    pub fn new(tag: impl Into<String>, confidence: f64) -> Self {
        Self {
            confidence,
            tag: KeywordTag { en: tag.into() },
        }
    }

    pub fn label(&self) -> &str {
        &self.tag.en
    }
}

/// Metadata of a validated upload, used to create its record.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewImage {
    #[garde(length(min = 1, max = 255))]
    pub filename: String,

    #[garde(custom(allowed_mimetype))]
    pub mimetype: String,

    #[garde(length(min = 1))]
    pub path: String,

    #[garde(range(min = 1, max = 2097152))]
    pub size: u64,
}

/// Mimetypes must end in jpeg, jpg or png (case-insensitive).
pub fn is_allowed_mimetype(mimetype: &str) -> bool {
    let lower = mimetype.to_ascii_lowercase();
    ["jpeg", "jpg", "png"].iter().any(|ext| lower.ends_with(ext))
}

fn allowed_mimetype(value: &str, _ctx: &()) -> garde::Result {
    if is_allowed_mimetype(value) {
        Ok(())
    } else {
        Err(garde::Error::new("file type must be jpeg, jpg or png"))
    }
}

/// A stored image record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: Uuid,
    pub filename: String,
    pub mimetype: String,
    pub path: String,
    pub size: i64,
    pub keywords: Vec<Keyword>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
