//! Inline binary attachments.
//!
//! Attachments are kept base64-encoded inside the record itself (not through
//! the store's native attachment API), so every save carries their bytes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STD;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub content_type: String,

    /// Base64 of the attachment bytes.
    pub data: String,
}

impl Attachment {
    pub fn encode(bytes: &[u8], content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            data: BASE64_STD.encode(bytes),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STD.decode(self.data.as_bytes())
    }
}

/// Guess a content type from the attachment name's extension.
pub fn guess_content_type(name: &str) -> &'static str {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return DEFAULT_CONTENT_TYPE;
    };
    match ext.to_ascii_lowercase().as_str() {
        "json" => "application/json",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "sh" => "application/x-sh",
        "py" => "text/x-python",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "zip" => "application/zip",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("result.json", "application/json")]
    #[case("plot.PNG", "image/png")]
    #[case("logs_a.out", "text/plain")]
    #[case("archive.tar.gz", "application/gzip")]
    #[case("README", "text/plain")]
    fn guesses_from_extension(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(guess_content_type(name), expected);
    }

    #[test]
    fn stores_standard_base64() {
        let attachment = Attachment::encode(b"hello world", "text/plain");
        assert_eq!(attachment.data, "aGVsbG8gd29ybGQ=");
        assert_eq!(attachment.decode().unwrap(), b"hello world");
    }
}
