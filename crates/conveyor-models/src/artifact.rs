//! Handler output artifacts.

use serde::{Deserialize, Serialize};

/// Result of a successful handler invocation.
///
/// The content type is declared by the handler and carried end-to-end; it is
/// never inferred from the bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Raw artifact bytes
    pub data: Vec<u8>,
    /// Declared content type (e.g. "text/plain")
    pub content_type: String,
    /// Suggested download filename
    pub filename: String,
}

impl Artifact {
    pub fn new(
        data: Vec<u8>,
        content_type: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            data,
            content_type: content_type.into(),
            filename: filename.into(),
        }
    }

    /// Check that the filename-extension hint agrees with the declared
    /// content type. A filename without a known extension agrees vacuously.
    pub fn hint_agrees(&self) -> bool {
        match extension_hint(&self.filename) {
            Some(hint) => {
                let declared = self.content_type.split(';').next().unwrap_or("").trim();
                hint == declared
            }
            None => true,
        }
    }
}

/// Secondary content-type hint derived from a filename extension.
///
/// Display-only: the stored content type always comes from the handler.
pub fn extension_hint(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit('.').next()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" => Some("text/plain"),
        "json" => Some("application/json"),
        "md" => Some("text/markdown"),
        "html" => Some("text/html"),
        "csv" => Some("text/csv"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "svg" => Some("image/svg+xml"),
        "pdf" => Some("application/pdf"),
        "zip" => Some("application/zip"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_hints() {
        assert_eq!(extension_hint("report.json"), Some("application/json"));
        assert_eq!(extension_hint("chart.PNG"), Some("image/png"));
        assert_eq!(extension_hint("noextension"), None);
        assert_eq!(extension_hint("archive.tar.unknownext"), None);
    }

    #[test]
    fn hint_agreement() {
        let ok = Artifact::new(b"{}".to_vec(), "application/json", "out.json");
        assert!(ok.hint_agrees());

        let with_charset = Artifact::new(b"hi".to_vec(), "text/plain; charset=utf-8", "out.txt");
        assert!(with_charset.hint_agrees());

        let mismatch = Artifact::new(b"hi".to_vec(), "application/json", "out.txt");
        assert!(!mismatch.hint_agrees());

        let unknown_ext = Artifact::new(b"hi".to_vec(), "application/x-custom", "out.bin");
        assert!(unknown_ext.hint_agrees());
    }
}
