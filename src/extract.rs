//! Text extraction for ingested documents.
//!
//! Plain text and markdown pass through untouched; PDF and DOCX are decoded
//! to UTF-8 text before chunking. Extraction never panics: a failure returns
//! an error and the ingest pipeline reports the file as skipped.

use std::io::Read;
use std::path::Path;

/// Extraction error. A failed file is skipped, not fatal to the operation.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedExtension(String),
    NotUtf8(String),
    Pdf(String),
    Docx(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedExtension(ext) => {
                write!(f, "unsupported file extension: {}", ext)
            }
            ExtractError::NotUtf8(name) => write!(f, "{} is not valid UTF-8 text", name),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Docx(e) => write!(f, "DOCX extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Maximum decompressed bytes to read from a DOCX ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extensions treated as plain text.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "csv", "log", "json", "xml", "html", "htm",
];

/// True when the ingest pipeline knows how to extract this path.
pub fn is_supported(path: &Path) -> bool {
    let ext = extension_of(path);
    ext == "pdf" || ext == "docx" || TEXT_EXTENSIONS.contains(&ext.as_str())
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Extract plain UTF-8 text from a file's bytes, dispatching on extension.
pub fn extract_text(path: &Path, bytes: &[u8]) -> Result<String, ExtractError> {
    let ext = extension_of(path);
    match ext.as_str() {
        "pdf" => extract_pdf(bytes),
        "docx" => extract_docx(bytes),
        ext if TEXT_EXTENSIONS.contains(&ext) => String::from_utf8(bytes.to_vec())
            .map_err(|_| ExtractError::NotUtf8(path.display().to_string())),
        other => Err(ExtractError::UnsupportedExtension(other.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|e| ExtractError::Docx(e.to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| ExtractError::Docx(e.to_string()))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(ExtractError::Docx(
                "word/document.xml exceeds size limit".to_string(),
            ));
        }
    }
    parse_docx_xml(&doc_xml)
}

/// Pull the text runs (`w:t`) out of a DOCX body, one line per paragraph
/// (`w:p`) so downstream block detection sees paragraph boundaries.
fn parse_docx_xml(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.name().as_ref() == b"w:t" {
                    in_text_run = true;
                }
            }
            Ok(quick_xml::events::Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text_run = false,
                b"w:p" => out.push_str("\n\n"),
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) if in_text_run => {
                let text = t
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_plain_text_passthrough() {
        let path = PathBuf::from("memo.txt");
        let text = extract_text(&path, b"(U) hello world").unwrap();
        assert_eq!(text, "(U) hello world");
    }

    #[test]
    fn test_unsupported_extension_rejected() {
        let path = PathBuf::from("binary.exe");
        assert!(matches!(
            extract_text(&path, b"\x00\x01"),
            Err(ExtractError::UnsupportedExtension(_))
        ));
        assert!(!is_supported(&path));
        assert!(is_supported(&PathBuf::from("notes.md")));
        assert!(is_supported(&PathBuf::from("Report.PDF")));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let path = PathBuf::from("bad.txt");
        assert!(matches!(
            extract_text(&path, &[0xff, 0xfe, 0x00]),
            Err(ExtractError::NotUtf8(_))
        ));
    }

    #[test]
    fn test_docx_paragraphs_become_blocks() {
        let xml = br#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>(S) Alpha paragraph.</w:t></w:r></w:p>
    <w:p><w:r><w:t>(U) Bravo </w:t></w:r><w:r><w:t>paragraph.</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let text = parse_docx_xml(xml).unwrap();
        assert_eq!(text, "(S) Alpha paragraph.\n\n(U) Bravo paragraph.");
    }

    #[test]
    fn test_corrupt_docx_is_error_not_panic() {
        let path = PathBuf::from("broken.docx");
        assert!(matches!(
            extract_text(&path, b"not a zip archive"),
            Err(ExtractError::Docx(_))
        ));
    }
}
