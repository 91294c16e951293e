//! Uploaded documents as summarization inputs.
//!
//! Plain text (`.txt`, `.md`), PDF and Word (`.docx`) files are decoded to
//! text; anything else is reported as an unsupported item rather than fed to
//! the model as binary noise.

use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use std::fmt;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::{debug, instrument};

use crate::error::ScrapeError;
use crate::models::{Document, Page};

/// Extensions accepted as documents, compared case-insensitively.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "pdf", "docx"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Pdf,
    Docx,
}

fn format_of(name: &str) -> Option<Format> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" | "md" => Some(Format::Text),
        "pdf" => Some(Format::Pdf),
        "docx" => Some(Format::Docx),
        _ => None,
    }
}

pub fn is_supported(name: &str) -> bool {
    format_of(name).is_some()
}

fn extract_error(name: &str, reason: impl fmt::Display) -> ScrapeError {
    ScrapeError::Extract {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Read a file into a [`Document`] named after the file.
///
/// Decoding happens later, in [`document_page`], so that unsupported or
/// unreadable files surface as per-item failures alongside scrape failures.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn read_document(path: &Path) -> Result<Document, ScrapeError> {
    let data = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Document::new(name, data))
}

/// Decode an uploaded document into a [`Page`] whose link is `"#"`.
#[instrument(level = "debug", skip_all, fields(name = %doc.name, bytes = doc.data.len()))]
pub fn document_page(doc: &Document) -> Result<Page, ScrapeError> {
    let format = format_of(&doc.name).ok_or_else(|| ScrapeError::UnsupportedFileType(doc.name.clone()))?;
    let content = match format {
        Format::Text => String::from_utf8_lossy(&doc.data).into_owned(),
        Format::Pdf => pdf_extract::extract_text_from_mem(&doc.data).map_err(|e| extract_error(&doc.name, e))?,
        Format::Docx => docx_text(doc)?,
    };
    if content.trim().is_empty() {
        return Err(ScrapeError::NoContent(doc.name.clone()));
    }
    debug!(?format, chars = content.chars().count(), "Document decoded");
    Ok(Page {
        date: None,
        title: doc.name.clone(),
        link: "#".to_string(),
        description: String::new(),
        content,
        author: None,
        image_url: None,
    })
}

/// [`document_page`] on the blocking pool. A panic inside a decoder is
/// reported as an extraction failure of that document.
pub async fn decode(doc: Document) -> Result<Page, ScrapeError> {
    let name = doc.name.clone();
    tokio::task::spawn_blocking(move || document_page(&doc))
        .await
        .map_err(|e| extract_error(&name, e))?
}

fn docx_text(doc: &Document) -> Result<String, ScrapeError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(doc.data.as_slice())).map_err(|e| extract_error(&doc.name, e))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| extract_error(&doc.name, e))?
        .read_to_string(&mut xml)?;
    body_text(&xml).map_err(|e| extract_error(&doc.name, e))
}

/// Text of a WordprocessingML body: runs joined, one line per paragraph.
fn body_text(xml: &str) -> Result<String, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_run_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_run_text = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_run_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_run_text => out.push_str(&t.decode()?),
            Event::GeneralRef(r) if in_run_text => match r.resolve_char_ref()? {
                Some(c) => out.push(c),
                None => {
                    if let Some(s) = resolve_predefined_entity(&r.decode()?) {
                        out.push_str(s);
                    }
                }
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn doc(name: &str, content: &str) -> Document {
        Document::new(name, content.as_bytes())
    }

    fn docx(body: &str) -> Vec<u8> {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
        );
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    /// One-page PDF showing `text` in Helvetica, with a correct xref table.
    fn pdf(text: &str) -> Vec<u8> {
        let stream = format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET");
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R \
             /Resources << /Font << /F1 5 0 R >> >> >>"
                .to_string(),
            format!("<< /Length {} >>\nstream\n{stream}\nendstream", stream.len()),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>".to_string(),
        ];
        let mut out = String::from("%PDF-1.4\n");
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.push_str(&format!("{} 0 obj\n{body}\nendobj\n", i + 1));
        }
        let xref = out.len();
        out.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1));
        for offset in offsets {
            out.push_str(&format!("{offset:010} 00000 n \n"));
        }
        out.push_str(&format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n",
            objects.len() + 1
        ));
        out.into_bytes()
    }

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported("notes.txt"));
        assert!(is_supported("README.MD"));
        assert!(is_supported("rapport.pdf"));
        assert!(is_supported("Contrat.DOCX"));
        assert!(!is_supported("ancien.doc"));
        assert!(!is_supported("tableur.odt"));
        assert!(!is_supported("no_extension"));
    }

    #[test]
    fn test_document_page() {
        let page = document_page(&doc("veille.md", "# Titre\nContenu")).unwrap();
        assert_eq!(page.link, "#");
        assert_eq!(page.title, "veille.md");
        assert_eq!(page.content, "# Titre\nContenu");

        let err = document_page(&doc("scan.odt", "PK")).unwrap_err();
        assert!(matches!(err, ScrapeError::UnsupportedFileType(ref n) if n == "scan.odt"));

        assert!(matches!(document_page(&doc("vide.txt", "  \n")), Err(ScrapeError::NoContent(_))));
    }

    #[test]
    fn test_docx_paragraphs_and_entities() {
        let body = r#"<w:p><w:r><w:t>Bonjour</w:t></w:r><w:r><w:t xml:space="preserve"> la veille &amp; co</w:t></w:r></w:p><w:p><w:r><w:t>Deuxième</w:t><w:tab/><w:t>ligne</w:t></w:r></w:p>"#;
        let page = document_page(&Document::new("note.docx", docx(body))).unwrap();
        assert_eq!(page.content, "Bonjour la veille & co\nDeuxième\tligne");
    }

    #[test]
    fn test_docx_without_text_or_archive() {
        let empty = Document::new("vide.docx", docx("<w:p/>"));
        assert!(matches!(document_page(&empty), Err(ScrapeError::NoContent(_))));

        let broken = doc("faux.docx", "pas une archive");
        assert!(matches!(document_page(&broken), Err(ScrapeError::Extract { ref name, .. }) if name == "faux.docx"));
    }

    #[tokio::test]
    async fn test_pdf_text() {
        let page = decode(Document::new("rapport.pdf", pdf("Bonjour"))).await.unwrap();
        assert!(page.content.contains("Bonjour"), "got {:?}", page.content);
        assert_eq!(page.title, "rapport.pdf");

        let err = decode(doc("faux.pdf", "pas un pdf")).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Extract { ref name, .. } if name == "faux.pdf"));
    }

    #[tokio::test]
    async fn test_read_document() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notes.txt");
        std::fs::write(&path, "bonjour").unwrap();

        let document = read_document(&path).await.unwrap();
        assert_eq!(document, doc("notes.txt", "bonjour"));

        assert!(matches!(
            read_document(&temp.path().join("missing.txt")).await,
            Err(ScrapeError::Io(_))
        ));
    }
}
