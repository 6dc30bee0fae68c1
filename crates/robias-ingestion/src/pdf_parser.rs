//! lopdf-based PDF text extraction.
//! Used when PDFs are assessed from disk instead of the provider file store,
//! e.g. with a self-hosted backend that cannot read stored files.

use std::path::Path;

use lopdf::Document as PdfDoc;
use tracing::debug;

use crate::error::IngestionError;

/// Parsed PDF document.
#[derive(Debug, Clone)]
pub struct ParsedPdf {
    pub title: Option<String>,
    pub full_text: String,
    pub page_count: usize,
}

/// Parse a PDF file and extract its text, page by page.
/// Pages whose content cannot be decoded are skipped.
pub fn parse_pdf_text(pdf_path: &Path) -> Result<ParsedPdf, IngestionError> {
    let pdf = PdfDoc::load(pdf_path).map_err(|source| IngestionError::Pdf {
        path: pdf_path.to_path_buf(),
        source,
    })?;

    let pages = pdf.get_pages();
    let mut full_text = String::new();

    for page_num in pages.keys() {
        match pdf.extract_text(&[*page_num]) {
            Ok(text) => {
                full_text.push_str(&normalise_whitespace(&text));
                full_text.push('\n');
            }
            Err(e) => {
                debug!(path = %pdf_path.display(), page = page_num, error = %e, "Skipping undecodable page");
            }
        }
    }

    if full_text.trim().is_empty() {
        return Err(IngestionError::EmptyPdf(pdf_path.to_path_buf()));
    }

    Ok(ParsedPdf {
        title: extract_title(&full_text),
        full_text,
        page_count: pages.len(),
    })
}

/// Collapse runs of spaces and drop blank-line runs left by text extraction.
fn normalise_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn extract_title(text: &str) -> Option<String> {
    // First non-empty line is usually title
    text.lines()
        .find(|l| l.trim().len() > 10)
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};

    fn write_pdf(path: &Path, line: &str) {
        let mut doc = PdfDoc::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(line)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[test]
    fn test_extracts_text_from_generated_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trial.pdf");
        write_pdf(&path, "Randomised controlled trial of aspirin");

        let parsed = parse_pdf_text(&path).unwrap();
        assert_eq!(parsed.page_count, 1);
        assert!(parsed.full_text.contains("Randomised controlled trial"));
        assert_eq!(parsed.title.as_deref(), Some("Randomised controlled trial of aspirin"));
    }

    #[test]
    fn test_garbage_bytes_are_a_pdf_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"this is not a pdf").unwrap();
        assert!(matches!(parse_pdf_text(&path), Err(IngestionError::Pdf { .. })));
    }

    #[test]
    fn test_normalise_whitespace() {
        let text = "Title   of  paper\n\n\n\nBody    text\n";
        assert_eq!(normalise_whitespace(text), "Title of paper\n\nBody text\n");
    }

    #[test]
    fn test_title_skips_short_lines() {
        assert_eq!(
            extract_title("p. 1\nEffect of exercise on blood pressure\n"),
            Some("Effect of exercise on blood pressure".to_string())
        );
    }
}
