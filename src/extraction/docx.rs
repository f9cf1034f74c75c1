//! Plain text out of Word (`.docx`) documents.
//!
//! Only the main body part, `word/document.xml`, is read. Paragraphs end with a newline so
//! the splitter sees the same paragraph boundaries a plain-text export would have.

use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::{Cursor, Read};
use thiserror::Error;

const BODY_PART: &str = "word/document.xml";

#[derive(Debug, Error)]
pub(crate) enum DocxError {
    #[error("not a readable docx archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("word/document.xml could not be read: {0}")]
    Io(#[from] std::io::Error),
    #[error("word/document.xml is not well-formed XML: {0}")]
    Xml(String),
}

/// True when `bytes` start like a zip archive, which is how every docx begins.
pub(crate) fn is_docx(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04")
}

pub(crate) fn docx_text(bytes: &[u8]) -> Result<String, DocxError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut xml = String::new();
    archive.by_name(BODY_PART)?.read_to_string(&mut xml)?;
    body_text(&xml)
}

fn body_text(xml: &str) -> Result<String, DocxError> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_run_text = false;

    loop {
        match reader
            .read_event()
            .map_err(|error| DocxError::Xml(error.to_string()))?
        {
            Event::Start(element) => {
                in_run_text = element.local_name().as_ref() == b"t";
            }
            Event::Empty(element) => match element.local_name().as_ref() {
                b"tab" => text.push('\t'),
                b"br" | b"cr" => text.push('\n'),
                _ => {}
            },
            Event::Text(content) if in_run_text => {
                let unescaped = content
                    .unescape()
                    .map_err(|error| DocxError::Xml(error.to_string()))?;
                text.push_str(&unescaped);
            }
            Event::End(element) => match element.local_name().as_ref() {
                b"t" => in_run_text = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(text)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Zip `document_xml` as the body of a minimal docx.
    pub(crate) fn docx(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("[Content_Types].xml", zip::write::FileOptions::default())
            .expect("start content types");
        writer
            .write_all(br#"<?xml version="1.0"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#)
            .expect("write content types");
        writer
            .start_file(BODY_PART, zip::write::FileOptions::default())
            .expect("start body");
        writer.write_all(document_xml.as_bytes()).expect("write body");
        writer.finish().expect("finish zip").into_inner()
    }

    pub(crate) fn body(paragraphs: &[&str]) -> String {
        let paragraphs: String = paragraphs
            .iter()
            .map(|paragraph| format!("<w:p><w:r><w:t xml:space=\"preserve\">{paragraph}</w:t></w:r></w:p>"))
            .collect();
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
             <w:body>{paragraphs}<w:sectPr/></w:body></w:document>"
        )
    }

    #[test]
    fn paragraphs_runs_and_breaks_become_plain_text() {
        let xml = "<w:document xmlns:w=\"w\"><w:body>\
            <w:p><w:r><w:t>Revenue </w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t>grew</w:t></w:r></w:p>\
            <w:p><w:r><w:t>Q3</w:t><w:tab/><w:t>$4.2M &amp; rising</w:t><w:br/><w:t>Next line</w:t></w:r></w:p>\
            <w:p><w:pPr><w:pStyle w:val=\"Heading1\"/></w:pPr></w:p>\
            </w:body></w:document>";
        let text = docx_text(&docx(xml)).expect("docx text");
        assert_eq!(text, "Revenue grew\nQ3\t$4.2M & rising\nNext line\n\n");
    }

    #[test]
    fn archive_without_body_or_garbage_is_an_error() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/styles.xml", zip::write::FileOptions::default())
            .expect("start file");
        writer.write_all(b"<w:styles/>").expect("write");
        let archive = writer.finish().expect("finish").into_inner();
        assert!(matches!(docx_text(&archive), Err(DocxError::Archive(_))));
        assert!(matches!(docx_text(b"PK\x03\x04 truncated"), Err(DocxError::Archive(_))));
        assert!(matches!(
            docx_text(&docx("<w:document><w:p></w:document>")),
            Err(DocxError::Xml(_))
        ));
    }

    #[test]
    fn zip_magic_identifies_docx() {
        assert!(is_docx(&docx(&body(&["Hello"]))));
        assert!(!is_docx(b"Plain notes"));
    }
}
