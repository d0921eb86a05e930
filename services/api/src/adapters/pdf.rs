//! services/api/src/adapters/pdf.rs
//!
//! Text-layer extraction for uploaded PDFs.

use bridge_core::ports::{PortError, PortResult, TextExtractor};

/// Reads the embedded text layer with `pdf-extract`. Scanned PDFs without a
/// text layer come back as blank pages.
#[derive(Clone, Copy, Default)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> PortResult<Vec<String>> {
        pdf_extract::extract_text_from_mem_by_pages(pdf_bytes)
            .map_err(|e| PortError::Unexpected(format!("Failed to parse PDF: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_pdf(pages: &[&str]) -> Vec<u8> {
        use lopdf::dictionary;
        use lopdf::{Document, Object, Stream};

        let mut doc = Document::with_version("1.4");
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let pages_id = doc.new_object_id();

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = format!("BT /F1 12 Tf 100 700 Td ({text}) Tj ET");
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => content_id,
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn extracts_one_entry_per_page_in_order() {
        let pdf = make_test_pdf(&["School enrollment notice", "Return the form by Friday"]);
        let pages = PdfTextExtractor.extract_pages(&pdf).unwrap();

        assert_eq!(pages.len(), 2);
        assert!(pages[0].contains("enrollment"));
        assert!(pages[1].contains("Friday"));
    }

    #[test]
    fn garbage_bytes_are_an_error() {
        let err = PdfTextExtractor.extract_pages(b"not a pdf").unwrap_err();
        assert!(matches!(err, PortError::Unexpected(msg) if msg.contains("PDF")));
    }
}
