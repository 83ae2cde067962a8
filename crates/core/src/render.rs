//! Export renderers.
//!
//! The engine composes an [`ExportDocument`]; turning it into bytes is the job of an
//! [`ExportRenderer`]. Two renderers ship with the crate: CSV and PDF (via `printpdf`).

use crate::error::RenderError;
use crate::export::{ExportDocument, Section, SectionBody};
use async_trait::async_trait;
use printpdf::{
    BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference,
};
use serde::Deserialize;
use std::io::BufWriter;

#[async_trait]
pub trait ExportRenderer: Send + Sync {
    /// MIME type of the rendered bytes.
    fn content_type(&self) -> &'static str;

    /// File extension without the leading dot.
    fn extension(&self) -> &'static str;

    async fn render(&self, doc: &ExportDocument) -> Result<Vec<u8>, RenderError>;
}

/// Output formats selectable from the CLI and REST surfaces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Pdf,
    Csv,
}

impl ExportFormat {
    pub fn renderer(self) -> Box<dyn ExportRenderer> {
        match self {
            ExportFormat::Pdf => Box::new(PdfRenderer),
            ExportFormat::Csv => Box::new(CsvRenderer),
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(ExportFormat::Pdf),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(RenderError::Rejected(format!("unsupported format: {other}"))),
        }
    }
}

fn ensure_renderable(doc: &ExportDocument) -> Result<(), RenderError> {
    if doc.sections.is_empty() {
        return Err(RenderError::Rejected("document has no sections".into()));
    }
    Ok(())
}

// ============================================================================
// CSV
// ============================================================================

#[derive(Clone, Copy, Debug, Default)]
pub struct CsvRenderer;

#[async_trait]
impl ExportRenderer for CsvRenderer {
    fn content_type(&self) -> &'static str {
        "text/csv"
    }

    fn extension(&self) -> &'static str {
        "csv"
    }

    async fn render(&self, doc: &ExportDocument) -> Result<Vec<u8>, RenderError> {
        ensure_renderable(doc)?;

        let mut out = String::new();
        push_row(&mut out, &[doc.title.as_str()]);
        for field in &doc.header {
            push_row(&mut out, &[field.label.as_str(), field.value.as_str()]);
        }

        for section in &doc.sections {
            out.push('\n');
            push_row(&mut out, &[section.heading.to_uppercase().as_str()]);
            match &section.body {
                SectionBody::Fields(fields) => {
                    for field in fields {
                        push_row(&mut out, &[field.label.as_str(), field.value.as_str()]);
                    }
                }
                SectionBody::NotRecorded => push_row(&mut out, &[crate::constants::NOT_RECORDED]),
                SectionBody::Comparison(rows) => {
                    push_row(
                        &mut out,
                        &["Measure", "Unit", "Baseline", "Follow-up", "Change", "% Change"],
                    );
                    for row in rows {
                        let baseline = row.baseline.to_string();
                        let follow_up = row.follow_up.to_string();
                        let delta = format!("{:.2}", row.delta);
                        let percent = row
                            .percent_change
                            .map(|p| format!("{p:.1}"))
                            .unwrap_or_default();
                        push_row(
                            &mut out,
                            &[row.label, row.unit, &baseline, &follow_up, &delta, &percent],
                        );
                    }
                }
            }
        }

        Ok(out.into_bytes())
    }
}

pub(crate) fn push_row(out: &mut String, cells: &[&str]) {
    let line = cells
        .iter()
        .map(|cell| escape_cell(cell))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&line);
    out.push('\n');
}

fn escape_cell(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

// ============================================================================
// PDF
// ============================================================================

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const TOP: f32 = 280.0;
const BOTTOM: f32 = 20.0;
const LEFT: f32 = 20.0;
const VALUE_COLUMN: f32 = 75.0;
const COMPARISON_COLUMNS: [f32; 5] = [20.0, 70.0, 100.0, 130.0, 160.0];

#[derive(Clone, Copy, Debug, Default)]
pub struct PdfRenderer;

#[async_trait]
impl ExportRenderer for PdfRenderer {
    fn content_type(&self) -> &'static str {
        "application/pdf"
    }

    fn extension(&self) -> &'static str {
        "pdf"
    }

    async fn render(&self, doc: &ExportDocument) -> Result<Vec<u8>, RenderError> {
        ensure_renderable(doc)?;
        render_pdf(doc)
    }
}

/// Tracks the current page and vertical position, breaking pages as needed.
struct PdfCursor<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    y: f32,
    font: IndirectFontRef,
    bold: IndirectFontRef,
}

impl PdfCursor<'_> {
    fn text(&self, text: &str, size: f32, x: f32, bold: bool) {
        let font = if bold { &self.bold } else { &self.font };
        self.layer
            .use_text(pdf_safe(text), size, Mm(x), Mm(self.y), font);
    }

    /// Moves down by `height`, starting a new page when the bottom margin is reached.
    fn advance(&mut self, height: f32) {
        self.y -= height;
        if self.y < BOTTOM {
            let (page, layer) = self
                .doc
                .add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = TOP;
        }
    }

    fn section(&mut self, section: &Section) {
        self.advance(4.0);
        self.text(&section.heading.to_uppercase(), 11.0, LEFT, true);
        self.advance(6.0);

        match &section.body {
            SectionBody::Fields(fields) => {
                for field in fields {
                    self.text(&field.label, 9.0, LEFT, true);
                    let lines = wrap_text(&field.value, 60);
                    let count = lines.len();
                    for (i, line) in lines.iter().enumerate() {
                        self.text(line, 9.0, VALUE_COLUMN, false);
                        if i + 1 < count {
                            self.advance(4.0);
                        }
                    }
                    self.advance(5.0);
                }
            }
            SectionBody::NotRecorded => {
                self.text(crate::constants::NOT_RECORDED, 9.0, LEFT + 5.0, false);
                self.advance(5.0);
            }
            SectionBody::Comparison(rows) => {
                let header = ["Measure", "Baseline", "Follow-up", "Change", "% Change"];
                for (x, title) in COMPARISON_COLUMNS.iter().zip(header) {
                    self.text(title, 9.0, *x, true);
                }
                self.advance(5.0);
                for row in rows {
                    let cells = [
                        format!("{} ({})", row.label, row.unit),
                        row.baseline.to_string(),
                        row.follow_up.to_string(),
                        row.delta_text(),
                        row.percent_text(),
                    ];
                    for (x, cell) in COMPARISON_COLUMNS.iter().zip(cells.iter()) {
                        self.text(cell, 9.0, *x, false);
                    }
                    self.advance(4.5);
                }
            }
        }
    }
}

fn render_pdf(doc: &ExportDocument) -> Result<Vec<u8>, RenderError> {
    let (pdf, page1, layer1) =
        PdfDocument::new(&doc.title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
    let font = pdf
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| RenderError::Backend(format!("PDF font error: {e}")))?;
    let bold = pdf
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| RenderError::Backend(format!("PDF font error: {e}")))?;

    {
        let mut cursor = PdfCursor {
            doc: &pdf,
            layer: pdf.get_page(page1).get_layer(layer1),
            y: TOP,
            font,
            bold,
        };

        cursor.text(&doc.title, 14.0, LEFT, true);
        cursor.advance(7.0);
        for field in &doc.header {
            cursor.text(&format!("{}: {}", field.label, field.value), 9.0, LEFT, false);
            cursor.advance(5.0);
        }
        cursor.advance(1.0);

        for section in &doc.sections {
            cursor.section(section);
        }
    }

    let mut buf = BufWriter::new(Vec::new());
    pdf.save(&mut buf)
        .map_err(|e| RenderError::Backend(format!("PDF save error: {e}")))?;
    buf.into_inner()
        .map_err(|e| RenderError::Backend(format!("PDF buffer error: {e}")))
}

/// Builtin PDF fonts only cover WinAnsi; spell out the symbols used in labels.
fn pdf_safe(text: &str) -> String {
    text.replace('\u{2265}', ">=").replace('\u{2264}', "<=")
}

fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.len() + word.len() + 1 > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{Field, SectionKind};

    fn document() -> ExportDocument {
        ExportDocument {
            title: "Case Record Form".into(),
            patient_code: "PT001".into(),
            header: vec![
                Field {
                    label: "Patient Code".into(),
                    value: "PT001".into(),
                },
                Field {
                    label: "Investigator Name".into(),
                    value: "Rao, A.".into(),
                },
            ],
            file_stem: "CRF_PT001".into(),
            sections: vec![
                Section {
                    kind: SectionKind::Patient,
                    heading: "Patient Information".into(),
                    body: SectionBody::Fields(vec![
                        Field {
                            label: "Patient Code".into(),
                            value: "PT001".into(),
                        },
                        Field {
                            label: "Comorbidities".into(),
                            value: "HTN, Obesity".into(),
                        },
                    ]),
                },
                Section {
                    kind: SectionKind::Baseline,
                    heading: "Baseline Assessment".into(),
                    body: SectionBody::NotRecorded,
                },
            ],
        }
    }

    #[tokio::test]
    async fn csv_quotes_cells_with_commas() {
        let bytes = CsvRenderer.render(&document()).await.expect("csv");
        let csv = String::from_utf8(bytes).expect("utf-8");

        assert!(csv.starts_with(
            "Case Record Form\nPatient Code,PT001\nInvestigator Name,\"Rao, A.\"\n"
        ));
        assert!(csv.contains("PATIENT INFORMATION\n"));
        assert!(csv.contains("Comorbidities,\"HTN, Obesity\"\n"));
        assert!(csv.contains("BASELINE ASSESSMENT\nNot recorded\n"));
    }

    #[tokio::test]
    async fn pdf_output_is_a_pdf() {
        let bytes = PdfRenderer.render(&document()).await.expect("pdf");
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn empty_documents_are_rejected() {
        let mut doc = document();
        doc.sections.clear();

        let err = CsvRenderer.render(&doc).await.expect_err("no sections");
        assert!(matches!(err, RenderError::Rejected(_)));
        let err = PdfRenderer.render(&doc).await.expect_err("no sections");
        assert!(matches!(err, RenderError::Rejected(_)));
    }

    #[test]
    fn parses_formats() {
        assert_eq!("CSV".parse::<ExportFormat>(), Ok(ExportFormat::Csv));
        assert_eq!("pdf".parse::<ExportFormat>(), Ok(ExportFormat::Pdf));
        assert!("xlsx".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn wraps_long_values() {
        let lines = wrap_text("one two three four", 9);
        assert_eq!(lines, vec!["one two", "three", "four"]);
    }
}
