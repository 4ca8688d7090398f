//! CSV export of flattened invoice fields.
//!
//! Two shapes: `File,Page,Field,Value` rows for a collection of records
//! (one download covering a whole extraction run or approval queue), and
//! `Field,Value` rows for a single record. Values are the flattened strings
//! as-is; the only transformation applied is standard CSV quoting.

use crate::engine::{PageRecord, Stage};
use crate::flatten::FieldMap;
use crate::store::VerifiedInvoice;
use std::borrow::Cow;

const COMBINED_HEADER: &str = "File,Page,Field,Value\n";

/// CSV over every extracted page of a run.
///
/// Records that never produced fields (`Extracting`, `Failed`) are skipped;
/// their status lives next to the page in the run view, not in the export.
pub fn pages_csv<'a>(pages: impl IntoIterator<Item = &'a PageRecord>) -> String {
    let mut out = String::from(COMBINED_HEADER);
    for record in pages {
        if matches!(record.stage(), Stage::Extracting | Stage::Failed) {
            continue;
        }
        push_rows(
            &mut out,
            &record.key().document_id,
            record.key().page_number,
            record.fields(),
        );
    }
    out
}

/// CSV over verified invoices (the approval queue), same column set.
pub fn invoices_csv<'a>(invoices: impl IntoIterator<Item = &'a VerifiedInvoice>) -> String {
    let mut out = String::from(COMBINED_HEADER);
    for invoice in invoices {
        push_rows(&mut out, &invoice.document_id, invoice.page_number, &invoice.fields);
    }
    out
}

/// Two-column CSV of one record's fields.
pub fn fields_csv(fields: &FieldMap) -> String {
    let mut out = String::from("Field,Value\n");
    for (field, value) in fields.iter() {
        out.push_str(&escape(field));
        out.push(',');
        out.push_str(&escape(value));
        out.push('\n');
    }
    out
}

fn push_rows(out: &mut String, document_id: &str, page: u32, fields: &FieldMap) {
    for (field, value) in fields.iter() {
        out.push_str(&escape(document_id));
        out.push(',');
        out.push_str(&page.to_string());
        out.push(',');
        out.push_str(&escape(field));
        out.push(',');
        out.push_str(&escape(value));
        out.push('\n');
    }
}

/// Standard CSV quoting: quote only when the value contains a comma, quote,
/// or line break; embedded quotes are doubled.
fn escape(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(p, v)| (p.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn fields_csv_has_header_and_preserves_order() {
        let csv = fields_csv(&fields(&[
            ("InvoiceDetails > Number", "INV-001"),
            ("Notes", ""),
        ]));
        assert_eq!(
            csv,
            "Field,Value\nInvoiceDetails > Number,INV-001\nNotes,\n"
        );
    }

    #[test]
    fn values_with_commas_and_quotes_are_quoted() {
        let csv = fields_csv(&fields(&[
            ("VendorDetails > Name", "Acme, Inc."),
            ("Notes", "said \"urgent\""),
        ]));
        assert!(csv.contains("\"Acme, Inc.\""));
        assert!(csv.contains("\"said \"\"urgent\"\"\""));
    }

    #[test]
    fn newlines_in_values_are_quoted() {
        let csv = fields_csv(&fields(&[("Notes", "line one\nline two")]));
        assert!(csv.contains("\"line one\nline two\""));
    }

    #[test]
    fn invoices_csv_emits_one_row_per_field() {
        let invoices = vec![
            VerifiedInvoice {
                document_id: "a.pdf".into(),
                page_number: 1,
                fields: fields(&[("F1", "v1"), ("F2", "v2")]),
            },
            VerifiedInvoice {
                document_id: "b.pdf".into(),
                page_number: 2,
                fields: fields(&[("F1", "v3")]),
            },
        ];
        let csv = invoices_csv(&invoices);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "File,Page,Field,Value");
        assert_eq!(lines[1], "a.pdf,1,F1,v1");
        assert_eq!(lines[2], "a.pdf,1,F2,v2");
        assert_eq!(lines[3], "b.pdf,2,F1,v3");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn empty_collection_is_header_only() {
        assert_eq!(invoices_csv(&[]), "File,Page,Field,Value\n");
    }

    #[test]
    fn pages_csv_skips_records_without_fields() {
        use crate::engine::WorkflowEngine;
        use crate::error::ExtractionError;
        use crate::store::JsonStore;
        use crate::value::Value;

        let dir = tempfile::TempDir::new().unwrap();
        let store = JsonStore::open(dir.path().join("store.json")).unwrap();
        let mut engine = WorkflowEngine::new(store);

        let done = engine.begin_extraction("a.pdf", 1, vec![]).unwrap();
        engine
            .complete_extraction(&done, Ok(Value::from(serde_json::json!({"Notes": "net 30"}))))
            .unwrap();
        let failed = engine.begin_extraction("a.pdf", 2, vec![]).unwrap();
        engine
            .complete_extraction(&failed, Err(ExtractionError::Cancelled))
            .unwrap();

        let csv = pages_csv(engine.records());
        assert_eq!(csv, "File,Page,Field,Value\na.pdf,1,Notes,net 30\n");
    }
}
