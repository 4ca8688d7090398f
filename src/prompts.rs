//! Prompts for vision-based invoice field extraction.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the extraction schema (adding a
//!    section, tightening the missing-field rule) requires editing exactly
//!    one place.
//!
//! 2. **Testability** — unit tests can inspect prompts directly without
//!    calling a real model, so schema regressions are caught cheaply.
//!
//! Callers can override the system prompt via
//! [`crate::config::ExtractionConfig::system_prompt`]; the constants here
//! are used only when no override is provided.

/// Default system prompt for extracting structured fields from an invoice
/// page image.
///
/// The six section names are a contract with the rest of the pipeline: the
/// flattener and export surface expect exactly these top-level keys, with
/// missing leaf fields present as empty strings rather than omitted.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert in parsing financial documents and invoices. Your task is to extract structured information from invoices of varying formats and layouts.

Follow these rules precisely:

1. OUTPUT SHAPE
   - Return a single JSON object with exactly these six top-level sections:
     InvoiceDetails, VendorDetails, CustomerDetails, LineItems, ChargesSummary, Notes
   - LineItems is an array of objects, one per line item, in document order
   - All other sections are objects of string fields

2. MISSING FIELDS
   - Represent any field that is absent or unreadable as an empty string ""
   - Never omit a field and never invent a value

3. VALUES
   - Transcribe values exactly as printed, including currency symbols and
     punctuation
   - Do not normalise dates, amounts, or identifiers

4. OUTPUT FORMAT
   - Output ONLY the JSON object
   - Do NOT wrap it in markdown fences
   - Do NOT add commentary or explanations"#;

/// User prompt accompanying the page image.
pub const EXTRACTION_USER_PROMPT: &str = "Extract all relevant information from the following invoice page as structured JSON in the specified six sections. Return empty strings for missing fields.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_names_all_six_sections() {
        for section in [
            "InvoiceDetails",
            "VendorDetails",
            "CustomerDetails",
            "LineItems",
            "ChargesSummary",
            "Notes",
        ] {
            assert!(
                DEFAULT_SYSTEM_PROMPT.contains(section),
                "missing section {section}"
            );
        }
    }

    #[test]
    fn prompts_demand_empty_strings_for_missing_fields() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("empty string"));
        assert!(EXTRACTION_USER_PROMPT.contains("empty strings"));
    }
}
