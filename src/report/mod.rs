//! Reports and sample export.
//!
//! - **text**: Markdown-style report with steps, mapping samples, inference
//! - **export**: streaming tabular/text export of every sample, and re-import
//!   with format detection

pub mod export;
pub mod text;

pub use export::{
    detect_format, export_full_sample_data, parse_export, parse_simple_mapping,
    parse_tabular_export, parse_text_export, read_export, read_text_export,
    write_report_best_effort, ExportFormat, ImportFormat, SampleWriter, TABULAR_HEADER,
};
pub use text::{generate_report, suggestion, ConfidenceTier};
