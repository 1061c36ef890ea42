//! Full-fidelity sample export and re-import.
//!
//! ## Formats
//!
//! - **Tabular**: header `index,x,y,original,target,delta,percentDelta`,
//!   one row per sample
//! - **Text**: `[index] position(x,y) original→target (delta, percent%)` per
//!   sample, followed by a summary block
//!
//! Indices are 1-based in scan order. Samples are written as they arrive,
//! so a full-image export never holds more than one sample in memory.
//!
//! Re-import accepts both formats plus bare `original→target` mapping lines,
//! detected from the first lines of the file.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::sampling::Sample;
use crate::stats::RunningStats;

/// Header line of the tabular format.
pub const TABULAR_HEADER: &str = "index,x,y,original,target,delta,percentDelta";

/// First line of the text summary block.
const SUMMARY_TITLE: &str = "Summary";

/// Lines inspected by [`detect_format`].
const DETECT_LINES: usize = 10;

/// Export file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Tabular,
    Text,
}

/// Streaming writer for samples.
pub struct SampleWriter<W: Write> {
    out: W,
    format: ExportFormat,
    written: u64,
    deltas: RunningStats,
}

impl SampleWriter<BufWriter<File>> {
    /// Create (or truncate) `path` and write the format's preamble.
    pub fn create(path: &Path, format: ExportFormat) -> Result<Self> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        SampleWriter::new(BufWriter::new(file), format).map_err(|e| Error::io(path, e))
    }
}

impl<W: Write> SampleWriter<W> {
    /// Wrap a writer and emit the preamble.
    pub fn new(mut out: W, format: ExportFormat) -> std::io::Result<Self> {
        if format == ExportFormat::Tabular {
            writeln!(out, "{}", TABULAR_HEADER)?;
        }
        Ok(Self {
            out,
            format,
            written: 0,
            deltas: RunningStats::new(),
        })
    }

    /// Append one sample.
    pub fn write(&mut self, sample: &Sample) -> std::io::Result<()> {
        self.written += 1;
        self.deltas.push(sample.delta() as f64);
        let index = self.written;
        match self.format {
            ExportFormat::Tabular => writeln!(
                self.out,
                "{},{},{},{},{},{},{:.2}",
                index,
                sample.x,
                sample.y,
                sample.original,
                sample.target,
                sample.delta(),
                sample.percent_delta()
            ),
            ExportFormat::Text => writeln!(
                self.out,
                "[{}] position({},{}) {}→{} ({}, {:.2}%)",
                index,
                sample.x,
                sample.y,
                sample.original,
                sample.target,
                sample.delta(),
                sample.percent_delta()
            ),
        }
    }

    /// Samples written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Write the trailing summary (text format only), flush and return the writer.
    pub fn finish(mut self) -> std::io::Result<W> {
        if self.format == ExportFormat::Text {
            writeln!(self.out)?;
            writeln!(self.out, "{}", SUMMARY_TITLE)?;
            writeln!(self.out, "total samples: {}", self.written)?;
            writeln!(self.out, "mean delta: {:.2}", self.deltas.mean())?;
            writeln!(self.out, "min delta: {}", self.deltas.min())?;
            writeln!(self.out, "max delta: {}", self.deltas.max())?;
            writeln!(self.out, "delta std dev: {:.2}", self.deltas.std_dev().value)?;
        }
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Write every sample to `path`.
///
/// # Returns
/// Number of samples written.
pub fn export_full_sample_data(samples: &[Sample], format: ExportFormat, path: &Path) -> Result<u64> {
    let mut writer = SampleWriter::create(path, format)?;
    for s in samples {
        writer.write(s).map_err(|e| Error::io(path, e))?;
    }
    let written = writer.written();
    writer.finish().map_err(|e| Error::io(path, e))?;
    info!(path = %path.display(), written, ?format, "samples exported");
    Ok(written)
}

/// Write a report, logging instead of failing on IO errors.
///
/// # Returns
/// Whether the file was written.
pub fn write_report_best_effort(path: &Path, report: &str) -> bool {
    match fs::write(path, report) {
        Ok(()) => {
            info!(path = %path.display(), "report written");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not write report");
            false
        }
    }
}

// ============================================================================
// Re-import
// ============================================================================

/// Parse a text export back into samples. The summary block is ignored.
pub fn parse_text_export(contents: &str) -> Result<Vec<Sample>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| line.starts_with('['))
        .map(|(i, line)| {
            parse_text_line(line).ok_or_else(|| {
                Error::InvalidInput(format!("malformed sample on line {}: {}", i + 1, line))
            })
        })
        .collect()
}

/// Read and parse a text export file.
pub fn read_text_export(path: &Path) -> Result<Vec<Sample>> {
    let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_text_export(&contents)
}

/// Formats accepted on re-import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportFormat {
    Tabular,
    Text,
    /// One `original→target` pair per line, no positions.
    Simple,
}

impl From<ExportFormat> for ImportFormat {
    fn from(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Tabular => ImportFormat::Tabular,
            ExportFormat::Text => ImportFormat::Text,
        }
    }
}

/// Guess the format from the first non-empty lines.
pub fn detect_format(contents: &str) -> Option<ImportFormat> {
    let head: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(DETECT_LINES)
        .collect();

    if head.first() == Some(&TABULAR_HEADER) {
        return Some(ImportFormat::Tabular);
    }
    if head.iter().any(|l| l.starts_with('[') && l.contains("position(") && l.contains('→')) {
        return Some(ImportFormat::Text);
    }
    if head.iter().any(|l| split_arrow(l).is_some()) {
        return Some(ImportFormat::Simple);
    }
    None
}

/// Parse a tabular export. The header must be the first non-empty line.
pub fn parse_tabular_export(contents: &str) -> Result<Vec<Sample>> {
    let mut lines = contents
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty());
    match lines.next() {
        Some((_, header)) if header.trim() == TABULAR_HEADER => {}
        _ => return Err(Error::InvalidInput("missing tabular header".to_string())),
    }
    lines
        .map(|(i, line)| {
            parse_tabular_row(line.trim()).ok_or_else(|| {
                Error::InvalidInput(format!("malformed row on line {}: {}", i + 1, line))
            })
        })
        .collect()
}

/// Parse bare `original→target` lines (`->` is accepted too).
///
/// Lines without an arrow are skipped. The pairs carry no position, so each
/// sample gets its ordinal as `x` and `y = 0`.
pub fn parse_simple_mapping(contents: &str) -> Result<Vec<Sample>> {
    let mut samples = Vec::new();
    for (i, line) in contents.lines().enumerate() {
        let Some((original, target)) = split_arrow(line.trim()) else {
            continue;
        };
        let pair = original
            .trim()
            .parse::<u16>()
            .ok()
            .zip(target.trim().parse::<u16>().ok());
        let (original, target) = pair.ok_or_else(|| {
            Error::InvalidInput(format!("malformed mapping on line {}: {}", i + 1, line))
        })?;
        samples.push(Sample::new(samples.len() as u32, 0, original, target));
    }
    Ok(samples)
}

/// Detect the format and parse accordingly.
///
/// # Returns
/// The detected format and its samples, or `InvalidInput` when no format
/// matches or a data line is malformed.
pub fn parse_export(contents: &str) -> Result<(ImportFormat, Vec<Sample>)> {
    let format = detect_format(contents)
        .ok_or_else(|| Error::InvalidInput("unrecognized sample file format".to_string()))?;
    let samples = match format {
        ImportFormat::Tabular => parse_tabular_export(contents)?,
        ImportFormat::Text => parse_text_export(contents)?,
        ImportFormat::Simple => parse_simple_mapping(contents)?,
    };
    Ok((format, samples))
}

/// Read a sample file of any supported format.
pub fn read_export(path: &Path) -> Result<(ImportFormat, Vec<Sample>)> {
    let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let (format, samples) = parse_export(&contents)?;
    info!(path = %path.display(), ?format, samples = samples.len(), "samples imported");
    Ok((format, samples))
}

/// `index,x,y,original,target,delta,percentDelta`
fn parse_tabular_row(line: &str) -> Option<Sample> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [_index, x, y, original, target, delta, _percent] = fields.as_slice() else {
        return None;
    };
    let sample = Sample::new(
        x.parse().ok()?,
        y.parse().ok()?,
        original.parse().ok()?,
        target.parse().ok()?,
    );
    (delta.parse::<i32>().ok()? == sample.delta()).then_some(sample)
}

/// Split `a→b` or `a->b` into its two sides; both must start with a digit.
fn split_arrow(line: &str) -> Option<(&str, &str)> {
    let (a, b) = line.split_once('→').or_else(|| line.split_once("->"))?;
    let digits = |s: &str| s.trim().starts_with(|c: char| c.is_ascii_digit());
    (digits(a) && digits(b)).then_some((a, b))
}

/// `[index] position(x,y) original→target (delta, percent%)`
fn parse_text_line(line: &str) -> Option<Sample> {
    let rest = line.strip_prefix('[')?;
    let (_index, rest) = rest.split_once("] position(")?;
    let (x, rest) = rest.split_once(',')?;
    let (y, rest) = rest.split_once(") ")?;
    let (original, rest) = rest.split_once('→')?;
    let (target, rest) = rest.split_once(" (")?;
    let (delta, _) = rest.split_once(", ")?;

    let sample = Sample::new(
        x.trim().parse().ok()?,
        y.trim().parse().ok()?,
        original.trim().parse().ok()?,
        target.trim().parse().ok()?,
    );
    // The recorded delta must agree with the values
    (delta.trim().parse::<i32>().ok()? == sample.delta()).then_some(sample)
}
