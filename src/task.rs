//! Background analysis runs.
//!
//! [`spawn_analysis`] moves owned rasters onto a worker thread and runs the
//! whole pipeline there:
//!
//! 1. **scan** - aggregate samples, optionally streaming them to an export file;
//!    an enhanced image gets its own **scan enhanced** pass
//! 2. **densify** - gap-fill the sparse mapping into a 65536-entry LUT
//! 3. **classify** - infer the transfer function
//! 4. **apply** - record the LUT as a rule and apply it to the original
//! 5. **report** - render the text report
//!
//! The caller receives [`TaskEvent`]s over a bounded channel: progress
//! snapshots, then exactly one terminal event. The channel bound caps how far
//! the worker can run ahead of the caller, so a cancel issued after reading an
//! event stops the scan within [`EVENT_BACKLOG`] progress intervals.
//!
//! [`run_analysis`] is the same pipeline on the calling thread.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ndarray::{Array2, ArrayView2};
use tracing::{info, warn};

use crate::classify::{
    classify, compare_mappings, Classification, PositionProfile, RegionStats, RunComparator,
    RunComparison,
};
use crate::config::AnalysisConfig;
use crate::error::{Error, Result};
use crate::mapping::{build_mapping_from_images, densify, Mapping, MappingAccumulator};
use crate::progress::{CancelToken, ProgressState, RunControl, StopReason};
use crate::report::{generate_report, SampleWriter};
use crate::rules::{apply_rule, LutTransform, ProcessingRule, Transform};
use crate::sampling::{scan_samples, scan_samples_as, ImageSet, Sample, SampleLog, SCAN_STAGE};

/// Progress events the worker may queue before it blocks on the caller.
pub const EVENT_BACKLOG: usize = 64;

/// Progress status of the original/enhanced comparison pass.
pub const ENHANCED_STAGE: &str = "scan enhanced";

/// X-axis bands of the position profile.
const POSITION_BANDS: usize = 8;

/// Message from the worker.
#[derive(Debug)]
pub enum TaskEvent {
    Progress(ProgressState),
    Completed(Box<AnalysisOutcome>),
    Failed(Error),
    Cancelled,
}

impl TaskEvent {
    /// Completed, failed or cancelled.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskEvent::Progress(_))
    }
}

/// Everything one analysis run produces.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// Sparse mapping and its dense LUT.
    pub transform: Arc<LutTransform>,
    pub classification: Classification,
    /// The LUT as an applied rule, with statistics.
    pub rule: ProcessingRule,
    /// Original raster passed through the LUT.
    pub output: Array2<u16>,
    pub report: String,
    /// First/last samples of a sequential scan; `None` for parallel scans.
    pub samples: Option<SampleLog>,
    /// Per-band delta statistics; empty for parallel scans.
    pub regions: Vec<RegionStats>,
    /// Samples written to the configured export file.
    pub exported: Option<u64>,
    /// Fit similarity of original→target vs original→enhanced.
    pub enhanced_comparison: Option<RunComparison>,
}

impl AnalysisOutcome {
    pub fn mapping(&self) -> &Mapping {
        &self.transform.mapping
    }
}

/// Owned inputs of a background run.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub original: Array2<u16>,
    pub target: Array2<u16>,
    pub enhanced: Option<Array2<u16>>,
    pub config: AnalysisConfig,
}

impl AnalysisRequest {
    pub fn new(original: Array2<u16>, target: Array2<u16>) -> Self {
        Self {
            original,
            target,
            enhanced: None,
            config: AnalysisConfig::default(),
        }
    }

    pub fn with_enhanced(mut self, enhanced: Array2<u16>) -> Self {
        self.enhanced = Some(enhanced);
        self
    }

    pub fn with_config(mut self, config: AnalysisConfig) -> Self {
        self.config = config;
        self
    }

    fn images(&self) -> Result<ImageSet<'_>> {
        let images = ImageSet::new(self.original.view(), self.target.view())?;
        match &self.enhanced {
            Some(e) => images.with_enhanced(e.view()),
            None => Ok(images),
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Caller side of a running analysis.
///
/// Dropping the handle cancels the run.
#[derive(Debug)]
pub struct AnalysisHandle {
    events: Receiver<TaskEvent>,
    token: CancelToken,
    worker: Option<JoinHandle<()>>,
}

impl AnalysisHandle {
    /// Ask the worker to stop at its next row.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Clone of the run's cancellation token.
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Block for the next event; `None` once the worker is gone.
    pub fn recv(&self) -> Option<TaskEvent> {
        self.events.recv().ok()
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<TaskEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Drain events until the run ends and return its result.
    ///
    /// # Returns
    /// The outcome, the run's error, `Cancelled`, or `Worker` if the thread
    /// exited without a terminal event.
    pub fn wait(mut self) -> Result<AnalysisOutcome> {
        let result = loop {
            match self.events.recv() {
                Ok(TaskEvent::Progress(_)) => continue,
                Ok(TaskEvent::Completed(outcome)) => break Ok(*outcome),
                Ok(TaskEvent::Failed(e)) => break Err(e),
                Ok(TaskEvent::Cancelled) => break Err(Error::Cancelled(StopReason::Cancelled)),
                Err(_) => break Err(Error::Worker("exited without a result".to_string())),
            }
        };
        self.join()?;
        result
    }

    fn join(&mut self) -> Result<()> {
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| Error::Worker("analysis thread panicked".to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for AnalysisHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.token.cancel();
        }
    }
}

/// Start an analysis on a new thread.
///
/// Raster dimensions are validated before the thread starts.
///
/// # Returns
/// A handle for events and cancellation, `InvalidInput` for mismatched
/// rasters, or `Worker` if the thread could not be spawned.
pub fn spawn_analysis(request: AnalysisRequest) -> Result<AnalysisHandle> {
    request.images()?;

    let (tx, rx) = sync_channel(EVENT_BACKLOG);
    let token = CancelToken::new();
    let worker_token = token.clone();

    let worker = thread::Builder::new()
        .name("lutscope-analysis".to_string())
        .spawn(move || run_worker(request, worker_token, tx))
        .map_err(|e| Error::Worker(e.to_string()))?;

    Ok(AnalysisHandle {
        events: rx,
        token,
        worker: Some(worker),
    })
}

fn run_worker(request: AnalysisRequest, token: CancelToken, tx: SyncSender<TaskEvent>) {
    let progress_tx = tx.clone();
    let sink = move |state: &ProgressState| {
        // A dropped handle means nobody is listening; the cancel flag ends the run
        let _ = progress_tx.send(TaskEvent::Progress(state.clone()));
    };
    let control =
        RunControl::new(&token, &sink).with_interval(request.config.progress_interval_permille);

    let event = match request
        .images()
        .and_then(|images| run_analysis(&images, &request.config, &control))
    {
        Ok(outcome) => TaskEvent::Completed(Box::new(outcome)),
        Err(e) if e.is_cancelled() => {
            info!("analysis cancelled");
            TaskEvent::Cancelled
        }
        Err(e) => {
            warn!(error = %e, "analysis failed");
            TaskEvent::Failed(e)
        }
    };
    let _ = tx.send(event);
}

// ============================================================================
// Pipeline
// ============================================================================

/// Run the full pipeline on the calling thread.
///
/// # Arguments
/// * `images` - Original/target (and optional enhanced) rasters
/// * `config` - Aggregation, sampling, export and report settings
/// * `control` - Stop flag and progress sink
///
/// # Returns
/// The outcome, `EmptyMapping` for an empty scan, `Io` if the export fails,
/// or `Cancelled`.
pub fn run_analysis(
    images: &ImageSet<'_>,
    config: &AnalysisConfig,
    control: &RunControl<'_>,
) -> Result<AnalysisOutcome> {
    info!(
        width = images.width(),
        height = images.height(),
        aggregate = ?config.aggregate,
        sampling = ?config.sampling,
        "analysis started"
    );

    let scan = scan_stage(images, config, control)?;
    info!(keys = scan.mapping.len(), samples = scan.mapping.sample_count(), "scan finished");

    let enhanced_comparison = match images.enhanced() {
        Some(_) => Some(compare_enhanced(images, &scan.mapping, config, control)?),
        None => None,
    };

    control.stop.check()?;
    let lut = densify(&scan.mapping)?;
    info!(min = lut.min(), max = lut.max(), "lut densified");

    let classification = classify(&scan.mapping, &lut, &config.thresholds)?;
    info!(
        class = classification.class.label(),
        confidence = classification.confidence,
        "mapping classified"
    );

    let transform = Arc::new(LutTransform {
        mapping: scan.mapping,
        lut,
    });
    let mut rule = ProcessingRule::new("observed mapping", Transform::Lut(Arc::clone(&transform)))
        .with_details(config.report.detail_lines);
    rule.id = 1;
    let output = apply_rule(images.original(), &mut rule, control)?;
    info!("rule applied");

    let report = generate_report(std::slice::from_ref(&rule), config);
    info!(bytes = report.len(), "report generated");

    Ok(AnalysisOutcome {
        transform,
        classification,
        rule,
        output,
        report,
        samples: scan.samples,
        regions: scan.regions,
        exported: scan.exported,
        enhanced_comparison,
    })
}

/// Second pass over original/enhanced: the enhanced mapping plus paired
/// target and enhanced samples for the distribution and delta measures.
fn compare_enhanced(
    images: &ImageSet<'_>,
    mapping: &Mapping,
    config: &AnalysisConfig,
    control: &RunControl<'_>,
) -> Result<RunComparison> {
    let mut acc = MappingAccumulator::new(config.aggregate);
    let mut comparator = RunComparator::new();

    scan_samples_as(images, config.sampling, control, ENHANCED_STAGE, |s| {
        if let Some(e) = s.enhanced {
            let enhanced = Sample::new(s.x, s.y, s.original, e);
            acc.observe_sample(&enhanced);
            comparator.observe_pair(s, &enhanced);
        }
        Ok(())
    })?;

    let comparison = comparator.finish(compare_mappings(mapping, &acc.finish()));
    info!(
        overall = comparison.fit.overall,
        target_ks = comparison.target_distribution.statistic,
        delta_correlation = ?comparison.delta_correlation,
        "enhanced run compared"
    );
    Ok(comparison)
}

struct ScanSummary {
    mapping: Mapping,
    samples: Option<SampleLog>,
    regions: Vec<RegionStats>,
    exported: Option<u64>,
}

fn scan_stage(
    images: &ImageSet<'_>,
    config: &AnalysisConfig,
    control: &RunControl<'_>,
) -> Result<ScanSummary> {
    // Export needs scan order, so it always takes the sequential path
    if config.parallel && config.export.is_none() {
        let mapping = build_mapping_from_images(
            images,
            config.sampling,
            config.aggregate,
            control,
            true,
            SCAN_STAGE,
        )?;
        return Ok(ScanSummary {
            mapping,
            samples: None,
            regions: Vec::new(),
            exported: None,
        });
    }

    let mut acc = MappingAccumulator::new(config.aggregate);
    let mut log = SampleLog::new(config.detail_cap);
    let mut profile = PositionProfile::new(images.width() as u32, POSITION_BANDS);
    let mut writer = match &config.export {
        Some(target) => Some((SampleWriter::create(&target.path, target.format)?, target)),
        None => None,
    };

    scan_samples(images, config.sampling, control, |s| {
        acc.observe_sample(s);
        log.push(s);
        profile.observe(s);
        if let Some((w, target)) = writer.as_mut() {
            w.write(s).map_err(|e| Error::io(&target.path, e))?;
        }
        Ok(())
    })?;

    let exported = match writer {
        Some((w, target)) => {
            let written = w.written();
            w.finish().map_err(|e| Error::io(&target.path, e))?;
            info!(path = %target.path.display(), written, "samples exported");
            Some(written)
        }
        None => None,
    };

    Ok(ScanSummary {
        mapping: acc.finish(),
        samples: Some(log),
        regions: profile.regions(),
        exported,
    })
}

/// Convenience wrapper: analyze borrowed rasters on the calling thread
/// without progress or cancellation.
pub fn analyze<'a>(
    original: ArrayView2<'a, u16>,
    target: ArrayView2<'a, u16>,
    config: &AnalysisConfig,
) -> Result<AnalysisOutcome> {
    let images = ImageSet::new(original, target)?;
    run_analysis(&images, config, &RunControl::unattended())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::TransferClass;
    use crate::config::ExportTarget;
    use crate::report::{read_text_export, ExportFormat};
    use tempfile::tempdir;

    fn gradient(width: usize, height: usize) -> Array2<u16> {
        Array2::from_shape_fn((height, width), |(y, x)| ((y * width + x) * 7 % 65536) as u16)
    }

    #[test]
    fn test_analyze_halved_image() {
        let original = gradient(64, 64);
        let target = original.mapv(|v| v / 2);

        let outcome = analyze(original.view(), target.view(), &AnalysisConfig::default()).unwrap();

        assert_eq!(outcome.classification.class, TransferClass::LinearAttenuation);
        assert_eq!(outcome.rule.statistics.as_ref().unwrap().processed_count, 64 * 64);
        assert_eq!(outcome.samples.as_ref().unwrap().total(), 64 * 64);
        assert_eq!(outcome.regions.len(), POSITION_BANDS);
        assert!(outcome.report.contains("linear attenuation"));
        for (o, t) in outcome.output.iter().zip(target.iter()) {
            assert!((*o as i32 - *t as i32).abs() <= 1);
        }
    }

    #[test]
    fn test_spawned_run_completes_with_monotonic_progress() {
        let original = gradient(100, 50);
        let target = original.mapv(|v| v.saturating_add(10));
        let handle = spawn_analysis(AnalysisRequest::new(original, target)).unwrap();

        let mut last: Option<(String, u64)> = None;
        let outcome = loop {
            match handle.recv().unwrap() {
                TaskEvent::Progress(p) => {
                    if let Some((status, processed)) = &last {
                        if *status == p.status {
                            assert!(p.processed >= *processed);
                        }
                    }
                    last = Some((p.status.clone(), p.processed));
                }
                TaskEvent::Completed(outcome) => break outcome,
                other => panic!("unexpected event {:?}", other),
            }
        };
        assert_eq!(last.map(|(s, _)| s), Some("apply".to_string()));
        assert_eq!(outcome.mapping().sample_count(), 5000);
        assert!(handle.recv_timeout(Duration::from_secs(5)).is_none());
    }

    #[test]
    fn test_cancel_before_draining() {
        let original = gradient(512, 512);
        let target = original.clone();
        let handle = spawn_analysis(AnalysisRequest::new(original, target)).unwrap();
        handle.cancel();

        let err = handle.wait().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_dimension_mismatch_fails_before_spawn() {
        let request = AnalysisRequest::new(Array2::zeros((4, 4)), Array2::zeros((4, 5)));
        let err = spawn_analysis(request).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_empty_image_fails() {
        let request = AnalysisRequest::new(Array2::zeros((0, 0)), Array2::zeros((0, 0)));
        let err = spawn_analysis(request).unwrap().wait().unwrap_err();
        assert!(matches!(err, Error::EmptyMapping(_)));
    }

    #[test]
    fn test_streaming_export() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("samples.txt");
        let mut config = AnalysisConfig::default();
        config.export = Some(ExportTarget {
            path: path.clone(),
            format: ExportFormat::Text,
        });
        config.parallel = true;

        let original = gradient(16, 8);
        let target = original.mapv(|v| v / 4);
        let outcome = analyze(original.view(), target.view(), &config).unwrap();

        assert_eq!(outcome.exported, Some(128));
        let samples = read_text_export(&path).unwrap();
        assert_eq!(samples.len(), 128);
        assert_eq!((samples[17].x, samples[17].y), (1, 1));
    }

    #[test]
    fn test_parallel_scan_matches_sequential() {
        let original = gradient(40, 30);
        let target = original.mapv(|v| (v as f64).sqrt() as u16);
        let mut config = AnalysisConfig::default();

        let sequential = analyze(original.view(), target.view(), &config).unwrap();
        config.parallel = true;
        let parallel = analyze(original.view(), target.view(), &config).unwrap();

        assert_eq!(sequential.mapping(), parallel.mapping());
        assert!(parallel.samples.is_none());
    }

    #[test]
    fn test_enhanced_comparison() {
        let original = gradient(32, 32);
        let target = original.mapv(|v| v / 2);
        let enhanced = original.mapv(|v| v / 2 + 1);
        let images = ImageSet::new(original.view(), target.view())
            .unwrap()
            .with_enhanced(enhanced.view())
            .unwrap();

        let outcome =
            run_analysis(&images, &AnalysisConfig::default(), &RunControl::unattended()).unwrap();
        let comparison = outcome.enhanced_comparison.unwrap();
        assert!(comparison.is_similar());
        assert_eq!(comparison.original_distribution.statistic, 0.0);
        assert!(comparison.target_distribution.statistic < 0.01);
        assert!(comparison.is_consistent());
    }

    #[test]
    fn test_enhanced_pass_reports_own_stage() {
        let original = gradient(48, 40);
        let target = original.mapv(|v| v / 2);
        let enhanced = original.mapv(|v| v / 3);
        let images = ImageSet::new(original.view(), target.view())
            .unwrap()
            .with_enhanced(enhanced.view())
            .unwrap();
        let seen = std::sync::Mutex::new(Vec::new());
        let sink = |p: &ProgressState| seen.lock().unwrap().push(p.clone());
        let token = CancelToken::new();
        let control = RunControl::new(&token, &sink).with_interval(50);

        run_analysis(&images, &AnalysisConfig::default(), &control).unwrap();

        let seen = seen.into_inner().unwrap();
        let stages: Vec<&str> = seen.iter().map(|p| p.status.as_str()).collect();
        assert!(stages.contains(&SCAN_STAGE));
        assert!(stages.contains(&ENHANCED_STAGE));
        for stage in [SCAN_STAGE, ENHANCED_STAGE, "apply"] {
            let counts: Vec<u64> =
                seen.iter().filter(|p| p.status == stage).map(|p| p.processed).collect();
            assert!(counts.windows(2).all(|w| w[0] <= w[1]), "{} regressed: {:?}", stage, counts);
            assert_eq!(counts.last(), Some(&(48 * 40)));
        }
        // Stages run in order and never interleave
        let first_enhanced = stages.iter().position(|s| *s == ENHANCED_STAGE).unwrap();
        assert!(stages[first_enhanced..].iter().all(|s| *s != SCAN_STAGE));
    }
}
