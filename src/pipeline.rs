//! Drives a stream of parser events through an [`Aggregator`]
//!
//! Input is newline-delimited JSON, one [`IngestEvent`] per line. Units
//! already covered by a file's stored watermark are skipped so that a
//! re-run over the same input resumes instead of duplicating requests.

use std::collections::BTreeMap;
use std::io::BufRead;
use crate::aggregator::{Aggregator, Summary};
use crate::request::{IngestEvent, ParsedUnit, Watermark};
use crate::Result;

pub const DEFAULT_FLUSH_EVERY: usize = 1000;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Flush file progress after this many committed units (0 = only at the end)
    pub flush_every: usize,
    /// Skip units at or below the stored watermark of their file
    pub resume: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            flush_every: DEFAULT_FLUSH_EVERY,
            resume: true,
        }
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub summary: Summary,
    pub resumed_units: usize,
}

fn already_committed(unit: &ParsedUnit, committed: &BTreeMap<String, Watermark>) -> bool {
    let Some(source) = unit.source_filename() else {
        return false;
    };
    committed
        .get(source)
        .is_some_and(|mark| mark.line > 0 && unit.last_line <= mark.line)
}

/// Run every event from `reader`, then finalize.
///
/// Returns a report only when the whole stream was consumed; any fatal
/// error aborts the run after a best-effort flush of committed progress.
pub fn run<R: BufRead>(mut aggregator: Aggregator, reader: R, options: &PipelineOptions) -> Result<PipelineReport> {
    let committed = if options.resume {
        aggregator.existing_files()?
    } else {
        BTreeMap::new()
    };

    match drive(&mut aggregator, reader, options, &committed) {
        Ok(resumed_units) => {
            let summary = aggregator.finalize()?;
            Ok(PipelineReport { summary, resumed_units })
        }
        Err(err) => {
            match err.line_number() {
                Some(line) => tracing::error!("Aborting on line {}: {}", line, err),
                None => tracing::error!("Aborting: {}", err),
            }
            if let Err(flush_err) = aggregator.flush() {
                tracing::warn!("Could not flush file progress: {}", flush_err);
            }
            Err(err)
        }
    }
}

fn drive<R: BufRead>(
    aggregator: &mut Aggregator,
    reader: R,
    options: &PipelineOptions,
    committed: &BTreeMap<String, Watermark>,
) -> Result<usize> {
    let mut resumed = 0;
    let mut since_flush = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: IngestEvent = serde_json::from_str(&line).inspect_err(|e| {
            tracing::error!("Malformed event on input line {}: {}", index + 1, e);
        })?;

        match event {
            IngestEvent::Unit { unit, watermark } => {
                if already_committed(&unit, committed) {
                    resumed += 1;
                    continue;
                }
                aggregator.aggregate(&unit, watermark)?;
                since_flush += 1;
                if options.flush_every > 0 && since_flush >= options.flush_every {
                    aggregator.flush()?;
                    since_flush = 0;
                }
            }
            IngestEvent::Warning { kind, message, line_number } => {
                aggregator.warning(&kind, &message, line_number)?;
            }
        }
    }

    if resumed > 0 {
        tracing::info!("Skipped {} units already committed by an earlier run", resumed);
    }
    Ok(resumed)
}
