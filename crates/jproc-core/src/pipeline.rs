//! Document acquisition around the engine.
//!
//! Whole mode loads one document, runs the step list once and writes it back
//! pretty-printed. Stream mode reads a sequence of top-level JSON values and
//! runs the full step list on each one as it arrives, writing every result
//! as its own pretty block followed by a newline. The output of stream mode
//! is therefore a value sequence, not a single JSON document.

use crate::engine::{Engine, RunReport};
use crate::error::{PipelineError, PipelineResult};
use crate::steps::StepList;
use serde_json::{Deserializer, Value};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Whole,
    Stream,
}

/// Per-chunk reports of one pipeline pass.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub reports: Vec<RunReport>,
}

impl Summary {
    pub fn chunks(&self) -> usize {
        self.reports.len()
    }

    pub fn total_effects(&self) -> usize {
        self.reports.iter().map(RunReport::total_effects).sum()
    }

    pub fn failed_steps(&self) -> usize {
        self.reports.iter().map(|r| r.failures().count()).sum()
    }
}

/// A validated step list bound to the engine that runs it.
#[derive(Debug)]
pub struct Pipeline {
    engine: Engine,
    steps: StepList,
}

impl Pipeline {
    pub fn new(engine: Engine, steps: StepList) -> Self {
        Self { engine, steps }
    }

    /// Validate an in-memory steps document.
    pub fn from_steps_value(engine: Engine, steps: &Value) -> PipelineResult<Self> {
        let steps = engine.check(steps)?;
        Ok(Self::new(engine, steps))
    }

    /// Read and validate a steps file.
    pub fn from_steps_file(engine: Engine, path: &Path) -> PipelineResult<Self> {
        let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
        let doc: Value = serde_json::from_slice(&bytes)
            .map_err(|e| PipelineError::json(path.display().to_string(), e))?;
        let pipeline = Self::from_steps_value(engine, &doc)?;
        info!(path = %path.display(), steps = pipeline.steps.len(), "steps loaded");
        Ok(pipeline)
    }

    pub fn steps(&self) -> &StepList {
        &self.steps
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run the step list against one in-memory document.
    pub fn apply(&self, document: &mut Value) -> RunReport {
        self.engine.run(document, &self.steps)
    }

    /// Transform `input` into `output` in the given mode.
    pub fn transform_reader<R: Read, W: Write>(
        &self,
        input: R,
        mut output: W,
        mode: Mode,
    ) -> PipelineResult<Summary> {
        let mut summary = Summary::default();
        match mode {
            Mode::Whole => {
                let document: Value = serde_json::from_reader(input)
                    .map_err(|e| PipelineError::json("input document", e))?;
                summary.reports.push(self.write_whole(document, &mut output)?);
            }
            Mode::Stream => {
                let chunks = Deserializer::from_reader(input).into_iter::<Value>();
                for (index, chunk) in chunks.enumerate() {
                    let mut document =
                        chunk.map_err(|e| PipelineError::json(format!("input chunk {index}"), e))?;
                    debug!(chunk = index, "transforming chunk");
                    summary.reports.push(self.apply(&mut document));
                    write_pretty(&mut output, &document)?;
                    output.write_all(b"\n")?;
                    output.flush()?;
                }
            }
        }
        output.flush()?;
        Ok(summary)
    }

    fn write_whole<W: Write>(
        &self,
        mut document: Value,
        output: &mut W,
    ) -> PipelineResult<RunReport> {
        let report = self.apply(&mut document);
        write_pretty(output, &document)?;
        output.flush()?;
        Ok(report)
    }

    /// Transform one file into another.
    ///
    /// In whole mode the input is parsed before the output file is created,
    /// so an unreadable input leaves no output behind.
    pub fn process_file(
        &self,
        input: &Path,
        output: &Path,
        mode: Mode,
    ) -> PipelineResult<Summary> {
        let summary = match mode {
            Mode::Whole => {
                let bytes = fs::read(input).map_err(|e| PipelineError::io(input, e))?;
                let document: Value = serde_json::from_slice(&bytes)
                    .map_err(|e| PipelineError::json(input.display().to_string(), e))?;
                let mut out = create_output(output)?;
                let report = self.write_whole(document, &mut out)?;
                Summary {
                    reports: vec![report],
                }
            }
            Mode::Stream => {
                let file = File::open(input).map_err(|e| PipelineError::io(input, e))?;
                let out = create_output(output)?;
                self.transform_reader(BufReader::new(file), out, mode)?
            }
        };
        info!(
            input = %input.display(),
            output = %output.display(),
            chunks = summary.chunks(),
            effects = summary.total_effects(),
            "document written"
        );
        Ok(summary)
    }
}

fn create_output(path: &Path) -> PipelineResult<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| PipelineError::io(path, e))
}

fn write_pretty<W: Write>(output: &mut W, document: &Value) -> PipelineResult<()> {
    serde_json::to_writer_pretty(&mut *output, document)
        .map_err(|e| PipelineError::json("output document", e))
}
