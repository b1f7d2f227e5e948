//! jproc core crate.
//!
//! Declarative, in-place transformation of JSON documents driven by an
//! ordered list of steps. Layers:
//!
//! - `path`: dot-path parsing and fan-out resolution across arrays.
//! - `mutate`: target flattening and the five mutators, each returning an
//!   effect count.
//! - `steps`: steps document contract and validation.
//! - `runtime` + `reader`: closed expression language used by `update`.
//! - `engine`: sequential dispatch with per-step failure isolation.
//! - `pipeline`: whole-document and streamed acquisition around the engine.
//! - `merge`: deep merge of several JSON files, independent of the engine.
//!
//! A run has two failure tiers. A bad steps document is rejected before any
//! mutation. A step that fails while executing is logged and reported, and
//! the next step runs anyway.

pub mod error;
pub mod path;
pub mod mutate;
pub mod runtime;
pub mod reader;
pub mod steps;
pub mod engine;
pub mod pipeline;
pub mod merge;

pub use engine::{Engine, RunReport, StepReport, StepStatus};
pub use error::{ConfigError, MergeError, PipelineError, PipelineResult, StepError, StepIssue};
pub use merge::{merge_files, merge_values, stamp_source};
pub use path::DotPath;
pub use pipeline::{Mode, Pipeline, Summary};
pub use runtime::{Context, EvalError, EvalResult, Operator, Operators, evaluate};
pub use steps::{Step, StepKind, StepList, parse_steps};
