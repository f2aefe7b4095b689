//! Build pipeline module for srcpipe
//!
//! Turns a tree of source files into a mirrored tree of outputs.
//!
//! # Overview
//!
//! The build pipeline consists of:
//! - **Discovery**: Find source files using the input glob from config
//! - **Planning**: Map each source to exactly one destination
//! - **Execution**: Run the transform stages and write outputs atomically,
//!   on a bounded pool of workers
//!
//! Every pass produces a [`BuildReport`] with one outcome per source.
//!
//! # Example
//!
//! ```ignore
//! use srcpipe::build::{BuildContext, BuildPipeline};
//! use srcpipe::config::load_config;
//!
//! let config = load_config(None)?;
//! let context = BuildContext::new(config, project_root);
//! let pipeline = BuildPipeline::from_context(context)?;
//!
//! let report = pipeline.build()?;
//! println!("{}", report.summary());
//! ```

pub mod context;
pub mod discovery;
pub mod manifest;
pub mod output;
pub mod parallel;
pub mod pipeline;
pub mod result;
pub mod source;

pub use context::*;
pub use discovery::*;
pub use manifest::*;
pub use output::*;
pub use parallel::*;
pub use pipeline::*;
pub use result::*;
pub use source::*;
