//! srcpipe - Library for incremental source-to-source builds
//!
//! This library provides functionality to:
//! - Discover source files from a glob pattern
//! - Run each file through an ordered pipeline of transform stages
//! - Write the results atomically into a mirrored output tree
//! - Watch the sources and rebuild, debounced

pub mod build;
pub mod cli;
pub mod config;
pub mod transforms;
pub mod watch;
