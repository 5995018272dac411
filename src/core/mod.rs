//! Core building blocks of the merge pipeline.
//!
//! This module contains:
//! - Configuration management
//! - Error handling
//! - The checkpoint store for resumable batch runs
//!
//! It also re-exports the commonly used types for convenience.

pub mod checkpoint;
pub mod config;
pub mod errors;

pub use checkpoint::{CheckpointStore, PageRange};
pub use config::{CandidateMode, CropVariant, MergeConfig, PageSeparator, SegmentationMode};
pub use errors::{MergeError, MergeResult, ProcessingStage};
