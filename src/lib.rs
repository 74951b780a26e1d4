//! # annopipe
//!
//! Reactive feature-extraction and annotation pipeline for audio
//! timelines: an ordered event store with interval queries, a hierarchy of
//! timeline models, a streaming decode/resample/normalise cache, frame
//! alignment between timelines, and a plugin-driven transformer that
//! materialises extracted features into typed annotation models.
//!
//! All heavy work is asynchronous: readers and transformers own worker
//! threads, and observers either poll completion or subscribe to model
//! notifiers.

pub mod audio;
pub mod base;
pub mod error;
pub mod model;
pub mod support;
pub mod time;
pub mod transform;

pub use error::{Error, Result};
pub use time::{Frame, RealTime};
