//! Feature-extraction plugin boundary
//!
//! The transformer drives a plugin through a deliberately narrow surface:
//! descriptor queries, `initialise`, `process`, and
//! `get_remaining_features`. Process takes one f32 buffer per channel —
//! either `block_size` time-domain samples, or a frequency-domain block
//! packed as (real[0], imag[0], real[1], imag[1], ..., real[block/2],
//! imag[block/2]).

use crate::time::RealTime;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDomain {
    TimeDomain,
    FrequencyDomain,
}

/// How an output's features are positioned in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    /// One feature per process block, at the block frame.
    OneSamplePerStep,
    /// Features at a fixed rate of the output's own; timestamps optional.
    FixedSampleRate,
    /// Features anywhere; timestamps mandatory.
    VariableSampleRate,
}

/// Static description of one plugin output.
#[derive(Debug, Clone)]
pub struct OutputDescriptor {
    pub identifier: String,
    pub name: String,
    pub unit: String,
    pub has_fixed_bin_count: bool,
    pub bin_count: usize,
    pub bin_names: Vec<String>,
    pub has_known_extents: bool,
    pub min_value: f32,
    pub max_value: f32,
    pub sample_type: SampleType,
    /// Output sample rate, for the fixed- and variable-rate sample types.
    pub sample_rate: f64,
    pub has_duration: bool,
}

impl Default for OutputDescriptor {
    fn default() -> Self {
        OutputDescriptor {
            identifier: String::new(),
            name: String::new(),
            unit: String::new(),
            has_fixed_bin_count: true,
            bin_count: 1,
            bin_names: Vec::new(),
            has_known_extents: false,
            min_value: 0.0,
            max_value: 0.0,
            sample_type: SampleType::OneSamplePerStep,
            sample_rate: 0.0,
            has_duration: false,
        }
    }
}

/// One emission from a plugin.
#[derive(Debug, Clone, Default)]
pub struct Feature {
    pub timestamp: Option<RealTime>,
    pub duration: Option<RealTime>,
    pub values: Vec<f32>,
    pub label: String,
}

/// Features emitted by one process call, keyed by output index.
pub type FeatureSet = BTreeMap<usize, Vec<Feature>>;

/// The plugin side of the RPC boundary.
pub trait FeatureExtractionPlugin: Send {
    fn identifier(&self) -> String;

    fn input_domain(&self) -> InputDomain {
        InputDomain::TimeDomain
    }

    fn min_channel_count(&self) -> usize {
        1
    }

    fn max_channel_count(&self) -> usize {
        1
    }

    /// 0 means no preference.
    fn preferred_step_size(&self) -> usize {
        0
    }

    /// 0 means no preference.
    fn preferred_block_size(&self) -> usize {
        0
    }

    fn set_parameter(&mut self, _name: &str, _value: f32) {}

    fn select_program(&mut self, _name: &str) {}

    fn output_descriptors(&self) -> Vec<OutputDescriptor>;

    fn initialise(&mut self, channels: usize, step_size: usize, block_size: usize) -> bool;

    fn process(&mut self, buffers: &[Vec<f32>], timestamp: RealTime) -> FeatureSet;

    fn get_remaining_features(&mut self) -> FeatureSet;
}

/// Source of plugin instances, injected into transformers.
pub trait PluginFactory: Send + Sync {
    fn instantiate(
        &self,
        identifier: &str,
        sample_rate: f64,
    ) -> Option<Box<dyn FeatureExtractionPlugin>>;
}
