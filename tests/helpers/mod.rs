//! Shared fixtures for integration tests: a synthetic dense model with
//! controllable readiness, and a scriptable feature-extraction plugin.

#![allow(dead_code)]

use annopipe::model::{DenseTimeValueModel, Model, ModelBase, NotifyMode};
use annopipe::time::{Frame, RealTime};
use annopipe::transform::{
    FeatureExtractionPlugin, FeatureSet, InputDomain, OutputDescriptor, PluginFactory, SampleType,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory dense model whose samples come from a closure and whose
/// completion is test-controlled.
pub struct TestWave {
    base: ModelBase,
    channels: usize,
    frames: Frame,
    completion: Mutex<i32>,
    value: Box<dyn Fn(Frame, usize) -> f32 + Send + Sync>,
}

impl TestWave {
    pub fn new(
        sample_rate: f64,
        channels: usize,
        frames: Frame,
        value: impl Fn(Frame, usize) -> f32 + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(TestWave {
            base: ModelBase::new(sample_rate, NotifyMode::OnAdd),
            channels,
            frames,
            completion: Mutex::new(100),
            value: Box::new(value),
        })
    }

    /// Mono wave whose sample value equals its frame number.
    pub fn ramp(sample_rate: f64, frames: Frame) -> Arc<Self> {
        Self::new(sample_rate, 1, frames, |frame, _| frame as f32)
    }

    pub fn constant(sample_rate: f64, channels: usize, frames: Frame, level: f32) -> Arc<Self> {
        Self::new(sample_rate, channels, frames, move |_, _| level)
    }

    pub fn set_completion(&self, completion: i32) {
        *self.completion.lock().unwrap() = completion;
    }
}

impl Model for TestWave {
    fn base(&self) -> &ModelBase {
        &self.base
    }
    fn start_frame(&self) -> Frame {
        0
    }
    fn end_frame(&self) -> Frame {
        self.frames
    }
    fn completion(&self) -> i32 {
        *self.completion.lock().unwrap()
    }
    fn type_name(&self) -> &'static str {
        "TestWave"
    }
    fn to_xml(&self, _out: &mut String, _indent: &str, _extra: &str) {}
}

impl DenseTimeValueModel for TestWave {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn data(&self, channel: Option<usize>, start: Frame, count: usize) -> Vec<f32> {
        if start < 0 || start >= self.frames {
            return Vec::new();
        }
        let end = (start + count as Frame).min(self.frames);
        (start..end)
            .map(|frame| match channel {
                Some(ch) => (self.value)(frame, ch),
                None => (0..self.channels).map(|ch| (self.value)(frame, ch)).sum(),
            })
            .collect()
    }
}

pub type ProcessHook = Box<dyn FnMut(usize, &[Vec<f32>], RealTime) -> FeatureSet + Send>;

/// Scriptable plugin: descriptors and per-process behaviour supplied by
/// the test.
pub struct MockPlugin {
    pub outputs: Vec<OutputDescriptor>,
    pub domain: InputDomain,
    pub min_channels: usize,
    pub max_channels: usize,
    pub preferred_step: usize,
    pub preferred_block: usize,
    /// Reject initialise unless step and block match the preferences.
    pub strict_preferred: bool,
    pub process_hook: ProcessHook,
    pub remaining: FeatureSet,
    pub calls: Arc<AtomicUsize>,
}

impl MockPlugin {
    pub fn new(outputs: Vec<OutputDescriptor>) -> Self {
        MockPlugin {
            outputs,
            domain: InputDomain::TimeDomain,
            min_channels: 1,
            max_channels: 1,
            preferred_step: 0,
            preferred_block: 0,
            strict_preferred: false,
            process_hook: Box::new(|_, _, _| FeatureSet::new()),
            remaining: FeatureSet::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FeatureExtractionPlugin for MockPlugin {
    fn identifier(&self) -> String {
        "test:mock".to_string()
    }

    fn input_domain(&self) -> InputDomain {
        self.domain
    }

    fn min_channel_count(&self) -> usize {
        self.min_channels
    }

    fn max_channel_count(&self) -> usize {
        self.max_channels
    }

    fn preferred_step_size(&self) -> usize {
        self.preferred_step
    }

    fn preferred_block_size(&self) -> usize {
        self.preferred_block
    }

    fn output_descriptors(&self) -> Vec<OutputDescriptor> {
        self.outputs.clone()
    }

    fn initialise(&mut self, _channels: usize, step_size: usize, block_size: usize) -> bool {
        if self.strict_preferred {
            step_size == self.preferred_step && block_size == self.preferred_block
        } else {
            true
        }
    }

    fn process(&mut self, buffers: &[Vec<f32>], timestamp: RealTime) -> FeatureSet {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.process_hook)(index, buffers, timestamp)
    }

    fn get_remaining_features(&mut self) -> FeatureSet {
        std::mem::take(&mut self.remaining)
    }
}

/// Hands out one pre-built plugin for the id "test:mock".
pub struct MockFactory {
    plugin: Mutex<Option<MockPlugin>>,
    pub seen_rate: Mutex<Option<f64>>,
}

impl MockFactory {
    pub fn with(plugin: MockPlugin) -> Self {
        MockFactory {
            plugin: Mutex::new(Some(plugin)),
            seen_rate: Mutex::new(None),
        }
    }
}

impl PluginFactory for MockFactory {
    fn instantiate(
        &self,
        identifier: &str,
        sample_rate: f64,
    ) -> Option<Box<dyn FeatureExtractionPlugin>> {
        if identifier != "test:mock" {
            return None;
        }
        *self.seen_rate.lock().unwrap() = Some(sample_rate);
        self.plugin
            .lock()
            .unwrap()
            .take()
            .map(|p| Box::new(p) as Box<dyn FeatureExtractionPlugin>)
    }
}

/// A one-bin one-sample-per-step descriptor, the simplest useful output.
pub fn value_per_step_descriptor() -> OutputDescriptor {
    OutputDescriptor {
        identifier: "values".to_string(),
        name: "Values".to_string(),
        bin_count: 1,
        sample_type: SampleType::OneSamplePerStep,
        ..OutputDescriptor::default()
    }
}

/// A feature with just values.
pub fn feature(values: Vec<f32>) -> annopipe::transform::Feature {
    annopipe::transform::Feature {
        values,
        ..Default::default()
    }
}
