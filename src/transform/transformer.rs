//! Plugin-driven streaming annotator
//!
//! Runs one feature-extraction plugin over a dense time-value input and
//! routes each chosen plugin output into a typed annotation model. All
//! heavy work happens on a worker thread; observers poll the output
//! models' completion or subscribe to their notifiers.
//!
//! Configuration failures (dissimilar transforms, unknown outputs, channel
//! mismatch) do not abort construction: the transformer stays inspectable
//! with `is_ok()` false and a human-readable `message()`.

use crate::model::{
    padded_data, DenseTimeValueModel, EditableDenseThreeDimensionalModel, FftModel, Model,
    NoteModel, RegionModel, SparseModel, SparseOneDimensionalModel, SparseTimeValueModel,
};
use crate::time::{Frame, RealTime};
use crate::transform::plugin::{
    FeatureExtractionPlugin, InputDomain, OutputDescriptor, PluginFactory, SampleType,
};
use crate::transform::types::Transform;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// How long to sleep between readiness polls on the input model.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The transformer's input: a dense model plus a channel selection, where
/// `None` means "all channels mixed to their mean".
#[derive(Clone)]
pub struct Input {
    pub model: Arc<dyn DenseTimeValueModel>,
    pub channel: Option<usize>,
}

/// One materialised plugin output. Concrete-variant dispatch: each arm
/// carries its own small adapter in `add_feature`.
#[derive(Clone)]
pub enum OutputModel {
    SparseOneDimensional(Arc<SparseOneDimensionalModel>),
    SparseTimeValue(Arc<SparseTimeValueModel>),
    Note(Arc<NoteModel>),
    Region(Arc<RegionModel>),
    Grid(Arc<EditableDenseThreeDimensionalModel>),
}

impl OutputModel {
    pub fn as_model(&self) -> Arc<dyn Model> {
        match self {
            OutputModel::SparseOneDimensional(m) => m.clone(),
            OutputModel::SparseTimeValue(m) => m.clone(),
            OutputModel::Note(m) => m.clone(),
            OutputModel::Region(m) => m.clone(),
            OutputModel::Grid(m) => m.clone(),
        }
    }

    fn set_completion(&self, completion: i32, update: bool) {
        match self {
            OutputModel::SparseOneDimensional(m) => m.set_completion(completion, update),
            OutputModel::SparseTimeValue(m) => m.set_completion(completion, update),
            OutputModel::Note(m) => m.set_completion(completion, update),
            OutputModel::Region(m) => m.set_completion(completion, update),
            OutputModel::Grid(m) => m.set_completion(completion, update),
        }
    }
}

struct InitResult {
    plugin: Box<dyn FeatureExtractionPlugin>,
    primary: Transform,
    descriptors: Vec<OutputDescriptor>,
    output_indexes: Vec<usize>,
    outputs: Vec<OutputModel>,
}

pub struct FeatureExtractionModelTransformer {
    input: Input,
    primary: Transform,
    plugin: Mutex<Option<Box<dyn FeatureExtractionPlugin>>>,
    descriptors: Vec<OutputDescriptor>,
    output_indexes: Vec<usize>,
    // assigned before use; incremented only for timestamp-less features
    fixed_rate_feature_nos: Mutex<Vec<i64>>,
    outputs: Vec<OutputModel>,
    message: Mutex<String>,
    ok: bool,
    abandoned: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl FeatureExtractionModelTransformer {
    /// Initialise against the given transforms, which must agree on
    /// everything but their chosen output. On configuration failure the
    /// returned transformer reports `is_ok() == false` with a message.
    pub fn new(
        input: Input,
        transforms: Vec<Transform>,
        factory: &dyn PluginFactory,
    ) -> Arc<Self> {
        match Self::initialise(&input, &transforms, factory) {
            Ok((init, message)) => Arc::new(FeatureExtractionModelTransformer {
                input,
                primary: init.primary,
                fixed_rate_feature_nos: Mutex::new(vec![-1; init.outputs.len()]),
                plugin: Mutex::new(Some(init.plugin)),
                descriptors: init.descriptors,
                output_indexes: init.output_indexes,
                outputs: init.outputs,
                message: Mutex::new(message),
                ok: true,
                abandoned: AtomicBool::new(false),
                thread: Mutex::new(None),
            }),
            Err(message) => Arc::new(FeatureExtractionModelTransformer {
                input,
                primary: transforms.first().cloned().unwrap_or_default(),
                plugin: Mutex::new(None),
                descriptors: Vec::new(),
                output_indexes: Vec::new(),
                fixed_rate_feature_nos: Mutex::new(Vec::new()),
                outputs: Vec::new(),
                message: Mutex::new(message),
                ok: false,
                abandoned: AtomicBool::new(false),
                thread: Mutex::new(None),
            }),
        }
    }

    fn initialise(
        input: &Input,
        transforms: &[Transform],
        factory: &dyn PluginFactory,
    ) -> Result<(InitResult, String), String> {
        if transforms.is_empty() {
            return Err("No transforms supplied".to_string());
        }

        // All transforms must share plugin, parameters and input; they can
        // differ only in choice of plugin output
        for t in &transforms[1..] {
            if !transforms[0].is_similar_to(t) {
                return Err(
                    "Transforms supplied to a single transformer must be similar in every \
                     respect except plugin output"
                        .to_string(),
                );
            }
        }

        let mut primary = transforms[0].clone();
        let plugin_id = primary.plugin_id.clone();
        let mut message = String::new();

        let Some(mut plugin) = factory.instantiate(&plugin_id, input.model.sample_rate()) else {
            return Err(format!(
                "Failed to instantiate feature extraction plugin \"{}\"",
                plugin_id
            ));
        };

        for (name, value) in &primary.parameters {
            plugin.set_parameter(name, *value);
        }
        if let Some(program) = &primary.program {
            plugin.select_program(program);
        }

        let mut channel_count = input.model.channel_count();
        if plugin.max_channel_count() < channel_count {
            channel_count = 1;
        }
        if plugin.min_channel_count() > channel_count {
            return Err(format!(
                "Cannot provide enough channels to feature extraction plugin \"{}\" \
                 (plugin min is {}, max {}; input model has {})",
                plugin_id,
                plugin.min_channel_count(),
                plugin.max_channel_count(),
                input.model.channel_count()
            ));
        }

        make_context_consistent(&mut primary, plugin.as_ref());

        debug!(
            channels = channel_count,
            step = primary.step_size,
            block = primary.block_size,
            "initialising feature extraction plugin"
        );

        if !plugin.initialise(channel_count, primary.step_size, primary.block_size) {
            // The plugin rejected our geometry; re-ask it for preferences
            // and retry once if they differ
            let requested_step = primary.step_size;
            let requested_block = primary.block_size;

            primary.step_size = 0;
            primary.block_size = 0;
            make_context_consistent(&mut primary, plugin.as_ref());

            if primary.step_size != requested_step || primary.block_size != requested_block {
                if !plugin.initialise(channel_count, primary.step_size, primary.block_size) {
                    return Err(format!(
                        "Failed to initialise feature extraction plugin \"{}\"",
                        plugin_id
                    ));
                }
                message = format!(
                    "Feature extraction plugin \"{}\" rejected the given step and block \
                     sizes ({} and {}); using plugin defaults ({} and {}) instead",
                    plugin_id,
                    requested_step,
                    requested_block,
                    primary.step_size,
                    primary.block_size
                );
            } else {
                return Err(format!(
                    "Failed to initialise feature extraction plugin \"{}\"",
                    plugin_id
                ));
            }
        }

        let available = plugin.output_descriptors();
        if available.is_empty() {
            return Err(format!("Plugin \"{}\" has no outputs", plugin_id));
        }

        let mut descriptors = Vec::new();
        let mut output_indexes = Vec::new();
        for t in transforms {
            let found = if t.output.is_empty() {
                Some(0)
            } else {
                available.iter().position(|d| d.identifier == t.output)
            };
            match found {
                Some(i) => {
                    output_indexes.push(i);
                    descriptors.push(available[i].clone());
                }
                None => {
                    return Err(format!(
                        "Plugin \"{}\" has no output named \"{}\"",
                        plugin_id, t.output
                    ));
                }
            }
        }

        let mut outputs = Vec::new();
        for descriptor in &descriptors {
            outputs.push(create_output_model(input, &primary, descriptor));
        }

        Ok((
            InitResult {
                plugin,
                primary,
                descriptors,
                output_indexes,
                outputs,
            },
            message,
        ))
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// Human-readable configuration or runtime complaint, if any.
    pub fn message(&self) -> String {
        self.message.lock().unwrap().clone()
    }

    pub fn outputs(&self) -> &[OutputModel] {
        &self.outputs
    }

    pub fn output_models(&self) -> Vec<Arc<dyn Model>> {
        self.outputs.iter().map(|o| o.as_model()).collect()
    }

    /// Cooperative cancellation: the worker observes this at every block
    /// and at every blocking call return.
    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Start the worker thread. No-op if the transformer failed to
    /// configure or has already been started.
    pub fn start(self: &Arc<Self>) {
        if !self.ok {
            return;
        }
        let mut thread = self.thread.lock().unwrap();
        if thread.is_some() {
            return;
        }
        let worker = Arc::clone(self);
        *thread = Some(std::thread::spawn(move || worker.run()));
    }

    /// Wait for the worker to finish.
    pub fn join(&self) {
        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn run(&self) {
        let Some(mut plugin) = self.plugin.lock().unwrap().take() else {
            return;
        };
        if self.outputs.is_empty() {
            return;
        }

        let input_model = &self.input.model;

        while !input_model.is_ready() && !self.is_abandoned() {
            debug!("waiting for input model to be ready...");
            std::thread::sleep(READY_POLL_INTERVAL);
        }
        if self.is_abandoned() {
            self.finalise_completions();
            return;
        }

        let sample_rate = input_model.sample_rate();
        let mut channel_count = input_model.channel_count();
        if plugin.max_channel_count() < channel_count {
            channel_count = 1;
        }

        let step_size = self.primary.step_size;
        let block_size = self.primary.block_size;
        let frequency_domain = plugin.input_domain() == InputDomain::FrequencyDomain;

        let mut fft_models: Vec<FftModel> = Vec::new();
        if frequency_domain {
            for ch in 0..channel_count {
                let channel = if channel_count == 1 {
                    self.input.channel
                } else {
                    Some(ch)
                };
                match FftModel::new(
                    Arc::clone(input_model),
                    channel,
                    self.primary.window_type.shape(block_size),
                    block_size,
                    step_size,
                ) {
                    Ok(model) => fft_models.push(model),
                    Err(e) => {
                        *self.message.lock().unwrap() =
                            format!("Failed to create the FFT model for this transformer: {}", e);
                        self.finalise_completions();
                        return;
                    }
                }
            }
        }

        let start_frame = input_model.start_frame();
        let end_frame = input_model.end_frame();

        let mut context_start = self.primary.start_time.to_frame(sample_rate);
        let mut context_duration = self.primary.duration.to_frame(sample_rate);

        if context_start == 0 || context_start < start_frame {
            context_start = start_frame;
        }
        if context_duration == 0 {
            context_duration = end_frame - context_start;
        }
        if context_start + context_duration > end_frame {
            context_duration = end_frame - context_start;
        }

        let mut block_frame = context_start;
        let mut prev_completion: i64 = 0;

        for output in &self.outputs {
            output.set_completion(0, true);
        }

        let step = step_size as Frame;
        let mut buffers: Vec<Vec<f32>> = Vec::new();

        while !self.is_abandoned() {
            if frequency_domain {
                if block_frame - (block_size / 2) as Frame > context_start + context_duration {
                    break;
                }
            } else if block_frame >= context_start + context_duration {
                break;
            }

            let completion: i64 = (((block_frame - context_start) / step) * 99)
                / (context_duration / step + 1);

            if frequency_domain {
                buffers.clear();
                let column = ((block_frame - start_frame) / step) as usize;
                let mut failed = None;
                for fft in &fft_models {
                    match fft.values_at(column) {
                        Ok((reals, imaginaries)) => {
                            let mut packed = Vec::with_capacity(block_size + 2);
                            for (re, im) in reals.iter().zip(imaginaries.iter()) {
                                packed.push(*re);
                                packed.push(*im);
                            }
                            buffers.push(packed);
                        }
                        Err(e) => {
                            failed = Some(e.to_string());
                            break;
                        }
                    }
                }
                if let Some(error) = failed {
                    warn!("abandoning transform: {}", error);
                    *self.message.lock().unwrap() = error;
                    self.abandon();
                    break;
                }
            } else {
                self.get_frames(channel_count, block_frame, block_size, &mut buffers);
            }

            if self.is_abandoned() {
                break;
            }

            let features =
                plugin.process(&buffers, RealTime::from_frame(block_frame, sample_rate));

            if self.is_abandoned() {
                break;
            }

            for (n, output_index) in self.output_indexes.iter().enumerate() {
                if let Some(list) = features.get(output_index) {
                    for feature in list {
                        self.add_feature(n, block_frame, feature);
                    }
                }
            }

            if block_frame == context_start || completion > prev_completion {
                let clamped = completion.clamp(1, 99) as i32;
                for output in &self.outputs {
                    output.set_completion(clamped, true);
                }
                prev_completion = completion;
            }

            block_frame += step;
        }

        if !self.is_abandoned() {
            let features = plugin.get_remaining_features();
            for (n, output_index) in self.output_indexes.iter().enumerate() {
                if let Some(list) = features.get(output_index) {
                    for feature in list {
                        self.add_feature(n, block_frame, feature);
                    }
                }
            }
        }

        self.finalise_completions();
        // fft models and their shared input reference released here
    }

    fn finalise_completions(&self) {
        for output in &self.outputs {
            output.set_completion(100, true);
        }
    }

    /// Fill one time-domain block, zero-padded at either end of the input.
    /// A single-channel request against a multi-channel model delivers the
    /// mean of the channels.
    fn get_frames(
        &self,
        channel_count: usize,
        start_frame: Frame,
        size: usize,
        buffers: &mut Vec<Vec<f32>>,
    ) {
        buffers.clear();
        let model = self.input.model.as_ref();

        if channel_count == 1 {
            let mut data = padded_data(model, self.input.channel, start_frame, size);
            if self.input.channel.is_none() && model.channel_count() > 1 {
                let channels = model.channel_count() as f32;
                for v in data.iter_mut() {
                    *v /= channels;
                }
            }
            buffers.push(data);
        } else {
            for ch in 0..channel_count {
                buffers.push(padded_data(model, Some(ch), start_frame, size));
            }
        }
    }

    fn add_feature(&self, n: usize, block_frame: Frame, feature: &crate::transform::Feature) {
        let descriptor = &self.descriptors[n];
        let input_rate = self.input.model.sample_rate();

        let frame = match descriptor.sample_type {
            SampleType::OneSamplePerStep => block_frame,

            SampleType::VariableSampleRate => match feature.timestamp {
                None => {
                    warn!("feature has variable sample rate but no timestamp, dropping");
                    return;
                }
                Some(timestamp) => timestamp.to_frame(input_rate),
            },

            SampleType::FixedSampleRate => {
                let rate = descriptor.sample_rate;
                if rate <= 0.0 {
                    warn!("fixed-sample-rate output without a rate, dropping feature");
                    return;
                }
                let mut nos = self.fixed_rate_feature_nos.lock().unwrap();
                match feature.timestamp {
                    None => nos[n] += 1,
                    Some(timestamp) => {
                        nos[n] = (timestamp.to_seconds() * rate).round() as i64;
                    }
                }
                ((nos[n] as f64 / rate) * input_rate).round() as Frame
            }
        };

        if frame < 0 {
            warn!(frame, "feature maps to a negative frame, dropping");
            return;
        }

        match &self.outputs[n] {
            OutputModel::SparseOneDimensional(model) => {
                model.add_point(frame, &feature.label);
            }

            OutputModel::SparseTimeValue(model) => {
                for (i, &value) in feature.values.iter().enumerate() {
                    let label = if feature.values.len() > 1 {
                        format!("[{}] {}", i + 1, feature.label)
                    } else {
                        feature.label.clone()
                    };
                    model.add_point(frame, value, &label);
                }
            }

            OutputModel::Note(model) => {
                let mut index = 0;

                let mut value = 0.0;
                if feature.values.len() > index {
                    value = feature.values[index];
                    index += 1;
                }

                let duration = match feature.duration {
                    Some(d) => d.to_frame(input_rate),
                    None => {
                        if feature.values.len() > index {
                            let d = feature.values[index].round() as Frame;
                            index += 1;
                            d
                        } else {
                            1
                        }
                    }
                };

                let mut velocity = 100.0;
                if feature.values.len() > index {
                    velocity = feature.values[index];
                }
                if velocity < 0.0 || velocity > 127.0 {
                    velocity = 127.0;
                }

                model.add_note(
                    frame,
                    value,
                    duration.max(0),
                    velocity / 127.0,
                    &feature.label,
                );
            }

            OutputModel::Region(model) => {
                let mut index = 0;

                let mut value = 0.0;
                if feature.values.len() > index {
                    value = feature.values[index];
                    index += 1;
                }

                let duration = match feature.duration {
                    Some(d) => d.to_frame(input_rate),
                    None => {
                        if feature.values.len() > index {
                            feature.values[index].round() as Frame
                        } else {
                            1
                        }
                    }
                }
                .max(0);

                if feature.duration.is_some() && !feature.values.is_empty() {
                    for (i, &v) in feature.values.iter().enumerate() {
                        let label = if feature.values.len() > 1 {
                            format!("[{}] {}", i + 1, feature.label)
                        } else {
                            feature.label.clone()
                        };
                        model.add_region(frame, v, duration, &label);
                    }
                } else {
                    model.add_region(frame, value, duration, &feature.label);
                }
            }

            OutputModel::Grid(model) => {
                let column = (frame / model.resolution()) as usize;
                model.set_column(column, &feature.values);
            }
        }
    }
}

impl Drop for FeatureExtractionModelTransformer {
    fn drop(&mut self) {
        self.abandon();
        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            // the worker itself may drop the last reference
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Fill in step and block geometry the plugin is happy with where the
/// transform left them unspecified.
fn make_context_consistent(t: &mut Transform, plugin: &dyn FeatureExtractionPlugin) {
    if t.block_size == 0 {
        t.block_size = plugin.preferred_block_size();
        if t.block_size == 0 {
            t.block_size = 1024;
        }
    }
    if t.step_size == 0 {
        t.step_size = plugin.preferred_step_size();
        if t.step_size == 0 {
            t.step_size = match plugin.input_domain() {
                InputDomain::FrequencyDomain => t.block_size / 2,
                InputDomain::TimeDomain => t.block_size,
            };
        }
    }
}

/// Choose a concrete model type from the output descriptor's shape.
fn create_output_model(
    input: &Input,
    primary: &Transform,
    descriptor: &OutputDescriptor,
) -> OutputModel {
    let input_rate = input.model.sample_rate();

    let bin_count = if descriptor.has_fixed_bin_count {
        descriptor.bin_count
    } else {
        1
    };
    let have_extents = bin_count > 0 && descriptor.has_known_extents;

    if descriptor.sample_type != SampleType::OneSamplePerStep
        && descriptor.sample_rate > input_rate
    {
        warn!(
            plugin_rate = descriptor.sample_rate,
            input_rate,
            "plugin reports a finer output rate than the input; features \
             cannot be placed more finely than input frames"
        );
    }

    let resolution: Frame = match descriptor.sample_type {
        SampleType::OneSamplePerStep => primary.step_size as Frame,
        SampleType::FixedSampleRate => {
            if descriptor.sample_rate > input_rate || descriptor.sample_rate <= 0.0 {
                1
            } else {
                (input_rate / descriptor.sample_rate).round() as Frame
            }
        }
        SampleType::VariableSampleRate => {
            if descriptor.sample_rate > 0.0 {
                ((input_rate / descriptor.sample_rate).round() as Frame).max(1)
            } else {
                1
            }
        }
    }
    .max(1);

    let output = if bin_count == 0 && !descriptor.has_duration {
        // anything with no value and no duration is an instant
        OutputModel::SparseOneDimensional(Arc::new(SparseOneDimensionalModel::new(
            input_rate, resolution, false,
        )))
    } else if descriptor.has_duration {
        // bins beyond one suggest pitch/velocity structure, as do
        // pitch-like units; otherwise a plain interval
        let unit = &descriptor.unit;
        let is_note = bin_count > 1
            || unit == "Hz"
            || unit.contains("MIDI")
            || unit.contains("midi");

        if is_note {
            let model = if have_extents {
                NoteModel::with_extents(
                    input_rate,
                    resolution,
                    descriptor.min_value,
                    descriptor.max_value,
                    false,
                )
            } else {
                NoteModel::new(input_rate, resolution, false)
            };
            model.set_scale_units(descriptor.unit.clone());
            OutputModel::Note(Arc::new(model))
        } else {
            let model = if have_extents {
                RegionModel::with_extents(
                    input_rate,
                    resolution,
                    descriptor.min_value,
                    descriptor.max_value,
                    false,
                )
            } else {
                RegionModel::new(input_rate, resolution, false)
            };
            model.set_scale_units(descriptor.unit.clone());
            OutputModel::Region(Arc::new(model))
        }
    } else if bin_count == 1 || descriptor.sample_type == SampleType::VariableSampleRate {
        // one value per result, or variable rate at any bin count
        let model = if have_extents {
            SparseTimeValueModel::with_extents(
                input_rate,
                resolution,
                descriptor.min_value,
                descriptor.max_value,
                false,
            )
        } else {
            SparseTimeValueModel::new(input_rate, resolution, false)
        };
        model.set_scale_units(descriptor.unit.clone());
        OutputModel::SparseTimeValue(Arc::new(model))
    } else {
        // fixed rate and multiple bins per result
        let model =
            EditableDenseThreeDimensionalModel::new(input_rate, resolution, bin_count, false);
        if !descriptor.bin_names.is_empty() {
            model.set_bin_names(descriptor.bin_names.clone());
        }
        OutputModel::Grid(Arc::new(model))
    };

    let model = output.as_model();
    model.base().set_source_model(Some(input.model.id()));
    model
        .base()
        .set_rdf_type_uri(input.model.base().rdf_type_uri());

    output
}
