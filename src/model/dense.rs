//! Dense PCM models
//!
//! `DenseTimeValueModel` is the read surface the transformer consumes:
//! random access to per-channel sample data on a timeline. `WaveModel` is
//! its concrete production form, backed by a coded audio reader's decode
//! cache.

use crate::audio::{AudioFileReader, CacheMode, DecodeMode};
use crate::error::Result;
use crate::model::{Model, ModelBase, ModelEvent, NotifyMode};
use crate::support::SessionContext;
use crate::time::Frame;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Random-access sample data on an audio timeline.
pub trait DenseTimeValueModel: Model {
    fn channel_count(&self) -> usize;

    /// Up to `count` frames of one channel starting at `start` (which must
    /// be within the model). `None` sums across channels; callers wanting
    /// the mean divide by the channel count.
    fn data(&self, channel: Option<usize>, start: Frame, count: usize) -> Vec<f32>;
}

/// Read exactly `count` frames, zero-padding anything outside the model's
/// extent (including negative start positions).
pub fn padded_data(
    model: &dyn DenseTimeValueModel,
    channel: Option<usize>,
    start: Frame,
    count: usize,
) -> Vec<f32> {
    let mut out = vec![0.0f32; count];

    let (offset, start, remaining) = if start < 0 {
        let skip = (-start) as usize;
        if skip >= count {
            return out;
        }
        (skip, 0, count - skip)
    } else {
        (0, start, count)
    };

    let got = model.data(channel, start, remaining);
    let take = got.len().min(remaining);
    out[offset..offset + take].copy_from_slice(&got[..take]);
    out
}

/// PCM model produced by an audio file reader.
pub struct WaveModel {
    base: ModelBase,
    reader: Arc<AudioFileReader>,
}

impl WaveModel {
    pub fn new(reader: Arc<AudioFileReader>) -> Arc<Self> {
        let base = ModelBase::new(reader.sample_rate(), NotifyMode::OnAdd);
        let model = Arc::new(WaveModel {
            base,
            reader: Arc::clone(&reader),
        });

        // ready must fire exactly once whether the decode finishes before
        // or after we get to subscribe
        let notifier = model.base.notifier().clone();
        let emitted = Arc::new(AtomicBool::new(false));
        let fire: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            if !emitted.swap(true, Ordering::SeqCst) {
                notifier.emit(&ModelEvent::CompletionChanged);
                notifier.emit(&ModelEvent::Changed);
                notifier.emit(&ModelEvent::Ready);
            }
        });
        let hook = Arc::clone(&fire);
        reader.on_finished(move || hook());
        if reader.is_finished() {
            fire();
        }

        model
    }

    /// Decode an audio file into a wave model using the context's
    /// preferences for caching and normalisation.
    pub fn from_file(ctx: &SessionContext, path: &Path, target_rate: f64) -> Result<Arc<Self>> {
        let cache_mode = if ctx.preferences.use_temporary_file_cache {
            CacheMode::InTemporaryFile
        } else {
            CacheMode::InMemory
        };
        let reader = AudioFileReader::new(
            ctx,
            path,
            DecodeMode::Threaded,
            cache_mode,
            target_rate,
            ctx.preferences.normalise_audio,
        )?;
        Ok(WaveModel::new(reader))
    }

    pub fn reader(&self) -> &Arc<AudioFileReader> {
        &self.reader
    }

    pub fn frame_count(&self) -> Frame {
        self.reader.frame_count()
    }
}

impl Model for WaveModel {
    fn base(&self) -> &ModelBase {
        &self.base
    }

    fn is_ok(&self) -> bool {
        self.reader.is_ok()
    }

    fn start_frame(&self) -> Frame {
        0
    }

    fn end_frame(&self) -> Frame {
        self.reader.frame_count()
    }

    fn completion(&self) -> i32 {
        self.reader.completion()
    }

    fn type_name(&self) -> &'static str {
        "Wave"
    }

    fn to_xml(&self, out: &mut String, indent: &str, extra_attributes: &str) {
        let mut attrs = self.base.xml_attributes();
        let _ = write!(
            attrs,
            " subtype=\"wave\" channels=\"{}\" frames=\"{}\"",
            self.reader.channel_count(),
            self.reader.frame_count()
        );
        if !extra_attributes.is_empty() {
            let _ = write!(attrs, " {}", extra_attributes);
        }
        let _ = writeln!(out, "{}<dataset {}/>", indent, attrs);
    }
}

impl DenseTimeValueModel for WaveModel {
    fn channel_count(&self) -> usize {
        self.reader.channel_count()
    }

    fn data(&self, channel: Option<usize>, start: Frame, count: usize) -> Vec<f32> {
        let channels = self.reader.channel_count();
        if channels == 0 || start < 0 {
            return Vec::new();
        }
        let interleaved = self.reader.get_interleaved_frames(start, count as Frame);
        let frames = interleaved.len() / channels;
        match channel {
            Some(ch) if ch < channels => (0..frames)
                .map(|i| interleaved[i * channels + ch])
                .collect(),
            Some(_) => Vec::new(),
            None => (0..frames)
                .map(|i| {
                    (0..channels)
                        .map(|c| interleaved[i * channels + c])
                        .sum::<f32>()
                })
                .collect(),
        }
    }
}
