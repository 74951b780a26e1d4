//! Streaming decode cache: accumulate, resample, normalise, store
//!
//! Decoders push interleaved or planar frames into a `CodedAudioReader`
//! incrementally and call `finish_decode_cache` when done; afterwards the
//! cached PCM is randomly accessible through `get_interleaved_frames`.
//! The cache lives either in memory or in a float WAV temp file that the
//! reader deletes on drop.
//!
//! States: uninitialised until the first decoder output establishes channel
//! count and file rate; initialised while samples stream in; finished once
//! the write side is closed. Reads before initialisation return empty. In
//! memory mode, mid-decode reads serve whatever the cache currently holds;
//! in temp-file mode reads return empty until finished (the file header is
//! not valid while the writer still owns it).

use crate::audio::resampler::StreamResampler;
use crate::audio::wav_cache::{create_cache_writer, WavCacheReader};
use crate::base::Serialiser;
use crate::error::{Error, Result};
use crate::support::SessionContext;
use crate::time::Frame;
use hound::WavWriter;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Frames accumulated per pipeline push.
const CACHE_WRITE_BUFFER_FRAMES: usize = 16384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    InTemporaryFile,
    InMemory,
}

enum Sink {
    Unset,
    Memory,
    TempFile {
        writer: Option<WavWriter<BufWriter<File>>>,
    },
}

struct WriteState {
    initialised: bool,
    cache_mode: CacheMode,
    file_rate: f64,
    sample_rate: f64,
    channel_count: usize,
    buffer: Vec<f32>,
    resampler: Option<StreamResampler>,
    file_frame_count: Frame,
    frame_count: Frame,
    max: f32,
    gain: f32,
    sink: Sink,
}

/// Decode→resample→normalise→cache pipeline with random-access read-back.
pub struct CodedAudioReader {
    instance_id: Uuid,
    target_rate: f64,
    normalised: bool,
    temp_dir: PathBuf,
    cache_file_path: Mutex<Option<PathBuf>>,
    cache_reader: Mutex<Option<Arc<WavCacheReader>>>,
    write: Mutex<WriteState>,
    data: Mutex<Vec<f32>>,
    serialiser: Mutex<Option<Serialiser>>,
    finished: AtomicBool,
}

impl CodedAudioReader {
    /// `target_rate` of 0 means "use the source rate".
    pub fn new(
        ctx: &SessionContext,
        cache_mode: CacheMode,
        target_rate: f64,
        normalised: bool,
    ) -> Self {
        debug!(
            ?cache_mode,
            target_rate,
            normalised,
            "coded audio reader created"
        );
        CodedAudioReader {
            instance_id: Uuid::new_v4(),
            target_rate,
            normalised,
            temp_dir: ctx.temp().path().to_path_buf(),
            cache_file_path: Mutex::new(None),
            cache_reader: Mutex::new(None),
            write: Mutex::new(WriteState {
                initialised: false,
                cache_mode,
                file_rate: 0.0,
                sample_rate: target_rate,
                channel_count: 0,
                buffer: Vec::new(),
                resampler: None,
                file_frame_count: 0,
                frame_count: 0,
                max: 0.0,
                gain: 1.0,
                sink: Sink::Unset,
            }),
            data: Mutex::new(Vec::new()),
            serialiser: Mutex::new(None),
            finished: AtomicBool::new(false),
        }
    }

    /// Take the process-wide named lock for the duration of a decode that
    /// uses a non-reentrant library.
    pub fn start_serialised(&self, id: &str) {
        debug!(id, "start serialised decode section");
        *self.serialiser.lock().unwrap() = Some(Serialiser::new(id));
    }

    pub fn end_serialised(&self) {
        debug!("end serialised decode section");
        *self.serialiser.lock().unwrap() = None;
    }

    /// Called by the decoder once channel count and file rate are known.
    pub fn initialise_decode_cache(&self, file_rate: f64, channel_count: usize) -> Result<()> {
        let mut w = self.write.lock().unwrap();

        if w.initialised {
            return Err(Error::InvalidState(
                "decode cache already initialised".to_string(),
            ));
        }
        if file_rate == 0.0 || channel_count == 0 {
            return Err(Error::FileOperationFailed {
                path: PathBuf::from("(coded file)"),
                operation: "file sample rate or channel count unknown".to_string(),
            });
        }

        w.file_rate = file_rate;
        if self.target_rate == 0.0 {
            w.sample_rate = file_rate;
            debug!(rate = file_rate, "cache rate taken from file");
        } else {
            w.sample_rate = self.target_rate;
        }
        w.channel_count = channel_count;
        w.buffer = Vec::with_capacity(CACHE_WRITE_BUFFER_FRAMES * channel_count);

        if w.file_rate != w.sample_rate {
            debug!(from = w.file_rate, to = w.sample_rate, "resampling decode");
            let ratio = w.sample_rate / w.file_rate;
            w.resampler = Some(StreamResampler::new(
                channel_count,
                CACHE_WRITE_BUFFER_FRAMES,
                ratio,
            )?);
        }

        if w.cache_mode == CacheMode::InTemporaryFile {
            let path = self
                .temp_dir
                .join(format!("decoded_{}.wav", self.instance_id.simple()));
            match create_cache_writer(&path, channel_count, w.sample_rate) {
                Ok(writer) => {
                    w.sink = Sink::TempFile {
                        writer: Some(writer),
                    };
                    *self.cache_file_path.lock().unwrap() = Some(path);
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to open cache file, falling back to in-memory cache"
                    );
                    w.cache_mode = CacheMode::InMemory;
                }
            }
        }

        if w.cache_mode == CacheMode::InMemory {
            w.sink = Sink::Memory;
            self.data.lock().unwrap().clear();
        }

        w.initialised = true;
        Ok(())
    }

    /// Push interleaved decoded frames through the pipeline.
    pub fn add_samples_interleaved(&self, samples: &[f32]) -> Result<()> {
        let mut w = self.write.lock().unwrap();
        if !w.initialised {
            return Ok(());
        }
        let full = CACHE_WRITE_BUFFER_FRAMES * w.channel_count;
        for &sample in samples {
            w.buffer.push(sample);
            if w.buffer.len() == full {
                let mut buf = std::mem::take(&mut w.buffer);
                self.push_buffer(&mut w, &buf, false)?;
                buf.clear();
                w.buffer = buf;
            }
        }
        Ok(())
    }

    /// Push planar decoded frames (one slice per channel).
    pub fn add_samples_planar(&self, channels: &[&[f32]]) -> Result<()> {
        let frames = channels.first().map(|c| c.len()).unwrap_or(0);
        let mut interleaved = Vec::with_capacity(frames * channels.len());
        for i in 0..frames {
            for channel in channels {
                interleaved.push(channel[i]);
            }
        }
        self.add_samples_interleaved(&interleaved)
    }

    /// Close the write side: flush the partial buffer (with the resampler's
    /// final pad if applicable) and make the cache readable.
    pub fn finish_decode_cache(&self) -> Result<()> {
        let mut w = self.write.lock().unwrap();

        if !w.initialised {
            warn!("finish_decode_cache: cache was never initialised");
            return Ok(());
        }
        if self.finished.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut buf = std::mem::take(&mut w.buffer);
        let whole = (buf.len() / w.channel_count) * w.channel_count;
        buf.truncate(whole);
        self.push_buffer(&mut w, &buf, true)?;

        w.resampler = None;

        if let Sink::TempFile { writer } = &mut w.sink {
            if let Some(writer) = writer.take() {
                writer
                    .finalize()
                    .map_err(|e| Error::CacheWrite(e.to_string()))?;
            }
            let path = self.cache_file_path.lock().unwrap().clone();
            if let Some(path) = path {
                *self.cache_reader.lock().unwrap() = Some(Arc::new(WavCacheReader::open(&path)?));
            }
        }

        self.finished.store(true, Ordering::SeqCst);
        debug!(
            frames = w.frame_count,
            file_frames = w.file_frame_count,
            "decode cache finished"
        );
        Ok(())
    }

    fn push_buffer(&self, w: &mut WriteState, samples: &[f32], final_push: bool) -> Result<()> {
        let frames = if w.channel_count > 0 {
            (samples.len() / w.channel_count) as Frame
        } else {
            0
        };
        w.file_frame_count += frames;

        if w.resampler.is_none() {
            return self.push_non_resampling(w, samples);
        }

        if frames > 0 {
            let mut resampler = w.resampler.take().unwrap();
            let result = resampler.resample_interleaved(samples);
            w.resampler = Some(resampler);
            let out = result?;
            self.push_non_resampling(w, &out)?;
        }

        if final_push {
            let ratio = w.sample_rate / w.file_rate;
            let expected = (w.file_frame_count as f64 * ratio).round() as Frame;

            // enough zero padding to flush the conversion tail
            let equivalent_in = (w.frame_count as f64 / ratio).ceil() as Frame;
            let pad_frames = (w.file_frame_count - equivalent_in + 1).max(1);
            debug!(
                frame_count = w.frame_count,
                file_frame_count = w.file_frame_count,
                pad_frames,
                "final resample pad"
            );

            let padding = vec![0.0f32; pad_frames as usize * w.channel_count];
            let mut resampler = w.resampler.take().unwrap();
            let result = resampler.resample_interleaved(&padding);
            w.resampler = Some(resampler);
            let mut out = result?;

            let out_frames = (out.len() / w.channel_count) as Frame;
            let keep = out_frames.min((expected - w.frame_count).max(0));
            out.truncate(keep as usize * w.channel_count);
            self.push_non_resampling(w, &out)?;
        }

        Ok(())
    }

    fn push_non_resampling(&self, w: &mut WriteState, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        if self.normalised {
            for &v in samples {
                let a = v.abs();
                if a > w.max {
                    w.max = a;
                    w.gain = 1.0 / w.max;
                }
            }
        }

        w.frame_count += (samples.len() / w.channel_count) as Frame;

        match &mut w.sink {
            Sink::TempFile { writer } => {
                let mut failed = false;
                match writer.as_mut() {
                    Some(writer_ref) => {
                        for &v in samples {
                            let v = if self.normalised { v } else { v.clamp(-1.0, 1.0) };
                            if writer_ref.write_sample(v).is_err() {
                                failed = true;
                                break;
                            }
                        }
                    }
                    None => {
                        return Err(Error::InvalidState(
                            "cache write after finish".to_string(),
                        ));
                    }
                }
                if failed {
                    *writer = None;
                    return Err(Error::InsufficientDiscSpace {
                        directory: self.temp_dir.clone(),
                    });
                }
            }
            Sink::Memory => {
                let mut data = self.data.lock().unwrap();
                if self.normalised {
                    data.extend_from_slice(samples);
                } else {
                    data.extend(samples.iter().map(|v| v.clamp(-1.0, 1.0)));
                }
            }
            Sink::Unset => {
                return Err(Error::InvalidState("cache sink not initialised".to_string()));
            }
        }

        Ok(())
    }

    /// Interleaved cached samples for `count` frames from `start`.
    ///
    /// Thread-safe for concurrent callers once `finish_decode_cache` has
    /// returned. In normalised mode each returned sample is scaled by the
    /// running gain; values read before the reader is finished may
    /// therefore be rescaled on later reads.
    pub fn get_interleaved_frames(&self, start: Frame, count: Frame) -> Vec<f32> {
        let (initialised, cache_mode, gain, channel_count) = {
            let w = self.write.lock().unwrap();
            (w.initialised, w.cache_mode, w.gain, w.channel_count)
        };

        if !initialised {
            debug!("get_interleaved_frames: not initialised");
            return Vec::new();
        }
        if count <= 0 || start < 0 {
            return Vec::new();
        }

        let mut frames = match cache_mode {
            CacheMode::InTemporaryFile => {
                let reader = self.cache_reader.lock().unwrap().clone();
                match reader {
                    Some(reader) => reader.interleaved_frames(start, count),
                    None => Vec::new(),
                }
            }
            CacheMode::InMemory => {
                let data = self.data.lock().unwrap();
                let ix0 = (start as usize * channel_count).min(data.len());
                let ix1 = (ix0 + count as usize * channel_count).min(data.len());
                data[ix0..ix1].to_vec()
            }
        };

        if self.normalised {
            for v in frames.iter_mut() {
                *v *= gain;
            }
        }

        frames
    }

    pub fn is_initialised(&self) -> bool {
        self.write.lock().unwrap().initialised
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Output frames cached so far (at the cache sample rate).
    pub fn frame_count(&self) -> Frame {
        self.write.lock().unwrap().frame_count
    }

    pub fn channel_count(&self) -> usize {
        self.write.lock().unwrap().channel_count
    }

    /// Cache sample rate: target rate, or the file rate if none was given.
    pub fn sample_rate(&self) -> f64 {
        self.write.lock().unwrap().sample_rate
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.write.lock().unwrap().cache_mode
    }
}

impl Drop for CodedAudioReader {
    fn drop(&mut self) {
        self.end_serialised();

        // close both sides of the cache file before unlinking it
        if let Ok(mut w) = self.write.lock() {
            if let Sink::TempFile { writer } = &mut w.sink {
                *writer = None;
            }
        }
        *self.cache_reader.lock().unwrap() = None;

        if let Some(path) = self.cache_file_path.lock().unwrap().take() {
            debug!(path = %path.display(), "deleting cache file");
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to delete cache file");
            }
        }
    }
}
