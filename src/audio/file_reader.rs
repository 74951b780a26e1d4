//! Audio file reader: symphonia decode feeding the decode cache
//!
//! Probes a file, then streams decoded packets into a [`CodedAudioReader`]
//! either inline (`DecodeMode::AtOnce`) or on a worker thread
//! (`DecodeMode::Threaded`). Channel count and sample rate are known from
//! the probe, so the cache is initialised before any decoding starts.
//!
//! MP3 decoding is wrapped in the process-wide "mpa-decode" serialisation
//! lock: the legacy decoder path must never run concurrently.

use crate::audio::coded::{CacheMode, CodedAudioReader};
use crate::error::{Error, Result};
use crate::support::SessionContext;
use crate::time::Frame;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_MP3, CODEC_TYPE_NULL};
use symphonia::core::conv::IntoSample;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Decode fully before the constructor returns.
    AtOnce,
    /// Decode on a worker thread; readers poll completion.
    Threaded,
}

struct DecodeJob {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    total_frames: Option<u64>,
    serialise: bool,
}

/// Asynchronous producer of cached PCM from a compressed audio file.
pub struct AudioFileReader {
    cache: Arc<CodedAudioReader>,
    path: PathBuf,
    completion: AtomicI32,
    cancelled: Arc<AtomicBool>,
    error: Mutex<Option<String>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    on_finished: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
}

impl AudioFileReader {
    pub fn new(
        ctx: &SessionContext,
        path: &Path,
        decode_mode: DecodeMode,
        cache_mode: CacheMode,
        target_rate: f64,
        normalised: bool,
    ) -> Result<Arc<Self>> {
        debug!(path = %path.display(), ?decode_mode, "opening audio file");

        let file = std::fs::File::open(path).map_err(|e| Error::FileOperationFailed {
            path: path.to_path_buf(),
            operation: format!("open for reading: {}", e),
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::Decode(format!("failed to probe format: {}", e)))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode("no audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| Error::Decode("sample rate not found".to_string()))?;
        let channels = codec_params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| Error::Decode("channel count not found".to_string()))?;

        debug!(sample_rate, channels, "audio format");

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("failed to create decoder: {}", e)))?;

        let cache = Arc::new(CodedAudioReader::new(
            ctx,
            cache_mode,
            target_rate,
            normalised,
        ));
        cache.initialise_decode_cache(sample_rate as f64, channels)?;

        let job = DecodeJob {
            format,
            decoder,
            track_id,
            channels,
            total_frames: codec_params.n_frames,
            serialise: codec_params.codec == CODEC_TYPE_MP3,
        };

        let reader = Arc::new(AudioFileReader {
            cache,
            path: path.to_path_buf(),
            completion: AtomicI32::new(0),
            cancelled: Arc::new(AtomicBool::new(false)),
            error: Mutex::new(None),
            thread: Mutex::new(None),
            on_finished: Mutex::new(Vec::new()),
        });

        match decode_mode {
            DecodeMode::AtOnce => {
                reader.decode_loop(job);
            }
            DecodeMode::Threaded => {
                let worker = Arc::clone(&reader);
                let handle = std::thread::spawn(move || {
                    worker.decode_loop(job);
                });
                *reader.thread.lock().unwrap() = Some(handle);
            }
        }

        Ok(reader)
    }

    fn decode_loop(&self, mut job: DecodeJob) {
        if job.serialise {
            self.cache.start_serialised("mpa-decode");
        }

        let mut frames_done: u64 = 0;
        let mut interleaved = Vec::new();

        while !self.cancelled.load(Ordering::SeqCst) {
            let packet = match job.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("reached end of file");
                    break;
                }
                Err(e) => {
                    warn!("error reading packet: {}", e);
                    break;
                }
            };

            if packet.track_id() != job.track_id {
                continue;
            }

            match job.decoder.decode(&packet) {
                Ok(decoded) => {
                    interleaved.clear();
                    interleave_to_f32(&decoded, &mut interleaved);
                    frames_done += (interleaved.len() / job.channels) as u64;
                    if let Err(e) = self.cache.add_samples_interleaved(&interleaved) {
                        self.fail(format!("cache write failed: {}", e));
                        break;
                    }
                    if let Some(total) = job.total_frames {
                        if total > 0 {
                            let pct = ((frames_done * 100) / total).clamp(1, 99) as i32;
                            self.completion.store(pct, Ordering::SeqCst);
                        }
                    }
                }
                Err(e) => {
                    // transient decoder error: log and keep going
                    warn!("decode error: {}", e);
                    continue;
                }
            }
        }

        if job.serialise {
            self.cache.end_serialised();
        }

        if let Err(e) = self.cache.finish_decode_cache() {
            self.fail(format!("failed to finish decode cache: {}", e));
        }

        self.completion.store(100, Ordering::SeqCst);
        debug!(
            path = %self.path.display(),
            frames = self.cache.frame_count(),
            "decode finished"
        );

        let callbacks = self.on_finished.lock().unwrap();
        for cb in callbacks.iter() {
            cb();
        }
    }

    fn fail(&self, message: String) {
        warn!(path = %self.path.display(), "{}", message);
        *self.error.lock().unwrap() = Some(message);
    }

    /// Register a hook run on the decoding thread after the cache is
    /// finished and completion has reached 100.
    pub fn on_finished(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_finished.lock().unwrap().push(Box::new(callback));
    }

    pub fn is_ok(&self) -> bool {
        self.error.lock().unwrap().is_none()
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }

    pub fn completion(&self) -> i32 {
        self.completion.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.cache.is_finished()
    }

    /// Ask the decode worker to stop at its next packet boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cache(&self) -> &Arc<CodedAudioReader> {
        &self.cache
    }

    pub fn frame_count(&self) -> Frame {
        self.cache.frame_count()
    }

    pub fn channel_count(&self) -> usize {
        self.cache.channel_count()
    }

    pub fn sample_rate(&self) -> f64 {
        self.cache.sample_rate()
    }

    pub fn get_interleaved_frames(&self, start: Frame, count: Frame) -> Vec<f32> {
        self.cache.get_interleaved_frames(start, count)
    }
}

impl Drop for AudioFileReader {
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            // the worker itself may drop the last reference
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Interleave a decoded planar buffer into f32 samples.
fn interleave_to_f32(decoded: &AudioBufferRef, out: &mut Vec<f32>) {
    match decoded {
        AudioBufferRef::U8(buf) => interleave(buf, out),
        AudioBufferRef::U16(buf) => interleave(buf, out),
        AudioBufferRef::U24(buf) => interleave(buf, out),
        AudioBufferRef::U32(buf) => interleave(buf, out),
        AudioBufferRef::S8(buf) => interleave(buf, out),
        AudioBufferRef::S16(buf) => interleave(buf, out),
        AudioBufferRef::S24(buf) => interleave(buf, out),
        AudioBufferRef::S32(buf) => interleave(buf, out),
        AudioBufferRef::F32(buf) => interleave(buf, out),
        AudioBufferRef::F64(buf) => interleave(buf, out),
    }
}

fn interleave<T>(buf: &AudioBuffer<T>, out: &mut Vec<f32>)
where
    T: Sample + IntoSample<f32>,
{
    let channels = buf.spec().channels.count();
    let frames = buf.frames();
    out.reserve(frames * channels);
    for frame in 0..frames {
        for ch in 0..channels {
            out.push(buf.chan(ch)[frame].into_sample());
        }
    }
}
