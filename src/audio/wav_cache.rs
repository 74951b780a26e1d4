//! Float WAV decode-cache file access
//!
//! The temp-file cache sink writes 32-bit float WAV incrementally via
//! hound; once the write side is finalised the same file is served through
//! a seekable reader. The reader is safe for concurrent use: each call
//! locks, seeks, and reads.

use crate::error::{Error, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Mutex;
use crate::time::Frame;

/// Create the float32 cache writer. The sample rate is rounded to the
/// nearest integer for the container header.
pub fn create_cache_writer(
    path: &Path,
    channels: usize,
    sample_rate: f64,
) -> Result<WavWriter<BufWriter<File>>> {
    let spec = WavSpec {
        channels: channels as u16,
        sample_rate: sample_rate.round() as u32,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    WavWriter::create(path, spec).map_err(|e| Error::CacheWrite(e.to_string()))
}

/// Random-access reader over a finalised cache file.
pub struct WavCacheReader {
    inner: Mutex<WavReader<BufReader<File>>>,
    channels: usize,
    frame_count: Frame,
}

impl WavCacheReader {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path).map_err(|e| Error::FileOperationFailed {
            path: path.to_path_buf(),
            operation: format!("open cache file: {}", e),
        })?;
        let channels = reader.spec().channels as usize;
        let frame_count = reader.duration() as Frame;
        Ok(WavCacheReader {
            inner: Mutex::new(reader),
            channels,
            frame_count,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frame_count(&self) -> Frame {
        self.frame_count
    }

    /// Interleaved samples for `count` frames from `start`, clipped to the
    /// file extent.
    pub fn interleaved_frames(&self, start: Frame, count: Frame) -> Vec<f32> {
        if start < 0 || count <= 0 || start >= self.frame_count {
            return Vec::new();
        }
        let count = count.min(self.frame_count - start);

        let mut reader = self.inner.lock().unwrap();
        if reader.seek(start as u32).is_err() {
            return Vec::new();
        }
        let wanted = count as usize * self.channels;
        reader
            .samples::<f32>()
            .take(wanted)
            .filter_map(|s| s.ok())
            .collect()
    }
}
