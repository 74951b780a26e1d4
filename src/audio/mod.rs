//! Coded audio handling: the decode cache pipeline, its streaming
//! resampler, the float WAV cache file, and the symphonia-driven file
//! reader that feeds it.

mod coded;
mod file_reader;
mod resampler;
mod wav_cache;

pub use coded::{CacheMode, CodedAudioReader};
pub use file_reader::{AudioFileReader, DecodeMode};
pub use resampler::StreamResampler;
pub use wav_cache::WavCacheReader;
