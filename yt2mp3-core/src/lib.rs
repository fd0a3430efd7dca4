//! Conversion core for yt2mp3.
//!
//! Turns a video URL into an MP3 stored under a predictable name in a local
//! output directory. Fetching and transcoding are delegated to `yt-dlp` and
//! `ffmpeg`; this crate owns locating them and the lifecycle of the files
//! they produce.

pub mod error;
pub mod services;

pub use error::{ConvertError, UpstreamKind};
pub use services::binary::{BinaryResolver, download_ffmpeg};
pub use services::converter::{ConversionService, StoredAudio};
pub use services::extractor::{ExtractJob, Extractor, YtDlpExtractor};
pub use services::slot::{OutputSlot, SlotPolicy};
