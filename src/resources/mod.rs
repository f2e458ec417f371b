//! Media resources loaded once at startup
//!
//! The catalog holds the pre-segmented Opus clips played by the audio loop
//! and the font used for video overlays. It is immutable after loading and
//! shared between sessions behind an `Arc`.

use ab_glyph::FontVec;
use bytes::Bytes;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use webrtc::media::io::ogg_reader::OggReader;

use crate::config::ResourceConfig;
use crate::error::{AppError, Result};

/// Granule position of a page on which no packet ends
const NO_GRANULE: u64 = u64::MAX;

/// One Ogg page worth of Opus audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPage {
    pub payload: Bytes,
    /// Cumulative sample count at the end of this page
    pub granule_position: u64,
}

/// Ordered pages of a single clip
#[derive(Debug, Clone, Default)]
pub struct AudioClip {
    pub name: String,
    pub pages: Vec<AudioPage>,
}

impl AudioClip {
    pub fn new(name: impl Into<String>, pages: Vec<AudioPage>) -> Self {
        Self {
            name: name.into(),
            pages,
        }
    }

    /// Parse an Ogg/Opus stream, dropping the Opus header pages
    ///
    /// The identification header is validated by the reader; reading stops
    /// at the first page that cannot be parsed.
    pub fn from_ogg(name: &str, data: impl Into<Bytes>) -> Result<Self> {
        let data: Bytes = data.into();
        let (mut reader, header) = OggReader::new(Cursor::new(data), false)
            .map_err(|e| AppError::resource(name, e))?;
        debug!("{}: Opus stream at {} Hz", name, header.sample_rate);

        let mut pages = Vec::new();
        loop {
            let (payload, page_header) = match reader.parse_next_page() {
                Ok(page) => page,
                Err(e) => {
                    if pages.is_empty() {
                        return Err(AppError::resource(name, e));
                    }
                    debug!("{}: stopped after {} pages: {}", name, pages.len(), e);
                    break;
                }
            };
            if payload.starts_with(b"OpusTags") || payload.starts_with(b"OpusHead") {
                continue;
            }
            pages.push(AudioPage {
                payload: payload.freeze(),
                granule_position: page_header.granule_position,
            });
        }

        Ok(Self::new(name, pages))
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Playback duration of every page, derived from granule deltas
    ///
    /// The previous granule starts at zero for each clip; a decreasing
    /// granule yields a zero duration instead of wrapping. Pages without a
    /// granule (`-1`) play for zero time and keep the previous position.
    pub fn page_durations(&self, sample_rate: u32) -> Vec<Duration> {
        let mut last = 0u64;
        self.pages
            .iter()
            .map(|page| {
                if page.granule_position == NO_GRANULE {
                    return Duration::ZERO;
                }
                let samples = page.granule_position.saturating_sub(last);
                last = page.granule_position;
                samples_to_duration(samples, sample_rate)
            })
            .collect()
    }

    pub fn total_duration(&self, sample_rate: u32) -> Duration {
        self.page_durations(sample_rate).into_iter().sum()
    }
}

/// Convert a sample count to wall-clock time
pub fn samples_to_duration(samples: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let micros = samples as u128 * 1_000_000 / sample_rate as u128;
    Duration::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
}

/// Immutable audio clips and overlay font
pub struct MediaResourceCatalog {
    pub greeting: AudioClip,
    pub notice: AudioClip,
    pub filler: AudioClip,
    font: Option<FontVec>,
}

impl MediaResourceCatalog {
    /// Load every resource named in `config`; any failure is fatal
    pub fn load(config: &ResourceConfig) -> Result<Self> {
        let greeting = load_clip(&config.path(&config.greeting), &config.greeting)?;
        let notice = load_clip(&config.path(&config.notice), &config.notice)?;
        let filler = load_clip(&config.path(&config.filler), &config.filler)?;

        let font_path = config.path(&config.font);
        let font_bytes = std::fs::read(&font_path)
            .map_err(|e| AppError::resource(font_path.display().to_string(), e))?;
        let font = FontVec::try_from_vec(font_bytes)
            .map_err(|e| AppError::resource(font_path.display().to_string(), e))?;

        info!(
            "Resources loaded: greeting={} pages, notice={} pages, filler={} pages, font={}",
            greeting.len(),
            notice.len(),
            filler.len(),
            config.font
        );

        Ok(Self::from_parts(greeting, notice, filler, Some(font)))
    }

    pub fn from_parts(
        greeting: AudioClip,
        notice: AudioClip,
        filler: AudioClip,
        font: Option<FontVec>,
    ) -> Self {
        Self {
            greeting,
            notice,
            filler,
            font,
        }
    }

    pub fn font(&self) -> Option<&FontVec> {
        self.font.as_ref()
    }
}

fn load_clip(path: &Path, name: &str) -> Result<AudioClip> {
    let data = std::fs::read(path).map_err(|e| AppError::resource(path.display().to_string(), e))?;
    let clip = AudioClip::from_ogg(name, data)?;
    debug!("Loaded {} ({} pages)", path.display(), clip.len());
    Ok(clip)
}
