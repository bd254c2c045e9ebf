//! Decoding boundary and the built-in synthetic source.
//!
//! File decoding lives outside this crate. Hosts plug in their own
//! [`Decoder`]; [`ToneDecoder`] covers testing and rehearsal without media.
use dasp_signal::{self as signal, Signal};

/// Fully decoded, de-interleaved audio.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// One sample vector per channel, all the same length.
    pub channels: Vec<Vec<f32>>,
    /// Rate the samples were decoded at.
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Frames per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

/// Why a source could not be decoded.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Source string was not understood.
    #[error("unsupported source: {0}")]
    Unsupported(String),
    /// Source parameter was malformed.
    #[error("invalid parameter `{value}` in source `{source_name}`")]
    InvalidParameter {
        /// Full source string.
        source_name: String,
        /// Offending token.
        value: String,
    },
    /// Decoded to zero frames or zero channels.
    #[error("source `{0}` produced no audio")]
    Empty(String),
}

/// Turns a source description into samples. Runs on the control thread.
pub trait Decoder: Send + Sync {
    /// Decode `source` completely.
    fn decode(&self, source: &str) -> Result<DecodedAudio, DecodeError>;
}

/// Longest source [`ToneDecoder`] accepts unless overridden.
pub const DEFAULT_MAX_SECONDS: f64 = 600.0;

/// Synthetic decoder for `tone:<hz>[:<seconds>]` and `silence[:<seconds>]`.
///
/// Lengths above the decoder's maximum are refused with
/// [`DecodeError::InvalidParameter`] before anything is allocated.
#[derive(Debug, Clone, Copy)]
pub struct ToneDecoder {
    sample_rate: u32,
    channels: usize,
    default_seconds: f64,
    max_seconds: f64,
    amplitude: f32,
}

impl ToneDecoder {
    /// Stereo tones of 10 seconds at amplitude 0.3, at most ten minutes long.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 2,
            default_seconds: 10.0,
            max_seconds: DEFAULT_MAX_SECONDS,
            amplitude: 0.3,
        }
    }

    /// Override the longest accepted source length.
    pub fn with_max_seconds(mut self, seconds: f64) -> Self {
        self.max_seconds = seconds;
        self
    }

    /// Override the channel count.
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.max(1);
        self
    }

    /// Override the peak amplitude.
    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Override the length used when a source gives none.
    pub fn with_default_seconds(mut self, seconds: f64) -> Self {
        self.default_seconds = seconds;
        self
    }

    fn parse_number(source: &str, token: &str) -> Result<f64, DecodeError> {
        token
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v > 0.0)
            .ok_or_else(|| DecodeError::InvalidParameter {
                source_name: source.to_string(),
                value: token.to_string(),
            })
    }

    fn frames_for(&self, source: &str, seconds: f64) -> Result<usize, DecodeError> {
        if seconds.is_nan() || seconds > self.max_seconds {
            return Err(DecodeError::InvalidParameter {
                source_name: source.to_string(),
                value: seconds.to_string(),
            });
        }
        let frames = (seconds * self.sample_rate as f64).round() as usize;
        if frames == 0 || self.channels == 0 {
            return Err(DecodeError::Empty(source.to_string()));
        }
        Ok(frames)
    }

    fn spread(&self, mono: Vec<f32>) -> Vec<Vec<f32>> {
        let mut channels = Vec::with_capacity(self.channels);
        for _ in 1..self.channels {
            channels.push(mono.clone());
        }
        channels.push(mono);
        channels
    }
}

impl Decoder for ToneDecoder {
    fn decode(&self, source: &str) -> Result<DecodedAudio, DecodeError> {
        let mut parts = source.split(':');
        let kind = parts.next().unwrap_or_default();
        let mono = match kind {
            "tone" => {
                let hz = match parts.next() {
                    Some(token) => Self::parse_number(source, token)?,
                    None => return Err(DecodeError::Unsupported(source.to_string())),
                };
                let seconds = match parts.next() {
                    Some(token) => Self::parse_number(source, token)?,
                    None => self.default_seconds,
                };
                let frames = self.frames_for(source, seconds)?;
                let amplitude = self.amplitude as f64;
                signal::rate(self.sample_rate as f64)
                    .const_hz(hz)
                    .sine()
                    .take(frames)
                    .map(|s| (s * amplitude) as f32)
                    .collect::<Vec<f32>>()
            }
            "silence" => {
                let seconds = match parts.next() {
                    Some(token) => Self::parse_number(source, token)?,
                    None => self.default_seconds,
                };
                vec![0.0; self.frames_for(source, seconds)?]
            }
            _ => return Err(DecodeError::Unsupported(source.to_string())),
        };
        if parts.next().is_some() {
            return Err(DecodeError::Unsupported(source.to_string()));
        }
        Ok(DecodedAudio {
            channels: self.spread(mono),
            sample_rate: self.sample_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_has_requested_shape() {
        let decoder = ToneDecoder::new(48_000);
        let audio = decoder.decode("tone:440:0.5").unwrap();
        assert_eq!(audio.channels.len(), 2);
        assert_eq!(audio.frames(), 24_000);
        let peak = audio.channels[0]
            .iter()
            .fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!((peak - 0.3).abs() < 1e-3);
        assert_eq!(audio.channels[0], audio.channels[1]);
    }

    #[test]
    fn default_length_applies() {
        let decoder = ToneDecoder::new(8_000).with_default_seconds(2.0);
        assert_eq!(decoder.decode("tone:100").unwrap().frames(), 16_000);
        assert_eq!(decoder.decode("silence").unwrap().frames(), 16_000);
    }

    #[test]
    fn rejects_garbage() {
        let decoder = ToneDecoder::new(48_000);
        assert!(matches!(
            decoder.decode("song.wav"),
            Err(DecodeError::Unsupported(_))
        ));
        assert!(matches!(
            decoder.decode("tone:abc"),
            Err(DecodeError::InvalidParameter { .. })
        ));
        assert!(decoder.decode("tone:440:1:extra").is_err());
        assert!(decoder.decode("tone").is_err());
    }

    #[test]
    fn refuses_sources_past_the_length_limit() {
        let decoder = ToneDecoder::new(48_000);
        for source in ["silence:1e30", "tone:440:1e30", "tone:440:601"] {
            assert!(
                matches!(
                    decoder.decode(source),
                    Err(DecodeError::InvalidParameter { .. })
                ),
                "{source}"
            );
        }

        let short = ToneDecoder::new(1_000).with_max_seconds(2.0);
        assert!(short.decode("tone:100:2").is_ok());
        assert!(matches!(
            short.decode("silence:2.5"),
            Err(DecodeError::InvalidParameter { .. })
        ));
        let long_default = short.with_default_seconds(5.0);
        assert!(long_default.decode("silence").is_err());
    }
}
