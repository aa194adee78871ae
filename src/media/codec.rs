use tracing::error;

use crate::error::{CallError, Result};

pub const SAMPLE_RATE: u32 = 48000;
/// 20ms at 48kHz mono.
pub const FRAME_SAMPLES: usize = 960;

/// Opus encoder wrapper: 48kHz mono, 20ms frames (960 samples).
pub struct OpusEncoder {
    encoder: opus::Encoder,
}

impl OpusEncoder {
    pub fn new() -> Result<Self> {
        let encoder = opus::Encoder::new(SAMPLE_RATE, opus::Channels::Mono, opus::Application::Voip)
            .map_err(|e| CallError::Media(format!("Failed to create Opus encoder: {}", e)))?;
        Ok(Self { encoder })
    }

    /// Encode a 960-sample f32 PCM frame to Opus bytes.
    pub fn encode(&mut self, pcm: &[f32]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; 4000]; // max opus frame
        let len = self
            .encoder
            .encode_float(pcm, &mut output)
            .map_err(|e| {
                error!("Opus encode error: {}", e);
                CallError::Media(format!("Opus encode error: {}", e))
            })?;
        output.truncate(len);
        Ok(output)
    }
}

/// Opus decoder wrapper: 48kHz mono, 20ms frames (960 samples).
pub struct OpusDecoder {
    decoder: opus::Decoder,
}

impl OpusDecoder {
    pub fn new() -> Result<Self> {
        let decoder = opus::Decoder::new(SAMPLE_RATE, opus::Channels::Mono)
            .map_err(|e| CallError::Media(format!("Failed to create Opus decoder: {}", e)))?;
        Ok(Self { decoder })
    }

    /// Decode Opus bytes to f32 PCM (up to 120ms).
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<f32>> {
        let mut output = vec![0.0f32; FRAME_SAMPLES * 6];
        let len = self
            .decoder
            .decode_float(data, &mut output, false)
            .map_err(|e| CallError::Media(format!("Opus decode error: {}", e)))?;
        output.truncate(len);
        Ok(output)
    }
}

/// One 20ms frame of a sine tone, continuing from `phase` (in samples).
pub fn tone_frame(freq_hz: f32, amplitude: f32, phase: &mut u64) -> Vec<f32> {
    let mut frame = Vec::with_capacity(FRAME_SAMPLES);
    for _ in 0..FRAME_SAMPLES {
        let t = *phase as f32 / SAMPLE_RATE as f32;
        frame.push((t * freq_hz * std::f32::consts::TAU).sin() * amplitude);
        *phase += 1;
    }
    frame
}
