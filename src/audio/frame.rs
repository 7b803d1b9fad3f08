/// One fixed-size unit of captured audio (16-bit PCM, mono)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Monotonically increasing sequence number within a session
    pub sequence: u64,
    /// Capture timestamp in milliseconds since the session started
    pub timestamp_ms: u64,
    /// Mono i16 PCM samples
    pub samples: Vec<i16>,
}

impl AudioFrame {
    /// Serialize samples as raw little-endian PCM16 bytes, the outbound
    /// wire payload (no header, no framing beyond the message boundary).
    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        self.samples
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect()
    }
}

/// Convert floating-point samples in [-1.0, 1.0] to i16 by clamping to the
/// range and scaling by the maximum positive 16-bit magnitude.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// Downmix interleaved multichannel samples to mono by averaging channels
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
        .collect()
}
