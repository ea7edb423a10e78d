//! Sample-width handling and amplitude statistics.
//!
//! The codec engine works on 32-bit samples; callers submit and receive raw
//! little-endian PCM bytes at 8 or 16 bits per sample. `SampleWidth` carries
//! the width once so conversion is a single parameterised path instead of
//! duplicated per-width branches.

/// PCM sample width accepted at the session boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleWidth {
    /// Signed 8-bit PCM.
    Pcm8,
    /// Signed 16-bit little-endian PCM.
    Pcm16,
}

impl SampleWidth {
    /// Map a bits-per-sample value to a width, if supported.
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(SampleWidth::Pcm8),
            16 => Some(SampleWidth::Pcm16),
            _ => None,
        }
    }

    /// Bytes occupied by one sample.
    pub fn bytes(self) -> usize {
        match self {
            SampleWidth::Pcm8 => 1,
            SampleWidth::Pcm16 => 2,
        }
    }

    /// Bits per sample.
    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }

    /// Largest positive magnitude representable at this width.
    pub fn max_magnitude(self) -> f32 {
        match self {
            SampleWidth::Pcm8 => i8::MAX as f32,
            SampleWidth::Pcm16 => i16::MAX as f32,
        }
    }

    /// Widen raw PCM bytes to 32-bit samples, appending to `out`.
    ///
    /// A trailing partial sample (odd byte count at 16 bits) is ignored.
    pub fn widen(self, bytes: &[u8], out: &mut Vec<i32>) {
        match self {
            SampleWidth::Pcm8 => {
                out.extend(bytes.iter().map(|&b| i32::from(b as i8)));
            }
            SampleWidth::Pcm16 => {
                out.extend(
                    bytes
                        .chunks_exact(2)
                        .map(|pair| i32::from(i16::from_le_bytes([pair[0], pair[1]]))),
                );
            }
        }
    }

    /// Store one 32-bit sample into `dest` at this width, little-endian.
    ///
    /// Values outside the width's range are truncated, matching the engine
    /// contract that decoded samples already fit the declared bit depth.
    pub fn narrow_into(self, sample: i32, dest: &mut [u8]) {
        match self {
            SampleWidth::Pcm8 => dest[0] = sample as i8 as u8,
            SampleWidth::Pcm16 => dest[..2].copy_from_slice(&(sample as i16).to_le_bytes()),
        }
    }
}

/// Running peak and mean amplitude over submitted samples.
///
/// Both statistics are destructive reads: the peak resets on
/// [`AmplitudeTracker::take_peak`], the mean accumulators on
/// [`AmplitudeTracker::take_average`]. The mean is sampled once per channel
/// group so multi-channel frames are not over-weighted.
#[derive(Debug)]
pub struct AmplitudeTracker {
    channels: usize,
    peak: f32,
    sum: f32,
    count: u64,
}

impl AmplitudeTracker {
    pub fn new(channels: u32) -> Self {
        Self {
            channels: channels.max(1) as usize,
            peak: 0.0,
            sum: 0.0,
            count: 0,
        }
    }

    /// Fold a run of freshly converted samples into the statistics.
    ///
    /// `width` is the width the samples were submitted at; amplitudes are
    /// normalised to that width's maximum magnitude, so a full-scale sample
    /// reads as 1.0.
    pub fn record(&mut self, samples: &[i32], width: SampleWidth) {
        let max = width.max_magnitude();
        for (i, &sample) in samples.iter().enumerate() {
            let magnitude = if sample < 0 {
                // The negative range is one wider than the positive one;
                // shift by one before negating so i16::MIN maps to i16::MAX.
                -(sample + 1)
            } else {
                sample
            };
            let amp = magnitude as f32 / max;

            if amp > self.peak {
                self.peak = amp;
            }
            if i % self.channels == 0 {
                self.sum += amp;
                self.count += 1;
            }
        }
    }

    /// Peak amplitude since the last call; resets the peak to zero.
    pub fn take_peak(&mut self) -> f32 {
        std::mem::take(&mut self.peak)
    }

    /// Mean amplitude since the last call; resets the accumulators.
    ///
    /// Returns 0.0 when no samples were recorded since the last call.
    pub fn take_average(&mut self) -> f32 {
        let result = if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f32
        };
        self.sum = 0.0;
        self.count = 0;
        result
    }
}
