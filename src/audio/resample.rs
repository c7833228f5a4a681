// Sample-rate and sample-format conversion for captured audio
//
// Capture devices hand us f32 samples in [-1, 1] at their native rate. The
// recognition service wants 16 kHz mono signed 16-bit little-endian PCM. These
// helpers are pure so they can run inside a device callback.

/// Sample rate required by the recognition service
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Resample by block averaging
///
/// Each output sample is the mean of the input samples that fall in its time
/// slot. Equal rates pass through unchanged. When the input rate is below the
/// target some slots are empty; those repeat the previous output sample.
pub fn downsample(input: &[f32], in_rate: u32, out_rate: u32) -> Vec<f32> {
    if in_rate == out_rate || input.is_empty() || in_rate == 0 || out_rate == 0 {
        return input.to_vec();
    }

    let ratio = in_rate as f64 / out_rate as f64;
    let out_len = (input.len() as f64 / ratio).round() as usize;
    let mut output = Vec::with_capacity(out_len);

    let mut offset = 0usize;
    let mut last = 0.0f32;
    for i in 0..out_len {
        let next_offset = ((i + 1) as f64 * ratio).round() as usize;
        let end = next_offset.min(input.len());

        let value = if offset < end {
            let slot = &input[offset..end];
            slot.iter().sum::<f32>() / slot.len() as f32
        } else {
            last
        };

        output.push(value);
        last = value;
        offset = next_offset.max(offset);
    }

    output
}

/// Convert one float sample to i16, clipping to [-1, 1] first
///
/// Negative values scale by 32768 and the rest by 32767, truncating toward zero.
#[inline]
pub fn float_to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Inverse of [`float_to_pcm16`]
#[inline]
pub fn pcm16_to_float(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / 32768.0
    } else {
        sample as f32 / 32767.0
    }
}

/// Resample to the target rate and encode as little-endian PCM16 bytes
///
/// Output length is always 2 × the resampled sample count.
pub fn to_pcm16_bytes(input: &[f32], in_rate: u32) -> Vec<u8> {
    let resampled = downsample(input, in_rate, TARGET_SAMPLE_RATE);
    let mut bytes = Vec::with_capacity(resampled.len() * 2);
    for &s in &resampled {
        bytes.extend_from_slice(&float_to_pcm16(s).to_le_bytes());
    }
    bytes
}

/// Average interleaved channels down to one
pub fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
