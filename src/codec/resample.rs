//! Linear-interpolation sample-rate conversion for PCM16 audio.
//!
//! No persistent state between calls; each call resamples an independent
//! buffer. Used for the 8 kHz (carrier) <-> 24 kHz (inference) conversion.

/// Number of output samples `resample` produces for a given input length
/// and rate pair: `ceil(input_len * to_rate / from_rate)`.
pub fn output_len(input_len: usize, from_rate: u32, to_rate: u32) -> usize {
    if input_len == 0 {
        return 0;
    }
    let numerator = input_len as u64 * to_rate as u64;
    let denominator = from_rate as u64;
    ((numerator + denominator - 1) / denominator) as usize
}

/// Resample `input` from `from_rate` Hz to `to_rate` Hz using linear
/// interpolation, writing into `out`. `out.len()` must equal
/// `output_len(input.len(), from_rate, to_rate)`.
pub fn resample(input: &[i16], from_rate: u32, to_rate: u32, out: &mut [i16]) {
    debug_assert_eq!(out.len(), output_len(input.len(), from_rate, to_rate));

    if input.is_empty() || out.is_empty() {
        return;
    }
    if from_rate == to_rate {
        out.copy_from_slice(input);
        return;
    }

    let last = input.len() - 1;
    for (i, o) in out.iter_mut().enumerate() {
        let src_pos = (i as u64 * from_rate as u64) as f64 / to_rate as f64;
        let floor_idx = src_pos.floor() as usize;
        let frac = src_pos - floor_idx as f64;
        let ceil_idx = (floor_idx + 1).min(last);
        let floor_idx = floor_idx.min(last);

        let a = input[floor_idx] as f64;
        let b = input[ceil_idx] as f64;
        let value = a * (1.0 - frac) + b * frac;
        *o = value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
    }
}

/// Convenience wrapper allocating the output buffer.
pub fn resample_to_vec(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    let mut out = vec![0i16; output_len(input.len(), from_rate, to_rate)];
    resample(input, from_rate, to_rate, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_rates_equal() {
        let input = [1i16, 2, 3, 4, 5];
        let out = resample_to_vec(&input, 8_000, 8_000);
        assert_eq!(out, input);
    }

    #[test]
    fn output_length_matches_formula() {
        assert_eq!(output_len(160, 8_000, 24_000), 480);
        assert_eq!(output_len(480, 24_000, 8_000), 160);
        assert_eq!(output_len(0, 8_000, 24_000), 0);
    }

    #[test]
    fn upsample_8k_to_24k_triples_length() {
        let input = vec![100i16; 160];
        let out = resample_to_vec(&input, 8_000, 24_000);
        assert_eq!(out.len(), 480);
        // constant input resamples to a (near-)constant output
        assert!(out.iter().all(|&s| (s - 100).abs() <= 1));
    }

    #[test]
    fn downsample_24k_to_8k_thirds_length() {
        let input = vec![100i16; 480];
        let out = resample_to_vec(&input, 24_000, 8_000);
        assert_eq!(out.len(), 160);
    }

    #[test]
    fn linear_ramp_interpolates_between_known_points() {
        let input = [0i16, 10];
        // from_rate == to_rate would be identity; use a 2x upsample instead
        let out = resample_to_vec(&input, 8_000, 16_000);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], 0);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn identity_resample_preserves_samples(
            samples in prop::collection::vec(any::<i16>(), 0..320),
            rate in 8_000u32..48_000u32,
        ) {
            let out = resample_to_vec(&samples, rate, rate);
            prop_assert_eq!(out, samples);
        }

        #[test]
        fn output_length_is_always_the_formula(
            len in 0usize..2000,
            from_rate in 4_000u32..48_000u32,
            to_rate in 4_000u32..48_000u32,
        ) {
            let samples = vec![0i16; len];
            let out = resample_to_vec(&samples, from_rate, to_rate);
            prop_assert_eq!(out.len(), output_len(len, from_rate, to_rate));
        }
    }
}
