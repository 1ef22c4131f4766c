//! Audio transcoding: mu-law <-> PCM16, sample-rate conversion, base64 framing.

mod mulaw;
mod resample;

pub use mulaw::{mulaw_to_pcm16, pcm16_to_mulaw};
pub use resample::{output_len, resample, resample_to_vec};

use crate::error::{AppError, AppResult};
use base64::Engine;

const CARRIER_RATE: u32 = 8_000;
const INFERENCE_RATE: u32 = 24_000;

/// Decode a base64 mu-law (8 kHz) carrier payload into base64 PCM16 (24 kHz)
/// suitable for `input_audio_buffer.append`.
pub fn carrier_payload_to_inference_audio(payload_b64: &str) -> AppResult<String> {
    let mulaw_bytes = base64::engine::general_purpose::STANDARD
        .decode(payload_b64)
        .map_err(|e| AppError::Codec(format!("invalid base64 carrier payload: {e}")))?;

    let mut pcm8k = vec![0i16; mulaw_bytes.len()];
    mulaw_to_pcm16(&mulaw_bytes, &mut pcm8k);

    let pcm24k = resample_to_vec(&pcm8k, CARRIER_RATE, INFERENCE_RATE);
    let pcm_bytes = pcm16_to_le_bytes(&pcm24k);
    Ok(base64::engine::general_purpose::STANDARD.encode(pcm_bytes))
}

/// Decode a base64 PCM16 (24 kHz) inference audio delta into a base64 mu-law
/// (8 kHz) carrier media payload.
pub fn inference_audio_to_carrier_payload(audio_b64: &str) -> AppResult<String> {
    let pcm_bytes = base64::engine::general_purpose::STANDARD
        .decode(audio_b64)
        .map_err(|e| AppError::Codec(format!("invalid base64 inference audio: {e}")))?;

    let pcm24k = le_bytes_to_pcm16(&pcm_bytes)?;
    let pcm8k = resample_to_vec(&pcm24k, INFERENCE_RATE, CARRIER_RATE);

    let mut mulaw_bytes = vec![0u8; pcm8k.len()];
    pcm16_to_mulaw(&pcm8k, &mut mulaw_bytes);
    Ok(base64::engine::general_purpose::STANDARD.encode(mulaw_bytes))
}

fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

fn le_bytes_to_pcm16(bytes: &[u8]) -> AppResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(AppError::Codec("PCM16 byte buffer has odd length".into()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect())
}
