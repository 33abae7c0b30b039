//! PCM and WAV conversions shared by ingest, ASR and the CLI

use std::io::Cursor;

use base64::Engine;

use crate::{Error, Result};

/// Decode little-endian 16-bit PCM bytes into samples
///
/// # Errors
///
/// Returns a decode error if the byte count is odd
pub fn pcm16_from_bytes(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Decode a base64 audio payload as sent by browsers and the ingest socket
///
/// A leading data-URL header (`data:audio/wav;base64,`) is stripped. Both
/// the standard and the URL-safe alphabet are accepted.
///
/// # Errors
///
/// Returns a decode error if the payload is not valid base64
pub fn decode_base64_payload(payload: &str) -> Result<Vec<u8>> {
    let raw = payload.split_once(',').map_or(payload, |(_, data)| data).trim();
    let engine = if raw.contains(['-', '_']) {
        &base64::engine::general_purpose::URL_SAFE
    } else {
        &base64::engine::general_purpose::STANDARD
    };
    Ok(engine.decode(raw)?)
}

/// Convert f32 samples to 16-bit PCM WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;

        for &sample in samples {
            // f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(sample_i16)?;
        }

        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Read a mono 16-bit WAV file into PCM samples and its sample rate
///
/// # Errors
///
/// Returns error if the data is not a mono 16-bit integer WAV
pub fn wav_to_pcm16(bytes: &[u8]) -> Result<(Vec<i16>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    if spec.channels != 1
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(Error::Audio(format!(
            "expected mono 16-bit PCM WAV, got {} channel(s) at {} bits",
            spec.channels, spec.bits_per_sample
        )));
    }

    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((samples, spec.sample_rate))
}
