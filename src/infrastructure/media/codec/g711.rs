//! G.711 Audio Codec Implementation
//!
//! Sample-at-a-time companding without lookup tables:
//! - μ-law (PCMU): payload type 0
//! - A-law (PCMA): payload type 8

use bytes::{BufMut, Bytes, BytesMut};

/// G.711 Codec Type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711Type {
    /// μ-law (PCMU) - Payload Type 0
    PCMU,
    /// A-law (PCMA) - Payload Type 8
    PCMA,
}

impl G711Type {
    /// Get RTP payload type
    pub fn payload_type(&self) -> u8 {
        match self {
            G711Type::PCMU => 0,
            G711Type::PCMA => 8,
        }
    }

    pub fn from_payload_type(payload_type: u8) -> Option<Self> {
        match payload_type {
            0 => Some(G711Type::PCMU),
            8 => Some(G711Type::PCMA),
            _ => None,
        }
    }

    /// Match an `audio/PCMU` style MIME type, case-insensitively
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        let subtype = mime.rsplit('/').next()?;
        if subtype.eq_ignore_ascii_case("PCMU") {
            Some(G711Type::PCMU)
        } else if subtype.eq_ignore_ascii_case("PCMA") {
            Some(G711Type::PCMA)
        } else {
            None
        }
    }

    /// Get clock rate (always 8000 Hz for G.711)
    pub fn clock_rate(&self) -> u32 {
        8000
    }

    /// Get codec name
    pub fn name(&self) -> &str {
        match self {
            G711Type::PCMU => "PCMU",
            G711Type::PCMA => "PCMA",
        }
    }

    pub fn decode(&self, payload: &[u8]) -> Vec<i16> {
        match self {
            G711Type::PCMU => PcmuCodec::decode(payload),
            G711Type::PCMA => PcmaCodec::decode(payload),
        }
    }
}

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

/// Compress one linear sample to μ-law
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut value = sample as i32;
    let sign: u8 = if value < 0 {
        value = -value;
        0x80
    } else {
        0x00
    };
    let biased = (value.min(ULAW_CLIP) + ULAW_BIAS) as u16;

    // Highest set bit is at least bit 7 after biasing
    let exponent = (15 - biased.leading_zeros() as u8).saturating_sub(7).min(7);
    let mantissa = ((biased >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Expand one μ-law byte to a linear sample
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = (byte & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if byte & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// A-law segment end points on the 13-bit magnitude
const ALAW_SEGMENT_END: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];

/// Compress one linear sample to A-law
pub fn linear_to_alaw(sample: i16) -> u8 {
    let mut value = (sample as i32) >> 3;
    let mask: u8 = if value >= 0 {
        0xD5
    } else {
        value = -value - 1;
        0x55
    };

    let segment = ALAW_SEGMENT_END
        .iter()
        .position(|&end| value <= end)
        .unwrap_or(8);
    if segment >= 8 {
        return 0x7F ^ mask;
    }

    let shift = if segment < 2 { 1 } else { segment };
    let alaw = ((segment as u8) << 4) | ((value >> shift) & 0x0F) as u8;
    alaw ^ mask
}

/// Expand one A-law byte to a linear sample
pub fn alaw_to_linear(byte: u8) -> i16 {
    let byte = byte ^ 0x55;
    let mut value = ((byte & 0x0F) as i32) << 4;
    let segment = (byte & 0x70) >> 4;
    match segment {
        0 => value += 8,
        1 => value += 0x108,
        _ => {
            value += 0x108;
            value <<= segment - 1;
        }
    }
    if byte & 0x80 != 0 {
        value as i16
    } else {
        -value as i16
    }
}

/// G.711 μ-law (PCMU) Codec
pub struct PcmuCodec;

impl PcmuCodec {
    /// Encode PCM samples to μ-law
    pub fn encode(pcm: &[i16]) -> Bytes {
        let mut output = BytesMut::with_capacity(pcm.len());
        for &sample in pcm {
            output.put_u8(linear_to_ulaw(sample));
        }
        output.freeze()
    }

    /// Decode μ-law to PCM samples
    pub fn decode(ulaw: &[u8]) -> Vec<i16> {
        ulaw.iter().map(|&byte| ulaw_to_linear(byte)).collect()
    }
}

/// G.711 A-law (PCMA) Codec
pub struct PcmaCodec;

impl PcmaCodec {
    /// Encode PCM samples to A-law
    pub fn encode(pcm: &[i16]) -> Bytes {
        let mut output = BytesMut::with_capacity(pcm.len());
        for &sample in pcm {
            output.put_u8(linear_to_alaw(sample));
        }
        output.freeze()
    }

    /// Decode A-law to PCM samples
    pub fn decode(alaw: &[u8]) -> Vec<i16> {
        alaw.iter().map(|&byte| alaw_to_linear(byte)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_g711_type_payload() {
        assert_eq!(G711Type::PCMU.payload_type(), 0);
        assert_eq!(G711Type::PCMA.payload_type(), 8);
        assert_eq!(G711Type::from_payload_type(8), Some(G711Type::PCMA));
        assert_eq!(G711Type::from_payload_type(111), None);
        assert_eq!(G711Type::from_mime_type("audio/pcmu"), Some(G711Type::PCMU));
        assert_eq!(G711Type::from_mime_type("audio/PCMA"), Some(G711Type::PCMA));
        assert_eq!(G711Type::from_mime_type("audio/opus"), None);
    }

    #[test]
    fn test_ulaw_reference_points() {
        assert_eq!(linear_to_ulaw(0), 0xFF);
        assert_eq!(linear_to_ulaw(32767), 0x80);
        assert_eq!(linear_to_ulaw(-32768), 0x00);
        assert_eq!(ulaw_to_linear(0xFF), 0);
        assert_eq!(ulaw_to_linear(0x7F), 0);
        assert_eq!(ulaw_to_linear(0x80), 32124);
        assert_eq!(ulaw_to_linear(0x00), -32124);
    }

    #[test]
    fn test_alaw_reference_points() {
        assert_eq!(linear_to_alaw(0), 0xD5);
        assert_eq!(alaw_to_linear(0xD5), 8);
        assert_eq!(alaw_to_linear(0x55), -8);
        assert_eq!(linear_to_alaw(1000), 0xFA);
        assert_eq!(alaw_to_linear(0xFA), 1008);
    }

    #[test]
    fn test_ulaw_quantization_error_bounded() {
        for sample in i16::MIN..=i16::MAX {
            let decoded = ulaw_to_linear(linear_to_ulaw(sample)) as i32;
            let magnitude = (sample as i32).abs();
            let tolerance = if magnitude > ULAW_CLIP {
                magnitude - 32124
            } else {
                (magnitude + ULAW_BIAS) / 32 + 1
            };
            let error = (decoded - sample as i32).abs();
            assert!(
                error <= tolerance,
                "sample {} decoded to {} (error {}, tolerance {})",
                sample,
                decoded,
                error,
                tolerance
            );
        }
    }

    #[test]
    fn test_alaw_quantization_error_bounded() {
        for sample in i16::MIN..=i16::MAX {
            let decoded = alaw_to_linear(linear_to_alaw(sample)) as i32;
            let error = (decoded - sample as i32).abs();
            let tolerance = (sample as i32).abs() / 16 + 16;
            assert!(
                error <= tolerance,
                "sample {} decoded to {} (error {})",
                sample,
                decoded,
                error
            );
        }
    }

    #[test]
    fn test_silence() {
        let silence: Vec<i16> = vec![0; 160]; // 20ms at 8kHz
        for sample in PcmuCodec::decode(&PcmuCodec::encode(&silence)) {
            assert_eq!(sample, 0);
        }
        for sample in PcmaCodec::decode(&PcmaCodec::encode(&silence)) {
            assert!(sample.abs() <= 8);
        }
    }

    #[test]
    fn test_sign_preserved() {
        for &sample in &[100i16, -100, 5000, -5000, 20000, -20000] {
            assert_eq!(PcmuCodec::decode(&PcmuCodec::encode(&[sample]))[0].signum(), sample.signum());
            assert_eq!(PcmaCodec::decode(&PcmaCodec::encode(&[sample]))[0].signum(), sample.signum());
        }
    }
}
