//! Core types for the DCC decoder library
//!
//! This module defines the fundamental types the decoder emits while turning
//! an edge stream into an annotation stream. The decoder is stateless between
//! runs and only outputs annotations - it does not render or persist anything.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// A single logic-level transition on the monitored line
///
/// This is the raw input unit of the decoder: the host samples the line and
/// reports each transition with its sample index and the level after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Sample index of the transition
    pub sample: u64,
    /// Line level after the transition
    pub level: bool,
}

impl Edge {
    pub fn new(sample: u64, level: bool) -> Self {
        Self { sample, level }
    }
}

/// Classification of one reconstructed bit period (two half-bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitClass {
    /// Both halves within the one-bit window
    One,
    /// Both halves within the zero-bit window
    ///
    /// `stretched` marks an asymmetric zero whose halves differ notably.
    /// Display-only: framing treats it as an ordinary zero.
    Zero { stretched: bool },
    /// Total duration between a one-bit and a zero-bit period: the decoder
    /// is sampling the wrong edge polarity and must flip and resynchronize.
    HalfZeroHalfOne,
    /// Total duration matches the Railcom cutout window; reported but does
    /// not force resynchronization by itself.
    RailcomCutout,
    /// Timing not explained by any known pattern; forces resynchronization.
    Unknown,
}

/// A completed byte with the sample range spanning its eight bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketByte {
    pub value: u8,
    /// Sample index where the first bit of this byte started
    pub start: u64,
    /// Sample index where the last bit of this byte ended
    pub end: u64,
}

/// Checksum verdict for a completed packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumStatus {
    /// XOR of all content bytes equals the final byte
    Valid,
    /// XOR mismatch - packet content is suspect but still decoded
    Invalid,
    /// Packet shorter than two bytes, so there is no checksum to verify
    Missing,
}

impl fmt::Display for ChecksumStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumStatus::Valid => write!(f, "OK"),
            ChecksumStatus::Invalid => write!(f, "bad"),
            ChecksumStatus::Missing => write!(f, "missing"),
        }
    }
}

/// An ordered sequence of bytes framed between a valid preamble and the
/// terminating one-marker bit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub bytes: Vec<PacketByte>,
    /// Sample index of the packet-start marker (end of preamble)
    pub start: u64,
    /// Sample index of the final marker bit
    pub end: u64,
}

impl Packet {
    /// Verify the trailing XOR checksum
    ///
    /// XORs every byte except the last and compares against the last. A
    /// packet with fewer than two bytes has no checksum byte at all, which
    /// is reported distinctly from a mismatch.
    pub fn checksum(&self) -> ChecksumStatus {
        if self.bytes.len() < 2 {
            return ChecksumStatus::Missing;
        }
        let xor = self.bytes[..self.bytes.len() - 1]
            .iter()
            .fold(0u8, |acc, b| acc ^ b.value);
        if xor == self.bytes[self.bytes.len() - 1].value {
            ChecksumStatus::Valid
        } else {
            ChecksumStatus::Invalid
        }
    }

    /// Raw byte values without position metadata
    pub fn values(&self) -> Vec<u8> {
        self.bytes.iter().map(|b| b.value).collect()
    }
}

/// Annotation categories, mirroring the rows a rendering sink would display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    /// A resolved logical bit value
    Bit,
    /// A completed data byte
    Byte,
    /// Frame markers: preamble, packet start, packet end
    Frame,
    /// A decoded semantic field (address, speed, CV operation, ...)
    Field,
    /// Checksum verdict
    Checksum,
    /// A search criteria match
    Search,
    /// Resynchronization notice
    Resync,
    /// Diagnosed protocol anomaly (invalid preamble, missing byte, ...)
    Error,
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnnotationKind::Bit => "bit",
            AnnotationKind::Byte => "byte",
            AnnotationKind::Frame => "frame",
            AnnotationKind::Field => "field",
            AnnotationKind::Checksum => "checksum",
            AnnotationKind::Search => "search",
            AnnotationKind::Resync => "resync",
            AnnotationKind::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// The primary output unit of the decoder
///
/// Carries a sample range, a category, and an ordered list of text variants
/// for the same fact, from most verbose to most terse. A rendering sink picks
/// the variant that fits the available space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub start: u64,
    pub end: u64,
    pub kind: AnnotationKind,
    pub texts: Vec<String>,
}

impl Annotation {
    pub fn new(start: u64, end: u64, kind: AnnotationKind, texts: Vec<String>) -> Self {
        Self {
            start,
            end,
            kind,
            texts,
        }
    }

    /// The most verbose text variant, or an empty string if none was given
    pub fn text(&self) -> &str {
        self.texts.first().map(String::as_str).unwrap_or("")
    }
}

/// Errors that can occur before or while driving a decode run
///
/// Everything listed here is fatal per the error taxonomy: protocol-level
/// anomalies (bad preamble, bad checksum, unknown opcodes) are never errors,
/// they surface as annotations and decoding continues.
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Sample rate not set - a sample rate is required before decoding")]
    MissingSampleRate,

    #[error("Sample rate {0} Hz is below the minimum usable {1} Hz")]
    SampleRateTooLow(u64, u64),

    #[error("Invalid search term '{0}': {1}")]
    InvalidSearchTerm(String, String),

    #[error("Failed to read edge stream: {0}")]
    EdgeSourceError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte(value: u8) -> PacketByte {
        PacketByte {
            value,
            start: 0,
            end: 0,
        }
    }

    #[test]
    fn test_checksum_valid() {
        let packet = Packet {
            bytes: vec![byte(0x03), byte(0x3F), byte(0x03 ^ 0x3F)],
            start: 0,
            end: 0,
        };
        assert_eq!(packet.checksum(), ChecksumStatus::Valid);
    }

    #[test]
    fn test_checksum_invalid() {
        let packet = Packet {
            bytes: vec![byte(0x03), byte(0x3F), byte(0x00)],
            start: 0,
            end: 0,
        };
        assert_eq!(packet.checksum(), ChecksumStatus::Invalid);
    }

    #[test]
    fn test_checksum_missing_on_single_byte() {
        let packet = Packet {
            bytes: vec![byte(0xFF)],
            start: 0,
            end: 0,
        };
        assert_eq!(packet.checksum(), ChecksumStatus::Missing);
    }

    #[test]
    fn test_annotation_text_variants() {
        let ann = Annotation::new(
            10,
            20,
            AnnotationKind::Field,
            vec!["Speed: 12 (forward)".into(), "12".into()],
        );
        assert_eq!(ann.text(), "Speed: 12 (forward)");
    }
}
