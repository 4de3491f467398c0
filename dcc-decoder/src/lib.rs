//! DCC Decoder Library
//!
//! A stateless, reusable library for decoding NMRA/RCN DCC command streams
//! (model-railway control) from raw logic-level edge captures into a
//! structured, human-readable annotation stream.
//!
//! # Architecture
//!
//! This library is intentionally minimal and focused on decoding:
//! - Classifies pulse widths into logical bit values under half-bit timing
//!   tolerances
//! - Assembles the bit stream into framed packets (preamble, byte
//!   boundaries, end-of-packet) with automatic resynchronization
//! - Verifies the trailing XOR checksum
//! - Decodes packet bytes through the hierarchical address/instruction
//!   grammar (multi-function, accessory, service mode, CV access, ...)
//! - Matches decoded values against optional search criteria
//!
//! The library does NOT:
//! - Acquire samples (the host supplies edges via [`EdgeSource`])
//! - Render annotations (the caller supplies an [`AnnotationSink`])
//! - Interpret multi-packet programming sequences
//! - Drive or transmit onto the bus
//!
//! All higher-level functionality is in the application layer (dcc-cli).
//!
//! # Example Usage
//!
//! ```
//! use dcc_decoder::{decode_edges, DecoderConfig, Edge};
//!
//! // Edge capture at 1 MHz: sample indices are microseconds
//! let edges: Vec<Edge> = Vec::new();
//!
//! let config = DecoderConfig::new()
//!     .with_service_mode(false)
//!     .find_cv_address(23);
//!
//! let annotations = decode_edges(&edges, 1_000_000, &config).unwrap();
//! for ann in annotations {
//!     println!("{}..{} [{}] {}", ann.start, ann.end, ann.kind, ann.text());
//! }
//! ```

// Public modules
pub mod command;
pub mod config;
pub mod decoder;
pub mod types;

// Re-export main types for convenience
pub use command::{AddressKind, DecodedPacket, Field};
pub use config::{parse_byte_term, DecoderConfig, SearchCriteria, SpeedStepMode};
pub use decoder::{decode_edges, AnnotationSink, Decoder, EdgeSlice, EdgeSource};
pub use types::{
    Annotation, AnnotationKind, ChecksumStatus, DecoderError, Edge, Packet, PacketByte, Result,
};

// Internal modules (not exposed in public API)
mod framer;
mod search;
mod timing;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: an empty stream decodes to an empty annotation list
        let anns = decode_edges(&[], 1_000_000, &DecoderConfig::new()).unwrap();
        assert!(anns.is_empty());
    }
}
