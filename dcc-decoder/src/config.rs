//! Decoder configuration types
//!
//! All options are immutable for the lifetime of a decode run: speed-step
//! convention, service-mode interpretation, accessory address offset, the
//! short-pulse policy, and up to four independent search terms.

use crate::types::{DecoderError, Result};
use serde::{Deserialize, Serialize};

/// Speed-step convention for multi-function speed instructions
///
/// Selects how the 5-bit speed field of a speed-and-direction instruction is
/// interpreted. 128-step speed travels in its own instruction and is not
/// affected by this option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedStepMode {
    /// 14 steps; bit 4 of the speed field carries the headlight (F0)
    Steps14,
    /// 28 steps; bit 4 is the intermediate-step bit of the speed code
    #[default]
    Steps28,
}

/// Caller-supplied search terms, each either disabled or an exact value
///
/// All four terms are independent; see [`crate::search`] for the gating
/// rules between the byte term and the address terms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Multi-function (locomotive) decoder address
    #[serde(default)]
    pub decoder_address: Option<u16>,
    /// Accessory (turnout) address, after offset correction
    #[serde(default)]
    pub accessory_address: Option<u16>,
    /// Configuration variable address
    #[serde(default)]
    pub cv_address: Option<u32>,
    /// Raw byte value, matched against every packet byte
    #[serde(default)]
    pub byte: Option<u8>,
}

impl SearchCriteria {
    /// True if at least one address term (not the byte term) is enabled
    pub fn any_address_enabled(&self) -> bool {
        self.decoder_address.is_some()
            || self.accessory_address.is_some()
            || self.cv_address.is_some()
    }

    /// True if no term at all is enabled
    pub fn is_empty(&self) -> bool {
        !self.any_address_enabled() && self.byte.is_none()
    }
}

/// Parse a byte search term accepting decimal, `0x` hex, or `0b` binary
///
/// Used by the CLI and config layers; decimal-only terms (addresses, CVs)
/// parse with plain `FromStr`.
pub fn parse_byte_term(term: &str) -> Result<u8> {
    let term = term.trim();
    let parsed = if let Some(hex) = term.strip_prefix("0x").or_else(|| term.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else if let Some(bin) = term.strip_prefix("0b").or_else(|| term.strip_prefix("0B")) {
        u8::from_str_radix(bin, 2)
    } else {
        term.parse::<u8>()
    };
    parsed.map_err(|e| DecoderError::InvalidSearchTerm(term.to_string(), e.to_string()))
}

/// Configuration for a decode run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Speed-step convention for 01x speed instructions
    #[serde(default)]
    pub speed_steps: SpeedStepMode,

    /// Interpret first bytes 112-127 as service-mode packets
    #[serde(default)]
    pub service_mode: bool,

    /// Signed offset added to computed accessory (turnout) addresses
    #[serde(default)]
    pub accessory_offset: i32,

    /// Merge interfering pulses shorter than `short_pulse_limit_us`
    #[serde(default)]
    pub ignore_short_pulses: bool,

    /// Width limit for the short-pulse filter, in microseconds
    #[serde(default = "default_short_pulse_limit")]
    pub short_pulse_limit_us: u32,

    /// Tolerance applied to the one-bit timing windows, as a fraction
    #[serde(default = "default_tolerance")]
    pub timing_tolerance: f64,

    /// Search terms evaluated against every decoded packet
    #[serde(default)]
    pub search: SearchCriteria,
}

fn default_short_pulse_limit() -> u32 {
    4
}

fn default_tolerance() -> f64 {
    0.05
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            speed_steps: SpeedStepMode::default(),
            service_mode: false,
            accessory_offset: 0,
            ignore_short_pulses: false,
            short_pulse_limit_us: default_short_pulse_limit(),
            timing_tolerance: default_tolerance(),
            search: SearchCriteria::default(),
        }
    }
}

impl DecoderConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: select the speed-step convention
    pub fn with_speed_steps(mut self, mode: SpeedStepMode) -> Self {
        self.speed_steps = mode;
        self
    }

    /// Builder method: enable or disable service-mode interpretation
    pub fn with_service_mode(mut self, enabled: bool) -> Self {
        self.service_mode = enabled;
        self
    }

    /// Builder method: set the accessory address offset
    pub fn with_accessory_offset(mut self, offset: i32) -> Self {
        self.accessory_offset = offset;
        self
    }

    /// Builder method: enable the short-pulse filter
    pub fn with_short_pulse_filter(mut self, enabled: bool) -> Self {
        self.ignore_short_pulses = enabled;
        self
    }

    /// Builder method: search for a decoder address
    pub fn find_decoder_address(mut self, address: u16) -> Self {
        self.search.decoder_address = Some(address);
        self
    }

    /// Builder method: search for an accessory address
    pub fn find_accessory_address(mut self, address: u16) -> Self {
        self.search.accessory_address = Some(address);
        self
    }

    /// Builder method: search for a CV address
    pub fn find_cv_address(mut self, cv: u32) -> Self {
        self.search.cv_address = Some(cv);
        self
    }

    /// Builder method: search for a raw byte value
    pub fn find_byte(mut self, value: u8) -> Self {
        self.search.byte = Some(value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = DecoderConfig::new()
            .with_speed_steps(SpeedStepMode::Steps14)
            .with_service_mode(true)
            .with_accessory_offset(-4)
            .find_cv_address(23)
            .find_byte(0x3F);

        assert_eq!(config.speed_steps, SpeedStepMode::Steps14);
        assert!(config.service_mode);
        assert_eq!(config.accessory_offset, -4);
        assert_eq!(config.search.cv_address, Some(23));
        assert_eq!(config.search.byte, Some(0x3F));
        assert!(config.search.any_address_enabled());
    }

    #[test]
    fn test_defaults() {
        let config = DecoderConfig::new();
        assert_eq!(config.speed_steps, SpeedStepMode::Steps28);
        assert!(!config.service_mode);
        assert_eq!(config.short_pulse_limit_us, 4);
        assert!(config.search.is_empty());
    }

    #[test]
    fn test_parse_byte_term_radices() {
        assert_eq!(parse_byte_term("63").unwrap(), 63);
        assert_eq!(parse_byte_term("0x3F").unwrap(), 0x3F);
        assert_eq!(parse_byte_term("0b00111111").unwrap(), 0x3F);
        assert!(parse_byte_term("256").is_err());
        assert!(parse_byte_term("0xZZ").is_err());
    }
}
