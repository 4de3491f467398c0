//! Search/filter matching
//!
//! Evaluates the caller's search terms against one decoded packet. Matches
//! are purely additive annotations and never change the primary decode. The
//! terms cross-gate: a byte hit only counts when every enabled address term
//! also matched, and an address hit only counts when the byte term (if
//! enabled) found its byte somewhere in the packet.

use crate::command::DecodedPacket;
use crate::config::SearchCriteria;
use crate::types::{Annotation, AnnotationKind, Packet};

/// Evaluate the search terms and return match annotations
pub fn run_search(
    decoded: &DecodedPacket,
    packet: &Packet,
    criteria: &SearchCriteria,
) -> Vec<Annotation> {
    if criteria.is_empty() {
        return Vec::new();
    }

    let decoder_hit = match criteria.decoder_address {
        Some(wanted) => decoded.decoder_address == Some(wanted),
        None => true,
    };
    let accessory_hit = match criteria.accessory_address {
        Some(wanted) => decoded.accessory_address == Some(wanted),
        None => true,
    };
    let cv_hit = match criteria.cv_address {
        Some(wanted) => decoded.cv_address == Some(wanted),
        None => true,
    };
    let addresses_hit = decoder_hit && accessory_hit && cv_hit;

    let byte_positions: Vec<usize> = match criteria.byte {
        Some(wanted) => packet
            .bytes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.value == wanted)
            .map(|(i, _)| i)
            .collect(),
        None => Vec::new(),
    };
    let byte_hit = criteria.byte.is_none() || !byte_positions.is_empty();

    let mut out = Vec::new();

    // Byte matches, gated by every enabled address filter
    if let Some(wanted) = criteria.byte {
        if addresses_hit {
            for i in byte_positions {
                let b = &packet.bytes[i];
                out.push(Annotation::new(
                    b.start,
                    b.end,
                    AnnotationKind::Search,
                    vec![
                        format!("Search match: byte 0x{:02X} at position {}", wanted, i),
                        format!("Byte 0x{:02X}", wanted),
                    ],
                ));
            }
        }
    }

    // Address matches, gated by the byte-match outcome
    if byte_hit {
        if let Some(wanted) = criteria.decoder_address {
            if decoded.decoder_address == Some(wanted) {
                out.push(search_annotation(packet, format!("decoder address {}", wanted)));
            }
        }
        if let Some(wanted) = criteria.accessory_address {
            if decoded.accessory_address == Some(wanted) {
                out.push(search_annotation(packet, format!("accessory address {}", wanted)));
            }
        }
        if let Some(wanted) = criteria.cv_address {
            if decoded.cv_address == Some(wanted) {
                out.push(search_annotation(packet, format!("CV address {}", wanted)));
            }
        }
    }

    out
}

fn search_annotation(packet: &Packet, what: String) -> Annotation {
    Annotation::new(
        packet.start,
        packet.end,
        AnnotationKind::Search,
        vec![format!("Search match: {}", what), "Match".into()],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::decode_packet;
    use crate::config::DecoderConfig;
    use crate::types::PacketByte;

    fn packet_with_checksum(content: &[u8]) -> Packet {
        let xor = content.iter().fold(0u8, |a, &b| a ^ b);
        let mut values = content.to_vec();
        values.push(xor);
        let bytes = values
            .iter()
            .enumerate()
            .map(|(i, &value)| PacketByte {
                value,
                start: i as u64 * 100,
                end: i as u64 * 100 + 99,
            })
            .collect();
        Packet {
            bytes,
            start: 0,
            end: values.len() as u64 * 100,
        }
    }

    fn matches_for(content: &[u8], criteria: SearchCriteria) -> Vec<Annotation> {
        let packet = packet_with_checksum(content);
        let decoded = decode_packet(&packet, &DecoderConfig::new());
        run_search(&decoded, &packet, &criteria)
    }

    #[test]
    fn test_cv_address_match() {
        // Short-form POM write to CV 23
        let criteria = SearchCriteria {
            cv_address: Some(23),
            ..Default::default()
        };
        let hits = matches_for(&[3, 0xEC, 22, 7], criteria);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text().contains("CV address 23"));
    }

    #[test]
    fn test_cv_address_miss() {
        let criteria = SearchCriteria {
            cv_address: Some(24),
            ..Default::default()
        };
        assert!(matches_for(&[3, 0xEC, 22, 7], criteria).is_empty());
    }

    #[test]
    fn test_decoder_address_match() {
        let criteria = SearchCriteria {
            decoder_address: Some(3),
            ..Default::default()
        };
        let hits = matches_for(&[3, 0x74], criteria);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_byte_match_reports_each_position() {
        let criteria = SearchCriteria {
            byte: Some(0x74),
            ..Default::default()
        };
        let hits = matches_for(&[3, 0x74], criteria);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text().contains("position 1"));
    }

    #[test]
    fn test_byte_match_gated_by_address_filter() {
        // Byte present but the decoder-address filter misses: no byte hit
        let criteria = SearchCriteria {
            decoder_address: Some(99),
            byte: Some(0x74),
            ..Default::default()
        };
        assert!(matches_for(&[3, 0x74], criteria).is_empty());
    }

    #[test]
    fn test_address_match_gated_by_byte_filter() {
        // Address matches but the byte filter finds nothing: no hits at all
        let criteria = SearchCriteria {
            decoder_address: Some(3),
            byte: Some(0x99),
            ..Default::default()
        };
        assert!(matches_for(&[3, 0x74], criteria).is_empty());
    }

    #[test]
    fn test_byte_and_address_both_match() {
        let criteria = SearchCriteria {
            decoder_address: Some(3),
            byte: Some(0x74),
            ..Default::default()
        };
        let hits = matches_for(&[3, 0x74], criteria);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_no_criteria_no_matches() {
        assert!(matches_for(&[3, 0x74], SearchCriteria::default()).is_empty());
    }
}
