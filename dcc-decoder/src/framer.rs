//! Bit assembly and packet framing
//!
//! Consumes classified bit periods and reconstructs framed packets: preamble
//! detection (>= 10 consecutive one bits), MSB-first byte accumulation, and
//! the marker bit after every 8 data bits that selects byte-continue (zero)
//! or packet-end (one). Any unexplained timing aborts the in-progress packet
//! and returns to preamble search; nothing in here is fatal.

use crate::types::{Annotation, AnnotationKind, BitClass, Packet, PacketByte};

/// Framing states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    /// Scanning for the first one bit of a preamble
    WaitingForPreamble,
    /// Counting consecutive one bits
    Preamble,
    /// Accumulating data bytes and marker bits
    AddressDataByte,
}

/// What the decode loop should do after feeding one bit period
#[derive(Debug, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Keep classifying bit periods
    Continue,
    /// A packet was finalized and is ready for checksum/command decode
    Packet(Packet),
    /// Polarity straddle: shift the edge pairing by one edge, then continue
    FlipPolarity,
}

/// Minimum number of consecutive one bits for a valid preamble
const PREAMBLE_MIN_BITS: u32 = 10;

/// The frame state machine
///
/// Owns the single in-progress packet and all per-packet accumulation state.
/// The whole pipeline stays a pure function of `(state, next bit)`; the only
/// outputs are the returned outcome and annotations pushed into `out`.
#[derive(Debug)]
pub struct BitAssembler {
    state: FrameState,
    preamble_count: u32,
    preamble_start: u64,
    byte_acc: u8,
    bit_count: u8,
    byte_start: u64,
    packet: Packet,
}

impl BitAssembler {
    pub fn new() -> Self {
        Self {
            state: FrameState::WaitingForPreamble,
            preamble_count: 0,
            preamble_start: 0,
            byte_acc: 0,
            bit_count: 0,
            byte_start: 0,
            packet: Packet::default(),
        }
    }

    /// Abort any in-progress packet and return to preamble search
    fn reset(&mut self) {
        self.state = FrameState::WaitingForPreamble;
        self.preamble_count = 0;
        self.byte_acc = 0;
        self.bit_count = 0;
        self.packet = Packet::default();
    }

    /// Feed one classified bit period spanning `start..end`
    pub fn feed(
        &mut self,
        class: BitClass,
        start: u64,
        end: u64,
        out: &mut Vec<Annotation>,
    ) -> FeedOutcome {
        match class {
            BitClass::One => {
                out.push(Annotation::new(start, end, AnnotationKind::Bit, vec!["1".into()]));
                self.feed_bit(true, start, end, out)
            }
            BitClass::Zero { stretched } => {
                let texts = if stretched {
                    vec!["0 (stretched)".into(), "0".into()]
                } else {
                    vec!["0".into()]
                };
                out.push(Annotation::new(start, end, AnnotationKind::Bit, texts));
                self.feed_bit(false, start, end, out)
            }
            BitClass::RailcomCutout => {
                // Announced but not a bit value; the packet in progress (if
                // any) is left untouched.
                out.push(Annotation::new(
                    start,
                    end,
                    AnnotationKind::Frame,
                    vec!["Railcom cutout".into(), "Cutout".into()],
                ));
                FeedOutcome::Continue
            }
            BitClass::HalfZeroHalfOne => {
                log::debug!("polarity straddle at sample {}, resynchronizing", start);
                out.push(Annotation::new(
                    start,
                    end,
                    AnnotationKind::Resync,
                    vec![
                        "Resynchronize: wrong edge polarity".into(),
                        "Resync (polarity)".into(),
                    ],
                ));
                self.reset();
                FeedOutcome::FlipPolarity
            }
            BitClass::Unknown => {
                log::debug!("unknown bit timing at sample {}, resynchronizing", start);
                out.push(Annotation::new(
                    start,
                    end,
                    AnnotationKind::Resync,
                    vec!["Resynchronize: unknown timing".into(), "Resync".into()],
                ));
                self.reset();
                FeedOutcome::Continue
            }
        }
    }

    fn feed_bit(
        &mut self,
        bit: bool,
        start: u64,
        end: u64,
        out: &mut Vec<Annotation>,
    ) -> FeedOutcome {
        match self.state {
            FrameState::WaitingForPreamble => {
                if bit {
                    self.state = FrameState::Preamble;
                    self.preamble_count = 1;
                    self.preamble_start = start;
                }
                FeedOutcome::Continue
            }
            FrameState::Preamble => {
                if bit {
                    self.preamble_count += 1;
                    return FeedOutcome::Continue;
                }
                if self.preamble_count >= PREAMBLE_MIN_BITS {
                    out.push(Annotation::new(
                        self.preamble_start,
                        start,
                        AnnotationKind::Frame,
                        vec![
                            format!("Preamble ({} one bits)", self.preamble_count),
                            "Preamble".into(),
                        ],
                    ));
                    out.push(Annotation::new(
                        start,
                        end,
                        AnnotationKind::Frame,
                        vec!["Packet start".into(), "Start".into()],
                    ));
                    log::debug!(
                        "packet start at sample {} after {} preamble bits",
                        start,
                        self.preamble_count
                    );
                    self.state = FrameState::AddressDataByte;
                    self.packet = Packet {
                        bytes: Vec::new(),
                        start,
                        end: start,
                    };
                    self.byte_acc = 0;
                    self.bit_count = 0;
                    self.byte_start = end;
                } else {
                    out.push(Annotation::new(
                        self.preamble_start,
                        end,
                        AnnotationKind::Error,
                        vec![
                            format!("Invalid preamble ({} one bits)", self.preamble_count),
                            "Bad preamble".into(),
                        ],
                    ));
                    self.reset();
                }
                FeedOutcome::Continue
            }
            FrameState::AddressDataByte => {
                if self.bit_count < 8 {
                    if self.bit_count == 0 {
                        self.byte_start = start;
                    }
                    // MSB received first
                    self.byte_acc = (self.byte_acc << 1) | u8::from(bit);
                    self.bit_count += 1;
                    if self.bit_count == 8 {
                        let byte = PacketByte {
                            value: self.byte_acc,
                            start: self.byte_start,
                            end,
                        };
                        out.push(Annotation::new(
                            byte.start,
                            byte.end,
                            AnnotationKind::Byte,
                            vec![
                                format!("Byte: 0x{:02X}", byte.value),
                                format!("0x{:02X}", byte.value),
                                format!("{:02X}", byte.value),
                            ],
                        ));
                        self.packet.bytes.push(byte);
                    }
                    return FeedOutcome::Continue;
                }
                // Marker bit after 8 data bits: zero = more bytes, one = end
                if bit {
                    self.packet.end = end;
                    out.push(Annotation::new(
                        start,
                        end,
                        AnnotationKind::Frame,
                        vec!["Packet end".into(), "End".into()],
                    ));
                    let packet = std::mem::take(&mut self.packet);
                    log::debug!(
                        "packet finalized at sample {}: {} bytes",
                        end,
                        packet.bytes.len()
                    );
                    self.reset();
                    FeedOutcome::Packet(packet)
                } else {
                    self.byte_acc = 0;
                    self.bit_count = 0;
                    self.byte_start = end;
                    FeedOutcome::Continue
                }
            }
        }
    }
}

impl Default for BitAssembler {
    fn default() -> Self {
        Self::new()
    }
}
