//! Packet command decoding
//!
//! Turns a framed packet into semantic fields: the leading byte selects an
//! address space, and for multi-function packets the instruction byte's top
//! three bits select an instruction class with its own operand layout. Every
//! consumed operand goes through [`ByteCursor::take`], so a truncated packet
//! surfaces as a "byte missing" field instead of a panic or a silent drop.

use crate::config::{DecoderConfig, SpeedStepMode};
use crate::types::{ChecksumStatus, Packet, PacketByte};

/// Address space selected by the first packet byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// First byte 0: multi-function broadcast
    Broadcast,
    /// First byte 1-127: multi-function decoder, 7-bit address
    MultiFunction7,
    /// First byte 192-231: multi-function decoder, 14-bit address
    MultiFunction14,
    /// First byte 128-191: accessory decoder (basic, extended, or POM)
    Accessory,
    /// First byte 112-127 with the service-mode option enabled
    ServiceMode,
    /// First byte 232-254
    Reserved,
    /// First byte 255, second byte 0
    Idle,
    /// First byte 255, second byte nonzero: vendor/system command
    System,
}

/// One decoded semantic field
///
/// `texts` is ordered most-verbose first, like annotation text variants.
/// `error` marks diagnosed anomalies (missing bytes, wrong addressee) that
/// should render on the error row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub start: u64,
    pub end: u64,
    pub texts: Vec<String>,
    pub error: bool,
}

impl Field {
    fn new(start: u64, end: u64, texts: Vec<String>) -> Self {
        Self {
            start,
            end,
            texts,
            error: false,
        }
    }

    fn error(start: u64, end: u64, texts: Vec<String>) -> Self {
        Self {
            start,
            end,
            texts,
            error: true,
        }
    }
}

/// Structured result of decoding one packet
#[derive(Debug, Clone)]
pub struct DecodedPacket {
    pub address_kind: AddressKind,
    /// Multi-function decoder address, when the packet carries one
    pub decoder_address: Option<u16>,
    /// Accessory (turnout) address after offset correction
    pub accessory_address: Option<u16>,
    /// CV address touched by a CV operation, when the packet carries one
    pub cv_address: Option<u32>,
    pub fields: Vec<Field>,
    pub checksum: ChecksumStatus,
}

/// Cursor over the packet's content bytes
///
/// Replaces the ad hoc bounds checks of a hand-threaded index: `take`
/// advances and returns the byte, or the position at which the packet ran
/// out. The checksum byte is excluded up front.
struct ByteCursor<'a> {
    bytes: &'a [PacketByte],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(bytes: &'a [PacketByte]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self) -> Result<&'a PacketByte, usize> {
        match self.bytes.get(self.pos) {
            Some(b) => {
                self.pos += 1;
                Ok(b)
            }
            None => Err(self.pos),
        }
    }

    fn peek(&self) -> Option<&'a PacketByte> {
        self.bytes.get(self.pos)
    }

    fn remaining(&self) -> &'a [PacketByte] {
        &self.bytes[self.pos..]
    }

    fn drain(&mut self) -> &'a [PacketByte] {
        let rest = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        rest
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }
}

const STEPS_128: &[(u8, &str)] = &[(0, "Stop"), (1, "Emergency stop")];

/// Decode a completed packet against the run configuration
///
/// Never fails: a truncated packet yields the fields decoded so far plus a
/// "byte missing" error field.
pub fn decode_packet(packet: &Packet, config: &DecoderConfig) -> DecodedPacket {
    let checksum = packet.checksum();
    // The final byte is the checksum and carries no instruction content;
    // a one-byte packet (checksum missing) is decoded as-is.
    let content = if packet.bytes.len() >= 2 {
        &packet.bytes[..packet.bytes.len() - 1]
    } else {
        &packet.bytes[..]
    };

    let mut decoded = DecodedPacket {
        address_kind: AddressKind::Reserved,
        decoder_address: None,
        accessory_address: None,
        cv_address: None,
        fields: Vec::new(),
        checksum,
    };

    let mut cur = ByteCursor::new(content);
    let result = dispatch(&mut cur, config, packet, &mut decoded);

    match result {
        Ok(()) => {
            for byte in cur.remaining() {
                decoded.fields.push(Field::new(
                    byte.start,
                    byte.end,
                    vec![
                        format!("Unclaimed byte: 0x{:02X}", byte.value),
                        format!("0x{:02X}", byte.value),
                    ],
                ));
            }
        }
        Err(pos) => {
            decoded.fields.push(Field::error(
                packet.end,
                packet.end,
                vec![
                    format!("Byte missing at position {}", pos),
                    "Byte missing".into(),
                ],
            ));
        }
    }

    decoded
}

fn dispatch(
    cur: &mut ByteCursor,
    config: &DecoderConfig,
    packet: &Packet,
    out: &mut DecodedPacket,
) -> Result<(), usize> {
    let b0 = match cur.take() {
        Ok(b) => b,
        // Framing guarantees at least one byte, but an empty packet still
        // has to be diagnosed rather than trusted.
        Err(pos) => return Err(pos),
    };

    match b0.value {
        0 => {
            out.address_kind = AddressKind::Broadcast;
            out.decoder_address = Some(0);
            out.fields.push(Field::new(
                b0.start,
                b0.end,
                vec!["Address: broadcast".into(), "Broadcast".into()],
            ));
            decode_multi_function(cur, config, out, true, false)
        }
        112..=127 if config.service_mode => {
            out.address_kind = AddressKind::ServiceMode;
            decode_service_mode(cur, b0, packet, out)
        }
        1..=127 => {
            out.address_kind = AddressKind::MultiFunction7;
            out.decoder_address = Some(b0.value as u16);
            out.fields.push(Field::new(
                b0.start,
                b0.end,
                vec![
                    format!("Address: {} (7 bit)", b0.value),
                    format!("Addr {}", b0.value),
                ],
            ));
            let maybe_service = (112..=127).contains(&b0.value);
            decode_multi_function(cur, config, out, false, maybe_service)
        }
        128..=191 => {
            out.address_kind = AddressKind::Accessory;
            decode_accessory(cur, config, b0, out)
        }
        192..=231 => {
            out.address_kind = AddressKind::MultiFunction14;
            let b1 = cur.take()?;
            let address = (((b0.value as u16) & 0x3F) << 8) | b1.value as u16;
            out.decoder_address = Some(address);
            out.fields.push(Field::new(
                b0.start,
                b1.end,
                vec![
                    format!("Address: {} (14 bit)", address),
                    format!("Addr {}", address),
                ],
            ));
            decode_multi_function(cur, config, out, false, false)
        }
        232..=254 => {
            out.address_kind = AddressKind::Reserved;
            out.fields.push(Field::new(
                b0.start,
                b0.end,
                vec![
                    format!("Reserved address byte: {}", b0.value),
                    "Reserved".into(),
                ],
            ));
            // No further decode for reserved space; trailing bytes are
            // unknown, not unclaimed operands.
            for byte in cur.drain() {
                out.fields.push(Field::new(
                    byte.start,
                    byte.end,
                    vec![
                        format!("Unknown byte: 0x{:02X}", byte.value),
                        format!("0x{:02X}", byte.value),
                    ],
                ));
            }
            Ok(())
        }
        255 => {
            let b1 = cur.take()?;
            if b1.value == 0 {
                out.address_kind = AddressKind::Idle;
                out.fields.push(Field::new(
                    b0.start,
                    b1.end,
                    vec!["Idle packet".into(), "Idle".into()],
                ));
            } else {
                out.address_kind = AddressKind::System;
                out.fields.push(Field::new(
                    b0.start,
                    b1.end,
                    vec![
                        format!("System command: 0x{:02X} (RailComPlus?)", b1.value),
                        format!("Sys 0x{:02X}", b1.value),
                    ],
                ));
                // Vendor/system commands are decoded shallowly
                for byte in cur.drain() {
                    out.fields.push(Field::new(
                        byte.start,
                        byte.end,
                        vec![format!("System data: 0x{:02X}", byte.value)],
                    ));
                }
            }
            Ok(())
        }
    }
}

/// Multi-function instruction decode, dispatched on the top three bits
fn decode_multi_function(
    cur: &mut ByteCursor,
    config: &DecoderConfig,
    out: &mut DecodedPacket,
    broadcast: bool,
    maybe_service: bool,
) -> Result<(), usize> {
    let instr = cur.take()?;
    match instr.value >> 5 {
        0b000 => decode_decoder_control(cur, instr, out, broadcast, maybe_service),
        0b001 => decode_advanced_ops(cur, instr, out),
        0b010 => decode_speed(instr, config, out, false),
        0b011 => decode_speed(instr, config, out, true),
        0b100 => {
            // Function group one: FL (F0) plus F4-F1
            let f0 = (instr.value >> 4) & 1;
            let mut on = Vec::new();
            if f0 == 1 {
                on.push("F0".to_string());
            }
            for i in 0..4 {
                if (instr.value >> i) & 1 == 1 {
                    on.push(format!("F{}", i + 1));
                }
            }
            out.fields.push(Field::new(
                instr.start,
                instr.end,
                vec![
                    format!(
                        "Functions F0-F4: {}",
                        if on.is_empty() { "all off".to_string() } else { on.join(" ") }
                    ),
                    format!("F0-F4: {:05b}", instr.value & 0x1F),
                ],
            ));
            Ok(())
        }
        0b101 => {
            // Function group two: F5-F8 or F9-F12 by bit 4
            let base = if (instr.value >> 4) & 1 == 1 { 5 } else { 9 };
            push_function_group(out, instr, instr.value & 0x0F, base, 4);
            Ok(())
        }
        0b110 => decode_feature_expansion(cur, instr, out, broadcast),
        _ => decode_cv_access(cur, instr, out, "POM"),
    }
}

fn decode_decoder_control(
    cur: &mut ByteCursor,
    instr: &PacketByte,
    out: &mut DecodedPacket,
    broadcast: bool,
    maybe_service: bool,
) -> Result<(), usize> {
    let texts = match instr.value {
        0x00 => {
            if broadcast {
                vec!["Digital decoder reset (broadcast)".into(), "Reset".into()]
            } else {
                vec!["Digital decoder reset".into(), "Reset".into()]
            }
        }
        0x01 => vec!["Hard reset".into()],
        0x02 | 0x03 => vec![
            format!("Factory test (bit {})", instr.value & 1),
            "Factory test".into(),
        ],
        0x0A | 0x0B => vec![
            format!(
                "Set advanced addressing: {}",
                if instr.value & 1 == 1 { "on" } else { "off" }
            ),
            "Adv addressing".into(),
        ],
        0x0F => vec!["Decoder acknowledgement request".into(), "Ack request".into()],
        0x12 | 0x13 => {
            // Consist control: one extra byte carries the consist address
            let addr = cur.take()?;
            out.fields.push(Field::new(
                instr.start,
                addr.end,
                vec![
                    format!(
                        "Set advanced consist: address {}, direction {}",
                        addr.value & 0x7F,
                        if instr.value & 1 == 1 { "normal" } else { "reversed" }
                    ),
                    format!("Consist {}", addr.value & 0x7F),
                ],
            ));
            return Ok(());
        }
        _ => unknown_instruction_texts(instr.value, maybe_service),
    };
    out.fields.push(Field::new(instr.start, instr.end, texts));
    Ok(())
}

fn decode_advanced_ops(
    cur: &mut ByteCursor,
    instr: &PacketByte,
    out: &mut DecodedPacket,
) -> Result<(), usize> {
    match instr.value {
        0x3F => {
            // 128-step speed and direction
            let data = cur.take()?;
            let forward = data.value >> 7 == 1;
            let speed = data.value & 0x7F;
            let dir = if forward { "forward" } else { "reverse" };
            let texts = match STEPS_128.iter().find(|(v, _)| *v == speed) {
                Some((_, label)) => vec![
                    format!("{} ({})", label, dir),
                    (*label).to_string(),
                ],
                None => vec![
                    format!("Speed: step {} of 126 ({})", speed - 1, dir),
                    format!("Speed {}", speed - 1),
                ],
            };
            out.fields.push(Field::new(instr.start, data.end, texts));
        }
        0x3E => {
            let data = cur.take()?;
            let enabled = data.value >> 7 == 0;
            out.fields.push(Field::new(
                instr.start,
                data.end,
                vec![
                    format!(
                        "Restricted speed step: {} (step {})",
                        if enabled { "enabled" } else { "disabled" },
                        data.value & 0x1F
                    ),
                    "Restricted speed".into(),
                ],
            ));
        }
        0x3D => {
            let output = cur.take()?;
            let value = cur.take()?;
            out.fields.push(Field::new(
                instr.start,
                value.end,
                vec![
                    format!(
                        "Analog function: output {}, value {}",
                        output.value, value.value
                    ),
                    format!("Analog {}={}", output.value, value.value),
                ],
            ));
        }
        _ => {
            out.fields.push(Field::new(
                instr.start,
                instr.end,
                vec![
                    format!("Unknown advanced operation: 0x{:02X}", instr.value),
                    "Unknown adv op".into(),
                ],
            ));
        }
    }
    Ok(())
}

/// 28/14-step speed and direction instruction (classes 010 and 011)
fn decode_speed(
    instr: &PacketByte,
    config: &DecoderConfig,
    out: &mut DecodedPacket,
    forward: bool,
) -> Result<(), usize> {
    let dir = if forward { "forward" } else { "reverse" };
    match config.speed_steps {
        SpeedStepMode::Steps14 => {
            let speed = instr.value & 0x0F;
            let f0 = (instr.value >> 4) & 1 == 1;
            let texts = match speed {
                0 => vec![format!("Stop ({})", dir), "Stop".into()],
                1 => vec![format!("Emergency stop ({})", dir), "E-stop".into()],
                _ => vec![
                    format!("Speed: step {} of 14 ({})", speed - 1, dir),
                    format!("Speed {}", speed - 1),
                ],
            };
            out.fields.push(Field::new(instr.start, instr.end, texts));
            out.fields.push(Field::new(
                instr.start,
                instr.end,
                vec![
                    format!("F0: {}", if f0 { "on" } else { "off" }),
                    format!("F0={}", u8::from(f0)),
                ],
            ));
        }
        SpeedStepMode::Steps28 => {
            // 5-bit code with the intermediate-step bit interleaved as LSB
            let code = ((instr.value & 0x0F) << 1) | ((instr.value >> 4) & 1);
            let texts = match code {
                0 => vec![format!("Stop ({})", dir), "Stop".into()],
                1 => vec![
                    format!("Stop, ignore direction ({})", dir),
                    "Stop (I)".into(),
                ],
                2 => vec![format!("Emergency stop ({})", dir), "E-stop".into()],
                3 => vec![
                    format!("Emergency stop, ignore direction ({})", dir),
                    "E-stop (I)".into(),
                ],
                _ => vec![
                    format!("Speed: step {} of 28 ({})", code - 3, dir),
                    format!("Speed {}", code - 3),
                ],
            };
            out.fields.push(Field::new(instr.start, instr.end, texts));
        }
    }
    Ok(())
}

fn push_function_group(
    out: &mut DecodedPacket,
    span: &PacketByte,
    bits: u8,
    base: u32,
    count: u32,
) {
    let mut on = Vec::new();
    for i in 0..count {
        if (bits >> i) & 1 == 1 {
            on.push(format!("F{}", base + i));
        }
    }
    out.fields.push(Field::new(
        span.start,
        span.end,
        vec![
            format!(
                "Functions F{}-F{}: {}",
                base,
                base + count - 1,
                if on.is_empty() { "all off".to_string() } else { on.join(" ") }
            ),
            format!("F{}-F{}", base, base + count - 1),
        ],
    ));
}

const WEEKDAYS: &[&str] = &[
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday", "invalid",
];

fn decode_feature_expansion(
    cur: &mut ByteCursor,
    instr: &PacketByte,
    out: &mut DecodedPacket,
    broadcast: bool,
) -> Result<(), usize> {
    match instr.value & 0x1F {
        0x00 => {
            // Binary state control, long form: 15-bit state address
            let low = cur.take()?;
            let high = cur.take()?;
            let state = low.value >> 7 == 1;
            let address = ((high.value as u32) << 7) | (low.value & 0x7F) as u32;
            let target = if address == 0 {
                "all binary states".to_string()
            } else {
                format!("binary state {}", address)
            };
            out.fields.push(Field::new(
                instr.start,
                high.end,
                vec![
                    format!(
                        "Binary state (long form): {} = {}",
                        target,
                        if state { "on" } else { "off" }
                    ),
                    format!("BinState {}={}", address, u8::from(state)),
                ],
            ));
        }
        0x01 => {
            // Model time broadcast: minute, weekday + hour, acceleration
            let b1 = cur.take()?;
            let b2 = cur.take()?;
            let b3 = cur.take()?;
            let minute = b1.value & 0x3F;
            let weekday = (b2.value >> 5) as usize;
            let hour = b2.value & 0x1F;
            let factor = b3.value & 0x3F;
            out.fields.push(Field::new(
                instr.start,
                b3.end,
                vec![
                    format!(
                        "Model time: {} {:02}:{:02}, acceleration factor {}",
                        WEEKDAYS[weekday.min(7)],
                        hour,
                        minute,
                        factor
                    ),
                    format!("Time {:02}:{:02}", hour, minute),
                ],
            ));
            check_broadcast_only(out, instr, broadcast, "Model time");
        }
        0x02 => {
            // Model date broadcast: day, month, 12-bit year
            let b1 = cur.take()?;
            let b2 = cur.take()?;
            let b3 = cur.take()?;
            let day = b1.value & 0x1F;
            let month = b2.value >> 4;
            let year = (((b2.value & 0x0F) as u16) << 8) | b3.value as u16;
            out.fields.push(Field::new(
                instr.start,
                b3.end,
                vec![
                    format!("Model date: {:02}.{:02}.{:04}", day, month, year),
                    format!("Date {:02}.{:02}.{}", day, month, year),
                ],
            ));
            check_broadcast_only(out, instr, broadcast, "Model date");
        }
        0x03 => {
            // System time: 16-bit milliseconds since system start
            let b1 = cur.take()?;
            let b2 = cur.take()?;
            let ms = ((b1.value as u16) << 8) | b2.value as u16;
            out.fields.push(Field::new(
                instr.start,
                b2.end,
                vec![
                    format!("System time: {} ms", ms),
                    format!("Sys time {}", ms),
                ],
            ));
            check_broadcast_only(out, instr, broadcast, "System time");
        }
        0x1D => {
            // Binary state control, short form: address packed with data bit
            let data = cur.take()?;
            let state = data.value >> 7 == 1;
            let address = data.value & 0x7F;
            let target = if address == 0 {
                "all binary states".to_string()
            } else {
                format!("binary state {}", address)
            };
            out.fields.push(Field::new(
                instr.start,
                data.end,
                vec![
                    format!(
                        "Binary state (short form): {} = {}",
                        target,
                        if state { "on" } else { "off" }
                    ),
                    format!("BinState {}={}", address, u8::from(state)),
                ],
            ));
        }
        0x1E => {
            let data = cur.take()?;
            push_function_group(out, &span_of(instr, data), data.value, 13, 8);
        }
        0x1F => {
            let data = cur.take()?;
            push_function_group(out, &span_of(instr, data), data.value, 21, 8);
        }
        0x18 => {
            let data = cur.take()?;
            push_function_group(out, &span_of(instr, data), data.value, 29, 8);
        }
        0x19 => {
            let data = cur.take()?;
            push_function_group(out, &span_of(instr, data), data.value, 37, 8);
        }
        0x1A => {
            let data = cur.take()?;
            push_function_group(out, &span_of(instr, data), data.value, 45, 8);
        }
        0x1B => {
            let data = cur.take()?;
            push_function_group(out, &span_of(instr, data), data.value, 53, 8);
        }
        0x1C => {
            let data = cur.take()?;
            push_function_group(out, &span_of(instr, data), data.value, 61, 8);
        }
        _ => {
            out.fields.push(Field::new(
                instr.start,
                instr.end,
                vec![
                    format!("Unknown feature expansion: 0x{:02X}", instr.value),
                    "Unknown feature".into(),
                ],
            ));
        }
    }
    Ok(())
}

/// The three time broadcasts are only valid for the broadcast address; a
/// directed packet is reported, not suppressed.
fn check_broadcast_only(
    out: &mut DecodedPacket,
    instr: &PacketByte,
    broadcast: bool,
    what: &str,
) {
    if !broadcast {
        out.fields.push(Field::error(
            instr.start,
            instr.end,
            vec![
                format!("{} must be addressed to broadcast", what),
                "Not broadcast".into(),
            ],
        ));
    }
}

fn span_of(a: &PacketByte, b: &PacketByte) -> PacketByte {
    PacketByte {
        value: b.value,
        start: a.start,
        end: b.end,
    }
}

/// CV access instructions (class 111), shared by operations mode and the
/// accessory POM form
fn decode_cv_access(
    cur: &mut ByteCursor,
    instr: &PacketByte,
    out: &mut DecodedPacket,
    label: &str,
) -> Result<(), usize> {
    let cc = (instr.value >> 2) & 0x03;
    if cc == 0b00 {
        return decode_xpom(cur, instr, out);
    }

    // Short form: 10-bit CV address from the two low opcode bits + one byte
    let cv_low = cur.take()?;
    let cv = ((((instr.value & 0x03) as u32) << 8) | cv_low.value as u32) + 1;
    out.cv_address = Some(cv);
    match cc {
        0b01 => {
            let data = cur.take()?;
            out.fields.push(Field::new(
                instr.start,
                data.end,
                vec![
                    format!("{}: verify CV {} == {}", label, cv, data.value),
                    format!("Verify CV{}", cv),
                ],
            ));
        }
        0b11 => {
            let data = cur.take()?;
            out.fields.push(Field::new(
                instr.start,
                data.end,
                vec![
                    format!("{}: write CV {} = {}", label, cv, data.value),
                    format!("Write CV{}", cv),
                ],
            ));
        }
        _ => {
            // Bit manipulation: 111KDBBB
            let bitop = cur.take()?;
            let write = (bitop.value >> 4) & 1 == 1;
            let value = (bitop.value >> 3) & 1;
            let bit = bitop.value & 0x07;
            out.fields.push(Field::new(
                instr.start,
                bitop.end,
                vec![
                    format!(
                        "{}: {} CV {} bit {} {} {}",
                        label,
                        if write { "write" } else { "verify" },
                        cv,
                        bit,
                        if write { "=" } else { "==" },
                        value
                    ),
                    format!("CV{} bit {}", cv, bit),
                ],
            ));
        }
    }
    Ok(())
}

/// Long-form POM/XPOM: 16- or 24-bit CV address selected by the sub-opcode,
/// then a trailing operation discriminator and data bytes
fn decode_xpom(
    cur: &mut ByteCursor,
    instr: &PacketByte,
    out: &mut DecodedPacket,
) -> Result<(), usize> {
    let seq = instr.value & 0x03;
    let addr_bytes = if seq < 2 { 2 } else { 3 };
    let mut cv: u32 = 0;
    for _ in 0..addr_bytes {
        let b = cur.take()?;
        cv = (cv << 8) | b.value as u32;
    }
    let cv = cv + 1;
    out.cv_address = Some(cv);

    let op = cur.take()?;
    let (op_name, takes_data) = match op.value & 0x03 {
        0b00 => ("read", false),
        0b01 => ("write", true),
        0b10 => ("bit write", true),
        _ => ("reserved op", false),
    };
    out.fields.push(Field::new(
        instr.start,
        op.end,
        vec![
            format!(
                "XPOM ({} bit, seq {}): {} CV {}",
                addr_bytes * 8,
                seq,
                op_name,
                cv
            ),
            format!("XPOM {} CV{}", op_name, cv),
        ],
    ));

    if takes_data {
        for byte in cur.drain() {
            out.fields.push(Field::new(
                byte.start,
                byte.end,
                vec![
                    format!("XPOM data: 0x{:02X}", byte.value),
                    format!("0x{:02X}", byte.value),
                ],
            ));
        }
    }
    Ok(())
}

/// Service-mode packets: register/page mode at length 3, direct CV mode at
/// length 4 (lengths include the checksum byte)
fn decode_service_mode(
    cur: &mut ByteCursor,
    b0: &PacketByte,
    packet: &Packet,
    out: &mut DecodedPacket,
) -> Result<(), usize> {
    match packet.bytes.len() {
        3 => {
            // Register mode: 0111 CRRR + data
            let write = (b0.value >> 3) & 1 == 1;
            let register = (b0.value & 0x07) + 1;
            let data = cur.take()?;
            out.fields.push(Field::new(
                b0.start,
                data.end,
                vec![
                    format!(
                        "Service mode: {} register {}, value {}",
                        if write { "write" } else { "verify" },
                        register,
                        data.value
                    ),
                    format!("Reg {} {}", register, if write { "write" } else { "verify" }),
                ],
            ));
            Ok(())
        }
        4 => {
            // Direct mode: 0111 CCAA + CV low byte + data
            let cc = (b0.value >> 2) & 0x03;
            let cv_low = cur.take()?;
            let cv = ((((b0.value & 0x03) as u32) << 8) | cv_low.value as u32) + 1;
            out.cv_address = Some(cv);
            let data = cur.take()?;
            match cc {
                0b01 => {
                    out.fields.push(Field::new(
                        b0.start,
                        data.end,
                        vec![
                            format!("Service mode: verify CV {} == {}", cv, data.value),
                            format!("Verify CV{}", cv),
                        ],
                    ));
                }
                0b11 => {
                    out.fields.push(Field::new(
                        b0.start,
                        data.end,
                        vec![
                            format!("Service mode: write CV {} = {}", cv, data.value),
                            format!("Write CV{}", cv),
                        ],
                    ));
                }
                0b10 => {
                    let write = (data.value >> 4) & 1 == 1;
                    let value = (data.value >> 3) & 1;
                    let bit = data.value & 0x07;
                    out.fields.push(Field::new(
                        b0.start,
                        data.end,
                        vec![
                            format!(
                                "Service mode: {} CV {} bit {} {} {}",
                                if write { "write" } else { "verify" },
                                cv,
                                bit,
                                if write { "=" } else { "==" },
                                value
                            ),
                            format!("CV{} bit {}", cv, bit),
                        ],
                    ));
                }
                _ => {
                    out.fields.push(Field::new(
                        b0.start,
                        data.end,
                        vec![
                            format!("Unknown service-mode packet: 0x{:02X}", b0.value),
                            "Unknown service".into(),
                        ],
                    ));
                }
            }
            Ok(())
        }
        _ => {
            // Wrong packet length for the service grammar: flag the bytes as
            // plausibly belonging to operations mode.
            out.fields.push(Field::new(
                b0.start,
                b0.end,
                vec![
                    format!(
                        "Unknown byte 0x{:02X} (may be an operations-mode packet)",
                        b0.value
                    ),
                    "Unknown (ops mode?)".into(),
                ],
            ));
            for byte in cur.drain() {
                out.fields.push(Field::new(
                    byte.start,
                    byte.end,
                    vec![
                        format!("Unknown byte: 0x{:02X}", byte.value),
                        format!("0x{:02X}", byte.value),
                    ],
                ));
            }
            Ok(())
        }
    }
}

fn unknown_instruction_texts(value: u8, maybe_service: bool) -> Vec<String> {
    if maybe_service {
        vec![
            format!(
                "Unknown instruction 0x{:02X} (may be a service-mode packet)",
                value
            ),
            "Unknown (service mode?)".into(),
        ]
    } else {
        vec![
            format!("Unknown instruction: 0x{:02X}", value),
            "Unknown".into(),
        ]
    }
}

/// Accessory decoder packets: basic, extended, and POM forms
fn decode_accessory(
    cur: &mut ByteCursor,
    config: &DecoderConfig,
    b0: &PacketByte,
    out: &mut DecodedPacket,
) -> Result<(), usize> {
    let b1 = cur.take()?;

    if b1.value & 0x80 != 0 {
        // Basic form: 10AAAAAA 1AAACDDR with the upper address bits sent
        // one's-complemented
        let decoder = ((((!b1.value) as u16) & 0x70) << 2) | (b0.value & 0x3F) as u16;
        let activate = (b1.value >> 3) & 1 == 1;
        let pair = (b1.value >> 1) & 0x03;
        let gate = b1.value & 1;

        if decoder == 0x1FF {
            out.fields.push(Field::new(
                b0.start,
                b1.end,
                vec!["Accessory broadcast".into(), "Acc broadcast".into()],
            ));
        } else {
            let turnout =
                (decoder as i32 - 1) * 4 + pair as i32 + 1 + config.accessory_offset;
            if turnout >= 0 {
                out.accessory_address = Some(turnout as u16);
            }
            out.fields.push(Field::new(
                b0.start,
                b1.end,
                vec![
                    format!(
                        "Accessory: address {}, output {} {}",
                        turnout,
                        gate,
                        if activate { "activate" } else { "deactivate" }
                    ),
                    format!("Acc {}", turnout),
                ],
            ));
        }

        // A basic address pair followed by a CV instruction is the POM form
        if let Some(next) = cur.peek() {
            if next.value >> 4 == 0b1110 {
                let instr = cur.take()?;
                return decode_cv_access(cur, instr, out, "Accessory POM");
            }
        }
        Ok(())
    } else if b1.value & 0x89 == 0x01 {
        // Extended form: 10AAAAAA 0AAA0AA1 + aspect
        let address = ((((!b1.value) as u16) & 0x70) << 4)
            | ((b0.value & 0x3F) as u16) << 2
            | ((b1.value as u16) >> 1) & 0x03;
        out.accessory_address = Some(address);
        let aspect = cur.take()?;
        out.fields.push(Field::new(
            b0.start,
            aspect.end,
            vec![
                format!(
                    "Extended accessory: address {}, aspect {}",
                    address, aspect.value
                ),
                format!("ExtAcc {} aspect {}", address, aspect.value),
            ],
        ));
        Ok(())
    } else {
        out.fields.push(Field::new(
            b0.start,
            b1.end,
            vec![
                format!("Unknown accessory form: 0x{:02X} 0x{:02X}", b0.value, b1.value),
                "Unknown accessory".into(),
            ],
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecoderConfig;

    fn packet_of(values: &[u8]) -> Packet {
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

    fn with_checksum(content: &[u8]) -> Packet {
        let xor = content.iter().fold(0u8, |a, &b| a ^ b);
        let mut values = content.to_vec();
        values.push(xor);
        packet_of(&values)
    }

    fn field_texts(decoded: &DecodedPacket) -> Vec<&str> {
        decoded.fields.iter().map(|f| f.texts[0].as_str()).collect()
    }

    #[test]
    fn test_idle_packet() {
        let decoded = decode_packet(&with_checksum(&[0xFF, 0x00]), &DecoderConfig::new());
        assert_eq!(decoded.address_kind, AddressKind::Idle);
        assert_eq!(decoded.checksum, ChecksumStatus::Valid);
    }

    #[test]
    fn test_system_command() {
        let decoded = decode_packet(&with_checksum(&[0xFF, 0x42]), &DecoderConfig::new());
        assert_eq!(decoded.address_kind, AddressKind::System);
        assert!(field_texts(&decoded)[0].contains("System command: 0x42"));
    }

    #[test]
    fn test_128_step_speed() {
        // Address 3, 0x3F advanced op, forward speed byte 0x8C (S=12)
        let decoded = decode_packet(&with_checksum(&[3, 0x3F, 0x8C]), &DecoderConfig::new());
        assert_eq!(decoded.address_kind, AddressKind::MultiFunction7);
        assert_eq!(decoded.decoder_address, Some(3));
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("step 11 of 126") && t.contains("forward")));
    }

    #[test]
    fn test_128_step_sentinels() {
        let stop = decode_packet(&with_checksum(&[3, 0x3F, 0x80]), &DecoderConfig::new());
        assert!(field_texts(&stop).iter().any(|t| t.starts_with("Stop")));
        let estop = decode_packet(&with_checksum(&[3, 0x3F, 0x01]), &DecoderConfig::new());
        assert!(field_texts(&estop)
            .iter()
            .any(|t| t.starts_with("Emergency stop")));
    }

    #[test]
    fn test_28_step_speed() {
        // 011SSSSS with code bits: instr 0x74 -> code = (0b0100 << 1) | 1 = 9
        // -> step 6 forward
        let decoded = decode_packet(&with_checksum(&[10, 0x74]), &DecoderConfig::new());
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("step 6 of 28") && t.contains("forward")));
    }

    #[test]
    fn test_14_step_speed_carries_f0() {
        let config = DecoderConfig::new().with_speed_steps(SpeedStepMode::Steps14);
        // 0x75: forward, F0 on (bit 4), speed code 5 -> step 4
        let decoded = decode_packet(&with_checksum(&[10, 0x75]), &config);
        let texts = field_texts(&decoded);
        assert!(texts.iter().any(|t| t.contains("step 4 of 14")));
        assert!(texts.iter().any(|t| t.contains("F0: on")));
    }

    #[test]
    fn test_14_bit_address() {
        // 0xC2 0x9A -> address (0x02 << 8) | 0x9A = 666
        let decoded = decode_packet(&with_checksum(&[0xC2, 0x9A, 0x3F, 0x02]), &DecoderConfig::new());
        assert_eq!(decoded.address_kind, AddressKind::MultiFunction14);
        assert_eq!(decoded.decoder_address, Some(666));
    }

    #[test]
    fn test_function_group_one() {
        // 100 10110: F0 on, F1 off, F2 on, F3 on, F4 off
        let decoded = decode_packet(&with_checksum(&[3, 0x96]), &DecoderConfig::new());
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("F0 F2 F3")));
    }

    #[test]
    fn test_function_groups_f5_f12() {
        let f5 = decode_packet(&with_checksum(&[3, 0xB1]), &DecoderConfig::new());
        assert!(field_texts(&f5).iter().any(|t| t.contains("F5-F8: F5")));
        let f9 = decode_packet(&with_checksum(&[3, 0xA2]), &DecoderConfig::new());
        assert!(field_texts(&f9).iter().any(|t| t.contains("F9-F12: F10")));
    }

    #[test]
    fn test_feature_expansion_f13_f20() {
        // 0xDE + data byte: F13 and F20
        let decoded = decode_packet(&with_checksum(&[3, 0xDE, 0x81]), &DecoderConfig::new());
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("F13-F20: F13 F20")));
    }

    #[test]
    fn test_binary_state_short_and_long() {
        let short = decode_packet(&with_checksum(&[3, 0xDD, 0x85]), &DecoderConfig::new());
        assert!(field_texts(&short)
            .iter()
            .any(|t| t.contains("short form") && t.contains("binary state 5 = on")));
        // Long form: address = (2 << 7) | 5 = 261, off
        let long = decode_packet(&with_checksum(&[3, 0xC0, 0x05, 0x02]), &DecoderConfig::new());
        assert!(field_texts(&long)
            .iter()
            .any(|t| t.contains("long form") && t.contains("binary state 261 = off")));
    }

    #[test]
    fn test_model_time_broadcast() {
        // 0xC1, minute 30, weekday 2 hour 14, factor 10
        let decoded = decode_packet(
            &with_checksum(&[0, 0xC1, 30, (2 << 5) | 14, 10]),
            &DecoderConfig::new(),
        );
        let texts = field_texts(&decoded);
        assert!(texts.iter().any(|t| t.contains("Wednesday 14:30")));
        assert!(!decoded.fields.iter().any(|f| f.error));
    }

    #[test]
    fn test_model_time_directed_is_reported() {
        let decoded = decode_packet(
            &with_checksum(&[5, 0xC1, 30, (2 << 5) | 14, 10]),
            &DecoderConfig::new(),
        );
        assert!(decoded
            .fields
            .iter()
            .any(|f| f.error && f.texts[0].contains("broadcast")));
    }

    #[test]
    fn test_model_date() {
        let decoded = decode_packet(
            &with_checksum(&[0, 0xC2, 24, (12 << 4) | 0x07, 0xD0]),
            &DecoderConfig::new(),
        );
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("24.12.2000")));
    }

    #[test]
    fn test_pom_write_byte() {
        // 1110 1100 -> write, CV high bits 00; CV low 22 -> CV 23; value 7
        let decoded = decode_packet(&with_checksum(&[3, 0xEC, 22, 7]), &DecoderConfig::new());
        assert_eq!(decoded.cv_address, Some(23));
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("write CV 23 = 7")));
    }

    #[test]
    fn test_pom_bit_manipulation() {
        // 1110 1000 + CV low + 111KDBBB (write bit 2 = 1)
        let decoded = decode_packet(
            &with_checksum(&[3, 0xE8, 0x05, 0b1111_1010]),
            &DecoderConfig::new(),
        );
        assert_eq!(decoded.cv_address, Some(6));
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("write CV 6 bit 2 = 1")));
    }

    #[test]
    fn test_xpom_16_bit_write() {
        // 1110 0000: seq 0, 16-bit CV address 0x0102 -> CV 259, op write, one data byte
        let decoded = decode_packet(
            &with_checksum(&[3, 0xE0, 0x01, 0x02, 0x01, 0xAB]),
            &DecoderConfig::new(),
        );
        assert_eq!(decoded.cv_address, Some(259));
        let texts = field_texts(&decoded);
        assert!(texts.iter().any(|t| t.contains("XPOM (16 bit, seq 0): write CV 259")));
        assert!(texts.iter().any(|t| t.contains("XPOM data: 0xAB")));
    }

    #[test]
    fn test_xpom_24_bit_read() {
        // seq 2 -> 24-bit address
        let decoded = decode_packet(
            &with_checksum(&[3, 0xE2, 0x00, 0x01, 0x00, 0x00]),
            &DecoderConfig::new(),
        );
        assert_eq!(decoded.cv_address, Some(257));
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("XPOM (24 bit, seq 2): read CV 257")));
    }

    #[test]
    fn test_basic_accessory() {
        // Decoder 1, pair 0, activate, gate 0:
        // b0 = 0x81, b1 = 1 111 1 00 0 = 0xF8 -> turnout 1
        let decoded = decode_packet(&with_checksum(&[0x81, 0xF8]), &DecoderConfig::new());
        assert_eq!(decoded.address_kind, AddressKind::Accessory);
        assert_eq!(decoded.accessory_address, Some(1));
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("Accessory: address 1") && t.contains("activate")));
    }

    #[test]
    fn test_basic_accessory_offset() {
        let config = DecoderConfig::new().with_accessory_offset(4);
        let decoded = decode_packet(&with_checksum(&[0x81, 0xF8]), &config);
        assert_eq!(decoded.accessory_address, Some(5));
    }

    #[test]
    fn test_extended_accessory() {
        // b0 = 0x81 (low addr 1), b1 = 0 111 0 01 1: high bits 000, two
        // address LSBs 01 -> address (1 << 2) | 1 = 5, aspect 9
        let decoded = decode_packet(&with_checksum(&[0x81, 0x73, 9]), &DecoderConfig::new());
        assert_eq!(decoded.accessory_address, Some(5));
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("aspect 9")));
    }

    #[test]
    fn test_accessory_pom() {
        // Basic address bytes followed by a CV write instruction
        let decoded = decode_packet(
            &with_checksum(&[0x81, 0xF8, 0xEC, 0x00, 0x2A]),
            &DecoderConfig::new(),
        );
        assert_eq!(decoded.cv_address, Some(1));
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("Accessory POM: write CV 1 = 42")));
    }

    #[test]
    fn test_service_mode_direct_write() {
        let config = DecoderConfig::new().with_service_mode(true);
        // 0111 1100 -> direct write, CV high 00; CV low 7 -> CV 8; value 3
        let decoded = decode_packet(&with_checksum(&[0x7C, 0x07, 0x03]), &config);
        assert_eq!(decoded.address_kind, AddressKind::ServiceMode);
        assert_eq!(decoded.cv_address, Some(8));
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("write CV 8 = 3")));
    }

    #[test]
    fn test_service_mode_register() {
        let config = DecoderConfig::new().with_service_mode(true);
        // Length-3 packet: 0111 1010 -> write register 3, value 5
        let decoded = decode_packet(&with_checksum(&[0x7A, 0x05]), &config);
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("write register 3, value 5")));
    }

    #[test]
    fn test_service_range_without_option_is_operations() {
        // Same first byte without the service-mode option: 7-bit address 124
        let decoded = decode_packet(&with_checksum(&[0x7C, 0x07, 0x03]), &DecoderConfig::new());
        assert_eq!(decoded.address_kind, AddressKind::MultiFunction7);
        assert_eq!(decoded.decoder_address, Some(124));
    }

    #[test]
    fn test_unknown_instruction_hints_service_mode() {
        // Address 112-127 in operations mode with an unrecognized control
        // instruction: flagged as plausibly service mode
        let decoded = decode_packet(&with_checksum(&[0x7C, 0x07]), &DecoderConfig::new());
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("may be a service-mode packet")));
    }

    #[test]
    fn test_reserved_address_space() {
        let decoded = decode_packet(&with_checksum(&[240, 0x12, 0x34]), &DecoderConfig::new());
        assert_eq!(decoded.address_kind, AddressKind::Reserved);
        let texts = field_texts(&decoded);
        assert!(texts[0].contains("Reserved"));
        assert!(texts.iter().any(|t| t.contains("Unknown byte: 0x12")));
    }

    #[test]
    fn test_missing_operand_byte() {
        // A packet cut one byte short of its checksum: the final byte is
        // presumed to be the checksum, so the 128-step speed instruction has
        // no speed byte left to consume.
        let decoded = decode_packet(&packet_of(&[0x03, 0x3F, 0x10]), &DecoderConfig::new());
        assert_eq!(decoded.checksum, ChecksumStatus::Invalid);
        assert!(decoded
            .fields
            .iter()
            .any(|f| f.error && f.texts[0].contains("Byte missing at position 2")));
        // The address field decoded before the truncation still stands
        assert!(decoded.fields[0].texts[0].contains("Address: 3"));
    }

    #[test]
    fn test_decoder_reset() {
        let decoded = decode_packet(&with_checksum(&[0x00, 0x00]), &DecoderConfig::new());
        assert_eq!(decoded.address_kind, AddressKind::Broadcast);
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("reset (broadcast)")));
    }

    #[test]
    fn test_consist_control_takes_operand() {
        let decoded = decode_packet(&with_checksum(&[3, 0x12, 0x08]), &DecoderConfig::new());
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("consist: address 8")));
    }

    #[test]
    fn test_unclaimed_bytes_after_instruction() {
        // Speed instruction consumes nothing extra; the stray byte before
        // the checksum is unclaimed
        let decoded = decode_packet(&with_checksum(&[10, 0x74, 0x55]), &DecoderConfig::new());
        assert!(field_texts(&decoded)
            .iter()
            .any(|t| t.contains("Unclaimed byte: 0x55")));
    }
}
