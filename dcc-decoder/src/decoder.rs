//! Main decoder API
//!
//! Drives the whole pipeline: pulls edges from the host, applies the
//! short-pulse prefilter, classifies bit periods over a sliding three-edge
//! window, feeds the frame state machine, and on every finalized packet runs
//! checksum verification, command decode, and search - emitting annotations
//! to the sink in arrival order. Single threaded and pull based: the one
//! suspension point per iteration is [`EdgeSource::wait_for_edge`].

use crate::command::decode_packet;
use crate::config::DecoderConfig;
use crate::framer::{BitAssembler, FeedOutcome};
use crate::search::run_search;
use crate::timing::{BitTiming, MIN_SAMPLE_RATE};
use crate::types::{
    Annotation, AnnotationKind, ChecksumStatus, DecoderError, Edge, Packet, Result,
};

/// Source of time-stamped line transitions
///
/// The host's "suspend until the next qualifying edge" primitive. Returning
/// `None` ends the decode run.
pub trait EdgeSource {
    fn wait_for_edge(&mut self) -> Option<Edge>;
}

/// A slice-backed edge source, mainly for tests and offline captures
pub struct EdgeSlice<'a> {
    edges: &'a [Edge],
    pos: usize,
}

impl<'a> EdgeSlice<'a> {
    pub fn new(edges: &'a [Edge]) -> Self {
        Self { edges, pos: 0 }
    }
}

impl EdgeSource for EdgeSlice<'_> {
    fn wait_for_edge(&mut self) -> Option<Edge> {
        let edge = self.edges.get(self.pos).copied();
        self.pos += 1;
        edge
    }
}

/// Receiver of decoded annotations, one call per emitted item
pub trait AnnotationSink {
    fn annotate(&mut self, annotation: Annotation);
}

impl AnnotationSink for Vec<Annotation> {
    fn annotate(&mut self, annotation: Annotation) {
        self.push(annotation);
    }
}

/// Coalesces interfering pulses shorter than the configured limit
///
/// A short pulse's two bounding edges are replaced by a single edge at the
/// pulse midpoint, so a glitch straddling a half-bit boundary leaves its
/// neighbours classifiable as if it never happened. Disabled (limit `None`),
/// edges pass through untouched and glitches classify as `Unknown`.
struct ShortPulseFilter<'a> {
    source: &'a mut dyn EdgeSource,
    limit: Option<u64>,
    pending: Option<u64>,
}

impl<'a> ShortPulseFilter<'a> {
    fn new(source: &'a mut dyn EdgeSource, limit: Option<u64>) -> Self {
        Self {
            source,
            limit,
            pending: None,
        }
    }

    fn next(&mut self) -> Option<u64> {
        let cur = self
            .pending
            .take()
            .or_else(|| self.source.wait_for_edge().map(|e| e.sample))?;
        let Some(limit) = self.limit else {
            return Some(cur);
        };
        match self.source.wait_for_edge().map(|e| e.sample) {
            None => Some(cur),
            Some(next) if next.saturating_sub(cur) <= limit => {
                log::trace!(
                    "merging short pulse {}..{} into its neighbours",
                    cur,
                    next
                );
                Some((cur + next) / 2)
            }
            Some(next) => {
                self.pending = Some(next);
                Some(cur)
            }
        }
    }
}

/// The main decoder - entry point for all decoding operations
pub struct Decoder {
    config: DecoderConfig,
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    /// Decode an edge stream to completion
    ///
    /// Validates the sample rate, then loops: wait for edges, classify,
    /// assemble, and on each finalized packet run checksum verification,
    /// command decode, and search. Deterministic for a given edge sequence.
    pub fn run(
        &self,
        samplerate: u64,
        source: &mut dyn EdgeSource,
        sink: &mut dyn AnnotationSink,
    ) -> Result<()> {
        if samplerate == 0 {
            return Err(DecoderError::MissingSampleRate);
        }
        if samplerate < MIN_SAMPLE_RATE {
            return Err(DecoderError::SampleRateTooLow(samplerate, MIN_SAMPLE_RATE));
        }

        log::info!("starting decode run at {} Hz", samplerate);
        let timing = BitTiming::new(
            samplerate,
            self.config.timing_tolerance,
            self.config.short_pulse_limit_us,
        );
        let limit = self
            .config
            .ignore_short_pulses
            .then(|| timing.short_pulse_max());
        let mut edges = ShortPulseFilter::new(source, limit);
        let mut assembler = BitAssembler::new();
        let mut pending = Vec::new();
        let mut packets = 0usize;

        // Sliding three-edge window: t1..t3 is one candidate bit period.
        // After a polarity straddle the pairing shifts by one edge, which is
        // the "flip the awaited edge polarity" of the resynchronization
        // state; it happens at most once per straddle.
        let Some(mut t1) = edges.next() else {
            log::info!("decode run ended: empty edge stream");
            return Ok(());
        };
        let mut held: Option<u64> = None;

        loop {
            let Some(t2) = held.take().or_else(|| edges.next()) else {
                break;
            };
            let Some(t3) = edges.next() else {
                break;
            };

            let class = timing.classify(t1, t2, t3);
            log::trace!("bit period {}..{}..{} -> {:?}", t1, t2, t3, class);
            match assembler.feed(class, t1, t3, &mut pending) {
                FeedOutcome::Continue => {
                    t1 = t3;
                }
                FeedOutcome::FlipPolarity => {
                    t1 = t2;
                    held = Some(t3);
                }
                FeedOutcome::Packet(packet) => {
                    packets += 1;
                    self.process_packet(&packet, &mut pending);
                    t1 = t3;
                }
            }
            for ann in pending.drain(..) {
                sink.annotate(ann);
            }
        }
        for ann in pending.drain(..) {
            sink.annotate(ann);
        }

        log::info!("decode run finished: {} packets", packets);
        Ok(())
    }

    /// Checksum, command decode, and search for one finalized packet
    fn process_packet(&self, packet: &Packet, out: &mut Vec<Annotation>) {
        let decoded = decode_packet(packet, &self.config);

        for field in &decoded.fields {
            let kind = if field.error {
                AnnotationKind::Error
            } else {
                AnnotationKind::Field
            };
            out.push(Annotation::new(field.start, field.end, kind, field.texts.clone()));
        }

        let last = packet.bytes.last();
        let (ck_start, ck_end) = last
            .map(|b| (b.start, b.end))
            .unwrap_or((packet.start, packet.end));
        let texts = match decoded.checksum {
            ChecksumStatus::Valid => {
                vec![
                    format!("Checksum OK (0x{:02X})", last.map(|b| b.value).unwrap_or(0)),
                    "Checksum OK".into(),
                ]
            }
            ChecksumStatus::Invalid => {
                let expected = packet.bytes[..packet.bytes.len() - 1]
                    .iter()
                    .fold(0u8, |a, b| a ^ b.value);
                vec![
                    format!(
                        "Checksum bad: expected 0x{:02X}, got 0x{:02X}",
                        expected,
                        last.map(|b| b.value).unwrap_or(0)
                    ),
                    "Checksum bad".into(),
                ]
            }
            ChecksumStatus::Missing => {
                vec!["Checksum missing (packet too short)".into(), "No checksum".into()]
            }
        };
        out.push(Annotation::new(ck_start, ck_end, AnnotationKind::Checksum, texts));

        for hit in run_search(&decoded, packet, &self.config.search) {
            out.push(hit);
        }
    }
}

/// Decode a slice of edges in one call
///
/// Convenience wrapper over [`Decoder::run`] with a slice source and a
/// collecting sink.
pub fn decode_edges(
    edges: &[Edge],
    samplerate: u64,
    config: &DecoderConfig,
) -> Result<Vec<Annotation>> {
    let mut source = EdgeSlice::new(edges);
    let mut out = Vec::new();
    Decoder::new(config.clone()).run(samplerate, &mut source, &mut out)?;
    Ok(out)
}
