//! Annotation rendering
//!
//! Writes annotations either as aligned text lines or as JSON lines, one
//! annotation per call, to any `Write` target.

use anyhow::Result;
use dcc_decoder::{Annotation, AnnotationSink};
use std::io::Write;

/// Output format for decoded annotations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Sink that renders annotations as they are emitted
pub struct RenderSink<W: Write> {
    out: W,
    format: OutputFormat,
    /// First write error, reported after the run
    error: Option<std::io::Error>,
    count: usize,
}

impl<W: Write> RenderSink<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            error: None,
            count: 0,
        }
    }

    /// Number of annotations written so far
    pub fn count(&self) -> usize {
        self.count
    }

    /// Surface any deferred write error
    pub fn finish(mut self) -> Result<usize> {
        self.out.flush()?;
        match self.error {
            Some(e) => Err(e.into()),
            None => Ok(self.count),
        }
    }

    fn write_annotation(&mut self, ann: &Annotation) -> std::io::Result<()> {
        match self.format {
            OutputFormat::Text => {
                writeln!(
                    self.out,
                    "{:>10}..{:<10} {:<8} {}",
                    ann.start,
                    ann.end,
                    ann.kind.to_string(),
                    ann.text()
                )
            }
            OutputFormat::Json => {
                let line = serde_json::to_string(ann)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                writeln!(self.out, "{}", line)
            }
        }
    }
}

impl<W: Write> AnnotationSink for RenderSink<W> {
    fn annotate(&mut self, annotation: Annotation) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.write_annotation(&annotation) {
            self.error = Some(e);
        } else {
            self.count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcc_decoder::AnnotationKind;

    #[test]
    fn test_text_rendering() {
        let mut sink = RenderSink::new(Vec::new(), OutputFormat::Text);
        sink.annotate(Annotation::new(
            0,
            116,
            AnnotationKind::Bit,
            vec!["1".into()],
        ));
        assert_eq!(sink.count(), 1);
        let out = String::from_utf8(sink.out).unwrap();
        assert!(out.contains("bit"));
        assert!(out.trim_end().ends_with('1'));
    }

    #[test]
    fn test_json_rendering_is_parseable() {
        let mut sink = RenderSink::new(Vec::new(), OutputFormat::Json);
        sink.annotate(Annotation::new(
            5,
            10,
            AnnotationKind::Checksum,
            vec!["Checksum OK (0x42)".into()],
        ));
        let out = String::from_utf8(sink.out).unwrap();
        let value: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(value["start"], 5);
        assert_eq!(value["kind"], "checksum");
    }
}
