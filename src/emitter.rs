//! Correlation emitter.
//!
//! Writes one JSON object per line and flushes after every record, so the
//! file stays usable up to the last completed entity if the run aborts.

use crate::error::ImportResult;
use crate::models::CorrelationRecord;
use std::io::Write;

pub struct CorrelationEmitter<W: Write> {
    out: W,
    written: usize,
}

impl<W: Write> CorrelationEmitter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn emit(&mut self, record: &CorrelationRecord) -> ImportResult<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
