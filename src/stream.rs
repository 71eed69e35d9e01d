//! Export stream demultiplexer.
//!
//! The export is newline-delimited JSON. A count marker
//! (`{"type":"count","object_type":"user","count":N}`) opens a section; the
//! records after it are of that kind until the next marker. Sections are cut
//! into batches of at most `capacity` records so a large section is never
//! held in memory at once.

use crate::error::{ImportError, ImportResult};
use crate::models::{CountMarker, PostRecord, ProjectRecord, RecordKind, UserRecord};
use serde_json::Value;
use std::io::{self, BufRead, Lines};
use std::mem;

/// Records of one batch, typed by section kind.
#[derive(Debug)]
pub enum BatchRecords {
    Users(Vec<UserRecord>),
    Projects(Vec<ProjectRecord>),
    Posts(Vec<PostRecord>),
}

impl BatchRecords {
    fn empty(kind: RecordKind) -> Self {
        match kind {
            RecordKind::User => BatchRecords::Users(Vec::new()),
            RecordKind::Project => BatchRecords::Projects(Vec::new()),
            RecordKind::Post => BatchRecords::Posts(Vec::new()),
        }
    }

    fn push(&mut self, value: Value) -> Result<(), serde_json::Error> {
        match self {
            BatchRecords::Users(records) => records.push(serde_json::from_value(value)?),
            BatchRecords::Projects(records) => records.push(serde_json::from_value(value)?),
            BatchRecords::Posts(records) => records.push(serde_json::from_value(value)?),
        }
        Ok(())
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            BatchRecords::Users(_) => RecordKind::User,
            BatchRecords::Projects(_) => RecordKind::Project,
            BatchRecords::Posts(_) => RecordKind::Post,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BatchRecords::Users(records) => records.len(),
            BatchRecords::Projects(records) => records.len(),
            BatchRecords::Posts(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A bounded run of same-kind records plus its place in the section.
#[derive(Debug)]
pub struct Batch {
    pub records: BatchRecords,
    /// Count declared by the section's marker.
    pub total: usize,
    /// Position of the first record within its section.
    pub offset: usize,
}

struct Section {
    total: usize,
    offset: usize,
    buffer: BatchRecords,
}

/// Iterator of batches read from an export stream.
///
/// Yields an error and then stops on malformed input.
pub struct BatchStream<R> {
    lines: Lines<R>,
    capacity: usize,
    line_no: usize,
    section: Option<Section>,
    finished: bool,
}

impl<R: BufRead> BatchStream<R> {
    pub fn new(reader: R, capacity: usize) -> Self {
        Self {
            lines: reader.lines(),
            capacity: capacity.max(1),
            line_no: 0,
            section: None,
            finished: false,
        }
    }

    fn accept(&mut self, line: &str) -> ImportResult<Option<Batch>> {
        let line_no = self.line_no;
        let value: Value = serde_json::from_str(line)
            .map_err(|e| ImportError::protocol(line_no, format!("invalid json: {e}")))?;

        if value.get("type").and_then(Value::as_str) == Some("count") {
            let marker: CountMarker = serde_json::from_value(value)
                .map_err(|e| ImportError::protocol(line_no, format!("invalid count marker: {e}")))?;
            log::debug!(
                "line {}: section of {} {} records",
                line_no,
                marker.count,
                marker.object_type
            );

            let flushed = self.take_batch();
            self.section = Some(Section {
                total: marker.count,
                offset: 0,
                buffer: BatchRecords::empty(marker.object_type),
            });
            return Ok(flushed);
        }

        let section = self
            .section
            .as_mut()
            .ok_or_else(|| ImportError::protocol(line_no, "record precedes any count marker"))?;
        let kind = section.buffer.kind();
        section
            .buffer
            .push(value)
            .map_err(|e| ImportError::protocol(line_no, format!("invalid {kind} record: {e}")))?;

        if section.buffer.len() >= self.capacity {
            return Ok(self.take_batch());
        }
        Ok(None)
    }

    fn take_batch(&mut self) -> Option<Batch> {
        let section = self.section.as_mut()?;
        if section.buffer.is_empty() {
            return None;
        }

        let kind = section.buffer.kind();
        let records = mem::replace(&mut section.buffer, BatchRecords::empty(kind));
        let batch = Batch {
            total: section.total,
            offset: section.offset,
            records,
        };
        section.offset += batch.records.len();
        Some(batch)
    }
}

impl<R: BufRead> Iterator for BatchStream<R> {
    type Item = ImportResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            match self.lines.next() {
                None => {
                    self.finished = true;
                    return self.take_batch().map(Ok);
                }
                Some(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    self.finished = true;
                    return Some(Err(ImportError::protocol(
                        self.line_no + 1,
                        format!("line is not valid UTF-8: {e}"),
                    )));
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
                Some(Ok(line)) => {
                    self.line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match self.accept(&line) {
                        Ok(Some(batch)) => return Some(Ok(batch)),
                        Ok(None) => {}
                        Err(e) => {
                            self.finished = true;
                            return Some(Err(e));
                        }
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn user_line(i: usize) -> String {
        format!(r#"{{"username":"u{i:04}","email":"u{i}@example.com","name":"User {i}"}}"#)
    }

    fn marker(kind: &str, count: usize) -> String {
        format!(r#"{{"type":"count","object_type":"{kind}","count":{count}}}"#)
    }

    fn collect(input: String, capacity: usize) -> Vec<ImportResult<Batch>> {
        BatchStream::new(Cursor::new(input), capacity).collect()
    }

    #[test]
    fn test_large_section_is_split_at_capacity() {
        let mut lines = vec![marker("user", 2500)];
        lines.extend((0..2500).map(user_line));

        let batches: Vec<Batch> = collect(lines.join("\n"), 1000)
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let shape: Vec<(usize, usize, usize)> = batches
            .iter()
            .map(|b| (b.offset, b.records.len(), b.total))
            .collect();
        assert_eq!(
            shape,
            vec![(0, 1000, 2500), (1000, 1000, 2500), (2000, 500, 2500)]
        );
    }

    #[test]
    fn test_marker_flushes_previous_kind() {
        let input = [
            marker("user", 2),
            user_line(1),
            user_line(2),
            marker("project", 1),
            r#"{"guid":"p1abc","is_public":true,"contributors":["u0001"]}"#.to_string(),
        ]
        .join("\n");

        let batches: Vec<Batch> = collect(input, 1000)
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].records.kind(), RecordKind::User);
        assert_eq!(batches[0].records.len(), 2);
        assert_eq!(batches[1].records.kind(), RecordKind::Project);
        assert_eq!(batches[1].offset, 0);
        assert_eq!(batches[1].total, 1);
    }

    #[test]
    fn test_empty_sections_and_blank_lines_are_skipped() {
        let input = format!(
            "{}\n\n{}\n{}\n\n",
            marker("user", 0),
            marker("user", 1),
            user_line(1)
        );
        let batches = collect(input, 1000);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].as_ref().unwrap().records.len(), 1);
    }

    #[test]
    fn test_record_before_marker_is_protocol_error() {
        let batches = collect(user_line(1), 1000);
        assert_eq!(batches.len(), 1);
        assert!(matches!(
            batches[0],
            Err(ImportError::Protocol { line: 1, .. })
        ));
    }

    #[test]
    fn test_record_of_wrong_shape_is_protocol_error() {
        let input = [marker("project", 1), user_line(1)].join("\n");
        let batches = collect(input, 1000);
        assert!(matches!(
            batches.last(),
            Some(Err(ImportError::Protocol { line: 2, .. }))
        ));
    }

    #[test]
    fn test_unknown_section_kind_is_protocol_error() {
        let batches = collect(marker("wiki", 3), 1000);
        assert!(matches!(
            batches[0],
            Err(ImportError::Protocol { line: 1, .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_is_protocol_error_with_line() {
        let mut input = format!("{}\n", marker("user", 2)).into_bytes();
        input.extend_from_slice(b"{\"username\":\"\xff\xfe\"}\n");

        let batches: Vec<_> = BatchStream::new(Cursor::new(input), 1000).collect();
        assert_eq!(batches.len(), 1);
        assert!(matches!(
            batches[0],
            Err(ImportError::Protocol { line: 2, .. })
        ));
    }
}
