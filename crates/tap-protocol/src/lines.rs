//! Newline-delimited message reading. Uses `bytelines` (teacher's own
//! dependency) ahead of `serde_json::from_slice`, rather than
//! `BufRead::read_line` plus a `String` allocation per line.

use crate::message::Message;
use bytelines::ByteLines;
use std::io::BufRead;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error reading tap input")]
    Io(#[from] std::io::Error),
    #[error("malformed line: {0}")]
    Json(#[from] serde_json::Error),
}

/// One parsed line plus its 1-based position, so errors can name the
/// offending line (spec.md §6, "Exit codes").
pub struct Line {
    pub number: usize,
    pub message: Message,
}

/// Iterates parsed [`Message`]s from any blocking [`BufRead`]. Intended to
/// be driven from a dedicated blocking thread (e.g.
/// `tokio::task::spawn_blocking`) since `bytelines` is synchronous; the tap
/// protocol's ingress is a single blocking consumer (spec.md §5).
pub struct MessageReader<R: BufRead> {
    lines: ByteLines<R>,
    number: usize,
}

impl<R: BufRead> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        MessageReader {
            lines: ByteLines::new(reader),
            number: 0,
        }
    }
}

impl<R: BufRead> Iterator for MessageReader<R> {
    type Item = Result<Line, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = match self.lines.next()? {
                Ok(raw) => raw,
                Err(e) => return Some(Err(e.into())),
            };
            self.number += 1;
            if raw.is_empty() {
                continue;
            }
            return Some(
                serde_json::from_slice::<Message>(raw)
                    .map(|message| Line {
                        number: self.number,
                        message,
                    })
                    .map_err(Error::from),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_multiple_lines_and_skips_blank() {
        let input = b"{\"type\":\"STATE\",\"value\":{}}\n\n{\"type\":\"ACTIVATE_VERSION\",\"stream\":\"s\",\"version\":1}\n";
        let reader = MessageReader::new(&input[..]);
        let lines: Vec<_> = reader.collect::<Result<_, _>>().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].number, 1);
        assert_eq!(lines[1].number, 3);
    }

    #[test]
    fn reports_malformed_line_as_error() {
        let input = b"not json\n";
        let mut reader = MessageReader::new(&input[..]);
        assert!(matches!(reader.next(), Some(Err(Error::Json(_)))));
    }
}
