//! Newline-delimited text records.

use std::fmt::Display;
use std::io;
use std::io::prelude::*;
use std::marker::PhantomData;
use std::str::FromStr;

use crate::sort::SortError;

/// Malformed line handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePolicy {
    /// Malformed lines are dropped and counted.
    Skip,
    /// Malformed lines are reported as [`io::ErrorKind::InvalidData`] errors.
    Strict,
}

/// Iterator parsing records out of text lines.
/// Leading and trailing whitespace of a line is ignored. Lines that are not valid UTF-8
/// are treated as malformed.
pub struct RecordLines<R, T = crate::Record> {
    reader: R,
    line: Vec<u8>,
    policy: ParsePolicy,
    line_number: u64,
    skipped: u64,

    item_type: PhantomData<T>,
}

impl<R, T> RecordLines<R, T>
where
    R: BufRead,
    T: FromStr,
{
    pub fn new(reader: R, policy: ParsePolicy) -> Self {
        RecordLines {
            reader,
            line: Vec::new(),
            policy,
            line_number: 0,
            skipped: 0,
            item_type: PhantomData,
        }
    }

    /// Number of malformed lines dropped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<R, T> Iterator for RecordLines<R, T>
where
    R: BufRead,
    T: FromStr,
    T::Err: Display,
{
    type Item = io::Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => return None,
                Ok(_) => self.line_number += 1,
                Err(err) => return Some(Err(err)),
            }

            let parsed = match std::str::from_utf8(&self.line) {
                Ok(line) => {
                    let line = line.trim();
                    line.parse::<T>().map_err(|err| format!("{:?}: {}", line, err))
                }
                Err(err) => Err(format!("invalid UTF-8: {}", err)),
            };

            match parsed {
                Ok(item) => return Some(Ok(item)),
                Err(reason) => match self.policy {
                    ParsePolicy::Skip => {
                        log::trace!("line {} skipped: {}", self.line_number, reason);
                        self.skipped += 1;
                    }
                    ParsePolicy::Strict => {
                        return Some(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("line {}: {}", self.line_number, reason),
                        )));
                    }
                },
            }
        }
    }
}

/// Writes records one per line. Returns the number of records written.
pub fn write_records<W, T, I>(writer: &mut W, records: I) -> Result<u64, SortError>
where
    W: Write,
    T: Display,
    I: IntoIterator<Item = Result<T, SortError>>,
{
    let mut written: u64 = 0;
    for record in records.into_iter() {
        writeln!(writer, "{}", record?).map_err(SortError::OutputError)?;
        written += 1;
    }
    writer.flush().map_err(SortError::OutputError)?;

    return Ok(written);
}
