//! Header detection and pass-through re-encoding of delimited text.

use std::io::{BufRead, BufReader, Read};

#[derive(Debug, thiserror::Error)]
pub enum TabularError {
    #[error("failed to read row {row}: {source}")]
    Read {
        row: usize,
        #[source]
        source: csv::Error,
    },
    #[error("failed to read metadata: {0}")]
    Io(#[from] std::io::Error),
    #[error("no header row after skipping {skip_rows} row(s)")]
    MissingHeader { skip_rows: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularSplit {
    pub header: Vec<String>,
    /// Header row and every row after it, byte for byte.
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct TabularSplitter {
    delimiter: u8,
    skip_rows: usize,
}

impl TabularSplitter {
    pub fn new(delimiter: u8, skip_rows: usize) -> Self {
        Self {
            delimiter,
            skip_rows,
        }
    }

    pub fn split<R: Read>(&self, reader: R) -> Result<TabularSplit, TabularError> {
        let missing = TabularError::MissingHeader {
            skip_rows: self.skip_rows,
        };
        let mut reader = BufReader::new(reader);

        // Preamble rows are counted by line so blank rows count too.
        let mut line = Vec::new();
        for _ in 0..self.skip_rows {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                return Err(missing);
            }
        }

        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        if body.is_empty() {
            return Err(missing);
        }
        let header = self.parse_header(&body)?;
        Ok(TabularSplit { header, body })
    }

    fn parse_header(&self, body: &[u8]) -> Result<Vec<String>, TabularError> {
        let first_line = body.split(|b| *b == b'\n').next().unwrap_or_default();
        if first_line.is_empty() || first_line == b"\r" {
            return Ok(Vec::new());
        }

        let mut rows = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(body);
        match rows.records().next() {
            Some(Ok(record)) => Ok(record.iter().map(str::to_string).collect()),
            Some(Err(source)) => Err(TabularError::Read {
                row: self.skip_rows,
                source,
            }),
            None => Ok(Vec::new()),
        }
    }
}
