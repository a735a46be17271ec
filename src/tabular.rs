use crate::error::{ImportError, ImportResult};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Comma,
    Tab,
}

impl Delimiter {
    pub fn byte(self) -> u8 {
        match self {
            Delimiter::Comma => b',',
            Delimiter::Tab => b'\t',
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Delimiter::Comma => "csv",
            Delimiter::Tab => "tsv",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Delimiter::Comma => "comma",
            Delimiter::Tab => "tab",
        }
    }

    /// `None` means "auto": sniff it from the file.
    pub fn parse_setting(s: &str) -> Result<Option<Delimiter>, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "comma" | "," | "csv" => Ok(Some(Delimiter::Comma)),
            "tab" | "\t" | "\\t" | "tsv" => Ok(Some(Delimiter::Tab)),
            "auto" | "" => Ok(None),
            other => Err(format!("unknown delimiter: {other}")),
        }
    }

    /// Tab wins only when the first line carries more tabs than commas.
    pub fn sniff(path: &Path) -> ImportResult<Delimiter> {
        let mut reader = open_without_bom(path)?;
        let mut first = Vec::new();
        reader.read_until(b'\n', &mut first)?;
        let tabs = first.iter().filter(|b| **b == b'\t').count();
        let commas = first.iter().filter(|b| **b == b',').count();
        Ok(if tabs > commas {
            Delimiter::Tab
        } else {
            Delimiter::Comma
        })
    }
}

/// One physical record. Fields past the end read as empty strings so short
/// rows behave as if zero-padded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub line: u64,
    pub fields: Vec<String>,
}

impl RawRow {
    pub fn get(&self, idx: usize) -> &str {
        self.fields.get(idx).map(|s| s.as_str()).unwrap_or("")
    }

    pub fn trimmed(&self, idx: usize) -> &str {
        self.get(idx).trim()
    }

    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|f| f.trim().is_empty())
    }
}

/// A delimited file on disk. Every call to `rows` reopens it, so passes are
/// independent and can be repeated.
#[derive(Debug, Clone)]
pub struct TabularFile {
    path: PathBuf,
    delimiter: Delimiter,
}

impl TabularFile {
    pub fn new(path: impl Into<PathBuf>, delimiter: Delimiter) -> Self {
        Self {
            path: path.into(),
            delimiter,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn delimiter(&self) -> Delimiter {
        self.delimiter
    }

    pub fn rows(&self) -> ImportResult<Rows> {
        let tracker = QuoteTracker::new(open_without_bom(&self.path)?, self.delimiter.byte());
        let reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter.byte())
            .has_headers(false)
            .flexible(true)
            .from_reader(tracker);
        Ok(Rows {
            reader,
            record: csv::ByteRecord::new(),
            done: false,
        })
    }
}

fn open_without_bom(path: &Path) -> ImportResult<BufReader<File>> {
    let mut reader = BufReader::new(File::open(path)?);
    let has_bom = reader.fill_buf()?.starts_with(UTF8_BOM);
    if has_bom {
        reader.consume(UTF8_BOM.len());
    }
    Ok(reader)
}

pub struct Rows {
    reader: csv::Reader<QuoteTracker<BufReader<File>>>,
    record: csv::ByteRecord,
    done: bool,
}

impl Iterator for Rows {
    type Item = ImportResult<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_byte_record(&mut self.record) {
            Ok(true) => {
                let line = self.record.position().map(|p| p.line()).unwrap_or(0);
                let fields = self
                    .record
                    .iter()
                    .map(|f| String::from_utf8_lossy(f).into_owned())
                    .collect();
                Some(Ok(RawRow { line, fields }))
            }
            Ok(false) => {
                self.done = true;
                self.reader
                    .get_ref()
                    .open_quote_line()
                    .map(|line| Err(ImportError::MalformedRow { line }))
            }
            Err(e) => {
                self.done = true;
                Some(Err(ImportError::Csv(e)))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    FieldStart,
    Unquoted,
    Quoted,
    QuoteInQuoted,
}

/// Watches the bytes handed to the csv reader and remembers whether the
/// stream ended inside a quoted field. The csv reader itself silently reads
/// an unterminated quote to EOF.
struct QuoteTracker<R> {
    inner: R,
    delimiter: u8,
    state: QuoteState,
    line: u64,
    opened_at: u64,
}

impl<R> QuoteTracker<R> {
    fn new(inner: R, delimiter: u8) -> Self {
        Self {
            inner,
            delimiter,
            state: QuoteState::FieldStart,
            line: 1,
            opened_at: 0,
        }
    }

    fn open_quote_line(&self) -> Option<u64> {
        (self.state == QuoteState::Quoted).then_some(self.opened_at)
    }

    fn observe(&mut self, b: u8) {
        let boundary = b == self.delimiter || b == b'\n' || b == b'\r';
        self.state = match self.state {
            QuoteState::FieldStart | QuoteState::Unquoted if boundary => QuoteState::FieldStart,
            QuoteState::FieldStart if b == b'"' => {
                self.opened_at = self.line;
                QuoteState::Quoted
            }
            QuoteState::FieldStart | QuoteState::Unquoted => QuoteState::Unquoted,
            QuoteState::Quoted if b == b'"' => QuoteState::QuoteInQuoted,
            QuoteState::Quoted => QuoteState::Quoted,
            QuoteState::QuoteInQuoted if b == b'"' => QuoteState::Quoted,
            QuoteState::QuoteInQuoted if boundary => QuoteState::FieldStart,
            QuoteState::QuoteInQuoted => QuoteState::Unquoted,
        };
        if b == b'\n' {
            self.line += 1;
        }
    }
}

impl<R: Read> Read for QuoteTracker<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        for &b in &buf[..n] {
            self.observe(b);
        }
        Ok(n)
    }
}
