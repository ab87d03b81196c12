//! Line-oriented number files
//!
//! Every file the store owns holds one record per line in decimal text: plain
//! values for collections, sorted files and partitions, `value count` pairs for
//! frequency tables. Readers and writers bump the store's shared scan
//! counters so tests can observe how much work an operation did.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lines read and written by one store
#[derive(Debug, Default)]
pub struct ScanStats {
    lines_read: AtomicU64,
    lines_written: AtomicU64,
}

impl ScanStats {
    pub fn lines_read(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Relaxed)
    }

    fn add_read(&self, n: u64) {
        self.lines_read.fetch_add(n, Ordering::Relaxed);
    }

    fn add_written(&self, n: u64) {
        self.lines_written.fetch_add(n, Ordering::Relaxed);
    }
}

/// One line of a number file
pub trait Record: Sized {
    fn parse_line(line: &str) -> Option<Self>;
    fn write_line<W: Write>(&self, out: &mut W) -> std::io::Result<()>;
}

impl Record for i64 {
    fn parse_line(line: &str) -> Option<Self> {
        line.trim().parse().ok()
    }

    fn write_line<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "{}", self)
    }
}

/// Distinct value and its number of occurrences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreqEntry {
    pub value: i64,
    pub count: u64,
}

impl Record for FreqEntry {
    fn parse_line(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let value = tokens.next()?.parse().ok()?;
        let count = tokens.next()?.parse().ok()?;
        if tokens.next().is_some() {
            return None;
        }
        Some(FreqEntry { value, count })
    }

    fn write_line<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "{} {}", self.value, self.count)
    }
}

/// Buffered record reader with one record of lookahead
pub struct RecordReader<T: Record> {
    reader: BufReader<File>,
    path: PathBuf,
    line: String,
    line_no: u64,
    peeked: Option<T>,
    stats: Arc<ScanStats>,
}

pub type NumberReader = RecordReader<i64>;
pub type FreqReader = RecordReader<FreqEntry>;

impl<T: Record> RecordReader<T> {
    pub fn open(path: &Path, stats: Arc<ScanStats>) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
            line: String::new(),
            line_no: 0,
            peeked: None,
            stats,
        })
    }

    /// Next record, or `None` at end of file. Blank lines are skipped.
    pub fn next_record(&mut self) -> Result<Option<T>> {
        if let Some(record) = self.peeked.take() {
            return Ok(Some(record));
        }
        self.read_record()
    }

    /// True once every record has been consumed
    pub fn is_exhausted(&mut self) -> Result<bool> {
        if self.peeked.is_none() {
            self.peeked = self.read_record()?;
        }
        Ok(self.peeked.is_none())
    }

    /// Append up to `max` records to `out`; returns whether the file is exhausted
    pub fn read_batch(&mut self, max: usize, out: &mut Vec<T>) -> Result<bool> {
        for _ in 0..max {
            match self.next_record()? {
                Some(record) => out.push(record),
                None => return Ok(true),
            }
        }
        self.is_exhausted()
    }

    fn read_record(&mut self) -> Result<Option<T>> {
        loop {
            self.line.clear();
            let n = self.reader.read_line(&mut self.line)
                .with_context(|| format!("Failed to read {}", self.path.display()))?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            self.stats.add_read(1);

            if self.line.trim().is_empty() {
                continue;
            }

            return match T::parse_line(&self.line) {
                Some(record) => Ok(Some(record)),
                None => anyhow::bail!(
                    "Malformed record at {}:{}: {:?}",
                    self.path.display(),
                    self.line_no,
                    self.line.trim_end()
                ),
            };
        }
    }
}

impl<T: Record> Iterator for RecordReader<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Buffered record writer
pub struct RecordWriter<T: Record> {
    writer: BufWriter<File>,
    path: PathBuf,
    written: u64,
    stats: Arc<ScanStats>,
    _record: PhantomData<T>,
}

pub type NumberWriter = RecordWriter<i64>;
pub type FreqWriter = RecordWriter<FreqEntry>;

impl<T: Record> RecordWriter<T> {
    /// Create (or truncate) `path`
    pub fn create(path: &Path, stats: Arc<ScanStats>) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            written: 0,
            stats,
            _record: PhantomData,
        })
    }

    pub fn write(&mut self, record: &T) -> Result<()> {
        record.write_line(&mut self.writer)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        self.written += 1;
        self.stats.add_written(1);
        Ok(())
    }

    pub fn write_all(&mut self, records: &[T]) -> Result<()> {
        for record in records {
            self.write(record)?;
        }
        Ok(())
    }

    /// Flush and close; returns the number of records written
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        Ok(self.written)
    }
}

/// Read a whole number file into memory
pub fn read_all_values(path: &Path, stats: &Arc<ScanStats>) -> Result<Vec<i64>> {
    NumberReader::open(path, Arc::clone(stats))?.collect()
}

/// Write values to `path`, replacing it
pub fn write_all_values(path: &Path, values: &[i64], stats: &Arc<ScanStats>) -> Result<u64> {
    let mut writer = NumberWriter::create(path, Arc::clone(stats))?;
    writer.write_all(values)?;
    writer.finish()
}

/// Size of `path` in bytes, 0 if it does not exist
pub fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Remove a file, ignoring "not found"
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
