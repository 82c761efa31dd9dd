//! Backup directory layout and line-oriented file streams
//!
//! One file per entity, named by the filename-escaped entity, with a `.gz`
//! suffix when compressed. Files are written page by page and read line by
//! line; neither side holds a whole entity in memory.

use crate::codec::{escape_filename, unescape_filename};
use crate::line_protocol::write_line;
use crate::{PortError, Record, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Suffix of compressed backup files
pub const GZIP_SUFFIX: &str = ".gz";

/// A directory holding one backup file per entity
#[derive(Debug, Clone)]
pub struct BackupDir {
    dir: PathBuf,
    compress: bool,
}

impl BackupDir {
    pub fn new(dir: impl Into<PathBuf>, compress: bool) -> Self {
        Self {
            dir: dir.into(),
            compress,
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn is_compressed(&self) -> bool {
        self.compress
    }

    /// Create the directory if it doesn't exist
    pub fn ensure_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Fail unless the directory exists
    pub fn require_exists(&self) -> Result<()> {
        if !self.dir.is_dir() {
            return Err(PortError::Precondition(format!(
                "backup dir \"{}\" does not exist",
                self.dir.display()
            )));
        }
        Ok(())
    }

    /// File path for an entity
    pub fn entity_path(&self, entity: &str) -> PathBuf {
        let mut name = escape_filename(entity);
        if self.compress {
            name.push_str(GZIP_SUFFIX);
        }
        self.dir.join(name)
    }

    /// Entities with a backup file of the configured kind, sorted by name
    pub fn list_entities(&self) -> Result<Vec<String>> {
        let mut entities = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let stem = match (self.compress, name.strip_suffix(GZIP_SUFFIX)) {
                (true, Some(stem)) => stem.to_string(),
                (false, None) => name,
                _ => continue,
            };
            if stem.is_empty() {
                continue;
            }
            entities.push(unescape_filename(&stem));
        }
        entities.sort();
        Ok(entities)
    }

    /// Create (or truncate) the backup file of an entity
    pub fn create(&self, entity: &str) -> Result<BackupWriter> {
        let path = self.entity_path(entity);
        let file = BufWriter::new(File::create(&path)?);
        let sink = if self.compress {
            FileSink::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            FileSink::Plain(file)
        };
        debug!(path = %path.display(), "opened backup file for writing");
        Ok(BackupWriter {
            sink,
            buf: String::new(),
            lines: 0,
        })
    }

    /// Open the backup file of an entity for line-by-line reading
    pub fn open(&self, entity: &str) -> Result<BackupReader> {
        let path = self.entity_path(entity);
        let file = File::open(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PortError::Precondition(format!(
                "backup file \"{}\" does not exist",
                path.display()
            )),
            _ => PortError::Io(e),
        })?;
        let inner: Box<dyn BufRead + Send> = if self.compress {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        debug!(path = %path.display(), "opened backup file for reading");
        Ok(BackupReader {
            inner,
            line_no: 0,
        })
    }
}

enum FileSink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl FileSink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            FileSink::Plain(w) => w,
            FileSink::Gzip(w) => w,
        }
    }
}

/// Appends encoded records to one backup file
pub struct BackupWriter {
    sink: FileSink,
    buf: String,
    lines: u64,
}

impl BackupWriter {
    /// Encode and write one page of records
    pub fn write_records(&mut self, records: &[Record]) -> Result<usize> {
        self.buf.clear();
        for record in records {
            write_line(&mut self.buf, record);
        }
        self.sink.writer().write_all(self.buf.as_bytes())?;
        self.lines += records.len() as u64;
        Ok(records.len())
    }

    /// Lines written so far
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Flush buffers, write the gzip trailer and return the line count
    pub fn finish(self) -> Result<u64> {
        let mut file = match self.sink {
            FileSink::Plain(w) => w,
            FileSink::Gzip(w) => w.finish()?,
        };
        file.flush()?;
        file.get_ref().sync_all()?;
        Ok(self.lines)
    }
}

/// Reads one backup file lazily, one line at a time
pub struct BackupReader {
    inner: Box<dyn BufRead + Send>,
    line_no: usize,
}

impl BackupReader {
    /// 1-based number of the last line returned
    pub fn line_no(&self) -> usize {
        self.line_no
    }
}

impl Iterator for BackupReader {
    type Item = Result<String>;

    /// A line that is not UTF-8 yields [`PortError::InvalidLine`] and the
    /// reader moves on to the next one
    fn next(&mut self) -> Option<Self::Item> {
        let mut bytes = Vec::new();
        match self.inner.read_until(b'\n', &mut bytes) {
            Ok(0) => None,
            Ok(_) => {
                self.line_no += 1;
                while matches!(bytes.last(), Some(b'\n' | b'\r')) {
                    bytes.pop();
                }
                Some(String::from_utf8(bytes).map_err(|e| PortError::InvalidLine {
                    line: self.line_no,
                    reason: e.utf8_error().to_string(),
                }))
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(i: i64) -> Record {
        Record::new("disk/io", 1_000 + i)
            .with_tag("device", "sda")
            .with_field("reads", i)
    }

    #[test]
    fn test_write_and_read_plain() {
        let temp_dir = TempDir::new().unwrap();
        let backup = BackupDir::new(temp_dir.path(), false);

        let mut writer = backup.create("disk/io").unwrap();
        let page: Vec<Record> = (0..3).map(sample).collect();
        writer.write_records(&page).unwrap();
        writer.write_records(&page[..1]).unwrap();
        assert_eq!(writer.finish().unwrap(), 4);

        assert!(temp_dir.path().join("disk\u{2215}io").is_file());
        let lines: Vec<String> = backup
            .open("disk/io")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "disk/io,device=sda reads=0i 1000");
    }

    #[test]
    fn test_write_and_read_gzip() {
        let temp_dir = TempDir::new().unwrap();
        let backup = BackupDir::new(temp_dir.path(), true);

        let mut writer = backup.create("cpu").unwrap();
        let page: Vec<Record> = (0..100).map(sample).collect();
        writer.write_records(&page).unwrap();
        writer.finish().unwrap();

        assert!(temp_dir.path().join("cpu.gz").is_file());
        let mut reader = backup.open("cpu").unwrap();
        assert_eq!(reader.by_ref().count(), 100);
        assert_eq!(reader.line_no(), 100);
    }

    #[test]
    fn test_non_utf8_line_does_not_stop_reading() {
        let temp_dir = TempDir::new().unwrap();
        let mut content = b"cpu load=1 100\n".to_vec();
        content.extend_from_slice(b"cpu,host=\xff\xfe load=2 200\r\n");
        content.extend_from_slice(b"cpu load=3 300");
        fs::write(temp_dir.path().join("cpu"), content).unwrap();

        let backup = BackupDir::new(temp_dir.path(), false);
        let items: Vec<Result<String>> = backup.open("cpu").unwrap().collect();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), "cpu load=1 100");
        assert!(matches!(items[1], Err(PortError::InvalidLine { line: 2, .. })));
        assert_eq!(items[2].as_ref().unwrap(), "cpu load=3 300");
    }

    #[test]
    fn test_open_missing_entity_names_path() {
        let temp_dir = TempDir::new().unwrap();
        let backup = BackupDir::new(temp_dir.path(), true);
        let err = backup.open("cpu").err().unwrap();
        assert!(matches!(err, PortError::Precondition(_)));
        assert!(err.to_string().contains("cpu.gz"));
    }

    #[test]
    fn test_list_entities() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["mem", "cpu", "net\u{2215}eth0", "swap.gz"] {
            fs::write(temp_dir.path().join(name), "").unwrap();
        }
        fs::create_dir(temp_dir.path().join("subdir")).unwrap();

        let plain = BackupDir::new(temp_dir.path(), false);
        assert_eq!(plain.list_entities().unwrap(), vec!["cpu", "mem", "net/eth0"]);

        let gzip = BackupDir::new(temp_dir.path(), true);
        assert_eq!(gzip.list_entities().unwrap(), vec!["swap"]);
    }

    #[test]
    fn test_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let backup = BackupDir::new(temp_dir.path().join("absent"), false);
        assert!(matches!(
            backup.require_exists(),
            Err(PortError::Precondition(_))
        ));
        backup.ensure_exists().unwrap();
        assert!(backup.require_exists().is_ok());
    }
}
