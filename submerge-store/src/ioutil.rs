// Thin wrappers around buffered file I/O, in the same spirit as a
// columnar storage engine's reader/writer pair but reduced to what an
// append-only record file actually needs: open-for-read, open-for-append,
// and create-truncated (for `write_all`'s replace-the-whole-file case).

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Result, Seek, SeekFrom, Write};
use std::path::Path;

pub struct FileReader {
    file: BufReader<File>,
}

impl FileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file: BufReader::new(file),
        })
    }
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.file.read(buf)
    }
}

pub struct FileWriter {
    file: BufWriter<File>,
}

impl FileWriter {
    /// Creates a new, empty file; fails if one already exists.
    pub fn create_new(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(Self {
            file: BufWriter::new(file),
        })
    }

    /// Creates or truncates the file at `path` to empty.
    pub fn create_truncated(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file: BufWriter::new(file),
        })
    }

    /// Opens the file at `path` for appending, creating it if absent.
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new().write(true).create(true).open(path)?;
        file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file: BufWriter::new(file),
        })
    }

    /// Flushes and fsyncs, for callers (like `write_all`) that need the
    /// bytes durable before a subsequent rename.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.file.write(buf)
    }
    fn flush(&mut self) -> Result<()> {
        self.file.flush()
    }
}
