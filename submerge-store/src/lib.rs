//! The storage gateway: durable append/overwrite/read of `(key, versioned
//! item)` records, plus an in-memory write-through cache that mirrors
//! exactly what's on disk at every observable point (§4.B).
//!
//! The on-disk layout is a flat append-only sequence of length-prefixed
//! `rmp-serde` frames, one per record. `read_all` folds duplicates by
//! last-write-wins (later frames for a key supersede earlier ones), so
//! `append` never needs to rewrite existing bytes. `write_all` replaces the
//! whole file atomically via a sibling temp file and a rename, so a crash
//! mid-write never leaves a half-written file on a restart boundary.

mod ioutil;

use ioutil::{FileReader, FileWriter};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use submerge_base::Result;
use submerge_vers::VersionedItem;

pub type Records = HashMap<i64, VersionedItem>;

fn write_record<W: Write>(w: &mut W, key: i64, item: &VersionedItem) -> Result<()> {
    let buf = rmp_serde::to_vec(&(key, item))?;
    let len = u32::try_from(buf.len()).map_err(|_| submerge_base::err("record too large"))?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(&buf)?;
    Ok(())
}

fn read_record<R: Read>(r: &mut R) -> std::io::Result<Option<(i64, VersionedItem)>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    let record = rmp_serde::from_slice(&buf)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(Some(record))
}

pub struct StorageGateway {
    path: PathBuf,
    cache: Records,
}

impl StorageGateway {
    /// Opens the gateway against `path`, creating an empty file if none
    /// exists, and loads the cache from it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            FileWriter::create_new(&path)?;
        }
        let mut gw = Self {
            path,
            cache: Records::new(),
        };
        gw.read_all()?;
        Ok(gw)
    }

    pub fn cache(&self) -> &Records {
        &self.cache
    }

    /// Truncates the record file and the cache.
    pub fn clear(&mut self) -> Result<()> {
        FileWriter::create_truncated(&self.path)?;
        self.cache.clear();
        Ok(())
    }

    /// Parses the entire file, folding duplicate keys by last-write-wins.
    /// The result replaces the cache and is the authoritative state.
    pub fn read_all(&mut self) -> Result<&Records> {
        let mut records = Records::new();
        if self.path.exists() {
            let mut reader = FileReader::open(&self.path)?;
            while let Some((key, item)) = read_record(&mut reader)? {
                records.insert(key, item);
            }
        }
        self.cache = records;
        Ok(&self.cache)
    }

    /// Durably appends one record, then updates the cache.
    pub fn append(&mut self, key: i64, item: VersionedItem) -> Result<()> {
        let mut writer = FileWriter::open_append(&self.path)?;
        write_record(&mut writer, key, &item)?;
        writer.flush()?;
        self.cache.insert(key, item);
        Ok(())
    }

    /// Durably appends many records in one file write, then updates the
    /// cache with all of them.
    pub fn append_all(&mut self, records: impl IntoIterator<Item = (i64, VersionedItem)>) -> Result<()> {
        let mut writer = FileWriter::open_append(&self.path)?;
        for (key, item) in records {
            write_record(&mut writer, key, &item)?;
            self.cache.insert(key, item);
        }
        writer.flush()?;
        Ok(())
    }

    /// Atomically replaces the file with exactly `records`, then resets the
    /// cache to match.
    pub fn write_all(&mut self, records: Records) -> Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut writer = FileWriter::create_truncated(&tmp_path)?;
            for (key, item) in &records {
                write_record(&mut writer, *key, item)?;
            }
            writer.sync()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        self.cache = records;
        Ok(())
    }
}
