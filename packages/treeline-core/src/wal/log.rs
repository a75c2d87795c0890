//! `SegmentLog`: the append-only framed record log underlying `WalHandle`.
//!
//! On-disk record framing:
//! ```text
//! [index: u64 LE][len: u32 LE][crc32: u32 LE][payload: len bytes]
//! ```
//! A sparse in-memory index (`Vec<(u64 index, u64 file offset)>`) is rebuilt
//! by a single forward scan at open time; there is no separate index file
//! to go stale.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{classify_io_error, DbError};

const HEADER_LEN: u64 = 8 + 4 + 4;

struct IndexEntry {
    index: u64,
    offset: u64,
}

pub struct SegmentLog {
    path: PathBuf,
    file: File,
    index: Vec<IndexEntry>,
}

impl SegmentLog {
    /// Opens `path`, creating an empty log if it does not exist, and
    /// rebuilds the in-memory index by scanning every record. A trailing
    /// partial record (a crash mid-append) is truncated away rather than
    /// treated as corruption.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| classify_io_error(e, "opening WAL segment"))?;
        let mut log = Self {
            path,
            file,
            index: Vec::new(),
        };
        log.rebuild_index()?;
        Ok(log)
    }

    fn rebuild_index(&mut self) -> Result<(), DbError> {
        let mut reader = BufReader::new(
            self.file
                .try_clone()
                .map_err(|e| classify_io_error(e, "cloning WAL handle for scan"))?,
        );
        reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| classify_io_error(e, "seeking WAL"))?;
        let mut offset = 0u64;
        let mut index = Vec::new();
        loop {
            let mut header = [0u8; HEADER_LEN as usize];
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(classify_io_error(e, "reading WAL record header")),
            }
            let rec_index = u64::from_le_bytes(header[0..8].try_into().unwrap());
            let len = u32::from_le_bytes(header[8..12].try_into().unwrap()) as u64;
            let crc = u32::from_le_bytes(header[12..16].try_into().unwrap());

            let mut payload = vec![0u8; len as usize];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(classify_io_error(e, "reading WAL record payload")),
            }
            if crc32fast::hash(&payload) != crc {
                break;
            }
            index.push(IndexEntry {
                index: rec_index,
                offset,
            });
            offset += HEADER_LEN + len;
        }
        self.file
            .set_len(offset)
            .map_err(|e| classify_io_error(e, "truncating torn WAL tail"))?;
        self.index = index;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn first_index(&self) -> Option<u64> {
        self.index.first().map(|e| e.index)
    }

    pub fn last_index(&self) -> Option<u64> {
        self.index.last().map(|e| e.index)
    }

    /// Appends `payload` under `index`. `index` must be exactly one greater
    /// than the current last index (or the log's first record).
    pub fn append(&mut self, index: u64, payload: &[u8]) -> Result<(), DbError> {
        let offset = self
            .file
            .seek(SeekFrom::End(0))
            .map_err(|e| classify_io_error(e, "seeking to WAL end"))?;
        let mut writer = BufWriter::new(&self.file);
        writer
            .write_all(&index.to_le_bytes())
            .and_then(|_| writer.write_all(&(payload.len() as u32).to_le_bytes()))
            .and_then(|_| writer.write_all(&crc32fast::hash(payload).to_le_bytes()))
            .and_then(|_| writer.write_all(payload))
            .map_err(|e| classify_io_error(e, "appending WAL record"))?;
        writer
            .flush()
            .map_err(|e| classify_io_error(e, "flushing WAL record"))?;
        self.file
            .sync_data()
            .map_err(|e| classify_io_error(e, "fsyncing WAL record"))?;
        self.index.push(IndexEntry { index, offset });
        Ok(())
    }

    /// Reads the payload stored at `index`, or `None` if absent.
    pub fn read(&mut self, index: u64) -> Result<Option<Vec<u8>>, DbError> {
        let Some(entry) = self.index.iter().find(|e| e.index == index) else {
            return Ok(None);
        };
        let offset = entry.offset;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| classify_io_error(e, "seeking to WAL record"))?;
        let mut header = [0u8; HEADER_LEN as usize];
        self.file
            .read_exact(&mut header)
            .map_err(|e| classify_io_error(e, "reading WAL record header"))?;
        let len = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
        let mut payload = vec![0u8; len];
        self.file
            .read_exact(&mut payload)
            .map_err(|e| classify_io_error(e, "reading WAL record payload"))?;
        Ok(Some(payload))
    }

    /// Iterates payloads for every index in `[from, to]` inclusive, in
    /// ascending order.
    pub fn range(&mut self, from: u64, to: u64) -> Result<Vec<(u64, Vec<u8>)>, DbError> {
        let indices: Vec<u64> = self
            .index
            .iter()
            .map(|e| e.index)
            .filter(|&i| i >= from && i <= to)
            .collect();
        let mut out = Vec::with_capacity(indices.len());
        for i in indices {
            if let Some(payload) = self.read(i)? {
                out.push((i, payload));
            }
        }
        Ok(out)
    }

    /// Drops every record with index `< keep_from`, rewriting the log file
    /// via "write to tmp, rename over original" so a crash mid-truncate
    /// leaves the untouched original (spec §4.4 `TruncateFront`).
    pub fn truncate_front(&mut self, keep_from: u64) -> Result<(), DbError> {
        let tmp_path = self.path.with_extension("rewrite-tmp");
        {
            let mut tmp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .map_err(|e| classify_io_error(e, "creating WAL rewrite tmp"))?;
            let keep: Vec<u64> = self
                .index
                .iter()
                .map(|e| e.index)
                .filter(|&i| i >= keep_from)
                .collect();
            for i in keep {
                if let Some(payload) = self.read(i)? {
                    tmp.write_all(&i.to_le_bytes())
                        .and_then(|_| tmp.write_all(&(payload.len() as u32).to_le_bytes()))
                        .and_then(|_| tmp.write_all(&crc32fast::hash(&payload).to_le_bytes()))
                        .and_then(|_| tmp.write_all(&payload))
                        .map_err(|e| classify_io_error(e, "writing WAL rewrite tmp"))?;
                }
            }
            tmp.sync_all()
                .map_err(|e| classify_io_error(e, "fsyncing WAL rewrite tmp"))?;
        }
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| classify_io_error(e, "renaming WAL rewrite tmp over log"))?;
        self.file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| classify_io_error(e, "reopening WAL after truncate_front"))?;
        self.rebuild_index()
    }

    /// Flushes the underlying file to disk. Called once from `WalHandle::close`;
    /// every individual `append` already fsyncs, so this is mostly a final
    /// durability check that surfaces a late write-back failure to the caller.
    pub fn close(&mut self) -> Result<(), DbError> {
        self.file.sync_all().map_err(|e| classify_io_error(e, "closing WAL segment"))
    }

    /// Drops every record with index `> keep_to`, shrinking the file in
    /// place via `set_len` at the offset of the first discarded record
    /// (spec §4.4, used by rollback to discard WAL entries beyond a
    /// rollback target).
    pub fn truncate_back(&mut self, keep_to: u64) -> Result<(), DbError> {
        let cut_offset = self
            .index
            .iter()
            .find(|e| e.index > keep_to)
            .map(|e| e.offset);
        if let Some(offset) = cut_offset {
            self.file
                .set_len(offset)
                .map_err(|e| classify_io_error(e, "truncating WAL back"))?;
            self.index.retain(|e| e.index <= keep_to);
        }
        Ok(())
    }
}
