//! Write-ahead logging.
//!
//! Every memtable is paired 1:1 with an append-only log file named
//! `<generation>.write`. A tuple is appended to the log **before** it
//! is inserted into the memtable, so a crash can lose at most writes
//! that were never acknowledged. On startup, any log whose generation
//! has no committed table file is replayed to rebuild its memtable.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_BYTES][HEADER_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! ...
//! ```
//!
//! - **Header** — a [`WalHeader`] followed by a 4-byte CRC32.
//! - **Record** — a 4-byte little-endian length prefix, the encoded
//!   record bytes, and a CRC32 computed over the record bytes. For a
//!   tuple this works out to
//!   `[u32 len][u32 key_len][key][u64 snapshot][u32 value_len][value][u32 crc32]`.
//!
//! # Replay semantics
//!
//! Replay verifies each record's checksum and stops **cleanly** at the
//! first mismatch or truncated record: a torn tail is the expected
//! residue of a crash mid-append, not an error. Genuine I/O failures
//! still propagate.
//!
//! # Concurrency
//!
//! The file handle is shared behind `Arc<Mutex<File>>` so a replay
//! iterator can coexist with the appender. Appends themselves are
//! serialized by the writer above this layer; `append` may optionally
//! fsync before returning.

#[cfg(test)]
mod tests;

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::encoding::{self, Decode, Encode, EncodingError};

const U32_SIZE: usize = size_of::<u32>();

/// Errors returned by log operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Record checksum did not match — torn tail from a crash.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Record exceeds the configured maximum size.
    #[error("record size exceeds limit ({0} bytes)")]
    RecordTooLarge(usize),

    /// Record body or checksum was cut short — torn tail from a crash.
    #[error("unexpected end of file")]
    UnexpectedEof,

    /// Log header failed validation.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WalError {
    /// Whether this error class marks the crash-consistent end of a log
    /// rather than a failure. Replay stops cleanly on these.
    pub fn is_torn_tail(&self) -> bool {
        matches!(
            self,
            WalError::ChecksumMismatch
                | WalError::UnexpectedEof
                | WalError::Encoding(_)
                | WalError::RecordTooLarge(_)
        )
    }
}

/// Metadata at the start of every log file, CRC-protected.
#[derive(Debug)]
pub struct WalHeader {
    /// Magic constant identifying log files (`b"HWAL"`).
    magic: [u8; 4],

    /// Log format version.
    version: u32,

    /// Generation id of the paired memtable.
    generation: u64,
}

impl WalHeader {
    /// Expected 4-byte magic constant.
    pub const MAGIC: [u8; 4] = *b"HWAL";

    /// Current format version.
    pub const VERSION: u32 = 1;

    /// Default maximum record size (16 MiB).
    pub const DEFAULT_MAX_RECORD_SIZE: u32 = 16 * 1024 * 1024;

    /// Encoded header size: `magic(4) + version(4) + generation(8)`.
    pub const ENCODED_SIZE: usize = 4 + 4 + 8;

    /// On-disk size including the trailing CRC32.
    pub const DISK_SIZE: usize = Self::ENCODED_SIZE + U32_SIZE;

    fn new(generation: u64) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            generation,
        }
    }

    /// Generation id of the paired memtable.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Encode for WalHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.generation.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for WalHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (generation, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                magic,
                version,
                generation,
            },
            off,
        ))
    }
}

/// Marker bound for types the log can carry.
pub trait WalData: Encode + Decode + Send + Sync {}
impl<T> WalData for T where T: Encode + Decode + Send + Sync {}

/// An append-only, CRC-protected log of `T` records.
pub struct Wal<T: WalData> {
    file: Arc<Mutex<File>>,
    path: PathBuf,
    header: WalHeader,
    max_record_size: u32,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: WalData> Wal<T> {
    /// Opens or creates the log at `path`.
    ///
    /// The file name must be `<generation>.write`; the generation is
    /// validated against the header of an existing log.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WalError> {
        let path = path.as_ref();
        let generation = parse_generation(path)
            .ok_or_else(|| WalError::Internal(format!("bad log name: {}", path.display())))?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let file_len = file.metadata()?.len();
        if file_len > 0 && file_len < WalHeader::DISK_SIZE as u64 {
            // A crash tore the header mid-write; no record can exist
            // past it, so restart the file.
            warn!(path = %path.display(), file_len, "log header torn, recreating");
            file.set_len(0)?;
        }

        let header = if file.metadata()?.len() == 0 {
            let header = WalHeader::new(generation);
            write_header(&mut file, &header)?;
            file.sync_all()?;
            info!(path = %path.display(), generation, "log created");
            header
        } else {
            file.seek(SeekFrom::Start(0))?;
            let header = read_and_validate_header(&mut file)?;
            if header.generation != generation {
                return Err(WalError::InvalidHeader(format!(
                    "generation mismatch: file named {generation}, header says {}",
                    header.generation
                )));
            }
            debug!(path = %path.display(), generation, "log header validated");
            header
        };

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_path_buf(),
            header,
            max_record_size: WalHeader::DEFAULT_MAX_RECORD_SIZE,
            _phantom: std::marker::PhantomData,
        })
    }

    /// Appends one record, optionally fsyncing before returning.
    pub fn append(&self, record: &T, fsync: bool) -> Result<(), WalError> {
        let record_bytes = encoding::encode_to_vec(record)?;
        let record_len = u32::try_from(record_bytes.len())
            .map_err(|_| WalError::RecordTooLarge(record_bytes.len()))?;
        if record_len > self.max_record_size {
            return Err(WalError::RecordTooLarge(record_len as usize));
        }

        let checksum = crc32fast::hash(&record_bytes);

        let mut guard = self
            .file
            .lock()
            .map_err(|_| WalError::Internal("mutex poisoned".into()))?;

        guard.write_all(&record_len.to_le_bytes())?;
        guard.write_all(&record_bytes)?;
        guard.write_all(&checksum.to_le_bytes())?;
        if fsync {
            guard.sync_all()?;
        }

        trace!(
            len = record_len,
            crc = format_args!("{checksum:08x}"),
            fsync,
            "log record appended"
        );
        Ok(())
    }

    /// Forces all appended records to stable storage.
    pub fn sync(&self) -> Result<(), WalError> {
        let guard = self
            .file
            .lock()
            .map_err(|_| WalError::Internal("mutex poisoned".into()))?;
        guard.sync_all()?;
        Ok(())
    }

    /// A streaming iterator over the log's records, starting after the
    /// header.
    pub fn replay_iter(&self) -> WalIter<T> {
        debug!(path = %self.path.display(), "log replay started");
        WalIter {
            file: Arc::clone(&self.file),
            offset: WalHeader::DISK_SIZE as u64,
            max_record_size: self.max_record_size as usize,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Generation id of the paired memtable.
    pub fn generation(&self) -> u64 {
        self.header.generation
    }
}

/// Extracts the generation id from a `<generation>.write` file name.
pub fn parse_generation(path: &Path) -> Option<u64> {
    if path.extension()?.to_str()? != "write" {
        return None;
    }
    path.file_stem()?.to_str()?.parse::<u64>().ok()
}

/// Streaming replay iterator.
///
/// Tracks its own logical offset and seeks before every read, so it
/// stays consistent even while the appender advances the shared file
/// cursor. Yields `Err` for torn tails; callers use
/// [`WalError::is_torn_tail`] to distinguish clean ends from real
/// failures.
pub struct WalIter<T: WalData> {
    file: Arc<Mutex<File>>,
    offset: u64,
    max_record_size: usize,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: WalData> Iterator for WalIter<T> {
    type Item = Result<T, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut guard = match self.file.lock() {
            Ok(g) => g,
            Err(_) => return Some(Err(WalError::Internal("mutex poisoned".into()))),
        };

        if let Err(e) = guard.seek(SeekFrom::Start(self.offset)) {
            return Some(Err(WalError::Io(e)));
        }

        let mut len_bytes = [0u8; U32_SIZE];
        match guard.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                trace!(offset = self.offset, "log replay reached end of file");
                return None;
            }
            Err(e) => return Some(Err(WalError::Io(e))),
        }

        let record_len = u32::from_le_bytes(len_bytes) as usize;
        if record_len > self.max_record_size {
            warn!(
                offset = self.offset,
                len = record_len,
                "log record length exceeds limit, treating as torn tail"
            );
            return Some(Err(WalError::RecordTooLarge(record_len)));
        }

        let mut record_bytes = vec![0u8; record_len];
        if let Err(e) = guard.read_exact(&mut record_bytes) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                warn!(offset = self.offset, len = record_len, "log record truncated");
                return Some(Err(WalError::UnexpectedEof));
            }
            return Some(Err(WalError::Io(e)));
        }

        let mut checksum_bytes = [0u8; U32_SIZE];
        if let Err(e) = guard.read_exact(&mut checksum_bytes) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                warn!(offset = self.offset, "log record missing checksum");
                return Some(Err(WalError::UnexpectedEof));
            }
            return Some(Err(WalError::Io(e)));
        }
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        if let Ok(pos) = guard.stream_position() {
            self.offset = pos;
        }

        if crc32fast::hash(&record_bytes) != stored_checksum {
            warn!(offset = self.offset, "log record checksum mismatch");
            return Some(Err(WalError::ChecksumMismatch));
        }

        match encoding::decode_from_slice::<T>(&record_bytes) {
            Ok((record, _)) => Some(Ok(record)),
            Err(e) => Some(Err(WalError::Encoding(e))),
        }
    }
}

fn write_header<W: Write>(writer: &mut W, header: &WalHeader) -> Result<(), WalError> {
    let header_bytes = encoding::encode_to_vec(header)?;
    let checksum = crc32fast::hash(&header_bytes);
    writer.write_all(&header_bytes)?;
    writer.write_all(&checksum.to_le_bytes())?;
    Ok(())
}

fn read_and_validate_header<R: Read>(reader: &mut R) -> Result<WalHeader, WalError> {
    let mut header_bytes = vec![0u8; WalHeader::ENCODED_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let mut checksum_bytes = [0u8; U32_SIZE];
    reader.read_exact(&mut checksum_bytes)?;
    let stored_checksum = u32::from_le_bytes(checksum_bytes);

    if crc32fast::hash(&header_bytes) != stored_checksum {
        return Err(WalError::InvalidHeader("header checksum mismatch".into()));
    }

    let (header, _) = encoding::decode_from_slice::<WalHeader>(&header_bytes)?;

    if header.magic != WalHeader::MAGIC {
        return Err(WalError::InvalidHeader("bad magic".into()));
    }
    if header.version != WalHeader::VERSION {
        return Err(WalError::InvalidHeader(format!(
            "unsupported version {}",
            header.version
        )));
    }

    Ok(header)
}
