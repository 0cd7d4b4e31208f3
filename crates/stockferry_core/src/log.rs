//! Framed, CRC-checked append-only log.
//!
//! Frame layout:
//!
//! ```text
//! | magic "SFLG" (4) | version u16 LE | kind u8 | len u32 LE | payload | crc32 u32 LE |
//! ```
//!
//! The CRC covers every byte before it. Payloads are CBOR.
//!
//! On open the log is scanned front to back. A frame that runs past the end
//! of the file, or the last frame failing its CRC, is a torn write: the tail
//! is cut off and the log continues from the last good frame. Any bad frame
//! that is followed by more data is corruption and fails the open.

use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use stockferry_storage::StorageBackend;
use tracing::warn;

/// Magic bytes opening every frame.
pub const LOG_MAGIC: [u8; 4] = *b"SFLG";

/// Current frame format version.
pub const LOG_VERSION: u16 = 1;

const HEADER_SIZE: usize = 11;
const CRC_SIZE: usize = 4;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Caller-defined frame kind.
    pub kind: u8,
    /// Raw CBOR payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Builds a frame by CBOR-encoding `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be encoded.
    pub fn encode<T: Serialize>(kind: u8, value: &T) -> CoreResult<Self> {
        let mut payload = Vec::new();
        ciborium::into_writer(value, &mut payload)
            .map_err(|e| CoreError::serialization(e.to_string()))?;
        Ok(Self { kind, payload })
    }

    /// Decodes the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> CoreResult<T> {
        ciborium::from_reader(self.payload.as_slice())
            .map_err(|e| CoreError::serialization(e.to_string()))
    }

    /// Serializes the frame with its envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not fit a u32 length.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        let len = u32::try_from(self.payload.len())
            .map_err(|_| CoreError::serialization("frame payload too large"))?;
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len() + CRC_SIZE);
        buf.extend_from_slice(&LOG_MAGIC);
        buf.extend_from_slice(&LOG_VERSION.to_le_bytes());
        buf.push(self.kind);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }
}

/// Result of scanning raw log bytes.
#[derive(Debug, Default)]
pub struct Scan {
    /// Frames in log order.
    pub frames: Vec<Frame>,
    /// Length of the valid prefix.
    pub valid_len: u64,
    /// Whether a torn tail follows the valid prefix.
    pub torn: bool,
}

/// Parses frames out of `data`.
///
/// # Errors
///
/// Returns [`CoreError::Corruption`] for a bad frame that is not the tail.
pub fn scan(data: &[u8]) -> CoreResult<Scan> {
    let mut scan = Scan::default();
    let mut pos = 0usize;

    while pos < data.len() {
        let rest = &data[pos..];
        if rest.len() < HEADER_SIZE {
            scan.torn = true;
            break;
        }
        if rest[..4] != LOG_MAGIC {
            return Err(CoreError::corruption(pos as u64, "bad frame magic"));
        }
        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version != LOG_VERSION {
            return Err(CoreError::corruption(
                pos as u64,
                format!("unsupported frame version {version}"),
            ));
        }
        let kind = rest[6];
        let len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;
        let frame_len = HEADER_SIZE + len + CRC_SIZE;
        if rest.len() < frame_len {
            scan.torn = true;
            break;
        }

        let body_end = HEADER_SIZE + len;
        let stored = u32::from_le_bytes([
            rest[body_end],
            rest[body_end + 1],
            rest[body_end + 2],
            rest[body_end + 3],
        ]);
        let actual = crc32fast::hash(&rest[..body_end]);
        if stored != actual {
            if rest.len() == frame_len {
                scan.torn = true;
                break;
            }
            return Err(CoreError::corruption(
                pos as u64,
                format!("crc mismatch: stored {stored:08x}, computed {actual:08x}"),
            ));
        }

        scan.frames.push(Frame {
            kind,
            payload: rest[HEADER_SIZE..body_end].to_vec(),
        });
        pos += frame_len;
    }

    scan.valid_len = pos as u64;
    Ok(scan)
}

/// An append-only frame log over a storage backend.
pub struct FrameLog {
    backend: Box<dyn StorageBackend>,
    config: StoreConfig,
    compact_mark: Option<u64>,
}

impl std::fmt::Debug for FrameLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLog")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FrameLog {
    /// Opens the log and returns it with every frame it holds.
    ///
    /// A torn tail is truncated before returning.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or mid-log corruption.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        config: StoreConfig,
    ) -> CoreResult<(Self, Vec<Frame>)> {
        let data = backend.read_all()?;
        let scan = scan(&data)?;
        if scan.torn {
            warn!(
                valid_len = scan.valid_len,
                dropped = data.len() as u64 - scan.valid_len,
                "truncating torn log tail"
            );
            backend.truncate(scan.valid_len)?;
            backend.sync()?;
        }
        let compact_mark = config.compact_threshold;
        Ok((
            Self {
                backend,
                config,
                compact_mark,
            },
            scan.frames,
        ))
    }

    /// Appends one frame.
    ///
    /// A failed write or sync cuts the log back to where the frame began, so
    /// the caller can retry the same append.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or sync fails.
    pub fn append(&mut self, frame: &Frame) -> CoreResult<()> {
        let bytes = frame.to_bytes()?;
        let start = self.backend.size()?;
        let written = self.backend.append(&bytes).and_then(|_| {
            if self.config.sync_on_write {
                self.backend.sync()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            let end = self.backend.size().unwrap_or(start);
            if end > start {
                if let Err(undo) = self.backend.truncate(start) {
                    warn!(start, end, error = %undo, "failed to roll back partial frame");
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Replaces the log contents with `frames`.
    ///
    /// # Errors
    ///
    /// Returns an error if the new contents cannot be written.
    pub fn rewrite(&mut self, frames: &[Frame]) -> CoreResult<()> {
        let mut buf = Vec::new();
        for frame in frames {
            buf.extend_from_slice(&frame.to_bytes()?);
        }
        self.backend.replace(&buf)?;
        self.backend.sync()?;
        self.move_compact_mark(buf.len() as u64);
        Ok(())
    }

    /// Whether the log has grown past its automatic compaction mark.
    #[must_use]
    pub fn wants_compaction(&self) -> bool {
        match self.compact_mark {
            Some(mark) => self.backend.size().is_ok_and(|size| size >= mark),
            None => false,
        }
    }

    /// Moves the compaction mark past the current size, so a failed
    /// compaction is not retried on every write.
    pub fn postpone_compaction(&mut self) {
        let size = self.backend.size().unwrap_or_default();
        self.move_compact_mark(size);
    }

    fn move_compact_mark(&mut self, size: u64) {
        self.compact_mark = self
            .config
            .compact_threshold
            .map(|threshold| threshold.max(size.saturating_mul(2)));
    }

    /// Current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockferry_storage::InMemoryBackend;

    fn frame(kind: u8, text: &str) -> Frame {
        Frame::encode(kind, &text.to_string()).unwrap()
    }

    #[test]
    fn frames_replay_in_order() {
        let backend = InMemoryBackend::new();
        let (mut log, frames) =
            FrameLog::open(Box::new(backend.reopen()), StoreConfig::default()).unwrap();
        assert!(frames.is_empty());
        log.append(&frame(1, "a")).unwrap();
        log.append(&frame(2, "b")).unwrap();

        let (_, frames) = FrameLog::open(Box::new(backend.reopen()), StoreConfig::default()).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind, 1);
        assert_eq!(frames[1].decode::<String>().unwrap(), "b");
    }

    #[test]
    fn torn_tail_is_truncated() {
        let mut bytes = frame(1, "good").to_bytes().unwrap();
        let good_len = bytes.len();
        let second = frame(1, "partial").to_bytes().unwrap();
        bytes.extend_from_slice(&second[..second.len() - 3]);

        let backend = InMemoryBackend::with_data(bytes);
        let (_, frames) = FrameLog::open(Box::new(backend.reopen()), StoreConfig::default()).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(backend.data().len(), good_len);
    }

    #[test]
    fn bad_crc_on_last_frame_is_torn() {
        let mut bytes = frame(1, "one").to_bytes().unwrap();
        let keep = bytes.len();
        bytes.extend_from_slice(&frame(1, "two").to_bytes().unwrap());
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let scan = scan(&bytes).unwrap();
        assert!(scan.torn);
        assert_eq!(scan.valid_len, keep as u64);
    }

    #[test]
    fn bad_crc_mid_log_is_corruption() {
        let mut bytes = frame(1, "one").to_bytes().unwrap();
        bytes.extend_from_slice(&frame(1, "two").to_bytes().unwrap());
        bytes[HEADER_SIZE] ^= 0xFF;

        let err = scan(&bytes).unwrap_err();
        assert!(matches!(err, CoreError::Corruption { offset: 0, .. }));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut bytes = frame(1, "one").to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            scan(&bytes),
            Err(CoreError::Corruption { .. })
        ));
    }

    #[test]
    fn crc_covers_header() {
        let bytes = frame(7, "x").to_bytes().unwrap();
        let body = &bytes[..bytes.len() - CRC_SIZE];
        let stored = u32::from_le_bytes(bytes[bytes.len() - CRC_SIZE..].try_into().unwrap());
        assert_eq!(stored, crc32fast::hash(body));
        assert_eq!(&bytes[..4], b"SFLG");
        assert_eq!(bytes[6], 7);
    }

    #[test]
    fn torn_append_is_rolled_back() {
        let backend = InMemoryBackend::new();
        let (mut log, _) =
            FrameLog::open(Box::new(backend.reopen()), StoreConfig::default()).unwrap();
        log.append(&frame(1, "before")).unwrap();
        let size = backend.data().len();

        backend.set_tear_writes(true);
        assert!(log.append(&frame(1, "torn")).is_err());
        assert_eq!(backend.data().len(), size);

        backend.set_tear_writes(false);
        log.append(&frame(1, "torn")).unwrap();
        log.append(&frame(1, "after")).unwrap();

        let (_, frames) = FrameLog::open(Box::new(backend.reopen()), StoreConfig::default()).unwrap();
        let texts: Vec<String> = frames.iter().map(|f| f.decode().unwrap()).collect();
        assert_eq!(texts, ["before", "torn", "after"]);
    }

    #[test]
    fn compaction_mark_tracks_live_size() {
        let backend = InMemoryBackend::new();
        let config = StoreConfig::default().compact_threshold(Some(64));
        let (mut log, _) = FrameLog::open(Box::new(backend.reopen()), config).unwrap();
        assert!(!log.wants_compaction());
        while !log.wants_compaction() {
            log.append(&frame(1, "filler")).unwrap();
        }

        let live: Vec<Frame> = (0..4).map(|i| frame(1, &format!("live-{i}"))).collect();
        log.rewrite(&live).unwrap();
        let size = log.size().unwrap();
        assert!(size > 64);
        assert!(!log.wants_compaction());
        while log.size().unwrap() < size * 2 {
            assert!(!log.wants_compaction());
            log.append(&frame(1, "filler")).unwrap();
        }
        assert!(log.wants_compaction());

        let (unbounded, _) = FrameLog::open(
            Box::new(backend.reopen()),
            StoreConfig::default().compact_threshold(None),
        )
        .unwrap();
        assert!(!unbounded.wants_compaction());
    }

    #[test]
    fn rewrite_replaces_contents() {
        let backend = InMemoryBackend::new();
        let (mut log, _) =
            FrameLog::open(Box::new(backend.reopen()), StoreConfig::default()).unwrap();
        for i in 0..5 {
            log.append(&frame(1, &i.to_string())).unwrap();
        }
        log.rewrite(&[frame(2, "only")]).unwrap();

        let (_, frames) = FrameLog::open(Box::new(backend.reopen()), StoreConfig::default()).unwrap();
        assert_eq!(frames, vec![frame(2, "only")]);
    }
}
