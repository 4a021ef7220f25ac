//! Commit log framing, appending and scanning.
//!
//! ## Frame layout
//!
//! ```text
//! | magic (4) "MSLG" | kind (1) | length (4, LE) | payload (length) | crc32 (4, LE) |
//! ```
//!
//! The CRC covers everything before it. The first frame of a log is a
//! [`LogHeader`]; every later frame holds one committed [`CommitBatch`],
//! sealed with AES-256-GCM when the store is encrypted.

use crate::crypto::CryptoManager;
use crate::error::{CoreError, CoreResult};
use modelstore_codec::{from_cbor, to_cbor, Record};
use modelstore_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Magic bytes opening every frame.
pub const LOG_MAGIC: [u8; 4] = *b"MSLG";

/// Current log format version.
pub const FORMAT_VERSION: u16 = 1;

/// Bytes before the payload: magic, kind and length.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Bytes after the payload: the checksum.
pub const FRAME_TRAILER_SIZE: usize = 4;

/// Largest payload a frame may declare.
pub const MAX_PAYLOAD_SIZE: u32 = 256 * 1024 * 1024;

/// Kind of a log frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Log header, always first.
    Header = 1,
    /// One committed transaction.
    Commit = 2,
}

impl FrameKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Header),
            2 => Some(Self::Commit),
            _ => None,
        }
    }
}

/// Store-wide metadata written once at the start of the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogHeader {
    /// Frame format version.
    pub format_version: u16,
    /// Application schema version.
    pub schema_version: u64,
    /// Whether commit frames are sealed.
    pub encrypted: bool,
}

/// A single change inside a committed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogOp {
    /// Insert or replace the record at `row`.
    Put {
        /// Target collection.
        collection: String,
        /// Primary key field the collection is declared with.
        primary_key: Option<String>,
        /// Row position.
        row: u64,
        /// Full record contents.
        record: Record,
    },
    /// Remove the record at `row`.
    Delete {
        /// Target collection.
        collection: String,
        /// Row position.
        row: u64,
    },
    /// Remove every record of a collection.
    Clear {
        /// Target collection.
        collection: String,
    },
}

impl LogOp {
    /// Returns the collection this operation touches.
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            LogOp::Put { collection, .. }
            | LogOp::Delete { collection, .. }
            | LogOp::Clear { collection } => collection,
        }
    }
}

/// The payload of one commit frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitBatch {
    /// Sequence number assigned at commit.
    pub sequence: u64,
    /// Changes, applied in order.
    pub ops: Vec<LogOp>,
}

/// Computes the IEEE CRC32 of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 == 0 {
                    crc >> 1
                } else {
                    (crc >> 1) ^ 0xEDB8_8320
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8)
    })
}

/// Encodes one frame around `payload`.
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD_SIZE)
        .ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "commit of {} bytes exceeds the frame limit",
                payload.len()
            ))
        })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len() + FRAME_TRAILER_SIZE);
    frame.extend_from_slice(&LOG_MAGIC);
    frame.push(kind as u8);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// A frame read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Byte offset of the frame start.
    pub offset: u64,
    /// Frame kind.
    pub kind: FrameKind,
    /// Raw (possibly sealed) payload.
    pub payload: Vec<u8>,
}

/// An incomplete or damaged final frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TornTail {
    /// Offset where the damaged frame starts.
    pub offset: u64,
    /// What was wrong with it.
    pub reason: String,
}

/// Result of scanning a log image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameScan {
    /// Every intact frame, in order.
    pub frames: Vec<Frame>,
    /// Length of the intact prefix.
    pub valid_len: u64,
    /// The damaged final frame, if any.
    pub torn_tail: Option<TornTail>,
}

/// Why a frame failed to parse.
enum FrameFault {
    /// The image ends inside a frame whose header is plausible.
    Incomplete(String),
    /// The frame is complete but its checksum does not match.
    Checksum(String),
    /// The frame cannot be the start of a valid frame at all.
    Malformed(String),
}

fn parse_frame(bytes: &[u8]) -> Result<(FrameKind, &[u8], usize), FrameFault> {
    if bytes.len() < FRAME_HEADER_SIZE {
        let prefix = bytes.len().min(LOG_MAGIC.len());
        if bytes[..prefix] != LOG_MAGIC[..prefix] {
            return Err(FrameFault::Malformed("bad frame magic".to_string()));
        }
        return Err(FrameFault::Incomplete("incomplete frame header".to_string()));
    }
    if bytes[..4] != LOG_MAGIC {
        return Err(FrameFault::Malformed("bad frame magic".to_string()));
    }
    let kind = FrameKind::from_byte(bytes[4])
        .ok_or_else(|| FrameFault::Malformed(format!("unknown frame kind {}", bytes[4])))?;
    let len = declared_payload_len(bytes);
    if len > MAX_PAYLOAD_SIZE {
        return Err(FrameFault::Malformed(format!(
            "frame declares {len} bytes, above the limit"
        )));
    }
    let body_end = FRAME_HEADER_SIZE + len as usize;
    let total = body_end + FRAME_TRAILER_SIZE;
    if bytes.len() < total {
        return Err(FrameFault::Incomplete("incomplete frame".to_string()));
    }
    let mut stored = [0u8; 4];
    stored.copy_from_slice(&bytes[body_end..total]);
    let stored = u32::from_le_bytes(stored);
    let actual = compute_crc32(&bytes[..body_end]);
    if stored != actual {
        let reason = format!("checksum mismatch: expected {stored:08x}, got {actual:08x}");
        return Err(if total == bytes.len() {
            FrameFault::Checksum(reason)
        } else {
            FrameFault::Malformed(reason)
        });
    }
    Ok((kind, &bytes[FRAME_HEADER_SIZE..body_end], total))
}

fn declared_payload_len(bytes: &[u8]) -> u32 {
    let mut len = [0u8; 4];
    len.copy_from_slice(&bytes[5..FRAME_HEADER_SIZE]);
    u32::from_le_bytes(len)
}

/// Splits a log image into frames.
///
/// Only the final frame may be torn: either cut short with a sane declared
/// length, or complete up to the end of the image with a bad checksum.
/// Such a frame ends the scan. Any other damage is corruption.
///
/// # Errors
///
/// Returns [`CoreError::StoreUnavailable`] on corruption.
pub fn scan_frames(bytes: &[u8]) -> CoreResult<FrameScan> {
    let mut frames = Vec::new();
    let mut offset = 0usize;
    let mut torn_tail = None;

    while offset < bytes.len() {
        match parse_frame(&bytes[offset..]) {
            Ok((kind, payload, consumed)) => {
                frames.push(Frame {
                    offset: offset as u64,
                    kind,
                    payload: payload.to_vec(),
                });
                offset += consumed;
            }
            Err(FrameFault::Incomplete(reason) | FrameFault::Checksum(reason)) => {
                torn_tail = Some(TornTail {
                    offset: offset as u64,
                    reason,
                });
                break;
            }
            Err(FrameFault::Malformed(reason)) => {
                return Err(CoreError::store_unavailable(format!(
                    "log corrupt at offset {offset}: {reason}"
                )));
            }
        }
    }

    Ok(FrameScan {
        frames,
        valid_len: offset as u64,
        torn_tail,
    })
}

/// Decodes the header frame that must open every log.
pub fn decode_header(frame: &Frame) -> CoreResult<LogHeader> {
    if frame.kind != FrameKind::Header || frame.offset != 0 {
        return Err(CoreError::store_unavailable(
            "log does not start with a header frame",
        ));
    }
    from_cbor(&frame.payload)
        .map_err(|err| CoreError::store_unavailable(format!("unreadable log header: {err}")))
}

/// Summary of a log image, for tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogReport {
    /// Decoded header, if the log has one.
    pub header: Option<LogHeader>,
    /// Number of intact commit frames.
    pub commit_frames: usize,
    /// Length of the intact prefix.
    pub valid_len: u64,
    /// Total image length.
    pub total_len: u64,
    /// The damaged final frame, if any.
    pub torn_tail: Option<TornTail>,
}

/// Checks frame structure and checksums without decoding or decrypting
/// commit payloads.
///
/// # Errors
///
/// Returns [`CoreError::StoreUnavailable`] on corruption before the tail or
/// an unreadable header.
pub fn verify_log(bytes: &[u8]) -> CoreResult<LogReport> {
    let scan = scan_frames(bytes)?;
    let header = scan.frames.first().map(decode_header).transpose()?;
    let commit_frames = scan
        .frames
        .iter()
        .filter(|frame| frame.kind == FrameKind::Commit)
        .count();
    Ok(LogReport {
        header,
        commit_frames,
        valid_len: scan.valid_len,
        total_len: bytes.len() as u64,
        torn_tail: scan.torn_tail,
    })
}

/// Appends commit frames to a backend.
pub(crate) struct CommitLog {
    backend: Box<dyn StorageBackend>,
    crypto: Option<CryptoManager>,
    sync_on_commit: bool,
}

impl CommitLog {
    pub(crate) fn new(
        backend: Box<dyn StorageBackend>,
        crypto: Option<CryptoManager>,
        sync_on_commit: bool,
    ) -> Self {
        Self {
            backend,
            crypto,
            sync_on_commit,
        }
    }

    pub(crate) fn write_header(&mut self, header: &LogHeader) -> CoreResult<()> {
        let frame = encode_frame(FrameKind::Header, &to_cbor(header)?)?;
        self.backend.append(&frame)?;
        self.backend.sync()?;
        Ok(())
    }

    /// Appends one batch. On failure the log is cut back to where it was.
    pub(crate) fn append(&mut self, batch: &CommitBatch) -> CoreResult<()> {
        let offset = self.backend.size()?;
        let mut payload = to_cbor(batch)?;
        if let Some(crypto) = &self.crypto {
            payload = crypto.seal(&payload, &offset.to_le_bytes())?;
        }
        let frame = encode_frame(FrameKind::Commit, &payload)?;

        let written = self.backend.append(&frame).and_then(|_| {
            if self.sync_on_commit {
                self.backend.sync()
            } else {
                Ok(())
            }
        });
        if let Err(err) = written {
            if let Err(cut) = self.backend.truncate(offset) {
                warn!(offset, error = %cut, "could not cut back a failed commit");
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Decodes a commit frame, unsealing it if the store is encrypted.
    pub(crate) fn decode_batch(&self, frame: &Frame) -> CoreResult<CommitBatch> {
        if frame.kind != FrameKind::Commit {
            return Err(CoreError::store_unavailable(format!(
                "unexpected {:?} frame at offset {}",
                frame.kind, frame.offset
            )));
        }
        let plain = match &self.crypto {
            Some(crypto) => crypto
                .open(&frame.payload, &frame.offset.to_le_bytes())
                .map_err(|_| {
                    CoreError::store_unavailable(format!(
                        "cannot unseal commit at offset {}; wrong encryption key?",
                        frame.offset
                    ))
                })?,
            None => frame.payload.clone(),
        };
        from_cbor(&plain).map_err(|err| {
            CoreError::store_unavailable(format!(
                "undecodable commit at offset {}: {err}",
                frame.offset
            ))
        })
    }

    pub(crate) fn read_all(&self) -> CoreResult<Vec<u8>> {
        Ok(self.backend.read_all()?)
    }

    pub(crate) fn truncate(&mut self, len: u64) -> CoreResult<()> {
        Ok(self.backend.truncate(len)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptionKey;
    use modelstore_storage::InMemoryBackend;

    fn header_frame() -> Vec<u8> {
        let header = LogHeader {
            format_version: FORMAT_VERSION,
            schema_version: 2,
            encrypted: false,
        };
        encode_frame(FrameKind::Header, &to_cbor(&header).unwrap()).unwrap()
    }

    fn put(row: u64) -> LogOp {
        LogOp::Put {
            collection: "people".into(),
            primary_key: Some("id".into()),
            row,
            record: Record::new().with("id", row as i64),
        }
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn frame_layout() {
        let frame = encode_frame(FrameKind::Commit, b"abc").unwrap();
        assert_eq!(&frame[..4], b"MSLG");
        assert_eq!(frame[4], FrameKind::Commit as u8);
        assert_eq!(&frame[5..9], &3u32.to_le_bytes());
        assert_eq!(&frame[9..12], b"abc");
        assert_eq!(frame.len(), FRAME_HEADER_SIZE + 3 + FRAME_TRAILER_SIZE);
    }

    #[test]
    fn scan_reads_every_frame() {
        let mut image = header_frame();
        image.extend(encode_frame(FrameKind::Commit, b"one").unwrap());
        image.extend(encode_frame(FrameKind::Commit, b"two").unwrap());

        let scan = scan_frames(&image).unwrap();
        assert_eq!(scan.frames.len(), 3);
        assert_eq!(scan.frames[2].payload, b"two");
        assert_eq!(scan.valid_len, image.len() as u64);
        assert!(scan.torn_tail.is_none());
    }

    #[test]
    fn partial_last_frame_is_torn_tail() {
        let mut image = header_frame();
        let intact = image.len() as u64;
        let commit = encode_frame(FrameKind::Commit, b"payload").unwrap();
        image.extend_from_slice(&commit[..commit.len() - 3]);

        let scan = scan_frames(&image).unwrap();
        assert_eq!(scan.frames.len(), 1);
        assert_eq!(scan.valid_len, intact);
        assert_eq!(scan.torn_tail.unwrap().offset, intact);
    }

    #[test]
    fn bad_checksum_on_last_frame_is_torn_tail() {
        let mut image = header_frame();
        image.extend(encode_frame(FrameKind::Commit, b"payload").unwrap());
        let last = image.len() - 1;
        image[last] ^= 0xFF;

        let scan = scan_frames(&image).unwrap();
        assert_eq!(scan.frames.len(), 1);
        assert!(scan.torn_tail.unwrap().reason.contains("checksum"));
    }

    #[test]
    fn damage_before_tail_is_corruption() {
        let mut image = header_frame();
        let first_commit = image.len();
        image.extend(encode_frame(FrameKind::Commit, b"payload").unwrap());
        image.extend(encode_frame(FrameKind::Commit, b"more").unwrap());
        image[first_commit + FRAME_HEADER_SIZE] ^= 0xFF;

        assert!(matches!(
            scan_frames(&image),
            Err(CoreError::StoreUnavailable { .. })
        ));
    }

    #[test]
    fn damaged_length_before_tail_is_corruption() {
        let mut image = header_frame();
        let first_commit = image.len();
        image.extend(encode_frame(FrameKind::Commit, b"payload").unwrap());
        image.extend(encode_frame(FrameKind::Commit, b"more").unwrap());
        image[first_commit + FRAME_HEADER_SIZE - 1] = 0x7f;

        assert!(matches!(
            scan_frames(&image),
            Err(CoreError::StoreUnavailable { .. })
        ));
    }

    #[test]
    fn overlong_length_in_last_frame_is_corruption() {
        let mut image = header_frame();
        let commit = image.len();
        image.extend(encode_frame(FrameKind::Commit, b"payload").unwrap());
        // claims a few bytes more than the image holds
        image[commit + 5] += 3;

        let scan = scan_frames(&image).unwrap();
        assert_eq!(scan.torn_tail.unwrap().offset, commit as u64);

        image[commit + FRAME_HEADER_SIZE - 1] = 0x7f;
        assert!(scan_frames(&image).is_err());
    }

    #[test]
    fn stray_bytes_after_last_frame_are_corruption() {
        let mut image = header_frame();
        image.extend_from_slice(&[0x02, 0xff, 0x00]);
        assert!(scan_frames(&image).is_err());

        let mut image = header_frame();
        image.extend_from_slice(b"MSL");
        assert!(scan_frames(&image).unwrap().torn_tail.is_some());
    }

    #[test]
    fn verify_counts_commits() {
        let mut image = header_frame();
        image.extend(encode_frame(FrameKind::Commit, b"one").unwrap());
        let report = verify_log(&image).unwrap();
        assert_eq!(report.header.unwrap().schema_version, 2);
        assert_eq!(report.commit_frames, 1);
        assert_eq!(report.valid_len, report.total_len);
    }

    #[test]
    fn commit_log_append_and_decode() {
        let mut log = CommitLog::new(Box::new(InMemoryBackend::new()), None, true);
        log.write_header(&LogHeader {
            format_version: FORMAT_VERSION,
            schema_version: 0,
            encrypted: false,
        })
        .unwrap();
        let batch = CommitBatch {
            sequence: 1,
            ops: vec![put(0), put(1)],
        };
        log.append(&batch).unwrap();

        let scan = scan_frames(&log.read_all().unwrap()).unwrap();
        assert_eq!(scan.frames.len(), 2);
        assert_eq!(log.decode_batch(&scan.frames[1]).unwrap(), batch);
    }

    #[test]
    fn sealed_commits_need_the_key() {
        let key = EncryptionKey::generate();
        let mut log = CommitLog::new(
            Box::new(InMemoryBackend::new()),
            Some(CryptoManager::new(&key)),
            false,
        );
        let batch = CommitBatch {
            sequence: 1,
            ops: vec![LogOp::Clear {
                collection: "people".into(),
            }],
        };
        log.append(&batch).unwrap();
        let image = log.read_all().unwrap();
        let frame = scan_frames(&image).unwrap().frames.remove(0);
        assert_eq!(log.decode_batch(&frame).unwrap(), batch);

        let stranger = CommitLog::new(
            Box::new(InMemoryBackend::new()),
            Some(CryptoManager::new(&EncryptionKey::generate())),
            false,
        );
        assert!(matches!(
            stranger.decode_batch(&frame),
            Err(CoreError::StoreUnavailable { .. })
        ));
    }
}
