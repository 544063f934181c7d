//! Snapshot codec: length-prefixed frames with optional stream compression
//! (§4.J).
//!
//! Grounded on the teacher's `codec.rs` (`BincodeCodec`, `EncodedData`,
//! `CompressionAlgorithm`) for the frame/codec shape, but that file's
//! `compress_lz4`/`compress_zstd` are simulation stubs that just clone the
//! input with a "use lz4_flex/zstd in production" comment. This rewrite
//! performs real compression via the teacher's own `lz4`/`flate2`
//! dependencies and sniffs the magic bytes the way those crates' formats
//! actually define them, instead of carrying the stub forward.

use std::fs::File;
use std::hash::Hash;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::entry::{Entry, Value};
use crate::error::{CacheError, CacheResult};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const LZ4_FRAME_MAGIC: [u8; 4] = [0x04, 0x22, 0x4d, 0x18];
const MAX_FRAME_LEN: usize = 0xFF_FFFF; // 3-byte big-endian length prefix

/// Stream compression applied to a whole snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No compression.
    None,
    /// gzip via `flate2`.
    Gzip,
    /// LZ4 frame format via the `lz4` crate.
    Lz4,
}

/// On-the-wire representation of one entry, round-tripping `modified` and
/// `expiration` as required by §4.J.
#[derive(Debug, Serialize, Deserialize)]
struct WireEntry<K> {
    key: K,
    modified: i64,
    expiration_ms: Option<u64>,
    value: Value,
}

impl<K> WireEntry<K> {
    fn from_entry(entry: Entry<K>) -> Self {
        Self {
            key: entry.key,
            modified: entry.modified,
            expiration_ms: entry.expiration.map(|d| d.as_millis() as u64),
            value: entry.value,
        }
    }

    fn into_entry(self) -> Entry<K> {
        Entry {
            key: self.key,
            modified: self.modified,
            expiration: self.expiration_ms.map(Duration::from_millis),
            value: self.value,
        }
    }
}

fn classify_open_error(path: &Path, err: io::Error) -> CacheError {
    if err.kind() == io::ErrorKind::NotFound {
        CacheError::Enoent(path.display().to_string())
    } else {
        CacheError::Io(err)
    }
}

fn encode_frame<K: Serialize>(entry: &WireEntry<K>) -> CacheResult<Vec<u8>> {
    let payload = bincode::serialize(entry).map_err(|e| CacheError::Codec(e.to_string()))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(CacheError::Codec(format!(
            "encoded entry ({} bytes) exceeds max frame length {MAX_FRAME_LEN}",
            payload.len()
        )));
    }
    let len = payload.len() as u32;
    let mut framed = Vec::with_capacity(3 + payload.len());
    framed.push((len >> 16) as u8);
    framed.push((len >> 8) as u8);
    framed.push(len as u8);
    framed.extend_from_slice(&payload);
    Ok(framed)
}

fn decode_frame<K: DeserializeOwned>(reader: &mut impl Read) -> CacheResult<Option<WireEntry<K>>> {
    let mut len_buf = [0u8; 3];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(CacheError::Io(e)),
    }
    let len = ((len_buf[0] as usize) << 16) | ((len_buf[1] as usize) << 8) | (len_buf[2] as usize);

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CacheError::Codec("frame shorter than declared length".into())
        } else {
            CacheError::Io(e)
        }
    })?;

    let entry = bincode::deserialize(&payload).map_err(|e| CacheError::Codec(e.to_string()))?;
    Ok(Some(entry))
}

enum SnapshotWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<File>),
    Lz4(lz4::Encoder<File>),
}

impl Write for SnapshotWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SnapshotWriter::Plain(w) => w.write(buf),
            SnapshotWriter::Gzip(w) => w.write(buf),
            SnapshotWriter::Lz4(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            SnapshotWriter::Plain(w) => w.flush(),
            SnapshotWriter::Gzip(w) => w.flush(),
            SnapshotWriter::Lz4(w) => w.flush(),
        }
    }
}

impl SnapshotWriter {
    fn open(path: &Path, compression: Compression) -> CacheResult<Self> {
        if path.is_dir() {
            return Err(CacheError::Eisdir(path.display().to_string()));
        }
        let file = File::create(path).map_err(|e| classify_open_error(path, e))?;
        Ok(match compression {
            Compression::None => SnapshotWriter::Plain(BufWriter::new(file)),
            Compression::Gzip => SnapshotWriter::Gzip(GzEncoder::new(file, flate2::Compression::default())),
            Compression::Lz4 => SnapshotWriter::Lz4(
                lz4::EncoderBuilder::new()
                    .build(file)
                    .map_err(CacheError::Io)?,
            ),
        })
    }

    fn finish(self) -> CacheResult<()> {
        match self {
            SnapshotWriter::Plain(mut w) => w.flush().map_err(CacheError::Io),
            SnapshotWriter::Gzip(w) => w.finish().map(|_| ()).map_err(CacheError::Io),
            SnapshotWriter::Lz4(w) => {
                let (_file, result) = w.finish();
                result.map_err(CacheError::Io)
            }
        }
    }
}

fn sniff_and_open_reader(path: &Path) -> CacheResult<Box<dyn Read>> {
    if path.is_dir() {
        return Err(CacheError::Eisdir(path.display().to_string()));
    }
    let mut file = File::open(path).map_err(|e| classify_open_error(path, e))?;

    let mut magic = [0u8; 4];
    let read = {
        let mut probe = [0u8; 4];
        let mut filled = 0;
        while filled < 4 {
            let n = file.read(&mut probe[filled..]).map_err(CacheError::Io)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        magic[..filled].copy_from_slice(&probe[..filled]);
        filled
    };

    use std::io::{Seek, SeekFrom};
    file.seek(SeekFrom::Start(0)).map_err(CacheError::Io)?;

    if read >= 2 && magic[..2] == GZIP_MAGIC {
        Ok(Box::new(GzDecoder::new(file)))
    } else if read >= 4 && magic == LZ4_FRAME_MAGIC {
        Ok(Box::new(lz4::Decoder::new(file).map_err(CacheError::Io)?))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Write every entry yielded by `entries` to `path` as a length-prefixed
/// frame stream (§4.J `save`/`dump`).
pub fn save<K>(
    path: &Path,
    compression: Compression,
    entries: impl IntoIterator<Item = Entry<K>>,
) -> CacheResult<usize>
where
    K: Serialize,
{
    let mut writer = SnapshotWriter::open(path, compression)?;
    let mut count = 0;
    for entry in entries {
        let wire = WireEntry::from_entry(entry);
        let frame = encode_frame(&wire)?;
        writer.write_all(&frame).map_err(CacheError::Io)?;
        count += 1;
    }
    writer.finish()?;
    Ok(count)
}

/// Decode `modified + expiration` so the remaining life at `now_ms` is
/// preserved relative to the importing time (§4.J `import`). Returns
/// `None` if the entry is already dead and should be skipped.
pub fn resolve_import_expiration(
    modified: i64,
    expiration_ms: Option<u64>,
    now_ms: i64,
) -> Option<Option<Duration>> {
    match expiration_ms {
        None => Some(None),
        Some(ms) => {
            let deadline = modified.saturating_add(ms as i64);
            if deadline <= now_ms {
                None
            } else {
                Some(Some(Duration::from_millis((deadline - now_ms) as u64)))
            }
        }
    }
}

/// Read every frame from `path`, decode it, and hand each resulting entry
/// to `import_one` (§4.J `restore`). Returns the number of entries
/// imported (excludes ones skipped because they were already dead).
pub fn restore<K>(
    path: &Path,
    now_ms: i64,
    mut import_one: impl FnMut(Entry<K>),
) -> CacheResult<usize>
where
    K: DeserializeOwned,
{
    let mut reader = sniff_and_open_reader(path)?;
    let mut imported = 0;
    while let Some(wire) = decode_frame::<K>(&mut reader)? {
        let had_expiration = wire.expiration_ms.is_some();
        let Some(resolved_expiration) =
            resolve_import_expiration(wire.modified, wire.expiration_ms, now_ms)
        else {
            continue;
        };
        let mut entry = wire.into_entry();
        entry.expiration = resolved_expiration;
        if had_expiration {
            // re-anchor `modified` to the importing time so `modified +
            // expiration` still lands on the original absolute deadline
            entry.modified = now_ms;
        }
        import_one(entry);
        imported += 1;
    }
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, value: i64, expiration: Option<Duration>, modified: i64) -> Entry<String> {
        Entry::new(key.to_string(), Value::Int(value), expiration, modified)
    }

    #[test]
    fn round_trip_without_compression() {
        let dir = std::env::temp_dir().join(format!("vaultkeep-codec-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("plain.snap");

        let entries = vec![
            entry("a", 1, None, 0),
            entry("b", 2, Some(Duration::from_millis(1000)), 100),
        ];
        save(&path, Compression::None, entries).unwrap();

        let mut restored = Vec::new();
        restore::<String>(&path, 100, |e| restored.push(e)).unwrap();
        assert_eq!(restored.len(), 2);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn import_skips_already_dead_entries() {
        // modified=0, expiration=10ms, now=1000ms -> long dead, must be skipped
        assert_eq!(resolve_import_expiration(0, Some(10), 1000), None);
    }

    #[test]
    fn import_preserves_remaining_life() {
        // modified=0, expiration=1000ms, now=400ms -> 600ms remaining
        let resolved = resolve_import_expiration(0, Some(1000), 400);
        assert_eq!(resolved, Some(Some(Duration::from_millis(600))));
    }

    #[test]
    fn restore_on_missing_path_is_enoent() {
        let missing = Path::new("/nonexistent/path/for/vaultkeep/test.snap");
        let result = restore::<String>(missing, 0, |_| {});
        assert!(matches!(result, Err(CacheError::Enoent(_))));
    }

    #[test]
    fn restore_on_directory_is_eisdir() {
        let dir = std::env::temp_dir();
        let result = restore::<String>(&dir, 0, |_| {});
        assert!(matches!(result, Err(CacheError::Eisdir(_))));
    }

    #[test]
    fn round_trip_with_gzip_compression() {
        let dir = std::env::temp_dir().join(format!("vaultkeep-codec-test-gz-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gz.snap");

        save(&path, Compression::Gzip, vec![entry("a", 1, None, 0)]).unwrap();
        let mut restored = Vec::new();
        restore::<String>(&path, 0, |e| restored.push(e)).unwrap();
        assert_eq!(restored.len(), 1);

        std::fs::remove_file(&path).ok();
    }
}
