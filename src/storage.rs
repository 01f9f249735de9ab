use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use rkyv::{Archive, Serialize as RkyvSerialize};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Key-value persistence used for payload and vector blobs
pub trait KvStore<V>: Send {
    /// Store `value` under `key`, replacing any previous value.
    fn set(&mut self, key: &str, value: &V) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<V>>;

    /// Every live record, in first-insertion order.
    fn load_all(&self) -> Result<IndexMap<String, V>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn flush(&mut self) -> Result<()>;
}

/// On-disk frame
#[derive(Archive, RkyvSerialize, Debug)]
#[archive(check_bytes)]
struct Frame {
    key: String,
    /// MessagePack encoding of the stored value
    body: Vec<u8>,
}

const HEADER_LEN: u64 = 16;

/// `[len u32][body checksum u64][header checksum u32]`, little endian
///
/// The header checksum lets a scan tell a damaged length apart from an
/// append that never finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameHeader {
    len: u32,
    checksum: u64,
}

impl FrameHeader {
    fn for_body(body: &[u8]) -> Result<Self> {
        let len = u32::try_from(body.len())
            .map_err(|_| Error::InvalidInput(format!("frame of {} bytes is too large", body.len())))?;
        Ok(Self {
            len,
            checksum: seahash::hash(body),
        })
    }

    fn encode(&self) -> [u8; HEADER_LEN as usize] {
        let mut buf = [0u8; HEADER_LEN as usize];
        buf[..4].copy_from_slice(&self.len.to_le_bytes());
        buf[4..12].copy_from_slice(&self.checksum.to_le_bytes());
        let guard = seahash::hash(&buf[..12]) as u32;
        buf[12..].copy_from_slice(&guard.to_le_bytes());
        buf
    }

    /// `None` if the header checksum does not match.
    fn decode(buf: &[u8; HEADER_LEN as usize]) -> Option<Self> {
        let guard = u32::from_le_bytes(buf[12..16].try_into().ok()?);
        if seahash::hash(&buf[..12]) as u32 != guard {
            return None;
        }
        Some(Self {
            len: u32::from_le_bytes(buf[..4].try_into().ok()?),
            checksum: u64::from_le_bytes(buf[4..12].try_into().ok()?),
        })
    }
}

/// Append-only segment file of `[FrameHeader][rkyv Frame]` records
///
/// A later frame for a key shadows earlier ones. The key -> offset map is
/// rebuilt by scanning the file on open. Only an incomplete final frame is
/// dropped during the scan; any other damage is reported as corruption.
#[derive(Debug)]
pub struct SegmentStore<V> {
    file_path: PathBuf,
    file: File,
    offsets: IndexMap<String, u64>,
    current_offset: u64,
    strict: bool,
    _value: PhantomData<fn() -> V>,
}

impl<V> SegmentStore<V> {
    pub fn open(path: &Path, strict: bool) -> Result<Self> {
        // Append mode keeps writes at the tail even after reads seek around.
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let mut store = Self {
            file_path: path.to_path_buf(),
            file,
            offsets: IndexMap::new(),
            current_offset: 0,
            strict,
            _value: PhantomData,
        };
        store.rebuild()?;
        debug!(path = %path.display(), records = store.offsets.len(), "Opened segment");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn rebuild(&mut self) -> Result<()> {
        let file_len = self.file.metadata()?.len();
        let mut offset = 0u64;

        while offset < file_len {
            match self.read_frame(offset, file_len)? {
                Some((key, _, next)) => {
                    self.offsets.insert(key, offset);
                    offset = next;
                }
                None => {
                    // Torn append from a crash: drop the partial tail.
                    warn!(
                        path = %self.file_path.display(),
                        offset,
                        dropped = file_len - offset,
                        "Truncating incomplete trailing frame"
                    );
                    self.file.set_len(offset)?;
                    break;
                }
            }
        }

        self.current_offset = offset;
        Ok(())
    }

    /// Read the frame at `offset`, returning its key, body and the next offset.
    ///
    /// `Ok(None)` means the frame starts at `offset` but does not fit before
    /// `end`, which only happens for the last append.
    fn read_frame(&self, offset: u64, end: u64) -> Result<Option<(String, Vec<u8>, u64)>> {
        if offset + HEADER_LEN > end {
            return Ok(None);
        }

        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;

        let mut header_buf = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header_buf)?;
        let header = FrameHeader::decode(&header_buf).ok_or_else(|| {
            Error::corruption(&self.file_path, format!("frame header at {offset} fails its checksum"))
        })?;

        let next = offset + HEADER_LEN + u64::from(header.len);
        if next > end {
            return Ok(None);
        }

        let len = header.len as usize;
        let mut aligned = rkyv::AlignedVec::with_capacity(len);
        aligned.resize(len, 0);
        file.read_exact(&mut aligned)?;

        if seahash::hash(&aligned[..]) != header.checksum {
            return Err(Error::corruption(
                &self.file_path,
                format!("frame at {offset} fails its checksum"),
            ));
        }

        let archived = rkyv::check_archived_root::<Frame>(&aligned[..])
            .map_err(|e| Error::corruption(&self.file_path, format!("frame at {offset}: {e}")))?;

        Ok(Some((
            archived.key.as_str().to_owned(),
            archived.body.as_slice().to_vec(),
            next,
        )))
    }

    /// Body of an indexed frame.
    fn body_at(&self, offset: u64) -> Result<Vec<u8>> {
        match self.read_frame(offset, self.current_offset)? {
            Some((_, body, _)) => Ok(body),
            None => Err(Error::corruption(
                &self.file_path,
                format!("frame at {offset} runs past the end of the segment"),
            )),
        }
    }

    fn append(&mut self, key: &str, body: Vec<u8>) -> Result<u64> {
        let frame = Frame {
            key: key.to_string(),
            body,
        };
        let bytes = rkyv::to_bytes::<_, 256>(&frame)
            .map_err(|e| Error::Serialization(e.to_string()))?;

        let header = FrameHeader::for_body(&bytes)?;
        let start = self.current_offset;

        let mut record = Vec::with_capacity(HEADER_LEN as usize + bytes.len());
        record.extend_from_slice(&header.encode());
        record.extend_from_slice(&bytes);
        self.file.write_all(&record)?;
        if self.strict {
            self.file.sync_data()?;
        }

        self.current_offset += HEADER_LEN + bytes.len() as u64;
        Ok(start)
    }

    fn decode(&self, body: &[u8]) -> Result<V>
    where
        V: DeserializeOwned,
    {
        rmp_serde::from_slice(body).map_err(|e| Error::corruption(&self.file_path, e))
    }
}

impl<V> KvStore<V> for SegmentStore<V>
where
    V: Serialize + DeserializeOwned,
{
    fn set(&mut self, key: &str, value: &V) -> Result<()> {
        let body = rmp_serde::to_vec_named(value).map_err(|e| Error::Serialization(e.to_string()))?;
        let offset = self.append(key, body)?;
        self.offsets.insert(key.to_string(), offset);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<V>> {
        let Some(&offset) = self.offsets.get(key) else {
            return Ok(None);
        };
        let body = self.body_at(offset)?;
        self.decode(&body).map(Some)
    }

    fn load_all(&self) -> Result<IndexMap<String, V>> {
        let mut all = IndexMap::with_capacity(self.offsets.len());
        for (key, &offset) in &self.offsets {
            let body = self.body_at(offset)?;
            all.insert(key.clone(), self.decode(&body)?);
        }
        Ok(all)
    }

    fn len(&self) -> usize {
        self.offsets.len()
    }

    fn flush(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn open(temp: &TempDir) -> SegmentStore<Vec<f32>> {
        SegmentStore::open(&temp.path().join("vec.seg"), false).unwrap()
    }

    #[test]
    fn test_set_and_get() {
        let temp = TempDir::new().unwrap();
        let mut store = open(&temp);

        store.set("a", &vec![1.0, 2.0]).unwrap();
        store.set("b", &vec![3.5]).unwrap();

        assert_eq!(store.get("a").unwrap(), Some(vec![1.0, 2.0]));
        assert_eq!(store.get("b").unwrap(), Some(vec![3.5]));
        assert_eq!(store.get("missing").unwrap(), None);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_writes_after_reads_append() {
        let temp = TempDir::new().unwrap();
        let mut store = open(&temp);

        store.set("a", &vec![1.0]).unwrap();
        store.get("a").unwrap();
        store.set("b", &vec![2.0]).unwrap();

        assert_eq!(store.get("a").unwrap(), Some(vec![1.0]));
        assert_eq!(store.get("b").unwrap(), Some(vec![2.0]));
    }

    #[test]
    fn test_reopen_restores_records_in_order() {
        let temp = TempDir::new().unwrap();
        {
            let mut store = open(&temp);
            store.set("z", &vec![1.0]).unwrap();
            store.set("y", &vec![2.0]).unwrap();
            store.set("z", &vec![9.0]).unwrap();
        }

        let store = open(&temp);
        let all = store.load_all().unwrap();
        let keys: Vec<_> = all.keys().cloned().collect();
        assert_eq!(keys, vec!["z".to_string(), "y".to_string()]);
        assert_eq!(all["z"], vec![9.0]);
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vec.seg");
        {
            let mut store = open(&temp);
            store.set("a", &vec![1.0]).unwrap();
            store.set("b", &vec![2.0]).unwrap();
        }
        let full = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full - 3).unwrap();
        drop(file);

        let mut store = open(&temp);
        assert_eq!(store.get("a").unwrap(), Some(vec![1.0]));
        assert_eq!(store.get("b").unwrap(), None);

        store.set("c", &vec![3.0]).unwrap();
        drop(store);
        let store = open(&temp);
        assert_eq!(store.get("c").unwrap(), Some(vec![3.0]));
    }

    #[test]
    fn test_garbage_frame_is_corruption() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vec.seg");
        fs::write(&path, [0xffu8; 32]).unwrap();

        let err = SegmentStore::<Vec<f32>>::open(&path, false).unwrap_err();
        assert!(err.is_corruption());
        assert_eq!(fs::metadata(&path).unwrap().len(), 32);
    }

    fn write_four(temp: &TempDir) -> Vec<u8> {
        {
            let mut store = open(temp);
            for (i, key) in ["a", "b", "c", "d"].into_iter().enumerate() {
                store.set(key, &vec![i as f32]).unwrap();
            }
        }
        fs::read(temp.path().join("vec.seg")).unwrap()
    }

    #[test]
    fn test_damaged_length_in_middle_is_corruption() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vec.seg");
        let mut bytes = write_four(&temp);
        let full = bytes.len() as u64;

        bytes[3] ^= 0x01;
        fs::write(&path, &bytes).unwrap();

        let err = SegmentStore::<Vec<f32>>::open(&path, false).unwrap_err();
        assert!(err.is_corruption());
        assert_eq!(fs::metadata(&path).unwrap().len(), full);
    }

    #[test]
    fn test_damaged_body_is_corruption() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vec.seg");
        let mut bytes = write_four(&temp);
        let full = bytes.len() as u64;

        bytes[HEADER_LEN as usize + 2] ^= 0x80;
        fs::write(&path, &bytes).unwrap();

        let err = SegmentStore::<Vec<f32>>::open(&path, false).unwrap_err();
        assert!(err.is_corruption());
        assert_eq!(fs::metadata(&path).unwrap().len(), full);
    }

    #[test]
    fn test_partial_header_at_tail_is_dropped() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vec.seg");
        let mut bytes = write_four(&temp);
        let full = bytes.len() as u64;

        bytes.extend_from_slice(&[0x42; 7]);
        fs::write(&path, &bytes).unwrap();

        let store = open(&temp);
        assert_eq!(store.len(), 4);
        assert_eq!(store.get("d").unwrap(), Some(vec![3.0]));
        assert_eq!(fs::metadata(&path).unwrap().len(), full);
    }

    #[test]
    fn test_header_round_trip_and_guard() {
        let header = FrameHeader::for_body(b"frame body").unwrap();
        let mut buf = header.encode();
        assert_eq!(FrameHeader::decode(&buf), Some(header));

        buf[0] ^= 0x01;
        assert_eq!(FrameHeader::decode(&buf), None);
    }
}
