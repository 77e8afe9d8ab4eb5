use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::TransferError;
use crate::integrity::checksum_bytes;

/// A chunk of file data for transfer.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position of the chunk within the file.
    pub index: usize,
    /// Byte offset within the file.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

/// Per-chunk and whole-file digests, as declared in a manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct FileDigests {
    pub file_size: u64,
    pub chunks: Vec<String>,
    pub global_sha256: String,
}

/// Reads a file in fixed-size chunks with automatic SHA-256 checksums.
pub struct ChunkReader {
    file: File,
    chunk_size: u64,
    next_index: usize,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`](sureroute_protocol::DEFAULT_CHUNK_SIZE)
    /// is used.
    pub fn new(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let chunk_size = if chunk_size == 0 {
            sureroute_protocol::DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            chunk_size,
            next_index: 0,
            file_size,
        })
    }

    /// Number of chunks the file splits into.
    pub fn total_chunks(&self) -> usize {
        self.file_size.div_ceil(self.chunk_size) as usize
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Reads the chunk at `index` (for resume / retries). `None` past EOF.
    pub fn read_at(&mut self, index: usize) -> Result<Option<Chunk>, TransferError> {
        let offset = index as u64 * self.chunk_size;
        if offset >= self.file_size {
            return Ok(None);
        }
        let len = std::cmp::min(self.chunk_size, self.file_size - offset) as usize;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;

        let checksum = checksum_bytes(&buf);
        Ok(Some(Chunk {
            index,
            offset,
            data: buf,
            checksum,
        }))
    }

    /// Reads the next chunk in order. Returns `None` at EOF.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let chunk = self.read_at(self.next_index)?;
        if chunk.is_some() {
            self.next_index += 1;
        }
        Ok(chunk)
    }
}

/// Hashes every chunk of `path` plus the whole file in a single pass.
pub fn compute_file_digests(path: &Path, chunk_size: u64) -> Result<FileDigests, TransferError> {
    let mut reader = ChunkReader::new(path, chunk_size)?;
    let mut whole = Sha256::new();
    let mut chunks = Vec::with_capacity(reader.total_chunks());
    while let Some(chunk) = reader.next_chunk()? {
        whole.update(&chunk.data);
        chunks.push(chunk.checksum);
    }
    Ok(FileDigests {
        file_size: reader.file_size(),
        chunks,
        global_sha256: hex::encode(whole.finalize()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn chunk_reader_reads_all() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"AABBCCDDEE");

        let mut reader = ChunkReader::new(&path, 4).unwrap();
        assert_eq!(reader.file_size(), 10);
        assert_eq!(reader.total_chunks(), 3);

        let c1 = reader.next_chunk().unwrap().unwrap();
        assert_eq!((c1.index, c1.offset), (0, 0));
        assert_eq!(&c1.data, b"AABB");
        assert_eq!(c1.checksum, checksum_bytes(b"AABB"));

        let c2 = reader.next_chunk().unwrap().unwrap();
        assert_eq!((c2.index, c2.offset), (1, 4));
        assert_eq!(&c2.data, b"CCDD");

        let c3 = reader.next_chunk().unwrap().unwrap();
        assert_eq!((c3.index, c3.offset), (2, 8));
        assert_eq!(&c3.data, b"EE");

        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn read_at_random_access() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let mut reader = ChunkReader::new(&path, 4).unwrap();
        let c = reader.read_at(2).unwrap().unwrap();
        assert_eq!(&c.data, b"89");
        let c = reader.read_at(0).unwrap().unwrap();
        assert_eq!(&c.data, b"0123");
        assert!(reader.read_at(3).unwrap().is_none());
    }

    #[test]
    fn default_chunk_size_applies() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"x");
        let reader = ChunkReader::new(&path, 0).unwrap();
        assert_eq!(reader.chunk_size(), sureroute_protocol::DEFAULT_CHUNK_SIZE);
        assert_eq!(reader.total_chunks(), 1);
    }

    #[test]
    fn digests_cover_chunks_and_whole_file() {
        let dir = TempDir::new().unwrap();
        let data = b"The quick brown fox jumps over the lazy dog";
        let path = create_test_file(dir.path(), "fox.txt", data);

        let digests = compute_file_digests(&path, 10).unwrap();
        assert_eq!(digests.file_size, data.len() as u64);
        assert_eq!(digests.chunks.len(), 5);
        assert_eq!(digests.chunks[4], checksum_bytes(&data[40..]));
        assert_eq!(digests.global_sha256, checksum_bytes(data));
    }
}
