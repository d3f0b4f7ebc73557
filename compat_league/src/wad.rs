use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};

use flate2::read::GzDecoder;
use serde::Serialize;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

use crate::hash::HashDomain;

// WAD ("RW") chunk container. Versions 1-3 are readable, 3.3 is written.

pub const WAD_MAGIC: &[u8; 2] = b"RW";
pub const V3_HEADER_LEN: u64 = 272;
pub const V3_CHUNK_LEN: usize = 32;
const V1_CHUNK_LEN: usize = 24;
const V2_HEADER_LEN: usize = 104;
const MAX_WAD_CHUNKS: usize = 1_000_000;
/// Output buffers are presized to at most this multiple of the stored bytes.
const MAX_INFLATE_RATIO: usize = 64;
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum WadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid wad header")]
    InvalidHeader,
    #[error("unsupported wad version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },
    #[error("wad has too many chunks: {count}")]
    TooManyChunks { count: usize },
    #[error("wad toc entry size {0} is too small")]
    InvalidTocEntrySize(u16),
    #[error("wad chunk {hash:016x} is out of bounds")]
    ChunkOutOfBounds { hash: u64 },
    #[error("wad chunk {hash:016x} uses unsupported compression {kind}")]
    UnsupportedCompression { hash: u64, kind: WadCompression },
    #[error("wad chunk {hash:016x} uses unknown compression nibble {nibble}")]
    UnknownCompression { hash: u64, nibble: u8 },
    #[error("wad chunk {hash:016x} failed to decompress: {message}")]
    Decompress { hash: u64, message: String },
    #[error("wad chunk {hash:016x} size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        hash: u64,
        expected: u32,
        actual: usize,
    },
    #[error("wad chunk {hash:016x} payload exceeds 4 GiB")]
    PayloadTooLarge { hash: u64 },
    #[error("wad writer is full ({capacity} chunks reserved)")]
    WriterFull { capacity: usize },
    #[error("hashed file map error: {0}")]
    HashedFileMap(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WadCompression {
    None,
    Gzip,
    Satellite,
    Zstd,
    ZstdMulti,
}

impl WadCompression {
    pub fn from_nibble(value: u8) -> Option<Self> {
        match value {
            0 => Some(WadCompression::None),
            1 => Some(WadCompression::Gzip),
            2 => Some(WadCompression::Satellite),
            3 => Some(WadCompression::Zstd),
            4 => Some(WadCompression::ZstdMulti),
            _ => None,
        }
    }

    pub fn nibble(self) -> u8 {
        match self {
            WadCompression::None => 0,
            WadCompression::Gzip => 1,
            WadCompression::Satellite => 2,
            WadCompression::Zstd => 3,
            WadCompression::ZstdMulti => 4,
        }
    }
}

impl fmt::Display for WadCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WadCompression::None => "none",
            WadCompression::Gzip => "gzip",
            WadCompression::Satellite => "satellite",
            WadCompression::Zstd => "zstd",
            WadCompression::ZstdMulti => "zstd-multi",
        };
        write!(f, "{}", label)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct WadVersion {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for WadVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// One fixed-size descriptor from the chunk table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WadChunk {
    pub path_hash: u64,
    pub data_offset: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub compression: WadCompression,
    pub subchunk_count: u8,
    pub duplicated: bool,
    pub subchunk_start: u16,
    pub checksum: u64,
}

impl WadChunk {
    pub fn hash_hex(&self) -> String {
        HashDomain::Archive.format(self.path_hash)
    }

    fn encode(&self) -> [u8; V3_CHUNK_LEN] {
        let mut out = [0u8; V3_CHUNK_LEN];
        out[0..8].copy_from_slice(&self.path_hash.to_le_bytes());
        out[8..12].copy_from_slice(&self.data_offset.to_le_bytes());
        out[12..16].copy_from_slice(&self.compressed_size.to_le_bytes());
        out[16..20].copy_from_slice(&self.uncompressed_size.to_le_bytes());
        out[20] = (self.subchunk_count << 4) | self.compression.nibble();
        out[21] = u8::from(self.duplicated);
        out[22..24].copy_from_slice(&self.subchunk_start.to_le_bytes());
        out[24..32].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }
}

#[derive(Clone, Debug)]
pub struct WadToc {
    pub version: WadVersion,
    pub chunks: Vec<WadChunk>,
    file_len: u64,
}

impl WadToc {
    pub fn chunks(&self) -> &[WadChunk] {
        &self.chunks
    }

    pub fn chunk_by_hash(&self, path_hash: u64) -> Option<&WadChunk> {
        self.chunks.iter().find(|chunk| chunk.path_hash == path_hash)
    }

    /// Reads the stored (possibly compressed) bytes of `chunk`.
    pub fn read_stored<R: Read + Seek>(
        &self,
        reader: &mut R,
        chunk: &WadChunk,
    ) -> Result<Vec<u8>, WadError> {
        let end = u64::from(chunk.data_offset) + u64::from(chunk.compressed_size);
        if end > self.file_len {
            return Err(WadError::ChunkOutOfBounds {
                hash: chunk.path_hash,
            });
        }
        reader.seek(SeekFrom::Start(u64::from(chunk.data_offset)))?;
        let mut stored = vec![0u8; chunk.compressed_size as usize];
        reader.read_exact(&mut stored)?;
        Ok(stored)
    }

    /// Reads and decompresses the payload of `chunk`.
    pub fn read_chunk<R: Read + Seek>(
        &self,
        reader: &mut R,
        chunk: &WadChunk,
    ) -> Result<Vec<u8>, WadError> {
        let stored = self.read_stored(reader, chunk)?;
        decompress_chunk(chunk, stored)
    }
}

pub fn read_toc<R: Read + Seek>(reader: &mut R) -> Result<WadToc, WadError> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|_| WadError::InvalidHeader)?;
    if &magic[0..2] != WAD_MAGIC {
        return Err(WadError::InvalidHeader);
    }
    let version = WadVersion {
        major: magic[2],
        minor: magic[3],
    };

    let (toc_offset, entry_len, count) = match version.major {
        1 => {
            let mut header = [0u8; 8];
            reader
                .read_exact(&mut header)
                .map_err(|_| WadError::InvalidHeader)?;
            let toc_offset = read_u16_le(&header[0..2]);
            let entry_len = read_u16_le(&header[2..4]);
            let count = read_u32_le(&header[4..8]) as usize;
            (u64::from(toc_offset), entry_len, count)
        }
        2 => {
            let mut header = [0u8; V2_HEADER_LEN - 4];
            reader
                .read_exact(&mut header)
                .map_err(|_| WadError::InvalidHeader)?;
            // ecdsa length (1) + ecdsa (83) + checksum (8)
            let toc_offset = read_u16_le(&header[92..94]);
            let entry_len = read_u16_le(&header[94..96]);
            let count = read_u32_le(&header[96..100]) as usize;
            (u64::from(toc_offset), entry_len, count)
        }
        3 => {
            let mut header = [0u8; V3_HEADER_LEN as usize - 4];
            reader
                .read_exact(&mut header)
                .map_err(|_| WadError::InvalidHeader)?;
            let count = read_u32_le(&header[264..268]) as usize;
            (V3_HEADER_LEN, V3_CHUNK_LEN as u16, count)
        }
        _ => {
            return Err(WadError::UnsupportedVersion {
                major: version.major,
                minor: version.minor,
            })
        }
    };

    if count > MAX_WAD_CHUNKS {
        return Err(WadError::TooManyChunks { count });
    }
    if (entry_len as usize) < V1_CHUNK_LEN {
        return Err(WadError::InvalidTocEntrySize(entry_len));
    }
    let toc_len = count * entry_len as usize;
    if toc_offset + toc_len as u64 > file_len {
        return Err(WadError::InvalidHeader);
    }

    reader.seek(SeekFrom::Start(toc_offset))?;
    let mut toc = vec![0u8; toc_len];
    reader.read_exact(&mut toc)?;

    let mut chunks = Vec::with_capacity(count);
    for raw in toc.chunks_exact(entry_len as usize) {
        let path_hash = read_u64_le(&raw[0..8]);
        let type_byte = raw[20];
        let compression = WadCompression::from_nibble(type_byte & 0x0f).ok_or(
            WadError::UnknownCompression {
                hash: path_hash,
                nibble: type_byte & 0x0f,
            },
        )?;
        let checksum = if raw.len() >= V3_CHUNK_LEN {
            read_u64_le(&raw[24..32])
        } else {
            0
        };
        chunks.push(WadChunk {
            path_hash,
            data_offset: read_u32_le(&raw[8..12]),
            compressed_size: read_u32_le(&raw[12..16]),
            uncompressed_size: read_u32_le(&raw[16..20]),
            compression,
            subchunk_count: type_byte >> 4,
            duplicated: raw[21] != 0,
            subchunk_start: read_u16_le(&raw[22..24]),
            checksum,
        });
    }

    Ok(WadToc {
        version,
        chunks,
        file_len,
    })
}

pub fn decompress_chunk(chunk: &WadChunk, stored: Vec<u8>) -> Result<Vec<u8>, WadError> {
    let hash = chunk.path_hash;
    let decompress_error = |err: std::io::Error| WadError::Decompress {
        hash,
        message: err.to_string(),
    };
    let data = match chunk.compression {
        WadCompression::None => stored,
        WadCompression::Gzip => {
            let decoder = GzDecoder::new(stored.as_slice());
            inflate(decoder, chunk, stored.len()).map_err(decompress_error)?
        }
        WadCompression::Zstd | WadCompression::ZstdMulti => {
            let decoder =
                zstd::stream::read::Decoder::new(stored.as_slice()).map_err(decompress_error)?;
            inflate(decoder, chunk, stored.len()).map_err(decompress_error)?
        }
        WadCompression::Satellite => {
            return Err(WadError::UnsupportedCompression {
                hash,
                kind: chunk.compression,
            })
        }
    };
    if data.len() != chunk.uncompressed_size as usize {
        return Err(WadError::SizeMismatch {
            hash,
            expected: chunk.uncompressed_size,
            actual: data.len(),
        });
    }
    Ok(data)
}

/// Reads at most one byte past the declared size, so an oversized stream
/// surfaces as a size mismatch instead of growing without bound.
fn inflate<R: Read>(
    decoder: R,
    chunk: &WadChunk,
    stored_len: usize,
) -> Result<Vec<u8>, std::io::Error> {
    let declared = chunk.uncompressed_size as usize;
    let mut out = Vec::with_capacity(declared.min(stored_len.saturating_mul(MAX_INFLATE_RATIO)));
    decoder
        .take(u64::from(chunk.uncompressed_size) + 1)
        .read_to_end(&mut out)?;
    Ok(out)
}

/// Compression picked for a payload when packing: audio banks stay raw.
pub fn compression_for_extension(extension: Option<&str>) -> WadCompression {
    match extension.map(|ext| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "wpk" || ext == "bnk" => WadCompression::None,
        _ => WadCompression::Zstd,
    }
}

/// Best-effort file extension from payload magic bytes.
pub fn guess_extension(data: &[u8]) -> Option<&'static str> {
    const PREFIXES: &[(&[u8], &str)] = &[
        (b"r3d2Mesh", "scb"),
        (b"r3d2sklt", "skl"),
        (b"r3d2anmd", "anm"),
        (b"r3d2canm", "anm"),
        (b"r3d2", "wpk"),
        (b"PROP", "bin"),
        (b"PTCH", "bin"),
        (b"DDS ", "dds"),
        (b"TEX\0", "tex"),
        (b"BKHD", "bnk"),
        (b"OEGM", "mapgeo"),
        (b"[ObjectBegin]", "sco"),
        (b"RST", "stringtable"),
        (b"PreLoad", "preload"),
        (b"\x33\x22\x11\x00", "skn"),
        (b"\x89PNG", "png"),
        (b"\xff\xd8\xff", "jpg"),
        (b"OggS", "ogg"),
        (b"<svg", "svg"),
        (b"RW", "wad"),
    ];
    for (magic, extension) in PREFIXES {
        if data.starts_with(magic) {
            return Some(*extension);
        }
    }
    if data.len() >= 8 && read_u32_le(&data[4..8]) == 0x22fd_4fc3 {
        return Some("skl");
    }
    None
}

/// Streams a v3.3 archive: the chunk table is reserved up front, payloads
/// follow, and `finish` writes the final table sorted by path hash.
///
/// Payloads whose stored bytes match an earlier chunk share its offset.
pub struct WadWriter<W: Write + Seek> {
    writer: W,
    capacity: usize,
    chunks: Vec<WadChunk>,
    stored_index: HashMap<(u64, u32, u8), u32>,
    next_offset: u64,
}

impl<W: Write + Seek> WadWriter<W> {
    pub fn new(mut writer: W, capacity: usize) -> Result<Self, WadError> {
        if capacity > MAX_WAD_CHUNKS {
            return Err(WadError::TooManyChunks { count: capacity });
        }
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&encode_v3_header(capacity as u32))?;
        writer.write_all(&vec![0u8; capacity * V3_CHUNK_LEN])?;
        Ok(Self {
            writer,
            capacity,
            chunks: Vec::with_capacity(capacity),
            stored_index: HashMap::new(),
            next_offset: V3_HEADER_LEN + (capacity * V3_CHUNK_LEN) as u64,
        })
    }

    pub fn chunks(&self) -> &[WadChunk] {
        &self.chunks
    }

    pub fn add_chunk(
        &mut self,
        path_hash: u64,
        data: &[u8],
        compression: WadCompression,
    ) -> Result<&WadChunk, WadError> {
        if self.chunks.len() >= self.capacity {
            return Err(WadError::WriterFull {
                capacity: self.capacity,
            });
        }
        let stored = match compression {
            WadCompression::Zstd => zstd::stream::encode_all(data, ZSTD_LEVEL)?,
            _ => data.to_vec(),
        };
        let compression = match compression {
            WadCompression::Zstd => WadCompression::Zstd,
            _ => WadCompression::None,
        };
        let stored_len =
            u32::try_from(stored.len()).map_err(|_| WadError::PayloadTooLarge { hash: path_hash })?;
        let uncompressed_size =
            u32::try_from(data.len()).map_err(|_| WadError::PayloadTooLarge { hash: path_hash })?;
        let checksum = xxh3_64(&stored);
        let key = (checksum, stored_len, compression.nibble());

        let (data_offset, duplicated) = match self.stored_index.get(&key) {
            Some(&offset) => (offset, true),
            None => {
                let offset = u32::try_from(self.next_offset)
                    .map_err(|_| WadError::PayloadTooLarge { hash: path_hash })?;
                self.writer.seek(SeekFrom::Start(self.next_offset))?;
                self.writer.write_all(&stored)?;
                self.next_offset += u64::from(stored_len);
                self.stored_index.insert(key, offset);
                (offset, false)
            }
        };

        self.chunks.push(WadChunk {
            path_hash,
            data_offset,
            compressed_size: stored_len,
            uncompressed_size,
            compression,
            subchunk_count: 0,
            duplicated,
            subchunk_start: 0,
            checksum,
        });
        Ok(&self.chunks[self.chunks.len() - 1])
    }

    pub fn finish(mut self) -> Result<(W, Vec<WadChunk>), WadError> {
        self.chunks.sort_by_key(|chunk| chunk.path_hash);
        self.writer.seek(SeekFrom::Start(0))?;
        self.writer
            .write_all(&encode_v3_header(self.chunks.len() as u32))?;
        for chunk in &self.chunks {
            self.writer.write_all(&chunk.encode())?;
        }
        self.writer.flush()?;
        Ok((self.writer, self.chunks))
    }
}

fn encode_v3_header(count: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(V3_HEADER_LEN as usize);
    header.extend_from_slice(WAD_MAGIC);
    header.push(3);
    header.push(3);
    header.extend_from_slice(&[0u8; 256]);
    header.extend_from_slice(&0u64.to_le_bytes());
    header.extend_from_slice(&count.to_le_bytes());
    header
}

fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[0..8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::Cursor;

    fn build(entries: &[(u64, &[u8], WadCompression)]) -> Vec<u8> {
        let mut writer = WadWriter::new(Cursor::new(Vec::new()), entries.len()).expect("writer");
        for (hash, data, compression) in entries {
            writer.add_chunk(*hash, data, *compression).expect("add");
        }
        let (cursor, _) = writer.finish().expect("finish");
        cursor.into_inner()
    }

    #[test]
    fn write_then_read_payloads() {
        let bytes = build(&[
            (7, b"DDS payload", WadCompression::Zstd),
            (3, b"raw bank", WadCompression::None),
        ]);
        let mut reader = Cursor::new(bytes);
        let toc = read_toc(&mut reader).expect("toc");
        assert_eq!(toc.version, WadVersion { major: 3, minor: 3 });
        let hashes: Vec<u64> = toc.chunks().iter().map(|chunk| chunk.path_hash).collect();
        assert_eq!(hashes, vec![3, 7]);
        let dds = toc.chunk_by_hash(7).cloned().expect("chunk 7");
        assert_eq!(dds.compression, WadCompression::Zstd);
        assert_eq!(toc.read_chunk(&mut reader, &dds).expect("read"), b"DDS payload");
        let bank = toc.chunk_by_hash(3).cloned().expect("chunk 3");
        assert_eq!(bank.compression, WadCompression::None);
        assert_eq!(toc.read_chunk(&mut reader, &bank).expect("read"), b"raw bank");
    }

    #[test]
    fn identical_payloads_share_storage() {
        let bytes = build(&[
            (1, b"same bytes", WadCompression::Zstd),
            (2, b"same bytes", WadCompression::Zstd),
            (3, b"other bytes", WadCompression::Zstd),
        ]);
        let toc = read_toc(&mut Cursor::new(bytes)).expect("toc");
        let first = toc.chunk_by_hash(1).expect("1");
        let second = toc.chunk_by_hash(2).expect("2");
        let third = toc.chunk_by_hash(3).expect("3");
        assert_eq!(first.data_offset, second.data_offset);
        assert_eq!(first.compressed_size, second.compressed_size);
        assert!(!first.duplicated);
        assert!(second.duplicated);
        assert_ne!(first.data_offset, third.data_offset);
    }

    #[test]
    fn header_is_v3_layout() {
        let bytes = build(&[(9, b"x", WadCompression::None)]);
        assert_eq!(&bytes[0..4], b"RW\x03\x03");
        assert_eq!(read_u32_le(&bytes[268..272]), 1);
        assert_eq!(read_u64_le(&bytes[272..280]), 9);
        assert_eq!(read_u32_le(&bytes[280..284]) as u64, V3_HEADER_LEN + 32);
        assert_eq!(bytes.len(), 272 + 32 + 1);
    }

    #[test]
    fn rejects_bad_magic() {
        let err = read_toc(&mut Cursor::new(b"XX\x03\x03".to_vec())).expect_err("bad magic");
        assert!(matches!(err, WadError::InvalidHeader));
    }

    #[test]
    fn rejects_truncated_toc() {
        let mut bytes = build(&[(1, b"abc", WadCompression::None)]);
        bytes[268..272].copy_from_slice(&1000u32.to_le_bytes());
        let err = read_toc(&mut Cursor::new(bytes)).expect_err("truncated");
        assert!(matches!(err, WadError::InvalidHeader));
    }

    #[test]
    fn out_of_bounds_chunk_is_per_chunk_error() {
        let mut bytes = build(&[(1, b"abc", WadCompression::None)]);
        bytes[280..284].copy_from_slice(&10_000u32.to_le_bytes());
        let mut reader = Cursor::new(bytes);
        let toc = read_toc(&mut reader).expect("toc still parses");
        let chunk = toc.chunks()[0].clone();
        let err = toc.read_chunk(&mut reader, &chunk).expect_err("oob");
        assert!(matches!(err, WadError::ChunkOutOfBounds { hash: 1 }));
    }

    #[test]
    fn guess_extension_from_magic() {
        assert_eq!(guess_extension(b"PROP\x03\x00\x00\x00"), Some("bin"));
        assert_eq!(guess_extension(b"DDS |...."), Some("dds"));
        assert_eq!(guess_extension(b"r3d2Mesh...."), Some("scb"));
        assert_eq!(guess_extension(b"r3d2\x01\x00\x00\x00"), Some("wpk"));
        assert_eq!(guess_extension(b"????"), None);
    }

    #[test]
    fn audio_extensions_stay_uncompressed() {
        assert_eq!(compression_for_extension(Some("WPK")), WadCompression::None);
        assert_eq!(compression_for_extension(Some("bnk")), WadCompression::None);
        assert_eq!(compression_for_extension(Some("dds")), WadCompression::Zstd);
        assert_eq!(compression_for_extension(None), WadCompression::Zstd);
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).expect("gzip write");
        encoder.finish().expect("gzip finish")
    }

    /// One table descriptor in the shared v1-v3 layout, `len` bytes long.
    fn descriptor(
        hash: u64,
        offset: u32,
        stored: usize,
        size: usize,
        kind: u8,
        len: usize,
    ) -> Vec<u8> {
        let mut raw = Vec::with_capacity(len);
        raw.extend_from_slice(&hash.to_le_bytes());
        raw.extend_from_slice(&offset.to_le_bytes());
        raw.extend_from_slice(&(stored as u32).to_le_bytes());
        raw.extend_from_slice(&(size as u32).to_le_bytes());
        raw.push(kind);
        raw.push(0);
        raw.extend_from_slice(&0u16.to_le_bytes());
        raw.resize(len, 0);
        raw
    }

    #[test]
    fn reads_v1_table_with_gzip_chunk() {
        let payload = b"PROP gzip payload".as_slice();
        let stored = gzip(payload);
        let data_offset = 12 + 24;

        let mut bytes = b"RW\x01\x00".to_vec();
        bytes.extend_from_slice(&12u16.to_le_bytes());
        bytes.extend_from_slice(&24u16.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend(descriptor(0x11, data_offset, stored.len(), payload.len(), 1, 24));
        bytes.extend_from_slice(&stored);

        let mut reader = Cursor::new(bytes);
        let toc = read_toc(&mut reader).expect("v1 toc");
        assert_eq!(toc.version, WadVersion { major: 1, minor: 0 });
        let chunk = toc.chunk_by_hash(0x11).cloned().expect("chunk");
        assert_eq!(chunk.compression, WadCompression::Gzip);
        assert_eq!(chunk.checksum, 0);
        assert_eq!(toc.read_chunk(&mut reader, &chunk).expect("read"), payload);
    }

    #[test]
    fn reads_v2_table_with_zstd_and_raw_chunks() {
        let packed = b"DDS packed texture".as_slice();
        let raw = b"r3d2 raw bank".as_slice();
        let stored = zstd::stream::encode_all(packed, 3).expect("zstd");
        let toc_offset = V2_HEADER_LEN as u32;
        let first = toc_offset + 2 * 32;
        let second = first + stored.len() as u32;

        let mut bytes = b"RW\x02\x01".to_vec();
        bytes.resize(96, 0);
        bytes.extend_from_slice(&(toc_offset as u16).to_le_bytes());
        bytes.extend_from_slice(&32u16.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        assert_eq!(bytes.len(), V2_HEADER_LEN);
        bytes.extend(descriptor(0x21, first, stored.len(), packed.len(), 3, 32));
        bytes.extend(descriptor(0x22, second, raw.len(), raw.len(), 0, 32));
        bytes.extend_from_slice(&stored);
        bytes.extend_from_slice(raw);

        let mut reader = Cursor::new(bytes);
        let toc = read_toc(&mut reader).expect("v2 toc");
        assert_eq!(toc.version, WadVersion { major: 2, minor: 1 });
        assert_eq!(toc.chunks().len(), 2);
        let zstd_chunk = toc.chunk_by_hash(0x21).cloned().expect("zstd chunk");
        assert_eq!(toc.read_chunk(&mut reader, &zstd_chunk).expect("read"), packed);
        let raw_chunk = toc.chunk_by_hash(0x22).cloned().expect("raw chunk");
        assert_eq!(toc.read_chunk(&mut reader, &raw_chunk).expect("read"), raw);
    }

    #[test]
    fn declared_size_bounds_decompression() {
        let stored = gzip(&[b'a'; 100]);
        let mut chunk = WadChunk {
            path_hash: 5,
            data_offset: 0,
            compressed_size: stored.len() as u32,
            uncompressed_size: u32::MAX,
            compression: WadCompression::Gzip,
            subchunk_count: 0,
            duplicated: false,
            subchunk_start: 0,
            checksum: 0,
        };
        let err = decompress_chunk(&chunk, stored.clone()).expect_err("short stream");
        assert!(matches!(err, WadError::SizeMismatch { actual: 100, .. }));

        chunk.uncompressed_size = 4;
        let err = decompress_chunk(&chunk, stored).expect_err("long stream");
        assert!(matches!(err, WadError::SizeMismatch { expected: 4, actual: 5, .. }));
    }
}
