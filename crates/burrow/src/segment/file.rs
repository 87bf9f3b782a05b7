//! Segment file format.
//!
//! ## File Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  File Header (40 bytes)                                      │
//! │  - Magic: "BSEG" (4 bytes)                                   │
//! │  - Format Version: u16 (2 bytes) = 1                         │
//! │  - Flags: u8 (bit 0 = sequence segment)                      │
//! │  - Reserved: 1 byte                                          │
//! │  - Level: u16 (2 bytes)                                      │
//! │  - Reserved: 2 bytes                                         │
//! │  - Series Count: u32 (4 bytes)                               │
//! │  - Min Timestamp: i64 (8 bytes)                              │
//! │  - Max Timestamp: i64 (8 bytes)                              │
//! │  - Segment Version: u64 (8 bytes)                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Data Blocks (one per series)                                │
//! │  - Path, count, range, raw timestamps, raw values, CRC       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Series Index Block                                          │
//! │  - Index entries followed by a Bloom filter over paths       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Footer (40 bytes)                                           │
//! │  - Index offset and size, block count, file CRC, "GESB"      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::codec::{put_string, PayloadReader};
use crate::config::SyncMode;
use crate::error::{BurrowError, Result};
use crate::segment::{TimeRange, Timestamp, Version};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the segment header: "BSEG"
pub const SEGMENT_MAGIC: [u8; 4] = *b"BSEG";

/// Reverse magic bytes for the segment footer: "GESB"
pub const SEGMENT_MAGIC_REVERSE: [u8; 4] = *b"GESB";

/// Current segment format version.
pub const SEGMENT_FORMAT_VERSION: u16 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 40;

/// Footer size in bytes.
pub const FOOTER_SIZE: usize = 40;

const FLAG_SEQUENCE: u8 = 0b1;

fn corrupt(what: &str) -> BurrowError {
    BurrowError::CorruptSegment(format!("truncated {}", what))
}

/// Identity fields stamped into a segment when it is sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMeta {
    /// Seal version.
    pub version: Version,
    /// Compaction level, 0 for flushed segments.
    pub level: u16,
    /// True for sequence segments, false for out-of-order ones.
    pub sequence: bool,
}

/// Segment file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Identity fields.
    pub meta: SegmentMeta,
    /// Number of series in the file.
    pub series_count: u32,
    /// Minimum timestamp in the file.
    pub min_timestamp: Timestamp,
    /// Maximum timestamp in the file.
    pub max_timestamp: Timestamp,
}

impl SegmentHeader {
    /// Time range covered by the file; empty if it holds no points.
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.min_timestamp, self.max_timestamp)
    }

    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&SEGMENT_MAGIC);
        buf[4..6].copy_from_slice(&SEGMENT_FORMAT_VERSION.to_le_bytes());
        buf[6] = if self.meta.sequence { FLAG_SEQUENCE } else { 0 };
        buf[8..10].copy_from_slice(&self.meta.level.to_le_bytes());
        buf[12..16].copy_from_slice(&self.series_count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.min_timestamp.to_le_bytes());
        buf[24..32].copy_from_slice(&self.max_timestamp.to_le_bytes());
        buf[32..40].copy_from_slice(&self.meta.version.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        if magic != SEGMENT_MAGIC {
            return Err(BurrowError::InvalidMagic(magic));
        }
        let mut reader = PayloadReader::new(&buf[4..]);
        let format_version = reader.u16().ok_or_else(|| corrupt("header"))?;
        if format_version != SEGMENT_FORMAT_VERSION {
            return Err(BurrowError::UnsupportedVersion(format_version));
        }
        let flags = reader.u8().ok_or_else(|| corrupt("header"))?;
        let _reserved = reader.u8();
        let level = reader.u16().ok_or_else(|| corrupt("header"))?;
        let _reserved = reader.u16();
        let series_count = reader.u32().ok_or_else(|| corrupt("header"))?;
        let min_timestamp = reader.i64().ok_or_else(|| corrupt("header"))?;
        let max_timestamp = reader.i64().ok_or_else(|| corrupt("header"))?;
        let version = reader.u64().ok_or_else(|| corrupt("header"))?;

        Ok(Self {
            meta: SegmentMeta {
                version,
                level,
                sequence: flags & FLAG_SEQUENCE != 0,
            },
            series_count,
            min_timestamp,
            max_timestamp,
        })
    }
}

/// Segment file footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFooter {
    /// Offset of the series index block.
    pub index_offset: u64,
    /// Size of the series index block.
    pub index_size: u64,
    /// Number of data blocks.
    pub block_count: u32,
    /// CRC32 of every byte preceding the footer.
    pub file_crc32: u32,
}

impl SegmentFooter {
    fn to_bytes(self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[0..8].copy_from_slice(&self.index_offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.index_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.block_count.to_le_bytes());
        buf[20..24].copy_from_slice(&self.file_crc32.to_le_bytes());
        buf[36..40].copy_from_slice(&SEGMENT_MAGIC_REVERSE);
        buf
    }

    fn from_bytes(buf: &[u8; FOOTER_SIZE]) -> Result<Self> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[36..40]);
        if magic != SEGMENT_MAGIC_REVERSE {
            return Err(BurrowError::InvalidMagic(magic));
        }
        let mut reader = PayloadReader::new(&buf[..24]);
        Ok(Self {
            index_offset: reader.u64().ok_or_else(|| corrupt("footer"))?,
            index_size: reader.u64().ok_or_else(|| corrupt("footer"))?,
            block_count: reader.u32().ok_or_else(|| corrupt("footer"))?,
            file_crc32: reader.u32().ok_or_else(|| corrupt("footer"))?,
        })
    }
}

/// Location and statistics of one series block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesIndexEntry {
    /// Full series path.
    pub path: String,
    /// Offset of the data block.
    pub block_offset: u64,
    /// Size of the data block.
    pub block_size: u32,
    /// Number of points in the block.
    pub point_count: u32,
    /// Minimum timestamp in the block.
    pub min_timestamp: Timestamp,
    /// Maximum timestamp in the block.
    pub max_timestamp: Timestamp,
}

impl SeriesIndexEntry {
    /// Time range covered by the block.
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.min_timestamp, self.max_timestamp)
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        put_string(out, &self.path)?;
        out.extend_from_slice(&self.block_offset.to_le_bytes());
        out.extend_from_slice(&self.block_size.to_le_bytes());
        out.extend_from_slice(&self.point_count.to_le_bytes());
        out.extend_from_slice(&self.min_timestamp.to_le_bytes());
        out.extend_from_slice(&self.max_timestamp.to_le_bytes());
        Ok(())
    }

    fn decode(reader: &mut PayloadReader<'_>) -> Option<Self> {
        Some(Self {
            path: reader.string()?,
            block_offset: reader.u64()?,
            block_size: reader.u32()?,
            point_count: reader.u32()?,
            min_timestamp: reader.i64()?,
            max_timestamp: reader.i64()?,
        })
    }
}

const BLOOM_FILTER_DEFAULT_HASH_COUNT: u8 = 3;

/// Bloom filter over series paths.
///
/// `h_i(path) = xxhash64(path, seed=i) % size_bits` for `i` in `0..hash_count`.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    hash_count: u8,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_items` at roughly 1% false positives.
    pub fn new(expected_items: usize) -> Self {
        let num_bits = (expected_items * 10).max(64);
        Self {
            bits: vec![0u64; num_bits.div_ceil(64)],
            hash_count: BLOOM_FILTER_DEFAULT_HASH_COUNT,
        }
    }

    fn bit_positions<'a>(&'a self, path: &'a str) -> impl Iterator<Item = (usize, u64)> + 'a {
        let num_bits = (self.bits.len() * 64) as u64;
        (0..self.hash_count).map(move |seed| {
            let bit_idx = xxhash_rust::xxh64::xxh64(path.as_bytes(), seed as u64) % num_bits;
            ((bit_idx / 64) as usize, 1u64 << (bit_idx % 64))
        })
    }

    /// Adds a path.
    pub fn insert(&mut self, path: &str) {
        let positions: Vec<_> = self.bit_positions(path).collect();
        for (word, mask) in positions {
            self.bits[word] |= mask;
        }
    }

    /// Returns false if `path` is definitely absent.
    pub fn maybe_contains(&self, path: &str) -> bool {
        if self.bits.is_empty() {
            return false;
        }
        self.bit_positions(path)
            .all(|(word, mask)| self.bits[word] & mask != 0)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.bits.len() as u32).to_le_bytes());
        out.extend_from_slice(&[self.hash_count, 0, 0, 0]);
        for word in &self.bits {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }

    fn decode(reader: &mut PayloadReader<'_>) -> Option<Self> {
        let num_words = reader.u32()? as usize;
        let hash_count = reader.u8()?;
        for _ in 0..3 {
            reader.u8()?;
        }
        let mut bits = Vec::with_capacity(num_words.min(1 << 16));
        for _ in 0..num_words {
            bits.push(reader.u64()?);
        }
        Some(Self { bits, hash_count })
    }
}

/// Series index of one segment.
#[derive(Debug, Clone)]
pub struct SeriesIndex {
    entries: BTreeMap<String, SeriesIndexEntry>,
    bloom: BloomFilter,
}

impl SeriesIndex {
    fn from_entries(entries: Vec<SeriesIndexEntry>) -> Self {
        let mut bloom = BloomFilter::new(entries.len());
        let mut map = BTreeMap::new();
        for entry in entries {
            bloom.insert(&entry.path);
            map.insert(entry.path.clone(), entry);
        }
        Self {
            entries: map,
            bloom,
        }
    }

    /// Looks up a series.
    pub fn get(&self, path: &str) -> Option<&SeriesIndexEntry> {
        if !self.bloom.maybe_contains(path) {
            return None;
        }
        self.entries.get(path)
    }

    /// Iterates entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = &SeriesIndexEntry> {
        self.entries.values()
    }

    /// Number of series.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the segment holds no series.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in self.entries.values() {
            entry.encode(&mut out)?;
        }
        self.bloom.encode(&mut out);
        Ok(out)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = PayloadReader::new(bytes);
        let count = reader.u32().ok_or_else(|| corrupt("index"))? as usize;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let entry = SeriesIndexEntry::decode(&mut reader).ok_or_else(|| corrupt("index"))?;
            entries.insert(entry.path.clone(), entry);
        }
        let bloom = BloomFilter::decode(&mut reader).ok_or_else(|| corrupt("bloom filter"))?;
        Ok(Self { entries, bloom })
    }
}

/// Segment file writer.
///
/// Writes a placeholder header, one raw block per series, the series index, then
/// rewrites the header and appends the footer with the file CRC.
pub struct SegmentWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    position: u64,
    entries: Vec<SeriesIndexEntry>,
    min_timestamp: Timestamp,
    max_timestamp: Timestamp,
    body_hasher: crc32fast::Hasher,
    meta: SegmentMeta,
    sync_mode: SyncMode,
}

impl SegmentWriter {
    /// Creates (or truncates) the file at `path`.
    pub fn new(path: &Path, meta: SegmentMeta, sync_mode: SyncMode) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&[0u8; HEADER_SIZE])?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            position: HEADER_SIZE as u64,
            entries: Vec::new(),
            min_timestamp: Timestamp::MAX,
            max_timestamp: Timestamp::MIN,
            body_hasher: crc32fast::Hasher::new(),
            meta,
            sync_mode,
        })
    }

    /// Path of the file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_body(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.body_hasher.update(bytes);
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Writes one series block. Empty point sets are skipped.
    pub fn write_series(&mut self, path: &str, points: &BTreeMap<Timestamp, f64>) -> Result<()> {
        let (Some((&min_ts, _)), Some((&max_ts, _))) =
            (points.first_key_value(), points.last_key_value())
        else {
            return Ok(());
        };
        if self.entries.iter().any(|e| e.path == path) {
            return Err(BurrowError::CorruptSegment(format!(
                "series {} written twice",
                path
            )));
        }

        let point_count = points.len() as u32;
        let mut block = Vec::with_capacity(32 + path.len() + points.len() * 16);
        put_string(&mut block, path)?;
        block.extend_from_slice(&point_count.to_le_bytes());
        block.extend_from_slice(&min_ts.to_le_bytes());
        block.extend_from_slice(&max_ts.to_le_bytes());
        for ts in points.keys() {
            block.extend_from_slice(&ts.to_le_bytes());
        }
        for value in points.values() {
            block.extend_from_slice(&value.to_le_bytes());
        }
        let crc = crc32fast::hash(&block);
        block.extend_from_slice(&crc.to_le_bytes());

        let block_offset = self.position;
        self.write_body(&block)?;

        self.min_timestamp = self.min_timestamp.min(min_ts);
        self.max_timestamp = self.max_timestamp.max(max_ts);
        self.entries.push(SeriesIndexEntry {
            path: path.to_string(),
            block_offset,
            block_size: block.len() as u32,
            point_count,
            min_timestamp: min_ts,
            max_timestamp: max_ts,
        });
        Ok(())
    }

    /// Writes index, header and footer, then syncs the file.
    pub fn finish(mut self) -> Result<SegmentHeader> {
        let block_count = self.entries.len() as u32;
        let index_offset = self.position;
        let index = SeriesIndex::from_entries(std::mem::take(&mut self.entries));
        let index_bytes = index.encode()?;
        self.write_body(&index_bytes)?;

        let header = SegmentHeader {
            meta: self.meta,
            series_count: block_count,
            min_timestamp: self.min_timestamp,
            max_timestamp: self.max_timestamp,
        };
        let header_bytes = header.to_bytes();

        let mut file_hasher = crc32fast::Hasher::new();
        file_hasher.update(&header_bytes);
        file_hasher.combine(&self.body_hasher);

        let footer = SegmentFooter {
            index_offset,
            index_size: index_bytes.len() as u64,
            block_count,
            file_crc32: file_hasher.finalize(),
        };
        self.writer.write_all(&footer.to_bytes())?;
        self.writer.seek(SeekFrom::Start(0))?;
        self.writer.write_all(&header_bytes)?;
        self.writer.flush()?;

        let file = self
            .writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        self.sync_mode.sync(&file)?;
        Ok(header)
    }
}

/// Segment file reader.
///
/// Opening validates header, footer and the whole-file CRC and loads the series index.
/// Blocks are read on demand and verified against their own CRC.
#[derive(Debug)]
pub struct SegmentReader {
    path: PathBuf,
    header: SegmentHeader,
    footer: SegmentFooter,
    index: SeriesIndex,
}

impl SegmentReader {
    /// Opens and validates a segment file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < (HEADER_SIZE + FOOTER_SIZE) as u64 {
            return Err(BurrowError::CorruptSegment(format!(
                "{:?} is only {} bytes",
                path, file_size
            )));
        }
        let mut reader = BufReader::new(file);

        let mut header_buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_buf)?;
        let header = SegmentHeader::from_bytes(&header_buf)?;

        reader.seek(SeekFrom::Start(0))?;
        let body_len = file_size - FOOTER_SIZE as u64;
        let mut hasher = crc32fast::Hasher::new();
        let mut buffer = [0u8; 8192];
        let mut remaining = body_len;
        while remaining > 0 {
            let to_read = remaining.min(buffer.len() as u64) as usize;
            reader.read_exact(&mut buffer[..to_read])?;
            hasher.update(&buffer[..to_read]);
            remaining -= to_read as u64;
        }
        let calculated_crc = hasher.finalize();

        let mut footer_buf = [0u8; FOOTER_SIZE];
        reader.read_exact(&mut footer_buf)?;
        let footer = SegmentFooter::from_bytes(&footer_buf)?;
        if calculated_crc != footer.file_crc32 {
            return Err(BurrowError::ChecksumMismatch {
                expected: footer.file_crc32,
                actual: calculated_crc,
            });
        }

        let index_end = footer.index_offset.saturating_add(footer.index_size);
        if footer.index_offset < HEADER_SIZE as u64 || index_end > body_len {
            return Err(BurrowError::CorruptSegment(
                "index block out of bounds".to_string(),
            ));
        }
        reader.seek(SeekFrom::Start(footer.index_offset))?;
        let mut index_buf = vec![0u8; footer.index_size as usize];
        reader.read_exact(&mut index_buf)?;
        let index = SeriesIndex::decode(&index_buf)?;

        Ok(Self {
            path: path.to_path_buf(),
            header,
            footer,
            index,
        })
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file header.
    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    /// The file footer.
    pub fn footer(&self) -> &SegmentFooter {
        &self.footer
    }

    /// The series index.
    pub fn index(&self) -> &SeriesIndex {
        &self.index
    }

    /// Consumes the reader, returning header and index.
    pub fn into_parts(self) -> (SegmentHeader, SeriesIndex) {
        (self.header, self.index)
    }

    /// Reads one series, or `None` if the segment does not contain it.
    pub fn read_series(&self, path: &str) -> Result<Option<Vec<(Timestamp, f64)>>> {
        match self.index.get(path) {
            Some(entry) => read_block(&self.path, entry).map(Some),
            None => Ok(None),
        }
    }
}

/// Validates a finished segment written to `temp` and renames it to `path`.
pub fn promote_temp(temp: &Path, path: &Path, sync_mode: SyncMode) -> Result<()> {
    SegmentReader::open(temp)?;
    fs::rename(temp, path)?;
    if let Some(dir) = path.parent() {
        sync_mode.sync_dir(dir);
    }
    Ok(())
}

/// Reads and verifies the block described by `entry` from the file at `file_path`.
pub fn read_block(file_path: &Path, entry: &SeriesIndexEntry) -> Result<Vec<(Timestamp, f64)>> {
    let mut file = File::open(file_path)?;
    file.seek(SeekFrom::Start(entry.block_offset))?;
    let mut block = vec![0u8; entry.block_size as usize];
    file.read_exact(&mut block)?;

    if block.len() < 4 {
        return Err(corrupt("block"));
    }
    let (body, crc_bytes) = block.split_at(block.len() - 4);
    let mut crc_buf = [0u8; 4];
    crc_buf.copy_from_slice(crc_bytes);
    let expected = u32::from_le_bytes(crc_buf);
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(BurrowError::ChecksumMismatch { expected, actual });
    }

    let mut reader = PayloadReader::new(body);
    let path = reader.string().ok_or_else(|| corrupt("block"))?;
    if path != entry.path {
        return Err(BurrowError::CorruptSegment(format!(
            "block at {} holds {}, index says {}",
            entry.block_offset, path, entry.path
        )));
    }
    let count = reader.u32().ok_or_else(|| corrupt("block"))? as usize;
    let _min = reader.i64().ok_or_else(|| corrupt("block"))?;
    let _max = reader.i64().ok_or_else(|| corrupt("block"))?;

    let mut timestamps = Vec::with_capacity(count);
    for _ in 0..count {
        timestamps.push(reader.i64().ok_or_else(|| corrupt("block"))?);
    }
    let mut points = Vec::with_capacity(count);
    for ts in timestamps {
        points.push((ts, reader.f64().ok_or_else(|| corrupt("block"))?));
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta() -> SegmentMeta {
        SegmentMeta {
            version: 7,
            level: 1,
            sequence: true,
        }
    }

    fn points(pairs: &[(i64, f64)]) -> BTreeMap<Timestamp, f64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_header_layout() {
        let header = SegmentHeader {
            meta: meta(),
            series_count: 2,
            min_timestamp: -5,
            max_timestamp: 99,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], b"BSEG");
        assert_eq!(SegmentHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_write_and_read_segment() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seg");
        let mut writer = SegmentWriter::new(&path, meta(), SyncMode::None).unwrap();
        writer
            .write_series("root.sg.d1.s1", &points(&[(1, 1.0), (3, 3.0)]))
            .unwrap();
        writer
            .write_series("root.sg.d1.s2", &points(&[(2, 20.0)]))
            .unwrap();
        writer.write_series("root.sg.d1.s3", &BTreeMap::new()).unwrap();
        let header = writer.finish().unwrap();
        assert_eq!(header.series_count, 2);
        assert_eq!(header.time_range(), TimeRange::new(1, 3));

        let reader = SegmentReader::open(&path).unwrap();
        assert_eq!(reader.header().meta, meta());
        assert_eq!(reader.index().len(), 2);
        assert_eq!(
            reader.read_series("root.sg.d1.s1").unwrap().unwrap(),
            vec![(1, 1.0), (3, 3.0)]
        );
        assert!(reader.read_series("root.sg.d1.s9").unwrap().is_none());
    }

    #[test]
    fn test_empty_segment_has_empty_range() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty");
        SegmentWriter::new(&path, meta(), SyncMode::None)
            .unwrap()
            .finish()
            .unwrap();
        let reader = SegmentReader::open(&path).unwrap();
        assert!(reader.header().time_range().is_empty());
        assert!(reader.index().is_empty());
    }

    #[test]
    fn test_corrupted_byte_fails_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seg");
        let mut writer = SegmentWriter::new(&path, meta(), SyncMode::None).unwrap();
        writer.write_series("a.b", &points(&[(1, 1.0)])).unwrap();
        writer.finish().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[HEADER_SIZE + 3] ^= 0x55;
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(
            SegmentReader::open(&path),
            Err(BurrowError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_bloom_filter() {
        let mut bloom = BloomFilter::new(10);
        bloom.insert("root.sg.d1.s1");
        assert!(bloom.maybe_contains("root.sg.d1.s1"));
        let false_positives = (0..1000)
            .filter(|i| bloom.maybe_contains(&format!("root.other.{}", i)))
            .count();
        assert!(false_positives < 100);
    }
}
