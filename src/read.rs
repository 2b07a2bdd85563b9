//! Tools for reading a Body.data file.
//!
//! Most callers just want [`decode()`], which returns every entry in the file.
//! To decompress chunks yourself (in parallel, say),
//! create a [`BodyData`] from the file and [`read`](BodyData::read) its chunks.

use std::fmt;

use flate2::{Decompress, FlushDecompress, Status};
use log::*;

use crate::result::*;
use crate::spec::{self, usize};

/// How much inflated output to make room for at a time
const INFLATE_STEP: usize = 32 * 1024;

/// The most we'll allocate up front based on a chunk's declared size
const MAX_PREALLOCATION: usize = 16 * 1024 * 1024;

/// Fields from the 96-byte header at the front of a Body.data file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// The number of chunks following the header
    pub chunk_count: u32,

    /// The length of the header's field table.
    /// Everything in front of it is zero padding.
    pub header_size: u32,

    /// The header size plus the size of every chunk frame
    pub declared_content_size: u32,

    /// A header field of unknown purpose
    pub unknown: u32,

    /// A header field that's zero in every file we've seen
    pub reserved: u32,
}

/// A compressed chunk of entries, framed but not yet decompressed
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// The position of the chunk in the file, starting at 0
    pub index: usize,

    /// The offset of the chunk's frame from the start of the file
    pub offset: usize,

    /// The first of the chunk's two size fields.
    ///
    /// It's always been `size + 4`, but we don't rely on that.
    /// The second size alone tells us where the next chunk starts.
    pub redundant_size: u32,

    /// The length of `data`
    pub size: u32,

    /// The declared uncompressed size, followed by a zlib stream
    pub data: &'a [u8],
}

// Spare the logs from the compressed bytes.
impl fmt::Debug for Chunk<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("index", &self.index)
            .field("offset", &self.offset)
            .field("redundant_size", &self.redundant_size)
            .field("size", &self.size)
            .finish()
    }
}

/// A Body.data file to be read
///
/// Creating one validates the header, the chunk framing,
/// and the padding at the end of the file,
/// but doesn't decompress anything.
pub struct BodyData<'a> {
    header: Header,
    chunks: Vec<Chunk<'a>>,
}

impl<'a> BodyData<'a> {
    /// Reads a Body.data file from a byte slice.
    ///
    /// ```no_run
    /// # use std::fs;
    /// # use apple_peeler::*;
    /// let bytes = fs::read("Body.data")?;
    /// let body = BodyData::new(&bytes)?;
    /// for chunk in body.chunks() {
    ///     for entry in body.read(chunk, true)? {
    ///         println!("{}", entry);
    ///     }
    /// }
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new(mapping: &'a [u8]) -> BodyResult<Self> {
        let mut body = mapping;
        let header = Header::parse_and_consume(&mut body)?;
        trace!("{:?}", header);

        let mut chunks = Vec::new();
        let content_size = walk_chunks(&mut body, header.chunk_count, |chunk| {
            trace!("{:?}", chunk);
            chunks.push(chunk);
            Ok(())
        })?;
        check_trailer(&header, content_size, body)?;
        debug!(
            "{} chunks in {} bytes of content",
            chunks.len(),
            content_size
        );

        Ok(BodyData { header, chunks })
    }

    /// Returns the file's header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Returns the chunks in the file, in order.
    pub fn chunks(&self) -> &[Chunk<'a>] {
        &self.chunks
    }

    /// Decompresses the given chunk and splits it into entries.
    ///
    /// Chunks are compressed independently,
    /// so multiple chunks can be read in parallel.
    /// Concatenate the results in chunk order to get the file's entries.
    ///
    /// If `strict`, the chunk must decompress to exactly its declared size
    /// with no bytes left over after its zlib stream.
    ///
    /// `chunk` must come from [`chunks()`](BodyData::chunks) of this same file.
    pub fn read(&self, chunk: &Chunk, strict: bool) -> BodyResult<Vec<String>> {
        match self.chunks.get(chunk.index) {
            Some(own) if std::ptr::eq(own.data, chunk.data) => {}
            _ => return Err(BodyError::ForeignChunk { chunk: chunk.index }),
        }
        read_chunk(chunk, self.header.chunk_count, strict)
    }

    /// Reads every chunk in the file, one after another.
    pub fn entries(&self, strict: bool) -> BodyResult<Vec<String>> {
        let mut entries = Vec::new();
        for chunk in &self.chunks {
            entries.extend(self.read(chunk, strict)?);
        }
        Ok(entries)
    }
}

/// Decodes every entry in a Body.data file, in order.
///
/// Each chunk is decompressed as soon as it's framed,
/// so a bad chunk fails the decode before later chunks are looked at.
/// Only `ChunkSizeMismatch` and `TrailingChunkData` depend on `strict`;
/// every other check always applies.
///
/// ```no_run
/// # use std::fs;
/// let bytes = fs::read("Body.data")?;
/// let entries = apple_peeler::decode(&bytes, true)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn decode(mapping: &[u8], strict: bool) -> BodyResult<Vec<String>> {
    let mut body = mapping;
    let header = Header::parse_and_consume(&mut body)?;
    trace!("{:?}", header);

    let mut entries = Vec::new();
    let content_size = walk_chunks(&mut body, header.chunk_count, |chunk| {
        trace!("{:?}", chunk);
        entries.extend(read_chunk(&chunk, header.chunk_count, strict)?);
        Ok(())
    })?;
    check_trailer(&header, content_size, body)?;
    debug!(
        "{} entries from {} chunks",
        entries.len(),
        header.chunk_count
    );

    Ok(entries)
}

/// Frames `chunk_count` chunks off the front of `body`, shrinking it,
/// and hands each to `visit`.
///
/// Returns the number of bytes the chunks took up, frames included.
fn walk_chunks<'a, F>(body: &mut &'a [u8], chunk_count: u32, mut visit: F) -> BodyResult<u64>
where
    F: FnMut(Chunk<'a>) -> BodyResult<()>,
{
    let mut content_size: u64 = 0;
    for index in 0..usize(chunk_count)? {
        let offset = spec::HEADER_LEN + usize(content_size)?;
        let chunk = Chunk::parse_and_consume(index, offset, body)?;
        content_size += u64::from(chunk.size) + spec::FRAME_FIELDS_LEN as u64;
        visit(chunk)?;
    }
    Ok(content_size)
}

/// Checks that everything after the chunks is zeroed
/// and that the chunks add up to the size the header promised.
fn check_trailer(header: &Header, content_size: u64, padding: &[u8]) -> BodyResult<()> {
    if let Some(position) = padding.iter().position(|&b| b != 0) {
        return Err(BodyError::MalformedPadding {
            offset: spec::HEADER_LEN + usize(content_size)? + position,
        });
    }
    trace!("{} bytes of padding", padding.len());

    let actual = content_size + u64::from(header.header_size);
    let expected = u64::from(header.declared_content_size);
    if actual != expected {
        return Err(BodyError::SizeMismatch { expected, actual });
    }
    Ok(())
}

fn read_chunk(chunk: &Chunk, chunk_count: u32, strict: bool) -> BodyResult<Vec<String>> {
    let decompressed = decompress_chunk(chunk, strict)?;
    let entries = split_entries(&decompressed)?;
    debug!(
        "Chunk #{}/{}: {} entries",
        chunk.index + 1,
        chunk_count,
        entries.len()
    );
    Ok(entries)
}

/// Inflates a chunk, checking its size and leftovers if `strict`.
fn decompress_chunk(chunk: &Chunk, strict: bool) -> BodyResult<Vec<u8>> {
    let mut data = chunk.data;
    let uncompressed_size = spec::read_u32(&mut data, "uncompressed chunk size")?;
    let (decompressed, unused) = inflate(chunk.index, data, usize(uncompressed_size)?)?;
    trace!(
        "Chunk #{}: {} -> {} bytes ({} declared, {} unused)",
        chunk.index + 1,
        data.len(),
        decompressed.len(),
        uncompressed_size,
        unused
    );

    if strict {
        if unused != 0 {
            return Err(BodyError::TrailingChunkData {
                chunk: chunk.index,
                unused,
            });
        }
        if decompressed.len() != usize(uncompressed_size)? {
            return Err(BodyError::ChunkSizeMismatch {
                chunk: chunk.index,
                expected: uncompressed_size,
                actual: decompressed.len(),
            });
        }
    }
    Ok(decompressed)
}

/// Inflates the zlib stream at the front of `compressed`.
///
/// Returns the inflated bytes and the number of bytes after the stream.
fn inflate(chunk: usize, compressed: &[u8], size_hint: usize) -> BodyResult<(Vec<u8>, usize)> {
    let decompression_error = |reason: String| BodyError::Decompression { chunk, reason };

    let mut inflater = Decompress::new(true);
    let mut decompressed = Vec::with_capacity(size_hint.clamp(INFLATE_STEP, MAX_PREALLOCATION));
    loop {
        if decompressed.len() == decompressed.capacity() {
            decompressed.reserve(INFLATE_STEP);
        }
        let (total_in, total_out) = (inflater.total_in(), inflater.total_out());
        let status = inflater
            .decompress_vec(
                &compressed[usize(total_in)?..],
                &mut decompressed,
                FlushDecompress::None,
            )
            .map_err(|e| decompression_error(e.to_string()))?;

        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                // No progress with room to spare: we're out of input.
                let stalled = inflater.total_in() == total_in && inflater.total_out() == total_out;
                if stalled && decompressed.len() < decompressed.capacity() {
                    return Err(decompression_error(String::from(
                        "zlib stream ended early",
                    )));
                }
            }
        }
    }

    let unused = compressed.len() - usize(inflater.total_in())?;
    Ok((decompressed, unused))
}

/// Splits a decompressed chunk into its entries.
pub fn split_entries(decompressed: &[u8]) -> BodyResult<Vec<String>> {
    Entries::new(decompressed)
        .map(|entry| entry.map(str::to_owned))
        .collect()
}

/// Iterates over the entries in a decompressed chunk.
///
/// Each entry is a little-endian u32 length followed by that many bytes of UTF-8.
/// Iteration stops after the first error.
pub struct Entries<'a> {
    remaining: &'a [u8],
    offset: usize,
}

impl<'a> Entries<'a> {
    pub fn new(decompressed: &'a [u8]) -> Self {
        Self {
            remaining: decompressed,
            offset: 0,
        }
    }

    fn parse_next(&mut self) -> BodyResult<&'a str> {
        let length = usize(spec::read_u32(&mut self.remaining, "entry length")?)?;
        let entry = spec::take(&mut self.remaining, length, "entry")?;
        let offset = self.offset + spec::INT_SIZE;
        self.offset = offset + length;
        std::str::from_utf8(entry).map_err(|source| BodyError::Encoding { offset, source })
    }
}

impl<'a> Iterator for Entries<'a> {
    type Item = BodyResult<&'a str>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        let next = self.parse_next();
        if next.is_err() {
            self.remaining = &[];
        }
        Some(next)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::io::Write;

    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    /// Length-prefixes each entry.
    fn entry_bytes(entries: &[&str]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for entry in entries {
            bytes.extend_from_slice(&(entry.len() as u32).to_le_bytes());
            bytes.extend_from_slice(entry.as_bytes());
        }
        bytes
    }

    fn compress(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    /// Frames a chunk around the given zlib stream.
    fn frame(uncompressed_size: u32, stream: &[u8]) -> Vec<u8> {
        let size = (stream.len() + 4) as u32;
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&(size + 4).to_le_bytes());
        chunk.extend_from_slice(&size.to_le_bytes());
        chunk.extend_from_slice(&uncompressed_size.to_le_bytes());
        chunk.extend_from_slice(stream);
        chunk
    }

    fn chunk_bytes(entries: &[&str]) -> Vec<u8> {
        let uncompressed = entry_bytes(entries);
        frame(uncompressed.len() as u32, &compress(&uncompressed))
    }

    /// Builds a Body.data file from framed chunks and some zero padding.
    fn body_data(chunks: &[Vec<u8>], padding: usize) -> Vec<u8> {
        let content: Vec<u8> = chunks.concat();
        let content_size = content.len() as u32 + 32;

        let mut file = vec![0; 64];
        file.extend_from_slice(&content_size.to_le_bytes());
        file.extend_from_slice(&[0xff; 4]);
        file.extend_from_slice(&0u32.to_le_bytes());
        file.extend_from_slice(&32u32.to_le_bytes());
        file.extend_from_slice(&0u32.to_le_bytes());
        file.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
        file.extend_from_slice(&[0xff; 8]);
        file.extend_from_slice(&content);
        file.resize(file.len() + padding, 0);
        file
    }

    fn sample() -> Vec<u8> {
        body_data(
            &[
                chunk_bytes(&["<d:entry id=\"a\"/>", "<d:entry id=\"b\"/>"]),
                chunk_bytes(&["<d:entry id=\"c\"/>"]),
                chunk_bytes(&["<d:entry id=\"d\">Äpfel</d:entry>", "", "<d:entry id=\"e\"/>"]),
            ],
            100,
        )
    }

    fn sample_entries() -> Vec<&'static str> {
        vec![
            "<d:entry id=\"a\"/>",
            "<d:entry id=\"b\"/>",
            "<d:entry id=\"c\"/>",
            "<d:entry id=\"d\">Äpfel</d:entry>",
            "",
            "<d:entry id=\"e\"/>",
        ]
    }

    #[test]
    fn test_split_entries() {
        let entries = split_entries(b"\x03\x00\x00\x00abc\x02\x00\x00\x00de").unwrap();
        assert_eq!(entries, ["abc", "de"]);
        assert!(split_entries(b"").unwrap().is_empty());
    }

    #[test]
    fn test_split_truncated_entry() {
        match split_entries(b"\x03\x00\x00\x00abc\x05\x00\x00\x00de") {
            Err(BodyError::Truncated {
                field: "entry",
                needed: 5,
                available: 2,
            }) => {}
            other => panic!("Expected a truncation error, got {:?}", other),
        }
        match split_entries(b"\x03\x00\x00\x00abc\x05\x00") {
            Err(BodyError::Truncated {
                field: "entry length",
                ..
            }) => {}
            other => panic!("Expected a truncation error, got {:?}", other),
        }
    }

    #[test]
    fn test_split_invalid_utf8() {
        match split_entries(b"\x01\x00\x00\x00a\x02\x00\x00\x00\xc3\x28") {
            Err(BodyError::Encoding { offset, .. }) => assert_eq!(offset, 9),
            other => panic!("Expected an encoding error, got {:?}", other),
        }
    }

    #[test]
    fn test_entries_stop_after_error() {
        let mut entries = Entries::new(b"\x01\x00\x00\x00a\x09\x00\x00\x00bc");
        assert_eq!(entries.next().unwrap().unwrap(), "a");
        assert!(entries.next().unwrap().is_err());
        assert!(entries.next().is_none());
    }

    #[test]
    fn test_hello() {
        let file = body_data(&[chunk_bytes(&["hello"])], 7);
        assert_eq!(decode(&file, true).unwrap(), ["hello"]);
    }

    #[test]
    fn test_entry_order() {
        let file = sample();
        assert_eq!(decode(&file, true).unwrap(), sample_entries());
        assert_eq!(decode(&file, false).unwrap(), sample_entries());
    }

    #[test]
    fn test_no_chunks() {
        let file = body_data(&[], 0);
        assert!(decode(&file, true).unwrap().is_empty());
    }

    #[test]
    fn test_idempotent() {
        let file = sample();
        assert_eq!(decode(&file, true).unwrap(), decode(&file, true).unwrap());
    }

    #[test]
    fn test_body_data() {
        let file = sample();
        let body = BodyData::new(&file).unwrap();
        assert_eq!(body.header().chunk_count, 3);
        assert_eq!(body.header().header_size, 32);
        assert_eq!(body.chunks().len(), 3);

        let first = &body.chunks()[0];
        assert_eq!(first.index, 0);
        assert_eq!(first.offset, 96);
        assert_eq!(first.redundant_size, first.size + 4);
        let second = &body.chunks()[1];
        assert_eq!(second.offset, 96 + 8 + first.size as usize);

        assert_eq!(
            body.read(second, true).unwrap(),
            ["<d:entry id=\"c\"/>"]
        );
        assert_eq!(body.entries(true).unwrap(), sample_entries());
    }

    #[test]
    fn test_read_foreign_chunk() {
        let file = sample();
        let other_file = sample();
        let body = BodyData::new(&file).unwrap();
        let other_body = BodyData::new(&other_file).unwrap();

        let foreign = other_body.chunks()[1];
        match body.read(&foreign, true) {
            Err(BodyError::ForeignChunk { chunk }) => assert_eq!(chunk, 1),
            other => panic!("Expected a foreign chunk error, got {:?}", other),
        }
        // A chunk whose index is out of range for this file
        let smaller_file = body_data(&[chunk_bytes(&["only"])], 0);
        let smaller = BodyData::new(&smaller_file).unwrap();
        assert!(matches!(
            smaller.read(&body.chunks()[2], true),
            Err(BodyError::ForeignChunk { chunk: 2 })
        ));
        assert_eq!(other_body.read(&foreign, true).unwrap(), ["<d:entry id=\"c\"/>"]);
    }

    #[test]
    fn test_chunk_numbering() {
        let file = body_data(&[chunk_bytes(&["a"]), chunk_bytes(&["b"]), frame(5, b"not zlib!")], 0);
        match decode(&file, true) {
            Err(e @ BodyError::Decompression { chunk: 2, .. }) => {
                assert!(e.to_string().starts_with("Couldn't decompress chunk #3:"), "{}", e);
            }
            other => panic!("Expected a decompression error, got {:?}", other),
        }
    }

    #[test]
    fn test_nonzero_padding() {
        let mut file = sample();
        let last = file.len() - 3;
        file[last] = 1;
        match decode(&file, true) {
            Err(BodyError::MalformedPadding { offset }) => assert_eq!(offset, last),
            other => panic!("Expected a padding error, got {:?}", other),
        }
        assert!(matches!(
            BodyData::new(&file),
            Err(BodyError::MalformedPadding { .. })
        ));
    }

    #[test]
    fn test_content_size_mismatch() {
        let mut file = sample();
        let declared = u32::from_le_bytes(file[64..68].try_into().unwrap());
        file[64..68].copy_from_slice(&(declared + 1).to_le_bytes());
        match decode(&file, true) {
            Err(BodyError::SizeMismatch { expected, actual }) => {
                assert_eq!(expected, u64::from(declared) + 1);
                assert_eq!(actual, u64::from(declared));
            }
            other => panic!("Expected a size mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_chunk_size_mismatch() {
        let uncompressed = entry_bytes(&["hello", "world"]);
        let wrong_size = uncompressed.len() as u32 + 1;
        let file = body_data(&[frame(wrong_size, &compress(&uncompressed))], 0);

        match decode(&file, true) {
            Err(BodyError::ChunkSizeMismatch {
                chunk,
                expected,
                actual,
            }) => {
                assert_eq!(chunk, 0);
                assert_eq!(expected, wrong_size);
                assert_eq!(actual, uncompressed.len());
            }
            other => panic!("Expected a chunk size mismatch, got {:?}", other),
        }
        assert_eq!(decode(&file, false).unwrap(), ["hello", "world"]);
    }

    #[test]
    fn test_trailing_chunk_data() {
        let uncompressed = entry_bytes(&["hello"]);
        let mut stream = compress(&uncompressed);
        stream.extend_from_slice(b"junk");
        let file = body_data(
            &[chunk_bytes(&["first"]), frame(uncompressed.len() as u32, &stream)],
            0,
        );

        match decode(&file, true) {
            Err(e @ BodyError::TrailingChunkData { .. }) => {
                assert!(matches!(
                    e,
                    BodyError::TrailingChunkData {
                        chunk: 1,
                        unused: 4
                    }
                ));
                // Messages count chunks from 1, like the logs.
                assert_eq!(e.to_string(), "Chunk #2 has 4 bytes after its zlib stream");
            }
            other => panic!("Expected trailing chunk data, got {:?}", other),
        }
        assert_eq!(decode(&file, false).unwrap(), ["first", "hello"]);
    }

    #[test]
    fn test_corrupt_stream() {
        let file = body_data(&[frame(5, b"this is not zlib")], 0);
        for strict in [true, false] {
            match decode(&file, strict) {
                Err(BodyError::Decompression { chunk: 0, .. }) => {}
                other => panic!("Expected a decompression error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_incomplete_stream() {
        let uncompressed = entry_bytes(&["hello", "world"]);
        let stream = compress(&uncompressed);
        let file = body_data(
            &[frame(uncompressed.len() as u32, &stream[..stream.len() - 3])],
            0,
        );
        match decode(&file, false) {
            Err(BodyError::Decompression { chunk: 0, .. }) => {}
            other => panic!("Expected a decompression error, got {:?}", other),
        }
    }

    #[test]
    fn test_chunk_without_size() {
        // A frame too short to hold the uncompressed size
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&6u32.to_le_bytes());
        chunk.extend_from_slice(&2u32.to_le_bytes());
        chunk.extend_from_slice(&[0, 0]);
        let file = body_data(&[chunk], 0);
        match decode(&file, false) {
            Err(BodyError::Truncated {
                field: "uncompressed chunk size",
                ..
            }) => {}
            other => panic!("Expected a truncation error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_chunks() {
        let mut file = body_data(&[chunk_bytes(&["only one"])], 0);
        // Claim a second chunk that isn't there.
        file[84..88].copy_from_slice(&2u32.to_le_bytes());
        match decode(&file, true) {
            Err(BodyError::Truncated { field, .. }) => assert_eq!(field, "chunk size"),
            other => panic!("Expected a truncation error, got {:?}", other),
        }
    }

    #[test]
    fn test_truncation() {
        let file = sample();
        let expected = sample_entries();
        for len in 0..file.len() {
            match decode(&file[..len], true) {
                // Only the padding was cut.
                Ok(entries) => assert_eq!(entries, expected, "truncated to {}", len),
                Err(BodyError::Truncated { .. }) | Err(BodyError::Decompression { .. }) => {}
                Err(other) => panic!("Unexpected error truncating to {}: {:?}", len, other),
            }
        }
    }
}
