//! Error types and the related `Result<T>`

use thiserror::Error;

pub type BodyResult<T> = Result<T, BodyError>;

#[derive(Debug, Error)]
pub enum BodyError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// The input ended before a field or frame was complete.
    #[error("Truncated input: {field} needs {needed} bytes, only {available} left")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    /// The 96-byte header didn't match the known layout.
    #[error("Malformed header: {0}")]
    MalformedHeader(&'static str),

    /// The header declared a size its own layout can't fit in.
    #[error("Malformed header: header size {0} out of range")]
    HeaderSize(u32),

    // Chunk fields below are `Chunk::index` (from 0);
    // messages number chunks from 1, as the logs do.
    /// A chunk's zlib stream was invalid or ended early.
    #[error("Couldn't decompress chunk #{}: {reason}", .chunk + 1)]
    Decompression { chunk: usize, reason: String },

    /// A chunk decompressed to a different size than it declared.
    #[error("Chunk #{} declared {expected} uncompressed bytes, got {actual}", .chunk + 1)]
    ChunkSizeMismatch {
        chunk: usize,
        expected: u32,
        actual: usize,
    },

    /// Bytes were left over in a chunk after its zlib stream ended.
    #[error("Chunk #{} has {unused} bytes after its zlib stream", .chunk + 1)]
    TrailingChunkData { chunk: usize, unused: usize },

    /// [`BodyData::read()`](crate::BodyData::read) was given a chunk
    /// from some other file.
    #[error("Chunk #{} doesn't belong to this Body.data", .chunk + 1)]
    ForeignChunk { chunk: usize },

    /// Something besides zeros followed the last chunk.
    #[error("Non-zero padding byte at offset {offset}")]
    MalformedPadding { offset: usize },

    /// The chunks and header don't add up to the content size in the header.
    #[error("Header declared {expected} bytes of content, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// An entry wasn't valid UTF-8
    #[error("Invalid UTF-8 in entry at offset {offset}")]
    Encoding {
        offset: usize,
        #[source]
        source: std::str::Utf8Error,
    },

    /// A path (from the user or the file system) couldn't be used.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A size from the file doesn't fit in a usize,
    /// which can only happen on targets with pointers narrower than 32 bits.
    #[error("Body.data too large for address space")]
    InsufficientAddressSpace,
}
