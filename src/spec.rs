//! Code specific to the Body.data container format.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] module.
//!
//! There's no published description of the format;
//! the layouts below come from poking at the dictionaries
//! shipped with macOS.
//!
//! [`read`]: ../read/index.html

use std::convert::TryInto;

use crate::read::{Chunk, Header};
use crate::result::*;

/// Every number in the format is a little-endian u32.
pub const INT_SIZE: usize = std::mem::size_of::<u32>();

/// Length of the header at the front of the file
pub const HEADER_LEN: usize = 96;

/// Length of the fields at the back of the header.
/// The header size it declares can't be any smaller.
pub const FIELD_TABLE_LEN: usize = 32;

/// Separates some of the header fields.
const HEADER_FIELD_SEP: [u8; 4] = [0xff; 4];

/// The two size fields in front of each chunk
pub const FRAME_FIELDS_LEN: usize = 2 * INT_SIZE;

/// A checked cast to usize.
///
/// Every size in the format is a u32,
/// so this only fails on targets with 16-bit pointers.
pub fn usize<I: Into<u64>>(i: I) -> BodyResult<usize> {
    i.into()
        .try_into()
        .map_err(|_| BodyError::InsufficientAddressSpace)
}

/// Splits `len` bytes off the front of the provided slice, shrinking it.
pub fn take<'a>(input: &mut &'a [u8], len: usize, field: &'static str) -> BodyResult<&'a [u8]> {
    if input.len() < len {
        return Err(BodyError::Truncated {
            field,
            needed: len,
            available: input.len(),
        });
    }
    let (taken, rest) = input.split_at(len);
    *input = rest;
    Ok(taken)
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
pub fn read_u32(input: &mut &[u8], field: &'static str) -> BodyResult<u32> {
    let int_bytes = take(input, INT_SIZE, field)?;
    Ok(u32::from_le_bytes(
        int_bytes.try_into().expect("take() returned the wrong length"),
    ))
}

fn expect_separator(input: &mut &[u8]) -> BodyResult<()> {
    if take(input, INT_SIZE, "header field separator")? != HEADER_FIELD_SEP {
        return Err(BodyError::MalformedHeader(
            "missing separator between header fields",
        ));
    }
    Ok(())
}

impl Header {
    pub(crate) fn parse_and_consume(mapping: &mut &[u8]) -> BodyResult<Self> {
        // Header:
        //
        // zero padding                    64 bytes
        // content size                     4 bytes
        // separator (ff ff ff ff)          4 bytes
        // unknown                          4 bytes
        // header size                      4 bytes
        // reserved (0)                     4 bytes
        // number of chunks                 4 bytes
        // separator (ff ff ff ff)          4 bytes
        // separator (ff ff ff ff)          4 bytes
        //
        // The content size counts everything from the last `header size`
        // bytes of the header to the end of the last chunk.
        let header = take(mapping, HEADER_LEN, "header")?;
        let mut fields = &header[HEADER_LEN - FIELD_TABLE_LEN..];

        let declared_content_size = read_u32(&mut fields, "content size")?;
        expect_separator(&mut fields)?;
        let unknown = read_u32(&mut fields, "unknown header field")?;
        let header_size = read_u32(&mut fields, "header size")?;
        let reserved = read_u32(&mut fields, "reserved header field")?;
        let chunk_count = read_u32(&mut fields, "chunk count")?;
        expect_separator(&mut fields)?;
        expect_separator(&mut fields)?;
        debug_assert!(fields.is_empty());

        let header_len = usize(header_size)?;
        if !(FIELD_TABLE_LEN..=HEADER_LEN).contains(&header_len) {
            return Err(BodyError::HeaderSize(header_size));
        }
        if header[..HEADER_LEN - header_len].iter().any(|&b| b != 0) {
            return Err(BodyError::MalformedHeader(
                "padding in front of the header fields isn't zeroed",
            ));
        }

        Ok(Self {
            chunk_count,
            header_size,
            declared_content_size,
            unknown,
            reserved,
        })
    }
}

impl<'a> Chunk<'a> {
    pub(crate) fn parse_and_consume(
        index: usize,
        offset: usize,
        body: &mut &'a [u8],
    ) -> BodyResult<Self> {
        // Chunk:
        //
        // chunk size + 8                   4 bytes
        // chunk size + 4                   4 bytes
        // uncompressed size                4 bytes
        // zlib stream                      chunk size bytes
        //
        // Only the second size is used to find the next chunk.
        let redundant_size = read_u32(body, "chunk size")?;
        let size = read_u32(body, "chunk size")?;
        let data = take(body, usize(size)?, "chunk data")?;

        Ok(Self {
            index,
            offset,
            redundant_size,
            size,
            data,
        })
    }
}
