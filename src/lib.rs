//! apple-peeler decodes the `Body.data` files inside Apple Dictionary bundles
//! into the XML entries they hold:
//!
//! ```no_run
//! # use std::fs;
//! # use apple_peeler::*;
//! let bytes = fs::read("Body.data")?;
//! let entries = decode(&bytes, true)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Dictionaries are tens of megabytes, so memory mapping them works nicely too.
//! Each chunk of the file is compressed independently,
//! so chunks can be decompressed in parallel:
//! ```no_run
//! # use std::fs::File;
//! # use std::io;
//! # use rayon::prelude::*;
//! # use memmap2::Mmap;
//! # use apple_peeler::*;
//! let body_file = File::open("Body.data")?;
//! let mapping = unsafe { Mmap::map(&body_file)? };
//!
//! // Creating a BodyData checks the header, the chunk framing, and the padding
//! // at the end of the file, without decompressing anything.
//! let body = BodyData::new(&mapping)?;
//!
//! // Rayon's collect() keeps chunk order, and with it entry order.
//! let chunks: Vec<Vec<String>> = body
//!     .chunks()
//!     .par_iter()
//!     .map(|chunk| body.read(chunk, true))
//!     .collect::<Result<_, _>>()?;
//!
//! let document = DictionaryDocument::new(chunks.concat());
//! document.write_xml(io::stdout().lock())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! A Body.data file is a 96-byte header followed by a series of chunks,
//! each a zlib stream of length-prefixed XML fragments, then zero padding.
//! Sizes are checked at every level and any mismatch fails the whole decode.
//! The format has no documentation we know of,
//! so passing `strict = false` relaxes the per-chunk size checks
//! for poking at files that don't quite match what we've seen.

pub mod document;
pub mod locate;
pub mod read;
pub mod result;

pub use document::DictionaryDocument;
pub use read::decode;
pub use read::BodyData;

mod spec;
