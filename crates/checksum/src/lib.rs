//! Streaming checksum engine.
//!
//! A [`RunningChecksum`] observes bytes as they cross an I/O boundary and
//! can be queried at any point without being consumed. The adapters in
//! [`io`] and [`stream`] thread a checksum through `AsyncRead`, `AsyncWrite`
//! and body streams so payloads never need to be buffered in full.

mod algorithm;
mod error;
pub mod etag;
pub mod io;
mod running;
pub mod stream;
mod value;

pub use algorithm::ChecksumAlgorithm;
pub use error::ChecksumError;
pub use etag::{md5_from_etag, multipart_etag};
pub use io::{ChecksummedReader, ChecksummedWriter, digest_reader};
pub use running::{RunningChecksum, combine_crc32};
pub use stream::ChecksummedStream;
pub use value::ChecksumValue;
