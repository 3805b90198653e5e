//! `AsyncRead`/`AsyncWrite` adapters that digest bytes as they pass.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

use crate::{ChecksumAlgorithm, ChecksumValue, RunningChecksum};

const DIGEST_BUFFER_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// ChecksummedReader
// ---------------------------------------------------------------------------

/// Digests every byte read through it.
///
/// When built with [`verifying`](Self::verifying), reaching EOF with a
/// digest different from the expected one yields an `InvalidData` error
/// wrapping a [`ChecksumError`](crate::ChecksumError).
pub struct ChecksummedReader<R> {
    inner: R,
    checksum: RunningChecksum,
    expected: Option<ChecksumValue>,
    eof: bool,
}

impl<R> ChecksummedReader<R> {
    pub fn new(inner: R, algorithm: ChecksumAlgorithm) -> Self {
        Self {
            inner,
            checksum: RunningChecksum::new(algorithm),
            expected: None,
            eof: false,
        }
    }

    pub fn verifying(inner: R, expected: ChecksumValue) -> Self {
        let mut reader = Self::new(inner, expected.algorithm());
        reader.expected = Some(expected);
        reader
    }

    pub fn checksum(&self) -> &RunningChecksum {
        &self.checksum
    }

    pub fn current_value(&self) -> ChecksumValue {
        self.checksum.current_value()
    }

    /// Clears the digest before the underlying source is replayed.
    pub fn reset(&mut self) {
        self.checksum.reset();
        self.eof = false;
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_parts(self) -> (R, RunningChecksum) {
        (self.inner, self.checksum)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ChecksummedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let had_room = buf.remaining() > 0;

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let fresh = &buf.filled()[before..];
                if !fresh.is_empty() {
                    this.checksum.update(fresh);
                } else if had_room && !this.eof {
                    this.eof = true;
                    if let Some(expected) = &this.expected
                        && let Err(e) = expected.verify(&this.checksum.current_value())
                    {
                        return Poll::Ready(Err(io::Error::new(io::ErrorKind::InvalidData, e)));
                    }
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// ChecksummedWriter
// ---------------------------------------------------------------------------

/// Digests the bytes an inner writer actually accepts.
///
/// A short write only contributes the accepted prefix, so the digest always
/// matches what reached the destination.
pub struct ChecksummedWriter<W> {
    inner: W,
    checksum: RunningChecksum,
}

impl<W> ChecksummedWriter<W> {
    pub fn new(inner: W, algorithm: ChecksumAlgorithm) -> Self {
        Self {
            inner,
            checksum: RunningChecksum::new(algorithm),
        }
    }

    pub fn checksum(&self) -> &RunningChecksum {
        &self.checksum
    }

    pub fn current_value(&self) -> ChecksumValue {
        self.checksum.current_value()
    }

    pub fn reset(&mut self) {
        self.checksum.reset();
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_parts(self) -> (W, RunningChecksum) {
        (self.inner, self.checksum)
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ChecksummedWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.checksum.update(&buf[..n]);
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Digests a reader to EOF in bounded chunks.
pub async fn digest_reader<R: AsyncRead + Unpin>(
    reader: R,
    algorithm: ChecksumAlgorithm,
) -> io::Result<ChecksumValue> {
    let mut reader = ChecksummedReader::new(reader, algorithm);
    let mut buf = vec![0u8; DIGEST_BUFFER_SIZE];
    while reader.read(&mut buf).await? > 0 {}
    Ok(reader.current_value())
}
