//! Body stream adapter.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;

use crate::{ChecksumAlgorithm, ChecksumError, ChecksumValue, RunningChecksum};

/// Digests the chunks of a byte stream and, if an expected value is set,
/// emits one trailing error item when the finished digest differs.
pub struct ChecksummedStream<S> {
    inner: S,
    checksum: RunningChecksum,
    expected: Option<ChecksumValue>,
    done: bool,
}

impl<S> ChecksummedStream<S> {
    pub fn new(inner: S, algorithm: ChecksumAlgorithm) -> Self {
        Self {
            inner,
            checksum: RunningChecksum::new(algorithm),
            expected: None,
            done: false,
        }
    }

    pub fn verifying(inner: S, expected: ChecksumValue) -> Self {
        let mut stream = Self::new(inner, expected.algorithm());
        stream.expected = Some(expected);
        stream
    }

    pub fn current_value(&self) -> ChecksumValue {
        self.checksum.current_value()
    }
}

impl<S, E> Stream for ChecksummedStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: From<ChecksumError>,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.checksum.update(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => {
                this.done = true;
                if let Some(expected) = &this.expected
                    && let Err(e) = expected.verify(&this.checksum.current_value())
                {
                    return Poll::Ready(Some(Err(E::from(e))));
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
