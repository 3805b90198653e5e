use std::io::{self, Cursor, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

/// Reader over one byte range of a source.
pub type RangeReader = Box<dyn AsyncRead + Send + Unpin>;

/// Random-access data an upload reads its parts from.
///
/// Each attempt opens its range afresh, so a retry never sees bytes left
/// over from a failed read.
pub trait PartSource: Send + Sync + 'static {
    /// Total size in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens `[start, start + len)` for reading.
    fn open_range(&self, start: u64, len: u64) -> BoxFuture<'_, io::Result<RangeReader>>;
}

/// A file on disk; its size is captured when opened.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = tokio::fs::metadata(&path).await?.len();
        Ok(Self { path, len })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PartSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn open_range(&self, start: u64, len: u64) -> BoxFuture<'_, io::Result<RangeReader>> {
        Box::pin(async move {
            let mut file = tokio::fs::File::open(&self.path).await?;
            file.seek(SeekFrom::Start(start)).await?;
            Ok(Box::new(file.take(len)) as RangeReader)
        })
    }
}

/// Bytes already in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl PartSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn open_range(&self, start: u64, len: u64) -> BoxFuture<'_, io::Result<RangeReader>> {
        let total = self.data.len() as u64;
        let result = if start > total {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range starts at {start}, source has {total} bytes"),
            ))
        } else {
            let end = start.saturating_add(len).min(total);
            let slice = self.data.slice(start as usize..end as usize);
            Ok(Box::new(Cursor::new(slice)) as RangeReader)
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn read_all(mut reader: RangeReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn memory_ranges() {
        let source = MemorySource::new(&b"0123456789"[..]);
        assert_eq!(source.len(), 10);
        assert_eq!(
            read_all(source.open_range(3, 4).await.unwrap()).await,
            b"3456"
        );
        // Ranges past the end are truncated, not padded.
        assert_eq!(
            read_all(source.open_range(8, 10).await.unwrap()).await,
            b"89"
        );
        assert!(source.open_range(11, 1).await.is_err());
    }

    #[tokio::test]
    async fn file_ranges() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abcdefghij").unwrap();
        let source = FileSource::open(file.path()).await.unwrap();
        assert_eq!(source.len(), 10);
        assert_eq!(
            read_all(source.open_range(5, 3).await.unwrap()).await,
            b"fgh"
        );
        assert_eq!(read_all(source.open_range(0, 0).await.unwrap()).await, b"");
    }
}
