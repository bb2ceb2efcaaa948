//! Seekable scratch copies of downloaded packages.
//!
//! Download streams can only be read once, front to back. Indexing needs to
//! open the archive's central directory and read entries in any order, so a
//! download is first copied into an anonymous temporary file. The file has
//! no name on disk and disappears when the handle is dropped.

use std::io::SeekFrom;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt};

/// An exclusively owned, rewound temporary copy of a package.
#[derive(Debug)]
pub struct TempPackageFile {
    file: File,
    len: u64,
}

impl TempPackageFile {
    /// Drain `source` into a fresh temporary file and rewind it.
    pub async fn materialize<R>(source: &mut R) -> std::io::Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let std_file = tokio::task::spawn_blocking(tempfile::tempfile)
            .await
            .map_err(std::io::Error::other)??;
        let mut file = File::from_std(std_file);

        let len = tokio::io::copy(source, &mut file).await?;
        file.flush().await?;
        file.seek(SeekFrom::Start(0)).await?;

        Ok(TempPackageFile { file, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// An independent synchronous handle for blocking readers, positioned at
    /// the start. Shares the underlying file, so it stays valid only while
    /// the caller also keeps `self` alive.
    pub async fn blocking_reader(&self) -> std::io::Result<std::fs::File> {
        let mut clone = self.file.try_clone().await?;
        clone.seek(SeekFrom::Start(0)).await?;
        Ok(clone.into_std().await)
    }

    /// A second async handle, rewound, for copying the content elsewhere.
    pub async fn rewound(&self) -> std::io::Result<File> {
        let mut clone = self.file.try_clone().await?;
        clone.seek(SeekFrom::Start(0)).await?;
        Ok(clone)
    }
}
