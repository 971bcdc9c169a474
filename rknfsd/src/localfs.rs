//! Local file operations under the server root.

use std::fs::Metadata;
use std::io::{self, SeekFrom};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use common::{FileAttr, FileType};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Writes `data` at `offset` and fsyncs before returning.
pub async fn write_synced(path: &Path, offset: u64, data: &[u8]) -> io::Result<usize> {
    let mut file = OpenOptions::new().write(true).open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(data.len())
}

/// Reads up to `count` bytes from `offset`; short at end of file.
pub async fn read_at(path: &Path, offset: u64, count: u32) -> io::Result<Vec<u8>> {
    let mut file = fs::File::open(path).await?;
    let available = file.metadata().await?.len().saturating_sub(offset);
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = Vec::with_capacity(available.min(count as u64) as usize);
    file.take(count as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}

pub async fn truncate(path: &Path, size: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path).await?;
    file.set_len(size).await?;
    file.sync_all().await
}

/// Creates an empty file; an existing file is left untouched.
pub async fn create_file(path: &Path, mode: u32) -> io::Result<()> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

pub async fn create_dir(path: &Path, mode: u32) -> io::Result<()> {
    fs::DirBuilder::new().mode(mode).create(path).await
}

pub fn attr_from_metadata(meta: &Metadata) -> FileAttr {
    let file_type = if meta.is_dir() {
        FileType::Directory
    } else if meta.is_file() {
        FileType::Regular
    } else {
        FileType::Other
    };
    FileAttr {
        file_type,
        mode: meta.permissions().mode() & 0o7777,
        size: meta.size(),
        fileid: meta.ino(),
        atime: meta.atime(),
        mtime: meta.mtime(),
        ctime: meta.ctime(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read_at_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        create_file(&path, 0o644).await.unwrap();

        assert_eq!(write_synced(&path, 3, b"abc").await.unwrap(), 3);
        assert_eq!(read_at(&path, 0, 16).await.unwrap(), b"\0\0\0abc");
        assert_eq!(read_at(&path, 4, 1).await.unwrap(), b"b");
        assert!(read_at(&path, 100, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_huge_count_reads_what_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"small").unwrap();
        assert_eq!(read_at(&path, 1, u32::MAX).await.unwrap(), b"mall");
    }

    #[tokio::test]
    async fn test_create_file_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"keep").unwrap();
        create_file(&path, 0o644).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"keep");

        truncate(&path, 2).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"ke");
    }

    #[tokio::test]
    async fn test_write_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_synced(&dir.path().join("missing"), 0, b"x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
