//! Module `remote_fs`
//!
//! The abstract Remote FS capability (spec §4.7). The real HDFS client
//! binding is explicitly out of scope for this engine; this module
//! defines the trait boundary it would plug into, plus one concrete
//! adapter (`LocalFsRemote`, rooted at a configured directory) so the
//! rest of the engine is fully exercised without linking `libhdfs`.
//!
//! Trait shape grounded in `other_examples`'s `bolcom-libunftp`
//! `StorageBackend`/`Metadata` traits, adapted from async to the
//! blocking I/O model the teacher's thread-per-connection engine uses.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::FilesystemError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Metadata for one remote entry (spec §4.7's `FileInfo`).
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub mtime: SystemTime,
    pub owner_id: u32,
    pub group_id: u32,
    pub perms: u32,
    pub link_count: u64,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

pub enum OpenMode {
    Read,
    Write,
    Append,
}

/// A handle to an open remote file. Mirrors the subset of `hdfsFile`
/// operations the engine needs: sequential read/write plus seek for `REST`.
pub trait RemoteFile: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    fn seek(&mut self, offset: u64) -> io::Result<()>;
}

/// The abstract capability every command that touches remote storage calls
/// through. `open`/`list`/`stat` etc. take already-resolved *remote* paths
/// (post `path::build_remote`) — the trait itself does no sandboxing.
pub trait RemoteFs: Send + Sync {
    fn connect(&self) -> Result<(), FilesystemError>;
    fn disconnect(&self);

    fn open(&self, path: &str, mode: OpenMode, buffer_size: usize, replication: u16, block_size: i64) -> Result<Box<dyn RemoteFile>, FilesystemError>;

    fn stat(&self, path: &str) -> Result<FileInfo, FilesystemError>;
    fn list(&self, path: &str) -> Result<Vec<FileInfo>, FilesystemError>;

    fn mkdir(&self, path: &str) -> Result<(), FilesystemError>;
    fn rmdir(&self, path: &str) -> Result<(), FilesystemError>;
    fn delete(&self, path: &str) -> Result<(), FilesystemError>;
    fn rename(&self, from: &str, to: &str) -> Result<(), FilesystemError>;
    fn exists(&self, path: &str) -> bool;

    fn username_for_uid(&self, uid: u32) -> String;
    fn groupname_for_gid(&self, gid: u32) -> String;
}

/// Reference adapter rooted at a local directory, standing in for the real
/// HDFS binding the spec treats as an external collaborator.
pub struct LocalFsRemote {
    root: PathBuf,
}

impl LocalFsRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps an already-sandboxed remote path (always starting with `/`) to a
    /// path under `root`. Callers are expected to have gone through
    /// `path::build_remote` already, so no further `..` handling happens here.
    fn local_path(&self, remote: &str) -> PathBuf {
        let trimmed = remote.trim_start_matches('/');
        if trimmed.is_empty() {
            self.root.clone()
        } else {
            self.root.join(trimmed)
        }
    }

    fn metadata_to_info(name: String, meta: &fs::Metadata) -> FileInfo {
        #[cfg(unix)]
        let (owner_id, group_id, perms, link_count) = {
            use std::os::unix::fs::MetadataExt;
            (meta.uid(), meta.gid(), meta.mode() & 0o777, meta.nlink())
        };
        #[cfg(not(unix))]
        let (owner_id, group_id, perms, link_count) = (0u32, 0u32, if meta.is_dir() { 0o755 } else { 0o644 }, 1u64);

        FileInfo {
            name,
            kind: if meta.is_dir() { EntryKind::Directory } else { EntryKind::File },
            size: meta.len(),
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            owner_id,
            group_id,
            perms,
            link_count,
        }
    }
}

impl RemoteFs for LocalFsRemote {
    fn connect(&self) -> Result<(), FilesystemError> {
        if !self.root.is_dir() {
            return Err(FilesystemError::NotFound(self.root.display().to_string()));
        }
        Ok(())
    }

    fn disconnect(&self) {}

    fn open(&self, path: &str, mode: OpenMode, _buffer_size: usize, _replication: u16, _block_size: i64) -> Result<Box<dyn RemoteFile>, FilesystemError> {
        let local = self.local_path(path);
        let file = match mode {
            OpenMode::Read => fs::OpenOptions::new().read(true).open(&local)?,
            OpenMode::Write => fs::OpenOptions::new().write(true).create(true).truncate(true).open(&local)?,
            OpenMode::Append => fs::OpenOptions::new().write(true).create(true).append(true).open(&local)?,
        };
        Ok(Box::new(LocalFile { file }))
    }

    fn stat(&self, path: &str) -> Result<FileInfo, FilesystemError> {
        let local = self.local_path(path);
        let meta = fs::metadata(&local)?;
        let name = Path::new(path).file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "/".into());
        Ok(Self::metadata_to_info(name, &meta))
    }

    fn list(&self, path: &str) -> Result<Vec<FileInfo>, FilesystemError> {
        let local = self.local_path(path);
        let mut out = Vec::new();
        for entry in fs::read_dir(&local)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            out.push(Self::metadata_to_info(name, &meta));
        }
        Ok(out)
    }

    fn mkdir(&self, path: &str) -> Result<(), FilesystemError> {
        fs::create_dir(self.local_path(path))?;
        Ok(())
    }

    fn rmdir(&self, path: &str) -> Result<(), FilesystemError> {
        fs::remove_dir(self.local_path(path))?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), FilesystemError> {
        fs::remove_file(self.local_path(path))?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), FilesystemError> {
        fs::rename(self.local_path(from), self.local_path(to))?;
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.local_path(path).exists()
    }

    fn username_for_uid(&self, uid: u32) -> String {
        uid.to_string()
    }

    fn groupname_for_gid(&self, gid: u32) -> String {
        gid.to_string()
    }
}

struct LocalFile {
    file: fs::File,
}

impl RemoteFile for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf)
    }

    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_file_through_the_local_adapter() {
        let dir = std::env::temp_dir().join(format!("hdfs-ftpd-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let fs_backend = LocalFsRemote::new(&dir);
        fs_backend.connect().unwrap();

        {
            let mut file = fs_backend.open("/hello.txt", OpenMode::Write, 0, 0, 0).unwrap();
            file.write_all(b"hello").unwrap();
        }
        assert!(fs_backend.exists("/hello.txt"));

        let info = fs_backend.stat("/hello.txt").unwrap();
        assert_eq!(info.size, 5);
        assert!(!info.is_dir());

        let mut file = fs_backend.open("/hello.txt", OpenMode::Read, 0, 0, 0).unwrap();
        let mut buf = [0u8; 5];
        file.read(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        fs_backend.delete("/hello.txt").unwrap();
        assert!(!fs_backend.exists("/hello.txt"));
        fs::remove_dir_all(&dir).ok();
    }
}
