use std::fs::{File as StdFile, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use uuid::Uuid;

use crate::common::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    READ,
    WRITE,
}

/// Byte-addressed block storage underneath a heap file.
pub trait File: Send {
    fn get_mode(&self) -> FileMode;

    fn size(&self) -> Result<usize>;

    /// Grows with zeroes or truncates.
    fn resize(&mut self, new_size: usize) -> Result<()>;

    fn read_block(&mut self, offset: usize, size: usize) -> Result<Vec<u8>>;

    /// Writes `block` at `offset`, growing the file when it ends past the
    /// current size.
    fn write_block(&mut self, block: &[u8], offset: usize) -> Result<()>;

    /// Make every completed write durable.
    fn sync(&mut self) -> Result<()>;

    fn ensure_writable(&self) -> Result<()> {
        match self.get_mode() {
            FileMode::WRITE => Ok(()),
            FileMode::READ => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file was opened read-only",
            )
            .into()),
        }
    }
}

fn check_range(offset: usize, size: usize, file_size: usize) -> Result<()> {
    if offset.checked_add(size).map_or(true, |end| end > file_size) {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "block of {} bytes at {} lies past the end of a {} byte file",
                size, offset, file_size
            ),
        )
        .into());
    }
    Ok(())
}

/// A file on disk. The size is tracked in memory so bounds checks do not
/// need a metadata call.
pub struct PosixFile {
    mode: FileMode,
    file: StdFile,
    len: usize,
}

impl PosixFile {
    pub fn new(path: &Path, mode: FileMode) -> Result<Self> {
        let writable = mode == FileMode::WRITE;
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .create(writable)
            .open(path)?;
        let len = file.metadata()?.len() as usize;

        Ok(Self { mode, file, len })
    }

    /// A scratch file that disappears once dropped.
    pub fn make_temporary() -> Result<Self> {
        let path = std::env::temp_dir().join(format!("txn-kernel-{}.tmp", Uuid::new_v4()));
        let file = Self::new(&path, FileMode::WRITE)?;

        // The open handle keeps the data reachable after the unlink
        std::fs::remove_file(&path)?;
        Ok(file)
    }

    fn seek(&mut self, offset: usize) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset as u64))?;
        Ok(())
    }
}

impl File for PosixFile {
    fn get_mode(&self) -> FileMode {
        self.mode
    }

    fn size(&self) -> Result<usize> {
        Ok(self.len)
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        if new_size != self.len {
            self.ensure_writable()?;
            self.file.set_len(new_size as u64)?;
            self.len = new_size;
        }
        Ok(())
    }

    fn read_block(&mut self, offset: usize, size: usize) -> Result<Vec<u8>> {
        check_range(offset, size, self.len)?;

        let mut block = vec![0u8; size];
        self.seek(offset)?;
        self.file.read_exact(&mut block)?;
        Ok(block)
    }

    fn write_block(&mut self, block: &[u8], offset: usize) -> Result<()> {
        self.ensure_writable()?;
        self.seek(offset)?;
        self.file.write_all(block)?;
        self.len = self.len.max(offset + block.len());
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

// In-memory file for tables that need no durability
pub struct MemoryFile {
    mode: FileMode,
    data: Vec<u8>,
}

impl MemoryFile {
    pub fn new(mode: FileMode) -> Self {
        Self::with_data(Vec::new(), mode)
    }

    pub fn with_data(data: Vec<u8>, mode: FileMode) -> Self {
        Self { mode, data }
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data
    }
}

impl File for MemoryFile {
    fn get_mode(&self) -> FileMode {
        self.mode
    }

    fn size(&self) -> Result<usize> {
        Ok(self.data.len())
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        self.ensure_writable()?;
        self.data.resize(new_size, 0);
        Ok(())
    }

    fn read_block(&mut self, offset: usize, size: usize) -> Result<Vec<u8>> {
        check_range(offset, size, self.data.len())?;
        Ok(self.data[offset..offset + size].to_vec())
    }

    fn write_block(&mut self, block: &[u8], offset: usize) -> Result<()> {
        self.ensure_writable()?;
        let end = offset + block.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(block);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
