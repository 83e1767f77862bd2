use tempfile::TempDir;
use txn_kernel::common::Result;
use txn_kernel::storage::{File, FileMode, MemoryFile, PosixFile};

#[test]
fn test_file_resize() -> Result<()> {
    let mut file = MemoryFile::new(FileMode::WRITE);

    // Initial size should be zero
    assert_eq!(file.size()?, 0);

    file.resize(100)?;
    assert_eq!(file.size()?, 100);

    // Write something and read it back
    let test_data = b"test data";
    file.write_block(test_data, 50)?;
    assert_eq!(file.read_block(50, test_data.len())?, test_data);
    Ok(())
}

#[test]
fn test_write_past_end_grows_file() -> Result<()> {
    let mut file = MemoryFile::new(FileMode::WRITE);
    file.write_block(&[7; 4], 10)?;

    assert_eq!(file.size()?, 14);
    assert_eq!(&file.get_data()[..10], &[0; 10]);
    assert!(file.read_block(12, 4).is_err());
    Ok(())
}

#[test]
fn test_read_only_file_rejects_writes() {
    let mut file = MemoryFile::with_data(vec![1, 2, 3], FileMode::READ);

    assert_eq!(file.get_mode(), FileMode::READ);
    assert!(file.write_block(&[9], 0).is_err());
    assert!(file.resize(10).is_err());
    assert_eq!(file.get_data(), &[1, 2, 3]);
}

#[test]
fn test_posix_file_persists_blocks() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("blocks.dat");
    {
        let mut file = PosixFile::new(&path, FileMode::WRITE)?;
        file.write_block(b"durable", 8)?;
        file.sync()?;
    }

    let mut file = PosixFile::new(&path, FileMode::READ)?;
    assert_eq!(file.size()?, 15);
    assert_eq!(file.read_block(8, 7)?, b"durable");
    Ok(())
}

#[test]
fn test_temporary_file_starts_empty() -> Result<()> {
    let mut file = PosixFile::make_temporary()?;
    assert_eq!(file.size()?, 0);

    file.write_block(&[1, 2, 3, 4], 0)?;
    assert_eq!(file.read_block(0, 4)?, vec![1, 2, 3, 4]);
    Ok(())
}
