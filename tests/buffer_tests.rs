mod common;

use std::thread;
use std::time::Duration;

use common::{faulty_pool_fixture, pool_fixture, row};
use txn_kernel::{
    common::{KernelError, PageID, Result, TransactionID},
    log_mod::LogRecordType,
    storage::{DbFile, Tuple},
    transaction::LockMode,
};

fn begin(fixture: &common::PoolFixture, txn: TransactionID) -> Result<()> {
    fixture.log_manager.lock().log_txn_begin(txn)?;
    Ok(())
}

#[test]
fn test_evicts_least_recently_used_page() -> Result<()> {
    let fixture = pool_fixture(2, 3)?;
    let txn = TransactionID(1);
    let (p0, p1, p2) = (PageID::new(0, 0), PageID::new(0, 1), PageID::new(0, 2));

    fixture.pool.get_page(txn, p0, LockMode::Shared)?;
    fixture.pool.get_page(txn, p1, LockMode::Shared)?;
    // Touch p0 again so p1 becomes the oldest
    fixture.pool.get_page(txn, p0, LockMode::Shared)?;
    fixture.pool.get_page(txn, p2, LockMode::Shared)?;

    assert!(fixture.pool.is_cached(p0));
    assert!(!fixture.pool.is_cached(p1));
    assert!(fixture.pool.is_cached(p2));
    assert_eq!(fixture.pool.num_cached(), 2);
    Ok(())
}

#[test]
fn test_all_dirty_pages_exhaust_the_pool() -> Result<()> {
    let fixture = pool_fixture(2, 3)?;
    let txn = TransactionID(1);
    begin(&fixture, txn)?;

    for page_no in 0..2 {
        let page = fixture
            .pool
            .get_page(txn, PageID::new(0, page_no), LockMode::Exclusive)?;
        let mut page = page.write();
        page.insert_tuple(&row(page_no))?;
        page.mark_dirty(Some(txn));
    }

    let result = fixture.pool.get_page(txn, PageID::new(0, 2), LockMode::Shared);
    assert!(matches!(result, Err(KernelError::ResourceExhausted(2))));

    // Nothing was written behind the log's back
    assert_eq!(fixture.table.read_page(PageID::new(0, 0))?.num_empty_slots(), 7);
    Ok(())
}

#[test]
fn test_flush_logs_before_writing() -> Result<()> {
    let fixture = pool_fixture(2, 3)?;
    let txn = TransactionID(1);
    let p0 = PageID::new(0, 0);
    begin(&fixture, txn)?;

    {
        let page = fixture.pool.get_page(txn, p0, LockMode::Exclusive)?;
        let mut page = page.write();
        page.insert_tuple(&row(42))?;
        page.mark_dirty(Some(txn));
    }
    fixture.pool.flush_page(p0)?;

    let log = fixture.log_manager.lock();
    assert_eq!(log.get_total_log_records_of_type(LogRecordType::UpdateRecord), 1);
    drop(log);

    let stored = fixture.table.read_page(p0)?;
    assert_eq!(stored.tuple(0)?, row(42).as_slice());

    // Clean again, so it can be evicted
    fixture.pool.get_page(txn, PageID::new(0, 1), LockMode::Shared)?;
    fixture.pool.get_page(txn, PageID::new(0, 2), LockMode::Shared)?;
    assert!(!fixture.pool.is_cached(p0));
    Ok(())
}

#[test]
fn test_commit_writes_pages_and_releases_locks() -> Result<()> {
    let fixture = pool_fixture(4, 1)?;
    let txn = TransactionID(7);
    begin(&fixture, txn)?;

    let mut tuple = Tuple::new(row(1));
    fixture.pool.insert_tuple(txn, 0, &mut tuple)?;
    let record_id = tuple.record_id.expect("record id assigned");
    assert!(fixture.pool.holds_lock(txn, record_id.page_id));

    fixture.pool.transaction_complete(txn, true)?;

    let log = fixture.log_manager.lock();
    assert_eq!(log.get_total_log_records_of_type(LogRecordType::BeginRecord), 1);
    assert_eq!(log.get_total_log_records_of_type(LogRecordType::UpdateRecord), 1);
    assert_eq!(log.get_total_log_records_of_type(LogRecordType::CommitRecord), 1);
    assert!(!log.is_active(txn));
    drop(log);

    let stored = fixture.table.read_page(record_id.page_id)?;
    assert_eq!(stored.tuple(record_id.slot_id)?, row(1).as_slice());
    assert_eq!(fixture.lock_manager.num_locks(), 0);
    Ok(())
}

#[test]
fn test_abort_discards_unflushed_changes() -> Result<()> {
    let fixture = pool_fixture(4, 1)?;
    let txn = TransactionID(1);
    let p0 = PageID::new(0, 0);
    begin(&fixture, txn)?;

    fixture.pool.insert_tuple(txn, 0, &mut Tuple::new(row(9)))?;
    assert!(fixture.pool.is_cached(p0));

    fixture.pool.transaction_complete(txn, false)?;

    assert!(!fixture.pool.is_cached(p0));
    assert_eq!(fixture.table.read_page(p0)?.num_empty_slots(), 7);

    let log = fixture.log_manager.lock();
    assert_eq!(log.get_total_log_records_of_type(LogRecordType::ClrRecord), 0);
    assert_eq!(log.get_total_log_records_of_type(LogRecordType::AbortRecord), 1);
    Ok(())
}

#[test]
fn test_abort_restores_flushed_pages_from_log() -> Result<()> {
    let fixture = pool_fixture(4, 1)?;
    let txn = TransactionID(1);
    let p0 = PageID::new(0, 0);
    begin(&fixture, txn)?;

    fixture.pool.insert_tuple(txn, 0, &mut Tuple::new(row(9)))?;
    fixture.pool.flush_pages(txn)?;
    assert_eq!(fixture.table.read_page(p0)?.num_empty_slots(), 6);

    fixture.pool.transaction_complete(txn, false)?;

    assert_eq!(fixture.table.read_page(p0)?.num_empty_slots(), 7);
    let log = fixture.log_manager.lock();
    assert_eq!(log.get_total_log_records_of_type(LogRecordType::ClrRecord), 1);
    assert_eq!(log.get_total_log_records_of_type(LogRecordType::AbortRecord), 1);
    drop(log);

    assert_eq!(fixture.lock_manager.num_locks(), 0);
    Ok(())
}

#[test]
fn test_insert_spills_into_new_page() -> Result<()> {
    let fixture = pool_fixture(4, 1)?;
    let txn = TransactionID(1);
    begin(&fixture, txn)?;

    // Seven slots per page with these sizes
    for n in 0..8 {
        fixture.pool.insert_tuple(txn, 0, &mut Tuple::new(row(n)))?;
    }
    fixture.pool.transaction_complete(txn, true)?;

    assert_eq!(fixture.table.num_pages()?, 2);
    assert_eq!(fixture.table.read_page(PageID::new(0, 1))?.num_empty_slots(), 6);
    Ok(())
}

#[test]
fn test_checkpoint_waits_for_commit_page_writes() -> Result<()> {
    let (fixture, file) = faulty_pool_fixture(4, 1)?;
    let txn = TransactionID(1);
    let p0 = PageID::new(0, 0);
    begin(&fixture, txn)?;
    fixture.pool.insert_tuple(txn, 0, &mut Tuple::new(row(77)))?;

    let gate = file.hold_writes();
    thread::scope(|s| -> Result<()> {
        let committer = s.spawn(|| fixture.pool.transaction_complete(txn, true));
        while file.writes_started() == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        // Commit is now past its Commit record and stuck writing the page
        let checkpointer = s.spawn(|| -> Result<bool> {
            fixture.log_manager.lock().log_checkpoint()?;
            Ok(fixture.table.read_page(p0)?.num_empty_slots() == 6)
        });
        thread::sleep(Duration::from_millis(100));
        assert!(!checkpointer.is_finished());

        drop(gate);
        committer.join().expect("commit panicked")?;
        // The committed page was stored before the checkpoint was recorded
        assert!(checkpointer.join().expect("checkpoint panicked")?);
        Ok(())
    })?;

    let log = fixture.log_manager.lock();
    let commit = log
        .records()?
        .into_iter()
        .find(|(_, record)| record.record_type() == LogRecordType::CommitRecord)
        .map(|(offset, _)| offset);
    assert!(matches!(
        (commit, log.last_checkpoint()),
        (Some(commit), Some(checkpoint)) if commit < checkpoint
    ));
    Ok(())
}

#[test]
fn test_failed_commit_write_is_retried_by_checkpoint() -> Result<()> {
    let (fixture, file) = faulty_pool_fixture(4, 1)?;
    let txn = TransactionID(1);
    let p0 = PageID::new(0, 0);
    begin(&fixture, txn)?;
    fixture.pool.insert_tuple(txn, 0, &mut Tuple::new(row(5)))?;

    file.fail_writes(true);
    // The Commit record is durable, so the commit stands
    fixture.pool.transaction_complete(txn, true)?;
    assert!(!fixture.log_manager.lock().is_active(txn));
    assert_eq!(fixture.lock_manager.num_locks(), 0);
    assert_eq!(fixture.table.read_page(p0)?.num_empty_slots(), 7);

    assert!(fixture.pool.checkpoint().is_err());
    assert_eq!(
        fixture
            .log_manager
            .lock()
            .get_total_log_records_of_type(LogRecordType::CheckpointRecord),
        0
    );

    file.fail_writes(false);
    fixture.pool.checkpoint()?;
    assert_eq!(fixture.table.read_page(p0)?.tuple(0)?, row(5).as_slice());

    let log = fixture.log_manager.lock();
    // The retry writes the page without logging it again
    assert_eq!(log.get_total_log_records_of_type(LogRecordType::UpdateRecord), 1);
    assert_eq!(log.get_total_log_records_of_type(LogRecordType::CheckpointRecord), 1);
    drop(log);

    // Clean again, so a later transaction can use the page normally
    let next = TransactionID(2);
    begin(&fixture, next)?;
    fixture.pool.insert_tuple(next, 0, &mut Tuple::new(row(6)))?;
    fixture.pool.transaction_complete(next, true)?;
    assert_eq!(fixture.table.read_page(p0)?.num_empty_slots(), 5);
    Ok(())
}
