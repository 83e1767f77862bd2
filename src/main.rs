use env_logger::Builder;
use log::{info, LevelFilter};

use txn_kernel::{Database, DatabaseConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Transactional page kernel demo");

    let db_path = std::env::temp_dir().join(format!("txn_kernel_demo_{}", std::process::id()));
    let db = Database::open(&db_path, DatabaseConfig::default())?;
    let table_id = db.create_table("accounts", 16)?;

    // One committed and one aborted transaction
    let committed = db.begin()?;
    db.insert_tuple(committed, table_id, b"alice:0000000100")?;
    db.insert_tuple(committed, table_id, b"bob:000000000050")?;
    db.commit(committed)?;

    let aborted = db.begin()?;
    db.insert_tuple(aborted, table_id, b"mallory:00009999")?;
    db.abort(aborted)?;

    let reader = db.begin()?;
    for tuple in db.scan(reader, table_id)? {
        info!("Row: {}", String::from_utf8_lossy(&tuple.data));
    }
    db.commit(reader)?;

    // Leave a transaction running and reopen, as if the process had crashed
    let loser = db.begin()?;
    db.insert_tuple(loser, table_id, b"eve:000000000001")?;
    db.checkpoint()?;
    drop(db);

    let db = Database::open(&db_path, DatabaseConfig::default())?;
    let rows = db.execute(|txn| db.scan(txn, table_id))?;
    info!("{} row(s) after recovery", rows.len());

    print!("{}", db.log_manager().lock().dump()?);

    db.checkpoint()?;
    db.files().cleanup()?;
    Ok(())
}
