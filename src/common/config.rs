use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub page_size: usize,
    pub buffer_pool_size: usize,
    /// How long a lock request may wait before its transaction is aborted.
    pub lock_timeout: Duration,
    /// Fail a lock request immediately when waiting would close a cycle.
    pub detect_deadlocks: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            buffer_pool_size: 50,
            lock_timeout: Duration::from_secs(3),
            detect_deadlocks: true,
        }
    }
}
