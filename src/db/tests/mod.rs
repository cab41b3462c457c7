mod tests_flush;
mod tests_recovery;

#[cfg(test)]
pub(crate) mod helpers {
    use tracing_subscriber::EnvFilter;

    use crate::compact::CompactionStrategyType;
    use crate::db::Config;

    /// Installs the test tracing subscriber once; controlled by
    /// `RUST_LOG`.
    pub(crate) fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Large memtable: nothing flushes unless the test forces it.
    pub(crate) fn memory_only_config() -> Config {
        init_tracing();
        Config {
            memtable_max_bytes: 8 * 1024 * 1024,
            compaction_strategy: CompactionStrategyType::None,
            ..Config::default()
        }
    }

    /// Small memtable: rotation and flush trigger after a few KiB.
    pub(crate) fn small_memtable_config() -> Config {
        init_tracing();
        Config {
            memtable_max_bytes: 4 * 1024,
            record_block_size: 1024,
            index_block_size: 512,
            compaction_strategy: CompactionStrategyType::None,
            ..Config::default()
        }
    }

    /// Small memtable with full-merge compaction available on demand.
    pub(crate) fn compacting_config() -> Config {
        init_tracing();
        Config {
            memtable_max_bytes: 4 * 1024,
            record_block_size: 1024,
            index_block_size: 512,
            compaction_strategy: CompactionStrategyType::FullOnSchedule,
            ..Config::default()
        }
    }

    /// Spin until `predicate` holds or the deadline passes.
    pub(crate) fn wait_until(predicate: impl Fn() -> bool) -> bool {
        for _ in 0..500 {
            if predicate() {
                return true;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        predicate()
    }
}
