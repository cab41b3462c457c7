#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};

    use tempfile::TempDir;

    use crate::db::tests::helpers::{memory_only_config, small_memtable_config, wait_until};
    use crate::db::Database;

    #[test]
    fn test_unflushed_writes_survive_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let db = Database::open(dir.path(), memory_only_config()).unwrap();
            for index in 0..1000u32 {
                let key = format!("key-{index:04}");
                let value = format!("value-{index:04}");
                db.put_with_fsync(key.as_bytes(), value.as_bytes(), true)
                    .unwrap();
            }
            // No flush happened: everything lives in the log.
            assert_eq!(db.disk_table_count(), 0);
            // Dropped without close, standing in for a crash.
        }

        let db = Database::open(dir.path(), memory_only_config()).unwrap();
        for index in 0..1000u32 {
            let key = format!("key-{index:04}");
            let value = format!("value-{index:04}");
            let record = db.get(key.as_bytes()).unwrap().unwrap();
            assert_eq!(record.value, value.as_bytes());
        }
    }

    #[test]
    fn test_snapshot_counter_restarts_above_history() {
        let dir = TempDir::new().unwrap();
        let last = {
            let db = Database::open(dir.path(), memory_only_config()).unwrap();
            db.put(b"a", b"1").unwrap();
            db.put(b"a", b"2").unwrap()
        };

        let db = Database::open(dir.path(), memory_only_config()).unwrap();
        let next = db.put(b"a", b"3").unwrap();
        assert!(
            next > last,
            "snapshot {next} did not advance past recovered {last}"
        );
        assert_eq!(db.get(b"a").unwrap().unwrap().value, b"3");
    }

    #[test]
    fn test_snapshot_counter_restarts_above_flushed_history() {
        let dir = TempDir::new().unwrap();
        let last = {
            let db = Database::open(dir.path(), small_memtable_config()).unwrap();
            let mut last = 0;
            for index in 0..200u32 {
                let key = format!("key-{index:04}");
                last = db.put(key.as_bytes(), &[b'v'; 32]).unwrap();
            }
            assert!(wait_until(|| db.disk_table_count() >= 1));
            db.close().unwrap();
            last
        };

        let db = Database::open(dir.path(), small_memtable_config()).unwrap();
        let next = db.put(b"zzz", b"new").unwrap();
        assert!(next > last);
    }

    #[test]
    fn test_torn_log_tail_recovers_prefix() {
        let dir = TempDir::new().unwrap();
        {
            let db = Database::open(dir.path(), memory_only_config()).unwrap();
            for index in 0..50u32 {
                let key = format!("key-{index:02}");
                db.put_with_fsync(key.as_bytes(), b"value", true).unwrap();
            }
        }

        // Tear the live log's tail, as a crash mid-append would.
        let log_path = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.extension().is_some_and(|e| e == "write"))
            .unwrap();
        let size = std::fs::metadata(&log_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&log_path).unwrap();
        file.set_len(size - 7).unwrap();
        drop(file);

        let db = Database::open(dir.path(), memory_only_config()).unwrap();
        // The torn record (the last one) is gone; everything before it
        // survived.
        assert!(db.get(b"key-48").unwrap().is_some());
        assert!(db.get(b"key-49").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_table_is_quarantined() {
        let dir = TempDir::new().unwrap();
        {
            let db = Database::open(dir.path(), small_memtable_config()).unwrap();
            for index in 0..200u32 {
                let key = format!("key-{index:04}");
                db.put(key.as_bytes(), &[b'v'; 32]).unwrap();
            }
            assert!(wait_until(|| db.disk_table_count() >= 1));
            db.close().unwrap();
        }

        // Smash the footer magic of one committed table.
        let table_path = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.extension().is_some_and(|e| e == "table"))
            .unwrap();
        let size = std::fs::metadata(&table_path).unwrap().len();
        let mut file = OpenOptions::new().write(true).open(&table_path).unwrap();
        file.seek(SeekFrom::Start(size - 4)).unwrap();
        file.write_all(&[0, 0, 0, 0]).unwrap();
        file.sync_all().unwrap();
        drop(file);

        // The database still opens; the bad file is renamed aside.
        let db = Database::open(dir.path(), small_memtable_config()).unwrap();
        drop(db);

        let broken = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .any(|p| p.extension().is_some_and(|e| e == "broken"));
        assert!(broken, "corrupt table was not quarantined");
        assert!(!table_path.exists());
    }

    #[test]
    fn test_abandoned_tmp_build_is_discarded() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("5.table.tmp"), b"partial build").unwrap();

        let db = Database::open(dir.path(), memory_only_config()).unwrap();
        drop(db);
        assert!(!dir.path().join("5.table.tmp").exists());
    }

    #[test]
    fn test_recovered_memtable_flushes_eventually() {
        let dir = TempDir::new().unwrap();
        {
            let db = Database::open(dir.path(), memory_only_config()).unwrap();
            db.put_with_fsync(b"durable", b"yes", true).unwrap();
        }

        // Reopen schedules the recovered memtable for flush; once it
        // lands the log is gone and the data is on disk.
        let db = Database::open(dir.path(), memory_only_config()).unwrap();
        assert!(wait_until(|| db.disk_table_count() == 1));
        assert_eq!(db.get(b"durable").unwrap().unwrap().value, b"yes");
        db.close().unwrap();

        let leftover_logs = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|e| e == "write"))
            .count();
        // Only the (empty) writable generation's log may remain.
        assert!(leftover_logs <= 1);
    }
}
