#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::db::tests::helpers::{small_memtable_config, wait_until};
    use crate::db::Database;

    fn table_files(dir: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".table"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_flush_produces_one_table_file() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path(), small_memtable_config()).unwrap();

        // ~100 writes of ~47 bytes crosses the 4 KiB budget once.
        for index in 0..100u32 {
            let key = format!("key_{index:03}");
            db.put(key.as_bytes(), &[b'v'; 32]).unwrap();
        }
        assert!(wait_until(|| db.disk_table_count() == 1));

        assert_eq!(table_files(&dir).len(), 1);

        // Every tuple is still readable, flushed or not.
        for index in 0..100u32 {
            let key = format!("key_{index:03}");
            let record = db.get(key.as_bytes()).unwrap().unwrap();
            assert_eq!(record.value, vec![b'v'; 32]);
        }
    }

    #[test]
    fn test_flush_removes_frozen_log() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path(), small_memtable_config()).unwrap();

        for index in 0..100u32 {
            let key = format!("key_{index:03}");
            db.put(key.as_bytes(), &[b'v'; 32]).unwrap();
        }
        assert!(wait_until(|| db.disk_table_count() == 1));

        // The flushed generation's log is gone; the writable
        // generation's log remains.
        let logs: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".write"))
            .collect();
        assert_eq!(logs.len(), 1);

        let tables = table_files(&dir);
        assert_eq!(tables.len(), 1);
        // Flushed table keeps its memtable's generation; the writable
        // log is the next generation.
        let flushed_generation: u64 = tables[0].strip_suffix(".table").unwrap().parse().unwrap();
        let live_generation: u64 = logs[0].strip_suffix(".write").unwrap().parse().unwrap();
        assert_eq!(live_generation, flushed_generation + 1);
    }

    #[test]
    fn test_reads_stay_consistent_across_flush() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path(), small_memtable_config()).unwrap();

        let mut snapshots = Vec::new();
        for index in 0..150u32 {
            let key = format!("key_{index:03}");
            let value = format!("value_{index:03}");
            snapshots.push((key.clone(), value.clone(), db.put(key.as_bytes(), value.as_bytes()).unwrap()));
        }
        assert!(wait_until(|| db.disk_table_count() >= 1));

        for (key, value, snapshot) in &snapshots {
            let record = db.get_at(key.as_bytes(), *snapshot).unwrap().unwrap();
            assert_eq!(record.value, value.as_bytes());
        }
    }

    #[test]
    fn test_multiple_rotations_make_multiple_tables() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path(), small_memtable_config()).unwrap();

        for index in 0..600u32 {
            let key = format!("key_{index:04}");
            db.put(key.as_bytes(), &[b'v'; 32]).unwrap();
        }
        assert!(wait_until(|| db.disk_table_count() >= 2));
        assert!(table_files(&dir).len() >= 2);
    }
}
