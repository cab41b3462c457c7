#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};

    use tempfile::TempDir;

    use crate::table::tests::helpers::{build_table, cache, open_table, sequential_tuples};
    use crate::table::{DiskTable, FOOTER_SIZE, TABLE_MAGIC, TableBuilder, TableError};
    use crate::tuple::Tuple;

    #[test]
    fn test_build_and_open_small_table() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(10);
        let table = open_table(&dir, 1, &tuples, 64 * 1024, 64 * 1024);

        assert_eq!(table.generation(), 1);
        assert_eq!(table.tuple_count(), 10);
        assert_eq!(table.max_snapshot(), 10);
    }

    #[test]
    fn test_tmp_file_is_gone_after_finish() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(4);
        let path = build_table(&dir, 7, &tuples, 64 * 1024, 64 * 1024);

        assert!(path.exists());
        assert!(!dir.path().join("7.table.tmp").exists());
    }

    #[test]
    fn test_footer_magic_is_last_four_bytes() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(4);
        let path = build_table(&dir, 1, &tuples, 64 * 1024, 64 * 1024);

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.len() > FOOTER_SIZE);
        let magic = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
        assert_eq!(magic, TABLE_MAGIC);
    }

    #[test]
    fn test_empty_build_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1.table");
        let builder = TableBuilder::new(&path, 0, 1024, 1024, 0.01).unwrap();
        assert!(matches!(builder.finish(), Err(TableError::Internal(_))));
    }

    #[test]
    fn test_out_of_order_input_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1.table");
        let mut builder = TableBuilder::new(&path, 2, 1024, 1024, 0.01).unwrap();
        builder.add(&Tuple::put(b"b", b"1", 1)).unwrap();
        assert!(builder.add(&Tuple::put(b"a", b"2", 2)).is_err());
        builder.abort();
    }

    #[test]
    fn test_multi_block_table_grows_index_levels() {
        // Tiny blocks force many record blocks and several index
        // levels; every tuple must stay reachable.
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(200);
        let table = open_table(&dir, 1, &tuples, 128, 128);

        assert_eq!(table.tuple_count(), 200);
        for tuple in &tuples {
            let found = table
                .get(tuple.key.bytes(), tuple.key.snapshot_id())
                .unwrap()
                .unwrap();
            assert_eq!(&found, tuple);
        }
    }

    #[test]
    fn test_open_rejects_truncated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1.table");
        std::fs::write(&path, b"short").unwrap();
        let result = DiskTable::open(&path, cache());
        assert!(matches!(result, Err(TableError::Corrupt(_))));
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(4);
        let path = build_table(&dir, 1, &tuples, 64 * 1024, 64 * 1024);

        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        let size = file.metadata().unwrap().len();
        file.seek(SeekFrom::Start(size - 4)).unwrap();
        file.write_all(&0xBADC0FFEu32.to_le_bytes()).unwrap();
        file.sync_all().unwrap();
        drop(file);

        let result = DiskTable::open(&path, cache());
        assert!(matches!(result, Err(TableError::Corrupt(_))));
    }

    #[test]
    fn test_open_detects_flipped_block_byte() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(50);
        let path = build_table(&dir, 1, &tuples, 256, 64 * 1024);

        // Flip a byte inside the first record block; the block's CRC
        // catches it at read time.
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(16)).unwrap();
        file.write_all(&[0xFF]).unwrap();
        file.sync_all().unwrap();
        drop(file);

        let table = DiskTable::open(&path, cache()).unwrap();
        let first = &tuples[0];
        let result = table.get(first.key.bytes(), first.key.snapshot_id());
        assert!(matches!(result, Err(TableError::Corrupt(_))));
    }

    #[test]
    fn test_bad_file_name_is_refused() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(4);
        let path = build_table(&dir, 1, &tuples, 64 * 1024, 64 * 1024);
        let renamed = dir.path().join("not-a-generation.table");
        std::fs::rename(&path, &renamed).unwrap();
        assert!(DiskTable::open(&renamed, cache()).is_err());
    }

    #[test]
    fn test_obsolete_table_unlinks_on_drop() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(4);
        let table = open_table(&dir, 9, &tuples, 64 * 1024, 64 * 1024);
        let path = table.path().to_path_buf();

        table.mark_obsolete();
        assert!(path.exists());
        drop(table);
        assert!(!path.exists());
    }
}
