#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::table::tests::helpers::{open_table, sequential_tuples};
    use crate::tuple::Tuple;

    #[test]
    fn test_get_every_key_single_block() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(16);
        let table = open_table(&dir, 1, &tuples, 64 * 1024, 64 * 1024);

        for tuple in &tuples {
            let found = table
                .get(tuple.key.bytes(), tuple.key.snapshot_id())
                .unwrap()
                .unwrap();
            assert_eq!(&found, tuple);
        }
    }

    #[test]
    fn test_get_absent_key_returns_none() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(16);
        let table = open_table(&dir, 1, &tuples, 64 * 1024, 64 * 1024);

        assert!(table.get(b"missing", 100).unwrap().is_none());
        // Sorts before every stored key.
        assert!(table.get(b"aaa", 100).unwrap().is_none());
        // Sorts after every stored key: the past-end index policy must
        // still reject at the record block.
        assert!(table.get(b"zzz", 100).unwrap().is_none());
    }

    #[test]
    fn test_get_respects_snapshot_visibility() {
        let dir = TempDir::new().unwrap();
        let tuples = vec![
            Tuple::put(b"k", b"v9", 9),
            Tuple::put(b"k", b"v5", 5),
            Tuple::put(b"k", b"v2", 2),
        ];
        let table = open_table(&dir, 1, &tuples, 64 * 1024, 64 * 1024);

        let at = |snapshot: u64| {
            table
                .get(b"k", snapshot)
                .unwrap()
                .map(|t| t.value.bytes().to_vec())
        };
        assert_eq!(at(20), Some(b"v9".to_vec()));
        assert_eq!(at(9), Some(b"v9".to_vec()));
        assert_eq!(at(8), Some(b"v5".to_vec()));
        assert_eq!(at(3), Some(b"v2".to_vec()));
        assert_eq!(at(1), None);
    }

    #[test]
    fn test_get_tombstone_is_surfaced() {
        let dir = TempDir::new().unwrap();
        let tuples = vec![Tuple::delete(b"k", 5), Tuple::put(b"k", b"old", 2)];
        let table = open_table(&dir, 1, &tuples, 64 * 1024, 64 * 1024);

        assert!(table.get(b"k", 9).unwrap().unwrap().value.is_tombstone());
        assert_eq!(table.get(b"k", 2).unwrap().unwrap().value.bytes(), b"old");
    }

    #[test]
    fn test_get_across_many_blocks() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(300);
        let table = open_table(&dir, 1, &tuples, 256, 192);

        // Probe keys spread across the whole key space, absent keys
        // interleaved.
        for index in (0..300).step_by(7) {
            let key = format!("key-{index:04}");
            let found = table.get(key.as_bytes(), 1000).unwrap().unwrap();
            assert_eq!(found.key.bytes(), key.as_bytes());

            let absent = format!("key-{index:04}x");
            assert!(table.get(absent.as_bytes(), 1000).unwrap().is_none());
        }
    }

    #[test]
    fn test_filter_excludes_foreign_keys() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(64);
        let table = open_table(&dir, 1, &tuples, 64 * 1024, 64 * 1024);

        let excluded = (0..1000)
            .filter(|index| !table.may_contain(format!("foreign-{index}").as_bytes()))
            .count();
        assert!(excluded > 900, "filter excluded only {excluded} of 1000");
    }
}
