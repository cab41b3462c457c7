#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::table::tests::helpers::{open_table, sequential_tuples};
    use crate::tuple::{Key, Tuple};

    #[test]
    fn test_ascending_round_trip() {
        // Build from sorted input, iterate back: identical sequence.
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(150);
        let table = open_table(&dir, 1, &tuples, 256, 192);

        let scanned: Vec<Tuple> = table.ascending_iter(None).map(|r| r.unwrap()).collect();
        assert_eq!(scanned, tuples);
    }

    #[test]
    fn test_descending_round_trip() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(150);
        let table = open_table(&dir, 1, &tuples, 256, 192);

        let mut expected = tuples.clone();
        expected.reverse();
        let scanned: Vec<Tuple> = table.descending_iter(None).map(|r| r.unwrap()).collect();
        assert_eq!(scanned, expected);
    }

    #[test]
    fn test_ascending_from_mid_key() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(100);
        let table = open_table(&dir, 1, &tuples, 256, 192);

        let start = Key::first_version(b"key-0042".to_vec());
        let scanned: Vec<Tuple> = table
            .ascending_iter(Some(start))
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(scanned, tuples[42..].to_vec());
    }

    #[test]
    fn test_ascending_from_between_keys() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(100);
        let table = open_table(&dir, 1, &tuples, 256, 192);

        // "key-0042a" sorts between key-0042 and key-0043.
        let start = Key::first_version(b"key-0042a".to_vec());
        let first = table
            .ascending_iter(Some(start))
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(first.key.bytes(), b"key-0043");
    }

    #[test]
    fn test_ascending_past_end_is_empty() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(20);
        let table = open_table(&dir, 1, &tuples, 256, 192);

        let start = Key::first_version(b"zzz".to_vec());
        assert_eq!(table.ascending_iter(Some(start)).count(), 0);
    }

    #[test]
    fn test_descending_from_mid_key() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(100);
        let table = open_table(&dir, 1, &tuples, 256, 192);

        let start = Key::last_version(b"key-0042".to_vec());
        let scanned: Vec<Tuple> = table
            .descending_iter(Some(start))
            .map(|r| r.unwrap())
            .collect();
        let mut expected = tuples[..=42].to_vec();
        expected.reverse();
        assert_eq!(scanned, expected);
    }

    #[test]
    fn test_descending_from_between_keys() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(100);
        let table = open_table(&dir, 1, &tuples, 256, 192);

        let start = Key::last_version(b"key-0042a".to_vec());
        let first = table
            .descending_iter(Some(start))
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(first.key.bytes(), b"key-0042");
    }

    #[test]
    fn test_descending_before_start_is_empty() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(20);
        let table = open_table(&dir, 1, &tuples, 256, 192);

        let start = Key::last_version(b"aaa".to_vec());
        assert_eq!(table.descending_iter(Some(start)).count(), 0);
    }

    #[test]
    fn test_version_runs_scan_newest_first() {
        let dir = TempDir::new().unwrap();
        let tuples = vec![
            Tuple::put(b"k", b"v7", 7),
            Tuple::put(b"k", b"v4", 4),
            Tuple::put(b"k", b"v1", 1),
            Tuple::put(b"l", b"w2", 2),
        ];
        let table = open_table(&dir, 1, &tuples, 64 * 1024, 64 * 1024);

        let scanned: Vec<Tuple> = table.ascending_iter(None).map(|r| r.unwrap()).collect();
        assert_eq!(scanned, tuples);
    }

    #[test]
    fn test_iterator_outlives_obsolete_mark() {
        let dir = TempDir::new().unwrap();
        let tuples = sequential_tuples(50);
        let table = open_table(&dir, 1, &tuples, 256, 192);

        let mut iter = table.ascending_iter(None);
        assert!(iter.next().is_some());

        table.mark_obsolete();
        drop(table);

        // The iterator holds its own reference; the file is still
        // there for it.
        let rest: Vec<Tuple> = iter.map(|r| r.unwrap()).collect();
        assert_eq!(rest.len(), 49);
    }
}
