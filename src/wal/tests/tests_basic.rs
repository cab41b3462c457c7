#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::TempDir;

    use crate::tuple::Tuple;
    use crate::wal::{Wal, WalHeader, parse_generation};

    fn open(dir: &TempDir, generation: u64) -> Wal<Tuple> {
        Wal::open(dir.path().join(format!("{generation}.write"))).unwrap()
    }

    #[test]
    fn test_parse_generation_from_name() {
        assert_eq!(parse_generation(Path::new("/db/7.write")), Some(7));
        assert_eq!(parse_generation(Path::new("/db/123456.write")), Some(123456));
        assert_eq!(parse_generation(Path::new("/db/7.table")), None);
        assert_eq!(parse_generation(Path::new("/db/x.write")), None);
    }

    #[test]
    fn test_bad_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(Wal::<Tuple>::open(dir.path().join("notalog.bin")).is_err());
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let wal = open(&dir, 1);

        let tuples = vec![
            Tuple::put(b"a", b"1", 1),
            Tuple::put(b"b", b"2", 2),
            Tuple::delete(b"a", 3),
        ];
        for tuple in &tuples {
            wal.append(tuple, false).unwrap();
        }

        let replayed: Vec<Tuple> = wal.replay_iter().map(|r| r.unwrap()).collect();
        assert_eq!(replayed, tuples);
    }

    #[test]
    fn test_empty_log_replays_nothing() {
        let dir = TempDir::new().unwrap();
        let wal = open(&dir, 1);
        assert_eq!(wal.replay_iter().count(), 0);
    }

    #[test]
    fn test_reopen_continues_appending() {
        let dir = TempDir::new().unwrap();
        {
            let wal = open(&dir, 4);
            wal.append(&Tuple::put(b"first", b"1", 1), true).unwrap();
        }
        {
            let wal = open(&dir, 4);
            assert_eq!(wal.generation(), 4);
            wal.append(&Tuple::put(b"second", b"2", 2), true).unwrap();

            let replayed: Vec<Tuple> = wal.replay_iter().map(|r| r.unwrap()).collect();
            assert_eq!(replayed.len(), 2);
            assert_eq!(replayed[0].key.bytes(), b"first");
            assert_eq!(replayed[1].key.bytes(), b"second");
        }
    }

    #[test]
    fn test_header_written_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("9.write");
        {
            let _wal: Wal<Tuple> = Wal::open(&path).unwrap();
        }
        let size = std::fs::metadata(&path).unwrap().len();
        assert_eq!(size, WalHeader::DISK_SIZE as u64);
    }

    #[test]
    fn test_replay_interleaves_with_appends() {
        // The iterator tracks its own offset, so records appended after
        // it was created still replay.
        let dir = TempDir::new().unwrap();
        let wal = open(&dir, 2);
        wal.append(&Tuple::put(b"a", b"1", 1), false).unwrap();

        let mut iter = wal.replay_iter();
        assert_eq!(iter.next().unwrap().unwrap().key.bytes(), b"a");

        wal.append(&Tuple::put(b"b", b"2", 2), false).unwrap();
        assert_eq!(iter.next().unwrap().unwrap().key.bytes(), b"b");
        assert!(iter.next().is_none());
    }
}
