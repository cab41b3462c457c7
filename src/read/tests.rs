#[cfg(test)]
mod tests {
    use crate::read::{Direction, MergeIterator, TupleSource};
    use crate::tuple::Tuple;

    fn source(tuples: Vec<Tuple>) -> TupleSource {
        Box::new(tuples.into_iter().map(Ok))
    }

    fn keys(merged: MergeIterator) -> Vec<(Vec<u8>, u64)> {
        merged
            .map(|r| r.unwrap())
            .map(|t| (t.key.bytes().to_vec(), t.key.snapshot_id()))
            .collect()
    }

    #[test]
    fn test_merge_two_sorted_sources() {
        let a = source(vec![Tuple::put(b"a", b"1", 1), Tuple::put(b"c", b"3", 3)]);
        let b = source(vec![Tuple::put(b"b", b"2", 2), Tuple::put(b"d", b"4", 4)]);

        let merged = MergeIterator::new(vec![a, b], Direction::Ascending);
        assert_eq!(
            keys(merged),
            vec![
                (b"a".to_vec(), 1),
                (b"b".to_vec(), 2),
                (b"c".to_vec(), 3),
                (b"d".to_vec(), 4),
            ]
        );
    }

    #[test]
    fn test_merge_interleaves_versions_newest_first() {
        // The same key lives in two sources at different snapshots; the
        // merged stream must order versions newest first.
        let newer = source(vec![Tuple::put(b"k", b"v9", 9)]);
        let older = source(vec![Tuple::put(b"k", b"v4", 4), Tuple::put(b"z", b"z1", 1)]);

        let merged = MergeIterator::new(vec![older, newer], Direction::Ascending);
        assert_eq!(
            keys(merged),
            vec![(b"k".to_vec(), 9), (b"k".to_vec(), 4), (b"z".to_vec(), 1)]
        );
    }

    #[test]
    fn test_merge_descending() {
        let a = source(vec![Tuple::put(b"c", b"3", 3), Tuple::put(b"a", b"1", 1)]);
        let b = source(vec![Tuple::put(b"b", b"2", 2)]);

        let merged = MergeIterator::new(vec![a, b], Direction::Descending);
        assert_eq!(
            keys(merged),
            vec![(b"c".to_vec(), 3), (b"b".to_vec(), 2), (b"a".to_vec(), 1)]
        );
    }

    #[test]
    fn test_merge_empty_sources() {
        let merged = MergeIterator::new(vec![source(vec![]), source(vec![])], Direction::Ascending);
        assert_eq!(merged.count(), 0);
    }

    #[test]
    fn test_merge_single_source_passthrough() {
        let tuples = vec![
            Tuple::put(b"a", b"1", 1),
            Tuple::put(b"b", b"2", 2),
            Tuple::put(b"c", b"3", 3),
        ];
        let merged = MergeIterator::new(
            vec![source(tuples.clone())],
            Direction::Ascending,
        );
        let out: Vec<Tuple> = merged.map(|r| r.unwrap()).collect();
        assert_eq!(out, tuples);
    }
}

#[cfg(test)]
mod visibility_tests {
    use crate::read::{Direction, MergeIterator, ScanIterator, TupleSource};
    use crate::tuple::Tuple;

    fn ascending_scan(sources: Vec<Vec<Tuple>>, snapshot: u64) -> Vec<(Vec<u8>, u64)> {
        scan(sources, snapshot, Direction::Ascending)
    }

    fn descending_scan(sources: Vec<Vec<Tuple>>, snapshot: u64) -> Vec<(Vec<u8>, u64)> {
        scan(sources, snapshot, Direction::Descending)
    }

    fn scan(sources: Vec<Vec<Tuple>>, snapshot: u64, direction: Direction) -> Vec<(Vec<u8>, u64)> {
        let boxed: Vec<TupleSource> = sources
            .into_iter()
            .map(|tuples| Box::new(tuples.into_iter().map(Ok)) as TupleSource)
            .collect();
        ScanIterator::new(MergeIterator::new(boxed, direction), snapshot, direction)
            .map(|r| r.unwrap())
            .map(|t| (t.key.bytes().to_vec(), t.key.snapshot_id()))
            .collect()
    }

    #[test]
    fn test_one_tuple_per_key_newest_visible_wins() {
        let versions = vec![
            Tuple::put(b"k", b"v9", 9),
            Tuple::put(b"k", b"v5", 5),
            Tuple::put(b"k", b"v1", 1),
        ];
        assert_eq!(ascending_scan(vec![versions.clone()], 100), vec![(b"k".to_vec(), 9)]);
        assert_eq!(ascending_scan(vec![versions.clone()], 6), vec![(b"k".to_vec(), 5)]);
        assert_eq!(ascending_scan(vec![versions.clone()], 1), vec![(b"k".to_vec(), 1)]);
        assert_eq!(ascending_scan(vec![versions], 0), vec![]);
    }

    #[test]
    fn test_future_versions_invisible_for_iterator_lifetime() {
        let sources = vec![vec![
            Tuple::put(b"a", b"new", 50),
            Tuple::put(b"a", b"old", 5),
            Tuple::put(b"b", b"only-new", 60),
        ]];
        assert_eq!(ascending_scan(sources, 10), vec![(b"a".to_vec(), 5)]);
    }

    #[test]
    fn test_tombstones_are_surfaced_not_filtered() {
        let sources = vec![vec![
            Tuple::delete(b"a", 7),
            Tuple::put(b"a", b"old", 2),
            Tuple::put(b"b", b"live", 3),
        ]];
        let out = ascending_scan(sources, 100);
        assert_eq!(out, vec![(b"a".to_vec(), 7), (b"b".to_vec(), 3)]);
    }

    #[test]
    fn test_descending_groups_resolve_to_newest_visible() {
        // Descending streams deliver versions oldest-first per key; the
        // filter must still pick the newest visible one. Each source is
        // ordered the way a descending table iterator emits: key bytes
        // descending, snapshots ascending within a key.
        let sources = vec![
            vec![
                Tuple::put(b"b", b"b2", 2),
                Tuple::put(b"b", b"b8", 8),
                Tuple::put(b"a", b"a9", 9),
            ],
            vec![Tuple::put(b"a", b"a4", 4)],
        ];
        assert_eq!(
            descending_scan(sources.clone(), 100),
            vec![(b"b".to_vec(), 8), (b"a".to_vec(), 9)]
        );
        assert_eq!(
            descending_scan(sources, 5),
            vec![(b"b".to_vec(), 2), (b"a".to_vec(), 4)]
        );
    }

    #[test]
    fn test_shadowed_versions_across_sources() {
        // Memtable shadows a disk table version of the same key.
        let memtable_run = vec![Tuple::put(b"a", b"fresh", 10)];
        let disk_run = vec![Tuple::put(b"a", b"stale", 3), Tuple::put(b"z", b"zz", 4)];
        assert_eq!(
            ascending_scan(vec![memtable_run, disk_run], 100),
            vec![(b"a".to_vec(), 10), (b"z".to_vec(), 4)]
        );
    }
}
