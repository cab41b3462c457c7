mod tests_build;
mod tests_get;
mod tests_scan;

#[cfg(test)]
pub(crate) mod helpers {
    use std::path::PathBuf;
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::cache::BlockCache;
    use crate::table::{DiskTable, TableBuilder};
    use crate::tuple::Tuple;

    pub(crate) fn cache() -> Arc<BlockCache> {
        Arc::new(BlockCache::new(8 * 1024 * 1024, 2 * 1024 * 1024))
    }

    /// Builds `<generation>.table` in `dir` from pre-sorted tuples.
    pub(crate) fn build_table(
        dir: &TempDir,
        generation: u64,
        tuples: &[Tuple],
        record_block_size: usize,
        index_block_size: usize,
    ) -> PathBuf {
        let path = dir.path().join(format!("{generation}.table"));
        let mut builder = TableBuilder::new(
            &path,
            tuples.len(),
            record_block_size,
            index_block_size,
            0.01,
        )
        .unwrap();
        for tuple in tuples {
            builder.add(tuple).unwrap();
        }
        builder.finish().unwrap()
    }

    /// Builds and opens a table in one step.
    pub(crate) fn open_table(
        dir: &TempDir,
        generation: u64,
        tuples: &[Tuple],
        record_block_size: usize,
        index_block_size: usize,
    ) -> Arc<DiskTable> {
        let path = build_table(dir, generation, tuples, record_block_size, index_block_size);
        Arc::new(DiskTable::open(path, cache()).unwrap())
    }

    /// `count` sorted puts: key-0000, key-0001, … with snapshot = index + 1.
    pub(crate) fn sequential_tuples(count: usize) -> Vec<Tuple> {
        (0..count)
            .map(|index| {
                let key = format!("key-{index:04}");
                let value = format!("value-{index:04}");
                Tuple::put(key.as_bytes(), value.as_bytes(), index as u64 + 1)
            })
            .collect()
    }
}
