//! Id allocation through record stores and id file recovery

use nexus_store::config::{PageCacheConfig, StoreConfig};
use nexus_store::format::NoStoreHeaderFormat;
use nexus_store::id::{
    DefaultIdGenerator, DefaultIdGeneratorFactory, INTEGER_MINUS_ONE, IdGenerator, IdType,
    id_file_path,
};
use nexus_store::page_cache::StandardPageCache;
use nexus_store::store::STORE_VERSION;
use nexus_store::testing::{TestRecord, TestRecordFormat};
use nexus_store::{Error, RecordStore};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn store_at(path: &Path, config: StoreConfig) -> RecordStore<TestRecordFormat> {
    let page_cache = Arc::new(StandardPageCache::new(PageCacheConfig::default()).unwrap());
    RecordStore::new(
        path,
        config,
        IdType::Node,
        Arc::new(DefaultIdGeneratorFactory::new()),
        page_cache,
        "TestStore",
        TestRecordFormat::new(),
        NoStoreHeaderFormat,
        STORE_VERSION,
    )
    .unwrap()
}

fn config() -> StoreConfig {
    StoreConfig::new().with_page_size(64).with_grab_size(4)
}

#[test]
fn test_concurrent_allocation_never_duplicates() {
    let dir = TempDir::new().unwrap();
    let mut store = store_at(&dir.path().join("nodes.store"), config());
    store.initialise(true).unwrap();

    let per_thread = 500;
    let threads = 8;
    let all: Vec<Vec<u64>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                scope.spawn(|| {
                    (0..per_thread)
                        .map(|_| store.next_id().unwrap())
                        .collect::<Vec<u64>>()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let unique: HashSet<u64> = all.iter().flatten().copied().collect();
    assert_eq!(unique.len(), per_thread * threads);
    assert_eq!(store.high_id().unwrap(), (per_thread * threads) as u64);
    store.close().unwrap();
}

#[test]
fn test_concurrent_writers_and_frees() {
    let dir = TempDir::new().unwrap();
    let mut store = store_at(&dir.path().join("nodes.store"), config());
    store.initialise(true).unwrap();

    std::thread::scope(|scope| {
        for t in 0..4u64 {
            let store = &store;
            scope.spawn(move || {
                for i in 0..100u64 {
                    let id = store.next_id().unwrap();
                    store.update_record(&TestRecord::new(id, t * 1000 + i)).unwrap();
                    if i % 2 == 0 {
                        let mut deleted = TestRecord::new(id, 0);
                        deleted.in_use = false;
                        store.update_record(&deleted).unwrap();
                    }
                }
            });
        }
    });

    let high_id = store.high_id().unwrap();
    let in_use = (0..high_id)
        .filter(|id| store.is_in_use(*id).unwrap())
        .count() as u64;
    assert_eq!(in_use, store.number_of_ids_in_use().unwrap());
    assert_eq!(in_use, 200);
    store.close().unwrap();
}

#[test]
fn test_missing_id_file_recovers_high_id_from_records() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nodes.store");
    {
        let mut store = store_at(&path, config());
        store.initialise(true).unwrap();
        for value in 0..10 {
            let id = store.next_id().unwrap();
            store.update_record(&TestRecord::new(id, value)).unwrap();
        }
        store.close().unwrap();
    }
    std::fs::remove_file(id_file_path(&path)).unwrap();

    let mut store = store_at(&path, config());
    store.initialise(false).unwrap();
    assert_eq!(store.high_id().unwrap(), 10);
    assert_eq!(store.next_id().unwrap(), 10);
}

#[test]
fn test_sticky_id_file_triggers_rebuild() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nodes.store");
    let id_path = id_file_path(&path);
    let sticky_snapshot;
    {
        let mut store = store_at(&path, config());
        store.initialise(true).unwrap();
        // the id file stays sticky while the generator is open
        sticky_snapshot = std::fs::read(&id_path).unwrap();
        assert_eq!(sticky_snapshot[0], 1);

        for value in 0..8 {
            let id = store.next_id().unwrap();
            store.update_record(&TestRecord::new(id, value)).unwrap();
        }
        for id in [1, 4, 5] {
            let mut deleted = TestRecord::new(id, 0);
            deleted.in_use = false;
            store.update_record(&deleted).unwrap();
        }
        store.close().unwrap();
    }
    // simulate a crash: the generator never wrote its clean state
    std::fs::write(&id_path, &sticky_snapshot).unwrap();

    let mut store = store_at(&path, config().with_rebuild_id_generators_fast(false));
    store.initialise(false).unwrap();
    assert!(!store.id_generator().unwrap().needs_rebuild());
    assert_eq!(store.high_id().unwrap(), 8);
    assert_eq!(store.number_of_ids_in_use().unwrap(), 5);

    let reused: BTreeSet<u64> = (0..3).map(|_| store.next_id().unwrap()).collect();
    assert_eq!(reused, BTreeSet::from([1, 4, 5]));
    assert_eq!(store.next_id().unwrap(), 8);
    store.close().unwrap();

    let state = std::fs::read(&id_path).unwrap();
    assert_eq!(state[0], 0);
}

#[test]
fn test_corrupt_id_file_with_fast_rebuild_keeps_free_list_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nodes.store");
    {
        let mut store = store_at(&path, config());
        store.initialise(true).unwrap();
        for value in 0..4 {
            let id = store.next_id().unwrap();
            store.update_record(&TestRecord::new(id, value)).unwrap();
        }
        let mut deleted = TestRecord::new(0, 0);
        deleted.in_use = false;
        store.update_record(&deleted).unwrap();
        store.close().unwrap();
    }
    std::fs::write(id_file_path(&path), [0u8, 1, 2]).unwrap();

    let mut store = store_at(&path, config());
    store.initialise(false).unwrap();
    assert!(store.id_generator().unwrap().needs_rebuild());
    assert_eq!(store.high_id().unwrap(), 4);
    assert_eq!(store.next_id().unwrap(), 4);

    // an explicit rebuild reclaims the deleted slot
    store.rebuild_id_generator().unwrap();
    assert!(!store.id_generator().unwrap().needs_rebuild());
    assert_eq!(store.next_id().unwrap(), 0);
    store.close().unwrap();
}

#[test]
fn test_generator_skips_reserved_id() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("big.id");
    let generator = DefaultIdGenerator::open(
        &path,
        16,
        IdType::Property,
        &|| Ok(INTEGER_MINUS_ONE - 1),
        u64::MAX,
    )
    .unwrap();

    assert_eq!(generator.next_id().unwrap(), INTEGER_MINUS_ONE - 1);
    assert_eq!(generator.next_id().unwrap(), INTEGER_MINUS_ONE + 1);
    assert!(matches!(
        generator.free_id(INTEGER_MINUS_ONE),
        Err(Error::InvalidIdOperation(_))
    ));
    generator.close().unwrap();
}

#[derive(Debug, Clone)]
enum Op {
    Allocate,
    Free(usize),
    Reopen,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Allocate),
        2 => any::<usize>().prop_map(Op::Free),
        1 => Just(Op::Reopen),
    ]
}

fn open_generator(path: &Path) -> DefaultIdGenerator {
    DefaultIdGenerator::open(path, 3, IdType::Node, &|| Ok(0), 1 << 20).unwrap()
}

proptest! {
    #[test]
    fn prop_allocated_ids_are_unique_and_freed_ids_come_back(ops in prop::collection::vec(op(), 1..80)) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prop.id");
        let mut generator = open_generator(&path);

        let mut allocated: BTreeSet<u64> = BTreeSet::new();
        let mut freed: BTreeSet<u64> = BTreeSet::new();

        for op in ops {
            match op {
                Op::Allocate => {
                    let id = generator.next_id().unwrap();
                    prop_assert!(allocated.insert(id), "id {} handed out twice", id);
                    let reused = freed.remove(&id);
                    // new ids only once every freed id is back in use
                    prop_assert!(reused || freed.is_empty(), "skipped freed ids {:?}", freed);
                }
                Op::Free(index) => {
                    if allocated.is_empty() {
                        continue;
                    }
                    let id = *allocated.iter().nth(index % allocated.len()).unwrap();
                    allocated.remove(&id);
                    generator.free_id(id).unwrap();
                    freed.insert(id);
                    prop_assert!(generator.free_id(id).is_err());
                }
                Op::Reopen => {
                    generator.close().unwrap();
                    generator = open_generator(&path);
                }
            }
            let in_use = generator.number_of_ids_in_use().unwrap();
            prop_assert_eq!(in_use, allocated.len() as u64);
        }
        generator.close().unwrap();
    }
}
