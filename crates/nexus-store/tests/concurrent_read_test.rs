//! Readers racing a writer on the same page never observe torn records

use nexus_store::config::{PageCacheConfig, StoreConfig};
use nexus_store::format::NoStoreHeaderFormat;
use nexus_store::id::{DefaultIdGeneratorFactory, IdType};
use nexus_store::page_cache::StandardPageCache;
use nexus_store::store::STORE_VERSION;
use nexus_store::testing::{TestRecord, TestRecordFormat};
use nexus_store::{RecordLoad, RecordStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

fn tag_for(value: u64) -> u8 {
    (value % 251) as u8
}

fn record(id: u64, value: u64) -> TestRecord {
    let mut record = TestRecord::new(id, value);
    record.tag = tag_for(value);
    record
}

#[test]
fn test_readers_see_whole_records_while_writer_updates_page() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let dir = TempDir::new().unwrap();
    let mut store = RecordStore::new(
        dir.path().join("race.store"),
        StoreConfig::new().with_page_size(32),
        IdType::Node,
        Arc::new(DefaultIdGeneratorFactory::new()),
        Arc::new(StandardPageCache::new(PageCacheConfig::default()).unwrap()),
        "TestStore",
        TestRecordFormat::new(),
        NoStoreHeaderFormat,
        STORE_VERSION,
    )
    .unwrap();
    store.initialise(true).unwrap();

    for _ in 0..3 {
        let id = store.next_id().unwrap();
        store.update_record(&record(id, 0)).unwrap();
    }

    let done = AtomicBool::new(false);
    std::thread::scope(|scope| {
        let store = &store;
        let done = &done;

        scope.spawn(move || {
            for value in 1..20_000u64 {
                store.update_record(&record(value % 3, value)).unwrap();
            }
            done.store(true, Ordering::Release);
        });

        for _ in 0..3 {
            scope.spawn(move || {
                let mut scratch = store.new_record();
                let mut reads = 0u64;
                while !done.load(Ordering::Acquire) || reads < 100 {
                    let id = reads % 3;
                    assert!(
                        store
                            .get_record(id, &mut scratch, RecordLoad::Check)
                            .unwrap()
                    );
                    assert_eq!(scratch.id, id);
                    assert_eq!(
                        scratch.tag,
                        tag_for(scratch.value),
                        "torn read of record {}: value {} with tag {}",
                        id,
                        scratch.value,
                        scratch.tag
                    );
                    reads += 1;
                }
            });
        }
    });

    store.close().unwrap();
}
