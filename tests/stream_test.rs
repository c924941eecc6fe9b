mod common;

use dynaredis::{AdapterOptions, MemoryStoreOptions, StreamId};
use futures::future::join_all;

use crate::common::test_adapter::TestAdapter;

fn event(name: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
    vec![(b"event".to_vec(), name.as_bytes().to_vec())]
}

#[tokio::test]
async fn test_two_auto_appends_come_back_in_order() {
    let t = TestAdapter::new();
    let redis = &t.adapter;

    let first = redis.xadd("events", None, event("signup")).await.unwrap();
    let second = redis.xadd("events", None, event("login")).await.unwrap();
    assert!(second > first, "{} should sort after {}", second, first);

    let start = StreamId::parse_bound("-", false).unwrap();
    let end = StreamId::parse_bound("+", true).unwrap();
    let entries = redis.xrange("events", start, end, None).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, first);
    assert_eq!(entries[0].fields, event("signup"));
    assert_eq!(entries[1].id, second);
    assert_eq!(entries[1].fields, event("login"));
}

#[tokio::test]
async fn test_xrange_with_user_supplied_bounds() {
    let t = TestAdapter::new();
    let redis = &t.adapter;
    for (ms, seq) in [(100, 0), (100, 1), (200, 0), (300, 5)] {
        let id: StreamId = format!("{}-{}", ms, seq).parse().unwrap();
        redis.xadd("s", Some(id), event("e")).await.unwrap();
    }

    let ids = |entries: Vec<dynaredis::StreamEntry>| entries.into_iter().map(|e| e.id.to_string()).collect::<Vec<_>>();

    let start = StreamId::parse_bound("100", false).unwrap();
    let end = StreamId::parse_bound("200", true).unwrap();
    assert_eq!(
        ids(redis.xrange("s", start, end, None).await.unwrap()),
        vec!["100-0", "100-1", "200-0"]
    );

    let start = StreamId::parse_bound("100-1", false).unwrap();
    let end = StreamId::parse_bound("+", true).unwrap();
    assert_eq!(
        ids(redis.xrange("s", start, end, Some(2)).await.unwrap()),
        vec!["100-1", "200-0"]
    );
    assert_eq!(redis.xlen("s").await.unwrap(), 4);

    // 显式 ID 之后继续自动生成，仍然单调
    let next = redis.xadd("s", None, event("auto")).await.unwrap();
    assert!(next > StreamId::new(300, 5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_get_unique_ids() {
    let t = TestAdapter::build(
        MemoryStoreOptions {
            page_size: 7,
            ..Default::default()
        },
        AdapterOptions {
            stream_append_retries: 64,
            ..Default::default()
        },
    );
    let tasks = (0..8).map(|writer| {
        let redis = t.adapter.clone();
        tokio::spawn(async move {
            let mut ids = Vec::new();
            for i in 0..5 {
                let id = redis
                    .xadd("shared", None, event(&format!("{}-{}", writer, i)))
                    .await
                    .unwrap();
                ids.push(id);
            }
            ids
        })
    });
    let mut ids: Vec<StreamId> = join_all(tasks)
        .await
        .into_iter()
        .flat_map(|r| r.unwrap())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 40);
    assert_eq!(t.adapter.xlen("shared").await.unwrap(), 40);

    let stored: Vec<StreamId> = t
        .adapter
        .xrange("shared", StreamId::MIN, StreamId::MAX, None)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(stored, ids);
}
