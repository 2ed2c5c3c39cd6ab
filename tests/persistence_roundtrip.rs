//! Build segments, merge them, reopen through the codec, and verify the
//! record layout round-trips byte-for-byte.

use std::sync::Arc;

use seismic::cache::{CacheKey, CacheManager};
use seismic::clustering::ClusterWorkerPool;
use seismic::codec::{decode_record, encode_record, SparseTermsFileReader};
use seismic::index::{ClusteredPostingReader, SegmentBuilder, SegmentReader};
use seismic::merge::{MergeInput, SegmentMergeSource, SegmentMerger};
use seismic::settings::SparseFieldConfig;
use seismic::{DocId, SparseError, Token};

fn config() -> SparseFieldConfig {
    SparseFieldConfig {
        approximate_threshold: 0,
        max_token: 10_000,
        ..Default::default()
    }
}

fn build(
    cache: &CacheManager,
    key: CacheKey,
    dir: &std::path::Path,
    name: &str,
    docs: &[(DocId, Vec<(Token, f32)>)],
    capacity: usize,
) -> Arc<SegmentReader> {
    let mut builder = SegmentBuilder::new(cache, key, config(), capacity)
        .unwrap()
        .with_seed(key.segment);
    for (doc_id, tokens) in docs {
        builder.add_document(*doc_id, tokens).unwrap();
    }
    builder.seal(dir, name).unwrap();
    Arc::new(SegmentReader::open(cache, key, dir, name, capacity, None).unwrap())
}

fn docs_a() -> Vec<(DocId, Vec<(Token, f32)>)> {
    (0..6)
        .map(|i| {
            (
                i as DocId,
                vec![(100, 0.5 + i as f32 * 0.2), (200 + i as Token, 1.5)],
            )
        })
        .collect()
}

fn docs_b() -> Vec<(DocId, Vec<(Token, f32)>)> {
    (0..4)
        .map(|i| (i as DocId, vec![(100, 2.0), (300, 0.25 * (i + 1) as f32)]))
        .collect()
}

#[test]
fn merge_and_reopen_round_trips_every_record() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheManager::new(u64::MAX);

    let seg_a = build(&cache, CacheKey::new(1, 0), dir.path(), "a", &docs_a(), 6);
    let seg_b = build(&cache, CacheKey::new(2, 0), dir.path(), "b", &docs_b(), 4);

    // Segment a keeps its ids; segment b is appended after it.
    let inputs = vec![
        MergeInput {
            source: Box::new(SegmentMergeSource::new(seg_a)),
            doc_map: Box::new(Some),
        },
        MergeInput {
            source: Box::new(SegmentMergeSource::new(seg_b)),
            doc_map: Box::new(|old| Some(old + 6)),
        },
    ];
    let field = config();
    let pool = ClusterWorkerPool::new(2);
    let merger = SegmentMerger::new(&inputs, &field, &pool);
    merger
        .merge(&cache, CacheKey::new(3, 0), 10, dir.path(), "merged")
        .unwrap();

    let reader = SparseTermsFileReader::open(dir.path(), "merged").unwrap();
    let terms = reader.terms().unwrap();
    assert!(terms.contains(&b"100".to_vec()));
    assert!(terms.contains(&b"300".to_vec()));

    for term in &terms {
        let clusters = reader.read(term).unwrap().unwrap();

        // Serialize -> deserialize -> serialize is byte-identical.
        let mut bytes = Vec::new();
        encode_record(&mut bytes, &clusters).unwrap();
        let decoded = decode_record(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, *clusters);
        let mut re_encoded = Vec::new();
        encode_record(&mut re_encoded, &decoded).unwrap();
        assert_eq!(bytes, re_encoded, "record bytes differ for term {term:?}");
    }

    // Token 100 exists in every source doc.
    let clusters = reader.read(b"100").unwrap().unwrap();
    assert_eq!(clusters.doc_count(), 10);
    let mut ids: Vec<DocId> = clusters.doc_weights().map(|d| d.doc_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..10).collect::<Vec<_>>());
}

#[test]
fn reopened_segment_serves_terms_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheManager::new(u64::MAX);
    build(&cache, CacheKey::new(1, 0), dir.path(), "a", &docs_a(), 6);

    // A cold cache forces the persisted tier.
    let cold = CacheManager::new(u64::MAX);
    let reader =
        SegmentReader::open(&cold, CacheKey::new(1, 0), dir.path(), "a", 6, None).unwrap();
    let clusters = reader.postings().read(b"100").unwrap().unwrap();
    assert_eq!(clusters.doc_count(), 6);

    // The read-through warmed the cold cache.
    let warmed = cold.get_clustered_postings(&CacheKey::new(1, 0)).unwrap();
    assert!(warmed.read(b"100").unwrap().is_some());
}

#[test]
fn tampered_postings_file_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheManager::new(u64::MAX);
    build(&cache, CacheKey::new(1, 0), dir.path(), "a", &docs_a(), 6);

    let path = dir.path().join("a.cpd");
    let mut bytes = std::fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] = bytes[mid].wrapping_add(1);
    std::fs::write(&path, &bytes).unwrap();

    match SparseTermsFileReader::open(dir.path(), "a") {
        Err(SparseError::ChecksumMismatch { .. }) | Err(SparseError::Corruption(_)) => {}
        other => panic!("expected corruption error, got {other:?}"),
    }
}
