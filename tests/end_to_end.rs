//! End-to-end scenarios: ingest, seal, search.

use seismic::cache::{CacheKey, CacheManager};
use seismic::index::{SegmentBuilder, SegmentReader};
use seismic::settings::SparseFieldConfig;
use seismic::{DocId, ScoredDoc, SparseQueryContext, Token};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn field_config() -> SparseFieldConfig {
    SparseFieldConfig {
        n_postings: 1000,
        summary_prune_ratio: 0.4,
        cluster_ratio: 0.1,
        approximate_threshold: 8,
        max_token: 10_000,
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    cache: CacheManager,
    reader: SegmentReader,
}

fn build_segment(
    config: SparseFieldConfig,
    docs: &[(DocId, Vec<(Token, f32)>)],
    capacity: usize,
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheManager::new(u64::MAX);
    let key = CacheKey::new(1, 0);
    let mut builder = SegmentBuilder::new(&cache, key, config, capacity)
        .unwrap()
        .with_seed(17);
    for (doc_id, tokens) in docs {
        builder.add_document(*doc_id, tokens).unwrap();
    }
    builder.seal(dir.path(), "seg1").unwrap();
    let reader = SegmentReader::open(&cache, key, dir.path(), "seg1", capacity, None).unwrap();
    Fixture {
        _dir: dir,
        cache,
        reader,
    }
}

/// Order hits best-first; equal scores fall back to descending doc id so
/// expectations stay deterministic (the engine itself leaves ties
/// unspecified).
fn best_first(mut hits: Vec<ScoredDoc>) -> Vec<ScoredDoc> {
    hits.sort_by(|a, b| b.score.cmp(&a.score).then(b.doc_id.cmp(&a.doc_id)));
    hits
}

fn ladder_docs() -> Vec<(DocId, Vec<(Token, f32)>)> {
    (1..=8)
        .map(|i| {
            let weight = i as f32 * 0.1;
            (i as DocId, vec![(1000, weight), (2000, weight)])
        })
        .collect()
}

#[test]
fn ladder_corpus_ranks_by_weight() {
    let fixture = build_segment(field_config(), &ladder_docs(), 9);
    let ctx = SparseQueryContext::new(&[(1000, 0.1), (2000, 0.2)], 10, 2, 1.0).unwrap();
    let hits = best_first(fixture.reader.search(&ctx).unwrap());

    let top4: Vec<DocId> = hits.iter().take(4).map(|hit| hit.doc_id).collect();
    assert_eq!(top4, vec![8, 7, 6, 5]);
    // Scores are non-increasing.
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn query_cut_keeps_only_the_heaviest_token() {
    let mut docs = ladder_docs();
    docs.push((9, vec![(3000, 0.0001)]));
    let fixture = build_segment(field_config(), &docs, 10);

    // Token 3000 carries by far the largest query weight; query-cut 1
    // drops tokens 1000/2000, so only doc 9 is reachable.
    let ctx = SparseQueryContext::new(&[(1000, 0.1), (2000, 0.2), (3000, 64.0)], 10, 1, 1.0)
        .unwrap();
    let hits = fixture.reader.search(&ctx).unwrap();
    let ids: Vec<DocId> = hits.iter().map(|hit| hit.doc_id).collect();
    assert_eq!(ids, vec![9]);
}

/// 100 docs in ten groups: a strong group token keeps the groups
/// mutually dissimilar, a weak shared token links them all to the query.
fn grouped_docs(rng: &mut StdRng) -> Vec<(DocId, Vec<(Token, f32)>)> {
    (0..100)
        .map(|i| {
            let group = i / 10;
            (
                i as DocId,
                vec![
                    (1000, rng.random_range(0.25..2.0)),
                    (2000 + group as Token, rng.random_range(20.0..60.0)),
                ],
            )
        })
        .collect()
}

#[test]
fn heap_factor_trades_recall_for_latency() {
    let mut rng = StdRng::seed_from_u64(5);
    let docs = grouped_docs(&mut rng);
    // Unpruned summaries keep the skip test a true upper bound, so only
    // the heap factor decides what gets skipped.
    let config = SparseFieldConfig {
        approximate_threshold: 0,
        summary_prune_ratio: 0.0,
        ..field_config()
    };
    let fixture = build_segment(config, &docs, 100);

    let aggressive = SparseQueryContext::new(&[(1000, 1.0)], 100, 1, 0.000001).unwrap();
    let hits = fixture.reader.search(&aggressive).unwrap();
    assert!(
        hits.len() < 100,
        "tiny heap factor must skip clusters, got {} hits",
        hits.len()
    );

    let exact = SparseQueryContext::new(&[(1000, 1.0)], 100, 1, 100_000.0).unwrap();
    let hits = fixture.reader.search(&exact).unwrap();
    assert_eq!(hits.len(), 100, "huge heap factor degrades to exact");
}

#[test]
fn disabled_clustering_never_skips() {
    let mut rng = StdRng::seed_from_u64(5);
    let docs = grouped_docs(&mut rng);
    // cluster_ratio 0: every posting becomes one unprunable cluster.
    let config = SparseFieldConfig {
        cluster_ratio: 0.0,
        approximate_threshold: 0,
        ..field_config()
    };
    let fixture = build_segment(config, &docs, 100);

    let aggressive = SparseQueryContext::new(&[(1000, 1.0)], 100, 1, 0.000001).unwrap();
    let hits = fixture.reader.search(&aggressive).unwrap();
    assert_eq!(hits.len(), 100);
}

#[test]
fn below_approximate_threshold_degrades_to_plain_postings() {
    // 8 docs with a threshold of 1000: the build must force
    // cluster_ratio to zero, leaving single unprunable clusters.
    let config = SparseFieldConfig {
        approximate_threshold: 1000,
        ..field_config()
    };
    let fixture = build_segment(config, &ladder_docs(), 9);

    use seismic::index::ClusteredPostingReader;
    let clusters = fixture.reader.postings().read(b"1000").unwrap().unwrap();
    assert_eq!(clusters.len(), 1);
    assert!(clusters.clusters()[0].should_not_skip());
    assert!(clusters.clusters()[0].summary().is_none());

    let _ = &fixture.cache;
}

#[test]
fn exact_mode_matches_brute_force() {
    let mut rng = StdRng::seed_from_u64(11);
    let docs = grouped_docs(&mut rng);
    let config = SparseFieldConfig {
        approximate_threshold: 0,
        summary_prune_ratio: 0.0,
        ..field_config()
    };
    let fixture = build_segment(config.clone(), &docs, 100);

    let query = [(1000u32, 1.0f32), (2004, 3.0)];
    let ctx = SparseQueryContext::new(&query, 10, 2, 100_000.0).unwrap();
    let hits = best_first(fixture.reader.search(&ctx).unwrap());

    // Brute force over the same quantization.
    let query_vec = seismic::SparseVector::from_pairs(
        query
            .iter()
            .map(|&(t, w)| (t, seismic::ByteQuantizer::quantize(w))),
    )
    .unwrap();
    let dense = query_vec.to_dense(query_vec.max_token().unwrap());
    let mut expected: Vec<(DocId, i32)> = docs
        .iter()
        .map(|(doc_id, tokens)| {
            let vector = seismic::SparseVector::from_pairs(
                tokens
                    .iter()
                    .map(|&(t, w)| (t, seismic::ByteQuantizer::quantize(w))),
            )
            .unwrap();
            (*doc_id, vector.dot_dense(&dense))
        })
        .collect();
    expected.sort_by(|a, b| b.1.cmp(&a.1));

    let expected_scores: Vec<i32> = expected.iter().take(10).map(|&(_, s)| s).collect();
    let got_scores: Vec<i32> = hits.iter().map(|hit| hit.score).collect();
    assert_eq!(got_scores, expected_scores);
}
