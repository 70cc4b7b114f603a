mod helpers;

use std::collections::HashMap;
use std::fs;
use std::thread::sleep;
use std::time::Duration;

use bloomgrep_index::bloom::BLOOM_BLOCK_BYTES;
use bloomgrep_index::manifest::IndexManifest;
use bloomgrep_index::store::IndexCache;
use bloomgrep_index::Side;
use helpers::*;

/// Снимок блоков текущего поколения: (relPath, side) -> байты блока.
fn blocks_by_entry(corpus: &Corpus) -> HashMap<(String, Side), Vec<u8>> {
    let manifest: IndexManifest = serde_json::from_slice(
        &fs::read(corpus.root.join("bloomgrep.manifest.json")).unwrap(),
    )
    .unwrap();
    let blob = fs::read(corpus.root.join("bloomgrep.blocks.bin")).unwrap();
    manifest
        .entries
        .iter()
        .map(|e| {
            let start = e.bloom_offset as usize;
            (
                (e.rel_path.clone(), e.side),
                blob[start..start + BLOOM_BLOCK_BYTES].to_vec(),
            )
        })
        .collect()
}

fn seed(corpus: &Corpus) {
    write_doc(&corpus.orig, "a.xml", "первый текст про кошек");
    write_doc(&corpus.trans, "a.xml", "first text about cats");
    write_doc(&corpus.orig, "b.xml", "второй текст про собак");
}

#[test]
fn unchanged_corpus_reuses_every_block() {
    let tmp = tempfile::tempdir().unwrap();
    let corpus = corpus_dirs(tmp.path());
    seed(&corpus);

    let cache = IndexCache::new(&corpus.root);
    let first = build(&cache, &corpus, false);
    assert_eq!(first.total, 3);
    assert_eq!(first.recomputed, 3);
    let before = blocks_by_entry(&corpus);

    let second = build(&cache, &corpus, false);
    assert_eq!(second.total, 3);
    assert_eq!(second.reused, 3);
    assert_eq!(second.recomputed, 0);
    assert_eq!(blocks_by_entry(&corpus), before);
}

#[test]
fn changed_file_recomputes_only_itself() {
    let tmp = tempfile::tempdir().unwrap();
    let corpus = corpus_dirs(tmp.path());
    seed(&corpus);

    let cache = IndexCache::new(&corpus.root);
    build(&cache, &corpus, false);
    let before = blocks_by_entry(&corpus);

    sleep(Duration::from_millis(20));
    write_doc(&corpus.orig, "b.xml", "второй текст теперь про птиц");

    let stats = build(&cache, &corpus, false);
    assert_eq!(stats.reused, 2);
    assert_eq!(stats.recomputed, 1);

    let after = blocks_by_entry(&corpus);
    let changed = ("b.xml".to_string(), Side::Original);
    assert_ne!(after[&changed], before[&changed]);
    for (key, bytes) in &before {
        if *key != changed {
            assert_eq!(&after[key], bytes, "нетронутый блок {key:?} изменился");
        }
    }
}

#[test]
fn touched_mtime_safely_over_invalidates() {
    let tmp = tempfile::tempdir().unwrap();
    let corpus = corpus_dirs(tmp.path());
    seed(&corpus);

    let cache = IndexCache::new(&corpus.root);
    build(&cache, &corpus, false);
    let before = blocks_by_entry(&corpus);

    // тот же контент, но свежий mtime: отпечаток обязан сработать в сторону
    // пересчёта, а блок — совпасть байтами
    sleep(Duration::from_millis(20));
    write_doc(&corpus.orig, "a.xml", "первый текст про кошек");

    let stats = build(&cache, &corpus, false);
    assert_eq!(stats.recomputed, 1);
    assert_eq!(blocks_by_entry(&corpus), before);
}

#[test]
fn force_rebuild_matches_incremental_blocks() {
    let tmp = tempfile::tempdir().unwrap();
    let corpus = corpus_dirs(tmp.path());
    seed(&corpus);

    let cache = IndexCache::new(&corpus.root);
    build(&cache, &corpus, false);
    let incremental = blocks_by_entry(&corpus);

    let stats = build(&cache, &corpus, true);
    assert_eq!(stats.recomputed, 3);
    assert_eq!(stats.reused, 0);
    assert_eq!(blocks_by_entry(&corpus), incremental);
}
