mod helpers;

use std::sync::Arc;

use bloomgrep_index::select::{select_candidates, SelectOptions};
use bloomgrep_index::store::{IndexCache, LoadResult};
use bloomgrep_index::{Side, SideMask};
use helpers::*;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn single_char_query_bypasses_bloom() {
    let tmp = tempfile::tempdir().unwrap();
    let corpus = corpus_dirs(tmp.path());
    write_doc(&corpus.orig, "a.xml", "如是我聞");
    write_doc(&corpus.trans, "a.xml", "thus have i heard");
    write_doc(&corpus.orig, "b.xml", "一時佛在");

    let cache = Arc::new(IndexCache::new(&corpus.root));
    build(&cache, &corpus, false);

    let view = match cache.load().unwrap() {
        LoadResult::Valid(v) => v,
        LoadResult::Invalid(r) => panic!("индекс обязан быть валиден: {r}"),
    };
    // однословный CJK-запрос грамм-тесту не поддаётся: кандидаты — весь корпус
    let opts = SelectOptions {
        sides: SideMask::BOTH,
        parallelism: 4,
    };
    let candidates =
        select_candidates(&cache, &view, "聞", &opts, &CancellationToken::new()).await;
    assert_eq!(candidates.len(), 2);
    assert!(candidates["a.xml"].contains(Side::Original));
    assert!(candidates["a.xml"].contains(Side::Translated));
    assert!(candidates["b.xml"].contains(Side::Original));

    // а верификация всё равно даёт точный ответ
    let groups = search(&cache, &request(&corpus, "聞", 2)).await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].rel_path, "a.xml");
    assert_eq!(groups[0].original_hits.len(), 1);
    assert_eq!(groups[0].original_hits[0].matched, "聞");
    assert!(groups[0].translated_hits.is_empty());
}

#[tokio::test]
async fn two_char_query_uses_single_bigram() {
    let tmp = tempfile::tempdir().unwrap();
    let corpus = corpus_dirs(tmp.path());
    write_doc(&corpus.orig, "a.xml", "如是我聞");
    write_doc(&corpus.orig, "b.xml", "一時佛在");

    let cache = Arc::new(IndexCache::new(&corpus.root));
    build(&cache, &corpus, false);

    let groups = search(&cache, &request(&corpus, "我聞", 2)).await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].rel_path, "a.xml");
}
