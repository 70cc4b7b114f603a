#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use bloomgrep_index::builder::{build_or_update, BuildOptions, BuildOutcome, BuildStats};
use bloomgrep_index::search::{search_all, SearchOutcome, SearchRequest};
use bloomgrep_index::store::IndexCache;
use bloomgrep_index::ResultGroup;
use std::sync::Arc;

pub struct Corpus {
    pub root: PathBuf,
    pub orig: PathBuf,
    pub trans: PathBuf,
}

/// Стандартная раскладка: корень индекса и две стороны корпуса.
pub fn corpus_dirs(base: &Path) -> Corpus {
    let root = base.join("root");
    let orig = base.join("orig");
    let trans = base.join("trans");
    for d in [&root, &orig, &trans] {
        fs::create_dir_all(d).unwrap();
    }
    Corpus { root, orig, trans }
}

/// Пишет документ с TEI-подобной обёрткой тела.
pub fn write_doc(dir: &Path, rel: &str, body: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(
        path,
        format!("<TEI><teiHeader><title>t</title></teiHeader><body>{body}</body></TEI>"),
    )
    .unwrap();
}

pub fn build_opts(corpus: &Corpus, force: bool) -> BuildOptions {
    BuildOptions {
        original_dir: corpus.orig.clone(),
        translated_dir: corpus.trans.clone(),
        force_rebuild: force,
    }
}

pub fn build(cache: &IndexCache, corpus: &Corpus, force: bool) -> BuildStats {
    match build_or_update(
        cache,
        &build_opts(corpus, force),
        None,
        &CancellationToken::new(),
    )
    .unwrap()
    {
        BuildOutcome::Completed(stats) => stats,
        BuildOutcome::Cancelled => panic!("сборку никто не отменял"),
    }
}

pub fn request(corpus: &Corpus, query: &str, context: usize) -> SearchRequest {
    SearchRequest {
        query: query.to_string(),
        original_dir: corpus.orig.clone(),
        translated_dir: corpus.trans.clone(),
        include_original: true,
        include_translated: true,
        context_width: context,
        select_parallelism: 4,
        verify_parallelism: 4,
    }
}

pub async fn search(cache: &Arc<IndexCache>, req: &SearchRequest) -> Vec<ResultGroup> {
    match search_all(cache, req, None, None, None, &CancellationToken::new())
        .await
        .unwrap()
    {
        SearchOutcome::Completed(groups) => groups,
        SearchOutcome::Cancelled => panic!("поиск никто не отменял"),
    }
}
