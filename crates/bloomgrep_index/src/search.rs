//! Двухфазный конвейер поиска: отсев по фильтрам → точная верификация.
//!
//! Замок кеша держится только на время получения снимка (манифест + mmap);
//! долгая верификация идёт уже без него, так что поиск не блокирует
//! публикацию следующего поколения, а сборка — поиск.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::executor::ParallelExecutor;
use crate::select::{select_candidates, SelectOptions};
use crate::store::{IndexCache, LoadResult};
use crate::verify::verify_and_extract;
use crate::{
    MetaLookupFn, PathFilterFn, Progress, ProgressFn, ResultGroup, Side, SideMask,
};

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub original_dir: PathBuf,
    pub translated_dir: PathBuf,
    pub include_original: bool,
    pub include_translated: bool,
    /// Ширина контекста с каждой стороны матча, в символах.
    pub context_width: usize,
    /// Параллелизм bloom-фазы.
    pub select_parallelism: usize,
    /// Параллелизм верификации; отдельная ручка — тут настоящий файловый
    /// ввод-вывод и повторный скан текста.
    pub verify_parallelism: usize,
}

impl SearchRequest {
    pub fn sides(&self) -> SideMask {
        let mut mask = SideMask::NONE;
        if self.include_original {
            mask.insert(Side::Original);
        }
        if self.include_translated {
            mask.insert(Side::Translated);
        }
        mask
    }
}

/// Отмена — не ошибка; уже посчитанные группы отбрасываются.
#[derive(Debug)]
pub enum SearchOutcome {
    Completed(Vec<ResultGroup>),
    Cancelled,
}

/// Поиск по всему корпусу. Группы в итоге отсортированы по пути —
/// порядок навязывается финальной сортировкой, не порядком воркеров.
pub async fn search_all(
    cache: &Arc<IndexCache>,
    req: &SearchRequest,
    meta_lookup: Option<MetaLookupFn>,
    path_filter: Option<PathFilterFn>,
    progress: Option<ProgressFn>,
    cancel: &CancellationToken,
) -> Result<SearchOutcome> {
    let sides = req.sides();
    if sides.is_empty() || req.query.is_empty() {
        return Ok(SearchOutcome::Completed(Vec::new()));
    }

    // короткая фаза: снимок опубликованного поколения
    let view = match cache.load()? {
        LoadResult::Valid(view) => view,
        LoadResult::Invalid(reason) => {
            // отсутствие индекса — сигнал на пересборку у вызывающей стороны
            anyhow::bail!("index absent ({reason}), rebuild required");
        }
    };

    let entry_total = view.manifest.entries.len() as u64;
    report(&progress, 0, entry_total, "bloom");
    let select_opts = SelectOptions {
        sides,
        parallelism: req.select_parallelism,
    };
    let candidates = select_candidates(cache, &view, &req.query, &select_opts, cancel).await;
    report(&progress, entry_total, entry_total, "bloom");
    if cancel.is_cancelled() {
        return Ok(SearchOutcome::Cancelled);
    }

    // инжектированный предикат приложения
    let work: Vec<(String, SideMask)> = candidates
        .into_iter()
        .filter(|(rel_path, _)| path_filter.as_ref().map_or(true, |f| f(rel_path)))
        .collect();

    let verify_total = work.len() as u64;
    report(&progress, 0, verify_total, "verify");

    let exec = ParallelExecutor::new(req.verify_parallelism);
    let done = Arc::new(AtomicU64::new(0));
    let parts = {
        let query = req.query.clone();
        let original_dir = req.original_dir.clone();
        let translated_dir = req.translated_dir.clone();
        let context_width = req.context_width;
        let progress = progress.clone();
        let done = done.clone();
        exec.run_all(cancel.clone(), work, move |(rel_path, mask), _ct| {
            let query = query.clone();
            let original_dir = original_dir.clone();
            let translated_dir = translated_dir.clone();
            let progress = progress.clone();
            let done = done.clone();
            async move {
                let mut group = ResultGroup::empty(rel_path);
                if mask.contains(Side::Original) {
                    group.original_hits = verify_and_extract(
                        &original_dir.join(&group.rel_path),
                        &query,
                        context_width,
                    );
                }
                if mask.contains(Side::Translated) {
                    group.translated_hits = verify_and_extract(
                        &translated_dir.join(&group.rel_path),
                        &query,
                        context_width,
                    );
                }
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                report(&progress, n, verify_total, "verify");
                Ok(group)
            }
        })
        .await
    };
    if cancel.is_cancelled() {
        return Ok(SearchOutcome::Cancelled);
    }

    // ложные срабатывания фильтра отпадают здесь: группы без хитов не отдаём
    let mut groups: Vec<ResultGroup> = parts
        .into_iter()
        .filter(|g| g.hit_count() > 0)
        .collect();

    if let Some(lookup) = meta_lookup {
        for group in &mut groups {
            group.meta = lookup(&group.rel_path);
        }
    }

    groups.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(SearchOutcome::Completed(groups))
}

fn report(progress: &Option<ProgressFn>, done: u64, total: u64, phase: &'static str) {
    if let Some(cb) = progress {
        cb(Progress { done, total, phase });
    }
}
