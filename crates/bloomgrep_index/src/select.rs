//! Быстрая фаза поиска: отсев по bloom-блокам без ложных отрицаний.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::executor::ParallelExecutor;
use crate::manifest::IndexEntry;
use crate::normalizer::fold_chars;
use crate::store::{IndexCache, IndexView};
use crate::SideMask;

/// Кандидаты: `rel_path -> маска сторон`, которые фильтр не смог исключить.
pub type CandidateSet = HashMap<String, SideMask>;

/// План проверки запроса по граммам.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GramPlan {
    /// Запрос короче двух символов грамм-тесту не поддаётся:
    /// фильтр пропускается, кандидаты — весь корпус.
    ScanAll,
    /// Ровно два символа — одна биграмма.
    Bigram([char; 2]),
    /// Три и больше — все скользящие триграммы обязаны пройти тест:
    /// триграммы запроса суть подмножество грамм настоящего вхождения.
    Trigrams(Vec<[char; 3]>),
}

pub fn plan_query(query: &str) -> GramPlan {
    let folded = fold_chars(query);
    match folded.len() {
        0 | 1 => GramPlan::ScanAll,
        2 => GramPlan::Bigram([folded[0], folded[1]]),
        _ => GramPlan::Trigrams(folded.windows(3).map(|w| [w[0], w[1], w[2]]).collect()),
    }
}

#[derive(Debug, Clone)]
pub struct SelectOptions {
    /// Какие стороны вообще интересуют.
    pub sides: SideMask,
    /// Степень параллелизма bloom-тестов; отдельная ручка от верификации —
    /// профиль стоимости другой (mmap-чтения дешёвые).
    pub parallelism: usize,
}

/// Прогон манифеста через фильтры. Записи режутся на непрерывные партиции,
/// каждая задача собирает локальный набор, слияние — в одной точке.
pub async fn select_candidates(
    cache: &Arc<IndexCache>,
    view: &IndexView,
    query: &str,
    opts: &SelectOptions,
    cancel: &CancellationToken,
) -> CandidateSet {
    let entry_count = view.manifest.entries.len();
    if entry_count == 0 || opts.sides.is_empty() {
        return CandidateSet::new();
    }

    let plan = Arc::new(plan_query(query));
    let partitions = partition(entry_count, opts.parallelism);
    let exec = ParallelExecutor::new(opts.parallelism);

    let parts = {
        let cache = cache.clone();
        let view = view.clone();
        let sides = opts.sides;
        exec.run_all(cancel.clone(), partitions, move |range, ct| {
            let cache = cache.clone();
            let view = view.clone();
            let plan = plan.clone();
            async move {
                let mut local = CandidateSet::new();
                for entry in &view.manifest.entries[range] {
                    if ct.is_cancelled() {
                        break;
                    }
                    if !sides.contains(entry.side) {
                        continue;
                    }
                    if entry_passes(&cache, &view, entry, &plan) {
                        local
                            .entry(entry.rel_path.clone())
                            .or_default()
                            .insert(entry.side);
                    }
                }
                Ok(local)
            }
        })
        .await
    };

    let mut merged = CandidateSet::new();
    for part in parts {
        for (rel_path, mask) in part {
            merged.entry(rel_path).or_default().union(mask);
        }
    }
    merged
}

fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.clamp(1, len);
    let chunk = len.div_ceil(parts);
    (0..parts)
        .map(|i| i * chunk..((i + 1) * chunk).min(len))
        .filter(|r| !r.is_empty())
        .collect()
}

/// Тест одной записи. Сбой декодирования блока трактуем как «кандидат»:
/// лишняя верификация безопасна, ложное отрицание — нет.
fn entry_passes(cache: &IndexCache, view: &IndexView, entry: &IndexEntry, plan: &GramPlan) -> bool {
    match plan {
        GramPlan::ScanAll => true,
        GramPlan::Bigram(gram) => match cache.block(view, entry.bloom_offset) {
            Ok(block) => block.might_contain(gram),
            Err(err) => {
                tracing::warn!(id = entry.id, error = %err, "bloom block unreadable, over-included");
                true
            }
        },
        GramPlan::Trigrams(grams) => match cache.block(view, entry.bloom_offset) {
            Ok(block) => grams.iter().all(|g| block.might_contain(g)),
            Err(err) => {
                tracing::warn!(id = entry.id, error = %err, "bloom block unreadable, over-included");
                true
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_by_query_length() {
        assert_eq!(plan_query(""), GramPlan::ScanAll);
        assert_eq!(plan_query("水"), GramPlan::ScanAll);
        assert_eq!(plan_query("水月"), GramPlan::Bigram(['水', '月']));
        match plan_query("ABCD") {
            GramPlan::Trigrams(g) => {
                assert_eq!(g, vec![['a', 'b', 'c'], ['b', 'c', 'd']]);
            }
            other => panic!("ожидали триграммы, получили {:?}", other),
        }
    }

    #[test]
    fn partition_covers_everything() {
        for (len, parts) in [(10usize, 3usize), (1, 8), (7, 7), (100, 1)] {
            let ranges = partition(len, parts);
            let mut covered = vec![false; len];
            for r in ranges {
                for i in r {
                    assert!(!covered[i]);
                    covered[i] = true;
                }
            }
            assert!(covered.into_iter().all(|c| c));
        }
    }
}
