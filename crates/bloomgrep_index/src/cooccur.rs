//! Кооккуренции по KWIC-окнам подтверждённых хитов.
//!
//! Все «корпусные» метрики здесь — суррогаты, посчитанные только из оконной
//! статистики: настоящих корпусных частот движок не ведёт, и выдавать эти
//! числа за точные лингвистические меры ассоциации нельзя.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use crate::ResultGroup;

/// Порог попадания в справочный список доминирования.
const DOMINANT_MIN_FREQ: u64 = 3;
const DOMINANT_MIN_SHARE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssocMetric {
    /// Сырая частота.
    Frequency,
    /// Число различных документов с ключом.
    Range,
    /// `f / sqrt(1+W) * ln(1+range)` — частота, приглушённая объёмом выборки.
    Dispersion,
    /// Доля вхождений ключа, осевшая в его самом частом документе.
    Dominance,
    /// Суррогат PMI по оконным счётчикам.
    PmiLike,
    /// Суррогат logDice по оконным счётчикам.
    LogDiceLike,
    /// Суррогат t-score по оконным счётчикам.
    TScoreLike,
}

impl FromStr for AssocMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "freq" | "frequency" => Ok(Self::Frequency),
            "range" => Ok(Self::Range),
            "dispersion" => Ok(Self::Dispersion),
            "dominance" => Ok(Self::Dominance),
            "pmi" => Ok(Self::PmiLike),
            "logdice" => Ok(Self::LogDiceLike),
            "tscore" => Ok(Self::TScoreLike),
            other => Err(format!("unknown metric: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssocRow {
    pub key: String,
    pub freq: u64,
    pub range: u64,
    pub score: f64,
}

/// Итог анализа: ранжированные одиночные символы и 2-/3-символьные окна,
/// плюс информационные списки, на основной рейтинг не влияющие.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssocReport {
    pub chars: Vec<AssocRow>,
    pub ngrams: Vec<AssocRow>,
    /// Ципф-список: топ n-грамм по сырой частоте.
    pub zipf: Vec<AssocRow>,
    /// Ключи, сконцентрированные в одном документе.
    pub dominant: Vec<AssocRow>,
    pub windows: u64,
}

#[derive(Default)]
struct KeyStats {
    freq: u64,
    /// Окон, где ключ встретился хотя бы раз.
    window_hits: u64,
    last_window: u64,
    per_doc: HashMap<u32, u64>,
}

impl KeyStats {
    fn note(&mut self, doc: u32, window: u64) {
        self.freq += 1;
        if self.last_window != window {
            self.last_window = window;
            self.window_hits += 1;
        }
        *self.per_doc.entry(doc).or_default() += 1;
    }
}

/// Подсчёт ассоциаций по уже готовым результатам поиска. Чистая функция:
/// индекс и диск ей не нужны.
pub fn compute_associations(
    groups: &[ResultGroup],
    query: &str,
    context_width: usize,
    metric: AssocMetric,
    top_k: usize,
) -> AssocReport {
    let mut char_stats: HashMap<char, KeyStats> = HashMap::new();
    let mut ngram_stats: HashMap<String, KeyStats> = HashMap::new();
    let mut windows = 0u64;

    for (doc_ix, group) in groups.iter().enumerate() {
        let doc = doc_ix as u32;
        for hit in group.hits() {
            windows += 1;
            let window_text = collapse_window(&hit.left, &hit.matched, &hit.right);
            // скользящий буфер на 3 символа вместо аллокации подстрок;
            // пробел рвёт окно
            let mut buf = ['\0'; 3];
            let mut filled = 0usize;
            for c in window_text.chars() {
                if c == ' ' {
                    filled = 0;
                    continue;
                }
                buf[0] = buf[1];
                buf[1] = buf[2];
                buf[2] = c;
                if filled < 3 {
                    filled += 1;
                }
                char_stats.entry(c).or_default().note(doc, windows);
                if filled >= 2 {
                    let key: String = buf[1..3].iter().collect();
                    ngram_stats.entry(key).or_default().note(doc, windows);
                }
                if filled >= 3 {
                    let key: String = buf.iter().collect();
                    ngram_stats.entry(key).or_default().note(doc, windows);
                }
            }
        }
    }

    // суррогатный объём корпуса: все позиции всех окон
    let span = (2 * context_width + query.chars().count()).max(1);
    let scorer = Scorer {
        windows: windows as f64,
        total_positions: (windows as f64 * span as f64).max(1.0),
        metric,
    };

    let mut chars: Vec<AssocRow> = char_stats
        .iter()
        .map(|(c, s)| scorer.row(c.to_string(), s))
        .collect();
    let mut ngrams: Vec<AssocRow> = ngram_stats
        .iter()
        .map(|(k, s)| scorer.row(k.clone(), s))
        .collect();

    let mut zipf = ngrams.clone();
    zipf.sort_by(|a, b| b.freq.cmp(&a.freq).then_with(|| a.key.cmp(&b.key)));
    zipf.truncate(top_k);

    let mut dominant: Vec<AssocRow> = ngram_stats
        .iter()
        .filter(|(_, s)| s.freq >= DOMINANT_MIN_FREQ)
        .map(|(k, s)| AssocRow {
            key: k.clone(),
            freq: s.freq,
            range: s.per_doc.len() as u64,
            score: dominance(s),
        })
        .filter(|row| row.score >= DOMINANT_MIN_SHARE)
        .collect();
    sort_rows(&mut dominant);
    dominant.truncate(top_k);

    sort_rows(&mut chars);
    chars.truncate(top_k);
    sort_rows(&mut ngrams);
    ngrams.truncate(top_k);

    AssocReport {
        chars,
        ngrams,
        zipf,
        dominant,
        windows,
    }
}

struct Scorer {
    windows: f64,
    total_positions: f64,
    metric: AssocMetric,
}

impl Scorer {
    fn row(&self, key: String, s: &KeyStats) -> AssocRow {
        AssocRow {
            key,
            freq: s.freq,
            range: s.per_doc.len() as u64,
            score: self.score(s),
        }
    }

    fn score(&self, s: &KeyStats) -> f64 {
        let f = s.freq as f64;
        let w = s.window_hits as f64;
        let range = s.per_doc.len() as f64;
        match self.metric {
            AssocMetric::Frequency => f,
            AssocMetric::Range => range,
            AssocMetric::Dispersion => f / (1.0 + self.windows).sqrt() * (1.0 + range).ln(),
            AssocMetric::Dominance => dominance(s),
            // p(key | окно) / p(key в «корпусе» из всех оконных позиций)
            AssocMetric::PmiLike => ((w * self.total_positions)
                / (self.windows.max(1.0) * f.max(1.0)))
            .log2(),
            // 14 + log2(2*co / (f_query + f_key)), f_query = все окна
            AssocMetric::LogDiceLike => 14.0 + ((2.0 * w) / (self.windows + f)).log2(),
            AssocMetric::TScoreLike => {
                let expected = self.windows * f / self.total_positions;
                (w - expected) / w.max(1.0).sqrt()
            }
        }
    }
}

fn dominance(s: &KeyStats) -> f64 {
    let top = s.per_doc.values().copied().max().unwrap_or(0) as f64;
    top / (s.freq as f64).max(1.0)
}

fn sort_rows(rows: &mut [AssocRow]) {
    rows.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.freq.cmp(&a.freq))
            .then_with(|| a.key.cmp(&b.key))
    });
}

/// Окно хита одной строкой: `left+match+right`, пробельные прогоны — в один
/// пробел.
fn collapse_window(left: &str, matched: &str, right: &str) -> String {
    let mut out = String::with_capacity(left.len() + matched.len() + right.len());
    let mut pending = false;
    for c in left.chars().chain(matched.chars()).chain(right.chars()) {
        if c.is_whitespace() {
            if !out.is_empty() {
                pending = true;
            }
        } else {
            if pending {
                out.push(' ');
                pending = false;
            }
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DocMeta, SearchHit};

    fn group(rel_path: &str, windows: &[(&str, &str, &str)]) -> ResultGroup {
        ResultGroup {
            rel_path: rel_path.to_string(),
            meta: DocMeta::default(),
            original_hits: windows
                .iter()
                .enumerate()
                .map(|(i, (l, m, r))| SearchHit {
                    index: i,
                    left: l.to_string(),
                    matched: m.to_string(),
                    right: r.to_string(),
                })
                .collect(),
            translated_hits: Vec::new(),
        }
    }

    #[test]
    fn frequency_counts_chars_and_ngrams() {
        let groups = vec![group("a.xml", &[("", "абв", "")])];
        let report = compute_associations(&groups, "абв", 4, AssocMetric::Frequency, 10);
        assert_eq!(report.windows, 1);
        let ab = report.ngrams.iter().find(|r| r.key == "аб").unwrap();
        assert_eq!(ab.freq, 1);
        let abv = report.ngrams.iter().find(|r| r.key == "абв").unwrap();
        assert_eq!(abv.freq, 1);
        assert_eq!(report.chars.len(), 3);
    }

    #[test]
    fn whitespace_breaks_windows() {
        let groups = vec![group("a.xml", &[("", "аб вг", "")])];
        let report = compute_associations(&groups, "x", 4, AssocMetric::Frequency, 20);
        assert!(report.ngrams.iter().any(|r| r.key == "аб"));
        assert!(report.ngrams.iter().any(|r| r.key == "вг"));
        // через пробел биграмма не строится
        assert!(!report.ngrams.iter().any(|r| r.key == "б в"));
        assert!(!report.ngrams.iter().any(|r| r.key.contains(' ')));
    }

    #[test]
    fn dominance_concentrated_in_one_doc() {
        // повторяющаяся биграмма в одном файле из десяти
        let mut groups: Vec<ResultGroup> = (0..9)
            .map(|i| group(&format!("doc{i}.xml"), &[("", "xy", "")]))
            .collect();
        groups.push(group(
            "special.xml",
            &[("", "密密", ""), ("", "密密", ""), ("", "密密", "")],
        ));
        let report = compute_associations(&groups, "xy", 4, AssocMetric::Dominance, 50);
        assert_eq!(report.windows, 12);
        let row = report.ngrams.iter().find(|r| r.key == "密密").unwrap();
        assert!((row.score - 1.0).abs() < 1e-9);
        assert_eq!(row.range, 1);
        assert!(report.dominant.iter().any(|r| r.key == "密密"));
    }

    #[test]
    fn range_counts_distinct_docs() {
        let groups = vec![
            group("a.xml", &[("", "жж", "")]),
            group("b.xml", &[("", "жж", ""), ("", "жж", "")]),
        ];
        let report = compute_associations(&groups, "жж", 4, AssocMetric::Range, 10);
        let row = report.ngrams.iter().find(|r| r.key == "жж").unwrap();
        assert_eq!(row.range, 2);
        assert_eq!(row.freq, 3);
        assert_eq!(row.score, 2.0);
    }

    #[test]
    fn zipf_is_frequency_ordered() {
        let groups = vec![group("a.xml", &[("", "ababab", ""), ("", "cd", "")])];
        let report = compute_associations(&groups, "ab", 4, AssocMetric::PmiLike, 10);
        assert!(report.zipf.len() >= 2);
        assert!(report.zipf[0].freq >= report.zipf[1].freq);
    }

    #[test]
    fn metric_parsing() {
        assert_eq!("logdice".parse::<AssocMetric>(), Ok(AssocMetric::LogDiceLike));
        assert!("нет-такой".parse::<AssocMetric>().is_err());
    }
}
