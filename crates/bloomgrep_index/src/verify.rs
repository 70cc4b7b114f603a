//! Точная фаза поиска: повторная нормализация и подстрочный скан кандидата.

use std::path::Path;

use crate::normalizer::{extract_search_text, fold_char};
use crate::SearchHit;

/// Чтение источника одним способом для сборки и верификации: расхождение
/// представлений текста сломало бы эквивалентность фаз.
/// None — файл недоступен; не-UTF-8 байты заменяются, не роняя чтение.
pub fn read_document(path: &Path) -> Option<String> {
    std::fs::read(path)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Верификация кандидата: исчезнувший между сборкой и поиском файл
/// даёт ноль хитов, это не ошибка.
pub fn verify_and_extract(abs_path: &Path, query: &str, context_width: usize) -> Vec<SearchHit> {
    match read_document(abs_path) {
        Some(raw) => find_hits(&extract_search_text(&raw), query, context_width),
        None => Vec::new(),
    }
}

/// Все регистронезависимые вхождения запроса, без перекрытий: следующая
/// позиция — конец матча, либо начало+1, если это не продвинуло бы скан.
pub fn find_hits(text: &str, query: &str, context_width: usize) -> Vec<SearchHit> {
    let chars: Vec<char> = text.chars().collect();
    let folded: Vec<char> = chars.iter().map(|&c| fold_char(c)).collect();
    let needle: Vec<char> = query.chars().map(fold_char).collect();
    if needle.is_empty() || needle.len() > folded.len() {
        return Vec::new();
    }

    let mut hits = Vec::new();
    let mut from = 0usize;
    while let Some(start) = find_from(&folded, &needle, from) {
        let end = start + needle.len();
        hits.push(make_hit(&chars, start, end, context_width));
        from = if end > start { end } else { start + 1 };
    }
    hits
}

fn find_from(hay: &[char], needle: &[char], from: usize) -> Option<usize> {
    if from + needle.len() > hay.len() {
        return None;
    }
    (from..=hay.len() - needle.len()).find(|&i| hay[i..i + needle.len()] == *needle)
}

/// Контекст фиксированной ширины с каждой стороны, зажатый в границы текста.
fn make_hit(chars: &[char], start: usize, end: usize, context_width: usize) -> SearchHit {
    let left_from = start.saturating_sub(context_width);
    let right_to = (end + context_width).min(chars.len());
    SearchHit {
        index: start,
        left: chars[left_from..start].iter().collect(),
        matched: chars[start..end].iter().collect(),
        right: chars[end..right_to].iter().collect(),
    }
}
