pub mod bloom;
pub mod builder;
pub mod cooccur;
pub mod executor;
pub mod manifest;
pub mod normalizer;
pub mod search;
pub mod select;
pub mod store;
pub mod verify;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Сторона логического документа: оригинал или перевод.
/// Индексируются независимо, у документа есть максимум две стороны.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    Original,
    Translated,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Original, Side::Translated];

    pub fn label(self) -> &'static str {
        match self {
            Side::Original => "orig",
            Side::Translated => "trans",
        }
    }
}

/// Битовая маска сторон (кандидаты, запрошенные стороны поиска).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideMask(u8);

impl SideMask {
    pub const NONE: SideMask = SideMask(0);
    pub const ORIGINAL: SideMask = SideMask(1);
    pub const TRANSLATED: SideMask = SideMask(2);
    pub const BOTH: SideMask = SideMask(3);

    pub fn of(side: Side) -> SideMask {
        match side {
            Side::Original => Self::ORIGINAL,
            Side::Translated => Self::TRANSLATED,
        }
    }

    pub fn insert(&mut self, side: Side) {
        self.0 |= Self::of(side).0;
    }

    pub fn union(&mut self, other: SideMask) {
        self.0 |= other.0;
    }

    pub fn contains(self, side: Side) -> bool {
        self.0 & Self::of(side).0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Одно подтверждённое вхождение запроса в нормализованном тексте.
/// `index` — позиция начала в символах; контекст уже вырезан по границам.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub index: usize,
    pub left: String,
    pub matched: String,
    pub right: String,
}

impl SearchHit {
    /// KWIC-окно хита одной строкой (вход анализатора кооккуренций).
    pub fn window(&self) -> String {
        format!("{}{}{}", self.left, self.matched, self.right)
    }
}

/// Отображаемые метаданные документа. Поставляются внешним приложением
/// через инжектированный lookup, движок их не хранит и не трактует.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocMeta {
    pub title: String,
    pub tooltip: String,
    pub status: String,
}

/// Группа результатов по одному документу: хиты обеих сторон + метаданные.
#[derive(Debug, Clone, Serialize)]
pub struct ResultGroup {
    pub rel_path: String,
    pub meta: DocMeta,
    pub original_hits: Vec<SearchHit>,
    pub translated_hits: Vec<SearchHit>,
}

impl ResultGroup {
    pub fn empty(rel_path: String) -> Self {
        Self {
            rel_path,
            meta: DocMeta::default(),
            original_hits: Vec::new(),
            translated_hits: Vec::new(),
        }
    }

    pub fn hit_count(&self) -> usize {
        self.original_hits.len() + self.translated_hits.len()
    }

    pub fn hits(&self) -> impl Iterator<Item = &SearchHit> {
        self.original_hits.iter().chain(self.translated_hits.iter())
    }
}

/// Прогресс долгой операции. Счётчики только растут; порядок колбэков
/// между воркерами не гарантирован.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub done: u64,
    pub total: u64,
    pub phase: &'static str,
}

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// `rel_path -> метаданные`; чистая функция внешнего приложения.
pub type MetaLookupFn = Arc<dyn Fn(&str) -> DocMeta + Send + Sync>;

/// Необязательный предикат включения пути в поиск.
pub type PathFilterFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;
