//! Манифест индекса: текстовая половина двухфайлового хранилища.
//!
//! Любое несовпадение тегов совместимости — не ошибка, а нормальный сигнал
//! «индекса нет»: вызывающая сторона отвечает полной пересборкой.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::bloom::{BLOOM_BITS, BLOOM_BLOCK_BYTES, BLOOM_HASH_COUNT};
use crate::Side;

/// Версия формата манифеста.
pub const INDEX_VERSION: u32 = 3;
/// Отпечаток формы индекса: хэш, граммы, параметры фильтра.
/// Меняется при любом изменении смысла блоков.
pub const FORMAT_FINGERPRINT: &str = "bg3/xxh3-seeded/gram2+3/65536x4";

/// Одна запись (документ, сторона).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: u32,
    /// Путь относительно корня, прямые слэши; идентичность без учёта регистра.
    pub rel_path: String,
    pub side: Side,
    /// Отпечаток файла на момент индексации: 100-нс тики от эпохи + длина.
    pub last_write_utc_ticks: i64,
    pub length_bytes: i64,
    /// Смещение блока этой записи в блобе.
    pub bloom_offset: u64,
}

/// Манифест одного поколения индекса.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexManifest {
    pub root_path: String,
    pub built_utc: DateTime<Utc>,
    pub version: u32,
    pub build_guid: String,
    pub bloom_bits: u32,
    pub bloom_hash_count: u32,
    pub entries: Vec<IndexEntry>,
}

impl IndexManifest {
    pub fn new_generation(root_path: String) -> Self {
        Self {
            root_path,
            built_utc: Utc::now(),
            version: INDEX_VERSION,
            build_guid: FORMAT_FINGERPRINT.to_string(),
            bloom_bits: BLOOM_BITS as u32,
            bloom_hash_count: BLOOM_HASH_COUNT as u32,
            entries: Vec::new(),
        }
    }

    /// Валидация всё-или-ничего против фактического корня и длины блоба.
    pub fn validate(&self, root_path: &str, blob_len: u64) -> Result<(), InvalidReason> {
        if self.root_path != root_path {
            return Err(InvalidReason::RootMismatch(self.root_path.clone()));
        }
        if self.version != INDEX_VERSION {
            return Err(InvalidReason::VersionMismatch(self.version));
        }
        if self.build_guid != FORMAT_FINGERPRINT {
            return Err(InvalidReason::FingerprintMismatch(self.build_guid.clone()));
        }
        if self.bloom_bits != BLOOM_BITS as u32 || self.bloom_hash_count != BLOOM_HASH_COUNT as u32
        {
            return Err(InvalidReason::BloomParamMismatch {
                bits: self.bloom_bits,
                hashes: self.bloom_hash_count,
            });
        }
        let mut seen: HashSet<(String, Side)> = HashSet::with_capacity(self.entries.len());
        for e in &self.entries {
            let end = e.bloom_offset + BLOOM_BLOCK_BYTES as u64;
            if end > blob_len {
                return Err(InvalidReason::OffsetOutOfRange { id: e.id });
            }
            if !seen.insert((e.rel_path.to_lowercase(), e.side)) {
                return Err(InvalidReason::DuplicateEntry {
                    rel_path: e.rel_path.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Почему пара манифест+блоб считается отсутствующей.
/// Явный вариант вместо «вернуть null при любом сбое»: вызывающий код
/// ветвится по значению, тесты утверждают точную причину.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidReason {
    #[error("index files are missing")]
    MissingFiles,
    #[error("manifest was built for another root: {0}")]
    RootMismatch(String),
    #[error("unsupported index version {0}")]
    VersionMismatch(u32),
    #[error("format fingerprint mismatch: {0}")]
    FingerprintMismatch(String),
    #[error("bloom parameter mismatch: {bits} bits / {hashes} hashes")]
    BloomParamMismatch { bits: u32, hashes: u32 },
    #[error("entry {id}: bloom block range is outside the blob")]
    OffsetOutOfRange { id: u32 },
    #[error("duplicate entry for {rel_path}")]
    DuplicateEntry { rel_path: String },
    #[error("manifest is unparsable: {0}")]
    Unparsable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IndexManifest {
        let mut m = IndexManifest::new_generation("/corpus".to_string());
        m.entries.push(IndexEntry {
            id: 0,
            rel_path: "T01/n0001.xml".to_string(),
            side: Side::Original,
            last_write_utc_ticks: 638_000_000_000_000_000,
            length_bytes: 1024,
            bloom_offset: 0,
        });
        m.entries.push(IndexEntry {
            id: 1,
            rel_path: "T01/n0001.xml".to_string(),
            side: Side::Translated,
            last_write_utc_ticks: 638_000_000_000_000_001,
            length_bytes: 2048,
            bloom_offset: BLOOM_BLOCK_BYTES as u64,
        });
        m
    }

    #[test]
    fn roundtrip_with_wire_names() {
        let m = sample();
        let j = serde_json::to_string_pretty(&m).unwrap();
        // имена полей зафиксированы внешним интерфейсом
        assert!(j.contains("\"rootPath\""));
        assert!(j.contains("\"buildGuid\""));
        assert!(j.contains("\"relPath\""));
        assert!(j.contains("\"lastWriteUtcTicks\""));
        assert!(j.contains("\"bloomOffset\""));
        assert!(j.contains("\"Translated\""));
        let back: IndexManifest = serde_json::from_str(&j).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn validate_ok() {
        let m = sample();
        m.validate("/corpus", 2 * BLOOM_BLOCK_BYTES as u64).unwrap();
    }

    #[test]
    fn validate_each_reason() {
        let m = sample();
        let full = 2 * BLOOM_BLOCK_BYTES as u64;
        assert!(matches!(
            m.validate("/other", full),
            Err(InvalidReason::RootMismatch(_))
        ));
        let mut v = m.clone();
        v.version = 2;
        assert!(matches!(
            v.validate("/corpus", full),
            Err(InvalidReason::VersionMismatch(2))
        ));
        let mut g = m.clone();
        g.build_guid = "bg2/fnv/gram3/4096x5".into();
        assert!(matches!(
            g.validate("/corpus", full),
            Err(InvalidReason::FingerprintMismatch(_))
        ));
        let mut b = m.clone();
        b.bloom_bits = 4096;
        assert!(matches!(
            b.validate("/corpus", full),
            Err(InvalidReason::BloomParamMismatch { .. })
        ));
        // блоб короче, чем требует последняя запись
        assert!(matches!(
            m.validate("/corpus", full - 1),
            Err(InvalidReason::OffsetOutOfRange { id: 1 })
        ));
        // дубль (relPath, side) с другим регистром пути
        let mut d = m.clone();
        let mut dup = d.entries[0].clone();
        dup.id = 2;
        dup.rel_path = "t01/N0001.XML".into();
        dup.bloom_offset = 0;
        d.entries.push(dup);
        assert!(matches!(
            d.validate("/corpus", full),
            Err(InvalidReason::DuplicateEntry { .. })
        ));
    }
}
