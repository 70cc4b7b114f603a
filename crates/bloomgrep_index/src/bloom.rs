//! Кодек bloom-блока: один блок фиксированного размера на (документ, сторону).
//!
//! Константы ниже входят в отпечаток формата (`buildGuid`); менять их без
//! смены отпечатка нельзя — старые блобы перестанут совпадать по смыслу.

use anyhow::{ensure, Result};
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::normalizer::fold_chars;

/// Размер фильтра в битах. Степень двойки: позиция берётся маской.
pub const BLOOM_BITS: usize = 1 << 16;
/// Слов по 64 бита в блоке.
pub const BLOOM_WORDS: usize = BLOOM_BITS / 64;
/// Размер блока в байтах — этим задаётся адресация блоба по смещению.
pub const BLOOM_BLOCK_BYTES: usize = BLOOM_BITS / 8;
/// Число выставляемых/проверяемых битов на грамму.
pub const BLOOM_HASH_COUNT: usize = 4;

const SEED_LO: u64 = 0x9E37_79B9_7F4A_7C15;
const SEED_HI: u64 = 0xC2B2_AE3D_27D4_EB4F;

/// Множители деривации k позиций из пары 32-битных хэшей.
const DERIVE_MUL: [u32; BLOOM_HASH_COUNT] = [0x9E37_79B1, 0x85EB_CA77, 0xC2B2_AE3D, 0x27D4_EB2F];

/// Битовый массив одного документа. Идентичность документа блок не хранит —
/// она живёт только в манифестной записи.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BloomBlock {
    words: Box<[u64; BLOOM_WORDS]>,
}

impl Default for BloomBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl BloomBlock {
    pub fn new() -> Self {
        Self {
            words: Box::new([0u64; BLOOM_WORDS]),
        }
    }

    /// k битовых позиций граммы: двойное хэширование, `h1 + h2*mul[i]`.
    fn positions(gram: &[char]) -> [usize; BLOOM_HASH_COUNT] {
        // грамма ≤ 3 символов, utf-8 ≤ 4 байта на символ
        let mut buf = [0u8; 12];
        let mut len = 0usize;
        for &c in gram {
            len += c.encode_utf8(&mut buf[len..]).len();
        }
        let h1 = xxh3_64_with_seed(&buf[..len], SEED_LO) as u32;
        let h2 = xxh3_64_with_seed(&buf[..len], SEED_HI) as u32;
        let mut out = [0usize; BLOOM_HASH_COUNT];
        for (slot, mul) in out.iter_mut().zip(DERIVE_MUL) {
            *slot = h1.wrapping_add(h2.wrapping_mul(mul)) as usize & (BLOOM_BITS - 1);
        }
        out
    }

    pub fn add(&mut self, gram: &[char]) {
        for p in Self::positions(gram) {
            self.words[p / 64] |= 1u64 << (p % 64);
        }
    }

    /// AND-тест: все k битов выставлены. Ложных отрицаний нет по построению.
    pub fn might_contain(&self, gram: &[char]) -> bool {
        Self::positions(gram)
            .iter()
            .all(|&p| self.words[p / 64] >> (p % 64) & 1 == 1)
    }

    /// Вставляет все 2- и 3-граммы свёрнутого текста. Обе длины сразу:
    /// запрос из двух символов тестирует биграмму, длиннее — триграммы,
    /// и один фильтр закрывает оба пути.
    pub fn build_from_text(text: &str) -> Self {
        let folded = fold_chars(text);
        let mut block = Self::new();
        for w in folded.windows(2) {
            block.add(w);
        }
        for w in folded.windows(3) {
            block.add(w);
        }
        block
    }

    /// Сериализация: BLOOM_WORDS little-endian u64 подряд, ровно
    /// BLOOM_BLOCK_BYTES байт.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BLOOM_BLOCK_BYTES);
        for w in self.words.iter() {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() == BLOOM_BLOCK_BYTES,
            "bloom block: expected {} bytes, got {}",
            BLOOM_BLOCK_BYTES,
            bytes.len()
        );
        let mut block = Self::new();
        for (i, chunk) in bytes.chunks_exact(8).enumerate() {
            block.words[i] = u64::from_le_bytes(chunk.try_into().unwrap());
        }
        Ok(block)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }
}
