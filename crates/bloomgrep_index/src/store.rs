//! Двухфайловое хранилище: манифест (JSON) + блоб бloom-блоков (бинарный).
//!
//! Кеш — явный объект с жизненным циклом, а не статики процесса: на один
//! корень заводится один `IndexCache`, несколько корней (тесты, мульти-корпус)
//! сосуществуют без пересечений.

use anyhow::{Context, Result};
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use crate::bloom::{BloomBlock, BLOOM_BLOCK_BYTES};
use crate::manifest::{IndexManifest, InvalidReason};

pub const MANIFEST_FILE: &str = "bloomgrep.manifest.json";
pub const BLOB_FILE: &str = "bloomgrep.blocks.bin";

/// Публикация ретраится против транзиентного «file in use» от читателей.
const PUBLISH_RETRIES: u32 = 6;
const PUBLISH_BACKOFF_MS: u64 = 25;

/// Бюджет LRU декодированных блоков по умолчанию.
const DEFAULT_BLOCK_BUDGET: usize = 8 * 1024 * 1024;

/// Итог загрузки пары. Невалидность — значение, не исключение.
pub enum LoadResult {
    Valid(IndexView),
    Invalid(InvalidReason),
}

/// Снимок опубликованного поколения: разобранный манифест + отображение блоба.
/// Дёшев в клонировании, живёт у читателя сколько нужно — подмена пары
/// на диске его не трогает.
#[derive(Clone)]
pub struct IndexView {
    pub manifest: Arc<IndexManifest>,
    pub blob: Arc<Mmap>,
}

struct CachedView {
    view: IndexView,
    manifest_mtime: SystemTime,
    blob_mtime: SystemTime,
}

/// Кеш одного корня корпуса.
pub struct IndexCache {
    root: PathBuf,
    view: Mutex<Option<CachedView>>,
    blocks: Mutex<BlockLru>,
    /// Эксклюзив сборки: в полёте не больше одного билдера.
    build_gate: Mutex<()>,
}

impl IndexCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            view: Mutex::new(None),
            blocks: Mutex::new(BlockLru::new(DEFAULT_BLOCK_BUDGET)),
            build_gate: Mutex::new(()),
        }
    }

    pub fn with_block_budget(root: impl Into<PathBuf>, budget_bytes: usize) -> Self {
        let cache = Self::new(root);
        *cache.blocks.lock().unwrap() = BlockLru::new(budget_bytes);
        cache
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Строковая идентичность корня, как она пишется в манифест.
    pub fn root_key(&self) -> String {
        let canon = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        canon.to_string_lossy().replace('\\', "/")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn blob_path(&self) -> PathBuf {
        self.root.join(BLOB_FILE)
    }

    /// Загрузка с валидацией всё-или-ничего. Свежесть кеша — по mtime обеих
    /// половин; любое изменение инвалидирует и перечитывает.
    /// Держит только короткий внутренний замок — долгие фазы поиска идут
    /// уже по полученному снимку.
    pub fn load(&self) -> Result<LoadResult> {
        let mut guard = self.view.lock().unwrap();

        let (m_mtime, b_mtime) = match (mtime(&self.manifest_path()), mtime(&self.blob_path())) {
            (Some(m), Some(b)) => (m, b),
            _ => {
                drop(guard);
                self.invalidate();
                return Ok(LoadResult::Invalid(InvalidReason::MissingFiles));
            }
        };
        if let Some(c) = guard.as_ref() {
            if c.manifest_mtime == m_mtime && c.blob_mtime == b_mtime {
                return Ok(LoadResult::Valid(c.view.clone()));
            }
        }
        *guard = None;
        self.blocks.lock().unwrap().clear();

        let data = match fs::read(self.manifest_path()) {
            Ok(d) => d,
            Err(_) => return Ok(LoadResult::Invalid(InvalidReason::MissingFiles)),
        };
        let manifest: IndexManifest = match serde_json::from_slice(&data) {
            Ok(m) => m,
            Err(e) => return Ok(LoadResult::Invalid(InvalidReason::Unparsable(e.to_string()))),
        };
        let blob_file = match File::open(self.blob_path()) {
            Ok(f) => f,
            Err(_) => return Ok(LoadResult::Invalid(InvalidReason::MissingFiles)),
        };
        let mmap = unsafe { Mmap::map(&blob_file) }.context("mmap blob")?;
        if let Err(reason) = manifest.validate(&self.root_key(), mmap.len() as u64) {
            return Ok(LoadResult::Invalid(reason));
        }

        let view = IndexView {
            manifest: Arc::new(manifest),
            blob: Arc::new(mmap),
        };
        *guard = Some(CachedView {
            view: view.clone(),
            manifest_mtime: m_mtime,
            blob_mtime: b_mtime,
        });
        Ok(LoadResult::Valid(view))
    }

    pub fn invalidate(&self) {
        *self.view.lock().unwrap() = None;
        self.blocks.lock().unwrap().clear();
    }

    pub fn close(&self) {
        self.invalidate();
    }

    /// Декодированный блок по смещению, через LRU.
    pub fn block(&self, view: &IndexView, offset: u64) -> Result<Arc<BloomBlock>> {
        if let Some(hit) = self.blocks.lock().unwrap().get(offset) {
            return Ok(hit);
        }
        let start = offset as usize;
        let end = start + BLOOM_BLOCK_BYTES;
        anyhow::ensure!(end <= view.blob.len(), "block offset {} out of blob", offset);
        let block = Arc::new(BloomBlock::from_bytes(&view.blob[start..end])?);
        self.blocks.lock().unwrap().put(offset, block.clone());
        Ok(block)
    }

    pub(crate) fn build_gate(&self) -> MutexGuard<'_, ()> {
        self.build_gate.lock().unwrap()
    }

    /// Атомарная публикация готовой пары: сперва блоб, затем манифест, оба
    /// через rename с ретраями и экспоненциальной паузой. Полупары читатель
    /// не увидит: новый манифест появляется последним, а рассинхрон ловится
    /// валидацией при следующей загрузке.
    pub fn publish(&self, manifest_tmp: &Path, blob_tmp: &Path) -> Result<()> {
        replace_with_retry(blob_tmp, &self.blob_path())?;
        replace_with_retry(manifest_tmp, &self.manifest_path())?;
        self.invalidate();
        Ok(())
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn replace_with_retry(from: &Path, to: &Path) -> Result<()> {
    let mut delay = Duration::from_millis(PUBLISH_BACKOFF_MS);
    let mut last: Option<std::io::Error> = None;
    for _ in 0..PUBLISH_RETRIES {
        match fs::rename(from, to) {
            Ok(()) => return Ok(()),
            Err(e) => {
                last = Some(e);
                std::thread::sleep(delay);
                delay *= 2;
            }
        }
    }
    let _ = fs::remove_file(from);
    Err(anyhow::Error::from(last.unwrap()))
        .with_context(|| format!("replace {} after {} retries", to.display(), PUBLISH_RETRIES))
}

/// LRU декодированных блоков с бюджетом в байтах. Единственные мутации —
/// вставка и вытеснение наиболее давнего.
struct BlockLru {
    budget_blocks: usize,
    tick: u64,
    map: HashMap<u64, (Arc<BloomBlock>, u64)>,
}

impl BlockLru {
    fn new(budget_bytes: usize) -> Self {
        Self {
            budget_blocks: (budget_bytes / BLOOM_BLOCK_BYTES).max(1),
            tick: 0,
            map: HashMap::new(),
        }
    }

    fn get(&mut self, offset: u64) -> Option<Arc<BloomBlock>> {
        self.tick += 1;
        let tick = self.tick;
        self.map.get_mut(&offset).map(|slot| {
            slot.1 = tick;
            slot.0.clone()
        })
    }

    fn put(&mut self, offset: u64, block: Arc<BloomBlock>) {
        self.tick += 1;
        self.map.insert(offset, (block, self.tick));
        while self.map.len() > self.budget_blocks {
            if let Some((&victim, _)) = self.map.iter().min_by_key(|(_, (_, used))| *used) {
                self.map.remove(&victim);
            } else {
                break;
            }
        }
    }

    fn clear(&mut self) {
        self.map.clear();
    }
}
