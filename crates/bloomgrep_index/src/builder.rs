//! Инкрементальная сборка индекса.
//!
//! Крэш или отмена посреди сборки не трогают опубликованное поколение:
//! всё пишется во временные файлы, публикация — атомарная подмена пары.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio_util::sync::CancellationToken;

use crate::bloom::{BloomBlock, BLOOM_BLOCK_BYTES};
use crate::manifest::{IndexEntry, IndexManifest};
use crate::normalizer::extract_search_text;
use crate::store::{IndexCache, IndexView, LoadResult, BLOB_FILE, MANIFEST_FILE};
use crate::verify::read_document;
use crate::{Progress, ProgressFn, Side};

/// Прогресс отдаётся раз в столько документов.
const PROGRESS_EVERY: u64 = 32;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub original_dir: PathBuf,
    pub translated_dir: PathBuf,
    pub force_rebuild: bool,
}

/// Завершение или кооперативная отмена. Отмена — не ошибка.
#[derive(Debug)]
pub enum BuildOutcome {
    Completed(BuildStats),
    Cancelled,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildStats {
    pub total: u64,
    pub reused: u64,
    pub recomputed: u64,
    pub unreadable: u64,
}

/// Документ корпуса: объединение сторон по относительному пути.
struct DocPaths {
    rel_path: String,
    original: Option<PathBuf>,
    translated: Option<PathBuf>,
}

impl DocPaths {
    fn path(&self, side: Side) -> Option<&PathBuf> {
        match side {
            Side::Original => self.original.as_ref(),
            Side::Translated => self.translated.as_ref(),
        }
    }

    fn side_count(&self) -> u64 {
        self.original.is_some() as u64 + self.translated.is_some() as u64
    }
}

/// Построить или обновить индекс корпуса. Блоки неизменившихся файлов
/// копируются байтами из прежнего поколения, смещения и id назначаются
/// заново при каждой сборке.
pub fn build_or_update(
    cache: &IndexCache,
    opts: &BuildOptions,
    progress: Option<&ProgressFn>,
    cancel: &CancellationToken,
) -> Result<BuildOutcome> {
    // единственный билдер на процесс; читатели этот замок не берут
    let _exclusive = cache.build_gate();

    let prior = match cache.load()? {
        LoadResult::Valid(view) => {
            if opts.force_rebuild {
                tracing::info!("forced rebuild, prior generation ignored");
                None
            } else {
                Some(view)
            }
        }
        LoadResult::Invalid(reason) => {
            tracing::info!(%reason, "no reusable index, full rebuild");
            None
        }
    };

    report(progress, 0, 0, "scan");
    let docs = enumerate_corpus(&opts.original_dir, &opts.translated_dir)?;
    let total: u64 = docs.values().map(DocPaths::side_count).sum();
    report(progress, 0, total, "scan");

    let blob_tmp = cache.root().join(format!("{BLOB_FILE}.tmp"));
    let manifest_tmp = cache.root().join(format!("{MANIFEST_FILE}.tmp"));

    let outcome = write_generation(
        cache,
        &docs,
        prior.as_ref(),
        &blob_tmp,
        &manifest_tmp,
        total,
        progress,
        cancel,
    );
    match outcome {
        Ok(Some(stats)) => {
            report(progress, total, total, "publish");
            tracing::info!(
                total = stats.total,
                reused = stats.reused,
                recomputed = stats.recomputed,
                "index generation published"
            );
            Ok(BuildOutcome::Completed(stats))
        }
        Ok(None) => {
            remove_temps(&blob_tmp, &manifest_tmp);
            Ok(BuildOutcome::Cancelled)
        }
        Err(e) => {
            remove_temps(&blob_tmp, &manifest_tmp);
            Err(e)
        }
    }
}

/// Пишет новое поколение во временные файлы и публикует его.
/// `Ok(None)` — кооперативная отмена между документами.
#[allow(clippy::too_many_arguments)]
fn write_generation(
    cache: &IndexCache,
    docs: &BTreeMap<String, DocPaths>,
    prior: Option<&IndexView>,
    blob_tmp: &Path,
    manifest_tmp: &Path,
    total: u64,
    progress: Option<&ProgressFn>,
    cancel: &CancellationToken,
) -> Result<Option<BuildStats>> {
    let prior_entries: HashMap<(String, Side), &IndexEntry> = prior
        .map(|view| {
            view.manifest
                .entries
                .iter()
                .map(|e| ((e.rel_path.to_lowercase(), e.side), e))
                .collect()
        })
        .unwrap_or_default();

    let mut writer = BufWriter::new(
        File::create(blob_tmp).with_context(|| format!("create {}", blob_tmp.display()))?,
    );
    let mut manifest = IndexManifest::new_generation(cache.root_key());
    let mut stats = BuildStats::default();
    let mut next_id = 0u32;
    let mut offset = 0u64;

    for (key, doc) in docs {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        for side in Side::ALL {
            let Some(abs) = doc.path(side) else { continue };
            let fingerprint = file_fingerprint(abs);

            let reused = prior.and_then(|view| {
                let prev = prior_entries.get(&(key.clone(), side))?;
                let (ticks, len) = fingerprint?;
                (prev.last_write_utc_ticks == ticks && prev.length_bytes == len)
                    .then(|| copy_prior_block(view, prev))
            });

            let (ticks, len) = fingerprint.unwrap_or((0, 0));
            let block_bytes = match reused {
                Some(bytes) => {
                    stats.reused += 1;
                    bytes
                }
                None => {
                    stats.recomputed += 1;
                    let text = match read_document(abs) {
                        Some(raw) => extract_search_text(&raw),
                        None => {
                            // нечитаемый источник индексируем как присутствующий,
                            // но пустой; сборку это не валит
                            stats.unreadable += 1;
                            tracing::warn!(path = %abs.display(), "unreadable source, indexed empty");
                            String::new()
                        }
                    };
                    BloomBlock::build_from_text(&text).to_bytes()
                }
            };

            writer
                .write_all(&block_bytes)
                .with_context(|| format!("write block for {}", doc.rel_path))?;
            manifest.entries.push(IndexEntry {
                id: next_id,
                rel_path: doc.rel_path.clone(),
                side,
                last_write_utc_ticks: ticks,
                length_bytes: len,
                bloom_offset: offset,
            });
            next_id += 1;
            offset += BLOOM_BLOCK_BYTES as u64;
            stats.total += 1;
            if stats.total % PROGRESS_EVERY == 0 {
                report(progress, stats.total, total, "index");
            }
        }
    }
    report(progress, stats.total, total, "index");
    if cancel.is_cancelled() {
        return Ok(None);
    }

    writer.flush().context("flush blob")?;
    let blob_file = writer.into_inner().map_err(|e| e.into_error())?;
    blob_file.sync_all().context("sync blob")?;
    drop(blob_file);

    let json = serde_json::to_vec_pretty(&manifest).context("encode manifest")?;
    fs::write(manifest_tmp, json).with_context(|| format!("write {}", manifest_tmp.display()))?;

    cache.publish(manifest_tmp, blob_tmp)?;
    Ok(Some(stats))
}

/// Байт-копия блока прежнего поколения. Диапазон уже проверен валидацией
/// манифеста при загрузке.
fn copy_prior_block(view: &IndexView, entry: &IndexEntry) -> Vec<u8> {
    let start = entry.bloom_offset as usize;
    view.blob[start..start + BLOOM_BLOCK_BYTES].to_vec()
}

/// (тики, длина) файла; None — stat не удался.
fn file_fingerprint(path: &Path) -> Option<(i64, i64)> {
    let meta = fs::metadata(path).ok()?;
    let ticks = meta
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_nanos() / 100) as i64)
        .unwrap_or(0);
    Some((ticks, meta.len() as i64))
}

/// Обход обеих сторон: объединение по относительному пути с прямыми слэшами,
/// ключ без учёта регистра. BTreeMap даёт детерминированный порядок блоков.
fn enumerate_corpus(
    original_dir: &Path,
    translated_dir: &Path,
) -> Result<BTreeMap<String, DocPaths>> {
    let mut docs: BTreeMap<String, DocPaths> = BTreeMap::new();
    collect_side(original_dir, Side::Original, &mut docs)?;
    collect_side(translated_dir, Side::Translated, &mut docs)?;
    Ok(docs)
}

fn collect_side(
    dir: &Path,
    side: Side,
    docs: &mut BTreeMap<String, DocPaths>,
) -> Result<()> {
    if !dir.is_dir() {
        // отсутствующая сторона — пустая сторона
        return Ok(());
    }
    let mut stack = vec![dir.to_path_buf()];
    while let Some(cur) = stack.pop() {
        for entry in fs::read_dir(&cur).with_context(|| format!("read dir {}", cur.display()))? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let is_xml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("xml"));
            if !is_xml {
                continue;
            }
            let rel = path
                .strip_prefix(dir)
                .expect("walked path is under its base")
                .to_string_lossy()
                .replace('\\', "/");
            let slot = docs.entry(rel.to_lowercase()).or_insert_with(|| DocPaths {
                rel_path: rel,
                original: None,
                translated: None,
            });
            match side {
                Side::Original => slot.original = Some(path),
                Side::Translated => slot.translated = Some(path),
            }
        }
    }
    Ok(())
}

fn remove_temps(blob_tmp: &Path, manifest_tmp: &Path) {
    let _ = fs::remove_file(blob_tmp);
    let _ = fs::remove_file(manifest_tmp);
}

fn report(progress: Option<&ProgressFn>, done: u64, total: u64, phase: &'static str) {
    if let Some(cb) = progress {
        cb(Progress { done, total, phase });
    }
}
