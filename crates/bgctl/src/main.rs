// Файл: crates/bgctl/src/main.rs
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use bloomgrep_index::builder::{build_or_update, BuildOptions, BuildOutcome};
use bloomgrep_index::cooccur::{compute_associations, AssocMetric};
use bloomgrep_index::search::{search_all, SearchOutcome, SearchRequest};
use bloomgrep_index::store::IndexCache;
use bloomgrep_index::{Progress, ProgressFn, ResultGroup, SearchHit, Side};

#[derive(Parser)]
#[command(version, about = "Bloomgrep control: build/search bitext bloom index")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Построить или инкрементально обновить индекс корпуса
    Build {
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        orig: PathBuf,
        #[arg(long)]
        trans: PathBuf,
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Поиск подстроки по корпусу
    Search {
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        orig: PathBuf,
        #[arg(long)]
        trans: PathBuf,
        #[arg(long)]
        q: String,
        /// Стороны: orig | trans | both
        #[arg(long, default_value = "both")]
        sides: String,
        #[arg(long, default_value_t = 24)]
        context: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 8)]
        parallelism: usize,
        #[arg(long, default_value_t = false)]
        debug_metrics: bool,
    },
    /// Кооккуренции по окнам найденных вхождений
    Assoc {
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        orig: PathBuf,
        #[arg(long)]
        trans: PathBuf,
        #[arg(long)]
        q: String,
        #[arg(long, default_value_t = 24)]
        context: usize,
        /// freq | range | dispersion | dominance | pmi | logdice | tscore
        #[arg(long, default_value = "dispersion")]
        metric: String,
        #[arg(long, default_value_t = 20)]
        top: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Build {
            root,
            orig,
            trans,
            force,
        } => {
            let cache = IndexCache::new(&root);
            let opts = BuildOptions {
                original_dir: orig,
                translated_dir: trans,
                force_rebuild: force,
            };
            let progress: ProgressFn = Arc::new(|p: Progress| {
                eprintln!("[{}] {}/{}", p.phase, p.done, p.total);
            });
            match build_or_update(&cache, &opts, Some(&progress), &CancellationToken::new())? {
                BuildOutcome::Completed(stats) => {
                    println!(
                        "entries={} reused={} recomputed={} unreadable={}",
                        stats.total, stats.reused, stats.recomputed, stats.unreadable
                    );
                }
                BuildOutcome::Cancelled => bail!("build cancelled"),
            }
        }
        Cmd::Search {
            root,
            orig,
            trans,
            q,
            sides,
            context,
            limit,
            parallelism,
            debug_metrics,
        } => {
            let groups = run_search(&root, orig, trans, &q, &sides, context, parallelism).await?;
            let mut shown = 0usize;
            let mut hits_total = 0usize;
            for group in &groups {
                hits_total += group.hit_count();
                for (side, hit) in labelled_hits(group) {
                    if shown >= limit {
                        break;
                    }
                    println!("{}\t{}\t{}", group.rel_path, side.label(), highlight(hit));
                    shown += 1;
                }
            }
            if debug_metrics {
                eprintln!(
                    "groups_total={} hits_total={} shown={}",
                    groups.len(),
                    hits_total,
                    shown
                );
            }
        }
        Cmd::Assoc {
            root,
            orig,
            trans,
            q,
            context,
            metric,
            top,
        } => {
            let metric: AssocMetric = metric.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let groups = run_search(&root, orig, trans, &q, "both", context, 8).await?;
            let report = compute_associations(&groups, &q, context, metric, top);
            println!("windows={}", report.windows);
            println!("-- chars --");
            for row in &report.chars {
                println!("{}\t{:.4}\tf={}\tr={}", row.key, row.score, row.freq, row.range);
            }
            println!("-- ngrams --");
            for row in &report.ngrams {
                println!("{}\t{:.4}\tf={}\tr={}", row.key, row.score, row.freq, row.range);
            }
            if !report.dominant.is_empty() {
                println!("-- dominant --");
                for row in &report.dominant {
                    println!("{}\t{:.2}\tf={}", row.key, row.score, row.freq);
                }
            }
        }
    }
    Ok(())
}

async fn run_search(
    root: &PathBuf,
    orig: PathBuf,
    trans: PathBuf,
    q: &str,
    sides: &str,
    context: usize,
    parallelism: usize,
) -> Result<Vec<ResultGroup>> {
    let (include_original, include_translated) = match sides {
        "orig" => (true, false),
        "trans" => (false, true),
        "both" => (true, true),
        other => bail!("unknown --sides value: {other}"),
    };
    let cache = Arc::new(IndexCache::new(root));
    let req = SearchRequest {
        query: q.to_string(),
        original_dir: orig,
        translated_dir: trans,
        include_original,
        include_translated,
        context_width: context,
        select_parallelism: parallelism,
        verify_parallelism: parallelism,
    };
    match search_all(&cache, &req, None, None, None, &CancellationToken::new()).await? {
        SearchOutcome::Completed(groups) => Ok(groups),
        SearchOutcome::Cancelled => bail!("search cancelled"),
    }
}

fn labelled_hits(group: &ResultGroup) -> impl Iterator<Item = (Side, &SearchHit)> {
    group
        .original_hits
        .iter()
        .map(|h| (Side::Original, h))
        .chain(group.translated_hits.iter().map(|h| (Side::Translated, h)))
}

/// Сниппет с подсветкой матча скобками, как выводит поиск по сегментам.
fn highlight(hit: &SearchHit) -> String {
    format!("…{}[{}]{}…", hit.left, hit.matched, hit.right)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
