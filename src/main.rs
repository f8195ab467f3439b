use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, warn};

use prompt_index::database;
use prompt_index::database::repo::RecordImporter;
use prompt_index::database::tokens::{IndexMode, TokenIndexer};
use prompt_index::grouping::engine::{GroupSet, IndexOptions};
use prompt_index::grouping::folders;
use prompt_index::grouping::index::GroupIndex;
use prompt_index::ingest::records::{load_records, load_style_map};
use prompt_index::ingest::repair;
use prompt_index::text::frequency::{FrequencyTable, TokenCounts, TokenReport};
use prompt_index::text::style::{derive_style_map, StyleStrings};
use prompt_index::utils::config::{get_settings, groups_dir_for};

const PREVIEW_CHARS: usize = 5000;

#[derive(Parser, Debug)]
#[command(author, version, about = "Token index and prompt grouping for scraped gallery metadata", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Learn the boilerplate string of every art style
    Styles {
        #[arg(long, value_name = "FILE")]
        results: Option<PathBuf>,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Count prompt tokens into a JSON report
    Tokens {
        #[arg(long, value_name = "FILE")]
        results: Option<PathBuf>,
        #[arg(long, value_name = "FILE")]
        styles: Option<PathBuf>,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Import scraped records (and learned styles) into the database
    Import {
        #[arg(long, value_name = "FILE")]
        results: Option<PathBuf>,
        #[arg(long, value_name = "FILE")]
        styles: Option<PathBuf>,
        #[arg(short, long, value_name = "FILE")]
        db: Option<PathBuf>,
    },

    /// Rebuild the token table, or add counts for new images with --update
    Index {
        /// Incremental update instead of a full rebuild
        #[arg(long)]
        update: bool,
        #[arg(short, long, value_name = "FILE")]
        db: Option<PathBuf>,
        /// Images per committed transaction
        #[arg(long, default_value_t = 1000)]
        batch_size: usize,
    },

    /// Group images by identical prompt + negative prompt
    Group {
        #[arg(long, value_name = "FILE")]
        results: Option<PathBuf>,
        #[arg(long, value_name = "DIR")]
        images_dir: Option<PathBuf>,
        /// Where per-group folders go (default: beside the images directory)
        #[arg(long, value_name = "DIR")]
        groups_dir: Option<PathBuf>,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Create one folder per group, named by its hash
        #[arg(long)]
        make_folders: bool,
        /// Copy images into the group folders (implies --make-folders)
        #[arg(long)]
        copy: bool,
        /// Only read the first N records
        #[arg(long)]
        limit: Option<usize>,
        /// Drop groups with fewer images
        #[arg(long, default_value_t = 1)]
        min_count: usize,
        /// Hex characters of the hash used as folder name
        #[arg(long, default_value_t = 10)]
        slug_length: usize,
        /// Print the index instead of writing files or folders
        #[arg(long)]
        dry_run: bool,
    },

    /// Recover the first JSON array from a corrupted results file
    Repair {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let settings = get_settings()?;

    match args.command {
        Command::Styles { results, output } => {
            let results = results.unwrap_or_else(|| settings.results());
            let output = output.unwrap_or_else(|| settings.style_map());
            run_styles(&results, &output)
        }
        Command::Tokens {
            results,
            styles,
            output,
        } => {
            let results = results.unwrap_or_else(|| settings.results());
            let styles = styles.unwrap_or_else(|| settings.style_map());
            let output = output.unwrap_or_else(|| settings.tokens_output());
            run_tokens(&results, &styles, &output)
        }
        Command::Import {
            results,
            styles,
            db,
        } => {
            let results = results.unwrap_or_else(|| settings.results());
            let styles = styles.unwrap_or_else(|| settings.style_map());
            let db = db.unwrap_or_else(|| settings.db_path.clone());
            run_import(&results, &styles, &db)
        }
        Command::Index {
            update,
            db,
            batch_size,
        } => {
            let db = db.unwrap_or_else(|| settings.db_path.clone());
            let mode = if update {
                IndexMode::Incremental
            } else {
                IndexMode::Rebuild
            };
            run_index(&db, mode, batch_size)
        }
        Command::Group {
            results,
            images_dir,
            groups_dir,
            output,
            make_folders,
            copy,
            limit,
            min_count,
            slug_length,
            dry_run,
        } => run_group(GroupArgs {
            results: results.unwrap_or_else(|| settings.results()),
            images_dir: images_dir.unwrap_or_else(|| settings.images_dir.clone()),
            groups_dir,
            output: output.unwrap_or_else(|| settings.grouped_output()),
            make_folders: make_folders || copy,
            copy,
            limit,
            options: IndexOptions {
                min_count,
                slug_length,
            },
            dry_run,
        }),
        Command::Repair { file } => {
            let file = file.unwrap_or_else(|| settings.results());
            let repaired = repair::repair_file(&file)?;
            info!(
                "Saved repaired file with {} items to {:?}",
                repaired.items.len(),
                file
            );
            Ok(())
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}

fn log_top(label: &str, table: &FrequencyTable) {
    let top = table.top(10);
    if top.is_empty() {
        return;
    }
    info!("Top {} most common {} tokens:", top.len(), label);
    for (token, count) in top {
        info!("  {:6}x  {}", count, preview(token));
    }
}

fn run_styles(results: &Path, output: &Path) -> Result<()> {
    let records = load_records(results, None)?;
    info!("Loaded {} records", records.len());

    let map = derive_style_map(&records);
    write_json(output, &map)?;
    info!("Processed {} styles. Results saved to {:?}", map.len(), output);
    Ok(())
}

fn run_tokens(results: &Path, styles: &Path, output: &Path) -> Result<()> {
    let records = load_records(results, None)?;
    let style_map = load_style_map(styles)?;
    let style_strings = StyleStrings::from(&style_map);
    info!(
        "Loaded {} results and {} style strings",
        records.len(),
        style_strings.len()
    );

    let counts = TokenCounts::from_records(&records, &style_strings);
    let report = TokenReport::from(&counts);
    write_json(output, &report)?;

    let stats = report.stats;
    info!("Results saved to {:?}", output);
    info!("  Unique prompt tokens: {}", stats.unique_prompt_tokens);
    info!("  Unique negative prompt tokens: {}", stats.unique_negative_tokens);
    info!("  Total prompt token occurrences: {}", stats.total_prompt_occurrences);
    info!("  Total negative prompt token occurrences: {}", stats.total_negative_occurrences);
    log_top("prompt", &counts.positive);
    log_top("negative prompt", &counts.negative);
    Ok(())
}

fn run_import(results: &Path, styles: &Path, db: &Path) -> Result<()> {
    let records = load_records(results, None)?;
    info!("Found {} records in {:?}", records.len(), results);

    let mut importer = RecordImporter::new(&db.to_string_lossy())?;

    if styles.exists() {
        let style_map = load_style_map(styles)?;
        let updated = importer.import_styles(&style_map)?;
        info!("{} art styles updated", updated);
    } else {
        warn!("{:?} not found, skipping style strings", styles);
    }

    let progress = ProgressBar::new(records.len() as u64);
    progress.set_style(ProgressStyle::with_template(
        "{bar:40.cyan/blue} {pos}/{len} records {msg}",
    )?);
    for record in records {
        importer.add(record)?;
        progress.inc(1);
    }
    let summary = importer.finish()?;
    progress.finish_and_clear();

    info!(
        "Complete: {} images inserted, {} already present, {} skipped without filename",
        summary.inserted, summary.existing, summary.skipped
    );
    for (table, count) in database::table_counts(importer.connection())? {
        info!("  {}: {} rows", table, count);
    }
    Ok(())
}

fn run_index(db: &Path, mode: IndexMode, batch_size: usize) -> Result<()> {
    info!("=== {:?} ===", mode);
    let mut conn = database::open(&db.to_string_lossy())?;

    let progress = ProgressBar::new(0);
    progress.set_style(ProgressStyle::with_template(
        "{bar:40.cyan/blue} {pos}/{len} images {msg}",
    )?);
    let summary = TokenIndexer::new()
        .with_batch_size(batch_size)
        .with_progress(progress)
        .run(&mut conn, mode)?;

    let stats = summary.counts.stats();
    info!("Processed {} images", summary.images);
    info!("  Tokens before: {}", summary.tokens_before);
    info!("  Tokens after: {}", summary.tokens_after);
    info!("  New tokens added: {}", summary.new_tokens());
    info!("  Token links written: {}", summary.links);
    info!("  Prompt token occurrences: {}", stats.total_prompt_occurrences);
    info!("  Negative prompt token occurrences: {}", stats.total_negative_occurrences);
    if summary.skipped_tokens > 0 {
        warn!("  Skipped {} tokens rejected by the store", summary.skipped_tokens);
    }
    log_top("prompt", &summary.counts.positive);
    log_top("negative prompt", &summary.counts.negative);
    Ok(())
}

struct GroupArgs {
    results: PathBuf,
    images_dir: PathBuf,
    groups_dir: Option<PathBuf>,
    output: PathBuf,
    make_folders: bool,
    copy: bool,
    limit: Option<usize>,
    options: IndexOptions,
    dry_run: bool,
}

fn run_group(args: GroupArgs) -> Result<()> {
    // Both inputs are read before anything is written.
    let records = load_records(&args.results, args.limit)?;
    let prior = GroupIndex::load(&args.output)?;

    let mut groups = match &prior {
        Some(index) => {
            info!(
                "Merging into {} existing groups from {:?}",
                index.group_count, args.output
            );
            GroupSet::from_index(index)
        }
        None => GroupSet::new(),
    };
    let mut batch = GroupSet::new();
    batch.extend(&records);
    groups.merge(&batch);

    let index = groups.build_index(args.options, &args.results.display().to_string());
    info!(
        "{} records → {} groups, {} orphans",
        records.len(),
        index.group_count,
        index.orphans.len()
    );

    if args.dry_run {
        let json = serde_json::to_string_pretty(&index)?;
        println!("{}", json.chars().take(PREVIEW_CHARS).collect::<String>());
        info!("Dry-run only; no files were changed.");
        return Ok(());
    }

    if args.make_folders {
        let groups_dir = args
            .groups_dir
            .unwrap_or_else(|| groups_dir_for(&args.images_dir));
        folders::materialize(&index.groups, &args.images_dir, &groups_dir, args.copy)?;
    }

    index.save(&args.output)?;
    info!("Wrote {} groups to {:?}", index.group_count, args.output);
    Ok(())
}
