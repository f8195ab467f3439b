use std::fs;
use std::path::{Component, Path};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::grouping::index::GroupEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeSummary {
    pub folders: usize,
    pub copied: usize,
    pub missing: usize,
    pub already_present: usize,
    /// Filenames that are not a single plain path component.
    pub rejected: usize,
}

/// True when `filename` names an entry directly inside a directory: one
/// normal component, no separators, no `..`, no root or drive prefix.
fn is_plain_filename(filename: &str) -> bool {
    let mut components = Path::new(filename).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Creates `<groups_dir>/<slug>` for every group and, with `copy`, copies
/// each member image from `images_dir` into it. Safe to re-run: existing
/// destinations are left alone.
pub fn materialize(
    groups: &[GroupEntry],
    images_dir: &Path,
    groups_dir: &Path,
    copy: bool,
) -> Result<MaterializeSummary> {
    fs::create_dir_all(groups_dir)
        .with_context(|| format!("Failed to create directory {:?}", groups_dir))?;

    let mut summary = MaterializeSummary::default();
    for group in groups {
        let folder = groups_dir.join(&group.hash);
        fs::create_dir_all(&folder)
            .with_context(|| format!("Failed to create directory {:?}", folder))?;
        summary.folders += 1;

        if !copy {
            continue;
        }
        for filename in &group.filenames {
            if !is_plain_filename(filename) {
                warn!("{}: refusing unsafe filename {:?}, skipping", group.id, filename);
                summary.rejected += 1;
                continue;
            }
            let src = images_dir.join(filename);
            if !src.exists() {
                warn!("{}: missing source image {:?}, skipping", group.id, src);
                summary.missing += 1;
                continue;
            }
            let dst = folder.join(filename);
            if dst.exists() {
                summary.already_present += 1;
                continue;
            }
            fs::copy(&src, &dst)
                .with_context(|| format!("Failed to copy {:?} → {:?}", src, dst))?;
            summary.copied += 1;
        }
    }

    info!(
        "Materialized {} folders: {} copied, {} already present, {} missing, {} rejected",
        summary.folders, summary.copied, summary.already_present, summary.missing, summary.rejected
    );
    Ok(summary)
}
