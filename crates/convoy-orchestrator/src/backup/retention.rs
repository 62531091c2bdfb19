//! Tiered retention: which of a service's artifacts survive a prune.
//!
//! Kept: the newest `keep_last` (never fewer than one), plus the newest
//! artifact of each of the `keep_daily` most recent calendar days (UTC), plus
//! the newest artifact of each of the `keep_weekly` most recent ISO weeks.
//! Pinned artifacts are handled by the caller and never reach this function's
//! delete list.

use chrono::Datelike;
use rustc_hash::FxHashSet;

use convoy_core::config::BackupConfig;
use convoy_core::types::BackupArtifact;

/// Ids to keep out of `artifacts` (one service's unpinned artifacts).
pub fn select_retained(artifacts: &[BackupArtifact], policy: &BackupConfig) -> FxHashSet<String> {
    let mut newest_first: Vec<&BackupArtifact> = artifacts.iter().collect();
    newest_first.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    let mut keep = FxHashSet::default();
    let keep_last = policy.keep_last.max(1) as usize;
    for artifact in newest_first.iter().take(keep_last) {
        keep.insert(artifact.id.clone());
    }

    let mut days = FxHashSet::default();
    for artifact in &newest_first {
        if days.len() >= policy.keep_daily as usize {
            break;
        }
        if days.insert(artifact.created_at.date_naive()) {
            keep.insert(artifact.id.clone());
        }
    }

    let mut weeks = FxHashSet::default();
    for artifact in &newest_first {
        if weeks.len() >= policy.keep_weekly as usize {
            break;
        }
        let week = artifact.created_at.iso_week();
        if weeks.insert((week.year(), week.week())) {
            keep.insert(artifact.id.clone());
        }
    }

    keep
}
