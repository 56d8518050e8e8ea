//! # Integrity check
//! Optional reconciliation between the catalog's original records and the
//! files actually present under the source root, run before conversion.
use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;

use crate::{
    db::{Catalog, FileRecord, Filter},
    discover::source_files,
    logger::{info, warn},
    output::owriteln,
    term::Choice,
};

/// Divergent paths are listed in full only when each side is this small.
const LISTING_LIMIT: usize = 20;

/// Paths present on exactly one side: `(on disk only, in catalog only)`.
fn divergence(catalog: &Catalog, source_dir: &Path) -> Result<(Vec<String>, Vec<String>)> {
    let disk: BTreeSet<String> = source_files(source_dir).into_iter().collect();

    let mut recorded = BTreeSet::new();
    let filter = Filter {
        originals_only: true,
        ..Filter::default()
    };
    catalog.for_each(&filter, |record| {
        recorded.insert(record.path);
        true
    })?;

    let on_disk_only = disk.difference(&recorded).cloned().collect();
    let in_catalog_only = recorded.difference(&disk).cloned().collect();
    Ok((on_disk_only, in_catalog_only))
}

fn add_to_catalog(catalog: &mut Catalog, on_disk_only: &[String]) -> Result<()> {
    let records: Vec<FileRecord> = on_disk_only
        .iter()
        .map(|path| FileRecord::new(path.clone()))
        .collect();
    let inserted = catalog.append_rows(&records)?;
    info!("Added {inserted} rows to the catalog");
    Ok(())
}

/// Bring both sides in line by removal: unrecorded files are deleted from
/// disk, rows without a file are dropped from the catalog (by path).
fn delete_divergent(
    catalog: &mut Catalog,
    source_dir: &Path,
    on_disk_only: &[String],
    in_catalog_only: &[String],
) -> Result<()> {
    for path in on_disk_only {
        if let Err(err) = std::fs::remove_file(source_dir.join(path)) {
            warn!("Failed to delete '{path}': {err}");
        }
    }
    for path in in_catalog_only {
        if let Some(id) = catalog.id_by_path(path)? {
            catalog.delete(id)?;
        }
    }
    info!(
        "Deleted {} files and {} rows",
        on_disk_only.len(),
        in_catalog_only.len()
    );
    Ok(())
}

/// Compare catalog and filesystem and let the operator resolve any
/// difference. Returns `false` when the run should be aborted.
pub fn run(catalog: &mut Catalog, source_dir: &Path, no_interactive: bool) -> Result<bool> {
    let (on_disk_only, in_catalog_only) = divergence(catalog, source_dir)?;
    if on_disk_only.is_empty() && in_catalog_only.is_empty() {
        info!("Catalog matches the files on disk");
        return Ok(true);
    }

    owriteln!(
        "{} files on disk not in the catalog, {} catalog rows without a file.",
        on_disk_only.len(),
        in_catalog_only.len()
    )?;
    if on_disk_only.len() <= LISTING_LIMIT && in_catalog_only.len() <= LISTING_LIMIT {
        for path in &on_disk_only {
            owriteln!("  only on disk: {path}")?;
        }
        for path in &in_catalog_only {
            owriteln!("  only in catalog: {path}")?;
        }
    }

    if no_interactive {
        warn!("Continuing despite catalog divergence");
        return Ok(true);
    }

    let answer = Choice::new(
        "How should the difference be resolved?",
        &[
            ('c', "ontinue"),
            ('a', "bort"),
            ('d', " add to catalog"),
            ('x', " delete divergent"),
        ],
    )
    .ask()?;
    match answer {
        'a' => Ok(false),
        'd' => {
            add_to_catalog(catalog, &on_disk_only)?;
            Ok(true)
        }
        'x' => {
            delete_divergent(catalog, source_dir, &on_disk_only, &in_catalog_only)?;
            Ok(true)
        }
        _ => Ok(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Catalog) {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("source")).unwrap();
        let catalog = Catalog::open(tmp.path().join("catalog.db")).unwrap();
        (tmp, catalog)
    }

    fn touch(root: &Path, rel: &str) {
        let abs = root.join(rel);
        std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
        std::fs::write(abs, "x").unwrap();
    }

    #[test]
    fn divergence_reports_both_sides() {
        let (tmp, mut catalog) = setup();
        let source = tmp.path().join("source");
        touch(&source, "both.txt");
        touch(&source, "disk-only.txt");
        catalog.insert(&FileRecord::new("both.txt")).unwrap();
        catalog.insert(&FileRecord::new("gone.txt")).unwrap();

        let (on_disk, in_catalog) = divergence(&catalog, &source).unwrap();
        assert_eq!(on_disk, vec!["disk-only.txt"]);
        assert_eq!(in_catalog, vec!["gone.txt"]);
    }

    #[test]
    fn derived_rows_are_not_compared() {
        let (tmp, mut catalog) = setup();
        let source = tmp.path().join("source");
        touch(&source, "a.zip");
        let id = catalog.insert(&FileRecord::new("a.zip")).unwrap();
        let mut child = FileRecord::new("a/inner.txt");
        child.source_id = Some(id);
        catalog.insert(&child).unwrap();

        let (on_disk, in_catalog) = divergence(&catalog, &source).unwrap();
        assert!(on_disk.is_empty());
        assert!(in_catalog.is_empty());
    }

    #[test]
    fn add_action_seeds_missing_rows() {
        let (tmp, mut catalog) = setup();
        let source = tmp.path().join("source");
        touch(&source, "fresh.txt");

        let (on_disk, _) = divergence(&catalog, &source).unwrap();
        add_to_catalog(&mut catalog, &on_disk).unwrap();
        let (on_disk, in_catalog) = divergence(&catalog, &source).unwrap();
        assert!(on_disk.is_empty());
        assert!(in_catalog.is_empty());
    }

    #[test]
    fn delete_action_reconciles_both_sides() {
        let (tmp, mut catalog) = setup();
        let source = tmp.path().join("source");
        touch(&source, "unrecorded.txt");
        catalog.insert(&FileRecord::new("phantom.txt")).unwrap();

        let (on_disk, in_catalog) = divergence(&catalog, &source).unwrap();
        delete_divergent(&mut catalog, &source, &on_disk, &in_catalog).unwrap();

        assert!(!source.join("unrecorded.txt").exists());
        assert!(catalog.id_by_path("phantom.txt").unwrap().is_none());
        let (on_disk, in_catalog) = divergence(&catalog, &source).unwrap();
        assert!(on_disk.is_empty());
        assert!(in_catalog.is_empty());
    }
}
