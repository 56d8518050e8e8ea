//! # Discovery
//! The initial walk of the source tree, seeding the catalog with one
//! `status = new` row per regular file on the first run against a
//! destination.
//!
//! The walk is staged through a `<dest>-filelist.txt` file which is removed
//! once the rows are ingested, so an interrupted discovery leaves an
//! inspectable trace instead of a half-seeded catalog.
use std::{
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use walkdir::{DirEntry, WalkDir};

use crate::{
    db::{Catalog, FileRecord},
    identify::promote_mime,
    logger::{debug, info},
};

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

/// All regular files under `source_dir` as source-relative paths, skipping
/// dotfile path components and Windows thumbnail caches.
pub fn source_files(source_dir: &Path) -> Vec<String> {
    let mut files = Vec::new();
    for entry in WalkDir::new(source_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry))
    {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() || entry.file_name() == "Thumbs.db" {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(source_dir) {
            files.push(rel.to_string_lossy().into_owned());
        }
    }
    files
}

fn filelist_path(dest_dir: &Path) -> PathBuf {
    let dest = dest_dir.to_string_lossy();
    PathBuf::from(format!("{}-filelist.txt", dest.trim_end_matches('/')))
}

/// Walk the source tree and bulk-insert the seed rows. Returns the number
/// of rows inserted.
pub fn discover(catalog: &mut Catalog, source_dir: &Path, dest_dir: &Path) -> Result<usize> {
    info!("Discovering files under '{}'", source_dir.display());

    let filelist = filelist_path(dest_dir);
    {
        let file = File::create(&filelist)
            .with_context(|| format!("Failed to create '{}'", filelist.display()))?;
        let mut writer = BufWriter::new(file);
        for path in source_files(source_dir) {
            writeln!(writer, "{path}")?;
        }
        writer.flush()?;
    }

    let mut records = Vec::new();
    let reader = BufReader::new(
        File::open(&filelist).with_context(|| format!("Failed to read '{}'", filelist.display()))?,
    );
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let mut record = FileRecord::new(line);
        // identification is still pending here, but the well-known
        // registry-id promotions belong to ingest
        record.mime = promote_mime(record.puid.as_deref(), record.mime.take());
        records.push(record);
    }

    let inserted = catalog.append_rows(&records)?;
    debug!("Ingested {inserted} of {} discovered files", records.len());
    fs::remove_file(&filelist)
        .with_context(|| format!("Failed to remove '{}'", filelist.display()))?;
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Filter;

    fn touch(root: &Path, rel: &str) {
        let abs = root.join(rel);
        fs::create_dir_all(abs.parent().unwrap()).unwrap();
        fs::write(abs, "x").unwrap();
    }

    #[test]
    fn walk_skips_hidden_and_thumbnails() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "a/one.txt");
        touch(tmp.path(), "a/.hidden");
        touch(tmp.path(), ".git/config");
        touch(tmp.path(), "b/Thumbs.db");
        touch(tmp.path(), "b/two.pdf");

        let files = source_files(tmp.path());
        assert_eq!(files, vec!["a/one.txt", "b/two.pdf"]);
    }

    #[test]
    fn discover_seeds_catalog_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("tree");
        let dest = tmp.path().join("out");
        touch(&source, "x.txt");
        touch(&source, "sub/y.txt");
        fs::create_dir_all(&dest).unwrap();

        let db_path = tmp.path().join("catalog.db");
        let mut catalog = Catalog::open(&db_path).unwrap();
        let inserted = discover(&mut catalog, &source, &dest).unwrap();
        assert_eq!(inserted, 2);
        assert!(!filelist_path(&dest).exists());

        // re-running discovery is idempotent
        let inserted = discover(&mut catalog, &source, &dest).unwrap();
        assert_eq!(inserted, 0);
        assert_eq!(catalog.count(&Filter::default()).unwrap(), 2);
    }
}
