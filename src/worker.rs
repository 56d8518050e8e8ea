//! # File worker
//! The per-record conversion state machine.
//!
//! A worker takes one catalog row end-to-end: identification, recipe
//! lookup, acceptance, command invocation, cleanup, and enumeration of
//! derived artifacts. It never touches the catalog; everything it decides is
//! carried in a single [`Outcome`] event for the serialized writer, with
//! derived rows processed inline and linked to their parent either by row
//! id or by index into the event's child list.
use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use walkdir::WalkDir;

use crate::{
    db::{FileRecord, Status},
    identify::Identifier,
    logger::{debug, warn},
    recipe::{Recipe, Registry},
    runner::{self, RunOutcome},
    util,
};

/// Stdout signal emitted by extractors when an archive is encrypted.
const PASSWORD_SIGNAL: &str = "file requires a password for access";

/// Pause after deleting a partial artifact so the filesystem settles before
/// any restore or cleanup touches the same paths.
const SETTLE_PAUSE: Duration = Duration::from_millis(100);

/// Run-scoped state threaded through the scheduler and every worker.
pub struct RunContext {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    /// Scratch root; per-file temp paths preserve the full relative path
    /// under it, so concurrent workers never collide.
    pub temp_dir: PathBuf,
    /// Working directory for converter commands.
    pub config_dir: PathBuf,
    pub registry: Registry,
    pub identifier: Identifier,
    /// Command timeout in seconds when the recipe has no override.
    pub default_timeout: u64,
    pub orig_ext: bool,
    pub set_source_ext: bool,
    pub identify_only: bool,
    pub keep_originals: bool,
    pub debug: bool,
}

/// Link from a derived row to its parent: either an existing catalog row or
/// an earlier entry in the same outcome's child list, to be resolved once
/// the writer has assigned ids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParentRef {
    Row(i64),
    Pending(usize),
}

#[derive(Debug)]
pub struct ChildRecord {
    pub record: FileRecord,
    pub parent: ParentRef,
}

/// Everything one worker invocation decided, applied atomically by the
/// writer.
#[derive(Debug)]
pub struct Outcome {
    pub record: FileRecord,
    pub children: Vec<ChildRecord>,
    /// Drop all previously recorded descendants of `record` first
    /// (reconvert/retry of an already-converted parent).
    pub purge_descendants: bool,
}

/// Drive one catalog row through the full state machine.
pub fn process(ctx: &RunContext, mut record: FileRecord, purge: bool) -> Outcome {
    let derived = record.source_id.is_some();
    let self_ref = ParentRef::Row(record.id);
    let mut children = Vec::new();
    convert_one(ctx, &mut record, self_ref, derived, purge, &mut children);
    Outcome {
        record,
        children,
        purge_descendants: purge,
    }
}

fn convert_one(
    ctx: &RunContext,
    rec: &mut FileRecord,
    self_ref: ParentRef,
    derived: bool,
    purge: bool,
    children: &mut Vec<ChildRecord>,
) {
    let original = !derived && rec.source_id.is_none();
    let source_root = if derived {
        &ctx.dest_dir
    } else {
        &ctx.source_dir
    };
    let mut source_path = source_root.join(&rec.path);

    if rec.mime.is_none() || ctx.identify_only {
        let ident = ctx.identifier.identify(&source_path);
        rec.mime = ident.mime;
        rec.format = ident.format;
        rec.version = ident.version;
        rec.puid = ident.puid;
        rec.encoding = ident.encoding;
        rec.size = ident.size;
    }

    let rel = PathBuf::from(&rec.path);
    let parent_rel = rel.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
    let mut stem = rel
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut ext = rel
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    // Make the extension part of the stem when it is unknown to the mime
    // tables but the identified type implies a standard one. This catches
    // files without a real extension but with a dot in the name, and keeps
    // names like `archive.custom.tar` intact.
    let mime_from_ext = mime_guess::from_path(&rel).first_raw();
    let ext_from_mime = rec
        .mime
        .as_deref()
        .and_then(|m| mime_guess::get_mime_extensions_str(m).and_then(|e| e.first()));
    if !ext.is_empty()
        && mime_from_ext.is_none()
        && ext_from_mime.is_some()
        && !matches!(
            rec.mime.as_deref(),
            None | Some("application/octet-stream") | Some("text/plain")
        )
    {
        stem.push_str(&ext);
        ext.clear();
    }

    let base = rec.mime.as_deref().and_then(|m| ctx.registry.get(m));
    let mime_ext = canonical_ext(base, rec.mime.as_deref());

    // Give source files their canonical extension when --set-source-ext
    if ctx.set_source_ext && original {
        if let Some(mime_ext) = &mime_ext {
            if *mime_ext != ext {
                let new_rel = parent_rel.join(format!("{stem}{mime_ext}"));
                let new_abs = ctx.source_dir.join(&new_rel);
                match util::move_file(&source_path, &new_abs) {
                    Ok(()) => {
                        ext = mime_ext.clone();
                        rec.path = new_rel.to_string_lossy().into_owned();
                        source_path = new_abs;
                    }
                    Err(err) => warn!("Failed to rename '{}': {err}", rec.path),
                }
            }
        }
    }

    if ctx.identify_only {
        return;
    }

    let recipe = base.map(|r| {
        r.refine(
            rec.puid.as_deref(),
            if ext.is_empty() {
                None
            } else {
                Some(ext.as_str())
            },
        )
    });

    let dest_parent = ctx.dest_dir.join(&parent_rel);
    if let Err(err) = fs::create_dir_all(&dest_parent) {
        warn!("Failed to create '{}': {err}", dest_parent.display());
    }
    let temp_path = ctx.temp_dir.join(&rec.path);

    // the destination-relative path of the artifact this record produced
    let mut norm_rel: Option<String> = None;

    if recipe
        .as_ref()
        .is_some_and(|r| r.accepts(rec.version.as_deref(), rec.encoding.as_deref()))
    {
        rec.status = Status::Accepted;
        rec.kept = Some(true);
    } else if rec.mime.as_deref() == Some("application/encrypted") {
        rec.status = Status::Protected;
        rec.kept = Some(true);
    } else if let Some(recipe) = recipe.as_ref().filter(|r| r.command.is_some()) {
        norm_rel = run_conversion(
            ctx,
            rec,
            recipe,
            &source_path,
            &dest_parent,
            &parent_rel,
            &stem,
            &ext,
            &temp_path,
            purge,
        );
    } else if recipe.as_ref().is_some_and(|r| r.keep == Some(false)) {
        rec.status = Status::Removed;
        rec.kept = Some(false);
        // in-place mode: the superseded original would otherwise survive
        // inside the destination tree
        if original && ctx.source_dir == ctx.dest_dir {
            if let Err(err) = util::remove_file_if_exists(&source_path) {
                warn!("Failed to remove '{}': {err}", rec.path);
            }
        }
    } else {
        rec.status = Status::Skipped;
        rec.kept = Some(true);
    }

    if ctx.keep_originals && original {
        rec.kept = Some(true);
    }

    // Copy the original into the destination when it is to be retained:
    // per recipe, accepted/protected, or after a failed conversion. A file
    // with no extension, or with one contradicting its identified type,
    // goes under the canonical name instead.
    let mut copy_rel = rec.path.clone();
    if rec.kept == Some(true) && original {
        let guessed = mime_guess::from_path(Path::new(&rec.path)).first_raw();
        let contradicts = guessed.is_some()
            // an octet-stream guess carries no signal
            && guessed != Some("application/octet-stream")
            && guessed != rec.mime.as_deref()
            && mime_ext.as_deref() != Some(ext.as_str())
            && rec.mime.as_deref() != Some("application/octet-stream")
            && !matches!(
                rec.status,
                Status::Skipped | Status::Failed | Status::Timeout
            );
        if ext.is_empty() || contradicts {
            rec.status = Status::Renamed;
            rec.kept = None;
            let dest_name = format!("{stem}{}", mime_ext.as_deref().unwrap_or(""));
            copy_rel = parent_rel.join(dest_name).to_string_lossy().into_owned();
            norm_rel = Some(copy_rel.clone());
        }
        let copy_path = ctx.dest_dir.join(&copy_rel);
        if ctx.source_dir != ctx.dest_dir {
            if let Err(err) = fs::copy(ctx.source_dir.join(&rec.path), &copy_path) {
                warn!("Failed to copy '{}' to destination: {err}", rec.path);
            }
        } else if rec.status == Status::Renamed {
            if let Err(err) = util::move_file(&source_path, &copy_path) {
                warn!("Failed to rename '{}': {err}", rec.path);
            }
        }
    }

    let Some(norm_rel) = norm_rel else {
        return;
    };
    let artifact_path = ctx.dest_dir.join(&norm_rel);

    // Drop a copy left behind by an earlier failed run, now that this
    // record has been superseded by its conversion.
    if rec.kept == Some(false) {
        let stale = ctx.dest_dir.join(&copy_rel);
        if stale.is_file() && !paths_collide(&stale, &artifact_path) {
            let _ = fs::remove_file(&stale);
        }
    }

    if artifact_path.is_dir() {
        // an archive was extracted: one child per leaf, each run through
        // the same state machine
        let mut walker = WalkDir::new(&artifact_path).sort_by_file_name().into_iter();
        while let Some(entry) = walker.next() {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(child_rel) = entry.path().strip_prefix(&ctx.dest_dir) else {
                continue;
            };
            let child = FileRecord::new(child_rel.to_string_lossy().into_owned());
            recurse_child(ctx, child, self_ref, children);
        }
    } else if rec.status == Status::Converted {
        let mut child = FileRecord::new(norm_rel);
        let ident = ctx.identifier.identify(&artifact_path);
        child.mime = ident.mime;
        child.format = ident.format;
        child.version = ident.version;
        child.puid = ident.puid;
        child.encoding = ident.encoding;
        child.size = ident.size;

        if degenerate(rec, &child) {
            // e.g. ghostscript fell back to writing a plain pdf when the
            // pdf/a conversion was not possible
            debug!("Degenerate conversion for '{}', keeping artifact", rec.path);
            child.status = Status::Failed;
            child.kept = Some(true);
            children.push(ChildRecord {
                record: child,
                parent: self_ref,
            });
        } else {
            recurse_child(ctx, child, self_ref, children);
        }
    } else {
        // renamed copy: record it and give its own recipe a chance
        let child = FileRecord::new(norm_rel);
        recurse_child(ctx, child, self_ref, children);
    }
}

/// Push a derived record and run the state machine on it inline. The child
/// list may grow during recursion; the index taken here stays valid.
fn recurse_child(
    ctx: &RunContext,
    child: FileRecord,
    parent: ParentRef,
    children: &mut Vec<ChildRecord>,
) {
    let index = children.len();
    children.push(ChildRecord {
        record: child,
        parent,
    });
    let mut record = std::mem::take(&mut children[index].record);
    convert_one(
        ctx,
        &mut record,
        ParentRef::Pending(index),
        true,
        false,
        children,
    );
    children[index].record = record;
}

/// Render and run the conversion command, classify the result, and clean
/// up. Returns the destination-relative artifact path on success.
#[allow(clippy::too_many_arguments)]
fn run_conversion(
    ctx: &RunContext,
    rec: &mut FileRecord,
    recipe: &Recipe,
    source_path: &Path,
    dest_parent: &Path,
    parent_rel: &Path,
    stem: &str,
    ext: &str,
    temp_path: &Path,
    purge: bool,
) -> Option<String> {
    let dest_ext = recipe.dest_ext(ext, ctx.orig_ext);
    let dest_name = format!("{stem}{dest_ext}");
    let dest_path = dest_parent.join(&dest_name);

    // reconvert: the previous artifact must go before the command re-runs
    if purge {
        if let Err(err) = util::delete_file_or_dir(&dest_path) {
            warn!("Failed to remove stale artifact '{}': {err}", dest_path.display());
        }
    }

    // In-place conversion: when source and destination collide (case
    // folded), route the source through the scratch area first.
    let mut from_path = source_path.to_path_buf();
    if paths_collide(source_path, &dest_path) {
        if let Some(parent) = temp_path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match util::move_file(source_path, temp_path) {
            Ok(()) => from_path = temp_path.to_path_buf(),
            Err(err) => warn!("Failed to stage '{}' in scratch: {err}", rec.path),
        }
    }

    if recipe.command.as_deref().is_some_and(|c| c.contains("<temp>")) {
        if let Some(parent) = temp_path.parent() {
            let _ = fs::create_dir_all(parent);
        }
    }

    let cmd = recipe
        .render_command(&from_path, &dest_path, temp_path, stem)
        .expect("recipe has a command");
    let timeout = recipe.timeout.unwrap_or(ctx.default_timeout);

    // Skip the command when a destination artifact of a different size is
    // already present: the file was converted manually.
    let manual = fs::metadata(&dest_path)
        .map(|meta| meta.is_file() && Some(meta.len() as i64) != rec.size)
        .unwrap_or(false);
    let out = if manual {
        debug!("Destination for '{}' already present, not converting", rec.path);
        RunOutcome {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    } else {
        runner::run_shell(&cmd, Some(&ctx.config_dir), timeout)
    };

    let norm_rel = if out.exit_code != 0 || !dest_path.exists() {
        // remove a possibly corrupted partial artifact, and give the
        // filesystem a moment before touching the same paths again
        if let Err(err) = util::delete_file_or_dir(&dest_path) {
            warn!("Failed to remove partial artifact '{}': {err}", dest_path.display());
        }
        thread::sleep(SETTLE_PAUSE);

        rec.status = if out.stdout.contains(PASSWORD_SIGNAL) {
            Status::Protected
        } else if out.timed_out() {
            Status::Timeout
        } else {
            Status::Failed
        };

        if ctx.debug {
            warn!("Command: {cmd} ({})", out.exit_code);
            if !out.timed_out() {
                warn!("out: {}", out.stdout.trim_end());
                warn!("err: {}", out.stderr.trim_end());
            }
        }

        // move the source back if it had been staged in scratch
        if from_path != source_path {
            if let Err(err) = util::copy_back(&from_path, source_path) {
                warn!("Failed to restore '{}': {err}", rec.path);
            }
        }
        rec.kept = Some(true);
        None
    } else {
        rec.status = Status::Converted;
        rec.kept = Some(recipe.keep == Some(true));
        Some(parent_rel.join(dest_name).to_string_lossy().into_owned())
    };

    if let Err(err) = util::delete_file_or_dir(temp_path) {
        warn!("Failed to clean scratch for '{}': {err}", rec.path);
    }
    norm_rel
}

/// Canonical extension for a media type: the recipe's declared extension,
/// with a fixup for xml (the mime tables yield `.xsl`), then the mime
/// tables.
fn canonical_ext(recipe: Option<&Recipe>, mime: Option<&str>) -> Option<String> {
    recipe
        .and_then(|r| r.ext.as_deref())
        .map(|e| format!(".{}", e.trim_start_matches('.')))
        .or_else(|| match mime {
            Some("application/xml") => Some(".xml".into()),
            Some(m) => mime_guess::get_mime_extensions_str(m)
                .and_then(|exts| exts.first())
                .map(|e| format!(".{e}")),
            None => None,
        })
}

/// Case-insensitive path equality; in-place conversion must not rely on
/// the filesystem being case-sensitive.
fn paths_collide(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}

/// A conversion that reproduced the parent's own format (and encoding):
/// recursing would loop forever.
fn degenerate(parent: &FileRecord, child: &FileRecord) -> bool {
    let same_format = match (parent.format.as_deref(), child.format.as_deref()) {
        (Some(a), Some(b)) => a == b,
        _ => parent.mime == child.mime,
    };
    same_format && parent.encoding == child.encoding
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::recipe::{Accept, Registry};

    struct Fixture {
        _tmp: tempfile::TempDir,
        ctx: RunContext,
    }

    fn fixture(recipes_yaml: &str, in_place: bool) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let source_dir = tmp.path().join("source");
        let dest_dir = if in_place {
            source_dir.clone()
        } else {
            tmp.path().join("dest")
        };
        fs::create_dir_all(&source_dir).unwrap();
        fs::create_dir_all(&dest_dir).unwrap();
        let ctx = RunContext {
            source_dir,
            dest_dir,
            temp_dir: tmp.path().join("scratch"),
            config_dir: tmp.path().to_path_buf(),
            registry: if recipes_yaml.is_empty() {
                Registry::new(HashMap::new())
            } else {
                Registry::from_yaml(recipes_yaml).unwrap()
            },
            identifier: Identifier::new(false),
            default_timeout: 10,
            orig_ext: false,
            set_source_ext: false,
            identify_only: false,
            keep_originals: false,
            debug: false,
        };
        Fixture { _tmp: tmp, ctx }
    }

    fn seed(ctx: &RunContext, path: &str, contents: &[u8]) -> FileRecord {
        let abs = ctx.source_dir.join(path);
        fs::create_dir_all(abs.parent().unwrap()).unwrap();
        fs::write(abs, contents).unwrap();
        let mut rec = FileRecord::new(path);
        rec.id = 1;
        rec
    }

    #[test]
    fn encrypted_records_are_protected() {
        let f = fixture("", false);
        let mut rec = seed(&f.ctx, "secret.bin", b"sealed");
        rec.mime = Some("application/encrypted".into());
        rec.size = Some(6);

        let outcome = process(&f.ctx, rec, false);
        assert_eq!(outcome.record.status, Status::Protected);
        assert_eq!(outcome.record.kept, Some(true));
        // archived as-is, no command involved
        assert!(f.ctx.dest_dir.join("secret.bin").is_file());
        assert!(outcome.children.is_empty());
    }

    #[test]
    fn missing_recipe_skips() {
        let f = fixture("", false);
        let mut rec = seed(&f.ctx, "a/weird.qqq", b"???");
        rec.mime = Some("application/x-weird".into());
        rec.size = Some(3);

        let outcome = process(&f.ctx, rec, false);
        assert_eq!(outcome.record.status, Status::Skipped);
        assert_eq!(outcome.record.kept, Some(true));
        assert!(f.ctx.dest_dir.join("a/weird.qqq").is_file());
    }

    #[test]
    fn keep_false_without_command_removes() {
        let f = fixture("text/plain:\n  keep: false\n", false);
        let mut rec = seed(&f.ctx, "junk.txt", b"scrap");
        rec.mime = Some("text/plain".into());
        rec.size = Some(5);

        let outcome = process(&f.ctx, rec, false);
        assert_eq!(outcome.record.status, Status::Removed);
        assert_eq!(outcome.record.kept, Some(false));
        assert!(!f.ctx.dest_dir.join("junk.txt").exists());
    }

    #[test]
    fn acceptance_short_circuits_command() {
        let f = fixture(
            "text/plain:\n  command: definitely-not-run <source> <dest>\n  accept: true\n",
            false,
        );
        let mut rec = seed(&f.ctx, "ok.txt", b"fine as is");
        rec.mime = Some("text/plain".into());
        rec.size = Some(10);

        let outcome = process(&f.ctx, rec, false);
        assert_eq!(outcome.record.status, Status::Accepted);
        assert_eq!(outcome.record.kept, Some(true));
        assert!(f.ctx.dest_dir.join("ok.txt").is_file());
    }

    #[test]
    fn conversion_success_records_artifact() {
        let f = fixture(
            "text/plain:\n  command: cp <source> <dest>\n  dest-ext: out\n",
            false,
        );
        let mut rec = seed(&f.ctx, "doc.txt", b"contents");
        rec.mime = Some("text/plain".into());
        rec.format = Some("Plain Text File".into());
        rec.size = Some(8);

        let outcome = process(&f.ctx, rec, false);
        assert_eq!(outcome.record.status, Status::Converted);
        assert_eq!(outcome.record.kept, Some(false));
        assert!(f.ctx.dest_dir.join("doc.out").is_file());
        // the artifact comes back as a derived record
        assert_eq!(outcome.children.len(), 1);
        let child = &outcome.children[0];
        assert_eq!(child.record.path, "doc.out");
        assert_eq!(child.parent, ParentRef::Row(1));
    }

    #[test]
    fn failed_conversion_keeps_original() {
        let f = fixture(
            "text/plain:\n  command: 'false'\n  dest-ext: out\n",
            false,
        );
        let mut rec = seed(&f.ctx, "bad.txt", b"contents");
        rec.mime = Some("text/plain".into());
        rec.size = Some(8);

        let outcome = process(&f.ctx, rec, false);
        assert_eq!(outcome.record.status, Status::Failed);
        assert_eq!(outcome.record.kept, Some(true));
        assert!(f.ctx.dest_dir.join("bad.txt").is_file());
        assert!(outcome.children.is_empty());
    }

    #[test]
    fn timeout_kills_and_classifies() {
        let f = fixture(
            "text/plain:\n  command: sleep 30\n  dest-ext: out\n  timeout: 1\n",
            false,
        );
        let mut rec = seed(&f.ctx, "slow.txt", b"contents");
        rec.mime = Some("text/plain".into());
        rec.size = Some(8);

        let outcome = process(&f.ctx, rec, false);
        assert_eq!(outcome.record.status, Status::Timeout);
        assert!(!f.ctx.dest_dir.join("slow.out").exists());
    }

    #[test]
    fn in_place_failure_restores_source() {
        let f = fixture(
            "text/plain:\n  command: 'false'\n",
            true,
        );
        let mut rec = seed(&f.ctx, "same.txt", b"precious bytes");
        rec.mime = Some("text/plain".into());
        rec.size = Some(14);

        // dest-ext absent: destination gets the same extension, so the
        // source is routed through scratch and must come back intact
        let outcome = process(&f.ctx, rec, false);
        assert_eq!(outcome.record.status, Status::Failed);
        let restored = fs::read(f.ctx.source_dir.join("same.txt")).unwrap();
        assert_eq!(restored, b"precious bytes");
        assert!(!f.ctx.temp_dir.join("same.txt").exists());
    }

    #[test]
    fn extracted_directory_emits_children() {
        let f = fixture(
            concat!(
                "application/zip:\n",
                "  command: mkdir -p <dest> && printf a > <dest>/c.txt && printf b > <dest>/d.dat\n",
                "  dest-ext: ~\n",
            ),
            false,
        );
        let mut rec = seed(&f.ctx, "b.zip", b"PK\x03\x04fake");
        rec.mime = Some("application/zip".into());
        rec.size = Some(8);

        let outcome = process(&f.ctx, rec, false);
        assert_eq!(outcome.record.status, Status::Converted);
        let paths: Vec<_> = outcome
            .children
            .iter()
            .map(|c| c.record.path.as_str())
            .collect();
        assert_eq!(paths, vec!["b/c.txt", "b/d.dat"]);
        for child in &outcome.children {
            assert_eq!(child.parent, ParentRef::Row(1));
            assert!(child.record.status.is_terminal());
        }
    }

    #[test]
    fn degenerate_reconversion_does_not_recurse() {
        // "conversion" reproduces the same format: the child must be
        // recorded failed-but-kept instead of looping
        let f = fixture(
            "text/plain:\n  command: cp <source> <dest>\n  dest-ext: txt\n  keep: true\n",
            false,
        );
        let mut rec = seed(&f.ctx, "note.txt", "blåbær og fløte\n".as_bytes());
        rec.mime = Some("text/plain".into());
        rec.encoding = Some("UTF-8".into());
        rec.size = Some(19);

        let outcome = process(&f.ctx, rec, false);
        assert_eq!(outcome.record.status, Status::Converted);
        assert_eq!(outcome.children.len(), 1);
        let child = &outcome.children[0];
        assert_eq!(child.record.status, Status::Failed);
        assert_eq!(child.record.kept, Some(true));
    }

    #[test]
    fn missing_extension_renames_to_canonical() {
        let f = fixture("text/plain:\n  ext: txt\n", false);
        let mut rec = seed(&f.ctx, "README", b"read me");
        rec.mime = Some("text/plain".into());
        rec.size = Some(7);

        let outcome = process(&f.ctx, rec, false);
        assert_eq!(outcome.record.status, Status::Renamed);
        assert_eq!(outcome.record.kept, None);
        assert!(f.ctx.dest_dir.join("README.txt").is_file());
        // the renamed copy is recorded as a derived row
        assert!(
            outcome
                .children
                .iter()
                .any(|c| c.record.path == "README.txt")
        );
    }

    #[test]
    fn identify_only_fills_fields_without_converting() {
        let mut f = fixture(
            "text/plain:\n  command: definitely-not-run <source> <dest>\n  dest-ext: out\n",
            false,
        );
        f.ctx.identify_only = true;
        let rec = seed(&f.ctx, "info.txt", b"some text here");

        let outcome = process(&f.ctx, rec, false);
        assert_eq!(outcome.record.status, Status::New);
        assert_eq!(outcome.record.mime.as_deref(), Some("text/plain"));
        assert_eq!(outcome.record.size, Some(14));
        assert!(!f.ctx.dest_dir.join("info.out").exists());
    }

    #[test]
    fn set_source_ext_renames_the_source_file() {
        let mut f = fixture("text/plain:\n  ext: txt\n  accept: true\n", false);
        f.ctx.set_source_ext = true;
        let mut rec = seed(&f.ctx, "letter.dat", b"dear sir or madam");
        rec.mime = Some("text/plain".into());
        rec.size = Some(17);

        let outcome = process(&f.ctx, rec, false);
        assert_eq!(outcome.record.path, "letter.txt");
        assert!(f.ctx.source_dir.join("letter.txt").is_file());
        assert!(!f.ctx.source_dir.join("letter.dat").exists());
        assert_eq!(outcome.record.status, Status::Accepted);
        assert!(f.ctx.dest_dir.join("letter.txt").is_file());
    }

    #[test]
    fn keep_originals_overrides_recipe() {
        let mut f = fixture(
            "text/plain:\n  command: cp <source> <dest>\n  dest-ext: out\n",
            false,
        );
        f.ctx.keep_originals = true;
        let mut rec = seed(&f.ctx, "doc.txt", b"contents");
        rec.mime = Some("text/plain".into());
        rec.size = Some(8);

        let outcome = process(&f.ctx, rec, false);
        assert_eq!(outcome.record.status, Status::Converted);
        assert_eq!(outcome.record.kept, Some(true));
        assert!(f.ctx.dest_dir.join("doc.txt").is_file());
        assert!(f.ctx.dest_dir.join("doc.out").is_file());
    }

    #[test]
    fn accept_rules_match_encoding() {
        let registry = Registry::new(HashMap::from([(
            "text/plain".to_owned(),
            Recipe {
                accept: Some(Accept::Rules(crate::recipe::AcceptRules {
                    version: vec![],
                    encoding: vec!["UTF-8".into()],
                })),
                ..Recipe::default()
            },
        )]));
        let mut f = fixture("", false);
        f.ctx.registry = registry;
        let mut rec = seed(&f.ctx, "utf8.txt", "blåbær\n".as_bytes());
        rec.mime = Some("text/plain".into());
        rec.encoding = Some("UTF-8".into());
        rec.size = Some(9);

        let outcome = process(&f.ctx, rec, false);
        assert_eq!(outcome.record.status, Status::Accepted);
    }
}
