//! # Scheduler
//! Streams catalog rows matching a filter into a bounded pool of worker
//! threads and funnels their outcomes through a single writer task.
//!
//! The writer owns the only read-write catalog connection; rows are
//! streamed on a separate read-only connection so the select never contends
//! with the writer. Outcomes are applied in arrival order, one transaction
//! per event, so every record gets at most one terminal write per worker
//! invocation.
use std::{
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    thread,
};

use anyhow::{Result, bail};
use crossbeam_channel::{Receiver, bounded};
use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    db::{Catalog, FileRecord, Filter, Status},
    logger::{debug, info},
    worker::{self, Outcome, RunContext},
};

/// Outcome channel message; `Done` is the end-of-stream sentinel.
enum Msg {
    Outcome(Outcome),
    Done,
}

/// Shared progress counters. Reads may be visually inconsistent; only the
/// final summary is taken after all threads have joined.
#[derive(Debug, Default)]
pub struct Counters {
    pub total: AtomicU64,
    pub finished: AtomicU64,
    pub failed: AtomicU64,
    pub skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub total: u64,
    pub finished: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl Counters {
    fn summary(&self) -> Summary {
        Summary {
            total: self.total.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Convert every catalog row matching `filter`.
///
/// With `multi`, work is partitioned by top-level subfolder (path-range
/// filters) and the partitions are processed in turn, followed by a
/// catch-all pass for rows outside any subfolder.
pub fn run(
    ctx: &RunContext,
    db_path: &Path,
    filter: &Filter,
    jobs: usize,
    purge: bool,
    multi: bool,
) -> Result<Summary> {
    let counters = Counters::default();

    if multi {
        let folders = {
            let catalog = Catalog::open_read_only(db_path)?;
            catalog.subfolders(filter)?
        };
        info!("Partitioning work over {} subfolders", folders.len());
        for folder in folders {
            let partition = Filter {
                from_path: Some(format!("{folder}/")),
                // '0' is the successor of '/' in ASCII, so this bounds
                // exactly the paths under the folder
                to_path: Some(format!("{folder}0")),
                ..filter.clone()
            };
            run_partition(ctx, db_path, &partition, jobs, purge, &counters)?;
        }
        // rows outside any subfolder; rows done above are excluded by
        // status and status_ts
        run_partition(ctx, db_path, filter, jobs, purge, &counters)?;
    } else {
        run_partition(ctx, db_path, filter, jobs, purge, &counters)?;
    }

    Ok(counters.summary())
}

fn run_partition(
    ctx: &RunContext,
    db_path: &Path,
    filter: &Filter,
    jobs: usize,
    purge: bool,
    counters: &Counters,
) -> Result<()> {
    let writer_catalog = Catalog::open(db_path)?;
    let feeder_catalog = Catalog::open_read_only(db_path)?;
    let total = feeder_catalog.count(filter)?;
    if total == 0 {
        return Ok(());
    }
    counters.total.fetch_add(total, Ordering::Relaxed);
    debug!("Dispatching {total} records to {jobs} workers");

    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template("{pos}/{len} | {wide_msg}") {
        bar.set_style(style);
    }

    let (work_tx, work_rx) = bounded::<FileRecord>(jobs * 2);
    let (out_tx, out_rx) = bounded::<Msg>(jobs * 2);

    thread::scope(|scope| -> Result<()> {
        let writer = scope.spawn(|| writer_loop(writer_catalog, out_rx, counters, &bar));

        let mut workers = Vec::with_capacity(jobs);
        for _ in 0..jobs {
            let work_rx = work_rx.clone();
            let out_tx = out_tx.clone();
            workers.push(scope.spawn(move || {
                for record in work_rx {
                    let outcome = worker::process(ctx, record, purge);
                    if out_tx.send(Msg::Outcome(outcome)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(work_rx);

        let mut feed_ok = true;
        feeder_catalog.for_each(filter, |record| {
            feed_ok = work_tx.send(record).is_ok();
            feed_ok
        })?;
        drop(work_tx);

        for handle in workers {
            if handle.join().is_err() {
                bail!("worker thread panicked");
            }
        }
        // all worker outcomes are queued; wake the writer one last time
        let done_ok = out_tx.send(Msg::Done).is_ok();
        drop(out_tx);

        match writer.join() {
            Ok(result) => result?,
            Err(_) => bail!("catalog writer panicked"),
        }
        if !done_ok {
            bail!("catalog writer exited early");
        }
        if !feed_ok {
            bail!("worker pool terminated before all records were dispatched");
        }
        Ok(())
    })?;

    bar.finish_and_clear();
    Ok(())
}

/// Drain the outcome channel, applying each event atomically. The only
/// place terminal statuses are written.
fn writer_loop(
    mut catalog: Catalog,
    rx: Receiver<Msg>,
    counters: &Counters,
    bar: &ProgressBar,
) -> Result<()> {
    for msg in rx {
        let outcome = match msg {
            Msg::Outcome(outcome) => outcome,
            Msg::Done => break,
        };
        let status = outcome.record.status;
        let path = outcome.record.path.clone();
        catalog.apply_outcome(outcome)?;

        counters.finished.fetch_add(1, Ordering::Relaxed);
        if status.is_failure() {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        if status == Status::Skipped {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
        }
        bar.set_message(path);
        bar.inc(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{
        db::Status,
        identify::Identifier,
        recipe::Registry,
    };

    fn context(tmp: &tempfile::TempDir, recipes: &str) -> RunContext {
        let source_dir = tmp.path().join("source");
        let dest_dir = tmp.path().join("dest");
        fs::create_dir_all(&source_dir).unwrap();
        fs::create_dir_all(&dest_dir).unwrap();
        RunContext {
            source_dir,
            dest_dir,
            temp_dir: tmp.path().join("scratch"),
            config_dir: tmp.path().to_path_buf(),
            registry: Registry::from_yaml(recipes).unwrap(),
            identifier: Identifier::new(false),
            default_timeout: 10,
            orig_ext: false,
            set_source_ext: false,
            identify_only: false,
            keep_originals: false,
            debug: false,
        }
    }

    #[test]
    fn parallel_workers_single_writer() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(&tmp, "text/plain:\n  command: cp <source> <dest>\n  dest-ext: out\n");
        let db_path = tmp.path().join("catalog.db");

        let mut rows = Vec::new();
        for i in 0..40 {
            let path = format!("part{}/file{i:02}.txt", i % 4);
            let abs = ctx.source_dir.join(&path);
            fs::create_dir_all(abs.parent().unwrap()).unwrap();
            fs::write(&abs, format!("contents {i}")).unwrap();
            rows.push(crate::db::FileRecord::new(path));
        }
        {
            let mut catalog = Catalog::open(&db_path).unwrap();
            catalog.append_rows(&rows).unwrap();
        }

        let filter = Filter {
            pending_only: true,
            ..Filter::default()
        };
        let summary = run(&ctx, &db_path, &filter, 4, false, false).unwrap();
        assert_eq!(summary.total, 40);
        assert_eq!(summary.finished, 40);
        assert_eq!(summary.failed, 0);

        // every row is terminal and every artifact is a derived row
        let catalog = Catalog::open_read_only(&db_path).unwrap();
        let mut converted = 0;
        let mut derived = 0;
        catalog
            .for_each(&Filter::default(), |rec| {
                if rec.source_id.is_none() {
                    assert_eq!(rec.status, Status::Converted);
                    converted += 1;
                } else {
                    derived += 1;
                }
                true
            })
            .unwrap();
        assert_eq!(converted, 40);
        assert_eq!(derived, 40);
    }

    #[test]
    fn multi_partitions_cover_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(&tmp, "text/plain:\n  accept: true\n");
        let db_path = tmp.path().join("catalog.db");

        let mut rows = Vec::new();
        for path in ["a/one.txt", "a/two.txt", "b/three.txt", "root.txt"] {
            let abs = ctx.source_dir.join(path);
            fs::create_dir_all(abs.parent().unwrap()).unwrap();
            fs::write(&abs, "text").unwrap();
            rows.push(crate::db::FileRecord::new(path));
        }
        {
            let mut catalog = Catalog::open(&db_path).unwrap();
            catalog.append_rows(&rows).unwrap();
        }

        let filter = Filter {
            pending_only: true,
            before: Some(chrono::Local::now()),
            ..Filter::default()
        };
        let summary = run(&ctx, &db_path, &filter, 2, false, true).unwrap();
        assert_eq!(summary.finished, 4);
        assert_eq!(summary.total, 4);

        let catalog = Catalog::open_read_only(&db_path).unwrap();
        catalog
            .for_each(&Filter::default(), |rec| {
                assert_eq!(rec.status, Status::Accepted);
                true
            })
            .unwrap();
    }
}
