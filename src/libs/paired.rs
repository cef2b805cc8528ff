//! Shared state for the worker pool: a lock-stepped paired reader,
//! serialized writers and run-wide counters.

use crate::libs::error::CollapseError;
use crate::libs::io::Output;
use crate::libs::pipeline::{CollapseParams, Collapser, ReferenceReads, Resolution};
use noodles::fastq;
use std::any::Any;
use std::fmt;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

type FastqIn = fastq::io::Reader<Box<dyn BufRead + Send>>;
type FastqOut = fastq::io::Writer<Output>;

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> anyhow::Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| anyhow::anyhow!("{} lock poisoned by a panicking worker", what))
}

fn into_inner<T>(mutex: Mutex<T>, what: &str) -> anyhow::Result<T> {
    mutex
        .into_inner()
        .map_err(|_| anyhow::anyhow!("{} lock poisoned by a panicking worker", what))
}

#[derive(Debug, Clone, PartialEq)]
pub struct FastqPair {
    pub read1: fastq::Record,
    pub read2: fastq::Record,
}

struct ReaderState {
    read1: FastqIn,
    read2: FastqIn,
    served: u64,
    done: bool,
}

/// Two FASTQ streams advanced together under one lock.
///
/// Once both streams end, or `max_pairs` pairs have been handed out, every
/// call returns `Ok(None)`. A stream ending before the other is reported once
/// as [`CollapseError::Desynchronized`]; later calls return `Ok(None)`.
pub struct PairedReader {
    state: Mutex<ReaderState>,
    max_pairs: Option<u64>,
}

impl PairedReader {
    pub fn new(
        read1: Box<dyn BufRead + Send>,
        read2: Box<dyn BufRead + Send>,
        max_pairs: Option<u64>,
    ) -> Self {
        Self {
            state: Mutex::new(ReaderState {
                read1: fastq::io::Reader::new(read1),
                read2: fastq::io::Reader::new(read2),
                served: 0,
                done: false,
            }),
            max_pairs,
        }
    }

    pub fn from_paths(infile1: &str, infile2: &str, max_pairs: Option<u64>) -> anyhow::Result<Self> {
        Ok(Self::new(
            crate::reader(infile1)?,
            crate::reader(infile2)?,
            max_pairs,
        ))
    }

    pub fn next_pair(&self) -> anyhow::Result<Option<FastqPair>> {
        let mut state = lock(&self.state, "paired reader")?;
        if state.done {
            return Ok(None);
        }
        if self.max_pairs.is_some_and(|max| state.served >= max) {
            state.done = true;
            return Ok(None);
        }

        let mut read1 = fastq::Record::default();
        let mut read2 = fastq::Record::default();
        let n1 = state.read1.read_record(&mut read1);
        let n2 = state.read2.read_record(&mut read2);
        let (n1, n2) = match (n1, n2) {
            (Ok(n1), Ok(n2)) => (n1, n2),
            (Err(e), _) | (_, Err(e)) => {
                state.done = true;
                return Err(anyhow::Error::new(e).context("failed to read a FASTQ record"));
            }
        };

        match (n1 == 0, n2 == 0) {
            (false, false) => {
                state.served += 1;
                Ok(Some(FastqPair { read1, read2 }))
            }
            (true, true) => {
                state.done = true;
                Ok(None)
            }
            (exhausted1, _) => {
                state.done = true;
                Err(CollapseError::Desynchronized {
                    pairs: state.served,
                    exhausted: if exhausted1 { 1 } else { 2 },
                }
                .into())
            }
        }
    }
}

/// A FASTQ writer whose records never interleave.
pub struct SharedFastqWriter {
    inner: Mutex<FastqOut>,
}

impl SharedFastqWriter {
    pub fn new(writer: Output) -> Self {
        Self {
            inner: Mutex::new(fastq::io::Writer::new(writer)),
        }
    }

    pub fn from_path(outfile: &str) -> anyhow::Result<Self> {
        Ok(Self::new(crate::output(outfile)?))
    }

    pub fn write_record(&self, record: &fastq::Record) -> anyhow::Result<()> {
        lock(&self.inner, "FASTQ writer")?.write_record(record)?;
        Ok(())
    }

    /// Flushes and closes the underlying stream.
    pub fn finish(self) -> anyhow::Result<()> {
        into_inner(self.inner, "FASTQ writer")?.into_inner().finish()
    }
}

/// Both mates of a pair go out under the same lock, so the two files stay
/// in step.
pub struct SharedPairWriter {
    inner: Mutex<(FastqOut, FastqOut)>,
}

impl SharedPairWriter {
    pub fn new(read1: Output, read2: Output) -> Self {
        Self {
            inner: Mutex::new((fastq::io::Writer::new(read1), fastq::io::Writer::new(read2))),
        }
    }

    /// Opens `<prefix>_R1.fq` and `<prefix>_R2.fq`, gzipped when the prefix
    /// ends with `.gz` (the suffix moves to the end of each file name).
    pub fn from_prefix(prefix: &str) -> anyhow::Result<Self> {
        let (stem, ext) = match prefix.strip_suffix(".gz") {
            Some(stem) => (stem, ".fq.gz"),
            None => (prefix, ".fq"),
        };
        Ok(Self::new(
            crate::output(&format!("{}_R1{}", stem, ext))?,
            crate::output(&format!("{}_R2{}", stem, ext))?,
        ))
    }

    pub fn write_pair(&self, read1: &fastq::Record, read2: &fastq::Record) -> anyhow::Result<()> {
        let mut guard = lock(&self.inner, "failed-pair writer")?;
        guard.0.write_record(read1)?;
        guard.1.write_record(read2)?;
        Ok(())
    }

    pub fn finish(self) -> anyhow::Result<()> {
        let (read1, read2) = into_inner(self.inner, "failed-pair writer")?;
        read1.into_inner().finish()?;
        read2.into_inner().finish()
    }
}

/// Line-oriented TSV output shared by all workers.
pub struct SharedTsvWriter {
    inner: Mutex<Output>,
}

impl SharedTsvWriter {
    pub fn new(mut writer: Output, header: &str) -> anyhow::Result<Self> {
        writeln!(writer, "{}", header)?;
        Ok(Self {
            inner: Mutex::new(writer),
        })
    }

    pub fn from_path(outfile: &str, header: &str) -> anyhow::Result<Self> {
        Self::new(crate::output(outfile)?, header)
    }

    pub fn write_line(&self, line: &str) -> anyhow::Result<()> {
        writeln!(lock(&self.inner, "TSV writer")?, "{}", line)?;
        Ok(())
    }

    pub fn finish(self) -> anyhow::Result<()> {
        into_inner(self.inner, "TSV writer")?.finish()
    }
}

/// Every destination a worker publishes to.
pub struct Sinks {
    pub resolved: SharedFastqWriter,
    pub diagnostics: Option<SharedTsvWriter>,
    pub failed: Option<SharedPairWriter>,
}

impl Sinks {
    /// Flushes every destination; write errors surface here rather than
    /// being lost on drop.
    pub fn finish(self) -> anyhow::Result<()> {
        self.resolved.finish()?;
        if let Some(w) = self.diagnostics {
            w.finish()?;
        }
        if let Some(w) = self.failed {
            w.finish()?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Counters {
    processed: AtomicU64,
    resolved: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one finished pair and returns the new processed total.
    pub fn record(&self, resolved: bool) -> u64 {
        if resolved {
            self.resolved.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Approximate while workers are still running.
    pub fn summary(&self) -> Summary {
        Summary {
            processed: self.processed.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    pub processed: u64,
    pub resolved: u64,
    pub failed: u64,
}

impl Summary {
    pub const TSV_HEADER: &'static str = "processed\tresolved\tfailed\tresolved_percent";

    pub fn resolved_percent(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.resolved as f64 * 100.0 / self.processed as f64
        }
    }

    pub fn to_tsv(&self) -> String {
        format!(
            "{}\t{}\t{}\t{:.2}",
            self.processed,
            self.resolved,
            self.failed,
            self.resolved_percent()
        )
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pairs processed, {} resolved ({:.2}%), {} failed",
            self.processed,
            self.resolved,
            self.resolved_percent(),
            self.failed
        )
    }
}

/// Everything a worker thread borrows.
pub struct WorkerContext<'a> {
    pub reader: &'a PairedReader,
    pub sinks: &'a Sinks,
    pub counters: &'a Counters,
    pub params: &'a CollapseParams,
    pub reference: Option<&'a ReferenceReads>,
    /// Log a progress line every this many pairs, 0 to disable
    pub progress: u64,
}

// Raises the abort flag if the owning thread unwinds.
struct AbortOnUnwind<'a>(&'a AtomicBool);

impl Drop for AbortOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.store(true, Ordering::SeqCst);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn worker_loop(ctx: &WorkerContext, abort: &AtomicBool) -> anyhow::Result<()> {
    let mut collapser = Collapser::new(ctx.params, ctx.reference);

    while !abort.load(Ordering::SeqCst) {
        let pair = match ctx.reader.next_pair()? {
            Some(pair) => pair,
            None => break,
        };
        let outcome = collapser.process_pair(&pair.read1, &pair.read2)?;

        if let (Some(diag), Some(w)) = (&outcome.diagnostics, &ctx.sinks.diagnostics) {
            w.write_line(&diag.to_tsv_row())?;
        }
        match &outcome.resolution {
            Resolution::Resolved(record) => ctx.sinks.resolved.write_record(record)?,
            Resolution::Unresolved(_) => {
                if let Some(w) = &ctx.sinks.failed {
                    w.write_pair(&pair.read1, &pair.read2)?;
                }
            }
        }

        let processed = ctx.counters.record(outcome.is_resolved());
        if ctx.progress > 0 && processed % ctx.progress == 0 {
            log::info!("{}", ctx.counters.summary());
        }
    }

    Ok(())
}

/// Runs `threads` workers until the reader is exhausted.
///
/// The first failing worker stops the others; its error is returned. A
/// panicking worker is reported as [`CollapseError::WorkerPanicked`].
pub fn run_workers(ctx: &WorkerContext, threads: usize) -> anyhow::Result<()> {
    let abort = AtomicBool::new(false);

    let results = crossbeam::scope(|s| {
        let mut handles = Vec::new();
        for _ in 0..threads.max(1) {
            let abort = &abort;
            handles.push(s.spawn(move |_| {
                let _guard = AbortOnUnwind(abort);
                let result = worker_loop(ctx, abort);
                if result.is_err() {
                    abort.store(true, Ordering::SeqCst);
                }
                result
            }));
        }

        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|payload| {
                    Err(CollapseError::WorkerPanicked(panic_message(&*payload)).into())
                })
            })
            .collect::<Vec<_>>()
    })
    .map_err(|payload| CollapseError::WorkerPanicked(panic_message(&*payload)))?;

    for result in results {
        result?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn fastq_text(names: &[&str]) -> String {
        names
            .iter()
            .map(|n| format!("@{}\nACGT\n+\nIIII\n", n))
            .collect()
    }

    fn boxed(text: String) -> Box<dyn BufRead + Send> {
        Box::new(Cursor::new(text.into_bytes()))
    }

    #[test]
    fn test_pairs_in_step() {
        let reader = PairedReader::new(
            boxed(fastq_text(&["a/1", "b/1"])),
            boxed(fastq_text(&["a/2", "b/2"])),
            None,
        );
        let first = reader.next_pair().unwrap().unwrap();
        assert_eq!(first.read1.name().to_vec(), b"a/1".to_vec());
        assert_eq!(first.read2.name().to_vec(), b"a/2".to_vec());
        let second = reader.next_pair().unwrap().unwrap();
        assert_eq!(second.read2.name().to_vec(), b"b/2".to_vec());
        assert!(reader.next_pair().unwrap().is_none());
        assert!(reader.next_pair().unwrap().is_none());
    }

    #[test]
    fn test_desynchronized_once() {
        let reader = PairedReader::new(
            boxed(fastq_text(&["a/1", "b/1", "c/1"])),
            boxed(fastq_text(&["a/2"])),
            None,
        );
        assert!(reader.next_pair().unwrap().is_some());

        let err = reader.next_pair().unwrap_err();
        assert_eq!(
            err.downcast_ref::<CollapseError>(),
            Some(&CollapseError::Desynchronized {
                pairs: 1,
                exhausted: 2
            })
        );
        assert!(reader.next_pair().unwrap().is_none());
    }

    #[test]
    fn test_max_pairs() {
        let reader = PairedReader::new(
            boxed(fastq_text(&["a/1", "b/1", "c/1"])),
            boxed(fastq_text(&["a/2", "b/2", "c/2"])),
            Some(2),
        );
        assert!(reader.next_pair().unwrap().is_some());
        assert!(reader.next_pair().unwrap().is_some());
        assert!(reader.next_pair().unwrap().is_none());
    }

    #[test]
    fn test_counters() {
        let counters = Counters::new();
        assert_eq!(counters.record(true), 1);
        assert_eq!(counters.record(false), 2);
        assert_eq!(counters.record(true), 3);
        let summary = counters.summary();
        assert_eq!(
            summary,
            Summary {
                processed: 3,
                resolved: 2,
                failed: 1
            }
        );
        assert_eq!(summary.to_tsv(), "3\t2\t1\t66.67");
        assert_eq!(Summary::default().resolved_percent(), 0.0);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }

    #[test]
    fn test_run_workers_thread_invariance() {
        use crate::libs::boundary::BoundaryParams;
        use crate::libs::consensus::ConsensusParams;

        let params = CollapseParams {
            boundary: BoundaryParams {
                hairpin: b"TTAGGC".to_vec(),
                min_matches: 5,
                max_mismatches: 1,
                confident_matches: 6,
                ..Default::default()
            },
            consensus: ConsensusParams {
                min_length: 5,
                ..Default::default()
            },
            ..Default::default()
        };

        let mut text1 = String::new();
        let mut text2 = String::new();
        for i in 0..40 {
            if i % 3 == 0 {
                text1 += &format!("@junk{}/1\nAAAAAAAAAAAAAAAAAAAA\n+\nIIIIIIIIIIIIIIIIIIII\n", i);
                text2 += &format!("@junk{}/2\nAAAAAAAAAAAAAAAAAAAA\n+\nIIIIIIIIIIIIIIIIIIII\n", i);
            } else {
                text1 += &format!("@frag{}/1\nACGTTGCATGTTAGGCCATG\n+\n-IIIIIIIIIIIIIIIIIII\n", i);
                text2 += &format!("@frag{}/2\nTCGTTGCATGGCCTAACATG\n+\n&IIIIIIIIIIIIIIIIIII\n", i);
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut outputs = Vec::new();
        for threads in [1, 4] {
            let outfile = dir.path().join(format!("out{}.fq", threads));
            let outfile = outfile.to_str().unwrap().to_string();
            let reader = PairedReader::new(boxed(text1.clone()), boxed(text2.clone()), None);
            let sinks = Sinks {
                resolved: SharedFastqWriter::from_path(&outfile).unwrap(),
                diagnostics: None,
                failed: None,
            };
            let counters = Counters::new();
            let ctx = WorkerContext {
                reader: &reader,
                sinks: &sinks,
                counters: &counters,
                params: &params,
                reference: None,
                progress: 0,
            };
            run_workers(&ctx, threads).unwrap();
            sinks.finish().unwrap();

            let summary = counters.summary();
            assert_eq!(summary.processed, 40);
            assert_eq!(summary.resolved, 26);
            assert_eq!(summary.failed, 14);

            let mut names: Vec<String> = std::fs::read_to_string(&outfile)
                .unwrap()
                .lines()
                .filter(|l| l.starts_with('@'))
                .map(|l| l.to_string())
                .collect();
            names.sort();
            outputs.push(names);
        }
        assert_eq!(outputs[0].len(), 26);
        assert_eq!(outputs[0], outputs[1]);
    }

    #[test]
    fn test_pair_writer_gz_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("failed.gz");
        let writer = SharedPairWriter::from_prefix(prefix.to_str().unwrap()).unwrap();

        let mut reader = PairedReader::new(
            boxed(fastq_text(&["a/1", "b/1"])),
            boxed(fastq_text(&["a/2", "b/2"])),
            None,
        );
        while let Some(pair) = reader.next_pair().unwrap() {
            writer.write_pair(&pair.read1, &pair.read2).unwrap();
        }
        writer.finish().unwrap();

        let read1 = dir.path().join("failed_R1.fq.gz");
        let read2 = dir.path().join("failed_R2.fq.gz");
        reader = PairedReader::from_paths(read1.to_str().unwrap(), read2.to_str().unwrap(), None)
            .unwrap();
        let first = reader.next_pair().unwrap().unwrap();
        assert_eq!(first.read1.name().to_vec(), b"a/1".to_vec());
        assert_eq!(first.read2.name().to_vec(), b"a/2".to_vec());
        assert!(reader.next_pair().unwrap().is_some());
        assert!(reader.next_pair().unwrap().is_none());
    }

    #[test]
    fn test_run_workers_desynchronized() {
        let params = CollapseParams::default();
        let reader = PairedReader::new(
            boxed(fastq_text(&["a/1", "b/1"])),
            boxed(fastq_text(&["a/2"])),
            None,
        );
        let dir = tempfile::tempdir().unwrap();
        let outfile = dir.path().join("out.fq");
        let sinks = Sinks {
            resolved: SharedFastqWriter::from_path(outfile.to_str().unwrap()).unwrap(),
            diagnostics: None,
            failed: None,
        };
        let counters = Counters::new();
        let ctx = WorkerContext {
            reader: &reader,
            sinks: &sinks,
            counters: &counters,
            params: &params,
            reference: None,
            progress: 0,
        };
        let err = run_workers(&ctx, 3).unwrap_err();
        assert!(err.to_string().contains("desynchronized"));
        assert_eq!(counters.summary().processed, 1);
    }
}
