use biomodal::libs::base;
use biomodal::libs::boundary::BoundaryParams;
use biomodal::libs::consensus::{CapPolicy, ConsensusParams};
use biomodal::libs::paired::*;
use biomodal::libs::pipeline::{CollapseParams, Diagnostics, ReferenceReads};
use clap::*;
use std::io::Write;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("collapse")
        .about("Collapses hairpin-joined read pairs into consensus reads")
        .after_help(
            r###"
Each read pair observes both strands of one fragment, joined by a hairpin
adapter. For every pair this command locates the fragment/hairpin boundary,
aligns the two copies of the fragment, merges in the copy of the fragment end
seen after the hairpin, and writes one quality-trimmed consensus read.

Notes:
* Supports both plain text and gzipped (.gz) files
* Reads from stdin if an input file is 'stdin'
* Input symbols: M is a modified C and K its complement on the other strand;
  they are not read as IUPAC codes. Other ambiguity codes become N
* Both inputs must hold the same number of records; a mismatch aborts the run
* Running in parallel mode with `--parallel` workers
    * The order of output may be different from the input
    * The set of resolved reads does not depend on the number of workers
* Pairs without a boundary, with a reverse-complement anchor past the
  boundary, or without a long enough confident core produce no output;
  `--failed prefix` keeps them in prefix_R1.fq / prefix_R2.fq
  (prefix.gz gives prefix_R1.fq.gz / prefix_R2.fq.gz)
* `--diagnostics` writes one TSV row per pair; `--reference` adds a comparison
  against externally resolved reads matched by name (/1 and /2 are ignored)
* `--cap-policy` settles disagreements when the two consensus copies are merged:
    * cap-by-first: keep the forward base, quality capped at `--disagree-ceiling`
    * higher-quality: keep the more confident base, same cap
    * no-call: emit N
* Progress is logged to stderr every `--progress` pairs; RUST_LOG controls
  the level

Examples:
1. Collapse a pair of files:
   biomodal collapse R1.fq.gz R2.fq.gz -o resolved.fq.gz

2. Use 8 workers and keep per-pair diagnostics:
   biomodal collapse R1.fq.gz R2.fq.gz -p 8 --diagnostics diag.tsv

3. Keep unresolved pairs and a run summary:
   biomodal collapse R1.fq R2.fq --failed unresolved --summary summary.tsv

"###,
        )
        .arg(
            Arg::new("infile1")
                .required(true)
                .index(1)
                .help("Read 1 FASTQ file"),
        )
        .arg(
            Arg::new("infile2")
                .required(true)
                .index(2)
                .help("Read 2 FASTQ file"),
        )
        .arg(
            Arg::new("hairpin")
                .long("hairpin")
                .num_args(1)
                .default_value("ACGCCGGCGGCAAGTG")
                .help("Hairpin adapter motif as seen in read 1"),
        )
        .arg(
            Arg::new("min_matches")
                .long("min-matches")
                .value_parser(value_parser!(usize))
                .default_value("12")
                .help("Fewest matching bases for a hairpin call"),
        )
        .arg(
            Arg::new("max_mismatches")
                .long("max-mismatches")
                .value_parser(value_parser!(usize))
                .default_value("2")
                .help("Most mismatching bases for a hairpin call"),
        )
        .arg(
            Arg::new("confident_matches")
                .long("confident-matches")
                .value_parser(value_parser!(usize))
                .default_value("14")
                .help("Matching bases for a hairpin call to override the reverse-complement estimate"),
        )
        .arg(
            Arg::new("quality_cutoff")
                .long("rc-quality-cutoff")
                .value_parser(value_parser!(u8))
                .default_value("20")
                .help("Reverse-complement mismatches at or below this quality are low-confidence"),
        )
        .arg(
            Arg::new("max_mismatch_fraction")
                .long("max-mismatch-fraction")
                .value_parser(value_parser!(f32))
                .default_value("0.30")
                .help("Reject reverse-complement shifts with this mismatch fraction or more"),
        )
        .arg(
            Arg::new("max_hq_mismatch_fraction")
                .long("max-hq-mismatch-fraction")
                .value_parser(value_parser!(f32))
                .default_value("0.065")
                .help("Same, counting only high-confidence mismatches"),
        )
        .args(super::align::score_args())
        .arg(
            Arg::new("agree_ceiling")
                .long("agree-ceiling")
                .value_parser(value_parser!(u8))
                .default_value("60")
                .help("Highest quality for two agreeing bases"),
        )
        .arg(
            Arg::new("disagree_ceiling")
                .long("disagree-ceiling")
                .value_parser(value_parser!(u8))
                .default_value("10")
                .help("Highest quality for a base kept over a disagreement when merging"),
        )
        .arg(
            Arg::new("cap_policy")
                .long("cap-policy")
                .value_parser(["cap-by-first", "higher-quality", "no-call"])
                .default_value("cap-by-first")
                .help("How merged disagreements are settled"),
        )
        .arg(
            Arg::new("min_quality")
                .long("min-quality")
                .value_parser(value_parser!(u8))
                .default_value("10")
                .help("Quality floor for end trimming"),
        )
        .arg(
            Arg::new("min_length")
                .long("min-length")
                .value_parser(value_parser!(usize))
                .default_value("20")
                .help("Shortest consensus read to emit"),
        )
        .arg(
            Arg::new("max_pairs")
                .long("max-pairs")
                .value_parser(value_parser!(u64))
                .num_args(1)
                .help("Stop after this many pairs"),
        )
        .arg(
            Arg::new("diagnostics")
                .long("diagnostics")
                .num_args(1)
                .help("Per-pair diagnostics TSV"),
        )
        .arg(
            Arg::new("failed")
                .long("failed")
                .num_args(1)
                .help("Prefix for the unresolved pairs"),
        )
        .arg(
            Arg::new("reference")
                .long("reference")
                .num_args(1)
                .requires("diagnostics")
                .help("FASTQ of externally resolved reads to compare against"),
        )
        .arg(
            Arg::new("summary")
                .long("summary")
                .num_args(1)
                .help("Write the run summary as TSV"),
        )
        .arg(
            Arg::new("progress")
                .long("progress")
                .value_parser(value_parser!(u64))
                .default_value("1000000")
                .help("Log progress every this many pairs, 0 to disable"),
        )
        .arg(
            Arg::new("parallel")
                .long("parallel")
                .short('p')
                .value_parser(value_parser!(usize))
                .num_args(1)
                .default_value("1")
                .help("Number of threads for parallel processing"),
        )
        .arg(
            Arg::new("outfile")
                .long("outfile")
                .short('o')
                .num_args(1)
                .default_value("stdout")
                .help("Output filename. [stdout] for screen"),
        )
}

fn collapse_params(args: &ArgMatches) -> anyhow::Result<CollapseParams> {
    let boundary = BoundaryParams {
        hairpin: args
            .get_one::<String>("hairpin")
            .unwrap()
            .bytes()
            .map(base::normalize)
            .collect(),
        min_matches: *args.get_one::<usize>("min_matches").unwrap(),
        max_mismatches: *args.get_one::<usize>("max_mismatches").unwrap(),
        confident_matches: *args.get_one::<usize>("confident_matches").unwrap(),
        quality_cutoff: *args.get_one::<u8>("quality_cutoff").unwrap(),
        max_mismatch_fraction: *args.get_one::<f32>("max_mismatch_fraction").unwrap(),
        max_hq_mismatch_fraction: *args.get_one::<f32>("max_hq_mismatch_fraction").unwrap(),
    };
    let consensus = ConsensusParams {
        agree_ceiling: *args.get_one::<u8>("agree_ceiling").unwrap(),
        disagree_ceiling: *args.get_one::<u8>("disagree_ceiling").unwrap(),
        cap_policy: args.get_one::<String>("cap_policy").unwrap().parse::<CapPolicy>()?,
        min_quality: *args.get_one::<u8>("min_quality").unwrap(),
        min_length: *args.get_one::<usize>("min_length").unwrap(),
    };

    let params = CollapseParams {
        score: super::align::score_params(args)?,
        boundary,
        consensus,
        diagnostics: args.contains_id("diagnostics"),
    };
    params.validate()?;
    Ok(params)
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    //----------------------------
    // Args
    //----------------------------
    let infile1 = args.get_one::<String>("infile1").unwrap();
    let infile2 = args.get_one::<String>("infile2").unwrap();
    let opt_parallel = *args.get_one::<usize>("parallel").unwrap();
    let opt_max_pairs = args.get_one::<u64>("max_pairs").copied();
    let opt_progress = *args.get_one::<u64>("progress").unwrap();

    let params = collapse_params(args)?;

    //----------------------------
    // Ops
    //----------------------------
    let reference = match args.get_one::<String>("reference") {
        Some(infile) => {
            let reference = ReferenceReads::from_path(infile)?;
            log::info!("loaded {} reference reads from {}", reference.len(), infile);
            Some(reference)
        }
        None => None,
    };

    let reader = PairedReader::from_paths(infile1, infile2, opt_max_pairs)?;
    let sinks = Sinks {
        resolved: SharedFastqWriter::from_path(args.get_one::<String>("outfile").unwrap())?,
        diagnostics: args
            .get_one::<String>("diagnostics")
            .map(|outfile| SharedTsvWriter::from_path(outfile, Diagnostics::HEADER))
            .transpose()?,
        failed: args
            .get_one::<String>("failed")
            .map(|prefix| SharedPairWriter::from_prefix(prefix))
            .transpose()?,
    };
    let counters = Counters::new();

    log::info!(
        "collapsing {} and {} with {} worker(s)",
        infile1,
        infile2,
        opt_parallel.max(1)
    );
    let ctx = WorkerContext {
        reader: &reader,
        sinks: &sinks,
        counters: &counters,
        params: &params,
        reference: reference.as_ref(),
        progress: opt_progress,
    };
    run_workers(&ctx, opt_parallel)?;
    sinks.finish()?;

    //----------------------------
    // Output
    //----------------------------
    let summary = counters.summary();
    log::info!("{}", summary);

    if let Some(outfile) = args.get_one::<String>("summary") {
        let mut writer = biomodal::output(outfile)?;
        writer.write_fmt(format_args!("{}\n{}\n", Summary::TSV_HEADER, summary.to_tsv()))?;
        writer.finish()?;
    }

    Ok(())
}
