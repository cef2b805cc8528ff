use biomodal::libs::base;
use biomodal::libs::nw::{Aligner, FreeEnds, ScoreParams};
use clap::*;
use std::io::Write;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("align")
        .about("Aligns two sequences with the affine-gap aligner")
        .after_help(
            r###"
Aligns two sequences given on the command line and prints the score followed
by the alignment as three rows: seq1, a match line and seq2.

Notes:
* Symbols are upper-cased; anything outside ACGTNMK- becomes N
* M is a modified C and K its complement; they score `--modc` against C/G
* Leading and trailing gaps on either sequence can be made free with
  `--free-ends`, a comma-separated list of:
    seq1-prefix, seq2-prefix, seq1-suffix, seq2-suffix
* Match line: `|` identical, `:` modified vs unmodified, space otherwise
* `--band` restricts the search to diagonals near the main one and fails when
  the optimum may lie outside; `--approx` widens the band until it is safe

Examples:
1. Global alignment:
   biomodal align ACGTACGT ACGACGT

2. Free trailing gaps on both sequences:
   biomodal align ACGTACGTTT ACGTACG --free-ends seq1-suffix,seq2-suffix

3. Banded search that widens automatically:
   biomodal align ACGTACGT ACGACGT --approx

"###,
        )
        .arg(
            Arg::new("seq1")
                .required(true)
                .index(1)
                .help("First sequence"),
        )
        .arg(
            Arg::new("seq2")
                .required(true)
                .index(2)
                .help("Second sequence"),
        )
        .arg(
            Arg::new("free_ends")
                .long("free-ends")
                .num_args(1)
                .action(ArgAction::Append)
                .value_delimiter(',')
                .value_parser(["seq1-prefix", "seq2-prefix", "seq1-suffix", "seq2-suffix"])
                .help("Ends where gaps cost nothing"),
        )
        .arg(
            Arg::new("band")
                .long("band")
                .value_parser(value_parser!(usize))
                .num_args(1)
                .conflicts_with("approx")
                .help("Band width around the diagonal"),
        )
        .arg(
            Arg::new("approx")
                .long("approx")
                .action(ArgAction::SetTrue)
                .help("Start with a narrow band and double it until sufficient"),
        )
        .arg(
            Arg::new("plain")
                .long("plain")
                .action(ArgAction::SetTrue)
                .help("Score modified bases as ordinary mismatches"),
        )
        .args(score_args())
        .arg(
            Arg::new("outfile")
                .long("outfile")
                .short('o')
                .num_args(1)
                .default_value("stdout")
                .help("Output filename. [stdout] for screen"),
        )
}

/// Scoring options shared with `collapse`.
pub fn score_args() -> Vec<Arg> {
    vec![
        Arg::new("match")
            .long("match")
            .value_parser(value_parser!(i32))
            .default_value("2")
            .allow_negative_numbers(true)
            .help("Score for identical bases"),
        Arg::new("mismatch")
            .long("mismatch")
            .value_parser(value_parser!(i32))
            .default_value("-3")
            .allow_negative_numbers(true)
            .help("Score for mismatching bases"),
        Arg::new("modc")
            .long("modc")
            .value_parser(value_parser!(i32))
            .default_value("1")
            .allow_negative_numbers(true)
            .help("Score for a modified base against its unmodified form"),
        Arg::new("missing")
            .long("missing")
            .value_parser(value_parser!(i32))
            .default_value("0")
            .allow_negative_numbers(true)
            .help("Score for anything against N"),
        Arg::new("gap_open")
            .long("gap-open")
            .value_parser(value_parser!(i32))
            .default_value("-5")
            .allow_negative_numbers(true)
            .help("Gap opening penalty"),
        Arg::new("gap_extend")
            .long("gap-extend")
            .value_parser(value_parser!(i32))
            .default_value("-2")
            .allow_negative_numbers(true)
            .help("Gap extension penalty"),
    ]
}

pub fn score_params(args: &ArgMatches) -> anyhow::Result<ScoreParams> {
    let params = ScoreParams {
        match_score: *args.get_one::<i32>("match").unwrap(),
        mismatch_score: *args.get_one::<i32>("mismatch").unwrap(),
        modc_score: *args.get_one::<i32>("modc").unwrap(),
        missing_score: *args.get_one::<i32>("missing").unwrap(),
        gap_open: *args.get_one::<i32>("gap_open").unwrap(),
        gap_extend: *args.get_one::<i32>("gap_extend").unwrap(),
    };
    params.validate()?;
    Ok(params)
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    //----------------------------
    // Args
    //----------------------------
    let seq1: Vec<u8> = args
        .get_one::<String>("seq1")
        .unwrap()
        .bytes()
        .map(base::normalize)
        .collect();
    let seq2: Vec<u8> = args
        .get_one::<String>("seq2")
        .unwrap()
        .bytes()
        .map(base::normalize)
        .collect();

    let mut free_ends = FreeEnds::NONE;
    if let Some(ends) = args.get_many::<String>("free_ends") {
        for end in ends {
            match end.as_str() {
                "seq1-prefix" => free_ends.seq1_prefix = true,
                "seq2-prefix" => free_ends.seq2_prefix = true,
                "seq1-suffix" => free_ends.seq1_suffix = true,
                "seq2-suffix" => free_ends.seq2_suffix = true,
                _ => unreachable!(),
            }
        }
    }

    let score = score_params(args)?;
    let plain = args.get_flag("plain");
    let opt_band = args.get_one::<usize>("band").copied();
    let is_approx = args.get_flag("approx");

    let mut writer = biomodal::writer(args.get_one::<String>("outfile").unwrap())?;

    //----------------------------
    // Ops
    //----------------------------
    let params = score.params(free_ends);
    let scoring = |a: &u8, b: &u8| {
        if plain {
            score.plain(*a, *b)
        } else {
            score.modc_aware(*a, *b)
        }
    };

    let mut aligner = Aligner::new();
    let alignment = if let Some(width) = opt_band {
        aligner
            .align_banded(&seq1, &seq2, scoring, &params, width)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "band width {} cannot guarantee the optimal alignment; widen it or use --approx",
                    width
                )
            })?
    } else if is_approx {
        aligner.approx_align(&seq1, &seq2, scoring, &params)
    } else {
        aligner.align(&seq1, &seq2, scoring, &params)
    };

    //----------------------------
    // Output
    //----------------------------
    let (row1, row2) = alignment.render(|s| *s);
    let middle: Vec<u8> = alignment
        .path
        .iter()
        .map(|col| match col {
            (Some(a), Some(b)) if a == b => b'|',
            (Some(a), Some(b)) if base::equivalent(*a, *b) => b':',
            _ => b' ',
        })
        .collect();

    writer.write_fmt(format_args!("score\t{}\n", alignment.score))?;
    for row in [row1, middle, row2] {
        writer.write_all(&row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    Ok(())
}
