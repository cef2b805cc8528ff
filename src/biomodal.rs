extern crate clap;
use clap::*;

mod cmd_biomodal;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app = Command::new("biomodal")
        .version(crate_version!())
        .author(crate_authors!())
        .about("`biomodal` - Collapse hairpin-joined read pairs")
        .propagate_version(true)
        .arg_required_else_help(true)
        .color(ColorChoice::Auto)
        .subcommand(cmd_biomodal::align::make_subcommand())
        .subcommand(cmd_biomodal::collapse::make_subcommand())
        .after_help(
            r###"Subcommands:

* align    - Align two sequences with selectable free ends
* collapse - Collapse paired FASTQ files into one consensus read per fragment

Logging goes to stderr; set RUST_LOG (e.g. RUST_LOG=debug) to change the level.

"###,
        );

    // Check which subcommand the user ran...
    match app.get_matches().subcommand() {
        Some(("align", sub_matches)) => cmd_biomodal::align::execute(sub_matches),
        Some(("collapse", sub_matches)) => cmd_biomodal::collapse::execute(sub_matches),
        _ => unreachable!(),
    }?;

    Ok(())
}
