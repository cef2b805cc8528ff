use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn command_align_global() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("biomodal")?;
    let output = cmd.arg("align").arg("AACCGGTT").arg("AACCTT").output()?;
    let stdout = String::from_utf8(output.stdout)?;

    assert!(output.status.success());
    assert_eq!(stdout, "score\t5\nAACCGGTT\n||||  ||\nAACC--TT\n");

    Ok(())
}

#[test]
fn command_align_free_ends() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("biomodal")?;
    let output = cmd
        .arg("align")
        .arg("ACGTAC")
        .arg("ACG")
        .arg("--free-ends")
        .arg("seq1-suffix,seq2-suffix")
        .output()?;
    let stdout = String::from_utf8(output.stdout)?;

    assert_eq!(stdout.lines().next(), Some("score\t6"));
    assert_eq!(stdout.lines().nth(3), Some("ACG---"));

    // Same sequences, trailing gaps paid for
    let mut cmd = Command::cargo_bin("biomodal")?;
    cmd.arg("align")
        .arg("ACGTAC")
        .arg("ACG")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("score\t-3\n"));

    Ok(())
}

#[test]
fn command_align_modc() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("biomodal")?;
    let output = cmd.arg("align").arg("acmt").arg("ACCT").output()?;
    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(stdout, "score\t7\nACMT\n||:|\nACCT\n");

    let mut cmd = Command::cargo_bin("biomodal")?;
    cmd.arg("align")
        .arg("ACMT")
        .arg("ACCT")
        .arg("--plain")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("score\t3\n"));

    Ok(())
}

#[test]
fn command_align_band() -> anyhow::Result<()> {
    let seq1 = "GGGGGGGGACGTACGTAC";
    let seq2 = "ACGTACGTACTTTTTTTT";

    let mut cmd = Command::cargo_bin("biomodal")?;
    cmd.arg("align")
        .arg(seq1)
        .arg(seq2)
        .arg("--free-ends")
        .arg("seq1-prefix")
        .arg("--free-ends")
        .arg("seq2-suffix")
        .arg("--band")
        .arg("1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("band width 1"));

    let mut cmd = Command::cargo_bin("biomodal")?;
    cmd.arg("align")
        .arg(seq1)
        .arg(seq2)
        .arg("--free-ends")
        .arg("seq1-prefix,seq2-suffix")
        .arg("--approx")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("score\t20\n"));

    Ok(())
}

#[test]
fn command_align_bad_args() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("biomodal")?;
    cmd.arg("align")
        .arg("ACGT")
        .arg("ACGT")
        .arg("--free-ends")
        .arg("seq3-prefix")
        .assert()
        .failure();

    let mut cmd = Command::cargo_bin("biomodal")?;
    cmd.arg("align")
        .arg("ACGT")
        .arg("ACGT")
        .arg("--gap-open")
        .arg("4")
        .assert()
        .failure()
        .stderr(predicate::str::contains("gap penalties"));

    let mut cmd = Command::cargo_bin("biomodal")?;
    cmd.arg("align")
        .arg("ACGT")
        .arg("AGT")
        .arg("--gap-open")
        .arg("-300000000")
        .assert()
        .failure()
        .stderr(predicate::str::contains("magnitude limit"));

    Ok(())
}
