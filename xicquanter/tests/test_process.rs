use std::{error::Error, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;

#[test]
fn test_file_missing() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("xicquanter")?;

    cmd.arg("not_real.json").arg("-o").arg("-");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("An IO error occurred"));
    Ok(())
}

#[test]
fn test_malformed_read_mode() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("xicquanter")?;

    cmd.arg("./tests/data/small_document.json")
        .args(["-m", "sometimes"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid value 'sometimes'"));
    Ok(())
}

#[test]
fn test_run_document() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("xicquanter")?;
    cmd.env("RUST_LOG", "info");
    cmd.arg("./tests/data/small_document.json")
        .args(["-o", "-", "-m", "memory"]);
    let result = cmd.assert().success();
    result
        .stdout(predicate::str::starts_with("file\tlabels\tcrosslink\tpeptide"))
        .stdout(predicate::str::contains("KPEPTIDER-PEPKTIDER"))
        .stdout(predicate::str::contains("2, 3"))
        .stderr(predicate::str::contains("Crosslinks: 4 | Recalculated: 4 | Failed: 0"))
        .stderr(predicate::str::contains("Integrated: 4 | Failed: 0"));
    Ok(())
}
