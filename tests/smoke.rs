use assert_cmd::Command;

#[test]
fn cli_help_runs() {
    let mut cmd = Command::cargo_bin("relpca").expect("binary exists");
    cmd.arg("--help").assert().success();
}

#[test]
fn train_requires_inputs() {
    let mut cmd = Command::cargo_bin("relpca").expect("binary exists");
    cmd.arg("train").assert().failure();
}
