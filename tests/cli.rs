use std::path::Path;
use std::process::{Command, Output};

fn run_rvm(heap: &Path, args: &[&str]) -> Output {
    let exe = env!("CARGO_BIN_EXE_rvm");
    Command::new(exe)
        .arg("--heap")
        .arg(heap)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("run rvm")
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn revisions_persist_across_runs() {
    let directory = tempfile::tempdir().expect("create temp dir");
    let heap = directory.path().join("state.rvm");

    assert_eq!(stdout(&run_rvm(&heap, &["set", "42"])), "revision 1\n");
    assert_eq!(
        stdout(&run_rvm(&heap, &["set", "([1 2] . :tail)"])),
        "revision 2\n"
    );

    assert_eq!(stdout(&run_rvm(&heap, &["get", "1"])), "42\n");
    assert_eq!(
        stdout(&run_rvm(&heap, &["get", "--deep"])),
        "([1 2] . :tail)\n"
    );
    assert_eq!(stdout(&run_rvm(&heap, &["eval"])), "([1 2] . :tail)\n");

    let info = stdout(&run_rvm(&heap, &["info"]));
    assert!(info.contains("revision: 2"), "{info}");
}

#[test]
fn failures_exit_non_zero() {
    let directory = tempfile::tempdir().expect("create temp dir");
    let heap = directory.path().join("state.rvm");

    let output = run_rvm(&heap, &["get", "3"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no such revision: 3"));

    let output = run_rvm(&heap, &["set", "[1 2"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unclosed array"));
}
