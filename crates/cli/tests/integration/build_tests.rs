//! End-to-end tests of the mkr binary.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn builds_default_target() {
  let env = TestEnv::with_makefile("all: greet\ngreet:\n\techo hello from greet\n");
  env
    .mkr()
    .assert()
    .success()
    .stdout(predicate::str::contains("\techo hello from greet\nhello from greet\n"))
    .stdout(predicate::str::contains("Built 1 target(s)"));
}

#[test]
fn command_line_definition_overrides_build_file() {
  let env = TestEnv::with_makefile("MSG = from-file\nall:\n\techo $(MSG)\n");
  env
    .mkr()
    .arg("MSG=from-cli")
    .assert()
    .success()
    .stdout(predicate::str::contains("from-cli"))
    .stdout(predicate::str::contains("from-file").not());
}

#[test]
fn environment_is_visible_to_build_file() {
  let env = TestEnv::with_makefile("all:\n\techo flavor=$(MKR_FLAVOR)\n");
  env
    .mkr()
    .env("MKR_FLAVOR", "mint")
    .assert()
    .success()
    .stdout(predicate::str::contains("flavor=mint"));
}

#[test]
fn named_goal_only() {
  let env = TestEnv::with_makefile("all:\n\techo building all\nother:\n\techo building other\n");
  env
    .mkr()
    .arg("other")
    .assert()
    .success()
    .stdout(predicate::str::contains("building other"))
    .stdout(predicate::str::contains("building all").not());
}

#[test]
fn failing_recipe_exits_nonzero() {
  let env = TestEnv::with_makefile("all:\n\tmkr-missing-tool-xyz --flag\n");
  env
    .mkr()
    .assert()
    .code(1)
    .stderr(predicate::str::contains("error building all"))
    .stderr(predicate::str::contains("Build failed"));
}

#[test]
fn keep_going_builds_the_rest() {
  let env = TestEnv::with_makefile("all: bad good\nbad:\n\tmkr-missing-tool-xyz\ngood:\n\techo good ran\n");
  env
    .mkr()
    .arg("-k")
    .assert()
    .code(1)
    .stdout(predicate::str::contains("good ran"))
    .stderr(predicate::str::contains("error building bad"));
}

#[test]
fn dry_run_prints_but_does_not_run() {
  let env = TestEnv::with_makefile("out:\n\t@mkdir made\n");
  env
    .mkr()
    .arg("-n")
    .assert()
    .success()
    .stdout(predicate::str::contains("\tmkdir made"));
  assert!(!env.path("made").exists());
}

#[test]
fn silent_suppresses_echo() {
  let env = TestEnv::with_makefile("all:\n\techo quiet please\n");
  env
    .mkr()
    .arg("-s")
    .assert()
    .success()
    .stdout(predicate::str::contains("quiet please\n"))
    .stdout(predicate::str::contains("\techo quiet please").not());
}

#[test]
fn existing_goal_is_up_to_date() {
  let env = TestEnv::with_makefile("done.txt:\n\techo never runs\n");
  env.write_file("done.txt", "here");
  env
    .mkr()
    .arg("done.txt")
    .assert()
    .success()
    .stdout(predicate::str::contains("'done.txt' is up to date"))
    .stdout(predicate::str::contains("never runs").not());
}

#[test]
fn explicit_file_and_directory() {
  let env = TestEnv::empty();
  env.write_file("proj/build.mk", "all:\n\techo custom file\n");
  let mut cmd = env.mkr();
  cmd
    .arg("-C")
    .arg(env.dir().join("proj"))
    .args(["-f", "build.mk"])
    .assert()
    .success()
    .stdout(predicate::str::contains("custom file"));
}

#[test]
fn json_report_on_stdout() {
  let env = TestEnv::with_makefile("all:\n\techo json run\n");
  let output = env.mkr().args(["--format", "json"]).output().unwrap();
  assert!(output.status.success());

  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["success"], true);
  assert_eq!(report["built"][0], "all");
  assert!(String::from_utf8_lossy(&output.stderr).contains("json run"));
}

#[test]
fn parse_error_names_file_and_line() {
  let env = TestEnv::with_makefile("X = 1\n!IF\n!ENDIF\n");
  env
    .mkr()
    .assert()
    .code(1)
    .stderr(predicate::str::contains("Makefile(2)"));
}

#[test]
fn messages_are_printed_while_reading() {
  let env = TestEnv::with_makefile("!MESSAGE reading now\nall:\n\techo done\n");
  env
    .mkr()
    .assert()
    .success()
    .stdout(predicate::str::starts_with("reading now\n"));
}

#[test]
fn nothing_to_build() {
  let env = TestEnv::with_makefile("X = 1\n");
  env
    .mkr()
    .assert()
    .code(1)
    .stderr(predicate::str::contains("nothing to build"));
}
