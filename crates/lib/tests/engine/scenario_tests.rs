use std::sync::atomic::Ordering;
use std::time::Duration;

use mkr_lib::execute::TokioSpawner;
use mkr_lib::graph::GraphError;
use mkr_lib::MakeError;

use super::common::{Project, RecordingSpawner, touch_offset, write_file};

#[tokio::test]
async fn newer_prerequisite_rebuilds_target() {
  let project = Project::new("a.exe: a.obj\n\tlink a.obj\n");
  write_file(&project.path("a.exe"), "old");
  write_file(&project.path("a.obj"), "new");
  touch_offset(&project.path("a.exe"), -60);

  let mut ctx = project.context();
  let spawner = RecordingSpawner::default();
  let outcome = project.build(&mut ctx, &[], &spawner).await.unwrap();

  assert_eq!(spawner.commands(), vec!["link a.obj"]);
  assert_eq!(outcome.report.built, vec!["a.exe"]);
  assert!(outcome.out.contains("\tlink a.obj\n"));
}

#[tokio::test]
async fn older_prerequisite_leaves_target_alone() {
  let project = Project::new("a.exe: a.obj\n\tlink a.obj\n");
  write_file(&project.path("a.obj"), "old");
  write_file(&project.path("a.exe"), "new");
  touch_offset(&project.path("a.obj"), -60);

  let mut ctx = project.context();
  let spawner = RecordingSpawner::default();
  let outcome = project.build(&mut ctx, &["a.exe"], &spawner).await.unwrap();

  assert!(spawner.commands().is_empty());
  assert!(outcome.report.built.is_empty());
  assert_eq!(ctx.up_to_date_goals(), vec!["a.exe"]);
}

#[tokio::test]
async fn always_rebuild_ignores_timestamps() {
  let mut project = Project::new("a.exe: a.obj\n\tlink a.obj\n");
  write_file(&project.path("a.obj"), "old");
  write_file(&project.path("a.exe"), "new");
  touch_offset(&project.path("a.obj"), -60);
  project.config.always_rebuild = true;

  let mut ctx = project.context();
  let spawner = RecordingSpawner::default();
  project.build(&mut ctx, &["a.exe"], &spawner).await.unwrap();
  assert_eq!(spawner.commands(), vec!["link a.obj"]);
}

#[tokio::test]
async fn false_condition_takes_else_branch() {
  let project = Project::new("!IF 1==2\nV = body\n!ELSE\nV = other\n!ENDIF\nall:\n\techo $(V)\n");
  let mut ctx = project.context();
  let outcome = project.build(&mut ctx, &[], &RecordingSpawner::default()).await.unwrap();

  assert_eq!(ctx.scopes().lookup(ctx.root_scope(), "V").value(), "other");
  assert_eq!(outcome.out, "\techo other\nother\n");
}

#[tokio::test]
async fn failed_launch_of_tolerant_command_continues() {
  let project = Project::new("all:\n\t-mkr-no-such-program-xyz\n\techo after\n");
  let mut ctx = project.context();
  let outcome = project.build(&mut ctx, &[], &TokioSpawner).await.unwrap();

  assert!(outcome.report.is_success());
  assert_eq!(outcome.report.built, vec!["all"]);
  assert!(outcome.out.contains("command not found (ignored)"));
  assert!(outcome.out.ends_with("\techo after\nafter\n"));
  assert!(outcome.err.is_empty());
}

#[tokio::test]
async fn failed_launch_without_prefix_fails_target() {
  let project = Project::new("all:\n\tmkr-no-such-program-xyz\n\techo after\n");
  let mut ctx = project.context();
  let outcome = project.build(&mut ctx, &[], &TokioSpawner).await.unwrap();

  assert_eq!(outcome.report.failed[0].target, "all");
  assert!(!outcome.out.contains("after"));
  assert!(outcome.err.contains("error building all"));
}

#[tokio::test]
async fn pool_of_two_runs_third_target_later() {
  let mut project = Project::new("all: x y z\nx:\n\ttool x\ny:\n\ttool y\nz:\n\ttool z\n");
  project.config.jobs = 2;
  let mut ctx = project.context();
  let spawner = RecordingSpawner {
    delay: Duration::from_millis(50),
    ..Default::default()
  };
  let outcome = project.build(&mut ctx, &[], &spawner).await.unwrap();

  assert!(outcome.report.is_success());
  assert_eq!(spawner.peak.load(Ordering::SeqCst), 2);
  let events = spawner.events.lock().unwrap().clone();
  assert_eq!(&events[..2], &["start x", "start y"]);
  let third = events.iter().position(|e| e == "start z").unwrap();
  let first_end = events.iter().position(|e| e.starts_with("end ")).unwrap();
  assert!(third > first_end, "{:?}", events);
}

#[tokio::test]
async fn requested_jobs_are_clamped() {
  let mut project = Project::new("all: x y\nx:\n\ttool x\ny:\n\ttool y\n");
  project.config.jobs = 1000;
  let mut ctx = project.context();
  let outcome = project.build(&mut ctx, &[], &RecordingSpawner::default()).await.unwrap();
  assert!(outcome.report.peak_jobs <= 64);
}

#[tokio::test]
async fn command_line_definition_wins_everywhere() {
  let project = Project::new("FOO = a\nBAR = $(FOO)-suffix\nall: sub [dirs target=show]\n\techo root $(FOO) $(BAR)\n");
  write_file(&project.path("sub/Makefile"), "FOO = c\nshow:\n\techo sub $(FOO)\n");

  let mut ctx = project.context();
  ctx.set_command_line_variable("FOO", "b");
  let outcome = project.build(&mut ctx, &[], &RecordingSpawner::default()).await.unwrap();

  assert!(outcome.out.contains("\nsub b\n"), "{}", outcome.out);
  assert!(outcome.out.contains("\nroot b b-suffix\n"), "{}", outcome.out);
  assert_eq!(outcome.report.built, vec!["sub/show", "all"]);
}

#[tokio::test]
async fn circular_dependency_is_fatal() {
  let project = Project::new("a: b\n\techo a\nb: a\n\techo b\n");
  let mut ctx = project.context();
  let result = project.build(&mut ctx, &[], &RecordingSpawner::default()).await;
  assert!(matches!(result, Err(MakeError::Graph(GraphError::Cycle(_)))));
}

#[tokio::test]
async fn dry_run_touches_nothing() {
  let mut project = Project::new("out.txt:\n\tsh -c \"echo hi > out.txt\"\n");
  project.config.dry_run = true;
  let mut ctx = project.context();
  let outcome = project.build(&mut ctx, &[], &TokioSpawner).await.unwrap();
  assert!(outcome.out.contains("echo hi > out.txt"));
  assert!(!project.path("out.txt").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn real_build_then_up_to_date() {
  let project = Project::new("out.txt: in.txt\n\tsh -c \"cat in.txt > out.txt\"\n");
  write_file(&project.path("in.txt"), "payload\n");
  touch_offset(&project.path("in.txt"), -60);

  let mut ctx = project.context();
  let outcome = project.build(&mut ctx, &["out.txt"], &TokioSpawner).await.unwrap();
  assert_eq!(outcome.report.built, vec!["out.txt"]);
  assert_eq!(std::fs::read_to_string(project.path("out.txt")).unwrap(), "payload\n");

  let mut ctx = project.context();
  let outcome = project.build(&mut ctx, &["out.txt"], &TokioSpawner).await.unwrap();
  assert!(outcome.report.built.is_empty());
  assert_eq!(ctx.up_to_date_goals(), vec!["out.txt"]);
}
