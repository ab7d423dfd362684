use mkr_lib::MakeError;
use mkr_lib::graph::GraphError;

use super::common::{Project, RecordingSpawner, touch_offset, write_file};

#[tokio::test]
async fn suffix_rule_builds_from_existing_source() {
  let project = Project::new(".c.obj:\n\tcompile $<\nall: foo.obj\n");
  write_file(&project.path("foo.c"), "int main;");

  let mut ctx = project.context();
  let spawner = RecordingSpawner::default();
  let outcome = project.build(&mut ctx, &[], &spawner).await.unwrap();

  assert_eq!(spawner.commands(), vec!["compile foo.c"]);
  assert_eq!(outcome.report.built, vec!["foo.obj"]);
}

#[tokio::test]
async fn inference_recipe_sees_late_definitions() {
  let project = Project::new(".c.obj:\n\t$(CC) $<\nall: foo.obj\nCC = late-cc\n");
  write_file(&project.path("foo.c"), "");

  let mut ctx = project.context();
  let spawner = RecordingSpawner::default();
  project.build(&mut ctx, &[], &spawner).await.unwrap();
  assert_eq!(spawner.commands(), vec!["late-cc foo.c"]);
}

#[tokio::test]
async fn two_level_chain_builds_intermediate_first() {
  let project = Project::new(".c.obj:\n\tcompile $<\n.y.c:\n\tyacc $<\nall: foo.obj\n");
  write_file(&project.path("foo.y"), "%%");

  let mut ctx = project.context();
  let spawner = RecordingSpawner::default();
  let outcome = project.build(&mut ctx, &[], &spawner).await.unwrap();

  assert_eq!(spawner.commands(), vec!["yacc foo.y", "compile foo.c"]);
  assert_eq!(outcome.report.built, vec!["foo.c", "foo.obj"]);
  let intermediate = ctx.graph().find(&ctx.root_dir().join("foo.c")).unwrap();
  assert!(ctx.graph().target(intermediate).inference.is_some());
}

#[tokio::test]
async fn directory_qualified_rule() {
  let project = Project::new("{src}.c{obj}.obj:\n\tcompile $< $@\nall: obj/main.obj\n");
  write_file(&project.path("src/main.c"), "");

  let mut ctx = project.context();
  let spawner = RecordingSpawner::default();
  project.build(&mut ctx, &[], &spawner).await.unwrap();

  let commands = spawner.commands();
  assert_eq!(commands.len(), 1);
  #[cfg(unix)]
  assert_eq!(commands[0], "compile src/main.c obj/main.obj");
}

#[tokio::test]
async fn up_to_date_inferred_target() {
  let project = Project::new(".c.obj:\n\tcompile $<\nall: foo.obj\n");
  write_file(&project.path("foo.c"), "");
  write_file(&project.path("foo.obj"), "");
  touch_offset(&project.path("foo.c"), -60);

  let mut ctx = project.context();
  let spawner = RecordingSpawner::default();
  project.build(&mut ctx, &["foo.obj"], &spawner).await.unwrap();
  assert!(spawner.commands().is_empty());
}

#[tokio::test]
async fn no_source_means_no_recipe() {
  let project = Project::new(".c.obj:\n\tcompile $<\nall: foo.obj\n");
  let mut ctx = project.context();
  let err = project
    .build(&mut ctx, &[], &RecordingSpawner::default())
    .await
    .err()
    .unwrap();
  assert!(matches!(err, MakeError::Graph(GraphError::NoRecipe(ref name)) if name == "foo.obj"));
}
