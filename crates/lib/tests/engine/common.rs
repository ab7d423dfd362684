use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use mkr_lib::execute::spawn::{ChildOutcome, SpawnRequest};
use mkr_lib::execute::{BuildReport, ExecuteConfig, SpawnError, SpawnedChild, Spawner};
use mkr_lib::{MakeContext, MakeError};
use tempfile::TempDir;

pub fn write_file(path: &Path, content: &str) {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(path, content).unwrap();
}

/// Shift a file's modification time relative to now.
pub fn touch_offset(path: &Path, seconds: i64) {
  let now = SystemTime::now();
  let time = if seconds >= 0 {
    now + Duration::from_secs(seconds as u64)
  } else {
    now - Duration::from_secs(seconds.unsigned_abs())
  };
  std::fs::File::options()
    .write(true)
    .open(path)
    .unwrap()
    .set_modified(time)
    .unwrap();
}

/// Spawner that records requests and completes each child after `delay`.
#[derive(Default)]
pub struct RecordingSpawner {
  pub calls: Mutex<Vec<SpawnRequest>>,
  pub delay: Duration,
  pub active: Arc<AtomicUsize>,
  pub peak: Arc<AtomicUsize>,
  pub events: Arc<Mutex<Vec<String>>>,
}

impl RecordingSpawner {
  pub fn commands(&self) -> Vec<String> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .map(|r| std::iter::once(r.program.clone()).chain(r.args.iter().cloned()).collect::<Vec<_>>().join(" "))
      .collect()
  }
}

impl Spawner for RecordingSpawner {
  fn spawn(&self, request: SpawnRequest) -> Result<SpawnedChild, SpawnError> {
    let name = request.args.last().cloned().unwrap_or_default();
    self.calls.lock().unwrap().push(request);
    let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);
    self.events.lock().unwrap().push(format!("start {}", name));

    let active = self.active.clone();
    let events = self.events.clone();
    let delay = self.delay;
    Ok(SpawnedChild {
      pid: None,
      completion: Box::pin(async move {
        tokio::time::sleep(delay).await;
        active.fetch_sub(1, Ordering::SeqCst);
        events.lock().unwrap().push(format!("end {}", name));
        Ok::<_, std::io::Error>(ChildOutcome::default())
      }),
      kill: None,
    })
  }
}

pub struct Project {
  pub tmp: TempDir,
  pub config: ExecuteConfig,
}

pub struct Outcome {
  pub report: BuildReport,
  pub out: String,
  pub err: String,
}

impl Project {
  pub fn new(makefile: &str) -> Self {
    let tmp = TempDir::new().unwrap();
    write_file(&tmp.path().join("Makefile"), makefile);
    Self {
      tmp,
      config: ExecuteConfig {
        jobs: 1,
        ..Default::default()
      },
    }
  }

  pub fn path(&self, name: &str) -> std::path::PathBuf {
    self.tmp.path().join(name)
  }

  pub fn context(&self) -> MakeContext {
    MakeContext::new(self.tmp.path(), self.config.clone()).unwrap()
  }

  /// Load, plan and run `goals` through `spawner`.
  pub async fn build(&self, ctx: &mut MakeContext, goals: &[&str], spawner: &impl Spawner) -> Result<Outcome, MakeError> {
    ctx.load_with_output(None, Vec::new())?;
    let goals: Vec<String> = goals.iter().map(|g| g.to_string()).collect();
    ctx.plan(&goals)?;
    let mut out = Vec::new();
    let mut err = Vec::new();
    let report = ctx.execute_with(spawner, &mut out, &mut err, false).await?;
    Ok(Outcome {
      report,
      out: String::from_utf8(out).unwrap(),
      err: String::from_utf8(err).unwrap(),
    })
  }
}
