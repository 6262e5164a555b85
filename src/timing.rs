use std::path::Path;
use std::time::Duration;

/// Observer invoked by the scheduler around each decode-and-generate job
/// when timing is enabled. Implementations must be cheap; they run on the
/// worker that just finished the job.
pub trait JobTimer: Send + Sync {
    fn on_job_timed(&self, path: &Path, duration: Duration);
}

/// Prints per-job durations to the console.
pub struct ConsoleTimer;

impl JobTimer for ConsoleTimer {
    fn on_job_timed(&self, path: &Path, duration: Duration) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        println!("load_thumbnail [{}]: {:.4}s", name, duration.as_secs_f64());
    }
}
