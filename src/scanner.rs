use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::cache::ThumbnailCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{is_hdr_image, ImageFileRef, Thumbnail};
use crate::scheduler::{JobOutcome, Scheduler};
use crate::timing::{ConsoleTimer, JobTimer};

/// Invoked exactly once per recognized file per active session: cache hits
/// synchronously during `start_scan`, everything else asynchronously from
/// `pump`. Runs only on the consumer thread.
pub type ThumbnailCallback = Box<dyn FnMut(&ImageFileRef, Result<Arc<Thumbnail>>)>;

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Completed,
    Cancelled,
}

/// Snapshot of one folder-browse operation's progress.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ScanProgress {
    pub folder_path: String,
    pub total_files: usize,
    pub processed_files: usize,
    pub succeeded_files: usize,
    pub failed_files: usize,
    pub status: ScanStatus,
}

/// One folder-browse operation: the unit of cancellation and result scoping.
/// At most one session is active at a time; starting a new scan supersedes
/// the previous one.
pub struct ScanSession {
    pub id: u64,
    pub folder: PathBuf,
    pub started_at: DateTime<Utc>,
    files: Vec<ImageFileRef>,
    progress: Mutex<ScanProgress>,
    cancelled: AtomicBool,
}

impl ScanSession {
    fn new(id: u64, folder: &Path, total_files: usize, files: Vec<ImageFileRef>) -> Self {
        let status = if total_files == 0 {
            ScanStatus::Completed
        } else {
            ScanStatus::Running
        };
        Self {
            id,
            folder: folder.to_path_buf(),
            started_at: Utc::now(),
            files,
            progress: Mutex::new(ScanProgress {
                folder_path: folder.to_string_lossy().to_string(),
                total_files,
                processed_files: 0,
                succeeded_files: 0,
                failed_files: 0,
                status,
            }),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Files discovered by this scan, in delivery-slot order.
    pub fn files(&self) -> &[ImageFileRef] {
        &self.files
    }

    pub fn progress(&self) -> ScanProgress {
        self.progress.lock().unwrap().clone()
    }

    pub fn is_complete(&self) -> bool {
        let progress = self.progress.lock().unwrap();
        progress.processed_files >= progress.total_files
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn record_success(&self) {
        let mut progress = self.progress.lock().unwrap();
        progress.processed_files += 1;
        progress.succeeded_files += 1;
        if progress.processed_files >= progress.total_files
            && progress.status == ScanStatus::Running
        {
            progress.status = ScanStatus::Completed;
        }
    }

    fn record_failure(&self) {
        let mut progress = self.progress.lock().unwrap();
        progress.processed_files += 1;
        progress.failed_files += 1;
        if progress.processed_files >= progress.total_files
            && progress.status == ScanStatus::Running
        {
            progress.status = ScanStatus::Completed;
        }
    }

    fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut progress = self.progress.lock().unwrap();
        if progress.status == ScanStatus::Running {
            progress.status = ScanStatus::Cancelled;
        }
    }
}

/// Walks a folder of HDR images and keeps the thumbnail grid fed.
///
/// Owned by the consumer thread. Workers never call back into it; completed
/// results sit in the scheduler until [`ScanEngine::pump`] is invoked.
pub struct ScanEngine {
    config: Arc<Config>,
    cache: Arc<ThumbnailCache>,
    scheduler: Scheduler,
    active: Option<Arc<ScanSession>>,
    callback: Option<ThumbnailCallback>,
}

impl ScanEngine {
    pub fn new(config: Arc<Config>) -> Self {
        let timer: Option<Arc<dyn JobTimer>> = if config.time_jobs {
            Some(Arc::new(ConsoleTimer))
        } else {
            None
        };
        Self::with_timer(config, timer)
    }

    pub fn with_timer(config: Arc<Config>, timer: Option<Arc<dyn JobTimer>>) -> Self {
        let cache = Arc::new(ThumbnailCache::new(config.cache_capacity));
        let scheduler = Scheduler::new(&config, cache.clone(), timer);
        Self {
            config,
            cache,
            scheduler,
            active: None,
            callback: None,
        }
    }

    /// Register the consumer callback for thumbnail results.
    pub fn on_thumbnail_ready(&mut self, callback: ThumbnailCallback) {
        self.callback = Some(callback);
    }

    pub fn cache(&self) -> &Arc<ThumbnailCache> {
        &self.cache
    }

    pub fn active_session(&self) -> Option<&Arc<ScanSession>> {
        self.active.as_ref()
    }

    /// Enumerate `folder` (non-recursive) and start thumbnail production for
    /// every recognized HDR image. Any scan still in flight is cancelled
    /// first. Cached thumbnails are delivered synchronously before this
    /// returns; the rest arrive through [`ScanEngine::pump`].
    pub fn start_scan(&mut self, folder: &Path) -> Result<Arc<ScanSession>> {
        self.cancel_active();
        let session_id = self.scheduler.begin_session();

        if !folder.is_dir() {
            return Err(Error::DirectoryUnreadable(format!(
                "{} is not a readable directory",
                folder.display()
            )));
        }

        println!("Scanning folder: {}", folder.display());

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(folder)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
        {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if entry.file_type().is_file()
                        && is_hdr_image(path, &self.config.recognized_extensions)
                    {
                        paths.push(path.to_path_buf());
                    }
                }
                Err(err) => {
                    if err.path() == Some(folder) {
                        return Err(Error::DirectoryUnreadable(err.to_string()));
                    }
                    // One unreadable entry is not worth aborting the scan.
                    eprintln!("Skipping unreadable entry: {}", err);
                }
            }
        }
        // Stable grid order regardless of directory iteration order.
        paths.sort();

        println!("Found {} HDRI files", paths.len());

        // Stat everything in parallel; a failed stat still occupies a slot.
        let resolved: Vec<(PathBuf, io::Result<ImageFileRef>)> = paths
            .par_iter()
            .map(|path| (path.clone(), ImageFileRef::from_path(path)))
            .collect();

        let files: Vec<ImageFileRef> = resolved
            .iter()
            .filter_map(|(_, result)| result.as_ref().ok().cloned())
            .collect();
        let session = Arc::new(ScanSession::new(session_id, folder, resolved.len(), files));
        self.active = Some(session.clone());

        for (path, result) in resolved {
            match result {
                Ok(file) => {
                    if let Some(thumbnail) = self.cache.get(&file) {
                        session.record_success();
                        if let Some(callback) = self.callback.as_mut() {
                            callback(&file, Ok(thumbnail));
                        }
                    } else {
                        self.scheduler.submit(session_id, file);
                    }
                }
                Err(err) => {
                    let error = Error::from_io(&err);
                    eprintln!("Failed to stat {}: {}", path.display(), error);
                    session.record_failure();
                    let file = ImageFileRef {
                        path,
                        modified_at: DateTime::<Utc>::UNIX_EPOCH,
                        file_size: 0,
                    };
                    if let Some(callback) = self.callback.as_mut() {
                        callback(&file, Err(error));
                    }
                }
            }
        }

        Ok(session)
    }

    /// Cancel the active session, if any. Its queued jobs never start and
    /// any in-flight results are discarded instead of delivered.
    pub fn cancel_active(&mut self) {
        if let Some(session) = self.active.take() {
            session.mark_cancelled();
            self.scheduler.cancel_session(session.id);
        }
    }

    /// Drain point. Call once per UI tick from the consumer thread; fires
    /// the registered callback for every newly completed file and updates
    /// session progress. Returns the number of results delivered.
    pub fn pump(&mut self) -> usize {
        let Some(session) = self.active.clone() else {
            return 0;
        };
        let scheduler = &self.scheduler;
        let callback = &mut self.callback;
        scheduler.drain(|file, outcome| match outcome {
            JobOutcome::Success(thumbnail) => {
                session.record_success();
                if let Some(cb) = callback.as_mut() {
                    cb(file, Ok(thumbnail));
                }
            }
            JobOutcome::Failure(error) => {
                session.record_failure();
                if let Some(cb) = callback.as_mut() {
                    cb(file, Err(error));
                }
            }
            JobOutcome::Cancelled => {}
        })
    }

    /// Stop the worker pool and wait for it to wind down.
    pub fn shutdown(self) {
        self.scheduler.shutdown();
    }
}
