// Sync planner: maps local image folders onto Label Studio projects.
//
// One folder becomes one project with the same title. The planner finds or
// creates that project, works out which files are still missing according to
// the chosen policy, and hands them to the upload pool.

use std::fs;
use std::path::{Path, PathBuf};

use crate::api::{ProjectId, ProjectLookup, RemoteApi};
use crate::error::SyncError;
use crate::pool::{UploadPool, UploadProgress};

/// Which files of a folder to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Every file in the folder.
    Fresh,
    /// Skip as many files (in name order) as the project already has tasks.
    Resume,
    /// Files from this zero-based position onwards.
    FromIndex(usize),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Abort when the project search itself fails instead of treating the
    /// project as missing.
    pub strict_lookup: bool,
}

/// The work decided for one folder, before anything is uploaded.
#[derive(Debug, Clone)]
pub struct FolderPlan {
    pub folder: String,
    pub project_id: ProjectId,
    pub created: bool,
    pub total_files: usize,
    pub already_uploaded: usize,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FolderReport {
    pub folder: String,
    pub project_id: ProjectId,
    pub created: bool,
    pub total_files: usize,
    pub submitted: usize,
    pub failed: Vec<PathBuf>,
}

impl FolderReport {
    pub fn uploaded(&self) -> usize {
        self.submitted - self.failed.len()
    }
}

#[derive(Debug, Default)]
pub struct SyncSummary {
    pub reports: Vec<FolderReport>,
    /// Folders dropped during planning, with the reason.
    pub skipped: Vec<(String, String)>,
}

impl SyncSummary {
    pub fn uploaded(&self) -> usize {
        self.reports.iter().map(FolderReport::uploaded).sum()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().map(|r| r.failed.len()).sum()
    }
}

pub struct SyncPlanner<'a, A: ?Sized> {
    api: &'a A,
    pool: &'a UploadPool,
    label_config: &'a str,
    options: SyncOptions,
}

impl<'a, A: RemoteApi + ?Sized> SyncPlanner<'a, A> {
    pub fn new(
        api: &'a A,
        pool: &'a UploadPool,
        label_config: &'a str,
        options: SyncOptions,
    ) -> Self {
        SyncPlanner {
            api,
            pool,
            label_config,
            options,
        }
    }

    /// Sync every subdirectory of `root`, or only the ones named in
    /// `filter`. A folder that cannot be planned is skipped; a remote error
    /// stops the run.
    pub fn sync_root<F, P>(
        &self,
        root: &Path,
        filter: Option<&[String]>,
        policy: SyncPolicy,
        make_progress: F,
    ) -> Result<SyncSummary, SyncError>
    where
        F: Fn(&FolderPlan) -> P,
        P: UploadProgress,
    {
        if !root.is_dir() {
            return Err(SyncError::NotADirectory(root.to_path_buf()));
        }

        let available = list_subdirectories(root)?;
        let mut summary = SyncSummary::default();
        if available.is_empty() {
            tracing::warn!(root = %root.display(), "no subdirectories found");
            return Ok(summary);
        }
        tracing::info!(folders = %available.join(", "), "found subdirectories");

        let folders = match filter {
            Some(requested) => select_folders(&available, requested),
            None => available,
        };

        for folder in folders {
            let dir = root.join(&folder);
            match self.sync_folder(&folder, &dir, policy, &make_progress) {
                Ok(report) => summary.reports.push(report),
                Err(e) if e.is_planning() => {
                    tracing::warn!(folder = %folder, error = %e, "skipping folder");
                    summary.skipped.push((folder, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }

    /// Sync a single folder whose base name is the project title.
    pub fn sync_path<F, P>(
        &self,
        dir: &Path,
        policy: SyncPolicy,
        make_progress: F,
    ) -> Result<FolderReport, SyncError>
    where
        F: Fn(&FolderPlan) -> P,
        P: UploadProgress,
    {
        if !dir.is_dir() {
            return Err(SyncError::NotADirectory(dir.to_path_buf()));
        }
        let folder = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| SyncError::NotADirectory(dir.to_path_buf()))?;
        self.sync_folder(&folder, dir, policy, &make_progress)
    }

    pub fn sync_folder<F, P>(
        &self,
        folder: &str,
        dir: &Path,
        policy: SyncPolicy,
        make_progress: &F,
    ) -> Result<FolderReport, SyncError>
    where
        F: Fn(&FolderPlan) -> P,
        P: UploadProgress,
    {
        let plan = self.plan_folder(folder, dir, policy)?;
        let mut report = FolderReport {
            folder: plan.folder.clone(),
            project_id: plan.project_id,
            created: plan.created,
            total_files: plan.total_files,
            submitted: plan.files.len(),
            failed: Vec::new(),
        };

        if plan.files.is_empty() {
            tracing::info!(
                folder,
                project_id = plan.project_id,
                uploaded = plan.already_uploaded,
                "folder already complete"
            );
            return Ok(report);
        }

        tracing::info!(
            folder,
            project_id = plan.project_id,
            to_upload = plan.files.len(),
            total = plan.total_files,
            "uploading folder"
        );
        let progress = make_progress(&plan);
        report.failed = self
            .pool
            .upload_batch(self.api, plan.project_id, plan.files, &progress);
        progress.finish();

        if report.failed.is_empty() {
            tracing::info!(folder, uploaded = report.submitted, "folder uploaded");
        } else {
            tracing::error!(
                folder,
                failed = report.failed.len(),
                submitted = report.submitted,
                "folder finished with failed uploads"
            );
        }
        Ok(report)
    }

    /// Decide the project and the file subset for one folder.
    pub fn plan_folder(
        &self,
        folder: &str,
        dir: &Path,
        policy: SyncPolicy,
    ) -> Result<FolderPlan, SyncError> {
        let files = list_files(dir)?;
        let total = files.len();
        if total == 0 {
            return Err(SyncError::EmptyFolder(dir.to_path_buf()));
        }
        if let SyncPolicy::FromIndex(start) = policy {
            if start >= total {
                return Err(SyncError::StartIndexOutOfRange {
                    folder: folder.to_string(),
                    start,
                    total,
                });
            }
        }

        let (project_id, created) = self.resolve_project(folder)?;
        let skip = match policy {
            SyncPolicy::Fresh => 0,
            SyncPolicy::FromIndex(start) => start,
            SyncPolicy::Resume if created => 0,
            SyncPolicy::Resume => {
                let existing = self.api.count_tasks(project_id)?;
                tracing::info!(folder, project_id, existing, local = total, "resuming project");
                existing.min(total)
            }
        };

        Ok(FolderPlan {
            folder: folder.to_string(),
            project_id,
            created,
            total_files: total,
            already_uploaded: skip,
            files: files[skip..].to_vec(),
        })
    }

    /// Find the project titled `title` or create it. Returns the id and
    /// whether it was created now.
    fn resolve_project(&self, title: &str) -> Result<(ProjectId, bool), SyncError> {
        match self.api.find_project_by_name(title) {
            ProjectLookup::Found(id) => {
                tracing::info!(title, project_id = id, "found existing project");
                return Ok((id, false));
            }
            ProjectLookup::NotFound => {}
            ProjectLookup::Failed(source) if self.options.strict_lookup => {
                return Err(SyncError::LookupFailed {
                    title: title.to_string(),
                    source,
                });
            }
            ProjectLookup::Failed(_) => {
                tracing::warn!(title, "project search failed, treating project as missing");
            }
        }
        tracing::info!(title, "creating project");
        let id = self.api.create_project(title, self.label_config)?;
        Ok((id, true))
    }
}

/// Names of the immediate subdirectories of `root`, sorted.
pub fn list_subdirectories(root: &Path) -> Result<Vec<String>, SyncError> {
    let io_err = |source| SyncError::Io {
        path: root.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in fs::read_dir(root).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if !entry.path().is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => tracing::warn!(name = ?raw, "skipping folder with a non UTF-8 name"),
        }
    }
    names.sort();
    Ok(names)
}

/// Regular files directly inside `dir`, sorted by file name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, SyncError> {
    let io_err = |source| SyncError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Keep the requested folder names that exist, in the requested order.
/// Unknown names are dropped with a warning.
pub fn select_folders(available: &[String], requested: &[String]) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();
    for name in requested {
        if !available.contains(name) {
            tracing::warn!(folder = %name, "folder not found, ignoring");
        } else if !selected.contains(name) {
            selected.push(name.clone());
        }
    }
    selected
}

/// Parse `"name1, name2"` style input. Blank input means "all folders".
pub fn parse_folder_filter(input: &str) -> Option<Vec<String>> {
    let names: Vec<String> = input
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names)
    }
}
