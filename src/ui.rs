// UI layer: interactive menus built with `dialoguer`, progress bars with
// `indicatif`. The flows only collect input and print summaries; all the
// real work is delegated to the planners.

use std::path::PathBuf;

use anyhow::{bail, Result};
use dialoguer::{Confirm, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};

use crate::api::{ProjectId, RemoteApi};
use crate::config::Settings;
use crate::deletion::{DeleteMode, DeletionPlanner};
use crate::labels::LabelSchema;
use crate::pool::UploadPool;
use crate::sync::{parse_folder_filter, FolderPlan, SyncOptions, SyncPlanner, SyncPolicy};

/// Print a short description of what the tool does.
pub fn print_welcome_message() {
    println!("Welcome to the Label Studio sync tool!");
    println!("{}", "=".repeat(80));
    println!("  - Creates a project per image folder");
    println!("  - Uploads images with parallel workers and automatic retries");
    println!("  - Resumes interrupted uploads");
    println!("  - Deletes uploaded images from projects");
    println!("{}", "=".repeat(80));
}

/// Main interactive menu. Runs until the user picks "Exit".
pub fn main_menu<A: RemoteApi>(api: &A, settings: &Settings) -> Result<()> {
    let pool = UploadPool::new(settings.pool_config());
    let options = SyncOptions {
        strict_lookup: settings.strict_lookup,
    };

    loop {
        let items = ["Process folders", "Resume from index", "Delete images", "Exit"];
        let selection = Select::new()
            .with_prompt("What do you want to do?")
            .items(&items)
            .default(0)
            .interact()?;
        match selection {
            0 => handle_process_folders(api, &pool, options)?,
            1 => handle_resume_from_index(api, &pool, options)?,
            2 => handle_delete(api)?,
            _ => break,
        }
    }
    tracing::info!("processing completed");
    Ok(())
}

fn handle_process_folders<A: RemoteApi>(
    api: &A,
    pool: &UploadPool,
    options: SyncOptions,
) -> Result<()> {
    let schema = select_schema()?;
    let root = prompt_directory("Path to the main directory with image folders")?;
    let folders_input: String = Input::new()
        .with_prompt("Folder names as \"name1, name2\" (empty for all folders)")
        .allow_empty(true)
        .interact_text()?;
    let filter = parse_folder_filter(&folders_input);
    match &filter {
        Some(names) => tracing::info!(folders = %names.join(", "), "selected folders"),
        None => tracing::info!("all folders will be processed"),
    }
    let resume = Confirm::new()
        .with_prompt("Skip images already uploaded to existing projects?")
        .default(true)
        .interact()?;
    let policy = if resume {
        SyncPolicy::Resume
    } else {
        SyncPolicy::Fresh
    };

    let label_config = schema.label_config();
    let planner = SyncPlanner::new(api, pool, &label_config, options);
    let summary = planner.sync_root(&root, filter.as_deref(), policy, folder_progress)?;

    for report in &summary.reports {
        println!(
            "{}: {} uploaded, {} failed, {} of {} files were already there",
            report.folder,
            report.uploaded(),
            report.failed.len(),
            report.total_files - report.submitted,
            report.total_files
        );
        for path in &report.failed {
            println!("    failed: {}", path.display());
        }
    }
    for (folder, reason) in &summary.skipped {
        println!("{folder}: skipped ({reason})");
    }
    println!(
        "Done: {} uploaded, {} failed.",
        summary.uploaded(),
        summary.failed()
    );
    Ok(())
}

fn handle_resume_from_index<A: RemoteApi>(
    api: &A,
    pool: &UploadPool,
    options: SyncOptions,
) -> Result<()> {
    let schema = select_schema()?;
    let dir = prompt_directory("Path to the image folder")?;
    let start: usize = Input::new()
        .with_prompt("Index to start from (0 for the beginning)")
        .default(0)
        .interact_text()?;

    let label_config = schema.label_config();
    let planner = SyncPlanner::new(api, pool, &label_config, options);
    match planner.sync_path(&dir, SyncPolicy::FromIndex(start), folder_progress) {
        Ok(report) => println!(
            "{}: {} uploaded, {} failed.",
            report.folder,
            report.uploaded(),
            report.failed.len()
        ),
        Err(e) if e.is_planning() => {
            tracing::error!(error = %e, "cannot resume folder");
            println!("Nothing uploaded: {e}");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn handle_delete<A: RemoteApi>(api: &A) -> Result<()> {
    let projects = api.list_projects()?;
    if projects.is_empty() {
        println!("There are no projects.");
        return Ok(());
    }
    for (i, project) in projects.iter().enumerate() {
        println!("{i:>3}. {} (id {})", project.title, project.id);
    }

    let project_ids = loop {
        let input: String = Input::new()
            .with_prompt("Project numbers separated by commas, or \"all\"")
            .interact_text()?;
        match parse_project_selection(&input, projects.len()) {
            Ok(indices) => {
                break indices
                    .into_iter()
                    .map(|i| projects[i].id)
                    .collect::<Vec<ProjectId>>()
            }
            Err(e) => println!("{e}"),
        }
    };

    let modes = ["All images", "First N images", "Last N images"];
    let mode = match Select::new()
        .with_prompt("Which images should be deleted?")
        .items(&modes)
        .default(0)
        .interact()?
    {
        0 => DeleteMode::All,
        1 => DeleteMode::FirstN,
        2 => DeleteMode::LastN,
        _ => DeleteMode::Unrecognized,
    };
    let count: usize = if mode.needs_count() {
        Input::new().with_prompt("How many images?").interact_text()?
    } else {
        0
    };

    let confirmed = Confirm::new()
        .with_prompt(format!("Delete from {} project(s)?", project_ids.len()))
        .default(false)
        .interact()?;
    if !confirmed {
        return Ok(());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Deleting...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));
    let report = DeletionPlanner::new(api).delete(&project_ids, mode, count);
    spinner.finish_and_clear();

    println!(
        "Deleted {} task(s), {} failed, {} project(s) skipped.",
        report.deleted,
        report.failed.len(),
        report.skipped_projects.len()
    );
    Ok(())
}

fn select_schema() -> Result<LabelSchema> {
    let selection = Select::new()
        .with_prompt("Labeling type")
        .items(&LabelSchema::ALL)
        .default(0)
        .interact()?;
    Ok(LabelSchema::ALL[selection])
}

fn prompt_directory(prompt: &str) -> Result<PathBuf> {
    loop {
        let raw: String = Input::new().with_prompt(prompt).interact_text()?;
        let path = expand_home(raw.trim());
        if path.is_dir() {
            return Ok(path);
        }
        tracing::error!(path = %path.display(), "specified path is not a directory");
        println!("{} is not a directory, try again.", path.display());
    }
}

/// Progress bar for one folder's upload.
fn folder_progress(plan: &FolderPlan) -> ProgressBar {
    let bar = ProgressBar::new(plan.files.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} ({eta})") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_message(plan.folder.clone());
    bar
}

/// Replace a leading `~` with the user's home directory.
pub fn expand_home(input: &str) -> PathBuf {
    if input == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(input));
    }
    if let Some(rest) = input.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(input)
}

/// Parse "all" or a comma separated list of indices below `len`.
pub fn parse_project_selection(input: &str, len: usize) -> Result<Vec<usize>> {
    let input = input.trim();
    if len == 0 {
        bail!("there are no projects to select");
    }
    if input.eq_ignore_ascii_case("all") {
        return Ok((0..len).collect());
    }
    let mut indices = Vec::new();
    for part in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let index: usize = match part.parse() {
            Ok(i) => i,
            Err(_) => bail!("`{part}` is not a project number"),
        };
        if index >= len {
            bail!("project number {index} is out of range (0-{})", len - 1);
        }
        if !indices.contains(&index) {
            indices.push(index);
        }
    }
    if indices.is_empty() {
        bail!("no projects selected");
    }
    Ok(indices)
}
