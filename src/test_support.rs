// In-memory stand-in for the annotation service, used by the unit tests of
// the pool and the planners.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use reqwest::StatusCode;

use crate::api::{Project, ProjectId, RemoteApi, Task, TaskData, TaskId};
use crate::error::ApiError;

#[derive(Default)]
struct State {
    next_id: u64,
    projects: Vec<Project>,
    tasks: HashMap<ProjectId, Vec<Task>>,
    upload_attempts: HashMap<PathBuf, usize>,
    /// Number of leading upload attempts that fail, per path.
    upload_failures: HashMap<PathBuf, usize>,
    delete_failures: HashSet<TaskId>,
    deleted: Vec<TaskId>,
    created: Vec<String>,
    list_projects_fails: bool,
}

#[derive(Default)]
pub struct FakeApi {
    state: Mutex<State>,
}

fn server_error() -> ApiError {
    ApiError::Status {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: "simulated failure".into(),
    }
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_project(&self, title: &str) -> ProjectId {
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        state.projects.push(Project {
            id,
            title: title.to_string(),
        });
        state.tasks.insert(id, Vec::new());
        id
    }

    /// Add `count` tasks to a project and return their ids in listing order.
    pub fn add_tasks(&self, project_id: ProjectId, count: usize) -> Vec<TaskId> {
        let mut state = self.state();
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            state.next_id += 1;
            let id = state.next_id;
            state.tasks.entry(project_id).or_default().push(Task {
                id,
                data: TaskData {
                    file: Some(format!("/data/upload/seed{i}.png")),
                },
            });
            ids.push(id);
        }
        ids
    }

    pub fn fail_uploads(&self, path: &Path, times: usize) {
        self.state()
            .upload_failures
            .insert(path.to_path_buf(), times);
    }

    pub fn fail_delete(&self, task_id: TaskId) {
        self.state().delete_failures.insert(task_id);
    }

    pub fn fail_project_listing(&self) {
        self.state().list_projects_fails = true;
    }

    pub fn upload_attempts(&self, path: &Path) -> usize {
        self.state()
            .upload_attempts
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_upload_attempts(&self) -> usize {
        self.state().upload_attempts.values().sum()
    }

    pub fn uploaded_files(&self, project_id: ProjectId) -> Vec<String> {
        self.state()
            .tasks
            .get(&project_id)
            .map(|tasks| tasks.iter().filter_map(|t| t.data.file.clone()).collect())
            .unwrap_or_default()
    }

    pub fn task_count(&self, project_id: ProjectId) -> usize {
        self.state()
            .tasks
            .get(&project_id)
            .map_or(0, Vec::len)
    }

    pub fn deleted(&self) -> Vec<TaskId> {
        self.state().deleted.clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.state().created.clone()
    }
}

impl RemoteApi for FakeApi {
    fn create_project(&self, title: &str, _label_config: &str) -> Result<ProjectId, ApiError> {
        let id = self.add_project(title);
        self.state().created.push(title.to_string());
        Ok(id)
    }

    fn list_projects(&self) -> Result<Vec<Project>, ApiError> {
        let state = self.state();
        if state.list_projects_fails {
            return Err(server_error());
        }
        Ok(state.projects.clone())
    }

    fn list_tasks(&self, project_id: ProjectId) -> Result<Vec<Task>, ApiError> {
        Ok(self
            .state()
            .tasks
            .get(&project_id)
            .cloned()
            .unwrap_or_default())
    }

    fn count_tasks(&self, project_id: ProjectId) -> Result<usize, ApiError> {
        Ok(self.task_count(project_id))
    }

    fn delete_task(&self, project_id: ProjectId, task_id: TaskId) -> Result<(), ApiError> {
        let mut state = self.state();
        if state.delete_failures.contains(&task_id) {
            return Err(server_error());
        }
        if let Some(tasks) = state.tasks.get_mut(&project_id) {
            tasks.retain(|t| t.id != task_id);
        }
        state.deleted.push(task_id);
        Ok(())
    }

    fn upload_file(&self, project_id: ProjectId, path: &Path) -> Result<(), ApiError> {
        let mut state = self.state();
        let attempt = {
            let count = state.upload_attempts.entry(path.to_path_buf()).or_insert(0);
            *count += 1;
            *count
        };
        let failures = state.upload_failures.get(path).copied().unwrap_or(0);
        if attempt <= failures {
            return Err(server_error());
        }
        state.next_id += 1;
        let id = state.next_id;
        state.tasks.entry(project_id).or_default().push(Task {
            id,
            data: TaskData {
                file: Some(path.display().to_string()),
            },
        });
        Ok(())
    }
}
