// API client module: a blocking HTTP client for the Label Studio REST API.
// The pool and the planners only see the `RemoteApi` trait so they can be
// exercised against an in-memory fake; `LabelStudioClient` is the real
// implementation and wraps every call (except the project lookup) in a
// retry policy.

use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{multipart, Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::retry::RetryPolicy;

pub type ProjectId = u64;
pub type TaskId = u64;

/// A Label Studio project. The title doubles as the sync key: one local
/// folder maps to the project with the same title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    #[serde(default)]
    pub title: String,
}

/// One uploaded image inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub data: TaskData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskData {
    #[serde(default, alias = "image")]
    pub file: Option<String>,
}

/// Outcome of looking a project up by title. A failed lookup is kept apart
/// from "not found" so the caller decides whether it is fatal.
#[derive(Debug)]
pub enum ProjectLookup {
    Found(ProjectId),
    NotFound,
    Failed(ApiError),
}

/// Typed operations against the annotation service.
pub trait RemoteApi: Sync {
    fn create_project(&self, title: &str, label_config: &str) -> Result<ProjectId, ApiError>;

    fn list_projects(&self) -> Result<Vec<Project>, ApiError>;

    fn list_tasks(&self, project_id: ProjectId) -> Result<Vec<Task>, ApiError>;

    fn count_tasks(&self, project_id: ProjectId) -> Result<usize, ApiError>;

    fn delete_task(&self, project_id: ProjectId, task_id: TaskId) -> Result<(), ApiError>;

    fn upload_file(&self, project_id: ProjectId, path: &Path) -> Result<(), ApiError>;

    /// Scan all projects for an exact title match. Errors from the listing
    /// are logged and reported as `ProjectLookup::Failed`, never returned.
    fn find_project_by_name(&self, title: &str) -> ProjectLookup {
        match self.list_projects() {
            Ok(projects) => projects
                .into_iter()
                .find(|p| p.title == title)
                .map_or(ProjectLookup::NotFound, |p| ProjectLookup::Found(p.id)),
            Err(e) => {
                tracing::error!(title, error = %e, "project search failed");
                ProjectLookup::Failed(e)
            }
        }
    }
}

/// Connection settings for [`LabelStudioClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
    pub page_size: usize,
    /// Policy for project and task calls.
    pub retry: RetryPolicy,
    /// Policy for a single file import.
    pub upload_retry: RetryPolicy,
}

#[derive(Clone)]
pub struct LabelStudioClient {
    http: Client,
    base_url: String,
    page_size: usize,
    retry: RetryPolicy,
    upload_retry: RetryPolicy,
}

#[derive(Serialize)]
struct CreateProjectRequest<'a> {
    title: &'a str,
    label_config: &'a str,
}

#[derive(Deserialize)]
struct CreatedProject {
    id: ProjectId,
}

#[derive(Deserialize)]
struct ProjectDetail {
    task_number: Option<usize>,
}

/// `/projects` answers either with a bare array or with a paginated object
/// depending on the server version.
#[derive(Deserialize)]
#[serde(untagged)]
enum ProjectListing {
    Page {
        results: Vec<Project>,
        #[serde(default)]
        next: Option<String>,
    },
    Plain(Vec<Project>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskListing {
    Page {
        tasks: Vec<Task>,
        #[serde(default)]
        total: Option<usize>,
    },
    Plain(Vec<Task>),
}

impl LabelStudioClient {
    /// Build a client; the token is attached to every request as
    /// `Authorization: Token <token>`.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ApiError::InvalidUrl(config.base_url.clone()));
        }

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Token {}", config.token))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(LabelStudioClient {
            http,
            base_url,
            page_size: config.page_size.max(1),
            retry: config.retry,
            upload_retry: config.upload_retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-2xx response into `ApiError::Status`, keeping the body
    /// for the log.
    fn check(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(ApiError::Status { status, body })
    }

    fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let text = response.text()?;
        Ok(serde_json::from_str(&text)?)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let response = self.http.get(url).send()?;
        Self::decode(Self::check(response)?)
    }

    fn fetch_projects(&self) -> Result<Vec<Project>, ApiError> {
        let mut projects = Vec::new();
        let mut next = Some(format!(
            "{}?page_size={}",
            self.url("/projects"),
            self.page_size
        ));
        while let Some(url) = next.take() {
            match self.get_json::<ProjectListing>(&url)? {
                ProjectListing::Plain(items) => projects.extend(items),
                ProjectListing::Page { results, next: n } => {
                    projects.extend(results);
                    next = n;
                }
            }
        }
        Ok(projects)
    }

    /// Fetch one page of tasks. `None` means the server has no such page.
    fn fetch_task_page(
        &self,
        project_id: ProjectId,
        page: usize,
    ) -> Result<Option<TaskListing>, ApiError> {
        let response = self
            .http
            .get(self.url("/tasks"))
            .query(&[
                ("project", project_id.to_string()),
                ("page", page.to_string()),
                ("page_size", self.page_size.to_string()),
            ])
            .send()?;
        if page > 1 && response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::decode(Self::check(response)?).map(Some)
    }

    fn upload_once(&self, project_id: ProjectId, path: &Path) -> Result<(), ApiError> {
        let bytes = fs::read(path).map_err(|source| ApiError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("image")
            .to_string();

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for(path))?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.url(&format!("/projects/{project_id}/import")))
            .multipart(form)
            .send()?;
        Self::check(response)?;
        Ok(())
    }
}

impl RemoteApi for LabelStudioClient {
    fn create_project(&self, title: &str, label_config: &str) -> Result<ProjectId, ApiError> {
        let id = self.retry.run("create project", || {
            let response = self
                .http
                .post(self.url("/projects"))
                .json(&CreateProjectRequest {
                    title,
                    label_config,
                })
                .send()?;
            let created: CreatedProject = Self::decode(Self::check(response)?)?;
            Ok::<_, ApiError>(created.id)
        })?;
        tracing::info!(title, project_id = id, "created project");
        Ok(id)
    }

    fn list_projects(&self) -> Result<Vec<Project>, ApiError> {
        self.retry.run("list projects", || self.fetch_projects())
    }

    fn list_tasks(&self, project_id: ProjectId) -> Result<Vec<Task>, ApiError> {
        let mut tasks = Vec::new();
        let mut page = 1;
        loop {
            let listing = self
                .retry
                .run("list tasks", || self.fetch_task_page(project_id, page))?;
            match listing {
                None => break,
                Some(TaskListing::Plain(items)) => {
                    tasks.extend(items);
                    break;
                }
                Some(TaskListing::Page { tasks: items, total }) => {
                    let received = items.len();
                    tasks.extend(items);
                    let complete = total.map_or(false, |t| tasks.len() >= t);
                    if complete || received < self.page_size {
                        break;
                    }
                    page += 1;
                }
            }
        }
        tracing::debug!(project_id, count = tasks.len(), "listed tasks");
        Ok(tasks)
    }

    fn count_tasks(&self, project_id: ProjectId) -> Result<usize, ApiError> {
        self.retry.run("count tasks", || {
            let url = self.url(&format!("/projects/{project_id}"));
            let detail: ProjectDetail = self.get_json(&url)?;
            detail.task_number.ok_or(ApiError::MissingField("task_number"))
        })
    }

    fn delete_task(&self, project_id: ProjectId, task_id: TaskId) -> Result<(), ApiError> {
        self.retry.run("delete task", || {
            let response = self
                .http
                .delete(self.url(&format!("/tasks/{task_id}")))
                .send()?;
            Self::check(response)?;
            Ok::<_, ApiError>(())
        })?;
        tracing::info!(project_id, task_id, "deleted task");
        Ok(())
    }

    fn upload_file(&self, project_id: ProjectId, path: &Path) -> Result<(), ApiError> {
        self.upload_retry
            .run("upload file", || self.upload_once(project_id, path))?;
        tracing::debug!(project_id, file = %path.display(), "imported file");
        Ok(())
    }
}

/// Content type for an image file, judged by its extension.
pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
