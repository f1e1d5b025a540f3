// Deletion planner: removes already uploaded tasks from projects.
// Selection is positional over the order the server lists tasks in.

use std::fmt;

use crate::api::{ProjectId, RemoteApi, Task, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    All,
    FirstN,
    LastN,
    /// Anything else; selects nothing.
    Unrecognized,
}

impl DeleteMode {
    pub fn parse(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().as_str() {
            "all" => DeleteMode::All,
            "first" | "first_n" => DeleteMode::FirstN,
            "last" | "last_n" => DeleteMode::LastN,
            _ => DeleteMode::Unrecognized,
        }
    }

    pub fn needs_count(self) -> bool {
        matches!(self, DeleteMode::FirstN | DeleteMode::LastN)
    }
}

impl fmt::Display for DeleteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeleteMode::All => "all",
            DeleteMode::FirstN => "first_n",
            DeleteMode::LastN => "last_n",
            DeleteMode::Unrecognized => "unrecognized",
        };
        f.write_str(name)
    }
}

/// The slice of `tasks` a mode selects. `count` is ignored for `All`.
pub fn select_tasks(tasks: &[Task], mode: DeleteMode, count: usize) -> &[Task] {
    let n = count.min(tasks.len());
    match mode {
        DeleteMode::All => tasks,
        DeleteMode::FirstN => &tasks[..n],
        DeleteMode::LastN => &tasks[tasks.len() - n..],
        DeleteMode::Unrecognized => &[],
    }
}

#[derive(Debug, Default)]
pub struct DeletionReport {
    pub deleted: usize,
    pub failed: Vec<(ProjectId, TaskId)>,
    /// Projects whose task list could not be fetched.
    pub skipped_projects: Vec<ProjectId>,
}

pub struct DeletionPlanner<'a, A: ?Sized> {
    api: &'a A,
}

impl<'a, A: RemoteApi + ?Sized> DeletionPlanner<'a, A> {
    pub fn new(api: &'a A) -> Self {
        DeletionPlanner { api }
    }

    /// Delete the selected tasks of every project, one task at a time.
    /// Failures are logged and collected; they never stop the run.
    pub fn delete(
        &self,
        project_ids: &[ProjectId],
        mode: DeleteMode,
        count: usize,
    ) -> DeletionReport {
        let mut report = DeletionReport::default();
        if mode == DeleteMode::Unrecognized {
            tracing::warn!("unrecognized deletion mode, nothing to delete");
        }

        for &project_id in project_ids {
            let tasks = match self.api.list_tasks(project_id) {
                Ok(tasks) => tasks,
                Err(e) => {
                    tracing::error!(project_id, error = %e, "cannot list tasks, skipping project");
                    report.skipped_projects.push(project_id);
                    continue;
                }
            };

            let selected = select_tasks(&tasks, mode, count);
            tracing::info!(
                project_id,
                %mode,
                total = tasks.len(),
                selected = selected.len(),
                "deleting tasks"
            );

            for task in selected {
                match self.api.delete_task(project_id, task.id) {
                    Ok(()) => report.deleted += 1,
                    Err(e) => {
                        tracing::error!(
                            project_id,
                            task_id = task.id,
                            error = %e,
                            "failed to delete task"
                        );
                        report.failed.push((project_id, task.id));
                    }
                }
            }
        }

        tracing::info!(
            deleted = report.deleted,
            failed = report.failed.len(),
            "deletion finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TaskData;
    use crate::test_support::FakeApi;

    fn tasks(ids: &[TaskId]) -> Vec<Task> {
        ids.iter()
            .map(|&id| Task {
                id,
                data: TaskData::default(),
            })
            .collect()
    }

    fn ids(tasks: &[Task]) -> Vec<TaskId> {
        tasks.iter().map(|t| t.id).collect()
    }

    #[test]
    fn selection_by_mode() {
        let all = tasks(&[1, 2, 3, 4, 5]);
        assert_eq!(ids(select_tasks(&all, DeleteMode::All, 0)), vec![1, 2, 3, 4, 5]);
        assert_eq!(ids(select_tasks(&all, DeleteMode::FirstN, 2)), vec![1, 2]);
        assert_eq!(ids(select_tasks(&all, DeleteMode::LastN, 2)), vec![4, 5]);
        assert!(select_tasks(&all, DeleteMode::Unrecognized, 3).is_empty());
    }

    #[test]
    fn selection_clamps_count_to_task_total() {
        let all = tasks(&[1, 2, 3]);
        assert_eq!(ids(select_tasks(&all, DeleteMode::FirstN, 10)), vec![1, 2, 3]);
        assert_eq!(ids(select_tasks(&all, DeleteMode::LastN, 10)), vec![1, 2, 3]);
        assert!(select_tasks(&[], DeleteMode::LastN, 2).is_empty());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(DeleteMode::parse("ALL"), DeleteMode::All);
        assert_eq!(DeleteMode::parse("first_n"), DeleteMode::FirstN);
        assert_eq!(DeleteMode::parse(" last "), DeleteMode::LastN);
        assert_eq!(DeleteMode::parse("middle"), DeleteMode::Unrecognized);
    }

    #[test]
    fn last_two_deleted_even_when_one_fails() {
        let api = FakeApi::new();
        let project = api.add_project("droneA");
        let task_ids = api.add_tasks(project, 5);
        api.fail_delete(task_ids[3]);

        let report = DeletionPlanner::new(&api).delete(&[project], DeleteMode::LastN, 2);

        assert_eq!(report.deleted, 1);
        assert_eq!(report.failed, vec![(project, task_ids[3])]);
        assert_eq!(api.deleted(), vec![task_ids[4]]);
        assert_eq!(api.task_count(project), 4);
    }

    #[test]
    fn all_mode_spans_several_projects() {
        let api = FakeApi::new();
        let a = api.add_project("droneA");
        let b = api.add_project("droneB");
        api.add_tasks(a, 3);
        api.add_tasks(b, 2);

        let report = DeletionPlanner::new(&api).delete(&[a, b], DeleteMode::All, 0);

        assert_eq!(report.deleted, 5);
        assert!(report.failed.is_empty());
        assert_eq!(api.task_count(a), 0);
        assert_eq!(api.task_count(b), 0);
    }

    #[test]
    fn unrecognized_mode_deletes_nothing() {
        let api = FakeApi::new();
        let project = api.add_project("droneA");
        api.add_tasks(project, 3);

        let report = DeletionPlanner::new(&api).delete(&[project], DeleteMode::Unrecognized, 3);

        assert_eq!(report.deleted, 0);
        assert!(api.deleted().is_empty());
    }
}
