// Library root
// -----------
// The binary (`main.rs`) wires these modules into the interactive CLI.
//
// Module responsibilities:
// - `api`: typed Label Studio operations behind the `RemoteApi` trait.
// - `retry`: retry/backoff policy used by every remote call.
// - `pool`: worker pool that uploads a batch of files into one project.
// - `sync`: maps local folders to projects and decides what to upload.
// - `deletion`: selects and deletes uploaded tasks.
// - `labels`: labeling interface templates.
// - `config`, `logging`, `error`: settings, log setup and error types.
// - `ui`: terminal menus that drive the planners.
pub mod api;
pub mod config;
pub mod deletion;
pub mod error;
pub mod labels;
pub mod logging;
pub mod pool;
pub mod retry;
pub mod sync;
pub mod ui;

#[cfg(test)]
mod test_support;
