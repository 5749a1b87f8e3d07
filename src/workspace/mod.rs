//! Workspace registry: id -> database handle and lifecycle

mod registry;

pub use registry::{workspace_id_for_path, Workspace, WorkspaceInfo, WorkspaceRegistry, WORKSPACE_DIR};
