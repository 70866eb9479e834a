//! Project discovery: expand a configured parent (organization or folder)
//! into the concrete set of project accounts this source serves. A direct
//! `projects/..` parent needs no discovery.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use farsight_common::QueryError;
use farsight_dynamic::HttpClient;

/// Walk the resource hierarchy under `parent` and return every project id.
/// Folders nest, so traversal keeps an explicit frontier of containers.
pub async fn discover_projects(
    ctx: &CancellationToken,
    client: &HttpClient,
    base: &str,
    parent: &str,
) -> Result<Vec<String>, QueryError> {
    if let Some(project) = parent.strip_prefix("projects/") {
        return Ok(vec![project.to_string()]);
    }
    if !parent.starts_with("organizations/") && !parent.starts_with("folders/") {
        return Err(QueryError::other(format!(
            "project parent must be projects/.., folders/.. or organizations/.., got '{parent}'"
        )));
    }

    let mut projects = Vec::new();
    let mut frontier = vec![parent.to_string()];

    while let Some(container) = frontier.pop() {
        if ctx.is_cancelled() {
            return Err(QueryError::other("context cancelled"));
        }

        let listing = client
            .get_json(ctx, &format!("{base}/v1/projects?parent={container}"))
            .await
            .map_err(|e| QueryError::other(format!("listing projects under {container}: {e}")))?;
        for project in listing
            .get("projects")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(id) = project.get("projectId").and_then(Value::as_str) {
                debug!(project = id, parent = %container, "Discovered project");
                projects.push(id.to_string());
            }
        }

        let folders = client
            .get_json(ctx, &format!("{base}/v1/folders?parent={container}"))
            .await
            .map_err(|e| QueryError::other(format!("listing folders under {container}: {e}")))?;
        for folder in folders
            .get("folders")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(name) = folder.get("name").and_then(Value::as_str) {
                frontier.push(name.to_string());
            }
        }
    }

    info!(parent, count = projects.len(), "Project discovery complete");
    Ok(projects)
}
