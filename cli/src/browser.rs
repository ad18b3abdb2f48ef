use anyhow::{anyhow, Result};
use common::{ItemData, JobId, MemoryTree, NodeKind, Request, Response, Transport, TreeItem};
use serde_json::json;

pub const JOB_COLLECTION_LABEL: &str = "pgAgent Jobs";

/// Server node with its job collection; every job carries its own step
/// and schedule collections.
pub async fn load_tree(transport: &dyn Transport) -> Result<MemoryTree> {
    let server = match transport.send(Request::ServerInfo).await? {
        Response::Server(info) => info,
        Response::Error(e) => return Err(anyhow!(e)),
        other => return Err(anyhow!("Unexpected response to server_info: {:?}", other)),
    };
    let jobs = match transport.send(Request::ListJobs).await? {
        Response::JobList(jobs) => jobs,
        Response::Error(e) => return Err(anyhow!(e)),
        other => return Err(anyhow!("Unexpected response to list_jobs: {:?}", other)),
    };

    let mut tree = MemoryTree::new();
    let root = tree.add_root(
        ItemData::new(NodeKind::Server, None, server.name)
            .with_attr("version", json!(server.version))
            .with_attr("databases", json!(server.databases)),
    );
    let collection = tree.add_child(root, ItemData::new(NodeKind::JobCollection, None, JOB_COLLECTION_LABEL));
    for job in jobs {
        let node = tree.add_child(
            collection,
            ItemData::new(NodeKind::Job, Some(job.jobid.0), job.jobname)
                .with_attr("jobenabled", json!(job.jobenabled)),
        );
        tree.add_child(node, ItemData::new(NodeKind::StepCollection, None, "Steps"));
        tree.add_child(node, ItemData::new(NodeKind::ScheduleCollection, None, "Schedules"));
    }
    Ok(tree)
}

pub fn job_node(tree: &MemoryTree, jobid: JobId) -> Result<TreeItem> {
    tree.find(NodeKind::Job, Some(jobid.0))
        .ok_or_else(|| anyhow!("Job {} not found", jobid))
}

pub fn job_collection(tree: &MemoryTree) -> Result<TreeItem> {
    tree.find(NodeKind::JobCollection, None)
        .ok_or_else(|| anyhow!("No job collection"))
}
