use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SelectionError;

/// Ancestors visited before giving up on finding a server node.
pub const MAX_ANCESTOR_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    #[serde(rename = "server")]
    Server,
    #[serde(rename = "coll-pga_job")]
    JobCollection,
    #[serde(rename = "pga_job")]
    Job,
    #[serde(rename = "coll-pga_jobstep")]
    StepCollection,
    #[serde(rename = "coll-pga_schedule")]
    ScheduleCollection,
    #[serde(rename = "pga_jobstep")]
    Step,
    #[serde(rename = "pga_schedule")]
    Schedule,
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Server => "server",
            NodeKind::JobCollection => "coll-pga_job",
            NodeKind::Job => "pga_job",
            NodeKind::StepCollection => "coll-pga_jobstep",
            NodeKind::ScheduleCollection => "coll-pga_schedule",
            NodeKind::Step => "pga_jobstep",
            NodeKind::Schedule => "pga_schedule",
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            NodeKind::JobCollection | NodeKind::StepCollection | NodeKind::ScheduleCollection
        )
    }
}

/// Handle of a node in a browser tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeItem(pub usize);

/// Attributes attached to a tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemData {
    #[serde(rename = "_type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub id: Option<i64>,
    pub label: String,
    #[serde(flatten)]
    pub attrs: Map<String, Value>,
}

impl ItemData {
    pub fn new(kind: NodeKind, id: Option<i64>, label: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            label: label.into(),
            attrs: Map::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: Value) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    /// String array attribute, empty when missing.
    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.attrs
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub trait BrowserTree: Send + Sync {
    fn selected(&self) -> Option<TreeItem>;

    fn item_data(&self, item: TreeItem) -> Option<ItemData>;

    fn parent(&self, item: TreeItem) -> Option<TreeItem>;

    /// Drops the cached state of `item` so it is reloaded on next access.
    fn unload(&self, item: TreeItem);
}

/// Walks from `item` up through its parents to the first server node.
pub fn resolve_server(
    tree: &dyn BrowserTree,
    item: Option<TreeItem>,
) -> Result<(TreeItem, ItemData), SelectionError> {
    let item = item.ok_or(SelectionError::NoSelection)?;
    let data = tree.item_data(item).ok_or(SelectionError::NoSelection)?;
    if data.kind == NodeKind::Server {
        return Ok((item, data));
    }

    let mut current = item;
    for _ in 0..MAX_ANCESTOR_DEPTH {
        let Some(parent) = tree.parent(current) else {
            break;
        };
        match tree.item_data(parent) {
            Some(data) if data.kind == NodeKind::Server => return Ok((parent, data)),
            Some(_) => current = parent,
            None => break,
        }
    }

    log::debug!("no server ancestor for tree item {:?}", item);
    Err(SelectionError::NoServer)
}

#[derive(Debug)]
struct Node {
    data: ItemData,
    parent: Option<TreeItem>,
}

/// Tree held in memory: an arena of nodes plus the current selection and
/// the set of nodes whose cached state was dropped.
#[derive(Debug, Default)]
pub struct MemoryTree {
    nodes: Vec<Node>,
    selected: Mutex<Option<TreeItem>>,
    unloaded: Mutex<HashSet<TreeItem>>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, data: ItemData) -> TreeItem {
        self.push(data, None)
    }

    pub fn add_child(&mut self, parent: TreeItem, data: ItemData) -> TreeItem {
        self.push(data, Some(parent))
    }

    fn push(&mut self, data: ItemData, parent: Option<TreeItem>) -> TreeItem {
        let item = TreeItem(self.nodes.len());
        self.nodes.push(Node { data, parent });
        item
    }

    pub fn select(&self, item: Option<TreeItem>) {
        if let Ok(mut selected) = self.selected.lock() {
            *selected = item;
        }
    }

    pub fn find(&self, kind: NodeKind, id: Option<i64>) -> Option<TreeItem> {
        self.nodes
            .iter()
            .position(|n| n.data.kind == kind && n.data.id == id)
            .map(TreeItem)
    }

    pub fn children(&self, item: TreeItem) -> Vec<TreeItem> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent == Some(item))
            .map(|(i, _)| TreeItem(i))
            .collect()
    }

    pub fn is_unloaded(&self, item: TreeItem) -> bool {
        self.unloaded
            .lock()
            .map(|set| set.contains(&item))
            .unwrap_or(false)
    }
}

impl BrowserTree for MemoryTree {
    fn selected(&self) -> Option<TreeItem> {
        self.selected.lock().ok().and_then(|s| *s)
    }

    fn item_data(&self, item: TreeItem) -> Option<ItemData> {
        self.nodes.get(item.0).map(|n| n.data.clone())
    }

    fn parent(&self, item: TreeItem) -> Option<TreeItem> {
        self.nodes.get(item.0).and_then(|n| n.parent)
    }

    fn unload(&self, item: TreeItem) {
        if let Ok(mut unloaded) = self.unloaded.lock() {
            unloaded.insert(item);
        }
    }
}
