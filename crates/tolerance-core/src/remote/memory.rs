//! In-process remote store backed by a JSON tree.
//!
//! Suitable for tests and local tooling. It journals every applied operation
//! and can inject failures and latency so saga ordering and partial-failure
//! paths can be exercised without a network.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::time::Duration;

use super::{ConditionalMerge, RemoteError, RemoteStore, StorePath};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    Read,
    Write,
    Merge,
    MergeIf,
}

/// One applied operation, in the order the store saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub op: RemoteOp,
    pub path: String,
    pub value: Option<Value>,
}

#[derive(Debug, Clone)]
struct Fault {
    op: RemoteOp,
    prefix: String,
    error: RemoteError,
}

#[derive(Debug, Default)]
struct Inner {
    root: Value,
    journal: Vec<JournalEntry>,
    faults: Vec<Fault>,
    latency: Option<Duration>,
}

#[derive(Debug)]
pub struct MemoryRemoteStore {
    inner: Mutex<Inner>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::from_value(Value::Object(Map::new()))
    }

    pub fn from_value(root: Value) -> Self {
        let root = if root.is_object() {
            root
        } else {
            Value::Object(Map::new())
        };
        Self {
            inner: Mutex::new(Inner {
                root,
                ..Inner::default()
            }),
        }
    }

    /// Copy of the whole tree.
    pub fn snapshot(&self) -> Value {
        self.inner.lock().root.clone()
    }

    /// Set a value directly without journaling (test fixtures, CLI seeding).
    pub fn insert(&self, path: &StorePath, value: Value) {
        let mut inner = self.inner.lock();
        put(&mut inner.root, path, value);
    }

    /// Synchronous read without journaling.
    pub fn get(&self, path: &StorePath) -> Option<Value> {
        let inner = self.inner.lock();
        lookup(&inner.root, path).cloned()
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.inner.lock().journal.clone()
    }

    /// Number of journaled operations that changed data.
    pub fn mutation_count(&self) -> usize {
        self.inner
            .lock()
            .journal
            .iter()
            .filter(|e| e.op != RemoteOp::Read)
            .count()
    }

    /// Fail the next `op` on any path under `prefix` with `error`.
    pub fn fail_next(&self, op: RemoteOp, prefix: &str, error: RemoteError) {
        self.inner.lock().faults.push(Fault {
            op,
            prefix: prefix.to_string(),
            error,
        });
    }

    /// Delay every subsequent operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.inner.lock().latency = latency;
    }

    async fn before(&self, op: RemoteOp, path: &StorePath) -> Result<(), RemoteError> {
        let latency = self.inner.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut inner = self.inner.lock();
        let matching = inner
            .faults
            .iter()
            .position(|f| f.op == op && path.starts_with(&f.prefix));
        match matching {
            Some(index) => Err(inner.faults.remove(index).error),
            None => Ok(()),
        }
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup<'a>(root: &'a Value, path: &StorePath) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.segments() {
        current = current.as_object()?.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Walk to `path`, turning scalars into objects and creating missing nodes.
/// A freshly created leaf is `null`.
fn node_mut<'a>(root: &'a mut Value, path: &StorePath) -> &'a mut Value {
    let mut current = root;
    for segment in path.segments() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = &mut current[segment];
    }
    current
}

fn remove(root: &mut Value, path: &StorePath) {
    let segments: Vec<&str> = path.segments().collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = root;
    for segment in parents {
        match current.as_object_mut().and_then(|m| m.get_mut(*segment)) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(map) = current.as_object_mut() {
        map.remove(*last);
    }
}

/// Writing `null` deletes, matching the remote store's semantics.
fn put(root: &mut Value, path: &StorePath, value: Value) {
    if value.is_null() {
        remove(root, path);
    } else {
        *node_mut(root, path) = value;
    }
}

fn merge_into(root: &mut Value, path: &StorePath, fields: Map<String, Value>) {
    let target = node_mut(root, path);
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in fields {
            if value.is_null() {
                map.remove(&key);
            } else {
                map.insert(key, value);
            }
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, RemoteError> {
        self.before(RemoteOp::Read, path).await?;
        let mut inner = self.inner.lock();
        let value = lookup(&inner.root, path).cloned();
        inner.journal.push(JournalEntry {
            op: RemoteOp::Read,
            path: path.to_string(),
            value: None,
        });
        Ok(value)
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<(), RemoteError> {
        self.before(RemoteOp::Write, path).await?;
        let mut inner = self.inner.lock();
        put(&mut inner.root, path, value.clone());
        inner.journal.push(JournalEntry {
            op: RemoteOp::Write,
            path: path.to_string(),
            value: Some(value),
        });
        Ok(())
    }

    async fn merge(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), RemoteError> {
        self.before(RemoteOp::Merge, path).await?;
        let mut inner = self.inner.lock();
        let journaled = Value::Object(fields.clone());
        merge_into(&mut inner.root, path, fields);
        inner.journal.push(JournalEntry {
            op: RemoteOp::Merge,
            path: path.to_string(),
            value: Some(journaled),
        });
        Ok(())
    }

    async fn merge_if(
        &self,
        path: &StorePath,
        guard_field: &str,
        expected: &Value,
        fields: Map<String, Value>,
    ) -> Result<ConditionalMerge, RemoteError> {
        self.before(RemoteOp::MergeIf, path).await?;
        let mut inner = self.inner.lock();
        let current = lookup(&inner.root, path)
            .and_then(|node| node.get(guard_field))
            .cloned();
        if current.as_ref() != Some(expected) {
            return Ok(ConditionalMerge::Conflict { current });
        }
        let journaled = Value::Object(fields.clone());
        merge_into(&mut inner.root, path, fields);
        inner.journal.push(JournalEntry {
            op: RemoteOp::MergeIf,
            path: path.to_string(),
            value: Some(journaled),
        });
        Ok(ConditionalMerge::Applied)
    }
}
