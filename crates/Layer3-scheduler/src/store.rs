//! Task persistence

use crate::task::Task;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use warden_foundation::{Result, Storage};

pub trait TaskStore: Send + Sync {
    /// Insert or replace
    fn save(&self, task: &Task) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<Task>>;

    /// Children of `parent_id` in creation order
    fn subtasks(&self, parent_id: &str) -> Result<Vec<Task>>;

    /// Removes the task together with its subtasks
    fn delete(&self, id: &str) -> Result<()>;
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
pub struct MemoryTaskStore {
    /// id -> (insertion sequence, task)
    tasks: RwLock<HashMap<String, (u64, Task)>>,
    seq: AtomicU64,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}

impl TaskStore for MemoryTaskStore {
    fn save(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.write();
        match tasks.get_mut(&task.id) {
            Some((_, existing)) => *existing = task.clone(),
            None => {
                let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                tasks.insert(task.id.clone(), (seq, task.clone()));
            }
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.read().get(id).map(|(_, t)| t.clone()))
    }

    fn subtasks(&self, parent_id: &str) -> Result<Vec<Task>> {
        let tasks = self.tasks.read();
        let mut children: Vec<&(u64, Task)> = tasks
            .values()
            .filter(|(_, t)| t.parent_id.as_deref() == Some(parent_id))
            .collect();
        children.sort_by_key(|(seq, _)| *seq);
        Ok(children.into_iter().map(|(_, t)| t.clone()).collect())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.tasks
            .write()
            .retain(|key, (_, t)| key != id && t.parent_id.as_deref() != Some(id));
        Ok(())
    }
}

// ============================================================================
// SQLite
// ============================================================================

pub struct SqliteTaskStore {
    storage: Storage,
}

impl SqliteTaskStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

impl TaskStore for SqliteTaskStore {
    fn save(&self, task: &Task) -> Result<()> {
        self.storage.save_task(&task.to_record())
    }

    fn get(&self, id: &str) -> Result<Option<Task>> {
        match self.storage.get_task(id)? {
            Some(record) => Ok(Some(Task::from_record(record)?)),
            None => Ok(None),
        }
    }

    fn subtasks(&self, parent_id: &str) -> Result<Vec<Task>> {
        self.storage
            .list_subtasks(parent_id)?
            .into_iter()
            .map(|r| Task::from_record(r).map_err(Into::into))
            .collect()
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.storage.delete_task(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;
    use serde_json::json;

    fn exercise(store: &dyn TaskStore) {
        let mut root = Task::new("alice", "root", "do things");
        let a = Task::subtask(&root, "A", "first").with_role("coder");
        let b = Task::subtask(&root, "B", "second")
            .with_role("security")
            .with_dependencies(vec![a.id.clone()]);
        root.subtasks = vec![a.id.clone(), b.id.clone()];

        store.save(&root).unwrap();
        store.save(&a).unwrap();
        store.save(&b).unwrap();

        let ids: Vec<String> = store
            .subtasks(&root.id)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![a.id.clone(), b.id.clone()]);

        root.start().unwrap();
        root.complete(json!({"answer": "done"})).unwrap();
        store.save(&root).unwrap();
        let loaded = store.get(&root.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(loaded.result, Some(json!({"answer": "done"})));

        store.delete(&root.id).unwrap();
        assert!(store.get(&root.id).unwrap().is_none());
        assert!(store.get(&a.id).unwrap().is_none());
        assert!(store.subtasks(&root.id).unwrap().is_empty());
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryTaskStore::new());
    }

    #[test]
    fn test_sqlite_store() {
        exercise(&SqliteTaskStore::new(Storage::in_memory().unwrap()));
    }
}
