//! Task list as seen by the stack shrinker
//!
//! The shrinker needs, per task, whether it is running and where its saved
//! kernel stack pointer is. A platform exposes that through
//! [`TaskRegistry`]; [`TaskTable`] is a spin-locked table for hosts and
//! tests.

use alloc::vec::Vec;
use spin::Mutex;

use crate::types::{task_name, TaskId, TaskName};

/// Stack-relevant state of one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStackInfo {
    pub id: TaskId,
    pub name: TaskName,
    /// Currently on a CPU; its stack pointer is stale
    pub running: bool,
    /// Kernel stack pointer saved at the last switch-out (0 if never run)
    pub stack_pointer: usize,
}

impl TaskStackInfo {
    pub fn new(id: TaskId, name: &str) -> Self {
        Self {
            id,
            name: task_name(name),
            running: false,
            stack_pointer: 0,
        }
    }
}

/// Source of task stack state
pub trait TaskRegistry: Send + Sync {
    /// Call `f` for every task; must not block
    fn for_each_task(&self, f: &mut dyn FnMut(&TaskStackInfo));
}

/// Spin-locked task table
#[derive(Debug, Default)]
pub struct TaskTable {
    tasks: Mutex<Vec<TaskStackInfo>>,
}

impl TaskTable {
    pub const fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Add a task; replaces an entry with the same id
    pub fn insert(&self, info: TaskStackInfo) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| t.id != info.id);
        tasks.push(info);
    }

    /// Record a switch-out at `sp`
    pub fn switch_out(&self, id: TaskId, sp: usize) -> bool {
        self.update(id, |t| {
            t.running = false;
            t.stack_pointer = sp;
        })
    }

    /// Record a switch-in
    pub fn switch_in(&self, id: TaskId) -> bool {
        self.update(id, |t| t.running = true)
    }

    /// Drop a task
    pub fn remove(&self, id: TaskId) -> Option<TaskStackInfo> {
        let mut tasks = self.tasks.lock();
        let pos = tasks.iter().position(|t| t.id == id)?;
        Some(tasks.swap_remove(pos))
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, id: TaskId, f: impl FnOnce(&mut TaskStackInfo)) -> bool {
        let mut tasks = self.tasks.lock();
        match tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                f(task);
                true
            }
            None => false,
        }
    }
}

impl TaskRegistry for TaskTable {
    fn for_each_task(&self, f: &mut dyn FnMut(&TaskStackInfo)) {
        for task in self.tasks.lock().iter() {
            f(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_table_lifecycle() {
        let table = TaskTable::new();
        let id = TaskId::new();
        table.insert(TaskStackInfo::new(id, "kworker/0:1"));
        assert_eq!(table.len(), 1);

        assert!(table.switch_in(id));
        assert!(table.switch_out(id, 0x3f00));
        assert!(!table.switch_in(TaskId::new()));

        let mut seen = Vec::new();
        table.for_each_task(&mut |t| seen.push((t.id, t.running, t.stack_pointer)));
        assert_eq!(seen, [(id, false, 0x3f00)]);

        let removed = table.remove(id).unwrap();
        assert_eq!(removed.name.as_str(), "kworker/0:1");
        assert!(table.is_empty());
    }

    #[test]
    fn test_insert_replaces() {
        let table = TaskTable::new();
        let id = TaskId::new();
        table.insert(TaskStackInfo::new(id, "a"));
        table.insert(TaskStackInfo::new(id, "b"));
        assert_eq!(table.len(), 1);
    }
}
