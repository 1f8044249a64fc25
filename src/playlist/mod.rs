//! Play-list management
//!
//! An ordered sequence of task names plus a keyed store of task records, a
//! current index, and a consumption mode. All mutations are atomic with
//! respect to readers and raise the `task_update` signal so an idle fetcher
//! wakes up.


use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use rand::Rng;
use tracing::debug;

use crate::sync::Signal;
use crate::types::{PlayMode, TaskItem};

/// Play list for one stream instance
pub struct Playlist {
    state: Mutex<PlaylistState>,
    task_update: Signal,
}

struct PlaylistState {
    order: Vec<String>,
    tasks: HashMap<String, TaskItem>,
    current_index: usize,
    mode: PlayMode,
    /// Latched by skip_to / skip_relative; the fetcher consults and clears
    /// it to decide whether auto_next runs on task completion.
    manual_skip: bool,
}

impl Playlist {
    /// Create an empty play list in the given mode
    #[must_use]
    pub fn new(mode: PlayMode) -> Self {
        Self {
            state: Mutex::new(PlaylistState {
                order: Vec::new(),
                tasks: HashMap::new(),
                current_index: 0,
                mode,
                manual_skip: false,
            }),
            task_update: Signal::new(),
        }
    }

    /// Signal raised on every mutation
    #[must_use]
    pub fn task_update(&self) -> &Signal {
        &self.task_update
    }

    /// Add a task at the end of the order.
    ///
    /// Rejected (returns `false`) when a task with the same name exists.
    pub fn add(&self, task: TaskItem) -> bool {
        let mut state = self.state.lock().expect("playlist lock poisoned");
        if state.tasks.contains_key(&task.name) {
            return false;
        }
        state.order.push(task.name.clone());
        state.tasks.insert(task.name.clone(), task);
        drop(state);
        self.task_update.set();
        true
    }

    /// Remove a task by name.
    ///
    /// Rejected (returns `false`) for unknown names; the play list is left
    /// unchanged in that case.
    pub fn remove(&self, name: &str) -> bool {
        let mut state = self.state.lock().expect("playlist lock poisoned");
        if state.tasks.remove(name).is_none() {
            return false;
        }
        state.order.retain(|existing| existing != name);
        if state.current_index >= state.order.len() {
            state.current_index = 0;
        }
        drop(state);
        self.task_update.set();
        true
    }

    /// Remove every task
    pub fn clear(&self) {
        let mut state = self.state.lock().expect("playlist lock poisoned");
        state.order.clear();
        state.tasks.clear();
        state.current_index = 0;
        drop(state);
        self.task_update.set();
    }

    /// Atomic batch replace.
    ///
    /// Validates that every name in `order` resolves against `tasks` or the
    /// existing store, removes everything not in `order`, inserts or
    /// overwrites the rest, replaces the order, and clamps the current
    /// index. On a dangling reference nothing changes and `false` is
    /// returned.
    pub fn update(&self, tasks: Vec<TaskItem>, order: Vec<String>) -> bool {
        let mut state = self.state.lock().expect("playlist lock poisoned");

        let incoming: HashMap<&str, &TaskItem> =
            tasks.iter().map(|task| (task.name.as_str(), task)).collect();
        for name in &order {
            if !incoming.contains_key(name.as_str()) && !state.tasks.contains_key(name) {
                debug!(task = %name, "update rejected: order references unknown task");
                return false;
            }
        }

        for task in tasks {
            state.tasks.insert(task.name.clone(), task);
        }
        let keep: HashSet<&str> = order.iter().map(String::as_str).collect();
        state.tasks.retain(|name, _| keep.contains(name.as_str()));
        state.order = order;
        if state.current_index >= state.order.len() {
            state.current_index = 0;
        }
        drop(state);
        self.task_update.set();
        true
    }

    /// Return the task at the current index without advancing
    pub fn peek_current(&self) -> Option<TaskItem> {
        let state = self.state.lock().expect("playlist lock poisoned");
        state
            .order
            .get(state.current_index)
            .and_then(|name| state.tasks.get(name))
            .cloned()
    }

    /// Look up a task record by name
    pub fn find(&self, name: &str) -> Option<TaskItem> {
        let state = self.state.lock().expect("playlist lock poisoned");
        state.tasks.get(name).cloned()
    }

    /// Jump to the named task, latching the manual-skip flag.
    ///
    /// Rejected (returns `false`) for unknown names.
    pub fn skip_to(&self, name: &str) -> bool {
        let mut state = self.state.lock().expect("playlist lock poisoned");
        let Some(index) = state.order.iter().position(|existing| existing == name) else {
            return false;
        };
        state.current_index = index;
        state.manual_skip = true;
        drop(state);
        self.task_update.set();
        true
    }

    /// Jump relative to the current index, latching the manual-skip flag.
    ///
    /// Round-robin mode wraps; every other mode clamps at the boundaries.
    /// Rejected when the play list is empty.
    pub fn skip_relative(&self, offset: i32) -> bool {
        let mut state = self.state.lock().expect("playlist lock poisoned");
        let len = state.order.len();
        if len == 0 {
            return false;
        }

        let target = state.current_index as i64 + i64::from(offset);
        state.current_index = if state.mode == PlayMode::RoundRobin {
            target.rem_euclid(len as i64) as usize
        } else {
            target.clamp(0, len as i64 - 1) as usize
        };
        state.manual_skip = true;
        drop(state);
        self.task_update.set();
        true
    }

    /// Mode-driven advance, run by the fetcher when a cycle completes
    /// without a manual skip.
    pub fn auto_next(&self) {
        let mut state = self.state.lock().expect("playlist lock poisoned");
        let len = state.order.len();
        if len == 0 {
            return;
        }
        state.current_index = match state.mode {
            PlayMode::Fifo => (state.current_index + 1).min(len - 1),
            PlayMode::Lifo => state.current_index.saturating_sub(1),
            PlayMode::RoundRobin => (state.current_index + 1) % len,
            PlayMode::Random => rand::thread_rng().gen_range(0..len),
            PlayMode::SingleLoop => state.current_index,
        };
        drop(state);
        self.task_update.set();
    }

    /// Consume the manual-skip latch, returning whether it was set
    pub fn take_manual_skip(&self) -> bool {
        let mut state = self.state.lock().expect("playlist lock poisoned");
        std::mem::take(&mut state.manual_skip)
    }

    /// Change the consumption mode
    pub fn set_mode(&self, mode: PlayMode) {
        let mut state = self.state.lock().expect("playlist lock poisoned");
        if state.mode != mode {
            state.mode = mode;
            drop(state);
            self.task_update.set();
        }
    }

    /// Current consumption mode
    pub fn mode(&self) -> PlayMode {
        self.state.lock().expect("playlist lock poisoned").mode
    }

    /// Snapshot of the task order
    pub fn order(&self) -> Vec<String> {
        self.state.lock().expect("playlist lock poisoned").order.clone()
    }

    /// Current index into the order
    pub fn current_index(&self) -> usize {
        self.state
            .lock()
            .expect("playlist lock poisoned")
            .current_index
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.state.lock().expect("playlist lock poisoned").order.len()
    }

    /// Whether the play list holds no tasks
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
