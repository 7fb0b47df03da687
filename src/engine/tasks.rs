//! Task registry: in-flight and completed refresh cycles, polled by the
//! control API. Completed entries are kept for later polling and
//! garbage-collected (oldest completed half) once the registry exceeds its
//! cap.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::task::JoinHandle;

use super::refresh::RefreshReport;

const TASKLIST_MAX: usize = 256;

struct TaskEntry {
    handle: Option<JoinHandle<RefreshReport>>,
    result: Option<RefreshReport>,
    seq: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    NotFound,
    Pending,
    Done(RefreshReport),
}

#[derive(Default)]
pub struct TaskRegistry {
    inner: Mutex<HashMap<String, TaskEntry>>,
    seq: AtomicU64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a cycle future and return its polling handle.
    pub fn spawn(&self, fut: impl Future<Output = RefreshReport> + Send + 'static) -> String {
        self.gc();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("task-{seq}");
        let handle = tokio::spawn(fut);
        self.inner.lock().expect("task mutex poisoned").insert(
            id.clone(),
            TaskEntry {
                handle: Some(handle),
                result: None,
                seq,
            },
        );
        id
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("task mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn status(&self, id: &str) -> TaskStatus {
        // Take a finished handle out under the lock, join it outside.
        let handle = {
            let mut map = self.inner.lock().expect("task mutex poisoned");
            match map.get_mut(id) {
                None => return TaskStatus::NotFound,
                Some(entry) => {
                    if let Some(result) = &entry.result {
                        return TaskStatus::Done(result.clone());
                    }
                    match &entry.handle {
                        Some(h) if h.is_finished() => entry.handle.take().expect("handle present"),
                        _ => return TaskStatus::Pending,
                    }
                }
            }
        };
        let report = handle.await.unwrap_or_default();
        let mut map = self.inner.lock().expect("task mutex poisoned");
        if let Some(entry) = map.get_mut(id) {
            entry.result = Some(report.clone());
        }
        TaskStatus::Done(report)
    }

    fn gc(&self) {
        let mut map = self.inner.lock().expect("task mutex poisoned");
        if map.len() < TASKLIST_MAX {
            return;
        }
        let mut done: Vec<(String, u64)> = map
            .iter()
            .filter(|(_, e)| {
                e.result.is_some() || e.handle.as_ref().is_some_and(|h| h.is_finished())
            })
            .map(|(id, e)| (id.clone(), e.seq))
            .collect();
        done.sort_by_key(|(_, seq)| *seq);
        for (id, _) in done.into_iter().take(TASKLIST_MAX / 2) {
            map.remove(&id);
        }
    }
}
