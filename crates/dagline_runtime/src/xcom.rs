//! Typed inter-task value store.
//!
//! Each task publishes at most one value under its own id. Downstream tasks
//! pull it back with the concrete type they expect; a wrong type is an error,
//! not a silent reinterpretation.

use dagline_core::{CoreError, CoreResult, TaskId};
use indexmap::IndexMap;
use std::any::{Any, type_name};
use std::sync::{Arc, RwLock};

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// Value store scoped to one run
#[derive(Default)]
pub struct XCom {
    entries: RwLock<IndexMap<TaskId, Entry>>,
}

impl XCom {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the value produced by `task`, replacing any earlier value
    ///
    /// # Errors
    ///
    /// Returns error if the store lock is poisoned
    pub fn push<T: Any + Send + Sync>(&self, task: &TaskId, value: T) -> CoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(
            task.clone(),
            Entry {
                value: Arc::new(value),
                type_name: type_name::<T>(),
            },
        );
        Ok(())
    }

    /// Fetch the value produced by `task`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the task published nothing and `TypeMismatch`
    /// if it published a different type
    pub fn pull<T: Any + Send + Sync>(&self, task: &TaskId) -> CoreResult<Arc<T>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let entry = entries.get(task).ok_or_else(|| CoreError::NotFound {
            kind: "XCom value".to_string(),
            id: task.to_string(),
        })?;

        Arc::clone(&entry.value)
            .downcast::<T>()
            .map_err(|_| CoreError::TypeMismatch {
                key: format!("{} (holds {})", task, entry.type_name),
                expected: type_name::<T>().to_string(),
            })
    }

    /// Whether `task` published a value
    #[must_use]
    pub fn contains(&self, task: &TaskId) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(task))
            .unwrap_or(false)
    }

    /// Number of stored values
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether nothing has been published
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Task ids with their stored type names, in publish order
    #[must_use]
    pub fn keys(&self) -> Vec<(TaskId, &'static str)> {
        self.entries
            .read()
            .map(|entries| {
                entries
                    .iter()
                    .map(|(id, entry)| (id.clone(), entry.type_name))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for XCom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XCom").field("keys", &self.keys()).finish()
    }
}

fn poisoned() -> CoreError {
    CoreError::Internal {
        message: "xcom store lock poisoned".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(name: &str) -> TaskId {
        TaskId::new(name).unwrap()
    }

    #[test]
    fn test_push_pull() {
        let xcom = XCom::new();
        xcom.push(&tid("load"), vec![1.0f64, 2.0]).unwrap();

        let value = xcom.pull::<Vec<f64>>(&tid("load")).unwrap();
        assert_eq!(*value, vec![1.0, 2.0]);
        assert!(xcom.contains(&tid("load")));
    }

    #[test]
    fn test_pull_missing() {
        let xcom = XCom::new();
        let err = xcom.pull::<u32>(&tid("nothing")).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn test_pull_wrong_type() {
        let xcom = XCom::new();
        xcom.push(&tid("split"), 42u32).unwrap();

        let err = xcom.pull::<String>(&tid("split")).unwrap_err();
        match err {
            CoreError::TypeMismatch { key, expected } => {
                assert!(key.contains("u32"));
                assert!(expected.contains("String"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_push_replaces() {
        let xcom = XCom::new();
        xcom.push(&tid("t"), 1u8).unwrap();
        xcom.push(&tid("t"), "second".to_string()).unwrap();

        assert_eq!(xcom.len(), 1);
        assert_eq!(*xcom.pull::<String>(&tid("t")).unwrap(), "second");
    }

    #[test]
    fn test_keys_in_publish_order() {
        let xcom = XCom::new();
        xcom.push(&tid("b"), 2i64).unwrap();
        xcom.push(&tid("a"), 1i64).unwrap();

        let keys = xcom.keys();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].0, tid("b"));
        assert!(!xcom.is_empty());
    }
}
