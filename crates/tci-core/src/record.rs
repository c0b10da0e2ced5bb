use std::collections::HashMap;
use std::sync::RwLock;

use tokio_util::sync::CancellationToken;

/// Handle to an in-flight run as tracked by the framework.
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub run_id: i64,
    pub cancel: CancellationToken,
}

/// Table of in-flight runs keyed by run name, used for graceful drain
/// and hard-stop fanout.
///
/// Empty exactly when nothing is in flight: populated when a run
/// starts, cleared by the run's finalizer.
#[derive(Debug, Default)]
pub struct RunRecord {
    inner: RwLock<HashMap<String, ActiveRun>>,
}

impl RunRecord {
    pub fn insert(&self, name: &str, run: ActiveRun) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), run);
    }

    pub fn remove(&self, name: &str) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current table, for iterating without holding the
    /// lock across awaits.
    pub fn snapshot(&self) -> Vec<(String, ActiveRun)> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(run_id: i64) -> ActiveRun {
        ActiveRun {
            run_id,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn insert_remove_tracks_len() {
        let record = RunRecord::default();
        assert!(record.is_empty());

        record.insert("default.1", active(1));
        record.insert("default.2", active(2));
        assert_eq!(record.len(), 2);

        record.remove("default.1");
        assert_eq!(record.len(), 1);

        record.remove("default.2");
        assert!(record.is_empty());
    }

    #[test]
    fn remove_of_unknown_name_is_a_noop() {
        let record = RunRecord::default();
        record.remove("default.404");
        assert!(record.is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_the_table() {
        let record = RunRecord::default();
        record.insert("default.1", active(1));

        let snap = record.snapshot();
        record.remove("default.1");

        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].0, "default.1");
        assert_eq!(snap[0].1.run_id, 1);
        assert!(record.is_empty());
    }
}
