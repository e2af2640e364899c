//! Process environment captured once at startup.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

/// Key under which the current invocation's X-Ray trace id is published.
pub const TRACE_ID_KEY: &str = "_X_AMZN_TRACE_ID";

/// Read-only view of the process environment.
///
/// Clones share the same backing store. The only mutable slot is the trace id, which context
/// parsing overwrites on every invocation (last write wins). A snapshot taken with
/// [`EnvironmentSnapshot::capture`] also mirrors that slot into the process environment, so
/// handler code and tracing libraries reading `_X_AMZN_TRACE_ID` with `std::env::var` see it.
#[derive(Debug, Clone)]
pub struct EnvironmentSnapshot {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    vars: HashMap<String, String>,
    trace_id: RwLock<Option<String>>,
    mirror_to_process: bool,
}

impl EnvironmentSnapshot {
    /// Capture the current process environment. Non-UTF-8 entries are skipped.
    pub fn capture() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
        Self::build(vars, true)
    }

    /// A detached snapshot. Publishing a trace id never touches the process environment.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::build(vars, false)
    }

    fn build<I, K, V>(vars: I, mirror_to_process: bool) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let trace_id = vars.get(TRACE_ID_KEY).cloned();

        Self {
            inner: Arc::new(Inner {
                vars,
                trace_id: RwLock::new(trace_id),
                mirror_to_process,
            }),
        }
    }

    /// Look up a variable. [`TRACE_ID_KEY`] reads the live trace-id slot.
    pub fn var(&self, name: &str) -> Option<String> {
        if name == TRACE_ID_KEY {
            return self.trace_id();
        }
        self.inner.vars.get(name).cloned()
    }

    /// Like [`Self::var`], but treats an empty value as unset.
    pub fn non_empty_var(&self, name: &str) -> Option<String> {
        self.var(name).filter(|v| !v.is_empty())
    }

    pub fn trace_id(&self) -> Option<String> {
        self.inner.trace_id.read().clone()
    }

    /// Publish the trace id of the invocation being served. `None` clears the slot so a
    /// previous invocation's id does not leak into the next one.
    pub fn publish_trace_id(&self, trace_id: Option<&str>) {
        let mut slot = self.inner.trace_id.write();
        *slot = trace_id.map(str::to_string);
        if self.inner.mirror_to_process {
            // Held under the slot lock so the process value always matches the slot.
            match trace_id {
                Some(id) => std::env::set_var(TRACE_ID_KEY, id),
                None => std::env::remove_var(TRACE_ID_KEY),
            }
        }
    }
}

impl Default for EnvironmentSnapshot {
    fn default() -> Self {
        Self::from_vars(std::iter::empty::<(String, String)>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_reads_captured_values() {
        let env = EnvironmentSnapshot::from_vars([("A", "1"), ("EMPTY", "")]);
        assert_eq!(env.var("A").as_deref(), Some("1"));
        assert_eq!(env.var("EMPTY").as_deref(), Some(""));
        assert!(env.non_empty_var("EMPTY").is_none());
        assert!(env.var("MISSING").is_none());
    }

    #[test]
    fn trace_id_is_shared_between_clones() {
        let env = EnvironmentSnapshot::from_vars([(TRACE_ID_KEY, "Root=initial")]);
        let other = env.clone();
        assert_eq!(other.trace_id().as_deref(), Some("Root=initial"));

        env.publish_trace_id(Some("Root=1-abc"));
        assert_eq!(other.var(TRACE_ID_KEY).as_deref(), Some("Root=1-abc"));

        other.publish_trace_id(None);
        assert!(env.trace_id().is_none());
    }

    #[test]
    fn detached_snapshots_leave_the_process_alone() {
        let env = EnvironmentSnapshot::from_vars([("A", "1")]);
        env.publish_trace_id(Some("Root=1-detached"));
        assert_ne!(
            std::env::var(TRACE_ID_KEY).ok().as_deref(),
            Some("Root=1-detached")
        );
    }

    #[test]
    fn captured_snapshot_mirrors_trace_id_into_process() {
        let env = EnvironmentSnapshot::capture();

        env.publish_trace_id(Some("Root=1-captured"));
        assert_eq!(std::env::var(TRACE_ID_KEY).as_deref(), Ok("Root=1-captured"));
        assert_eq!(env.var(TRACE_ID_KEY).as_deref(), Some("Root=1-captured"));

        env.publish_trace_id(None);
        assert!(std::env::var(TRACE_ID_KEY).is_err());
    }
}
