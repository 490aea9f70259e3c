//! Error conditions attached to an instance.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

/// Kind of an instance-level error.
///
/// Declaration order is display priority: when several kinds are set, the
/// first one heads the combined error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CannotDestroy,
    TaskSubmitFailed,
    CannotStart,
    CannotStop,
    CannotClone,
    Custom,
}

impl ErrorKind {
    pub fn description(&self) -> &'static str {
        match self {
            Self::CannotDestroy => "Unable to destroy instance",
            Self::TaskSubmitFailed => "Unable to submit task to the platform",
            Self::CannotStart => "Unable to start instance",
            Self::CannotStop => "Unable to stop instance",
            Self::CannotClone => "Unable to clone instance",
            Self::Custom => "Instance error",
        }
    }
}

/// Reduced error view shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloudErrorInfo {
    /// Highest-priority kind currently set.
    pub kind: ErrorKind,

    /// Message of that kind, or its description when no message was given.
    pub message: String,

    /// Every error currently set, one per line, in priority order.
    pub details: String,
}

/// Tracks error conditions by kind.
///
/// Safe to read for display while another thread records a failure. No
/// operation panics, including after a poisoned lock.
#[derive(Debug, Default)]
pub struct ErrorTracker {
    errors: RwLock<BTreeMap<ErrorKind, Option<String>>>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or overwrites) the error for `kind`.
    pub fn set_error(&self, kind: ErrorKind, message: Option<String>) {
        self.errors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, message);
    }

    pub fn clear_error(&self, kind: ErrorKind) {
        self.errors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind);
    }

    pub fn clear_all(&self) {
        self.errors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn has_errors(&self) -> bool {
        !self
            .errors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Combined view of the current errors, `None` when there are none.
    pub fn current_error(&self) -> Option<CloudErrorInfo> {
        let errors = self.errors.read().unwrap_or_else(PoisonError::into_inner);
        let (kind, message) = errors.iter().next()?;

        let details = errors
            .iter()
            .map(|(kind, message)| match message {
                Some(message) => format!("{}: {}", kind.description(), message),
                None => kind.description().to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n");

        Some(CloudErrorInfo {
            kind: *kind,
            message: message
                .clone()
                .unwrap_or_else(|| kind.description().to_string()),
            details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_tracker_has_no_error() {
        let tracker = ErrorTracker::new();
        assert!(tracker.current_error().is_none());
        assert!(!tracker.has_errors());
    }

    #[test]
    fn test_set_then_clear_restores_no_error() {
        let tracker = ErrorTracker::new();
        tracker.set_error(ErrorKind::CannotDestroy, Some("m".to_string()));
        assert!(tracker.current_error().is_some());

        tracker.clear_error(ErrorKind::CannotDestroy);
        assert!(tracker.current_error().is_none());
    }

    #[test]
    fn test_clear_unknown_kind_is_noop() {
        let tracker = ErrorTracker::new();
        tracker.set_error(ErrorKind::CannotStart, None);
        tracker.clear_error(ErrorKind::CannotStop);
        assert_eq!(
            tracker.current_error().map(|e| e.kind),
            Some(ErrorKind::CannotStart)
        );
    }

    #[test]
    fn test_overwrite_message() {
        let tracker = ErrorTracker::new();
        tracker.set_error(ErrorKind::CannotStop, Some("first".to_string()));
        tracker.set_error(ErrorKind::CannotStop, Some("second".to_string()));

        let info = tracker.current_error().unwrap();
        assert_eq!(info.message, "second");
        assert_eq!(info.details, "Unable to stop instance: second");
    }

    #[test]
    fn test_priority_pick_is_deterministic() {
        let tracker = ErrorTracker::new();
        tracker.set_error(ErrorKind::Custom, Some("custom".to_string()));
        tracker.set_error(ErrorKind::CannotDestroy, None);

        let info = tracker.current_error().unwrap();
        assert_eq!(info.kind, ErrorKind::CannotDestroy);
        assert_eq!(info.message, "Unable to destroy instance");
        assert_eq!(
            info.details,
            "Unable to destroy instance\nInstance error: custom"
        );
    }

    #[test]
    fn test_concurrent_read_and_write() {
        let tracker = Arc::new(ErrorTracker::new());

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        tracker.set_error(ErrorKind::Custom, Some(format!("writer {i}")));
                        tracker.clear_error(ErrorKind::Custom);
                    }
                })
            })
            .collect();
        for _ in 0..100 {
            let _ = tracker.current_error();
        }
        for w in writers {
            w.join().unwrap();
        }

        assert!(tracker.current_error().is_none());
    }

    fn any_kind() -> impl Strategy<Value = ErrorKind> {
        prop_oneof![
            Just(ErrorKind::CannotDestroy),
            Just(ErrorKind::TaskSubmitFailed),
            Just(ErrorKind::CannotStart),
            Just(ErrorKind::CannotStop),
            Just(ErrorKind::CannotClone),
            Just(ErrorKind::Custom),
        ]
    }

    proptest! {
        #[test]
        fn prop_clear_all_always_empties(
            entries in proptest::collection::vec((any_kind(), proptest::option::of("[a-z]{0,6}")), 0..12)
        ) {
            let tracker = ErrorTracker::new();
            for (kind, message) in entries {
                tracker.set_error(kind, message);
            }
            tracker.clear_all();
            prop_assert!(tracker.current_error().is_none());
        }

        #[test]
        fn prop_head_is_lowest_kind(kinds in proptest::collection::vec(any_kind(), 1..6)) {
            let tracker = ErrorTracker::new();
            for kind in &kinds {
                tracker.set_error(*kind, None);
            }
            let lowest = kinds.iter().min().copied();
            prop_assert_eq!(tracker.current_error().map(|e| e.kind), lowest);
        }
    }
}
