//! Window registry: which application windows exist right now, and which
//! one holds focus. Host threads mutate it as windows come and go; server
//! workers read it to answer listing queries. Every operation takes one
//! short lock and does no I/O inside it.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

static NEXT_WINDOW_ID: AtomicU64 = AtomicU64::new(1);

/// Reference to one live application window or screen.
///
/// Identity is the window, not its title: every call to [`WindowHandle::new`]
/// yields a handle unequal to all previously created ones, while clones of a
/// handle stay equal to it. Two windows titled "Settings" are still two
/// windows.
#[derive(Debug, Clone)]
pub struct WindowHandle {
    id: u64,
    title: String,
}

impl WindowHandle {
    pub fn new(title: impl Into<String>) -> WindowHandle {
        WindowHandle {
            id: NEXT_WINDOW_ID.fetch_add(1, Ordering::Relaxed),
            title: title.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

impl PartialEq for WindowHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WindowHandle {}

impl Hash for WindowHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// One row of the listing commands' JSON output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub id: u64,
    pub title: String,
    pub focused: bool,
}

#[derive(Default)]
struct RegistryInner {
    windows: Vec<WindowHandle>,
    focused: Option<WindowHandle>,
}

/// Ordered set of live windows (insertion order, no duplicates) plus at
/// most one focused handle. Safe to call from any number of threads at
/// once.
///
/// Focus and membership are tracked independently: [`set_focused_window`]
/// accepts a handle that was never added, and the focus then dangles until
/// it is cleared or replaced. [`remove_window`] of a member that holds
/// focus clears the focus with it.
///
/// [`set_focused_window`]: WindowRegistry::set_focused_window
/// [`remove_window`]: WindowRegistry::remove_window
#[derive(Default)]
pub struct WindowRegistry {
    inner: Mutex<RegistryInner>,
}

impl WindowRegistry {
    pub fn new() -> WindowRegistry {
        WindowRegistry::default()
    }

    /// Appends `handle` unless it is already registered.
    pub fn add_window(&self, handle: &WindowHandle) {
        let mut inner = self.inner.lock();
        if !inner.windows.contains(handle) {
            inner.windows.push(handle.clone());
        }
    }

    /// Removes `handle` if registered, clearing focus when the removed
    /// window held it. Removing an unknown handle does nothing.
    pub fn remove_window(&self, handle: &WindowHandle) {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.windows.iter().position(|w| w == handle) {
            inner.windows.remove(pos);
            if inner.focused.as_ref() == Some(handle) {
                inner.focused = None;
            }
        }
    }

    /// Marks `handle` as focused, registered or not.
    pub fn set_focused_window(&self, handle: &WindowHandle) {
        self.inner.lock().focused = Some(handle.clone());
    }

    pub fn clear_focused_window(&self) {
        self.inner.lock().focused = None;
    }

    pub fn clear_windows(&self) {
        self.inner.lock().windows.clear();
    }

    pub fn focused_window(&self) -> Option<WindowHandle> {
        self.inner.lock().focused.clone()
    }

    /// Consistent copy of the current windows in creation order. Writes
    /// racing the call land either side of it, never in the middle.
    pub fn snapshot(&self) -> Vec<WindowHandle> {
        self.inner.lock().windows.clone()
    }

    /// Listing rows with the focus flag resolved under the same lock as
    /// the membership, so a row is never marked focused by a handle that
    /// was swapped mid-read.
    pub fn window_infos(&self) -> Vec<WindowInfo> {
        let inner = self.inner.lock();
        inner
            .windows
            .iter()
            .map(|w| WindowInfo {
                id: w.id,
                title: w.title.clone(),
                focused: inner.focused.as_ref() == Some(w),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_handle_identity() {
        let a = WindowHandle::new("Settings");
        let b = WindowHandle::new("Settings");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_add_is_idempotent() {
        let registry = WindowRegistry::new();
        let a = WindowHandle::new("A");
        registry.add_window(&a);
        registry.add_window(&a);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let registry = WindowRegistry::new();
        let a = WindowHandle::new("A");
        registry.remove_window(&a);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_insertion_order_preserved() {
        let registry = WindowRegistry::new();
        let a = WindowHandle::new("A");
        let b = WindowHandle::new("B");
        registry.add_window(&a);
        registry.add_window(&b);
        assert_eq!(registry.snapshot(), vec![a, b]);
    }

    #[test]
    fn test_remove_focused_clears_focus() {
        let registry = WindowRegistry::new();
        let a = WindowHandle::new("A");
        let b = WindowHandle::new("B");
        registry.add_window(&a);
        registry.add_window(&b);
        registry.set_focused_window(&b);
        assert_eq!(registry.focused_window(), Some(b.clone()));

        registry.remove_window(&b);
        assert_eq!(registry.focused_window(), None);
        assert_eq!(registry.snapshot(), vec![a]);
    }

    #[test]
    fn test_remove_other_keeps_focus() {
        let registry = WindowRegistry::new();
        let a = WindowHandle::new("A");
        let b = WindowHandle::new("B");
        registry.add_window(&a);
        registry.add_window(&b);
        registry.set_focused_window(&b);
        registry.remove_window(&a);
        assert_eq!(registry.focused_window(), Some(b));
    }

    #[test]
    fn test_focus_without_membership() {
        let registry = WindowRegistry::new();
        let ghost = WindowHandle::new("never added");
        registry.set_focused_window(&ghost);
        assert_eq!(registry.focused_window(), Some(ghost.clone()));
        assert!(registry.snapshot().is_empty());

        // Removing the dangling handle is a membership no-op and leaves
        // the focus as it is.
        registry.remove_window(&ghost);
        assert_eq!(registry.focused_window(), Some(ghost));
    }

    #[test]
    fn test_window_infos_focus_flag() {
        let registry = WindowRegistry::new();
        let a = WindowHandle::new("A");
        let b = WindowHandle::new("B");
        registry.add_window(&a);
        registry.add_window(&b);
        registry.set_focused_window(&b);
        let infos = registry.window_infos();
        assert_eq!(infos.len(), 2);
        assert!(!infos[0].focused);
        assert!(infos[1].focused);
        assert_eq!(infos[1].id, b.id());
        assert_eq!(infos[1].title, "B");
    }

    #[test]
    fn test_clear_empties_registry() {
        let registry = WindowRegistry::new();
        let a = WindowHandle::new("A");
        registry.add_window(&a);
        registry.set_focused_window(&a);
        registry.clear_windows();
        registry.clear_focused_window();
        assert!(registry.is_empty());
        assert_eq!(registry.focused_window(), None);
    }

    #[test]
    fn test_concurrent_add_remove() {
        let registry = Arc::new(WindowRegistry::new());
        let threads = 8;
        let per_thread = 50;

        let mut joins = Vec::new();
        let mut kept: Vec<WindowHandle> = Vec::new();
        for t in 0..threads {
            let mut mine = Vec::new();
            for i in 0..per_thread {
                mine.push(WindowHandle::new(format!("win-{t}-{i}")));
            }
            // Even-indexed handles survive, odd ones are added then removed.
            kept.extend(mine.iter().step_by(2).cloned());
            let registry = Arc::clone(&registry);
            joins.push(thread::spawn(move || {
                for (i, handle) in mine.iter().enumerate() {
                    registry.add_window(handle);
                    registry.add_window(handle);
                    if i % 2 == 1 {
                        registry.remove_window(handle);
                    }
                }
            }));
        }
        for join in joins {
            join.join().unwrap();
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), threads * per_thread / 2);
        let mut seen = std::collections::HashSet::new();
        for handle in &snapshot {
            assert!(seen.insert(handle.id()), "duplicate handle in snapshot");
        }
        for handle in &kept {
            assert!(snapshot.contains(handle));
        }
    }

    #[test]
    fn test_snapshot_during_writes_is_consistent() {
        let registry = Arc::new(WindowRegistry::new());
        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..200 {
                    let h = WindowHandle::new(format!("w{i}"));
                    registry.add_window(&h);
                    if i % 3 == 0 {
                        registry.remove_window(&h);
                    }
                }
            })
        };
        for _ in 0..50 {
            let snapshot = registry.snapshot();
            let mut seen = std::collections::HashSet::new();
            for handle in &snapshot {
                assert!(seen.insert(handle.id()));
            }
        }
        writer.join().unwrap();
    }
}
