//! Poll-until-deadline element lookup over the host's element snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use regex::Regex;

use crate::host::{HostContext, UiElement, TOAST_ELEMENT_ID};

pub const DEFAULT_FIND_TIMEOUT_MS: u64 = 3000;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Blocking element queries with a deadline. Each query rescans
/// [`HostContext::elements`] every 50 ms until it matches or the timeout
/// runs out; a zero timeout means a single scan. A finder built with
/// [`with_cancel`](Self::with_cancel) also gives up once its flag is set.
pub struct ElementFinder {
    host: Arc<dyn HostContext>,
    cancel: Option<Arc<AtomicBool>>,
}

impl ElementFinder {
    pub fn new(host: Arc<dyn HostContext>) -> ElementFinder {
        ElementFinder { host, cancel: None }
    }

    /// A finder whose waits end early when `cancel` is raised, on top of
    /// the per-query timeout. An element already on screen is still
    /// reported.
    pub fn with_cancel(host: Arc<dyn HostContext>, cancel: Arc<AtomicBool>) -> ElementFinder {
        ElementFinder {
            host,
            cancel: Some(cancel),
        }
    }

    /// Case-insensitive substring match on element text. `index` selects
    /// among multiple matches in screen order.
    pub fn find_by_text(&self, text: &str, index: usize, timeout: Duration) -> Option<UiElement> {
        let pattern = match Regex::new(&format!("(?i){}", regex::escape(text))) {
            Ok(pattern) => pattern,
            Err(e) => {
                debug!("unusable find pattern {:?}: {}", text, e);
                return None;
            }
        };
        self.poll(timeout, |elements| {
            elements
                .iter()
                .filter(|el| pattern.is_match(&el.text))
                .nth(index)
                .cloned()
        })
    }

    /// Exact match on the host's element id.
    pub fn find_by_id(&self, id: &str, timeout: Duration) -> Option<UiElement> {
        self.poll(timeout, |elements| {
            elements.iter().find(|el| el.id == id).cloned()
        })
    }

    /// Text of the most recent toast, waiting up to `timeout` for one to
    /// appear. `exclude` skips a stale toast still on screen, so a caller
    /// can pass the text it saw last time and only get a fresh one.
    pub fn last_toast(&self, timeout: Duration, exclude: Option<&str>) -> Option<String> {
        self.poll(timeout, |elements| {
            elements
                .iter()
                .rev()
                .find(|el| el.id == TOAST_ELEMENT_ID && exclude != Some(el.text.as_str()))
                .map(|el| el.text.clone())
        })
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn poll<T>(&self, timeout: Duration, pick: impl Fn(&[UiElement]) -> Option<T>) -> Option<T> {
        let start = Instant::now();
        loop {
            if let Some(found) = pick(&self.host.elements()) {
                return Some(found);
            }
            if self.cancelled() {
                debug!("element wait cancelled");
                return None;
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return None;
            }
            thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Point;
    use parking_lot::Mutex;

    struct FixedHost {
        elements: Mutex<Vec<UiElement>>,
    }

    impl FixedHost {
        fn new(elements: Vec<UiElement>) -> Arc<FixedHost> {
            Arc::new(FixedHost {
                elements: Mutex::new(elements),
            })
        }
    }

    impl HostContext for FixedHost {
        fn elements(&self) -> Vec<UiElement> {
            self.elements.lock().clone()
        }
    }

    fn sample() -> Arc<FixedHost> {
        FixedHost::new(vec![
            UiElement::new("title", "Settings", 100, 20),
            UiElement::new("button_ok", "OK", 40, 300),
            UiElement::new("row_wifi", "Wi-Fi settings", 160, 120),
        ])
    }

    #[test]
    fn test_find_by_text_first_match() {
        let finder = ElementFinder::new(sample());
        let el = finder
            .find_by_text("Settings", 0, Duration::ZERO)
            .expect("no match");
        assert_eq!(el.id, "title");
        assert_eq!(el.center, Point { x: 100, y: 20 });
    }

    #[test]
    fn test_find_by_text_is_case_insensitive_substring() {
        let finder = ElementFinder::new(sample());
        let el = finder.find_by_text("settings", 1, Duration::ZERO).unwrap();
        assert_eq!(el.id, "row_wifi");
    }

    #[test]
    fn test_find_by_text_index_out_of_range() {
        let finder = ElementFinder::new(sample());
        assert!(finder.find_by_text("Settings", 5, Duration::ZERO).is_none());
    }

    #[test]
    fn test_literal_match_not_regex() {
        let host = FixedHost::new(vec![UiElement::new("x", "a+b", 1, 1)]);
        let finder = ElementFinder::new(host);
        assert!(finder.find_by_text("a+b", 0, Duration::ZERO).is_some());
        assert!(finder.find_by_text("aab", 0, Duration::ZERO).is_none());
    }

    #[test]
    fn test_find_by_id_is_exact() {
        let finder = ElementFinder::new(sample());
        assert!(finder.find_by_id("button_ok", Duration::ZERO).is_some());
        assert!(finder.find_by_id("button", Duration::ZERO).is_none());
    }

    #[test]
    fn test_times_out_on_absent_element() {
        let finder = ElementFinder::new(sample());
        let before = Instant::now();
        let found = finder.find_by_text("no such text", 0, Duration::from_millis(120));
        assert!(found.is_none());
        assert!(before.elapsed() >= Duration::from_millis(120));
        assert!(before.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_finds_element_appearing_later() {
        let host = FixedHost::new(Vec::new());
        let writer = Arc::clone(&host);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            writer
                .elements
                .lock()
                .push(UiElement::new("late", "Loaded", 5, 5));
        });
        let finder = ElementFinder::new(host);
        let el = finder.find_by_text("Loaded", 0, Duration::from_secs(2));
        assert_eq!(el.expect("element never appeared").id, "late");
    }

    #[test]
    fn test_cancel_ends_wait_before_timeout() {
        let cancel = Arc::new(AtomicBool::new(false));
        let raiser = Arc::clone(&cancel);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            raiser.store(true, Ordering::SeqCst);
        });
        let finder = ElementFinder::with_cancel(FixedHost::new(Vec::new()), cancel);
        let before = Instant::now();
        let found = finder.find_by_text("never there", 0, Duration::from_secs(30));
        assert!(found.is_none());
        assert!(before.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cancelled_finder_still_sees_present_element() {
        let cancel = Arc::new(AtomicBool::new(true));
        let finder = ElementFinder::with_cancel(sample(), cancel);
        assert!(finder
            .find_by_text("Settings", 0, Duration::from_secs(30))
            .is_some());
    }

    #[test]
    fn test_last_toast_picks_newest() {
        let host = FixedHost::new(vec![
            UiElement::new(TOAST_ELEMENT_ID, "saved", 0, 0),
            UiElement::new("other", "noise", 0, 0),
            UiElement::new(TOAST_ELEMENT_ID, "uploaded", 0, 0),
        ]);
        let finder = ElementFinder::new(host);
        assert_eq!(
            finder.last_toast(Duration::ZERO, None),
            Some("uploaded".to_string())
        );
    }

    #[test]
    fn test_last_toast_exclude_skips_stale() {
        let host = FixedHost::new(vec![UiElement::new(TOAST_ELEMENT_ID, "saved", 0, 0)]);
        let finder = ElementFinder::new(host);
        assert_eq!(finder.last_toast(Duration::ZERO, Some("saved")), None);
        assert_eq!(
            finder.last_toast(Duration::ZERO, Some("something else")),
            Some("saved".to_string())
        );
    }

    #[test]
    fn test_no_toast_returns_none() {
        let finder = ElementFinder::new(sample());
        assert_eq!(finder.last_toast(Duration::ZERO, None), None);
    }
}
