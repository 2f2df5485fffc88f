//! Mention tracking
//!
//! Feeds every edit/caret move of an input through the detector and tells
//! subscribers when the active mention changes.
//! - `MentionTracker::update` notifies each subscriber once per change
//! - `Subscription` deregisters its handler when dropped

use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::trace;

use crate::config::CaretPolicy;
use crate::error::Result;
use crate::mentions::{detect_mention_state, try_detect_mention_state, MentionState};

/// Change of the active mention.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MentionEvent {
    /// A new `@` became active (also emitted when jumping to another `@`)
    Started(MentionState),
    /// Same `@`, different query or caret
    Updated(MentionState),
    /// No mention under the caret anymore
    Ended,
}

type Handler = Arc<dyn Fn(&MentionEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(u64, Handler)>,
}

/// Handle returned by `MentionTracker::subscribe`.
#[must_use = "dropping the subscription unsubscribes the handler"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.handlers.retain(|(id, _)| *id != self.id);
            trace!(id = self.id, "mention handler unsubscribed");
        }
    }
}

/// Shareable across threads. Transitions are delivered one at a time, in the
/// order they are applied to `current`, so a handler must not call `update`
/// or `reset` on the tracker that invoked it.
pub struct MentionTracker {
    policy: CaretPolicy,
    /// Held from computing a transition until its handlers return
    dispatch: Mutex<()>,
    current: Mutex<Option<MentionState>>,
    registry: Arc<Mutex<Registry>>,
}

impl MentionTracker {
    pub fn new(policy: CaretPolicy) -> Self {
        Self {
            policy,
            dispatch: Mutex::new(()),
            current: Mutex::new(None),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&MentionEvent) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.push((id, handler));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .len()
    }

    /// Active mention as of the last update
    pub fn current(&self) -> Option<MentionState> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run the detector on the new text/caret.
    ///
    /// With `CaretPolicy::Strict` an out-of-range caret fails and leaves the
    /// current state untouched.
    pub fn update(&self, text: &str, caret: Option<usize>) -> Result<Option<MentionState>> {
        let next = match self.policy {
            CaretPolicy::Clamp => detect_mention_state(text, caret),
            CaretPolicy::Strict => try_detect_mention_state(text, caret)?,
        };
        self.transition(next.clone());
        Ok(next)
    }

    /// Forget the active mention (e.g. input cleared or submitted).
    pub fn reset(&self) {
        self.transition(None);
    }

    fn transition(&self, next: Option<MentionState>) {
        let _dispatch = self.dispatch.lock().unwrap_or_else(PoisonError::into_inner);
        let event = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            let event = match (current.as_ref(), next.as_ref()) {
                (prev, same) if prev == same => None,
                (None, Some(s)) => Some(MentionEvent::Started(s.clone())),
                (Some(prev), Some(s)) if prev.start != s.start => {
                    Some(MentionEvent::Started(s.clone()))
                }
                (Some(_), Some(s)) => Some(MentionEvent::Updated(s.clone())),
                (Some(_), None) => Some(MentionEvent::Ended),
                (None, None) => None,
            };
            *current = next;
            event
        };

        let Some(event) = event else {
            return;
        };

        // Registry lock is released before calling handlers so they may unsubscribe.
        let handlers: Vec<Handler> = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        trace!(?event, subscribers = handlers.len(), "mention event");
        for handler in handlers {
            handler(&event);
        }
    }
}

impl Default for MentionTracker {
    fn default() -> Self {
        Self::new(CaretPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MentionError;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn recording(tracker: &MentionTracker) -> (Subscription, Arc<Mutex<Vec<MentionEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = tracker.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
        (sub, seen)
    }

    fn state(start: usize, end: usize, query: &str) -> MentionState {
        MentionState {
            start,
            end,
            query: query.to_string(),
        }
    }

    #[test]
    fn test_typing_a_mention_emits_each_change_once() {
        let tracker = MentionTracker::default();
        let (_sub, seen) = recording(&tracker);

        tracker.update("oi ", None).unwrap();
        tracker.update("oi @", None).unwrap();
        tracker.update("oi @g", None).unwrap();
        // caret move without change
        tracker.update("oi @g", Some(5)).unwrap();
        tracker.update("oi @g ", None).unwrap();
        tracker.update("oi @g  ", None).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                MentionEvent::Started(state(3, 4, "")),
                MentionEvent::Updated(state(3, 5, "g")),
                MentionEvent::Ended,
            ]
        );
        assert_eq!(tracker.current(), None);
    }

    #[test]
    fn test_jumping_to_another_mention_starts_again() {
        let tracker = MentionTracker::default();
        let (_sub, seen) = recording(&tracker);

        tracker.update("@ana e @bia", Some(4)).unwrap();
        tracker.update("@ana e @bia", None).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                MentionEvent::Started(state(0, 4, "ana")),
                MentionEvent::Started(state(7, 11, "bia")),
            ]
        );
    }

    #[test]
    fn test_concurrent_updates_are_delivered_in_order() {
        let tracker = Arc::new(MentionTracker::default());
        let (entered_tx, entered_rx) = mpsc::channel();
        let entered_tx = Mutex::new(entered_tx);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = tracker.subscribe(move |e| {
            if matches!(e, MentionEvent::Started(_)) {
                let _ = entered_tx.lock().unwrap().send(());
                // slow subscriber
                thread::sleep(Duration::from_millis(100));
            }
            sink.lock().unwrap().push(e.clone());
        });

        let typing = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                tracker.update("@a", None).unwrap();
            })
        };

        // first handler is running, the second update must wait for it
        entered_rx.recv().unwrap();
        tracker.update("x", None).unwrap();
        typing.join().unwrap();

        assert_eq!(tracker.current(), None);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![MentionEvent::Started(state(0, 2, "a")), MentionEvent::Ended]
        );
    }

    #[test]
    fn test_handler_may_unsubscribe_others() {
        let tracker = MentionTracker::default();
        let (victim, victim_seen) = recording(&tracker);
        let victim = Mutex::new(Some(victim));
        let _killer = tracker.subscribe(move |_| {
            victim.lock().unwrap().take();
        });

        tracker.update("@a", None).unwrap();
        assert_eq!(tracker.subscriber_count(), 1);
        tracker.update("@ab", None).unwrap();
        // snapshot of the first dispatch still included the victim
        assert_eq!(victim_seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let tracker = MentionTracker::default();
        let (sub, seen) = recording(&tracker);
        let (_other, other_seen) = recording(&tracker);
        assert_eq!(tracker.subscriber_count(), 2);

        drop(sub);
        assert_eq!(tracker.subscriber_count(), 1);

        tracker.update("@x", None).unwrap();
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(other_seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_explicit_unsubscribe() {
        let tracker = MentionTracker::default();
        let (sub, _seen) = recording(&tracker);
        sub.unsubscribe();
        assert_eq!(tracker.subscriber_count(), 0);
    }

    #[test]
    fn test_subscription_outliving_tracker() {
        let tracker = MentionTracker::default();
        let (sub, _seen) = recording(&tracker);
        drop(tracker);
        drop(sub);
    }

    #[test]
    fn test_reset_ends_active_mention() {
        let tracker = MentionTracker::default();
        let (_sub, seen) = recording(&tracker);
        tracker.update("@jo", None).unwrap();
        tracker.reset();
        tracker.reset();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![MentionEvent::Started(state(0, 3, "jo")), MentionEvent::Ended]
        );
    }

    #[test]
    fn test_strict_policy_rejects_and_keeps_state() {
        let tracker = MentionTracker::new(CaretPolicy::Strict);
        tracker.update("@jo", None).unwrap();
        let err = tracker.update("@jo", Some(10)).unwrap_err();
        assert_eq!(err, MentionError::CaretOutOfRange { caret: 10, len: 3 });
        assert_eq!(tracker.current(), Some(state(0, 3, "jo")));
    }

    #[test]
    fn test_clamp_policy_accepts_large_caret() {
        let tracker = MentionTracker::new(CaretPolicy::Clamp);
        assert_eq!(tracker.update("@jo", Some(10)).unwrap(), Some(state(0, 3, "jo")));
    }
}
