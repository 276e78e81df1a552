//! Events emitted by the result engine

use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Instant;

use crate::vision::{RecognitionMethod, RouletteColor, RouletteNumber};

/// One validated, de-duplicated spin outcome
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEvent {
    pub number: RouletteNumber,
    pub color: RouletteColor,
    pub confidence: f32,
    /// Strategy that produced the number
    pub method: RecognitionMethod,
    /// 1 for the first spin of an engine run, strictly increasing
    pub spin_sequence: u64,
    /// Frame the result was read from, if the source tracks indices
    pub frame_index: Option<u64>,
    pub detected_at: Instant,
}

impl ResultEvent {
    pub fn is_zero(&self) -> bool {
        self.number.is_zero()
    }
}

/// Callback type for result events
pub type ResultCallback = Box<dyn Fn(ResultEvent) + Send + Sync>;

/// Fans events out to callbacks and channel subscribers
pub struct EventHandler {
    callbacks: Vec<ResultCallback>,
    subscribers: Vec<Sender<ResultEvent>>,
}

impl EventHandler {
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Add a callback, invoked inline on the engine thread
    pub fn on_result(&mut self, callback: ResultCallback) {
        self.callbacks.push(callback);
    }

    /// Open a channel that receives every subsequent event
    pub fn subscribe(&mut self) -> Receiver<ResultEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver an event to every listener. Subscribers whose receiver was
    /// dropped are removed.
    pub fn emit(&mut self, event: ResultEvent) {
        for callback in &self.callbacks {
            callback(event.clone());
        }
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn has_listeners(&self) -> bool {
        !self.callbacks.is_empty() || !self.subscribers.is_empty()
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn event(value: u8, spin: u64) -> ResultEvent {
        let number = RouletteNumber::new(value).unwrap();
        ResultEvent {
            number,
            color: number.color(),
            confidence: 0.95,
            method: RecognitionMethod::Template,
            spin_sequence: spin,
            frame_index: None,
            detected_at: Instant::now(),
        }
    }

    #[test]
    fn test_callbacks_and_subscribers() {
        let mut handler = EventHandler::new();
        assert!(!handler.has_listeners());

        let seen = Arc::new(AtomicU64::new(0));
        let seen_cb = seen.clone();
        handler.on_result(Box::new(move |e| {
            seen_cb.fetch_add(e.spin_sequence, Ordering::SeqCst);
        }));
        let rx = handler.subscribe();

        handler.emit(event(17, 1));
        handler.emit(event(0, 2));

        assert_eq!(seen.load(Ordering::SeqCst), 3);
        let received: Vec<u8> = rx.try_iter().map(|e| e.number.value()).collect();
        assert_eq!(received, vec![17, 0]);
    }

    #[test]
    fn test_dropped_subscriber_pruned() {
        let mut handler = EventHandler::new();
        let rx = handler.subscribe();
        drop(rx);
        handler.emit(event(5, 1));
        assert!(!handler.has_listeners());
    }

    #[test]
    fn test_zero_event() {
        assert!(event(0, 1).is_zero());
        assert_eq!(event(0, 1).color, RouletteColor::Green);
    }
}
