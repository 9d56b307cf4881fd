//! Per-consumer extraction binding
//!
//! A consumer (one swatch strip, one detail view) only ever cares about the
//! artwork it currently shows. Starting an extraction for a new source
//! supersedes the previous one: there is no cancellation, the stale result is
//! simply dropped when it settles. Every result that is not dropped is
//! announced exactly once as a [`ColorsExtracted`] event.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use super::extractor::Extraction;

/// "Colors extracted" event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorsExtracted {
    /// Source the palette was extracted from (URL or path)
    pub source: String,
    /// Canonical `rgb(r, g, b)` strings, dominant first
    pub colors: Vec<String>,
    /// Set when the colors are the fallback grays
    pub fallback: bool,
}

/// Claim on the binding taken when a request starts.
///
/// Only the most recently issued ticket can still deliver a result.
#[derive(Debug)]
pub struct Ticket {
    id: u64,
    source: String,
}

impl Ticket {
    pub fn source(&self) -> &str {
        &self.source
    }
}

#[derive(Debug)]
pub struct ExtractionBinding {
    generation: AtomicU64,
    current: Mutex<Option<(u64, String)>>,
    events: mpsc::UnboundedSender<ColorsExtracted>,
}

impl ExtractionBinding {
    /// Create a binding and the receiving end of its event stream
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ColorsExtracted>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let binding = Self {
            generation: AtomicU64::new(0),
            current: Mutex::new(None),
            events,
        };
        (binding, receiver)
    }

    fn current(&self) -> MutexGuard<'_, Option<(u64, String)>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Source of the most recently started extraction
    pub fn current_source(&self) -> Option<String> {
        self.current().as_ref().map(|(_, source)| source.clone())
    }

    /// Make `source` the current request, superseding every earlier ticket
    pub fn begin(&self, source: impl Into<String>) -> Ticket {
        let source = source.into();
        let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.current() = Some((id, source.clone()));
        Ticket { id, source }
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.current().as_ref().is_some_and(|(current, _)| *current == ticket.id)
    }

    /// Rename the source of a ticket once it is known (a subject resolves to
    /// its artwork URL). A superseded ticket does not touch the current source.
    pub fn retarget(&self, ticket: &mut Ticket, source: impl Into<String>) {
        ticket.source = source.into();
        let mut current = self.current();
        if let Some((id, current_source)) = current.as_mut() {
            if *id == ticket.id {
                *current_source = ticket.source.clone();
            }
        }
    }

    /// Deliver the result for `ticket`.
    ///
    /// # Returns
    /// * `Some(event)` if the ticket is still current (the event has also
    ///   been sent on the channel)
    /// * `None` if a newer request began in the meantime
    pub fn finish(&self, ticket: Ticket, extraction: Extraction) -> Option<ColorsExtracted> {
        if !self.is_current(&ticket) {
            debug!("Discarding superseded extraction for {}", ticket.source);
            return None;
        }

        let event = ColorsExtracted {
            source: ticket.source,
            fallback: extraction.is_fallback(),
            colors: extraction.into_palette().to_strings(),
        };
        // Nobody listening is fine; the caller still gets the event back
        let _ = self.events.send(event.clone());
        Some(event)
    }

    /// Run `extraction` for `source`, superseding any extraction in flight
    pub async fn run<F>(&self, source: impl Into<String>, extraction: F) -> Option<ColorsExtracted>
    where
        F: Future<Output = Extraction>,
    {
        let ticket = self.begin(source);
        let extraction = extraction.await;
        self.finish(ticket, extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;
    use crate::palette::extractor::{Extraction, Palette};
    use tokio::sync::oneshot;

    fn extracted(color: Rgb) -> Extraction {
        Extraction::Extracted(Palette::new(vec![color; 3]))
    }

    #[tokio::test]
    async fn test_single_extraction_emits_once() {
        let (binding, mut events) = ExtractionBinding::new();
        let event = binding
            .run("a.png", async { extracted(Rgb::new(1, 2, 3)) })
            .await
            .unwrap();

        assert_eq!(event.colors, vec!["rgb(1, 2, 3)"; 3]);
        assert!(!event.fallback);
        assert_eq!(events.recv().await, Some(event));
        assert!(events.try_recv().is_err());
        assert_eq!(binding.current_source().as_deref(), Some("a.png"));
    }

    #[tokio::test]
    async fn test_stale_result_is_discarded() {
        let (binding, mut events) = ExtractionBinding::new();
        let (release, released) = oneshot::channel::<()>();

        let slow = binding.run("old.png", async move {
            let _ = released.await;
            extracted(Rgb::new(9, 9, 9))
        });
        let fast = binding.run("new.png", async { extracted(Rgb::new(200, 0, 0)) });
        let unblock = async move {
            let _ = release.send(());
        };

        let (slow, fast, ()) = tokio::join!(slow, fast, unblock);

        assert!(slow.is_none());
        let fast = fast.unwrap();
        assert_eq!(fast.source, "new.png");

        assert_eq!(events.recv().await, Some(fast));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fallback_is_announced() {
        let (binding, mut events) = ExtractionBinding::new();
        binding
            .run("broken.png", async {
                Extraction::Fallback {
                    palette: Palette::fallback(3),
                    reason: crate::palette::FallbackReason::Load("404".to_string()),
                }
            })
            .await;

        let event = events.recv().await.unwrap();
        assert!(event.fallback);
        assert_eq!(event.colors[1], "rgb(200, 200, 200)");
    }

    #[test]
    fn test_ticket_taken_early_wins_over_late_start() {
        let (binding, mut events) = ExtractionBinding::new();

        let mut old = binding.begin("subject:old");
        let new = binding.begin("subject:new");

        // The older request resolves its source later; it must not become current again
        binding.retarget(&mut old, "old.png");
        assert_eq!(binding.current_source().as_deref(), Some("subject:new"));
        assert!(!binding.is_current(&old));

        assert!(binding.finish(old, extracted(Rgb::new(9, 9, 9))).is_none());
        let event = binding.finish(new, extracted(Rgb::new(200, 0, 0))).unwrap();
        assert_eq!(event.source, "subject:new");

        assert_eq!(events.try_recv().unwrap(), event);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_retarget_updates_current_source() {
        let (binding, _events) = ExtractionBinding::new();
        let mut ticket = binding.begin("subject:charizard");
        binding.retarget(&mut ticket, "https://example.test/6.png");

        assert_eq!(ticket.source(), "https://example.test/6.png");
        assert_eq!(binding.current_source().as_deref(), Some("https://example.test/6.png"));
    }
}
