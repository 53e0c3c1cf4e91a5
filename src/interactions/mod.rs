// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Interaction Correlator
 * Out-of-band callback URLs and late interaction delivery
 *
 * The correlator hands out unique OOB URLs, parks the originating events,
 * and when the interaction server reports a hit, re-runs the operator
 * pipeline with the interaction attached and raises the resulting event.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod client;

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::core::cancel::CancelToken;
use crate::dsl::Value;
use crate::operators::{InternalEvent, Operators};
use crate::protocols::InternalWrappedEvent;

pub use client::InteractshClient;

/// One callback observed by the interaction server.
#[derive(Debug, Clone)]
pub struct Interaction {
    /// dns / http / smtp / ldap ...
    pub protocol: String,
    /// The opaque id portion of the callback hostname.
    pub unique_id: String,
    pub full_id: String,
    pub remote_address: String,
    pub raw_request: Option<String>,
    pub timestamp: String,
}

/// Pluggable source of OOB URLs and interactions. The production source
/// is the interactsh client; tests drive a fake.
#[async_trait]
pub trait InteractionSource: Send + Sync {
    /// Allocate a unique callback: (full url, opaque id).
    fn generate(&self) -> (String, String);
    async fn poll(&self) -> anyhow::Result<Vec<Interaction>>;
}

struct PendingEntry {
    template_id: String,
    event: InternalEvent,
    operators: Operators,
    created: Instant,
}

type ResultSink = Box<dyn Fn(InternalWrappedEvent) + Send + Sync>;

/// Tracks pending correlations and re-raises events when interactions
/// arrive. Entries expire after the eviction window; shutdown waits a
/// cooldown to catch trailing callbacks.
pub struct Correlator {
    source: Arc<dyn InteractionSource>,
    pending: Mutex<HashMap<String, PendingEntry>>,
    eviction: Duration,
    cooldown: Duration,
    poll_interval: Duration,
    on_result: ResultSink,
    stop: CancelToken,
}

impl Correlator {
    pub fn new(
        source: Arc<dyn InteractionSource>,
        eviction: Duration,
        cooldown: Duration,
        on_result: ResultSink,
    ) -> Self {
        Self {
            source,
            pending: Mutex::new(HashMap::new()),
            eviction,
            cooldown,
            poll_interval: Duration::from_secs(5),
            on_result,
            stop: CancelToken::new(),
        }
    }

    /// A unique OOB URL per call.
    pub fn url(&self) -> (String, String) {
        self.source.generate()
    }

    /// Park an event until its interaction arrives (or the entry ages
    /// out).
    pub fn add_pending(
        &self,
        id: &str,
        template_id: &str,
        event: InternalEvent,
        operators: Operators,
    ) {
        let mut pending = self.pending.lock().expect("correlator lock poisoned");
        let now = Instant::now();
        pending.retain(|_, entry| now.duration_since(entry.created) < self.eviction);
        pending.insert(
            id.to_lowercase(),
            PendingEntry {
                template_id: template_id.to_string(),
                event,
                operators,
                created: now,
            },
        );
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("correlator lock poisoned").len()
    }

    fn deliver(&self, interaction: &Interaction) {
        let key = interaction.unique_id.to_lowercase();
        let entry = {
            let pending = self.pending.lock().expect("correlator lock poisoned");
            pending.get(&key).map(|entry| {
                (
                    entry.template_id.clone(),
                    entry.event.clone(),
                    entry.operators.clone(),
                )
            })
        };
        let Some((template_id, mut event, operators)) = entry else {
            debug!(id = key.as_str(), "interaction without pending entry");
            return;
        };

        event.insert(
            "interactsh_protocol".into(),
            Value::String(interaction.protocol.clone()),
        );
        event.insert(
            "interactsh_request".into(),
            Value::String(interaction.raw_request.clone().unwrap_or_default()),
        );
        event.insert(
            "interactsh_ip".into(),
            Value::String(interaction.remote_address.clone()),
        );

        let result = operators.execute(&event, "body");
        let positive = result.is_positive(operators.has_extractors());
        if positive {
            debug!(
                template = template_id.as_str(),
                protocol = interaction.protocol.as_str(),
                "interaction correlated to a match"
            );
            (self.on_result)(InternalWrappedEvent {
                template_id,
                event,
                result,
                positive,
            });
        }
    }

    async fn poll_once(&self) {
        match self.source.poll().await {
            Ok(interactions) => {
                for interaction in interactions {
                    self.deliver(&interaction);
                }
            }
            Err(e) => warn!("interaction poll failed: {}", e),
        }
    }

    /// Background polling loop; runs until `close` is called.
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => self.poll_once().await,
                _ = self.stop.canceled() => return,
            }
        }
    }

    /// Shutdown: wait the cooldown for trailing interactions, poll one
    /// last time, then stop the loop.
    pub async fn close(&self) {
        if self.pending_count() > 0 {
            debug!(
                cooldown_secs = self.cooldown.as_secs(),
                "waiting for trailing interactions"
            );
            tokio::time::sleep(self.cooldown).await;
            self.poll_once().await;
        }
        self.stop.cancel();
    }
}

/// Random lowercase alphanumeric id, the interaction-server label
/// alphabet.
pub(crate) fn random_id(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let index = rng.gen_range(0..36u8);
            if index < 10 {
                (b'0' + index) as char
            } else {
                (b'a' + index - 10) as char
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{Matcher, MatcherType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        queue: Mutex<Vec<Interaction>>,
        counter: AtomicUsize,
    }

    #[async_trait]
    impl InteractionSource for FakeSource {
        fn generate(&self) -> (String, String) {
            let id = format!("cb{}", self.counter.fetch_add(1, Ordering::SeqCst));
            (format!("http://{}.oob.test", id), id)
        }

        async fn poll(&self) -> anyhow::Result<Vec<Interaction>> {
            Ok(std::mem::take(&mut *self.queue.lock().unwrap()))
        }
    }

    fn oob_operators() -> Operators {
        let mut matcher = Matcher {
            kind: MatcherType::Word,
            part: Some("interactsh_protocol".into()),
            words: vec!["dns".into()],
            ..Default::default()
        };
        matcher.compile().unwrap();
        Operators {
            matchers: vec![matcher],
            ..Default::default()
        }
    }

    fn interaction(id: &str, protocol: &str) -> Interaction {
        Interaction {
            protocol: protocol.into(),
            unique_id: id.into(),
            full_id: format!("{}.oob.test", id),
            remote_address: "203.0.113.9".into(),
            raw_request: Some("DNS query".into()),
            timestamp: "2026-08-01T00:00:00Z".into(),
        }
    }

    fn correlator(
        source: Arc<FakeSource>,
        eviction: Duration,
    ) -> (Arc<Correlator>, Arc<Mutex<Vec<InternalWrappedEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let correlator = Arc::new(Correlator::new(
            source,
            eviction,
            Duration::from_millis(10),
            Box::new(move |event| sink.lock().unwrap().push(event)),
        ));
        (correlator, seen)
    }

    #[tokio::test]
    async fn test_interaction_delivery() {
        let source = Arc::new(FakeSource {
            queue: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
        });
        let (correlator, seen) = correlator(Arc::clone(&source), Duration::from_secs(60));

        let (url, id) = correlator.url();
        assert!(url.contains(&id));

        let mut event = InternalEvent::new();
        event.insert("host".into(), Value::from("http://victim"));
        correlator.add_pending(&id, "oob-template", event, oob_operators());

        source.queue.lock().unwrap().push(interaction(&id, "dns"));
        correlator.poll_once().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].template_id, "oob-template");
        assert!(seen[0].positive);
        assert_eq!(
            seen[0].event["interactsh_ip"],
            Value::from("203.0.113.9")
        );
    }

    #[tokio::test]
    async fn test_non_matching_protocol_not_raised() {
        let source = Arc::new(FakeSource {
            queue: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
        });
        let (correlator, seen) = correlator(Arc::clone(&source), Duration::from_secs(60));

        let (_, id) = correlator.url();
        correlator.add_pending(&id, "t", InternalEvent::new(), oob_operators());

        // matcher wants dns, interaction is http
        source.queue.lock().unwrap().push(interaction(&id, "http"));
        correlator.poll_once().await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_eviction() {
        let source = Arc::new(FakeSource {
            queue: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
        });
        let (correlator, _) = correlator(Arc::clone(&source), Duration::from_millis(5));

        let (_, id) = correlator.url();
        correlator.add_pending(&id, "t", InternalEvent::new(), oob_operators());
        assert_eq!(correlator.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        // inserting another entry sweeps the expired one
        let (_, id2) = correlator.url();
        correlator.add_pending(&id2, "t", InternalEvent::new(), oob_operators());
        assert_eq!(correlator.pending_count(), 1);
    }

    #[test]
    fn test_random_id_alphabet() {
        let id = random_id(24);
        assert_eq!(id.len(), 24);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
