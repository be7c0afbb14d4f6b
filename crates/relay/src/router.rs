//! Fan-out router: upstream item → interested clients.
//!
//! Matching is a plain case-insensitive substring test of every globally
//! tracked keyword against the item text. It is deliberately not word-aware;
//! "art" matches "smart".

use crate::client::Transport;
use crate::keyword::Keyword;
use crate::protocol::Tweet;
use crate::registry::SubscriptionRegistry;
use metrics::counter;
use tracing::{debug, warn};

/// Tracked keywords occurring in `text`, in the order they are yielded.
pub fn match_keywords<'a, I>(text: &str, tracked: I) -> Vec<Keyword>
where
    I: IntoIterator<Item = &'a Keyword>,
{
    let lowered = text.to_lowercase();
    tracked
        .into_iter()
        .filter(|keyword| keyword.occurs_in(&lowered))
        .cloned()
        .collect()
}

/// Outcome of delivering one item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Clients the item was addressed to.
    pub recipients: usize,
    /// Sends that were queued successfully.
    pub delivered: usize,
    /// Sends that failed.
    pub failed: usize,
}

/// Routes upstream items to the clients tracking a matching keyword.
#[derive(Debug, Default)]
pub struct FanoutRouter;

impl FanoutRouter {
    pub fn new() -> Self {
        Self
    }

    /// Match an item against the global keyword set and deliver it.
    pub fn route(
        &self,
        tweet: &Tweet,
        registry: &SubscriptionRegistry,
        transport: &dyn Transport,
    ) -> DeliveryReport {
        counter!("relay_items_received_total").increment(1);

        let matched = match_keywords(tweet.text(), registry.global_keywords());
        if matched.is_empty() {
            debug!("Item matches no tracked keyword");
            return DeliveryReport::default();
        }
        self.deliver(tweet, &matched, registry, transport)
    }

    /// Send `tweet`, annotated with `matched`, to every client tracking at
    /// least one of the matched keywords.
    ///
    /// A failed send is logged and does not affect the other recipients.
    pub fn deliver(
        &self,
        tweet: &Tweet,
        matched: &[Keyword],
        registry: &SubscriptionRegistry,
        transport: &dyn Transport,
    ) -> DeliveryReport {
        let recipients = registry.matching_users(matched);
        if recipients.is_empty() {
            debug!("No clients for keywords {:?}", matched);
            return DeliveryReport::default();
        }

        // Serialize once for all recipients.
        let payload = match tweet.to_delivery_json(matched) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize item: {}", e);
                return DeliveryReport::default();
            }
        };

        let mut report = DeliveryReport {
            recipients: recipients.len(),
            ..Default::default()
        };
        for client in &recipients {
            match transport.send(client, &payload) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Failed to deliver item to client {}: {}", client, e);
                    counter!("relay_delivery_errors_total").increment(1);
                    report.failed += 1;
                }
            }
        }

        counter!("relay_items_delivered_total").increment(report.delivered as u64);
        debug!(
            "Routed item with keywords {:?} to {}/{} clients",
            matched, report.delivered, report.recipients
        );
        report
    }
}
