//! SSE stream per listing: bridges the synchronous event bus into a
//! per-connection channel. Dropping the stream (client cancel) drops
//! the bus subscription and the keep-alive timer with it.

use crate::node::SaltdigNode;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use saltdig_common::Subscription;
use saltdig_types::{market_topic, ListingId, MarketEvent};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

/// `GET /api/v1/market/:listing_id/events`
pub async fn market_events(
    State(node): State<Arc<SaltdigNode>>,
    Path(listing_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let listing_id = ListingId::from_string(listing_id);
    let topic = market_topic(&listing_id);

    let (tx, rx) = mpsc::unbounded_channel::<MarketEvent>();
    let subscription = node.bus.subscribe(topic.clone(), move |event| {
        // Slow consumers only queue; the emitter never blocks.
        let _ = tx.send(event.clone());
    });

    debug!(topic = %topic, "SSE subscriber connected");

    let connected = stream::once(async {
        Ok(Event::default().event("connected").data("{}"))
    });
    let events = SubscribedStream {
        inner: UnboundedReceiverStream::new(rx),
        _subscription: subscription,
    }
    .map(|event| {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event(event.event_type()).data(payload))
    });

    Sse::new(connected.chain(events)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    )
}

/// Channel stream that owns its bus subscription, so unsubscription
/// rides the connection's drop path.
struct SubscribedStream {
    inner: UnboundedReceiverStream<MarketEvent>,
    _subscription: Subscription,
}

impl Stream for SubscribedStream {
    type Item = MarketEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeConfig, Secrets};
    use chrono::Utc;

    fn test_node() -> Arc<SaltdigNode> {
        SaltdigNode::build(
            NodeConfig::load(None).unwrap(),
            Secrets {
                platform_wallet_key: None,
                hosted_encryption_key: None,
                cron_secret: None,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn bus_events_reach_the_channel() {
        let node = test_node();
        let listing_id = ListingId::from_string("listing_sse");
        let topic = market_topic(&listing_id);

        let (tx, mut rx) = mpsc::unbounded_channel::<MarketEvent>();
        let _subscription = node.bus.subscribe(topic.clone(), move |event| {
            let _ = tx.send(event.clone());
        });

        node.bus.emit(
            &topic,
            MarketEvent::Offer {
                offer_id: "offer_1".into(),
                agent_id: "agent_1".into(),
                price: "10".into(),
                timestamp: Utc::now(),
            },
        );

        let received = rx.recv().await.expect("event should arrive");
        assert_eq!(received.event_type(), "offer");
    }

    #[tokio::test]
    async fn dropping_the_stream_unsubscribes() {
        let node = test_node();
        let topic = market_topic(&ListingId::from_string("listing_drop"));

        let (tx, rx) = mpsc::unbounded_channel::<MarketEvent>();
        let subscription = node.bus.subscribe(topic.clone(), move |event| {
            let _ = tx.send(event.clone());
        });
        let stream = SubscribedStream {
            inner: UnboundedReceiverStream::new(rx),
            _subscription: subscription,
        };
        assert_eq!(node.bus.listener_count(&topic), 1);

        drop(stream);
        assert_eq!(node.bus.listener_count(&topic), 0);
    }
}
