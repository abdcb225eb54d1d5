use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use commons::EventEnvelope;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    pub partition: i32,
    pub offset: i64,
}

/// Durable, partition-keyed log the outbox publishes into.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope,
    ) -> Result<PublishAck>;
}

/// Producer against the bus gateway's log-append endpoint.
pub struct HttpLogBus {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct AppendRequest<'a> {
    key: &'a str,
    value: &'a EventEnvelope,
}

#[derive(Deserialize)]
struct AppendResponse {
    partition: i32,
    offset: i64,
}

impl HttpLogBus {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building bus client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MessageBus for HttpLogBus {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope,
    ) -> Result<PublishAck> {
        let url = format!("{}/topics/{topic}/records", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&AppendRequest {
                key,
                value: envelope,
            })
            .send()
            .await
            .with_context(|| format!("publishing to {topic}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("bus returned {status} for topic {topic}");
        }

        let ack: AppendResponse = response
            .json()
            .await
            .with_context(|| format!("reading publish ack from {topic}"))?;
        Ok(PublishAck {
            partition: ack.partition,
            offset: ack.offset,
        })
    }
}

/// In-process bus for tests: an append-only log per topic.
#[derive(Default)]
pub struct InMemoryBus {
    topics: Mutex<HashMap<String, Vec<(String, EventEnvelope)>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self, topic: &str) -> Vec<(String, EventEnvelope)> {
        self.topics.lock().get(topic).cloned().unwrap_or_default()
    }

    pub fn event_types(&self, topic: &str) -> Vec<String> {
        self.records(topic)
            .into_iter()
            .map(|(_, envelope)| envelope.event_type)
            .collect()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope,
    ) -> Result<PublishAck> {
        let mut topics = self.topics.lock();
        let log = topics.entry(topic.to_string()).or_default();
        log.push((key.to_string(), envelope.clone()));
        Ok(PublishAck {
            partition: 0,
            offset: (log.len() - 1) as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(event_type: &str) -> EventEnvelope {
        EventEnvelope::new(
            event_type,
            "INVOICE",
            "R-1001",
            serde_json::json!({}),
            "corr-1",
            None,
        )
    }

    #[tokio::test]
    async fn in_memory_bus_assigns_increasing_offsets() {
        let bus = InMemoryBus::new();

        let first = bus
            .publish("payment-events", "R-1001", &envelope("payment.order.created"))
            .await
            .unwrap();
        let second = bus
            .publish("payment-events", "R-1001", &envelope("payment.succeeded"))
            .await
            .unwrap();

        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);
        assert_eq!(
            bus.event_types("payment-events"),
            vec!["payment.order.created", "payment.succeeded"]
        );
    }

    #[tokio::test]
    async fn http_bus_round_trips_ack() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/topics/payment-events/records")
            .with_status(200)
            .with_body(r#"{"partition":3,"offset":17}"#)
            .create_async()
            .await;

        let bus = HttpLogBus::new(server.url(), Duration::from_secs(2)).unwrap();
        let ack = bus
            .publish("payment-events", "R-1001", &envelope("payment.succeeded"))
            .await
            .unwrap();

        assert_eq!(ack, PublishAck {
            partition: 3,
            offset: 17
        });
    }

    #[tokio::test]
    async fn http_bus_surfaces_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/topics/payment-events/records")
            .with_status(502)
            .create_async()
            .await;

        let bus = HttpLogBus::new(server.url(), Duration::from_secs(2)).unwrap();
        let err = bus
            .publish("payment-events", "R-1001", &envelope("payment.succeeded"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("502"));
    }
}
