use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

pub const ENROLLMENT_CREATED: &str = "treasure.enrollment.created";

pub const PAYMENT_ORDER_CREATED: &str = "payment.order.created";
pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";
pub const PAYMENT_FAILED: &str = "payment.failed";
pub const PAYMENT_LINK_CREATED: &str = "payment.link.created";
pub const PAYMENT_LINK_CANCELLED: &str = "payment.link.cancelled";
pub const PAYMENT_LINK_STATUS_CHANGED: &str = "payment.link.status.changed";

pub const PAYOUT_INITIATED: &str = "vendor.payout.initiated";
pub const PAYOUT_SUCCEEDED: &str = "vendor.payout.succeeded";
pub const PAYOUT_FAILED: &str = "vendor.payout.failed";

pub const USER_CREATED: &str = "user.created";
pub const USER_UPDATED: &str = "user.updated";
pub const USER_DELETED: &str = "user.deleted";
pub const USER_ARCHIVED: &str = "user.archived";
pub const USER_REACTIVATED: &str = "user.reactivated";
pub const USER_ROLE_ASSIGNED: &str = "user.role.assigned";
pub const USER_ROLE_REMOVED: &str = "user.role.removed";
pub const ADDRESS_ADDED: &str = "user.address.added";
pub const ADDRESS_UPDATED: &str = "user.address.updated";
pub const ADDRESS_DELETED: &str = "user.address.deleted";

pub const CONSENT_GRANTED: &str = "consent.granted";
pub const CONSENT_WITHDRAWN: &str = "consent.withdrawn";

pub const GDPR_DATA_DELETED: &str = "gdpr.data.deleted";
pub const GDPR_DATA_EXPORTED: &str = "gdpr.data.exported";

/// Canonical envelope for every event crossing the outbox into the bus.
///
/// Consumers deduplicate on `event_id`; `correlation_id` survives the whole
/// chain from the inbound trigger, `causation_id` points at the direct
/// predecessor event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_data: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
}

impl EventEnvelope {
    pub fn new(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_data: serde_json::Value,
        correlation_id: impl Into<String>,
        causation_id: Option<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_data,
            timestamp: OffsetDateTime::now_utc(),
            correlation_id: correlation_id.into(),
            causation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn envelope_serializes_to_canonical_shape() {
        let envelope = EventEnvelope {
            event_id: Uuid::nil(),
            event_type: PAYMENT_SUCCEEDED.to_string(),
            aggregate_type: "INVOICE".to_string(),
            aggregate_id: "R-1001".to_string(),
            event_data: serde_json::json!({ "paymentId": "pay_1" }),
            timestamp: datetime!(2024-05-01 12:00:00 UTC),
            correlation_id: "corr-1".to_string(),
            causation_id: None,
        };

        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["eventType"], "payment.succeeded");
        assert_eq!(json["aggregateType"], "INVOICE");
        assert_eq!(json["aggregateId"], "R-1001");
        assert_eq!(json["timestamp"], "2024-05-01T12:00:00Z");
        assert!(json.get("causationId").is_none());
    }

    #[test]
    fn envelope_round_trips() {
        let envelope = EventEnvelope::new(
            PAYOUT_INITIATED,
            "PAYOUT",
            "42",
            serde_json::json!({ "net": "360.00" }),
            "corr-2",
            Some("cause-1".to_string()),
        );

        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, envelope);
    }
}
