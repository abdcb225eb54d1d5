use serde::Deserialize;

/// Bus topics per event family, keyed off the event-type prefix.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicMap {
    pub user: String,
    pub consent: String,
    pub gdpr: String,
    pub audit: String,
    pub payment: String,
    pub payout: String,
}

impl Default for TopicMap {
    fn default() -> Self {
        Self {
            user: "user-events".to_string(),
            consent: "consent-events".to_string(),
            gdpr: "gdpr-events".to_string(),
            audit: "audit-events".to_string(),
            payment: "payment-events".to_string(),
            payout: "payout-events".to_string(),
        }
    }
}

impl TopicMap {
    /// `None` means the event type belongs to no known family; the
    /// dispatcher tombstones such rows instead of guessing a topic.
    pub fn route(&self, event_type: &str) -> Option<&str> {
        let family = event_type.split('.').next().unwrap_or_default();
        match family {
            "user" => Some(&self.user),
            "consent" => Some(&self.consent),
            "gdpr" | "data" => Some(&self.gdpr),
            "audit" => Some(&self.audit),
            "payment" => Some(&self.payment),
            "vendor" | "payout" => Some(&self.payout),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_event_families_to_their_topics() {
        let topics = TopicMap::default();

        assert_eq!(topics.route("user.created"), Some("user-events"));
        assert_eq!(topics.route("user.address.added"), Some("user-events"));
        assert_eq!(topics.route("user.role.removed"), Some("user-events"));
        assert_eq!(topics.route("consent.withdrawn"), Some("consent-events"));
        assert_eq!(topics.route("gdpr.data.deleted"), Some("gdpr-events"));
        assert_eq!(topics.route("data.exported"), Some("gdpr-events"));
        assert_eq!(topics.route("audit.recorded"), Some("audit-events"));
        assert_eq!(topics.route("payment.order.created"), Some("payment-events"));
        assert_eq!(topics.route("vendor.payout.initiated"), Some("payout-events"));
        assert_eq!(topics.route("payout.submitted"), Some("payout-events"));
    }

    #[test]
    fn unknown_families_are_unroutable() {
        let topics = TopicMap::default();

        assert_eq!(topics.route("treasure.enrollment.created"), None);
        assert_eq!(topics.route(""), None);
    }
}
