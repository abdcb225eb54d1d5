use crate::user::UserView;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Write-through cache of decrypted user views, keyed by reference id.
///
/// Mutations invalidate exactly the affected key; there is no bulk
/// eviction. The cache only ever holds the full view; redaction happens on
/// the way out, per caller.
#[derive(Default)]
pub struct UserCache {
    inner: RwLock<HashMap<Uuid, UserView>>,
}

impl UserCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reference_id: Uuid) -> Option<UserView> {
        self.inner.read().get(&reference_id).cloned()
    }

    pub fn put(&self, view: UserView) {
        self.inner.write().insert(view.reference_id, view);
    }

    pub fn invalidate(&self, reference_id: Uuid) {
        self.inner.write().remove(&reference_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn view(reference_id: Uuid, email: &str) -> UserView {
        UserView {
            reference_id,
            first_name: Some("Priya".to_string()),
            last_name: None,
            email: email.to_string(),
            phone: "919876543210".to_string(),
            dob: None,
            gender: None,
            active: true,
            archived_at: None,
            anonymized: false,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn caches_per_key_and_invalidates_per_key() {
        let cache = UserCache::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        cache.put(view(a, "a@example.com"));
        cache.put(view(b, "b@example.com"));

        assert_eq!(cache.get(a).unwrap().email, "a@example.com");

        cache.invalidate(a);
        assert!(cache.get(a).is_none());
        assert_eq!(cache.get(b).unwrap().email, "b@example.com");
    }
}
