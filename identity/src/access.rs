use uuid::Uuid;

/// Caller roles recognized by the identity service. Role tags arrive on the
/// internal API as a header set by the service mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Support,
    ServiceLookup,
    InternalConsumer,
    Owner,
}

impl Role {
    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "ADMIN" => Some(Role::Admin),
            "SUPPORT" => Some(Role::Support),
            "SERVICE_LOOKUP" => Some(Role::ServiceLookup),
            "INTERNAL_CONSUMER" => Some(Role::InternalConsumer),
            "OWNER" => Some(Role::Owner),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Support => "SUPPORT",
            Role::ServiceLookup => "SERVICE_LOOKUP",
            Role::InternalConsumer => "INTERNAL_CONSUMER",
            Role::Owner => "OWNER",
        }
    }

    /// Static role ordering; a pure function of configuration, evaluated at
    /// startup and never mutated.
    pub fn rank(self) -> u8 {
        match self {
            Role::Admin => 4,
            Role::Support => 3,
            Role::ServiceLookup => 2,
            Role::InternalConsumer => 1,
            Role::Owner => 1,
        }
    }

    pub fn at_least(self, other: Role) -> bool {
        self.rank() >= other.rank()
    }
}

/// The authenticated principal of a request.
#[derive(Debug, Clone)]
pub struct Actor {
    pub role: Role,
    /// Reference id of the acting user, when the caller is an end user.
    pub reference_id: Option<Uuid>,
}

impl Actor {
    pub fn service(role: Role) -> Self {
        Self {
            role,
            reference_id: None,
        }
    }

    pub fn owner(reference_id: Uuid) -> Self {
        Self {
            role: Role::Owner,
            reference_id: Some(reference_id),
        }
    }

    /// Full plaintext is visible to admins and to the record's owner;
    /// everyone else gets the redacted projection.
    pub fn sees_full_pii(&self, subject: Uuid) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Owner => self.reference_id == Some(subject),
            _ => false,
        }
    }

    pub fn label(&self) -> String {
        match &self.reference_id {
            Some(reference_id) => format!("{}:{reference_id}", self.role.as_str()),
            None => self.role.as_str().to_string(),
        }
    }
}

/// Mask everything but the first character of the local part.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        }
        None => "***".to_string(),
    }
}

/// Mask everything but the last four digits.
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return "****".to_string();
    }
    let visible: String = digits[digits.len() - 4..].iter().collect();
    format!("{}{visible}", "*".repeat(digits.len() - 4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_role_tags() {
        assert_eq!(Role::parse("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse("SERVICE_LOOKUP"), Some(Role::ServiceLookup));
        assert_eq!(Role::parse("nope"), None);
    }

    #[test]
    fn admin_and_owner_see_full_pii() {
        let subject = Uuid::new_v4();

        assert!(Actor::service(Role::Admin).sees_full_pii(subject));
        assert!(Actor::owner(subject).sees_full_pii(subject));
        assert!(!Actor::owner(Uuid::new_v4()).sees_full_pii(subject));
        assert!(!Actor::service(Role::Support).sees_full_pii(subject));
        assert!(!Actor::service(Role::ServiceLookup).sees_full_pii(subject));
    }

    #[test]
    fn masks_email_local_part() {
        assert_eq!(mask_email("priya@example.com"), "p***@example.com");
        assert_eq!(mask_email("p@x.io"), "p***@x.io");
        assert_eq!(mask_email("not-an-email"), "***");
    }

    #[test]
    fn masks_phone_except_last_four() {
        assert_eq!(mask_phone("+919876543210"), "********3210");
        assert_eq!(mask_phone("123"), "****");
    }

    #[test]
    fn role_hierarchy_orders_support_above_lookup() {
        assert!(Role::Admin.at_least(Role::Support));
        assert!(Role::Support.at_least(Role::ServiceLookup));
        assert!(!Role::InternalConsumer.at_least(Role::Support));
    }
}
