use std::collections::BTreeSet;
use uuid::Uuid;

use crate::models::rbac::GrantSet;

/// Authenticated staff member for the duration of one request.
///
/// Built from the user's effective grants (direct and role-inherited) and
/// passed explicitly to whatever needs to make an authorization decision.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Uuid,
    pub role_id: Option<Uuid>,
    pub granted: BTreeSet<String>,
}

impl Session {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            role_id: None,
            granted: BTreeSet::new(),
        }
    }

    pub fn from_grants(user_id: Uuid, grants: &GrantSet) -> Self {
        Self {
            user_id,
            role_id: grants.role_id,
            granted: grants.granted(),
        }
    }

    pub fn with_permissions<S: Into<String>>(mut self, perms: impl IntoIterator<Item = S>) -> Self {
        self.granted = perms.into_iter().map(Into::into).collect();
        self
    }

    pub fn holds(&self, code: &str) -> bool {
        self.granted.contains(code)
    }
}
