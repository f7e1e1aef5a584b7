use std::sync::Arc;

use async_trait::async_trait;

use super::catalog::PermissionCatalog;
use super::session::Session;

/// Policy evaluator trait for pluggable authorization logic
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Check if the session may use the given permission code
    async fn can(&self, session: &Session, permission: &str) -> bool;
}

/// Default policy evaluator over the permission catalog
///
/// Evaluation order:
/// 1. exact code held -> allow
/// 2. wildcard code of the same module held -> allow
/// 3. deny
#[derive(Debug, Clone)]
pub struct DefaultPolicyEvaluator {
    catalog: Arc<PermissionCatalog>,
}

impl DefaultPolicyEvaluator {
    pub fn new(catalog: Arc<PermissionCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl PolicyEvaluator for DefaultPolicyEvaluator {
    async fn can(&self, session: &Session, permission: &str) -> bool {
        // 1. Exact grant
        if session.holds(permission) {
            tracing::debug!(
                user_id = %session.user_id,
                permission = %permission,
                "direct permission match"
            );
            return true;
        }

        // 2. Module wildcard
        let wildcard = self
            .catalog
            .get(permission)
            .and_then(|p| self.catalog.all_code_for(&p.module));
        if let Some(all_code) = wildcard {
            if session.holds(all_code) {
                tracing::debug!(
                    user_id = %session.user_id,
                    permission = %permission,
                    wildcard = %all_code,
                    "module wildcard match"
                );
                return true;
            }
        }

        // 3. Deny
        tracing::debug!(
            user_id = %session.user_id,
            permission = %permission,
            "permission denied"
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::catalog::tests::sample_catalog;
    use uuid::Uuid;

    fn evaluator() -> DefaultPolicyEvaluator {
        DefaultPolicyEvaluator::new(Arc::new(sample_catalog()))
    }

    #[tokio::test]
    async fn test_exact_permission_allows() {
        let session = Session::new(Uuid::new_v4()).with_permissions(["MOD_VIEW"]);

        assert!(evaluator().can(&session, "MOD_VIEW").await);
        assert!(!evaluator().can(&session, "MOD_UPDATE").await);
    }

    #[tokio::test]
    async fn test_wildcard_covers_module() {
        let session = Session::new(Uuid::new_v4()).with_permissions(["MOD_ALL"]);

        assert!(evaluator().can(&session, "MOD_VIEW").await);
        assert!(evaluator().can(&session, "MOD_DELETE").await);
        assert!(!evaluator().can(&session, "OTHER_READ").await);
    }

    #[tokio::test]
    async fn test_unknown_code_only_matches_exactly() {
        let session = Session::new(Uuid::new_v4()).with_permissions(["MOD_ALL"]);

        assert!(!evaluator().can(&session, "GHOST_VIEW").await);
    }

    #[tokio::test]
    async fn test_denial_when_no_permission() {
        let session = Session::new(Uuid::new_v4());

        assert!(!evaluator().can(&session, "MOD_VIEW").await);
    }
}
