//! Permission catalog.
//!
//! Read-only reference data loaded once at startup. Each module owns a set of
//! granular codes plus exactly one wildcard (`PermissionAction::All`) code.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::errors::{AppError, AppResult};
use crate::models::rbac::{
    EffectivePermission, EffectivePermissionView, GrantSet, Permission, PermissionModule,
    PermissionSource, PrincipalKind, PrincipalRef,
};

#[derive(Debug, Clone)]
pub struct PermissionCatalog {
    permissions: Vec<Permission>,
    by_code: HashMap<String, usize>,
    all_by_module: BTreeMap<String, String>,
}

impl PermissionCatalog {
    pub fn from_permissions(mut permissions: Vec<Permission>) -> AppResult<Self> {
        permissions.sort_by(|a, b| {
            a.module
                .cmp(&b.module)
                .then_with(|| b.action.is_all().cmp(&a.action.is_all()))
                .then_with(|| a.action.cmp(&b.action))
                .then_with(|| a.code.cmp(&b.code))
        });

        let mut by_code = HashMap::with_capacity(permissions.len());
        let mut all_by_module = BTreeMap::new();
        let mut modules = HashSet::new();

        for (idx, permission) in permissions.iter().enumerate() {
            if by_code.insert(permission.code.clone(), idx).is_some() {
                return Err(AppError::configuration(format!(
                    "duplicate permission code {}",
                    permission.code
                )));
            }
            modules.insert(permission.module.clone());

            if permission.action.is_all() {
                if let Some(existing) =
                    all_by_module.insert(permission.module.clone(), permission.code.clone())
                {
                    return Err(AppError::configuration(format!(
                        "module {} has two wildcard codes: {} and {}",
                        permission.module, existing, permission.code
                    )));
                }
            }
        }

        if let Some(module) = modules.iter().find(|m| !all_by_module.contains_key(*m)) {
            return Err(AppError::configuration(format!(
                "module {module} has no wildcard code"
            )));
        }

        Ok(Self {
            permissions,
            by_code,
            all_by_module,
        })
    }

    pub fn get(&self, code: &str) -> Option<&Permission> {
        self.by_code.get(code).map(|idx| &self.permissions[*idx])
    }

    pub fn all_code_for(&self, module: &str) -> Option<&str> {
        self.all_by_module.get(module).map(String::as_str)
    }

    pub fn module_codes<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'a Permission> + 'a {
        self.permissions.iter().filter(move |p| p.module == module)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.iter()
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    pub fn modules(&self) -> Vec<PermissionModule> {
        self.all_by_module
            .iter()
            .map(|(module, all_code)| PermissionModule {
                module: module.clone(),
                all_code: all_code.clone(),
                permissions: self.module_codes(module).cloned().collect(),
            })
            .collect()
    }

    /// Whether `code` sits in a module whose wildcard is granted by `grants`.
    /// Wildcard codes are never locked so they can be switched off, and neither
    /// is a code the principal holds itself, so a direct grant left behind when
    /// the user's role gains the wildcard can still be revoked.
    pub fn is_locked(&self, code: &str, grants: &GrantSet) -> bool {
        let Some(permission) = self.get(code) else {
            return false;
        };
        if permission.action.is_all() || grants.assigned.contains(code) {
            return false;
        }
        self.all_code_for(&permission.module)
            .map(|all| grants.is_granted(all))
            .unwrap_or(false)
    }

    pub fn view_for(&self, principal: PrincipalRef, grants: &GrantSet) -> EffectivePermissionView {
        let permissions = self
            .permissions
            .iter()
            .map(|permission| {
                let assigned = grants.assigned.contains(&permission.code);
                let inherited = grants.inherited.contains(&permission.code);
                let source = match (assigned, inherited, principal.kind) {
                    (true, _, PrincipalKind::User) => Some(PermissionSource::Direct),
                    (true, _, PrincipalKind::Role) => Some(PermissionSource::Role),
                    (false, true, _) => Some(PermissionSource::Role),
                    (false, false, _) => None,
                };

                EffectivePermission {
                    code: permission.code.clone(),
                    module: permission.module.clone(),
                    action: permission.action,
                    display_name: permission.display_name.clone(),
                    granted: assigned || inherited,
                    assigned,
                    source,
                    locked: self.is_locked(&permission.code, grants),
                }
            })
            .collect();

        EffectivePermissionView {
            principal,
            role_id: grants.role_id,
            permissions,
        }
    }

    /// Checks a complete selection for one module before it replaces the
    /// principal's assignments there.
    pub fn validate_module_selection(&self, module: &str, codes: &[String]) -> AppResult<()> {
        if !self.all_by_module.contains_key(module) {
            return Err(AppError::not_found(format!("unknown permission module {module}")));
        }

        let mut has_all = false;
        let mut has_granular = false;
        for code in codes {
            let permission = self
                .get(code)
                .ok_or_else(|| AppError::not_found(format!("unknown permission code {code}")))?;
            if permission.module != module {
                return Err(AppError::bad_request(format!(
                    "permission {code} does not belong to module {module}"
                )));
            }
            if permission.action.is_all() {
                has_all = true;
            } else {
                has_granular = true;
            }
        }

        if has_all && has_granular {
            return Err(AppError::bad_request(format!(
                "module {module}: the wildcard code cannot be combined with granular codes"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::rbac::PermissionAction;
    use uuid::Uuid;

    pub(crate) fn perm(code: &str, module: &str, action: PermissionAction) -> Permission {
        Permission {
            code: code.to_string(),
            module: module.to_string(),
            action,
            display_name: code.to_string(),
            description: None,
        }
    }

    pub(crate) fn sample_catalog() -> PermissionCatalog {
        PermissionCatalog::from_permissions(vec![
            perm("MOD_ALL", "MOD", PermissionAction::All),
            perm("MOD_VIEW", "MOD", PermissionAction::View),
            perm("MOD_UPDATE", "MOD", PermissionAction::Update),
            perm("MOD_DELETE", "MOD", PermissionAction::Delete),
            perm("OTHER_ALL", "OTHER", PermissionAction::All),
            perm("OTHER_READ", "OTHER", PermissionAction::Read),
            perm("A_ALL", "A", PermissionAction::All),
            perm("A_VIEW", "A", PermissionAction::View),
            perm("B_ALL", "B", PermissionAction::All),
            perm("B_VIEW", "B", PermissionAction::View),
        ])
        .unwrap()
    }

    #[test]
    fn module_without_wildcard_is_rejected() {
        let err = PermissionCatalog::from_permissions(vec![perm("X_VIEW", "X", PermissionAction::View)])
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn two_wildcards_in_one_module_are_rejected() {
        let err = PermissionCatalog::from_permissions(vec![
            perm("X_ALL", "X", PermissionAction::All),
            perm("X_EVERYTHING", "X", PermissionAction::All),
        ])
        .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn duplicate_codes_are_rejected() {
        let err = PermissionCatalog::from_permissions(vec![
            perm("X_ALL", "X", PermissionAction::All),
            perm("X_ALL", "X", PermissionAction::All),
        ])
        .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn wildcard_is_resolved_from_structured_action() {
        let catalog = PermissionCatalog::from_permissions(vec![
            perm("STOCK_EVERYTHING", "STOCK", PermissionAction::All),
            perm("STOCK_VIEW", "STOCK", PermissionAction::View),
        ])
        .unwrap();
        assert_eq!(catalog.all_code_for("STOCK"), Some("STOCK_EVERYTHING"));
    }

    #[test]
    fn modules_list_wildcard_first() {
        let catalog = sample_catalog();
        let modules = catalog.modules();
        let module = modules.iter().find(|m| m.module == "MOD").unwrap();
        assert_eq!(module.all_code, "MOD_ALL");
        assert_eq!(module.permissions[0].code, "MOD_ALL");
        assert_eq!(module.permissions.len(), 4);
    }

    #[test]
    fn view_marks_sources_and_locks() {
        let catalog = sample_catalog();
        let grants = GrantSet {
            assigned: ["A_VIEW".to_string()].into_iter().collect(),
            inherited: ["MOD_ALL".to_string(), "A_VIEW".to_string()].into_iter().collect(),
            role_id: Some(Uuid::new_v4()),
        };
        let view = catalog.view_for(PrincipalRef::user(Uuid::new_v4()), &grants);

        let a_view = view.entry("A_VIEW").unwrap();
        assert!(a_view.granted && a_view.assigned);
        assert_eq!(a_view.source, Some(PermissionSource::Direct));

        let mod_all = view.entry("MOD_ALL").unwrap();
        assert!(mod_all.granted && !mod_all.assigned);
        assert_eq!(mod_all.source, Some(PermissionSource::Role));
        assert!(!mod_all.locked);

        let mod_view = view.entry("MOD_VIEW").unwrap();
        assert!(!mod_view.granted);
        assert_eq!(mod_view.source, None);
        assert!(mod_view.locked);

        assert!(!view.is_locked("B_VIEW"));
        assert_eq!(view.permissions.len(), catalog.len());
    }

    #[test]
    fn held_granular_code_stays_unlocked_under_inherited_wildcard() {
        let catalog = sample_catalog();
        let grants = GrantSet {
            assigned: ["MOD_VIEW".to_string()].into_iter().collect(),
            inherited: ["MOD_ALL".to_string()].into_iter().collect(),
            role_id: Some(Uuid::new_v4()),
        };

        assert!(!catalog.is_locked("MOD_VIEW", &grants));
        assert!(catalog.is_locked("MOD_UPDATE", &grants));
        assert!(!catalog.is_locked("MOD_ALL", &grants));
    }

    #[test]
    fn selection_mixing_wildcard_and_granular_is_rejected() {
        let catalog = sample_catalog();
        let mixed = vec!["MOD_ALL".to_string(), "MOD_VIEW".to_string()];
        assert!(matches!(
            catalog.validate_module_selection("MOD", &mixed),
            Err(AppError::BadRequest(_))
        ));

        let foreign = vec!["OTHER_READ".to_string()];
        assert!(matches!(
            catalog.validate_module_selection("MOD", &foreign),
            Err(AppError::BadRequest(_))
        ));

        assert!(catalog.validate_module_selection("MOD", &[]).is_ok());
        assert!(catalog
            .validate_module_selection("MOD", &["MOD_VIEW".to_string(), "MOD_DELETE".to_string()])
            .is_ok());
        assert!(matches!(
            catalog.validate_module_selection("NOPE", &[]),
            Err(AppError::NotFound(_))
        ));
    }
}
