/*!
 * # Role-Based Access Control (RBAC) Module
 *
 * Static role table for the helpdesk. Roles are carried in the token; the
 * permissions behind them are resolved here.
 */

use crate::auth::permissions::{consts, permission_implies};
use lazy_static::lazy_static;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// Role definition with associated permissions
#[derive(Debug, Clone)]
pub struct Role {
    pub name: &'static str,
    pub description: &'static str,
    pub permissions: Vec<&'static str>,
}

lazy_static! {
    pub static ref ROLES: HashMap<&'static str, Role> = {
        let mut roles = HashMap::new();

        roles.insert(
            "admin",
            Role {
                name: "admin",
                description: "Administrator with full access",
                permissions: vec!["*"],
            },
        );

        roles.insert(
            "helpdesk",
            Role {
                name: "helpdesk",
                description: "Helpdesk agent running device assignments",
                permissions: vec![
                    consts::DEVICES_READ,
                    consts::DEVICES_CREATE,
                    consts::ASSIGNMENTS_READ,
                    consts::ASSIGNMENTS_CREATE,
                    consts::ASSIGNMENTS_SHIP,
                    consts::ASSIGNMENTS_RETURN,
                    consts::ASSIGNMENTS_CLOSE,
                ],
            },
        );

        roles.insert(
            "viewer",
            Role {
                name: "viewer",
                description: "Read-only access to devices and assignments",
                permissions: vec![consts::DEVICES_READ, consts::ASSIGNMENTS_READ],
            },
        );

        roles
    };
}

/// RBAC service for resolving roles into permissions
#[derive(Debug, Clone, Default)]
pub struct RbacService;

impl RbacService {
    pub fn new() -> Self {
        Self
    }

    /// Get a role by name
    pub fn get_role(&self, role_name: &str) -> Option<&'static Role> {
        ROLES.get(role_name)
    }

    /// Union of the explicit grants and everything the roles carry.
    pub fn effective_permissions(
        &self,
        roles: &[String],
        explicit: &[String],
    ) -> BTreeSet<String> {
        let mut permissions: BTreeSet<String> = explicit.iter().cloned().collect();

        for role_name in roles {
            match ROLES.get(role_name.as_str()) {
                Some(role) => {
                    permissions.extend(role.permissions.iter().map(|p| p.to_string()));
                }
                None => warn!(role = %role_name, "Unknown role in token"),
            }
        }

        permissions
    }

    /// Check whether any of `granted` covers `required`.
    pub fn is_allowed<'a>(
        &self,
        granted: impl IntoIterator<Item = &'a String>,
        required: &str,
    ) -> bool {
        granted
            .into_iter()
            .any(|perm| permission_implies(perm, required))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn viewer_cannot_mutate() {
        let rbac = RbacService::new();
        let perms = rbac.effective_permissions(&strings(&["viewer"]), &[]);
        assert!(rbac.is_allowed(&perms, consts::ASSIGNMENTS_READ));
        assert!(!rbac.is_allowed(&perms, consts::ASSIGNMENTS_CLOSE));
        assert!(!rbac.is_allowed(&perms, consts::DEVICES_CREATE));
    }

    #[test]
    fn helpdesk_runs_the_lifecycle() {
        let rbac = RbacService::new();
        let perms = rbac.effective_permissions(&strings(&["helpdesk"]), &[]);
        for required in [
            consts::ASSIGNMENTS_CREATE,
            consts::ASSIGNMENTS_SHIP,
            consts::ASSIGNMENTS_RETURN,
            consts::ASSIGNMENTS_CLOSE,
            consts::DEVICES_CREATE,
        ] {
            assert!(rbac.is_allowed(&perms, required), "{required}");
        }
    }

    #[test]
    fn admin_has_everything() {
        let rbac = RbacService::new();
        let perms = rbac.effective_permissions(&strings(&["admin"]), &[]);
        assert!(rbac.is_allowed(&perms, "anything:at-all"));
    }

    #[test]
    fn explicit_grants_extend_roles() {
        let rbac = RbacService::new();
        let perms =
            rbac.effective_permissions(&strings(&["viewer", "ghost"]), &strings(&["assignments:*"]));
        assert!(rbac.is_allowed(&perms, consts::ASSIGNMENTS_CLOSE));
        assert!(!rbac.is_allowed(&perms, consts::DEVICES_CREATE));
    }
}
