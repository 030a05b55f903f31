/*!
 * # Permissions Module
 *
 * Permissions are `resource:action` strings. A `resource:*` grant covers
 * every action on that resource and `*` covers everything.
 */

/// Permission actions
pub struct Actions;

impl Actions {
    pub const READ: &'static str = "read";
    pub const CREATE: &'static str = "create";
    pub const SHIP: &'static str = "ship";
    pub const RETURN: &'static str = "return";
    pub const CLOSE: &'static str = "close";
    pub const ALL: &'static str = "*";
}

/// Resource types
pub struct Resources;

impl Resources {
    pub const DEVICES: &'static str = "devices";
    pub const ASSIGNMENTS: &'static str = "assignments";
}

/// Common permission string constants for compile-time safety
pub mod consts {
    // Device registry
    pub const DEVICES_READ: &str = "devices:read";
    pub const DEVICES_CREATE: &str = "devices:create";

    // Assignment lifecycle
    pub const ASSIGNMENTS_READ: &str = "assignments:read";
    pub const ASSIGNMENTS_CREATE: &str = "assignments:create";
    pub const ASSIGNMENTS_SHIP: &str = "assignments:ship";
    pub const ASSIGNMENTS_RETURN: &str = "assignments:return";
    pub const ASSIGNMENTS_CLOSE: &str = "assignments:close";
}

/// Format a permission string
pub fn format_permission(resource: &str, action: &str) -> String {
    format!("{}:{}", resource, action)
}

/// Whether a granted permission covers the required one.
pub fn permission_implies(granted: &str, required: &str) -> bool {
    if granted == "*" || granted == required {
        return true;
    }

    match (granted.split_once(':'), required.split_once(':')) {
        (Some((granted_resource, Actions::ALL)), Some((required_resource, _))) => {
            granted_resource == required_resource
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_wildcard_grants() {
        assert!(permission_implies(consts::DEVICES_READ, consts::DEVICES_READ));
        assert!(permission_implies("assignments:*", consts::ASSIGNMENTS_CLOSE));
        assert!(permission_implies("*", consts::DEVICES_CREATE));
        assert!(!permission_implies(consts::DEVICES_READ, consts::DEVICES_CREATE));
    }

    #[test]
    fn wildcard_does_not_leak_across_resources() {
        assert!(!permission_implies("devices:*", consts::ASSIGNMENTS_READ));
        assert!(!permission_implies("assign:*", consts::ASSIGNMENTS_READ));
    }

    #[test]
    fn format_matches_constants() {
        assert_eq!(
            format_permission(Resources::ASSIGNMENTS, Actions::SHIP),
            consts::ASSIGNMENTS_SHIP
        );
        assert_eq!(
            format_permission(Resources::DEVICES, Actions::READ),
            consts::DEVICES_READ
        );
    }
}
