use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Distributor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Distributor => "distributor",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "customer" => Some(Role::Customer),
            "distributor" => Some(Role::Distributor),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Permission {
    CreateSubscription,
    ModifySubscription,
    ViewDistributionList,
    ManageNewspapers,
    ManageUsers,
    ViewAllPayments,
    IssueRefunds,
    ViewStats,
    ReadAuditLog,
}

pub fn has_permission(role: &str, permission: &Permission) -> bool {
    match role {
        "admin" => !matches!(
            permission,
            Permission::CreateSubscription | Permission::ViewDistributionList
        ),
        "customer" => matches!(
            permission,
            Permission::CreateSubscription | Permission::ModifySubscription
        ),
        "distributor" => matches!(permission, Permission::ViewDistributionList),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_permissions() {
        assert!(has_permission("customer", &Permission::CreateSubscription));
        assert!(has_permission("customer", &Permission::ModifySubscription));
        assert!(!has_permission("customer", &Permission::ManageNewspapers));
        assert!(!has_permission("customer", &Permission::IssueRefunds));
        assert!(!has_permission("customer", &Permission::ViewDistributionList));
    }

    #[test]
    fn test_distributor_permissions() {
        assert!(has_permission("distributor", &Permission::ViewDistributionList));
        assert!(!has_permission("distributor", &Permission::CreateSubscription));
        assert!(!has_permission("distributor", &Permission::ModifySubscription));
    }

    #[test]
    fn test_admin_permissions() {
        assert!(has_permission("admin", &Permission::ManageNewspapers));
        assert!(has_permission("admin", &Permission::ModifySubscription));
        assert!(has_permission("admin", &Permission::IssueRefunds));
        assert!(has_permission("admin", &Permission::ReadAuditLog));
        // Subscriptions are placed by customers only
        assert!(!has_permission("admin", &Permission::CreateSubscription));
    }

    #[test]
    fn test_unknown_role_has_nothing() {
        assert!(!has_permission("super_admin", &Permission::ViewStats));
        assert!(!has_permission("", &Permission::CreateSubscription));
    }

    #[test]
    fn test_role_round_trip() {
        for role in [Role::Customer, Role::Distributor, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("operator"), None);
    }
}
