//! Role resolution. A role is turned into a capability set once, when a
//! session is built; everything downstream checks capabilities only.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{Role, StaffUser};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_view_all: bool,
    pub can_view_own: bool,
    pub can_create_leads: bool,
    pub can_edit: bool,
    pub can_reassign: bool,
    pub can_configure: bool,
    pub can_manage_users: bool,
    pub can_view_reports: bool,
    pub can_purge: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            can_view_all: true,
            can_view_own: true,
            can_create_leads: true,
            can_edit: true,
            can_reassign: true,
            can_configure: true,
            can_manage_users: true,
            can_view_reports: true,
            can_purge: true,
        }
    }

    /// Both admin tiers hold every capability, purge included. What sets a
    /// super admin apart is checked at the call site: only a super admin may
    /// remove an admin-tier account.
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::SuperAdmin | Role::KeyMaster => Self::all(),
            Role::CaseWorker => Self {
                can_view_own: true,
                can_create_leads: true,
                can_edit: true,
                can_view_reports: true,
                ..Self::default()
            },
            Role::DataEntry => Self {
                can_create_leads: true,
                ..Self::default()
            },
            Role::ReportsOnly => Self {
                can_view_reports: true,
                ..Self::default()
            },
        }
    }
}

/// Who is acting. `user_id` is `None` for system-generated work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Option<Uuid>,
    pub name: String,
    pub role: Option<Role>,
    pub capabilities: Capabilities,
}

impl Session {
    pub fn for_user(user: &StaffUser) -> Self {
        Self {
            user_id: Some(user.id),
            name: user.name.clone(),
            role: Some(user.role),
            capabilities: Capabilities::for_role(user.role),
        }
    }

    pub fn system() -> Self {
        Self {
            user_id: None,
            name: "System".to_string(),
            role: None,
            capabilities: Capabilities::all(),
        }
    }

    pub fn require(&self, granted: bool, action: &'static str) -> EngineResult<()> {
        if granted {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied { action })
        }
    }

    /// Whether this session may see a lead owned by `assignee`.
    pub fn can_see(&self, assignee: Option<Uuid>) -> bool {
        if self.capabilities.can_view_all {
            return true;
        }
        self.capabilities.can_view_own && assignee.is_some() && assignee == self.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn staff(role: Role) -> StaffUser {
        StaffUser {
            id: Uuid::new_v4(),
            name: "Jules Moreno".to_string(),
            email: "jules@example.com".to_string(),
            role,
            active: true,
            metrics: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn case_worker_sees_only_own_leads() {
        let user = staff(Role::CaseWorker);
        let session = Session::for_user(&user);
        assert!(session.can_see(Some(user.id)));
        assert!(!session.can_see(Some(Uuid::new_v4())));
        assert!(!session.can_see(None));
        assert!(!session.capabilities.can_reassign);
    }

    #[test]
    fn reports_only_role_sees_no_leads() {
        let session = Session::for_user(&staff(Role::ReportsOnly));
        assert!(!session.can_see(session.user_id));
        assert!(session.capabilities.can_view_reports);
    }

    #[test]
    fn key_master_holds_every_capability() {
        assert_eq!(Capabilities::for_role(Role::KeyMaster), Capabilities::all());
        assert!(Session::for_user(&staff(Role::KeyMaster)).capabilities.can_purge);
    }

    #[test]
    fn data_entry_can_only_create() {
        let caps = Capabilities::for_role(Role::DataEntry);
        assert!(caps.can_create_leads);
        assert!(!caps.can_edit);
        assert!(!caps.can_view_own);
    }

    #[test]
    fn require_reports_denied_action() {
        let session = Session::for_user(&staff(Role::CaseWorker));
        let err = session
            .require(session.capabilities.can_purge, "purge lead")
            .unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied { action: "purge lead" }));
    }
}
