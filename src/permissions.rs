//! Role based permission matrix.
//!
//! Every role gets a fixed set of actions per resource, individual users can then
//! be granted or denied single actions through custom overrides.

use std::collections::BTreeMap;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::models::{CustomPermission, Role};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    #[display(fmt = "users")]
    Users,
    #[display(fmt = "sensors")]
    Sensors,
    #[display(fmt = "reports")]
    Reports,
    #[display(fmt = "stores")]
    Stores,
    #[display(fmt = "hierarchy")]
    Hierarchy,
    #[display(fmt = "settings")]
    Settings,
    #[display(fmt = "system")]
    System,
}

impl Resource {
    pub const ALL: [Resource; 7] = [
        Resource::Users,
        Resource::Sensors,
        Resource::Reports,
        Resource::Stores,
        Resource::Hierarchy,
        Resource::Settings,
        Resource::System,
    ];

    pub fn from_name(name: &str) -> Option<Resource> {
        Resource::ALL.iter().copied().find(|x| x.to_string() == name)
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[display(fmt = "create")]
    Create,
    #[display(fmt = "read")]
    Read,
    #[display(fmt = "update")]
    Update,
    #[display(fmt = "delete")]
    Delete,
    #[display(fmt = "manage_hierarchy")]
    ManageHierarchy,
    #[display(fmt = "assign")]
    Assign,
    #[display(fmt = "export")]
    Export,
    #[display(fmt = "backup")]
    Backup,
    #[display(fmt = "restore")]
    Restore,
    #[display(fmt = "logs")]
    Logs,
    #[display(fmt = "maintenance")]
    Maintenance,
}

impl Action {
    pub const ALL: [Action; 11] = [
        Action::Create,
        Action::Read,
        Action::Update,
        Action::Delete,
        Action::ManageHierarchy,
        Action::Assign,
        Action::Export,
        Action::Backup,
        Action::Restore,
        Action::Logs,
        Action::Maintenance,
    ];

    pub fn from_name(name: &str) -> Option<Action> {
        Action::ALL.iter().copied().find(|x| x.to_string() == name)
    }
}

pub type PermissionSet = BTreeMap<Resource, Vec<Action>>;

use self::Action::*;

const CRUD: &[Action] = &[Create, Read, Update, Delete];
const READ: &[Action] = &[Read];
const NONE: &[Action] = &[];

/// The statically configured actions of a role on a resource.
pub fn role_permissions(role: Role, resource: Resource) -> &'static [Action] {
    match (role, resource) {
        (Role::Admin, Resource::Users) => &[Create, Read, Update, Delete, ManageHierarchy],
        (Role::Admin, Resource::Sensors) => &[Create, Read, Update, Delete, Assign],
        (Role::Admin, Resource::Reports) => &[Create, Read, Update, Delete, Export],
        (Role::Admin, Resource::Stores) => &[Create, Read, Update, Delete, Assign],
        (Role::Admin, Resource::Hierarchy) => CRUD,
        (Role::Admin, Resource::Settings) => &[Read, Update],
        (Role::Admin, Resource::System) => &[Backup, Restore, Logs, Maintenance],

        (Role::Manager, Resource::Users) => CRUD,
        (Role::Manager, Resource::Sensors) => &[Create, Read, Update, Delete, Assign],
        (Role::Manager, Resource::Reports) => &[Create, Read, Update, Export],
        (Role::Manager, Resource::Stores) => &[Create, Read, Update, Assign],
        (Role::Manager, Resource::Hierarchy) => CRUD,
        (Role::Manager, Resource::Settings) => READ,
        (Role::Manager, Resource::System) => &[Logs],

        (Role::Rd, Resource::Reports) | (Role::Tu, Resource::Reports) => &[Read, Export],
        (Role::Rd, Resource::System) | (Role::Tu, Resource::System) => NONE,
        (Role::Rd, _) | (Role::Tu, _) => READ,

        (Role::Store, Resource::Users) | (Role::Store, Resource::Hierarchy) | (Role::Store, Resource::System) => NONE,
        (Role::Store, _) => READ,
    }
}

/// The whole matrix, as served to the administration pages.
pub fn matrix() -> BTreeMap<Role, PermissionSet> {
    Role::ALL.iter()
        .map(|role| (*role, base_permissions(*role)))
        .collect()
}

pub fn base_permissions(role: Role) -> PermissionSet {
    Resource::ALL.iter()
        .map(|res| (*res, role_permissions(role, *res).to_vec()))
        .collect()
}

/// Applies the user overrides on top of the role permissions.
/// Overrides naming unknown resources or actions are skipped.
pub fn effective_permissions(role: Role, overrides: &[CustomPermission]) -> PermissionSet {
    let mut perms = base_permissions(role);

    for over in overrides {
        let (resource, action) = match (Resource::from_name(&over.resource), Action::from_name(&over.action)) {
            (Some(r), Some(a)) => (r, a),
            _ => continue,
        };
        let actions = perms.entry(resource).or_insert_with(Vec::new);
        let present = actions.contains(&action);

        if over.granted && !present {
            actions.push(action);
        } else if !over.granted && present {
            actions.retain(|x| *x != action);
        }
    }

    perms
}

pub fn is_allowed(role: Role, overrides: &[CustomPermission], resource: Resource, action: Action) -> bool {
    effective_permissions(role, overrides)
        .get(&resource)
        .map(|x| x.contains(&action))
        .unwrap_or(false)
}
