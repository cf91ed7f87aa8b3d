//! User hierarchy and the visibility scope it implies.
//!
//! `user_hierarchy` is an adjacency list of parent/child user links. A user sees
//! what is assigned to himself and to every user below him, at any depth.
//! Administrators see everything.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use diesel::prelude::*;
use diesel::SqliteConnection;

use crate::models::{HierarchyLink, IdType, Role, User};
use crate::web::errors::{ServiceError, ServiceResult};

/// Every user reachable from `root` through the hierarchy, with the depth it
/// was first reached at (1 for direct children).
/// Malformed data containing cycles terminates, `root` itself is never returned.
pub fn descendants(conn: &mut SqliteConnection, root: IdType) -> QueryResult<BTreeMap<IdType, u32>> {
    use crate::schema::user_hierarchy::dsl::*;

    let mut found = BTreeMap::new();
    let mut frontier = vec![root];
    let mut depth = 0;

    while !frontier.is_empty() {
        depth += 1;
        let children: Vec<IdType> = user_hierarchy
            .filter(parent_id.eq_any(frontier.clone()))
            .select(child_id)
            .load(conn)?;

        frontier = Vec::new();
        for child in children {
            if child == root || found.contains_key(&child) {
                continue;
            }
            found.insert(child, depth);
            frontier.push(child);
        }
    }

    Ok(found)
}

/// Links `child` under `parent`.
/// The parent role must stand strictly above the child role, and the link must
/// not close a cycle.
pub fn link(conn: &mut SqliteConnection, parent: &User, child: &User, kind: Option<String>) -> ServiceResult<HierarchyLink> {
    use crate::schema::user_hierarchy::dsl::*;

    if parent.id == child.id {
        return Err(ServiceError::BadRequest("A user cannot be linked to himself".to_string()))
    }
    if parent.get_role().rank() >= child.get_role().rank() {
        return Err(ServiceError::BadRequest(format!(
            "A {} cannot be placed above a {}", parent.get_role(), child.get_role()
        )))
    }
    if descendants(conn, child.id)?.contains_key(&parent.id) {
        return Err(ServiceError::BadRequest("The link would create a cycle".to_string()))
    }

    let kind = kind.unwrap_or_else(|| child.get_role().to_string());

    let res = diesel::insert_into(user_hierarchy)
        .values((
            parent_id.eq(parent.id),
            child_id.eq(child.id),
            hierarchy_type.eq(kind),
            created_at.eq(Utc::now().naive_utc()),
        ))
        .get_result::<HierarchyLink>(conn);

    match res {
        Err(diesel::result::Error::DatabaseError(diesel::result::DatabaseErrorKind::UniqueViolation, _)) => {
            Err(ServiceError::AlreadyPresent("Hierarchy link".to_string()))
        },
        x => Ok(x?),
    }
}

/// Checks that `user` can take `role` without breaking the rank order of the
/// links it already has.
pub fn ensure_links_fit(conn: &mut SqliteConnection, user: IdType, role: Role) -> ServiceResult<()> {
    use crate::schema::user_hierarchy::dsl as link_dsl;
    use crate::schema::users::dsl as user_dsl;

    let parents: Vec<String> = link_dsl::user_hierarchy
        .inner_join(user_dsl::users.on(user_dsl::id.eq(link_dsl::parent_id)))
        .filter(link_dsl::child_id.eq(user))
        .select(user_dsl::role)
        .load(conn)?;
    let children: Vec<String> = link_dsl::user_hierarchy
        .inner_join(user_dsl::users.on(user_dsl::id.eq(link_dsl::child_id)))
        .filter(link_dsl::parent_id.eq(user))
        .select(user_dsl::role)
        .load(conn)?;

    let rank_of = |name: &String| Role::from_name(name).unwrap_or(Role::Store).rank();
    if parents.iter().any(|x| rank_of(x) >= role.rank()) {
        return Err(ServiceError::BadRequest(format!("A {} cannot stay below its current parents", role)))
    }
    if children.iter().any(|x| rank_of(x) <= role.rank()) {
        return Err(ServiceError::BadRequest(format!("A {} cannot stay above its current children", role)))
    }
    Ok(())
}

pub fn unlink(conn: &mut SqliteConnection, parent: IdType, child: IdType) -> ServiceResult<()> {
    use crate::schema::user_hierarchy::dsl::*;

    let deleted = diesel::delete(user_hierarchy)
        .filter(parent_id.eq(parent))
        .filter(child_id.eq(child))
        .execute(conn)?;

    if deleted == 0 {
        Err(ServiceError::NotFound("Hierarchy link".to_string()))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Visible {
    pub users: BTreeSet<IdType>,
    pub stores: BTreeSet<IdType>,
    pub sensors: BTreeSet<IdType>,
}

/// What a single user is allowed to see.
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    All,
    Restricted(Visible),
}

impl Scope {
    pub fn load(conn: &mut SqliteConnection, user: &User) -> QueryResult<Scope> {
        use crate::schema::sensors::dsl as sensor_dsl;
        use crate::schema::stores::dsl as store_dsl;
        use crate::schema::user_sensors::dsl as assign_dsl;
        use crate::schema::users::dsl as user_dsl;

        if user.get_role() == Role::Admin {
            return Ok(Scope::All)
        }

        // Only strictly lower ranks are reachable, whatever the links say
        let below: Vec<IdType> = descendants(conn, user.id)?.into_keys().collect();
        let rank = user.get_role().rank();
        let mut users: BTreeSet<IdType> = user_dsl::users
            .filter(user_dsl::id.eq_any(below))
            .select((user_dsl::id, user_dsl::role))
            .load::<(IdType, String)>(conn)?
            .into_iter()
            .filter(|(_, role)| Role::from_name(role).map_or(false, |x| x.rank() > rank))
            .map(|(id, _)| id)
            .collect();
        users.insert(user.id);
        let user_ids: Vec<IdType> = users.iter().copied().collect();

        let assigned: Vec<IdType> = assign_dsl::user_sensors
            .filter(assign_dsl::user_id.eq_any(user_ids.clone()))
            .select(assign_dsl::sensor_id)
            .load(conn)?;

        let managed: Vec<IdType> = store_dsl::stores
            .filter(store_dsl::tu_id.eq_any(user_ids.clone()).or(store_dsl::rd_id.eq_any(user_ids)))
            .select(store_dsl::id)
            .load(conn)?;

        let store_sensors: Vec<IdType> = sensor_dsl::sensors
            .filter(sensor_dsl::store_id.eq_any(managed.clone()))
            .select(sensor_dsl::id)
            .load(conn)?;

        let assigned_stores: Vec<Option<IdType>> = sensor_dsl::sensors
            .filter(sensor_dsl::id.eq_any(assigned.clone()))
            .select(sensor_dsl::store_id)
            .load(conn)?;

        Ok(Scope::Restricted(Visible {
            users,
            stores: managed.into_iter().chain(assigned_stores.into_iter().flatten()).collect(),
            sensors: assigned.into_iter().chain(store_sensors).collect(),
        }))
    }

    pub fn sees_user(&self, id: IdType) -> bool {
        match self {
            Scope::All => true,
            Scope::Restricted(v) => v.users.contains(&id),
        }
    }

    pub fn sees_store(&self, id: IdType) -> bool {
        match self {
            Scope::All => true,
            Scope::Restricted(v) => v.stores.contains(&id),
        }
    }

    pub fn sees_sensor(&self, id: IdType) -> bool {
        match self {
            Scope::All => true,
            Scope::Restricted(v) => v.sensors.contains(&id),
        }
    }

    /// `None` means unrestricted.
    pub fn user_ids(&self) -> Option<Vec<IdType>> {
        match self {
            Scope::All => None,
            Scope::Restricted(v) => Some(v.users.iter().copied().collect()),
        }
    }

    pub fn store_ids(&self) -> Option<Vec<IdType>> {
        match self {
            Scope::All => None,
            Scope::Restricted(v) => Some(v.stores.iter().copied().collect()),
        }
    }

    pub fn sensor_ids(&self) -> Option<Vec<IdType>> {
        match self {
            Scope::All => None,
            Scope::Restricted(v) => Some(v.sensors.iter().copied().collect()),
        }
    }
}
