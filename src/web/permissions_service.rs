use std::collections::HashMap;

use actix_identity::Identity;
use actix_web::{HttpResponse, web};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppData;
use crate::hierarchy::{self, Scope};
use crate::models::{CustomPermission, IdType, Role, Sensor, User};
use crate::permissions::{self, Action, Resource};
use crate::security::{load_overrides, PermissionCheckable};

use super::with_user;
use super::errors::{ServiceError, ServiceResult};

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    resource: Option<String>,
    action: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CustomPermissionData {
    user_id: Option<IdType>,
    resource: Option<String>,
    action: Option<String>,
    granted: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct AccessibleUser {
    id: IdType,
    username: String,
    role: Role,
    email: Option<String>,
    hierarchy_type: String,
    access_type: &'static str,
    depth: u32,
}

#[derive(Debug, Serialize)]
pub struct AccessibleSensor {
    id: IdType,
    name: String,
    location: String,
    status: String,
    owner_id: Option<IdType>,
    owner_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuditEntry {
    id: IdType,
    user_id: IdType,
    username: Option<String>,
    resource: String,
    action: String,
    granted: bool,
    granted_by: Option<IdType>,
    granted_by_name: Option<String>,
    granted_at: NaiveDateTime,
}

const SUPERVISORS: &[Role] = &[Role::Admin, Role::Manager];

pub async fn matrix(ctx: web::Data<AppData>, identity: Option<Identity>) -> ServiceResult<HttpResponse> {
    with_user(&ctx, identity, |_ctx, _conn, user| user.ensure_role(SUPERVISORS)).await?;

    Ok(HttpResponse::Ok().json(permissions::matrix()))
}

/// Whether the logged user may perform an action, overrides included.
pub async fn check(ctx: web::Data<AppData>, identity: Option<Identity>, query: web::Query<CheckQuery>) -> ServiceResult<HttpResponse> {
    let query = query.into_inner();
    let (resource, action) = match (query.resource, query.action) {
        (Some(r), Some(a)) if !r.is_empty() && !a.is_empty() => (r, a),
        _ => return Err(ServiceError::missing_fields()),
    };

    let allowed = with_user(&ctx, identity, move |_ctx, conn, user| {
        let (resource, action) = match (Resource::from_name(&resource), Action::from_name(&action)) {
            (Some(r), Some(a)) => (r, a),
            _ => return Ok(false),
        };
        let overrides = load_overrides(conn, user.id)?;
        Ok(permissions::is_allowed(user.get_role(), &overrides, resource, action))
    }).await?;

    Ok(HttpResponse::Ok().json(json!({ "allowed": allowed })))
}

pub async fn list_custom(ctx: web::Data<AppData>, identity: Option<Identity>) -> ServiceResult<HttpResponse> {
    use crate::schema::custom_permissions::dsl::*;

    let res = with_user(&ctx, identity, |_ctx, conn, user| {
        user.ensure_role(SUPERVISORS)?;
        Ok(custom_permissions
            .order((user_id.asc(), resource.asc(), action.asc()))
            .load::<CustomPermission>(conn)?)
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

/// Grants or revokes a single action, replacing an older override of the same action.
pub async fn set_custom(ctx: web::Data<AppData>, identity: Option<Identity>, data: web::Json<CustomPermissionData>) -> ServiceResult<HttpResponse> {
    use crate::schema::custom_permissions::dsl;

    let data = data.into_inner();

    let res = with_user(&ctx, identity, move |ctx, conn, user| {
        user.ensure_admin()?;

        // A missing `granted` must never default to allowing
        let (target, resource, action, granted) = match (data.user_id, data.resource, data.action, data.granted) {
            (Some(u), Some(r), Some(a), Some(g)) => (u, r, a, g),
            _ => return Err(ServiceError::missing_fields()),
        };
        let resource = Resource::from_name(&resource)
            .ok_or_else(|| ServiceError::BadRequest(format!("Unknown resource: {}", resource)))?;
        let action = Action::from_name(&action)
            .ok_or_else(|| ServiceError::BadRequest(format!("Unknown action: {}", action)))?;

        ctx.auth.find_user_by_id(conn, target)?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        let now = Utc::now().naive_utc();
        Ok(diesel::insert_into(dsl::custom_permissions)
            .values((
                dsl::user_id.eq(target),
                dsl::resource.eq(resource.to_string()),
                dsl::action.eq(action.to_string()),
                dsl::granted.eq(granted),
                dsl::granted_by.eq(Some(user.id)),
                dsl::granted_at.eq(now),
            ))
            .on_conflict((dsl::user_id, dsl::resource, dsl::action))
            .do_update()
            .set((
                dsl::granted.eq(granted),
                dsl::granted_by.eq(Some(user.id)),
                dsl::granted_at.eq(now),
            ))
            .get_result::<CustomPermission>(conn)?)
    }).await?;

    Ok(HttpResponse::Created().json(json!({ "message": "Custom permission saved", "permission": res })))
}

pub async fn reset_custom(ctx: web::Data<AppData>, identity: Option<Identity>, path: web::Path<IdType>) -> ServiceResult<HttpResponse> {
    use crate::schema::custom_permissions::dsl::*;

    let target = path.into_inner();

    let removed = with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_admin()?;
        Ok(diesel::delete(custom_permissions.filter(user_id.eq(target))).execute(conn)?)
    }).await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "Custom permissions reset", "removed": removed })))
}

pub async fn user_permissions(ctx: web::Data<AppData>, identity: Option<Identity>, path: web::Path<IdType>) -> ServiceResult<HttpResponse> {
    let target = path.into_inner();

    let res = with_user(&ctx, identity, move |ctx, conn, user| {
        if target != user.id {
            user.ensure_role(SUPERVISORS)?;
            user.ensure_user_visible(conn, target)?;
        }
        let found = ctx.auth.find_user_by_id(conn, target)?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;
        let overrides = load_overrides(conn, target)?;

        Ok(json!({
            "user_id": found.id,
            "role": found.get_role(),
            "base_permissions": permissions::base_permissions(found.get_role()),
            "permissions": permissions::effective_permissions(found.get_role(), &overrides),
            "custom_permissions": overrides,
        }))
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

/// Users below the given one, and the sensors its position makes visible.
pub async fn hierarchy_permissions(ctx: web::Data<AppData>, identity: Option<Identity>, path: web::Path<IdType>) -> ServiceResult<HttpResponse> {
    use crate::schema::sensors::dsl as sensor_dsl;
    use crate::schema::user_hierarchy::dsl as link_dsl;
    use crate::schema::user_sensors::dsl as assign_dsl;
    use crate::schema::users::dsl as user_dsl;

    let target = path.into_inner();

    let res = with_user(&ctx, identity, move |ctx, conn, user| {
        user.ensure_role(&[Role::Admin, Role::Manager, Role::Rd, Role::Tu])?;
        user.ensure_user_visible(conn, target)?;
        let found = ctx.auth.find_user_by_id(conn, target)?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        let below = hierarchy::descendants(conn, target)?;
        let below_ids: Vec<IdType> = below.keys().copied().collect();

        // Direct children show the type of their link, deeper users are inherited
        let link_types: HashMap<IdType, String> = link_dsl::user_hierarchy
            .filter(link_dsl::parent_id.eq(target))
            .filter(link_dsl::child_id.eq_any(below_ids.clone()))
            .select((link_dsl::child_id, link_dsl::hierarchy_type))
            .load::<(IdType, String)>(conn)?
            .into_iter()
            .collect();

        let mut users: Vec<AccessibleUser> = user_dsl::users
            .filter(user_dsl::id.eq_any(below_ids.clone()))
            .load::<User>(conn)?
            .into_iter()
            .map(|x| {
                let depth = below.get(&x.id).copied().unwrap_or(1);
                let (hierarchy_type, access_type) = match link_types.get(&x.id) {
                    Some(kind) if depth == 1 => (kind.clone(), "direct"),
                    _ => ("inherited".to_string(), "inherited"),
                };
                AccessibleUser {
                    id: x.id,
                    role: x.get_role(),
                    username: x.username,
                    email: x.email,
                    hierarchy_type,
                    access_type,
                    depth,
                }
            })
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));

        let mut query = sensor_dsl::sensors.into_boxed();
        if let Scope::Restricted(visible) = Scope::load(conn, &found)? {
            query = query.filter(sensor_dsl::id.eq_any(visible.sensors.into_iter().collect::<Vec<_>>()));
        }
        let found_sensors = query.order(sensor_dsl::id.asc()).load::<Sensor>(conn)?;

        // The owner is the assigned user with the lowest id
        let mut holders = below_ids;
        holders.push(target);
        let mut owners: HashMap<IdType, (IdType, String)> = HashMap::new();
        let assignments = assign_dsl::user_sensors
            .inner_join(user_dsl::users)
            .filter(assign_dsl::user_id.eq_any(holders))
            .filter(assign_dsl::sensor_id.eq_any(found_sensors.iter().map(|x| x.id).collect::<Vec<_>>()))
            .select((assign_dsl::sensor_id, user_dsl::id, user_dsl::username))
            .order((assign_dsl::sensor_id.asc(), user_dsl::id.asc()))
            .load::<(IdType, IdType, String)>(conn)?;
        for (sensor, owner, name) in assignments {
            owners.entry(sensor).or_insert((owner, name));
        }

        let sensors: Vec<AccessibleSensor> = found_sensors.into_iter()
            .map(|x| {
                let owner = owners.remove(&x.id);
                AccessibleSensor {
                    owner_id: owner.as_ref().map(|o| o.0),
                    owner_name: owner.map(|o| o.1),
                    id: x.id,
                    name: x.name,
                    location: x.location,
                    status: x.status,
                }
            })
            .collect();

        Ok(json!({
            "user_id": found.id,
            "accessible_users": users,
            "accessible_sensors": sensors,
        }))
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

pub async fn audit(ctx: web::Data<AppData>, identity: Option<Identity>) -> ServiceResult<HttpResponse> {
    use crate::schema::custom_permissions::dsl;
    use crate::schema::users::dsl as user_dsl;

    let res = with_user(&ctx, identity, |_ctx, conn, user| {
        user.ensure_admin()?;

        let entries = dsl::custom_permissions
            .order((dsl::granted_at.desc(), dsl::id.desc()))
            .load::<CustomPermission>(conn)?;
        let names: HashMap<IdType, String> = user_dsl::users
            .select((user_dsl::id, user_dsl::username))
            .load::<(IdType, String)>(conn)?
            .into_iter()
            .collect();

        Ok(entries.into_iter().map(|x| AuditEntry {
            username: names.get(&x.user_id).cloned(),
            granted_by_name: x.granted_by.and_then(|id| names.get(&id).cloned()),
            id: x.id,
            user_id: x.user_id,
            resource: x.resource,
            action: x.action,
            granted: x.granted,
            granted_by: x.granted_by,
            granted_at: x.granted_at,
        }).collect::<Vec<_>>())
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}
