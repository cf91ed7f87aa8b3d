use actix_identity::Identity;
use actix_web::{HttpRequest, HttpResponse, web};
use diesel::prelude::*;
use diesel::SqliteConnection;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppData;
use crate::hierarchy::{self, Scope};
use crate::models::{IdType, Role, User, UserSensor, UserView};
use crate::permissions::{Action, Resource};
use crate::security::{PermissionCheckable, UserChanges};

use super::{double_option, with_user};
use super::auth_service::remember;
use super::errors::{ServiceError, ServiceResult};

#[derive(Debug, Deserialize)]
pub struct NewUserData {
    username: Option<String>,
    email: Option<String>,
    role: Option<String>,
    password: Option<String>,
    sensor_ids: Option<Vec<IdType>>,
}

#[derive(Debug, Deserialize)]
pub struct UserUpdateData {
    username: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    email: Option<Option<String>>,
    role: Option<String>,
    password: Option<String>,
    sensor_ids: Option<Vec<IdType>>,
}

#[derive(Debug, Serialize)]
pub struct UserDetails {
    #[serde(flatten)]
    user: UserView,
    sensors: Vec<IdType>,
}

fn parse_role(name: &str) -> ServiceResult<Role> {
    Role::from_name(name).ok_or_else(|| ServiceError::BadRequest(format!("Unknown role: {}", name)))
}

/// Only administrators hand out roles at or above their own level.
fn ensure_can_assign_role(user: &User, role: Role) -> ServiceResult<()> {
    let own = user.get_role();
    if own == Role::Admin || own.rank() < role.rank() {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized)
    }
}

fn ensure_sensors_visible(scope: &Scope, sensor_ids: &[IdType]) -> ServiceResult<()> {
    match sensor_ids.iter().find(|x| !scope.sees_sensor(**x)) {
        Some(_) => Err(ServiceError::NotFound("Sensor".to_string())),
        None => Ok(()),
    }
}

fn load_sensor_ids(conn: &mut SqliteConnection, user: IdType) -> QueryResult<Vec<IdType>> {
    use crate::schema::user_sensors::dsl::*;

    user_sensors
        .filter(user_id.eq(user))
        .select(sensor_id)
        .order(sensor_id.asc())
        .load(conn)
}

fn replace_sensors(conn: &mut SqliteConnection, user: IdType, sensors: &[IdType]) -> ServiceResult<()> {
    use crate::schema::user_sensors::dsl::*;

    diesel::delete(user_sensors.filter(user_id.eq(user))).execute(conn)?;

    let mut sensors = sensors.to_vec();
    sensors.sort_unstable();
    sensors.dedup();
    let rows: Vec<UserSensor> = sensors.into_iter()
        .map(|x| UserSensor { user_id: user, sensor_id: x })
        .collect();

    if !rows.is_empty() {
        diesel::insert_into(user_sensors).values(&rows).execute(conn)?;
    }
    Ok(())
}

pub async fn list_users(ctx: web::Data<AppData>, identity: Option<Identity>) -> ServiceResult<HttpResponse> {
    use crate::schema::users::dsl::*;

    let res = with_user(&ctx, identity, |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Users, Action::Read)?;

        let mut query = users.into_boxed();
        if let Some(ids) = user.scope(conn)?.user_ids() {
            query = query.filter(id.eq_any(ids));
        }
        let found = query.order(id.asc()).load::<User>(conn)?;

        Ok(found.iter().map(User::view).collect::<Vec<_>>())
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

pub async fn create_user(ctx: web::Data<AppData>, identity: Option<Identity>, data: web::Json<NewUserData>) -> ServiceResult<HttpResponse> {
    let data = data.into_inner();

    let created_id = with_user(&ctx, identity, move |ctx, conn, user| {
        user.ensure_permission(conn, Resource::Users, Action::Create)?;

        let (username, password, role) = match (data.username, data.password, data.role) {
            (Some(u), Some(p), Some(r)) if !u.trim().is_empty() && !p.is_empty() => (u.trim().to_string(), p, r),
            _ => return Err(ServiceError::missing_fields()),
        };
        let role = parse_role(&role)?;
        ensure_can_assign_role(&user, role)?;

        let sensor_ids = data.sensor_ids.unwrap_or_default();
        ensure_sensors_visible(&user.scope(conn)?, &sensor_ids)?;
        let email = data.email.filter(|x| !x.is_empty());

        conn.transaction::<_, ServiceError, _>(|conn| {
            let created = ctx.auth.add_user(conn, username, email, &password, role)?;
            replace_sensors(conn, created.id, &sensor_ids)?;

            // Keep the new account inside the creator's subtree
            if user.get_role() != Role::Admin {
                hierarchy::link(conn, &user, &created, None)?;
            }
            Ok(created.id)
        })
    }).await?;

    Ok(HttpResponse::Created().json(json!({ "message": "User created", "id": created_id })))
}

pub async fn get_user(ctx: web::Data<AppData>, identity: Option<Identity>, path: web::Path<IdType>) -> ServiceResult<HttpResponse> {
    let target = path.into_inner();

    let res = with_user(&ctx, identity, move |ctx, conn, user| {
        if target != user.id {
            user.ensure_permission(conn, Resource::Users, Action::Read)?;
            user.ensure_user_visible(conn, target)?;
        }

        let found = ctx.auth.find_user_by_id(conn, target)?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        Ok(UserDetails {
            user: found.view(),
            sensors: load_sensor_ids(conn, target)?,
        })
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

pub async fn update_user(
    req: HttpRequest,
    ctx: web::Data<AppData>,
    identity: Option<Identity>,
    path: web::Path<IdType>,
    data: web::Json<UserUpdateData>
) -> ServiceResult<HttpResponse> {
    let target = path.into_inner();
    let data = data.into_inner();

    let (updated, new_identity) = with_user(&ctx, identity, move |ctx, conn, user| {
        let own_profile = target == user.id && data.role.is_none() && data.sensor_ids.is_none();
        if !own_profile {
            user.ensure_permission(conn, Resource::Users, Action::Update)?;
            user.ensure_user_visible(conn, target)?;
        }

        let role = data.role.as_deref().map(parse_role).transpose()?;
        if let Some(role) = role {
            ensure_can_assign_role(&user, role)?;
        }
        if let Some(ref sensors) = data.sensor_ids {
            ensure_sensors_visible(&user.scope(conn)?, sensors)?;
        }
        if data.username.as_ref().map(|x| x.trim().is_empty()).unwrap_or(false) ||
            data.password.as_ref().map(|x| x.is_empty()).unwrap_or(false) {
            return Err(ServiceError::missing_fields())
        }

        let password_changed = data.password.is_some();
        let changes = UserChanges {
            username: data.username.map(|x| x.trim().to_string()),
            email: data.email.map(|x| x.filter(|e| !e.is_empty())),
            password: data.password,
            role,
        };

        let updated = conn.transaction::<_, ServiceError, _>(|conn| {
            if let Some(role) = role {
                hierarchy::ensure_links_fit(conn, target, role)?;
            }
            let updated = ctx.auth.update_user(conn, target, changes)?;
            if let Some(ref sensors) = data.sensor_ids {
                replace_sensors(conn, target, sensors)?;
            }
            Ok(updated)
        })?;

        // Changing the password invalidates every session, the current one included
        let new_identity = if password_changed && target == user.id {
            Some(ctx.auth.save_identity(&updated)?)
        } else {
            None
        };

        Ok((updated, new_identity))
    }).await?;

    if let Some(x) = new_identity {
        remember(&req, x)?;
    }

    Ok(HttpResponse::Ok().json(json!({ "message": "User updated", "user": updated.view() })))
}

pub async fn delete_user(ctx: web::Data<AppData>, identity: Option<Identity>, path: web::Path<IdType>) -> ServiceResult<HttpResponse> {
    let target = path.into_inner();

    with_user(&ctx, identity, move |ctx, conn, user| {
        user.ensure_permission(conn, Resource::Users, Action::Delete)?;
        user.ensure_user_visible(conn, target)?;
        if target == user.id {
            return Err(ServiceError::BadRequest("You cannot delete your own account".to_string()))
        }

        ctx.auth.delete_user(conn, target)
    }).await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "User deleted" })))
}
