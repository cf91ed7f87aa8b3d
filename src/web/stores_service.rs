use std::collections::HashMap;

use actix_identity::Identity;
use actix_web::{HttpResponse, web};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::SqliteConnection;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppData;
use crate::models::{IdType, Role, Sensor, Store, User};
use crate::permissions::{Action, Resource};
use crate::schema::stores;
use crate::security::PermissionCheckable;

use super::{double_option, with_user};
use super::errors::{ServiceError, ServiceResult};
use super::sensors_service::load_sensor;

#[derive(Debug, Deserialize)]
pub struct NewStoreData {
    name: Option<String>,
    address: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    tu_id: Option<IdType>,
    rd_id: Option<IdType>,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = stores)]
pub struct StoreUpdateData {
    name: Option<String>,
    address: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    latitude: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    longitude: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    tu_id: Option<Option<IdType>>,
    #[serde(default, deserialize_with = "double_option")]
    rd_id: Option<Option<IdType>>,
}

impl StoreUpdateData {
    fn is_empty(&self) -> bool {
        self.name.is_none() && self.address.is_none() && self.latitude.is_none() &&
            self.longitude.is_none() && self.tu_id.is_none() && self.rd_id.is_none()
    }
}

#[derive(Debug, Serialize)]
pub struct StoreView {
    pub id: IdType,
    pub name: String,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub tu_id: Option<IdType>,
    pub tu_name: Option<String>,
    pub rd_id: Option<IdType>,
    pub rd_name: Option<String>,
    pub sensor_count: usize,
    pub created_at: NaiveDateTime,
}

fn check_coordinates(latitude: Option<f64>, longitude: Option<f64>) -> ServiceResult<()> {
    if latitude.map(|x| !(-90.0..=90.0).contains(&x)).unwrap_or(false) {
        return Err(ServiceError::BadRequest("Latitude out of range".to_string()))
    }
    if longitude.map(|x| !(-180.0..=180.0).contains(&x)).unwrap_or(false) {
        return Err(ServiceError::BadRequest("Longitude out of range".to_string()))
    }
    Ok(())
}

/// Store managers must exist, hold the matching role and be visible to the caller.
fn check_manager(conn: &mut SqliteConnection, caller: &User, manager: Option<IdType>, role: Role) -> ServiceResult<()> {
    use crate::schema::users::dsl;

    let manager = match manager {
        Some(x) => x,
        None => return Ok(()),
    };
    caller.ensure_user_visible(conn, manager)?;

    let found = dsl::users.find(manager).first::<User>(conn).optional()?
        .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;
    if found.get_role() != role {
        return Err(ServiceError::BadRequest(format!("{} is not a {} user", found.username, role)))
    }
    Ok(())
}

pub fn load_store(conn: &mut SqliteConnection, store: IdType) -> ServiceResult<Store> {
    stores::table.find(store)
        .first::<Store>(conn)
        .optional()?
        .ok_or_else(|| ServiceError::NotFound("Store".to_string()))
}

/// Resolves manager names and sensor counts.
fn store_views(conn: &mut SqliteConnection, found: Vec<Store>) -> ServiceResult<Vec<StoreView>> {
    use crate::schema::sensors::dsl as sensor_dsl;
    use crate::schema::users::dsl as user_dsl;

    let user_ids: Vec<IdType> = found.iter()
        .flat_map(|x| x.tu_id.into_iter().chain(x.rd_id))
        .collect();
    let names: HashMap<IdType, String> = user_dsl::users
        .filter(user_dsl::id.eq_any(user_ids))
        .select((user_dsl::id, user_dsl::username))
        .load::<(IdType, String)>(conn)?
        .into_iter()
        .collect();

    let store_ids: Vec<IdType> = found.iter().map(|x| x.id).collect();
    let mut counts: HashMap<IdType, usize> = HashMap::new();
    let assigned: Vec<Option<IdType>> = sensor_dsl::sensors
        .filter(sensor_dsl::store_id.eq_any(store_ids))
        .select(sensor_dsl::store_id)
        .load(conn)?;
    for store in assigned.into_iter().flatten() {
        *counts.entry(store).or_insert(0) += 1;
    }

    let name_of = |x: Option<IdType>| x.and_then(|id| names.get(&id).cloned());

    Ok(found.into_iter().map(|x| StoreView {
        id: x.id,
        tu_name: name_of(x.tu_id),
        rd_name: name_of(x.rd_id),
        sensor_count: counts.get(&x.id).copied().unwrap_or(0),
        name: x.name,
        address: x.address,
        latitude: x.latitude,
        longitude: x.longitude,
        tu_id: x.tu_id,
        rd_id: x.rd_id,
        created_at: x.created_at,
    }).collect())
}

pub async fn list_stores(ctx: web::Data<AppData>, identity: Option<Identity>) -> ServiceResult<HttpResponse> {
    use crate::schema::stores::dsl::*;

    let res = with_user(&ctx, identity, |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Stores, Action::Read)?;

        let mut query = stores.into_boxed();
        if let Some(ids) = user.scope(conn)?.store_ids() {
            query = query.filter(id.eq_any(ids));
        }
        let found = query.order(name.asc()).load::<Store>(conn)?;
        store_views(conn, found)
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

pub async fn create_store(ctx: web::Data<AppData>, identity: Option<Identity>, data: web::Json<NewStoreData>) -> ServiceResult<HttpResponse> {
    use crate::schema::stores::dsl;

    let data = data.into_inner();

    let created_id = with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Stores, Action::Create)?;

        let (name, address) = match (data.name, data.address) {
            (Some(n), Some(a)) if !n.trim().is_empty() && !a.trim().is_empty() => (n, a),
            _ => return Err(ServiceError::missing_fields()),
        };
        check_coordinates(data.latitude, data.longitude)?;
        check_manager(conn, &user, data.tu_id, Role::Tu)?;
        check_manager(conn, &user, data.rd_id, Role::Rd)?;

        Ok(diesel::insert_into(dsl::stores)
            .values((
                dsl::name.eq(name),
                dsl::address.eq(address),
                dsl::latitude.eq(data.latitude),
                dsl::longitude.eq(data.longitude),
                dsl::tu_id.eq(data.tu_id),
                dsl::rd_id.eq(data.rd_id),
                dsl::created_at.eq(Utc::now().naive_utc()),
            ))
            .returning(dsl::id)
            .get_result::<IdType>(conn)?)
    }).await?;

    Ok(HttpResponse::Created().json(json!({ "message": "Store created", "id": created_id })))
}

pub async fn get_store(ctx: web::Data<AppData>, identity: Option<Identity>, path: web::Path<IdType>) -> ServiceResult<HttpResponse> {
    let store_id = path.into_inner();

    let mut res = with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Stores, Action::Read)?;
        user.ensure_store_visible(conn, store_id)?;
        let store = load_store(conn, store_id)?;
        store_views(conn, vec![store])
    }).await?;

    match res.pop() {
        Some(x) => Ok(HttpResponse::Ok().json(x)),
        None => Err(ServiceError::NotFound("Store".to_string())),
    }
}

pub async fn update_store(
    ctx: web::Data<AppData>,
    identity: Option<Identity>,
    path: web::Path<IdType>,
    data: web::Json<StoreUpdateData>
) -> ServiceResult<HttpResponse> {
    let store_id = path.into_inner();
    let data = data.into_inner();

    let res = with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Stores, Action::Update)?;
        user.ensure_store_visible(conn, store_id)?;

        if data.name.as_ref().map(|x| x.trim().is_empty()).unwrap_or(false) ||
            data.address.as_ref().map(|x| x.trim().is_empty()).unwrap_or(false) {
            return Err(ServiceError::missing_fields())
        }
        check_coordinates(data.latitude.flatten(), data.longitude.flatten())?;
        check_manager(conn, &user, data.tu_id.flatten(), Role::Tu)?;
        check_manager(conn, &user, data.rd_id.flatten(), Role::Rd)?;

        if data.is_empty() {
            return load_store(conn, store_id)
        }
        Ok(diesel::update(stores::table.find(store_id))
            .set(&data)
            .get_result::<Store>(conn)?)
    }).await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "Store updated", "store": res })))
}

pub async fn delete_store(ctx: web::Data<AppData>, identity: Option<Identity>, path: web::Path<IdType>) -> ServiceResult<HttpResponse> {
    use crate::schema::sensors;

    let store_id = path.into_inner();

    with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Stores, Action::Delete)?;
        user.ensure_store_visible(conn, store_id)?;

        conn.transaction::<_, ServiceError, _>(|conn| {
            diesel::update(sensors::table.filter(sensors::store_id.eq(store_id)))
                .set(sensors::store_id.eq(None::<IdType>))
                .execute(conn)?;

            let deleted = diesel::delete(stores::table.find(store_id)).execute(conn)?;
            if deleted == 0 {
                Err(ServiceError::NotFound("Store".to_string()))
            } else {
                Ok(())
            }
        })
    }).await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "Store deleted" })))
}

pub async fn store_sensors(ctx: web::Data<AppData>, identity: Option<Identity>, path: web::Path<IdType>) -> ServiceResult<HttpResponse> {
    use crate::schema::sensors::dsl::*;

    let store = path.into_inner();

    let res = with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Stores, Action::Read)?;
        user.ensure_store_visible(conn, store)?;
        load_store(conn, store)?;

        let mut query = sensors.filter(store_id.eq(store)).into_boxed();
        if let Some(ids) = user.scope(conn)?.sensor_ids() {
            query = query.filter(id.eq_any(ids));
        }
        Ok(query.order(name.asc()).load::<Sensor>(conn)?)
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

pub async fn attach_sensor(ctx: web::Data<AppData>, identity: Option<Identity>, path: web::Path<(IdType, IdType)>) -> ServiceResult<HttpResponse> {
    use crate::schema::sensors::dsl::*;

    let (store, sensor) = path.into_inner();

    with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Stores, Action::Assign)?;
        user.ensure_store_visible(conn, store)?;
        user.ensure_sensor_visible(conn, sensor)?;
        load_store(conn, store)?;
        load_sensor(conn, sensor)?;

        diesel::update(sensors.find(sensor))
            .set(store_id.eq(Some(store)))
            .execute(conn)?;
        Ok(())
    }).await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "Sensor attached to store" })))
}

pub async fn detach_sensor(ctx: web::Data<AppData>, identity: Option<Identity>, path: web::Path<(IdType, IdType)>) -> ServiceResult<HttpResponse> {
    use crate::schema::sensors::dsl::*;

    let (store, sensor) = path.into_inner();

    with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Stores, Action::Assign)?;
        user.ensure_store_visible(conn, store)?;
        user.ensure_sensor_visible(conn, sensor)?;

        let detached = diesel::update(sensors.find(sensor).filter(store_id.eq(store)))
            .set(store_id.eq(None::<IdType>))
            .execute(conn)?;
        if detached == 0 {
            Err(ServiceError::NotFound("Sensor in store".to_string()))
        } else {
            Ok(())
        }
    }).await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "Sensor detached from store" })))
}
