use actix_identity::Identity;
use actix_web::{HttpResponse, web};
use chrono::Utc;
use diesel::prelude::*;
use diesel::SqliteConnection;
use serde::Deserialize;
use serde_json::json;

use crate::AppData;
use crate::downtime::controller::close_downtime;
use crate::models::{Downtime, IdType, Role, Sensor, SensorStatus, UserSensor};
use crate::permissions::{Action, Resource};
use crate::schema::sensors;
use crate::security::PermissionCheckable;
use crate::stats::{downtime_summary, Period};

use super::{double_option, with_user};
use super::errors::{ServiceError, ServiceResult};

#[derive(Debug, Deserialize)]
pub struct NewSensorData {
    device_id: Option<String>,
    name: Option<String>,
    location: Option<String>,
    status: Option<String>,
    store_id: Option<IdType>,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = sensors)]
pub struct SensorUpdateData {
    name: Option<String>,
    location: Option<String>,
    status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    store_id: Option<Option<IdType>>,
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    #[serde(default)]
    period: Period,
}

/// `offline` is only ever set by the downtime checks.
fn parse_status(name: &str) -> ServiceResult<SensorStatus> {
    match SensorStatus::from_name(name) {
        Some(SensorStatus::Offline) => Err(ServiceError::BadRequest("The offline status cannot be set by hand".to_string())),
        Some(x) => Ok(x),
        None => Err(ServiceError::BadRequest(format!("Unknown status: {}", name))),
    }
}

pub fn load_sensor(conn: &mut SqliteConnection, sensor: IdType) -> ServiceResult<Sensor> {
    sensors::table.find(sensor)
        .first::<Sensor>(conn)
        .optional()?
        .ok_or_else(|| ServiceError::NotFound("Sensor".to_string()))
}

pub async fn list_sensors(ctx: web::Data<AppData>, identity: Option<Identity>) -> ServiceResult<HttpResponse> {
    use crate::schema::sensors::dsl::*;

    let res = with_user(&ctx, identity, |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Sensors, Action::Read)?;

        let mut query = sensors.into_boxed();
        if let Some(ids) = user.scope(conn)?.sensor_ids() {
            query = query.filter(id.eq_any(ids));
        }
        Ok(query.order(id.asc()).load::<Sensor>(conn)?)
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

pub async fn create_sensor(ctx: web::Data<AppData>, identity: Option<Identity>, data: web::Json<NewSensorData>) -> ServiceResult<HttpResponse> {
    use crate::schema::sensors::dsl;
    use crate::schema::user_sensors;

    let data = data.into_inner();

    let created_id = with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Sensors, Action::Create)?;

        let (device_id, name) = match (data.device_id, data.name) {
            (Some(d), Some(n)) if !d.trim().is_empty() && !n.trim().is_empty() => (d.trim().to_string(), n),
            _ => return Err(ServiceError::missing_fields()),
        };
        let status = data.status.as_deref().map(parse_status).transpose()?.unwrap_or(SensorStatus::Active);
        if let Some(store) = data.store_id {
            user.ensure_store_visible(conn, store)?;
        }

        conn.transaction::<_, ServiceError, _>(|conn| {
            let res = diesel::insert_into(dsl::sensors)
                .values((
                    dsl::device_id.eq(device_id),
                    dsl::name.eq(name),
                    dsl::location.eq(data.location.unwrap_or_default()),
                    dsl::status.eq(status.as_str()),
                    dsl::store_id.eq(data.store_id),
                    dsl::created_at.eq(Utc::now().naive_utc()),
                ))
                .returning(dsl::id)
                .get_result::<IdType>(conn);

            let created = match res {
                Err(diesel::result::Error::DatabaseError(diesel::result::DatabaseErrorKind::UniqueViolation, _)) => {
                    return Err(ServiceError::AlreadyPresent("Device id".to_string()))
                },
                x => x?,
            };

            // Without an assignment the creator would lose sight of the sensor
            if user.get_role() != Role::Admin {
                diesel::insert_into(user_sensors::table)
                    .values(UserSensor { user_id: user.id, sensor_id: created })
                    .execute(conn)?;
            }
            Ok(created)
        })
    }).await?;

    Ok(HttpResponse::Created().json(json!({ "message": "Sensor created", "id": created_id })))
}

pub async fn get_sensor(ctx: web::Data<AppData>, identity: Option<Identity>, path: web::Path<IdType>) -> ServiceResult<HttpResponse> {
    let sensor_id = path.into_inner();

    let res = with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Sensors, Action::Read)?;
        user.ensure_sensor_visible(conn, sensor_id)?;
        load_sensor(conn, sensor_id)
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

pub async fn update_sensor(
    ctx: web::Data<AppData>,
    identity: Option<Identity>,
    path: web::Path<IdType>,
    data: web::Json<SensorUpdateData>
) -> ServiceResult<HttpResponse> {
    let sensor_id = path.into_inner();
    let data = data.into_inner();

    let res = with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Sensors, Action::Update)?;
        user.ensure_sensor_visible(conn, sensor_id)?;

        let new_status = data.status.as_deref().map(parse_status).transpose()?;
        if let Some(Some(store)) = data.store_id {
            user.ensure_store_visible(conn, store)?;
        }
        if data.name.as_ref().map(|x| x.trim().is_empty()).unwrap_or(false) {
            return Err(ServiceError::missing_fields())
        }

        conn.transaction::<_, ServiceError, _>(|conn| {
            let old = load_sensor(conn, sensor_id)?;
            if data.name.is_none() && data.location.is_none() && data.status.is_none() && data.store_id.is_none() {
                return Ok(old)
            }

            let updated = diesel::update(sensors::table.find(sensor_id))
                .set(&data)
                .get_result::<Sensor>(conn)?;

            // Leaving the offline state by hand ends the downtime as well
            if old.get_status() == SensorStatus::Offline && new_status.is_some() {
                close_downtime(conn, sensor_id, Utc::now().naive_utc())?;
            }
            Ok(updated)
        })
    }).await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "Sensor updated", "sensor": res })))
}

pub async fn delete_sensor(ctx: web::Data<AppData>, identity: Option<Identity>, path: web::Path<IdType>) -> ServiceResult<HttpResponse> {
    use crate::schema::{sensor_downtime, user_sensors, visitor_data};

    let sensor_id = path.into_inner();

    with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Sensors, Action::Delete)?;
        user.ensure_sensor_visible(conn, sensor_id)?;

        conn.transaction::<_, ServiceError, _>(|conn| {
            diesel::delete(visitor_data::table.filter(visitor_data::sensor_id.eq(sensor_id))).execute(conn)?;
            diesel::delete(user_sensors::table.filter(user_sensors::sensor_id.eq(sensor_id))).execute(conn)?;
            diesel::delete(sensor_downtime::table.filter(sensor_downtime::sensor_id.eq(sensor_id))).execute(conn)?;

            let deleted = diesel::delete(sensors::table.find(sensor_id)).execute(conn)?;
            if deleted == 0 {
                Err(ServiceError::NotFound("Sensor".to_string()))
            } else {
                Ok(())
            }
        })
    }).await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "Sensor deleted" })))
}

pub async fn sensor_downtime(
    ctx: web::Data<AppData>,
    identity: Option<Identity>,
    path: web::Path<IdType>,
    query: web::Query<PeriodQuery>
) -> ServiceResult<HttpResponse> {
    use crate::schema::sensor_downtime::dsl;

    let sensor_id = path.into_inner();
    let period = query.period;

    let (sensor, summary) = with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Sensors, Action::Read)?;
        user.ensure_sensor_visible(conn, sensor_id)?;
        let sensor = load_sensor(conn, sensor_id)?;

        let now = Utc::now().naive_utc();
        let window_start = period.window_start(now);

        let downtimes = dsl::sensor_downtime
            .filter(dsl::sensor_id.eq(sensor_id))
            .filter(dsl::ended_at.is_null().or(dsl::ended_at.ge(window_start)))
            .order(dsl::started_at.asc())
            .load::<Downtime>(conn)?;

        Ok((sensor, downtime_summary(&downtimes, window_start, now)))
    }).await?;

    Ok(HttpResponse::Ok().json(json!({
        "sensor_id": sensor.id,
        "status": sensor.status,
        "last_seen": sensor.last_seen,
        "period": period,
        "downtime": summary,
    })))
}
