use std::collections::HashMap;

use actix_identity::Identity;
use actix_web::{HttpResponse, web};
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::SqliteConnection;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppData;
use crate::models::{IdType, Sensor, SensorStatus, Store, User};
use crate::permissions::{Action, Resource};
use crate::security::PermissionCheckable;
use crate::stats::{self, CountSample, Granularity, Period};

use super::with_user;
use super::errors::{ServiceError, ServiceResult};

#[derive(Debug, Deserialize)]
pub struct SensorDataQuery {
    #[serde(default)]
    period: Period,
    store_id: Option<IdType>,
    sensor_id: Option<IdType>,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    #[serde(default)]
    granularity: Granularity,
    from: Option<String>,
    to: Option<String>,
    store_id: Option<IdType>,
    sensor_id: Option<IdType>,
}

#[derive(Debug, Deserialize)]
pub struct PeaksQuery {
    days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SensorActivity {
    #[serde(flatten)]
    sensor: Sensor,
    current_visitors: i64,
}

#[derive(Debug, Serialize)]
pub struct MapStore {
    id: IdType,
    name: String,
    address: String,
    latitude: f64,
    longitude: f64,
    sensor_count: usize,
    visitors_today: i64,
}

const PEAK_COUNT: usize = 3;
const DEFAULT_STATISTICS_DAYS: i64 = 30;

fn invalid_date(value: &str) -> ServiceError {
    ServiceError::BadRequest(format!("Invalid date: {}", value))
}

fn parse_date_time(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

fn parse_day(value: &str) -> ServiceResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| invalid_date(value))
}

/// Start of a queried range, `YYYY-MM-DD` or a full ISO date time.
/// Plain dates start at midnight.
pub fn parse_range_start(value: &str) -> ServiceResult<NaiveDateTime> {
    if let Some(x) = parse_date_time(value) {
        return Ok(x)
    }
    parse_day(value)?.and_hms_opt(0, 0, 0).ok_or_else(|| invalid_date(value))
}

/// Upper end of a queried range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeEnd {
    /// An explicit instant, included.
    Through(NaiveDateTime),
    /// The midnight after a plain date, excluded.
    Before(NaiveDateTime),
}

impl RangeEnd {
    /// Plain dates cover their whole day, fractions of the last second included.
    pub fn parse(value: &str) -> ServiceResult<RangeEnd> {
        if let Some(x) = parse_date_time(value) {
            return Ok(RangeEnd::Through(x))
        }
        parse_day(value)?
            .succ_opt()
            .and_then(|x| x.and_hms_opt(0, 0, 0))
            .map(RangeEnd::Before)
            .ok_or_else(|| invalid_date(value))
    }

    pub fn instant(&self) -> NaiveDateTime {
        match self {
            RangeEnd::Through(x) | RangeEnd::Before(x) => *x,
        }
    }

    pub fn admits(&self, at: NaiveDateTime) -> bool {
        match self {
            RangeEnd::Through(x) => at <= *x,
            RangeEnd::Before(x) => at < *x,
        }
    }
}

/// Sensors a request aggregates over, `None` meaning every sensor.
/// Filters outside of the user scope answer as missing.
pub fn selected_sensors(conn: &mut SqliteConnection, user: &User, store: Option<IdType>, sensor: Option<IdType>) -> ServiceResult<Option<Vec<IdType>>> {
    use crate::schema::sensors::dsl::*;

    let scope = user.scope(conn)?;
    let mut selected = scope.sensor_ids();

    if let Some(store) = store {
        if !scope.sees_store(store) {
            return Err(ServiceError::NotFound("Store".to_string()))
        }
        let in_store: Vec<IdType> = sensors
            .filter(store_id.eq(store))
            .select(id)
            .load(conn)?;
        selected = Some(match selected {
            None => in_store,
            Some(visible) => in_store.into_iter().filter(|x| visible.contains(x)).collect(),
        });
    }

    if let Some(sensor) = sensor {
        if !scope.sees_sensor(sensor) {
            return Err(ServiceError::NotFound("Sensor".to_string()))
        }
        selected = Some(match selected {
            None => vec![sensor],
            Some(v) => v.into_iter().filter(|x| *x == sensor).collect(),
        });
    }

    Ok(selected)
}

pub fn load_samples(
    conn: &mut SqliteConnection,
    selected: Option<Vec<IdType>>,
    from: NaiveDateTime,
    to: Option<RangeEnd>
) -> QueryResult<Vec<CountSample>> {
    use crate::schema::visitor_data::dsl::*;

    let mut query = visitor_data
        .select((sensor_id, visitor_count, recorded_at))
        .filter(recorded_at.ge(from))
        .into_boxed();
    match to {
        Some(RangeEnd::Through(x)) => query = query.filter(recorded_at.le(x)),
        Some(RangeEnd::Before(x)) => query = query.filter(recorded_at.lt(x)),
        None => {},
    }
    if let Some(ids) = selected {
        query = query.filter(sensor_id.eq_any(ids));
    }

    let rows = query.order(recorded_at.asc()).load::<(IdType, i32, NaiveDateTime)>(conn)?;
    Ok(rows.into_iter().map(CountSample::from).collect())
}

/// Dashboard summary over the last period.
pub async fn sensor_data(ctx: web::Data<AppData>, identity: Option<Identity>, query: web::Query<SensorDataQuery>) -> ServiceResult<HttpResponse> {
    use crate::schema::sensors::dsl::*;

    let query = query.into_inner();
    let period = query.period;

    let res = with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Sensors, Action::Read)?;
        let selected = selected_sensors(conn, &user, query.store_id, query.sensor_id)?;

        let mut sensor_query = sensors.into_boxed();
        if let Some(ref ids) = selected {
            sensor_query = sensor_query.filter(id.eq_any(ids.clone()));
        }
        let found = sensor_query.order(id.asc()).load::<Sensor>(conn)?;

        let samples = load_samples(conn, selected, period.window_start(Utc::now().naive_utc()), None)?;

        let mut per_sensor: HashMap<IdType, i64> = HashMap::new();
        for sample in samples.iter() {
            *per_sensor.entry(sample.sensor_id).or_insert(0) += sample.visitors;
        }
        let active = found.iter().filter(|x| x.get_status() == SensorStatus::Active).count();

        Ok(json!({
            "period": period,
            "total_visitors": stats::total_visitors(&samples),
            "total_records": samples.len(),
            "active_sensors": active,
            "hourly_data": stats::hour_of_day_totals(&samples),
            "peak_hour": stats::peak_hour(&samples),
            "sensors": found.into_iter()
                .map(|x| SensorActivity {
                    current_visitors: per_sensor.get(&x.id).copied().unwrap_or(0),
                    sensor: x,
                })
                .collect::<Vec<_>>(),
        }))
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

pub async fn statistics(ctx: web::Data<AppData>, identity: Option<Identity>, query: web::Query<StatisticsQuery>) -> ServiceResult<HttpResponse> {
    let query = query.into_inner();

    let now = Utc::now().naive_utc();
    let from = match query.from {
        Some(ref x) => parse_range_start(x)?,
        None => now - Duration::days(DEFAULT_STATISTICS_DAYS),
    };
    let to = match query.to {
        Some(ref x) => RangeEnd::parse(x)?,
        None => RangeEnd::Through(now),
    };
    if !to.admits(from) {
        return Err(ServiceError::BadRequest("from must precede to".to_string()))
    }
    let granularity = query.granularity;

    let res = with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Reports, Action::Read)?;
        let selected = selected_sensors(conn, &user, query.store_id, query.sensor_id)?;
        let samples = load_samples(conn, selected, from, Some(to))?;

        Ok(json!({
            "granularity": granularity,
            "from": from,
            "to": to.instant(),
            "total_visitors": stats::total_visitors(&samples),
            "buckets": stats::bucket_counts(&samples, granularity),
        }))
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

pub async fn peaks(ctx: web::Data<AppData>, identity: Option<Identity>, query: web::Query<PeaksQuery>) -> ServiceResult<HttpResponse> {
    let days = query.days.unwrap_or(DEFAULT_STATISTICS_DAYS).clamp(1, 365);

    let res = with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Reports, Action::Read)?;
        let selected = selected_sensors(conn, &user, None, None)?;
        let samples = load_samples(conn, selected, Utc::now().naive_utc() - Duration::days(days), None)?;

        Ok(json!({
            "days": days,
            "peak_hours": stats::peak_hours(&samples, PEAK_COUNT),
            "peak_weekdays": stats::peak_weekdays(&samples, PEAK_COUNT),
        }))
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

/// Stores that can be placed on a map, with today's visitors.
pub async fn map_data(ctx: web::Data<AppData>, identity: Option<Identity>) -> ServiceResult<HttpResponse> {
    use crate::schema::sensors::dsl as sensor_dsl;
    use crate::schema::stores::dsl as store_dsl;

    let res = with_user(&ctx, identity, |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Stores, Action::Read)?;

        let mut query = store_dsl::stores
            .filter(store_dsl::latitude.is_not_null())
            .filter(store_dsl::longitude.is_not_null())
            .into_boxed();
        if let Some(ids) = user.scope(conn)?.store_ids() {
            query = query.filter(store_dsl::id.eq_any(ids));
        }
        let found = query.order(store_dsl::name.asc()).load::<Store>(conn)?;

        let store_ids: Vec<IdType> = found.iter().map(|x| x.id).collect();
        let placement: HashMap<IdType, IdType> = sensor_dsl::sensors
            .filter(sensor_dsl::store_id.eq_any(store_ids))
            .select((sensor_dsl::id, sensor_dsl::store_id))
            .load::<(IdType, Option<IdType>)>(conn)?
            .into_iter()
            .filter_map(|(sensor, store)| store.map(|x| (sensor, x)))
            .collect();

        let midnight = Utc::now().date_naive().and_hms_opt(0, 0, 0)
            .ok_or_else(|| ServiceError::InternalServerError("Invalid midnight".to_string()))?;
        let samples = load_samples(conn, Some(placement.keys().copied().collect()), midnight, None)?;

        let mut visitors: HashMap<IdType, i64> = HashMap::new();
        for sample in samples {
            if let Some(store) = placement.get(&sample.sensor_id) {
                *visitors.entry(*store).or_insert(0) += sample.visitors;
            }
        }

        Ok(found.into_iter()
            .filter_map(|x| Some(MapStore {
                sensor_count: placement.values().filter(|s| **s == x.id).count(),
                visitors_today: visitors.get(&x.id).copied().unwrap_or(0),
                latitude: x.latitude?,
                longitude: x.longitude?,
                id: x.id,
                name: x.name,
                address: x.address,
            }))
            .collect::<Vec<_>>())
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_bounds() {
        let start = parse_range_start("2024-07-01").unwrap();
        assert_eq!(start.to_string(), "2024-07-01 00:00:00");
        assert_eq!(parse_range_start("2024-07-01T10:15:00").unwrap().to_string(), "2024-07-01 10:15:00");

        let end = RangeEnd::parse("2024-07-01").unwrap();
        assert_eq!(end.instant().to_string(), "2024-07-02 00:00:00");
        let last_moment = NaiveDateTime::parse_from_str("2024-07-01 23:59:59.500", "%Y-%m-%d %H:%M:%S%.f").unwrap();
        assert!(end.admits(last_moment));
        assert!(!end.admits(end.instant()));
        assert!(end.admits(start));

        let exact = RangeEnd::parse("2024-07-01T10:15:00").unwrap();
        assert_eq!(exact, RangeEnd::Through(NaiveDateTime::parse_from_str("2024-07-01 10:15:00", "%Y-%m-%d %H:%M:%S").unwrap()));
        assert!(exact.admits(exact.instant()));

        assert!(matches!(parse_range_start("yesterday"), Err(ServiceError::BadRequest(_))));
        assert!(matches!(RangeEnd::parse("2024-13-01"), Err(ServiceError::BadRequest(_))));
    }
}
