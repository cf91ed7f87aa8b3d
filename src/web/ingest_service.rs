use actix_web::{Either, HttpResponse, web};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::SqliteConnection;
use log::{debug, info};
use serde::Deserialize;
use serde_json::json;

use crate::AppData;
use crate::downtime::controller::record_heartbeat;
use crate::models::{IdType, Sensor, SensorStatus};
use crate::schema::sensors;

use super::with_connection;
use super::errors::{ServiceError, ServiceResult};

/// What a counting device sends, as JSON or as a form.
#[derive(Debug, Clone, Deserialize)]
pub struct VisitorReport {
    pub device_id: Option<String>,
    pub visitor_count: Option<i32>,
    pub status: Option<String>,
    pub location: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = sensors)]
struct SensorReportDb {
    visitor_count: i32,
    last_seen: Option<NaiveDateTime>,
    location: Option<String>,
    status: Option<String>,
}

/// Stores a report, creating the sensor on its first one.
/// `visitor_count` is the number of visitors since the previous report of the device.
pub fn record_report(conn: &mut SqliteConnection, report: VisitorReport, now: NaiveDateTime) -> ServiceResult<IdType> {
    use crate::schema::sensors::dsl;
    use crate::schema::visitor_data;

    let (device_id, count) = match (report.device_id, report.visitor_count) {
        (Some(d), Some(c)) if !d.trim().is_empty() => (d.trim().to_string(), c),
        _ => return Err(ServiceError::missing_fields()),
    };
    if count < 0 {
        return Err(ServiceError::BadRequest("visitor_count cannot be negative".to_string()))
    }
    let status = match report.status.as_deref() {
        None => None,
        Some(x) => match SensorStatus::from_name(x) {
            Some(SensorStatus::Offline) | None => return Err(ServiceError::BadRequest(format!("Unknown status: {}", x))),
            Some(s) => Some(s),
        },
    };
    let location = report.location.filter(|x| !x.is_empty());

    conn.transaction::<_, ServiceError, _>(|conn| {
        let existing = dsl::sensors
            .filter(dsl::device_id.eq(&device_id))
            .first::<Sensor>(conn)
            .optional()?;

        let sensor_id = match existing {
            None => {
                info!("new sensor {} registered", device_id);
                diesel::insert_into(dsl::sensors)
                    .values((
                        dsl::device_id.eq(&device_id),
                        dsl::name.eq(&device_id),
                        dsl::location.eq(location.unwrap_or_default()),
                        dsl::status.eq(status.unwrap_or(SensorStatus::Active).as_str()),
                        dsl::visitor_count.eq(count),
                        dsl::last_seen.eq(Some(now)),
                        dsl::created_at.eq(now),
                    ))
                    .returning(dsl::id)
                    .get_result::<IdType>(conn)?
            },
            Some(sensor) => {
                record_heartbeat(conn, &sensor, now)?;

                diesel::update(dsl::sensors.find(sensor.id))
                    .set(&SensorReportDb {
                        visitor_count: count,
                        last_seen: Some(now),
                        location,
                        status: status.map(|x| x.as_str().to_string()),
                    })
                    .execute(conn)?;
                sensor.id
            },
        };

        diesel::insert_into(visitor_data::table)
            .values((
                visitor_data::sensor_id.eq(sensor_id),
                visitor_data::visitor_count.eq(count),
                visitor_data::recorded_at.eq(now),
            ))
            .execute(conn)?;

        debug!("sensor {} reported {} visitors", device_id, count);
        Ok(sensor_id)
    })
}

pub async fn visitor_count(
    ctx: web::Data<AppData>,
    data: Either<web::Json<VisitorReport>, web::Form<VisitorReport>>
) -> ServiceResult<HttpResponse> {
    let report = match data {
        Either::Left(x) => x.into_inner(),
        Either::Right(x) => x.into_inner(),
    };

    let sensor_id = with_connection(&ctx, move |_ctx, conn| {
        record_report(conn, report, Utc::now().naive_utc())
    }).await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Data received",
        "sensor_id": sensor_id,
    })))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::downtime::controller::mark_offline_sensors;
    use crate::models::{Downtime, VisitorRecord};
    use crate::test_util::memory_connection;

    fn report(device: &str, count: i32) -> VisitorReport {
        VisitorReport {
            device_id: Some(device.to_string()),
            visitor_count: Some(count),
            status: None,
            location: None,
        }
    }

    #[test]
    fn reports_upsert_by_device() {
        let conn = &mut memory_connection();
        let now = Utc::now().naive_utc();

        let first = record_report(conn, VisitorReport {
            location: Some("Entrance".to_string()),
            ..report("arduino-1", 4)
        }, now).unwrap();
        let second = record_report(conn, report("arduino-1", 6), now + Duration::minutes(1)).unwrap();
        assert_eq!(first, second);

        let sensor = sensors::table.find(first).first::<Sensor>(conn).unwrap();
        assert_eq!(sensor.visitor_count, 6);
        assert_eq!(sensor.location, "Entrance");
        assert_eq!(sensor.last_seen, Some(now + Duration::minutes(1)));

        let records = crate::schema::visitor_data::table.load::<VisitorRecord>(conn).unwrap();
        assert_eq!(records.iter().map(|x| x.visitor_count).sum::<i32>(), 10);
        let count: i64 = sensors::table.count().get_result(conn).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn invalid_reports() {
        let conn = &mut memory_connection();
        let now = Utc::now().naive_utc();

        assert!(matches!(record_report(conn, VisitorReport { device_id: None, ..report("x", 1) }, now), Err(ServiceError::BadRequest(_))));
        assert!(matches!(record_report(conn, report("x", -1), now), Err(ServiceError::BadRequest(_))));
        assert!(matches!(record_report(conn, VisitorReport { status: Some("broken".to_string()), ..report("x", 1) }, now), Err(ServiceError::BadRequest(_))));
    }

    #[test]
    fn report_ends_downtime() {
        use crate::schema::sensor_downtime;

        let conn = &mut memory_connection();
        let now = Utc::now().naive_utc();
        let id = record_report(conn, report("arduino-2", 1), now - Duration::hours(5)).unwrap();

        assert_eq!(mark_offline_sensors(conn, now, Duration::hours(2)).unwrap(), vec![id]);
        record_report(conn, report("arduino-2", 3), now).unwrap();

        let sensor = sensors::table.find(id).first::<Sensor>(conn).unwrap();
        assert_eq!(sensor.get_status(), SensorStatus::Active);
        let downtimes = sensor_downtime::table.load::<Downtime>(conn).unwrap();
        assert_eq!(downtimes.len(), 1);
        assert_eq!(downtimes[0].started_at, now - Duration::hours(5));
        assert_eq!(downtimes[0].ended_at, Some(now));
    }
}
