use chrono::{Duration, NaiveDateTime};
use diesel::prelude::*;
use diesel::SqliteConnection;
use log::{info, warn};

use crate::models::{IdType, Sensor, SensorStatus};

#[derive(Debug, Queryable)]
struct SensorSeenData {
    id: IdType,
    device_id: String,
    last_seen: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
}

/// Loads the active sensors that have not reported anything since `cutoff`.
/// Sensors that never reported are judged by their creation time.
fn load_silent_sensors(conn: &mut SqliteConnection, cutoff: NaiveDateTime) -> QueryResult<Vec<SensorSeenData>> {
    use crate::schema::sensors::dsl::*;

    sensors
        .filter(status.eq(SensorStatus::Active.as_str()))
        .filter(last_seen.lt(cutoff).or(last_seen.is_null().and(created_at.lt(cutoff))))
        .select((id, device_id, last_seen, created_at))
        .load::<SensorSeenData>(conn)
}

/// Main function, marks as offline every active sensor silent for longer than `threshold`.
///
/// Every sensor that goes offline gets a new downtime interval, started at the moment of its
/// last report (so that the silence before the check is accounted for).
/// Returns the ids of the sensors that went offline.
pub fn mark_offline_sensors(conn: &mut SqliteConnection, now: NaiveDateTime, threshold: Duration) -> QueryResult<Vec<IdType>> {
    use crate::schema::sensor_downtime::dsl as downtime_dsl;
    use crate::schema::sensors::dsl as sensor_dsl;

    conn.transaction(|conn| {
        let silent = load_silent_sensors(conn, now - threshold)?;

        for sensor in silent.iter() {
            warn!("sensor {} ({}) went offline", sensor.id, sensor.device_id);

            diesel::update(sensor_dsl::sensors.find(sensor.id))
                .set(sensor_dsl::status.eq(SensorStatus::Offline.as_str()))
                .execute(conn)?;

            diesel::insert_into(downtime_dsl::sensor_downtime)
                .values((
                    downtime_dsl::sensor_id.eq(sensor.id),
                    downtime_dsl::started_at.eq(sensor.last_seen.unwrap_or(sensor.created_at)),
                ))
                .execute(conn)?;
        }

        Ok(silent.into_iter().map(|x| x.id).collect())
    })
}

/// Closes every open downtime interval of a sensor.
pub fn close_downtime(conn: &mut SqliteConnection, sensor: IdType, now: NaiveDateTime) -> QueryResult<usize> {
    use crate::schema::sensor_downtime::dsl::*;

    diesel::update(sensor_downtime.filter(sensor_id.eq(sensor)).filter(ended_at.is_null()))
        .set(ended_at.eq(Some(now)))
        .execute(conn)
}

/// Called on every report of a sensor.
/// An offline sensor comes back active and its downtime ends, returns true in that case.
pub fn record_heartbeat(conn: &mut SqliteConnection, sensor: &Sensor, now: NaiveDateTime) -> QueryResult<bool> {
    use crate::schema::sensors::dsl::*;

    if sensor.get_status() != SensorStatus::Offline {
        return Ok(false)
    }

    info!("sensor {} ({}) is back online", sensor.id, sensor.device_id);
    diesel::update(sensors.find(sensor.id))
        .set(status.eq(SensorStatus::Active.as_str()))
        .execute(conn)?;
    close_downtime(conn, sensor.id, now)?;

    Ok(true)
}
