use actix_files::NamedFile;
use actix_identity::Identity;
use actix_web::{HttpResponse, web};
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::SqliteConnection;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppData;
use crate::export::{self, ExportFormat, ExportRow};
use crate::models::IdType;
use crate::permissions::{Action, Resource};
use crate::security::PermissionCheckable;

use super::with_user;
use super::errors::{ServiceError, ServiceResult};
use super::stats_service::{parse_range_start, RangeEnd};

#[derive(Debug, Deserialize)]
pub struct ReportsQuery {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    format: ExportFormat,
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Serialize, Queryable)]
pub struct ReportEntry {
    id: IdType,
    sensor_id: IdType,
    sensor_name: String,
    location: String,
    visitor_count: i32,
    recorded_at: NaiveDateTime,
}

const DEFAULT_REPORT_LIMIT: i64 = 100;
const MAX_REPORT_LIMIT: i64 = 1000;

/// Records joined with their sensor, newest first.
fn load_entries(
    conn: &mut SqliteConnection,
    sensors: Option<Vec<IdType>>,
    from: Option<NaiveDateTime>,
    to: Option<RangeEnd>,
    limit: Option<i64>
) -> QueryResult<Vec<ReportEntry>> {
    use crate::schema::sensors::dsl as sensor_dsl;
    use crate::schema::visitor_data::dsl;

    let mut query = dsl::visitor_data
        .inner_join(sensor_dsl::sensors)
        .select((dsl::id, dsl::sensor_id, sensor_dsl::name, sensor_dsl::location, dsl::visitor_count, dsl::recorded_at))
        .into_boxed();
    if let Some(ids) = sensors {
        query = query.filter(dsl::sensor_id.eq_any(ids));
    }
    if let Some(from) = from {
        query = query.filter(dsl::recorded_at.ge(from));
    }
    match to {
        Some(RangeEnd::Through(x)) => query = query.filter(dsl::recorded_at.le(x)),
        Some(RangeEnd::Before(x)) => query = query.filter(dsl::recorded_at.lt(x)),
        None => {},
    }
    if let Some(limit) = limit {
        query = query.limit(limit);
    }

    query.order((dsl::recorded_at.desc(), dsl::id.desc())).load::<ReportEntry>(conn)
}

pub async fn reports(ctx: web::Data<AppData>, identity: Option<Identity>, query: web::Query<ReportsQuery>) -> ServiceResult<HttpResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_REPORT_LIMIT).clamp(1, MAX_REPORT_LIMIT);

    let res = with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Reports, Action::Read)?;
        let visible = user.scope(conn)?.sensor_ids();
        Ok(load_entries(conn, visible, None, None, Some(limit))?)
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

pub async fn export(ctx: web::Data<AppData>, identity: Option<Identity>, data: web::Json<ExportRequest>) -> ServiceResult<HttpResponse> {
    let data = data.into_inner();
    let from = data.start_date.as_deref().filter(|x| !x.is_empty()).map(parse_range_start).transpose()?;
    let to = data.end_date.as_deref().filter(|x| !x.is_empty()).map(RangeEnd::parse).transpose()?;
    let format = data.format;

    let filename = with_user(&ctx, identity, move |ctx, conn, user| {
        user.ensure_permission(conn, Resource::Reports, Action::Export)?;
        let visible = user.scope(conn)?.sensor_ids();

        let mut entries = load_entries(conn, visible, from, to, None)?;
        entries.reverse();
        let rows: Vec<ExportRow> = entries.into_iter()
            .map(|x| ExportRow {
                sensor_name: x.sensor_name,
                location: x.location,
                visitor_count: x.visitor_count,
                recorded_at: x.recorded_at,
            })
            .collect();

        let name = export::write_export(&ctx.config.export_dir, &rows, format)?;
        info!("{} exported {} rows to {}", user.username, rows.len(), name);
        Ok(name)
    }).await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Report exported",
        "filename": filename,
        "format": format,
    })))
}

pub async fn download(ctx: web::Data<AppData>, identity: Option<Identity>, path: web::Path<String>) -> ServiceResult<NamedFile> {
    let filename = path.into_inner();
    if !export::is_safe_file_name(&filename) {
        return Err(ServiceError::BadRequest("Invalid file name".to_string()))
    }

    let file_path = with_user(&ctx, identity, move |ctx, conn, user| {
        user.ensure_permission(conn, Resource::Reports, Action::Export)?;
        Ok(ctx.config.export_dir.join(&filename))
    }).await?;

    if !file_path.is_file() {
        return Err(ServiceError::NotFound("Export".to_string()))
    }
    let file = NamedFile::open(&file_path)?;

    let name = file.path().file_name()
        .map(|x| x.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(file.set_content_disposition(ContentDisposition {
        disposition: DispositionType::Attachment,
        parameters: vec![DispositionParam::Filename(name)],
    }))
}
