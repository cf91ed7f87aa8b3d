use actix_identity::Identity;
use actix_web::{HttpResponse, web};
use diesel::prelude::*;
use diesel::SqliteConnection;
use serde::Deserialize;

use crate::AppData;
use crate::models::{IdType, UserSettings};

use super::with_user;
use super::errors::{ServiceError, ServiceResult};

#[derive(Debug, Deserialize)]
pub struct SettingsUpdate {
    theme: Option<String>,
    lang: Option<String>,
    email_notify: Option<bool>,
    push_notify: Option<bool>,
}

const THEMES: &[&str] = &["dark", "light"];
const LANGUAGES: &[&str] = &["ru", "en"];

fn load_settings(conn: &mut SqliteConnection, user: IdType) -> QueryResult<UserSettings> {
    use crate::schema::user_settings::dsl::*;

    Ok(user_settings.find(user)
        .first::<UserSettings>(conn)
        .optional()?
        .unwrap_or_else(|| UserSettings::defaults_for(user)))
}

pub async fn get_settings(ctx: web::Data<AppData>, identity: Option<Identity>) -> ServiceResult<HttpResponse> {
    let res = with_user(&ctx, identity, |_ctx, conn, user| {
        Ok(load_settings(conn, user.id)?)
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

pub async fn update_settings(ctx: web::Data<AppData>, identity: Option<Identity>, data: web::Json<SettingsUpdate>) -> ServiceResult<HttpResponse> {
    use crate::schema::user_settings::dsl::*;

    let data = data.into_inner();
    if let Some(ref x) = data.theme {
        if !THEMES.contains(&x.as_str()) {
            return Err(ServiceError::BadRequest(format!("Unknown theme: {}", x)))
        }
    }
    if let Some(ref x) = data.lang {
        if !LANGUAGES.contains(&x.as_str()) {
            return Err(ServiceError::BadRequest(format!("Unknown language: {}", x)))
        }
    }

    let res = with_user(&ctx, identity, move |_ctx, conn, user| {
        let mut settings = load_settings(conn, user.id)?;
        if let Some(x) = data.theme {
            settings.theme = x;
        }
        if let Some(x) = data.lang {
            settings.lang = x;
        }
        if let Some(x) = data.email_notify {
            settings.email_notify = x;
        }
        if let Some(x) = data.push_notify {
            settings.push_notify = x;
        }

        Ok(diesel::insert_into(user_settings)
            .values(&settings)
            .on_conflict(user_id)
            .do_update()
            .set(&settings)
            .get_result::<UserSettings>(conn)?)
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

pub async fn reset_settings(ctx: web::Data<AppData>, identity: Option<Identity>) -> ServiceResult<HttpResponse> {
    use crate::schema::user_settings::dsl::*;

    let res = with_user(&ctx, identity, |_ctx, conn, user| {
        diesel::delete(user_settings.find(user.id)).execute(conn)?;
        Ok(UserSettings::defaults_for(user.id))
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}
