use actix_identity::Identity;
use actix_web::web;
use diesel::SqliteConnection;
use serde::{Deserialize, Deserializer};

use crate::AppData;
use crate::models::User;

use self::errors::{ServiceError, ServiceResult};

pub mod api_service;
pub mod auth_service;
pub mod errors;
pub mod hierarchy_service;
pub mod ingest_service;
pub mod permissions_service;
pub mod reports_service;
pub mod sensors_service;
pub mod settings_service;
pub mod stats_service;
pub mod stores_service;
pub mod users_service;

fn parse_user_required(ctx: &AppData, conn: &mut SqliteConnection, identity: Option<String>) -> ServiceResult<User> {
    identity.as_ref()
        .and_then(|x| ctx.auth.parse_identity(conn, x).transpose())
        .ok_or(ServiceError::LoginRequired)?
}

/// Runs `f` on the blocking thread pool with a pooled connection.
pub async fn with_connection<F, T>(ctx: &web::Data<AppData>, f: F) -> ServiceResult<T>
    where F: FnOnce(&AppData, &mut SqliteConnection) -> ServiceResult<T> + Send + 'static,
          T: Send + 'static,
{
    let ctx = ctx.clone();
    web::block(move || {
        let mut conn = ctx.pool.get()?;
        f(&ctx, &mut *conn)
    }).await?
}

/// Like `with_connection`, but requires a logged user.
pub async fn with_user<F, T>(ctx: &web::Data<AppData>, identity: Option<Identity>, f: F) -> ServiceResult<T>
    where F: FnOnce(&AppData, &mut SqliteConnection, User) -> ServiceResult<T> + Send + 'static,
          T: Send + 'static,
{
    let raw = identity.and_then(|x| x.id().ok());
    with_connection(ctx, move |ctx, conn| {
        let user = parse_user_required(ctx, conn, raw)?;
        f(ctx, conn, user)
    }).await
}

/// Tells apart a missing field (`None`) from an explicit `null` (`Some(None)`).
pub fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
    where T: Deserialize<'de>,
          D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}
