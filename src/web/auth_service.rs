use actix_identity::Identity;
use actix_web::{HttpMessage, HttpRequest, HttpResponse, web};
use log::info;
use serde::Deserialize;
use serde_json::json;

use crate::AppData;
use crate::security::PermissionCheckable;

use super::{with_connection, with_user};
use super::errors::{ServiceError, ServiceResult};

#[derive(Debug, Deserialize)]
pub struct LoginData {
    username: Option<String>,
    password: Option<String>,
}

/// Stores a fresh identity in the session cookie.
pub fn remember(req: &HttpRequest, identity: String) -> ServiceResult<()> {
    Identity::login(&req.extensions(), identity)
        .map(|_| ())
        .map_err(|e| ServiceError::InternalServerError(format!("Identity error: {}", e)))
}

pub async fn login(req: HttpRequest, ctx: web::Data<AppData>, data: web::Json<LoginData>) -> ServiceResult<HttpResponse> {
    let data = data.into_inner();
    let (username, password) = match (data.username, data.password) {
        (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => (u, p),
        _ => return Err(ServiceError::missing_fields()),
    };

    let (user, identity, permissions) = with_connection(&ctx, move |ctx, conn| {
        let user = ctx.auth.verify_user(conn, &username, &password)?;
        let identity = ctx.auth.save_identity(&user)?;
        let permissions = user.permissions(conn)?;
        Ok((user, identity, permissions))
    }).await?;

    remember(&req, identity)?;
    info!("{} logged in", user.username);

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "user": user.view(),
        "permissions": permissions,
    })))
}

pub async fn logout(identity: Option<Identity>) -> HttpResponse {
    if let Some(x) = identity {
        x.logout();
    }
    HttpResponse::Ok().json(json!({ "success": true }))
}

pub async fn me(ctx: web::Data<AppData>, identity: Option<Identity>) -> ServiceResult<HttpResponse> {
    let (user, permissions) = with_user(&ctx, identity, |_ctx, conn, user| {
        let permissions = user.permissions(conn)?;
        Ok((user, permissions))
    }).await?;

    Ok(HttpResponse::Ok().json(json!({
        "user": user.view(),
        "permissions": permissions,
    })))
}
