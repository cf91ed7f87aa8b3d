use actix_identity::Identity;
use actix_web::{HttpResponse, web};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppData;
use crate::hierarchy;
use crate::models::IdType;
use crate::permissions::{Action, Resource};
use crate::security::PermissionCheckable;

use super::with_user;
use super::errors::{ServiceError, ServiceResult};

#[derive(Debug, Deserialize)]
pub struct LinkData {
    parent_id: Option<IdType>,
    child_id: Option<IdType>,
    hierarchy_type: Option<String>,
}

#[derive(Debug, Serialize, Queryable)]
pub struct HierarchyOption {
    id: IdType,
    name: String,
}

/// Candidates for a hierarchy level: stores, or users of the given role.
pub async fn hierarchy_options(ctx: web::Data<AppData>, identity: Option<Identity>, path: web::Path<String>) -> ServiceResult<HttpResponse> {
    use crate::schema::stores::dsl as store_dsl;
    use crate::schema::users::dsl as user_dsl;

    let kind = path.into_inner();

    let res = with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Hierarchy, Action::Read)?;
        let scope = user.scope(conn)?;

        let options = match kind.as_str() {
            "store" => {
                let mut query = store_dsl::stores
                    .select((store_dsl::id, store_dsl::name))
                    .into_boxed();
                if let Some(ids) = scope.store_ids() {
                    query = query.filter(store_dsl::id.eq_any(ids));
                }
                query.order(store_dsl::name.asc()).load::<HierarchyOption>(conn)?
            },
            "manager" | "rd" | "tu" => {
                let mut query = user_dsl::users
                    .filter(user_dsl::role.eq(kind))
                    .select((user_dsl::id, user_dsl::username))
                    .into_boxed();
                if let Some(ids) = scope.user_ids() {
                    query = query.filter(user_dsl::id.eq_any(ids));
                }
                query.order(user_dsl::username.asc()).load::<HierarchyOption>(conn)?
            },
            _ => Vec::new(),
        };
        Ok(options)
    }).await?;

    Ok(HttpResponse::Ok().json(res))
}

pub async fn create_link(ctx: web::Data<AppData>, identity: Option<Identity>, data: web::Json<LinkData>) -> ServiceResult<HttpResponse> {
    let data = data.into_inner();

    let link = with_user(&ctx, identity, move |ctx, conn, user| {
        user.ensure_permission(conn, Resource::Hierarchy, Action::Create)?;

        let (parent_id, child_id) = match (data.parent_id, data.child_id) {
            (Some(p), Some(c)) => (p, c),
            _ => return Err(ServiceError::missing_fields()),
        };
        user.ensure_user_visible(conn, parent_id)?;
        user.ensure_user_visible(conn, child_id)?;

        let parent = ctx.auth.find_user_by_id(conn, parent_id)?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;
        let child = ctx.auth.find_user_by_id(conn, child_id)?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        let kind = data.hierarchy_type.filter(|x| !x.is_empty());
        hierarchy::link(conn, &parent, &child, kind)
    }).await?;

    Ok(HttpResponse::Created().json(link))
}

pub async fn delete_link(ctx: web::Data<AppData>, identity: Option<Identity>, path: web::Path<(IdType, IdType)>) -> ServiceResult<HttpResponse> {
    let (parent_id, child_id) = path.into_inner();

    with_user(&ctx, identity, move |_ctx, conn, user| {
        user.ensure_permission(conn, Resource::Hierarchy, Action::Delete)?;
        user.ensure_user_visible(conn, parent_id)?;
        user.ensure_user_visible(conn, child_id)?;

        hierarchy::unlink(conn, parent_id, child_id)
    }).await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "Hierarchy link removed" })))
}
