use actix_web::{Error, HttpRequest, web};

use super::errors::ServiceError;
use super::{auth_service, hierarchy_service, ingest_service, permissions_service, reports_service, sensors_service,
            settings_service, stats_service, stores_service, users_service};

/// Malformed bodies, queries and paths answer with the usual JSON error body.
fn rejected<E: std::fmt::Display>(err: E, _req: &HttpRequest) -> Error {
    ServiceError::BadRequest(err.to_string()).into()
}

pub fn config(cfg: &mut web::ServiceConfig) {
    // limit the maximum amount of data that server will accept
    cfg.app_data(web::JsonConfig::default().limit(16 * 1024).error_handler(rejected))
        .app_data(web::FormConfig::default().limit(16 * 1024).error_handler(rejected))
        .app_data(web::QueryConfig::default().error_handler(rejected))
        .app_data(web::PathConfig::default().error_handler(rejected));

    cfg.service(
        web::scope("/api")
            .service(web::resource("/login").route(web::post().to(auth_service::login)))
            .service(web::resource("/logout").route(web::post().to(auth_service::logout)))
            .service(web::resource("/me").route(web::get().to(auth_service::me)))
            .service(
                web::resource("/users")
                    .route(web::get().to(users_service::list_users))
                    .route(web::post().to(users_service::create_user))
            )
            .service(
                web::resource("/users/{id}")
                    .route(web::get().to(users_service::get_user))
                    .route(web::put().to(users_service::update_user))
                    .route(web::delete().to(users_service::delete_user))
            )
            .service(
                web::resource("/sensors")
                    .route(web::get().to(sensors_service::list_sensors))
                    .route(web::post().to(sensors_service::create_sensor))
            )
            .service(
                web::resource("/sensors/{id}")
                    .route(web::get().to(sensors_service::get_sensor))
                    .route(web::put().to(sensors_service::update_sensor))
                    .route(web::delete().to(sensors_service::delete_sensor))
            )
            .service(web::resource("/sensors/{id}/downtime").route(web::get().to(sensors_service::sensor_downtime)))
            .service(
                web::resource("/stores")
                    .route(web::get().to(stores_service::list_stores))
                    .route(web::post().to(stores_service::create_store))
            )
            .service(
                web::resource("/stores/{id}")
                    .route(web::get().to(stores_service::get_store))
                    .route(web::put().to(stores_service::update_store))
                    .route(web::delete().to(stores_service::delete_store))
            )
            .service(web::resource("/store-sensors/{store_id}").route(web::get().to(stores_service::store_sensors)))
            .service(
                web::resource("/store-sensors/{store_id}/{sensor_id}")
                    .route(web::post().to(stores_service::attach_sensor))
                    .route(web::delete().to(stores_service::detach_sensor))
            )
            .service(web::resource("/hierarchy").route(web::post().to(hierarchy_service::create_link)))
            .service(web::resource("/hierarchy/{hierarchy_type}").route(web::get().to(hierarchy_service::hierarchy_options)))
            .service(web::resource("/hierarchy/{parent_id}/{child_id}").route(web::delete().to(hierarchy_service::delete_link)))
            .service(web::resource("/visitor-count").route(web::post().to(ingest_service::visitor_count)))
            .service(web::resource("/sensor-data").route(web::get().to(stats_service::sensor_data)))
            .service(web::resource("/statistics").route(web::get().to(stats_service::statistics)))
            .service(web::resource("/statistics/peaks").route(web::get().to(stats_service::peaks)))
            .service(web::resource("/map-data").route(web::get().to(stats_service::map_data)))
            .service(web::resource("/reports").route(web::get().to(reports_service::reports)))
            .service(web::resource("/export").route(web::post().to(reports_service::export)))
            .service(web::resource("/export/{filename}").route(web::get().to(reports_service::download)))
            .service(
                web::scope("/permissions")
                    .service(web::resource("/matrix").route(web::get().to(permissions_service::matrix)))
                    .service(web::resource("/check").route(web::get().to(permissions_service::check)))
                    .service(
                        web::resource("/custom")
                            .route(web::get().to(permissions_service::list_custom))
                            .route(web::post().to(permissions_service::set_custom))
                    )
                    .service(web::resource("/custom/reset/{user_id}").route(web::delete().to(permissions_service::reset_custom)))
                    .service(web::resource("/user/{id}").route(web::get().to(permissions_service::user_permissions)))
                    .service(web::resource("/hierarchy/{id}").route(web::get().to(permissions_service::hierarchy_permissions)))
                    .service(web::resource("/audit").route(web::get().to(permissions_service::audit)))
            )
            .service(
                web::resource("/settings")
                    .route(web::get().to(settings_service::get_settings))
                    .route(web::put().to(settings_service::update_settings))
            )
            .service(web::resource("/settings/reset").route(web::post().to(settings_service::reset_settings)))
    );
}
