use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use actix::Actor;
use actix_identity::IdentityMiddleware;
use actix_session::{SessionMiddleware, storage::CookieSessionStore};
use actix_web::{App, HttpServer, cookie::Key, middleware, web};
use log::info;
use sha2::{Digest, Sha512};

use visitor_dashboard::{AppData, Config};
use visitor_dashboard::downtime::DowntimeActor;
use visitor_dashboard::web::api_service;

fn env_error<E: std::fmt::Display>(err: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

fn expect_env_var(name: &str) -> io::Result<String> {
    std::env::var(name).map_err(|_| io::Error::new(io::ErrorKind::NotFound, format!("{} must be set", name)))
}

fn env_var_or<T: FromStr>(name: &str, default: T) -> io::Result<T> {
    match std::env::var(name) {
        Ok(x) => x.parse().map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("{} is not valid", name))),
        Err(_) => Ok(default),
    }
}

/// Cookie keys need 64 bytes, any secret is stretched to that.
fn cookie_key(secret: &str) -> Key {
    Key::from(Sha512::digest(secret.as_bytes()).as_slice())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let database_url = expect_env_var("DATABASE_URL")?;
    let cookie_secret_key = expect_env_var("COOKIE_SECRET_KEY")?;
    let password_secret_key = expect_env_var("PASSWORD_SECRET_KEY")?;

    let admin_default_password = expect_env_var("ADMIN_DEFAULT_PASSWORD")?;
    let admin_password_override = std::env::var("ADMIN_PASSWORD_OVERRIDE").map(|x| !x.is_empty()).unwrap_or(false);

    let bind_address = env_var_or("BIND_ADDRESS", "0.0.0.0:1521".to_string())?;
    let domain: Option<String> = std::env::var("COOKIE_DOMAIN").ok().filter(|x| !x.is_empty());

    let config = Config {
        export_dir: env_var_or("EXPORT_DIR", PathBuf::from("exports"))?,
        offline_threshold: chrono::Duration::seconds(env_var_or("SENSOR_OFFLINE_SECS", 7200i64)?),
        check_interval_secs: env_var_or("SENSOR_CHECK_SECS", 60u64)?.max(1),
    };

    // create db connection pool
    let data = AppData::new(password_secret_key, database_url, config).map_err(env_error)?;

    data.setup_migrations().map_err(env_error)?;
    data.setup_admin_password(admin_default_password, admin_password_override).map_err(env_error)?;

    let actor = DowntimeActor {
        app_data: data.clone()
    };
    actor.start();

    let key = cookie_key(&cookie_secret_key);

    info!("listening on {}", bind_address);

    // Start http server
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(data.clone()))
            .wrap(IdentityMiddleware::default())
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), key.clone())
                    .cookie_name("auth-cookie".to_string())
                    .cookie_domain(domain.clone())
                    .cookie_secure(false)
                    .build()
            )
            // enable logger
            .wrap(middleware::Logger::default())
            .configure(api_service::config)
    })
        .bind(bind_address)?
        .run()
        .await
}
