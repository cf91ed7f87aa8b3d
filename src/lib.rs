#[macro_use]
extern crate diesel;

use std::path::PathBuf;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection};
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::info;

use crate::models::{Role, User};
use crate::security::UserChanges;
use crate::web::errors::{ServiceError, ServiceResult};

pub mod downtime;
pub mod export;
pub mod hierarchy;
pub mod models;
pub mod permissions;
pub mod schema;
pub mod security;
pub mod stats;
pub mod web;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub const ADMIN_USERNAME: &str = "admin";

#[derive(Clone, Debug)]
pub struct Config {
    pub export_dir: PathBuf,
    /// Sensors silent for longer than this are marked offline.
    pub offline_threshold: chrono::Duration,
    pub check_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            export_dir: PathBuf::from("exports"),
            offline_threshold: chrono::Duration::seconds(7200),
            check_interval_secs: 60,
        }
    }
}

#[derive(Debug)]
struct ConnectionOptions {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {}; PRAGMA journal_mode = WAL;",
            self.busy_timeout.as_millis()
        )).map_err(diesel::r2d2::Error::QueryError)
    }
}

#[derive(Clone)]
pub struct AppData {
    pub pool: models::Pool,
    pub auth: security::Authenticator,
    pub config: Config,
}

impl AppData {
    pub fn new(password_secret_key: String, database_url: String, config: Config) -> Result<Self, r2d2::Error> {
        let pool = {
            let manager = ConnectionManager::<SqliteConnection>::new(database_url);
            r2d2::Pool::builder()
                .connection_customizer(Box::new(ConnectionOptions {
                    busy_timeout: Duration::from_secs(5),
                }))
                .build(manager)?
        };

        Ok(AppData {
            pool,
            auth: security::Authenticator::new(password_secret_key),
            config,
        })
    }

    pub fn setup_migrations(&self) -> ServiceResult<()> {
        let mut conn = self.pool.get()?;
        let applied = conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| ServiceError::InternalServerError(format!("Migration error: {}", e)))?;
        if !applied.is_empty() {
            info!("applied {} migrations", applied.len());
        }
        Ok(())
    }

    /// Creates the administrator account if missing, `replace` forces its password.
    pub fn setup_admin_password(&self, password: String, replace: bool) -> ServiceResult<()> {
        use crate::schema::users::dsl;

        let mut conn = self.pool.get()?;

        let user = dsl::users
            .filter(dsl::username.eq(ADMIN_USERNAME))
            .first::<User>(&mut conn)
            .optional()?;

        match user {
            None => {
                info!("creating the {} account", ADMIN_USERNAME);
                self.auth.add_user(&mut conn, ADMIN_USERNAME.to_string(), None, password.as_str(), Role::Admin)?;
            },
            Some(ref user) if replace => {
                info!("resetting the {} password", ADMIN_USERNAME);
                self.auth.update_user(&mut conn, user.id, UserChanges {
                    password: Some(password),
                    role: Some(Role::Admin),
                    ..Default::default()
                })?;
            },
            _ => {},
        }

        Ok(())
    }
}
