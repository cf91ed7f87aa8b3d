use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::SqliteConnection;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::hierarchy::Scope;
use crate::models::{CustomPermission, IdType, Role, User};
use crate::permissions::{self, Action, PermissionSet, Resource};
use crate::schema::users;
use crate::web::errors::{ServiceError, ServiceResult};

fn hasher(secret_key: &str) -> ServiceResult<Argon2<'_>> {
    Argon2::new_with_secret(secret_key.as_bytes(), Algorithm::Argon2id, Version::V0x13, Params::default())
        .map_err(|err| ServiceError::InternalServerError(format!("Hashing error: {}", err)))
}

pub fn hash_password(secret_key: &str, password: &str) -> ServiceResult<String> {
    let salt = SaltString::generate(&mut OsRng);

    hasher(secret_key)?
        .hash_password(password.as_bytes(), &salt)
        .map(|x| x.to_string())
        .map_err(|err| ServiceError::InternalServerError(format!("Hashing error: {}", err)))
}

pub fn verify_hash(secret_key: &str, hash: &str, password: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(x) => x,
        Err(err) => {
            warn!("Unreadable password hash: {}", err);
            return false
        },
    };

    match hasher(secret_key) {
        Ok(argon) => argon.verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct UserUpdateDb {
    username: Option<String>,
    email: Option<Option<String>>,
    password_hash: Option<String>,
    role: Option<String>,
    last_password_change: Option<NaiveDateTime>,
}

/// Fields of an account that can change, `None` leaves them untouched.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<Option<String>>,
    pub password: Option<String>,
    pub role: Option<Role>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none() && self.password.is_none() && self.role.is_none()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IdentityCookie {
    id: IdType,
    timestamp: NaiveDateTime,
}

#[derive(Clone)]
pub struct Authenticator {
    password_secret_key: String,
}

impl Authenticator {
    pub fn new(password_secret_key: String) -> Self {
        Authenticator {
            password_secret_key
        }
    }

    pub fn add_user(&self, conn: &mut SqliteConnection, username: String, email: Option<String>, password: &str, role: Role) -> ServiceResult<User> {
        use crate::schema::users::dsl;

        let now = Utc::now().naive_utc();
        let password_hash = hash_password(self.password_secret_key.as_str(), password)?;

        let res = diesel::insert_into(dsl::users)
            .values((
                dsl::username.eq(username),
                dsl::email.eq(email),
                dsl::password_hash.eq(password_hash),
                dsl::role.eq(role.as_str()),
                dsl::last_password_change.eq(now),
                dsl::created_at.eq(now),
            ))
            .get_result::<User>(conn);

        match res {
            Err(diesel::result::Error::DatabaseError(diesel::result::DatabaseErrorKind::UniqueViolation, _)) => {
                Err(ServiceError::AlreadyPresent("Username".to_string()))
            },
            x => Ok(x?),
        }
    }

    pub fn find_user_by_username(&self, conn: &mut SqliteConnection, username: &str) -> ServiceResult<Option<User>> {
        use crate::schema::users::dsl;

        Ok(dsl::users.filter(dsl::username.eq(username)).first::<User>(conn).optional()?)
    }

    pub fn find_user_by_id(&self, conn: &mut SqliteConnection, id: IdType) -> ServiceResult<Option<User>> {
        use crate::schema::users::dsl;

        Ok(dsl::users.find(id).first::<User>(conn).optional()?)
    }

    /// Unknown usernames and wrong passwords fail the same way.
    pub fn verify_user(&self, conn: &mut SqliteConnection, username: &str, password: &str) -> ServiceResult<User> {
        let user = match self.find_user_by_username(conn, username)? {
            None => return Err(ServiceError::WrongPassword),
            Some(u) => u
        };

        if !verify_hash(self.password_secret_key.as_str(), user.password_hash.as_str(), password) {
            Err(ServiceError::WrongPassword)
        } else {
            Ok(user)
        }
    }

    pub fn update_user(&self, conn: &mut SqliteConnection, id: IdType, changes: UserChanges) -> ServiceResult<User> {
        use crate::schema::users::dsl;

        if changes.is_empty() {
            return self.find_user_by_id(conn, id)?
                .ok_or_else(|| ServiceError::NotFound("User".to_string()))
        }

        let (new_passw_hash, new_change_time) = match changes.password {
            Some(x) => (
                Some(hash_password(self.password_secret_key.as_str(), x.as_str())?),
                Some(Utc::now().naive_utc())
            ),
            None => (None, None),
        };

        let data = UserUpdateDb {
            username: changes.username,
            email: changes.email,
            password_hash: new_passw_hash,
            role: changes.role.map(|x| x.as_str().to_string()),
            last_password_change: new_change_time,
        };

        let res = diesel::update(dsl::users.find(id))
            .set(&data)
            .get_result::<User>(conn);

        match res {
            Err(diesel::result::Error::NotFound) => Err(ServiceError::NotFound("User".to_string())),
            Err(diesel::result::Error::DatabaseError(diesel::result::DatabaseErrorKind::UniqueViolation, _)) => {
                Err(ServiceError::AlreadyPresent("Username".to_string()))
            },
            x => Ok(x?),
        }
    }

    /// Removes the user along with everything that belongs to him, all or nothing.
    pub fn delete_user(&self, conn: &mut SqliteConnection, id: IdType) -> ServiceResult<()> {
        use crate::schema::{custom_permissions, stores, user_hierarchy, user_sensors, user_settings};

        conn.transaction::<_, ServiceError, _>(|conn| {
            diesel::delete(user_sensors::table.filter(user_sensors::user_id.eq(id))).execute(conn)?;
            diesel::delete(user_hierarchy::table
                .filter(user_hierarchy::parent_id.eq(id).or(user_hierarchy::child_id.eq(id))))
                .execute(conn)?;
            diesel::delete(custom_permissions::table.filter(custom_permissions::user_id.eq(id))).execute(conn)?;
            diesel::update(custom_permissions::table.filter(custom_permissions::granted_by.eq(id)))
                .set(custom_permissions::granted_by.eq(None::<IdType>))
                .execute(conn)?;
            diesel::delete(user_settings::table.filter(user_settings::user_id.eq(id))).execute(conn)?;
            diesel::update(stores::table.filter(stores::tu_id.eq(id)))
                .set(stores::tu_id.eq(None::<IdType>))
                .execute(conn)?;
            diesel::update(stores::table.filter(stores::rd_id.eq(id)))
                .set(stores::rd_id.eq(None::<IdType>))
                .execute(conn)?;

            let del_count = diesel::delete(users::table.find(id)).execute(conn)?;

            if del_count != 1 {
                Err(ServiceError::NotFound("User".to_string()))
            } else {
                info!("deleted user {}", id);
                Ok(())
            }
        })
    }

    pub fn save_identity(&self, user: &User) -> ServiceResult<String> {
        serde_json::to_string(&IdentityCookie {
            id: user.id,
            timestamp: user.last_password_change,
        }).map_err(|e| ServiceError::InternalServerError(format!("Identity error: {}", e)))
    }

    /// Identities issued before the last password change are no longer valid.
    pub fn parse_identity(&self, conn: &mut SqliteConnection, identity: &str) -> ServiceResult<Option<User>> {
        let cookie: Option<IdentityCookie> = serde_json::from_str(identity).ok();
        let cookie = match cookie {
            Some(x) => x,
            None => return Ok(None),
        };

        let user = match self.find_user_by_id(conn, cookie.id)? {
            None => return Ok(None),
            Some(u) => u,
        };
        if user.last_password_change > cookie.timestamp {
            Ok(None)
        } else {
            Ok(Some(user))
        }
    }
}

pub fn load_overrides(conn: &mut SqliteConnection, user: IdType) -> QueryResult<Vec<CustomPermission>> {
    use crate::schema::custom_permissions::dsl::*;

    custom_permissions
        .filter(user_id.eq(user))
        .order(id.asc())
        .load::<CustomPermission>(conn)
}

pub trait PermissionCheckable {
    fn ensure_admin(&self) -> ServiceResult<()>;

    fn ensure_role(&self, roles: &[Role]) -> ServiceResult<()>;

    fn permissions(&self, conn: &mut SqliteConnection) -> ServiceResult<PermissionSet>;

    fn ensure_permission(&self, conn: &mut SqliteConnection, resource: Resource, action: Action) -> ServiceResult<()>;

    fn scope(&self, conn: &mut SqliteConnection) -> ServiceResult<Scope>;

    fn ensure_user_visible(&self, conn: &mut SqliteConnection, user_id: IdType) -> ServiceResult<()>;

    fn ensure_sensor_visible(&self, conn: &mut SqliteConnection, sensor_id: IdType) -> ServiceResult<()>;

    fn ensure_store_visible(&self, conn: &mut SqliteConnection, store_id: IdType) -> ServiceResult<()>;
}

impl PermissionCheckable for User {
    fn ensure_admin(&self) -> ServiceResult<()> {
        self.ensure_role(&[Role::Admin])
    }

    fn ensure_role(&self, roles: &[Role]) -> ServiceResult<()> {
        if !roles.contains(&self.get_role()) {
            Err(ServiceError::Unauthorized)
        } else {
            Ok(())
        }
    }

    fn permissions(&self, conn: &mut SqliteConnection) -> ServiceResult<PermissionSet> {
        let overrides = load_overrides(conn, self.id)?;
        Ok(permissions::effective_permissions(self.get_role(), &overrides))
    }

    fn ensure_permission(&self, conn: &mut SqliteConnection, resource: Resource, action: Action) -> ServiceResult<()> {
        let overrides = load_overrides(conn, self.id)?;
        if permissions::is_allowed(self.get_role(), &overrides, resource, action) {
            Ok(())
        } else {
            Err(ServiceError::Unauthorized)
        }
    }

    fn scope(&self, conn: &mut SqliteConnection) -> ServiceResult<Scope> {
        Ok(Scope::load(conn, self)?)
    }

    fn ensure_user_visible(&self, conn: &mut SqliteConnection, user_id: IdType) -> ServiceResult<()> {
        if user_id == self.id || self.scope(conn)?.sees_user(user_id) {
            Ok(())
        } else {
            Err(ServiceError::NotFound("User".to_string()))
        }
    }

    fn ensure_sensor_visible(&self, conn: &mut SqliteConnection, sensor_id: IdType) -> ServiceResult<()> {
        if self.scope(conn)?.sees_sensor(sensor_id) {
            Ok(())
        } else {
            Err(ServiceError::NotFound("Sensor".to_string()))
        }
    }

    fn ensure_store_visible(&self, conn: &mut SqliteConnection, store_id: IdType) -> ServiceResult<()> {
        if self.scope(conn)?.sees_store(store_id) {
            Ok(())
        } else {
            Err(ServiceError::NotFound("Store".to_string()))
        }
    }
}
