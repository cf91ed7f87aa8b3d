use chrono::NaiveDateTime;
use derive_more::Display;
use diesel::{r2d2::ConnectionManager, SqliteConnection};
use serde::{Deserialize, Serialize};

use super::schema::*;

// type alias to use in multiple places
pub type Pool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

pub type IdType = i32;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[display(fmt = "admin")]
    Admin,
    #[display(fmt = "manager")]
    Manager,
    #[display(fmt = "rd")]
    Rd,
    #[display(fmt = "tu")]
    Tu,
    #[display(fmt = "store")]
    Store,
}

impl Role {
    pub const ALL: [Role; 5] = [Role::Admin, Role::Manager, Role::Rd, Role::Tu, Role::Store];

    pub fn from_name(name: &str) -> Option<Role> {
        match name {
            "admin" => Some(Role::Admin),
            "manager" => Some(Role::Manager),
            "rd" => Some(Role::Rd),
            "tu" => Some(Role::Tu),
            "store" => Some(Role::Store),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Rd => "rd",
            Role::Tu => "tu",
            Role::Store => "store",
        }
    }

    /// Position in the hierarchy, lower is higher up.
    /// rd and tu are siblings on the same level.
    pub fn rank(&self) -> u8 {
        match self {
            Role::Admin => 0,
            Role::Manager => 1,
            Role::Rd | Role::Tu => 2,
            Role::Store => 3,
        }
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    #[display(fmt = "active")]
    Active,
    #[display(fmt = "inactive")]
    Inactive,
    #[display(fmt = "offline")]
    Offline,
}

impl SensorStatus {
    pub fn from_name(name: &str) -> Option<SensorStatus> {
        match name {
            "active" => Some(SensorStatus::Active),
            "inactive" => Some(SensorStatus::Inactive),
            "offline" => Some(SensorStatus::Offline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorStatus::Active => "active",
            SensorStatus::Inactive => "inactive",
            SensorStatus::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: IdType,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub last_password_change: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

impl User {
    /// Unknown roles fall back to the least privileged one.
    pub fn get_role(&self) -> Role {
        Role::from_name(self.role.as_str()).unwrap_or(Role::Store)
    }

    pub fn view(&self) -> UserView {
        UserView {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.get_role(),
            created_at: self.created_at,
        }
    }
}

/// What the API shows of an user account.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: IdType,
    pub username: String,
    pub email: Option<String>,
    pub role: Role,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = stores)]
pub struct Store {
    pub id: IdType,
    pub name: String,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub tu_id: Option<IdType>,
    pub rd_id: Option<IdType>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = sensors)]
pub struct Sensor {
    pub id: IdType,
    pub device_id: String,
    pub name: String,
    pub location: String,
    pub status: String,
    pub store_id: Option<IdType>,
    pub visitor_count: i32,
    pub last_seen: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl Sensor {
    pub fn get_status(&self) -> SensorStatus {
        SensorStatus::from_name(self.status.as_str()).unwrap_or(SensorStatus::Inactive)
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = visitor_data)]
pub struct VisitorRecord {
    pub id: IdType,
    pub sensor_id: IdType,
    pub visitor_count: i32,
    pub recorded_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = user_sensors)]
pub struct UserSensor {
    pub user_id: IdType,
    pub sensor_id: IdType,
}

#[derive(Debug, Clone, Queryable, Serialize)]
#[diesel(table_name = user_hierarchy)]
pub struct HierarchyLink {
    pub id: IdType,
    pub parent_id: IdType,
    pub child_id: IdType,
    pub hierarchy_type: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Serialize)]
#[diesel(table_name = sensor_downtime)]
pub struct Downtime {
    pub id: IdType,
    pub sensor_id: IdType,
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Serialize)]
#[diesel(table_name = custom_permissions)]
pub struct CustomPermission {
    pub id: IdType,
    pub user_id: IdType,
    pub resource: String,
    pub action: String,
    pub granted: bool,
    pub granted_by: Option<IdType>,
    pub granted_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = user_settings, primary_key(user_id))]
pub struct UserSettings {
    pub user_id: IdType,
    pub theme: String,
    pub lang: String,
    pub email_notify: bool,
    pub push_notify: bool,
}

impl UserSettings {
    pub fn defaults_for(user_id: IdType) -> Self {
        UserSettings {
            user_id,
            theme: "dark".to_string(),
            lang: "ru".to_string(),
            email_notify: true,
            push_notify: false,
        }
    }
}
