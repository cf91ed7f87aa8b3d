#![allow(dead_code)]

use std::path::PathBuf;

use actix_http::Request;
use actix_identity::IdentityMiddleware;
use actix_session::{SessionMiddleware, storage::CookieSessionStore};
use actix_web::{App, test, web};
use actix_web::body::MessageBody;
use actix_web::cookie::{CookieJar, Key};
use actix_web::dev::{Service, ServiceResponse};
use actix_web::http::StatusCode;
use rand::Rng;
use serde_json::{json, Value};

use visitor_dashboard::{AppData, Config};
use visitor_dashboard::web::api_service;

pub const ADMIN_PASSWORD: &str = "password";

pub fn random_name() -> String {
    let data = rand::thread_rng().gen::<[u8; 8]>();
    hex::encode(data)
}

fn temp_path(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}_{}", prefix, random_name()))
}

pub struct TestApp<S> {
    pub service: S,
    pub data: AppData,
    pub cookies: CookieJar,
}

/// Every app gets its own database file and export directory.
pub async fn init_app() -> TestApp<impl Service<Request, Response = ServiceResponse<impl MessageBody>, Error = actix_web::Error>> {
    let database_url = temp_path("visitor_dashboard_test").with_extension("sqlite");
    let config = Config {
        export_dir: temp_path("visitor_dashboard_exports"),
        ..Default::default()
    };

    let data = AppData::new("a".repeat(32), database_url.to_string_lossy().to_string(), config).unwrap();
    data.setup_migrations().unwrap();
    data.setup_admin_password(ADMIN_PASSWORD.to_string(), true).unwrap();

    let service = test::init_service(
        App::new()
            .app_data(web::Data::new(data.clone()))
            .wrap(IdentityMiddleware::default())
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), Key::from(&[41; 64]))
                    .cookie_name("auth-cookie".to_string())
                    .cookie_secure(false)
                    .build()
            )
            .configure(api_service::config)
    ).await;

    TestApp {
        service,
        data,
        cookies: CookieJar::new(),
    }
}

impl<S> TestApp<S> {
    pub async fn send<B>(&mut self, mut req: test::TestRequest) -> (StatusCode, Value)
        where S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
              B: MessageBody,
    {
        for cookie in self.cookies.iter() {
            req = req.cookie(cookie.clone());
        }

        let res = test::call_service(&self.service, req.to_request()).await;
        for cookie in res.response().cookies() {
            self.cookies.add(cookie.into_owned());
        }
        let status = res.status();
        let body = test::read_body(res).await;
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).to_string()))
        };
        (status, value)
    }

    pub async fn get<B>(&mut self, uri: &str) -> (StatusCode, Value)
        where S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
              B: MessageBody,
    {
        self.send(test::TestRequest::get().uri(uri)).await
    }

    pub async fn post<B>(&mut self, uri: &str, body: Value) -> (StatusCode, Value)
        where S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
              B: MessageBody,
    {
        self.send(test::TestRequest::post().uri(uri).set_json(body)).await
    }

    pub async fn put<B>(&mut self, uri: &str, body: Value) -> (StatusCode, Value)
        where S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
              B: MessageBody,
    {
        self.send(test::TestRequest::put().uri(uri).set_json(body)).await
    }

    pub async fn delete<B>(&mut self, uri: &str) -> (StatusCode, Value)
        where S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
              B: MessageBody,
    {
        self.send(test::TestRequest::delete().uri(uri)).await
    }

    /// Starts a fresh session, returning the old cookies.
    pub fn new_session(&mut self) -> CookieJar {
        std::mem::replace(&mut self.cookies, CookieJar::new())
    }

    pub fn restore_session(&mut self, cookies: CookieJar) {
        self.cookies = cookies;
    }

    pub async fn login<B>(&mut self, username: &str, password: &str) -> (StatusCode, Value)
        where S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
              B: MessageBody,
    {
        self.post("/api/login", json!({ "username": username, "password": password })).await
    }

    pub async fn login_admin<B>(&mut self)
        where S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
              B: MessageBody,
    {
        let (status, _) = self.login("admin", ADMIN_PASSWORD).await;
        assert_eq!(status, StatusCode::OK);
    }

    /// Creates a user with the current session, returns its id and name.
    pub async fn create_random_user<B>(&mut self, role: &str, password: &str) -> (i64, String)
        where S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
              B: MessageBody,
    {
        let username = random_name();
        let (status, body) = self.post("/api/users", json!({
            "username": &username,
            "password": password,
            "role": role,
        })).await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        (body["id"].to_i64(), username)
    }

    pub async fn create_store<B>(&mut self, body: Value) -> i64
        where S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
              B: MessageBody,
    {
        let (status, body) = self.post("/api/stores", body).await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].to_i64()
    }

    pub async fn create_sensor<B>(&mut self, body: Value) -> i64
        where S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
              B: MessageBody,
    {
        let (status, body) = self.post("/api/sensors", body).await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].to_i64()
    }
}

pub trait IntoPrimitive {
    fn to_i64(&self) -> i64;
    fn to_f64(&self) -> f64;
    fn to_bool(&self) -> bool;
    fn to_str(&self) -> &str;
}

impl IntoPrimitive for Value {
    fn to_i64(&self) -> i64 {
        self.as_i64().expect("Value is not i64")
    }

    fn to_f64(&self) -> f64 {
        self.as_f64().expect("Value is not f64")
    }

    fn to_bool(&self) -> bool {
        self.as_bool().expect("Value is not bool")
    }

    fn to_str(&self) -> &str {
        self.as_str().expect("Value is not string")
    }
}

/// Ids found in a JSON array of objects, sorted.
pub fn ids_of(value: &Value) -> Vec<i64> {
    let mut ids: Vec<i64> = value.as_array().expect("Value is not array")
        .iter()
        .map(|x| x["id"].to_i64())
        .collect();
    ids.sort_unstable();
    ids
}

pub fn sorted(mut ids: Vec<i64>) -> Vec<i64> {
    ids.sort_unstable();
    ids
}
