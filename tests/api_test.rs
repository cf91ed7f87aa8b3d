use actix_web::http::StatusCode;
use serde_json::json;

use crate::common::{ids_of, init_app, random_name, sorted, IntoPrimitive, ADMIN_PASSWORD};

mod common;

#[actix_rt::test]
async fn test_login_logout() {
    let mut app = init_app().await;

    let (status, body) = app.get("/api/me").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Login required");

    let (status, _) = app.login("admin", "not the password").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.login(&random_name(), ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.post("/api/login", json!({ "username": "admin" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.login("admin", ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["success"].to_bool());
    assert_eq!(body["user"]["role"], "admin");
    assert!(body["user"].get("password_hash").is_none());
    assert_eq!(body["permissions"]["system"], json!(["backup", "restore", "logs", "maintenance"]));

    let (status, body) = app.get("/api/me").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "admin");

    let (status, _) = app.post("/api/logout", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get("/api/me").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_rt::test]
async fn test_user_crud() {
    let mut app = init_app().await;
    app.login_admin().await;

    let username = random_name();
    let (status, body) = app.post("/api/users", json!({
        "username": &username,
        "email": "someone@example.com",
        "password": "secret",
        "role": "rd",
    })).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].to_i64();

    let (status, body) = app.get(&format!("/api/users/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"].to_str(), username);
    assert_eq!(body["email"], "someone@example.com");
    assert_eq!(body["role"], "rd");
    assert_eq!(body["sensors"], json!([]));

    // Duplicates and bad input
    let (status, _) = app.post("/api/users", json!({ "username": &username, "password": "x", "role": "rd" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app.post("/api/users", json!({ "username": random_name(), "password": "x", "role": "pilot" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.post("/api/users", json!({ "username": random_name(), "role": "rd" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.put(&format!("/api/users/{}", id), json!({ "email": null, "role": "tu" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], json!(null));
    assert_eq!(body["user"]["role"], "tu");
    assert_eq!(body["user"]["username"].to_str(), username);

    let (status, body) = app.get("/api/users").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, _) = app.delete(&format!("/api/users/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get(&format!("/api/users/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.delete(&format!("/api/users/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.get("/api/me").await;
    let admin_id = body["user"]["id"].to_i64();
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.delete(&format!("/api/users/{}", admin_id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_rt::test]
async fn test_role_restrictions() {
    let mut app = init_app().await;
    app.login_admin().await;

    let (_manager_id, manager) = app.create_random_user("manager", "manager-pw").await;
    let (store_id, store_user) = app.create_random_user("store", "store-pw").await;

    app.new_session();
    app.login(&store_user, "store-pw").await;
    let (status, _) = app.get("/api/users").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.post("/api/sensors", json!({ "device_id": random_name(), "name": "x" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    // Own profile stays reachable
    let (status, _) = app.get(&format!("/api/users/{}", store_id)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app.put(&format!("/api/users/{}", store_id), json!({ "email": "me@example.com" })).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let (status, _) = app.put(&format!("/api/users/{}", store_id), json!({ "role": "admin" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.new_session();
    app.login(&manager, "manager-pw").await;
    let (status, _) = app.post("/api/users", json!({ "username": random_name(), "password": "x", "role": "manager" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.post("/api/users", json!({ "username": random_name(), "password": "x", "role": "admin" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Users created by a manager land below it
    let (child_id, _) = app.create_random_user("rd", "rd-pw").await;
    let (status, body) = app.get("/api/users").await;
    assert_eq!(status, StatusCode::OK);
    let visible = ids_of(&body);
    assert!(visible.contains(&child_id));
    assert!(!visible.contains(&store_id));
    let (status, _) = app.get(&format!("/api/users/{}", store_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn test_hierarchy_visibility() {
    let mut app = init_app().await;
    app.login_admin().await;

    let (manager_id, manager) = app.create_random_user("manager", "pw").await;
    let (rd_id, _) = app.create_random_user("rd", "pw").await;
    let (store_id, _) = app.create_random_user("store", "pw").await;
    let (other_id, _) = app.create_random_user("store", "pw").await;

    let (status, body) = app.post("/api/hierarchy", json!({ "parent_id": manager_id, "child_id": rd_id })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["hierarchy_type"], "rd");
    let (status, _) = app.post("/api/hierarchy", json!({ "parent_id": rd_id, "child_id": store_id })).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = app.post("/api/hierarchy", json!({ "parent_id": rd_id, "child_id": store_id })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app.post("/api/hierarchy", json!({ "parent_id": store_id, "child_id": manager_id })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let shop = app.create_store(json!({ "name": "Shop", "address": "Main st 1", "rd_id": rd_id })).await;
    let in_shop = app.create_sensor(json!({ "device_id": random_name(), "name": "Door", "store_id": shop })).await;
    let assigned = app.create_sensor(json!({ "device_id": random_name(), "name": "Hall" })).await;
    let hidden = app.create_sensor(json!({ "device_id": random_name(), "name": "Elsewhere" })).await;
    let (status, _) = app.put(&format!("/api/users/{}", store_id), json!({ "sensor_ids": [assigned] })).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.put(&format!("/api/users/{}", other_id), json!({ "sensor_ids": [hidden] })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/api/hierarchy/rd").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids_of(&body), vec![rd_id]);
    let (_, body) = app.get("/api/hierarchy/store").await;
    assert_eq!(ids_of(&body), vec![shop]);
    let (_, body) = app.get("/api/hierarchy/unknown").await;
    assert_eq!(body, json!([]));

    let (status, body) = app.get(&format!("/api/permissions/hierarchy/{}", manager_id)).await;
    assert_eq!(status, StatusCode::OK);
    let users = body["accessible_users"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    for user in users {
        let expected = if user["id"].to_i64() == rd_id { ("rd", "direct", 1) } else { ("inherited", "inherited", 2) };
        assert_eq!(user["hierarchy_type"].to_str(), expected.0);
        assert_eq!(user["access_type"].to_str(), expected.1);
        assert_eq!(user["depth"].to_i64(), expected.2);
    }
    assert_eq!(ids_of(&body["accessible_sensors"]), sorted(vec![in_shop, assigned]));
    for sensor in body["accessible_sensors"].as_array().unwrap() {
        if sensor["id"].to_i64() == assigned {
            assert_eq!(sensor["owner_id"].to_i64(), store_id);
            assert!(sensor["owner_name"].is_string());
        } else {
            assert!(sensor["owner_id"].is_null());
            assert!(sensor["owner_name"].is_null());
        }
    }

    app.new_session();
    app.login(&manager, "pw").await;

    let (status, body) = app.get("/api/sensors").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids_of(&body), sorted(vec![in_shop, assigned]));
    let (status, _) = app.get(&format!("/api/sensors/{}", hidden)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.get(&format!("/api/sensors/{}", assigned)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.get("/api/users").await;
    assert_eq!(ids_of(&body), sorted(vec![manager_id, rd_id, store_id]));
    let (status, _) = app.get(&format!("/api/users/{}", other_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app.get("/api/stores").await;
    assert_eq!(ids_of(&body), vec![shop]);

    // Unlinking hides the subtree again
    let (status, _) = app.delete(&format!("/api/hierarchy/{}/{}", manager_id, rd_id)).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = app.get("/api/users").await;
    assert_eq!(ids_of(&body), vec![manager_id]);
    let (status, _) = app.delete(&format!("/api/hierarchy/{}/{}", manager_id, rd_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn test_role_changes_keep_hierarchy_ranked() {
    use diesel::prelude::*;
    use visitor_dashboard::schema::users;

    let mut app = init_app().await;
    app.login_admin().await;

    let (manager_id, manager) = app.create_random_user("manager", "pw").await;
    let (store_id, _) = app.create_random_user("store", "pw").await;
    let (status, _) = app.post("/api/hierarchy", json!({ "parent_id": manager_id, "child_id": store_id })).await;
    assert_eq!(status, StatusCode::CREATED);

    // The store user cannot climb above its own parent
    let (status, body) = app.put(&format!("/api/users/{}", store_id), json!({ "role": "admin" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    let (status, _) = app.put(&format!("/api/users/{}", store_id), json!({ "role": "manager" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.put(&format!("/api/users/{}", manager_id), json!({ "role": "store" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = app.put(&format!("/api/users/{}", store_id), json!({ "role": "tu" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["role"], "tu");

    // Even a stale link to a higher rank gives no reach over that account
    {
        let mut conn = app.data.pool.get().unwrap();
        diesel::update(users::table.find(store_id as i32))
            .set(users::role.eq("admin"))
            .execute(&mut conn)
            .unwrap();
    }

    app.new_session();
    app.login(&manager, "pw").await;
    let (_, body) = app.get("/api/users").await;
    assert_eq!(ids_of(&body), vec![manager_id]);
    let (status, _) = app.get(&format!("/api/users/{}", store_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.put(&format!("/api/users/{}", store_id), json!({ "password": "taken" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.delete(&format!("/api/users/{}", store_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn test_password_change_invalidates_sessions() {
    let mut app = init_app().await;
    app.login_admin().await;
    let (user_id, username) = app.create_random_user("tu", "first").await;
    let admin_session = app.new_session();

    let (status, _) = app.login(&username, "first").await;
    assert_eq!(status, StatusCode::OK);
    let user_session = app.new_session();

    app.restore_session(admin_session);
    let (status, _) = app.put(&format!("/api/users/{}", user_id), json!({ "password": "second" })).await;
    assert_eq!(status, StatusCode::OK);

    app.restore_session(user_session);
    let (status, _) = app.get("/api/me").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    app.new_session();
    let (status, _) = app.login(&username, "first").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.login(&username, "second").await;
    assert_eq!(status, StatusCode::OK);

    // Changing your own password keeps you logged in
    let (status, _) = app.put(&format!("/api/users/{}", user_id), json!({ "password": "third" })).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app.get("/api/me").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"].to_i64(), user_id);
}

#[actix_rt::test]
async fn test_custom_permissions() {
    let mut app = init_app().await;
    app.login_admin().await;
    let (user_id, username) = app.create_random_user("store", "pw").await;
    let admin_session = app.new_session();

    app.login(&username, "pw").await;
    let (status, body) = app.get("/api/permissions/check?resource=reports&action=export").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
    let (status, body) = app.get("/api/permissions/check?resource=sensors&action=read").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);
    let (_, body) = app.get("/api/permissions/check?resource=spaceships&action=read").await;
    assert_eq!(body["allowed"], false);
    let (status, _) = app.get("/api/permissions/check?resource=reports").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.get("/api/permissions/matrix").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = app.get(&format!("/api/permissions/user/{}", user_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "store");
    let user_session = app.new_session();

    app.restore_session(admin_session);
    let (status, body) = app.get("/api/permissions/matrix").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"]["users"], json!([]));
    assert_eq!(body["manager"]["reports"], json!(["create", "read", "update", "export"]));

    let (status, body) = app.post("/api/permissions/custom", json!({
        "user_id": user_id, "resource": "reports", "action": "export", "granted": true,
    })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["permission"]["granted"], true);
    let (status, _) = app.post("/api/permissions/custom", json!({
        "user_id": user_id, "resource": "sensors", "action": "read", "granted": false,
    })).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = app.post("/api/permissions/custom", json!({
        "user_id": user_id, "resource": "reports", "action": "fly", "granted": true,
    })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.post("/api/permissions/custom", json!({
        "user_id": 4242, "resource": "reports", "action": "read", "granted": true,
    })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    // An omitted `granted` is rejected rather than read as a grant
    let (status, body) = app.post("/api/permissions/custom", json!({
        "user_id": user_id, "resource": "users", "action": "delete",
    })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    let (_, body) = app.get(&format!("/api/permissions/user/{}", user_id)).await;
    assert_eq!(body["permissions"]["users"], json!([]));

    let (status, body) = app.get("/api/permissions/audit").await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|x| x["username"].to_str() == username && x["granted_by_name"] == "admin"));

    let (_, body) = app.get(&format!("/api/permissions/user/{}", user_id)).await;
    assert_eq!(body["base_permissions"]["reports"], json!(["read"]));
    assert_eq!(body["permissions"]["reports"], json!(["read", "export"]));
    assert_eq!(body["permissions"]["sensors"], json!([]));
    let admin_session = app.new_session();

    app.restore_session(user_session);
    let (_, body) = app.get("/api/permissions/check?resource=reports&action=export").await;
    assert_eq!(body["allowed"], true);
    let (status, _) = app.get("/api/sensors").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.get("/api/permissions/audit").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let user_session = app.new_session();

    app.restore_session(admin_session);
    let (status, body) = app.delete(&format!("/api/permissions/custom/reset/{}", user_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"].to_i64(), 2);
    let (_, body) = app.get("/api/permissions/custom").await;
    assert_eq!(body, json!([]));

    app.restore_session(user_session);
    let (_, body) = app.get("/api/permissions/check?resource=reports&action=export").await;
    assert_eq!(body["allowed"], false);
}

#[actix_rt::test]
async fn test_settings() {
    let mut app = init_app().await;
    app.login_admin().await;

    let (status, body) = app.get("/api/settings").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["theme"], "dark");
    assert_eq!(body["lang"], "ru");
    assert_eq!(body["email_notify"], true);
    assert_eq!(body["push_notify"], false);

    let (status, body) = app.put("/api/settings", json!({ "theme": "light", "push_notify": true })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["theme"], "light");
    assert_eq!(body["lang"], "ru");

    let (status, _) = app.put("/api/settings", json!({ "theme": "neon" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.put("/api/settings", json!({ "lang": "de" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = app.get("/api/settings").await;
    assert_eq!(body["theme"], "light");
    assert_eq!(body["push_notify"], true);

    let (status, body) = app.post("/api/settings/reset", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["theme"], "dark");
    let (_, body) = app.get("/api/settings").await;
    assert_eq!(body["theme"], "dark");
    assert_eq!(body["push_notify"], false);
}
