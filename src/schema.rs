diesel::table! {
    custom_permissions (id) {
        id -> Integer,
        user_id -> Integer,
        resource -> Text,
        action -> Text,
        granted -> Bool,
        granted_by -> Nullable<Integer>,
        granted_at -> Timestamp,
    }
}

diesel::table! {
    sensor_downtime (id) {
        id -> Integer,
        sensor_id -> Integer,
        started_at -> Timestamp,
        ended_at -> Nullable<Timestamp>,
    }
}

diesel::table! {
    sensors (id) {
        id -> Integer,
        device_id -> Text,
        name -> Text,
        location -> Text,
        status -> Text,
        store_id -> Nullable<Integer>,
        visitor_count -> Integer,
        last_seen -> Nullable<Timestamp>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    stores (id) {
        id -> Integer,
        name -> Text,
        address -> Text,
        latitude -> Nullable<Double>,
        longitude -> Nullable<Double>,
        tu_id -> Nullable<Integer>,
        rd_id -> Nullable<Integer>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    user_hierarchy (id) {
        id -> Integer,
        parent_id -> Integer,
        child_id -> Integer,
        hierarchy_type -> Text,
        created_at -> Timestamp,
    }
}

diesel::table! {
    user_sensors (user_id, sensor_id) {
        user_id -> Integer,
        sensor_id -> Integer,
    }
}

diesel::table! {
    user_settings (user_id) {
        user_id -> Integer,
        theme -> Text,
        lang -> Text,
        email_notify -> Bool,
        push_notify -> Bool,
    }
}

diesel::table! {
    users (id) {
        id -> Integer,
        username -> Text,
        email -> Nullable<Text>,
        password_hash -> Text,
        role -> Text,
        last_password_change -> Timestamp,
        created_at -> Timestamp,
    }
}

diesel::table! {
    visitor_data (id) {
        id -> Integer,
        sensor_id -> Integer,
        visitor_count -> Integer,
        recorded_at -> Timestamp,
    }
}

diesel::joinable!(sensor_downtime -> sensors (sensor_id));
diesel::joinable!(sensors -> stores (store_id));
diesel::joinable!(user_sensors -> sensors (sensor_id));
diesel::joinable!(user_sensors -> users (user_id));
diesel::joinable!(user_settings -> users (user_id));
diesel::joinable!(visitor_data -> sensors (sensor_id));

diesel::allow_tables_to_appear_in_same_query!(
    custom_permissions,
    sensor_downtime,
    sensors,
    stores,
    user_hierarchy,
    user_sensors,
    user_settings,
    users,
    visitor_data,
);
