diesel::table! {
    checkouts (id) {
        id -> Uuid,
        item_name -> Varchar,
        member_id -> Uuid,
        checked_out_at -> Timestamptz,
        due_at -> Timestamptz,
        returned_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    machines (id) {
        id -> Uuid,
        name -> Varchar,
        category -> Varchar,
        status -> Varchar,
        job_member_id -> Nullable<Uuid>,
        job_estimated_minutes -> Nullable<Int8>,
        job_started_at -> Nullable<Timestamptz>,
        job_completes_at -> Nullable<Timestamptz>,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Nullable<Bool>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    reservations (id) {
        id -> Uuid,
        machine_id -> Uuid,
        member_id -> Uuid,
        starts_at -> Timestamptz,
        ends_at -> Timestamptz,
        purpose -> Text,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(reservations -> machines (machine_id));

diesel::allow_tables_to_appear_in_same_query!(
    checkouts,
    machines,
    outbox_events,
    reservations,
);
