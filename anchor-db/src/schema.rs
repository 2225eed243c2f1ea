// Logical schema of §6: `request`, `anchor`, `metadata`. Hand-written in the
// same shape `diesel print-schema` would produce for these tables (see the
// teacher's `pgsql-store/src/schema.rs`).

diesel::table! {
    request (id) {
        id -> Uuid,
        #[max_length = 255]
        cid -> Varchar,
        #[max_length = 255]
        stream_id -> Varchar,
        status -> Int4,
        message -> Text,
        pinned -> Bool,
        #[max_length = 255]
        origin -> Nullable<Varchar>,
        timestamp -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    anchor (id) {
        id -> Uuid,
        request_id -> Uuid,
        #[max_length = 255]
        path -> Varchar,
        #[max_length = 255]
        cid -> Varchar,
        #[max_length = 255]
        proof_cid -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    metadata (stream_id) {
        #[max_length = 255]
        stream_id -> Varchar,
        metadata -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        used_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(request, anchor, metadata);
diesel::joinable!(anchor -> request (request_id));
