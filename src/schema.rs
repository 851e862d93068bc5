// Database schema definitions
diesel::table! {
    users (user_id) {
        user_id -> Int4,
        name -> Varchar,
        email -> Varchar,
        password_hash -> Varchar,
        phone_number -> Nullable<Varchar>,
        role -> Varchar,
        is_active -> Bool,
        profile_image -> Nullable<Varchar>,
        last_login -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    refresh_token (token_id) {
        token_id -> Int4,
        user_id -> Int4,
        token -> Varchar,
        expires_at -> Timestamp,
        created_at -> Timestamp,
    }
}

diesel::table! {
    rooms (room_id) {
        room_id -> Int4,
        owner_id -> Int4,
        title -> Varchar,
        description -> Text,
        address -> Varchar,
        city -> Varchar,
        price_per_month -> Numeric,
        size_sqm -> Nullable<Int4>,
        capacity -> Int4,
        is_available -> Bool,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    room_images (image_id) {
        image_id -> Int4,
        room_id -> Int4,
        image_url -> Varchar,
        is_primary -> Bool,
        created_at -> Timestamp,
    }
}

diesel::table! {
    facilities (facility_id) {
        facility_id -> Int4,
        name -> Varchar,
        icon -> Nullable<Varchar>,
    }
}

diesel::table! {
    room_facilities (room_id, facility_id) {
        room_id -> Int4,
        facility_id -> Int4,
    }
}

diesel::table! {
    bookmarks (bookmark_id) {
        bookmark_id -> Int4,
        user_id -> Int4,
        room_id -> Int4,
        created_at -> Timestamp,
    }
}

diesel::table! {
    survey_appointments (appointment_id) {
        appointment_id -> Int4,
        room_id -> Int4,
        renter_id -> Int4,
        scheduled_at -> Timestamp,
        status -> Varchar,
        notes -> Nullable<Text>,
        cancel_reason -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    payout_methods (payout_method_id) {
        payout_method_id -> Int4,
        owner_id -> Int4,
        method_type -> Varchar,
        provider_code -> Varchar,
        account_number -> Varchar,
        account_holder -> Varchar,
        is_default -> Bool,
        created_at -> Timestamp,
    }
}

diesel::table! {
    payments (payment_id) {
        payment_id -> Int4,
        room_id -> Int4,
        renter_id -> Int4,
        owner_id -> Int4,
        months -> Int4,
        amount -> Numeric,
        platform_fee -> Numeric,
        owner_amount -> Numeric,
        payment_status -> Varchar,
        transfer_status -> Varchar,
        gateway_reference -> Nullable<Varchar>,
        checkout_url -> Nullable<Varchar>,
        expires_at -> Timestamp,
        paid_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    disbursements (disbursement_id) {
        disbursement_id -> Int4,
        payment_id -> Int4,
        owner_id -> Int4,
        payout_method_id -> Nullable<Int4>,
        amount -> Numeric,
        status -> Varchar,
        retry_count -> Int4,
        last_error -> Nullable<Text>,
        next_attempt_at -> Timestamp,
        gateway_reference -> Nullable<Varchar>,
        completed_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    reviews (review_id) {
        review_id -> Int4,
        payment_id -> Int4,
        room_id -> Int4,
        renter_id -> Int4,
        rating -> Float8,
        comment -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    reports (report_id) {
        report_id -> Int4,
        reporter_id -> Int4,
        room_id -> Int4,
        report_type -> Varchar,
        description -> Text,
        status -> Varchar,
        owner_response -> Nullable<Text>,
        responded_at -> Nullable<Timestamp>,
        admin_note -> Nullable<Text>,
        resolved_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    messages (message_id) {
        message_id -> Int4,
        sender_id -> Int4,
        receiver_id -> Int4,
        room_id -> Nullable<Int4>,
        body -> Text,
        is_read -> Bool,
        created_at -> Timestamp,
    }
}

diesel::joinable!(refresh_token -> users (user_id));
diesel::joinable!(rooms -> users (owner_id));
diesel::joinable!(room_images -> rooms (room_id));
diesel::joinable!(room_facilities -> rooms (room_id));
diesel::joinable!(room_facilities -> facilities (facility_id));
diesel::joinable!(bookmarks -> rooms (room_id));
diesel::joinable!(survey_appointments -> rooms (room_id));
diesel::joinable!(payout_methods -> users (owner_id));
diesel::joinable!(payments -> rooms (room_id));
diesel::joinable!(disbursements -> payments (payment_id));
diesel::joinable!(reviews -> rooms (room_id));
diesel::joinable!(reports -> rooms (room_id));

diesel::allow_tables_to_appear_in_same_query!(
    users, refresh_token, rooms, room_images, facilities, room_facilities,
    bookmarks, survey_appointments, payout_methods, payments, disbursements,
    reviews, reports, messages,
);
