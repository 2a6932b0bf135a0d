diesel::table! {
    orders (id) {
        id -> Int8,
        user_id -> Int8,
        order_number -> Nullable<Varchar>,
        status -> Varchar,
        payment_status -> Varchar,
        payment_method -> Varchar,
        shipping_method -> Varchar,
        coupon_code -> Nullable<Varchar>,
        currency -> Varchar,
        subtotal_amount -> Int8,
        tax_amount -> Int8,
        shipping_amount -> Int8,
        discount_amount -> Int8,
        total_amount -> Int8,
        shipping_address -> Jsonb,
        billing_address -> Jsonb,
        notes -> Nullable<Text>,
        shipped_at -> Nullable<Timestamptz>,
        delivered_at -> Nullable<Timestamptz>,
        cancelled_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    order_items (id) {
        id -> Int8,
        order_id -> Int8,
        product_id -> Int8,
        variant_id -> Nullable<Int8>,
        sku -> Varchar,
        product_name -> Varchar,
        variant_title -> Nullable<Varchar>,
        quantity -> Int4,
        unit_price -> Int8,
        total_price -> Int8,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    order_status_history (id) {
        id -> Int8,
        order_id -> Int8,
        status -> Varchar,
        comment -> Nullable<Text>,
        changed_by -> Nullable<Int8>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    products (id) {
        id -> Int8,
        name -> Varchar,
        sku -> Varchar,
        price -> Int8,
        status -> Varchar,
        track_quantity -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    product_variants (id) {
        id -> Int8,
        product_id -> Int8,
        sku -> Varchar,
        title -> Varchar,
        price -> Int8,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    carts (id) {
        id -> Int8,
        user_id -> Int8,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    cart_items (id) {
        id -> Int8,
        cart_id -> Int8,
        product_id -> Int8,
        variant_id -> Nullable<Int8>,
        quantity -> Int4,
        unit_price -> Int8,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(order_items -> orders (order_id));
diesel::joinable!(order_status_history -> orders (order_id));
diesel::joinable!(product_variants -> products (product_id));
diesel::joinable!(cart_items -> carts (cart_id));

diesel::allow_tables_to_appear_in_same_query!(
    orders,
    order_items,
    order_status_history,
    products,
    product_variants,
    carts,
    cart_items,
);
