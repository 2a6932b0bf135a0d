diesel::table! {
    inventory_items (id) {
        id -> Int8,
        product_id -> Int8,
        variant_id -> Nullable<Int8>,
        warehouse_id -> Int8,
        quantity -> Int4,
        reserved_quantity -> Int4,
        available_quantity -> Int4,
        reorder_level -> Int4,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    inventory_movements (id) {
        id -> Int8,
        inventory_item_id -> Int8,
        product_id -> Int8,
        variant_id -> Nullable<Int8>,
        warehouse_id -> Int8,
        movement_type -> Varchar,
        reason -> Varchar,
        quantity -> Int4,
        previous_quantity -> Int4,
        new_quantity -> Int4,
        reference_type -> Nullable<Varchar>,
        reference_id -> Nullable<Int8>,
        notes -> Nullable<Text>,
        created_by -> Nullable<Int8>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    stock_reservations (id) {
        id -> Int8,
        inventory_item_id -> Int8,
        product_id -> Int8,
        variant_id -> Nullable<Int8>,
        warehouse_id -> Int8,
        order_id -> Int8,
        order_item_id -> Int8,
        quantity -> Int4,
        status -> Varchar,
        expires_at -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    stock_alerts (id) {
        id -> Int8,
        inventory_item_id -> Int8,
        product_id -> Int8,
        warehouse_id -> Int8,
        alert_type -> Varchar,
        threshold -> Int4,
        current_quantity -> Int4,
        resolved -> Bool,
        resolved_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(inventory_movements -> inventory_items (inventory_item_id));
diesel::joinable!(stock_reservations -> inventory_items (inventory_item_id));
diesel::joinable!(stock_alerts -> inventory_items (inventory_item_id));

diesel::allow_tables_to_appear_in_same_query!(
    inventory_items,
    inventory_movements,
    stock_reservations,
    stock_alerts,
);
