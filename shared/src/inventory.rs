db_enum! {
    pub enum InventoryStatus as "inventory status" {
        Active => "active",
        Inactive => "inactive",
        Discontinued => "discontinued",
    }
}

db_enum! {
    pub enum MovementType as "movement type" {
        Inbound => "inbound",
        Outbound => "outbound",
        Reservation => "reservation",
        Release => "release",
    }
}

impl MovementType {
    /// Whether the movement changes `reserved_quantity` rather than on-hand
    /// stock.
    pub fn touches_reserved(self) -> bool {
        matches!(self, MovementType::Reservation | MovementType::Release)
    }
}

db_enum! {
    pub enum MovementReason as "movement reason" {
        Sale => "sale",
        Purchase => "purchase",
        Return => "return",
        Damage => "damage",
        Adjustment => "adjustment",
        Reservation => "reservation",
        CancelReservation => "cancel_reservation",
    }
}

db_enum! {
    /// `expired` is set by the expiry sweeper when a hold lapses before the
    /// order ships.
    pub enum ReservationStatus as "reservation status" {
        Active => "active",
        Fulfilled => "fulfilled",
        Cancelled => "cancelled",
        Expired => "expired",
    }
}

impl ReservationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }
}

db_enum! {
    pub enum AlertType as "alert type" {
        LowStock => "low_stock",
        OutOfStock => "out_of_stock",
    }
}
