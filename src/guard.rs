//! Role and ownership gate. Every engine operation consults this before
//! touching state; nothing here knows about tokens or the wire.

use crate::engine::EngineError;
use crate::model::{Booking, Principal, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateRoom,
    UpdateRoom,
    DeleteRoom,
    ReadRooms,
    CreateBooking,
    ReadOwnBookings,
    UpdateOwnBooking,
    CancelOwnBooking,
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Operation::CreateRoom => "create room",
            Operation::UpdateRoom => "update room",
            Operation::DeleteRoom => "delete room",
            Operation::ReadRooms => "read rooms",
            Operation::CreateBooking => "create booking",
            Operation::ReadOwnBookings => "read own bookings",
            Operation::UpdateOwnBooking => "update booking",
            Operation::CancelOwnBooking => "cancel booking",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Role check only. Ownership of a specific booking is [`require_owner`].
pub fn authorize(principal: &Principal, op: Operation) -> Decision {
    match op {
        Operation::CreateRoom | Operation::UpdateRoom | Operation::DeleteRoom => {
            if principal.role == Role::Admin {
                Decision::Allow
            } else {
                Decision::Deny
            }
        }
        Operation::ReadRooms
        | Operation::CreateBooking
        | Operation::ReadOwnBookings
        | Operation::UpdateOwnBooking
        | Operation::CancelOwnBooking => Decision::Allow,
    }
}

pub fn require(principal: &Principal, op: Operation) -> Result<(), EngineError> {
    match authorize(principal, op) {
        Decision::Allow => Ok(()),
        Decision::Deny => {
            tracing::warn!(
                subject = %principal.subject_id,
                role = %principal.role,
                operation = op.label(),
                "operation denied"
            );
            Err(EngineError::Forbidden(op.label()))
        }
    }
}

/// Only the booking's creator may change or cancel it. Admins get no bypass.
pub fn require_owner(principal: &Principal, booking: &Booking) -> Result<(), EngineError> {
    if booking.booked_by == principal.subject_id {
        Ok(())
    } else {
        tracing::warn!(
            subject = %principal.subject_id,
            booking_id = %booking.id,
            "booking owned by another user"
        );
        Err(EngineError::NotOwner(booking.id))
    }
}
