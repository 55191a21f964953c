use tokio::sync::oneshot;
use ulid::Ulid;

use crate::guard::{self, Operation};
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_span};
use super::{Engine, EngineError, WalCommand};

fn validate_room_fields(
    name: &str,
    capacity: u32,
    amenities: &std::collections::BTreeSet<String>,
    price: i64,
) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Invalid("room name is required"));
    }
    if name.len() > MAX_ROOM_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if capacity == 0 {
        return Err(EngineError::Invalid("capacity must be positive"));
    }
    if capacity > MAX_ROOM_CAPACITY {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    if amenities.len() > MAX_AMENITIES {
        return Err(EngineError::LimitExceeded("too many amenities"));
    }
    if amenities.iter().any(|a| a.is_empty() || a.len() > MAX_AMENITY_LEN) {
        return Err(EngineError::Invalid("amenity must be 1 to 64 bytes"));
    }
    if price < 0 {
        return Err(EngineError::Invalid("price must not be negative"));
    }
    if price > MAX_PRICE {
        return Err(EngineError::LimitExceeded("price too large"));
    }
    Ok(())
}

impl Engine {
    // ── Room inventory (admin) ───────────────────────────────

    pub async fn create_room(
        &self,
        principal: &Principal,
        room: NewRoom,
    ) -> Result<RoomInfo, EngineError> {
        guard::require(principal, Operation::CreateRoom)?;
        validate_room_fields(&room.name, room.capacity, &room.amenities, room.price)?;
        let _commit = self.commit_gate.read().await;
        let _inventory = self.inventory.lock().await;
        if self.store.room_count() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let id = Ulid::new();
        let event = Event::RoomCreated {
            id,
            name: room.name.clone(),
            capacity: room.capacity,
            amenities: room.amenities.clone(),
            price: room.price,
        };
        self.wal_append(&event).await?;
        let rs = RoomState::new(id, room);
        let info = rs.info();
        self.store.insert_room(rs);
        tracing::info!(room_id = %id, name = %info.name, "room created");
        Ok(info)
    }

    /// Patch a room. Fields left `None` keep their current value.
    pub async fn update_room(
        &self,
        principal: &Principal,
        room_id: Ulid,
        patch: RoomPatch,
    ) -> Result<RoomInfo, EngineError> {
        guard::require(principal, Operation::UpdateRoom)?;
        if patch.is_empty() {
            return Err(EngineError::Invalid("no fields to update"));
        }
        let _commit = self.commit_gate.read().await;
        let mut guard = self.lock_room(room_id).await?;

        let name = patch.name.unwrap_or_else(|| guard.name.clone());
        let capacity = patch.capacity.unwrap_or(guard.capacity);
        let amenities = patch.amenities.unwrap_or_else(|| guard.amenities.clone());
        let price = patch.price.unwrap_or(guard.price);
        validate_room_fields(&name, capacity, &amenities, price)?;

        let event = Event::RoomUpdated { id: room_id, name, capacity, amenities, price };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(%room_id, "room updated");
        Ok(guard.info())
    }

    /// Remove a room together with every booking it holds.
    pub async fn delete_room(&self, principal: &Principal, room_id: Ulid) -> Result<(), EngineError> {
        guard::require(principal, Operation::DeleteRoom)?;
        let _commit = self.commit_gate.read().await;
        let mut guard = self.lock_room(room_id).await?;

        let event = Event::RoomDeleted { id: room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        self.store.remove_room(&room_id);
        tracing::info!(%room_id, dropped_bookings = guard.bookings.len(), "room deleted");
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────────

    pub async fn create_booking(
        &self,
        principal: &Principal,
        room_id: Ulid,
        span: HourSpan,
    ) -> Result<BookingInfo, EngineError> {
        guard::require(principal, Operation::CreateBooking)?;
        validate_span(&span)?;
        let _commit = self.commit_gate.read().await;
        let mut guard = self.lock_room(room_id).await?;

        check_no_conflict(&guard, &span, None)?;

        let id = Ulid::new();
        let event = Event::BookingCreated {
            id,
            room_id,
            booked_by: principal.subject_id,
            span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(booking_id = %id, %room_id, %span, "booking created");
        guard
            .booking(&id)
            .map(Booking::info)
            .ok_or(EngineError::BookingNotFound(id))
    }

    /// Move an owned booking to a new interval. The booking does not conflict with itself.
    pub async fn update_reservation(
        &self,
        principal: &Principal,
        room_id: Ulid,
        booking_id: Ulid,
        span: HourSpan,
    ) -> Result<BookingInfo, EngineError> {
        guard::require(principal, Operation::UpdateOwnBooking)?;
        let _commit = self.commit_gate.read().await;
        let mut guard = self.lock_room(room_id).await?;
        let booking = guard
            .booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        guard::require_owner(principal, booking)?;
        validate_span(&span)?;
        check_no_conflict(&guard, &span, Some(booking_id))?;

        let event = Event::BookingRescheduled { id: booking_id, room_id, span };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(%booking_id, %room_id, %span, "booking rescheduled");
        guard
            .booking(&booking_id)
            .map(Booking::info)
            .ok_or(EngineError::BookingNotFound(booking_id))
    }

    pub async fn cancel_reservation(
        &self,
        principal: &Principal,
        room_id: Ulid,
        booking_id: Ulid,
    ) -> Result<(), EngineError> {
        guard::require(principal, Operation::CancelOwnBooking)?;
        let _commit = self.commit_gate.read().await;
        let mut guard = self.lock_room(room_id).await?;
        let booking = guard
            .booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        guard::require_owner(principal, booking)?;

        let event = Event::BookingCancelled { id: booking_id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(%booking_id, %room_id, "booking cancelled");
        Ok(())
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // No commit may land between the snapshot and the swap.
        let _exclusive = self.commit_gate.write().await;
        let mut events: Vec<Event> = self
            .store
            .users()
            .into_iter()
            .map(|u| Event::UserRegistered {
                id: u.id,
                username: u.username,
                password_hash: u.password_hash,
                role: u.role,
            })
            .collect();

        for id in self.store.room_ids() {
            let Some(rs) = self.store.get_room(&id) else {
                continue;
            };
            let guard = rs.read().await;
            if guard.deleted {
                continue;
            }
            events.push(Event::RoomCreated {
                id: guard.id,
                name: guard.name.clone(),
                capacity: guard.capacity,
                amenities: guard.amenities.clone(),
                price: guard.price,
            });
            for booking in guard.bookings.values() {
                events.push(Event::BookingCreated {
                    id: booking.id,
                    room_id: booking.room_id,
                    booked_by: booking.booked_by,
                    span: booking.span,
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
