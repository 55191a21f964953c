use ulid::Ulid;

use crate::guard::{self, Operation};
use crate::model::*;

use super::conflict::{conflicts, validate_span};
use super::{Engine, EngineError};

impl Engine {
    /// Every room, ordered by id.
    pub async fn list_rooms(&self, principal: &Principal) -> Result<Vec<RoomInfo>, EngineError> {
        guard::require(principal, Operation::ReadRooms)?;
        let mut rooms = Vec::with_capacity(self.store.room_count());
        for id in self.store.room_ids() {
            let Some(rs) = self.store.get_room(&id) else {
                continue; // deleted since the id snapshot
            };
            let guard = rs.read().await;
            if !guard.deleted {
                rooms.push(guard.info());
            }
        }
        Ok(rooms)
    }

    pub async fn get_room(&self, principal: &Principal, room_id: Ulid) -> Result<RoomInfo, EngineError> {
        guard::require(principal, Operation::ReadRooms)?;
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        if guard.deleted {
            return Err(EngineError::RoomNotFound(room_id));
        }
        Ok(guard.info())
    }

    /// A room's embedded bookings, ordered by booking id.
    pub async fn room_bookings(
        &self,
        principal: &Principal,
        room_id: Ulid,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        Ok(self.get_room(principal, room_id).await?.bookings)
    }

    /// Rooms with no booking overlapping `span`, ordered by id.
    pub async fn list_available_rooms(
        &self,
        principal: &Principal,
        span: HourSpan,
    ) -> Result<Vec<RoomInfo>, EngineError> {
        guard::require(principal, Operation::ReadRooms)?;
        validate_span(&span)?;
        let mut free = Vec::new();
        for id in self.store.room_ids() {
            let Some(rs) = self.store.get_room(&id) else {
                continue;
            };
            let guard = rs.read().await;
            if !guard.deleted && !conflicts(guard.spans_except(None), &span) {
                free.push(guard.info());
            }
        }
        Ok(free)
    }

    /// The caller's bookings across all rooms, ordered by room id then booking id.
    pub async fn list_my_reservations(
        &self,
        principal: &Principal,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        guard::require(principal, Operation::ReadOwnBookings)?;
        let mut mine = Vec::new();
        for id in self.store.room_ids() {
            let Some(rs) = self.store.get_room(&id) else {
                continue;
            };
            let guard = rs.read().await;
            if guard.deleted {
                continue;
            }
            mine.extend(
                guard
                    .bookings
                    .values()
                    .filter(|b| b.booked_by == principal.subject_id)
                    .map(Booking::info),
            );
        }
        Ok(mine)
    }
}
