use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Hour of the daily schedule. Bookings carry no calendar date.
pub type Hour = i64;

/// Half-open hour interval `[start, end)`.
///
/// Construction does not validate; `engine::validate_span` is the gate for
/// anything arriving from a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HourSpan {
    pub start: Hour,
    pub end: Hour,
}

impl HourSpan {
    pub fn new(start: Hour, end: Hour) -> Self {
        Self { start, end }
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end
    }

    /// Touching endpoints (`[9, 11)` and `[11, 13)`) do not overlap.
    pub fn overlaps(&self, other: &HourSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for HourSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// An authenticated caller, as produced by verifying a session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub subject_id: Ulid,
    pub role: Role,
}

impl Principal {
    pub fn new(subject_id: Ulid, role: Role) -> Self {
        Self { subject_id, role }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: Ulid,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password_hash", &"[REDACTED]")
            .field("role", &self.role)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub booked_by: Ulid,
    pub span: HourSpan,
}

impl Booking {
    pub fn info(&self) -> BookingInfo {
        BookingInfo {
            id: self.id,
            room_id: self.room_id,
            booked_by: self.booked_by,
            start_hour: self.span.start,
            end_hour: self.span.end,
        }
    }
}

/// A room aggregate: the room's attributes plus the bookings it owns.
/// Bookings are only reachable through the room and die with it.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub amenities: BTreeSet<String>,
    /// Price in minor currency units.
    pub price: i64,
    /// Keyed by booking id, so iteration order is stable.
    pub bookings: BTreeMap<Ulid, Booking>,
    /// Set under the write lock when the room is deleted, before it leaves the store.
    pub deleted: bool,
}

impl RoomState {
    pub fn new(id: Ulid, room: NewRoom) -> Self {
        Self {
            id,
            name: room.name,
            capacity: room.capacity,
            amenities: room.amenities,
            price: room.price,
            bookings: BTreeMap::new(),
            deleted: false,
        }
    }

    pub fn insert_booking(&mut self, booking: Booking) {
        self.bookings.insert(booking.id, booking);
    }

    pub fn remove_booking(&mut self, id: &Ulid) -> Option<Booking> {
        self.bookings.remove(id)
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.get(id)
    }

    /// Spans of every booking except `exclude` (the booking being rescheduled).
    pub fn spans_except(&self, exclude: Option<Ulid>) -> impl Iterator<Item = &HourSpan> {
        self.bookings
            .values()
            .filter(move |b| Some(b.id) != exclude)
            .map(|b| &b.span)
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            name: self.name.clone(),
            capacity: self.capacity,
            amenities: self.amenities.clone(),
            price: self.price,
            bookings: self.bookings.values().map(Booking::info).collect(),
        }
    }
}

/// Fields for a new room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoom {
    pub name: String,
    pub capacity: u32,
    pub amenities: BTreeSet<String>,
    pub price: i64,
}

/// Partial room update. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPatch {
    pub name: Option<String>,
    pub capacity: Option<u32>,
    pub amenities: Option<BTreeSet<String>>,
    pub price: Option<i64>,
}

impl RoomPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.capacity.is_none()
            && self.amenities.is_none()
            && self.price.is_none()
    }
}

/// The event types. Flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        username: String,
        password_hash: String,
        role: Role,
    },
    RoomCreated {
        id: Ulid,
        name: String,
        capacity: u32,
        amenities: BTreeSet<String>,
        price: i64,
    },
    RoomUpdated {
        id: Ulid,
        name: String,
        capacity: u32,
        amenities: BTreeSet<String>,
        price: i64,
    },
    RoomDeleted {
        id: Ulid,
    },
    BookingCreated {
        id: Ulid,
        room_id: Ulid,
        booked_by: Ulid,
        span: HourSpan,
    },
    BookingRescheduled {
        id: Ulid,
        room_id: Ulid,
        span: HourSpan,
    },
    BookingCancelled {
        id: Ulid,
        room_id: Ulid,
    },
}

impl Event {
    /// The room an event mutates, if any.
    pub fn room_id(&self) -> Option<Ulid> {
        match self {
            Event::RoomCreated { id, .. }
            | Event::RoomUpdated { id, .. }
            | Event::RoomDeleted { id } => Some(*id),
            Event::BookingCreated { room_id, .. }
            | Event::BookingRescheduled { room_id, .. }
            | Event::BookingCancelled { room_id, .. } => Some(*room_id),
            Event::UserRegistered { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub amenities: BTreeSet<String>,
    pub price: i64,
    pub bookings: Vec<BookingInfo>,
}

/// A booking annotated with its owning room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub room_id: Ulid,
    pub booked_by: Ulid,
    pub start_hour: Hour,
    pub end_hour: Hour,
}

impl BookingInfo {
    pub fn span(&self) -> HourSpan {
        HourSpan::new(self.start_hour, self.end_hour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_room(name: &str) -> NewRoom {
        NewRoom {
            name: name.into(),
            capacity: 8,
            amenities: BTreeSet::from(["projector".to_string()]),
            price: 2500,
        }
    }

    fn booking(room: &RoomState, start: Hour, end: Hour) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id: room.id,
            booked_by: Ulid::new(),
            span: HourSpan::new(start, end),
        }
    }

    #[test]
    fn span_basics() {
        let s = HourSpan::new(9, 11);
        assert!(s.is_well_formed());
        assert!(!HourSpan::new(11, 11).is_well_formed());
        assert!(!HourSpan::new(12, 11).is_well_formed());
        assert_eq!(s.to_string(), "[9, 11)");
    }

    #[test]
    fn span_overlap_half_open() {
        let a = HourSpan::new(9, 11);
        assert!(a.overlaps(&HourSpan::new(10, 12)));
        assert!(a.overlaps(&HourSpan::new(8, 10)));
        assert!(a.overlaps(&HourSpan::new(9, 11)));
        assert!(a.overlaps(&HourSpan::new(0, 24)));
        assert!(!a.overlaps(&HourSpan::new(11, 13))); // touching end
        assert!(!a.overlaps(&HourSpan::new(7, 9))); // touching start
    }

    #[test]
    fn role_parse_and_display() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" USER ".parse::<Role>().unwrap(), Role::User);
        assert!("root".parse::<Role>().is_err());
        assert_eq!(Role::Admin.to_string(), "admin");
    }

    #[test]
    fn user_debug_redacts_hash() {
        let user = User {
            id: Ulid::new(),
            username: "alice".into(),
            password_hash: "$2b$04$secret".into(),
            role: Role::User,
        };
        let out = format!("{user:?}");
        assert!(out.contains("alice"));
        assert!(!out.contains("secret"));
    }

    #[test]
    fn room_bookings_ordered_by_id() {
        let mut room = RoomState::new(Ulid::new(), new_room("A"));
        let first = booking(&room, 14, 15);
        let second = booking(&room, 9, 10);
        let (first_id, second_id) = (first.id, second.id);
        room.insert_booking(second);
        room.insert_booking(first);
        let ids: Vec<Ulid> = room.bookings.keys().copied().collect();
        let mut sorted = vec![first_id, second_id];
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn spans_except_skips_excluded() {
        let mut room = RoomState::new(Ulid::new(), new_room("A"));
        let a = booking(&room, 9, 10);
        let b = booking(&room, 12, 13);
        let a_id = a.id;
        room.insert_booking(a);
        room.insert_booking(b);
        let spans: Vec<HourSpan> = room.spans_except(Some(a_id)).copied().collect();
        assert_eq!(spans, vec![HourSpan::new(12, 13)]);
        assert_eq!(room.spans_except(None).count(), 2);
    }

    #[test]
    fn remove_nonexistent_booking_returns_none() {
        let mut room = RoomState::new(Ulid::new(), new_room("A"));
        room.insert_booking(booking(&room, 9, 10));
        assert!(room.remove_booking(&Ulid::new()).is_none());
        assert_eq!(room.bookings.len(), 1);
    }

    #[test]
    fn room_info_carries_bookings() {
        let mut room = RoomState::new(Ulid::new(), new_room("Board"));
        let b = booking(&room, 9, 11);
        let bid = b.id;
        room.insert_booking(b);
        let info = room.info();
        assert_eq!(info.name, "Board");
        assert_eq!(info.bookings.len(), 1);
        assert_eq!(info.bookings[0].id, bid);
        assert_eq!(info.bookings[0].room_id, room.id);
        assert_eq!(info.bookings[0].span(), HourSpan::new(9, 11));
    }

    #[test]
    fn patch_emptiness() {
        assert!(RoomPatch::default().is_empty());
        let patch = RoomPatch {
            price: Some(10),
            ..RoomPatch::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn event_room_id() {
        let rid = Ulid::new();
        assert_eq!(Event::RoomDeleted { id: rid }.room_id(), Some(rid));
        assert_eq!(
            Event::BookingCancelled { id: Ulid::new(), room_id: rid }.room_id(),
            Some(rid)
        );
        let user = Event::UserRegistered {
            id: Ulid::new(),
            username: "bob".into(),
            password_hash: "x".into(),
            role: Role::User,
        };
        assert_eq!(user.room_id(), None);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RoomCreated {
            id: Ulid::new(),
            name: "Orion".into(),
            capacity: 12,
            amenities: BTreeSet::from(["tv".to_string(), "whiteboard".to_string()]),
            price: 4000,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
