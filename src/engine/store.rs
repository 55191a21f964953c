use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedRoomState;

/// In-memory room and user repository. Durability comes from the engine's WAL;
/// this is the state the log replays into.
pub struct RoomStore {
    rooms: DashMap<Ulid, SharedRoomState>,
    users: DashMap<String, User>,
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            users: DashMap::new(),
        }
    }

    /// Rebuild state from a replayed log. Works on plain values, so no locks are
    /// taken until the rooms are published.
    pub fn from_events(events: &[Event]) -> Self {
        let mut rooms: HashMap<Ulid, RoomState> = HashMap::new();
        let store = Self::new();

        for event in events {
            match event {
                Event::UserRegistered { id, username, password_hash, role } => {
                    store.insert_user(User {
                        id: *id,
                        username: username.clone(),
                        password_hash: password_hash.clone(),
                        role: *role,
                    });
                }
                Event::RoomCreated { id, name, capacity, amenities, price } => {
                    let room = NewRoom {
                        name: name.clone(),
                        capacity: *capacity,
                        amenities: amenities.clone(),
                        price: *price,
                    };
                    rooms.insert(*id, RoomState::new(*id, room));
                }
                Event::RoomDeleted { id } => {
                    rooms.remove(id);
                }
                other => {
                    if let Some(room_id) = other.room_id()
                        && let Some(rs) = rooms.get_mut(&room_id)
                    {
                        Self::apply_event(rs, other);
                    }
                }
            }
        }

        for (id, rs) in rooms {
            store.rooms.insert(id, Arc::new(RwLock::new(rs)));
        }
        store
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn insert_room(&self, rs: RoomState) -> SharedRoomState {
        let id = rs.id;
        let shared = Arc::new(RwLock::new(rs));
        self.rooms.insert(id, shared.clone());
        shared
    }

    pub fn remove_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.remove(id).map(|(_, rs)| rs)
    }

    /// Room ids in ascending order, so callers iterate deterministically.
    pub fn room_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    // ── Users ────────────────────────────────────────────────

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn find_user(&self, username: &str) -> Option<User> {
        self.users.get(username).map(|e| e.value().clone())
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.username.clone(), user);
    }

    /// All users, ordered by id.
    pub fn users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        users
    }

    // ── Event application ────────────────────────────────────

    /// Apply a room-scoped event. Caller holds the room's write lock.
    pub fn apply_event(rs: &mut RoomState, event: &Event) {
        match event {
            Event::RoomUpdated { name, capacity, amenities, price, .. } => {
                rs.name = name.clone();
                rs.capacity = *capacity;
                rs.amenities = amenities.clone();
                rs.price = *price;
            }
            Event::RoomDeleted { .. } => {
                rs.deleted = true;
            }
            Event::BookingCreated { id, room_id, booked_by, span } => {
                rs.insert_booking(Booking {
                    id: *id,
                    room_id: *room_id,
                    booked_by: *booked_by,
                    span: *span,
                });
            }
            Event::BookingRescheduled { id, span, .. } => {
                if let Some(booking) = rs.bookings.get_mut(id) {
                    booking.span = *span;
                }
            }
            Event::BookingCancelled { id, .. } => {
                rs.remove_booking(id);
            }
            // Created at the map level; users are not room state.
            Event::RoomCreated { .. } | Event::UserRegistered { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn created(id: Ulid, name: &str) -> Event {
        Event::RoomCreated {
            id,
            name: name.into(),
            capacity: 4,
            amenities: BTreeSet::new(),
            price: 100,
        }
    }

    #[tokio::test]
    async fn from_events_rebuilds_rooms_and_bookings() {
        let rid = Ulid::new();
        let kept = Ulid::new();
        let moved = Ulid::new();
        let cancelled = Ulid::new();
        let owner = Ulid::new();
        let events = vec![
            created(rid, "Atlas"),
            Event::BookingCreated { id: kept, room_id: rid, booked_by: owner, span: HourSpan::new(9, 10) },
            Event::BookingCreated { id: moved, room_id: rid, booked_by: owner, span: HourSpan::new(12, 13) },
            Event::BookingRescheduled { id: moved, room_id: rid, span: HourSpan::new(14, 16) },
            Event::BookingCreated { id: cancelled, room_id: rid, booked_by: owner, span: HourSpan::new(1, 2) },
            Event::RoomUpdated {
                id: rid,
                name: "Atlas II".into(),
                capacity: 10,
                amenities: BTreeSet::from(["tv".to_string()]),
                price: 300,
            },
            Event::BookingCancelled { id: cancelled, room_id: rid },
        ];

        let store = RoomStore::from_events(&events);
        let rs = store.get_room(&rid).unwrap();
        let guard = rs.read().await;
        assert_eq!(guard.name, "Atlas II");
        assert_eq!(guard.capacity, 10);
        assert_eq!(guard.price, 300);
        assert_eq!(guard.bookings.len(), 2);
        assert_eq!(guard.booking(&moved).unwrap().span, HourSpan::new(14, 16));
        assert!(guard.booking(&cancelled).is_none());
    }

    #[test]
    fn from_events_drops_deleted_rooms_and_ignores_orphans() {
        let rid = Ulid::new();
        let events = vec![
            created(rid, "Gone"),
            Event::RoomDeleted { id: rid },
            Event::BookingCreated {
                id: Ulid::new(),
                room_id: rid,
                booked_by: Ulid::new(),
                span: HourSpan::new(9, 10),
            },
        ];
        let store = RoomStore::from_events(&events);
        assert_eq!(store.room_count(), 0);
        assert!(store.get_room(&rid).is_none());
    }

    #[test]
    fn from_events_loads_users() {
        let uid = Ulid::new();
        let store = RoomStore::from_events(&[Event::UserRegistered {
            id: uid,
            username: "carol".into(),
            password_hash: "h".into(),
            role: Role::Admin,
        }]);
        let user = store.find_user("carol").unwrap();
        assert_eq!(user.id, uid);
        assert_eq!(user.role, Role::Admin);
        assert!(store.find_user("dave").is_none());
    }

    #[test]
    fn room_ids_sorted() {
        let store = RoomStore::new();
        for _ in 0..5 {
            let id = Ulid::new();
            store.insert_room(RoomState::new(
                id,
                NewRoom { name: "r".into(), capacity: 1, amenities: BTreeSet::new(), price: 0 },
            ));
        }
        let ids = store.room_ids();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn apply_delete_tombstones() {
        let id = Ulid::new();
        let mut rs = RoomState::new(
            id,
            NewRoom { name: "r".into(), capacity: 1, amenities: BTreeSet::new(), price: 0 },
        );
        RoomStore::apply_event(&mut rs, &Event::RoomDeleted { id });
        assert!(rs.deleted);
    }
}
