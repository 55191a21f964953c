use crate::model::Hour;

/// First bookable hour of the daily schedule.
pub const FIRST_HOUR: Hour = 0;
/// Exclusive upper bound for a booking's end hour.
pub const LAST_HOUR: Hour = 24;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_ROOM_NAME_LEN: usize = 256;
pub const MAX_ROOM_CAPACITY: u32 = 100_000;
pub const MAX_AMENITIES: usize = 64;
pub const MAX_AMENITY_LEN: usize = 64;
pub const MAX_PRICE: i64 = 1_000_000_000;

pub const MAX_USERS: usize = 1_000_000;
pub const MAX_USERNAME_LEN: usize = 64;
/// bcrypt only looks at the first 72 bytes.
pub const MAX_PASSWORD_LEN: usize = 72;

/// Session tokens longer than this are rejected before decoding.
pub const MAX_TOKEN_LEN: usize = 4096;
