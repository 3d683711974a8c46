/// Requester names longer than this are rejected.
pub const MAX_NAME_LEN: usize = 200;

/// Free-text description cap.
pub const MAX_DESCRIPTION_LEN: usize = 2_000;

/// Total live bookings across all rooms.
pub const MAX_BOOKINGS: usize = 100_000;

/// Search terms longer than this are rejected before scanning.
pub const MAX_SEARCH_LEN: usize = 200;

/// Usernames in the user directory.
pub const MAX_USERNAME_LEN: usize = 64;

/// Maximum accounts accepted from the users file or env list.
pub const MAX_USERS: usize = 1_000;
