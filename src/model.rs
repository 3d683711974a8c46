use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for audit timestamps.
pub type Ms = i64;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// The office's bookable rooms. The set is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Room {
    AulaMini,
    Lantai2,
    AulaBhaktiHusada,
}

impl Room {
    pub const COUNT: usize = 3;
    pub const ALL: [Room; Room::COUNT] = [Room::AulaMini, Room::Lantai2, Room::AulaBhaktiHusada];

    pub fn label(&self) -> &'static str {
        match self {
            Room::AulaMini => "Lantai 1 - Aula Mini",
            Room::Lantai2 => "Lantai 2",
            Room::AulaBhaktiHusada => "Lantai 3 - Aula Bhakti Husada",
        }
    }

    /// Position in `Room::ALL`.
    pub const fn index(&self) -> usize {
        match self {
            Room::AulaMini => 0,
            Room::Lantai2 => 1,
            Room::AulaBhaktiHusada => 2,
        }
    }

    pub fn floor(&self) -> u8 {
        match self {
            Room::AulaMini => 1,
            Room::Lantai2 => 2,
            Room::AulaBhaktiHusada => 3,
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRoom(pub String);

impl fmt::Display for UnknownRoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown room: {}", self.0)
    }
}

impl std::error::Error for UnknownRoom {}

impl FromStr for Room {
    type Err = UnknownRoom;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Room::ALL
            .into_iter()
            .find(|room| room.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownRoom(s.to_string()))
    }
}

/// Parse a time of day from `HH:MM:SS` or `HH:MM`.
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Parse an ISO `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

/// Half-open time-of-day range `[start, end)` within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    /// Returns `None` unless `start < end`.
    pub fn try_new(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.start.format(TIME_FORMAT),
            self.end.format(TIME_FORMAT)
        )
    }
}

/// Inclusive calendar window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// A calendar period: mandatory year, at most one of month or quarter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodSelector {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub quarter: Option<u32>,
}

impl PeriodSelector {
    pub fn year(year: i32) -> Self {
        Self { year: Some(year), ..Self::default() }
    }

    pub fn month(year: i32, month: u32) -> Self {
        Self { year: Some(year), month: Some(month), quarter: None }
    }

    pub fn quarter(year: i32, quarter: u32) -> Self {
        Self { year: Some(year), month: None, quarter: Some(quarter) }
    }
}

/// User-supplied fields of a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDraft {
    pub date: NaiveDate,
    pub name: String,
    pub room: Room,
    pub time: TimeRange,
    pub description: Option<String>,
}

/// Replacement values for an update. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub date: Option<NaiveDate>,
    pub name: Option<String>,
    pub room: Option<Room>,
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
}

impl BookingPatch {
    pub fn is_empty(&self) -> bool {
        *self == BookingPatch::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub date: NaiveDate,
    pub name: String,
    pub room: Room,
    pub time: TimeRange,
    pub description: Option<String>,
    pub created_at: Ms,
    /// Username that submitted the booking. Audit only.
    pub owner: Option<String>,
}

impl Booking {
    pub fn from_draft(id: Ulid, draft: BookingDraft, created_at: Ms, owner: Option<String>) -> Self {
        Self {
            id,
            date: draft.date,
            name: draft.name,
            room: draft.room,
            time: draft.time,
            description: draft.description,
            created_at,
            owner,
        }
    }

    pub fn to_draft(&self) -> BookingDraft {
        BookingDraft {
            date: self.date,
            name: self.name.clone(),
            room: self.room,
            time: self.time,
            description: self.description.clone(),
        }
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time.end)
    }

    /// Still running or in the future at `now`.
    pub fn is_active_at(&self, now: NaiveDateTime) -> bool {
        self.ends_at() > now
    }

    /// Case-insensitive match on name, room or description; substring match on the date.
    pub fn matches_search(&self, term: &str) -> bool {
        let needle = term.to_lowercase();
        self.name.to_lowercase().contains(&needle)
            || self.room.label().to_lowercase().contains(&needle)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle))
            || self.date.format(DATE_FORMAT).to_string().contains(term)
    }
}

/// Bookings of a single room, sorted by `(date, time.start)`.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
        }
    }

    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.date, booking.time.start);
        let pos = self
            .bookings
            .binary_search_by_key(&key, |b| (b.date, b.time.start))
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Bookings on exactly `date`.
    pub fn on_date(&self, date: NaiveDate) -> &[Booking] {
        let lo = self.bookings.partition_point(|b| b.date < date);
        let hi = self.bookings.partition_point(|b| b.date <= date);
        &self.bookings[lo..hi]
    }

    /// Bookings whose date falls inside `window` (inclusive).
    pub fn in_window(&self, window: &DateWindow) -> &[Booking] {
        let lo = self.bookings.partition_point(|b| b.date < window.start);
        let hi = self.bookings.partition_point(|b| b.date <= window.end);
        if lo >= hi {
            return &[];
        }
        &self.bookings[lo..hi]
    }

    /// Drop every booking inside `window`, returning the removed records.
    pub fn drain_window(&mut self, window: &DateWindow) -> Vec<Booking> {
        let lo = self.bookings.partition_point(|b| b.date < window.start);
        let hi = self.bookings.partition_point(|b| b.date <= window.end);
        if lo >= hi {
            return Vec::new();
        }
        self.bookings.drain(lo..hi).collect()
    }
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        booking: Booking,
    },
    BookingUpdated {
        booking: Booking,
        previous_room: Room,
    },
    BookingDeleted {
        id: Ulid,
        room: Room,
    },
    BookingsPurged {
        window: DateWindow,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveTime {
        parse_time(s).unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn booking_on(date: &str, start: &str, end: &str) -> Booking {
        Booking {
            id: Ulid::new(),
            date: d(date),
            name: "Budi".into(),
            room: Room::Lantai2,
            time: TimeRange::new(t(start), t(end)),
            description: None,
            created_at: 0,
            owner: None,
        }
    }

    #[test]
    fn room_labels_parse_back() {
        for room in Room::ALL {
            assert_eq!(room.label().parse::<Room>().unwrap(), room);
        }
        assert_eq!("lantai 2".parse::<Room>().unwrap(), Room::Lantai2);
        assert!("Lantai 4".parse::<Room>().is_err());
    }

    #[test]
    fn time_parses_with_and_without_seconds() {
        assert_eq!(t("09:00"), t("09:00:00"));
        assert_eq!(t("17:30:15").format(TIME_FORMAT).to_string(), "17:30:15");
        assert!(parse_time("25:00").is_none());
        assert!(parse_time("9am").is_none());
    }

    #[test]
    fn time_range_overlap() {
        let a = TimeRange::new(t("09:00"), t("10:00"));
        let b = TimeRange::new(t("09:30"), t("10:30"));
        let c = TimeRange::new(t("10:00"), t("11:00"));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn time_range_try_new_rejects_empty_and_inverted() {
        assert!(TimeRange::try_new(t("10:00"), t("10:00")).is_none());
        assert!(TimeRange::try_new(t("11:00"), t("10:00")).is_none());
        assert!(TimeRange::try_new(t("10:00"), t("10:01")).is_some());
    }

    #[test]
    fn date_window_inclusive() {
        let w = DateWindow { start: d("2024-02-01"), end: d("2024-02-29") };
        assert!(w.contains(d("2024-02-01")));
        assert!(w.contains(d("2024-02-29")));
        assert!(!w.contains(d("2024-01-31")));
        assert!(!w.contains(d("2024-03-01")));
    }

    #[test]
    fn room_state_keeps_date_then_start_order() {
        let mut rs = RoomState::new(Room::Lantai2);
        rs.insert_booking(booking_on("2024-05-02", "08:00", "09:00"));
        rs.insert_booking(booking_on("2024-05-01", "13:00", "14:00"));
        rs.insert_booking(booking_on("2024-05-01", "09:00", "10:00"));
        let keys: Vec<_> = rs.bookings.iter().map(|b| (b.date, b.time.start)).collect();
        assert_eq!(
            keys,
            vec![
                (d("2024-05-01"), t("09:00")),
                (d("2024-05-01"), t("13:00")),
                (d("2024-05-02"), t("08:00")),
            ]
        );
    }

    #[test]
    fn on_date_slices_single_day() {
        let mut rs = RoomState::new(Room::Lantai2);
        rs.insert_booking(booking_on("2024-05-01", "09:00", "10:00"));
        rs.insert_booking(booking_on("2024-05-02", "09:00", "10:00"));
        rs.insert_booking(booking_on("2024-05-02", "11:00", "12:00"));
        rs.insert_booking(booking_on("2024-05-03", "09:00", "10:00"));
        assert_eq!(rs.on_date(d("2024-05-02")).len(), 2);
        assert!(rs.on_date(d("2024-06-01")).is_empty());
    }

    #[test]
    fn drain_window_removes_only_inside() {
        let mut rs = RoomState::new(Room::Lantai2);
        rs.insert_booking(booking_on("2024-01-31", "09:00", "10:00"));
        rs.insert_booking(booking_on("2024-02-01", "09:00", "10:00"));
        rs.insert_booking(booking_on("2024-02-29", "09:00", "10:00"));
        rs.insert_booking(booking_on("2024-03-01", "09:00", "10:00"));
        let w = DateWindow { start: d("2024-02-01"), end: d("2024-02-29") };
        assert_eq!(rs.in_window(&w).len(), 2);
        let removed = rs.drain_window(&w);
        assert_eq!(removed.len(), 2);
        assert_eq!(rs.bookings.len(), 2);
        assert!(rs.in_window(&w).is_empty());
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let mut rs = RoomState::new(Room::AulaMini);
        rs.insert_booking(booking_on("2024-05-01", "09:00", "10:00"));
        assert!(rs.remove_booking(Ulid::new()).is_none());
        assert_eq!(rs.bookings.len(), 1);
    }

    #[test]
    fn active_means_end_still_ahead() {
        let b = booking_on("2024-05-01", "09:00", "10:00");
        let at = |s: &str| d("2024-05-01").and_time(t(s));
        assert!(b.is_active_at(at("08:00")));
        assert!(b.is_active_at(at("09:59")));
        assert!(!b.is_active_at(at("10:00")));
    }

    #[test]
    fn search_matches_fields() {
        let mut b = booking_on("2024-05-01", "09:00", "10:00");
        b.description = Some("Rapat Koordinasi".into());
        assert!(b.matches_search("budi"));
        assert!(b.matches_search("LANTAI"));
        assert!(b.matches_search("koordinasi"));
        assert!(b.matches_search("2024-05"));
        assert!(!b.matches_search("aula"));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            booking: booking_on("2024-05-01", "09:00", "10:00"),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
