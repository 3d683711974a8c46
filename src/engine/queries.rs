use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::period::resolve_period;
use super::{Engine, EngineError};

/// Filters for a booking listing. Empty means every booking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingQuery {
    /// Only bookings whose date falls in this period (the export scope).
    pub period: Option<PeriodSelector>,
    /// Only bookings that have not ended at this instant.
    pub active_at: Option<NaiveDateTime>,
    pub search: Option<String>,
}

/// Date, then start time, then room; all ascending.
fn sort_bookings(bookings: &mut [Booking]) {
    bookings.sort_by(|a, b| {
        (a.date, a.time.start, a.room).cmp(&(b.date, b.time.start, b.room))
    });
}

impl Engine {
    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        let room = self.room_of(&id)?;
        let rs = self.get_room(room);
        let guard = rs.read().await;
        guard.bookings.iter().find(|b| b.id == id).cloned()
    }

    /// All bookings, ordered by date then start time.
    pub async fn list_bookings(&self) -> Vec<Booking> {
        let mut all = Vec::with_capacity(self.booking_count());
        for rs in &self.rooms {
            all.extend(rs.read().await.bookings.iter().cloned());
        }
        sort_bookings(&mut all);
        all
    }

    /// Bookings that have not yet ended at `now`: the view regular users get.
    pub async fn list_active(&self, now: NaiveDateTime) -> Vec<Booking> {
        let mut active = Vec::new();
        for rs in &self.rooms {
            let guard = rs.read().await;
            active.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.is_active_at(now))
                    .cloned(),
            );
        }
        sort_bookings(&mut active);
        active
    }

    /// Snapshot of the bookings inside a period, using the same inclusive
    /// window a purge of that period would remove.
    pub async fn export_period(&self, selector: &PeriodSelector) -> Result<Vec<Booking>, EngineError> {
        let window = resolve_period(selector)?;
        let mut rows = Vec::new();
        for rs in &self.rooms {
            rows.extend(rs.read().await.in_window(&window).iter().cloned());
        }
        sort_bookings(&mut rows);
        Ok(rows)
    }

    pub async fn query_bookings(&self, query: &BookingQuery) -> Result<Vec<Booking>, EngineError> {
        if let Some(term) = &query.search
            && term.len() > MAX_SEARCH_LEN {
                return Err(EngineError::LimitExceeded("search term too long"));
            }

        let mut rows = match (&query.period, query.active_at) {
            (Some(selector), _) => self.export_period(selector).await?,
            (None, Some(now)) => self.list_active(now).await,
            (None, None) => self.list_bookings().await,
        };
        if query.period.is_some()
            && let Some(now) = query.active_at {
                rows.retain(|b| b.is_active_at(now));
            }
        if let Some(term) = query.search.as_deref().filter(|t| !t.is_empty()) {
            rows.retain(|b| b.matches_search(term));
        }
        Ok(rows)
    }
}
