//! Room registry and free/busy resolution.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::error::AppResult;
use crate::services::credentials::Credential;
use crate::services::google::{CalendarBusy, CalendarProvider, FreeBusyItem, FreeBusyRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Resource calendar address, e.g. `...@resource.calendar.google.com`.
    pub id: String,
    pub name: String,
    pub alias: String,
}

/// Bookable rooms in preference order. Fixed after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRegistry {
    rooms: Vec<Room>,
}

impl RoomRegistry {
    pub fn new(rooms: Vec<Room>) -> Result<Self, ConfigError> {
        if rooms.is_empty() {
            return Err(ConfigError::InvalidValue(
                "room registry must list at least one room".to_string(),
            ));
        }

        for (i, room) in rooms.iter().enumerate() {
            if rooms[..i].iter().any(|r| r.id == room.id) {
                return Err(ConfigError::InvalidValue(format!(
                    "room {} is registered twice",
                    room.id
                )));
            }
        }

        Ok(Self { rooms })
    }

    /// Load the registry from a JSON array of `{id, name, alias}` objects.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let path_str = path.display().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::File(path_str.clone(), e.to_string()))?;
        let rooms: Vec<Room> = serde_json::from_str(&content)
            .map_err(|e| ConfigError::File(path_str, format!("malformed JSON: {}", e)))?;
        Self::new(rooms)
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn starting_at(start: DateTime<Utc>, minutes: i64) -> Self {
        Self {
            start,
            end: start + Duration::minutes(minutes),
        }
    }

    pub fn starting_now(minutes: i64) -> Self {
        Self::starting_at(Utc::now(), minutes)
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && end > self.start
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomAvailability {
    pub room: Room,
    pub busy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No free room in the requested window")]
pub struct NoRoomAvailable;

pub struct AvailabilityResolver;

impl AvailabilityResolver {
    /// Classify every registered room as busy or free over `window`, in
    /// registry order, with a single batched free/busy query.
    pub async fn resolve(
        provider: &dyn CalendarProvider,
        credential: &Credential,
        registry: &RoomRegistry,
        window: TimeWindow,
        time_zone: &str,
    ) -> AppResult<Vec<RoomAvailability>> {
        let request = FreeBusyRequest {
            time_min: window.start,
            time_max: window.end,
            time_zone: time_zone.to_string(),
            items: registry
                .rooms()
                .iter()
                .map(|room| FreeBusyItem { id: room.id.clone() })
                .collect(),
        };

        let response = provider.query_free_busy(credential, &request).await?;

        let availability = registry
            .rooms()
            .iter()
            .map(|room| RoomAvailability {
                room: room.clone(),
                busy: Self::is_busy(room, response.calendars.get(&room.id), window),
            })
            .collect::<Vec<_>>();

        debug!(
            "Room availability: {}",
            availability
                .iter()
                .map(|a| format!("{}={}", a.room.alias, if a.busy { "busy" } else { "free" }))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(availability)
    }

    /// Keep the free rooms, preserving registry order.
    pub fn free_rooms(availability: Vec<RoomAvailability>) -> Result<Vec<Room>, NoRoomAvailable> {
        let free: Vec<Room> = availability
            .into_iter()
            .filter(|a| !a.busy)
            .map(|a| a.room)
            .collect();

        if free.is_empty() {
            Err(NoRoomAvailable)
        } else {
            Ok(free)
        }
    }

    // Rooms the provider left out or reported errors for are never offered.
    fn is_busy(room: &Room, calendar: Option<&CalendarBusy>, window: TimeWindow) -> bool {
        let Some(calendar) = calendar else {
            warn!("Free/busy response has no entry for room {}", room.id);
            return true;
        };

        if !calendar.errors.is_empty() {
            for error in &calendar.errors {
                warn!(
                    "Free/busy error for room {}: domain={:?} reason={:?}",
                    room.id, error.domain, error.reason
                );
            }
            return true;
        }

        calendar
            .busy
            .iter()
            .any(|interval| window.overlaps(interval.start, interval.end))
    }
}
