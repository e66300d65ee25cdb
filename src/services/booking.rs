use tracing::{error, info};

use crate::config::BookingConfig;
use crate::services::credentials::Credential;
use crate::services::google::{CalendarProvider, EventAttendee, EventDateTime, EventPayload};
use crate::services::rooms::{Room, TimeWindow};
use crate::services::slack::{Confirmation, SlackReply};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub requester: String,
    pub room: Room,
    pub window: TimeWindow,
    pub description: String,
}

impl ReservationRequest {
    pub fn new(requester: &str, room: Room, window: TimeWindow) -> Self {
        Self {
            requester: requester.to_string(),
            room,
            window,
            description: String::new(),
        }
    }

    pub fn summary(&self) -> String {
        format!("{} - Quick reservation", self.requester)
    }

    pub fn duration_label(&self) -> String {
        format!("{}min", self.window.minutes())
    }

    /// The room is booked by inviting its resource calendar.
    pub fn to_event(&self, time_zone: &str) -> EventPayload {
        EventPayload {
            summary: self.summary(),
            description: self.description.clone(),
            start: EventDateTime {
                date_time: self.window.start,
                time_zone: time_zone.to_string(),
            },
            end: EventDateTime {
                date_time: self.window.end,
                time_zone: time_zone.to_string(),
            },
            attendees: vec![EventAttendee {
                email: self.room.id.clone(),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationOutcome {
    Created(Confirmation),
    Failed,
}

impl ReservationOutcome {
    pub fn into_reply(self, support_contact: &str) -> SlackReply {
        match self {
            ReservationOutcome::Created(confirmation) => SlackReply::confirmation(&confirmation),
            ReservationOutcome::Failed => SlackReply::booking_failed(support_contact),
        }
    }
}

pub struct BookingOrchestrator;

impl BookingOrchestrator {
    /// First free room in registry order.
    pub fn select_room(free_rooms: &[Room]) -> Option<&Room> {
        free_rooms.first()
    }

    pub async fn book(
        provider: &dyn CalendarProvider,
        credential: &Credential,
        free_rooms: &[Room],
        requester: &str,
        window: TimeWindow,
        config: &BookingConfig,
    ) -> ReservationOutcome {
        let Some(room) = Self::select_room(free_rooms) else {
            error!("Booking attempted without any free room");
            return ReservationOutcome::Failed;
        };

        let request = ReservationRequest::new(requester, room.clone(), window);
        let event = request.to_event(&config.time_zone);

        match provider
            .create_event(credential, &config.calendar_id, &event)
            .await
        {
            Ok(created) => {
                info!(
                    "Booked {} for {} ({} - {}), event id {:?}",
                    request.room.alias,
                    request.requester,
                    request.window.start,
                    request.window.end,
                    created.id
                );

                ReservationOutcome::Created(Confirmation {
                    event_link: created.html_link,
                    summary: created.summary.unwrap_or_else(|| request.summary()),
                    room_name: request.room.name.clone(),
                    duration_label: request.duration_label(),
                    conference_link: created.hangout_link,
                })
            }
            Err(e) => {
                error!("Failed to book {} for {}: {}", request.room.alias, requester, e);
                ReservationOutcome::Failed
            }
        }
    }
}
