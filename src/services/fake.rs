//! In-memory calendar provider used by the unit and router tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Duration;

use crate::error::{AppError, AppResult};
use crate::services::credentials::Credential;
use crate::services::google::{
    BusyInterval, CalendarBusy, CalendarProvider, CreatedEvent, EventPayload, FreeBusyRequest,
    FreeBusyResponse,
};

pub const CONSENT_URL: &str = "https://accounts.example/consent";

#[derive(Default)]
pub struct FakeProvider {
    busy_rooms: HashSet<String>,
    codes: HashMap<String, Credential>,
    fail_create: bool,
    fail_refresh: bool,
    calls: Mutex<Vec<&'static str>>,
    events: Mutex<Vec<EventPayload>>,
    queries: Mutex<Vec<FreeBusyRequest>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_busy_room(mut self, room_id: &str) -> Self {
        self.busy_rooms.insert(room_id.to_string());
        self
    }

    pub fn with_code(mut self, code: &str, credential: Credential) -> Self {
        self.codes.insert(code.to_string(), credential);
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| **c == name).count()
    }

    pub fn events(&self) -> Vec<EventPayload> {
        self.events.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<FreeBusyRequest> {
        self.queries.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn credential(token: &str) -> Credential {
    Credential {
        access_token: token.to_string(),
        refresh_token: Some(format!("1//{}", token)),
        scope: "https://www.googleapis.com/auth/calendar".to_string(),
        token_type: "Bearer".to_string(),
        expiry_date: None,
    }
}

#[async_trait]
impl CalendarProvider for FakeProvider {
    fn consent_url(&self, scopes: &[String]) -> String {
        format!("{}?scope={}", CONSENT_URL, scopes.join("+"))
    }

    async fn exchange_code(&self, code: &str) -> AppResult<Credential> {
        self.record("exchange_code");
        self.codes
            .get(code)
            .cloned()
            .ok_or_else(|| AppError::Provider("invalid_grant".to_string()))
    }

    async fn refresh_credential(&self, credential: &Credential) -> AppResult<Credential> {
        self.record("refresh_credential");
        if self.fail_refresh {
            return Err(AppError::Provider("invalid_grant".to_string()));
        }
        Ok(Credential {
            access_token: format!("{}-refreshed", credential.access_token),
            expiry_date: Some((chrono::Utc::now() + Duration::hours(1)).timestamp_millis()),
            ..credential.clone()
        })
    }

    async fn query_free_busy(
        &self,
        _credential: &Credential,
        request: &FreeBusyRequest,
    ) -> AppResult<FreeBusyResponse> {
        self.record("query_free_busy");
        self.queries.lock().unwrap().push(request.clone());

        let calendars = request
            .items
            .iter()
            .map(|item| {
                let busy = if self.busy_rooms.contains(&item.id) {
                    vec![BusyInterval {
                        start: request.time_min,
                        end: request.time_max,
                    }]
                } else {
                    vec![]
                };
                (item.id.clone(), CalendarBusy { busy, errors: vec![] })
            })
            .collect();

        Ok(FreeBusyResponse { calendars })
    }

    async fn create_event(
        &self,
        _credential: &Credential,
        _calendar_id: &str,
        event: &EventPayload,
    ) -> AppResult<CreatedEvent> {
        self.record("create_event");
        self.events.lock().unwrap().push(event.clone());

        if self.fail_create {
            return Err(AppError::Provider("backendError".to_string()));
        }

        Ok(CreatedEvent {
            id: Some("evt-1".to_string()),
            html_link: "https://www.google.com/calendar/event?eid=evt-1".to_string(),
            summary: Some(event.summary.clone()),
            location: None,
            hangout_link: Some("https://meet.google.com/abc-defg-hij".to_string()),
        })
    }
}
