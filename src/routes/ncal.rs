use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Router,
};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::authorization::{Authorization, AuthorizationFlow};
use crate::services::booking::BookingOrchestrator;
use crate::services::rooms::{AvailabilityResolver, TimeWindow};
use crate::services::signature::RequestAuthenticator;
use crate::services::slack::{SlackReply, SlashCommand};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ncal", post(handle_slash_command))
}

async fn handle_slash_command(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<SlackReply, AppError> {
    let request_id = Uuid::new_v4();
    process(&state, &headers, &body)
        .instrument(tracing::info_span!("slash_command", %request_id))
        .await
}

async fn process(state: &AppState, headers: &HeaderMap, body: &[u8]) -> AppResult<SlackReply> {
    let verified = RequestAuthenticator::extract_headers(headers).and_then(|(timestamp, signature)| {
        RequestAuthenticator::verify(body, &timestamp, &signature, &state.config.slack.signing_secret)
    });
    if let Err(reason) = verified {
        tracing::warn!("Rejected slash command: {}", reason);
        return Err(AppError::AuthenticationRejected);
    }

    let command = SlashCommand::from_form(body)?;
    tracing::info!(
        "Slash command {:?} from user={} team={:?} channel={:?}",
        command.command,
        command.user_id,
        command.team_id,
        command.channel_id
    );

    let support = &state.config.booking.support_contact;
    let provider = state.provider.as_ref();

    let flow = AuthorizationFlow::new(provider, &state.credentials, &state.config.google.scopes);
    let credential = match flow.authorize(&command.user_id, command.argument()).await {
        Ok(Authorization::Granted(credential)) => credential,
        Ok(Authorization::PromptRequired(prompt)) => return Ok(prompt),
        Err(e) => {
            if e.is_provider_failure() {
                tracing::error!("Calendar provider failed authorizing {}: {}", command.user_id, e);
            } else {
                tracing::error!("Could not prepare credential for {}: {}", command.user_id, e);
            }
            return Ok(SlackReply::booking_failed(support));
        }
    };

    let window = TimeWindow::starting_now(state.config.booking.reservation_minutes);

    let availability = match AvailabilityResolver::resolve(
        provider,
        &credential,
        &state.rooms,
        window,
        &state.config.booking.time_zone,
    )
    .await
    {
        Ok(availability) => availability,
        Err(e) => {
            tracing::error!("Free/busy query failed: {}", e);
            return Ok(SlackReply::booking_failed(support));
        }
    };

    let free_rooms = match AvailabilityResolver::free_rooms(availability) {
        Ok(rooms) => rooms,
        Err(no_room) => {
            tracing::info!("{} for user {}", no_room, command.user_id);
            return Ok(SlackReply::no_free_room());
        }
    };

    let outcome = BookingOrchestrator::book(
        provider,
        &credential,
        &free_rooms,
        &command.user_name,
        window,
        &state.config.booking,
    )
    .await;

    Ok(outcome.into_reply(support))
}
