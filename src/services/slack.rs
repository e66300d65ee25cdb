//! Slash command payloads and the replies we send back.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::{AppError, AppResult};

pub const NO_FREE_ROOM_TEXT: &str = "No free room. You can always use Learning :party_parrot:";

const CONFIRMATION_HEADER: &str = "Quick event created:";
const THUMBNAIL_URL: &str = "https://api.slack.com/img/blocks/bkb_template_images/notifications.png";
const THUMBNAIL_ALT: &str = "calendar thumbnail";

/// Fields of an inbound slash command that the booking flow uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlashCommand {
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub command: Option<String>,
    pub team_id: Option<String>,
    pub channel_id: Option<String>,
}

impl SlashCommand {
    pub fn from_form(body: &[u8]) -> AppResult<Self> {
        let mut command = SlashCommand::default();
        let mut has_user_id = false;
        let mut has_user_name = false;

        for (key, value) in url::form_urlencoded::parse(body) {
            match key.as_ref() {
                "user_id" => {
                    command.user_id = value.into_owned();
                    has_user_id = true;
                }
                "user_name" => {
                    command.user_name = value.into_owned();
                    has_user_name = true;
                }
                "text" => command.text = value.into_owned(),
                "command" => command.command = Some(value.into_owned()),
                "team_id" => command.team_id = Some(value.into_owned()),
                "channel_id" => command.channel_id = Some(value.into_owned()),
                _ => {}
            }
        }

        if !has_user_id || command.user_id.is_empty() {
            return Err(AppError::BadRequest("Missing field: user_id".to_string()));
        }
        if !has_user_name {
            return Err(AppError::BadRequest("Missing field: user_name".to_string()));
        }

        Ok(command)
    }

    /// The command argument, trimmed.
    pub fn argument(&self) -> &str {
        self.text.trim()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Block {
    Section {
        text: TextObject,
        #[serde(skip_serializing_if = "Option::is_none")]
        accessory: Option<Accessory>,
    },
    Divider,
    Context {
        elements: Vec<TextObject>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextObject {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl TextObject {
    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self {
            kind: "mrkdwn",
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accessory {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub image_url: String,
    pub alt_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockMessage {
    pub blocks: Vec<Block>,
}

/// Confirmation details rendered into the block message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub event_link: String,
    pub summary: String,
    pub room_name: String,
    pub duration_label: String,
    pub conference_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlackReply {
    Text(String),
    Blocks(BlockMessage),
}

impl SlackReply {
    pub fn consent_prompt(consent_url: &str) -> Self {
        SlackReply::Text(format!(
            "Please log in and send the token from: <{}|Auth> like this: `/ncal [token]`\nAfter this you can ask for a free room calling `/ncal` without arguments.",
            consent_url
        ))
    }

    pub fn no_free_room() -> Self {
        SlackReply::Text(NO_FREE_ROOM_TEXT.to_string())
    }

    pub fn booking_failed(support_contact: &str) -> Self {
        SlackReply::Text(format!(
            "Something went wrong :(\nPlease tell {} about it and try again in a minute.",
            support_contact
        ))
    }

    pub fn confirmation(confirmation: &Confirmation) -> Self {
        let meet_line = match confirmation.conference_link.as_deref() {
            Some(link) => format!("*Meet link:* {}", link),
            None => "*Meet link:* none".to_string(),
        };

        SlackReply::Blocks(BlockMessage {
            blocks: vec![
                Block::Section {
                    text: TextObject::mrkdwn(CONFIRMATION_HEADER),
                    accessory: None,
                },
                Block::Divider,
                Block::Section {
                    text: TextObject::mrkdwn(format!(
                        "*<{}|{}>*\n*Room:*\n{}\n*Duration:*\n{}",
                        confirmation.event_link,
                        confirmation.summary,
                        confirmation.room_name,
                        confirmation.duration_label
                    )),
                    accessory: Some(Accessory {
                        kind: "image",
                        image_url: THUMBNAIL_URL.to_string(),
                        alt_text: THUMBNAIL_ALT.to_string(),
                    }),
                },
                Block::Context {
                    elements: vec![TextObject::mrkdwn(meet_line)],
                },
            ],
        })
    }
}

impl IntoResponse for SlackReply {
    fn into_response(self) -> Response {
        match self {
            SlackReply::Text(text) => (StatusCode::OK, text).into_response(),
            SlackReply::Blocks(message) => (StatusCode::OK, Json(message)).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_slash_command_form() {
        let command = SlashCommand::from_form(
            b"team_id=T1&channel_id=C1&user_id=U2CERLKJA&user_name=road+runner&command=%2Fncal&text=+4%2F0Adeu5+",
        )
        .unwrap();

        assert_eq!(command.user_id, "U2CERLKJA");
        assert_eq!(command.user_name, "road runner");
        assert_eq!(command.command.as_deref(), Some("/ncal"));
        assert_eq!(command.argument(), "4/0Adeu5");
    }

    #[test]
    fn text_is_optional_but_user_fields_are_not() {
        let command = SlashCommand::from_form(b"user_id=U1&user_name=bob").unwrap();
        assert_eq!(command.argument(), "");

        assert!(SlashCommand::from_form(b"user_name=bob&text=").is_err());
        assert!(SlashCommand::from_form(b"user_id=&user_name=bob").is_err());
        assert!(SlashCommand::from_form(b"user_id=U1").is_err());
    }

    #[test]
    fn confirmation_renders_the_block_layout() {
        let reply = SlackReply::confirmation(&Confirmation {
            event_link: "https://cal/evt".to_string(),
            summary: "bob - Quick reservation".to_string(),
            room_name: "The Lab".to_string(),
            duration_label: "30min".to_string(),
            conference_link: Some("https://meet.google.com/x".to_string()),
        });

        let SlackReply::Blocks(message) = reply else {
            panic!("expected blocks");
        };

        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "blocks": [
                    { "type": "section", "text": { "type": "mrkdwn", "text": "Quick event created:" } },
                    { "type": "divider" },
                    {
                        "type": "section",
                        "text": {
                            "type": "mrkdwn",
                            "text": "*<https://cal/evt|bob - Quick reservation>*\n*Room:*\nThe Lab\n*Duration:*\n30min"
                        },
                        "accessory": {
                            "type": "image",
                            "image_url": THUMBNAIL_URL,
                            "alt_text": "calendar thumbnail"
                        }
                    },
                    {
                        "type": "context",
                        "elements": [{ "type": "mrkdwn", "text": "*Meet link:* https://meet.google.com/x" }]
                    }
                ]
            })
        );
    }

    #[test]
    fn text_replies_carry_their_links() {
        let SlackReply::Text(prompt) = SlackReply::consent_prompt("https://consent") else {
            panic!("expected text");
        };
        assert!(prompt.contains("<https://consent|Auth>"));
        assert!(prompt.contains("`/ncal [token]`"));

        let SlackReply::Text(failed) = SlackReply::booking_failed("<@UADMIN>") else {
            panic!("expected text");
        };
        assert!(failed.contains("<@UADMIN>"));

        assert_eq!(SlackReply::no_free_room(), SlackReply::Text(NO_FREE_ROOM_TEXT.to_string()));
    }
}
