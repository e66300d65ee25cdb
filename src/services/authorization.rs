//! Per-user OAuth bootstrap.
//!
//! A user without a stored credential is `Unauthorized`. If the slash command
//! carried an argument it is tried as an authorization code
//! (`ExchangePending`); a successful exchange is persisted and the user is
//! `Authorized` from then on. A failed or absent code falls back to the
//! consent prompt, which is the normal path for first-time users.

use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::services::credentials::{Credential, CredentialStore};
use crate::services::google::CalendarProvider;
use crate::services::slack::SlackReply;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthorized,
    ExchangePending { code: String },
    Authorized(Credential),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Authorization {
    Granted(Credential),
    PromptRequired(SlackReply),
}

pub struct AuthorizationFlow<'a> {
    provider: &'a dyn CalendarProvider,
    store: &'a CredentialStore,
    scopes: &'a [String],
}

impl<'a> AuthorizationFlow<'a> {
    pub fn new(
        provider: &'a dyn CalendarProvider,
        store: &'a CredentialStore,
        scopes: &'a [String],
    ) -> Self {
        Self {
            provider,
            store,
            scopes,
        }
    }

    /// Where a user starts for this request.
    pub async fn initial_state(&self, user_id: &str, argument: &str) -> AuthState {
        match self.store.get(user_id).await {
            Some(credential) => AuthState::Authorized(credential),
            None if argument.is_empty() => AuthState::Unauthorized,
            None => AuthState::ExchangePending {
                code: argument.to_string(),
            },
        }
    }

    /// Drive the state machine until the user either holds a usable
    /// credential or has to be sent to the consent page.
    pub async fn authorize(&self, user_id: &str, argument: &str) -> AppResult<Authorization> {
        let mut state = self.initial_state(user_id, argument).await;

        loop {
            state = match state {
                AuthState::Unauthorized => {
                    return Ok(Authorization::PromptRequired(SlackReply::consent_prompt(
                        &self.provider.consent_url(self.scopes),
                    )));
                }
                AuthState::ExchangePending { code } => self.exchange(user_id, &code).await?,
                AuthState::Authorized(credential) => {
                    let credential = self.ensure_fresh(user_id, credential).await?;
                    return Ok(Authorization::Granted(credential));
                }
            };
        }
    }

    async fn exchange(&self, user_id: &str, code: &str) -> AppResult<AuthState> {
        match self.provider.exchange_code(code).await {
            Ok(credential) => {
                let granted = credential.scopes();
                let missing: Vec<&str> = self
                    .scopes
                    .iter()
                    .map(String::as_str)
                    .filter(|s| !granted.contains(s))
                    .collect();
                if !granted.is_empty() && !missing.is_empty() {
                    warn!("User {} did not grant scopes {:?}", user_id, missing);
                }

                self.store.put(user_id, credential.clone()).await?;
                info!("User {} authorized calendar access", user_id);
                Ok(AuthState::Authorized(credential))
            }
            Err(e) => {
                debug!("Authorization code from user {} not accepted: {}", user_id, e);
                Ok(AuthState::Unauthorized)
            }
        }
    }

    /// Refresh and persist an expired credential before it is used.
    async fn ensure_fresh(&self, user_id: &str, credential: Credential) -> AppResult<Credential> {
        if !credential.is_expired() {
            return Ok(credential);
        }

        if credential.refresh_token.is_none() {
            warn!(
                "Credential for user {} expired and has no refresh token; using it as is",
                user_id
            );
            return Ok(credential);
        }

        let refreshed = self.provider.refresh_credential(&credential).await?;
        self.store.put(user_id, refreshed.clone()).await?;
        debug!("Refreshed credential for user {}", user_id);
        Ok(refreshed)
    }
}
