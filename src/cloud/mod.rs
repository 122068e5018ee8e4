//! Cloud login client
//!
//! The account service has no single endpoint: regional and API-version
//! fragmentation means a login has to walk an ordered table of targets until
//! one of them gives a decisive answer. Every failure on the way is folded into
//! the running "last error" and only surfaces once the table is exhausted.

pub mod classify;
pub mod target;

pub use classify::{classify, Classification, ClassificationRules, StatusRule, Verdict};
pub use target::{resolve_targets, HeaderProfile, LoginTarget};

use crate::config::{CloudConfig, HttpConfig};
use crate::error::LoginError;
use crate::http::{truncate, HttpClient, LoginTransport};
use crate::models::{ChallengeAnswer, Credentials, LoginOutcome, Session};
use anyhow::Result;

/// Logs in against the hosted account service
pub struct CloudLoginClient {
    transport: Box<dyn LoginTransport>,
    targets: Vec<LoginTarget>,
    rules: ClassificationRules,
    session: Option<Session>,
}

impl CloudLoginClient {
    /// Create a client backed by the default HTTP transport
    pub fn new(cloud: &CloudConfig, http: &HttpConfig) -> Result<Self> {
        let transport = HttpClient::new(http)?;
        Self::with_transport(cloud, Box::new(transport))
    }

    pub fn with_transport(cloud: &CloudConfig, transport: Box<dyn LoginTransport>) -> Result<Self> {
        Ok(Self {
            transport,
            targets: resolve_targets(cloud)?,
            rules: cloud.rules.clone(),
            session: None,
        })
    }

    /// Session retained from the last successful login
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Walk the target table and return the first decisive outcome
    pub async fn login(&mut self, credentials: &Credentials) -> LoginOutcome {
        self.run(credentials, &ChallengeAnswer::default()).await
    }

    /// Re-run the login with the second-factor code the user received
    pub async fn submit_second_factor(
        &mut self,
        credentials: &Credentials,
        code: &str,
    ) -> LoginOutcome {
        self.run(credentials, &ChallengeAnswer::second_factor(code))
            .await
    }

    /// Re-run the login with the answer to a CAPTCHA challenge
    pub async fn submit_captcha_answer(
        &mut self,
        credentials: &Credentials,
        challenge_id: &str,
        answer: &str,
    ) -> LoginOutcome {
        self.run(credentials, &ChallengeAnswer::captcha(challenge_id, answer))
            .await
    }

    async fn run(&mut self, credentials: &Credentials, answer: &ChallengeAnswer) -> LoginOutcome {
        let mut last_error = String::new();

        for (index, target) in self.targets.iter().enumerate() {
            let url = target.url();
            tracing::info!(
                "[{}/{}] Attempting login: {} (profile: {})",
                index + 1,
                self.targets.len(),
                url,
                target.profile.name
            );

            let classification = match self
                .transport
                .post_json(&url, &target.body(credentials, answer), target.profile.headers())
                .await
            {
                Ok(resp) => {
                    tracing::debug!("   -> Status: {}", resp.status);
                    tracing::debug!("   -> Response: {}...", truncate(&resp.body, 200));
                    classify(resp.status, &resp.body, &self.rules)
                }
                Err(e) => Classification::Inconclusive(LoginError::Transport(format!("{:#}", e))),
            };

            match classification {
                Classification::Decided(outcome) => {
                    if let LoginOutcome::Success { token } = &outcome {
                        tracing::info!("   -> Login successful via {}", target.host);
                        self.session = Some(Session {
                            token: token.clone(),
                            base_host: target.host.clone(),
                        });
                    } else {
                        tracing::info!("   -> Challenge required: {}", outcome.status());
                    }
                    return outcome;
                }
                Classification::Inconclusive(err) => {
                    tracing::warn!("   -> Inconclusive: {}", err);
                    if err.is_recorded() {
                        last_error = err.to_string();
                    }
                }
            }
        }

        tracing::error!("All {} login targets exhausted", self.targets.len());
        LoginOutcome::Error {
            message: last_error,
        }
    }
}
