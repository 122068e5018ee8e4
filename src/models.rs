//! Data models shared by the cloud and gateway login clients

use serde::Deserialize;
use std::fmt;

/// Prefix used to turn a bare base64 CAPTCHA image into a data reference
pub const CAPTCHA_IMAGE_PREFIX: &str = "data:image/png;base64,";

/// Account credentials for a single login attempt
#[derive(Clone)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }
}

// Keeps the secret out of logs and panics.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Result of one login attempt sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Authentication complete
    Success { token: String },

    /// The account service wants a CAPTCHA solved before continuing
    CaptchaRequired {
        challenge_id: String,
        challenge_image_ref: String,
    },

    /// The account service sent a second-factor code to the user
    TwoFactorRequired,

    /// Nothing decisive happened
    Error { message: String },
}

impl LoginOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Build a CAPTCHA outcome, wrapping the image into a data reference if needed
    pub fn captcha(challenge_id: impl Into<String>, image: &str) -> Self {
        Self::CaptchaRequired {
            challenge_id: challenge_id.into(),
            challenge_image_ref: as_data_reference(image),
        }
    }

    /// Short status label, as consumed by the setup wizard
    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::CaptchaRequired { .. } => "captcha_required",
            Self::TwoFactorRequired => "2fa_required",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whether the caller must act (answer a challenge) before retrying
    pub fn is_challenge(&self) -> bool {
        matches!(self, Self::CaptchaRequired { .. } | Self::TwoFactorRequired)
    }
}

/// Wrap a CAPTCHA image into a `data:` reference unless it already is one
pub fn as_data_reference(image: &str) -> String {
    if image.starts_with("data:") {
        image.to_string()
    } else {
        format!("{}{}", CAPTCHA_IMAGE_PREFIX, image)
    }
}

/// Session state retained after a successful cloud login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub base_host: String,
}

/// Standard response envelope of the account service
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    pub code: Option<i64>,

    #[serde(default)]
    pub msg: Option<String>,

    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl ApiEnvelope {
    /// Look up a string field inside `data`
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.as_ref()?.get(key)?.as_str()
    }
}

/// Extra fields appended to a login body when answering a challenge
#[derive(Debug, Clone, Default)]
pub struct ChallengeAnswer {
    pub verify_code: Option<String>,
    pub captcha: Option<(String, String)>,
}

impl ChallengeAnswer {
    pub fn second_factor(code: impl Into<String>) -> Self {
        Self {
            verify_code: Some(code.into()),
            captcha: None,
        }
    }

    pub fn captcha(challenge_id: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            verify_code: None,
            captcha: Some((challenge_id.into(), answer.into())),
        }
    }
}
