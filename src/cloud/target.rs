//! Login targets and their header profiles

use crate::config::{CloudConfig, ProfileConfig, ProtocolGeneration, TargetConfig};
use crate::models::{ChallengeAnswer, Credentials};
use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Value};

/// Field carrying the duplicated secret on legacy API generations
const LEGACY_SECRET_FIELD: &str = "passwd";

/// Fixed set of protocol-identifying headers for one API generation/region
#[derive(Debug, Clone)]
pub struct HeaderProfile {
    pub name: String,
    headers: HeaderMap,
    transaction_header: Option<HeaderName>,
}

impl HeaderProfile {
    pub fn from_config(name: &str, config: &ProfileConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let header = HeaderName::from_bytes(key.as_bytes())
                .with_context(|| format!("Invalid header name '{}' in profile '{}'", key, name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header '{}' in profile '{}'", key, name))?;
            headers.insert(header, value);
        }

        let transaction_header = config
            .transaction_header
            .as_deref()
            .map(|h| HeaderName::from_bytes(h.as_bytes()))
            .transpose()
            .with_context(|| format!("Invalid transaction header in profile '{}'", name))?;

        Ok(Self {
            name: name.to_string(),
            headers,
            transaction_header,
        })
    }

    /// Headers for one request; the transaction nonce is fresh every call
    pub fn headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        if let Some(name) = &self.transaction_header {
            let nonce = uuid::Uuid::new_v4().simple().to_string();
            if let Ok(value) = HeaderValue::from_str(&nonce) {
                headers.insert(name.clone(), value);
            }
        }
        headers
    }
}

/// One (host, endpoint, header profile) combination tried during cloud login
#[derive(Debug, Clone)]
pub struct LoginTarget {
    pub host: String,
    pub endpoint: String,
    pub profile: HeaderProfile,
    pub generation: ProtocolGeneration,
}

impl LoginTarget {
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.host.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        )
    }

    /// Request body in the layout this target's API generation expects
    pub fn body(&self, credentials: &Credentials, answer: &ChallengeAnswer) -> Value {
        let mut body = json!({
            "email": credentials.identity,
            "password": credentials.secret,
        });

        if let Some(obj) = body.as_object_mut() {
            if self.generation == ProtocolGeneration::Legacy {
                obj.insert(LEGACY_SECRET_FIELD.to_string(), json!(credentials.secret));
            }
            if let Some(code) = &answer.verify_code {
                obj.insert("verify_code".to_string(), json!(code));
            }
            if let Some((captcha_id, value)) = &answer.captcha {
                obj.insert("captcha_id".to_string(), json!(captcha_id));
                obj.insert("answer".to_string(), json!(value));
            }
        }

        body
    }

    fn from_config(config: &TargetConfig, cloud: &CloudConfig) -> Result<Self> {
        let profile = cloud
            .profiles
            .get(&config.profile)
            .ok_or_else(|| anyhow!("Unknown header profile '{}'", config.profile))?;

        Ok(Self {
            host: config.host.clone(),
            endpoint: config.endpoint.clone(),
            profile: HeaderProfile::from_config(&config.profile, profile)?,
            generation: config.generation,
        })
    }
}

/// Resolve the configured target table, keeping its order
pub fn resolve_targets(cloud: &CloudConfig) -> Result<Vec<LoginTarget>> {
    cloud
        .targets
        .iter()
        .map(|t| LoginTarget::from_config(t, cloud))
        .collect()
}
