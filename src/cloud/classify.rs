//! Response classification for the cloud login endpoint
//!
//! The status-code table is data: new API generations extend `ClassificationRules`
//! instead of adding branches here.

use crate::error::LoginError;
use crate::http::truncate;
use crate::models::{ApiEnvelope, LoginOutcome};
use serde::Deserialize;

const FORBIDDEN: u16 = 403;

/// What a matching status code means
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    Captcha,
    SecondFactor,
}

/// One row of the classification table
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct StatusRule {
    pub codes: Vec<i64>,
    pub verdict: Verdict,
}

/// Ordered status-code rules plus the textual second-factor fallback
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ClassificationRules {
    #[serde(default = "default_rules")]
    pub rules: Vec<StatusRule>,

    #[serde(default = "default_second_factor_marker")]
    pub second_factor_marker: Option<String>,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            second_factor_marker: default_second_factor_marker(),
        }
    }
}

fn default_rules() -> Vec<StatusRule> {
    vec![
        StatusRule {
            codes: vec![0],
            verdict: Verdict::Success,
        },
        StatusRule {
            codes: vec![26052, 100026],
            verdict: Verdict::Captcha,
        },
        StatusRule {
            codes: vec![26058],
            verdict: Verdict::SecondFactor,
        },
    ]
}

fn default_second_factor_marker() -> Option<String> {
    Some("verify_code".to_string())
}

impl ClassificationRules {
    /// First rule whose code list contains `code`
    pub fn verdict_for(&self, code: i64) -> Option<Verdict> {
        self.rules
            .iter()
            .find(|rule| rule.codes.contains(&code))
            .map(|rule| rule.verdict)
    }

    fn mentions_second_factor(&self, raw: &serde_json::Value) -> bool {
        self.second_factor_marker
            .as_deref()
            .is_some_and(|marker| raw.to_string().contains(marker))
    }
}

/// Result of classifying one target's response
#[derive(Debug)]
pub enum Classification {
    /// Terminal for the whole sequence
    Decided(LoginOutcome),
    /// Move on to the next target
    Inconclusive(LoginError),
}

/// Classify a raw response. Never fails: undecodable bodies are inconclusive.
pub fn classify(status: u16, body: &str, rules: &ClassificationRules) -> Classification {
    let raw: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => {
            return Classification::Inconclusive(LoginError::ProtocolMismatch {
                status,
                detail: format!("non-JSON response: {}", truncate(body.trim(), 80)),
            })
        }
    };

    if status == FORBIDDEN {
        return Classification::Inconclusive(LoginError::ProtocolMismatch {
            status,
            detail: "forbidden".to_string(),
        });
    }

    if !raw.is_object() {
        return Classification::Inconclusive(LoginError::ProtocolMismatch {
            status,
            detail: "response is not a JSON object".to_string(),
        });
    }

    let envelope: ApiEnvelope = match serde_json::from_value(raw.clone()) {
        Ok(envelope) => envelope,
        Err(e) => {
            return Classification::Inconclusive(LoginError::ProtocolMismatch {
                status,
                detail: format!("unexpected response shape: {}", e),
            })
        }
    };

    match envelope.code.and_then(|code| rules.verdict_for(code)) {
        Some(Verdict::Success) => match envelope.data_str("auth_token") {
            Some(token) => Classification::Decided(LoginOutcome::Success {
                token: token.to_string(),
            }),
            None => Classification::Inconclusive(LoginError::BusinessRejection {
                code: envelope.code,
                message: "login succeeded but no auth_token was returned".to_string(),
            }),
        },
        Some(Verdict::Captcha) => {
            let challenge_id = envelope.data_str("captcha_id").unwrap_or_default();
            let image = ["captcha_url", "captcha", "item"]
                .iter()
                .find_map(|key| envelope.data_str(key))
                .unwrap_or_default();
            Classification::Decided(LoginOutcome::captcha(challenge_id, image))
        }
        Some(Verdict::SecondFactor) => Classification::Decided(LoginOutcome::TwoFactorRequired),
        None if rules.mentions_second_factor(&raw) => {
            Classification::Decided(LoginOutcome::TwoFactorRequired)
        }
        None => {
            let message = envelope.msg.clone().unwrap_or_else(|| match envelope.code {
                Some(code) => format!("login rejected with code {}", code),
                None => format!("login rejected with status {}", status),
            });
            Classification::Inconclusive(LoginError::BusinessRejection {
                code: envelope.code,
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(status: u16, body: &str) -> Classification {
        classify(status, body, &ClassificationRules::default())
    }

    #[test]
    fn test_success_extracts_token() {
        let body = r#"{"code":0,"msg":"ok","data":{"auth_token":"tok-1"}}"#;
        match run(200, body) {
            Classification::Decided(LoginOutcome::Success { token }) => assert_eq!(token, "tok-1"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_html_body_is_inconclusive() {
        let body = "<html><body>405 Not Allowed</body></html>";
        assert!(matches!(
            run(405, body),
            Classification::Inconclusive(LoginError::ProtocolMismatch { status: 405, .. })
        ));
    }

    #[test]
    fn test_forbidden_json_is_inconclusive() {
        let body = r#"{"code":0,"data":{"auth_token":"nope"}}"#;
        assert!(matches!(
            run(403, body),
            Classification::Inconclusive(LoginError::ProtocolMismatch { .. })
        ));
    }

    #[test]
    fn test_captcha_codes() {
        for code in [26052, 100026] {
            let body = format!(
                r#"{{"code":{},"data":{{"captcha_id":"cap-9","captcha_url":"AAAA"}}}}"#,
                code
            );
            match run(200, &body) {
                Classification::Decided(LoginOutcome::CaptchaRequired {
                    challenge_id,
                    challenge_image_ref,
                }) => {
                    assert_eq!(challenge_id, "cap-9");
                    assert_eq!(challenge_image_ref, "data:image/png;base64,AAAA");
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    #[test]
    fn test_second_factor_code_and_marker() {
        let by_code = r#"{"code":26058,"msg":"need code"}"#;
        assert!(matches!(
            run(200, by_code),
            Classification::Decided(LoginOutcome::TwoFactorRequired)
        ));

        let by_marker = r#"{"code":26099,"msg":"x","data":{"next":"verify_code"}}"#;
        assert!(matches!(
            run(200, by_marker),
            Classification::Decided(LoginOutcome::TwoFactorRequired)
        ));
    }

    #[test]
    fn test_business_error_records_message() {
        let body = r#"{"code":26006,"msg":"Wrong password"}"#;
        match run(200, body) {
            Classification::Inconclusive(LoginError::BusinessRejection { code, message }) => {
                assert_eq!(code, Some(26006));
                assert_eq!(message, "Wrong password");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_non_object_json_is_inconclusive() {
        assert!(matches!(
            run(200, "[1,2,3]"),
            Classification::Inconclusive(LoginError::ProtocolMismatch { .. })
        ));
    }

    #[test]
    fn test_custom_rule_table() {
        let rules = ClassificationRules {
            rules: vec![StatusRule {
                codes: vec![7],
                verdict: Verdict::Success,
            }],
            second_factor_marker: None,
        };
        let body = r#"{"code":7,"data":{"auth_token":"t"}}"#;
        assert!(matches!(
            classify(200, body, &rules),
            Classification::Decided(LoginOutcome::Success { .. })
        ));

        let body = r#"{"code":0,"data":{"verify_code":true}}"#;
        assert!(matches!(
            classify(200, body, &rules),
            Classification::Inconclusive(LoginError::BusinessRejection { .. })
        ));
    }
}
