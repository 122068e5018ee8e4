//! Gateway session client
//!
//! Authenticates through a local eufy-security-ws gateway that owns the
//! account session. After `start_listening` the client watches the event
//! stream for a bounded window: a challenge event ends the window early,
//! silence is resolved by the configured `QuietWindowPolicy`.

pub mod connection;
pub mod pending;
pub mod protocol;

pub use connection::WsConnection;
pub use pending::{PendingCommand, PendingRequests};
pub use protocol::{
    CommandMessage, CorrelationId, GatewayCommand, GatewayEvent, InboundMessage,
    EVENT_CAPTCHA_REQUEST, EVENT_VERIFY_CODE,
};

use crate::config::{GatewayConfig, QuietWindowPolicy};
use crate::error::GatewayError;
use crate::models::LoginOutcome;
use std::time::Instant;

/// Token reported when the window passes without a challenge
pub const QUIET_WINDOW_TOKEN: &str = "ws_connected";

pub struct GatewaySession {
    config: GatewayConfig,
    connection: Option<WsConnection>,
    pending: PendingRequests,
}

impl GatewaySession {
    pub fn new(config: GatewayConfig) -> Self {
        let pending = PendingRequests::new(config.command_timeout());
        Self {
            config,
            connection: None,
            pending,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Commands sent but not yet answered
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Open the connection, start listening and watch for a challenge.
    ///
    /// Challenge and success outcomes keep the connection open so answers can
    /// be sent on it; every error path closes it. Dropping the session without
    /// calling `close()` drops the socket but skips the WebSocket close handshake.
    pub async fn connect_and_login(&mut self) -> LoginOutcome {
        if self.connection.is_some() {
            return LoginOutcome::error(GatewayError::AlreadyActive.to_string());
        }

        tracing::info!("[gateway] Connecting to {}...", self.config.url);
        match WsConnection::connect(&self.config.url, self.config.connect_timeout()).await {
            Ok(conn) => self.connection = Some(conn),
            Err(e) => {
                tracing::error!("[gateway] {}", e);
                return LoginOutcome::error(e.to_string());
            }
        }

        if let Err(e) = self.send_command(GatewayCommand::StartListening).await {
            tracing::error!("[gateway] Failed to start listening: {}", e);
            self.close().await;
            return LoginOutcome::error(e.to_string());
        }

        self.observe_window().await
    }

    /// Watch inbound messages until a challenge arrives or the window expires
    pub async fn observe_window(&mut self) -> LoginOutcome {
        let window = self.config.window();
        let read_timeout = self.config.read_timeout();
        let deadline = Instant::now() + window;
        tracing::info!("[gateway] Waiting up to {:?} for challenges...", window);

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = read_timeout.min(deadline - now);

            let Some(conn) = self.connection.as_mut() else {
                return LoginOutcome::error(GatewayError::NotConnected.to_string());
            };

            match tokio::time::timeout(wait, conn.recv_text()).await {
                Err(_) => {
                    self.expire_pending();
                }
                Ok(Ok(Some(text))) => {
                    if let Some(outcome) = self.handle_message(&text) {
                        return outcome;
                    }
                }
                Ok(Ok(None)) => {
                    tracing::error!("[gateway] Connection closed during login window");
                    self.close().await;
                    return LoginOutcome::error(GatewayError::Closed.to_string());
                }
                Ok(Err(e)) => {
                    tracing::error!("[gateway] Receive failed: {}", e);
                    self.close().await;
                    return LoginOutcome::error(e.to_string());
                }
            }
        }

        match self.config.on_quiet_window {
            QuietWindowPolicy::AssumeSuccess => {
                tracing::info!("[gateway] No challenge within {:?}, assuming logged in", window);
                LoginOutcome::Success {
                    token: QUIET_WINDOW_TOKEN.to_string(),
                }
            }
            QuietWindowPolicy::Error => {
                tracing::warn!("[gateway] No challenge within {:?}", window);
                self.close().await;
                LoginOutcome::error(format!("gateway sent no login state within {:?}", window))
            }
        }
    }

    /// Send a command and return its correlation id
    pub async fn send_command(
        &mut self,
        command: GatewayCommand,
    ) -> Result<CorrelationId, GatewayError> {
        let conn = self.connection.as_mut().ok_or(GatewayError::NotConnected)?;

        let id = self.pending.register(command.clone(), Instant::now());
        let message = CommandMessage::new(id.clone(), &command);
        tracing::debug!("[gateway] -> {} ({})", message.command, id);

        if let Err(e) = conn.send_json(&message).await {
            self.pending.resolve(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Send the second-factor code.
    ///
    /// `true` only means the command went out, not that the gateway accepted it.
    pub async fn set_second_factor(&mut self, code: &str) -> bool {
        let command = GatewayCommand::SetVerifyCode {
            code: code.to_string(),
        };
        self.send_logged(command).await
    }

    /// Send a CAPTCHA answer; same acknowledgment semantics as `set_second_factor`
    pub async fn set_captcha_answer(&mut self, captcha_id: &str, answer: &str) -> bool {
        let command = GatewayCommand::SetCaptcha {
            captcha_id: captcha_id.to_string(),
            answer: answer.to_string(),
        };
        self.send_logged(command).await
    }

    /// Release the connection. Safe to call repeatedly or without a connection.
    pub async fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            tracing::debug!("[gateway] Closing connection");
            conn.close().await;
        }
        self.pending.clear();
    }

    async fn send_logged(&mut self, command: GatewayCommand) -> bool {
        let name = command.name().to_string();
        match self.send_command(command).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("[gateway] Failed to send {}: {}", name, e);
                false
            }
        }
    }

    fn handle_message(&mut self, text: &str) -> Option<LoginOutcome> {
        let message: InboundMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("[gateway] Ignoring undecodable message: {}", e);
                return None;
            }
        };

        match message {
            InboundMessage::Event { event, data } => {
                let event = GatewayEvent::from_parts(event, data)?;
                tracing::debug!("[gateway] <- event '{}'", event.subtype);
                outcome_for_event(&event)
            }
            InboundMessage::Result {
                message_id: Some(id),
                success,
                error_code,
            } => {
                if let Some(pending) = self.pending.resolve(&id) {
                    tracing::debug!(
                        "[gateway] <- result for {} after {:?}: success={:?} error={:?}",
                        pending.command.name(),
                        pending.sent_at.elapsed(),
                        success,
                        error_code
                    );
                }
                None
            }
            InboundMessage::Result { message_id: None, .. } | InboundMessage::Other => None,
        }
    }

    fn expire_pending(&mut self) {
        for (id, pending) in self.pending.expire(Instant::now()) {
            tracing::warn!(
                "[gateway] No reply to {} ({}) before it expired",
                pending.command.name(),
                id
            );
        }
    }
}

/// Map a challenge event to its terminal outcome
fn outcome_for_event(event: &GatewayEvent) -> Option<LoginOutcome> {
    match event.subtype.as_str() {
        EVENT_CAPTCHA_REQUEST => {
            let id = event
                .field(&["captchaId", "captcha_id", "id"])
                .unwrap_or_default();
            let image = event
                .field(&["captcha", "captchaImage", "image"])
                .unwrap_or_default();
            Some(LoginOutcome::captcha(id, image))
        }
        EVENT_VERIFY_CODE => Some(LoginOutcome::TwoFactorRequired),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    /// Scripted gateway: forwards every command it receives to the test and
    /// sends `script` frames, each after its delay.
    async fn spawn_gateway(
        script: Vec<(Duration, Value)>,
    ) -> (String, mpsc::UnboundedReceiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut sink, mut source) = ws.split();

            tokio::spawn(async move {
                while let Some(Ok(Message::Text(text))) = source.next().await {
                    let _ = tx.send(serde_json::from_str::<Value>(&text).unwrap());
                }
            });

            for (delay, frame) in script {
                tokio::time::sleep(delay).await;
                if sink.send(Message::Text(frame.to_string())).await.is_err() {
                    return;
                }
            }
            // Keep the socket open until the client hangs up
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        (format!("ws://{}", addr), rx)
    }

    fn config(url: String, window_ms: u64, policy: QuietWindowPolicy) -> GatewayConfig {
        GatewayConfig {
            url,
            connect_timeout_ms: 500,
            window_ms,
            read_timeout_ms: 50,
            on_quiet_window: policy,
            command_timeout_ms: 30_000,
        }
    }

    #[tokio::test]
    async fn test_captcha_event_ends_window_early() {
        let event = json!({
            "type": "event",
            "event": "captcha request",
            "data": {"captchaId": "cap-7", "captcha": "AAAA"}
        });
        let (url, mut commands) = spawn_gateway(vec![(Duration::from_millis(20), event)]).await;
        let mut session = GatewaySession::new(config(url, 5_000, QuietWindowPolicy::AssumeSuccess));

        let started = Instant::now();
        let outcome = session.connect_and_login().await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(
            outcome,
            LoginOutcome::CaptchaRequired {
                challenge_id: "cap-7".to_string(),
                challenge_image_ref: "data:image/png;base64,AAAA".to_string(),
            }
        );

        let first = commands.recv().await.unwrap();
        assert_eq!(first["command"], "start_listening");
        assert_eq!(first["arguments"], json!([]));
        session.close().await;
    }

    #[tokio::test]
    async fn test_late_verify_code_event_still_counts() {
        let frames = vec![
            (
                Duration::from_millis(10),
                json!({"type": "version", "serverVersion": "1.0"}),
            ),
            (Duration::from_millis(10), json!("not a message")),
            (
                Duration::from_millis(150),
                json!({"type": "event", "event": {"source": "driver", "event": "verify code"}}),
            ),
        ];
        let (url, _commands) = spawn_gateway(frames).await;
        let mut session = GatewaySession::new(config(url, 400, QuietWindowPolicy::AssumeSuccess));

        assert_eq!(
            session.connect_and_login().await,
            LoginOutcome::TwoFactorRequired
        );
        assert!(session.is_connected());
        session.close().await;
    }

    #[tokio::test]
    async fn test_quiet_window_assumes_success() {
        let (url, _commands) = spawn_gateway(Vec::new()).await;
        let mut session = GatewaySession::new(config(url, 200, QuietWindowPolicy::AssumeSuccess));

        assert_eq!(
            session.connect_and_login().await,
            LoginOutcome::Success {
                token: QUIET_WINDOW_TOKEN.to_string()
            }
        );
        session.close().await;
    }

    #[tokio::test]
    async fn test_quiet_window_error_policy() {
        let (url, _commands) = spawn_gateway(Vec::new()).await;
        let mut session = GatewaySession::new(config(url, 200, QuietWindowPolicy::Error));

        let outcome = session.connect_and_login().await;
        assert_eq!(outcome.status(), "error");
        assert!(!session.is_connected());
    }

    /// Gateway that reads `start_listening` and then hangs up, either with a
    /// Close frame or by dropping the TCP stream.
    async fn spawn_hanging_up_gateway(send_close: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            tokio::time::sleep(Duration::from_millis(50)).await;

            if send_close {
                let _ = ws.close(None).await;
                // Drain until the client's close reply arrives
                while let Some(Ok(_)) = ws.next().await {}
            } else {
                drop(ws);
            }
        });

        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_close_frame_during_window_is_error() {
        let url = spawn_hanging_up_gateway(true).await;
        let mut session = GatewaySession::new(config(url, 2_000, QuietWindowPolicy::AssumeSuccess));

        let started = Instant::now();
        let outcome = session.connect_and_login().await;

        assert_eq!(outcome.status(), "error");
        assert!(started.elapsed() < Duration::from_millis(1_500));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_dropped_stream_during_window_is_error() {
        let url = spawn_hanging_up_gateway(false).await;
        let mut session = GatewaySession::new(config(url, 2_000, QuietWindowPolicy::AssumeSuccess));

        let started = Instant::now();
        let outcome = session.connect_and_login().await;

        assert_eq!(outcome.status(), "error");
        assert!(started.elapsed() < Duration::from_millis(1_500));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept TCP but never answer the upgrade request
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let mut session = GatewaySession::new(config(
            format!("ws://{}", addr),
            200,
            QuietWindowPolicy::AssumeSuccess,
        ));

        let outcome = tokio::time::timeout(Duration::from_secs(5), session.connect_and_login())
            .await
            .expect("connect_and_login must return within the connect timeout");

        match outcome {
            LoginOutcome::Error { message } => assert!(message.contains("no handshake")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_connect_failure_is_error_outcome() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut session = GatewaySession::new(config(
            format!("ws://{}", addr),
            200,
            QuietWindowPolicy::AssumeSuccess,
        ));

        assert_eq!(session.connect_and_login().await.status(), "error");
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_second_attempt_while_connected_is_rejected() {
        let (url, _commands) = spawn_gateway(Vec::new()).await;
        let mut session = GatewaySession::new(config(url, 100, QuietWindowPolicy::AssumeSuccess));

        assert!(session.connect_and_login().await.is_success());
        assert_eq!(
            session.connect_and_login().await,
            LoginOutcome::error(GatewayError::AlreadyActive.to_string())
        );
        assert!(session.is_connected());
        session.close().await;
    }

    #[tokio::test]
    async fn test_answers_sent_positionally_and_replies_resolve() {
        let (url, mut commands) = spawn_gateway(Vec::new()).await;
        let mut session = GatewaySession::new(config(url, 100, QuietWindowPolicy::AssumeSuccess));
        session.connect_and_login().await;
        let start = commands.recv().await.unwrap();

        assert!(session.set_second_factor("123456").await);
        assert!(session.set_captcha_answer("cap-1", "x7k2").await);

        let code = commands.recv().await.unwrap();
        assert_eq!(code["command"], "driver.set_verify_code");
        assert_eq!(code["arguments"], json!(["123456"]));

        let captcha = commands.recv().await.unwrap();
        assert_eq!(captcha["command"], "driver.set_captcha");
        assert_eq!(captcha["arguments"], json!(["cap-1", "x7k2"]));
        assert_ne!(code["messageId"], captcha["messageId"]);

        // start_listening was never answered; the two answers are in flight
        assert_eq!(session.pending().len(), 3);
        let start_id: CorrelationId = serde_json::from_value(start["messageId"].clone()).unwrap();
        let reply = json!({"type": "result", "messageId": start_id, "success": true});
        assert!(session.handle_message(&reply.to_string()).is_none());
        assert_eq!(session.pending().len(), 2);

        session.close().await;
        assert!(session.pending().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut session = GatewaySession::new(GatewayConfig::default());
        session.close().await;
        session.close().await;
        assert!(!session.set_second_factor("1").await);
        assert!(matches!(
            session.send_command(GatewayCommand::StartListening).await,
            Err(GatewayError::NotConnected)
        ));
    }
}
