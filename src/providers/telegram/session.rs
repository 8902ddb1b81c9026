//! Telegram client session lifecycle.
//!
//! Login is a two-step handshake (code, then optionally a password), with
//! the pending state parked under a session key between steps. Completed
//! logins persist their session token and get a listener task that feeds
//! inbound messages into the ingestion pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{MessageType, Source};
use crate::ingest::Ingestor;
use crate::store::{SqliteStore, StoreError};
use crate::transcribe::Transcriber;

use super::connector::{
    ConnectorError, InboundEvent, LiveClient, PendingAuth, SignInError, TelegramConnector,
};

/// Wait between retries after an event stream error
const EVENT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Errors in the login handshake and session management
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unknown or expired login attempt: {0}")]
    UnknownSessionKey(String),

    #[error("second factor required")]
    SecondFactorRequired,

    #[error("invalid login code")]
    InvalidCode,

    #[error("sign-in rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SignInError> for AuthError {
    fn from(e: SignInError) -> Self {
        match e {
            SignInError::SecondFactorRequired => Self::SecondFactorRequired,
            SignInError::InvalidCode => Self::InvalidCode,
            SignInError::Rejected(msg) => Self::Rejected(msg),
            SignInError::Connector(inner) => Self::Connector(inner),
        }
    }
}

/// Where a user sits in the session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// No stored session, no login in flight
    NoSession,

    /// Code sent, waiting for verification
    AuthPending,

    /// Code accepted but the account wants a password
    AuthPending2fa,

    /// Live client connected and listening
    Authenticated,

    /// Session stored but no live client (service restart pending)
    Disconnected,
}

/// Result of starting a login
#[derive(Debug, Clone)]
pub struct StartedAuth {
    /// Key identifying the pending login for the verify step
    pub session_key: String,

    /// Provider-issued hash for the delivered code
    pub phone_code_hash: String,
}

struct PendingLogin {
    user_id: Uuid,
    phone: String,
    auth: Box<dyn PendingAuth>,
    awaiting_password: bool,
}

#[derive(Default)]
struct SessionTable {
    pending: HashMap<String, PendingLogin>,
    listeners: HashMap<Uuid, ListenerHandle>,
}

/// Manages Telegram logins, live clients and their listener tasks
pub struct TelegramSessions {
    connector: Arc<dyn TelegramConnector>,
    store: Arc<SqliteStore>,
    ingestor: Arc<Ingestor>,
    transcriber: Arc<Transcriber>,
    table: Mutex<SessionTable>,
}

impl TelegramSessions {
    pub fn new(
        connector: Arc<dyn TelegramConnector>,
        store: Arc<SqliteStore>,
        ingestor: Arc<Ingestor>,
        transcriber: Arc<Transcriber>,
    ) -> Self {
        Self {
            connector,
            store,
            ingestor,
            transcriber,
            table: Mutex::new(SessionTable::default()),
        }
    }

    fn session_key(user_id: Uuid) -> String {
        format!("temp_{user_id}")
    }

    /// Begin a login: have a code delivered and park the pending auth.
    ///
    /// Starting again for the same user aborts the previous attempt.
    pub async fn start_auth(&self, user_id: Uuid, phone: &str) -> Result<StartedAuth, AuthError> {
        if self.store.get_user(user_id)?.is_none() {
            return Err(StoreError::UserNotFound(user_id).into());
        }

        let auth = self.connector.send_code(phone).await?;
        let session_key = Self::session_key(user_id);
        let phone_code_hash = auth.phone_code_hash().to_string();

        let replaced = {
            let mut table = self.table.lock().await;
            table.pending.insert(
                session_key.clone(),
                PendingLogin {
                    user_id,
                    phone: phone.to_string(),
                    auth,
                    awaiting_password: false,
                },
            )
        };
        if let Some(old) = replaced {
            warn!(%user_id, "replacing pending login");
            old.auth.abort().await;
        }

        info!(%user_id, "login code sent");
        Ok(StartedAuth {
            session_key,
            phone_code_hash,
        })
    }

    /// Complete a login with the delivered code, and the account password
    /// if a second factor is set.
    ///
    /// When the account wants a password and none was given, the pending
    /// login stays parked so the caller can retry with one. Every other
    /// failure aborts and discards the attempt.
    pub async fn verify(
        &self,
        session_key: &str,
        code: &str,
        password: Option<&str>,
    ) -> Result<(), AuthError> {
        let mut pending = {
            let mut table = self.table.lock().await;
            table.pending.remove(session_key)
        }
        .ok_or_else(|| AuthError::UnknownSessionKey(session_key.to_string()))?;

        let client = match pending.auth.sign_in(&pending.phone, code).await {
            Ok(client) => client,
            Err(SignInError::SecondFactorRequired) => match password {
                Some(pw) => match pending.auth.sign_in_with_password(pw).await {
                    Ok(client) => client,
                    Err(e) => {
                        pending.auth.abort().await;
                        return Err(e.into());
                    }
                },
                None => {
                    pending.awaiting_password = true;
                    self.table
                        .lock()
                        .await
                        .pending
                        .insert(session_key.to_string(), pending);
                    return Err(AuthError::SecondFactorRequired);
                }
            },
            Err(e) => {
                pending.auth.abort().await;
                return Err(e.into());
            }
        };

        let user_id = pending.user_id;
        if let Err(e) = self.store.set_telegram_session(user_id, client.session()) {
            client.disconnect().await;
            return Err(e.into());
        }

        self.install_listener(user_id, client).await;
        info!(%user_id, "telegram login complete");
        Ok(())
    }

    /// Reconnect stored sessions at startup. Returns how many came back.
    ///
    /// Sessions the provider no longer accepts are cleared; one user's
    /// failure never blocks the rest.
    pub async fn restore_all(&self) -> usize {
        let users = match self.store.users_with_telegram_session() {
            Ok(users) => users,
            Err(e) => {
                error!("failed to load stored telegram sessions: {e}");
                return 0;
            }
        };

        let mut restored = 0;
        for user in users {
            let Some(session) = user.telegram_session.as_deref() else {
                continue;
            };
            match self.restore_one(user.id, session).await {
                Ok(true) => {
                    info!(user_id = %user.id, "restored telegram session");
                    restored += 1;
                }
                Ok(false) => {
                    info!(user_id = %user.id, "stored telegram session no longer authorized, cleared");
                }
                Err(e) => {
                    error!(user_id = %user.id, "failed to restore telegram session: {e}");
                }
            }
        }
        restored
    }

    async fn restore_one(&self, user_id: Uuid, session: &str) -> Result<bool, AuthError> {
        let client = self.connector.connect(session).await?;
        match client.is_authorized().await {
            Ok(true) => {
                self.install_listener(user_id, client).await;
                Ok(true)
            }
            Ok(false) => {
                self.store.clear_telegram_session(user_id)?;
                client.disconnect().await;
                Ok(false)
            }
            Err(e) => {
                client.disconnect().await;
                Err(e.into())
            }
        }
    }

    async fn install_listener(&self, user_id: Uuid, client: Box<dyn LiveClient>) {
        let old = {
            let mut table = self.table.lock().await;
            table.listeners.remove(&user_id)
        };
        if let Some(old) = old {
            old.stop().await;
        }

        let handle = spawn_listener(
            user_id,
            client,
            self.ingestor.clone(),
            self.transcriber.clone(),
        );
        self.table.lock().await.listeners.insert(user_id, handle);
    }

    /// Stop the live client (if any) and clear the stored session.
    pub async fn disconnect(&self, user_id: Uuid) -> Result<(), AuthError> {
        let handle = {
            let mut table = self.table.lock().await;
            table.listeners.remove(&user_id)
        };
        if let Some(handle) = handle {
            handle.stop().await;
        }
        self.store.clear_telegram_session(user_id)?;
        info!(%user_id, "telegram disconnected");
        Ok(())
    }

    /// Current lifecycle state for a user.
    pub async fn auth_state(&self, user_id: Uuid) -> Result<AuthState, AuthError> {
        {
            let table = self.table.lock().await;
            if table.listeners.contains_key(&user_id) {
                return Ok(AuthState::Authenticated);
            }
            if let Some(pending) = table.pending.get(&Self::session_key(user_id)) {
                return Ok(if pending.awaiting_password {
                    AuthState::AuthPending2fa
                } else {
                    AuthState::AuthPending
                });
            }
        }

        let user = self
            .store
            .get_user(user_id)?
            .ok_or(StoreError::UserNotFound(user_id))?;
        Ok(if user.has_telegram_session() {
            AuthState::Disconnected
        } else {
            AuthState::NoSession
        })
    }

    /// Stop all listeners and abort any pending logins.
    pub async fn shutdown(&self) {
        let (pending, listeners) = {
            let mut table = self.table.lock().await;
            (
                std::mem::take(&mut table.pending),
                std::mem::take(&mut table.listeners),
            )
        };

        for (_, login) in pending {
            login.auth.abort().await;
        }
        for (_, handle) in listeners {
            handle.stop().await;
        }
        info!("telegram sessions stopped");
    }
}

struct ListenerHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.task.await;
    }
}

fn spawn_listener(
    user_id: Uuid,
    client: Box<dyn LiveClient>,
    ingestor: Arc<Ingestor>,
    transcriber: Arc<Transcriber>,
) -> ListenerHandle {
    let (stop_tx, stop_rx) = mpsc::channel(1);
    let task = tokio::spawn(run_listener(user_id, client, ingestor, transcriber, stop_rx));
    ListenerHandle { stop_tx, task }
}

async fn run_listener(
    user_id: Uuid,
    mut client: Box<dyn LiveClient>,
    ingestor: Arc<Ingestor>,
    transcriber: Arc<Transcriber>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    info!(%user_id, "telegram listener started");
    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            event = client.next_event() => match event {
                Ok(event) => {
                    handle_event(user_id, client.as_ref(), &ingestor, &transcriber, event).await;
                }
                Err(e) => {
                    error!(%user_id, "telegram event stream error: {e}");
                    tokio::select! {
                        _ = stop_rx.recv() => break,
                        _ = tokio::time::sleep(EVENT_RETRY_DELAY) => {}
                    }
                }
            }
        }
    }
    client.disconnect().await;
    info!(%user_id, "telegram listener stopped");
}

async fn handle_event(
    user_id: Uuid,
    client: &dyn LiveClient,
    ingestor: &Ingestor,
    transcriber: &Transcriber,
    event: InboundEvent,
) {
    match event {
        InboundEvent::Text { sender, text } => {
            ingest_framed(user_id, ingestor, &sender, &text, MessageType::Text).await;
        }
        InboundEvent::Voice { sender, media } => match client.download(&media).await {
            Ok(payload) => {
                if let Some(text) = transcriber.transcribe_voice_payload(&payload).await {
                    ingest_framed(user_id, ingestor, &sender, &text, MessageType::Voice).await;
                }
            }
            Err(e) => error!(%user_id, "failed to download voice note: {e}"),
        },
        InboundEvent::Audio { sender, media } => match client.download(&media).await {
            Ok(payload) => {
                if let Some(text) = transcriber.transcribe_audio_payload(&payload).await {
                    ingest_framed(user_id, ingestor, &sender, &text, MessageType::Audio).await;
                }
            }
            Err(e) => error!(%user_id, "failed to download audio attachment: {e}"),
        },
        InboundEvent::Ignored => {}
    }
}

/// Persist an inbound message with its sender prefixed for context.
async fn ingest_framed(
    user_id: Uuid,
    ingestor: &Ingestor,
    sender: &str,
    text: &str,
    message_type: MessageType,
) {
    let framed = format!("From {sender}: {text}");
    if let Err(e) = ingestor
        .ingest_text(user_id, &framed, Source::Telegram, message_type)
        .await
    {
        error!(%user_id, "failed to persist telegram message: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::super::connector::MediaRef;
    use super::*;
    use crate::classify::Classifier;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct MockScript {
        require_password: bool,
        reject_code: bool,
        connect_authorized: bool,
        fail_events: bool,
        aborted: Arc<AtomicUsize>,
        disconnected: Arc<AtomicUsize>,
    }

    struct MockConnector {
        script: MockScript,
    }

    #[async_trait]
    impl TelegramConnector for MockConnector {
        async fn send_code(&self, _phone: &str) -> Result<Box<dyn PendingAuth>, ConnectorError> {
            Ok(Box::new(MockPending {
                script: self.script.clone(),
            }))
        }

        async fn connect(&self, session: &str) -> Result<Box<dyn LiveClient>, ConnectorError> {
            Ok(Box::new(MockClient {
                script: self.script.clone(),
                session: session.to_string(),
                events: VecDeque::new(),
            }))
        }
    }

    struct MockPending {
        script: MockScript,
    }

    #[async_trait]
    impl PendingAuth for MockPending {
        fn phone_code_hash(&self) -> &str {
            "hash-1"
        }

        async fn sign_in(
            &mut self,
            _phone: &str,
            _code: &str,
        ) -> Result<Box<dyn LiveClient>, SignInError> {
            if self.script.reject_code {
                return Err(SignInError::InvalidCode);
            }
            if self.script.require_password {
                return Err(SignInError::SecondFactorRequired);
            }
            Ok(Box::new(MockClient {
                script: self.script.clone(),
                session: "session-from-code".to_string(),
                events: VecDeque::new(),
            }))
        }

        async fn sign_in_with_password(
            &mut self,
            password: &str,
        ) -> Result<Box<dyn LiveClient>, SignInError> {
            if password == "correct" {
                Ok(Box::new(MockClient {
                    script: self.script.clone(),
                    session: "session-from-password".to_string(),
                    events: VecDeque::new(),
                }))
            } else {
                Err(SignInError::Rejected("bad password".to_string()))
            }
        }

        async fn abort(self: Box<Self>) {
            self.script.aborted.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct MockClient {
        script: MockScript,
        session: String,
        events: VecDeque<InboundEvent>,
    }

    #[async_trait]
    impl LiveClient for MockClient {
        fn session(&self) -> &str {
            &self.session
        }

        async fn is_authorized(&self) -> Result<bool, ConnectorError> {
            Ok(self.script.connect_authorized)
        }

        async fn next_event(&mut self) -> Result<InboundEvent, ConnectorError> {
            if self.script.fail_events {
                return Err(ConnectorError::Gateway("stream interrupted".to_string()));
            }
            match self.events.pop_front() {
                Some(event) => Ok(event),
                None => std::future::pending().await,
            }
        }

        async fn download(&self, _media: &MediaRef) -> Result<Vec<u8>, ConnectorError> {
            Ok(vec![1, 2, 3])
        }

        async fn disconnect(self: Box<Self>) {
            self.script.disconnected.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sessions_with(script: MockScript) -> (TelegramSessions, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let ingestor = Arc::new(Ingestor::new(store.clone(), Arc::new(Classifier::new(None))));
        let transcriber = Arc::new(Transcriber::new(None, None));
        let sessions = TelegramSessions::new(
            Arc::new(MockConnector { script }),
            store.clone(),
            ingestor,
            transcriber,
        );
        (sessions, store)
    }

    #[tokio::test]
    async fn test_login_happy_path() {
        let script = MockScript::default();
        let (sessions, store) = sessions_with(script.clone());
        let user = store.create_user(Some("alice")).unwrap();

        let started = sessions.start_auth(user.id, "+15550001").await.unwrap();
        assert_eq!(started.session_key, format!("temp_{}", user.id));
        assert_eq!(started.phone_code_hash, "hash-1");
        assert_eq!(
            sessions.auth_state(user.id).await.unwrap(),
            AuthState::AuthPending
        );

        sessions
            .verify(&started.session_key, "12345", None)
            .await
            .unwrap();

        assert_eq!(
            sessions.auth_state(user.id).await.unwrap(),
            AuthState::Authenticated
        );
        let stored = store.get_user(user.id).unwrap().unwrap();
        assert_eq!(stored.telegram_session.as_deref(), Some("session-from-code"));

        sessions.shutdown().await;
        assert_eq!(script.disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_factor_keeps_pending() {
        let script = MockScript {
            require_password: true,
            ..Default::default()
        };
        let (sessions, store) = sessions_with(script.clone());
        let user = store.create_user(None).unwrap();

        let started = sessions.start_auth(user.id, "+15550001").await.unwrap();

        let err = sessions
            .verify(&started.session_key, "12345", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SecondFactorRequired));
        // the pending login survived for a retry with a password
        assert_eq!(
            sessions.auth_state(user.id).await.unwrap(),
            AuthState::AuthPending2fa
        );
        assert_eq!(script.aborted.load(Ordering::SeqCst), 0);

        sessions
            .verify(&started.session_key, "12345", Some("correct"))
            .await
            .unwrap();
        assert_eq!(
            sessions.auth_state(user.id).await.unwrap(),
            AuthState::Authenticated
        );
        let stored = store.get_user(user.id).unwrap().unwrap();
        assert_eq!(
            stored.telegram_session.as_deref(),
            Some("session-from-password")
        );

        sessions.shutdown().await;
    }

    #[tokio::test]
    async fn test_wrong_password_aborts() {
        let script = MockScript {
            require_password: true,
            ..Default::default()
        };
        let (sessions, store) = sessions_with(script.clone());
        let user = store.create_user(None).unwrap();

        let started = sessions.start_auth(user.id, "+15550001").await.unwrap();
        let err = sessions
            .verify(&started.session_key, "12345", Some("wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Rejected(_)));
        assert_eq!(script.aborted.load(Ordering::SeqCst), 1);
        assert_eq!(
            sessions.auth_state(user.id).await.unwrap(),
            AuthState::NoSession
        );
    }

    #[tokio::test]
    async fn test_invalid_code_cleans_pending() {
        let script = MockScript {
            reject_code: true,
            ..Default::default()
        };
        let (sessions, store) = sessions_with(script.clone());
        let user = store.create_user(None).unwrap();

        let started = sessions.start_auth(user.id, "+15550001").await.unwrap();
        let err = sessions
            .verify(&started.session_key, "00000", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCode));
        assert_eq!(script.aborted.load(Ordering::SeqCst), 1);

        let err = sessions
            .verify(&started.session_key, "00000", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownSessionKey(_)));
    }

    #[tokio::test]
    async fn test_restart_replaces_pending_login() {
        let script = MockScript::default();
        let (sessions, store) = sessions_with(script.clone());
        let user = store.create_user(None).unwrap();

        sessions.start_auth(user.id, "+15550001").await.unwrap();
        sessions.start_auth(user.id, "+15550001").await.unwrap();

        assert_eq!(script.aborted.load(Ordering::SeqCst), 1);
        assert_eq!(
            sessions.auth_state(user.id).await.unwrap(),
            AuthState::AuthPending
        );
    }

    #[tokio::test]
    async fn test_restore_valid_session() {
        let script = MockScript {
            connect_authorized: true,
            ..Default::default()
        };
        let (sessions, store) = sessions_with(script);
        let user = store.create_user(None).unwrap();
        store.set_telegram_session(user.id, "stored-session").unwrap();

        assert_eq!(sessions.restore_all().await, 1);
        assert_eq!(
            sessions.auth_state(user.id).await.unwrap(),
            AuthState::Authenticated
        );

        sessions.shutdown().await;
    }

    #[tokio::test]
    async fn test_restore_clears_invalid_session() {
        let script = MockScript {
            connect_authorized: false,
            ..Default::default()
        };
        let (sessions, store) = sessions_with(script.clone());
        let user = store.create_user(None).unwrap();
        store.set_telegram_session(user.id, "stale-session").unwrap();

        assert_eq!(sessions.restore_all().await, 0);
        assert_eq!(script.disconnected.load(Ordering::SeqCst), 1);

        let stored = store.get_user(user.id).unwrap().unwrap();
        assert!(stored.telegram_session.is_none());
        assert_eq!(
            sessions.auth_state(user.id).await.unwrap(),
            AuthState::NoSession
        );
    }

    #[tokio::test]
    async fn test_disconnect_clears_session() {
        let script = MockScript::default();
        let (sessions, store) = sessions_with(script.clone());
        let user = store.create_user(None).unwrap();

        let started = sessions.start_auth(user.id, "+15550001").await.unwrap();
        sessions
            .verify(&started.session_key, "12345", None)
            .await
            .unwrap();

        sessions.disconnect(user.id).await.unwrap();
        assert_eq!(script.disconnected.load(Ordering::SeqCst), 1);
        let stored = store.get_user(user.id).unwrap().unwrap();
        assert!(stored.telegram_session.is_none());
        assert_eq!(
            sessions.auth_state(user.id).await.unwrap(),
            AuthState::NoSession
        );
    }

    #[tokio::test]
    async fn test_state_disconnected_without_live_client() {
        let (sessions, store) = sessions_with(MockScript::default());
        let user = store.create_user(None).unwrap();
        store.set_telegram_session(user.id, "stored").unwrap();

        assert_eq!(
            sessions.auth_state(user.id).await.unwrap(),
            AuthState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_listener_ingests_framed_text() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let ingestor = Arc::new(Ingestor::new(store.clone(), Arc::new(Classifier::new(None))));
        let transcriber = Arc::new(Transcriber::new(None, None));
        let user = store.create_user(None).unwrap();

        let script = MockScript::default();
        let mut events = VecDeque::new();
        events.push_back(InboundEvent::Text {
            sender: "Alice".to_string(),
            text: "pick up the package".to_string(),
        });
        let client = Box::new(MockClient {
            script: script.clone(),
            session: "s".to_string(),
            events,
        });

        let handle = spawn_listener(user.id, client, ingestor, transcriber);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.count_items(user.id).unwrap(), 1);

        handle.stop().await;
        assert_eq!(script.disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_interrupts_event_error_backoff() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let ingestor = Arc::new(Ingestor::new(store.clone(), Arc::new(Classifier::new(None))));
        let transcriber = Arc::new(Transcriber::new(None, None));
        let user = store.create_user(None).unwrap();

        let script = MockScript {
            fail_events: true,
            ..Default::default()
        };
        let client = Box::new(MockClient {
            script: script.clone(),
            session: "s".to_string(),
            events: VecDeque::new(),
        });

        let handle = spawn_listener(user.id, client, ingestor, transcriber);
        // by now the listener has hit the failing stream and sits in its
        // retry delay
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(2), handle.stop())
            .await
            .expect("stop should not wait out the retry delay");
        assert_eq!(script.disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_listener_skips_voice_when_transcription_fails() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let ingestor = Arc::new(Ingestor::new(store.clone(), Arc::new(Classifier::new(None))));
        // no API key, transcription yields None
        let transcriber = Arc::new(Transcriber::new(None, None));
        let user = store.create_user(None).unwrap();

        let mut events = VecDeque::new();
        events.push_back(InboundEvent::Voice {
            sender: "Alice".to_string(),
            media: MediaRef("m-1".to_string()),
        });
        let client = Box::new(MockClient {
            script: MockScript::default(),
            session: "s".to_string(),
            events,
        });

        let handle = spawn_listener(user.id, client, ingestor, transcriber);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.count_items(user.id).unwrap(), 0);
        handle.stop().await;
    }
}
