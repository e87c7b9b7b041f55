//! Coordinator loop
//!
//! Validates the API key, starts the relay connector once it is accepted,
//! runs OBS connection attempts on request and re-renders the shell after
//! every model change or command.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use super::AppCommand;
use crate::config::{Config, LocalToolSettings, SettingsStore};
use crate::credential::{CredentialGate, SecretStore, ValidatedCredential, ValidationResult};
use crate::error::ConnectorError;
use crate::obs::{EventForwarder, LocalToolConnector, ToolDialer, ToolEvent};
use crate::relay::{CloudConnector, CloudHandle, RelayDialer};
use crate::session::SessionStatusModel;
use crate::ui::Shell;
use crate::view::{self, Screen, ViewInputs};

/// External collaborators
pub struct Services {
    pub secrets: Arc<dyn SecretStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub relay: Arc<dyn RelayDialer>,
    pub tool: Arc<dyn ToolDialer>,
}

/// Outcome of one background key check
struct Verdict {
    persist: bool,
    result: Result<ValidatedCredential, ConnectorError>,
}

pub struct App<S: Shell> {
    config: Config,
    gate: Arc<CredentialGate>,
    settings_store: Arc<dyn SettingsStore>,
    relay_dialer: Arc<dyn RelayDialer>,
    model: SessionStatusModel,
    tool: Arc<LocalToolConnector>,
    tool_events: mpsc::UnboundedReceiver<ToolEvent>,
    tool_lost: mpsc::UnboundedReceiver<()>,
    shell: S,
    cmd_rx: mpsc::Receiver<AppCommand>,

    stored_present: bool,
    /// Key typed by the user, kept until another one replaces it
    pending_key: Option<String>,
    validation: Option<ValidationResult>,
    tool_form: bool,
    settings: LocalToolSettings,
    services_started: bool,

    validating: Option<JoinHandle<Verdict>>,
    tool_connect: Option<JoinHandle<Result<(), ConnectorError>>>,
    cloud: Option<CloudHandle>,
    forwarder: Option<EventForwarder>,
    last_screen: Option<Screen>,
}

impl<S: Shell> App<S> {
    pub fn new(
        config: Config,
        services: Services,
        shell: S,
        cmd_rx: mpsc::Receiver<AppCommand>,
    ) -> Self {
        let model = SessionStatusModel::new(config.logs.capacity);

        let (event_tx, tool_events) = mpsc::unbounded_channel();
        let tool = LocalToolConnector::new(model.clone(), services.tool).with_event_sink(event_tx);
        let (lost_tx, tool_lost) = mpsc::unbounded_channel();
        tool.on_disconnected(move || {
            let _ = lost_tx.send(());
        });

        let settings = match services.settings.load() {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load OBS settings, using defaults: {:#}", e);
                config.obs.clone()
            }
        };

        Self {
            gate: Arc::new(CredentialGate::new(&config, services.secrets)),
            settings_store: services.settings,
            relay_dialer: services.relay,
            model,
            tool: Arc::new(tool),
            tool_events,
            tool_lost,
            shell,
            cmd_rx,
            stored_present: false,
            pending_key: None,
            validation: None,
            tool_form: false,
            settings,
            services_started: false,
            validating: None,
            tool_connect: None,
            cloud: None,
            forwarder: None,
            last_screen: None,
            config,
        }
    }

    /// Handle to the session status shared with the connectors
    pub fn model(&self) -> SessionStatusModel {
        self.model.clone()
    }

    /// Run until `Shutdown` arrives or every command sender is dropped
    pub async fn run(mut self) -> Result<()> {
        info!("Coordinator starting");
        let mut updates = self.model.subscribe();

        self.check_stored_credential();
        self.render();

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(AppCommand::Shutdown) | None => {
                        info!("Shutdown requested");
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                },

                verdict = join_pending(&mut self.validating) => {
                    self.validating = None;
                    match verdict {
                        Ok(verdict) => self.on_verdict(verdict).await,
                        Err(e) => debug!("Validation task ended: {}", e),
                    }
                }

                outcome = join_pending(&mut self.tool_connect) => {
                    self.tool_connect = None;
                    if let Ok(Ok(())) = outcome {
                        self.tool_form = false;
                    }
                }

                Some(()) = self.tool_lost.recv() => {
                    info!("OBS connection lost, waiting for the user to reconnect");
                    self.tool_form = true;
                }

                Some(event) = self.tool_events.recv() => self.forward(event),

                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            self.render();
        }

        self.shutdown().await;
        Ok(())
    }

    async fn handle_command(&mut self, cmd: AppCommand) {
        debug!("Command: {:?}", redact(&cmd));
        match cmd {
            AppCommand::SubmitCredential(token) => {
                let token = token.trim().to_string();
                self.pending_key = Some(token.clone());
                self.start_validation(token, true);
            }
            AppCommand::RetryValidation => {
                let token = self
                    .pending_key
                    .clone()
                    .or_else(|| self.gate.stored_credential());
                match token {
                    Some(token) => {
                        let persist = self.pending_key.is_some();
                        self.start_validation(token, persist);
                    }
                    None => debug!("Nothing to retry, no API key"),
                }
            }
            AppCommand::ShowToolForm => self.tool_form = true,
            AppCommand::HideToolForm => self.tool_form = false,
            AppCommand::ConnectTool(settings) => {
                self.settings = settings.clone();
                self.connect_tool(settings).await;
            }
            AppCommand::SaveToolSettings(settings) => match self.settings_store.save(&settings) {
                Ok(()) => {
                    self.settings = settings;
                    self.model.append_log("OBS settings saved.");
                }
                Err(e) => {
                    warn!("Failed to save OBS settings: {:#}", e);
                    self.model
                        .append_log(format!("Failed to save OBS settings: {:#}", e));
                }
            },
            AppCommand::CancelToolConnect => self.cancel_tool_connect().await,
            AppCommand::OpenLogs => self.shell.mirror_logs(self.model.snapshot().log_lines()),
            AppCommand::Shutdown => {}
        }
    }

    fn check_stored_credential(&mut self) {
        match self.gate.stored_credential() {
            Some(token) => {
                self.stored_present = true;
                self.model.append_log("Checking stored API key.");
                self.start_validation(token, false);
            }
            None => info!("No API key stored, asking the user for one"),
        }
    }

    /// Check `token` in the background; the previous check, if any, is dropped
    fn start_validation(&mut self, token: String, persist: bool) {
        if let Some(previous) = self.validating.take() {
            previous.abort();
        }
        self.validation = None;

        let gate = self.gate.clone();
        self.validating = Some(tokio::spawn(async move {
            let result = gate.admit(&token).await;
            Verdict { persist, result }
        }));
    }

    async fn on_verdict(&mut self, verdict: Verdict) {
        match verdict.result {
            Ok(credential) => {
                info!("API key accepted");
                self.validation = Some(ValidationResult::Valid);
                self.model.append_log("API key validated.");

                if verdict.persist {
                    match self.gate.persist(&credential) {
                        Ok(()) => self.stored_present = true,
                        Err(e) => {
                            warn!("Failed to save API key: {:#}", e);
                            self.model
                                .append_log(format!("Failed to save API key: {:#}", e));
                        }
                    }
                }

                self.start_services(credential).await;
            }
            Err(err) if err.needs_correction() => {
                info!("API key rejected: {}", err);
                self.validation = Some(ValidationResult::Invalid);
                self.model.append_log("API key was rejected.");
            }
            Err(err) => {
                warn!("API key check failed: {}", err);
                self.validation = Some(ValidationResult::NetworkError);
                self.model.append_log(err.to_string());
            }
        }
    }

    /// Start (or restart with a new key) everything that needs a valid key.
    /// The old relay connector is fully stopped first so its final state
    /// write cannot land after the new connector's.
    async fn start_services(&mut self, credential: ValidatedCredential) {
        if let Some(previous) = self.cloud.take() {
            previous.stop().await;
        }

        info!("Starting relay connector for {}", self.config.relay.url);
        let connector = CloudConnector::new(
            &self.config.relay,
            credential.clone(),
            self.model.clone(),
            self.relay_dialer.clone(),
        );
        self.cloud = Some(connector.start());

        if self.config.api.forward_obs_events {
            self.forwarder = Some(EventForwarder::new(&self.config.api, credential));
        }

        if !self.services_started {
            self.services_started = true;
            if self.settings.connect_on_start {
                let settings = self.settings.clone();
                self.spawn_tool_connect(settings);
            }
        }
    }

    async fn connect_tool(&mut self, settings: LocalToolSettings) {
        self.cancel_tool_connect().await;
        self.spawn_tool_connect(settings);
    }

    fn spawn_tool_connect(&mut self, settings: LocalToolSettings) {
        let tool = self.tool.clone();
        self.tool_connect = Some(tokio::spawn(async move { tool.connect(&settings).await }));
    }

    /// Abort an attempt in progress and wait until its state reset has run
    async fn cancel_tool_connect(&mut self) {
        if let Some(handle) = self.tool_connect.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    fn forward(&self, event: ToolEvent) {
        match &self.forwarder {
            Some(forwarder) => {
                let forwarder = forwarder.clone();
                tokio::spawn(async move {
                    if let Err(e) = forwarder.forward(&event).await {
                        warn!("Error forwarding OBS event {}: {:#}", event.name, e);
                    }
                });
            }
            None => debug!("Not forwarding OBS event {}", event.name),
        }
    }

    fn render(&mut self) {
        let session = self.model.snapshot();
        let screen = view::project(&ViewInputs {
            credential_present: self.stored_present || self.pending_key.is_some(),
            validation: self.validation,
            session: &session,
            tool_form_requested: self.tool_form,
            settings: &self.settings,
        });

        if self.last_screen.as_ref() != Some(&screen) {
            self.shell.present(&screen);
            self.last_screen = Some(screen);
        }
    }

    async fn shutdown(&mut self) {
        if let Some(handle) = self.validating.take() {
            handle.abort();
        }
        self.cancel_tool_connect().await;
        self.tool.disconnect();
        if let Some(cloud) = self.cloud.take() {
            cloud.stop().await;
        }
        info!("Coordinator stopped");
    }
}

async fn join_pending<T>(handle: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Keeps API keys and OBS passwords out of debug logs
fn redact(cmd: &AppCommand) -> AppCommand {
    let mask = |settings: &LocalToolSettings| LocalToolSettings {
        password: if settings.password.is_empty() {
            String::new()
        } else {
            "***".to_string()
        },
        ..settings.clone()
    };
    match cmd {
        AppCommand::SubmitCredential(_) => AppCommand::SubmitCredential("***".into()),
        AppCommand::ConnectTool(settings) => AppCommand::ConnectTool(mask(settings)),
        AppCommand::SaveToolSettings(settings) => AppCommand::SaveToolSettings(mask(settings)),
        other => other.clone(),
    }
}

/// Command and shell channels for the coordinator
pub fn create_app_channel() -> (mpsc::Sender<AppCommand>, mpsc::Receiver<AppCommand>) {
    mpsc::channel(32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileSettingsStore;
    use crate::credential::MemorySecretStore;
    use crate::relay::{OutboundEvent, RelayFrame, RelaySession};
    use crate::obs::ToolSession;
    use crate::session::{Channel, ConnectionState};
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Clone, Default)]
    struct RecordingShell {
        screens: Arc<Mutex<Vec<Screen>>>,
        mirrored: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl Shell for RecordingShell {
        fn present(&mut self, screen: &Screen) {
            self.screens.lock().unwrap().push(screen.clone());
        }

        fn mirror_logs(&mut self, lines: Vec<String>) {
            self.mirrored.lock().unwrap().push(lines);
        }
    }

    /// Relay that never answers, or one that accepts and registers at once
    #[derive(Default)]
    struct FakeRelay {
        accept: bool,
        dials: AtomicUsize,
        open: Mutex<Vec<(mpsc::UnboundedReceiver<OutboundEvent>, mpsc::UnboundedSender<RelayFrame>)>>,
    }

    impl FakeRelay {
        fn accepting() -> Self {
            Self {
                accept: true,
                ..Default::default()
            }
        }
    }

    impl RelayDialer for FakeRelay {
        fn dial(&self, _url: &str) -> BoxFuture<'static, Result<RelaySession, ConnectorError>> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            if !self.accept {
                return Box::pin(futures::future::pending::<Result<RelaySession, ConnectorError>>());
            }

            let (outbound, sent) = mpsc::unbounded_channel();
            let (frames, inbound) = mpsc::unbounded_channel();
            frames
                .send(RelayFrame::Event {
                    name: "SUCCESS".into(),
                    data: serde_json::json!({}),
                })
                .unwrap();
            self.open.lock().unwrap().push((sent, frames));
            Box::pin(async move { Ok(RelaySession { outbound, inbound }) })
        }
    }

    struct RefusingTool;

    impl ToolDialer for RefusingTool {
        fn dial(
            &self,
            _settings: &LocalToolSettings,
        ) -> BoxFuture<'static, Result<ToolSession, ConnectorError>> {
            Box::pin(async {
                Err::<ToolSession, _>(ConnectorError::LocalToolConnectError(
                    "Connection refused".into(),
                ))
            })
        }
    }

    struct HangingTool;

    impl ToolDialer for HangingTool {
        fn dial(
            &self,
            _settings: &LocalToolSettings,
        ) -> BoxFuture<'static, Result<ToolSession, ConnectorError>> {
            Box::pin(futures::future::pending::<Result<ToolSession, ConnectorError>>())
        }
    }

    struct Harness {
        cmd_tx: mpsc::Sender<AppCommand>,
        shell: RecordingShell,
        model: SessionStatusModel,
        relay: Arc<FakeRelay>,
        secrets: Arc<MemorySecretStore>,
        task: JoinHandle<Result<()>>,
        _dir: TempDir,
    }

    impl Harness {
        async fn start(
            server: &MockServer,
            secrets: MemorySecretStore,
            tool: Arc<dyn ToolDialer>,
            connect_on_start: bool,
        ) -> Self {
            Self::start_with_relay(server, secrets, tool, connect_on_start, FakeRelay::default())
                .await
        }

        async fn start_with_relay(
            server: &MockServer,
            secrets: MemorySecretStore,
            tool: Arc<dyn ToolDialer>,
            connect_on_start: bool,
            relay: FakeRelay,
        ) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config.toml");
            let mut config = Config::load_from(&path).unwrap();
            config.obs.connect_on_start = connect_on_start;
            config.api.verify_url = format!("{}/checkkey", server.uri());
            config.api.timeout_ms = 500;
            config.api.forward_obs_events = false;
            config.save().unwrap();

            let secrets = Arc::new(secrets);
            let relay = Arc::new(relay);
            let services = Services {
                secrets: secrets.clone(),
                settings: Arc::new(FileSettingsStore::new(&path)),
                relay: relay.clone(),
                tool,
            };

            let shell = RecordingShell::default();
            let (cmd_tx, cmd_rx) = create_app_channel();
            let app = App::new(config, services, shell.clone(), cmd_rx);
            let model = app.model();
            let task = tokio::spawn(app.run());

            Self {
                cmd_tx,
                shell,
                model,
                relay,
                secrets,
                task,
                _dir: dir,
            }
        }

        async fn wait_for_screen(&self, pred: impl Fn(&Screen) -> bool) {
            let screens = self.shell.screens.clone();
            tokio::time::timeout(Duration::from_secs(3), async {
                loop {
                    if screens.lock().unwrap().iter().any(&pred) {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("screen never shown");
        }

        async fn wait_for_tool_state(&self, want: ConnectionState) {
            tokio::time::timeout(Duration::from_secs(3), async {
                while self.model.channel_state(Channel::LocalTool) != want {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("tool state never reached");
        }

        async fn wait_for_cloud_state(&self, want: ConnectionState) {
            tokio::time::timeout(Duration::from_secs(3), async {
                while self.model.channel_state(Channel::Cloud) != want {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("cloud state never reached");
        }

        async fn shutdown(self) {
            self.cmd_tx.send(AppCommand::Shutdown).await.unwrap();
            tokio::time::timeout(Duration::from_secs(3), self.task)
                .await
                .unwrap()
                .unwrap()
                .unwrap();
        }
    }

    async fn verification(status: &'static str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/checkkey"))
            .and(query_param("api_key", "good"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": status })),
            )
            .mount(&server)
            .await;
        server
    }

    fn stored(key: &str) -> MemorySecretStore {
        MemorySecretStore::with_secret("BotOfTheSpecter", "apiAuthKey", key)
    }

    #[tokio::test]
    async fn test_no_credential_asks_for_key() {
        let server = verification("Valid API Key").await;
        let harness =
            Harness::start(&server, MemorySecretStore::default(), Arc::new(RefusingTool), true).await;

        harness
            .wait_for_screen(|s| *s == Screen::CredentialEntry { notice: None })
            .await;
        assert_eq!(harness.relay.dials.load(Ordering::SeqCst), 0);
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_stored_valid_key_starts_relay_and_tool() {
        let server = verification("Valid API Key").await;
        let harness = Harness::start(&server, stored("good"), Arc::new(RefusingTool), true).await;

        // OBS is unreachable, so the form opens with the reason
        harness
            .wait_for_screen(|s| {
                matches!(
                    s,
                    Screen::MainStatusWithToolForm { error: Some(reason), .. }
                        if reason == "Connection refused"
                )
            })
            .await;
        assert!(harness.relay.dials.load(Ordering::SeqCst) >= 1);
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_submitted_key_is_persisted_when_valid() {
        let server = verification("Valid API Key").await;
        let harness = Harness::start(
            &server,
            MemorySecretStore::default(),
            Arc::new(RefusingTool),
            false,
        )
        .await;

        harness
            .cmd_tx
            .send(AppCommand::SubmitCredential(" good ".into()))
            .await
            .unwrap();
        harness
            .wait_for_screen(|s| matches!(s, Screen::MainStatus(_)))
            .await;

        assert_eq!(
            harness
                .secrets
                .get("BotOfTheSpecter", "apiAuthKey")
                .unwrap()
                .as_deref(),
            Some("good")
        );
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejected_key_is_not_persisted() {
        let server = verification("Valid API Key").await;
        Mock::given(method("GET"))
            .and(path("/checkkey"))
            .and(query_param("api_key", "bad"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "status": "Invalid API Key" })),
            )
            .mount(&server)
            .await;
        let harness = Harness::start(
            &server,
            MemorySecretStore::default(),
            Arc::new(RefusingTool),
            false,
        )
        .await;

        harness
            .cmd_tx
            .send(AppCommand::SubmitCredential("bad".into()))
            .await
            .unwrap();
        harness
            .wait_for_screen(|s| {
                *s == Screen::CredentialEntry {
                    notice: Some(view::CredentialNotice::Rejected),
                }
            })
            .await;

        assert_eq!(
            harness.secrets.get("BotOfTheSpecter", "apiAuthKey").unwrap(),
            None
        );
        assert_eq!(harness.relay.dials.load(Ordering::SeqCst), 0);
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_after_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/checkkey"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/checkkey"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "status": "Valid API Key" })),
            )
            .mount(&server)
            .await;
        let harness = Harness::start(&server, stored("good"), Arc::new(RefusingTool), false).await;

        harness
            .wait_for_screen(|s| {
                *s == Screen::CredentialEntry {
                    notice: Some(view::CredentialNotice::NetworkError),
                }
            })
            .await;
        assert_eq!(harness.relay.dials.load(Ordering::SeqCst), 0);

        harness
            .cmd_tx
            .send(AppCommand::RetryValidation)
            .await
            .unwrap();
        harness
            .wait_for_screen(|s| matches!(s, Screen::MainStatus(_)))
            .await;
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_new_key_replaces_registered_relay() {
        let server = verification("Valid API Key").await;
        Mock::given(method("GET"))
            .and(path("/checkkey"))
            .and(query_param("api_key", "better"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "status": "Valid API Key" })),
            )
            .mount(&server)
            .await;
        let harness = Harness::start_with_relay(
            &server,
            stored("good"),
            Arc::new(RefusingTool),
            false,
            FakeRelay::accepting(),
        )
        .await;
        harness.wait_for_cloud_state(ConnectionState::Connected).await;

        harness
            .cmd_tx
            .send(AppCommand::SubmitCredential("better".into()))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(3), async {
            while harness.relay.dials.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        harness.wait_for_cloud_state(ConnectionState::Connected).await;

        // The replaced connector must not write over the new one
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            harness.model.channel_state(Channel::Cloud),
            ConnectionState::Connected
        );
        assert_eq!(harness.relay.dials.load(Ordering::SeqCst), 2);
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_tool_connect() {
        let server = verification("Valid API Key").await;
        let harness = Harness::start(&server, stored("good"), Arc::new(HangingTool), false).await;
        harness
            .wait_for_screen(|s| matches!(s, Screen::MainStatus(_)))
            .await;

        harness
            .cmd_tx
            .send(AppCommand::ConnectTool(LocalToolSettings::default()))
            .await
            .unwrap();
        harness.wait_for_tool_state(ConnectionState::Connecting).await;

        harness
            .cmd_tx
            .send(AppCommand::CancelToolConnect)
            .await
            .unwrap();
        harness
            .wait_for_tool_state(ConnectionState::Disconnected)
            .await;
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_logs_mirrors_model() {
        let server = verification("Valid API Key").await;
        let harness = Harness::start(&server, stored("good"), Arc::new(RefusingTool), false).await;
        harness
            .wait_for_screen(|s| matches!(s, Screen::MainStatus(_)))
            .await;

        harness.cmd_tx.send(AppCommand::OpenLogs).await.unwrap();
        let mirrored = harness.shell.mirrored.clone();
        tokio::time::timeout(Duration::from_secs(3), async {
            while mirrored.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let lines = mirrored.lock().unwrap()[0].clone();
        assert!(lines.iter().any(|l| l.ends_with("API key validated.")));
        harness.shutdown().await;
    }

    #[test]
    fn test_redact_hides_secrets() {
        let settings = LocalToolSettings {
            password: "hunter2".into(),
            ..Default::default()
        };
        let shown = format!(
            "{:?} {:?}",
            redact(&AppCommand::SubmitCredential("key".into())),
            redact(&AppCommand::ConnectTool(settings))
        );
        assert!(!shown.contains("key\""));
        assert!(!shown.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_save_tool_settings() {
        let server = verification("Valid API Key").await;
        let harness = Harness::start(&server, stored("good"), Arc::new(RefusingTool), false).await;

        let settings = LocalToolSettings {
            address: "ws://192.168.1.20".into(),
            port: 4456,
            ..Default::default()
        };
        harness
            .cmd_tx
            .send(AppCommand::SaveToolSettings(settings.clone()))
            .await
            .unwrap();
        harness.cmd_tx.send(AppCommand::ShowToolForm).await.unwrap();
        harness
            .wait_for_screen(|s| {
                matches!(s, Screen::MainStatusWithToolForm { settings: shown, .. } if *shown == settings)
            })
            .await;

        let path = harness._dir.path().join("config.toml");
        assert_eq!(FileSettingsStore::new(&path).load().unwrap(), settings);
        harness.shutdown().await;
    }
}
