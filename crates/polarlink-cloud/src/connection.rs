// SPDX-License-Identifier: MIT
//
// Connection manager. Owns the reconnect loop, the socket read/write split,
// and the periodic operating cycle that runs while authenticated. Outbound
// traffic funnels through one unbounded channel into a writer task, so any
// component can send without touching the socket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use polarlink_core::config::BridgeConfig;
use polarlink_core::error::Result;
use polarlink_core::types::UploadKind;
use polarlink_identity::identity::DeviceIdentity;
use polarlink_identity::keys::DeviceKey;
use polarlink_printhost::client::MoonrakerClient;

use polarlink_camera::settings::WebcamSettingsSource;

use crate::backoff::Backoff;
use crate::commands::CommandDispatcher;
use crate::handshake::{self, ChallengeAnswer, HelloOutcome, RegistrationOutcome};
use crate::jobs;
use crate::protocol::{self, ClientMessage, GetUrlRequest, ServerMessage};
use crate::session::{ConnectionState, SharedState, StatusFile};
use crate::status;
use crate::upload::{UploadPipeline, UploadSlot};
use crate::version::{self, VersionReporter};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sender half of the outbound message funnel.
pub type Outbound = mpsc::UnboundedSender<ClientMessage>;

/// Whether the session keeps running after handling a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionControl {
    Continue,
    /// Deliberate close: post-registration reconnect or a delete command.
    Close,
}

/// The cloud connector service. `run` owns the process lifetime: it retries
/// the connection forever until the shutdown flag flips.
pub struct CloudService {
    config: BridgeConfig,
    config_path: PathBuf,
    identity: DeviceIdentity,
    key: DeviceKey,
    shared: SharedState,
    client: Arc<MoonrakerClient>,
    uploads: Arc<UploadPipeline>,
    version: Arc<VersionReporter>,
    commands: CommandDispatcher,
    settings: WebcamSettingsSource,
    status_file: StatusFile,
    cycle: Option<tokio::task::JoinHandle<()>>,
    shutdown: watch::Receiver<bool>,
}

impl CloudService {
    pub fn new(
        config: BridgeConfig,
        config_path: PathBuf,
        identity: DeviceIdentity,
        key: DeviceKey,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let shared = SharedState::new(config.serial_number.clone());
        let client = Arc::new(MoonrakerClient::new(&config.moonraker_url));
        let uploads = Arc::new(UploadPipeline::new(&config.moonraker_url));
        let settings = WebcamSettingsSource::new(&config.moonraker_url);
        let status_file = StatusFile::new(PathBuf::from(&config.paths.status_file));
        Self {
            config,
            config_path,
            identity,
            key,
            shared,
            client,
            uploads,
            version: Arc::new(VersionReporter::new()),
            commands: CommandDispatcher::new(),
            settings,
            status_file,
            cycle: None,
            shutdown,
        }
    }

    pub fn shared(&self) -> SharedState {
        self.shared.clone()
    }

    /// Connect-and-retry loop. Returns only on shutdown.
    pub async fn run(mut self) -> Result<()> {
        let url = websocket_url(&self.config.server_url);
        let mut backoff = Backoff::new();
        let mut shutdown = self.shutdown.clone();

        info!(%url, "cloud connector starting");
        loop {
            if *shutdown.borrow() {
                break;
            }

            self.shared.set_connection_state(ConnectionState::Connecting);
            self.status_file.update(&self.config, &self.shared);
            match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
                Ok(Ok((stream, _))) => {
                    info!("connected to cloud");
                    self.shared.set_connection_state(ConnectionState::Connected);
                    self.status_file.update(&self.config, &self.shared);
                    backoff.reset();
                    self.drive_session(stream).await;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "connection failed");
                    self.shared.record_error(format!("connection failed: {e}"));
                }
                Err(_) => {
                    warn!("connection attempt timed out");
                    self.shared.record_error("connection attempt timed out");
                }
            }

            self.shared
                .set_connection_state(ConnectionState::Disconnected);
            self.status_file.update(&self.config, &self.shared);

            if *shutdown.borrow() {
                break;
            }
            let delay = backoff.next_delay();
            debug!(delay_secs = delay.as_secs(), "reconnecting after delay");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("cloud connector stopped");
        Ok(())
    }

    /// Pump one established connection until it drops, shutdown fires, or a
    /// handler asks for a deliberate close.
    async fn drive_session(
        &mut self,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) {
        let (mut write, mut read) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<ClientMessage>();
        let mut shutdown = self.shutdown.clone();

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message.to_frame() {
                    Ok(frame) => {
                        if let Err(e) = write.send(Message::Text(frame)).await {
                            debug!(error = %e, "socket write failed");
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping unencodable message"),
                }
            }
            let _ = write.close().await;
        });

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if self.handle_frame(&text, &tx).await == SessionControl::Close {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("cloud closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "socket read failed");
                        break;
                    }
                },
            }
        }

        // The cycle belongs to this session's outbound channel; a new
        // session gets a fresh one.
        self.stop_cycle().await;
        drop(tx);
        let _ = writer.await;
    }

    async fn handle_frame(&mut self, text: &str, outbound: &Outbound) -> SessionControl {
        let message = match protocol::parse_server_message(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return SessionControl::Continue;
            }
        };

        match message {
            ServerMessage::Welcome(payload) => self.on_welcome(payload.challenge, outbound).await,
            ServerMessage::RegisterResponse(payload) => {
                match handshake::evaluate_registration(&payload) {
                    RegistrationOutcome::Registered(serial) => {
                        info!(%serial, "registered with the cloud");
                        self.config.serial_number = Some(serial.clone());
                        if let Err(e) = self.config.save(&self.config_path) {
                            error!(error = %e, "failed to persist the serial number");
                        }
                        self.shared.set_serial_number(serial);
                        self.shared.clear_error();
                        self.status_file.update(&self.config, &self.shared);
                        // Registration and authentication never share a
                        // connection; reconnect and say hello.
                        info!("disconnecting to authenticate on a fresh connection");
                        SessionControl::Close
                    }
                    RegistrationOutcome::Failed(reason) => {
                        error!(%reason, "registration failed");
                        self.shared.record_error(reason);
                        self.status_file.update(&self.config, &self.shared);
                        SessionControl::Continue
                    }
                }
            }
            ServerMessage::HelloResponse(payload) => {
                match handshake::evaluate_hello(&payload) {
                    HelloOutcome::Authenticated => {
                        info!("authenticated with the cloud");
                        self.shared
                            .set_connection_state(ConnectionState::Authenticated);
                        self.shared.clear_error();
                        self.status_file.update(&self.config, &self.shared);
                        self.start_cycle(outbound.clone()).await;
                        self.request_idle_url(outbound);
                    }
                    HelloOutcome::Deleted => {
                        error!("this printer was deleted from the cloud account");
                        self.shared
                            .record_error("printer has been deleted from the cloud");
                        self.status_file.update(&self.config, &self.shared);
                    }
                    HelloOutcome::Failed(reason) => {
                        error!(%reason, "authentication failed");
                        self.shared
                            .record_error(format!("authentication failed: {reason}"));
                        self.status_file.update(&self.config, &self.shared);
                    }
                }
                SessionControl::Continue
            }
            ServerMessage::GetUrlResponse(response) => {
                match UploadSlot::from_response(response) {
                    Some((kind, slot)) => {
                        debug!(channel = %kind, "upload URL received");
                        self.shared.put_slot(kind, slot);
                    }
                    None => warn!("invalid or failed upload URL response"),
                }
                SessionControl::Continue
            }
            ServerMessage::Print(request) => {
                self.commands
                    .print(&self.client, &self.shared, &self.config, request)
                    .await;
                SessionControl::Continue
            }
            ServerMessage::Cancel => {
                self.commands
                    .cancel(&self.client, &self.shared, outbound)
                    .await;
                SessionControl::Continue
            }
            ServerMessage::Pause => {
                self.commands.pause(&self.client).await;
                SessionControl::Continue
            }
            ServerMessage::Resume => {
                self.commands.resume(&self.client).await;
                SessionControl::Continue
            }
            ServerMessage::Temperature(request) => {
                self.commands.temperature(&self.client, request).await;
                SessionControl::Continue
            }
            ServerMessage::Update => {
                self.commands.update(&self.shared, &self.config);
                SessionControl::Continue
            }
            ServerMessage::Delete => {
                self.commands
                    .delete(
                        &self.client,
                        &self.shared,
                        &mut self.config,
                        &self.config_path,
                        outbound,
                    )
                    .await;
                self.status_file.update(&self.config, &self.shared);
                SessionControl::Close
            }
        }
    }

    async fn on_welcome(&mut self, challenge: String, outbound: &Outbound) -> SessionControl {
        debug!("challenge received");
        // A fresh challenge invalidates an existing authentication; the
        // cycle stops on its own once the state leaves Authenticated.
        self.shared
            .set_connection_state(ConnectionState::ChallengeReceived);
        self.shared.set_challenge(challenge.clone());
        self.status_file.update(&self.config, &self.shared);

        let orientation = self.settings.orientation(&self.config.webcam).await;
        let answer = match handshake::answer_challenge(
            &self.config,
            &self.identity,
            &self.key,
            self.shared.serial_number().as_deref(),
            &challenge,
            version::RUNNING_VERSION,
            &orientation,
        ) {
            Ok(answer) => answer,
            Err(e) => {
                error!(error = %e, "could not answer the challenge");
                self.shared.record_error(e.to_string());
                self.status_file.update(&self.config, &self.shared);
                return SessionControl::Continue;
            }
        };

        if matches!(answer, ChallengeAnswer::NotConfigured) {
            error!("no serial number and no credentials configured, cannot register");
            self.shared
                .record_error("set username and pin in the config file to register");
            self.status_file.update(&self.config, &self.shared);
            return SessionControl::Continue;
        }

        if let Some(message) = answer.into_message() {
            if outbound.send(message).is_err() {
                return SessionControl::Close;
            }
        }
        SessionControl::Continue
    }

    fn request_idle_url(&self, outbound: &Outbound) {
        if let Some(serial_number) = self.shared.serial_number() {
            let _ = outbound.send(ClientMessage::GetUrl(GetUrlRequest {
                serial_number,
                method: "post".into(),
                kind: UploadKind::Idle,
                job_id: None,
            }));
        }
    }

    /// Start the periodic operating cycle for the current session. Any
    /// cycle still serving an earlier session is replaced, so a fast
    /// reconnect never leaves an authenticated session without one. The
    /// task also exits on its own within one interval of losing
    /// authentication or shutdown.
    async fn start_cycle(&mut self, outbound: Outbound) {
        self.stop_cycle().await;

        let config = self.config.clone();
        let shared = self.shared.clone();
        let client = Arc::clone(&self.client);
        let uploads = Arc::clone(&self.uploads);
        let version = Arc::clone(&self.version);
        let status_file = self.status_file.clone();
        let shutdown = self.shutdown.clone();

        self.cycle = Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(config.status_interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            debug!("periodic cycle started");

            loop {
                ticker.tick().await;
                if *shutdown.borrow() || !shared.connection_state().is_authenticated() {
                    break;
                }

                let snapshot = status::collect_snapshot(&client, &shared).await;
                if status::should_transmit(&snapshot, shared.last_snapshot().as_ref()) {
                    if outbound
                        .send(ClientMessage::Status(snapshot.clone()))
                        .is_err()
                    {
                        break;
                    }
                    shared.note_snapshot(snapshot.clone());
                }

                uploads
                    .tick(&config, &shared, snapshot.status, &outbound)
                    .await;

                if let Some(notice) = jobs::check_completion(&client, &shared, &snapshot).await {
                    if outbound.send(ClientMessage::Job(notice)).is_err() {
                        break;
                    }
                }

                version.tick(&config, &shared, &outbound).await;
                status_file.update(&config, &shared);
            }

            debug!("periodic cycle stopped");
        }));
    }

    async fn stop_cycle(&mut self) {
        if let Some(handle) = self.cycle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

/// Map the configured HTTP endpoint onto its WebSocket equivalent.
fn websocket_url(server_url: &str) -> String {
    if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        server_url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service(dir: &std::path::Path) -> CloudService {
        let mut config = BridgeConfig::default();
        config.serial_number = Some("PL-TEST-1".into());
        config.status_interval_secs = 1;
        config.webcam.enabled = false;
        config.update_check_url = None;
        config.paths.status_file = dir.join("status.json").display().to_string();

        let identity = DeviceIdentity {
            manufacturer: "kl".into(),
            machine_type: "Cartesian".into(),
            printer_type: "Cartesian".into(),
            mac: "AA:BB:CC:11:22:33".into(),
            local_ip: "192.168.1.50".into(),
        };
        // Key generation is slow in debug builds; generate once and reload
        // the PEM everywhere else.
        static PEM: std::sync::OnceLock<String> = std::sync::OnceLock::new();
        let pem = PEM.get_or_init(|| {
            let tmp = tempfile::tempdir().unwrap();
            let path = tmp.path().join("key.pem");
            DeviceKey::load_or_generate(&path).unwrap();
            std::fs::read_to_string(&path).unwrap()
        });
        std::fs::write(dir.join("key.pem"), pem).unwrap();
        let key = DeviceKey::load_or_generate(dir.join("key.pem")).unwrap();
        let (_stop, shutdown) = watch::channel(false);
        CloudService::new(config, dir.join("polarlink.toml"), identity, key, shutdown)
    }

    #[tokio::test]
    async fn reauthentication_restarts_the_periodic_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = test_service(dir.path());
        let shared = service.shared();

        shared.set_connection_state(ConnectionState::Connected);
        shared.set_connection_state(ConnectionState::Authenticated);
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        service.start_cycle(tx1).await;
        let first = tokio::time::timeout(Duration::from_secs(10), rx1.recv()).await;
        assert!(matches!(first, Ok(Some(ClientMessage::Status(_)))));

        // Drop and re-establish faster than one status interval; the new
        // session must get a live cycle of its own.
        shared.set_connection_state(ConnectionState::Disconnected);
        shared.set_connection_state(ConnectionState::Connected);
        shared.set_connection_state(ConnectionState::Authenticated);
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        service.start_cycle(tx2).await;
        drop(rx1);
        let second = tokio::time::timeout(Duration::from_secs(10), rx2.recv()).await;
        assert!(matches!(second, Ok(Some(ClientMessage::Status(_)))));

        service.stop_cycle().await;
    }

    #[tokio::test]
    async fn a_challenge_refreshes_the_status_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = test_service(dir.path());
        service.shared().set_connection_state(ConnectionState::Connected);

        let (tx, _rx) = mpsc::unbounded_channel();
        service.on_welcome("nonce-1".into(), &tx).await;

        let raw = std::fs::read_to_string(dir.path().join("status.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["connected"], serde_json::Value::Bool(true));
        assert_eq!(value["challenge"], serde_json::Value::Bool(true));
    }

    #[test]
    fn server_url_schemes_map_to_websocket_schemes() {
        assert_eq!(
            websocket_url("https://printer4.polar3d.com"),
            "wss://printer4.polar3d.com"
        );
        assert_eq!(websocket_url("http://localhost:9000"), "ws://localhost:9000");
        assert_eq!(
            websocket_url("wss://printer4.polar3d.com"),
            "wss://printer4.polar3d.com"
        );
    }
}
