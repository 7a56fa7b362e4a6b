// SPDX-License-Identifier: MIT
//
// Session and cross-task state. Everything the connection loop, the status
// cycle and the command handlers agree on lives behind one mutex. Guards are
// held for plain field access only, never across an await point.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::warn;

use polarlink_core::config::BridgeConfig;
use polarlink_core::error::Result;
use polarlink_core::types::{PrinterState, UploadKind};

use crate::protocol::PrinterStatusSnapshot;
use crate::upload::UploadSlot;

/// Where the link to the cloud currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Socket is open, no challenge yet.
    Connected,
    /// Welcome received; register/hello in flight. A re-challenge drops an
    /// authenticated session back here.
    ChallengeReceived,
    /// hello accepted. Telemetry and commands flow in this state only.
    Authenticated,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            Self::Connected | Self::ChallengeReceived | Self::Authenticated
        )
    }

    pub fn is_authenticated(self) -> bool {
        self == Self::Authenticated
    }
}

/// A print started from the cloud. Engine-local prints never produce one of
/// these, so job completion notices go out only for cloud work.
#[derive(Debug, Clone)]
pub struct CloudJob {
    pub job_id: String,
    pub stl_file: Option<String>,
    pub config_file: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Download and spool-up still in progress. Reported as Preparing even
    /// while the engine already claims to be printing.
    pub preparing: bool,
    /// A cancel was issued for this job. The terminal notice says
    /// "canceled" regardless of how the engine winds down.
    pub cancelling: bool,
}

impl CloudJob {
    pub fn new(job_id: String, stl_file: Option<String>, config_file: Option<String>) -> Self {
        Self {
            job_id,
            stl_file,
            config_file,
            started_at: Utc::now(),
            preparing: true,
            cancelling: false,
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    state: Option<ConnectionState>,
    challenge: Option<String>,
    serial_number: Option<String>,
    job: Option<CloudJob>,
    slots: HashMap<UploadKind, UploadSlot>,
    last_upload: HashMap<UploadKind, Instant>,
    status_override: Option<PrinterState>,
    last_snapshot: Option<PrinterStatusSnapshot>,
    latest_version: Option<String>,
    last_version_check: Option<Instant>,
    last_version_report: Option<Instant>,
    last_error: Option<String>,
    last_error_time: Option<DateTime<Utc>>,
}

/// Handle shared by every task of the service.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Mutex<Session>>,
}

impl SharedState {
    pub fn new(serial_number: Option<String>) -> Self {
        let session = Session {
            serial_number,
            ..Session::default()
        };
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    fn guard(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().expect("session lock poisoned")
    }

    // -- connection -------------------------------------------------------

    pub fn connection_state(&self) -> ConnectionState {
        self.guard().state.unwrap_or(ConnectionState::Disconnected)
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        let mut session = self.guard();
        session.state = Some(state);
        match state {
            ConnectionState::Disconnected => {
                // Challenges and presigned URLs are per-session.
                session.challenge = None;
                session.slots.clear();
                session.last_snapshot = None;
            }
            ConnectionState::Connected => {
                // A fresh connection has no challenge yet; a hello may only
                // ever sign the one issued on this connection.
                session.challenge = None;
            }
            _ => {}
        }
    }

    pub fn set_challenge(&self, challenge: String) {
        self.guard().challenge = Some(challenge);
    }

    pub fn challenge(&self) -> Option<String> {
        self.guard().challenge.clone()
    }

    // -- identity ---------------------------------------------------------

    pub fn serial_number(&self) -> Option<String> {
        self.guard().serial_number.clone()
    }

    pub fn set_serial_number(&self, serial: String) {
        self.guard().serial_number = Some(serial);
    }

    /// Forget the cloud registration. Used when the printer is deleted from
    /// the account.
    pub fn clear_registration(&self) {
        let mut session = self.guard();
        session.serial_number = None;
        session.job = None;
        session.slots.clear();
        session.last_snapshot = None;
    }

    // -- cloud job --------------------------------------------------------

    pub fn begin_job(&self, job: CloudJob) {
        self.guard().job = Some(job);
    }

    pub fn job(&self) -> Option<CloudJob> {
        self.guard().job.clone()
    }

    pub fn take_job(&self) -> Option<CloudJob> {
        self.guard().job.take()
    }

    pub fn set_job_preparing(&self, preparing: bool) {
        if let Some(job) = self.guard().job.as_mut() {
            job.preparing = preparing;
        }
    }

    /// Flip the cancelling flag on the tracked job, if any. Returns whether
    /// a job was there to flip.
    pub fn set_job_cancelling(&self, cancelling: bool) -> bool {
        match self.guard().job.as_mut() {
            Some(job) => {
                job.cancelling = cancelling;
                true
            }
            None => false,
        }
    }

    // -- upload slots -----------------------------------------------------

    pub fn put_slot(&self, kind: UploadKind, slot: UploadSlot) {
        self.guard().slots.insert(kind, slot);
    }

    pub fn slot(&self, kind: UploadKind) -> Option<UploadSlot> {
        self.guard().slots.get(&kind).cloned()
    }

    pub fn drop_slot(&self, kind: UploadKind) {
        self.guard().slots.remove(&kind);
    }

    pub fn note_upload(&self, kind: UploadKind, at: Instant) {
        self.guard().last_upload.insert(kind, at);
    }

    pub fn last_upload(&self, kind: UploadKind) -> Option<Instant> {
        self.guard().last_upload.get(&kind).copied()
    }

    // -- status reporting -------------------------------------------------

    pub fn set_status_override(&self, state: Option<PrinterState>) {
        self.guard().status_override = state;
    }

    pub fn status_override(&self) -> Option<PrinterState> {
        self.guard().status_override
    }

    pub fn last_snapshot(&self) -> Option<PrinterStatusSnapshot> {
        self.guard().last_snapshot.clone()
    }

    pub fn note_snapshot(&self, snapshot: PrinterStatusSnapshot) {
        self.guard().last_snapshot = Some(snapshot);
    }

    // -- version tracking -------------------------------------------------

    pub fn latest_version(&self) -> Option<String> {
        self.guard().latest_version.clone()
    }

    pub fn set_latest_version(&self, version: Option<String>) {
        self.guard().latest_version = version;
    }

    pub fn last_version_check(&self) -> Option<Instant> {
        self.guard().last_version_check
    }

    pub fn note_version_check(&self, at: Instant) {
        self.guard().last_version_check = Some(at);
    }

    pub fn last_version_report(&self) -> Option<Instant> {
        self.guard().last_version_report
    }

    pub fn note_version_report(&self, at: Instant) {
        self.guard().last_version_report = Some(at);
    }

    // -- diagnostics ------------------------------------------------------

    pub fn record_error(&self, message: impl Into<String>) {
        let mut session = self.guard();
        session.last_error = Some(message.into());
        session.last_error_time = Some(Utc::now());
    }

    pub fn clear_error(&self) {
        let mut session = self.guard();
        session.last_error = None;
        session.last_error_time = None;
    }
}

/// Mirrors session state into a JSON file for local tooling. Write failures
/// degrade to a warning because the file is informational only.
#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn update(&self, config: &BridgeConfig, shared: &SharedState) {
        if let Err(e) = self.write(config, shared) {
            warn!(path = %self.path.display(), error = %e, "status file write failed");
        }
    }

    fn write(&self, config: &BridgeConfig, shared: &SharedState) -> Result<()> {
        let session = shared.guard();
        let state = session.state.unwrap_or(ConnectionState::Disconnected);
        let body = json!({
            "connected": state.is_connected(),
            "authenticated": state.is_authenticated(),
            "serial_number": session.serial_number,
            "username": config.username,
            "machine_type": config.machine_type,
            "printer_type": config.printer_type,
            "manufacturer": config.manufacturer,
            "last_update": Utc::now().to_rfc3339(),
            "challenge": session.challenge.is_some(),
            "webcam_enabled": config.webcam.enabled,
            "last_error": session.last_error,
            "last_error_time": session.last_error_time.map(|t| t.to_rfc3339()),
        });
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&body)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn disconnect_clears_per_session_state() {
        let shared = SharedState::new(Some("SN1".into()));
        shared.set_connection_state(ConnectionState::Authenticated);
        shared.set_challenge("abc".into());
        shared.put_slot(
            UploadKind::Idle,
            UploadSlot::new(
                "https://uploads.example".into(),
                HashMap::new(),
                300,
                None,
                None,
            ),
        );

        shared.set_connection_state(ConnectionState::Disconnected);

        assert_eq!(shared.challenge(), None);
        assert!(shared.slot(UploadKind::Idle).is_none());
        // Identity and job state survive a reconnect.
        assert_eq!(shared.serial_number().as_deref(), Some("SN1"));
    }

    #[test]
    fn a_fresh_connection_starts_without_a_challenge() {
        let shared = SharedState::new(None);
        shared.set_connection_state(ConnectionState::ChallengeReceived);
        shared.set_challenge("old".into());

        shared.set_connection_state(ConnectionState::Connected);
        assert_eq!(shared.challenge(), None);

        shared.set_challenge("new".into());
        assert_eq!(shared.challenge().as_deref(), Some("new"));
    }

    #[test]
    fn clear_registration_forgets_serial_and_job() {
        let shared = SharedState::new(Some("SN1".into()));
        shared.begin_job(CloudJob::new("J1".into(), None, None));

        shared.clear_registration();

        assert_eq!(shared.serial_number(), None);
        assert!(shared.job().is_none());
    }

    #[test]
    fn a_second_print_replaces_the_tracked_job() {
        let shared = SharedState::new(Some("SN1".into()));
        shared.begin_job(CloudJob::new("J1".into(), None, None));
        shared.begin_job(CloudJob::new("J2".into(), None, None));

        assert_eq!(shared.job().map(|j| j.job_id).as_deref(), Some("J2"));
        assert_eq!(shared.take_job().map(|j| j.job_id).as_deref(), Some("J2"));
        assert!(shared.job().is_none());
    }

    #[test]
    fn set_job_cancelling_reports_whether_a_job_exists() {
        let shared = SharedState::new(None);
        assert!(!shared.set_job_cancelling(true));

        shared.begin_job(CloudJob::new("J1".into(), None, None));
        assert!(shared.set_job_cancelling(true));
        assert!(shared.job().map(|j| j.cancelling).unwrap_or(false));
    }

    #[test]
    fn upload_bookkeeping_is_per_kind() {
        let shared = SharedState::new(None);
        let now = Instant::now();
        shared.note_upload(UploadKind::Idle, now);

        assert_eq!(shared.last_upload(UploadKind::Idle), Some(now));
        assert_eq!(shared.last_upload(UploadKind::Printing), None);

        let later = now + Duration::from_secs(60);
        shared.note_upload(UploadKind::Idle, later);
        assert_eq!(shared.last_upload(UploadKind::Idle), Some(later));
    }

    #[test]
    fn status_file_reflects_session_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let config = BridgeConfig::default();
        let shared = SharedState::new(Some("SN1".into()));
        shared.set_connection_state(ConnectionState::Authenticated);
        shared.record_error("boom");

        StatusFile::new(path.clone()).update(&config, &shared);

        let body: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(body["connected"], true);
        assert_eq!(body["authenticated"], true);
        assert_eq!(body["serial_number"], "SN1");
        assert_eq!(body["last_error"], "boom");
    }
}
