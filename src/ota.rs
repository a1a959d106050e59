//! OTA firmware distribution for the device fleet.
//!
//! One session at a time: broadcast an announcement, serve pull
//! requests with sequential chunks, retransmit on NACK or silence, and
//! account per-device completion. Devices drive the transfer; the
//! leader never pushes unsolicited chunks.

use chrono::{DateTime, Utc};
use common::crc::crc32;
use common::ota::{OtaAnnounce, OtaChunkAck, OtaComplete, OtaRequest, OtaStatus, CHUNK_DATA_MAX};
use common::packet::{DeviceUuid, MessageType, PacketBuilder, PacketHeader};
use common::version::Version;
use log::{debug, error, info, warn};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::radio::RadioTransport;

pub const CHUNK_SIZE: usize = CHUNK_DATA_MAX;
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(30);
pub const CHUNK_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_RETRIES: u32 = 5;

#[derive(Debug, Error)]
pub enum OtaError {
    #[error("an OTA session is already in progress")]
    AlreadyActive,
    #[error("firmware not found: {0}")]
    FileNotFound(PathBuf),
    #[error("firmware image is empty")]
    EmptyFirmware,
    #[error("firmware too large for a 16-bit chunk index")]
    TooLarge,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// OTA state of a single tracked device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOtaState {
    Unknown,
    Announced,
    Requested,
    Receiving,
    Complete,
    Error,
}

impl DeviceOtaState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for DeviceOtaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::Announced => "ANNOUNCED",
            Self::Requested => "REQUESTED",
            Self::Receiving => "RECEIVING",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Tracking record for a device during an OTA session. Created on the
/// first matching request, dropped with the session.
#[derive(Debug, Clone)]
pub struct DeviceOta {
    pub uuid: DeviceUuid,
    pub state: DeviceOtaState,
    pub current_version: Version,
    pub last_chunk_sent: Option<u16>,
    pub last_chunk_acked: Option<u16>,
    pub retry_count: u32,
    pub last_activity: Instant,
    pub error_message: String,
}

impl DeviceOta {
    fn new(uuid: DeviceUuid, now: Instant) -> Self {
        Self {
            uuid,
            state: DeviceOtaState::Unknown,
            current_version: Version::default(),
            last_chunk_sent: None,
            last_chunk_acked: None,
            retry_count: 0,
            last_activity: now,
            error_message: String::new(),
        }
    }

    /// Index of the next chunk this device is waiting for.
    fn next_chunk(&self) -> u16 {
        self.last_chunk_acked.map(|i| i + 1).unwrap_or(0)
    }
}

/// An active or finished rollout. The firmware buffer is owned by the
/// session and never mutated; chunking takes read-only slices.
pub struct OtaSession {
    pub announce_id: u32,
    pub target_device_type: u8,
    pub firmware_path: PathBuf,
    pub firmware_data: Vec<u8>,
    pub firmware_size: u32,
    pub firmware_crc32: u32,
    pub version: Version,
    pub total_chunks: u16,
    pub devices: HashMap<DeviceUuid, DeviceOta>,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Aggregate progress for external reporting.
#[derive(Debug, Clone, Serialize)]
pub struct OtaProgress {
    pub active: bool,
    #[serde(flatten)]
    pub detail: Option<ProgressDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressDetail {
    pub announce_id: u32,
    pub version: String,
    pub firmware_size: u32,
    pub total_chunks: u16,
    pub devices_total: usize,
    pub devices_complete: usize,
    pub devices_error: usize,
    pub devices_receiving: usize,
    pub elapsed_sec: u64,
}

/// Per-device view for external reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceOtaStatus {
    pub uuid: String,
    pub state: String,
    pub current_version: String,
    /// Percentage of chunks acknowledged.
    pub progress: u8,
    /// Last acknowledged chunk index, -1 when none.
    pub last_chunk: i32,
    pub retry_count: u32,
    pub error: String,
}

/// Final accounting handed to the session-complete callback.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub announce_id: u32,
    pub firmware_path: PathBuf,
    pub version: Version,
    pub started_at: DateTime<Utc>,
    pub devices_success: usize,
    pub devices_failed: usize,
}

type DeviceCompleteFn = Box<dyn Fn(&DeviceUuid) + Send + Sync>;
type SessionCompleteFn = Box<dyn Fn(&SessionSummary) + Send + Sync>;
type ProgressFn = Box<dyn Fn(&DeviceUuid, u16, u16) + Send + Sync>;

/// Coordinates firmware rollouts over the shared radio.
pub struct OtaManager {
    radio: Arc<dyn RadioTransport>,
    packets: Arc<Mutex<PacketBuilder>>,
    session: Mutex<Option<OtaSession>>,
    running: AtomicBool,
    announce_thread: Mutex<Option<JoinHandle<()>>>,
    on_device_complete: Mutex<Option<DeviceCompleteFn>>,
    on_session_complete: Mutex<Option<SessionCompleteFn>>,
    on_progress: Mutex<Option<ProgressFn>>,
}

impl OtaManager {
    pub fn new(radio: Arc<dyn RadioTransport>, packets: Arc<Mutex<PacketBuilder>>) -> Arc<Self> {
        Arc::new(Self {
            radio,
            packets,
            session: Mutex::new(None),
            running: AtomicBool::new(false),
            announce_thread: Mutex::new(None),
            on_device_complete: Mutex::new(None),
            on_session_complete: Mutex::new(None),
            on_progress: Mutex::new(None),
        })
    }

    pub fn set_on_device_complete(&self, f: impl Fn(&DeviceUuid) + Send + Sync + 'static) {
        *self.on_device_complete.lock().unwrap() = Some(Box::new(f));
    }

    pub fn set_on_session_complete(&self, f: impl Fn(&SessionSummary) + Send + Sync + 'static) {
        *self.on_session_complete.lock().unwrap() = Some(Box::new(f));
    }

    pub fn set_on_progress(&self, f: impl Fn(&DeviceUuid, u16, u16) + Send + Sync + 'static) {
        *self.on_progress.lock().unwrap() = Some(Box::new(f));
    }

    /// Load a firmware image and start a new session. Only one session
    /// may be active at a time.
    pub fn start_update(
        self: &Arc<Self>,
        firmware_path: &Path,
        version: Version,
        target_device_type: u8,
    ) -> Result<u32, OtaError> {
        let mut guard = self.session.lock().unwrap();
        if guard.as_ref().map(|s| s.is_active).unwrap_or(false) {
            return Err(OtaError::AlreadyActive);
        }

        if !firmware_path.exists() {
            return Err(OtaError::FileNotFound(firmware_path.to_path_buf()));
        }
        let firmware_data = std::fs::read(firmware_path)?;
        if firmware_data.is_empty() {
            return Err(OtaError::EmptyFirmware);
        }
        if firmware_data.len() > CHUNK_SIZE * u16::MAX as usize {
            return Err(OtaError::TooLarge);
        }

        let firmware_size = firmware_data.len() as u32;
        let firmware_crc32 = crc32(&firmware_data);
        let total_chunks = ((firmware_data.len() + CHUNK_SIZE - 1) / CHUNK_SIZE) as u16;
        let announce_id = rand::thread_rng().gen_range(1..=u32::MAX);

        info!(
            "starting OTA: {}, v{}, {} bytes, {} chunks, CRC=0x{:08X}",
            firmware_path.display(),
            version,
            firmware_size,
            total_chunks,
            firmware_crc32
        );

        *guard = Some(OtaSession {
            announce_id,
            target_device_type,
            firmware_path: firmware_path.to_path_buf(),
            firmware_data,
            firmware_size,
            firmware_crc32,
            version,
            total_chunks,
            devices: HashMap::new(),
            start_time: Instant::now(),
            started_at: Utc::now(),
            is_active: true,
        });
        drop(guard);

        self.running.store(true, Ordering::SeqCst);
        let manager = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("ota-announce".to_string())
            .spawn(move || manager.announce_loop())?;
        *self.announce_thread.lock().unwrap() = Some(handle);

        Ok(announce_id)
    }

    /// Abort the current session and stop the maintenance thread.
    /// Idempotent; harmless when nothing is running.
    pub fn stop_update(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.announce_thread.lock().unwrap().take() {
            let _ = handle.join();
        }

        let abort = {
            let mut guard = self.session.lock().unwrap();
            match guard.as_mut() {
                Some(session) if session.is_active => {
                    session.is_active = false;
                    info!("OTA session {:#010x} stopped", session.announce_id);
                    Some(
                        self.packets
                            .lock()
                            .unwrap()
                            .build_ota_abort(session.announce_id),
                    )
                }
                _ => None,
            }
        };

        if let Some(frame) = abort {
            self.transmit(&frame);
        }
    }

    pub fn is_active(&self) -> bool {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.is_active)
            .unwrap_or(false)
    }

    /// Route an inbound OTA-block message. Returns true when the message
    /// belonged to the active session and was handled.
    pub fn handle_message(&self, header: &PacketHeader, payload: &[u8]) -> bool {
        let Some(msg_type) = MessageType::from_raw(header.msg_type) else {
            warn!(
                "unknown OTA message type {:#04x} from {}",
                header.msg_type, header.uuid
            );
            return false;
        };

        match msg_type {
            MessageType::OtaRequest => self.handle_request(header.uuid, payload),
            MessageType::OtaChunkAck => self.handle_chunk_ack(header.uuid, payload),
            MessageType::OtaChunkNack => self.handle_chunk_nack(header.uuid, payload),
            MessageType::OtaComplete => self.handle_complete(header.uuid, payload),
            MessageType::OtaStatus => self.handle_status(header.uuid, payload),
            // Leader-originated types are never expected inbound
            _ => false,
        }
    }

    pub fn progress(&self) -> OtaProgress {
        let guard = self.session.lock().unwrap();
        match guard.as_ref() {
            None => OtaProgress {
                active: false,
                detail: None,
            },
            Some(session) => {
                let count = |state: DeviceOtaState| {
                    session
                        .devices
                        .values()
                        .filter(|d| d.state == state)
                        .count()
                };
                OtaProgress {
                    active: session.is_active,
                    detail: Some(ProgressDetail {
                        announce_id: session.announce_id,
                        version: session.version.to_string(),
                        firmware_size: session.firmware_size,
                        total_chunks: session.total_chunks,
                        devices_total: session.devices.len(),
                        devices_complete: count(DeviceOtaState::Complete),
                        devices_error: count(DeviceOtaState::Error),
                        devices_receiving: count(DeviceOtaState::Receiving),
                        elapsed_sec: session.start_time.elapsed().as_secs(),
                    }),
                }
            }
        }
    }

    pub fn device_status(&self) -> Vec<DeviceOtaStatus> {
        let guard = self.session.lock().unwrap();
        let Some(session) = guard.as_ref() else {
            return Vec::new();
        };

        let mut statuses: Vec<DeviceOtaStatus> = session
            .devices
            .values()
            .map(|device| {
                let progress = match device.last_chunk_acked {
                    Some(acked) if session.total_chunks > 0 => {
                        ((acked as u32 + 1) * 100 / session.total_chunks as u32) as u8
                    }
                    _ => 0,
                };
                DeviceOtaStatus {
                    uuid: device.uuid.to_string(),
                    state: device.state.to_string(),
                    current_version: device.current_version.to_string(),
                    progress,
                    last_chunk: device.last_chunk_acked.map(i32::from).unwrap_or(-1),
                    retry_count: device.retry_count,
                    error: device.error_message.clone(),
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        statuses
    }

    /// Maintenance loop: announce, feed pending chunks, sweep timeouts,
    /// then sleep in short slices so `stop_update` stays responsive.
    fn announce_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) && self.is_active() {
            self.send_announce();
            self.process_pending_chunks();
            self.check_timeouts(Instant::now());

            for _ in 0..(ANNOUNCE_INTERVAL.as_millis() / 100) {
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }

    fn send_announce(&self) {
        let frame = {
            let guard = self.session.lock().unwrap();
            let Some(session) = guard.as_ref().filter(|s| s.is_active) else {
                return;
            };
            let announce = OtaAnnounce {
                target_device_type: session.target_device_type,
                version: session.version,
                firmware_size: session.firmware_size,
                total_chunks: session.total_chunks,
                firmware_crc32: session.firmware_crc32,
                announce_id: session.announce_id,
            };
            self.packets.lock().unwrap().build_ota_announce(&announce)
        };

        self.transmit(&frame);
        debug!("sent OTA announce");
    }

    fn handle_request(&self, uuid: DeviceUuid, payload: &[u8]) -> bool {
        let request = match OtaRequest::decode(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!("bad OTA request from {}: {}", uuid, e);
                return false;
            }
        };

        let frame = {
            let mut guard = self.session.lock().unwrap();
            let Some(session) = guard.as_mut().filter(|s| s.is_active) else {
                return false;
            };
            if request.announce_id != session.announce_id {
                return false;
            }

            let now = Instant::now();
            let device = session
                .devices
                .entry(uuid)
                .or_insert_with(|| DeviceOta::new(uuid, now));
            device.current_version = request.current_version;
            device.state = DeviceOtaState::Requested;
            device.last_activity = now;
            device.last_chunk_acked = request.last_chunk_received;
            let start_chunk = device.next_chunk();

            info!(
                "OTA request from {}: running v{}, starting at chunk {}",
                uuid, request.current_version, start_chunk
            );

            self.build_chunk_frame(session, &uuid, start_chunk)
        };

        if let Some(frame) = frame {
            self.transmit(&frame);
        }
        true
    }

    fn handle_chunk_ack(&self, uuid: DeviceUuid, payload: &[u8]) -> bool {
        let ack = match OtaChunkAck::decode(payload) {
            Ok(a) => a,
            Err(e) => {
                warn!("bad chunk ACK from {}: {}", uuid, e);
                return false;
            }
        };

        let mut progressed = None;
        let frame = {
            let mut guard = self.session.lock().unwrap();
            let Some(session) = guard.as_mut().filter(|s| s.is_active) else {
                return false;
            };
            if ack.announce_id != session.announce_id {
                return false;
            }
            let total_chunks = session.total_chunks;
            let Some(device) = session.devices.get_mut(&uuid) else {
                return false;
            };

            if ack.status != 0 {
                warn!(
                    "chunk {} error {} reported by {}",
                    ack.chunk_index, ack.status, uuid
                );
                return true;
            }

            // Duplicates and rewinds are stale; the transfer never moves
            // backwards.
            let expected = device.next_chunk();
            if ack.chunk_index != expected {
                debug!(
                    "stale ACK for chunk {} from {} (expecting {})",
                    ack.chunk_index, uuid, expected
                );
                return true;
            }

            device.last_chunk_acked = Some(ack.chunk_index);
            device.state = DeviceOtaState::Receiving;
            device.retry_count = 0;
            device.last_activity = Instant::now();
            progressed = Some((ack.chunk_index + 1, total_chunks));

            debug!(
                "chunk {}/{} ACKed by {}",
                ack.chunk_index + 1,
                total_chunks,
                uuid
            );

            let next = ack.chunk_index + 1;
            if next < total_chunks {
                self.build_chunk_frame(session, &uuid, next)
            } else {
                None
            }
        };

        if let Some((done, total)) = progressed {
            if let Some(cb) = self.on_progress.lock().unwrap().as_ref() {
                cb(&uuid, done, total);
            }
        }
        if let Some(frame) = frame {
            self.transmit(&frame);
        }
        true
    }

    fn handle_chunk_nack(&self, uuid: DeviceUuid, payload: &[u8]) -> bool {
        let nack = match OtaChunkAck::decode(payload) {
            Ok(n) => n,
            Err(e) => {
                warn!("bad chunk NACK from {}: {}", uuid, e);
                return false;
            }
        };

        let mut completion = None;
        let frame = {
            let mut guard = self.session.lock().unwrap();
            let Some(session) = guard.as_mut().filter(|s| s.is_active) else {
                return false;
            };
            if nack.announce_id != session.announce_id {
                return false;
            }
            let Some(device) = session.devices.get_mut(&uuid) else {
                return false;
            };

            device.last_activity = Instant::now();
            device.retry_count += 1;

            if device.retry_count > MAX_RETRIES {
                device.state = DeviceOtaState::Error;
                device.error_message = "Max retries exceeded".to_string();
                error!("device {} exceeded max retries", uuid);
                completion = self.evaluate_session_complete(session);
                None
            } else {
                info!("resending chunk {} to {}", nack.chunk_index, uuid);
                self.build_chunk_frame(session, &uuid, nack.chunk_index)
            }
        };

        self.fire_session_complete(completion);
        if let Some(frame) = frame {
            self.transmit(&frame);
        }
        true
    }

    fn handle_complete(&self, uuid: DeviceUuid, payload: &[u8]) -> bool {
        let complete = match OtaComplete::decode(payload) {
            Ok(c) => c,
            Err(e) => {
                warn!("bad OTA complete from {}: {}", uuid, e);
                return false;
            }
        };

        let mut device_done = false;
        let completion = {
            let mut guard = self.session.lock().unwrap();
            let Some(session) = guard.as_mut().filter(|s| s.is_active) else {
                return false;
            };
            if complete.announce_id != session.announce_id {
                return false;
            }
            let Some(device) = session.devices.get_mut(&uuid) else {
                return false;
            };

            device.last_activity = Instant::now();
            if complete.status == 0 {
                device.state = DeviceOtaState::Complete;
                info!("device {} completed OTA successfully", uuid);
                device_done = true;
            } else {
                device.state = DeviceOtaState::Error;
                device.error_message = "CRC mismatch".to_string();
                error!(
                    "device {} reports CRC mismatch (calculated {:#010x})",
                    uuid, complete.calculated_crc32
                );
            }

            self.evaluate_session_complete(session)
        };

        if device_done {
            if let Some(cb) = self.on_device_complete.lock().unwrap().as_ref() {
                cb(&uuid);
            }
        }
        self.fire_session_complete(completion);
        true
    }

    fn handle_status(&self, uuid: DeviceUuid, payload: &[u8]) -> bool {
        let status = match OtaStatus::decode(payload) {
            Ok(s) => s,
            Err(e) => {
                warn!("bad OTA status from {}: {}", uuid, e);
                return false;
            }
        };

        let mut guard = self.session.lock().unwrap();
        let Some(session) = guard.as_mut().filter(|s| s.is_active) else {
            return false;
        };
        if status.announce_id != session.announce_id {
            return false;
        }
        let Some(device) = session.devices.get_mut(&uuid) else {
            return false;
        };

        device.last_activity = Instant::now();
        info!(
            "status from {}: {}/{} chunks, state={}, error={}",
            uuid, status.chunks_received, status.total_chunks, status.state, status.error_code
        );
        true
    }

    /// Re-send the next expected chunk to devices that are mid-transfer
    /// but have nothing in flight.
    fn process_pending_chunks(&self) {
        let frames = {
            let mut guard = self.session.lock().unwrap();
            let Some(session) = guard.as_mut().filter(|s| s.is_active) else {
                return;
            };

            let mut pending = Vec::new();
            for device in session.devices.values() {
                if device.state != DeviceOtaState::Receiving {
                    continue;
                }
                let next = device.next_chunk();
                if next < session.total_chunks && device.last_chunk_sent.map_or(true, |s| s < next)
                {
                    pending.push((device.uuid, next));
                }
            }

            let mut frames = Vec::with_capacity(pending.len());
            for (uuid, chunk) in pending {
                if let Some(frame) = self.build_chunk_frame(session, &uuid, chunk) {
                    frames.push(frame);
                }
            }
            frames
        };

        for frame in frames {
            self.transmit(&frame);
        }
    }

    /// Timeout sweep. Takes the clock so tests can advance time.
    pub(crate) fn check_timeouts(&self, now: Instant) {
        let mut completion = None;
        let frames = {
            let mut guard = self.session.lock().unwrap();
            let Some(session) = guard.as_mut().filter(|s| s.is_active) else {
                return;
            };

            let total_chunks = session.total_chunks;
            let mut resend = Vec::new();
            let mut any_terminal = false;

            for device in session.devices.values_mut() {
                if !matches!(
                    device.state,
                    DeviceOtaState::Requested | DeviceOtaState::Receiving
                ) {
                    continue;
                }
                if now.saturating_duration_since(device.last_activity) <= CHUNK_TIMEOUT {
                    continue;
                }

                device.retry_count += 1;
                if device.retry_count > MAX_RETRIES {
                    device.state = DeviceOtaState::Error;
                    device.error_message = "Timeout".to_string();
                    error!("device {} timed out", device.uuid);
                    any_terminal = true;
                } else {
                    let chunk = device.next_chunk();
                    if chunk < total_chunks {
                        info!("timeout, resending chunk {} to {}", chunk, device.uuid);
                        device.last_activity = now;
                        resend.push((device.uuid, chunk));
                    }
                }
            }

            let mut frames = Vec::with_capacity(resend.len());
            for (uuid, chunk) in resend {
                if let Some(frame) = self.build_chunk_frame(session, &uuid, chunk) {
                    frames.push(frame);
                }
            }
            if any_terminal {
                completion = self.evaluate_session_complete(session);
            }
            frames
        };

        self.fire_session_complete(completion);
        for frame in frames {
            self.transmit(&frame);
        }
    }

    /// Build the frame for one chunk and record it as sent, all under
    /// the session lock so `last_chunk_acked <= last_chunk_sent` holds.
    /// The caller transmits after the lock is released.
    fn build_chunk_frame(
        &self,
        session: &mut OtaSession,
        uuid: &DeviceUuid,
        chunk_index: u16,
    ) -> Option<Vec<u8>> {
        if chunk_index >= session.total_chunks {
            return None;
        }

        let start = chunk_index as usize * CHUNK_SIZE;
        let end = usize::min(start + CHUNK_SIZE, session.firmware_data.len());
        let frame = self.packets.lock().unwrap().build_ota_chunk(
            session.announce_id,
            chunk_index,
            &session.firmware_data[start..end],
        );

        if let Some(device) = session.devices.get_mut(uuid) {
            device.last_chunk_sent = Some(chunk_index);
        }
        Some(frame)
    }

    /// A session finishes exactly once: when it tracks at least one
    /// device and every tracked device reached a terminal state.
    fn evaluate_session_complete(&self, session: &mut OtaSession) -> Option<SessionSummary> {
        if session.devices.is_empty()
            || !session.devices.values().all(|d| d.state.is_terminal())
        {
            return None;
        }

        let devices_success = session
            .devices
            .values()
            .filter(|d| d.state == DeviceOtaState::Complete)
            .count();
        let devices_failed = session.devices.len() - devices_success;

        info!(
            "OTA session {:#010x} complete: {} success, {} errors",
            session.announce_id, devices_success, devices_failed
        );

        session.is_active = false;
        self.running.store(false, Ordering::SeqCst);

        Some(SessionSummary {
            announce_id: session.announce_id,
            firmware_path: session.firmware_path.clone(),
            version: session.version,
            started_at: session.started_at,
            devices_success,
            devices_failed,
        })
    }

    fn fire_session_complete(&self, summary: Option<SessionSummary>) {
        if let Some(summary) = summary {
            if let Some(cb) = self.on_session_complete.lock().unwrap().as_ref() {
                cb(&summary);
            }
        }
    }

    fn transmit(&self, frame: &[u8]) {
        if let Err(e) = self.radio.send(frame) {
            // The maintenance sweep retransmits on the next tick.
            warn!("radio send failed: {}", e);
        }
    }
}
