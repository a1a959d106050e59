//! Leader runtime: receive loop, packet routing and the device
//! inventory.
//!
//! One thread blocks on the radio in 100 ms windows and dispatches
//! decoded frames; the OTA manager runs its own maintenance thread.
//! Malformed frames are counted and dropped, never fatal.

use crate::ota::{DeviceOtaStatus, OtaError, OtaManager, OtaProgress};
use crate::radio::{RadioTransport, RxFrame};
use crate::store::{DeviceInfo, Store};
use anyhow::{Context, Result};
use chrono::Utc;
use common::packet::{
    ack_flags, parse_frame, report_flags, DeviceUuid, MessageType, PacketBuilder, PacketHeader,
    SensorReport, OTA_MSG_BASE,
};
use common::version::Version;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

const RECV_WINDOW: Duration = Duration::from_millis(100);

/// Frame counters surfaced through the health endpoint.
#[derive(Debug, Default)]
pub struct Stats {
    pub frames_received: AtomicU64,
    pub decode_errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: String,
    pub devices_known: usize,
    pub frames_received: u64,
    pub decode_errors: u64,
    pub ota_active: bool,
}

/// The leader process core. Owns the radio for its whole lifetime.
pub struct Controller {
    radio: Arc<dyn RadioTransport>,
    packets: Arc<Mutex<PacketBuilder>>,
    ota: Arc<OtaManager>,
    store: Arc<Store>,
    devices: Mutex<HashMap<DeviceUuid, DeviceInfo>>,
    stats: Stats,
    running: AtomicBool,
    rx_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Controller {
    pub fn new(radio: Arc<dyn RadioTransport>, store: Arc<Store>) -> Result<Arc<Self>> {
        let packets = Arc::new(Mutex::new(PacketBuilder::new(DeviceUuid::LEADER)));
        let ota = OtaManager::new(radio.clone(), packets.clone());

        // Persist the rollout outcome when a session winds down
        let history_store = store.clone();
        ota.set_on_session_complete(move |summary| {
            info!(
                "OTA session complete: {} success, {} failed",
                summary.devices_success, summary.devices_failed
            );
            if let Err(e) = history_store.insert_ota_history(summary, Utc::now()) {
                warn!("failed to record OTA history: {}", e);
            }
        });
        ota.set_on_device_complete(|uuid| {
            info!("device {} completed OTA update", uuid);
        });
        ota.set_on_progress(|uuid, chunk, total| {
            if chunk % 50 == 0 || chunk == total {
                info!(
                    "OTA progress {}: {}/{} ({}%)",
                    uuid,
                    chunk,
                    total,
                    chunk as u32 * 100 / total as u32
                );
            }
        });

        let known = store
            .load_devices()
            .context("failed to load device inventory")?;
        info!("loaded {} devices from database", known.len());
        let devices = known.into_iter().map(|d| (d.uuid, d)).collect();

        Ok(Arc::new(Self {
            radio,
            packets,
            ota,
            store,
            devices: Mutex::new(devices),
            stats: Stats::default(),
            running: AtomicBool::new(false),
            rx_thread: Mutex::new(None),
        }))
    }

    /// Spawn the receive loop. Returns once the thread is up.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);

        let controller = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("lora-rx".to_string())
            .spawn(move || controller.receive_loop())
            .context("failed to spawn receive thread")?;
        *self.rx_thread.lock().unwrap() = Some(handle);

        info!("controller started");
        Ok(())
    }

    /// Stop the receive loop and any OTA session. Idempotent.
    pub fn stop(&self) {
        info!("stopping controller");
        self.running.store(false, Ordering::SeqCst);
        self.ota.stop_update();
        if let Some(handle) = self.rx_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        info!("controller stopped");
    }

    fn receive_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            match self.radio.recv(RECV_WINDOW) {
                Ok(Some(frame)) => self.handle_frame(&frame),
                Ok(None) => {}
                Err(e) => warn!("radio receive error: {}", e),
            }
        }
    }

    fn handle_frame(&self, rx: &RxFrame) {
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);

        let (header, payload) = match parse_frame(&rx.data) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!("dropping malformed frame: {}", e);
                return;
            }
        };

        debug!(
            "rx from {}: type={:#04x}, {} bytes payload, {} dBm",
            header.uuid,
            header.msg_type,
            payload.len(),
            rx.rssi_dbm
        );

        // The whole OTA block belongs to the session; it handles its own
        // acknowledgement flow.
        if header.msg_type >= OTA_MSG_BASE {
            self.ota.handle_message(&header, payload);
            return;
        }

        match MessageType::from_raw(header.msg_type) {
            Some(MessageType::SensorReport) => {
                self.handle_sensor_report(&header, payload, rx.rssi_dbm)
            }
            Some(
                kind @ (MessageType::Ack
                | MessageType::Config
                | MessageType::LogData
                | MessageType::LogAck
                | MessageType::TimeSync),
            ) => {
                debug!("no core handler for {:?} from {}", kind, header.uuid);
            }
            Some(kind) => debug!("unexpected {:?} below the OTA block", kind),
            None => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "unknown message type {:#04x} from {}",
                    header.msg_type, header.uuid
                );
            }
        }
    }

    fn handle_sensor_report(&self, header: &PacketHeader, payload: &[u8], rssi: i16) {
        let report = match SensorReport::decode(payload) {
            Ok(r) => r,
            Err(e) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!("bad sensor report from {}: {}", header.uuid, e);
                return;
            }
        };

        let now = Utc::now();
        {
            let mut devices = self.devices.lock().unwrap();
            match devices.entry(header.uuid) {
                Entry::Vacant(slot) => {
                    let device = DeviceInfo {
                        uuid: header.uuid,
                        device_type: header.device_type,
                        first_seen: now,
                        last_seen: now,
                        firmware_version: "unknown".to_string(),
                        battery_mv: report.battery_mv,
                        rssi,
                    };
                    if let Err(e) = self.store.save_device(&device) {
                        warn!("failed to persist device {}: {}", header.uuid, e);
                    }
                    info!("new device registered: {}", header.uuid);
                    slot.insert(device);
                }
                Entry::Occupied(mut slot) => {
                    let device = slot.get_mut();
                    device.last_seen = now;
                    device.battery_mv = report.battery_mv;
                    device.rssi = rssi;
                    if let Err(e) = self.store.update_device(device) {
                        warn!("failed to update device {}: {}", header.uuid, e);
                    }
                }
            }
        }

        if let Err(e) = self
            .store
            .insert_sensor_reading(&header.uuid, &report, rssi, now)
        {
            warn!("failed to store sensor data: {}", e);
        }

        info!(
            "sensor report from {}: moisture={}%, battery={}mV, rssi={}dBm",
            header.uuid, report.moisture_percent, report.battery_mv, rssi
        );

        // Reserved flag bits (4-7) are not interpreted here
        let flags = if report.flags & report_flags::HAS_PENDING != 0 {
            ack_flags::SEND_LOGS
        } else {
            0
        };
        let ack = self.packets.lock().unwrap().build_ack(header.sequence, 0, flags);
        if let Err(e) = self.radio.send(&ack) {
            warn!("failed to send ACK: {}", e);
        }
    }

    pub fn devices(&self) -> Vec<DeviceInfo> {
        let mut devices: Vec<DeviceInfo> = self.devices.lock().unwrap().values().cloned().collect();
        devices.sort_by_key(|d| d.uuid);
        devices
    }

    pub fn sensor_data(&self, uuid: &DeviceUuid, limit: u32) -> Result<Vec<crate::store::SensorRow>> {
        Ok(self.store.sensor_data(uuid, limit)?)
    }

    pub fn start_ota(
        &self,
        firmware_path: &Path,
        version: Version,
        device_type: u8,
    ) -> Result<u32, OtaError> {
        self.ota.start_update(firmware_path, version, device_type)
    }

    pub fn stop_ota(&self) {
        self.ota.stop_update();
    }

    pub fn ota_progress(&self) -> OtaProgress {
        self.ota.progress()
    }

    pub fn ota_device_status(&self) -> Vec<DeviceOtaStatus> {
        self.ota.device_status()
    }

    pub fn health(&self) -> Health {
        Health {
            status: "ok".to_string(),
            devices_known: self.devices.lock().unwrap().len(),
            frames_received: self.stats.frames_received.load(Ordering::Relaxed),
            decode_errors: self.stats.decode_errors.load(Ordering::Relaxed),
            ota_active: self.ota.is_active(),
        }
    }
}
