//! SQLite-backed device inventory, sensor history and OTA audit log.
//!
//! The store is a cache and audit trail only; protocol state never
//! lives here.

use crate::ota::SessionSummary;
use chrono::{DateTime, Utc};
use common::packet::{DeviceUuid, SensorReport};
use log::info;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;

/// Inventory record for a device that has been heard on the air.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub uuid: DeviceUuid,
    pub device_type: u8,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub firmware_version: String,
    pub battery_mv: u16,
    pub rssi: i16,
}

/// One sensor reading as returned to the API and CLI.
#[derive(Debug, Clone, Serialize)]
pub struct SensorRow {
    pub timestamp: String,
    pub moisture_raw: u16,
    pub moisture_percent: u8,
    pub battery_mv: u16,
    /// Degrees Celsius, converted from the wire's deci-degrees.
    pub temperature: f64,
    pub rssi: i16,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        info!("database initialized: {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS devices (
                uuid TEXT PRIMARY KEY,
                device_type INTEGER,
                first_seen TEXT,
                last_seen TEXT,
                firmware_version TEXT,
                battery_mv INTEGER,
                rssi INTEGER
            );
            CREATE TABLE IF NOT EXISTS sensor_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_uuid TEXT,
                timestamp TEXT,
                moisture_raw INTEGER,
                moisture_percent INTEGER,
                battery_mv INTEGER,
                temperature INTEGER,
                rssi INTEGER,
                FOREIGN KEY (device_uuid) REFERENCES devices(uuid)
            );
            CREATE TABLE IF NOT EXISTS ota_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                announce_id INTEGER,
                firmware_path TEXT,
                version TEXT,
                start_time TEXT,
                end_time TEXT,
                devices_success INTEGER,
                devices_failed INTEGER
            );",
        )
    }

    pub fn load_devices(&self) -> rusqlite::Result<Vec<DeviceInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT uuid, device_type, first_seen, last_seen, firmware_version, battery_mv, rssi
             FROM devices",
        )?;

        let rows = stmt.query_map([], |row| {
            let uuid: String = row.get(0)?;
            let first_seen: String = row.get(2)?;
            let last_seen: String = row.get(3)?;
            Ok(DeviceInfo {
                uuid: uuid.parse().unwrap_or(DeviceUuid::LEADER),
                device_type: row.get(1)?,
                first_seen: first_seen
                    .parse()
                    .unwrap_or_else(|_| Utc::now()),
                last_seen: last_seen.parse().unwrap_or_else(|_| Utc::now()),
                firmware_version: row.get(4)?,
                battery_mv: row.get(5)?,
                rssi: row.get(6)?,
            })
        })?;

        rows.collect()
    }

    pub fn save_device(&self, device: &DeviceInfo) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO devices (uuid, device_type, first_seen, last_seen, firmware_version, battery_mv, rssi)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                device.uuid.to_string(),
                device.device_type,
                device.first_seen.to_rfc3339(),
                device.last_seen.to_rfc3339(),
                device.firmware_version,
                device.battery_mv,
                device.rssi,
            ],
        )?;
        Ok(())
    }

    pub fn update_device(&self, device: &DeviceInfo) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE devices SET last_seen = ?1, battery_mv = ?2, rssi = ?3 WHERE uuid = ?4",
            params![
                device.last_seen.to_rfc3339(),
                device.battery_mv,
                device.rssi,
                device.uuid.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_sensor_reading(
        &self,
        uuid: &DeviceUuid,
        report: &SensorReport,
        rssi: i16,
        at: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sensor_data (device_uuid, timestamp, moisture_raw, moisture_percent, battery_mv, temperature, rssi)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                uuid.to_string(),
                at.to_rfc3339(),
                report.moisture_raw,
                report.moisture_percent,
                report.battery_mv,
                report.temperature_deci_c,
                rssi,
            ],
        )?;
        Ok(())
    }

    /// Most recent readings for a device, newest first.
    pub fn sensor_data(&self, uuid: &DeviceUuid, limit: u32) -> rusqlite::Result<Vec<SensorRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT timestamp, moisture_raw, moisture_percent, battery_mv, temperature, rssi
             FROM sensor_data
             WHERE device_uuid = ?1
             ORDER BY timestamp DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![uuid.to_string(), limit], |row| {
            let temperature_deci_c: i64 = row.get(4)?;
            Ok(SensorRow {
                timestamp: row.get(0)?,
                moisture_raw: row.get(1)?,
                moisture_percent: row.get(2)?,
                battery_mv: row.get(3)?,
                temperature: temperature_deci_c as f64 / 10.0,
                rssi: row.get(5)?,
            })
        })?;

        rows.collect()
    }

    pub fn insert_ota_history(
        &self,
        summary: &SessionSummary,
        ended_at: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ota_history (announce_id, firmware_path, version, start_time, end_time, devices_success, devices_failed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                summary.announce_id,
                summary.firmware_path.display().to_string(),
                summary.version.to_string(),
                summary.started_at.to_rfc3339(),
                ended_at.to_rfc3339(),
                summary.devices_success,
                summary.devices_failed,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::version::Version;

    fn sample_device(uuid: DeviceUuid) -> DeviceInfo {
        DeviceInfo {
            uuid,
            device_type: 1,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            firmware_version: "unknown".to_string(),
            battery_mv: 3300,
            rssi: -82,
        }
    }

    fn sample_report() -> SensorReport {
        SensorReport {
            timestamp: 1_700_000_000,
            moisture_raw: 2048,
            moisture_percent: 57,
            battery_mv: 3300,
            temperature_deci_c: 215,
            rssi: 90,
            pending_logs: 0,
            flags: 0,
        }
    }

    #[test]
    fn test_device_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let uuid = DeviceUuid([7; 16]);

        store.save_device(&sample_device(uuid)).unwrap();
        let loaded = store.load_devices().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].uuid, uuid);
        assert_eq!(loaded[0].battery_mv, 3300);
        assert_eq!(loaded[0].rssi, -82);
    }

    #[test]
    fn test_device_update() {
        let store = Store::open_in_memory().unwrap();
        let uuid = DeviceUuid([7; 16]);
        let mut device = sample_device(uuid);

        store.save_device(&device).unwrap();
        device.battery_mv = 3100;
        device.rssi = -90;
        store.update_device(&device).unwrap();

        let loaded = store.load_devices().unwrap();
        assert_eq!(loaded[0].battery_mv, 3100);
        assert_eq!(loaded[0].rssi, -90);
    }

    #[test]
    fn test_sensor_data_limit_and_order() {
        let store = Store::open_in_memory().unwrap();
        let uuid = DeviceUuid([7; 16]);
        let mut report = sample_report();

        for i in 0..5u16 {
            report.moisture_raw = 1000 + i;
            let at = Utc::now() + chrono::Duration::seconds(i as i64);
            store.insert_sensor_reading(&uuid, &report, -80, at).unwrap();
        }

        let rows = store.sensor_data(&uuid, 3).unwrap();
        assert_eq!(rows.len(), 3);
        // Newest first
        assert_eq!(rows[0].moisture_raw, 1004);
        assert_eq!(rows[0].temperature, 21.5);

        let other = store.sensor_data(&DeviceUuid([9; 16]), 10).unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn test_ota_history_insert() {
        let store = Store::open_in_memory().unwrap();
        let summary = SessionSummary {
            announce_id: 0xDEAD_BEEF,
            firmware_path: "/tmp/fw.bin".into(),
            version: Version::new(1, 2, 0),
            started_at: Utc::now(),
            devices_success: 3,
            devices_failed: 1,
        };

        store.insert_ota_history(&summary, Utc::now()).unwrap();

        let conn = store.conn.lock().unwrap();
        let (version, success): (String, i64) = conn
            .query_row(
                "SELECT version, devices_success FROM ota_history",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(version, "1.2.0");
        assert_eq!(success, 3);
    }
}
