use serde::{Deserialize, Serialize};

/// The complete telemetry state at one point in time. Immutable once
/// published; the link reader builds each new snapshot by merging a partial
/// update into the previous one.
///
/// A `None` field has never been reported by the vehicle. It is distinct
/// from a genuine zero (e.g. zero altitude on the ground) and renders as
/// JSON `null` on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Monotonically increasing, assigned by the link reader.
    pub seq: u64,
    /// Capture timestamp, unix milliseconds.
    pub ts_unix_ms: i64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt_m: Option<f64>,
    pub roll_deg: Option<f64>,
    pub pitch_deg: Option<f64>,
    pub yaw_deg: Option<f64>,
    pub battery_pct: Option<u8>,
}

impl TelemetrySnapshot {
    /// Merge a partial update into this snapshot. Fields carried by the
    /// update overwrite; all others keep their last known value.
    pub fn merged(&self, update: &TelemetryUpdate, seq: u64, ts_unix_ms: i64) -> Self {
        Self {
            seq,
            ts_unix_ms,
            lat: update.lat.or(self.lat),
            lon: update.lon.or(self.lon),
            alt_m: update.alt_m.or(self.alt_m),
            roll_deg: update.roll_deg.or(self.roll_deg),
            pitch_deg: update.pitch_deg.or(self.pitch_deg),
            yaw_deg: update.yaw_deg.or(self.yaw_deg),
            battery_pct: update.battery_pct.or(self.battery_pct),
        }
    }
}

/// Fields extracted from a single inbound link message. Any field the
/// message did not carry stays `None` and is left untouched by the merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryUpdate {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt_m: Option<f64>,
    pub roll_deg: Option<f64>,
    pub pitch_deg: Option<f64>,
    pub yaw_deg: Option<f64>,
    pub battery_pct: Option<u8>,
}

impl TelemetryUpdate {
    pub fn is_empty(&self) -> bool {
        self.lat.is_none()
            && self.lon.is_none()
            && self.alt_m.is_none()
            && self.roll_deg.is_none()
            && self.pitch_deg.is_none()
            && self.yaw_deg.is_none()
            && self.battery_pct.is_none()
    }
}

/// What both client-facing interfaces emit: the snapshot plus its age at
/// send time, so a client can judge staleness on every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub seq: u64,
    pub ts_ms: i64,
    pub age_ms: u64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt: Option<f64>,
    pub roll: Option<f64>,
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,
    pub battery: Option<u8>,
}

impl TelemetryFrame {
    pub fn new(snap: &TelemetrySnapshot, age_ms: u64) -> Self {
        Self {
            seq: snap.seq,
            ts_ms: snap.ts_unix_ms,
            age_ms,
            lat: snap.lat,
            lon: snap.lon,
            alt: snap.alt_m,
            roll: snap.roll_deg,
            pitch: snap.pitch_deg,
            yaw: snap.yaw_deg,
            battery: snap.battery_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_prior_fields() {
        let first = TelemetrySnapshot::default().merged(
            &TelemetryUpdate { lat: Some(1.0), lon: Some(2.0), ..Default::default() },
            1,
            1000,
        );
        let second = first.merged(
            &TelemetryUpdate { battery_pct: Some(55), ..Default::default() },
            2,
            2000,
        );

        assert_eq!(second.lat, Some(1.0));
        assert_eq!(second.lon, Some(2.0));
        assert_eq!(second.battery_pct, Some(55));
        assert_eq!(second.seq, 2);
        assert_eq!(second.ts_unix_ms, 2000);
        // untouched fields stay unknown, not zero
        assert_eq!(second.alt_m, None);
        assert_eq!(second.yaw_deg, None);
    }

    #[test]
    fn merge_overwrites_carried_fields() {
        let first = TelemetrySnapshot::default().merged(
            &TelemetryUpdate { alt_m: Some(12.5), ..Default::default() },
            1,
            1000,
        );
        let second = first.merged(
            &TelemetryUpdate { alt_m: Some(0.0), ..Default::default() },
            2,
            2000,
        );

        // a reported zero is a real value, distinct from unknown
        assert_eq!(second.alt_m, Some(0.0));
    }

    #[test]
    fn empty_update_detection() {
        assert!(TelemetryUpdate::default().is_empty());
        assert!(!TelemetryUpdate { yaw_deg: Some(90.0), ..Default::default() }.is_empty());
    }

    #[test]
    fn frame_renders_unknown_as_null() {
        let snap = TelemetrySnapshot {
            seq: 3,
            ts_unix_ms: 5000,
            lat: Some(47.1),
            lon: Some(8.2),
            ..Default::default()
        };
        let json: serde_json::Value =
            serde_json::to_value(TelemetryFrame::new(&snap, 250)).unwrap();

        assert_eq!(json["lat"], serde_json::json!(47.1));
        assert_eq!(json["battery"], serde_json::Value::Null);
        assert_eq!(json["alt"], serde_json::Value::Null);
        assert_eq!(json["age_ms"], serde_json::json!(250));
        assert_eq!(json["seq"], serde_json::json!(3));
    }
}
