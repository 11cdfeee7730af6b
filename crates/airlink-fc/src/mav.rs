use mavlink::common::MavMessage;

use airlink_proto::telemetry::TelemetryUpdate;

/// Extract whichever telemetry fields a message carries. Returns `None`
/// for message types we don't consume and for messages whose only payload
/// turned out to be invalid, so the caller can discard them outright.
pub fn update_from_message(msg: &MavMessage) -> Option<TelemetryUpdate> {
    let update = match msg {
        MavMessage::GLOBAL_POSITION_INT(p) => TelemetryUpdate {
            // lat/lon are degE7, alt is millimeters
            lat: Some(p.lat as f64 / 1e7),
            lon: Some(p.lon as f64 / 1e7),
            alt_m: Some(p.alt as f64 / 1000.0),
            ..Default::default()
        },
        MavMessage::ATTITUDE(a) => TelemetryUpdate {
            roll_deg: Some((a.roll as f64).to_degrees()),
            pitch_deg: Some((a.pitch as f64).to_degrees()),
            yaw_deg: Some((a.yaw as f64).to_degrees()),
            ..Default::default()
        },
        // Vehicles differ in which of the two they report battery on.
        MavMessage::BATTERY_STATUS(b) => TelemetryUpdate {
            battery_pct: battery_percent(b.battery_remaining),
            ..Default::default()
        },
        MavMessage::SYS_STATUS(s) => TelemetryUpdate {
            battery_pct: battery_percent(s.battery_remaining),
            ..Default::default()
        },
        _ => return None,
    };

    (!update.is_empty()).then_some(update)
}

/// battery_remaining is a percentage 0-100; -1 means invalid.
fn battery_percent(raw: i8) -> Option<u8> {
    if (0..=100).contains(&raw) {
        Some(raw as u8)
    } else {
        None
    }
}
