//! Data types sent to viewers over WebSocket.
//! Field names here are the wire format; the viewer and the page depend on them.

use serde::{Deserialize, Serialize};

use crate::reading::Reading;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CpuReading {
    pub load: Reading,
    pub cores: Reading,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RamReading {
    pub total: Reading,
    pub used: Reading,
    pub usage: Reading,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GpuReading {
    pub model: String,
    pub vendor: String,
    pub vram: Reading,
    pub utilization: Reading,
    pub temperature: Reading,
    #[serde(rename = "powerDraw")]
    pub power_draw: Reading,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NetworkReading {
    // KB/s
    pub rx_sec: Reading,
    pub tx_sec: Reading,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DiskReading {
    pub usage: Reading,
    pub total: Reading,
    pub used: Reading,
}

/// One tick's worth of readings. Shared as `Arc<Snapshot>` once assembled.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Snapshot {
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub hostname: String,
    pub cpu: CpuReading,
    pub ram: RamReading,
    pub gpu: Vec<GpuReading>,
    pub network: NetworkReading,
    pub disk: DiskReading,
}

/// Frames pushed from the hub to a viewer, tagged by `type`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage<'a> {
    History { data: Vec<&'a Snapshot> },
    Update(&'a Snapshot),
    Error { message: &'a str },
}


#[cfg(test)]
mod tests {
    use super::fixtures::snapshot;
    use super::*;
    use serde_json::Value;

    #[test]
    fn update_inlines_snapshot_fields() {
        let mut s = snapshot(3);
        s.gpu.push(GpuReading {
            model: "RTX".into(),
            vendor: "NVIDIA Corporation".into(),
            vram: Reading::text("10.00 GB"),
            utilization: Reading::Unavailable,
            temperature: Reading::Unavailable,
            power_draw: Reading::Unavailable,
        });
        let js = serde_json::to_value(ServerMessage::Update(&s)).unwrap();
        assert_eq!(js["type"], "update");
        assert_eq!(js["hostname"], "testhost");
        assert_eq!(js["cpu"]["load"], "3.0");
        assert_eq!(js["cpu"]["cores"], 8);
        assert_eq!(js["network"]["tx_sec"], "N/A");
        assert_eq!(js["gpu"][0]["powerDraw"], "N/A");
        assert!(js.get("data").is_none());
    }

    #[test]
    fn history_wraps_snapshots_in_data() {
        let a = snapshot(1);
        let b = snapshot(2);
        let js = serde_json::to_value(ServerMessage::History { data: vec![&a, &b] }).unwrap();
        assert_eq!(js["type"], "history");
        let data = js["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[1]["cpu"]["load"], "2.0");
    }

    #[test]
    fn error_frame_shape() {
        let js = serde_json::to_value(ServerMessage::Error { message: "boom" }).unwrap();
        assert_eq!(js, serde_json::json!({"type": "error", "message": "boom"}));
    }

    #[test]
    fn update_parses_back_to_the_same_snapshot() {
        let s = snapshot(7);
        let wire = serde_json::to_string(&ServerMessage::Update(&s)).unwrap();
        let back: Snapshot = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, s);
        // and re-encoding is byte-stable
        let again = serde_json::to_string(&ServerMessage::Update(&back)).unwrap();
        assert_eq!(again, wire);
        let _: Value = serde_json::from_str(&again).unwrap();
    }
}
