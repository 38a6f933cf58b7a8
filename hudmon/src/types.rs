//! Types that mirror the agent's JSON schema.
//!
//! Every reading is a [`Field`]: the agent may send a formatted string, a bare
//! number, the `"N/A"` sentinel, or omit the key entirely. The last two both
//! decode to "no value" so a degraded sample never fails the whole frame.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

const UNAVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Field(Option<String>);

impl Field {
    pub fn new(v: impl Into<String>) -> Self {
        Self(Some(v.into()))
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Leading numeric part, so `"4.00 GB"` and `"12.5"` both parse.
    pub fn as_f64(&self) -> Option<f64> {
        let s = self.0.as_deref()?;
        s.split_whitespace().next()?.parse().ok()
    }

    pub fn is_available(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_deref().unwrap_or(UNAVAILABLE))
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Field(match Value::deserialize(d)? {
            Value::String(s) if s == UNAVAILABLE => None,
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }))
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Cpu {
    pub load: Field,
    pub cores: Field,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Ram {
    pub total: Field,
    pub used: Field,
    pub usage: Field,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Gpu {
    pub model: Field,
    pub vendor: Field,
    pub vram: Field,
    pub utilization: Field,
    pub temperature: Field,
    #[serde(rename = "powerDraw")]
    pub power_draw: Field,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Network {
    pub rx_sec: Field,
    pub tx_sec: Field,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Disk {
    pub usage: Field,
    pub total: Field,
    pub used: Field,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Snapshot {
    pub timestamp: Field,
    pub hostname: Field,
    pub cpu: Cpu,
    pub ram: Ram,
    #[serde(deserialize_with = "null_as_empty")]
    pub gpu: Vec<Gpu>,
    pub network: Network,
    pub disk: Disk,
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Gpu>, D::Error> {
    Ok(Option::<Vec<Gpu>>::deserialize(d)?.unwrap_or_default())
}

impl Snapshot {
    /// One terminal line describing this sample.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "[{}] {} | cpu {}% ({} cores) | ram {}/{} ({}%) | disk {}/{} ({}%) | net rx {} tx {} KB/s",
            self.timestamp,
            self.hostname,
            self.cpu.load,
            self.cpu.cores,
            self.ram.used,
            self.ram.total,
            self.ram.usage,
            self.disk.used,
            self.disk.total,
            self.disk.usage,
            self.network.rx_sec,
            self.network.tx_sec,
        );
        for (i, g) in self.gpu.iter().enumerate() {
            line.push_str(&format!(
                " | gpu{i} {} {}% {}C {} vram {}",
                g.model, g.utilization, g.temperature, g.power_draw, g.vram
            ));
        }
        line
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    History {
        #[serde(default)]
        data: Vec<Snapshot>,
    },
    Update(Snapshot),
    Error {
        #[serde(default)]
        message: String,
    },
    /// Any `type` this viewer does not know about.
    #[serde(other)]
    Unknown,
}
