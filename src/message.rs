use std::{collections::HashMap, fmt};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One device's report, as decoded from a discovery response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct Reading {
    pub device: String,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub altitude: f64,
    /// Any further fields the device reports, in payload order.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Reading {
    pub fn value(&self, field: Field) -> f64 {
        match field {
            Field::Temperature => self.temperature,
            Field::Humidity => self.humidity,
            Field::Pressure => self.pressure,
            Field::Altitude => self.altitude,
        }
    }

    /// Extra fields carrying a number, in payload order.
    pub fn extra_values(&self) -> impl Iterator<Item = (&str, f64)> {
        self.extra
            .iter()
            .filter_map(|(key, value)| Some((key.as_str(), value.as_f64()?)))
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Field {
    Temperature,
    Humidity,
    Pressure,
    Altitude,
}

impl Field {
    pub const ALL: [Field; 4] = [
        Field::Temperature,
        Field::Humidity,
        Field::Pressure,
        Field::Altitude,
    ];
    /// Fields that keep a rolling history
    pub const TRACKED: [Field; 2] = [Field::Temperature, Field::Humidity];

    pub fn name(self) -> &'static str {
        match self {
            Field::Temperature => "temperature",
            Field::Humidity => "humidity",
            Field::Pressure => "pressure",
            Field::Altitude => "altitude",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Field::Temperature => "Temperature in Celsius",
            Field::Humidity => "Humidity in RH%",
            Field::Pressure => "Pressure in Pa",
            Field::Altitude => "Estimated altitude in Meter",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A reading stamped with the time it was ingested.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Sample {
    pub reading: Reading,
    pub time: DateTime<Local>,
}

impl Sample {
    /// Attribute pairs in record order: device, measurements, extra fields,
    /// time. An extra `time` field is shadowed by the ingestion time.
    pub fn attributes(&self) -> Vec<(String, String)> {
        let mut attributes = Vec::with_capacity(Field::ALL.len() + self.reading.extra.len() + 2);
        attributes.push(("device".to_string(), self.reading.device.clone()));
        for field in Field::ALL.iter() {
            attributes.push((
                field.name().to_string(),
                self.reading.value(*field).to_string(),
            ));
        }
        for (key, value) in self.reading.extra.iter() {
            if key != "time" {
                attributes.push((key.clone(), render_value(value)));
            }
        }
        attributes.push(("time".to_string(), format_time(&self.time)));
        attributes
    }
}

/// The readings of one successful poll, sharing one ingestion timestamp.
#[derive(Debug, Clone)]
pub(crate) struct Batch {
    pub timestamp: DateTime<Local>,
    pub readings: Vec<Reading>,
}

impl Batch {
    /// Duplicate devices keep their first position and their last value.
    pub fn new(timestamp: DateTime<Local>, readings: Vec<Reading>) -> Self {
        let mut index = HashMap::new();
        let mut unique: Vec<Reading> = Vec::with_capacity(readings.len());
        for reading in readings {
            match index.get(&reading.device) {
                Some(&i) => unique[i] = reading,
                None => {
                    index.insert(reading.device.clone(), unique.len());
                    unique.push(reading);
                }
            }
        }
        Self {
            timestamp,
            readings: unique,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

pub(crate) fn format_time(time: &DateTime<Local>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

#[cfg(test)]
pub(crate) fn reading(device: &str, temperature: f64, humidity: f64) -> Reading {
    Reading {
        device: device.to_string(),
        temperature,
        humidity,
        pressure: 101325.0,
        altitude: 12.5,
        extra: Default::default(),
    }
}
