use async_trait::async_trait;

use super::Sink;
use crate::message::{format_time, Batch};

pub struct ConsoleSink;

#[async_trait]
impl Sink for ConsoleSink {
    async fn update(&mut self, batch: &Batch) -> anyhow::Result<()> {
        let time = format_time(&batch.timestamp);
        for reading in batch.readings.iter() {
            println!(
                "[update] {}: device {} reports temp {}C, humidity {}%RH, pressure {}Pa, altitude {}m",
                time,
                reading.device,
                reading.temperature,
                reading.humidity,
                reading.pressure,
                reading.altitude
            );
        }
        Ok(())
    }
}
