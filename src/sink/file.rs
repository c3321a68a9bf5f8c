use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};

use super::Sink;
use crate::message::{format_time, Batch};

const HEADER: &str =
    "Time,Device,Temperature (C),Humidity (%RH),Pressure (Pa),Altitude (m)\n";

#[inline]
fn default_dir() -> PathBuf {
    PathBuf::from("logs")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_dir")]
    dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self { dir: default_dir() }
    }
}

/// Appends readings as CSV, one file per calendar day.
pub struct FileSink {
    dir: PathBuf,
    current: Option<(NaiveDate, File)>,
}

impl FileSink {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        fs::create_dir_all(&config.dir)
            .await
            .with_context(|| format!("failed to create directory {}", config.dir.display()))?;
        Ok(Self {
            dir: config.dir,
            current: None,
        })
    }

    fn path_for(dir: &Path, date: NaiveDate) -> PathBuf {
        dir.join(format!("{}.log", date.format("%Y-%m-%d")))
    }

    async fn file_for(&mut self, date: NaiveDate) -> anyhow::Result<&mut File> {
        let stale = !matches!(&self.current, Some((open, _)) if *open == date);
        if stale {
            let path = Self::path_for(&self.dir, date);
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .with_context(|| format!("failed to open file {}", path.display()))?;
            let len = file
                .metadata()
                .await
                .with_context(|| format!("failed to stat file {}", path.display()))?
                .len();
            if len == 0 {
                info!("starting new log file {}", path.display());
                file.write_all(HEADER.as_bytes())
                    .await
                    .with_context(|| format!("failed to write header to {}", path.display()))?;
            }
            self.current = Some((date, file));
        }
        self.current
            .as_mut()
            .map(|(_, file)| file)
            .context("no log file open")
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn update(&mut self, batch: &Batch) -> anyhow::Result<()> {
        let time = format_time(&batch.timestamp);
        let lines: String = batch
            .readings
            .iter()
            .map(|r| {
                format!(
                    "{},{},{},{},{},{}\n",
                    time, r.device, r.temperature, r.humidity, r.pressure, r.altitude
                )
            })
            .collect();

        let date = batch.timestamp.date_naive();
        let path = Self::path_for(&self.dir, date);
        let file = self.file_for(date).await?;
        file.write_all(lines.as_bytes())
            .await
            .with_context(|| format!("failed to append to file {}", path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("failed to flush file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::reading;
    use chrono::{Local, TimeZone};

    #[tokio::test]
    async fn writes_header_once_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(Config {
            dir: dir.path().to_path_buf(),
        })
        .await
        .unwrap();

        let first = Local.with_ymd_and_hms(2024, 9, 1, 10, 0, 0).unwrap();
        let second = Local.with_ymd_and_hms(2024, 9, 1, 10, 0, 3).unwrap();
        let next_day = Local.with_ymd_and_hms(2024, 9, 2, 0, 0, 1).unwrap();
        sink.update(&Batch::new(first, vec![reading("a", 21.5, 40.0)]))
            .await
            .unwrap();
        sink.update(&Batch::new(
            second,
            vec![reading("a", 21.0, 41.0), reading("b", 19.0, 50.0)],
        ))
        .await
        .unwrap();
        sink.update(&Batch::new(next_day, vec![reading("b", 18.0, 52.0)]))
            .await
            .unwrap();

        let day = std::fs::read_to_string(dir.path().join("2024-09-01.log")).unwrap();
        let lines: Vec<_> = day.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], HEADER.trim_end());
        assert_eq!(
            lines[1],
            "2024-09-01T10:00:00.000000,a,21.5,40,101325,12.5"
        );
        assert!(lines[3].starts_with("2024-09-01T10:00:03.000000,b,19,50,"));

        let next = std::fs::read_to_string(dir.path().join("2024-09-02.log")).unwrap();
        assert_eq!(next.lines().count(), 2);
    }

    #[tokio::test]
    async fn appends_to_existing_file_without_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024-09-01.log");
        std::fs::write(&path, format!("{}old,line\n", HEADER)).unwrap();

        let mut sink = FileSink::new(Config {
            dir: dir.path().to_path_buf(),
        })
        .await
        .unwrap();
        let time = Local.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap();
        sink.update(&Batch::new(time, vec![reading("a", 1.0, 2.0)]))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("Time,Device").count(), 1);
        assert_eq!(content.lines().count(), 3);
    }
}
