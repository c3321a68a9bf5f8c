use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local};
use futures::future;
use log::{debug, error, info};
use tokio::{
    sync::{broadcast, watch},
    task::{JoinError, JoinHandle},
    time::{interval, MissedTickBehavior},
};

use crate::{
    discovery::{self, Source},
    message::{Batch, Reading},
    sink::Sink,
    store::Store,
    util::LogError,
};

type PollResult = Result<Vec<Reading>, discovery::Error>;

const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug)]
enum Event {
    Tick,
    Settled(Result<PollResult, JoinError>),
    Terminate,
}

/// Wait for the in-flight poll, or forever when idle.
async fn settle(in_flight: &mut Option<JoinHandle<PollResult>>) -> Result<PollResult, JoinError> {
    match in_flight {
        Some(handle) => handle.await,
        None => future::pending().await,
    }
}

/// Periodically polls a source and publishes the results. The only writer of the store.
pub(crate) struct Scheduler {
    source: Arc<dyn Source>,
    store: Arc<Store>,
    sinks: Vec<Box<dyn Sink>>,
    period: Duration,
    refresh: watch::Sender<Option<DateTime<Local>>>,
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn Source>,
        store: Arc<Store>,
        sinks: Vec<Box<dyn Sink>>,
        period: Duration,
    ) -> Self {
        let (refresh, _) = watch::channel(None);
        Self {
            source,
            store,
            sinks,
            period: period.max(MIN_PERIOD),
            refresh,
        }
    }

    /// Receives the ingestion time of every publish.
    pub fn subscribe(&self) -> watch::Receiver<Option<DateTime<Local>>> {
        self.refresh.subscribe()
    }

    /// Poll immediately, then on every tick while idle. Ticks that land while a
    /// poll is in flight are dropped. On termination the in-flight poll, if
    /// any, is awaited and published before returning.
    pub async fn run(mut self, mut termination_receiver: broadcast::Receiver<()>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight: Option<JoinHandle<PollResult>> = None;

        info!("polling every {:?}", self.period);
        loop {
            let event = tokio::select! {
                _ = termination_receiver.recv() => Event::Terminate,
                result = settle(&mut in_flight) => Event::Settled(result),
                _ = ticker.tick() => Event::Tick,
            };
            match event {
                Event::Tick => {
                    if in_flight.is_some() {
                        debug!("previous poll still in flight, tick skipped");
                        continue;
                    }
                    debug!("polling");
                    let source = self.source.clone();
                    in_flight = Some(tokio::spawn(async move { source.poll().await }));
                }
                Event::Settled(result) => {
                    in_flight = None;
                    self.settled(result).await;
                }
                Event::Terminate => {
                    debug!("terminate message received");
                    break;
                }
            }
        }

        if let Some(handle) = in_flight.take() {
            info!("waiting for in-flight poll to finish");
            self.settled(handle.await).await;
        }
        info!("polling stopped");
    }

    async fn settled(&mut self, result: Result<PollResult, JoinError>) {
        match result {
            Ok(Ok(readings)) => self.publish(readings).await,
            Ok(Err(e)) => error!("poll failed, keeping previous data: {}", e),
            Err(e) => error!("poll task aborted: {}", e),
        }
    }

    async fn publish(&mut self, readings: Vec<Reading>) {
        let batch = Batch::new(Local::now(), readings);
        if batch.is_empty() {
            info!("no device responded, nothing to publish");
            return;
        }
        self.store.publish(&batch).await;
        for sink in self.sinks.iter_mut() {
            let _ = sink.update(&batch).await.pipe_log(|| "failed to update sink");
        }
        if self.refresh.send(Some(batch.timestamp)).is_err() {
            debug!("nobody is listening for refreshes");
        }
    }
}
