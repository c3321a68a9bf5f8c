mod config;
mod discovery;
mod message;
mod scheduler;
mod server;
mod sink;
mod store;
mod trend;
mod util;
mod xml;
use crate::config::Config;
use crate::util::LogError;

use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use anyhow::Context;
use clap::{App, Arg};
use futures::future::{join, join_all};
use indoc::indoc;
use log::{info, warn};
use tokio::{
    net::TcpListener,
    sync,
    time::{sleep, Duration, Instant},
};

const DEFAULT_CONFIG: &str = "config.yaml";

fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let config_path = match path {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG).exists() => DEFAULT_CONFIG,
        None => {
            info!("no {} found, using defaults", DEFAULT_CONFIG);
            return Ok(Config::default());
        }
    };
    info!("open and parse config file {}", config_path);
    let config_file =
        File::open(config_path).with_context(|| format!("failed to open file {}", config_path))?;
    let config_reader = BufReader::new(config_file);
    let config: Config = serde_yaml::from_reader(config_reader)
        .with_context(|| format!("failed to parse config file {}", config_path))?;
    config
        .validate()
        .with_context(|| format!("invalid config file {}", config_path))?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cmd = App::new("env-pollster")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Poll environment sensors and serve their readings over HTTP")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .help("Sets custom config file location")
                .long_help(indoc!(
                    "Sets custom config file location, default to read config.yaml if present
                    The custom config must be a file of YAML 1.2 format.
                    The following configuration keys are supported, all optional:
                    bind_ip: local address for discovery, detected from the outbound route
                    probe_address: default 192.168.1.1:1, an ip:port used for route detection only
                    broadcast_address: default 255.255.255.255:12345
                    request: default GET DATA, the discovery request payload
                    response_timeout: default 3s, window for collecting responses
                    max_datagram: default 1024, largest response in bytes
                    poll_period: default 3s, must be greater than zero
                    http_address: default 0.0.0.0:12346
                    history: default 600, points kept per device and field
                    sinks: default [File: {dir: logs}], a list of Console or File sinks
                    "
                ))
                .value_name("FILE")
                .takes_value(true),
        )
        .get_matches();
    env_logger::init();

    let config = load_config(cmd.value_of("config"))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let (termination_sender, mut termination_receiver) = sync::broadcast::channel(1);

    let store = Arc::new(store::Store::new(config.history));
    let (listener, sinks) = runtime.block_on(async {
        let listener = TcpListener::bind(config.http_address)
            .await
            .with_context(|| format!("failed to bind {}", config.http_address))?;
        let sinks = join_all(config.sinks.iter().cloned().map(|sink| sink.into_sink()))
            .await
            .into_iter()
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok::<_, anyhow::Error>((listener, sinks))
    })?;

    let poller = Arc::new(discovery::Poller::new(&config));
    let scheduler = scheduler::Scheduler::new(poller, store.clone(), sinks, config.poll_period);
    let trend_handle = runtime.spawn(trend::follow(store.clone(), scheduler.subscribe()));
    let scheduler_handle = runtime.spawn(scheduler.run(termination_sender.subscribe()));
    let server_termination = termination_sender.subscribe();
    let server_handle = runtime.spawn(async move {
        let _ = server::serve(listener, store, server_termination)
            .await
            .pipe_log(|| "http server stopped unexpectedly");
    });
    let task_handle = join(scheduler_handle, server_handle);

    ctrlc::set_handler(move || {
        info!("signal received, terminating...");
        let _ = termination_sender.send(());
    })
    .context("failed to set up signal handlers")?;

    let result = runtime.block_on(async move {
        let deadline = sleep(Duration::from_secs(30));
        let mut terminated = false;
        tokio::pin!(deadline);
        tokio::pin!(task_handle);
        loop {
            tokio::select! {
                _ = termination_receiver.recv(), if !terminated => {
                    terminated = true;
                    deadline.as_mut().reset(Instant::now() + Duration::from_secs(5));
                },
                _ = &mut deadline, if terminated => {
                    warn!("tasks didn't terminate in time, force exit in 1s");
                    return Ok::<(), anyhow::Error>(());
                },
                (scheduler, server) = &mut task_handle => {
                    scheduler.context("poll scheduler panicked")?;
                    server.context("http server panicked")?;
                    let _ = trend_handle.await;
                    return Ok(());
                },
            }
        }
    });
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}
