use std::{collections::BTreeSet, sync::Arc};

use anyhow::Context;
use axum::{
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use log::{debug, error, info};
use serde_json::json;
use tokio::{net::TcpListener, sync::broadcast};

use crate::{
    message::Field,
    store::{Snapshot, Store},
    xml,
};

/// Handler output, serialized according to the route's content type.
pub(crate) enum Body {
    Text(String),
    Records(Vec<Vec<(String, String)>>),
    Document(serde_json::Value),
}

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("failed to encode xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("failed to encode json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no encoding for content type {0}")]
    Unsupported(&'static str),
}

struct Route {
    method: Method,
    prefix: &'static str,
    content_type: &'static str,
    handler: fn(&Snapshot) -> Body,
}

// Matched by path prefix in declaration order, first match wins.
static ROUTES: [Route; 5] = [
    Route {
        method: Method::GET,
        prefix: "/latest",
        content_type: "text/xml",
        handler: latest,
    },
    Route {
        method: Method::GET,
        prefix: "/test",
        content_type: "text/xml",
        handler: canned,
    },
    Route {
        method: Method::GET,
        prefix: "/metrics",
        content_type: "text/plain",
        handler: metrics,
    },
    Route {
        method: Method::GET,
        prefix: "/version",
        content_type: "application/json",
        handler: version,
    },
    Route {
        method: Method::GET,
        prefix: "/health",
        content_type: "application/json",
        handler: health,
    },
];

fn latest(snapshot: &Snapshot) -> Body {
    Body::Records(snapshot.values().map(|sample| sample.attributes()).collect())
}

const CANNED: [[(&str, &str); 3]; 2] = [
    [
        ("test", "1"),
        ("test2", "2"),
        ("test3", "2001-01-01 12:00:02"),
    ],
    [
        ("test", "4"),
        ("test2", "a"),
        ("test3", "2021-11-01 12:00:02"),
    ],
];

fn canned(_: &Snapshot) -> Body {
    Body::Records(
        CANNED
            .iter()
            .map(|record| {
                record
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect()
            })
            .collect(),
    )
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Whether `name` can be used as a metric name without clashing with the
/// fixed gauges.
fn exportable(name: &str) -> bool {
    let mut chars = name.chars();
    let head = match chars.next() {
        Some(c) => c.is_ascii_alphabetic() || c == '_' || c == ':',
        None => false,
    };
    head && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        && name != "num_sensor"
        && Field::ALL.iter().all(|field| field.name() != name)
}

fn metrics(snapshot: &Snapshot) -> Body {
    let extra: BTreeSet<&str> = snapshot
        .values()
        .flat_map(|sample| sample.reading.extra_values().map(|(name, _)| name))
        .filter(|name| exportable(name))
        .collect();

    let mut text = String::new();
    for field in Field::ALL.iter() {
        text.push_str(&format!("# HELP {} {}\n", field, field.help()));
        text.push_str(&format!("# TYPE {} gauge\n", field));
    }
    for name in extra.iter() {
        text.push_str(&format!("# TYPE {} gauge\n", name));
    }
    text.push_str("# HELP num_sensor Number of available sensors\n");
    text.push_str("# TYPE num_sensor gauge\n");
    for (device, sample) in snapshot.iter() {
        let device = escape_label(device);
        for field in Field::ALL.iter() {
            text.push_str(&format!(
                "{}{{device=\"{}\"}} {}\n",
                field,
                device,
                sample.reading.value(*field)
            ));
        }
        for (name, value) in sample.reading.extra_values() {
            if extra.contains(name) {
                text.push_str(&format!("{}{{device=\"{}\"}} {}\n", name, device, value));
            }
        }
    }
    text.push_str(&format!("num_sensor {}\n", snapshot.len()));
    Body::Text(text)
}

fn version(_: &Snapshot) -> Body {
    Body::Document(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
    }))
}

fn health(_: &Snapshot) -> Body {
    Body::Document(json!({ "health": "ok" }))
}

fn render(body: Body, content_type: &'static str) -> Result<String, RenderError> {
    match body {
        Body::Text(text) => Ok(text),
        Body::Records(records) if content_type.contains("xml") => Ok(xml::encode(&records)?),
        Body::Document(document) if content_type.contains("json") => {
            Ok(serde_json::to_string(&document)?)
        }
        _ => Err(RenderError::Unsupported(content_type)),
    }
}

async fn dispatch(State(store): State<Arc<Store>>, method: Method, uri: Uri) -> Response {
    let target = uri
        .path_and_query()
        .map(|target| target.as_str())
        .unwrap_or_else(|| uri.path());
    let route = match ROUTES
        .iter()
        .find(|route| route.method == method && target.starts_with(route.prefix))
    {
        Some(route) => route,
        None => {
            debug!("no route for {} {}", method, target);
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let snapshot = store.snapshot().await;
    match render((route.handler)(&snapshot), route.content_type) {
        Ok(body) => ([(header::CONTENT_TYPE, route.content_type)], body).into_response(),
        Err(e) => {
            error!("failed to render {}: {}", target, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(crate) fn router(store: Arc<Store>) -> Router {
    Router::new().fallback(dispatch).with_state(store)
}

/// Serve until a termination message arrives, then drain open connections.
pub(crate) async fn serve(
    listener: TcpListener,
    store: Arc<Store>,
    mut termination_receiver: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let address = listener.local_addr().context("listener has no address")?;
    info!("serving http on {}", address);
    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move {
            let _ = termination_receiver.recv().await;
        })
        .await
        .with_context(|| format!("http server on {} failed", address))?;
    info!("http server stopped");
    Ok(())
}
