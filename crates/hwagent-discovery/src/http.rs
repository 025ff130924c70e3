//! Best-effort device metadata over HTTP
//!
//! Many network printers, scanners and cameras serve a status page or a small
//! JSON document. We walk a handful of well-known paths and keep the first
//! response that tells us something.

use hwagent_core::DeviceMetadata;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, trace};

/// Paths tried in order, stopping at the first useful response
pub const INFO_PATHS: &[&str] = &["/", "/info", "/status", "/device", "/api/info"];

/// Manufacturer names searched for in text/HTML pages
const MANUFACTURERS: &[&str] = &["hp", "canon", "epson", "brother", "zebra", "honeywell", "symbol"];

/// Device type keywords searched for in text/HTML pages
const TYPE_KEYWORDS: &[&str] = &["printer", "scanner", "camera"];

/// Fetch device metadata from `http://ip:port`
pub async fn fetch_device_info(
    client: &reqwest::Client,
    ip: IpAddr,
    port: u16,
) -> Option<DeviceMetadata> {
    let base = format!("http://{}", SocketAddr::new(ip, port));

    for path in INFO_PATHS {
        let url = format!("{}{}", base, path);

        let response = match client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                trace!(url = %url, error = %e, "HTTP info request failed");
                continue;
            }
        };

        if response.status() != StatusCode::OK {
            trace!(url = %url, status = %response.status(), "HTTP info not available");
            continue;
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));

        let metadata = if is_json {
            response
                .json::<Value>()
                .await
                .ok()
                .map(|data| metadata_from_json(&url, data))
        } else {
            match response.text().await {
                Ok(text) => metadata_from_text(&url, &text),
                Err(_) => None,
            }
        };

        if let Some(metadata) = metadata {
            debug!(
                url = %url,
                manufacturer = ?metadata.manufacturer,
                hint = ?metadata.device_type_hint,
                "Fetched HTTP device info"
            );
            return Some(metadata);
        }
    }

    None
}

/// Build metadata from a JSON document, keeping the body verbatim
pub fn metadata_from_json(source: &str, data: Value) -> DeviceMetadata {
    let field = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| data.get(*n).and_then(Value::as_str))
            .map(str::to_string)
    };

    DeviceMetadata {
        source: source.to_string(),
        manufacturer: field(&["manufacturer", "vendor"]),
        device_type_hint: field(&["device_type", "type"]),
        data,
    }
}

/// Keyword search over a text or HTML page
///
/// Returns `None` when the page mentions neither a device type nor a known
/// manufacturer.
pub fn metadata_from_text(source: &str, text: &str) -> Option<DeviceMetadata> {
    let lower = text.to_lowercase();

    let device_type_hint = TYPE_KEYWORDS
        .iter()
        .find(|k| lower.contains(*k))
        .map(|k| k.to_string());

    let words: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let manufacturer = MANUFACTURERS
        .iter()
        .find(|m| words.contains(*m))
        .map(|m| capitalize(m));

    if device_type_hint.is_none() && manufacturer.is_none() {
        return None;
    }

    let data = json!({
        "device_type": &device_type_hint,
        "manufacturer": &manufacturer,
    });

    Some(DeviceMetadata {
        source: source.to_string(),
        data,
        manufacturer,
        device_type_hint,
    })
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Local HTTP server with canned responses
#[cfg(test)]
pub(crate) mod fixture {
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Path, status line, content type and body
    pub type Route = (&'static str, &'static str, &'static str, &'static str);

    /// Serve `routes` on a local port, 404 for anything else
    ///
    /// Returns the port and the paths requested so far, in order.
    pub async fn serve(routes: Vec<Route>) -> (u16, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::new(routes);

        let log = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let routes = routes.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&chunk[..n]),
                        }
                    }

                    let path = String::from_utf8_lossy(&request)
                        .split_whitespace()
                        .nth(1)
                        .unwrap_or("/")
                        .to_string();
                    log.lock().unwrap().push(path.clone());

                    let (status, content_type, body) = routes
                        .iter()
                        .find(|(p, ..)| *p == path)
                        .map_or(("404 Not Found", "text/plain", ""), |(_, s, c, b)| (*s, *c, *b));
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        content_type,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        (port, requests)
    }
}
