use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use common::{Direction, Error, FrameSource, Result, UiDriver};

/// Drives the trading platform through the browser-automation sidecar.
///
/// The sidecar owns the browser session; this client only issues single
/// attempts and maps transport failures to `Error::Http`. Every request is
/// bounded by `request_timeout`, so a hung sidecar surfaces as an error.
pub struct HttpDriver {
    base: Url,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct Ack {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct TradeRequest {
    direction: Direction,
    amount: f64,
}

impl HttpDriver {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid DRIVER_URL '{base_url}': {e}")))?;
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { base, http })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Config(format!("bad endpoint '{path}': {e}")))
    }

    async fn post_ack<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<bool> {
        let url = self.endpoint(path)?;
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Driver(format!("{path}: HTTP {status}: {body}")));
        }
        let ack: Ack = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        debug!(path, ok = ack.ok, "Driver acknowledged");
        Ok(ack.ok)
    }
}

#[async_trait]
impl UiDriver for HttpDriver {
    async fn select_instrument(&self, name: &str) -> Result<bool> {
        self.post_ack("instrument", &serde_json::json!({ "name": name }))
            .await
    }

    async fn select_timeframe(&self, timeframe: &str) -> Result<bool> {
        self.post_ack("timeframe", &serde_json::json!({ "timeframe": timeframe }))
            .await
    }

    async fn place_trade(&self, direction: Direction, amount: f64) -> Result<bool> {
        self.post_ack("trade", &TradeRequest { direction, amount })
            .await
    }
}

#[async_trait]
impl FrameSource for HttpDriver {
    async fn capture_frame(&self) -> Result<RgbImage> {
        let url = self.endpoint("frame")?;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Driver(format!("frame: HTTP {status}")));
        }
        let bytes = resp.bytes().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok(image::load_from_memory(&bytes)?.to_rgb8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Serves one HTTP request with `body` and returns the raw request text.
    async fn serve_once(
        content_type: &'static str,
        body: Vec<u8>,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
            socket.shutdown().await.unwrap();
            request
        });
        (base, handle)
    }

    /// Reads headers plus `Content-Length` bytes of body.
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut raw = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            raw.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&raw).into_owned();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if raw.len() >= end + 4 + length || n == 0 {
                    return text;
                }
            } else if n == 0 {
                return text;
            }
        }
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(matches!(HttpDriver::new("not a url", TIMEOUT), Err(Error::Config(_))));
    }

    #[test]
    fn endpoints_join_onto_base_path() {
        let driver = HttpDriver::new("http://127.0.0.1:4444/api/", TIMEOUT).unwrap();
        assert_eq!(
            driver.endpoint("trade").unwrap().as_str(),
            "http://127.0.0.1:4444/api/trade"
        );
    }

    #[tokio::test]
    async fn place_trade_posts_json_and_reads_ack() {
        let (base, server) = serve_once("application/json", br#"{"ok":true}"#.to_vec()).await;
        let driver = HttpDriver::new(&base, TIMEOUT).unwrap();

        assert!(driver.place_trade(Direction::Sell, 2.0).await.unwrap());
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /trade"));
        assert!(request.contains(r#""direction":"SELL""#));
    }

    #[tokio::test]
    async fn capture_frame_decodes_png() {
        let mut png = Vec::new();
        RgbImage::from_pixel(3, 2, image::Rgb([1, 2, 3]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let (base, server) = serve_once("image/png", png).await;
        let driver = HttpDriver::new(&base, TIMEOUT).unwrap();

        let frame = driver.capture_frame().await.unwrap();
        assert_eq!(frame.dimensions(), (3, 2));
        assert_eq!(frame.get_pixel(0, 0).0, [1, 2, 3]);
        assert!(server.await.unwrap().starts_with("GET /frame"));
    }

    #[tokio::test]
    async fn hung_sidecar_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let driver = HttpDriver::new(&base, Duration::from_millis(200)).unwrap();

        let started = std::time::Instant::now();
        let result = driver.select_instrument("EUR/USD").await;

        assert!(matches!(result, Err(Error::Http(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
        server.abort();
    }
}
