//! HTTP transport over the ESP-IDF client and the station Wi-Fi link.
//!
//! Every request opens a fresh connection; the previous one is dropped first.
//! That keeps a partly read response from poisoning the next request.

use core::fmt::Write as _;
use std::time::Duration;

use anyhow::anyhow;
use embedded_svc::http::client::{Client, Response};
use embedded_svc::http::{Headers, Status};
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};

use autoattend::transport::{FirmwareStream, HttpResponse, Transport};

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

pub struct EspTransport {
    wifi: BlockingWifi<EspWifi<'static>>,
    client: Option<Client<EspHttpConnection>>,
}

impl EspTransport {
    pub fn new(wifi: BlockingWifi<EspWifi<'static>>) -> Self {
        Self { wifi, client: None }
    }

    /// Try to bring the station link back up if it dropped.
    pub fn ensure_connected(&mut self) {
        if self.is_connected() {
            return;
        }
        log::warn!("Wi-Fi disconnected, reconnecting");
        match self.wifi.connect().and_then(|_| self.wifi.wait_netif_up()) {
            Ok(()) => log::info!("Wi-Fi reconnected"),
            Err(e) => log::warn!("Wi-Fi reconnect failed: {:?}", e),
        }
    }

    fn fresh_client(&mut self) -> anyhow::Result<&mut Client<EspHttpConnection>> {
        self.client = None;
        let connection = EspHttpConnection::new(&Configuration {
            timeout: Some(HTTP_TIMEOUT),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        })?;
        Ok(self.client.insert(Client::wrap(connection)))
    }
}

/// Read the body into `buf` until it is full or the body ends.
fn read_body<R: Read>(response: &mut R, buf: &mut [u8]) -> anyhow::Result<usize> {
    let mut len = 0;
    while len < buf.len() {
        let n = response
            .read(&mut buf[len..])
            .map_err(|e| anyhow!("{e:?}"))?;
        if n == 0 {
            break;
        }
        len += n;
    }
    Ok(len)
}

impl Transport for EspTransport {
    type Error = anyhow::Error;
    type Download<'a> = EspDownload<'a>;

    fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    fn post_json(
        &mut self,
        url: &str,
        body: &[u8],
        response: &mut [u8],
    ) -> anyhow::Result<HttpResponse> {
        let mut content_length = heapless::String::<10>::new();
        let _ = write!(content_length, "{}", body.len());
        let headers = [
            ("Content-Type", "application/json"),
            ("Content-Length", content_length.as_str()),
        ];

        let client = self.fresh_client()?;
        let mut request = client
            .post(url, &headers)
            .map_err(|e| anyhow!("{e:?}"))?;
        request.write_all(body).map_err(|e| anyhow!("{e:?}"))?;
        request.flush().map_err(|e| anyhow!("{e:?}"))?;
        let mut reply = request.submit().map_err(|e| anyhow!("{e:?}"))?;

        let status = reply.status();
        let len = read_body(&mut reply, response)?;
        Ok(HttpResponse { status, len })
    }

    fn get(&mut self, url: &str, response: &mut [u8]) -> anyhow::Result<HttpResponse> {
        let client = self.fresh_client()?;
        let request = client.get(url).map_err(|e| anyhow!("{e:?}"))?;
        let mut reply = request.submit().map_err(|e| anyhow!("{e:?}"))?;

        let status = reply.status();
        let len = read_body(&mut reply, response)?;
        Ok(HttpResponse { status, len })
    }

    fn download(&mut self, url: &str) -> anyhow::Result<EspDownload<'_>> {
        let client = self.fresh_client()?;
        let request = client.get(url).map_err(|e| anyhow!("{e:?}"))?;
        let response = request.submit().map_err(|e| anyhow!("{e:?}"))?;
        Ok(EspDownload { response })
    }
}

/// Streamed firmware response
pub struct EspDownload<'a> {
    response: Response<&'a mut EspHttpConnection>,
}

impl FirmwareStream for EspDownload<'_> {
    type Error = anyhow::Error;

    fn status(&self) -> u16 {
        self.response.status()
    }

    fn content_length(&self) -> Option<u64> {
        self.response.content_len()
    }

    fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        self.response.read(buf).map_err(|e| anyhow!("{e:?}"))
    }
}
