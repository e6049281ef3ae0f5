use std::{sync::Arc, thread, time::Duration};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_svc::{
    espnow::EspNow,
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    sys::{
        esp_wifi_get_mac, esp_wifi_get_mode, wifi_interface_t_WIFI_IF_STA, wifi_mode_t,
        wifi_mode_t_WIFI_MODE_AP, wifi_mode_t_WIFI_MODE_APSTA, wifi_mode_t_WIFI_MODE_NULL,
        wifi_mode_t_WIFI_MODE_STA, ESP_ERR_ESPNOW_EXIST, ESP_OK,
    },
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::Serialize;

use envmon_common::{
    apply_observation, build_report, format_mac, parse_observation, FrameReceiver, IngestAck,
    IngestError, IngestErrorBody, PeerLink, PeerTransport, RadioMode, ReadingCache, ReadingSource,
    StationConfig, TransportError, TransportInitError,
};

const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;

const STATION_PAGE_HTML: &str = include_str!("../web/temperature.html");

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut config = StationConfig::default();
    config.http_port = 80;
    config.sanitize();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, .. } = Peripherals::take()?;

    let _wifi = connect_wifi(modem, sys_loop, nvs_partition).context("wifi startup failed")?;

    let wireless_cache = Arc::new(ReadingCache::new(
        ReadingSource::Wireless,
        config.freshness_window_ms,
    ));
    let http_cache = Arc::new(ReadingCache::new(
        ReadingSource::Http,
        config.freshness_window_ms,
    ));

    // Bounded settle window before the transport touches the radio.
    thread::sleep(Duration::from_millis(config.radio_settle_delay_ms));

    // No channel pinning: the link rides whatever channel the station is
    // already on, so the peer keeps working next to the router.
    let mut link = PeerLink::new(EspNowTransport::new());
    match link.bring_up(Arc::new(FrameReceiver::new(wireless_cache.clone()))) {
        Ok(()) => {
            let station = link
                .station_mac()
                .map(|mac| format_mac(&mac))
                .unwrap_or_else(|| "<unknown>".to_string());
            info!("peer link active (station {station}); waiting for peer frames");
        }
        Err(err) => warn!("peer link disabled: {err}"),
    }

    let _server = create_http_server(wireless_cache, http_cache, Arc::new(config))?;

    // Link and server stay alive for the life of the process.
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
) -> anyhow::Result<EspWifi<'static>> {
    let ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME");
    let pass = option_env!("WIFI_PASS").unwrap_or("");

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: pass
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{ssid}`");

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
        match wifi.connect() {
            Ok(()) => match wifi.wait_netif_up() {
                Ok(()) => {
                    info!("wifi connected and netif up on attempt {attempt}");
                    last_err = None;
                    break;
                }
                Err(err) => {
                    warn!("wifi netif up failed on attempt {attempt}: {err:#}");
                    last_err = Some(err);
                }
            },
            Err(err) => {
                warn!("wifi connect failed on attempt {attempt}: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    match last_err {
        None => Ok(esp_wifi),
        Some(err) => Err(anyhow!(
            "all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed; last error: {err}"
        )),
    }
}

/// ESP-NOW bound to the already-running wifi driver.
struct EspNowTransport {
    espnow: Option<EspNow<'static>>,
}

impl EspNowTransport {
    fn new() -> Self {
        Self { espnow: None }
    }
}

impl PeerTransport for EspNowTransport {
    fn radio_mode(&mut self) -> Result<RadioMode, TransportError> {
        let mut mode: wifi_mode_t = wifi_mode_t_WIFI_MODE_NULL;
        let err = unsafe { esp_wifi_get_mode(&mut mode) };
        if err != ESP_OK {
            return Err(TransportError(format!("esp_wifi_get_mode failed: {err}")));
        }

        Ok(match mode {
            m if m == wifi_mode_t_WIFI_MODE_STA => RadioMode::Station,
            m if m == wifi_mode_t_WIFI_MODE_AP => RadioMode::AccessPoint,
            m if m == wifi_mode_t_WIFI_MODE_APSTA => RadioMode::Mixed,
            _ => RadioMode::Off,
        })
    }

    fn station_mac(&mut self) -> Result<[u8; 6], TransportError> {
        let mut mac = [0_u8; 6];
        let err = unsafe { esp_wifi_get_mac(wifi_interface_t_WIFI_IF_STA, mac.as_mut_ptr()) };
        if err != ESP_OK {
            return Err(TransportError(format!("esp_wifi_get_mac failed: {err}")));
        }
        Ok(mac)
    }

    fn init(&mut self) -> Result<(), TransportInitError> {
        if self.espnow.is_some() {
            return Err(TransportInitError::AlreadyActive);
        }

        match EspNow::take() {
            Ok(espnow) => {
                self.espnow = Some(espnow);
                Ok(())
            }
            Err(err) if err.code() == ESP_ERR_ESPNOW_EXIST as i32 => {
                Err(TransportInitError::AlreadyActive)
            }
            Err(err) => Err(TransportInitError::Other(err.to_string())),
        }
    }

    fn deinit(&mut self) -> Result<(), TransportError> {
        // Dropping the handle deinitializes the underlying driver.
        self.espnow = None;
        Ok(())
    }

    fn register_receiver(&mut self, receiver: Arc<FrameReceiver>) -> Result<(), TransportError> {
        let espnow = self
            .espnow
            .as_ref()
            .ok_or_else(|| TransportError("transport not initialized".to_string()))?;

        espnow
            .register_recv_cb(move |mac: &[u8], payload: &[u8]| {
                match receiver.handle_frame(payload, monotonic_ms()) {
                    Ok(frame) => info!(
                        "peer frame from {}: {:.2}°C / {:.2}%",
                        format_mac(mac),
                        frame.temperature,
                        frame.humidity
                    ),
                    Err(err) => {
                        warn!("discarding peer frame from {}: {err}", format_mac(mac));
                    }
                }
            })
            .map_err(|err| TransportError(err.to_string()))
    }
}

fn create_http_server(
    wireless_cache: Arc<ReadingCache>,
    http_cache: Arc<ReadingCache>,
    config: Arc<StationConfig>,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    for path in ["/", "/temperature"] {
        server.fn_handler::<anyhow::Error, _>(path, Method::Get, move |req| {
            req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
                .write_all(STATION_PAGE_HTML.as_bytes())?;
            Ok(())
        })?;
    }

    {
        let wireless_cache = wireless_cache.clone();
        let http_cache = http_cache.clone();
        server.fn_handler("/api/temperature", Method::Get, move |req| {
            let report = build_report(&wireless_cache, &http_cache, monotonic_ms());
            write_json(req, &report)
        })?;
    }

    {
        let cache = http_cache.clone();
        let config = config.clone();
        server.fn_handler::<anyhow::Error, _>("/api/temperature", Method::Post, move |mut req| {
            let body = match read_ingest_body(&mut req, config.max_ingest_body_bytes) {
                Ok(body) => body,
                Err(err) => {
                    warn!("rejecting ingest body: {err}");
                    return write_text(req, 400, &err.to_string());
                }
            };

            let text = String::from_utf8_lossy(&body);
            let observation = parse_observation(&text);
            match apply_observation(
                &cache,
                observation,
                config.partial_update_policy,
                monotonic_ms(),
            ) {
                Ok(()) => {
                    info!(
                        "http ingest committed: temperature={:?} humidity={:?}",
                        observation.temperature, observation.humidity
                    );
                    write_json(req, &IngestAck::ok())
                }
                Err(err) => {
                    warn!("unparsable ingest body ({} bytes)", body.len());
                    write_json_status(req, 400, &IngestErrorBody::new(err.to_string()))
                }
            }
        })?;
    }

    Ok(server)
}

fn read_ingest_body(
    req: &mut esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    limit: usize,
) -> Result<Vec<u8>, IngestError> {
    let declared = req.content_len().unwrap_or(0) as usize;
    if declared > limit {
        return Err(IngestError::BodyTooLarge { declared, limit });
    }
    if declared == 0 {
        return Err(IngestError::BodyUnreadable);
    }

    // A single read may legitimately yield fewer bytes than declared;
    // whatever arrived gets parsed.
    let mut body = vec![0_u8; declared];
    let read = req
        .read(&mut body)
        .map_err(|_| IngestError::BodyUnreadable)?;
    if read == 0 {
        return Err(IngestError::BodyUnreadable);
    }
    body.truncate(read);
    Ok(body)
}

fn write_json<T: Serialize>(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_json_status<T: Serialize>(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_text(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "text/plain; charset=utf-8")],
    )?
    .write_all(message.as_bytes())?;
    Ok(())
}

fn monotonic_ms() -> u64 {
    // esp timer ticks in microseconds since boot.
    (unsafe { esp_idf_svc::sys::esp_timer_get_time() } / 1_000) as u64
}
