//! Platform transport built on bluest
//! Each request spawns a task that performs the radio operation and reports
//! its outcome as a [`TransportEvent`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow};
use bluest::{Adapter, AdapterEvent, Characteristic, ConnectionEvent, Device, Service};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::constants::UNKNOWN_DEVICE_NAME;
use crate::core::bluetooth::scanner::extract_mac_address;
use crate::core::bluetooth::transport::{BleTransport, TransportEvent};
use crate::core::bluetooth::types::{
    BluetoothDevice, DiscoveredCharacteristic, PlatformHandle, RadioState,
};

type CharKey = (String, Uuid);

/// Link polling period when the platform has no connection event stream.
const LINK_POLL_INTERVAL: Duration = Duration::from_secs(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
struct EventSink(mpsc::UnboundedSender<TransportEvent>);

impl EventSink {
    fn send(&self, event: TransportEvent) {
        if self.0.send(event).is_err() {
            debug!("Transport event dropped, manager has stopped");
        }
    }
}

/// A queued write; `target` is the characteristic to write to.
struct WriteJob<C> {
    device_id: String,
    characteristic: Uuid,
    target: C,
    data: Vec<u8>,
    with_response: bool,
}

/// Performs queued writes one at a time, so write results are reported in
/// the order the writes were issued.
async fn write_loop<C, F, Fut>(
    mut jobs: mpsc::UnboundedReceiver<WriteJob<C>>,
    events: EventSink,
    mut write: F,
) where
    F: FnMut(C, Vec<u8>, bool) -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    while let Some(job) = jobs.recv().await {
        let result = write(job.target, job.data, job.with_response).await;
        events.send(TransportEvent::WriteResult {
            device_id: job.device_id,
            characteristic: job.characteristic,
            result,
        });
    }
    debug!("Write queue closed");
}

async fn write_characteristic(
    characteristic: Characteristic,
    data: Vec<u8>,
    with_response: bool,
) -> Result<(), String> {
    let result = if with_response {
        characteristic.write(&data).await
    } else {
        characteristic.write_without_response(&data).await
    };
    result.map_err(|e| e.to_string())
}

pub struct BluestTransport {
    adapter: Adapter,
    events: EventSink,
    writes: mpsc::UnboundedSender<WriteJob<Characteristic>>,
    devices: Arc<Mutex<HashMap<String, Device>>>,
    services: Arc<Mutex<HashMap<CharKey, Service>>>,
    characteristics: Arc<Mutex<HashMap<CharKey, Characteristic>>>,
    next_handle: Arc<AtomicU64>,
    scan_token: Mutex<Option<CancellationToken>>,
    link_tokens: Mutex<HashMap<String, CancellationToken>>,
    notify_tokens: Mutex<HashMap<CharKey, CancellationToken>>,
}

impl BluestTransport {
    /// Opens the default adapter and starts reporting its power state.
    pub async fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        let events = EventSink(events);

        tokio::spawn(Self::watch_adapter(adapter.clone(), events.clone()));
        let (writes, write_jobs) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(write_jobs, events.clone(), write_characteristic));

        Ok(Self {
            adapter,
            events,
            writes,
            devices: Arc::new(Mutex::new(HashMap::new())),
            services: Arc::new(Mutex::new(HashMap::new())),
            characteristics: Arc::new(Mutex::new(HashMap::new())),
            next_handle: Arc::new(AtomicU64::new(1)),
            scan_token: Mutex::new(None),
            link_tokens: Mutex::new(HashMap::new()),
            notify_tokens: Mutex::new(HashMap::new()),
        })
    }

    async fn watch_adapter(adapter: Adapter, events: EventSink) {
        if let Err(e) = adapter.wait_available().await {
            error!("Bluetooth adapter never became available: {}", e);
            events.send(TransportEvent::RadioStateChanged(RadioState::Unsupported));
            return;
        }
        info!("Bluetooth adapter is available.");
        events.send(TransportEvent::RadioStateChanged(RadioState::PoweredOn));

        let mut adapter_events = match adapter.events().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Adapter state events unavailable: {}", e);
                return;
            }
        };
        while let Some(event) = adapter_events.next().await {
            match event {
                Ok(AdapterEvent::Available) => {
                    events.send(TransportEvent::RadioStateChanged(RadioState::PoweredOn))
                }
                Ok(AdapterEvent::Unavailable) => {
                    events.send(TransportEvent::RadioStateChanged(RadioState::PoweredOff))
                }
                Err(e) => {
                    error!("Error in adapter event stream: {}", e);
                    events.send(TransportEvent::RadioStateChanged(RadioState::Unknown));
                }
            }
        }
        info!("Adapter event stream ended");
    }

    fn device(&self, device_id: &str) -> Result<Device> {
        lock(&self.devices)
            .get(device_id)
            .cloned()
            .ok_or_else(|| anyhow!("Device not found with ID: {}", device_id))
    }

    fn characteristic(&self, device_id: &str, uuid: Uuid) -> Result<Characteristic> {
        lock(&self.characteristics)
            .get(&(device_id.to_string(), uuid))
            .cloned()
            .ok_or_else(|| anyhow!("Characteristic {} not discovered on {}", uuid, device_id))
    }

    async fn scan_task(
        adapter: Adapter,
        service_filter: Uuid,
        devices: Arc<Mutex<HashMap<String, Device>>>,
        events: EventSink,
        cancel_token: CancellationToken,
    ) {
        let filter = [service_filter];
        let mut scan_stream = match adapter.scan(&filter).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to start scan: {}", e);
                events.send(TransportEvent::ScanFailed {
                    error: e.to_string(),
                });
                return;
            }
        };

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    let Some(discovered) = result else {
                        info!("Bluetooth scan stream has ended.");
                        events.send(TransportEvent::ScanFailed {
                            error: "scan stream ended".to_string(),
                        });
                        break;
                    };
                    let device = discovered.device;
                    let id = device.id().to_string();
                    let name = discovered
                        .adv_data
                        .local_name
                        .clone()
                        .or_else(|| device.name().ok());
                    let address = extract_mac_address(&id).unwrap_or_else(|| "N/A".to_string());
                    debug!(
                        "Found device - ID: {}, Name: {}, RSSI: {:?}",
                        id,
                        name.as_deref().unwrap_or(UNKNOWN_DEVICE_NAME),
                        discovered.rssi
                    );

                    lock(&devices).insert(id.clone(), device);
                    events.send(TransportEvent::DeviceDiscovered(BluetoothDevice::new(
                        id,
                        name,
                        address,
                        discovered.rssi,
                    )));
                }
                _ = cancel_token.cancelled() => break,
            }
        }
        info!("Scan task finished.");
    }

    async fn link_task(adapter: Adapter, device: Device, events: EventSink, cancel_token: CancellationToken) {
        let device_id = device.id().to_string();
        let mut connection_events = match adapter.device_connection_events(&device).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    "Connection events unavailable for {}, polling instead: {}",
                    device_id, e
                );
                Self::poll_link(device.clone(), events, cancel_token).await;
                return;
            }
        };

        loop {
            tokio::select! {
                event = connection_events.next() => match event {
                    Some(ConnectionEvent::Disconnected) | None => {
                        events.send(TransportEvent::Disconnected {
                            device_id: device_id.clone(),
                            error: None,
                        });
                        break;
                    }
                    Some(ConnectionEvent::Connected) => {}
                },
                _ = cancel_token.cancelled() => break,
            }
        }
    }

    async fn poll_link(device: Device, events: EventSink, cancel_token: CancellationToken) {
        let mut interval = tokio::time::interval(LINK_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !device.is_connected().await {
                        events.send(TransportEvent::Disconnected {
                            device_id: device.id().to_string(),
                            error: None,
                        });
                        break;
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    }

    async fn notify_task(
        device_id: String,
        characteristic: Characteristic,
        events: EventSink,
        cancel_token: CancellationToken,
    ) {
        let uuid = characteristic.uuid();
        let mut notification_stream = match characteristic.notify().await {
            Ok(stream) => {
                events.send(TransportEvent::NotifyStateChanged {
                    device_id: device_id.clone(),
                    characteristic: uuid,
                    result: Ok(true),
                });
                stream
            }
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                events.send(TransportEvent::NotifyStateChanged {
                    device_id,
                    characteristic: uuid,
                    result: Err(e.to_string()),
                });
                return;
            }
        };

        info!("Listening for notifications from {}...", uuid);
        loop {
            tokio::select! {
                result = notification_stream.next() => match result {
                    Some(Ok(value)) => events.send(TransportEvent::ValueUpdated {
                        device_id: device_id.clone(),
                        characteristic: uuid,
                        result: Ok(value),
                    }),
                    Some(Err(e)) => {
                        error!("Error in notification stream: {}", e);
                        events.send(TransportEvent::ValueUpdated {
                            device_id: device_id.clone(),
                            characteristic: uuid,
                            result: Err(e.to_string()),
                        });
                        break;
                    }
                    None => break,
                },
                _ = cancel_token.cancelled() => break,
            }
        }
        info!("Notification stream for {} ended", uuid);
    }
}

#[async_trait::async_trait]
impl BleTransport for BluestTransport {
    async fn start_scan(&self, service_filter: Uuid) -> Result<()> {
        let cancel_token = CancellationToken::new();
        if let Some(previous) = lock(&self.scan_token).replace(cancel_token.clone()) {
            previous.cancel();
        }
        // Devices from earlier scans are only kept while linked.
        {
            let linked = lock(&self.link_tokens);
            lock(&self.devices).retain(|id, _| linked.contains_key(id));
        }

        tokio::spawn(Self::scan_task(
            self.adapter.clone(),
            service_filter,
            self.devices.clone(),
            self.events.clone(),
            cancel_token,
        ));
        info!("Device scan task started.");
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        info!("Stopping Bluetooth scan.");
        if let Some(token) = lock(&self.scan_token).take() {
            token.cancel();
        }
        Ok(())
    }

    async fn connect(&self, device_id: &str) -> Result<()> {
        let device = self.device(device_id)?;
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let cancel_token = CancellationToken::new();
        if let Some(previous) = lock(&self.link_tokens).insert(device_id.to_string(), cancel_token.clone()) {
            previous.cancel();
        }
        let device_id = device_id.to_string();

        tokio::spawn(async move {
            info!("Initiating connection to {}...", device_id);
            if !device.is_connected().await {
                if let Err(e) = adapter.connect_device(&device).await {
                    events.send(TransportEvent::ConnectFailed {
                        device_id,
                        error: e.to_string(),
                    });
                    return;
                }
            }
            events.send(TransportEvent::Connected {
                device_id: device_id.clone(),
            });
            Self::link_task(adapter, device, events, cancel_token).await;
        });
        Ok(())
    }

    async fn cancel_connection(&self, device_id: &str) -> Result<()> {
        if let Some(token) = lock(&self.link_tokens).remove(device_id) {
            token.cancel();
        }
        lock(&self.notify_tokens).retain(|(id, _), token| {
            if id == device_id {
                token.cancel();
                false
            } else {
                true
            }
        });
        lock(&self.characteristics).retain(|(id, _), _| id != device_id);
        lock(&self.services).retain(|(id, _), _| id != device_id);

        let device = lock(&self.devices)
            .remove(device_id)
            .ok_or_else(|| anyhow!("Device not found with ID: {}", device_id))?;
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if device.is_connected().await {
                info!("Disconnecting from device {}", device.id());
                if let Err(e) = adapter.disconnect_device(&device).await {
                    warn!("Failed to disconnect {}: {}", device.id(), e);
                }
            } else {
                info!("Device {} not connected", device.id());
            }
        });
        Ok(())
    }

    async fn discover_services(&self, device_id: &str, filter: Uuid) -> Result<()> {
        let device = self.device(device_id)?;
        let services = self.services.clone();
        let events = self.events.clone();
        let device_id = device_id.to_string();

        tokio::spawn(async move {
            let result = match device.discover_services_with_uuid(filter).await {
                Ok(found) => {
                    let mut known = lock(&services);
                    let uuids = found
                        .into_iter()
                        .map(|service| {
                            let uuid = service.uuid();
                            known.insert((device_id.clone(), uuid), service);
                            uuid
                        })
                        .collect();
                    Ok(uuids)
                }
                Err(e) => Err(e.to_string()),
            };
            events.send(TransportEvent::ServicesDiscovered { device_id, result });
        });
        Ok(())
    }

    async fn discover_characteristics(&self, device_id: &str, service: Uuid) -> Result<()> {
        let key = (device_id.to_string(), service);
        let gatt_service = lock(&self.services)
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow!("Service {} not discovered on {}", service, device_id))?;
        let characteristics = self.characteristics.clone();
        let next_handle = self.next_handle.clone();
        let events = self.events.clone();
        let device_id = device_id.to_string();

        tokio::spawn(async move {
            let result = match gatt_service.discover_characteristics().await {
                Ok(found) => {
                    let mut known = lock(&characteristics);
                    let discovered = found
                        .into_iter()
                        .map(|characteristic| {
                            let uuid = characteristic.uuid();
                            debug!("Discovered characteristic: {}", uuid);
                            known.insert((device_id.clone(), uuid), characteristic);
                            DiscoveredCharacteristic {
                                uuid,
                                handle: PlatformHandle(next_handle.fetch_add(1, Ordering::Relaxed)),
                            }
                        })
                        .collect();
                    Ok(discovered)
                }
                Err(e) => Err(e.to_string()),
            };
            events.send(TransportEvent::CharacteristicsDiscovered {
                device_id,
                service,
                result,
            });
        });
        Ok(())
    }

    async fn set_notify(&self, device_id: &str, characteristic: Uuid, enabled: bool) -> Result<()> {
        let key = (device_id.to_string(), characteristic);
        if let Some(previous) = lock(&self.notify_tokens).remove(&key) {
            previous.cancel();
        }

        if !enabled {
            self.events.send(TransportEvent::NotifyStateChanged {
                device_id: device_id.to_string(),
                characteristic,
                result: Ok(false),
            });
            return Ok(());
        }

        let gatt_characteristic = self.characteristic(device_id, characteristic)?;
        let cancel_token = CancellationToken::new();
        lock(&self.notify_tokens).insert(key, cancel_token.clone());
        tokio::spawn(Self::notify_task(
            device_id.to_string(),
            gatt_characteristic,
            self.events.clone(),
            cancel_token,
        ));
        Ok(())
    }

    async fn read_value(&self, device_id: &str, characteristic: Uuid) -> Result<()> {
        let gatt_characteristic = self.characteristic(device_id, characteristic)?;
        let events = self.events.clone();
        let device_id = device_id.to_string();

        tokio::spawn(async move {
            let result = gatt_characteristic.read().await.map_err(|e| e.to_string());
            events.send(TransportEvent::ValueUpdated {
                device_id,
                characteristic,
                result,
            });
        });
        Ok(())
    }

    async fn write_value(
        &self,
        device_id: &str,
        characteristic: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<()> {
        let target = self.characteristic(device_id, characteristic)?;
        self.writes
            .send(WriteJob {
                device_id: device_id.to_string(),
                characteristic,
                target,
                data: data.to_vec(),
                with_response,
            })
            .map_err(|_| anyhow!("Write queue has stopped"))
    }
}
