//! Bluetooth manager for the Camera Node Bridge
//! This module owns the connection state machine: it consumes transport
//! events and user requests one at a time and drives the radio through
//! scan, connect, discovery, subscription and teardown.

use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::bluetooth_config::BluetoothConfig;
use crate::core::bluetooth::commands::CommandDispatcher;
use crate::core::bluetooth::connection::Connection;
use crate::core::bluetooth::constants::{
    REQUEST_CHANNEL_CAPACITY, STATUS_CONNECT_FAILED, STATUS_DISCONNECTED, STATUS_SCAN_FAILED,
    STATUS_SCANNING, UUID_CAMERA_SERVICE,
};
use crate::core::bluetooth::error::{BluetoothError, BluetoothResult, Operation};
use crate::core::bluetooth::notification::MessageRouter;
use crate::core::bluetooth::observer::{BridgeEvent, EventEmitter};
use crate::core::bluetooth::registry::{
    CharacteristicRegistry, read_on_connect, role_for_uuid, subscription_required,
};
use crate::core::bluetooth::scanner::{DeviceList, Discovery};
use crate::core::bluetooth::transport::{BleTransport, TransportEvent};
use crate::core::bluetooth::types::{
    BluetoothDevice, CharacteristicHandle, ConnectionState, DiscoveredCharacteristic,
    InboundMessage, OutboundCommand, RadioState, SubscriptionState,
};

/// Point-in-time view of the manager for newly attached observers.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub radio: RadioState,
    pub state: ConnectionState,
    pub status: String,
    pub scanning: bool,
    pub connected_device: Option<BluetoothDevice>,
    pub devices: Vec<BluetoothDevice>,
    pub characteristics: Vec<CharacteristicHandle>,
    pub messages: Vec<InboundMessage>,
}

/// Requests serialized onto the manager task.
pub enum ManagerRequest {
    StartScan(oneshot::Sender<BluetoothResult<()>>),
    StopScan(oneshot::Sender<BluetoothResult<()>>),
    Connect(String, oneshot::Sender<BluetoothResult<()>>),
    Disconnect(oneshot::Sender<BluetoothResult<()>>),
    SendCommand(String, oneshot::Sender<BluetoothResult<OutboundCommand>>),
    Snapshot(oneshot::Sender<ManagerSnapshot>),
}

/// Manages Bluetooth operations
pub struct BluetoothManager {
    transport: Arc<dyn BleTransport>,
    config: BluetoothConfig,
    radio: RadioState,
    /// Scanning was asked for and should resume on power-on
    scan_requested: bool,
    scanning: bool,
    state: ConnectionState,
    status: String,
    devices: DeviceList,
    connection: Option<Connection>,
    registry: CharacteristicRegistry,
    router: MessageRouter,
    dispatcher: CommandDispatcher,
    emitter: EventEmitter,
}

impl BluetoothManager {
    /// Creates a new BluetoothManager
    pub fn new(
        transport: Arc<dyn BleTransport>,
        config: BluetoothConfig,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            transport,
            devices: DeviceList::new(config.min_rssi),
            config,
            radio: RadioState::Unknown,
            scan_requested: false,
            scanning: false,
            state: ConnectionState::Idle,
            status: STATUS_DISCONNECTED.to_string(),
            connection: None,
            registry: CharacteristicRegistry::new(),
            router: MessageRouter::new(emitter.clone()),
            dispatcher: CommandDispatcher::new(emitter.clone()),
            emitter,
        }
    }

    /// Moves the manager onto its own task and returns a handle to it.
    pub fn spawn(
        self,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> (BluetoothHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let handle = BluetoothHandle {
            tx,
            emitter: self.emitter.clone(),
        };
        let task = tokio::spawn(self.run(events, rx));
        (handle, task)
    }

    /// Single execution context for all state mutation.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut requests: mpsc::Receiver<ManagerRequest>,
    ) {
        info!("Bluetooth manager started.");
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                Some(event) = events.recv() => self.handle_event(event).await,
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => {
                        info!("All handles dropped, stopping Bluetooth manager.");
                        break;
                    }
                },
                _ = sleep_until(deadline) => self.check_timeouts(Instant::now()).await,
            }
        }
    }

    async fn handle_request(&mut self, request: ManagerRequest) {
        // A dropped reply receiver only means the caller stopped waiting.
        match request {
            ManagerRequest::StartScan(reply) => {
                let _ = reply.send(self.start_scan().await);
            }
            ManagerRequest::StopScan(reply) => {
                let _ = reply.send(self.stop_scan().await);
            }
            ManagerRequest::Connect(device_id, reply) => {
                let _ = reply.send(self.connect(&device_id).await);
            }
            ManagerRequest::Disconnect(reply) => {
                let _ = reply.send(self.disconnect().await);
            }
            ManagerRequest::SendCommand(payload, reply) => {
                let _ = reply.send(self.send_command(&payload).await);
            }
            ManagerRequest::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready && self.connection.is_some()
    }

    pub fn registry(&self) -> &CharacteristicRegistry {
        &self.registry
    }

    pub fn devices(&self) -> &[BluetoothDevice] {
        self.devices.devices()
    }

    pub fn messages(&self) -> &[InboundMessage] {
        self.router.messages()
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            radio: self.radio,
            state: self.state,
            status: self.status.clone(),
            scanning: self.scanning,
            connected_device: self.connection.as_ref().map(|c| c.device.clone()),
            devices: self.devices.devices().to_vec(),
            characteristics: self.registry.resolved().copied().collect(),
            messages: self.router.messages().to_vec(),
        }
    }

    /// Deadline of the outstanding pre-ready operation, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.state.is_pre_ready() {
            return None;
        }
        self.connection.as_ref().and_then(Connection::deadline)
    }

    // ---- user requests ----------------------------------------------------

    /// Starts filtering for the camera service.
    pub async fn start_scan(&mut self) -> BluetoothResult<()> {
        self.scan_requested = true;
        if !self.radio.is_powered_on() {
            warn!("Cannot scan, Bluetooth radio state is {:?}", self.radio);
            self.set_status(self.radio.status_text());
            return Err(BluetoothError::RadioUnavailable(self.radio));
        }
        self.begin_scan().await
    }

    async fn begin_scan(&mut self) -> BluetoothResult<()> {
        info!("Starting scan for service: {}", UUID_CAMERA_SERVICE);
        self.transport
            .start_scan(UUID_CAMERA_SERVICE)
            .await
            .map_err(|e| BluetoothError::Transport(e.to_string()))?;
        self.scanning = true;
        if self.connection.is_none() {
            self.set_state(ConnectionState::Scanning);
            self.set_status(STATUS_SCANNING);
        }
        Ok(())
    }

    pub async fn stop_scan(&mut self) -> BluetoothResult<()> {
        self.scan_requested = false;
        self.halt_scan().await;
        if self.connection.is_none() {
            self.set_state(ConnectionState::Idle);
            self.set_status(STATUS_DISCONNECTED);
        }
        Ok(())
    }

    async fn halt_scan(&mut self) {
        if !self.scanning {
            return;
        }
        if let Err(e) = self.transport.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        self.scanning = false;
        info!("Stopped scanning.");
    }

    /// Connects to a known device, tearing down any existing connection first.
    pub async fn connect(&mut self, device_id: &str) -> BluetoothResult<()> {
        let device = self
            .devices
            .get(device_id)
            .cloned()
            .ok_or_else(|| BluetoothError::UnknownDevice(device_id.to_string()))?;

        self.scan_requested = false;
        self.halt_scan().await;

        if let Some(previous) = self.connection.as_ref() {
            let previous_id = previous.device_id().to_string();
            info!(
                "Tearing down connection to {} before connecting to {}",
                previous_id, device_id
            );
            self.set_state(ConnectionState::Disconnecting);
            if let Err(e) = self.transport.cancel_connection(&previous_id).await {
                warn!("Failed to cancel connection to {}: {}", previous_id, e);
            }
            self.teardown();
        }

        let mut connection = Connection::new(device);
        info!(
            "Connecting to {} ({})...",
            connection.display_name(),
            device_id
        );
        connection.begin(Operation::Connect, self.config.operation_timeout());
        let status = format!("Connecting to {}...", connection.display_name());
        self.connection = Some(connection);
        self.set_state(ConnectionState::Connecting);
        self.set_status(&status);

        if let Err(e) = self.transport.connect(device_id).await {
            self.fail(BluetoothError::ConnectFailed(e.to_string()), false)
                .await;
            return Err(BluetoothError::ConnectFailed(e.to_string()));
        }
        Ok(())
    }

    /// Disconnects and clears all connection state.
    pub async fn disconnect(&mut self) -> BluetoothResult<()> {
        if let Some(connection) = self.connection.as_ref() {
            let device_id = connection.device_id().to_string();
            self.set_state(ConnectionState::Disconnecting);
            if let Err(e) = self.transport.cancel_connection(&device_id).await {
                warn!("Failed to cancel connection to {}: {}", device_id, e);
            }
            info!("Disconnected from device {}.", device_id);
        }
        self.teardown();
        self.set_status(STATUS_DISCONNECTED);
        self.settle();
        Ok(())
    }

    pub async fn send_command(&mut self, payload: &str) -> BluetoothResult<OutboundCommand> {
        let ready_device = match (&self.connection, self.state) {
            (Some(connection), ConnectionState::Ready) => Some(connection.device_id().to_string()),
            _ => None,
        };
        self.dispatcher
            .send(
                self.transport.as_ref(),
                ready_device.as_deref(),
                &self.registry,
                payload,
            )
            .await
    }

    // ---- transport events -------------------------------------------------

    pub async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::RadioStateChanged(state) => self.on_radio_state(state).await,
            TransportEvent::DeviceDiscovered(device) => self.on_device_discovered(device),
            TransportEvent::ScanFailed { error } => self.on_scan_failed(&error),
            TransportEvent::Connected { device_id } => self.on_connected(&device_id).await,
            TransportEvent::ConnectFailed { device_id, error } => {
                if self.is_current(&device_id) && self.state == ConnectionState::Connecting {
                    self.fail(BluetoothError::ConnectFailed(error), false).await;
                } else {
                    debug!("Ignoring stale connect failure for {}", device_id);
                }
            }
            TransportEvent::Disconnected { device_id, error } => {
                self.on_disconnected(&device_id, error).await
            }
            TransportEvent::ServicesDiscovered { device_id, result } => {
                self.on_services_discovered(&device_id, result).await
            }
            TransportEvent::CharacteristicsDiscovered {
                device_id,
                service,
                result,
            } => {
                self.on_characteristics_discovered(&device_id, service, result)
                    .await
            }
            TransportEvent::NotifyStateChanged {
                device_id,
                characteristic,
                result,
            } => self.on_notify_state(&device_id, characteristic, result),
            TransportEvent::ValueUpdated {
                device_id,
                characteristic,
                result,
            } => {
                if !self.is_current(&device_id) {
                    debug!("Ignoring value from stale device {}", device_id);
                    return;
                }
                let Some(role) = role_for_uuid(characteristic) else {
                    debug!("Ignoring value from unknown characteristic {}", characteristic);
                    return;
                };
                if self.registry.lookup(role).is_none() {
                    debug!("Ignoring value for undiscovered role {}", role);
                    return;
                }
                self.router.route(role, characteristic, result);
            }
            TransportEvent::WriteResult {
                device_id,
                characteristic,
                result,
            } => {
                if self.is_current(&device_id) {
                    self.dispatcher.complete(characteristic, result);
                } else {
                    debug!("Ignoring write result from stale device {}", device_id);
                }
            }
        }
    }

    async fn on_radio_state(&mut self, radio: RadioState) {
        info!("Bluetooth radio state: {:?}", radio);
        self.radio = radio;

        if radio.is_powered_on() {
            if self.config.auto_scan_on_power_on || self.scan_requested {
                if let Err(e) = self.begin_scan().await {
                    error!("Failed to start scan after power-on: {}", e);
                }
            } else if self.connection.is_none() {
                self.set_status(STATUS_DISCONNECTED);
            }
            return;
        }

        self.scanning = false;
        if radio == RadioState::PoweredOff {
            if let Some(connection) = self.connection.as_ref() {
                let device_id = connection.device_id().to_string();
                warn!("Bluetooth powered off with an active connection to {}", device_id);
                self.set_state(ConnectionState::Disconnecting);
                if let Err(e) = self.transport.cancel_connection(&device_id).await {
                    warn!("Failed to cancel connection to {}: {}", device_id, e);
                }
                self.teardown();
            }
            self.clear_devices();
        }
        if self.connection.is_none() {
            self.set_state(ConnectionState::Idle);
        }
        self.set_status(radio.status_text());
    }

    fn on_device_discovered(&mut self, device: BluetoothDevice) {
        if !self.scanning {
            debug!("Ignoring discovery of {} while not scanning", device.id);
            return;
        }
        match self.devices.record(device) {
            Discovery::New | Discovery::Updated => self.emit_devices(),
            Discovery::Filtered => {}
        }
    }

    fn on_scan_failed(&mut self, error: &str) {
        if !self.scanning {
            debug!("Ignoring scan failure while not scanning: {}", error);
            return;
        }
        warn!("Scan failed: {}", error);
        self.scanning = false;
        if self.connection.is_none() {
            self.set_status(&format!("{}: {}", STATUS_SCAN_FAILED, error));
            self.settle();
        }
    }

    async fn on_connected(&mut self, device_id: &str) {
        if !self.is_current(device_id) || self.state != ConnectionState::Connecting {
            debug!("Ignoring stale connect completion for {}", device_id);
            return;
        }
        let timeout = self.config.operation_timeout();
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        connection.begin(Operation::DiscoverServices, timeout);
        let status = format!("Connected to {}", connection.display_name());
        info!("{}", status);
        self.set_status(&status);
        self.set_state(ConnectionState::DiscoveringServices);

        if let Err(e) = self
            .transport
            .discover_services(device_id, UUID_CAMERA_SERVICE)
            .await
        {
            self.fail(BluetoothError::ConnectFailed(e.to_string()), true)
                .await;
        }
    }

    async fn on_disconnected(&mut self, device_id: &str, error: Option<String>) {
        if !self.is_current(device_id) {
            debug!("Ignoring disconnect of stale device {}", device_id);
            return;
        }
        info!(
            "Disconnected from {}: {}",
            device_id,
            error.as_deref().unwrap_or("no error")
        );

        match self.state {
            ConnectionState::Connecting
            | ConnectionState::DiscoveringServices
            | ConnectionState::DiscoveringCharacteristics => {
                self.fail(BluetoothError::SpontaneousDisconnect, false).await;
            }
            _ => {
                self.set_state(ConnectionState::Disconnecting);
                self.teardown();
                self.set_status(STATUS_DISCONNECTED);
                self.settle();
            }
        }
    }

    async fn on_services_discovered(&mut self, device_id: &str, result: Result<Vec<uuid::Uuid>, String>) {
        if !self.is_current(device_id) || self.state != ConnectionState::DiscoveringServices {
            debug!("Ignoring stale service discovery for {}", device_id);
            return;
        }

        let services = match result {
            Ok(services) => services,
            Err(e) => {
                self.fail(BluetoothError::ConnectFailed(e), true).await;
                return;
            }
        };
        for service in &services {
            debug!("Discovered service: {}", service);
        }
        if !services.contains(&UUID_CAMERA_SERVICE) {
            self.fail(BluetoothError::ServiceNotFound(UUID_CAMERA_SERVICE), true)
                .await;
            return;
        }

        info!("Found camera service: {}", UUID_CAMERA_SERVICE);
        let timeout = self.config.operation_timeout();
        if let Some(connection) = self.connection.as_mut() {
            connection.begin(Operation::DiscoverCharacteristics, timeout);
        }
        self.set_state(ConnectionState::DiscoveringCharacteristics);

        if let Err(e) = self
            .transport
            .discover_characteristics(device_id, UUID_CAMERA_SERVICE)
            .await
        {
            self.fail(BluetoothError::ConnectFailed(e.to_string()), true)
                .await;
        }
    }

    async fn on_characteristics_discovered(
        &mut self,
        device_id: &str,
        service: uuid::Uuid,
        result: Result<Vec<DiscoveredCharacteristic>, String>,
    ) {
        if !self.is_current(device_id)
            || self.state != ConnectionState::DiscoveringCharacteristics
            || service != UUID_CAMERA_SERVICE
        {
            debug!("Ignoring stale characteristic discovery for {}", device_id);
            return;
        }

        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(e) => {
                self.fail(BluetoothError::ConnectFailed(e), true).await;
                return;
            }
        };

        for characteristic in characteristics {
            let Some(role) = role_for_uuid(characteristic.uuid) else {
                debug!("Ignoring unknown characteristic: {}", characteristic.uuid);
                continue;
            };
            // The registry is empty when discovery starts, so a hit here is
            // the peripheral advertising the same UUID twice.
            if let Some(existing) = self.registry.lookup(role) {
                warn!(
                    "Ignoring duplicate {} characteristic {} (already bound to {:?})",
                    role, characteristic.uuid, existing.handle
                );
                continue;
            }
            let handle = self.registry.resolve(role, characteristic.handle);
            info!("Found {} characteristic: {}", role, characteristic.uuid);

            if subscription_required(role) && handle.subscription == SubscriptionState::None {
                match self
                    .transport
                    .set_notify(device_id, characteristic.uuid, true)
                    .await
                {
                    Ok(()) => {
                        self.registry
                            .set_subscription(role, SubscriptionState::Subscribing);
                    }
                    Err(e) => {
                        warn!("Failed to subscribe to {}: {}", role, e);
                        self.emitter.emit(BridgeEvent::ChannelError {
                            role,
                            error: e.to_string(),
                        });
                    }
                }
            }
            if read_on_connect(role) {
                if let Err(e) = self.transport.read_value(device_id, characteristic.uuid).await {
                    warn!("Failed to read {}: {}", role, e);
                    self.emitter.emit(BridgeEvent::ChannelError {
                        role,
                        error: e.to_string(),
                    });
                }
            }
        }

        let timeout = self.config.operation_timeout();
        if let Some(connection) = self.connection.as_mut() {
            connection.begin(Operation::Subscribe, timeout);
        }
        self.set_state(ConnectionState::SubscriptionsPending);
        self.enter_ready_if_subscribed();
    }

    fn on_notify_state(
        &mut self,
        device_id: &str,
        characteristic: uuid::Uuid,
        result: Result<bool, String>,
    ) {
        if !self.is_current(device_id) {
            debug!("Ignoring notify state of stale device {}", device_id);
            return;
        }
        let Some(role) = role_for_uuid(characteristic) else {
            return;
        };
        let Some(handle) = self.registry.lookup(role) else {
            debug!("Ignoring notify state for undiscovered role {}", role);
            return;
        };
        if handle.subscription != SubscriptionState::Subscribing {
            debug!("No subscription outstanding for {}", role);
            return;
        }

        match result {
            Ok(true) => {
                info!("Subscribed to {} notifications", role);
                self.registry
                    .set_subscription(role, SubscriptionState::Subscribed);
            }
            Ok(false) => {
                warn!("Notifications for {} were not enabled", role);
                self.registry.set_subscription(role, SubscriptionState::None);
            }
            Err(e) => {
                warn!("Subscription to {} failed: {}", role, e);
                self.registry.set_subscription(role, SubscriptionState::None);
                self.emitter.emit(BridgeEvent::ChannelError { role, error: e });
            }
        }

        if self.state == ConnectionState::SubscriptionsPending {
            self.enter_ready_if_subscribed();
        }
    }

    fn enter_ready_if_subscribed(&mut self) {
        if self.registry.pending_subscriptions().next().is_some() {
            return;
        }
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        connection.finish();
        info!("Connection to {} is ready", connection.device_id());
        self.set_state(ConnectionState::Ready);
    }

    /// Fails the pending connection attempt after the operation timed out.
    pub async fn check_timeouts(&mut self, now: Instant) {
        if !self.state.is_pre_ready() {
            return;
        }
        if let Some(operation) = self.connection.as_ref().and_then(|c| c.expired(now)) {
            self.fail(BluetoothError::OperationTimedOut(operation), true)
                .await;
        }
    }

    // ---- teardown ---------------------------------------------------------

    /// Tears down a failed attempt, passing through `Failed`.
    async fn fail(&mut self, error: BluetoothError, cancel_link: bool) {
        let Some(connection) = self.connection.as_ref() else {
            return;
        };
        let device_id = connection.device_id().to_string();
        warn!(
            "Failed to connect to {} ({}): {}",
            connection.display_name(),
            device_id,
            error
        );

        if cancel_link {
            if let Err(e) = self.transport.cancel_connection(&device_id).await {
                warn!("Failed to cancel connection to {}: {}", device_id, e);
            }
        }
        // Only attempts that never finished discovery pass through Failed.
        let failed = matches!(
            self.state,
            ConnectionState::Connecting
                | ConnectionState::DiscoveringServices
                | ConnectionState::DiscoveringCharacteristics
        );
        if !failed {
            self.set_state(ConnectionState::Disconnecting);
        }
        self.teardown();
        if failed {
            self.set_state(ConnectionState::Failed);
        }
        self.set_status(&failure_status(&error));
        self.settle();
    }

    /// Clears every connection-scoped field.
    fn teardown(&mut self) {
        self.registry.clear();
        self.connection = None;
        self.router.clear();
        self.dispatcher.reset();
        self.clear_devices();
    }

    /// Returns to the resting state once no connection exists.
    fn settle(&mut self) {
        if self.scanning {
            self.set_state(ConnectionState::Scanning);
        } else {
            self.set_state(ConnectionState::Idle);
        }
    }

    fn is_current(&self, device_id: &str) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.matches(device_id))
    }

    fn clear_devices(&mut self) {
        if self.devices.is_empty() {
            return;
        }
        self.devices.clear();
        self.emit_devices();
    }

    fn emit_devices(&self) {
        self.emitter
            .emit(BridgeEvent::DevicesChanged(self.devices.devices().to_vec()));
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!("Connection state {:?} -> {:?}", self.state, state);
        self.state = state;
        self.emitter.emit(BridgeEvent::StateChanged(state));
    }

    fn set_status(&mut self, status: &str) {
        if self.status == status {
            return;
        }
        self.status = status.to_string();
        self.emitter
            .emit(BridgeEvent::StatusChanged(self.status.clone()));
    }
}

fn failure_status(error: &BluetoothError) -> String {
    match error {
        BluetoothError::ConnectFailed(_) => STATUS_CONNECT_FAILED.to_string(),
        other => format!("{}: {}", STATUS_CONNECT_FAILED, other),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// A clonable handle that sends requests to the manager task.
#[derive(Clone)]
pub struct BluetoothHandle {
    tx: mpsc::Sender<ManagerRequest>,
    emitter: EventEmitter,
}

impl BluetoothHandle {
    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> ManagerRequest,
    ) -> BluetoothResult<R> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| BluetoothError::ManagerUnavailable)?;
        rx.await.map_err(|_| BluetoothError::ManagerUnavailable)
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub async fn start_scan(&self) -> BluetoothResult<()> {
        self.request(ManagerRequest::StartScan).await?
    }

    pub async fn stop_scan(&self) -> BluetoothResult<()> {
        self.request(ManagerRequest::StopScan).await?
    }

    pub async fn connect(&self, device_id: &str) -> BluetoothResult<()> {
        let device_id = device_id.to_string();
        self.request(|reply| ManagerRequest::Connect(device_id, reply))
            .await?
    }

    pub async fn disconnect(&self) -> BluetoothResult<()> {
        self.request(ManagerRequest::Disconnect).await?
    }

    pub async fn send_command(&self, payload: &str) -> BluetoothResult<OutboundCommand> {
        let payload = payload.to_string();
        self.request(|reply| ManagerRequest::SendCommand(payload, reply))
            .await?
    }

    pub async fn snapshot(&self) -> BluetoothResult<ManagerSnapshot> {
        self.request(ManagerRequest::Snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::{
        INVALID_DATA_PLACEHOLDER, UUID_CONTROL_CHAR, UUID_MENU_CHAR, UUID_PREVIEW_INFO_CHAR,
        UUID_SERVICE_METRICS_CHAR, UUID_SERVICE_STATUS_CHAR, UUID_STATUS_CHAR,
    };
    use crate::core::bluetooth::transport::mock::{RecordingTransport, TransportCall};
    use crate::core::bluetooth::types::{CharacteristicRole, CommandStatus, PlatformHandle};
    use tokio::time::Duration;
    use uuid::Uuid;

    fn test_config() -> BluetoothConfig {
        BluetoothConfig {
            auto_scan_on_power_on: false,
            ..BluetoothConfig::default()
        }
    }

    fn manager() -> (BluetoothManager, Arc<RecordingTransport>, EventEmitter) {
        let transport = Arc::new(RecordingTransport::new());
        let emitter = EventEmitter::new(256);
        let manager = BluetoothManager::new(transport.clone(), test_config(), emitter.clone());
        (manager, transport, emitter)
    }

    fn device(id: &str, name: &str) -> BluetoothDevice {
        BluetoothDevice::new(id.into(), Some(name.into()), "N/A".into(), Some(-50))
    }

    fn characteristic(uuid: Uuid, handle: u64) -> DiscoveredCharacteristic {
        DiscoveredCharacteristic {
            uuid,
            handle: PlatformHandle(handle),
        }
    }

    async fn scanning_with_devices(m: &mut BluetoothManager) {
        m.handle_event(TransportEvent::RadioStateChanged(RadioState::PoweredOn))
            .await;
        m.start_scan().await.unwrap();
        m.handle_event(TransportEvent::DeviceDiscovered(device("1", "Node A")))
            .await;
        m.handle_event(TransportEvent::DeviceDiscovered(device("2", "Node B")))
            .await;
    }

    async fn advance_to(m: &mut BluetoothManager, id: &str, target: ConnectionState) {
        m.connect(id).await.unwrap();
        if target == ConnectionState::Connecting {
            return;
        }
        m.handle_event(TransportEvent::Connected { device_id: id.into() })
            .await;
        if target == ConnectionState::DiscoveringServices {
            return;
        }
        m.handle_event(TransportEvent::ServicesDiscovered {
            device_id: id.into(),
            result: Ok(vec![UUID_CAMERA_SERVICE]),
        })
        .await;
        if target == ConnectionState::DiscoveringCharacteristics {
            return;
        }
        m.handle_event(TransportEvent::CharacteristicsDiscovered {
            device_id: id.into(),
            service: UUID_CAMERA_SERVICE,
            result: Ok(vec![
                characteristic(UUID_CONTROL_CHAR, 10),
                characteristic(UUID_STATUS_CHAR, 11),
            ]),
        })
        .await;
        if target == ConnectionState::SubscriptionsPending {
            return;
        }
        m.handle_event(TransportEvent::NotifyStateChanged {
            device_id: id.into(),
            characteristic: UUID_STATUS_CHAR,
            result: Ok(true),
        })
        .await;
        assert_eq!(m.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn scan_connect_discover_subscribe_and_send() {
        let (mut m, transport, _) = manager();
        scanning_with_devices(&mut m).await;
        let ids: Vec<_> = m.devices().iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["1", "2"]);

        transport.take_calls();
        m.connect("1").await.unwrap();
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.status(), "Connecting to Node A...");
        assert_eq!(
            transport.take_calls(),
            vec![TransportCall::StopScan, TransportCall::Connect("1".into())]
        );

        m.handle_event(TransportEvent::Connected { device_id: "1".into() })
            .await;
        assert_eq!(m.state(), ConnectionState::DiscoveringServices);
        m.handle_event(TransportEvent::ServicesDiscovered {
            device_id: "1".into(),
            result: Ok(vec![UUID_CAMERA_SERVICE]),
        })
        .await;
        assert_eq!(m.state(), ConnectionState::DiscoveringCharacteristics);

        transport.take_calls();
        m.handle_event(TransportEvent::CharacteristicsDiscovered {
            device_id: "1".into(),
            service: UUID_CAMERA_SERVICE,
            result: Ok(vec![
                characteristic(UUID_CONTROL_CHAR, 1),
                characteristic(UUID_STATUS_CHAR, 2),
                characteristic(UUID_MENU_CHAR, 3),
            ]),
        })
        .await;
        assert_eq!(
            transport.take_calls(),
            vec![
                TransportCall::SetNotify("1".into(), UUID_STATUS_CHAR, true),
                TransportCall::ReadValue("1".into(), UUID_MENU_CHAR),
            ]
        );
        assert_eq!(m.state(), ConnectionState::SubscriptionsPending);

        m.handle_event(TransportEvent::ValueUpdated {
            device_id: "1".into(),
            characteristic: UUID_MENU_CHAR,
            result: Ok(b"Available Commands:\n1: Start Preview".to_vec()),
        })
        .await;
        m.handle_event(TransportEvent::NotifyStateChanged {
            device_id: "1".into(),
            characteristic: UUID_STATUS_CHAR,
            result: Ok(true),
        })
        .await;
        assert_eq!(m.state(), ConnectionState::Ready);
        assert_eq!(m.status(), "Connected to Node A");
        assert_eq!(m.messages().len(), 1);
        assert_eq!(m.messages()[0].role, CharacteristicRole::Menu);

        let command = m.send_command("3").await.unwrap();
        assert_eq!(command.status, CommandStatus::Pending);
        assert_eq!(
            transport.take_calls(),
            vec![TransportCall::WriteValue(
                "1".into(),
                UUID_CONTROL_CHAR,
                vec![0x33],
                true
            )]
        );

        m.handle_event(TransportEvent::WriteResult {
            device_id: "1".into(),
            characteristic: UUID_CONTROL_CHAR,
            result: Ok(()),
        })
        .await;
        assert_eq!(m.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn discovery_events_are_deduplicated_in_first_seen_order() {
        let (mut m, _, _) = manager();
        m.handle_event(TransportEvent::RadioStateChanged(RadioState::PoweredOn))
            .await;
        m.start_scan().await.unwrap();
        for id in ["b", "a", "b", "c", "a", "c", "c"] {
            m.handle_event(TransportEvent::DeviceDiscovered(device(id, id)))
                .await;
        }
        let ids: Vec<_> = m.devices().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn disconnect_in_any_pre_ready_state_returns_to_idle() {
        let stages = [
            ConnectionState::Connecting,
            ConnectionState::DiscoveringServices,
            ConnectionState::DiscoveringCharacteristics,
            ConnectionState::SubscriptionsPending,
        ];
        for stage in stages {
            let (mut m, _, _) = manager();
            scanning_with_devices(&mut m).await;
            advance_to(&mut m, "1", stage).await;
            assert_eq!(m.state(), stage);

            m.handle_event(TransportEvent::ValueUpdated {
                device_id: "1".into(),
                characteristic: UUID_STATUS_CHAR,
                result: Ok(b"booting".to_vec()),
            })
            .await;
            m.handle_event(TransportEvent::Disconnected {
                device_id: "1".into(),
                error: Some("link lost".into()),
            })
            .await;

            assert_eq!(m.state(), ConnectionState::Idle, "stage {:?}", stage);
            assert!(m.registry().is_empty());
            assert!(m.messages().is_empty());
            assert!(m.devices().is_empty());
        }
    }

    #[tokio::test]
    async fn spontaneous_disconnect_while_connecting_passes_through_failed() {
        let (mut m, _, emitter) = manager();
        scanning_with_devices(&mut m).await;
        m.connect("1").await.unwrap();
        let mut rx = emitter.subscribe();
        m.handle_event(TransportEvent::Disconnected {
            device_id: "1".into(),
            error: None,
        })
        .await;

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let BridgeEvent::StateChanged(state) = event {
                states.push(state);
            }
        }
        assert_eq!(states, vec![ConnectionState::Failed, ConnectionState::Idle]);
        assert!(m.status().starts_with(STATUS_CONNECT_FAILED));
    }

    #[tokio::test]
    async fn subscription_acknowledgements_in_any_order_reach_ready() {
        let required = [
            UUID_STATUS_CHAR,
            UUID_PREVIEW_INFO_CHAR,
            UUID_SERVICE_STATUS_CHAR,
            UUID_SERVICE_METRICS_CHAR,
        ];
        let mut orders = Vec::new();
        permutations(&mut required.to_vec(), 0, &mut orders);
        assert_eq!(orders.len(), 24);

        for order in orders {
            let (mut m, _, _) = manager();
            scanning_with_devices(&mut m).await;
            advance_to(&mut m, "1", ConnectionState::DiscoveringCharacteristics).await;
            let mut all: Vec<_> = required
                .iter()
                .enumerate()
                .map(|(i, uuid)| characteristic(*uuid, i as u64))
                .collect();
            all.push(characteristic(UUID_CONTROL_CHAR, 9));
            m.handle_event(TransportEvent::CharacteristicsDiscovered {
                device_id: "1".into(),
                service: UUID_CAMERA_SERVICE,
                result: Ok(all),
            })
            .await;

            for (i, uuid) in order.iter().enumerate() {
                assert_eq!(m.state(), ConnectionState::SubscriptionsPending);
                m.handle_event(TransportEvent::NotifyStateChanged {
                    device_id: "1".into(),
                    characteristic: *uuid,
                    result: Ok(true),
                })
                .await;
                if i + 1 < order.len() {
                    assert!(!m.is_ready());
                }
            }
            assert_eq!(m.state(), ConnectionState::Ready);
            assert!(m
                .registry()
                .resolved()
                .filter(|h| h.role != CharacteristicRole::Control)
                .all(|h| h.subscription == SubscriptionState::Subscribed));
        }
    }

    fn permutations(items: &mut Vec<Uuid>, k: usize, out: &mut Vec<Vec<Uuid>>) {
        if k == items.len() {
            out.push(items.clone());
            return;
        }
        for i in k..items.len() {
            items.swap(k, i);
            permutations(items, k + 1, out);
            items.swap(k, i);
        }
    }

    #[tokio::test]
    async fn failed_subscription_still_resolves_and_is_reported() {
        let (mut m, _, emitter) = manager();
        scanning_with_devices(&mut m).await;
        advance_to(&mut m, "1", ConnectionState::SubscriptionsPending).await;
        let mut rx = emitter.subscribe();
        m.handle_event(TransportEvent::NotifyStateChanged {
            device_id: "1".into(),
            characteristic: UUID_STATUS_CHAR,
            result: Err("insufficient authentication".into()),
        })
        .await;
        assert_eq!(m.state(), ConnectionState::Ready);
        let reported = std::iter::from_fn(|| rx.try_recv().ok())
            .any(|e| matches!(e, BridgeEvent::ChannelError { role: CharacteristicRole::Status, .. }));
        assert!(reported);
    }

    #[tokio::test]
    async fn peripheral_without_notifying_roles_is_ready_immediately() {
        let (mut m, _, _) = manager();
        scanning_with_devices(&mut m).await;
        advance_to(&mut m, "1", ConnectionState::DiscoveringCharacteristics).await;
        m.handle_event(TransportEvent::CharacteristicsDiscovered {
            device_id: "1".into(),
            service: UUID_CAMERA_SERVICE,
            result: Ok(vec![
                characteristic(UUID_CONTROL_CHAR, 1),
                characteristic(Uuid::from_u128(0x1234), 2),
            ]),
        })
        .await;
        assert_eq!(m.state(), ConnectionState::Ready);
        assert_eq!(m.registry().resolved().count(), 1);
    }

    #[tokio::test]
    async fn non_utf8_notification_is_logged_with_placeholder() {
        let (mut m, _, _) = manager();
        scanning_with_devices(&mut m).await;
        advance_to(&mut m, "1", ConnectionState::Ready).await;
        m.handle_event(TransportEvent::ValueUpdated {
            device_id: "1".into(),
            characteristic: UUID_STATUS_CHAR,
            result: Ok(vec![0xc3, 0x28]),
        })
        .await;
        assert_eq!(m.messages().len(), 1);
        assert_eq!(m.messages()[0].text, INVALID_DATA_PLACEHOLDER);
        assert_eq!(m.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn notification_error_does_not_disconnect() {
        let (mut m, _, _) = manager();
        scanning_with_devices(&mut m).await;
        advance_to(&mut m, "1", ConnectionState::Ready).await;
        m.handle_event(TransportEvent::ValueUpdated {
            device_id: "1".into(),
            characteristic: UUID_STATUS_CHAR,
            result: Err("read not permitted".into()),
        })
        .await;
        assert_eq!(m.state(), ConnectionState::Ready);
        assert!(m.messages().is_empty());
    }

    #[tokio::test]
    async fn send_while_not_connected_never_contacts_transport() {
        let (mut m, transport, _) = manager();
        scanning_with_devices(&mut m).await;
        transport.take_calls();
        assert_eq!(m.send_command("1").await, Err(BluetoothError::NotConnected));
        advance_to(&mut m, "1", ConnectionState::SubscriptionsPending).await;
        transport.take_calls();
        assert_eq!(m.send_command("1").await, Err(BluetoothError::NotConnected));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_write_keeps_connection_ready() {
        let (mut m, _, emitter) = manager();
        scanning_with_devices(&mut m).await;
        advance_to(&mut m, "1", ConnectionState::Ready).await;
        let mut rx = emitter.subscribe();
        m.send_command("1").await.unwrap();
        m.send_command("2").await.unwrap();
        m.handle_event(TransportEvent::WriteResult {
            device_id: "1".into(),
            characteristic: UUID_CONTROL_CHAR,
            result: Ok(()),
        })
        .await;
        m.handle_event(TransportEvent::WriteResult {
            device_id: "1".into(),
            characteristic: UUID_CONTROL_CHAR,
            result: Err("write not permitted".into()),
        })
        .await;
        assert_eq!(m.state(), ConnectionState::Ready);

        let updates: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                BridgeEvent::CommandUpdated(command) => Some((command.payload, command.status)),
                _ => None,
            })
            .collect();
        assert_eq!(
            updates,
            vec![
                ("1".to_string(), CommandStatus::Pending),
                ("2".to_string(), CommandStatus::Pending),
                ("1".to_string(), CommandStatus::Sent),
                (
                    "2".to_string(),
                    CommandStatus::Failed("write not permitted".into())
                ),
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_characteristic_uuid_keeps_first_handle() {
        let (mut m, transport, _) = manager();
        scanning_with_devices(&mut m).await;
        advance_to(&mut m, "1", ConnectionState::DiscoveringCharacteristics).await;
        transport.take_calls();
        m.handle_event(TransportEvent::CharacteristicsDiscovered {
            device_id: "1".into(),
            service: UUID_CAMERA_SERVICE,
            result: Ok(vec![
                characteristic(UUID_STATUS_CHAR, 1),
                characteristic(UUID_STATUS_CHAR, 2),
                characteristic(UUID_CONTROL_CHAR, 3),
            ]),
        })
        .await;

        assert_eq!(m.state(), ConnectionState::SubscriptionsPending);
        assert_eq!(
            m.registry().lookup(CharacteristicRole::Status).unwrap().handle,
            PlatformHandle(1)
        );
        assert_eq!(
            transport.take_calls(),
            vec![TransportCall::SetNotify("1".into(), UUID_STATUS_CHAR, true)]
        );
        m.handle_event(TransportEvent::NotifyStateChanged {
            device_id: "1".into(),
            characteristic: UUID_STATUS_CHAR,
            result: Ok(true),
        })
        .await;
        assert_eq!(m.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn new_connection_clears_registry_before_discovery() {
        let (mut m, transport, _) = manager();
        scanning_with_devices(&mut m).await;
        advance_to(&mut m, "1", ConnectionState::Ready).await;
        assert!(!m.registry().is_empty());

        transport.take_calls();
        m.connect("2").await.unwrap();
        assert!(m.registry().is_empty());
        assert_eq!(
            transport.take_calls(),
            vec![
                TransportCall::CancelConnection("1".into()),
                TransportCall::Connect("2".into()),
            ]
        );

        // Different platform handles for the same roles must not trip the
        // registry assertion.
        m.handle_event(TransportEvent::Connected { device_id: "2".into() })
            .await;
        m.handle_event(TransportEvent::ServicesDiscovered {
            device_id: "2".into(),
            result: Ok(vec![UUID_CAMERA_SERVICE]),
        })
        .await;
        m.handle_event(TransportEvent::CharacteristicsDiscovered {
            device_id: "2".into(),
            service: UUID_CAMERA_SERVICE,
            result: Ok(vec![
                characteristic(UUID_CONTROL_CHAR, 100),
                characteristic(UUID_STATUS_CHAR, 101),
            ]),
        })
        .await;
        assert_eq!(
            m.registry().lookup(CharacteristicRole::Control).unwrap().handle,
            PlatformHandle(100)
        );

        // Late events from the superseded device are ignored.
        m.handle_event(TransportEvent::Disconnected {
            device_id: "1".into(),
            error: None,
        })
        .await;
        assert_eq!(m.state(), ConnectionState::SubscriptionsPending);
    }

    #[tokio::test]
    async fn missing_service_fails_the_attempt() {
        let (mut m, transport, _) = manager();
        scanning_with_devices(&mut m).await;
        advance_to(&mut m, "1", ConnectionState::DiscoveringServices).await;
        transport.take_calls();
        m.handle_event(TransportEvent::ServicesDiscovered {
            device_id: "1".into(),
            result: Ok(vec![Uuid::from_u128(0x180f)]),
        })
        .await;
        assert_eq!(m.state(), ConnectionState::Idle);
        assert!(m.status().contains("Camera service not found"));
        assert_eq!(
            transport.take_calls(),
            vec![TransportCall::CancelConnection("1".into())]
        );
    }

    #[tokio::test]
    async fn connect_failure_tears_down() {
        let (mut m, _, _) = manager();
        scanning_with_devices(&mut m).await;
        m.connect("2").await.unwrap();
        m.handle_event(TransportEvent::ConnectFailed {
            device_id: "2".into(),
            error: "peer removed pairing".into(),
        })
        .await;
        assert_eq!(m.state(), ConnectionState::Idle);
        assert_eq!(m.status(), STATUS_CONNECT_FAILED);
        assert_eq!(m.send_command("1").await, Err(BluetoothError::NotConnected));
    }

    #[tokio::test]
    async fn pending_operation_times_out_into_teardown() {
        let (mut m, transport, _) = manager();
        scanning_with_devices(&mut m).await;
        advance_to(&mut m, "1", ConnectionState::DiscoveringServices).await;
        let deadline = m.next_deadline().expect("deadline for pending discovery");

        m.check_timeouts(deadline - Duration::from_millis(1)).await;
        assert_eq!(m.state(), ConnectionState::DiscoveringServices);

        transport.take_calls();
        m.check_timeouts(deadline + Duration::from_millis(1)).await;
        assert_eq!(m.state(), ConnectionState::Idle);
        assert!(m.status().contains("service discovery"));
        assert_eq!(
            transport.calls(),
            vec![TransportCall::CancelConnection("1".into())]
        );
    }

    #[tokio::test]
    async fn zero_timeout_parks_indefinitely() {
        let transport = Arc::new(RecordingTransport::new());
        let config = BluetoothConfig {
            operation_timeout_secs: 0,
            ..test_config()
        };
        let mut m = BluetoothManager::new(transport, config, EventEmitter::new(16));
        scanning_with_devices(&mut m).await;
        m.connect("1").await.unwrap();
        assert!(m.next_deadline().is_none());
    }

    #[tokio::test]
    async fn explicit_disconnect_clears_everything() {
        let (mut m, transport, _) = manager();
        scanning_with_devices(&mut m).await;
        advance_to(&mut m, "1", ConnectionState::Ready).await;
        m.handle_event(TransportEvent::ValueUpdated {
            device_id: "1".into(),
            characteristic: UUID_STATUS_CHAR,
            result: Ok(b"Preview Started".to_vec()),
        })
        .await;
        transport.take_calls();
        m.disconnect().await.unwrap();
        assert_eq!(transport.calls(), vec![TransportCall::CancelConnection("1".into())]);
        assert_eq!(m.state(), ConnectionState::Idle);
        assert_eq!(m.status(), STATUS_DISCONNECTED);
        assert!(m.registry().is_empty());
        assert!(m.messages().is_empty());
        assert!(m.devices().is_empty());
    }

    #[tokio::test]
    async fn stop_scan_with_active_connection_keeps_state() {
        let (mut m, _, _) = manager();
        scanning_with_devices(&mut m).await;
        advance_to(&mut m, "1", ConnectionState::Ready).await;
        m.start_scan().await.unwrap();
        assert_eq!(m.state(), ConnectionState::Ready);
        m.stop_scan().await.unwrap();
        assert_eq!(m.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn subscription_timeout_tears_down_without_failed() {
        let (mut m, transport, emitter) = manager();
        scanning_with_devices(&mut m).await;
        advance_to(&mut m, "1", ConnectionState::SubscriptionsPending).await;
        let deadline = m.next_deadline().expect("deadline for pending subscriptions");
        let mut rx = emitter.subscribe();
        transport.take_calls();

        m.check_timeouts(deadline + Duration::from_millis(1)).await;

        let states: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                BridgeEvent::StateChanged(state) => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![ConnectionState::Disconnecting, ConnectionState::Idle]
        );
        assert!(m.status().contains("subscription"));
        assert!(m.registry().is_empty());
        assert_eq!(
            transport.calls(),
            vec![TransportCall::CancelConnection("1".into())]
        );
    }

    #[tokio::test]
    async fn failed_scan_start_is_reported() {
        let (mut m, _, _) = manager();
        m.handle_event(TransportEvent::RadioStateChanged(RadioState::PoweredOn))
            .await;
        m.start_scan().await.unwrap();
        assert_eq!(m.state(), ConnectionState::Scanning);

        m.handle_event(TransportEvent::ScanFailed {
            error: "adapter busy".into(),
        })
        .await;
        assert_eq!(m.state(), ConnectionState::Idle);
        assert_eq!(m.status(), "Scan failed: adapter busy");
        assert!(!m.snapshot().scanning);

        // Discoveries from the dead scan are not listed.
        m.handle_event(TransportEvent::DeviceDiscovered(device("1", "Node A")))
            .await;
        assert!(m.devices().is_empty());
    }

    #[tokio::test]
    async fn power_off_cancels_the_live_link() {
        let (mut m, transport, _) = manager();
        scanning_with_devices(&mut m).await;
        advance_to(&mut m, "1", ConnectionState::Ready).await;
        transport.take_calls();

        m.handle_event(TransportEvent::RadioStateChanged(RadioState::PoweredOff))
            .await;
        assert_eq!(
            transport.calls(),
            vec![TransportCall::CancelConnection("1".into())]
        );
        assert_eq!(m.state(), ConnectionState::Idle);
        assert!(m.registry().is_empty());
    }

    #[tokio::test]
    async fn radio_power_states_gate_scanning() {
        let (mut m, transport, _) = manager();
        assert_eq!(
            m.start_scan().await,
            Err(BluetoothError::RadioUnavailable(RadioState::Unknown))
        );
        assert!(transport.calls().is_empty());

        m.handle_event(TransportEvent::RadioStateChanged(RadioState::PoweredOn))
            .await;
        assert_eq!(
            transport.take_calls(),
            vec![TransportCall::StartScan(UUID_CAMERA_SERVICE)]
        );
        assert_eq!(m.state(), ConnectionState::Scanning);
        m.handle_event(TransportEvent::DeviceDiscovered(device("1", "Node A")))
            .await;

        m.handle_event(TransportEvent::RadioStateChanged(RadioState::PoweredOff))
            .await;
        assert_eq!(m.status(), "Bluetooth Off");
        assert_eq!(m.state(), ConnectionState::Idle);
        assert!(m.devices().is_empty());

        m.handle_event(TransportEvent::DeviceDiscovered(device("1", "Node A")))
            .await;
        assert!(m.devices().is_empty());
    }

    #[tokio::test]
    async fn connecting_to_an_unknown_device_is_rejected() {
        let (mut m, transport, _) = manager();
        scanning_with_devices(&mut m).await;
        transport.take_calls();
        assert_eq!(
            m.connect("42").await,
            Err(BluetoothError::UnknownDevice("42".into()))
        );
        assert!(transport.calls().is_empty());
        assert_eq!(m.state(), ConnectionState::Scanning);
    }

    #[tokio::test]
    async fn handle_serializes_requests_and_events() {
        let transport = Arc::new(RecordingTransport::new());
        let emitter = EventEmitter::new(64);
        let manager = BluetoothManager::new(transport.clone(), test_config(), emitter);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (handle, task) = manager.spawn(events_rx);

        events_tx
            .send(TransportEvent::RadioStateChanged(RadioState::PoweredOn))
            .unwrap();
        // Requests are only answered after earlier queued events were
        // handled, so poll until the radio state lands.
        let mut snapshot = handle.snapshot().await.unwrap();
        while snapshot.radio != RadioState::PoweredOn {
            tokio::task::yield_now().await;
            snapshot = handle.snapshot().await.unwrap();
        }
        handle.start_scan().await.unwrap();
        events_tx
            .send(TransportEvent::DeviceDiscovered(device("7", "Node C")))
            .unwrap();
        let mut snapshot = handle.snapshot().await.unwrap();
        while snapshot.devices.is_empty() {
            tokio::task::yield_now().await;
            snapshot = handle.snapshot().await.unwrap();
        }
        assert!(snapshot.scanning);
        assert_eq!(snapshot.state, ConnectionState::Scanning);

        assert_eq!(handle.send_command("1").await, Err(BluetoothError::NotConnected));
        handle.connect("7").await.unwrap();
        assert_eq!(
            handle.snapshot().await.unwrap().state,
            ConnectionState::Connecting
        );

        drop(handle);
        task.await.unwrap();
        assert!(transport.calls().contains(&TransportCall::Connect("7".into())));
    }
}
