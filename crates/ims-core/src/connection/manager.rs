use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rcs_infra_common::SerialExecutor;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::RegistrationBackoff;
use crate::config::{ImsSettings, MinimumBatteryLevel, NetworkType};
use crate::dns::DnsResolvedFields;
use crate::error::{ErrorKind, ImsError, Result};
use crate::network::ImsNetworkInterface;
use crate::platform::{BatteryStatus, ConnectivityProvider, ImsServices};
use crate::sip::ReasonCode;

const EXECUTOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of the IMS connection, published on a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Network is up, polling is waiting for the next attempt
    Connecting,
    Registering,
    /// Registered, IMS services not started
    Registered,
    ServicesStarted,
    DisconnectedByBattery,
}

enum PollOutcome {
    Registered,
    Rejected,
    Checked,
}

struct PollingTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    settings: Arc<ImsSettings>,
    /// Holds both network types from construction on
    interfaces: HashMap<NetworkType, Arc<ImsNetworkInterface>>,
    current: RwLock<NetworkType>,
    dns_fields: Mutex<Option<DnsResolvedFields>>,
    disconnected_by_battery: AtomicBool,
    services_started: AtomicBool,
    connectivity: Arc<dyn ConnectivityProvider>,
    services: Arc<dyn ImsServices>,
    executor: SerialExecutor,
    polling: AsyncMutex<Option<PollingTask>>,
    state: watch::Sender<ConnectionState>,
}

/// Keeps the client registered to the IMS over the best access network.
///
/// Connectivity and battery notifications are queued on a serial
/// executor, so the decisions they drive never interleave. While a
/// network is usable a polling task registers with jittered exponential
/// backoff, starts the IMS services once registered and then checks them
/// periodically.
///
/// [`terminate`](Self::terminate) must be called before dropping the last
/// handle to stop the polling task.
#[derive(Clone)]
pub struct ImsConnectionManager {
    inner: Arc<Inner>,
}

impl ImsConnectionManager {
    /// Build the manager with the mobile interface current. Must be called
    /// within a Tokio runtime.
    pub fn new(
        settings: Arc<ImsSettings>,
        mobile: Arc<ImsNetworkInterface>,
        wifi: Arc<ImsNetworkInterface>,
        connectivity: Arc<dyn ConnectivityProvider>,
        services: Arc<dyn ImsServices>,
    ) -> Result<Self> {
        if mobile.network_type() != NetworkType::Mobile || wifi.network_type() != NetworkType::Wifi
        {
            return Err(ImsError::Configuration(
                "network interfaces don't match their access types".into(),
            ));
        }

        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Arc::new(Inner {
            settings,
            interfaces: HashMap::from([(NetworkType::Mobile, mobile), (NetworkType::Wifi, wifi)]),
            current: RwLock::new(NetworkType::Mobile),
            dns_fields: Mutex::new(None),
            disconnected_by_battery: AtomicBool::new(false),
            services_started: AtomicBool::new(false),
            connectivity,
            services,
            executor: SerialExecutor::start("ims-connection"),
            polling: AsyncMutex::new(None),
            state,
        });
        inner.load_user_profile();

        Ok(Self { inner })
    }

    /// Evaluate the current connectivity once, as if it had just changed
    pub fn initialize(&self) -> Result<()> {
        info!("Initialize the IMS connection manager");
        self.notify_connectivity_changed()
    }

    /// Queue the handling of a connectivity change
    pub fn notify_connectivity_changed(&self) -> Result<()> {
        let inner = self.inner.clone();
        self.inner
            .executor
            .schedule("connectivity-event", async move {
                inner.connection_event().await;
            })?;
        Ok(())
    }

    /// Queue the handling of a battery change
    pub fn notify_battery_changed(&self, status: BatteryStatus) -> Result<()> {
        let inner = self.inner.clone();
        self.inner
            .executor
            .schedule("battery-event", async move {
                inner.battery_event(status).await;
            })?;
        Ok(())
    }

    /// Wait until every queued notification has been handled
    pub async fn flush(&self) -> Result<()> {
        Ok(self.inner.executor.drain().await?)
    }

    /// Stop handling notifications, stop polling and unregister
    pub async fn terminate(&self) {
        info!("Terminate the IMS connection manager");
        self.inner.executor.shutdown(EXECUTOR_SHUTDOWN_TIMEOUT).await;
        self.inner.stop_ims_connection().await;

        let interface = self.inner.current_interface();
        if let Err(e) = interface.unregister().await {
            warn!("Unregister from IMS failed: {}", e);
        }
        self.inner.set_state(ConnectionState::Disconnected);
        info!("IMS connection manager has been terminated");
    }

    /// Interface of the network currently in use
    pub fn current_interface(&self) -> Arc<ImsNetworkInterface> {
        self.inner.current_interface()
    }

    /// Interface for `network_type`
    pub fn interface(&self, network_type: NetworkType) -> Arc<ImsNetworkInterface> {
        self.inner.interface(network_type)
    }

    pub fn mobile_interface(&self) -> Arc<ImsNetworkInterface> {
        self.inner.interface(NetworkType::Mobile)
    }

    pub fn wifi_interface(&self) -> Arc<ImsNetworkInterface> {
        self.inner.interface(NetworkType::Wifi)
    }

    /// Type of the network currently in use
    pub fn current_network_type(&self) -> NetworkType {
        *self.inner.current.read()
    }

    pub fn is_connected_to_wifi(&self) -> bool {
        self.current_network_type() == NetworkType::Wifi
    }

    pub fn is_connected_to_mobile(&self) -> bool {
        self.current_network_type() == NetworkType::Mobile
    }

    /// Whether the device reports roaming on the mobile network
    pub fn is_in_roaming(&self) -> bool {
        self.inner
            .connectivity
            .active_network()
            .map_or(false, |network| network.roaming)
    }

    /// Whether the connection was dropped because the battery ran low
    pub fn is_disconnected_by_battery(&self) -> bool {
        self.inner.disconnected_by_battery.load(Ordering::SeqCst)
    }

    /// Whether the current interface holds a registration
    pub fn is_registered(&self) -> bool {
        self.inner.current_interface().is_registered()
    }

    /// Reason the last registration on the current interface ended
    pub fn registration_reason_code(&self) -> ReasonCode {
        self.inner.current_interface().registration_reason_code()
    }

    /// Whether IMS services were started after registering
    pub fn are_services_started(&self) -> bool {
        self.inner.services_started.load(Ordering::SeqCst)
    }

    /// Proxy endpoint the next registration attempt will use, if resolved
    pub fn dns_resolved_fields(&self) -> Option<DnsResolvedFields> {
        *self.inner.dns_fields.lock()
    }

    /// Latest connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver notified on every connection state change
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Whether a registration polling task is alive
    pub async fn is_polling(&self) -> bool {
        self.inner
            .polling
            .lock()
            .await
            .as_ref()
            .map_or(false, |task| !task.handle.is_finished())
    }
}

impl Inner {
    fn interface(&self, network_type: NetworkType) -> Arc<ImsNetworkInterface> {
        self.interfaces[&network_type].clone()
    }

    fn current_interface(&self) -> Arc<ImsNetworkInterface> {
        self.interface(*self.current.read())
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("IMS connection state {:?} -> {:?}", current, state);
            *current = state;
            true
        });
    }

    fn load_user_profile(&self) {
        let interface = self.current_interface();
        let subscriber_id = self.connectivity.subscriber_id();
        match interface.user_profile(subscriber_id.as_deref()) {
            Ok(profile) => {
                self.services.load_user_profile(profile);
                debug!("User profile has been reloaded");
            }
            Err(e) => warn!(
                "Can't load the user profile for {}: {}",
                interface.network_type(),
                e
            ),
        }
    }

    async fn refresh_dns(&self, interface: &ImsNetworkInterface) {
        match interface.dns_resolved_fields().await {
            Ok(fields) => *self.dns_fields.lock() = Some(fields),
            Err(e) => error!(
                "Resolving remote IP address to figure out initial local IP address failed: {}",
                e
            ),
        }
    }

    async fn connection_event(self: &Arc<Self>) {
        if self.disconnected_by_battery.load(Ordering::SeqCst) {
            return;
        }

        let Some(network) = self.connectivity.active_network() else {
            debug!("Disconnect from IMS: no network (e.g. air plane mode)");
            self.disconnect_from_ims(ReasonCode::ConnectionLost).await;
            return;
        };
        debug!(
            "Connectivity event: {} connected={} roaming={}",
            network.network_type, network.connected, network.roaming
        );

        if network.network_type == NetworkType::Mobile {
            if let Some(last) = self.connectivity.last_user_account() {
                let swapped = self
                    .connectivity
                    .current_user_account()
                    .map_or(true, |current| !current.eq_ignore_ascii_case(&last));
                if swapped {
                    info!("SIM account has changed");
                    self.services.handle_sim_has_changed();
                    return;
                }
            }
        }

        let local_ip: Option<IpAddr>;
        if network.network_type != *self.current.read() {
            info!("Data connection state: NETWORK ACCESS CHANGED");
            debug!("Disconnect from IMS: network access has changed");
            self.disconnect_from_ims(ReasonCode::ConnectionLost).await;

            debug!("Change the network interface to {}", network.network_type);
            *self.current.write() = network.network_type;
            *self.dns_fields.lock() = None;

            self.load_user_profile();

            let interface = self.current_interface();
            self.refresh_dns(&interface).await;

            let dns = *self.dns_fields.lock();
            local_ip = self
                .connectivity
                .local_ip_address(dns.as_ref(), network.network_type);
        } else {
            let interface = self.current_interface();
            if self.dns_fields.lock().is_none() {
                self.refresh_dns(&interface).await;
            }

            let dns = *self.dns_fields.lock();
            local_ip = self
                .connectivity
                .local_ip_address(dns.as_ref(), network.network_type);

            if let Some(ip) = local_ip {
                match interface.access().ip_address() {
                    Some(last) if last == ip => {
                        debug!("Neither interface nor IP address has changed; nothing to do");
                        return;
                    }
                    Some(last) => {
                        debug!("Disconnect from IMS: IP address has changed ({} -> {})", last, ip);
                        self.disconnect_from_ims(ReasonCode::ConnectionLost).await;
                        *self.dns_fields.lock() = None;
                    }
                    None => debug!("IP address available (again)"),
                }
            }
        }

        match local_ip {
            Some(ip) if network.connected => {
                let remote = self
                    .dns_fields
                    .lock()
                    .map_or_else(|| "unresolved".to_string(), |dns| dns.to_string());
                info!(
                    "Data connection state: CONNECTED to {} with local IP {} valid for {}",
                    network.network_type, ip, remote
                );

                if !self.settings.network_access.allows(network.network_type) {
                    warn!("Network access {} is not authorized", network.network_type);
                    return;
                }

                let operator = &self.settings.network_operator;
                if !operator.is_empty() {
                    let sim_operator = self.connectivity.sim_operator_name().unwrap_or_default();
                    if !sim_operator.eq_ignore_ascii_case(operator) {
                        warn!("Operator {:?} not authorized", sim_operator);
                        return;
                    }
                }

                if !self.current_interface().is_interface_configured() {
                    warn!("IMS network interface not well configured");
                    return;
                }

                debug!("Connect to IMS");
                self.connect_to_ims(ip).await;
            }
            _ => {
                info!("Data connection state: DISCONNECTED from {}", network.network_type);
                debug!("Disconnect from IMS: IP connection lost");
                self.disconnect_from_ims(ReasonCode::ConnectionLost).await;
            }
        }
    }

    async fn battery_event(self: &Arc<Self>, status: BatteryStatus) {
        let limit = match self.settings.min_battery_level {
            MinimumBatteryLevel::NeverStop => {
                self.disconnected_by_battery.store(false, Ordering::SeqCst);
                return;
            }
            MinimumBatteryLevel::Percent(limit) => limit,
        };
        info!("Battery level: {}% plugged: {}", status.level, status.plugged);

        if status.level <= limit && !status.plugged {
            if !self.disconnected_by_battery.swap(true, Ordering::SeqCst) {
                info!("Battery below {}%, leaving the IMS", limit);
                self.disconnect_from_ims(ReasonCode::BatteryLow).await;
            }
        } else if self.disconnected_by_battery.swap(false, Ordering::SeqCst) {
            info!("Battery recovered, reconnecting");
            self.connection_event().await;
        }
    }

    async fn connect_to_ims(self: &Arc<Self>, ip: IpAddr) {
        self.current_interface().access().connect(ip);
        self.start_ims_connection().await;
    }

    async fn disconnect_from_ims(&self, reason: ReasonCode) {
        self.stop_ims_connection().await;

        let interface = self.current_interface();
        interface.registration_terminated(reason).await;
        interface.access().disconnect();

        self.set_state(match reason {
            ReasonCode::BatteryLow => ConnectionState::DisconnectedByBattery,
            _ => ConnectionState::Disconnected,
        });
    }

    async fn start_ims_connection(self: &Arc<Self>) {
        let mut polling = self.polling.lock().await;
        if polling
            .as_ref()
            .map_or(false, |task| !task.handle.is_finished())
        {
            return;
        }

        info!("Start the IMS connection manager");
        let cancel = CancellationToken::new();
        let inner = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            inner.poll(token).await;
        });
        *polling = Some(PollingTask { cancel, handle });
        self.set_state(ConnectionState::Connecting);
    }

    async fn stop_ims_connection(&self) {
        let mut polling = self.polling.lock().await;
        let Some(task) = polling.take() else {
            return;
        };

        info!("Stop the IMS connection manager");
        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            if e.is_panic() {
                error!("IMS polling task panicked: {}", e);
            }
        }

        if self.services_started.swap(false, Ordering::SeqCst) {
            self.services.stop_services().await;
        }
    }

    async fn poll(self: Arc<Self>, cancel: CancellationToken) {
        debug!("Start polling of the IMS connection");
        let backoff = RegistrationBackoff::new(
            self.settings.register_retry_base_time(),
            self.settings.register_retry_max_time(),
        );
        let mut failures: u32 = 0;

        loop {
            debug!("Polling: check IMS connection");
            let interface = self.current_interface();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = self.poll_once(&interface) => outcome,
            };

            match outcome {
                Ok(PollOutcome::Registered) => failures = 0,
                Ok(PollOutcome::Checked) => {}
                Ok(PollOutcome::Rejected) => {
                    failures = failures.saturating_add(1);
                    interface.close_stack().await;
                    *self.dns_fields.lock() = None;
                }
                Err(e) => match e.kind() {
                    ErrorKind::Payload | ErrorKind::Network | ErrorKind::ContactManager => {
                        warn!(error = %e, kind = %e.kind(), failures, "Registration attempt failed");
                        failures = failures.saturating_add(1);
                        interface.close_stack().await;
                        *self.dns_fields.lock() = None;
                        self.set_state(ConnectionState::Connecting);
                    }
                    ErrorKind::Runtime => {
                        error!("IMS connection polling stopped: {}", e);
                        break;
                    }
                },
            }

            if cancel.is_cancelled() {
                debug!("IMS connection polling task race condition");
                break;
            }

            let pause = self.pause(&interface, &backoff, failures);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        debug!("IMS connection polling is terminated");
    }

    async fn poll_once(&self, interface: &ImsNetworkInterface) -> Result<PollOutcome> {
        if !interface.is_registered() {
            debug!("Not yet registered to IMS: try registration");
            self.set_state(ConnectionState::Registering);

            let dns = *self.dns_fields.lock();
            if !interface.register(dns).await? {
                debug!("Can't register to the IMS");
                self.set_state(ConnectionState::Connecting);
                return Ok(PollOutcome::Rejected);
            }

            debug!("Registered to the IMS with success");
            self.set_state(ConnectionState::Registered);
            if self.services.is_initialization_finished()
                && !self.services_started.load(Ordering::SeqCst)
            {
                self.start_services().await;
            }
            return Ok(PollOutcome::Registered);
        }

        if !self.services.is_initialization_finished() {
            debug!("Already registered to IMS: IMS services not yet started");
        } else if !self.services_started.load(Ordering::SeqCst) {
            debug!("Already registered to IMS: start IMS services");
            self.start_services().await;
        } else {
            debug!("Already registered to IMS: check IMS services");
            self.services.check_services().await;
        }
        Ok(PollOutcome::Checked)
    }

    async fn start_services(&self) {
        self.services.start_services().await;
        self.services_started.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::ServicesStarted);
    }

    fn pause(
        &self,
        interface: &ImsNetworkInterface,
        backoff: &RegistrationBackoff,
        failures: u32,
    ) -> Duration {
        if !interface.is_registered() {
            if let Some(retry_after) = interface.retry_after() {
                debug!("Wait {:?} before retry registration (Retry-After)", retry_after);
                return retry_after;
            }
            let delay = backoff.next_delay(failures);
            debug!(
                failures,
                delay_ms = delay.as_millis() as u64,
                "Wait before retry registration"
            );
            delay
        } else if !self.services_started.load(Ordering::SeqCst) {
            let delay = self.settings.services_start_retry();
            debug!("Wait {:?} before retry to start services", delay);
            delay
        } else {
            self.settings.service_polling_period()
        }
    }
}
