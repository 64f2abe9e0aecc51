#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use rcs_ims_core::{
    AuthenticationProcedure, ConnectivityProvider, DnsLookup, DnsResolvedFields, DnsResolver,
    ImsConnectionManager, ImsError, ImsNetworkInterface, ImsServices, ImsSettings,
    KeepAliveManager, NaptrRecord, NetworkInfo, NetworkType, ProxySettings, ReasonCode,
    RegistrationManager, Result, SipManager, SipProtocol, SipStackConfig, SrvRecord, UserProfile,
};

pub const IMSI: &str = "208011234567890";
pub const MOBILE_PROXY: &str = "mobile.ims.test";
pub const WIFI_PROXY: &str = "wifi.ims.test";

/// Shared, ordered record of what the mocks were asked to do
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().iter().any(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }

    /// Index of the first entry equal to `entry`
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

pub async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Canned DNS zone
#[derive(Default)]
pub struct StaticLookup {
    log: CallLog,
    naptr: Mutex<HashMap<String, Vec<NaptrRecord>>>,
    srv: Mutex<HashMap<String, Vec<SrvRecord>>>,
    a: Mutex<HashMap<String, Vec<Ipv4Addr>>>,
    failing: Mutex<Vec<String>>,
}

impl StaticLookup {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn add_naptr(
        &self,
        name: &str,
        order: u16,
        preference: u16,
        service: &str,
        replacement: &str,
    ) {
        self.naptr
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(NaptrRecord {
                order,
                preference,
                flags: "s".into(),
                service: service.into(),
                replacement: replacement.into(),
            });
    }

    pub fn add_srv(&self, name: &str, priority: u16, weight: u16, port: u16, target: &str) {
        self.srv
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(SrvRecord {
                priority,
                weight,
                port,
                target: target.into(),
            });
    }

    pub fn add_a(&self, name: &str, ip: Ipv4Addr) {
        self.a.lock().entry(name.to_string()).or_default().push(ip);
    }

    pub fn clear_a(&self, name: &str) {
        self.a.lock().remove(name);
    }

    /// Every lookup of `name` fails with a resolver error
    pub fn fail(&self, name: &str) {
        self.failing.lock().push(name.to_string());
    }

    fn check(&self, name: &str) -> Result<()> {
        if self.failing.lock().iter().any(|n| n == name) {
            return Err(ImsError::resolution(name, "SERVFAIL"));
        }
        Ok(())
    }
}

#[async_trait]
impl DnsLookup for StaticLookup {
    async fn naptr(&self, name: &str) -> Result<Vec<NaptrRecord>> {
        self.log.push(format!("dns:naptr:{}", name));
        self.check(name)?;
        Ok(self.naptr.lock().get(name).cloned().unwrap_or_default())
    }

    async fn srv(&self, name: &str) -> Result<Vec<SrvRecord>> {
        self.log.push(format!("dns:srv:{}", name));
        self.check(name)?;
        Ok(self.srv.lock().get(name).cloned().unwrap_or_default())
    }

    async fn ipv4(&self, name: &str) -> Result<Vec<Ipv4Addr>> {
        self.log.push(format!("dns:a:{}", name));
        self.check(name)?;
        Ok(self.a.lock().get(name).cloned().unwrap_or_default())
    }
}

pub struct MockKeepAlive {
    tag: &'static str,
    log: CallLog,
    running: AtomicBool,
}

impl MockKeepAlive {
    pub fn new(tag: &'static str, log: CallLog) -> Self {
        Self {
            tag,
            log,
            running: AtomicBool::new(false),
        }
    }
}

impl KeepAliveManager for MockKeepAlive {
    fn start(&self) {
        self.log.push(format!("{}:keep_alive_start", self.tag));
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.log.push(format!("{}:keep_alive_stop", self.tag));
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct MockSip {
    tag: &'static str,
    log: CallLog,
    initialized: AtomicBool,
    config: Mutex<Option<SipStackConfig>>,
    fail_init: AtomicBool,
    pub keep_alive: Arc<MockKeepAlive>,
}

impl MockSip {
    pub fn new(tag: &'static str, log: CallLog) -> Self {
        Self {
            tag,
            keep_alive: Arc::new(MockKeepAlive::new(tag, log.clone())),
            log,
            initialized: AtomicBool::new(false),
            config: Mutex::new(None),
            fail_init: AtomicBool::new(false),
        }
    }

    pub fn last_config(&self) -> Option<SipStackConfig> {
        self.config.lock().clone()
    }

    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SipManager for MockSip {
    async fn init_stack(&self, config: &SipStackConfig) -> Result<()> {
        self.log.push(format!("{}:init_stack", self.tag));
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(ImsError::Network("address in use".into()));
        }
        *self.config.lock() = Some(config.clone());
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close_stack(&self) {
        self.log.push(format!("{}:close_stack", self.tag));
        self.initialized.store(false, Ordering::SeqCst);
    }

    fn is_stack_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn outbound_proxy(&self) -> Option<SocketAddr> {
        if !self.is_stack_initialized() {
            return None;
        }
        self.config.lock().as_ref().map(|c| c.outbound_proxy)
    }

    fn keep_alive(&self) -> Option<Arc<dyn KeepAliveManager>> {
        Some(self.keep_alive.clone())
    }
}

/// Scripted result of one REGISTER attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Accept,
    Reject,
    NetworkError,
    RuntimeError,
}

pub struct MockRegistration {
    tag: &'static str,
    log: CallLog,
    registered: AtomicBool,
    script: Mutex<VecDeque<Attempt>>,
    reason: Mutex<ReasonCode>,
    retry_after: Mutex<Option<Duration>>,
    attempts: AtomicUsize,
}

impl MockRegistration {
    pub fn new(tag: &'static str, log: CallLog) -> Self {
        Self {
            tag,
            log,
            registered: AtomicBool::new(false),
            script: Mutex::new(VecDeque::new()),
            reason: Mutex::new(ReasonCode::Unspecified),
            retry_after: Mutex::new(None),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Results of the next attempts; accepted once the script runs out
    pub fn script(&self, attempts: &[Attempt]) {
        self.script.lock().extend(attempts.iter().copied());
    }

    pub fn set_retry_after(&self, retry_after: Option<Duration>) {
        *self.retry_after.lock() = retry_after;
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistrationManager for MockRegistration {
    async fn register(&self) -> Result<bool> {
        self.log.push(format!("{}:register", self.tag));
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let attempt = self.script.lock().pop_front().unwrap_or(Attempt::Accept);
        match attempt {
            Attempt::Accept => {
                self.registered.store(true, Ordering::SeqCst);
                Ok(true)
            }
            Attempt::Reject => Ok(false),
            Attempt::NetworkError => Err(ImsError::Network("408 Request Timeout".into())),
            Attempt::RuntimeError => Err(ImsError::Runtime("state corrupted".into())),
        }
    }

    async fn deregister(&self) -> Result<()> {
        self.log.push(format!("{}:deregister", self.tag));
        self.registered.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_registration(&self, reason: ReasonCode) {
        self.log.push(format!("{}:stop_registration:{}", self.tag, reason));
        self.registered.store(false, Ordering::SeqCst);
        *self.reason.lock() = reason;
    }

    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    fn reason_code(&self) -> ReasonCode {
        *self.reason.lock()
    }

    fn retry_after(&self) -> Option<Duration> {
        *self.retry_after.lock()
    }
}

pub struct MockConnectivity {
    log: CallLog,
    pub network: Mutex<Option<NetworkInfo>>,
    pub local_ips: Mutex<HashMap<NetworkType, IpAddr>>,
    pub operator: Mutex<Option<String>>,
    pub subscriber_id: Mutex<Option<String>>,
    pub last_account: Mutex<Option<String>>,
    pub current_account: Mutex<Option<String>>,
}

impl MockConnectivity {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            network: Mutex::new(None),
            local_ips: Mutex::new(HashMap::new()),
            operator: Mutex::new(Some("Orange".into())),
            subscriber_id: Mutex::new(Some(IMSI.into())),
            last_account: Mutex::new(None),
            current_account: Mutex::new(None),
        }
    }

    /// Bring `network_type` up with `ip` as the local address
    pub fn attach(&self, network_type: NetworkType, ip: [u8; 4]) {
        *self.network.lock() = Some(NetworkInfo::connected(network_type));
        self.local_ips
            .lock()
            .insert(network_type, IpAddr::V4(Ipv4Addr::from(ip)));
    }

    pub fn detach(&self) {
        *self.network.lock() = None;
    }
}

impl ConnectivityProvider for MockConnectivity {
    fn active_network(&self) -> Option<NetworkInfo> {
        *self.network.lock()
    }

    fn local_ip_address(
        &self,
        _proxy: Option<&DnsResolvedFields>,
        network_type: NetworkType,
    ) -> Option<IpAddr> {
        self.log.push(format!("local_ip:{}", network_type));
        self.local_ips.lock().get(&network_type).copied()
    }

    fn sim_operator_name(&self) -> Option<String> {
        self.operator.lock().clone()
    }

    fn subscriber_id(&self) -> Option<String> {
        self.subscriber_id.lock().clone()
    }

    fn last_user_account(&self) -> Option<String> {
        self.last_account.lock().clone()
    }

    fn current_user_account(&self) -> Option<String> {
        self.current_account.lock().clone()
    }
}

pub struct MockServices {
    log: CallLog,
    initialized: AtomicBool,
    pub profile: Mutex<Option<UserProfile>>,
}

impl MockServices {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            initialized: AtomicBool::new(true),
            profile: Mutex::new(None),
        }
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
    }
}

#[async_trait]
impl ImsServices for MockServices {
    fn is_initialization_finished(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn start_services(&self) {
        self.log.push("start_services");
    }

    async fn stop_services(&self) {
        self.log.push("stop_services");
    }

    async fn check_services(&self) {
        self.log.push("check_services");
    }

    fn load_user_profile(&self, profile: UserProfile) {
        self.log.push(format!("load_profile:{}", profile.home_domain));
        *self.profile.lock() = Some(profile);
    }

    fn handle_sim_has_changed(&self) {
        self.log.push("sim_changed");
    }
}

/// Mobile over UDP with GIBA, Wi-Fi over TCP with Digest, millisecond
/// timers
pub fn test_settings() -> ImsSettings {
    let mut settings = ImsSettings::default();
    settings.mobile = ProxySettings {
        address: Some(MOBILE_PROXY.into()),
        port: 5060,
        protocol: SipProtocol::Udp,
        authentication: AuthenticationProcedure::Giba,
    };
    settings.wifi = ProxySettings {
        address: Some(WIFI_PROXY.into()),
        port: 5060,
        protocol: SipProtocol::Tcp,
        authentication: AuthenticationProcedure::Digest,
    };
    settings.user.username = "alice".into();
    settings.user.home_domain = "rcs.example.com".into();
    settings.register_retry_base_time_ms = 20;
    settings.register_retry_max_time_ms = 200;
    settings.service_polling_period_ms = 50;
    settings.services_start_retry_ms = 20;
    settings
}

/// Mobile GIBA profile home domain for [`IMSI`]
pub const GIBA_DOMAIN: &str = "ims.mnc001.mcc208.3gppnetwork.org";

pub struct Harness {
    pub log: CallLog,
    pub lookup: Arc<StaticLookup>,
    pub mobile_sip: Arc<MockSip>,
    pub wifi_sip: Arc<MockSip>,
    pub mobile_registration: Arc<MockRegistration>,
    pub wifi_registration: Arc<MockRegistration>,
    pub connectivity: Arc<MockConnectivity>,
    pub services: Arc<MockServices>,
    pub manager: ImsConnectionManager,
}

impl Harness {
    pub fn new(settings: ImsSettings) -> Self {
        Self::with(settings, |_| {})
    }

    /// Build with a chance to prepare the mocks before the manager loads
    /// its first profile
    pub fn with(settings: ImsSettings, prepare: impl FnOnce(&MockConnectivity)) -> Self {
        let log = CallLog::default();
        let settings = Arc::new(settings);

        let lookup = Arc::new(StaticLookup::new(log.clone()));
        lookup.add_a(MOBILE_PROXY, Ipv4Addr::new(10, 0, 0, 1));
        lookup.add_a(WIFI_PROXY, Ipv4Addr::new(10, 0, 0, 2));
        let resolver = DnsResolver::new(lookup.clone());

        let mobile_sip = Arc::new(MockSip::new("mobile", log.clone()));
        let wifi_sip = Arc::new(MockSip::new("wifi", log.clone()));
        let mobile_registration = Arc::new(MockRegistration::new("mobile", log.clone()));
        let wifi_registration = Arc::new(MockRegistration::new("wifi", log.clone()));

        let mobile = Arc::new(ImsNetworkInterface::new(
            NetworkType::Mobile,
            settings.clone(),
            resolver.clone(),
            mobile_sip.clone(),
            mobile_registration.clone(),
        ));
        let wifi = Arc::new(ImsNetworkInterface::new(
            NetworkType::Wifi,
            settings.clone(),
            resolver,
            wifi_sip.clone(),
            wifi_registration.clone(),
        ));

        let connectivity = Arc::new(MockConnectivity::new(log.clone()));
        prepare(&connectivity);
        let services = Arc::new(MockServices::new(log.clone()));

        let manager = ImsConnectionManager::new(
            settings,
            mobile,
            wifi,
            connectivity.clone(),
            services.clone(),
        )
        .unwrap();

        Self {
            log,
            lookup,
            mobile_sip,
            wifi_sip,
            mobile_registration,
            wifi_registration,
            connectivity,
            services,
            manager,
        }
    }

    /// Queue a connectivity event and wait for it to be handled
    pub async fn connectivity_changed(&self) {
        self.manager.notify_connectivity_changed().unwrap();
        self.manager.flush().await.unwrap();
    }
}
