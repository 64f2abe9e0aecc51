mod common;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use common::{
    test_settings, wait_for, Attempt, Harness, MockRegistration, MockSip, StaticLookup,
    GIBA_DOMAIN, WIFI_PROXY,
};
use rcs_ims_core::{
    BatteryStatus, ConnectionState, DnsResolver, ImsConnectionManager, ImsError,
    ImsNetworkInterface, ImsSettings, MinimumBatteryLevel, NetworkAccessType, NetworkInfo,
    NetworkType, ReasonCode, RegistrationManager, SipProtocol,
};

const MOBILE_IP: [u8; 4] = [192, 168, 0, 10];
const WIFI_IP: [u8; 4] = [192, 168, 1, 10];

async fn connected(settings: ImsSettings) -> Harness {
    let h = Harness::new(settings);
    h.connectivity.attach(NetworkType::Mobile, MOBILE_IP);
    h.manager.initialize().unwrap();
    h.manager.flush().await.unwrap();
    wait_for(|| h.manager.are_services_started()).await;
    h
}

async fn wait_polling_stopped(manager: &ImsConnectionManager) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while manager.is_polling().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

fn battery(level: u8, plugged: bool) -> BatteryStatus {
    BatteryStatus { level, plugged }
}

#[tokio::test]
async fn test_initial_profile_from_current_interface() {
    let h = Harness::new(test_settings());

    assert!(h.manager.is_connected_to_mobile());
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    let profile = h.services.profile.lock().clone().unwrap();
    assert_eq!(profile.home_domain, GIBA_DOMAIN);
}

#[tokio::test]
async fn test_mismatched_interfaces_rejected() {
    let h = Harness::new(test_settings());
    let settings = Arc::new(test_settings());
    let lookup = Arc::new(StaticLookup::new(h.log.clone()));
    let mobile = || {
        Arc::new(ImsNetworkInterface::new(
            NetworkType::Mobile,
            settings.clone(),
            DnsResolver::new(lookup.clone()),
            Arc::new(MockSip::new("mobile", h.log.clone())),
            Arc::new(MockRegistration::new("mobile", h.log.clone())),
        ))
    };

    let result = ImsConnectionManager::new(
        settings.clone(),
        mobile(),
        mobile(),
        h.connectivity.clone(),
        h.services.clone(),
    );

    assert!(matches!(result, Err(ImsError::Configuration(_))));
}

#[tokio::test]
async fn test_registers_and_starts_services() {
    let h = connected(test_settings()).await;

    assert!(h.manager.is_registered());
    assert!(h.manager.is_polling().await);
    assert_eq!(h.manager.state(), ConnectionState::ServicesStarted);
    assert_eq!(
        h.manager.mobile_interface().access().ip_address(),
        Some(IpAddr::V4(Ipv4Addr::from(MOBILE_IP)))
    );
    assert_eq!(h.log.count("start_services"), 1);

    // Registered with services up: the loop only checks them from now on
    wait_for(|| h.log.contains("check_services")).await;
    assert_eq!(h.log.count("start_services"), 1);
    assert_eq!(h.mobile_registration.attempts(), 1);
}

#[tokio::test]
async fn test_state_published_on_watch() {
    let h = Harness::new(test_settings());
    let mut rx = h.manager.subscribe();
    h.connectivity.attach(NetworkType::Mobile, MOBILE_IP);

    h.manager.initialize().unwrap();
    tokio::time::timeout(
        Duration::from_secs(3),
        rx.wait_for(|state| *state == ConnectionState::ServicesStarted),
    )
    .await
    .unwrap()
    .unwrap();

    h.connectivity.detach();
    h.manager.notify_connectivity_changed().unwrap();
    tokio::time::timeout(
        Duration::from_secs(3),
        rx.wait_for(|state| *state == ConnectionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn test_interface_switch_order() {
    let h = connected(test_settings()).await;
    h.log.clear();

    h.connectivity.attach(NetworkType::Wifi, WIFI_IP);
    h.connectivity_changed().await;

    let stop = h.log.position("mobile:stop_registration:connection lost").unwrap();
    let close = h.log.position("mobile:close_stack").unwrap();
    let profile = h.log.position("load_profile:rcs.example.com").unwrap();
    let dns = h.log.position("dns:naptr:wifi.ims.test").unwrap();
    assert!(stop < close, "{:?}", h.log.entries());
    assert!(close < profile, "{:?}", h.log.entries());
    assert!(profile < dns, "{:?}", h.log.entries());
    assert!(h.log.position("stop_services").unwrap() < stop);

    assert!(h.manager.is_connected_to_wifi());
    assert!(!h.manager.mobile_interface().access().is_connected());
    assert_eq!(h.manager.registration_reason_code(), ReasonCode::Unspecified);

    wait_for(|| h.wifi_registration.is_registered()).await;
    let config = h.wifi_sip.last_config().unwrap();
    assert_eq!(config.protocol, SipProtocol::Tcp);
    assert_eq!(config.outbound_proxy.ip(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
}

#[tokio::test]
async fn test_same_ip_is_a_no_op() {
    let h = connected(test_settings()).await;
    h.log.clear();

    h.connectivity_changed().await;

    assert!(h.log.contains("local_ip:mobile"));
    assert_eq!(h.log.count_prefix("mobile:stop_registration"), 0);
    assert!(h.manager.is_polling().await);
    assert!(h.manager.is_registered());
}

#[tokio::test]
async fn test_ip_change_reconnects() {
    let h = connected(test_settings()).await;
    h.log.clear();

    h.connectivity.attach(NetworkType::Mobile, [192, 168, 0, 77]);
    h.connectivity_changed().await;

    assert!(h.log.contains("mobile:stop_registration:connection lost"));
    assert_eq!(
        h.manager.mobile_interface().access().ip_address(),
        Some(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 77)))
    );
    wait_for(|| h.manager.are_services_started()).await;
    assert_eq!(h.mobile_registration.attempts(), 2);
}

#[tokio::test]
async fn test_no_network_disconnects() {
    let h = connected(test_settings()).await;

    h.connectivity.detach();
    h.connectivity_changed().await;

    assert!(!h.manager.is_polling().await);
    assert!(!h.manager.is_registered());
    assert!(!h.manager.are_services_started());
    assert!(!h.manager.mobile_interface().access().is_connected());
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    assert!(h.log.contains("stop_services"));
}

#[tokio::test]
async fn test_disconnected_network_info() {
    let h = connected(test_settings()).await;

    *h.connectivity.network.lock() = Some(NetworkInfo {
        network_type: NetworkType::Mobile,
        connected: false,
        roaming: false,
    });
    h.connectivity.local_ips.lock().clear();
    h.connectivity_changed().await;

    assert!(!h.manager.is_polling().await);
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_roaming_reported() {
    let h = Harness::new(test_settings());
    assert!(!h.manager.is_in_roaming());

    *h.connectivity.network.lock() = Some(NetworkInfo {
        network_type: NetworkType::Mobile,
        connected: true,
        roaming: true,
    });
    assert!(h.manager.is_in_roaming());
}

#[tokio::test]
async fn test_sim_swap_on_mobile() {
    let h = Harness::with(test_settings(), |c| {
        *c.last_account.lock() = Some("alice".into());
        *c.current_account.lock() = Some("bob".into());
    });
    h.connectivity.attach(NetworkType::Mobile, MOBILE_IP);

    h.connectivity_changed().await;

    assert!(h.log.contains("sim_changed"));
    assert!(!h.log.contains("local_ip:mobile"));
    assert!(!h.manager.is_polling().await);
}

#[tokio::test]
async fn test_sim_without_account_counts_as_swap() {
    let h = Harness::with(test_settings(), |c| {
        *c.last_account.lock() = Some("alice".into());
    });
    h.connectivity.attach(NetworkType::Mobile, MOBILE_IP);

    h.connectivity_changed().await;

    assert!(h.log.contains("sim_changed"));
}

#[tokio::test]
async fn test_same_account_any_case() {
    let h = Harness::with(test_settings(), |c| {
        *c.last_account.lock() = Some("Alice".into());
        *c.current_account.lock() = Some("alice".into());
    });
    h.connectivity.attach(NetworkType::Mobile, MOBILE_IP);

    h.connectivity_changed().await;

    assert!(!h.log.contains("sim_changed"));
    assert!(h.manager.is_polling().await);
}

#[tokio::test]
async fn test_sim_swap_ignored_on_wifi() {
    let h = Harness::with(test_settings(), |c| {
        *c.last_account.lock() = Some("alice".into());
        *c.current_account.lock() = Some("bob".into());
    });
    h.connectivity.attach(NetworkType::Wifi, WIFI_IP);

    h.connectivity_changed().await;

    assert!(!h.log.contains("sim_changed"));
    assert!(h.manager.is_connected_to_wifi());
    assert!(h.manager.is_polling().await);
}

#[tokio::test]
async fn test_access_type_filter() {
    let mut settings = test_settings();
    settings.network_access = NetworkAccessType::Wifi;
    let h = Harness::new(settings);
    h.connectivity.attach(NetworkType::Mobile, MOBILE_IP);

    h.connectivity_changed().await;

    assert!(!h.manager.is_polling().await);
    assert!(!h.manager.mobile_interface().access().is_connected());

    h.connectivity.attach(NetworkType::Wifi, WIFI_IP);
    h.connectivity_changed().await;
    assert!(h.manager.is_polling().await);
}

#[tokio::test]
async fn test_operator_filter() {
    let mut settings = test_settings();
    settings.network_operator = "orange".into();

    let allowed = Harness::new(settings.clone());
    allowed.connectivity.attach(NetworkType::Mobile, MOBILE_IP);
    allowed.connectivity_changed().await;
    assert!(allowed.manager.is_polling().await);

    let denied = Harness::new(settings);
    *denied.connectivity.operator.lock() = Some("SFR".into());
    denied.connectivity.attach(NetworkType::Mobile, MOBILE_IP);
    denied.connectivity_changed().await;
    assert!(!denied.manager.is_polling().await);
}

#[tokio::test]
async fn test_unconfigured_interface_not_connected() {
    let mut settings = test_settings();
    settings.mobile.address = None;
    let h = Harness::new(settings);
    h.connectivity.attach(NetworkType::Mobile, MOBILE_IP);

    h.connectivity_changed().await;

    assert!(!h.manager.is_polling().await);
    assert_eq!(h.mobile_registration.attempts(), 0);
}

#[tokio::test]
async fn test_dns_failure_on_switch_is_tolerated() {
    let h = connected(test_settings()).await;
    h.lookup.clear_a(WIFI_PROXY);

    h.connectivity.attach(NetworkType::Wifi, WIFI_IP);
    h.connectivity_changed().await;

    assert!(h.manager.is_connected_to_wifi());
    assert!(h.manager.is_polling().await);
    assert_eq!(h.manager.dns_resolved_fields(), None);

    // Unresolvable proxy counts as a failed attempt; polling keeps going
    h.lookup.add_a(WIFI_PROXY, Ipv4Addr::new(10, 0, 0, 2));
    wait_for(|| h.manager.are_services_started()).await;
    assert!(h.manager.is_registered());
}

#[tokio::test]
async fn test_services_wait_for_initialization() {
    let h = Harness::new(test_settings());
    h.services.set_initialized(false);
    h.connectivity.attach(NetworkType::Mobile, MOBILE_IP);

    h.connectivity_changed().await;
    wait_for(|| h.manager.state() == ConnectionState::Registered).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!h.manager.are_services_started());
    assert_eq!(h.mobile_registration.attempts(), 1);

    h.services.set_initialized(true);
    wait_for(|| h.manager.are_services_started()).await;
}

#[tokio::test]
async fn test_rejections_back_off_and_re_resolve() {
    let h = Harness::new(test_settings());
    h.mobile_registration.script(&[Attempt::Reject, Attempt::Reject]);
    h.connectivity.attach(NetworkType::Mobile, MOBILE_IP);

    h.connectivity_changed().await;
    wait_for(|| h.manager.are_services_started()).await;

    assert_eq!(h.mobile_registration.attempts(), 3);
    assert!(h.log.count("mobile:close_stack") >= 2);
    assert_eq!(h.log.count("dns:naptr:mobile.ims.test"), 3);
}

#[tokio::test]
async fn test_retry_after_overrides_backoff() {
    let mut settings = test_settings();
    settings.register_retry_base_time_ms = 60_000;
    settings.register_retry_max_time_ms = 600_000;
    let h = Harness::new(settings);
    h.mobile_registration.script(&[Attempt::Reject]);
    h.mobile_registration
        .set_retry_after(Some(Duration::from_millis(20)));
    h.connectivity.attach(NetworkType::Mobile, MOBILE_IP);

    h.connectivity_changed().await;

    wait_for(|| h.manager.is_registered()).await;
    assert_eq!(h.mobile_registration.attempts(), 2);
}

#[tokio::test]
async fn test_network_error_counts_as_failure() {
    let h = Harness::new(test_settings());
    h.mobile_registration.script(&[Attempt::NetworkError]);
    h.connectivity.attach(NetworkType::Mobile, MOBILE_IP);

    h.connectivity_changed().await;
    wait_for(|| h.manager.are_services_started()).await;

    assert_eq!(h.mobile_registration.attempts(), 2);
    assert!(h.log.contains("mobile:close_stack"));
}

#[tokio::test]
async fn test_runtime_error_ends_polling() {
    let h = Harness::new(test_settings());
    h.mobile_registration.script(&[Attempt::RuntimeError]);
    h.connectivity.attach(NetworkType::Mobile, MOBILE_IP);

    h.connectivity_changed().await;
    wait_polling_stopped(&h.manager).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.mobile_registration.attempts(), 1);
    assert!(!h.manager.is_registered());
}

#[tokio::test]
async fn test_battery_low_disconnects_and_recovers() {
    let mut settings = test_settings();
    settings.min_battery_level = MinimumBatteryLevel::Percent(10);
    let h = connected(settings).await;

    h.manager.notify_battery_changed(battery(5, false)).unwrap();
    h.manager.flush().await.unwrap();

    assert!(h.manager.is_disconnected_by_battery());
    assert_eq!(h.manager.state(), ConnectionState::DisconnectedByBattery);
    assert_eq!(h.manager.registration_reason_code(), ReasonCode::BatteryLow);
    assert!(!h.manager.is_polling().await);
    assert_eq!(h.log.count("mobile:stop_registration:battery low"), 1);

    // Still low: no second disconnect
    h.manager.notify_battery_changed(battery(4, false)).unwrap();
    h.manager.flush().await.unwrap();
    assert_eq!(h.log.count("mobile:stop_registration:battery low"), 1);

    // Connectivity changes are ignored while disconnected by battery
    h.log.clear();
    h.connectivity_changed().await;
    assert!(!h.log.contains("local_ip:mobile"));
    assert!(!h.manager.is_polling().await);

    h.manager.notify_battery_changed(battery(50, false)).unwrap();
    h.manager.flush().await.unwrap();
    assert!(!h.manager.is_disconnected_by_battery());
    assert!(h.manager.is_polling().await);
    wait_for(|| h.manager.are_services_started()).await;
}

#[tokio::test]
async fn test_battery_low_while_plugged_keeps_connection() {
    let mut settings = test_settings();
    settings.min_battery_level = MinimumBatteryLevel::Percent(20);
    let h = connected(settings).await;

    h.manager.notify_battery_changed(battery(20, true)).unwrap();
    h.manager.flush().await.unwrap();

    assert!(!h.manager.is_disconnected_by_battery());
    assert!(h.manager.is_polling().await);
}

#[tokio::test]
async fn test_battery_never_stop() {
    let h = connected(test_settings()).await;

    h.manager.notify_battery_changed(battery(1, false)).unwrap();
    h.manager.flush().await.unwrap();

    assert!(!h.manager.is_disconnected_by_battery());
    assert!(h.manager.is_registered());
}

#[tokio::test]
async fn test_terminate_unregisters() {
    let h = connected(test_settings()).await;
    h.log.clear();

    h.manager.terminate().await;

    let stop = h.log.position("stop_services").unwrap();
    let deregister = h.log.position("mobile:deregister").unwrap();
    assert!(stop < deregister);
    assert!(h.log.contains("mobile:close_stack"));
    assert!(!h.manager.is_polling().await);
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    assert!(h.manager.notify_connectivity_changed().is_err());
}
