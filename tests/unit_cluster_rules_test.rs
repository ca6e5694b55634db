use coldstored::core::cluster::{
    FIREWALL_TCP_PORTS, FIREWALL_UDP_PORTS, NodeRole, NodeStatus, derive_hostname,
};
use std::str::FromStr;

#[test]
fn test_hostname_derived_from_last_octet() {
    assert_eq!(derive_hostname("10.0.0.11"), "k3s-node-11");
    assert_eq!(derive_hostname("192.168.1.250"), "k3s-node-250");
}

#[test]
fn test_hostname_for_non_ipv4_is_sanitised() {
    let hostname = derive_hostname("cold-store.local");
    assert!(hostname.starts_with("k3s-node-"));
    assert!(hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
}

#[test]
fn test_firewall_port_set() {
    assert_eq!(FIREWALL_TCP_PORTS, &[22, 6443, 10250, 9100]);
    assert_eq!(FIREWALL_UDP_PORTS, &[8472]);
}

#[test]
fn test_status_round_trips_kebab_case() {
    assert_eq!(NodeStatus::Pending.to_string(), "pending");
    assert_eq!(NodeStatus::Ready.to_string(), "ready");
    assert_eq!(
        NodeStatus::from_str("connecting").unwrap(),
        NodeStatus::Connecting
    );
    assert!(NodeStatus::from_str("in-flight").is_err());
    assert_eq!(NodeRole::ControlPlane.to_string(), "control-plane");
    assert_eq!(
        NodeRole::from_str("control-plane").unwrap(),
        NodeRole::ControlPlane
    );
}

#[test]
fn test_lifecycle_transitions() {
    use NodeStatus::*;
    assert!(Pending.can_transition_to(Connecting));
    assert!(Connecting.can_transition_to(Installing));
    assert!(Installing.can_transition_to(Joining));
    assert!(Joining.can_transition_to(Ready));
    assert!(Ready.can_transition_to(Removed));
    // Failed is reachable from anywhere but Removed.
    assert!(Installing.can_transition_to(Failed));
    assert!(Failed.can_transition_to(Connecting));
    // Removed is terminal.
    assert!(!Removed.can_transition_to(Connecting));
    assert!(!Removed.can_transition_to(Failed));
    // No skipping ahead.
    assert!(!Pending.can_transition_to(Ready));
    assert!(!Connecting.can_transition_to(Joining));
}
