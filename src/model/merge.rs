// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Order-independent reductions of per-cluster snapshots into one desired state.

use super::namespace::LazyStatus;
use super::service::{ServiceSnapshot, ServiceSpec};
use std::collections::{BTreeMap, BTreeSet};

/// Namespace lazy status: any opt-out disables, otherwise any annotated copy enables
pub fn namespace_status(has_opt_out: bool, cluster_flags: impl IntoIterator<Item = bool>) -> LazyStatus {
    if has_opt_out {
        LazyStatus::Disabled
    } else if cluster_flags.into_iter().any(|lazy| lazy) {
        LazyStatus::Enabled
    } else {
        LazyStatus::None
    }
}

/// Split ports into `(http, tcp)`: a port is HTTP iff every snapshot classifies it HTTP
pub fn merge_ports<'a>(
    snapshots: impl IntoIterator<Item = &'a ServiceSnapshot>,
) -> (BTreeSet<u16>, BTreeSet<u16>) {
    let snapshots: Vec<&ServiceSnapshot> = snapshots.into_iter().collect();
    let all: BTreeSet<u16> = snapshots
        .iter()
        .flat_map(|s| s.http_ports.iter().chain(s.tcp_ports.iter()).copied())
        .collect();

    all.into_iter()
        .partition(|port| snapshots.iter().all(|s| s.http_ports.contains(port)))
}

/// Lazy loading is off if any copy lacks a pod selector, else the namespace overrides the
/// per-cluster annotations, which are OR-ed when the namespace has no opinion
pub fn merge_lazy<'a>(
    namespace: LazyStatus,
    snapshots: impl IntoIterator<Item = &'a ServiceSnapshot>,
) -> bool {
    let snapshots: Vec<&ServiceSnapshot> = snapshots.into_iter().collect();
    if snapshots.is_empty() || snapshots.iter().any(|s| s.selector.is_empty()) {
        return false;
    }

    match namespace {
        LazyStatus::Disabled => false,
        LazyStatus::Enabled => true,
        LazyStatus::None => snapshots.iter().any(|s| s.lazy),
    }
}

/// Pod selector of the first cluster (in cluster order) that has one
pub fn merge_selector(clusters: &BTreeMap<String, ServiceSnapshot>) -> BTreeMap<String, String> {
    clusters
        .values()
        .find(|s| !s.selector.is_empty())
        .map(|s| s.selector.clone())
        .unwrap_or_default()
}

pub fn merge_spec(namespace: LazyStatus, clusters: &BTreeMap<String, ServiceSnapshot>) -> ServiceSpec {
    let (http_ports, tcp_ports) = merge_ports(clusters.values());
    ServiceSpec {
        http_ports,
        tcp_ports,
        lazy_enabled: merge_lazy(namespace, clusters.values()),
        selector: merge_selector(clusters),
        cluster_ips: clusters
            .values()
            .filter_map(|s| s.cluster_ip.clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(http: &[u16], tcp: &[u16], selector: bool, lazy: bool) -> ServiceSnapshot {
        ServiceSnapshot {
            cluster_ip: Some("10.96.0.10".to_string()),
            http_ports: http.iter().copied().collect(),
            tcp_ports: tcp.iter().copied().collect(),
            selector: if selector {
                BTreeMap::from([("app".to_string(), "orders".to_string())])
            } else {
                BTreeMap::new()
            },
            lazy,
        }
    }

    #[test]
    fn test_port_is_http_only_when_http_everywhere() {
        let snapshots = [
            snapshot(&[8080], &[], true, false),
            snapshot(&[8080], &[], true, false),
            snapshot(&[], &[8080], true, false),
        ];
        let (http, tcp) = merge_ports(snapshots.iter());
        assert!(http.is_empty());
        assert_eq!(tcp, BTreeSet::from([8080]));

        let (http, tcp) = merge_ports(snapshots[..2].iter());
        assert_eq!(http, BTreeSet::from([8080]));
        assert!(tcp.is_empty());
    }

    #[test]
    fn test_port_missing_in_one_cluster_is_tcp() {
        let snapshots = [
            snapshot(&[8080, 9090], &[], true, false),
            snapshot(&[8080], &[], true, false),
        ];
        let (http, tcp) = merge_ports(snapshots.iter());
        assert_eq!(http, BTreeSet::from([8080]));
        assert_eq!(tcp, BTreeSet::from([9090]));
    }

    #[test]
    fn test_namespace_overrides_cluster_flags() {
        let off = [snapshot(&[80], &[], true, false), snapshot(&[80], &[], true, false)];
        let on = [snapshot(&[80], &[], true, true), snapshot(&[80], &[], true, true)];
        let mixed = [snapshot(&[80], &[], true, true), snapshot(&[80], &[], true, false)];

        for copies in [&off, &on, &mixed] {
            assert!(!merge_lazy(LazyStatus::Disabled, copies.iter()));
            assert!(merge_lazy(LazyStatus::Enabled, copies.iter()));
        }
        assert!(!merge_lazy(LazyStatus::None, off.iter()));
        assert!(merge_lazy(LazyStatus::None, on.iter()));
        assert!(merge_lazy(LazyStatus::None, mixed.iter()));
    }

    #[test]
    fn test_missing_selector_forces_lazy_off() {
        let copies = [snapshot(&[80], &[], true, true), snapshot(&[80], &[], false, true)];
        assert!(!merge_lazy(LazyStatus::Enabled, copies.iter()));
        assert!(!merge_lazy(LazyStatus::None, copies.iter()));
    }

    #[test]
    fn test_no_copies_is_not_lazy() {
        assert!(!merge_lazy(LazyStatus::Enabled, std::iter::empty::<&ServiceSnapshot>()));
    }

    #[test]
    fn test_namespace_status() {
        assert_eq!(namespace_status(true, [true, true]), LazyStatus::Disabled);
        assert_eq!(namespace_status(false, [false, true]), LazyStatus::Enabled);
        assert_eq!(namespace_status(false, [false]), LazyStatus::None);
        assert_eq!(namespace_status(false, []), LazyStatus::None);
    }

    #[test]
    fn test_merge_spec_is_independent_of_insertion_order() {
        let a = snapshot(&[8080], &[5432], true, true);
        let mut b = snapshot(&[8080], &[], true, false);
        b.cluster_ip = Some("10.100.0.7".to_string());

        let first = BTreeMap::from([("east".to_string(), a.clone()), ("west".to_string(), b.clone())]);
        let mut second = BTreeMap::new();
        second.insert("west".to_string(), b);
        second.insert("east".to_string(), a);

        let spec = merge_spec(LazyStatus::None, &first);
        assert_eq!(spec, merge_spec(LazyStatus::None, &second));
        assert_eq!(spec.http_ports, BTreeSet::from([8080]));
        assert_eq!(spec.tcp_ports, BTreeSet::from([5432]));
        assert!(spec.lazy_enabled);
        assert_eq!(spec.cluster_ips.len(), 2);
    }
}
