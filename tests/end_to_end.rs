//! End-to-end scenarios S1-S6 and invariants 1-7, driving `Core` directly
//! with hand-built `Workload` values instead of a real Docker/libvirt
//! socket (spec §8).

use beacond::config::Config;
use beacond::model::{Core, Workload};
use beacond::supervisor::FakeSupervisor;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

const SELF_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(172, 17, 0, 1));

struct Harness {
    core: Core,
    supervisor: Arc<FakeSupervisor>,
    hosts_file: String,
    wildcards_file: String,
    proxy_file: String,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("haproxy.cfg.template");
    std::fs::write(&template, "# static prefix\n").unwrap();

    let config = Config {
        dns_domain: "my.local.env".to_string(),
        dns_wildcard: false,
        lb_domain: "my.local.env".to_string(),
        docker_socket: "unix:///var/run/docker.sock".to_string(),
        libvirt_socket: "/var/run/libvirt/libvirt-sock".to_string(),
        libvirt_ip_timeout: Duration::from_secs(30),
        external_ip: None,
        haproxy_config_template: template.to_string_lossy().into_owned(),
        haproxy_config_file: dir.path().join("haproxy.cfg").to_string_lossy().into_owned(),
        dnsmasq_hosts_file: dir.path().join("hosts").to_string_lossy().into_owned(),
        dnsmasq_wildcards_file: dir.path().join("wildcards.conf").to_string_lossy().into_owned(),
    };

    let hosts_file = config.dnsmasq_hosts_file.clone();
    let wildcards_file = config.dnsmasq_wildcards_file.clone();
    let proxy_file = config.haproxy_config_file.clone();
    let supervisor = Arc::new(FakeSupervisor::default());
    let core = Core::new(config, supervisor.clone(), SELF_IP);

    Harness { core, supervisor, hosts_file, wildcards_file, proxy_file, _dir: dir }
}

fn workload(source_id: &str, name: &str, hostname: &str, ip: [u8; 4], labels: &[(&str, &str)]) -> Workload {
    Workload {
        source_id: source_id.to_string(),
        name: name.to_string(),
        hostname: hostname.to_string(),
        ip: IpAddr::V4(Ipv4Addr::from(ip)),
        network: "bridge".to_string(),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
    }
}

#[tokio::test]
async fn s1_plain_container_basic_line() {
    let h = harness();
    h.core
        .start(workload("c1", "qwerty", "asdfgh", [172, 17, 0, 7], &[]))
        .await
        .unwrap();

    let hosts = std::fs::read_to_string(&h.hosts_file).unwrap();
    assert!(hosts.contains("172.17.0.7 asdfgh.my.local.env asdfgh qwerty.my.local.env qwerty"));

    let proxy = std::fs::read_to_string(&h.proxy_file).unwrap();
    assert!(proxy.starts_with("# static prefix\n"));
    assert!(!proxy.contains("frontend"));
}

#[tokio::test]
async fn s2_aliases_appended_after_fqdn_first() {
    let h = harness();
    h.core
        .start(workload(
            "c1",
            "qwerty",
            "asdfgh",
            [172, 17, 0, 7],
            &[("dns.aliases", "alias1,alias2")],
        ))
        .await
        .unwrap();

    let hosts = std::fs::read_to_string(&h.hosts_file).unwrap();
    let line = hosts.lines().find(|l| l.starts_with("172.17.0.7")).unwrap();
    assert!(line.starts_with("172.17.0.7 asdfgh.my.local.env"));
    assert!(line.contains("alias1 alias1.my.local.env"));
    assert!(line.contains("alias2 alias2.my.local.env"));
}

#[tokio::test]
async fn s3_wildcard_mapping() {
    let h = harness();
    h.core
        .start(workload(
            "c1",
            "qwerty",
            "asdfgh",
            [172, 17, 0, 7],
            &[("dns.wildcard", "true")],
        ))
        .await
        .unwrap();

    let hosts = std::fs::read_to_string(&h.hosts_file).unwrap();
    assert!(hosts.contains("172.17.0.7 asdfgh.my.local.env asdfgh qwerty.my.local.env qwerty"));

    let wildcards = std::fs::read_to_string(&h.wildcards_file).unwrap();
    for expect in [
        "address=/asdfgh/172.17.0.7",
        "address=/asdfgh.my.local.env/172.17.0.7",
        "address=/qwerty/172.17.0.7",
        "address=/qwerty.my.local.env/172.17.0.7",
    ] {
        assert!(wildcards.contains(expect), "missing {expect:?} in {wildcards:?}");
    }
}

#[tokio::test]
async fn s4_http_label_produces_acl_backend_and_synthetic_dns() {
    let h = harness();
    h.core
        .start(workload(
            "c1",
            "tomcat-server",
            "tomcat-server",
            [172, 17, 0, 2],
            &[("lb.http", "tomcat:8080")],
        ))
        .await
        .unwrap();

    let hosts = std::fs::read_to_string(&h.hosts_file).unwrap();
    assert!(hosts.contains("172.17.0.1 tomcat.my.local.env tomcat"));

    let proxy = std::fs::read_to_string(&h.proxy_file).unwrap();
    assert!(proxy.contains("acl is_tomcat hdr_reg(host) ^(.*\\.|)tomcat(\\..+$|$)"));
    assert!(proxy.contains("backend backend_http_tomcat"));
    assert!(proxy.contains("server tomcat-server 172.17.0.2:8080 check port 8080"));
}

#[tokio::test]
async fn s5_two_backends_same_host_single_dns_entry() {
    let h = harness();
    h.core
        .start(workload(
            "c1",
            "tomcat-server",
            "tomcat-server",
            [172, 17, 0, 2],
            &[("lb.http", "tomcat:8080")],
        ))
        .await
        .unwrap();
    h.core
        .start(workload(
            "c2",
            "tomcat-server-2",
            "tomcat-server-2",
            [172, 17, 0, 3],
            &[("lb.http", "tomcat:8080")],
        ))
        .await
        .unwrap();

    let hosts = std::fs::read_to_string(&h.hosts_file).unwrap();
    assert_eq!(hosts.matches("tomcat.my.local.env").count(), 1);

    let proxy = std::fs::read_to_string(&h.proxy_file).unwrap();
    assert_eq!(proxy.matches("\nbackend backend_http_tomcat").count(), 1);
    assert!(proxy.contains("server tomcat-server 172.17.0.2:8080 check port 8080"));
    assert!(proxy.contains("server tomcat-server-2 172.17.0.3:8080 check port 8080"));
}

#[tokio::test]
async fn s6_tcp_label_produces_frontend_and_roundrobin_backend() {
    let h = harness();
    h.core
        .start(workload(
            "c1",
            "redis-server",
            "redis-server",
            [172, 17, 0, 2],
            &[("lb.tcp", "redis:1234:6379")],
        ))
        .await
        .unwrap();

    let hosts = std::fs::read_to_string(&h.hosts_file).unwrap();
    assert!(hosts.contains("172.17.0.1 redis.my.local.env redis"));

    let proxy = std::fs::read_to_string(&h.proxy_file).unwrap();
    assert!(proxy.contains("frontend frontend_tcp_redis_1234"));
    assert!(proxy.contains("bind *:1234"));
    assert!(proxy.contains("mode tcp"));
    assert!(proxy.contains("backend backend_tcp_redis_1234"));
    assert!(proxy.contains("balance roundrobin"));
    assert!(proxy.contains("server redis-server 172.17.0.2:6379 check port 6379"));
}

#[tokio::test]
async fn invariant_1_idempotent_restart_fires_no_extra_reload() {
    let h = harness();
    let w = workload("c1", "web", "web", [10, 0, 0, 2], &[]);
    h.core.start(w.clone()).await.unwrap();
    let first = std::fs::read_to_string(&h.hosts_file).unwrap();
    h.core.start(w).await.unwrap();
    let second = std::fs::read_to_string(&h.hosts_file).unwrap();

    assert_eq!(first, second);
    assert_eq!(h.supervisor.reload_dns_calls(), 1);
}

#[tokio::test]
async fn invariant_2_removal_completeness() {
    let h = harness();
    h.core
        .start(workload(
            "c1",
            "tomcat-server",
            "tomcat-server",
            [172, 17, 0, 2],
            &[("lb.http", "tomcat:8080")],
        ))
        .await
        .unwrap();
    h.core.stop("c1").await.unwrap();

    let hosts = std::fs::read_to_string(&h.hosts_file).unwrap();
    assert!(!hosts.contains("tomcat"));
    let proxy = std::fs::read_to_string(&h.proxy_file).unwrap();
    assert!(!proxy.contains("tomcat"));
}

#[tokio::test]
async fn invariant_3_reference_counting_survives_one_removal() {
    let h = harness();
    h.core
        .start(workload(
            "c1",
            "tomcat-server",
            "tomcat-server",
            [172, 17, 0, 2],
            &[("lb.http", "tomcat:8080")],
        ))
        .await
        .unwrap();
    h.core
        .start(workload(
            "c2",
            "tomcat-server-2",
            "tomcat-server-2",
            [172, 17, 0, 3],
            &[("lb.http", "tomcat:8080")],
        ))
        .await
        .unwrap();
    h.core.stop("c1").await.unwrap();

    let hosts = std::fs::read_to_string(&h.hosts_file).unwrap();
    assert!(hosts.contains("tomcat.my.local.env"));

    let proxy = std::fs::read_to_string(&h.proxy_file).unwrap();
    assert_eq!(proxy.matches("server ").count(), 1);
    assert!(proxy.contains("server tomcat-server-2 172.17.0.3:8080 check port 8080"));
}

#[tokio::test]
async fn invariant_4_synthetic_dns_flush_on_host_change() {
    let h = harness();
    h.core
        .start(workload(
            "c1",
            "app",
            "app",
            [172, 17, 0, 2],
            &[("lb.http", "a:80")],
        ))
        .await
        .unwrap();
    assert!(std::fs::read_to_string(&h.hosts_file).unwrap().contains("a.my.local.env"));

    h.core
        .start(workload(
            "c1",
            "app",
            "app",
            [172, 17, 0, 2],
            &[("lb.http", "b:80")],
        ))
        .await
        .unwrap();

    let hosts = std::fs::read_to_string(&h.hosts_file).unwrap();
    assert!(hosts.contains("b.my.local.env"));
    assert!(!hosts.lines().any(|l| l.contains(" a ") || l.contains(" a.my.local.env")));
}

#[tokio::test]
async fn invariant_7_template_prefix_preserved() {
    let h = harness();
    h.core
        .start(workload(
            "c1",
            "tomcat-server",
            "tomcat-server",
            [172, 17, 0, 2],
            &[("lb.http", "tomcat:8080")],
        ))
        .await
        .unwrap();

    let proxy = std::fs::read_to_string(&h.proxy_file).unwrap();
    assert!(proxy.starts_with("# static prefix\n"));
}
