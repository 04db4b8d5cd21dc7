#![allow(dead_code)]

use bitbucket_exporter::{
    client::BitbucketClient,
    collectors::{config::CollectorConfig, registry::CollectorRegistry},
    config::ExporterConfig,
};
use prometheus::proto::MetricFamily;
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};

/// Find an available port for testing (returns port > 1024)
pub fn get_available_port() -> u16 {
    use std::net::TcpListener;

    // Bind to port 0 lets the OS assign an available ephemeral port
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to random port");
    let port = listener
        .local_addr()
        .expect("Failed to get local addr")
        .port();

    assert!(port > 1024, "Assigned port {} should be > 1024", port);

    port
}

/// Wait for server to be ready on the given port
///
/// # Arguments
/// * `port` - The port number to connect to (should be > 1024)
/// * `max_attempts` - Maximum number of connection attempts (e.g., 50 = 5 seconds at 100ms intervals)
pub async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    use tokio::time::sleep;

    for attempt in 1..=max_attempts {
        if tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port))
            .await
            .is_ok()
        {
            return true;
        }

        if attempt % 10 == 0 {
            eprintln!(
                "Still waiting for server on port {} (attempt {}/{})",
                port, attempt, max_attempts
            );
        }

        sleep(Duration::from_millis(100)).await;
    }

    eprintln!(
        "Failed to connect to server on port {} after {} attempts",
        port, max_attempts
    );
    false
}

/// Get base URL for test server
pub fn get_test_url(port: u16) -> String {
    format!("http://127.0.0.1:{}", port)
}

/// Configuration pointing every collector at `acme`.
pub fn config_yaml(refs_repositories: &[&str], commit_repositories: &[&str]) -> String {
    format!(
        r#"
auth:
  type: basic
  basic:
    username: alice
    password: secret
included_workspaces: ["acme"]
refs:
  included_repositories: {refs}
commit:
  included_repositories: {commit}
"#,
        refs = serde_json::to_string(refs_repositories).unwrap(),
        commit = serde_json::to_string(commit_repositories).unwrap(),
    )
}

pub fn config(refs_repositories: &[&str], commit_repositories: &[&str]) -> ExporterConfig {
    ExporterConfig::from_yaml(&config_yaml(refs_repositories, commit_repositories)).unwrap()
}

/// Registry of the `collectors`, talking to `server`.
pub fn registry(server: &MockServer, config: &ExporterConfig, collectors: &[&str]) -> (CollectorRegistry, prometheus::Registry) {
    let client = BitbucketClient::new(&server.uri(), &config.auth).unwrap();
    let enabled: Vec<String> = collectors.iter().map(ToString::to_string).collect();

    let collectors = CollectorRegistry::new(&client, config, &CollectorConfig::new().with_enabled(&enabled)).unwrap();

    let prom = prometheus::Registry::new();
    collectors.register_metrics(&prom).unwrap();

    (collectors, prom)
}

pub fn repository(workspace: &str, slug: &str, project: &str) -> Value {
    json!({
        "uuid": format!("{{{workspace}-{slug}}}"),
        "slug": slug,
        "name": slug.to_uppercase(),
        "full_name": format!("{workspace}/{slug}"),
        "language": "rust",
        "workspace": {"uuid": format!("{{{workspace}}}"), "slug": workspace, "name": workspace},
        "project": {"uuid": format!("{{{project}}}"), "key": project, "name": project},
        "created_on": "2024-01-02T03:04:05+00:00",
        "updated_on": "2024-06-01T00:00:00+00:00",
        "size": 2048,
        "has_issues": true,
        "has_wiki": false,
        "is_private": true
    })
}

pub fn commit(hash: &str, user_uuid: &str, display_name: &str) -> Value {
    json!({
        "hash": hash,
        "author": {
            "raw": format!("{display_name} <{display_name}@example.com>"),
            "user": {"uuid": user_uuid, "display_name": display_name, "nickname": display_name}
        }
    })
}

/// Paginated envelope; `next` points at `endpoint?page=<next>` on `server`.
pub fn page(server: &MockServer, endpoint: &str, values: Vec<Value>, next: Option<u64>, size: u64) -> Value {
    let mut body = json!({
        "pagelen": values.len(),
        "size": size,
        "values": values,
    });

    if let Some(next) = next {
        body["next"] = json!(format!("{}/{endpoint}?page={next}", server.uri()));
    }

    body
}

/// Serve page `number` of `endpoint`; expected to be requested `times`.
pub async fn mount_page(server: &MockServer, endpoint: &str, number: u64, body: Value, times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/{endpoint}")))
        .and(query_param("page", number.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(times)
        .mount(server)
        .await;
}

/// Serve a single-page repository listing of `workspace`.
pub async fn mount_repositories(server: &MockServer, workspace: &str, repositories: Vec<Value>) {
    let endpoint = format!("repositories/{workspace}");
    let size = repositories.len() as u64;
    let body = page(server, &endpoint, repositories, None, size);

    Mock::given(method("GET"))
        .and(path(format!("/{endpoint}")))
        .and(query_param("page", "1"))
        .and(query_param("role", "member"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Serve the branch and tag counts of `workspace/slug`.
pub async fn mount_refs(server: &MockServer, workspace: &str, slug: &str, branches: u64, tags: u64) {
    for (kind, size) in [("branch", branches), ("tag", tags)] {
        Mock::given(method("GET"))
            .and(path(format!("/repositories/{workspace}/{slug}/refs")))
            .and(query_param("q", format!("type=\"{kind}\"")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "pagelen": 10,
                "size": size,
                "values": []
            })))
            .mount(server)
            .await;
    }
}

/// Serve the member count of `workspace`, expected to be requested `times`.
pub async fn mount_members(server: &MockServer, workspace: &str, size: u64, times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/workspaces/{workspace}/members")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pagelen": 50,
            "size": size,
            "values": []
        })))
        .expect(times)
        .mount(server)
        .await;
}

/// Value of the gauge or counter `name` whose labels include every pair of
/// `labels`.
pub fn metric_value(families: &[MetricFamily], name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    let family = families.iter().find(|f| f.name() == name)?;

    family
        .get_metric()
        .iter()
        .find(|metric| {
            labels.iter().all(|(key, value)| {
                metric
                    .get_label()
                    .iter()
                    .any(|pair| pair.name() == *key && pair.value() == *value)
            })
        })
        .map(|metric| {
            if metric.get_counter().value() != 0.0 {
                metric.get_counter().value()
            } else {
                metric.get_gauge().value()
            }
        })
}

/// Number of series of the family `name`.
pub fn series(families: &[MetricFamily], name: &str) -> usize {
    families
        .iter()
        .find(|f| f.name() == name)
        .map_or(0, |f| f.get_metric().len())
}
