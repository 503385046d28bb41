// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use ccentral::{Client, ClientConfig, Error};
use mockito::{Matcher, Server};

fn etcd_node(key: &str, value: &str) -> String {
    serde_json::json!({
        "action": "get",
        "node": { "key": key, "value": value, "modifiedIndex": 3, "createdIndex": 3 }
    })
    .to_string()
}

#[test]
fn refresh_cycle_against_etcd() {
    let mut server = Server::new();

    let schema = server
        .mock("PUT", "/v2/keys/ccentral/services/service/schema")
        .match_body(Matcher::UrlEncoded(
            "value".into(),
            r#"{"retries":{"title":"Retries","type":"integer","default":"3","description":""}}"#
                .into(),
        ))
        .with_status(201)
        .expect(1)
        .create();
    let config = server
        .mock("GET", "/v2/keys/ccentral/services/service/config")
        .with_status(200)
        .with_body(etcd_node(
            "/ccentral/services/service/config",
            r#"{"retries":{"value":"5"},"v":{"value":"9"}}"#,
        ))
        .expect(1)
        .create();
    let instance = server
        .mock(
            "PUT",
            Matcher::Regex(r"^/v2/keys/ccentral/services/service/clients/[0-9a-f]{32}$".into()),
        )
        .match_body(Matcher::UrlEncoded("ttl".into(), "120".into()))
        .with_status(201)
        .expect(1)
        .create();

    let client = Client::new("service", &server.host_with_port(), 60).unwrap();
    client.register_field("retries", "Retries", "integer", 3, "");

    assert_eq!(client.get("retries").unwrap(), "5");
    assert_eq!(client.get_version().unwrap(), "9");

    schema.assert();
    config.assert();
    instance.assert();
}

#[test]
fn missing_config_falls_back_to_defaults() {
    let mut server = Server::new();
    server
        .mock("PUT", Matcher::Any)
        .with_status(201)
        .create();
    server
        .mock("GET", "/v2/keys/ccentral/services/service/config")
        .with_status(404)
        .with_body(r#"{"errorCode":100,"message":"Key not found"}"#)
        .create();

    let client = Client::new("service", &server.host_with_port(), 60).unwrap();
    client.register_field("retries", "Retries", "integer", 3, "");

    assert_eq!(client.get("retries").unwrap(), "3");
    assert_eq!(client.get_version().unwrap(), "defaults");
}

#[test]
fn unreachable_store_only_fails_required_clients() {
    let mut server = Server::new();
    server
        .mock("PUT", Matcher::Any)
        .with_status(201)
        .create();
    server
        .mock("GET", "/v2/keys/ccentral/services/service/config")
        .with_status(503)
        .create();

    let lenient = Client::new("service", &server.host_with_port(), 60).unwrap();
    lenient.register_field("retries", "Retries", "integer", 3, "");
    assert_eq!(lenient.get("retries").unwrap(), "3");

    let strict = Client::connect(ClientConfig {
        store_target: server.host_with_port(),
        required_on_launch: true,
        ..ClientConfig::new("service")
    })
    .unwrap();
    strict.register_field("retries", "Retries", "integer", 3, "");
    assert!(matches!(
        strict.get("retries"),
        Err(Error::ConfigPullFailed(_))
    ));
}

#[test]
fn service_metric_goes_straight_to_info_key() {
    let mut server = Server::new();
    let info = server
        .mock("PUT", "/v2/keys/ccentral/services/service/info/key")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("value".into(), "data".into()),
            Matcher::UrlEncoded("ttl".into(), "50".into()),
        ]))
        .with_status(201)
        .create();

    let client = Client::connect(ClientConfig {
        store_target: server.host_with_port(),
        auto_refresh: false,
        ..ClientConfig::new("service")
    })
    .unwrap();
    client
        .report_service_metric("key", "data", Some(std::time::Duration::from_secs(50)))
        .unwrap();
    info.assert();
}
