//! Сборка ссылок подключения из клиента и inbound'а.
//!
//! Чистые функции без I/O: ссылка каждый раз собирается заново из текущего
//! состояния панели и нигде не хранится.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use thiserror::Error;

use crate::xui::model::{Client, Inbound, Protocol};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("У клиента {email} нет UUID, ссылка {protocol} невозможна")]
    MissingId { email: String, protocol: &'static str },

    #[error("У клиента {email} нет пароля, ссылка trojan невозможна")]
    MissingPassword { email: String },

    #[error("Протокол {0} не поддерживается для сборки ссылки")]
    UnsupportedProtocol(String),
}

/// Хост VPN-сервера из адреса панели: схема отбрасывается, берётся часть до
/// первого двоеточия (порт панели клиенту не нужен). Когда панель и сервер
/// живут на разных именах, хост задаётся явно в конфигурации.
pub fn server_host_from_base_url(base_url: &str) -> String {
    let without_scheme = base_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(base_url);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    authority
        .split(':')
        .next()
        .unwrap_or(authority)
        .to_string()
}

/// Собирает ссылку подключения по протоколу inbound'а.
pub fn build_client_link(
    client: &Client,
    inbound: &Inbound,
    server_host: &str,
) -> Result<String, LinkError> {
    match &inbound.protocol {
        Protocol::Vless => build_vless(client, inbound, server_host),
        Protocol::Vmess => build_vmess(client, inbound, server_host),
        Protocol::Trojan => build_trojan(client, inbound, server_host),
        Protocol::Other(raw) => Err(LinkError::UnsupportedProtocol(raw.clone())),
    }
}

fn build_vless(client: &Client, inbound: &Inbound, host: &str) -> Result<String, LinkError> {
    if client.id.is_empty() {
        return Err(LinkError::MissingId {
            email: client.email.clone(),
            protocol: "vless",
        });
    }

    let stream = &inbound.stream;
    let mut link = format!(
        "vless://{}@{}:{}?type={}&security={}",
        client.id, host, inbound.port, stream.network, stream.security
    );

    if stream.security == "reality" {
        let reality = stream.reality_settings.clone().unwrap_or_default();
        let fingerprint = if reality.settings.fingerprint.is_empty() {
            "chrome"
        } else {
            reality.settings.fingerprint.as_str()
        };
        let sni = if reality.settings.server_name.is_empty() {
            reality.server_names.first().map(String::as_str).unwrap_or("")
        } else {
            reality.settings.server_name.as_str()
        };
        let spider = if reality.settings.spider_x.is_empty() {
            "/"
        } else {
            reality.settings.spider_x.as_str()
        };

        link.push_str(&format!(
            "&pbk={}&fp={}&sni={}",
            reality.settings.public_key, fingerprint, sni
        ));
        if let Some(short_id) = reality.short_ids.first() {
            link.push_str(&format!("&sid={}", short_id));
        }
        link.push_str(&format!("&spx={}", urlencoding::encode(spider)));
    }

    if stream.network == "ws" {
        let ws = stream.ws_settings.clone().unwrap_or_default();
        link.push_str(&format!("&host={}&path={}", ws.host(), ws.path));
    }

    link.push('#');
    link.push_str(&inbound.remark);
    Ok(link)
}

/// JSON-представление vmess-ссылки версии 2.
#[derive(Serialize)]
struct VmessLink<'a> {
    v: &'static str,
    ps: &'a str,
    add: &'a str,
    port: String,
    id: &'a str,
    aid: &'static str,
    net: &'a str,
    #[serde(rename = "type")]
    header_type: &'static str,
    host: &'a str,
    path: &'a str,
    tls: &'a str,
}

fn build_vmess(client: &Client, inbound: &Inbound, host: &str) -> Result<String, LinkError> {
    if client.id.is_empty() {
        return Err(LinkError::MissingId {
            email: client.email.clone(),
            protocol: "vmess",
        });
    }

    let stream = &inbound.stream;
    let ws = stream.ws_settings.clone().unwrap_or_default();
    let tls = match stream.security.as_str() {
        "tls" | "reality" => stream.security.as_str(),
        _ => "none",
    };

    let payload = VmessLink {
        v: "2",
        ps: &inbound.remark,
        add: host,
        port: inbound.port.to_string(),
        id: &client.id,
        aid: "0",
        net: &stream.network,
        header_type: "none",
        host: ws.host(),
        path: &ws.path,
        tls,
    };
    let json = serde_json::to_string(&payload).expect("vmess-ссылка всегда сериализуема");
    Ok(format!("vmess://{}", BASE64.encode(json)))
}

fn build_trojan(client: &Client, inbound: &Inbound, host: &str) -> Result<String, LinkError> {
    if client.password.is_empty() {
        return Err(LinkError::MissingPassword {
            email: client.email.clone(),
        });
    }

    let stream = &inbound.stream;
    let mut link = format!(
        "trojan://{}@{}:{}?security={}",
        client.password, host, inbound.port, stream.security
    );

    let ws = stream.ws_settings.clone().unwrap_or_default();
    if !ws.host().is_empty() {
        link.push_str(&format!("&host={}&path={}", ws.host(), ws.path));
    }

    link.push('#');
    link.push_str(&inbound.remark);
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn inbound_fixture(protocol: &str, stream_settings: &str, settings: &str) -> Inbound {
        Inbound::from_panel_value(json!({
            "id": 7,
            "remark": "Amsterdam",
            "enable": true,
            "port": 443,
            "protocol": protocol,
            "settings": settings,
            "streamSettings": stream_settings,
        }))
        .unwrap()
    }

    fn uuid_client() -> Client {
        Client {
            id: "11111111-2222-3333-4444-555555555555".into(),
            email: "alice_1".into(),
            ..Client::default()
        }
    }

    #[test]
    fn vless_ws_tls_carries_host_and_path() {
        let inbound = inbound_fixture(
            "vless",
            r#"{"network":"ws","security":"tls","wsSettings":{"path":"/ws","headers":{"Host":"example.com"}}}"#,
            "{}",
        );
        let link = build_client_link(&uuid_client(), &inbound, "example.com").unwrap();
        assert!(link.starts_with("vless://11111111-2222-3333-4444-555555555555@"));
        assert!(link.contains("type=ws"));
        assert!(link.contains("security=tls"));
        assert!(link.contains("&host=example.com&path=/ws"));
        assert!(link.ends_with("#Amsterdam"));
    }

    #[test]
    fn vless_reality_defaults() {
        let inbound = inbound_fixture(
            "vless",
            r#"{"network":"tcp","security":"reality","realitySettings":{"serverNames":["sni.example"],"shortIds":["ab12"],"settings":{"publicKey":"pbk123"}}}"#,
            "{}",
        );
        let link = build_client_link(&uuid_client(), &inbound, "example.com").unwrap();
        assert!(link.contains("pbk=pbk123"));
        assert!(link.contains("sni=sni.example"));
        assert!(link.contains("sid=ab12"));
        assert!(link.contains("fp=chrome"));
        assert!(link.contains("spx=%2F"));
    }

    #[test]
    fn vless_reality_explicit_fingerprint_and_sni() {
        let inbound = inbound_fixture(
            "vless",
            r#"{"network":"tcp","security":"reality","realitySettings":{"serverNames":["fallback.example"],"settings":{"publicKey":"pbk123","fingerprint":"firefox","serverName":"explicit.example"}}}"#,
            "{}",
        );
        let link = build_client_link(&uuid_client(), &inbound, "example.com").unwrap();
        assert!(link.contains("fp=firefox"));
        assert!(link.contains("sni=explicit.example"));
        assert!(!link.contains("sid="));
    }

    #[test]
    fn vmess_payload_round_trips() {
        let inbound = inbound_fixture(
            "vmess",
            r#"{"network":"ws","security":"reality","wsSettings":{"path":"/cdn","headers":{"Host":"cdn.example"}}}"#,
            "{}",
        );
        let link = build_client_link(&uuid_client(), &inbound, "vpn.example.com").unwrap();
        let encoded = link.strip_prefix("vmess://").unwrap();
        let decoded = BASE64.decode(encoded).unwrap();
        let value: Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["v"], "2");
        assert_eq!(value["ps"], "Amsterdam");
        assert_eq!(value["add"], "vpn.example.com");
        assert_eq!(value["port"], "443");
        assert_eq!(value["aid"], "0");
        assert_eq!(value["net"], "ws");
        assert_eq!(value["type"], "none");
        assert_eq!(value["host"], "cdn.example");
        assert_eq!(value["path"], "/cdn");
        assert_eq!(value["tls"], "reality");
    }

    #[test]
    fn vmess_plain_security_maps_to_none() {
        let inbound = inbound_fixture("vmess", r#"{"network":"tcp","security":"auto"}"#, "{}");
        let link = build_client_link(&uuid_client(), &inbound, "vpn.example.com").unwrap();
        let decoded = BASE64
            .decode(link.strip_prefix("vmess://").unwrap())
            .unwrap();
        let value: Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["tls"], "none");
    }

    #[test]
    fn trojan_without_ws_host_has_no_host_param() {
        let inbound = inbound_fixture("trojan", r#"{"network":"tcp","security":"tls"}"#, "{}");
        let client = Client {
            password: "s3cret".into(),
            email: "alice_1".into(),
            ..Client::default()
        };
        let link = build_client_link(&client, &inbound, "example.com").unwrap();
        assert_eq!(link, "trojan://s3cret@example.com:443?security=tls#Amsterdam");
    }

    #[test]
    fn trojan_with_ws_host_appends_params() {
        let inbound = inbound_fixture(
            "trojan",
            r#"{"network":"ws","security":"tls","wsSettings":{"path":"/t","headers":{"Host":"cdn.example"}}}"#,
            "{}",
        );
        let client = Client {
            password: "s3cret".into(),
            email: "alice_1".into(),
            ..Client::default()
        };
        let link = build_client_link(&client, &inbound, "example.com").unwrap();
        assert!(link.contains("&host=cdn.example&path=/t"));
    }

    #[test]
    fn missing_uuid_is_an_error() {
        let inbound = inbound_fixture("vless", r#"{"network":"tcp","security":"none"}"#, "{}");
        let client = Client {
            email: "alice_1".into(),
            ..Client::default()
        };
        assert!(matches!(
            build_client_link(&client, &inbound, "example.com"),
            Err(LinkError::MissingId { .. })
        ));
    }

    #[test]
    fn host_from_base_url() {
        assert_eq!(server_host_from_base_url("https://panel.example.com:2053"), "panel.example.com");
        assert_eq!(server_host_from_base_url("http://1.2.3.4:54321/path"), "1.2.3.4");
        assert_eq!(server_host_from_base_url("panel.example.com"), "panel.example.com");
    }
}
