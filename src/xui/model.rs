//! Типизированное представление inbound'ов и клиентов панели.
//!
//! Панель отдаёт inbound'ы, у которых поля `settings` и `streamSettings` —
//! JSON-строки внутри JSON-ответа. Декодируем их сразу после получения;
//! дальше границы этого модуля сырые строки не покидают.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Протокол inbound'а. Неизвестные протоколы сохраняем как есть.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    Vless,
    Vmess,
    Trojan,
    Other(String),
}

impl Protocol {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "vless" => Protocol::Vless,
            "vmess" => Protocol::Vmess,
            "trojan" => Protocol::Trojan,
            _ => Protocol::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Vless => "vless",
            Protocol::Vmess => "vmess",
            Protocol::Trojan => "trojan",
            Protocol::Other(raw) => raw,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Один клиент внутри inbound'а. Ключ во внешнем мире — поле `email`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    /// UUID для vless/vmess.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Пароль для trojan.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub flow: String,
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Миллисекунды эпохи; 0 — без срока.
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default, rename = "totalGB")]
    pub total_gb: i64,
    #[serde(default)]
    pub limit_ip: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub_id: String,
    /// Счётчики трафика приходят из статистики панели, в settings их не пишем.
    #[serde(default, skip_serializing)]
    pub up: i64,
    #[serde(default, skip_serializing)]
    pub down: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Client {
    fn default() -> Self {
        Client {
            id: String::new(),
            password: String::new(),
            email: String::new(),
            flow: String::new(),
            enable: true,
            expiry_time: 0,
            total_gb: 0,
            limit_ip: 0,
            sub_id: String::new(),
            up: 0,
            down: 0,
            extra: Map::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_network() -> String {
    "tcp".to_string()
}

fn default_security() -> String {
    "none".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

/// Транспортные настройки inbound'а (декодированный `streamSettings`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamSettings {
    pub network: String,
    pub security: String,
    pub ws_settings: Option<WsSettings>,
    pub reality_settings: Option<RealitySettings>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        StreamSettings {
            network: default_network(),
            security: default_security(),
            ws_settings: None,
            reality_settings: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WsSettings {
    #[serde(default = "default_path")]
    pub path: String,
    pub headers: Map<String, Value>,
}

impl Default for WsSettings {
    fn default() -> Self {
        WsSettings {
            path: default_path(),
            headers: Map::new(),
        }
    }
}

impl WsSettings {
    /// Заголовок Host, если задан.
    pub fn host(&self) -> &str {
        self.headers
            .get("Host")
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RealitySettings {
    pub server_names: Vec<String>,
    pub short_ids: Vec<String>,
    pub settings: RealityClientSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RealityClientSettings {
    pub public_key: String,
    pub fingerprint: String,
    pub server_name: String,
    pub spider_x: String,
}

/// Inbound панели с уже извлечёнными клиентами.
///
/// Копия всегда одноразовая: панель — источник истины, состояние между
/// вызовами не переживает.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub id: i64,
    pub remark: String,
    pub protocol: Protocol,
    pub port: u16,
    pub up: i64,
    pub down: i64,
    pub total: i64,
    pub enable: bool,
    pub expiry_time: i64,
    pub listen: String,
    pub tag: String,
    pub sniffing: String,
    pub stream: StreamSettings,
    pub clients: Vec<Client>,
    /// Исходная строка streamSettings — уходит обратно при update как есть.
    stream_raw: String,
    /// Декодированный settings без поля clients.
    settings_rest: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInbound {
    id: i64,
    #[serde(default)]
    up: i64,
    #[serde(default)]
    down: i64,
    #[serde(default)]
    total: i64,
    #[serde(default)]
    remark: String,
    #[serde(default = "default_true")]
    enable: bool,
    #[serde(default)]
    expiry_time: i64,
    #[serde(default)]
    listen: String,
    port: u16,
    #[serde(default)]
    protocol: String,
    #[serde(default)]
    settings: String,
    #[serde(default)]
    stream_settings: String,
    #[serde(default)]
    tag: String,
    #[serde(default)]
    sniffing: String,
    #[serde(default)]
    client_stats: Option<Vec<ClientStat>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientStat {
    #[serde(default)]
    email: String,
    #[serde(default)]
    up: i64,
    #[serde(default)]
    down: i64,
}

/// Декодирует вложенную JSON-строку. Пустая или битая строка — пустой объект,
/// листинг из-за одного inbound'а не падает.
fn decode_blob(raw: &str, inbound_id: i64, field: &'static str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            tracing::warn!(inbound_id, field, "Не удалось разобрать вложенный JSON, считаю пустым");
            Map::new()
        }
    }
}

impl Inbound {
    /// Разбирает один элемент из `obj` ответа панели.
    pub fn from_panel_value(value: Value) -> Option<Inbound> {
        let raw: RawInbound = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(error = %error, "Пропускаю inbound: не разобрался ответ панели");
                return None;
            }
        };

        let mut settings_rest = decode_blob(&raw.settings, raw.id, "settings");
        let mut clients: Vec<Client> = match settings_rest.remove("clients") {
            Some(clients_value) => serde_json::from_value(clients_value).unwrap_or_else(|error| {
                tracing::warn!(
                    inbound_id = raw.id,
                    error = %error,
                    "Список clients не разобрался, считаю inbound пустым"
                );
                Vec::new()
            }),
            None => Vec::new(),
        };

        let stream_map = decode_blob(&raw.stream_settings, raw.id, "streamSettings");
        let stream: StreamSettings =
            serde_json::from_value(Value::Object(stream_map)).unwrap_or_default();

        if let Some(stats) = &raw.client_stats {
            for stat in stats {
                if let Some(client) = clients.iter_mut().find(|c| c.email == stat.email) {
                    client.up = stat.up;
                    client.down = stat.down;
                }
            }
        }

        Some(Inbound {
            id: raw.id,
            remark: raw.remark,
            protocol: Protocol::parse(&raw.protocol),
            port: raw.port,
            up: raw.up,
            down: raw.down,
            total: raw.total,
            enable: raw.enable,
            expiry_time: raw.expiry_time,
            listen: raw.listen,
            tag: raw.tag,
            sniffing: raw.sniffing,
            stream,
            clients,
            stream_raw: raw.stream_settings,
            settings_rest,
        })
    }

    /// Сериализует settings с текущим списком клиентов обратно в строку.
    pub fn settings_blob(&self) -> String {
        let mut map = self.settings_rest.clone();
        map.insert(
            "clients".to_string(),
            serde_json::to_value(&self.clients).unwrap_or(Value::Array(Vec::new())),
        );
        Value::Object(map).to_string()
    }

    /// Полное тело для update-эндпоинта панели: все поля inbound'а,
    /// settings — заново собранная строка с изменённым списком клиентов.
    pub fn update_payload(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "up": self.up,
            "down": self.down,
            "total": self.total,
            "remark": self.remark,
            "enable": self.enable,
            "expiryTime": self.expiry_time,
            "listen": self.listen,
            "port": self.port,
            "protocol": self.protocol.as_str(),
            "settings": self.settings_blob(),
            "streamSettings": self.stream_raw,
            "sniffing": self.sniffing,
            "tag": self.tag,
        })
    }

    pub fn find_client(&self, email: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.email == email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound_value(settings: Value) -> Value {
        serde_json::json!({
            "id": 7,
            "up": 1024,
            "down": 2048,
            "total": 0,
            "remark": "Amsterdam",
            "enable": true,
            "expiryTime": 0,
            "listen": "",
            "port": 443,
            "protocol": "vless",
            "settings": settings,
            "streamSettings": r#"{"network":"ws","security":"tls","wsSettings":{"path":"/ws","headers":{"Host":"example.com"}}}"#,
            "tag": "inbound-443",
            "sniffing": r#"{"enabled":true}"#,
        })
    }

    #[test]
    fn clients_match_settings_blob() {
        let settings = r#"{"clients":[{"id":"u-1","email":"alice","enable":true,"expiryTime":0},{"id":"u-2","email":"bob_1","enable":true,"expiryTime":0}],"decryption":"none"}"#;
        let inbound = Inbound::from_panel_value(inbound_value(Value::String(settings.into()))).unwrap();
        assert_eq!(inbound.clients.len(), 2);
        assert_eq!(inbound.clients[0].email, "alice");
        assert_eq!(inbound.clients[1].email, "bob_1");
        assert_eq!(inbound.protocol, Protocol::Vless);
        assert_eq!(inbound.stream.network, "ws");
        assert_eq!(inbound.stream.security, "tls");
        let ws = inbound.stream.ws_settings.as_ref().unwrap();
        assert_eq!(ws.path, "/ws");
        assert_eq!(ws.host(), "example.com");
    }

    #[test]
    fn absent_settings_gives_empty_clients() {
        let inbound = Inbound::from_panel_value(inbound_value(Value::String(String::new()))).unwrap();
        assert!(inbound.clients.is_empty());
    }

    #[test]
    fn malformed_settings_gives_empty_clients() {
        let inbound =
            Inbound::from_panel_value(inbound_value(Value::String("{not json".into()))).unwrap();
        assert!(inbound.clients.is_empty());
    }

    #[test]
    fn update_payload_round_trips_mutated_roster() {
        let settings = r#"{"clients":[{"id":"u-1","email":"alice"}],"decryption":"none"}"#;
        let mut inbound =
            Inbound::from_panel_value(inbound_value(Value::String(settings.into()))).unwrap();
        inbound.clients.push(Client {
            id: "u-2".into(),
            email: "alice_1".into(),
            ..Client::default()
        });

        let payload = inbound.update_payload();
        assert_eq!(payload["id"], 7);
        assert_eq!(payload["protocol"], "vless");
        let blob: Value = serde_json::from_str(payload["settings"].as_str().unwrap()).unwrap();
        let clients = blob["clients"].as_array().unwrap();
        assert_eq!(clients.len(), 2);
        assert_eq!(clients[1]["email"], "alice_1");
        // decryption из исходного settings не теряется
        assert_eq!(blob["decryption"], "none");
    }

    #[test]
    fn client_stats_overlay_traffic() {
        let mut value = inbound_value(Value::String(
            r#"{"clients":[{"id":"u-1","email":"alice"}]}"#.into(),
        ));
        value["clientStats"] = serde_json::json!([
            {"email": "alice", "up": 111, "down": 222}
        ]);
        let inbound = Inbound::from_panel_value(value).unwrap();
        assert_eq!(inbound.clients[0].up, 111);
        assert_eq!(inbound.clients[0].down, 222);
    }

    #[test]
    fn traffic_counters_not_serialized_into_settings() {
        let client = Client {
            id: "u-1".into(),
            email: "alice".into(),
            up: 5,
            down: 6,
            ..Client::default()
        };
        let value = serde_json::to_value(&client).unwrap();
        assert!(value.get("up").is_none());
        assert!(value.get("down").is_none());
        assert_eq!(value["email"], "alice");
    }
}
