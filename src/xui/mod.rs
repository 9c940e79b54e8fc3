//! Клиент панели x-ui.
//!
//! Оборачивает недокументированный REST API панели: авторизация с перебором
//! login-адресов, перебор кандидатных форм эндпоинтов, разбор вложенного
//! JSON в inbound'ах, выдача имён клиентов и создание клиента с повтором
//! при коллизии. Панель — единственный источник истины: каждый вызов заново
//! авторизуется и заново читает состояние, внутренних кэшей нет.

pub mod alloc;
pub mod endpoints;
pub mod error;
pub mod model;
mod session;

pub use error::XuiError;

use std::collections::HashSet;
use std::time::Duration;

use rand::distr::{Alphanumeric, SampleString};
use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::link;
use endpoints::PanelOp;
use model::{Client, Inbound, Protocol};
use session::Session;

/// Потолок попыток создания клиента в одной операции.
const CREATE_ATTEMPTS: usize = 3;
/// Пауза между попытками: панель не всегда сразу показывает только что
/// упавшую запись, повтор без паузы ловит ту же ложную коллизию.
const RETRY_PAUSE: Duration = Duration::from_millis(1500);
/// Таймаут одного HTTP-вызова к панели.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct XuiClient {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: String,
    server_host: String,
}

impl XuiClient {
    /// `server_host` — адрес, который увидят клиенты в ссылках; по умолчанию
    /// хост панели.
    pub fn new(
        base_url: &str,
        username: &str,
        password: &str,
        server_host: Option<String>,
        accept_invalid_certs: bool,
    ) -> Result<Self, XuiError> {
        // join() дописывает к последнему сегменту, поэтому базовый URL
        // всегда храним со слэшем на конце
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)?;

        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(CALL_TIMEOUT)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;

        let server_host =
            server_host.unwrap_or_else(|| link::server_host_from_base_url(base_url.as_str()));

        Ok(Self {
            http,
            base_url,
            username: username.to_string(),
            password: password.to_string(),
            server_host,
        })
    }

    pub fn server_host(&self) -> &str {
        &self.server_host
    }

    async fn authenticate(&self) -> Result<Session, XuiError> {
        session::authenticate(&self.http, &self.base_url, &self.username, &self.password).await
    }

    /// Перебирает кандидатные адреса операции до первого осмысленного ответа.
    ///
    /// 404 и HTML (страница логина вместо API) — следующий кандидат;
    /// 401/403 — одна повторная авторизация и один повтор того же кандидата;
    /// корректный JSON с `success: false` — авторитетный отказ панели,
    /// дальше не перебираем.
    async fn resolve(&self, op: PanelOp, body: Option<&Value>) -> Result<Value, XuiError> {
        let mut session = self.authenticate().await?;
        let mut attempted = Vec::new();

        for candidate in endpoints::candidates(&op) {
            attempted.push(format!("{} {}", candidate.method, candidate.path));
            let url = match self.base_url.join(&candidate.path) {
                Ok(url) => url,
                Err(error) => {
                    tracing::warn!(path = %candidate.path, error = %error, "Не собрался URL кандидата");
                    continue;
                }
            };

            let mut reauthenticated = false;
            loop {
                let mut request = self.http.request(candidate.method.clone(), url.clone());
                if let Some(token) = &session.bearer {
                    request = request.bearer_auth(token);
                }
                if let Some(body) = body {
                    request = request.json(body);
                }

                let response = match request.send().await {
                    Ok(response) => response,
                    Err(error) => {
                        tracing::debug!(
                            operation = op.name(),
                            url = %url,
                            error = %error,
                            "Кандидат недоступен"
                        );
                        break;
                    }
                };

                let status = response.status();
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    if reauthenticated {
                        break;
                    }
                    reauthenticated = true;
                    session = self.authenticate().await?;
                    continue;
                }
                if status != StatusCode::OK {
                    break;
                }

                let json_content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .is_some_and(|value| value.contains("json"));
                if !json_content_type {
                    // HTML — запрос улетел на страницу логина, не тот адрес
                    break;
                }

                let value: Value = match response.json().await {
                    Ok(value) => value,
                    Err(_) => break,
                };

                if endpoints::success_body(&value) {
                    tracing::debug!(operation = op.name(), url = %url, "Операция выполнена");
                    return Ok(value);
                }

                let message = value
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or("без пояснения")
                    .to_string();
                return Err(XuiError::Rejected {
                    operation: op.name(),
                    message,
                });
            }
        }

        Err(XuiError::EndpointsExhausted {
            operation: op.name(),
            attempted,
        })
    }

    /// Все inbound'ы панели с уже извлечёнными клиентами.
    pub async fn list_inbounds(&self) -> Result<Vec<Inbound>, XuiError> {
        let body = self.resolve(PanelOp::ListInbounds, None).await?;
        let items = body
            .get("obj")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(items
            .into_iter()
            .filter_map(Inbound::from_panel_value)
            .collect())
    }

    /// Один inbound. У старых панелей нет get-эндпоинта — добираем через список.
    pub async fn get_inbound(&self, inbound_id: i64) -> Result<Option<Inbound>, XuiError> {
        match self.resolve(PanelOp::GetInbound(inbound_id), None).await {
            Ok(body) => Ok(body
                .get("obj")
                .filter(|value| !value.is_null())
                .cloned()
                .and_then(Inbound::from_panel_value)),
            Err(XuiError::EndpointsExhausted { .. }) => Ok(self
                .list_inbounds()
                .await?
                .into_iter()
                .find(|inbound| inbound.id == inbound_id)),
            Err(error) => Err(error),
        }
    }

    /// Клиенты одного inbound'а; неизвестный id — пустой список, не ошибка.
    pub async fn get_clients(&self, inbound_id: i64) -> Result<Vec<Client>, XuiError> {
        Ok(self
            .get_inbound(inbound_id)
            .await?
            .map(|inbound| inbound.clients)
            .unwrap_or_default())
    }

    /// Добавляет клиента. `false` — имя уже занято (или запись обогнали);
    /// вызывающий повторяет с другим именем, а не считает это фатальным.
    ///
    /// Список клиентов читается заново прямо перед проверкой, но панель могут
    /// менять и другие — check-then-act здесь принципиально гоночный, панель
    /// compare-and-swap не даёт.
    pub async fn add_client(&self, inbound_id: i64, client: &Client) -> Result<bool, XuiError> {
        let Some(inbound) = self.get_inbound(inbound_id).await? else {
            tracing::warn!(inbound_id, "Inbound не найден, клиента добавить некуда");
            return Ok(false);
        };
        if inbound.find_client(&client.email).is_some() {
            tracing::info!(inbound_id, email = %client.email, "Имя уже занято");
            return Ok(false);
        }

        let payload = serde_json::json!({
            "id": inbound_id,
            "settings": serde_json::json!({ "clients": [client] }).to_string(),
        });
        match self.resolve(PanelOp::AddClient, Some(&payload)).await {
            Ok(_) => Ok(true),
            Err(XuiError::Rejected { message, .. }) => {
                tracing::info!(inbound_id, email = %client.email, reason = %message, "Панель не приняла клиента");
                Ok(false)
            }
            Err(XuiError::EndpointsExhausted { .. }) => {
                // у этой панели нет addClient — переписываем весь список через update
                self.add_client_via_update(inbound, client).await
            }
            Err(error) => Err(error),
        }
    }

    async fn add_client_via_update(
        &self,
        mut inbound: Inbound,
        client: &Client,
    ) -> Result<bool, XuiError> {
        inbound.clients.push(client.clone());
        let payload = inbound.update_payload();
        match self
            .resolve(PanelOp::UpdateInbound(inbound.id), Some(&payload))
            .await
        {
            Ok(_) => Ok(true),
            Err(XuiError::Rejected { message, .. }) => {
                tracing::info!(
                    inbound_id = inbound.id,
                    email = %client.email,
                    reason = %message,
                    "Панель не приняла обновлённый список клиентов"
                );
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    /// Продлевает срок действия клиента на `add_days` дней.
    ///
    /// Продление прибавляет к остатку: истёкший или бессрочный конфиг
    /// получает срок от текущего момента, живой — от старой даты.
    pub async fn extend_expiry(
        &self,
        inbound_id: i64,
        email: &str,
        add_days: i64,
    ) -> Result<bool, XuiError> {
        let Some(mut inbound) = self.get_inbound(inbound_id).await? else {
            return Ok(false);
        };
        let now_ms = epoch_ms_now();
        let Some(client) = inbound.clients.iter_mut().find(|c| c.email == email) else {
            return Ok(false);
        };
        let new_expiry = bumped_expiry(client.expiry_time, now_ms, add_days);
        tracing::info!(
            inbound_id,
            email,
            old_expiry = client.expiry_time,
            new_expiry,
            add_days,
            "Продлеваю срок действия клиента"
        );
        client.expiry_time = new_expiry;

        let payload = inbound.update_payload();
        match self
            .resolve(PanelOp::UpdateInbound(inbound_id), Some(&payload))
            .await
        {
            Ok(_) => Ok(true),
            Err(XuiError::Rejected { message, .. }) => {
                tracing::warn!(inbound_id, email, reason = %message, "Панель не приняла продление");
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    /// Создаёт клиента для пользователя `base_username` на inbound'е.
    ///
    /// Имя выбирается из свежего списка; занятое имя исключается и попытка
    /// повторяется с паузой, не больше трёх раз. Возвращает имя и ссылку
    /// подключения, собранную по только что подтверждённому состоянию.
    pub async fn create_client(
        &self,
        inbound_id: i64,
        base_username: &str,
        expiry_time: i64,
    ) -> Result<(String, String), XuiError> {
        let mut excluded: HashSet<String> = HashSet::new();
        let mut tried: Vec<String> = Vec::new();

        for attempt in 1..=CREATE_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(RETRY_PAUSE).await;
            }

            let inbound = self
                .get_inbound(inbound_id)
                .await?
                .ok_or(XuiError::InboundNotFound(inbound_id))?;
            let handle = alloc::next_handle(base_username, &inbound.clients, &excluded);
            tried.push(handle.clone());
            let client = new_client_for(&inbound.protocol, &handle, expiry_time);

            if !self.add_client(inbound_id, &client).await? {
                tracing::info!(inbound_id, handle = %handle, attempt, "Имя занято, пробую следующее");
                excluded.insert(handle);
                continue;
            }

            let confirmed = self
                .get_inbound(inbound_id)
                .await?
                .ok_or(XuiError::InboundNotFound(inbound_id))?;
            let Some(stored) = confirmed.find_client(&handle) else {
                tracing::warn!(
                    inbound_id,
                    handle = %handle,
                    "Панель подтвердила запись, но клиента в списке нет"
                );
                excluded.insert(handle);
                continue;
            };

            let link = link::build_client_link(stored, &confirmed, &self.server_host)?;
            tracing::info!(inbound_id, handle = %handle, attempt, "Клиент создан");
            return Ok((handle, link));
        }

        Err(XuiError::ProvisioningExhausted { tried })
    }

    /// Ссылка подключения для существующего клиента; `None` — не найден.
    pub async fn client_link(
        &self,
        inbound_id: i64,
        email: &str,
    ) -> Result<Option<String>, XuiError> {
        let Some(inbound) = self.get_inbound(inbound_id).await? else {
            return Ok(None);
        };
        match inbound.find_client(email) {
            Some(client) => Ok(Some(link::build_client_link(
                client,
                &inbound,
                &self.server_host,
            )?)),
            None => Ok(None),
        }
    }

    /// Ищет клиента по имени во всех inbound'ах.
    pub async fn find_client(&self, email: &str) -> Result<Option<(Inbound, Client)>, XuiError> {
        for inbound in self.list_inbounds().await? {
            if let Some(client) = inbound.find_client(email) {
                let client = client.clone();
                return Ok(Some((inbound, client)));
            }
        }
        Ok(None)
    }

    /// Имена конфигов пользователя на inbound'е (`name`, `name_1`, …).
    pub async fn user_handles(
        &self,
        inbound_id: i64,
        base_username: &str,
    ) -> Result<Vec<String>, XuiError> {
        let clients = self.get_clients(inbound_id).await?;
        Ok(alloc::user_handles(base_username, &clients))
    }
}

fn epoch_ms_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Новый срок: истёкший или бессрочный конфиг считаем от текущего момента,
/// живой продлеваем от старой даты.
fn bumped_expiry(current: i64, now_ms: i64, add_days: i64) -> i64 {
    let add_ms = add_days * 86_400_000;
    if current <= 0 || current < now_ms {
        now_ms + add_ms
    } else {
        current + add_ms
    }
}

/// Заготовка клиента под протокол inbound'а: vless/vmess получают UUID,
/// trojan — пароль.
fn new_client_for(protocol: &Protocol, email: &str, expiry_time: i64) -> Client {
    let mut client = Client {
        email: email.to_string(),
        enable: true,
        expiry_time,
        sub_id: random_sub_id(),
        ..Client::default()
    };
    match protocol {
        Protocol::Trojan => client.password = random_password(),
        _ => client.id = Uuid::new_v4().to_string(),
    }
    client
}

fn random_sub_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

fn random_password() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 12)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: i64 = 86_400_000;

    #[test]
    fn unset_expiry_counts_from_now() {
        let now = 1_700_000_000_000;
        assert_eq!(bumped_expiry(0, now, 31), now + 31 * DAY_MS);
    }

    #[test]
    fn past_expiry_counts_from_now() {
        let now = 1_700_000_000_000;
        assert_eq!(bumped_expiry(now - DAY_MS, now, 31), now + 31 * DAY_MS);
    }

    #[test]
    fn future_expiry_is_extended_exactly() {
        let now = 1_700_000_000_000;
        let current = now + 5 * DAY_MS;
        assert_eq!(bumped_expiry(current, now, 31), current + 31 * DAY_MS);
    }

    #[test]
    fn vless_client_gets_uuid() {
        let client = new_client_for(&Protocol::Vless, "alice_1", 42);
        assert_eq!(client.email, "alice_1");
        assert_eq!(client.expiry_time, 42);
        assert!(!client.id.is_empty());
        assert!(client.password.is_empty());
        assert!(client.enable);
        assert_eq!(client.sub_id.len(), 16);
    }

    #[test]
    fn trojan_client_gets_password() {
        let client = new_client_for(&Protocol::Trojan, "alice_1", 0);
        assert!(client.id.is_empty());
        assert_eq!(client.password.len(), 12);
    }
}
