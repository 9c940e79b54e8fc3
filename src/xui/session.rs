//! Авторизация в панели.
//!
//! Панель отдаёт либо bearer-токен в теле ответа, либо сессионную куку —
//! зависит от форка. Куки живут в общем cookie jar HTTP-клиента, токен
//! носим с собой и подставляем в каждый запрос. Сессии панель истекают и
//! ротируются непредсказуемо, поэтому авторизация выполняется заново перед
//! каждой логической операцией.

use reqwest::Client;
use serde_json::Value;
use url::Url;

use super::endpoints;
use super::error::XuiError;

/// Результат успешного логина.
#[derive(Debug, Clone)]
pub struct Session {
    /// Токен из тела ответа; `None` — авторизация держится на куке.
    pub bearer: Option<String>,
}

pub async fn authenticate(
    http: &Client,
    base_url: &Url,
    username: &str,
    password: &str,
) -> Result<Session, XuiError> {
    let credentials = serde_json::json!({
        "username": username,
        "password": password,
    });

    let mut attempted = Vec::new();
    for path in endpoints::login_paths() {
        attempted.push(path.to_string());
        let url = match base_url.join(path) {
            Ok(url) => url,
            Err(error) => {
                tracing::warn!(path, error = %error, "Не собрался login-URL");
                continue;
            }
        };

        let response = match http.post(url).json(&credentials).send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(path, error = %error, "Login-адрес недоступен");
                continue;
            }
        };

        if !response.status().is_success() {
            continue;
        }

        let has_auth_cookie = response.cookies().any(|cookie| {
            let name = cookie.name().to_ascii_lowercase();
            name.contains("token") || name.contains("auth") || name.contains("session")
        });

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(_) => continue, // HTML вместо JSON — не тот адрес
        };

        if !endpoints::success_body(&body) {
            // Эндпоинт настоящий и ответ осмысленный: учётные данные не подошли.
            let message = body
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("панель отклонила учётные данные");
            return Err(XuiError::Auth(message.to_string()));
        }

        let bearer = body
            .get("data")
            .and_then(|data| data.get("token"))
            .and_then(Value::as_str)
            .map(str::to_string);

        tracing::debug!(
            path,
            bearer = bearer.is_some(),
            cookie = has_auth_cookie,
            "Авторизация в панели прошла"
        );
        return Ok(Session { bearer });
    }

    Err(XuiError::Auth(format!(
        "ни один login-адрес не ответил (испробовано: {:?})",
        attempted
    )))
}
