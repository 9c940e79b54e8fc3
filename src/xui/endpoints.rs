//! Таблица кандидатных адресов API панели.
//!
//! Базовый путь и форма REST-адресов у x-ui отличаются между форками и
//! версиями, поэтому каждая логическая операция описана упорядоченным по
//! приоритету списком пар (путь, метод). Резолвер перебирает их до первого
//! осмысленного ответа; между вызовами ничего не кэшируется.

use reqwest::Method;
use serde_json::Value;

/// Логическая операция против панели.
#[derive(Debug, Clone, Copy)]
pub enum PanelOp {
    ListInbounds,
    GetInbound(i64),
    AddClient,
    UpdateInbound(i64),
}

impl PanelOp {
    pub fn name(&self) -> &'static str {
        match self {
            PanelOp::ListInbounds => "list-inbounds",
            PanelOp::GetInbound(_) => "get-inbound",
            PanelOp::AddClient => "add-client",
            PanelOp::UpdateInbound(_) => "update-inbound",
        }
    }
}

/// Один кандидат: путь относительно базового URL и HTTP-метод.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: String,
    pub method: Method,
}

impl Candidate {
    fn get(path: impl Into<String>) -> Self {
        Candidate {
            path: path.into(),
            method: Method::GET,
        }
    }

    fn post(path: impl Into<String>) -> Self {
        Candidate {
            path: path.into(),
            method: Method::POST,
        }
    }
}

/// Пути login-эндпоинта, тоже в порядке приоритета.
pub fn login_paths() -> Vec<&'static str> {
    vec!["login", "panel/login", "panel/panel/login"]
}

pub fn candidates(op: &PanelOp) -> Vec<Candidate> {
    match op {
        PanelOp::ListInbounds => vec![
            Candidate::get("panel/api/inbounds/list"),
            Candidate::get("panel/api/inbounds"),
            Candidate::get("panel/panel/api/inbounds/list"),
            Candidate::get("panel/panel/api/inbounds"),
            Candidate::get("panel/inbounds/list"),
            Candidate::get("panel/inbound/list"),
            Candidate::post("xui/inbound/list"),
        ],
        PanelOp::GetInbound(id) => vec![
            Candidate::get(format!("panel/api/inbounds/get/{id}")),
            Candidate::get(format!("panel/panel/api/inbounds/get/{id}")),
            Candidate::get(format!("panel/inbound/get/{id}")),
            Candidate::post(format!("xui/inbound/get/{id}")),
        ],
        PanelOp::AddClient => vec![
            Candidate::post("panel/api/inbounds/addClient"),
            Candidate::post("panel/panel/api/inbounds/addClient"),
            Candidate::post("panel/inbound/addClient"),
            Candidate::post("xui/inbound/addClient"),
        ],
        PanelOp::UpdateInbound(id) => vec![
            Candidate::post(format!("panel/api/inbounds/update/{id}")),
            Candidate::post(format!("panel/api/inbound/update/{id}")),
            Candidate::post(format!("panel/panel/api/inbounds/update/{id}")),
            Candidate::post(format!("panel/inbound/update/{id}")),
            Candidate::post(format!("xui/inbound/update/{id}")),
        ],
    }
}

/// Тело считается успешным только при явном `success: true`.
pub fn success_body(value: &Value) -> bool {
    value
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn modern_api_paths_come_first() {
        let list = candidates(&PanelOp::ListInbounds);
        assert_eq!(list[0].path, "panel/api/inbounds/list");
        assert_eq!(list[0].method, Method::GET);
        assert!(list.iter().any(|c| c.path == "xui/inbound/list"));

        let add = candidates(&PanelOp::AddClient);
        assert_eq!(add[0].path, "panel/api/inbounds/addClient");
        assert!(add.iter().all(|c| c.method == Method::POST));
    }

    #[test]
    fn id_substituted_into_paths() {
        let get = candidates(&PanelOp::GetInbound(42));
        assert!(get.iter().all(|c| c.path.ends_with("/42")));
        let update = candidates(&PanelOp::UpdateInbound(7));
        assert!(update.iter().all(|c| c.path.ends_with("/7")));
    }

    #[test]
    fn success_requires_explicit_true() {
        assert!(success_body(&json!({"success": true, "obj": []})));
        assert!(!success_body(&json!({"success": false})));
        assert!(!success_body(&json!({"obj": []})));
        assert!(!success_body(&json!("ok")));
    }
}
