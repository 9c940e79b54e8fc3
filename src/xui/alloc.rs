//! Выбор следующего свободного имени клиента.
//!
//! Один пользователь Telegram может держать несколько конфигов: базовое имя
//! без суффикса и нумерованные `name_1`, `name_2`, … Новые имена всегда
//! нумеруются с единицы, голое имя повторно не выдаётся.

use std::collections::{BTreeSet, HashSet};

use super::model::Client;

/// Суффикс имени относительно базового: `alice` -> 0, `alice_3` -> 3.
fn handle_suffix(base: &str, email: &str) -> Option<u32> {
    if email == base {
        return Some(0);
    }
    let rest = email.strip_prefix(base)?.strip_prefix('_')?;
    rest.parse::<u32>().ok()
}

/// Суффиксы, занятые в текущем списке клиентов.
fn occupied_suffixes<'a>(base: &str, emails: impl Iterator<Item = &'a str>) -> BTreeSet<u32> {
    emails
        .filter_map(|email| handle_suffix(base, email))
        .collect()
}

/// Следующее свободное имя для `base`.
///
/// Учитывает и актуальный список клиентов, и имена, уже испробованные в этой
/// операции: неудачная попытка не предлагается заново, даже если панель ещё
/// не показывает её в списке.
pub fn next_handle(base: &str, clients: &[Client], excluded: &HashSet<String>) -> String {
    let mut taken = occupied_suffixes(base, clients.iter().map(|c| c.email.as_str()));
    taken.extend(excluded.iter().filter_map(|email| handle_suffix(base, email)));

    let mut candidate = 1u32;
    while taken.contains(&candidate) {
        candidate += 1;
    }
    format!("{}_{}", base, candidate)
}

/// Имена клиентов, принадлежащие базовому имени, в порядке суффиксов.
pub fn user_handles(base: &str, clients: &[Client]) -> Vec<String> {
    let mut with_suffix: Vec<(u32, String)> = clients
        .iter()
        .filter_map(|c| handle_suffix(base, &c.email).map(|n| (n, c.email.clone())))
        .collect();
    with_suffix.sort_by_key(|(n, _)| *n);
    with_suffix.into_iter().map(|(_, email)| email).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(email: &str) -> Client {
        Client {
            email: email.to_string(),
            ..Client::default()
        }
    }

    #[test]
    fn empty_roster_starts_at_one() {
        assert_eq!(next_handle("alice", &[], &HashSet::new()), "alice_1");
    }

    #[test]
    fn fills_gaps_between_suffixes() {
        let clients = vec![client("alice_1"), client("alice_3")];
        assert_eq!(next_handle("alice", &clients, &HashSet::new()), "alice_2");
    }

    #[test]
    fn exclusion_respected_even_absent_from_roster() {
        let excluded: HashSet<String> = ["alice_1".to_string()].into_iter().collect();
        assert_eq!(next_handle("alice", &[], &excluded), "alice_2");
    }

    #[test]
    fn bare_name_counts_as_suffix_zero() {
        let clients = vec![client("alice")];
        assert_eq!(next_handle("alice", &clients, &HashSet::new()), "alice_1");
    }

    #[test]
    fn foreign_names_ignored() {
        let clients = vec![client("bob"), client("bob_1"), client("alice2"), client("alice_x")];
        assert_eq!(next_handle("alice", &clients, &HashSet::new()), "alice_1");
    }

    #[test]
    fn retry_after_collision_moves_forward() {
        // bob_2 не прошёл — следующая попытка обязана предложить bob_3
        let clients = vec![client("bob_1")];
        let excluded: HashSet<String> = ["bob_2".to_string()].into_iter().collect();
        assert_eq!(next_handle("bob", &clients, &excluded), "bob_3");
    }

    #[test]
    fn user_handles_sorted_by_suffix() {
        let clients = vec![client("bob_2"), client("bob"), client("alice_1"), client("bob_1")];
        assert_eq!(user_handles("bob", &clients), vec!["bob", "bob_1", "bob_2"]);
    }
}
