//! Ledger key namespaces: `state:<id>`, `piece:<id>:<index>`, `retry:<id>`.

pub const STATE_PREFIX: &str = "state:";
pub const PIECE_PREFIX: &str = "piece:";
pub const RETRY_PREFIX: &str = "retry:";

pub fn state_key(session_id: &str) -> String {
    format!("{}{}", STATE_PREFIX, session_id)
}

pub fn retry_key(session_id: &str) -> String {
    format!("{}{}", RETRY_PREFIX, session_id)
}

pub fn piece_key(session_id: &str, index: u64) -> String {
    format!("{}{}:{}", PIECE_PREFIX, session_id, index)
}

/// Prefix shared by every piece key of one session.
pub fn piece_prefix(session_id: &str) -> String {
    format!("{}{}:", PIECE_PREFIX, session_id)
}

/// Session id that `key` belongs to, for any namespace.
pub fn session_of(key: &str) -> Option<&str> {
    if let Some(id) = key.strip_prefix(STATE_PREFIX) {
        return Some(id);
    }
    if let Some(id) = key.strip_prefix(RETRY_PREFIX) {
        return Some(id);
    }
    key.strip_prefix(PIECE_PREFIX)
        .and_then(|rest| rest.rsplit_once(':'))
        .map(|(id, _)| id)
}

/// Index from a `piece:<id>:<index>` key.
pub fn piece_index(key: &str) -> Option<u64> {
    key.strip_prefix(PIECE_PREFIX)?
        .rsplit_once(':')?
        .1
        .parse()
        .ok()
}

pub fn is_state_key(key: &str) -> bool {
    key.starts_with(STATE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_parse_back() {
        let k = piece_key("abc-01", 42);
        assert_eq!(k, "piece:abc-01:42");
        assert!(k.starts_with(&piece_prefix("abc-01")));
        assert_eq!(piece_index(&k), Some(42));
        assert_eq!(session_of(&k), Some("abc-01"));
        assert_eq!(session_of(&state_key("abc-01")), Some("abc-01"));
        assert_eq!(session_of(&retry_key("abc-01")), Some("abc-01"));
        assert_eq!(session_of("other:x"), None);
        assert_eq!(piece_index("piece:abc:zz"), None);
    }
}
