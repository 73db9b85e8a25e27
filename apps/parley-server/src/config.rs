use std::time::Duration;

/// Name of the lobby room when `LOBBY_ROOM` is not set.
pub const DEFAULT_LOBBY_ROOM: &str = "Main Chat Room";

/// Who may accept or reject pending join requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPolicy {
    /// Any current member of the room may admit or turn away requesters.
    #[default]
    AnyMember,
    /// Only the room owner may.
    OwnerOnly,
}

impl JoinPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "any_member" | "any-member" | "member" => Some(Self::AnyMember),
            "owner_only" | "owner-only" | "owner" => Some(Self::OwnerOnly),
            _ => None,
        }
    }
}

/// Server configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// The distinguished room that is never deleted, even when empty.
    pub lobby_room: String,
    /// Admission policy for `acceptJoinRequest` / `rejectJoinRequest`.
    pub join_policy: JoinPolicy,
    /// Pending join requests older than this are expired. `None` keeps them
    /// until accepted, rejected, or the requester disconnects.
    pub join_request_ttl: Option<Duration>,
    /// Origins allowed by CORS when running in production.
    pub allowed_origins: Vec<String>,
    /// `APP_ENV=production` restricts CORS to `allowed_origins`.
    pub production: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            lobby_room: DEFAULT_LOBBY_ROOM.to_string(),
            join_policy: JoinPolicy::AnyMember,
            join_request_ttl: None,
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:5174".to_string(),
            ],
            production: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional. Panics with a descriptive message if a
    /// variable is present but cannot be parsed.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: parsed_var("PORT").unwrap_or(defaults.port),
            lobby_room: std::env::var("LOBBY_ROOM")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.lobby_room),
            join_policy: std::env::var("JOIN_POLICY")
                .ok()
                .filter(|v| !v.is_empty())
                .map(|v| {
                    JoinPolicy::parse(&v)
                        .unwrap_or_else(|| panic!("JOIN_POLICY must be any_member or owner_only, got {v:?}"))
                })
                .unwrap_or(defaults.join_policy),
            join_request_ttl: parsed_var::<u64>("JOIN_REQUEST_TTL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| split_origins(&v))
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.allowed_origins),
            production: std::env::var("APP_ENV")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(false),
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok().filter(|v| !v.is_empty())?;
    Some(
        raw.trim()
            .parse()
            .unwrap_or_else(|_| panic!("{name} has an invalid value: {raw:?}")),
    )
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_policy_parses_both_spellings() {
        assert_eq!(JoinPolicy::parse("owner_only"), Some(JoinPolicy::OwnerOnly));
        assert_eq!(JoinPolicy::parse("Owner-Only"), Some(JoinPolicy::OwnerOnly));
        assert_eq!(JoinPolicy::parse("any_member"), Some(JoinPolicy::AnyMember));
        assert_eq!(JoinPolicy::parse("everyone"), None);
    }

    #[test]
    fn split_origins_trims_and_drops_empties() {
        assert_eq!(
            split_origins(" https://a.example , ,https://b.example"),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn defaults_match_development_setup() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.lobby_room, DEFAULT_LOBBY_ROOM);
        assert_eq!(config.join_policy, JoinPolicy::AnyMember);
        assert!(config.join_request_ttl.is_none());
        assert!(!config.production);
    }
}
