//! PUT/POST permission gate (spec.md §4.3 "PUT permission"): mutating verbs
//! are rejected unless globally enabled or the caller's address is
//! pre-resolved into the allow-list (teacher analog: `auth::validate_token`
//! in `services/server/src/auth.rs`, here checking a socket address instead
//! of a bearer token).

use std::net::SocketAddr;

use crate::config::AgentConfig;

pub fn put_allowed(config: &AgentConfig, peer: SocketAddr) -> bool {
    if config.allow_put {
        return true;
    }
    config.allow_put_from.iter().any(|allowed| allowed.ip() == peer.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn global_allow_put_permits_any_peer() {
        let cfg = AgentConfig {
            allow_put: true,
            ..AgentConfig::default()
        };
        assert!(put_allowed(&cfg, addr("10.0.0.5:4321")));
    }

    #[test]
    fn allow_list_matches_by_ip_ignoring_port() {
        let cfg = AgentConfig::default().with_put_permissions(false, &["10.0.0.5:0".to_owned()]);
        assert!(put_allowed(&cfg, addr("10.0.0.5:54321")));
        assert!(!put_allowed(&cfg, addr("10.0.0.6:54321")));
    }

    #[test]
    fn no_permission_configured_denies_everything() {
        let cfg = AgentConfig::default();
        assert!(!put_allowed(&cfg, addr("127.0.0.1:1")));
    }
}
