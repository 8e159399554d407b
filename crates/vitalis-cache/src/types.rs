//! Cache type registry: the closed set of semantic cache types.
//!
//! Every cache key in the system is produced by combining a type's prefix
//! with an entity identifier (plus an optional suffix) — no ad-hoc keys.
//! The set is a closed enum so a missing cascade handler or TTL is a
//! compile error, not a runtime lookup miss.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// TTL tiers, in seconds.
pub mod ttl {
    /// Volatile aggregates (system stats).
    pub const BRIEF: u64 = 60;
    /// Frequently edited user data (appointments, security events).
    pub const SHORT: u64 = 300;
    /// Derived views (purchase history, order details).
    pub const MEDIUM: u64 = 900;
    /// Slow-moving records (profiles, external customer records, analytics).
    pub const LONG: u64 = 3600;
}

/// Semantic cache types.
///
/// Defined at process start, never mutated at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    PurchaseHistory,
    Appointments,
    Analytics,
    OrderDetails,
    UserProfile,
    /// Customer record mirrored from the Swell commerce platform.
    SwellCustomer,
    SystemStats,
    SecurityEvents,
}

impl CacheType {
    /// All registered cache types.
    pub const ALL: [CacheType; 8] = [
        CacheType::PurchaseHistory,
        CacheType::Appointments,
        CacheType::Analytics,
        CacheType::OrderDetails,
        CacheType::UserProfile,
        CacheType::SwellCustomer,
        CacheType::SystemStats,
        CacheType::SecurityEvents,
    ];

    /// Key prefix, including the trailing separator.
    pub fn prefix(self) -> &'static str {
        match self {
            CacheType::PurchaseHistory => "purchase_history:",
            CacheType::Appointments => "appointments:",
            CacheType::Analytics => "analytics:",
            CacheType::OrderDetails => "order_details:",
            CacheType::UserProfile => "user_profile:",
            CacheType::SwellCustomer => "swell_customer:",
            CacheType::SystemStats => "system_stats:",
            CacheType::SecurityEvents => "security_events:",
        }
    }

    /// Configured TTL for entries of this type.
    pub fn ttl_seconds(self) -> u64 {
        match self {
            CacheType::PurchaseHistory => ttl::MEDIUM,
            CacheType::Appointments => ttl::SHORT,
            CacheType::Analytics => ttl::LONG,
            CacheType::OrderDetails => ttl::MEDIUM,
            CacheType::UserProfile => ttl::LONG,
            CacheType::SwellCustomer => ttl::LONG,
            CacheType::SystemStats => ttl::BRIEF,
            CacheType::SecurityEvents => ttl::SHORT,
        }
    }

    /// Stable string form, used for queue rows and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            CacheType::PurchaseHistory => "purchase_history",
            CacheType::Appointments => "appointments",
            CacheType::Analytics => "analytics",
            CacheType::OrderDetails => "order_details",
            CacheType::UserProfile => "user_profile",
            CacheType::SwellCustomer => "swell_customer",
            CacheType::SystemStats => "system_stats",
            CacheType::SecurityEvents => "security_events",
        }
    }

    /// Glob pattern matching every key of this type for one entity.
    pub fn entity_pattern(self, id: &str) -> String {
        format!("{}{}*", self.prefix(), id)
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheType {
    type Err = UnknownCacheType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase_history" => Ok(CacheType::PurchaseHistory),
            "appointments" => Ok(CacheType::Appointments),
            "analytics" => Ok(CacheType::Analytics),
            "order_details" => Ok(CacheType::OrderDetails),
            "user_profile" => Ok(CacheType::UserProfile),
            "swell_customer" => Ok(CacheType::SwellCustomer),
            "system_stats" => Ok(CacheType::SystemStats),
            "security_events" => Ok(CacheType::SecurityEvents),
            other => Err(UnknownCacheType(other.to_string())),
        }
    }
}

/// A cache type string that is not in the registry.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown cache type: {0}")]
pub struct UnknownCacheType(pub String);

/// Build the cache key for an entity of the given type.
pub fn cache_key(ty: CacheType, id: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) => format!("{}{}:{}", ty.prefix(), id, suffix),
        None => format!("{}{}", ty.prefix(), id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key() {
        assert_eq!(
            cache_key(CacheType::PurchaseHistory, "u42", None),
            "purchase_history:u42"
        );
        assert_eq!(
            cache_key(CacheType::Appointments, "u42", Some("upcoming")),
            "appointments:u42:upcoming"
        );
    }

    #[test]
    fn test_entity_pattern_covers_suffixed_keys() {
        let pattern = CacheType::PurchaseHistory.entity_pattern("u42");
        assert_eq!(pattern, "purchase_history:u42*");
    }

    #[test]
    fn test_string_round_trip() {
        for ty in CacheType::ALL {
            assert_eq!(ty.as_str().parse::<CacheType>().unwrap(), ty);
        }
        assert!("mystery_type".parse::<CacheType>().is_err());
    }

    #[test]
    fn test_prefixes_are_distinct_and_terminated() {
        for ty in CacheType::ALL {
            assert!(ty.prefix().ends_with(':'), "{ty} prefix missing separator");
        }
        let prefixes: std::collections::HashSet<_> =
            CacheType::ALL.iter().map(|t| t.prefix()).collect();
        assert_eq!(prefixes.len(), CacheType::ALL.len());
    }

    #[test]
    fn test_every_type_has_a_positive_ttl() {
        for ty in CacheType::ALL {
            assert!(ty.ttl_seconds() > 0);
        }
    }
}
