//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};

/// Backend selection algorithm.
///
/// The wire names (`round-robin`, `least-connections`, ...) are what the
/// configuration and the admin API accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// Cyclic index over the available set
    RoundRobin,
    /// Fewest active connections
    LeastConnections,
    /// Weighted random draw
    WeightedRoundRobin,
    /// Stable hash of the caller IP
    IpHash,
    /// Uniform random pick
    Random,
    /// Lowest rolling average response time
    LeastResponseTime,
    /// Highest composite resource score
    ResourceBased,
}

impl Algorithm {
    /// All algorithms, in documentation order.
    pub const ALL: [Algorithm; 7] = [
        Algorithm::RoundRobin,
        Algorithm::LeastConnections,
        Algorithm::WeightedRoundRobin,
        Algorithm::IpHash,
        Algorithm::Random,
        Algorithm::LeastResponseTime,
        Algorithm::ResourceBased,
    ];

    /// Parse an algorithm name. Returns `None` for unknown names.
    ///
    /// # Examples
    /// ```
    /// use gateway_core::domain::value_objects::Algorithm;
    ///
    /// assert_eq!(Algorithm::parse("ip-hash"), Some(Algorithm::IpHash));
    /// assert_eq!(Algorithm::parse("fastest"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "round-robin" => Some(Self::RoundRobin),
            "least-connections" => Some(Self::LeastConnections),
            "weighted-round-robin" | "weighted" => Some(Self::WeightedRoundRobin),
            "ip-hash" => Some(Self::IpHash),
            "random" => Some(Self::Random),
            "least-response-time" => Some(Self::LeastResponseTime),
            "resource-based" => Some(Self::ResourceBased),
            _ => None,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::LeastConnections => "least-connections",
            Self::WeightedRoundRobin => "weighted-round-robin",
            Self::IpHash => "ip-hash",
            Self::Random => "random",
            Self::LeastResponseTime => "least-response-time",
            Self::ResourceBased => "resource-based",
        }
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::RoundRobin
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health status of a pool entry.
///
/// Only `Unhealthy` removes an entry from the available set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Whether the selection engine may route to an entry in this state.
    pub fn is_selectable(&self) -> bool {
        !matches!(self, Self::Unhealthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::Healthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How request outcomes reported through `mark_complete` interact with
/// probe-driven health tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCoupling {
    /// Request failures share the probe failure counter and can move the
    /// entry through the health state machine.
    Shared,
    /// Request failures use their own counter and never change health status.
    Separate,
}

impl FailureCoupling {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "shared" => Some(Self::Shared),
            "separate" => Some(Self::Separate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Separate => "separate",
        }
    }
}

impl Default for FailureCoupling {
    fn default() -> Self {
        Self::Shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== Algorithm Tests =====

    #[test]
    fn test_algorithm_parse_all_names() {
        for algorithm in Algorithm::ALL {
            assert_eq!(
                Algorithm::parse(algorithm.as_str()),
                Some(algorithm),
                "Failed for input: {}",
                algorithm
            );
        }
    }

    #[test]
    fn test_algorithm_parse_is_lenient() {
        assert_eq!(Algorithm::parse("ROUND_ROBIN"), Some(Algorithm::RoundRobin));
        assert_eq!(Algorithm::parse(" weighted "), Some(Algorithm::WeightedRoundRobin));
    }

    #[test]
    fn test_algorithm_parse_unknown() {
        assert_eq!(Algorithm::parse(""), None);
        assert_eq!(Algorithm::parse("fastest"), None);
    }

    #[test]
    fn test_algorithm_default_is_round_robin() {
        assert_eq!(Algorithm::default(), Algorithm::RoundRobin);
    }

    #[test]
    fn test_algorithm_serde_kebab_case() {
        let json = serde_json::to_string(&Algorithm::LeastResponseTime).unwrap();
        assert_eq!(json, "\"least-response-time\"");

        let parsed: Algorithm = serde_json::from_str("\"resource-based\"").unwrap();
        assert_eq!(parsed, Algorithm::ResourceBased);
    }

    // ===== HealthStatus Tests =====

    #[test]
    fn test_health_status_selectable() {
        assert!(HealthStatus::Healthy.is_selectable());
        assert!(HealthStatus::Degraded.is_selectable());
        assert!(!HealthStatus::Unhealthy.is_selectable());
    }

    #[test]
    fn test_health_status_display() {
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    // ===== FailureCoupling Tests =====

    #[test]
    fn test_failure_coupling_parse() {
        assert_eq!(FailureCoupling::parse("Shared"), Some(FailureCoupling::Shared));
        assert_eq!(FailureCoupling::parse("separate"), Some(FailureCoupling::Separate));
        assert_eq!(FailureCoupling::parse("both"), None);
        assert_eq!(FailureCoupling::default(), FailureCoupling::Shared);
    }
}
