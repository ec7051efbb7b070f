//! ICE candidate inspection and allowlist filtering
//!
//! Candidates arriving from the remote producer are screened before they are
//! handed to the peer connection. Operators piloting vehicles over tethered or
//! multi-homed links pin the negotiation to known interfaces by listing the
//! addresses and transport protocols a candidate may use; everything else is
//! dropped before it can influence path selection.

use std::net::Ipv4Addr;

/// Outcome of screening a remote ICE candidate against the configured allowlists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDecision {
    /// Candidate passed every configured allowlist
    Allowed,
    /// An IP allowlist is configured and the candidate matches none of its entries
    DroppedByIpAllowlist,
    /// A protocol allowlist is configured and the candidate matches none of its entries
    DroppedByProtocolAllowlist,
}

/// Extract the first IPv4 address embedded in a candidate string.
///
/// Tokens containing `:` are skipped so IPv6 literals and `foundation:port`
/// fragments never produce a false match. Returns `None` for candidates that
/// carry no IPv4 address at all (e.g. mDNS obfuscated candidates).
pub fn extract_ipv4(candidate: &str) -> Option<Ipv4Addr> {
    candidate
        .split_whitespace()
        .filter(|token| !token.contains(':'))
        .find_map(|token| token.parse::<Ipv4Addr>().ok())
}

/// Screen a candidate string against the configured IP and protocol allowlists.
///
/// An empty allowlist means "no restriction". Matching is textual containment
/// on the raw candidate line, so IP entries match the connection address and
/// protocol entries match the transport token (`udp`, `tcp`).
pub fn evaluate_candidate(
    candidate: &str,
    allowed_ips: &[String],
    allowed_protocols: &[String],
) -> CandidateDecision {
    if !allowed_ips.is_empty() && !allowed_ips.iter().any(|ip| candidate.contains(ip.as_str())) {
        return CandidateDecision::DroppedByIpAllowlist;
    }

    if !allowed_protocols.is_empty()
        && !allowed_protocols
            .iter()
            .any(|protocol| candidate.contains(protocol.as_str()))
    {
        return CandidateDecision::DroppedByProtocolAllowlist;
    }

    CandidateDecision::Allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST_CANDIDATE: &str = "candidate:1 1 udp 2122260223 192.168.1.10 50000 typ host";

    #[test]
    fn test_extracts_first_ipv4() {
        assert_eq!(
            extract_ipv4(HOST_CANDIDATE),
            Some(Ipv4Addr::new(192, 168, 1, 10))
        );
    }

    #[test]
    fn test_skips_ipv6_looking_tokens() {
        let candidate = "candidate:1 1 udp 2122 fe80::1 50000 typ host 10.0.0.7 raddr";
        assert_eq!(extract_ipv4(candidate), Some(Ipv4Addr::new(10, 0, 0, 7)));
    }

    #[test]
    fn test_no_address_found() {
        assert_eq!(extract_ipv4("candidate:1 1 udp 2122 abcd.local 50000"), None);
    }

    #[test]
    fn test_ip_allowlist_drops_unlisted_address() {
        let allowed = vec!["192.168.1.10".to_string()];
        let candidate = "candidate:1 1 udp 2122260223 10.0.0.5 50000 typ host";
        assert_eq!(
            evaluate_candidate(candidate, &allowed, &[]),
            CandidateDecision::DroppedByIpAllowlist
        );
    }

    #[test]
    fn test_ip_allowlist_accepts_listed_address() {
        let allowed = vec!["192.168.1.10".to_string()];
        assert_eq!(
            evaluate_candidate(HOST_CANDIDATE, &allowed, &[]),
            CandidateDecision::Allowed
        );
    }

    #[test]
    fn test_protocol_allowlist() {
        let udp_only = vec!["udp".to_string()];
        assert_eq!(
            evaluate_candidate(HOST_CANDIDATE, &[], &udp_only),
            CandidateDecision::Allowed
        );

        let tcp_only = vec!["tcp".to_string()];
        assert_eq!(
            evaluate_candidate(HOST_CANDIDATE, &[], &tcp_only),
            CandidateDecision::DroppedByProtocolAllowlist
        );
    }

    #[test]
    fn test_empty_allowlists_allow_everything() {
        assert_eq!(
            evaluate_candidate(HOST_CANDIDATE, &[], &[]),
            CandidateDecision::Allowed
        );
    }
}
