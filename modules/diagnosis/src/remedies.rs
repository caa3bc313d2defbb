use crate::{FindingKind, RootCause, RunIssue};

/// Fixed remediation steps per finding kind. The match is exhaustive, so every kind
/// has an entry; the tests assert none of them is empty.
pub fn remedies(kind: FindingKind) -> &'static [&'static str] {
    match kind {
        FindingKind::Endpoint(cause) => match cause {
            RootCause::DnsResolution => &[
                "Try switching DNS servers (for example 8.8.8.8 or 1.1.1.1)",
                "Check the nameserver entries in /etc/resolv.conf",
                "Verify the endpoint hostnames are spelled correctly",
            ],
            RootCause::TlsHandshake => &[
                "Check that the system time and date are correct",
                "Update the CA certificate bundle",
            ],
            RootCause::TransportBlocked => &[
                "Check firewall rules for outbound HTTPS traffic",
                "Try connecting from a different network to rule out ISP filtering",
            ],
            RootCause::RpcApplicationError => &[
                "Switch to another endpoint or retry later; the server is reachable but rejects JSON-RPC calls",
                "Check that the provider supports the failing methods",
            ],
            RootCause::WrongNetwork => &[
                "Confirm the wallet's selected network matches the intended chain id",
            ],
            RootCause::ProbeIncomplete => &[
                "Re-run the diagnosis to completion to probe the remaining endpoints",
            ],
        },
        FindingKind::Run(issue) => match issue {
            RunIssue::NoInternet => &[
                "Check your internet connection",
                "Verify the network adapter is working",
            ],
            RunIssue::ProxyDetected => &["Try disabling the proxy temporarily"],
            RunIssue::IncompleteRun => &[
                "Treat this report as partial: endpoints that were not fully probed are not confirmed unhealthy",
            ],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_total() {
        for cause in RootCause::ALL {
            assert!(!remedies(FindingKind::Endpoint(cause)).is_empty(), "{}", cause);
        }
        for issue in RunIssue::ALL {
            assert!(!remedies(FindingKind::Run(issue)).is_empty(), "{}", issue.as_str());
        }
    }
}
