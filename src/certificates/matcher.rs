//! Certificate selection for a hostname.
//!
//! The most specific valid certificate wins. Ties on pattern length prefer the
//! newer certificate. A specific certificate about to expire gives way to a
//! broader one that stays valid, so traffic never lands on a certificate
//! inside its last week.

use chrono::{DateTime, Duration, Utc};

use crate::domain::CertificateSummary;
use crate::errors::{ControllerError, Result};

/// Certificates expiring within this many days are avoided when possible
pub const NEAR_EXPIRY_DAYS: i64 = 7;

/// Suffix glob used for certificate domain patterns.
///
/// `*` matches any host; `*.example.org` matches exactly one extra label in
/// front of `.example.org`; anything else must match exactly.
pub fn prefix_glob(pattern: &str, host: &str) -> bool {
    if pattern.is_empty() {
        return host.is_empty();
    }
    if pattern == "*" {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return host.strip_suffix(suffix).is_some_and(|label| !label.contains('.'));
    }
    pattern == host
}

/// Select the best certificate for `hostname` at `now`.
pub fn find_best_match<'a>(
    certificates: &'a [CertificateSummary],
    hostname: &str,
    now: DateTime<Utc>,
) -> Result<&'a CertificateSummary> {
    let margin = Duration::days(NEAR_EXPIRY_DAYS);
    let mut best: Option<(&CertificateSummary, usize)> = None;

    for cert in certificates {
        if !cert.is_valid_at(now) {
            continue;
        }
        for pattern in &cert.domain_names {
            if !prefix_glob(pattern, hostname) {
                continue;
            }

            let length = pattern.len();
            let replace = match best {
                None => true,
                Some((candidate, longest)) => {
                    if length > longest {
                        !cert.expires_within(now, margin)
                    } else if length == longest {
                        prefer_on_tie(candidate, cert, now, margin)
                    } else {
                        candidate.expires_within(now, margin) && !cert.expires_within(now, margin)
                    }
                }
            };

            if replace {
                best = Some((cert, length));
            }
        }
    }

    best.map(|(cert, _)| cert).ok_or_else(|| ControllerError::no_matching_certificate(hostname))
}

/// Tie-break between two certificates matching with equal pattern length.
fn prefer_on_tie(
    candidate: &CertificateSummary,
    cert: &CertificateSummary,
    now: DateTime<Utc>,
    margin: Duration,
) -> bool {
    if cert.not_before > candidate.not_before {
        return !cert.expires_within(now, margin);
    }
    if cert.not_before == candidate.not_before {
        return cert.not_after > candidate.not_after;
    }
    candidate.expires_within(now, margin) && cert.not_after > candidate.not_after
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cert(id: &str, names: &[&str], not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> CertificateSummary {
        CertificateSummary::new(id, names.iter().map(|n| n.to_string()).collect(), not_before, not_after)
    }

    #[test]
    fn glob_semantics() {
        assert!(prefix_glob("", ""));
        assert!(!prefix_glob("", "foo.example.org"));
        assert!(prefix_glob("*", "anything.at.all"));
        assert!(prefix_glob("*.example.org", "foo.example.org"));
        assert!(!prefix_glob("*.example.org", "bar.foo.example.org"));
        assert!(!prefix_glob("*.example.org", "example.org"));
        assert!(prefix_glob("foo.example.org", "foo.example.org"));
        assert!(!prefix_glob("foo.example.org", "bar.example.org"));
    }

    #[test]
    fn wildcard_resolves_hostname() {
        let now = Utc::now();
        let certs = vec![cert("cert-1", &["*.example.org"], now - Duration::days(1), now + Duration::days(90))];
        let found = find_best_match(&certs, "a.example.org", now).unwrap();
        assert_eq!(found.id.as_str(), "cert-1");
    }

    #[test]
    fn exact_match_beats_wildcard() {
        let now = Utc::now();
        let certs = vec![
            cert("wildcard", &["*.example.org"], now - Duration::days(10), now + Duration::days(90)),
            cert("exact", &["foo.example.org"], now - Duration::days(20), now + Duration::days(60)),
        ];
        assert_eq!(find_best_match(&certs, "foo.example.org", now).unwrap().id.as_str(), "exact");

        let reversed: Vec<_> = certs.into_iter().rev().collect();
        assert_eq!(find_best_match(&reversed, "foo.example.org", now).unwrap().id.as_str(), "exact");
    }

    #[test]
    fn near_expiry_exact_degrades_to_wildcard() {
        let now = Utc::now();
        let exact = cert("exact", &["foo.example.org"], now - Duration::days(80), now + Duration::days(3));
        let wildcard = cert("wildcard", &["*.example.org"], now - Duration::days(10), now + Duration::days(90));

        let certs = vec![exact.clone(), wildcard.clone()];
        assert_eq!(find_best_match(&certs, "foo.example.org", now).unwrap().id.as_str(), "wildcard");

        let certs = vec![wildcard, exact];
        assert_eq!(find_best_match(&certs, "foo.example.org", now).unwrap().id.as_str(), "wildcard");
    }

    #[test]
    fn near_expiry_certificate_is_used_when_nothing_else_matches() {
        let now = Utc::now();
        let certs = vec![cert("only", &["foo.example.org"], now - Duration::days(80), now + Duration::days(1))];
        assert_eq!(find_best_match(&certs, "foo.example.org", now).unwrap().id.as_str(), "only");
    }

    #[test]
    fn newer_certificate_wins_tie() {
        let now = Utc::now();
        let certs = vec![
            cert("old", &["*.example.org"], now - Duration::days(60), now + Duration::days(30)),
            cert("new", &["*.example.org"], now - Duration::days(1), now + Duration::days(89)),
        ];
        assert_eq!(find_best_match(&certs, "foo.example.org", now).unwrap().id.as_str(), "new");

        let reversed: Vec<_> = certs.into_iter().rev().collect();
        assert_eq!(find_best_match(&reversed, "foo.example.org", now).unwrap().id.as_str(), "new");
    }

    #[test]
    fn same_issue_date_prefers_longer_validity() {
        let now = Utc::now();
        let issued = now - Duration::days(5);
        let certs = vec![
            cert("short", &["*.example.org"], issued, now + Duration::days(30)),
            cert("long", &["*.example.org"], issued, now + Duration::days(300)),
        ];
        assert_eq!(find_best_match(&certs, "foo.example.org", now).unwrap().id.as_str(), "long");
    }

    #[test]
    fn older_certificate_replaces_expiring_one() {
        let now = Utc::now();
        let certs = vec![
            cert("renewed-early", &["*.example.org"], now - Duration::days(2), now + Duration::days(2)),
            cert("older", &["*.example.org"], now - Duration::days(30), now + Duration::days(60)),
        ];
        assert_eq!(find_best_match(&certs, "foo.example.org", now).unwrap().id.as_str(), "older");
    }

    #[test]
    fn invalid_certificates_are_ignored() {
        let now = Utc::now();
        let certs = vec![
            cert("expired", &["foo.example.org"], now - Duration::days(90), now - Duration::days(1)),
            cert("future", &["foo.example.org"], now + Duration::days(1), now + Duration::days(90)),
        ];
        let err = find_best_match(&certs, "foo.example.org", now).unwrap_err();
        assert!(matches!(err, ControllerError::NoMatchingCertificate { .. }));
    }

    fn hostname() -> impl Strategy<Value = String> {
        prop::sample::select(vec![
            "foo.example.org",
            "bar.example.org",
            "a.b.example.org",
            "example.org",
            "foo.example.com",
        ])
        .prop_map(str::to_string)
    }

    fn pattern() -> impl Strategy<Value = String> {
        prop::sample::select(vec![
            "*.example.org",
            "foo.example.org",
            "*.b.example.org",
            "example.org",
            "*.example.com",
            "*",
        ])
        .prop_map(str::to_string)
    }

    fn summary() -> impl Strategy<Value = (Vec<String>, i64, i64)> {
        (prop::collection::vec(pattern(), 1..3), -100i64..10, -10i64..200)
    }

    proptest! {
        #[test]
        fn match_is_sound_and_complete(
            host in hostname(),
            specs in prop::collection::vec(summary(), 0..6),
        ) {
            let now = Utc::now();
            let certs: Vec<CertificateSummary> = specs
                .into_iter()
                .enumerate()
                .map(|(i, (names, before, after))| {
                    CertificateSummary::new(
                        format!("cert-{}", i),
                        names,
                        now + Duration::days(before),
                        now + Duration::days(after),
                    )
                })
                .collect();

            let any_match = certs
                .iter()
                .any(|c| c.is_valid_at(now) && c.domain_names.iter().any(|p| prefix_glob(p, &host)));

            match find_best_match(&certs, &host, now) {
                Ok(found) => {
                    prop_assert!(found.is_valid_at(now));
                    prop_assert!(found.domain_names.iter().any(|p| prefix_glob(p, &host)));
                }
                Err(_) => prop_assert!(!any_match),
            }
        }
    }
}
