//! Endpoint auto-correction (§4.7): inserts or removes the `ingest-` hostname
//! prefix so a query endpoint can be reused for ingestion kind clients and vice
//! versa, without rewriting reserved/dev hostnames.

use url::{Host, Url};

const RESERVED_HOSTS: &[&str] = &["localhost", "onebox.dev.kusto.windows.net", "onebuild"];

fn is_reserved(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => true,
        Some(Host::Domain(d)) => {
            d.eq_ignore_ascii_case("localhost") || RESERVED_HOSTS.iter().any(|h| d.eq_ignore_ascii_case(h))
        }
        None => true,
    }
}

/// Whether `url` points at an ingestion-kind endpoint, as evidenced by its
/// `ingest-` hostname prefix.
pub fn has_ingest_prefix(url: &Url) -> bool {
    matches!(url.host(), Some(Host::Domain(d)) if d.starts_with("ingest-"))
}

/// Adds the `ingest-` prefix if `url` needs one for an ingestion-kind client and
/// doesn't already have it; a no-op for reserved hosts.
pub fn to_ingest_endpoint(url: &Url) -> Url {
    if is_reserved(url) || has_ingest_prefix(url) {
        return url.clone();
    }
    rewrite_host(url, |h| format!("ingest-{h}"))
}

/// Removes the `ingest-` prefix if present, for a query-kind client built from an
/// ingestion endpoint; a no-op for reserved hosts or hosts without the prefix.
pub fn to_query_endpoint(url: &Url) -> Url {
    if is_reserved(url) || !has_ingest_prefix(url) {
        return url.clone();
    }
    rewrite_host(url, |h| h.strip_prefix("ingest-").unwrap_or(h).to_string())
}

fn rewrite_host(url: &Url, f: impl FnOnce(&str) -> String) -> Url {
    let Some(Host::Domain(host)) = url.host() else { return url.clone() };
    let new_host = f(host);
    let mut out = url.clone();
    let _ = out.set_host(Some(&new_host));
    out
}
