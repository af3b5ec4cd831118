#![forbid(unsafe_code)]

//! Target-host policy for the image proxy.
//!
//! The proxy fetches URLs chosen by the caller, so by default it only talks to
//! the image CDNs the catalog actually links to. Matching is by domain suffix:
//! `hdslb.com` admits `i0.hdslb.com` but not `evilhdslb.com`.

use url::Url;

/// Image hosts the catalog links to out of the box.
pub const DEFAULT_ALLOWED_DOMAINS: &[&str] = &[
    "hdslb.com",
    "biliimg.com",
    "bilibili.com",
    "ytimg.com",
    "img.youtube.com",
    "ggpht.com",
    "qpic.cn",
    "via.placeholder.com",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPolicy {
    /// Any http/https host is acceptable.
    AllowAny,
    /// Only hosts equal to, or subdomains of, one of these domains.
    AllowList(Vec<String>),
}

impl Default for HostPolicy {
    fn default() -> Self {
        Self::allow_list(DEFAULT_ALLOWED_DOMAINS.iter().copied())
    }
}

impl HostPolicy {
    pub fn allow_list<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|domain| normalize_domain(domain.as_ref()))
            .filter(|domain| !domain.is_empty())
            .collect();
        Self::AllowList(domains)
    }

    pub fn permits(&self, url: &Url) -> bool {
        match self {
            Self::AllowAny => true,
            Self::AllowList(domains) => {
                let Some(host) = url.host_str() else {
                    return false;
                };
                let host = normalize_domain(host);
                domains.iter().any(|domain| host_matches(&host, domain))
            }
        }
    }
}

/// `host` equals `domain` or ends with `.domain`.
pub fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn normalize_domain(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('.')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(value: &str) -> Url {
        Url::parse(value).unwrap()
    }

    #[test]
    fn default_policy_admits_known_cdns() {
        let policy = HostPolicy::default();
        assert!(policy.permits(&url("https://i0.hdslb.com/bfs/archive/a.jpg")));
        assert!(policy.permits(&url("https://img.youtube.com/vi/abc/maxresdefault.jpg")));
        assert!(policy.permits(&url("http://puui.qpic.cn/vcover_hz_pic/0/x.jpg")));
        assert!(policy.permits(&url("https://article.bilibili.com/cover.png")));
    }

    #[test]
    fn default_policy_rejects_lookalikes_and_internal_hosts() {
        let policy = HostPolicy::default();
        assert!(!policy.permits(&url("https://evilhdslb.com/a.jpg")));
        assert!(!policy.permits(&url("http://127.0.0.1/a.jpg")));
        assert!(!policy.permits(&url("http://metadata.google.internal/")));
    }

    #[test]
    fn allow_any_admits_everything() {
        assert!(HostPolicy::AllowAny.permits(&url("http://10.0.0.1/x.png")));
    }

    #[test]
    fn allow_list_normalizes_entries() {
        let policy = HostPolicy::allow_list([" .Example.COM ", ""]);
        assert_eq!(policy, HostPolicy::AllowList(vec!["example.com".into()]));
        assert!(policy.permits(&url("https://cdn.example.com/a.png")));
    }
}
