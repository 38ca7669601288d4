// 头像过期判定：只检查字符串结构，不做任何网络请求。
use url::Url;

/// 本地默认占位图路径标记。
pub const PLACEHOLDER_MARKER: &str = "/img/default-pfp.svg";
/// 相对地址解析时使用的占位基址。
pub const DUMMY_BASE: &str = "https://dummy.base";
pub const PROXY_ENTRYPOINT: &str = "/api/img";
pub const DEFAULT_DEPLOYMENT_DOMAIN: &str = "vercel.app";

const UNAVATAR_HOST: &str = "unavatar.io";
const UNAVATAR_TWITTER_MARKER: &str = "unavatar.io/twitter/";
const WESERV_HOST: &str = "images.weserv.nl";

#[derive(Debug, Clone)]
pub struct StalenessClassifier {
    deployment_domain: String,
}

impl Default for StalenessClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_DEPLOYMENT_DOMAIN)
    }
}

impl StalenessClassifier {
    pub fn new(deployment_domain: &str) -> Self {
        let cleaned = deployment_domain.trim().trim_start_matches('.').to_lowercase();
        let deployment_domain = if cleaned.is_empty() {
            DEFAULT_DEPLOYMENT_DOMAIN.to_string()
        } else {
            cleaned
        };
        Self { deployment_domain }
    }

    /// 判断已存储的头像引用是否为兜底/占位图，需要重新解析。
    pub fn is_fallback(&self, stored: &str) -> bool {
        if stored.is_empty() {
            return true;
        }
        if stored.contains(PLACEHOLDER_MARKER) {
            return true;
        }
        self.classify_url(stored).unwrap_or(true)
    }

    // None 表示解析或解码失败。
    fn classify_url(&self, stored: &str) -> Option<bool> {
        let url = parse_reference(stored)?;
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();

        if host == UNAVATAR_HOST {
            return Some(true);
        }

        // 相对地址按占位基址解析，主机名不属于部署域名，不会进入代理分支。
        if host.ends_with(&self.deployment_domain) && url.path().starts_with(PROXY_ENTRYPOINT) {
            let inner = decoded_param(&url, "u")?;
            return Some(mentions_fallback(&inner));
        }

        if host == WESERV_HOST {
            let inner = decoded_param(&url, "url")?;
            let default = decoded_param(&url, "default")?;
            return Some(mentions_fallback(&inner) || mentions_fallback(&default));
        }

        Some(false)
    }
}

/// 使用默认部署域名判定。
pub fn is_fallback(stored: &str) -> bool {
    StalenessClassifier::default().is_fallback(stored)
}

fn parse_reference(stored: &str) -> Option<Url> {
    match Url::parse(stored) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(DUMMY_BASE).ok()?;
            base.join(stored).ok()
        }
        Err(_) => None,
    }
}

// query_pairs 已解码一次，这里再做一次 URI 解码以兼容双重编码的值；
// 残缺的 `%` 转义视为解码失败。
fn decoded_param(url: &Url, key: &str) -> Option<String> {
    let raw = url
        .query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default();
    if has_malformed_escape(&raw) {
        return None;
    }
    urlencoding::decode(&raw).ok().map(|value| value.into_owned())
}

fn has_malformed_escape(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.iter().enumerate().any(|(index, byte)| {
        *byte == b'%'
            && !matches!(
                (bytes.get(index + 1), bytes.get(index + 2)),
                (Some(high), Some(low)) if high.is_ascii_hexdigit() && low.is_ascii_hexdigit()
            )
    })
}

fn mentions_fallback(value: &str) -> bool {
    value.contains(UNAVATAR_TWITTER_MARKER) || value.contains(PLACEHOLDER_MARKER)
}
