// 配置读取与覆盖合并：基础 YAML + 覆盖 YAML，字符串支持 ${ENV} 占位符展开。
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/pfpwall.yaml";
pub const DEFAULT_OVERRIDE_PATH: &str = "data/config/pfpwall.override.yaml";

/// 未在配置中填写凭据时依次读取的环境变量。
const BEARER_ENV_KEYS: [&str; 5] = [
    "TWITTER_BEARER",
    "TWITTER_BEARER_TOKEN_2",
    "TWITTER_BEARER_TOKEN_3",
    "TWITTER_BEARER_TOKEN_4",
    "TWITTER_BEARER_TOKEN_5",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub twitter: TwitterConfig,
    #[serde(default)]
    pub unavatar: UnavatarConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub moderation: ModerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    #[serde(deserialize_with = "deserialize_u16_from_any")]
    pub port: u16,
    #[serde(default)]
    pub static_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            static_dir: "public".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorsConfig {
    pub allow_origins: Option<Vec<String>>,
    pub allow_methods: Option<Vec<String>>,
    pub allow_headers: Option<Vec<String>>,
    pub allow_credentials: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub log_level: String,
    #[serde(default)]
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub db_path: String,
    #[serde(default)]
    pub postgres: PostgresConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PostgresConfig {
    #[serde(default)]
    pub dsn: String,
    #[serde(default)]
    pub connect_timeout_s: u64,
    #[serde(default)]
    pub pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_s: u64,
    pub connect_timeout_s: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_s: 30,
            connect_timeout_s: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitterConfig {
    #[serde(default)]
    pub bearer_tokens: Vec<String>,
    #[serde(default = "default_api_hosts")]
    pub api_hosts: Vec<String>,
    #[serde(default = "default_twitter_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            bearer_tokens: Vec::new(),
            api_hosts: default_api_hosts(),
            user_agent: default_twitter_user_agent(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnavatarConfig {
    pub base_url: String,
}

impl Default for UnavatarConfig {
    fn default() -> Self {
        Self {
            base_url: "https://unavatar.io".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub timeout_ms: u64,
    pub user_agent: String,
    pub deployment_domain: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            user_agent: "Mozilla/5.0 (AztecWall proxy)".to_string(),
            deployment_domain: "vercel.app".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub secret: Option<String>,
    pub delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            secret: None,
            delay_ms: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModerationConfig {
    #[serde(default)]
    pub banned_partials: Vec<String>,
}

fn default_api_hosts() -> Vec<String> {
    vec![
        "https://api.x.com".to_string(),
        "https://api.twitter.com".to_string(),
    ]
}

fn default_twitter_user_agent() -> String {
    "AztecWall/1.0".to_string()
}

fn default_lookup_timeout_ms() -> u64 {
    10_000
}

impl Config {
    /// 按配置顺序返回有效凭据；配置为空时回退到环境变量。
    pub fn bearer_tokens(&self) -> Vec<String> {
        let configured = clean_list(&self.twitter.bearer_tokens);
        if !configured.is_empty() {
            return configured;
        }
        BEARER_ENV_KEYS
            .iter()
            .filter_map(|key| env::var(key).ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .collect()
    }

    /// 空白视为未配置，未展开的占位符回退到环境变量。
    pub fn refresh_secret(&self) -> Option<String> {
        let inline = self
            .refresh
            .secret
            .as_ref()
            .map(|value| value.trim())
            .filter(|value| !value.is_empty());
        if let Some(value) = inline {
            if value.starts_with("${") && value.ends_with('}') {
                return env::var("REFRESH_SECRET")
                    .ok()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty());
            }
            return Some(value.to_string());
        }
        env::var("REFRESH_SECRET")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn api_hosts(&self) -> Vec<String> {
        let hosts = clean_list(&self.twitter.api_hosts);
        if hosts.is_empty() {
            return default_api_hosts();
        }
        hosts
            .into_iter()
            .map(|host| host.trim_end_matches('/').to_string())
            .collect()
    }
}

fn clean_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

fn deserialize_u16_from_any<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    struct U16Visitor;

    impl<'de> Visitor<'de> for U16Visitor {
        type Value = u16;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("u16 or numeric string")
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u16::try_from(value).map_err(|_| E::custom("u16 out of range"))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if value < 0 {
                return Err(E::custom("u16 must be non-negative"));
            }
            self.visit_u64(value as u64)
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(E::custom("u16 string is empty"));
            }
            trimmed
                .parse::<u16>()
                .map_err(|_| E::custom("invalid u16 string"))
        }

        fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            self.visit_str(&value)
        }
    }

    deserializer.deserialize_any(U16Visitor)
}

pub fn load_config() -> Config {
    let base_path =
        env::var("PFPWALL_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let override_path = env::var("PFPWALL_CONFIG_OVERRIDE_PATH")
        .unwrap_or_else(|_| DEFAULT_OVERRIDE_PATH.to_string());
    load_config_from(&base_path, &override_path)
}

pub fn load_config_from(base_path: &str, override_path: &str) -> Config {
    let mut merged = read_yaml(base_path);
    if Path::new(override_path).exists() {
        let override_value = read_yaml(override_path);
        // 只对非空字段做递归覆盖，避免误清空已有配置。
        merge_yaml(&mut merged, override_value);
    }

    expand_yaml_env(&mut merged);

    if merged.is_null() {
        return Config::default();
    }
    serde_yaml::from_value::<Config>(merged).unwrap_or_else(|err| {
        warn!("配置解析失败，使用默认配置: {err}");
        Config::default()
    })
}

fn read_yaml(path: &str) -> Value {
    // 配置文件允许不存在，避免开发环境首次启动失败。
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            warn!("读取配置失败: {path}, {err}");
            return Value::Null;
        }
    };
    serde_yaml::from_str(&content).unwrap_or_else(|err| {
        warn!("解析 YAML 失败: {path}, {err}");
        Value::Null
    })
}

fn merge_yaml(base: &mut Value, override_value: Value) {
    match (base, override_value) {
        (Value::Mapping(base_map), Value::Mapping(override_map)) => {
            for (key, value) in override_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, override_value) => {
            if !override_value.is_null() {
                *base_slot = override_value;
            }
        }
    }
}

fn expand_yaml_env(value: &mut Value) {
    match value {
        Value::String(text) => {
            *text = expand_env_placeholders(text);
        }
        Value::Sequence(items) => {
            for item in items {
                expand_yaml_env(item);
            }
        }
        Value::Mapping(map) => {
            for (_, value) in map.iter_mut() {
                expand_yaml_env(value);
            }
        }
        _ => {}
    }
}

fn expand_env_placeholders(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        rest = &rest[start + 2..];
        let Some(end) = rest.find('}') else {
            output.push_str("${");
            output.push_str(rest);
            return output;
        };
        let inner = &rest[..end];
        rest = &rest[end + 1..];
        let (name, default_value) = match inner.split_once(":-") {
            Some((name, default_value)) => (name.trim(), Some(default_value)),
            None => (inner.trim(), None),
        };
        if name.is_empty() {
            output.push_str("${");
            output.push_str(inner);
            output.push('}');
            continue;
        }
        let resolved = env::var(name).ok().filter(|value| !value.is_empty());
        match (resolved, default_value) {
            (Some(value), _) => output.push_str(&value),
            (None, Some(default_value)) => output.push_str(default_value),
            (None, None) => {}
        }
    }
    output.push_str(rest);
    output
}
