//! 统一配置中心
//!
//! 提供同步引擎的全局配置管理，包括：
//! - 远程存储集合名
//! - 信息流分页与投票预取
//! - 日志过滤

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::str::FromStr;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "FEEDSYNC_";
/// 指定配置文件路径的环境变量
pub const CONFIG_FILE_ENV: &str = "FEEDSYNC_CONFIG_FILE";

/// 全局应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// 集合名配置
    #[serde(default)]
    pub collections: CollectionConfig,
    /// 信息流配置
    #[serde(default)]
    pub feed: FeedConfig,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 远程存储集合名
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub posts: String,
    pub comments: String,
    pub votes: String,
    pub users: String,
}

/// 信息流配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// 每页帖子数
    pub page_size: u32,
    /// 只同步带此标签的帖子
    #[serde(default)]
    pub tag_filter: Option<String>,
    /// 批量拉取投票记录时每次查询的实体ID上限
    pub vote_fetch_chunk_size: usize,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// tracing EnvFilter 指令
    pub filter: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            posts: "posts".to_string(),
            comments: "comments".to_string(),
            votes: "votes".to_string(),
            users: "users".to_string(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            tag_filter: None,
            vote_fetch_chunk_size: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            collections: CollectionConfig::default(),
            feed: FeedConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从环境变量加载配置
    /// 变量存在但无法解析时返回错误，缺失时使用默认值
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            collections: CollectionConfig {
                posts: env_string("POSTS_COLLECTION", defaults.collections.posts),
                comments: env_string("COMMENTS_COLLECTION", defaults.collections.comments),
                votes: env_string("VOTES_COLLECTION", defaults.collections.votes),
                users: env_string("USERS_COLLECTION", defaults.collections.users),
            },
            feed: FeedConfig {
                page_size: env_parse("PAGE_SIZE", defaults.feed.page_size)?,
                tag_filter: env::var(format!("{ENV_PREFIX}TAG_FILTER")).ok(),
                vote_fetch_chunk_size: env_parse(
                    "VOTE_FETCH_CHUNK_SIZE",
                    defaults.feed.vote_fetch_chunk_size,
                )?,
            },
            logging: LoggingConfig {
                filter: env_string("LOG", defaults.logging.filter),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// 从环境变量加载配置，开发环境版本
    /// 无法解析的值被忽略并回退到默认值
    pub fn from_env_with_defaults() -> Self {
        let defaults = Self::default();
        Self {
            collections: CollectionConfig {
                posts: env_string("POSTS_COLLECTION", defaults.collections.posts),
                comments: env_string("COMMENTS_COLLECTION", defaults.collections.comments),
                votes: env_string("VOTES_COLLECTION", defaults.collections.votes),
                users: env_string("USERS_COLLECTION", defaults.collections.users),
            },
            feed: FeedConfig {
                page_size: env_parse("PAGE_SIZE", defaults.feed.page_size)
                    .unwrap_or(defaults.feed.page_size),
                tag_filter: env::var(format!("{ENV_PREFIX}TAG_FILTER")).ok(),
                vote_fetch_chunk_size: env_parse(
                    "VOTE_FETCH_CHUNK_SIZE",
                    defaults.feed.vote_fetch_chunk_size,
                )
                .unwrap_or(defaults.feed.vote_fetch_chunk_size),
            },
            logging: LoggingConfig {
                filter: env_string("LOG", defaults.logging.filter),
            },
        }
    }

    /// 分层加载：默认值 -> 可选 YAML 文件 (FEEDSYNC_CONFIG_FILE) -> 环境变量 (FEEDSYNC_*, `__` 分隔层级)
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = env::var(CONFIG_FILE_ENV) {
            figment = figment.merge(Yaml::file(path));
        }
        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|err| ConfigError::Load(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed.page_size == 0 {
            return Err(ConfigError::InvalidFeedConfig(
                "page size must be greater than 0".to_string(),
            ));
        }

        if self.feed.vote_fetch_chunk_size == 0 {
            return Err(ConfigError::InvalidFeedConfig(
                "vote fetch chunk size must be greater than 0".to_string(),
            ));
        }

        let names = [
            &self.collections.posts,
            &self.collections.comments,
            &self.collections.votes,
            &self.collections.users,
        ];
        if names.iter().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::InvalidCollections(
                "collection names cannot be empty".to_string(),
            ));
        }
        let unique: HashSet<&String> = names.iter().copied().collect();
        if unique.len() != names.len() {
            return Err(ConfigError::InvalidCollections(
                "collection names must be distinct".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_string(key: &str, default: String) -> String {
    env::var(format!("{ENV_PREFIX}{key}")).unwrap_or(default)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    let name = format!("{ENV_PREFIX}{key}");
    match env::var(&name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(ConfigError::EnvVarError(err)),
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid feed configuration: {0}")]
    InvalidFeedConfig(String),
    #[error("Invalid collection configuration: {0}")]
    InvalidCollections(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
    #[error("Failed to load configuration: {0}")]
    Load(String),
    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] std::env::VarError),
}
