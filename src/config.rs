use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;

use crate::collection::SyncOptions;

const DEFAULT_URL: &str = "http://127.0.0.1:8090";
const DEFAULT_PER_PAGE: u32 = 100;

/// 設定ファイルの内容。全ての項目は省略できる。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    url: Option<String>,
    email: Option<String>,
    password: Option<String>,
    per_page: Option<u32>,
}

/// PocketBaseへの接続設定。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub url: String,
    pub email: String,
    pub password: String,
    pub per_page: u32,
}

impl Config {
    /// 設定ファイルと環境変数から設定を読み込む。
    ///
    /// 環境変数`POCKETBASE_URL`、`POCKETBASE_EMAIL`、`POCKETBASE_PASSWORD`、`POCKETBASE_PER_PAGE`は
    /// 設定ファイルの値より優先する。
    pub fn load() -> Result<Self> {
        let file = match Self::config_path() {
            Some(path) if path.exists() => read_file(&path)?,
            _ => ConfigFile::default(),
        };
        let vars: HashMap<String, String> = env::vars()
            .filter(|(key, _)| key.starts_with("POCKETBASE_"))
            .collect();

        Self::from_sources(file, &vars)
    }

    /// 設定ファイルのパスを返す。
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pbtrack").join("config.json"))
    }

    fn from_sources(file: ConfigFile, vars: &HashMap<String, String>) -> Result<Self> {
        let var = |key: &str| vars.get(key).filter(|value| !value.is_empty()).cloned();

        let per_page = match var("POCKETBASE_PER_PAGE") {
            Some(value) => value
                .parse()
                .with_context(|| format!("POCKETBASE_PER_PAGE must be a number: {}", value))?,
            None => file.per_page.unwrap_or(DEFAULT_PER_PAGE),
        };

        Ok(Self {
            url: var("POCKETBASE_URL")
                .or(file.url)
                .unwrap_or_else(|| DEFAULT_URL.to_string()),
            email: var("POCKETBASE_EMAIL")
                .or(file.email)
                .context("POCKETBASE_EMAIL must be set")?,
            password: var("POCKETBASE_PASSWORD")
                .or(file.password)
                .context("POCKETBASE_PASSWORD must be set")?,
            per_page: per_page.max(1),
        })
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            per_page: self.per_page,
        }
    }
}

fn read_file(path: &Path) -> Result<ConfigFile> {
    debug!("Reading config from {}", path.display());
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Invalid config format: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::{Config, ConfigFile};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(
            ConfigFile::default(),
            &vars(&[
                ("POCKETBASE_EMAIL", "ada@example.com"),
                ("POCKETBASE_PASSWORD", "secret"),
            ]),
        )
        .unwrap();

        assert_eq!(
            config,
            Config {
                url: "http://127.0.0.1:8090".to_string(),
                email: "ada@example.com".to_string(),
                password: "secret".to_string(),
                per_page: 100,
            }
        );
    }

    /// 環境変数は設定ファイルより優先する。
    #[test]
    fn test_env_overrides_file() {
        let file: ConfigFile = serde_json::from_str(
            r#"{"url": "https://pb.example.com", "email": "file@example.com", "password": "p", "perPage": 50}"#,
        )
        .unwrap();

        let config = Config::from_sources(
            file,
            &vars(&[("POCKETBASE_EMAIL", "env@example.com"), ("POCKETBASE_URL", "")]),
        )
        .unwrap();

        assert_eq!(config.url, "https://pb.example.com");
        assert_eq!(config.email, "env@example.com");
        assert_eq!(config.password, "p");
        assert_eq!(config.sync_options().per_page, 50);
    }

    #[rstest]
    #[case::no_email(&[("POCKETBASE_PASSWORD", "secret")])]
    #[case::no_password(&[("POCKETBASE_EMAIL", "ada@example.com")])]
    #[case::invalid_per_page(&[
        ("POCKETBASE_EMAIL", "ada@example.com"),
        ("POCKETBASE_PASSWORD", "secret"),
        ("POCKETBASE_PER_PAGE", "many"),
    ])]
    fn test_invalid(#[case] pairs: &[(&str, &str)]) {
        assert!(Config::from_sources(ConfigFile::default(), &vars(pairs)).is_err());
    }
}
