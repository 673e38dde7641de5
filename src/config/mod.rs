use crate::proxy::ProxyDescriptor;
use crate::tunnel::xray::DEFAULT_ENGINE_BINARY;
use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 未配置测速地址时的兜底
pub const DEFAULT_BENCHMARK_URL: &str = "https://www.google.com/generate_204";

/// 指定引擎可执行文件的环境变量
pub const ENGINE_ENV: &str = "PROXYCTX_ENGINE";

const CONFIG_RELATIVE_PATH: &str = ".config/proxyctx/config.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // 节点
    pub proxies: Vec<ProxyDescriptor>,
    /// 节点名或通配符，留空表示全部参与测速
    #[serde(alias = "choice")]
    pub choise: String,

    // 测速地址，按 benchmark > benchmark-url > test-url 取第一个非空值
    pub benchmark: String,
    #[serde(rename = "benchmark-url")]
    pub benchmark_url: String,
    #[serde(rename = "test-url")]
    pub test_url: String,

    /// 单个节点测速超时（毫秒）
    pub timeout: Option<u64>,

    // 本地入口
    pub listen: Option<String>,
    pub port: u16,

    /// 引擎可执行文件
    pub engine: Option<String>,
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 至少一个节点，节点字段完整且名称不重复
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.proxies.is_empty() {
            bail!("no proxies defined");
        }

        let mut names = HashSet::new();
        for proxy in &self.proxies {
            proxy.validate()?;
            if !names.insert(proxy.name.as_str()) {
                bail!("duplicate proxy name: {}", proxy.name);
            }
        }
        Ok(())
    }

    pub fn benchmark_target(&self) -> &str {
        [&self.benchmark, &self.benchmark_url, &self.test_url]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or(DEFAULT_BENCHMARK_URL)
    }

    /// 未配置时返回 `None`，由探测器使用默认值
    pub fn probe_timeout(&self) -> Option<Duration> {
        self.timeout
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// 环境变量优先，其次配置文件，最后默认 `xray`
    pub fn engine_binary(&self) -> String {
        std::env::var(ENGINE_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.engine.clone().filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_ENGINE_BINARY.to_string())
    }
}

/// 查找默认配置：当前目录下的 `.config/proxyctx/config.yaml`，其次用户主目录
pub fn find_default_config() -> anyhow::Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|h| !h.is_empty())
        .map(PathBuf::from);
    find_default_config_in(Path::new("."), home.as_deref())
}

pub fn find_default_config_in(cwd: &Path, home: Option<&Path>) -> anyhow::Result<PathBuf> {
    let local = cwd.join(CONFIG_RELATIVE_PATH);
    if local.is_file() {
        return Ok(local);
    }

    let Some(home) = home else {
        return Err(anyhow!(
            "no config found: expected {:?} or {:?}",
            local,
            format!("~/{}", CONFIG_RELATIVE_PATH)
        ));
    };

    let home_path = home.join(CONFIG_RELATIVE_PATH);
    if home_path.is_file() {
        return Ok(home_path);
    }
    Err(anyhow!(
        "no config found: expected {:?} or {:?}",
        local,
        home_path
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SAMPLE: &str = r#"
choise: "hk-*"
benchmark-url: https://cp.cloudflare.com/generate_204
timeout: 3000
proxies:
  - name: hk-1
    type: vmess
    server: hk1.example.com
    port: 443
    uuid: 11111111-1111-1111-1111-111111111111
    cipher: auto
    tls: true
  - name: hk-2
    type: vless
    server: hk2.example.com
    port: 8443
    uuid: 22222222-2222-2222-2222-222222222222
    network: ws
    ws-opts:
      path: /ws
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.proxies.len(), 2);
        assert_eq!(config.choise, "hk-*");
        assert_eq!(config.benchmark_target(), "https://cp.cloudflare.com/generate_204");
        assert_eq!(config.probe_timeout(), Some(Duration::from_millis(3000)));
        assert_eq!(config.port, 0);
        assert!(config.listen.is_none());
    }

    #[test]
    fn test_choice_alias() {
        let yaml = "choice: us-1\nproxies:\n  - {name: us-1, type: vmess, server: a, port: 1, uuid: x}\n";
        assert_eq!(Config::from_yaml(yaml).unwrap().choise, "us-1");
    }

    #[test]
    fn test_benchmark_target_order() {
        let mut config = Config::default();
        assert_eq!(config.benchmark_target(), DEFAULT_BENCHMARK_URL);

        config.test_url = "https://c.example.com".to_string();
        assert_eq!(config.benchmark_target(), "https://c.example.com");

        config.benchmark_url = "https://b.example.com".to_string();
        assert_eq!(config.benchmark_target(), "https://b.example.com");

        config.benchmark = "https://a.example.com".to_string();
        assert_eq!(config.benchmark_target(), "https://a.example.com");
    }

    #[test]
    fn test_empty_proxies_rejected() {
        let err = Config::from_yaml("proxies: []\n").unwrap_err();
        assert!(err.to_string().contains("no proxies"));
        assert!(Config::from_yaml("choise: a\n").is_err());
    }

    #[test]
    fn test_malformed_proxy_rejected() {
        let yaml = "proxies:\n  - {name: a, type: vmess, server: a.example.com, port: 443}\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let yaml = "proxies:\n  - {name: a, type: vmess, server: a, port: 1, uuid: x}\n  - {name: a, type: vless, server: b, port: 2, uuid: y}\n";
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_zero_timeout_means_default() {
        let config = Config {
            timeout: Some(0),
            ..Default::default()
        };
        assert_eq!(config.probe_timeout(), None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, SAMPLE).unwrap();
        assert_eq!(Config::load_from_file(&path).unwrap().proxies.len(), 2);

        let missing = Config::load_from_file(dir.path().join("missing.yaml")).unwrap_err();
        assert!(format!("{:#}", missing).contains("missing.yaml"));
    }

    #[test]
    fn test_find_default_config_prefers_local() {
        let cwd = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let home_cfg = home.path().join(CONFIG_RELATIVE_PATH);
        fs::create_dir_all(home_cfg.parent().unwrap()).unwrap();
        fs::write(&home_cfg, SAMPLE).unwrap();

        assert_eq!(
            find_default_config_in(cwd.path(), Some(home.path())).unwrap(),
            home_cfg
        );

        let local_cfg = cwd.path().join(CONFIG_RELATIVE_PATH);
        fs::create_dir_all(local_cfg.parent().unwrap()).unwrap();
        fs::write(&local_cfg, SAMPLE).unwrap();
        assert_eq!(
            find_default_config_in(cwd.path(), Some(home.path())).unwrap(),
            local_cfg
        );
    }

    #[test]
    fn test_find_default_config_missing() {
        let cwd = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let err = find_default_config_in(cwd.path(), Some(home.path())).unwrap_err();
        assert!(err.to_string().contains("no config found"));
        assert!(find_default_config_in(cwd.path(), None).is_err());
    }
}
