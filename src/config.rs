use crate::provider::VideoDefaults;
use crate::provider::custom::CustomProviderConfig;
use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8046;
const DEFAULT_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_USER_AGENT: &str = "gen2api/0.1";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_HISTORY_TTL_HOURS: u64 = 24;

const DEFAULT_PROMPT_SYSTEM: &str = "You are a professional AI image prompt engineer. Expand the user's idea into a vivid, detailed prompt covering subject, composition, lighting, style and quality.";
/// 追加在系统提示词之后，约束模型只输出提示词本身。
pub const PROMPT_SYSTEM_SUFFIX: &str =
    "\n\nOutput only the final prompt in English. Do not add explanations, titles or quotes.";
const DEFAULT_MS_PROMPT_MODEL: &str = "Qwen/Qwen3-Coder-30B-A3B-Instruct";
const DEFAULT_HF_PROMPT_MODEL: &str = "openai-fast";

const DEFAULT_VIDEO_PROMPT: &str = "make this image come alive, cinematic motion, smooth animation";
const DEFAULT_VIDEO_STEPS: u32 = 6;
const DEFAULT_VIDEO_DURATION: f64 = 3.0;
const DEFAULT_VIDEO_GUIDANCE: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub user_agent: String,
    pub timeout_ms: u64,
    pub proxy: String,

    pub api_key: String,

    pub debug: String,

    pub data_dir: String,

    /// 逗号分隔的凭证列表，按配置顺序使用。
    pub hf_tokens: String,
    pub ms_tokens: String,
    pub custom_providers: Vec<CustomProviderConfig>,

    pub poll_interval_secs: u64,
    pub history_ttl_hours: u64,

    pub prompt_system: String,
    pub ms_prompt_model: String,
    pub hf_prompt_model: String,

    pub video: VideoDefaults,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    #[serde(alias = "HOST")]
    host: Option<String>,
    #[serde(alias = "PORT")]
    port: Option<u16>,

    #[serde(alias = "USER_AGENT")]
    user_agent: Option<String>,
    #[serde(alias = "TIMEOUT")]
    timeout: Option<u64>,
    #[serde(alias = "PROXY")]
    proxy: Option<String>,

    #[serde(alias = "API_KEY")]
    api_key: Option<String>,

    #[serde(alias = "DEBUG")]
    debug: Option<String>,

    #[serde(alias = "DATA_DIR")]
    data_dir: Option<String>,

    #[serde(alias = "HF_TOKENS")]
    hf_tokens: Option<String>,
    #[serde(alias = "MS_TOKENS")]
    ms_tokens: Option<String>,
    #[serde(alias = "CUSTOM_PROVIDERS")]
    custom_providers: Option<String>,

    #[serde(alias = "POLL_INTERVAL_SECS")]
    poll_interval_secs: Option<u64>,
    #[serde(alias = "HISTORY_TTL_HOURS")]
    history_ttl_hours: Option<u64>,

    #[serde(alias = "PROMPT_SYSTEM")]
    prompt_system: Option<String>,
    #[serde(alias = "MS_PROMPT_MODEL")]
    ms_prompt_model: Option<String>,
    #[serde(alias = "HF_PROMPT_MODEL")]
    hf_prompt_model: Option<String>,

    #[serde(alias = "VIDEO_PROMPT")]
    video_prompt: Option<String>,
    #[serde(alias = "VIDEO_STEPS")]
    video_steps: Option<u32>,
    #[serde(alias = "VIDEO_DURATION")]
    video_duration: Option<f64>,
    #[serde(alias = "VIDEO_GUIDANCE")]
    video_guidance: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw(RawEnv::default())
    }
}

impl Config {
    pub fn load() -> Self {
        load_dotenv();

        let raw = Figment::from(Env::raw())
            .extract::<RawEnv>()
            .unwrap_or_default();

        let mut cfg = Self::from_raw(raw);

        // 命令行覆盖：-debug <level>
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            if arg == "-debug"
                && let Some(v) = args.next()
            {
                cfg.debug = v;
            }
        }

        cfg
    }

    fn from_raw(raw: RawEnv) -> Self {
        Self {
            host: raw.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: raw.port.unwrap_or(DEFAULT_PORT),
            user_agent: non_empty(raw.user_agent).unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout_ms: raw.timeout.unwrap_or(DEFAULT_TIMEOUT_MS),
            proxy: raw.proxy.unwrap_or_default(),
            api_key: raw.api_key.unwrap_or_default(),
            debug: raw.debug.unwrap_or_else(|| "off".to_string()),
            data_dir: raw.data_dir.unwrap_or_else(|| "./data".to_string()),
            hf_tokens: raw.hf_tokens.unwrap_or_default(),
            ms_tokens: raw.ms_tokens.unwrap_or_default(),
            custom_providers: parse_custom_providers(raw.custom_providers.as_deref()),
            poll_interval_secs: raw
                .poll_interval_secs
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            history_ttl_hours: raw.history_ttl_hours.unwrap_or(DEFAULT_HISTORY_TTL_HOURS),
            prompt_system: non_empty(raw.prompt_system)
                .unwrap_or_else(|| DEFAULT_PROMPT_SYSTEM.to_string()),
            ms_prompt_model: non_empty(raw.ms_prompt_model)
                .unwrap_or_else(|| DEFAULT_MS_PROMPT_MODEL.to_string()),
            hf_prompt_model: non_empty(raw.hf_prompt_model)
                .unwrap_or_else(|| DEFAULT_HF_PROMPT_MODEL.to_string()),
            video: VideoDefaults {
                prompt: non_empty(raw.video_prompt)
                    .unwrap_or_else(|| DEFAULT_VIDEO_PROMPT.to_string()),
                steps: raw.video_steps.unwrap_or(DEFAULT_VIDEO_STEPS),
                duration: raw.video_duration.unwrap_or(DEFAULT_VIDEO_DURATION),
                guidance: raw.video_guidance.unwrap_or(DEFAULT_VIDEO_GUIDANCE),
            },
        }
    }

    pub fn log_level(&self) -> crate::logging::LogLevel {
        crate::logging::LogLevel::parse(&self.debug)
    }

    /// 提示词优化使用的完整系统提示词。
    pub fn system_prompt(&self) -> String {
        format!("{}{PROMPT_SYSTEM_SUFFIX}", self.prompt_system.trim())
    }

    pub fn history_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("history.json")
    }

    pub fn credential_status_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("credential_status.json")
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

fn parse_custom_providers(value: Option<&str>) -> Vec<CustomProviderConfig> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Vec::new();
    };
    match sonic_rs::from_str::<Vec<CustomProviderConfig>>(value) {
        Ok(list) => list
            .into_iter()
            .filter(|p| !p.id.trim().is_empty() && !p.api_url.trim().is_empty())
            .collect(),
        Err(e) => {
            tracing::warn!("CUSTOM_PROVIDERS 解析失败，已忽略：{e}");
            Vec::new()
        }
    }
}

/// 加载 `.env`；已存在的进程环境变量优先，不会被覆盖。
fn load_dotenv() {
    let Some(dotenv_path) = find_dotenv_path() else {
        return;
    };

    let Ok(content) = std::fs::read_to_string(&dotenv_path) else {
        return;
    };

    for (key, value) in content.lines().filter_map(parse_dotenv_line) {
        if std::env::var_os(&key).is_some() {
            continue;
        }
        // Rust 2024 中 set_var 为 unsafe；此处处于启动阶段，尚无其他线程读取环境变量。
        unsafe {
            std::env::set_var(key, value);
        }
    }
}

fn find_dotenv_path() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let mut dir: &Path = cwd.as_path();

    loop {
        let candidate = dir.join(".env");
        if candidate.is_file() {
            return Some(candidate);
        }

        // 避免跨越仓库根目录：发现 Cargo.toml 或 .git 即停止向上寻找。
        if dir.join("Cargo.toml").is_file() || dir.join(".git").is_dir() {
            return None;
        }

        let Some(parent) = dir.parent() else {
            break;
        };
        if parent == dir {
            break;
        }
        dir = parent;
    }

    None
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let mut line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some(rest) = line.strip_prefix("export ") {
        line = rest.trim_start();
    }

    let eq_idx = line.find('=')?;
    if eq_idx == 0 {
        return None;
    }

    let key = line[..eq_idx].trim();
    if key.is_empty() {
        return None;
    }

    let mut raw = line[eq_idx + 1..].trim();
    if raw.is_empty() {
        return Some((key.to_string(), String::new()));
    }

    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            raw = &raw[1..raw.len() - 1];
            return Some((key.to_string(), raw.to_string()));
        }
    }

    raw = strip_inline_comment(raw);
    Some((key.to_string(), raw.trim().to_string()))
}

fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] != b'#' {
            continue;
        }
        if i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t' {
            return value[..i].trim_end();
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied_for_missing_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.poll_interval_secs, 5);
        assert_eq!(cfg.history_ttl_hours, 24);
        assert_eq!(cfg.video.steps, DEFAULT_VIDEO_STEPS);
        assert!(cfg.custom_providers.is_empty());
        assert!(cfg.system_prompt().ends_with(PROMPT_SYSTEM_SUFFIX));
    }

    #[test]
    fn zero_poll_interval_falls_back_to_default() {
        let cfg = Config::from_raw(RawEnv {
            poll_interval_secs: Some(0),
            ..Default::default()
        });
        assert_eq!(cfg.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
    }

    #[test]
    fn custom_providers_parse_from_json() {
        let list = parse_custom_providers(Some(
            r#"[{"id":"my","apiUrl":"https://gen.example/","token":"t"},{"id":"","apiUrl":"x"}]"#,
        ));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "my");
        assert_eq!(list[0].token.as_deref(), Some("t"));

        assert!(parse_custom_providers(Some("not json")).is_empty());
        assert!(parse_custom_providers(None).is_empty());
    }

    #[test]
    fn dotenv_line_parsing() {
        assert_eq!(
            parse_dotenv_line("export HF_TOKENS=\"a,b\""),
            Some(("HF_TOKENS".to_string(), "a,b".to_string()))
        );
        assert_eq!(
            parse_dotenv_line("PORT=9000 # 端口"),
            Some(("PORT".to_string(), "9000".to_string()))
        );
        assert_eq!(parse_dotenv_line("# comment"), None);
        assert_eq!(parse_dotenv_line("=x"), None);
    }
}
