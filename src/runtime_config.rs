//! 运行时可替换的凭证配置。
//!
//! 凭证列表可通过管理接口"立即生效"地替换。
//! 使用 ArcSwap 实现无锁读取，写入时创建新的快照。

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::credential::types::parse_credentials;
use crate::credential::{Credential, CredentialSource};
use crate::provider::{huggingface, modelscope};

type CredentialMap = HashMap<String, Vec<Credential>>;

/// 各服务商的凭证列表快照。
#[derive(Debug, Default)]
pub struct RuntimeCredentials {
    inner: ArcSwap<CredentialMap>,
}

impl RuntimeCredentials {
    /// 从初始 Config 创建。
    pub fn from_config(cfg: &Config) -> Self {
        let mut map = CredentialMap::new();
        map.insert(
            huggingface::PROVIDER_ID.to_string(),
            parse_credentials(&cfg.hf_tokens),
        );
        map.insert(
            modelscope::PROVIDER_ID.to_string(),
            parse_credentials(&cfg.ms_tokens),
        );
        for p in &cfg.custom_providers {
            let list = p.token.as_deref().map(parse_credentials).unwrap_or_default();
            map.insert(p.id.trim().to_string(), list);
        }
        Self {
            inner: ArcSwap::from_pointee(map),
        }
    }

    /// 以逗号分隔的原始字符串替换某服务商的凭证列表，返回生效后的凭证数。
    pub fn set_credentials(&self, provider_id: &str, raw: &str) -> usize {
        let list = parse_credentials(raw);
        let count = list.len();
        self.inner.rcu(|current| {
            let mut next = CredentialMap::clone(current);
            next.insert(provider_id.to_string(), list.clone());
            next
        });
        tracing::info!(provider = provider_id, count, "凭证列表已更新");
        count
    }

    pub fn snapshot(&self) -> Arc<CredentialMap> {
        self.inner.load_full()
    }
}

impl CredentialSource for RuntimeCredentials {
    fn credentials(&self, provider_id: &str) -> Vec<Credential> {
        self.inner
            .load()
            .get(provider_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::custom::CustomProviderConfig;

    #[test]
    fn built_from_config_lists() {
        let cfg = Config {
            hf_tokens: "hf_a, hf_b,hf_a".to_string(),
            ms_tokens: String::new(),
            custom_providers: vec![CustomProviderConfig {
                id: "my".to_string(),
                api_url: "https://gen.example".to_string(),
                token: Some("tok".to_string()),
                prompt_model: None,
            }],
            ..Config::default()
        };
        let rc = RuntimeCredentials::from_config(&cfg);
        let hf: Vec<_> = rc
            .credentials("huggingface")
            .iter()
            .map(|c| c.expose().to_string())
            .collect();
        assert_eq!(hf, vec!["hf_a", "hf_b"]);
        assert!(rc.credentials("modelscope").is_empty());
        assert_eq!(rc.credentials("my").len(), 1);
        assert!(rc.credentials("unknown").is_empty());
    }

    #[test]
    fn set_credentials_replaces_only_one_provider() {
        let rc = RuntimeCredentials::from_config(&Config {
            hf_tokens: "a".to_string(),
            ..Config::default()
        });
        let before = rc.snapshot();

        assert_eq!(rc.set_credentials("modelscope", "m1,m2"), 2);
        assert_eq!(rc.credentials("modelscope").len(), 2);
        assert_eq!(rc.credentials("huggingface").len(), 1);
        // 旧快照不受影响。
        assert!(before.get("modelscope").is_some_and(Vec::is_empty));
    }
}
