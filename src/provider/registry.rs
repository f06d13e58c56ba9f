//! 服务商注册表：按 ID 查找适配器。

use crate::clock::DayBoundary;
use crate::config::Config;
use crate::error::ProviderError;
use crate::provider::ProviderAdapter;
use crate::provider::custom::CustomAdapter;
use crate::provider::http::HttpClient;
use crate::provider::huggingface::HuggingFaceAdapter;
use crate::provider::modelscope::ModelScopeAdapter;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册内置服务商与 `CUSTOM_PROVIDERS` 中的自定义服务商。
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let http = HttpClient::new(cfg)?;
        let system_prompt = cfg.system_prompt();

        let mut registry = Self::new();
        registry.register(Arc::new(HuggingFaceAdapter::new(
            http.clone(),
            cfg.video.clone(),
            cfg.hf_prompt_model.clone(),
            system_prompt.clone(),
        )));
        registry.register(Arc::new(ModelScopeAdapter::new(
            http.clone(),
            cfg.ms_prompt_model.clone(),
            system_prompt,
        )));
        for p in &cfg.custom_providers {
            let adapter = CustomAdapter::new(p, http.clone(), cfg.video.clone());
            if registry.adapters.contains_key(adapter.id()) {
                tracing::warn!("自定义服务商 ID 与已注册服务商重复，已忽略：{}", p.id);
                continue;
            }
            registry.register(Arc::new(adapter));
        }
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn get(&self, provider_id: &str) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        self.adapters
            .get(provider_id)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(provider_id.to_string()))
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.adapters.contains_key(provider_id)
    }

    /// 已注册服务商 ID（排序后）。
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 各服务商的自然日边界，用于构建凭证池。
    pub fn day_boundaries(&self) -> Vec<(String, DayBoundary)> {
        self.adapters
            .iter()
            .map(|(id, a)| (id.clone(), a.day_boundary()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::custom::CustomProviderConfig;

    #[test]
    fn registers_builtin_and_custom_providers() {
        let cfg = Config {
            custom_providers: vec![
                CustomProviderConfig {
                    id: "mine".to_string(),
                    api_url: "https://gen.example".to_string(),
                    token: None,
                    prompt_model: None,
                },
                CustomProviderConfig {
                    id: "modelscope".to_string(),
                    api_url: "https://shadow.example".to_string(),
                    token: None,
                    prompt_model: None,
                },
            ],
            ..Config::default()
        };
        let registry = ProviderRegistry::from_config(&cfg).unwrap();
        assert_eq!(registry.ids(), vec!["huggingface", "mine", "modelscope"]);
        assert!(matches!(
            registry.get("nope"),
            Err(ProviderError::UnknownProvider(id)) if id == "nope"
        ));

        let boundaries: HashMap<_, _> = registry.day_boundaries().into_iter().collect();
        assert_eq!(boundaries["modelscope"], DayBoundary::beijing());
        assert_eq!(boundaries["huggingface"], DayBoundary::utc());
    }
}
