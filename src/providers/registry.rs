use crate::config::Config;
use crate::error::RelayError;
use crate::providers::{build_adapter, Adapter};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// 一个提供商：基线适配器和按后缀区分的模型变体
struct ProviderEntry {
    baseline: Arc<dyn Adapter>,
    variants: HashMap<String, Arc<dyn Adapter>>,
}

/// provider id -> 适配器，启动时构建，之后只读
pub struct Registry {
    entries: HashMap<String, ProviderEntry>,
    default_id: String,
    default_adapter: Arc<dyn Adapter>,
}

fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

impl Registry {
    /// 以默认提供商创建注册表，保证任何标识都能解析到适配器
    pub fn new(default_id: &str, default_adapter: Arc<dyn Adapter>) -> Self {
        let default_id = normalize_id(default_id);
        let mut entries = HashMap::new();
        entries.insert(
            default_id.clone(),
            ProviderEntry {
                baseline: Arc::clone(&default_adapter),
                variants: HashMap::new(),
            },
        );
        Self {
            entries,
            default_id,
            default_adapter,
        }
    }

    /// 从配置构建：每个提供商的基线模型与全部变体都在此时实例化
    pub fn from_config(config: &Config) -> Result<Self> {
        let default = config.find_provider(&config.default_provider).ok_or_else(|| {
            RelayError::config(format!("default_provider 未定义: {}", config.default_provider))
        })?;
        let mut registry = Self::new(&default.id, build_adapter(default, None));

        for provider in &config.providers {
            registry.register(&provider.id, build_adapter(provider, None));
            for (suffix, model) in &provider.variants {
                registry.register_variant(&provider.id, suffix, build_adapter(provider, Some(model)))?;
            }
            debug!(
                provider = %provider.id,
                family = ?provider.family,
                variants = provider.variants.len(),
                "已注册提供商"
            );
        }

        Ok(registry)
    }

    /// 注册或替换一个提供商的基线适配器
    pub fn register(&mut self, id: &str, adapter: Arc<dyn Adapter>) {
        let id = normalize_id(id);
        if id == self.default_id {
            self.default_adapter = Arc::clone(&adapter);
        }
        match self.entries.get_mut(&id) {
            Some(entry) => entry.baseline = adapter,
            None => {
                self.entries.insert(
                    id,
                    ProviderEntry {
                        baseline: adapter,
                        variants: HashMap::new(),
                    },
                );
            }
        }
    }

    /// 为已注册的提供商添加后缀变体
    pub fn register_variant(&mut self, id: &str, suffix: &str, adapter: Arc<dyn Adapter>) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&normalize_id(id))
            .ok_or_else(|| RelayError::config(format!("提供商未注册: {}", id)))?;
        entry.variants.insert(normalize_id(suffix), adapter);
        Ok(())
    }

    /// 更换默认提供商
    pub fn set_default(&mut self, id: &str) -> Result<()> {
        let id = normalize_id(id);
        let entry = self
            .entries
            .get(&id)
            .ok_or_else(|| RelayError::config(format!("提供商未注册: {}", id)))?;
        self.default_adapter = Arc::clone(&entry.baseline);
        self.default_id = id;
        Ok(())
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(&normalize_id(id))
    }

    /// 已注册的提供商标识（已排序）
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// 查找 `<id>-<后缀>` 形式的标识，最长的已注册前缀优先
    fn match_family<'a>(&self, key: &'a str) -> Option<(&ProviderEntry, &'a str)> {
        self.entries
            .iter()
            .filter_map(|(id, entry)| {
                key.strip_prefix(id.as_str())
                    .and_then(|rest| rest.strip_prefix('-'))
                    .map(|suffix| (id.len(), entry, suffix))
            })
            .max_by_key(|(len, _, _)| *len)
            .map(|(_, entry, suffix)| (entry, suffix))
    }

    /// 解析提供商标识，永不失败：
    /// 精确匹配 -> 前缀族的变体（未知后缀用基线模型） -> 默认提供商
    pub fn resolve(&self, provider_id: &str) -> Arc<dyn Adapter> {
        let key = normalize_id(provider_id);

        if let Some(entry) = self.entries.get(&key) {
            return Arc::clone(&entry.baseline);
        }

        if let Some((entry, suffix)) = self.match_family(&key) {
            let adapter = entry.variants.get(suffix).unwrap_or(&entry.baseline);
            debug!(provider_id = %provider_id, suffix, adapter = adapter.name(), "按前缀族解析");
            return Arc::clone(adapter);
        }

        debug!(provider_id = %provider_id, default = %self.default_id, "未知提供商，使用默认");
        Arc::clone(&self.default_adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FragmentStream;

    /// 只返回自身名字的适配器
    struct NamedAdapter(String);

    impl Adapter for NamedAdapter {
        fn name(&self) -> &str {
            &self.0
        }

        fn generate(&self, _message: &str) -> FragmentStream {
            Box::pin(futures_util::stream::iter(vec![Ok(self.0.clone())]))
        }
    }

    fn named(name: &str) -> Arc<dyn Adapter> {
        Arc::new(NamedAdapter(name.to_string()))
    }

    fn create_test_registry() -> Registry {
        let mut registry = Registry::new("deepai", named("deepai"));
        registry.register("venice", named("venice"));
        registry.register("venice-pro", named("venice-pro"));
        registry
            .register_variant("venice", "uncensored", named("venice:uncensored"))
            .unwrap();
        registry
            .register_variant("deepai", "math", named("deepai:math"))
            .unwrap();
        registry
    }

    #[test]
    fn test_resolve_exact_match() {
        let registry = create_test_registry();
        assert_eq!(registry.resolve("venice").name(), "venice");
        assert_eq!(registry.resolve("VENICE").name(), "venice");
        assert_eq!(registry.resolve(" deepai ").name(), "deepai");
    }

    #[test]
    fn test_resolve_variant_suffix() {
        let registry = create_test_registry();
        assert_eq!(registry.resolve("venice-uncensored").name(), "venice:uncensored");
        assert_eq!(registry.resolve("deepai-math").name(), "deepai:math");
    }

    #[test]
    fn test_resolve_unknown_suffix_uses_baseline() {
        let registry = create_test_registry();
        assert_eq!(registry.resolve("venice-llama-70b").name(), "venice");
        assert_eq!(registry.resolve("venice-").name(), "venice");
    }

    #[test]
    fn test_resolve_longest_prefix_wins() {
        let registry = create_test_registry();
        // venice-pro 是独立提供商，venice-pro-x 应归入 venice-pro 而不是 venice
        assert_eq!(registry.resolve("venice-pro-x").name(), "venice-pro");
    }

    #[test]
    fn test_resolve_unknown_falls_back_to_default() {
        let registry = create_test_registry();
        for id in ["", "gpt-5", "DeepSeek V3.2", "veniceuncensored", "-venice"] {
            assert_eq!(registry.resolve(id).name(), "deepai", "id = {:?}", id);
        }
    }

    #[test]
    fn test_set_default() {
        let mut registry = create_test_registry();
        registry.set_default("venice").unwrap();
        assert_eq!(registry.default_id(), "venice");
        assert_eq!(registry.resolve("unknown").name(), "venice");

        assert!(registry.set_default("missing").is_err());
        assert!(registry.register_variant("missing", "x", named("x")).is_err());
    }

    #[test]
    fn test_register_replaces_default_adapter() {
        let mut registry = create_test_registry();
        registry.register("deepai", named("deepai-v2"));
        assert_eq!(registry.resolve("anything").name(), "deepai-v2");
    }

    #[test]
    fn test_ids_sorted() {
        let registry = create_test_registry();
        assert_eq!(registry.ids(), vec!["deepai", "venice", "venice-pro"]);
        assert!(registry.contains("Venice"));
        assert!(!registry.contains("phind"));
    }

    /// 收集一次生成的全部正文
    async fn generate_text(registry: &Registry, id: &str) -> String {
        use futures_util::StreamExt;

        registry
            .resolve(id)
            .generate("hi")
            .map(|f| f.unwrap())
            .collect::<Vec<_>>()
            .await
            .concat()
    }

    #[tokio::test]
    async fn test_from_config_variant_model_reaches_upstream() {
        use mockito::Matcher;

        let mut server = mockito::Server::new_async().await;
        let variant = server
            .mock("POST", "/chat")
            .match_body(Matcher::PartialJson(serde_json::json!({"modelId": "venice-uncensored"})))
            .with_status(200)
            .with_body("{\"kind\":\"content\",\"content\":\"variant\"}\n")
            .expect(1)
            .create_async()
            .await;
        let baseline = server
            .mock("POST", "/chat")
            .match_body(Matcher::PartialJson(serde_json::json!({"modelId": "base"})))
            .with_status(200)
            .with_body("{\"kind\":\"content\",\"content\":\"baseline\"}\n")
            .expect(2)
            .create_async()
            .await;

        let config = Config::from_yaml_str(&format!(
            r#"
default_provider: deepai
providers:
  - id: deepai
    family: one_shot
    url: {url}/deepai
  - id: venice
    family: line_json
    url: {url}/chat
    model: base
    body:
      modelId: "{{{{model}}}}"
      prompt: "{{{{message}}}}"
    variants:
      uncensored: venice-uncensored
"#,
            url = server.url()
        ))
        .unwrap();

        let registry = Registry::from_config(&config).unwrap();
        assert_eq!(registry.default_id(), "deepai");
        assert_eq!(registry.resolve("nope").name(), "deepai");

        assert_eq!(generate_text(&registry, "venice-uncensored").await, "variant");
        assert_eq!(generate_text(&registry, "venice").await, "baseline");
        // 未知后缀使用基线模型
        assert_eq!(generate_text(&registry, "venice-llama").await, "baseline");

        variant.assert_async().await;
        baseline.assert_async().await;
    }
}
