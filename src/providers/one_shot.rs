use crate::config::ProviderConfig;
use crate::providers::upstream::Upstream;
use crate::providers::{boxed, Adapter, FragmentStream};
use async_stream::try_stream;
use std::sync::Arc;

/// 一次性请求，整个响应体作为唯一片段；调用方不会收到增量输出
pub struct OneShotAdapter {
    upstream: Arc<Upstream>,
}

impl OneShotAdapter {
    pub fn new(upstream: Upstream) -> Self {
        Self {
            upstream: Arc::new(upstream),
        }
    }

    pub fn from_config(config: &ProviderConfig, model: Option<&str>) -> Self {
        Self::new(Upstream::from_config(config, model))
    }
}

impl Adapter for OneShotAdapter {
    fn name(&self) -> &str {
        &self.upstream.id
    }

    fn generate(&self, message: &str) -> FragmentStream {
        let upstream = Arc::clone(&self.upstream);
        let message = message.to_string();

        boxed(try_stream! {
            let response = upstream.send(&message).await?;
            let body = response.text().await?;
            if !body.is_empty() {
                yield body;
            }
        })
    }
}
