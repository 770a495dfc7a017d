use async_trait::async_trait;
use common::{ArchiveError, Provider, Result};
use tracing::debug;

/// 平台侧确认的频道身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelIdentity {
    pub internal_name: String,
    pub internal_id: String,
    pub display_name: String,
}

/// 平台 API 接口（校验频道、退订推送）
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn resolve_channel(&self, provider: Provider, identifier: &str) -> Result<ChannelIdentity>;

    async fn unsubscribe(&self, provider: Provider, internal_id: &str) -> Result<()>;
}

/// 不联网的默认实现，按标识原样接受频道
#[derive(Debug, Default, Clone)]
pub struct OfflineGateway;

#[async_trait]
impl ProviderGateway for OfflineGateway {
    async fn resolve_channel(&self, provider: Provider, identifier: &str) -> Result<ChannelIdentity> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(ArchiveError::ProviderError(format!(
                "Empty {} channel identifier",
                provider
            )));
        }
        Ok(ChannelIdentity {
            internal_name: identifier.to_string(),
            internal_id: identifier.to_string(),
            display_name: identifier.to_string(),
        })
    }

    async fn unsubscribe(&self, provider: Provider, internal_id: &str) -> Result<()> {
        debug!("No {} subscription to remove for {}", provider, internal_id);
        Ok(())
    }
}
