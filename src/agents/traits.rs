//! 出行 Agent 抽象
//!
//! 每个 Agent 声明自己支持的能力集合，通过统一的 invoke(capability, request) 调用；
//! 错误以 String 返回，由 AgentManager 统一包装成失败的 AgentResponse。

use async_trait::async_trait;

use super::{AgentCapability, AgentOutput, AgentRequest};

/// 出行 Agent trait：标识、能力声明、调用入口与可选的自检
#[async_trait]
pub trait TravelAgent: Send + Sync {
    /// 注册用的唯一标识
    fn id(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn capabilities(&self) -> &[AgentCapability];

    fn supports(&self, capability: AgentCapability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// 以指定能力处理请求
    async fn invoke(&self, capability: AgentCapability, request: &AgentRequest) -> Result<AgentOutput, String>;

    /// 后端自检，默认视为健康
    async fn health(&self) -> Result<(), String> {
        Ok(())
    }
}
