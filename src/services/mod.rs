// 业务服务：头像解析、兜底判定、审核、编排与图片代理。
pub mod error;
pub mod image_proxy;
#[cfg(test)]
mod mock_upstream;
pub mod moderation;
pub mod pipeline;
pub mod resolver;
pub mod staleness;
