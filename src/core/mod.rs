// 核心基础设施：配置、共享状态、鉴权与停机。
pub mod auth;
pub mod config;
pub mod shutdown;
pub mod state;
