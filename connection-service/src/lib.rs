//! 数据库注册表服务
//!
//! 管理所有发布的 SQLite 数据库（名称、路径、可变性、大小、内容哈希），
//! 以及每个工作线程打开连接时的一次性初始化（自定义函数、扩展、缓存大小、插件钩子）。

pub mod connection;
pub mod database;
pub mod registry;

pub use connection::{ConnectionHook, ConnectionSetup, ScalarFn, SqlFunction};
pub use database::{Database, MEMORY_NAME};
pub use registry::{DatabaseRegistry, RegistryError};
