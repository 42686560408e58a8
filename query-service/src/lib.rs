//! SQL 查询执行服务
//!
//! 固定大小的工作线程池、每个线程独立的数据库连接、基于中断令牌的查询超时，
//! 以及表名、行数、主键等结构查询辅助函数。

pub mod executor;
pub mod interrupt;
pub mod introspect;
pub mod worker;

pub use executor::{ExecutorLimits, QueryExecutor};
pub use interrupt::InterruptToken;
pub use worker::PoolStatus;
