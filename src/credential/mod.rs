//! 凭证管理：凭证池与带故障转移的请求执行器。

pub mod executor;
pub mod pool;
pub mod types;

pub use executor::RequestExecutor;
pub use pool::{CredentialPool, CredentialSource};
pub use types::{Credential, PoolStats};
