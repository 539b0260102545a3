mod evaluator;
pub use evaluator::{CacheFlush, EvaluatorConfig};

mod rpc;
pub use rpc::RpcConfig;
