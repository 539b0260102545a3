mod domain;
pub use domain::Flag;
pub use domain::{ENV_TRACKER_HOST, ENV_TRACKER_KEY, ENV_TRACKER_PORT};

mod error;
pub use error::{ModelError, ModelResult};

mod arg_info;
pub use arg_info::{ArgInfo, TENSOR_KIND};

mod config;
pub use config::{CacheFlush, EvaluatorConfig, RpcConfig};

mod input;
pub use input::RunnerInput;

mod result;
pub use result::RunnerResult;
