//! Remote-service clients: decision service (Planner/Generator) and the
//! code-execution kernel, plus NDJSON stream decoding.

pub mod api;
pub mod executor;
pub mod ndjson;

pub use api::{ActionStream, WorkflowApi, WorkflowApiClient};
pub use executor::{CodeExecutor, KernelClient};
pub use ndjson::NdjsonDecoder;
