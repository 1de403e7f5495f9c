//! RegelRecht Engine
//!
//! Execution engine for machine-readable Dutch regulations. Regulation
//! documents carry articles; selected articles declare an `execution`
//! block with named inputs, outputs and an ordered action list over a
//! small expression language. The service resolves `(law_id, output)`
//! references to the article that computes them, evaluates the actions,
//! and returns the produced outputs with a structured execution trace.
//!
//! # Example
//!
//! ```ignore
//! use regelrecht_engine::{LawExecutionService, Value};
//! use std::collections::HashMap;
//!
//! let mut service = LawExecutionService::new();
//! service.load_regulation(zorgtoeslagwet_yaml)?;
//!
//! let mut params = HashMap::new();
//! params.insert("BSN".to_string(), Value::String("999993653".to_string()));
//!
//! let result = service.evaluate_law_output(
//!     "zorgtoeslagwet",
//!     "heeft_recht_op_zorgtoeslag",
//!     params,
//!     "2025-01-01",
//! )?;
//! println!("{:?}", result.outputs);
//! if let Some(trace) = &result.trace {
//!     println!("{}", trace.render());
//! }
//! ```

pub mod config;
pub mod context;
pub mod data_source;
pub mod engine;
pub mod error;
pub mod fixtures;
pub mod operations;
pub mod registry;
pub mod regulation;
pub mod service;
pub mod trace;
pub mod types;
pub mod uri;

pub use context::EvalContext;
pub use data_source::{DataSource, DataSourceRegistry, DictDataSource};
pub use engine::{ArticleEngine, ArticleResult};
pub use error::{EngineError, Result};
pub use operations::{evaluate_expr, execute_operation};
pub use registry::RegulationRegistry;
pub use regulation::{
    Action, Article, Delegation, Execution, Expr, Input, MachineReadable, OpExpr, OutputSpec,
    Regulation, ResolveSpec, SelectOn, Source, SwitchCase, TypeSpec,
};
pub use service::{LawExecutionService, LawInfo, ServiceProvider};
pub use trace::{TraceNode, TraceStack};
pub use types::{Operation, RegulatoryLayer, ResolveKind, TraceNodeType, Value};
pub use uri::{RegelrechtUri, ReferenceKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports() {
        let _value = Value::Int(42);
        let _operation = Operation::Equals;
        let _error = EngineError::DivisionByZero;
        let _service = LawExecutionService::new();
    }
}
