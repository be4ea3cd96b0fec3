//! # Execution
//!
//! The seam between the commitment layer and transaction semantics:
//! the [`ExecutionEngine`] trait, the reference [`NativeEngine`], and
//! the parameter-refreshable [`GasTable`].

pub mod engine;
pub mod gas;

pub use engine::{ExecContext, ExecutionEngine, NativeEngine, StorageOp};
pub use gas::{gas_param_key, GasTable};
