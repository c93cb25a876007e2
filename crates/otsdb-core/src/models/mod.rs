//! OpenTSDB client domain models.
//!
//! Data points and batches on the write path, query requests and result
//! shapes on the read path, and the expression AST for `/api/query/exp`.
//! Wire-facing models implement `serde` Serialize/Deserialize.

pub mod batch;
pub mod data_point;
pub mod expression;
pub mod query;
