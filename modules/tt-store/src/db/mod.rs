//! Row-store layers: executor, clause builder, validator, partitions and tables.

pub mod clause;
pub mod columns;
pub mod partition;
pub mod store;
pub mod tables;
pub mod value;

pub use clause::{Clause, Join};
pub use columns::{Column, DefaultValue, OnExtra, Requirement};
pub use partition::{PartitionedStore, partition_name};
pub use store::{
    ColumnType, Cursor, IsolationLevel, Params, QueryResult, ResultShape, Schema, Store,
};
pub use value::{Row, RowExt, Value, row};
