mod memory_source;
mod source_interface;

pub use memory_source::{StaticClassHierarchy, StaticRowSource};
pub use source_interface::{
    ClassHierarchyInspector, EcSqlBinding, EcSqlBindingType, EcSqlQueryDef, QueryReaderOptions,
    Row, RowFormat, RowSource, RowsLimit,
};
