//! Fault identifiers.
//!
//! Ids are namespaced by the component that checks them.

/// Faults injected at the index store boundary
pub mod index_store {
    /// Transport failure before the request reaches the engine
    pub const UNREACHABLE: &str = "index_store.unreachable";
    pub const EXISTS_FAIL: &str = "index_store.exists_fail";
    pub const CREATE_INDEX_FAIL: &str = "index_store.create_index_fail";
    pub const DELETE_INDEX_FAIL: &str = "index_store.delete_index_fail";
    pub const PUT_TEMPLATE_FAIL: &str = "index_store.put_template_fail";
    pub const DELETE_TEMPLATE_FAIL: &str = "index_store.delete_template_fail";
    pub const ALIAS_WRITE_FAIL: &str = "index_store.alias_write_fail";
    pub const RESOLVE_ALIAS_FAIL: &str = "index_store.resolve_alias_fail";
    pub const REINDEX_FAIL: &str = "index_store.reindex_fail";
    /// Reindex completes with per-document failures
    pub const REINDEX_PARTIAL: &str = "index_store.reindex_partial";
    /// Write applied by the engine, acknowledgement lost in transit
    pub const LOST_ACK: &str = "index_store.lost_ack";
}
