//! Built-in expression names reserved by the core (§6.5).
//!
//! These are represented directly as `expr::Builtin` variants (see
//! `expr::Builtin`); this module only keeps the canonical name list
//! alongside its `Display` text, for call sites (`describe`, diagnostics)
//! that want to check a name without constructing a whole `Builtin` value.

pub const RESERVED_NAMES: &[&str] = &[
    "HASH_REPLACEMENT",
    "SCALAR_REPLACEMENT",
    "LIST_REPLACEMENT",
    "STRUCT_REPLACEMENT",
    "IN_REPLACEMENT",
    "PARTITION_VALUE",
    "MAKE_LIST",
    "MAKE_STRUCT",
    "IN_SUBQUERY",
    "SUM_COUNT",
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}
