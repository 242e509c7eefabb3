use uuid::Uuid;

/// Source of fresh document identifiers.
///
/// Called once per entity that reaches the flattener without an identifier.
/// Identifiers must be unique across the process and safe to use as a
/// document id (no `/`).
pub trait IdAllocator: Send + Sync {
    fn allocate(&self) -> String;
}

/// Allocates time-ordered UUIDv7 identifiers in simple (hyphen-free) form.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidAllocator;

impl IdAllocator for UuidAllocator {
    fn allocate(&self) -> String {
        Uuid::now_v7().simple().to_string()
    }
}
