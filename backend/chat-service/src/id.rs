use uuid::Uuid;

/// Identifier generation capability. Ids must be globally unique and
/// lexically sortable by creation time; entity kind is carried in the prefix
/// (`conv_…`, `part_…`, `msg_…`, `user_…`).
pub trait IdGenerator: Send + Sync {
    fn next_id(&self, prefix: &str) -> String;
}

/// Default generator: `prefix_<uuid-v7>`. UUIDv7 is timestamp-ordered, so
/// ids generated later sort lexically after ids generated earlier (at
/// millisecond resolution).
#[derive(Debug, Clone, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, Uuid::now_v7().simple())
    }
}
