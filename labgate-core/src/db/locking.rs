use sea_orm::{DbBackend, EntityTrait, QuerySelect, Select};

/// Single-key row locking for read-modify-write sequences.
///
/// Emits `SELECT ... FOR UPDATE` on backends that support it. SQLite has no
/// row-level locks; its transactions take a single writer lock, which
/// already serializes the same sequences, so the query is left untouched
/// there rather than producing a syntax error.
pub trait LockForUpdate: Sized {
    fn lock_for_update(self, backend: DbBackend) -> Self;
}

impl<E: EntityTrait> LockForUpdate for Select<E> {
    fn lock_for_update(self, backend: DbBackend) -> Self {
        match backend {
            DbBackend::Sqlite => self,
            _ => self.lock_exclusive(),
        }
    }
}
