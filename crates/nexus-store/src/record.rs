//! Record trait and load modes

/// Fixed-width persisted entity with an id and an in-use flag
///
/// Record instances are scratch storage owned by the caller: cursors only
/// overwrite their fields, they never replace the instance.
pub trait Record: Send {
    /// Record id
    fn id(&self) -> u64;

    /// Set the record id
    fn set_id(&mut self, id: u64);

    /// Whether the slot holds a live record
    fn in_use(&self) -> bool;

    /// Set the in-use flag
    fn set_in_use(&mut self, in_use: bool);

    /// Reset every payload field to its empty value
    fn clear(&mut self);

    /// Reset the record and mark it as the unused slot `id`
    fn initialize_unused(&mut self, id: u64) {
        self.clear();
        self.set_id(id);
        self.set_in_use(false);
    }
}

/// Strictness for reading slots that may not be in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecordLoad {
    /// Unused slots read as absent
    #[default]
    Normal,
    /// Whatever bytes are stored are returned, in use or not
    Force,
    /// An unused slot is an error
    Check,
}
