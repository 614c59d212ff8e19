pub mod batches;
pub mod listener_cursors;
pub mod lock_records;
pub mod messages;
pub mod sea_orm_active_enums;

pub mod prelude {
    pub use super::batches::Entity as Batches;
    pub use super::listener_cursors::Entity as ListenerCursors;
    pub use super::lock_records::Entity as LockRecords;
    pub use super::messages::Entity as Messages;
}
