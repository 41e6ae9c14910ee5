//! Property data model.

mod collection;
mod property;
mod record;

pub use collection::{CollectionError, InstallReport, PropertyCollection, Snapshot};
pub use property::{Property, PropertyId, PropertyKind};
pub use record::{GeometryForm, PropertyRecord, UNNAMED_PROPERTY};
