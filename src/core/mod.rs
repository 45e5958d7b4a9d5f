pub mod policy;
pub mod resource;
pub mod scope;

pub use crate::domain::model::{
    DriveRole, EmailSendOperation, ExecutedStatement, QueryResult, Record, ShareResult, SqlValue,
};
pub use crate::domain::ports::{SqlConnector, SqlPool, TokenSource};
pub use crate::utils::error::Result;
pub use policy::ErrorPolicy;
pub use resource::{ResourceFactory, ResourceHandle};
pub use scope::{using, Scoped};
