pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::{DatabaseConnection, EmailService, GoogleDrive, SlackService};
pub use config::{BizConfig, ConnectionConfig};
pub use core::{using, DriveRole, ErrorPolicy, QueryResult, Record, SqlValue};
pub use utils::error::{BizError, Result};
pub use utils::logger::{setup_logger, LoggerHandle};
