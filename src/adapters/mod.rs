// Adapters layer: concrete clients for the external systems (SQL Server, ACS email, Slack, Google Drive).

pub mod database;
pub mod email;
pub mod google_drive;
pub mod http;
pub mod mssql;
pub mod slack;

pub use database::DatabaseConnection;
pub use email::{EmailClient, EmailService};
pub use google_drive::GoogleDrive;
pub use mssql::MssqlConnector;
pub use slack::SlackService;
