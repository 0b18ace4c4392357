pub mod analysis;
pub mod db;
pub mod error;
pub mod facebook;
pub mod notifier;
pub mod page_import;
