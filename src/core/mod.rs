pub mod attendee;
pub mod db;
pub mod export;
pub mod factory;
pub mod intake;
pub mod settings;
pub mod ticket;

/// A generated file ready for download.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Download {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}
