pub mod clone;
pub mod commit;
pub mod get;
pub mod history;
pub mod init;
pub mod status;
pub mod tag;
