pub mod checkout;
pub mod cleanup;
pub mod init;
pub mod ls;
pub mod remove;
pub mod track;
