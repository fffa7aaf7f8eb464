pub mod annotations;
pub mod api;
pub mod barcode;
pub mod cli;
pub mod config;
pub mod convert;
pub mod dice;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod loadfile;
pub mod lock;
pub mod meta;
pub mod mirror;
pub mod output;
pub mod store;
