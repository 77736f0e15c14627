pub mod config_cmd;
pub mod import;
pub mod init;
pub mod mcp;
pub mod run;
pub mod tools;
