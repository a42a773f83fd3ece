#![forbid(unsafe_code)]

pub mod archive;
pub mod capture;
pub mod classify;
pub mod cli;
pub mod fetcher;
pub mod finalize;
pub mod formats;
pub mod grab;
pub mod http_fetch;
pub mod logging;
pub mod ytdlp;
