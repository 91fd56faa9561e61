#![forbid(unsafe_code)]

pub mod agent;
pub mod capture;
pub mod cli;
pub mod clipboard;
pub mod config;
pub mod data_url;
pub mod logging;
pub mod messages;
pub mod ocr;
pub mod page;
pub mod panel;
pub mod raster;
pub mod relay;
pub mod session;
pub mod site;
pub mod storage;
pub mod ui;
