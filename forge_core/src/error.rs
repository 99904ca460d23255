use std::string;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("language `{0}` is not supported")]
    LanguageNotFound(String),
    #[error("failed in IO")]
    Io(#[from] std::io::Error),
    #[error("toolchain fault: {0}")]
    Toolchain(String),
    #[error("sandbox fault: {0}")]
    Sandbox(String),
    #[error("testdata unavailable: {0}")]
    TestData(String),
    #[error("checker fault: {0}")]
    Checker(String),
    #[error("bad configuration: {0}")]
    Config(String),
    #[error("bad configuration file")]
    Yaml(#[from] serde_yaml::Error),
    #[error("bad wire record")]
    Json(#[from] serde_json::Error),
    #[error("bytes are not in UTF8")]
    FromUtf8(#[from] string::FromUtf8Error),
    #[error("network error")]
    Request(#[from] reqwest::Error),
}
