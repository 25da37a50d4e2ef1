use std::any::Any;
use std::error::Error;
use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (runtime): {source}")]
    Runtime { #[from] source: io::Error },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open connection to {address}: {source}")]
    Connect { address: String, source: io::Error },

    #[error("Connecting to {address} took longer than {deadline_ms}ms")]
    ConnectDeadline { address: String, deadline_ms: u64 },

    #[error("Failed to write to connection: {source}")]
    Write { #[from] source: io::Error },

    #[error("Writing to connection took longer than {deadline_ms}ms")]
    WriteDeadline { deadline_ms: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Value for {key} has an unexpected type (expected {expected})")]
    WrongType { key: &'static str, expected: &'static str },

    #[error("Value {value} for {key} is out of range")]
    OutOfRange { key: &'static str, value: i64 },
}

/// Error returned by an event bus subscriber. Logged by the bus, never propagated.
pub type SubscriberError = Box<dyn Error + Send + Sync>;

pub fn readable_thread_panic_error(error: &Box<dyn Any + Send + 'static>) -> String {
    let mut stringified = String::from("???");

    if let Some(s) = error.downcast_ref::<&str>() {
        stringified = format!("{}", s);
    }
    else if let Some(s) = error.downcast_ref::<String>() {
        stringified = format!("{}", s);
    }
    let type_id = (**error).type_id();

    format!("panic from subscriber: [{:?}]: [{}]", type_id, stringified)
}
