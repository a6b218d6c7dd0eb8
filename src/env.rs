//! Environment variable validation and configuration module for CommonGround
//!
//! This module provides centralized validation and configuration management
//! for all environment variables read by services built on CommonGround.
//!
//! # Supported Environment Variables
//!
//! ## Relational Store
//! - `COMMONGROUND_DB_URL`: Relational database URL (default: "sqlite://commonground.db")
//!
//! ## Log Store
//! - `COMMONGROUND_LOG_STORE_URI`: Document store URI (default: "sqlite://commonground_logs.db")
//! - `COMMONGROUND_LOG_STORE_DB`: Logical database holding the log collections (default: "commonground")
//! - `COMMONGROUND_LOG_COLLECTION`: Base log collection (default: "logs")
//! - `COMMONGROUND_REQUEST_CAPTURE`: Persist request/response exchanges (default: "true")
//!
//! ## Server Configuration
//! - `COMMONGROUND_HOST`: Server bind address (default: "0.0.0.0")
//! - `COMMONGROUND_PORT`: Server port (default: "8000")
//!
//! ## Logging Configuration
//! - `RUST_LOG`: Standard Rust logging configuration
//! - `COMMONGROUND_LOG_LEVEL`: Application-specific log level override
//!
//! ## Service Settings
//! - `COMMONGROUND_AUTH_URL`: Base URL of the auth service (default: "http://localhost:8001")
//! - `COMMONGROUND_PROJECT_NAME`: Service name reported by the health route (default: "CommonGround Service")
//!
//! # Usage
//!
//! ```rust,ignore
//! use commonground::env::get_config;
//!
//! // exits the process on critical errors
//! let config = get_config();
//! println!("Server will bind to {}", config.bind_address);
//! ```

use crate::logging::DEFAULT_COLLECTION;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use tracing::{info, warn};

pub const DEFAULT_DB_URL: &str = "sqlite://commonground.db";
pub const DEFAULT_LOG_STORE_URI: &str = "sqlite://commonground_logs.db";
pub const DEFAULT_LOG_STORE_DB: &str = "commonground";
pub const DEFAULT_LOG_LEVEL: &str = "commonground=info,tower_http=debug";
pub const DEFAULT_AUTH_URL: &str = "http://localhost:8001";
pub const DEFAULT_PROJECT_NAME: &str = "CommonGround Service";

/// Environment validation errors
#[derive(Debug, Clone)]
pub struct EnvValidationError {
    pub variable: String,
    pub message: String,
    pub severity: ErrorSeverity,
}

/// Severity level for environment validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorSeverity {
    /// Critical errors that prevent application startup
    Critical,
    /// Invalid optional values replaced by their defaults
    Warning,
    /// Informational messages about default values being used
    Info,
}

/// Validated application configuration derived from environment variables
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Relational store
    pub database_url: String,

    // Log store
    pub log_store_uri: String,
    pub log_store_db: String,
    pub log_collection: String,
    pub request_capture: bool,

    // Server
    pub host: String,
    pub port: u16,
    pub bind_address: SocketAddr,

    // Logging
    pub log_level: String,

    // Service
    pub auth_url: String,
    pub project_name: String,
}

/// Outcome of a validation run: the configuration with its non-critical
/// findings, or every finding when at least one is critical
pub type ValidationReport = Result<(AppConfig, Vec<EnvValidationError>), Vec<EnvValidationError>>;

/// Validate all environment variables and return configuration or errors
pub fn validate_environment() -> Result<AppConfig, Vec<EnvValidationError>> {
    let (config, findings) = validate_environment_report()?;

    for finding in &findings {
        match finding.severity {
            ErrorSeverity::Warning => warn!("{}: {}", finding.variable, finding.message),
            ErrorSeverity::Info => info!("{}: {}", finding.variable, finding.message),
            ErrorSeverity::Critical => {}
        }
    }

    Ok(config)
}

/// Validate all environment variables, keeping warnings and info messages
/// alongside the configuration
pub fn validate_environment_report() -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let database_url = string_var_with_default("COMMONGROUND_DB_URL", DEFAULT_DB_URL, &mut warnings);

    // Log store configuration
    let log_store_uri =
        string_var_with_default("COMMONGROUND_LOG_STORE_URI", DEFAULT_LOG_STORE_URI, &mut warnings);
    let log_store_db =
        string_var_with_default("COMMONGROUND_LOG_STORE_DB", DEFAULT_LOG_STORE_DB, &mut warnings);

    let log_collection = match env::var("COMMONGROUND_LOG_COLLECTION") {
        Ok(name) if name.trim().is_empty() => {
            warnings.push(EnvValidationError {
                variable: "COMMONGROUND_LOG_COLLECTION".to_string(),
                message: format!("Empty collection name. Using default: {}", DEFAULT_COLLECTION),
                severity: ErrorSeverity::Warning,
            });
            DEFAULT_COLLECTION.to_string()
        }
        Ok(name) => name,
        Err(_) => {
            warnings.push(EnvValidationError {
                variable: "COMMONGROUND_LOG_COLLECTION".to_string(),
                message: format!("Using default collection '{}'", DEFAULT_COLLECTION),
                severity: ErrorSeverity::Info,
            });
            DEFAULT_COLLECTION.to_string()
        }
    };

    let request_capture =
        parse_bool_env_var_with_default("COMMONGROUND_REQUEST_CAPTURE", true, &mut warnings);

    // Server configuration
    let host = string_var_with_default("COMMONGROUND_HOST", "0.0.0.0", &mut warnings);

    if IpAddr::from_str(&host).is_err() {
        errors.push(EnvValidationError {
            variable: "COMMONGROUND_HOST".to_string(),
            message: format!("Invalid IP address: {}", host),
            severity: ErrorSeverity::Critical,
        });
    }

    let port = match env::var("COMMONGROUND_PORT") {
        Ok(port_str) => match port_str.parse::<u16>() {
            Ok(port) => {
                if port < 1024 && port != 0 {
                    warnings.push(EnvValidationError {
                        variable: "COMMONGROUND_PORT".to_string(),
                        message: format!("Using privileged port {}, may require root privileges", port),
                        severity: ErrorSeverity::Warning,
                    });
                }
                port
            }
            Err(_) => {
                errors.push(EnvValidationError {
                    variable: "COMMONGROUND_PORT".to_string(),
                    message: format!("Invalid port number: {}", port_str),
                    severity: ErrorSeverity::Critical,
                });
                8000
            }
        },
        Err(_) => {
            warnings.push(EnvValidationError {
                variable: "COMMONGROUND_PORT".to_string(),
                message: "Using default port 8000".to_string(),
                severity: ErrorSeverity::Info,
            });
            8000
        }
    };

    let bind_address = match format!("{}:{}", host, port).parse::<SocketAddr>() {
        Ok(addr) => addr,
        Err(_) => {
            errors.push(EnvValidationError {
                variable: "COMMONGROUND_HOST/COMMONGROUND_PORT".to_string(),
                message: format!("Cannot create valid socket address from {}:{}", host, port),
                severity: ErrorSeverity::Critical,
            });
            SocketAddr::from(([0, 0, 0, 0], 8000))
        }
    };

    // Logging configuration
    let log_level = env::var("COMMONGROUND_LOG_LEVEL")
        .or_else(|_| env::var("RUST_LOG"))
        .unwrap_or_else(|_| {
            warnings.push(EnvValidationError {
                variable: "RUST_LOG/COMMONGROUND_LOG_LEVEL".to_string(),
                message: format!("Using default log level '{}'", DEFAULT_LOG_LEVEL),
                severity: ErrorSeverity::Info,
            });
            DEFAULT_LOG_LEVEL.to_string()
        });

    // Service settings
    let auth_url = string_var_with_default("COMMONGROUND_AUTH_URL", DEFAULT_AUTH_URL, &mut warnings);
    if !(auth_url.starts_with("http://") || auth_url.starts_with("https://")) {
        errors.push(EnvValidationError {
            variable: "COMMONGROUND_AUTH_URL".to_string(),
            message: format!("Auth URL must start with http:// or https://: {}", auth_url),
            severity: ErrorSeverity::Critical,
        });
    }

    let project_name =
        string_var_with_default("COMMONGROUND_PROJECT_NAME", DEFAULT_PROJECT_NAME, &mut warnings);

    errors.extend(warnings);

    if errors.iter().any(|e| e.severity == ErrorSeverity::Critical) {
        return Err(errors);
    }

    let config = AppConfig {
        database_url,
        log_store_uri,
        log_store_db,
        log_collection,
        request_capture,
        host,
        port,
        bind_address,
        log_level,
        auth_url,
        project_name,
    };

    Ok((config, errors))
}

/// Get the validated configuration, exiting the process if validation fails
pub fn get_config() -> AppConfig {
    match validate_environment() {
        Ok(config) => config,
        Err(errors) => {
            eprintln!("Environment validation failed:");
            for error in errors {
                match error.severity {
                    ErrorSeverity::Critical => {
                        eprintln!("CRITICAL - {}: {}", error.variable, error.message)
                    }
                    ErrorSeverity::Warning => {
                        eprintln!("WARNING - {}: {}", error.variable, error.message)
                    }
                    ErrorSeverity::Info => {
                        eprintln!("INFO - {}: {}", error.variable, error.message)
                    }
                }
            }
            std::process::exit(1);
        }
    }
}

/// Print environment validation results in a user-friendly format
pub fn print_validation_results(report: &ValidationReport) {
    match report {
        Ok((config, findings)) => {
            println!("Environment validation successful");
            println!("Configuration:");
            println!("  Project: {}", config.project_name);
            println!("  Database URL: {}", config.database_url);
            println!(
                "  Log Store: {} (database: {}, collection: {})",
                config.log_store_uri, config.log_store_db, config.log_collection
            );
            println!("  Request Capture: {}", config.request_capture);
            println!("  Server: {}", config.bind_address);
            println!("  Log Level: {}", config.log_level);
            println!("  Auth Service: {}", config.auth_url);

            if !findings.is_empty() {
                let warning_count = count_severity(findings, ErrorSeverity::Warning);
                let info_count = count_severity(findings, ErrorSeverity::Info);
                println!(
                    "Environment validation completed with {} warning(s), {} info message(s):",
                    warning_count, info_count
                );
                print_findings(findings);
            }
        }
        Err(errors) => {
            let critical_count = count_severity(errors, ErrorSeverity::Critical);
            let warning_count = count_severity(errors, ErrorSeverity::Warning);
            let info_count = count_severity(errors, ErrorSeverity::Info);

            eprintln!(
                "Environment validation failed with {} critical error(s), {} warning(s), {} info message(s):",
                critical_count, warning_count, info_count
            );
            print_findings(errors);
        }
    }
}

fn count_severity(findings: &[EnvValidationError], severity: ErrorSeverity) -> usize {
    findings.iter().filter(|e| e.severity == severity).count()
}

fn print_findings(findings: &[EnvValidationError]) {
    for finding in findings {
        let prefix = match finding.severity {
            ErrorSeverity::Critical => "❌ CRITICAL",
            ErrorSeverity::Warning => "⚠️  WARNING",
            ErrorSeverity::Info => "ℹ️  INFO",
        };
        println!("  {} - {}: {}", prefix, finding.variable, finding.message);
    }
}

/// Generate example environment configuration file
pub fn generate_env_example() -> String {
    format!(
        r#"# CommonGround Environment Configuration
# Copy this file to .env and customize the values for your deployment

# =============================================================================
# Relational Store
# =============================================================================

# Database connection URL
# Default: {db_url}
COMMONGROUND_DB_URL={db_url}

# =============================================================================
# Log Store
# =============================================================================

# Document store holding application and request logs
# Default: {log_uri}
COMMONGROUND_LOG_STORE_URI={log_uri}

# Logical database inside the document store
# Default: {log_db}
COMMONGROUND_LOG_STORE_DB={log_db}

# Base collection for application logs
# Request exchanges go to request_<collection>
# Default: {collection}
COMMONGROUND_LOG_COLLECTION={collection}

# Persist every HTTP request/response exchange
# Default: true
COMMONGROUND_REQUEST_CAPTURE=true

# =============================================================================
# Server Configuration
# =============================================================================

# Server bind address
# Default: 0.0.0.0 (bind to all interfaces)
COMMONGROUND_HOST=0.0.0.0

# Server port
# Default: 8000
# Note: Ports below 1024 may require root privileges
COMMONGROUND_PORT=8000

# =============================================================================
# Logging Configuration
# =============================================================================

# Log level configuration
# Default: {log_level}
# Examples:
#   RUST_LOG=debug                                 # Everything at debug level
#   COMMONGROUND_LOG_LEVEL=commonground=debug      # Override for this service
RUST_LOG={log_level}

# =============================================================================
# Service Settings
# =============================================================================

# Base URL of the auth service
# Default: {auth_url}
COMMONGROUND_AUTH_URL={auth_url}

# Service name reported by the health route
COMMONGROUND_PROJECT_NAME="{project}"
"#,
        db_url = DEFAULT_DB_URL,
        log_uri = DEFAULT_LOG_STORE_URI,
        log_db = DEFAULT_LOG_STORE_DB,
        collection = DEFAULT_COLLECTION,
        log_level = DEFAULT_LOG_LEVEL,
        auth_url = DEFAULT_AUTH_URL,
        project = DEFAULT_PROJECT_NAME,
    )
}

/// Read a string variable, recording an info message when the default is used
fn string_var_with_default(
    var_name: &str,
    default: &str,
    warnings: &mut Vec<EnvValidationError>,
) -> String {
    env::var(var_name).unwrap_or_else(|_| {
        warnings.push(EnvValidationError {
            variable: var_name.to_string(),
            message: format!("Using default value '{}'", default),
            severity: ErrorSeverity::Info,
        });
        default.to_string()
    })
}

/// Helper function to parse boolean environment variable with default value
fn parse_bool_env_var_with_default(
    var_name: &str,
    default: bool,
    warnings: &mut Vec<EnvValidationError>,
) -> bool {
    match env::var(var_name) {
        Ok(value_str) => match value_str.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                warnings.push(EnvValidationError {
                    variable: var_name.to_string(),
                    message: format!(
                        "Invalid boolean value '{}'. Using default: {}",
                        value_str, default
                    ),
                    severity: ErrorSeverity::Warning,
                });
                default
            }
        },
        Err(_) => {
            warnings.push(EnvValidationError {
                variable: var_name.to_string(),
                message: format!("Using default value: {}", default),
                severity: ErrorSeverity::Info,
            });
            default
        }
    }
}
