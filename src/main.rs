mod config;
mod io;
mod logging;
mod lsp;
mod session;
mod symbol;

#[cfg(test)]
mod test_utils;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use config::{ConfigError, ServerConfig};
use logging::{LogConfig, init_logging};
use session::{SessionError, SymbolSession};
use symbol::Symbol;
use thiserror::Error;
use tracing::{error, info, warn};

/// List the functions declared in a source file, as reported by gopls
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// File to analyze
    #[arg(value_name = "FILE")]
    file: PathBuf,
}

#[derive(Error, Debug)]
enum AppError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Failed to write output: {0}")]
    Output(#[source] std::io::Error),
}

/// Names of the function symbols, in the order the server reported them
fn function_names(symbols: &[Symbol]) -> Vec<&str> {
    symbols
        .iter()
        .filter(|symbol| symbol.is_function())
        .map(|symbol| symbol.name.as_str())
        .collect()
}

async fn run(args: Args) -> Result<(), AppError> {
    let config = ServerConfig::from_env()?;

    let path = std::fs::canonicalize(&args.file).map_err(|source| AppError::ReadFile {
        path: args.file.clone(),
        source,
    })?;
    let text = std::fs::read_to_string(&path).map_err(|source| AppError::ReadFile {
        path: path.clone(),
        source,
    })?;

    // The file's directory is the workspace root
    let root = path.parent().unwrap_or(path.as_path()).to_path_buf();
    info!("Analyzing {} in workspace {}", path.display(), root.display());

    let session = SymbolSession::start(&config, &root).await?;

    let cancel = session.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; abandoning the symbol request");
            cancel.cancel();
        }
    });

    let result = session.document_symbols(&path, text).await;
    interrupt.abort();

    let symbols = match result {
        Ok(symbols) => symbols,
        Err(e) => {
            if let Err(close_err) = session.close().await {
                error!("Failed to close session: {}", close_err);
            }
            return Err(e.into());
        }
    };
    session.close().await?;

    let mut stdout = std::io::stdout().lock();
    for name in function_names(&symbols) {
        writeln!(stdout, "{name}").map_err(AppError::Output)?;
    }
    stdout.flush().map_err(AppError::Output)?;

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(LogConfig::from_env()) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::SymbolKind;
    use symbol::location::{Position, Range};

    fn symbol(name: &str, kind: SymbolKind) -> Symbol {
        let position = Position { line: 0, column: 0 };
        Symbol {
            name: name.to_string(),
            kind,
            container_name: None,
            range: Range {
                start: position,
                end: position,
            },
        }
    }

    #[test]
    fn test_function_names_keep_declaration_order() {
        let symbols = [
            symbol("F", SymbolKind::FUNCTION),
            symbol("T", SymbolKind::STRUCT),
            symbol("Handle", SymbolKind::METHOD),
            symbol("g", SymbolKind::FUNCTION),
        ];
        assert_eq!(function_names(&symbols), ["F", "g"]);
    }

    #[test]
    fn test_single_positional_argument() {
        let args = Args::try_parse_from(["lsp-symbols", "/tmp/a.go"]).unwrap();
        assert_eq!(args.file, PathBuf::from("/tmp/a.go"));

        assert!(Args::try_parse_from(["lsp-symbols"]).is_err());
        assert!(Args::try_parse_from(["lsp-symbols", "--root", "/tmp", "/tmp/a.go"]).is_err());
    }
}
